//! Heartbeat timer.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

/// Outcome of a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Send a ping.
    Ping,
    /// The previous ping was never answered.
    Dead,
}

/// Periodic liveness probe. At most one interval exists at a time.
#[derive(Debug)]
pub struct Heartbeat {
    period: Duration,
    require_pong: bool,
    ticker: Option<Interval>,
    outstanding: bool,
}

impl Heartbeat {
    #[must_use]
    pub const fn new(period: Duration, require_pong: bool) -> Self {
        Self {
            period,
            require_pong,
            ticker: None,
            outstanding: false,
        }
    }

    /// Start (or restart) the timer. The first tick fires one period from now.
    pub fn start(&mut self) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        self.outstanding = false;
    }

    pub fn stop(&mut self) {
        self.ticker = None;
        self.outstanding = false;
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Record that the remote answered.
    pub const fn pong(&mut self) {
        self.outstanding = false;
    }

    /// Wait for the next tick. Pending forever while stopped.
    pub async fn tick(&mut self) -> Beat {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
                if self.require_pong && self.outstanding {
                    Beat::Dead
                } else {
                    self.outstanding = true;
                    Beat::Ping
                }
            }
            None => futures::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_period() {
        let mut heartbeat = Heartbeat::new(Duration::from_secs(30), false);
        heartbeat.start();
        let started = Instant::now();
        assert_eq!(heartbeat.tick().await, Beat::Ping);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        assert_eq!(heartbeat.tick().await, Beat::Ping);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_ping_is_dead_when_required() {
        let mut heartbeat = Heartbeat::new(Duration::from_secs(1), true);
        heartbeat.start();
        assert_eq!(heartbeat.tick().await, Beat::Ping);
        heartbeat.pong();
        assert_eq!(heartbeat.tick().await, Beat::Ping);
        assert_eq!(heartbeat.tick().await, Beat::Dead);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_heartbeat_never_ticks() {
        let mut heartbeat = Heartbeat::new(Duration::from_millis(10), false);
        heartbeat.start();
        heartbeat.stop();
        assert!(!heartbeat.is_running());
        let waited = tokio::time::timeout(Duration::from_secs(1), heartbeat.tick()).await;
        assert!(waited.is_err());
    }
}
