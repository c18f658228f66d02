//! WebSocket close codes shared by client and server.

/// Normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Endpoint going away.
pub const GOING_AWAY: u16 = 1001;
/// No status code was present in the close frame.
pub const NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Application code: the peer stopped answering heartbeats.
pub const HEARTBEAT_TIMEOUT: u16 = 4000;
/// Application code: authentication rejected.
pub const AUTH_REJECTED: u16 = 4001;

/// Human-readable fallback for a close code.
#[must_use]
pub fn close_reason(code: u16) -> String {
    let known = match code {
        NORMAL_CLOSURE => "Normal closure",
        GOING_AWAY => "Going away",
        1002 => "Protocol error",
        1003 => "Unsupported data",
        NO_STATUS => "No status received",
        ABNORMAL_CLOSURE => "Abnormal closure",
        1007 => "Invalid frame payload data",
        1008 => "Policy violation",
        1009 => "Message too big",
        1011 => "Internal server error",
        HEARTBEAT_TIMEOUT => "Heartbeat timeout",
        AUTH_REJECTED => "Authentication rejected",
        _ => return format!("Connection closed with code {code}"),
    };
    known.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_fallbacks() {
        assert_eq!(close_reason(NORMAL_CLOSURE), "Normal closure");
        assert_eq!(close_reason(ABNORMAL_CLOSURE), "Abnormal closure");
        assert_eq!(close_reason(AUTH_REJECTED), "Authentication rejected");
        assert_eq!(close_reason(4999), "Connection closed with code 4999");
    }
}
