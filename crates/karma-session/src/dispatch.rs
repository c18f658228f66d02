//! Kind-specific handler registry.

use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use karma_core::{Envelope, MessageKind};

/// Callback for one envelope kind.
pub type MessageHandler = Arc<dyn Fn(&Envelope) -> anyhow::Result<()> + Send + Sync>;

/// Token returned by [`HandlerRegistry::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Ordered handler lists keyed by envelope kind.
///
/// Handlers run outside the lock, so a handler may register or unregister
/// other handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<MessageKind, Vec<(HandlerId, MessageHandler)>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `kind`.
    pub fn on<F>(&self, kind: MessageKind, handler: F) -> HandlerId
    where
        F: Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns false if it was not registered for `kind`.
    pub fn off(&self, kind: MessageKind, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&kind);
        }
        removed
    }

    /// Number of handlers registered for `kind`.
    #[must_use]
    pub fn count(&self, kind: MessageKind) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Invoke every handler for the envelope's kind, in registration order.
    ///
    /// Errors and panics are logged per handler. Returns how many handlers
    /// completed successfully.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        let snapshot: Vec<(HandlerId, MessageHandler)> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&envelope.kind)
            .cloned()
            .unwrap_or_default();

        let mut succeeded = 0;
        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(e)) => {
                    tracing::warn!(
                        kind = %envelope.kind,
                        handler = id.0,
                        error = %e,
                        "message handler failed"
                    );
                }
                Err(panic) => {
                    tracing::error!(
                        kind = %envelope.kind,
                        handler = id.0,
                        panic = panic_message(panic.as_ref()),
                        "message handler panicked"
                    );
                }
            }
        }
        succeeded
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    fn chat() -> Envelope {
        Envelope::new(MessageKind::ChatMessage, json!({ "content": "hi" }), None)
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let registry = HandlerRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            registry.on(MessageKind::ChatMessage, move |_| {
                order.lock().unwrap().push(n);
                Ok(())
            });
        }
        assert_eq!(registry.dispatch(&chat()), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_failing_handlers_do_not_stop_siblings() {
        let registry = HandlerRegistry::new();
        let hits = Arc::new(Mutex::new(0));

        registry.on(MessageKind::ChatMessage, |_| panic!("boom"));
        registry.on(MessageKind::ChatMessage, |_| anyhow::bail!("bad payload"));
        let counter = Arc::clone(&hits);
        registry.on(MessageKind::ChatMessage, move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        assert_eq!(registry.dispatch(&chat()), 1);
        assert_eq!(registry.dispatch(&chat()), 1);
        assert_eq!(*hits.lock().unwrap(), 2);
    }

    #[test]
    fn test_off_removes_only_that_handler() {
        let registry = HandlerRegistry::new();
        let first = registry.on(MessageKind::TaskUpdate, |_| Ok(()));
        let second = registry.on(MessageKind::TaskUpdate, |_| Ok(()));

        assert!(registry.off(MessageKind::TaskUpdate, first));
        assert!(!registry.off(MessageKind::TaskUpdate, first));
        assert!(!registry.off(MessageKind::ChatMessage, second));
        assert_eq!(registry.count(MessageKind::TaskUpdate), 1);

        assert!(registry.off(MessageKind::TaskUpdate, second));
        assert_eq!(registry.count(MessageKind::TaskUpdate), 0);
    }

    #[test]
    fn test_dispatch_only_matches_kind() {
        let registry = HandlerRegistry::new();
        registry.on(MessageKind::AvatarStatus, |_| Ok(()));
        assert_eq!(registry.dispatch(&chat()), 0);
    }

    #[test]
    fn test_handler_may_register_during_dispatch() {
        let registry = Arc::new(HandlerRegistry::new());
        let inner = Arc::clone(&registry);
        registry.on(MessageKind::ChatMessage, move |_| {
            inner.on(MessageKind::ChatMessage, |_| Ok(()));
            Ok(())
        });
        assert_eq!(registry.dispatch(&chat()), 1);
        assert_eq!(registry.count(MessageKind::ChatMessage), 2);
    }
}
