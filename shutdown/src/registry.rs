use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, trace};

// Registry of outstanding interruptible waits, keyed by "<key>-<counter>"
#[derive(Debug, Default)]
pub(crate) struct WaitRegistry {
    entries: Mutex<HashMap<String, CancellationToken>>,
    counter: AtomicU64,
}

impl WaitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new wait under `key`. The entry leaves the registry when
    /// the returned guard is dropped.
    pub fn register(&self, key: &str, cancel_token: CancellationToken) -> WaitEntry<'_> {
        let id = format!("{}-{}", key, self.counter.fetch_add(1, Ordering::Relaxed) + 1);
        trace!(wait_id = id, "register wait");

        self.entries().insert(id.clone(), cancel_token.clone());
        WaitEntry {
            id,
            cancel_token,
            registry: self,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let tokens: Vec<_> = self.entries().values().cloned().collect();
        for token in &tokens {
            token.cancel();
        }
        debug!(count = tokens.len(), "cancel all waits");
        tokens.len()
    }

    pub fn cancel_group(&self, key: &str) -> usize {
        let prefix = format!("{}-", key);
        let tokens: Vec<_> = self
            .entries()
            .iter()
            .filter(|(id, _)| id.starts_with(&prefix))
            .map(|(_, token)| token.clone())
            .collect();
        for token in &tokens {
            token.cancel();
        }
        debug!(key = key, count = tokens.len(), "cancel wait group");
        tokens.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    fn remove(&self, id: &str) {
        self.entries().remove(id);
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A registered wait. Dropping it releases the cancel signal and removes
/// the entry, whichever path the owning wait returned by.
#[derive(Debug)]
pub(crate) struct WaitEntry<'a> {
    id: String,
    cancel_token: CancellationToken,
    registry: &'a WaitRegistry,
}

impl WaitEntry<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel_token.cancelled()
    }
}

impl Drop for WaitEntry<'_> {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        self.registry.remove(&self.id);
        trace!(wait_id = self.id, "release wait");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_carry_key_and_counter() {
        let registry = WaitRegistry::new();
        let first = registry.register("", CancellationToken::new());
        let second = registry.register("db", CancellationToken::new());

        assert_eq!(first.id(), "-1");
        assert_eq!(second.id(), "db-2");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_drop_removes_and_cancels() {
        let registry = WaitRegistry::new();
        let token = CancellationToken::new();
        let entry = registry.register("io", token.clone());
        assert_eq!(registry.len(), 1);

        drop(entry);

        assert_eq!(registry.len(), 0);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_group_matches_prefix_only() {
        let registry = WaitRegistry::new();
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        let other = CancellationToken::new();
        let _a = registry.register("subsys", a.clone());
        let _b = registry.register("subsys", b.clone());
        let _other = registry.register("subsystem", other.clone());

        assert_eq!(registry.cancel_group("subsys"), 2);
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(!other.is_cancelled());
        // cancelled entries stay registered until their owner returns
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_cancel_all_is_repeatable() {
        let registry = WaitRegistry::new();
        let token = CancellationToken::new();
        let _entry = registry.register("", token.clone());

        assert_eq!(registry.cancel_all(), 1);
        assert_eq!(registry.cancel_all(), 1);
        assert!(token.is_cancelled());
    }
}
