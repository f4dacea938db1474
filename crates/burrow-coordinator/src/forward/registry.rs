//! In-memory registry of live listeners
//!
//! Maps (session, logical path) to the handle of the accept loop that owns
//! the bound listener. A cancelled or released forward moves to a draining
//! set until its teardown finishes, so a new forward of the same key can
//! wait for it. Every operation holds the lock for a single map operation
//! only; nothing awaits or touches the filesystem under it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use burrow_core::{ForwardKey, SessionId};

/// Handle to one live listener
///
/// Cancelling `stop` makes the accept loop drop its listener. `finished`
/// is cancelled once the forward's teardown (socket unlink and row delete)
/// has completed.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    id: u64,
    stop: CancellationToken,
    finished: CancellationToken,
}

impl ListenerHandle {
    /// Token the accept loop and watchdog stop on
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Token cancelled when teardown is complete
    pub fn finished_token(&self) -> CancellationToken {
        self.finished.clone()
    }

    /// Ask the accept loop to close the listener
    pub fn close(&self) {
        self.stop.cancel();
    }

    /// Wait until the forward has been fully torn down
    pub async fn finished(&self) {
        self.finished.cancelled().await;
    }

    fn is(&self, other: &ListenerHandle) -> bool {
        self.id == other.id
    }
}

#[derive(Debug, Default)]
struct Entries {
    live: HashMap<ForwardKey, ListenerHandle>,
    draining: HashMap<ForwardKey, ListenerHandle>,
}

impl Entries {
    /// Move `key` from live to draining if it maps to `handle` (or to anything, when `None`)
    fn retire(&mut self, key: &ForwardKey, handle: Option<&ListenerHandle>) -> Option<ListenerHandle> {
        let matches = match (self.live.get(key), handle) {
            (Some(current), Some(handle)) => current.is(handle),
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return None;
        }
        let removed = self.live.remove(key)?;
        self.draining.insert(key.clone(), removed.clone());
        Some(removed)
    }
}

/// Registry of live forwards keyed by (session, logical path)
#[derive(Debug, Default)]
pub struct ForwardRegistry {
    entries: Mutex<Entries>,
    next_id: AtomicU64,
}

impl ForwardRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        // The maps stay consistent even if a holder panicked: every critical
        // section is a single insert, remove or move.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a handle for a listener about to be registered
    pub fn new_handle(&self) -> ListenerHandle {
        ListenerHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            stop: CancellationToken::new(),
            finished: CancellationToken::new(),
        }
    }

    /// Whether `key` has a live listener
    pub fn contains(&self, key: &ForwardKey) -> bool {
        self.lock().live.contains_key(key)
    }

    /// Handle of a forward under `key` that is still tearing down
    pub fn draining(&self, key: &ForwardKey) -> Option<ListenerHandle> {
        self.lock().draining.get(key).cloned()
    }

    /// Register `handle` under `key` unless the key is already taken
    ///
    /// Returns `false` and leaves the existing entry untouched on conflict.
    pub fn insert(&self, key: ForwardKey, handle: ListenerHandle) -> bool {
        use std::collections::hash_map::Entry;

        match self.lock().live.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    /// Retire `key` and close its listener
    ///
    /// Returns the retired handle; cancelling a missing key is a no-op.
    pub fn cancel(&self, key: &ForwardKey) -> Option<ListenerHandle> {
        let removed = self.lock().retire(key, None);
        if let Some(handle) = &removed {
            handle.close();
        }
        removed
    }

    /// Retire `key` only if it still maps to `handle`, then close `handle`
    ///
    /// Used by the forward's own tasks so that a late exit never removes a
    /// newer forward registered under the same key.
    pub fn release(&self, key: &ForwardKey, handle: &ListenerHandle) {
        self.lock().retire(key, Some(handle));
        handle.close();
    }

    /// Drop the draining entry of `handle` once its teardown is done
    pub fn finish(&self, key: &ForwardKey, handle: &ListenerHandle) {
        let mut entries = self.lock();
        if entries.draining.get(key).is_some_and(|current| current.is(handle)) {
            entries.draining.remove(key);
        }
    }

    /// Keys of `session`'s live forwards
    pub fn session_forwards(&self, session: &SessionId) -> Vec<ForwardKey> {
        self.lock()
            .live
            .keys()
            .filter(|key| &key.session == session)
            .cloned()
            .collect()
    }

    /// Number of live forwards
    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    /// Whether no forwards are live
    pub fn is_empty(&self) -> bool {
        self.lock().live.is_empty()
    }

    /// Number of forwards whose teardown has not finished
    pub fn draining_len(&self) -> usize {
        self.lock().draining.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(session: &str, path: &str) -> ForwardKey {
        ForwardKey::new(SessionId::new(session), path)
    }

    #[test]
    fn test_insert_rejects_duplicate_and_keeps_original() {
        let registry = ForwardRegistry::new();
        let first = registry.new_handle();
        let second = registry.new_handle();

        assert!(registry.insert(key("s1", "/a.sock"), first.clone()));
        assert!(!registry.insert(key("s1", "/a.sock"), second));

        assert_eq!(registry.len(), 1);
        assert!(!first.stop_token().is_cancelled());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let registry = ForwardRegistry::new();
        let handle = registry.new_handle();
        registry.insert(key("s1", "/a.sock"), handle.clone());

        assert!(registry.cancel(&key("s1", "/a.sock")).is_some());
        assert!(registry.cancel(&key("s1", "/a.sock")).is_none());
        assert!(handle.stop_token().is_cancelled());
        assert!(registry.is_empty());
        assert_eq!(registry.draining_len(), 1);

        registry.finish(&key("s1", "/a.sock"), &handle);
        assert_eq!(registry.draining_len(), 0);
    }

    #[test]
    fn test_release_ignores_newer_registration() {
        let registry = ForwardRegistry::new();
        let old = registry.new_handle();
        let new = registry.new_handle();

        registry.insert(key("s1", "/a.sock"), old.clone());
        registry.cancel(&key("s1", "/a.sock"));
        registry.insert(key("s1", "/a.sock"), new.clone());

        // the old accept loop exiting late must not evict the new forward
        registry.release(&key("s1", "/a.sock"), &old);
        assert!(registry.contains(&key("s1", "/a.sock")));
        assert!(!new.stop_token().is_cancelled());

        registry.release(&key("s1", "/a.sock"), &new);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_finish_ignores_other_handles() {
        let registry = ForwardRegistry::new();
        let old = registry.new_handle();
        let stranger = registry.new_handle();

        registry.insert(key("s1", "/a.sock"), old.clone());
        registry.release(&key("s1", "/a.sock"), &old);
        assert!(registry.draining(&key("s1", "/a.sock")).is_some());

        registry.finish(&key("s1", "/a.sock"), &stranger);
        assert_eq!(registry.draining_len(), 1);

        registry.finish(&key("s1", "/a.sock"), &old);
        assert!(registry.draining(&key("s1", "/a.sock")).is_none());
    }

    #[test]
    fn test_session_forwards_are_isolated() {
        let registry = ForwardRegistry::new();
        registry.insert(key("s1", "/a.sock"), registry.new_handle());
        registry.insert(key("s1", "/b.sock"), registry.new_handle());
        registry.insert(key("s2", "/a.sock"), registry.new_handle());

        assert_eq!(registry.session_forwards(&SessionId::new("s1")).len(), 2);
        assert_eq!(registry.session_forwards(&SessionId::new("s2")).len(), 1);
    }
}
