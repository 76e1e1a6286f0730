//! Per-key async mutexes for serializing operations scoped to one session key
//! or one workspace id, while letting unrelated keys proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A registry of lazily-created, never-removed per-key `tokio::sync::Mutex`
/// instances. Entries accumulate for the lifetime of the process; this is an
/// accepted tradeoff in exchange for never racing a remove against an
/// in-flight acquire.
#[derive(Default)]
pub struct KeyedLocks {
    locks: SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `key`, blocking (asynchronously) until it is
    /// available. The returned guard holds the lock until dropped.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock();
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }

    pub fn known_keys(&self) -> usize {
        self.locks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn serializes_access_to_the_same_key() {
        let locks = Arc::new(KeyedLocks::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let counter = counter.clone();
            let max_concurrent = max_concurrent.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("same-key").await;
                let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_proceed_independently() {
        let locks = Arc::new(KeyedLocks::new());
        let _a = locks.acquire("a").await;
        // Should not deadlock: a different key is independent of "a".
        let _b = locks.acquire("b").await;
        assert_eq!(locks.known_keys(), 2);
    }
}
