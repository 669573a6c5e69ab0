//! Per-namespace mutation locks
//!
//! Serializes mutating operations on the same namespace inside one process.
//! Cross-process exclusion relies on resource versions and the deletion marker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default, Clone)]
pub struct NamespaceLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl NamespaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `name`
    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Drop entries nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(name.to_string()).or_default().clone()
        };

        lock.lock_owned().await
    }

    /// Number of namespaces with a live lock
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .map(|locks| locks.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_name_is_exclusive() {
        let locks = NamespaceLocks::new();
        let guard = locks.acquire("team-a").await;

        let contender = locks.clone();
        let waiting = tokio::spawn(async move {
            let _guard = contender.acquire("team-a").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_names_do_not_block() {
        let locks = NamespaceLocks::new();
        let _a = locks.acquire("team-a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("team-b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let locks = NamespaceLocks::new();
        drop(locks.acquire("team-a").await);
        drop(locks.acquire("team-b").await);
        let _c = locks.acquire("team-c").await;
        assert_eq!(locks.len(), 1);
    }
}
