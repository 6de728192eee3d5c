use crate::domain::ports::{KeyLock, LockGuard, LockKey};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Table = Arc<Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>>;

/// Process-local lock table: one async mutex per key, created on demand and
/// dropped again once nobody holds or waits for it.
///
/// Only serializes callers inside this process.
#[derive(Default, Clone)]
pub struct InMemoryKeyLock {
    table: Table,
}

impl InMemoryKeyLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        lock_table(&self.table).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock_table(
    table: &Table,
) -> std::sync::MutexGuard<'_, HashMap<LockKey, Arc<AsyncMutex<()>>>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Held {
    key: LockKey,
    table: Table,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for Held {
    fn drop(&mut self) {
        let mut table = lock_table(&self.table);
        self.guard.take();
        if let Some(entry) = table.get(&self.key)
            && Arc::strong_count(entry) == 1
        {
            table.remove(&self.key);
        }
    }
}

/// Dropped on timeout or cancellation while waiting.
struct Waiting {
    key: LockKey,
    table: Table,
    entry: Option<Arc<AsyncMutex<()>>>,
}

impl Drop for Waiting {
    fn drop(&mut self) {
        let mut table = lock_table(&self.table);
        self.entry.take();
        if let Some(entry) = table.get(&self.key)
            && Arc::strong_count(entry) == 1
        {
            table.remove(&self.key);
        }
    }
}

#[async_trait]
impl KeyLock for InMemoryKeyLock {
    async fn acquire(&self, key: LockKey, timeout: Duration) -> Result<LockGuard> {
        let entry = {
            let mut table = lock_table(&self.table);
            table
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let mut waiting = Waiting {
            key: key.clone(),
            table: self.table.clone(),
            entry: Some(entry.clone()),
        };

        let guard = tokio::time::timeout(timeout, entry.lock_owned())
            .await
            .map_err(|_| PaymentError::Timeout(format!("lock {:?} not acquired", key)))?;

        // Ownership of the entry moves from the waiter to the holder.
        waiting.entry.take();
        Ok(LockGuard::new(Held {
            key,
            table: self.table.clone(),
            guard: Some(guard),
        }))
    }
}
