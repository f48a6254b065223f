use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;

struct Entry {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Cancellable background tasks keyed by message id.
///
/// At most one live task exists per key. Each task is handed a generation
/// number so that it can unregister itself without racing a replacement
/// that was scheduled under the same key.
#[derive(Default)]
pub struct TimerRegistry {
    timers: Mutex<HashMap<String, Entry>>,
    next_generation: AtomicU64,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `make_task(generation)` under `key` unless a task for that key
    /// is still running. Returns whether a task was spawned.
    pub fn spawn_keyed<F, Fut>(&self, key: &str, make_task: F) -> bool
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut timers = self.lock();
        if let Some(entry) = timers.get(key) {
            if !entry.handle.is_finished() {
                return false;
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(make_task(generation));
        timers.insert(key.to_string(), Entry { generation, handle });
        true
    }

    /// Aborts the task for `key`. Returns whether one was registered.
    pub fn cancel(&self, key: &str) -> bool {
        match self.lock().remove(key) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Unregisters a task that is finishing on its own.
    pub fn forget(&self, key: &str, generation: u64) {
        let mut timers = self.lock();
        if timers
            .get(key)
            .is_some_and(|entry| entry.generation == generation)
        {
            timers.remove(key);
        }
    }

    /// Aborts every task and returns how many were registered.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Entry> = self.lock().drain().map(|(_, entry)| entry).collect();
        for entry in &drained {
            entry.handle.abort();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn second_spawn_for_same_key_is_rejected() {
        let registry = TimerRegistry::new();
        assert!(registry.spawn_keyed("a", |_| tokio::time::sleep(Duration::from_secs(5))));
        assert!(!registry.spawn_keyed("a", |_| tokio::time::sleep(Duration::from_secs(5))));
        assert!(registry.spawn_keyed("b", |_| tokio::time::sleep(Duration::from_secs(5))));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_aborts_tasks() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicU64::new(0));
        for key in ["a", "b", "c"] {
            let fired = fired.clone();
            registry.spawn_keyed(key, move |_| async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(registry.cancel_all(), 3);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn forget_ignores_stale_generation() {
        let registry = TimerRegistry::new();
        registry.spawn_keyed("a", |_| tokio::time::sleep(Duration::from_secs(5)));
        registry.cancel("a");

        let mut current = None;
        registry.spawn_keyed("a", |generation| {
            current = Some(generation);
            tokio::time::sleep(Duration::from_secs(5))
        });
        let current = current.unwrap();

        registry.forget("a", current.wrapping_sub(1));
        assert_eq!(registry.len(), 1);

        registry.forget("a", current);
        assert_eq!(registry.len(), 0);
    }
}
