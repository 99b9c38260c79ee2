//! Per-key debouncing of asynchronous actions.
//!
//! Each key has at most one pending action. Scheduling again for the same key
//! aborts the pending timer and starts a new quiet window. Actions are built by
//! a closure that runs only when the timer fires, so they always see fresh state.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(1000);

struct Pending {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Inner<K> {
    pending: Mutex<HashMap<K, Pending>>,
    // One async lock per key with work in flight; removed once nobody holds it.
    lanes: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
    // Signalled whenever the last lane is removed.
    idle: Notify,
    next_generation: AtomicU64,
}

pub struct DebounceCoordinator<K> {
    window: Duration,
    inner: Arc<Inner<K>>,
}

impl<K> Clone for DebounceCoordinator<K> {
    fn clone(&self) -> Self {
        Self {
            window: self.window,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> DebounceCoordinator<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inner: Arc::new(Inner {
                pending: Mutex::new(HashMap::new()),
                lanes: Mutex::new(HashMap::new()),
                idle: Notify::new(),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Runs `action` once `window` has passed without another `schedule` for `key`.
    ///
    /// Replaces any pending action for the key. Must be called from within a tokio runtime.
    /// Failures inside the action are the action's concern; nothing is retried here.
    pub fn schedule<F, Fut>(&self, key: K, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let coordinator = self.clone();
        let task_key = key.clone();
        let window = self.window;

        let mut pending = self.inner.pending.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;

            {
                let mut pending = coordinator.inner.pending.lock();
                match pending.get(&task_key) {
                    Some(entry) if entry.generation == generation => {
                        pending.remove(&task_key);
                    }
                    // replaced or cancelled while we slept
                    _ => return,
                }
            }

            coordinator.run_exclusive(task_key, action()).await;
        });

        if let Some(previous) = pending.insert(key, Pending { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Drops the pending action for `key` without running it.
    ///
    /// Returns `true` if something was pending. An action that already fired is not affected.
    pub fn cancel(&self, key: &K) -> bool {
        match self.inner.pending.lock().remove(key) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Drops every pending action whose key satisfies `matches` and returns how many
    /// were dropped.
    pub fn cancel_matching(&self, mut matches: impl FnMut(&K) -> bool) -> usize {
        let mut pending = self.inner.pending.lock();
        let keys: Vec<K> = pending.keys().filter(|key| matches(key)).cloned().collect();
        for key in &keys {
            if let Some(entry) = pending.remove(key) {
                entry.handle.abort();
            }
        }
        keys.len()
    }

    /// Cancels every pending action and returns how many were dropped.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Pending> = self.inner.pending.lock().drain().map(|(_, p)| p).collect();
        for entry in &drained {
            entry.handle.abort();
        }
        drained.len()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.inner.pending.lock().contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Keys whose work is currently running or queued behind a running lane.
    pub fn in_flight_count(&self) -> usize {
        self.inner.lanes.lock().len()
    }

    /// Resolves once no work is running for any key.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // registered before the check so a removal in between is not missed
            notified.as_mut().enable();
            if self.in_flight_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Awaits `work` while holding the lane for `key`.
    ///
    /// Fired debounced actions run through the same lane, so no two pieces of work
    /// for one key ever overlap. Different keys proceed independently.
    pub async fn run_exclusive<Fut>(&self, key: K, work: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        let lane = {
            let mut lanes = self.inner.lanes.lock();
            Arc::clone(lanes.entry(key.clone()).or_default())
        };

        let output = {
            let _guard = lane.lock().await;
            work.await
        };

        let mut lanes = self.inner.lanes.lock();
        // map + this clone; released under the map lock so a concurrent finisher
        // never counts it
        let last = Arc::strong_count(&lane) == 2;
        drop(lane);
        if last {
            lanes.remove(&key);
            if lanes.is_empty() {
                self.inner.idle.notify_waiters();
            }
        }
        drop(lanes);
        output
    }
}
