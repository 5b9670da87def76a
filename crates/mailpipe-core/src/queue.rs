//! Delivery queue and the pool that keeps queues across re-initialisation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};

/// One-shot hook fired when items are pushed into an armed queue.
pub trait QueueNotify: Send + Sync {
    /// Called after the queue lock has been released.
    fn notify(&self);
}

struct QueueState<T> {
    items: VecDeque<T>,
    notify: Option<Arc<dyn QueueNotify>>,
}

/// Unbounded FIFO shared by producer threads and the delivery worker.
///
/// Every push signals the queue's condition variable while the lock is held,
/// so a worker between its emptiness check and its wait cannot miss it.
pub struct DeliveryQueue<T> {
    name: String,
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> DeliveryQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                notify: None,
            }),
            available: Condvar::new(),
        }
    }

    /// Persist name the queue was created under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an item and returns the length observed just before the push.
    ///
    /// A return value of 0 means this push made the queue non-empty. An armed
    /// notification hook is disarmed and fired.
    pub fn push_tail(&self, item: T) -> usize {
        let (prior, hook) = {
            let mut state = self.lock();
            let prior = state.items.len();
            state.items.push_back(item);
            self.available.notify_all();
            (prior, state.notify.take())
        };
        if let Some(hook) = hook {
            hook.notify();
        }
        prior
    }

    /// Reinserts an item at the front, ahead of everything queued after it.
    pub fn push_head(&self, item: T) {
        let mut state = self.lock();
        state.items.push_front(item);
        self.available.notify_all();
    }

    /// Removes the front item. Also disarms the notification hook.
    pub fn pop_head(&self) -> Option<T> {
        let mut state = self.lock();
        state.notify = None;
        state.items.pop_front()
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Arms `hook` to fire once on the next push.
    pub fn enable_notify_on_non_empty(&self, hook: Arc<dyn QueueNotify>) {
        self.lock().notify = Some(hook);
    }

    /// Returns true while a notification hook is armed.
    #[must_use]
    pub fn is_notify_armed(&self) -> bool {
        self.lock().notify.is_some()
    }

    /// Blocks until the queue is non-empty or `stop` is set.
    ///
    /// Returns true if items are available and `stop` is not set.
    pub fn wait_for_items(&self, stop: &AtomicBool) -> bool {
        let mut state = self.lock();
        while state.items.is_empty() && !stop.load(Ordering::SeqCst) {
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        !stop.load(Ordering::SeqCst) && !state.items.is_empty()
    }

    /// Wakes every thread blocked in [`wait_for_items`](Self::wait_for_items).
    pub fn wake(&self) {
        let _state = self.lock();
        self.available.notify_all();
    }

    /// Removes and returns every queued item in order.
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.lock();
        state.notify = None;
        state.items.drain(..).collect()
    }
}

impl<T> fmt::Debug for DeliveryQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("DeliveryQueue")
            .field("name", &self.name)
            .field("len", &state.items.len())
            .field("notify_armed", &state.notify.is_some())
            .finish()
    }
}

struct PoolState<T> {
    idle: HashMap<String, Arc<DeliveryQueue<T>>>,
    in_use: HashSet<String>,
}

/// Queues keyed by persist name.
///
/// A driver releases its queue on deinit and gets the same queue object back
/// on the next init. Deinit drains the queue first, so a released queue is
/// always empty; only one running driver can hold a name at a time.
pub struct QueuePool<T> {
    state: Mutex<PoolState<T>>,
}

impl<T> QueuePool<T> {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState {
                idle: HashMap::new(),
                in_use: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the queue released under `name`, or creates a new one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueInUse`] if another holder has not released it.
    pub fn acquire(&self, name: &str) -> Result<Arc<DeliveryQueue<T>>> {
        let mut state = self.lock();
        if state.in_use.contains(name) {
            return Err(Error::QueueInUse(name.to_string()));
        }
        let queue = state
            .idle
            .remove(name)
            .unwrap_or_else(|| Arc::new(DeliveryQueue::new(name)));
        state.in_use.insert(name.to_string());
        Ok(queue)
    }

    /// Returns a queue to the pool under its own name.
    pub fn release(&self, queue: Arc<DeliveryQueue<T>>) {
        let mut state = self.lock();
        state.in_use.remove(queue.name());
        state.idle.insert(queue.name().to_string(), queue);
    }
}

impl<T> Default for QueuePool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for QueuePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("QueuePool")
            .field("idle", &state.idle.len())
            .field("in_use", &state.in_use)
            .finish()
    }
}
