//! # Work Queue
//!
//! Deduplicating, delay-capable work queue feeding the worker pool.
//!
//! ## Guarantees
//!
//! - **Single flight**: a key handed out by [`WorkQueue::get`] is not handed
//!   out again until [`WorkQueue::done`] is called for it.
//! - **Deduplication**: adding a key that is already pending is a no-op.
//!   Adding a key that is being processed marks it dirty; `done` puts it back
//!   exactly once, no matter how many adds arrived in between.
//! - **Delays**: [`WorkQueue::add_after`] parks a key until its ready time.
//!   Several delayed adds of one key keep the earliest ready time.
//! - **Shutdown**: [`WorkQueue::shut_down`] wakes every blocked `get`; from
//!   then on `get` returns `None` immediately and adds are ignored.
//!
//! [`RateLimitingQueue`] layers a [`RateLimiter`] on top so failing keys are
//! retried with per-key backoff.
//!
//! ## Usage
//!
//! ```ignore
//! use core_controller::queue::RateLimitingQueue;
//!
//! let queue = RateLimitingQueue::from_config(&config.rate_limiter);
//! queue.add(key);
//!
//! while let Some(key) = queue.get().await {
//!     let result = reconcile(&key).await;
//!     queue.done(&key);
//!     match result {
//!         Ok(()) => queue.forget(&key),
//!         Err(_) => { queue.add_rate_limited(key); }
//!     }
//! }
//! ```

use core_async::sync::Notify;
use core_async::time::{sleep_until, Duration, Instant};
use core_runtime::config::RateLimiterConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;
use std::pin::pin;

use crate::rate_limiter::{default_controller_rate_limiter, RateLimiter};

/// Longest a key is ever parked. Larger delays, such as an unbounded
/// `max_delay`, are clamped so the deadline stays representable.
pub const MAX_PARK_DELAY: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// Anything usable as a queue key.
pub trait QueueKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> QueueKey for T where T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Keys ready to be handed out
    pub pending: usize,
    /// Keys handed out and not yet marked done
    pub processing: usize,
    /// Keys parked until a ready time
    pub waiting: usize,
    /// Keys added but not yet handed out (pending, or re-added while processing)
    pub dirty: usize,
}

impl QueueStats {
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.processing == 0 && self.waiting == 0
    }
}

struct Delayed<K> {
    ready_at: Instant,
    seq: u64,
    key: K,
}

impl<K> PartialEq for Delayed<K> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<K> Eq for Delayed<K> {}

impl<K> PartialOrd for Delayed<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so the BinaryHeap pops the earliest ready time first.
impl<K> Ord for Delayed<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    // Heap entries are never removed eagerly; `waiting_index` holds the live
    // (ready_at, seq) per key and anything else popped from the heap is stale.
    waiting: BinaryHeap<Delayed<K>>,
    waiting_index: HashMap<K, (Instant, u64)>,
    next_seq: u64,
    shutting_down: bool,
}

impl<K: QueueKey> QueueState<K> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            waiting: BinaryHeap::new(),
            waiting_index: HashMap::new(),
            next_seq: 0,
            shutting_down: false,
        }
    }

    /// Returns whether the key became available to a getter.
    fn insert(&mut self, key: K) -> bool {
        if self.shutting_down || self.dirty.contains(&key) {
            return false;
        }
        self.dirty.insert(key.clone());
        if self.processing.contains(&key) {
            return false;
        }
        self.queue.push_back(key);
        true
    }

    fn park(&mut self, key: K, ready_at: Instant) -> bool {
        if let Some((existing, _)) = self.waiting_index.get(&key) {
            if *existing <= ready_at {
                return false;
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.waiting_index.insert(key.clone(), (ready_at, seq));
        self.waiting.push(Delayed { ready_at, seq, key });
        true
    }

    fn promote_ready(&mut self, now: Instant) {
        while let Some(head) = self.waiting.peek() {
            if head.ready_at > now {
                break;
            }
            let Some(entry) = self.waiting.pop() else {
                break;
            };
            let live = self.waiting_index.get(&entry.key) == Some(&(entry.ready_at, entry.seq));
            if live {
                self.waiting_index.remove(&entry.key);
                self.insert(entry.key);
            }
        }
    }

    fn next_ready_at(&mut self) -> Option<Instant> {
        while let Some(head) = self.waiting.peek() {
            if self.waiting_index.get(&head.key) == Some(&(head.ready_at, head.seq)) {
                return Some(head.ready_at);
            }
            self.waiting.pop();
        }
        None
    }
}

/// Deduplicating work queue. Share it behind an `Arc`.
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K: QueueKey> Default for WorkQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: QueueKey> WorkQueue<K> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::new()),
            notify: Notify::new(),
        }
    }

    /// Marks `key` as needing processing.
    pub fn add(&self, key: K) {
        if self.state.lock().insert(key) {
            self.notify.notify_one();
        }
    }

    /// Adds `key` once `delay` has elapsed. A zero delay adds immediately.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let parked = {
            let mut state = self.state.lock();
            if state.shutting_down {
                return;
            }
            let now = Instant::now();
            let ready_at = now
                .checked_add(delay.min(MAX_PARK_DELAY))
                .unwrap_or(now);
            state.park(key, ready_at)
        };
        // A blocked getter has to re-arm its timer for the new deadline.
        if parked {
            self.notify.notify_one();
        }
    }

    /// Blocks until a key is available and hands it out, marking it
    /// processing. Returns `None` once the queue is shutting down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                state.promote_ready(Instant::now());
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                state.next_ready_at()
            };

            match deadline {
                Some(deadline) => {
                    core_async::select! {
                        _ = notified => {}
                        _ = sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Finishes processing of `key`. If it was re-added meanwhile it becomes
    /// pending again.
    pub fn done(&self, key: &K) {
        let requeued = {
            let mut state = self.state.lock();
            state.processing.remove(key);
            if !state.shutting_down && state.dirty.contains(key) {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Stops the queue and wakes every blocked getter.
    pub fn shut_down(&self) {
        {
            let mut state = self.state.lock();
            state.shutting_down = true;
            state.waiting.clear();
            state.waiting_index.clear();
        }
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Number of keys ready to be handed out.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            pending: state.queue.len(),
            processing: state.processing.len(),
            waiting: state.waiting_index.len(),
            dirty: state.dirty.len(),
        }
    }
}

impl<K: QueueKey> fmt::Debug for WorkQueue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("stats", &self.stats())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

/// A [`WorkQueue`] whose re-adds are delayed by a [`RateLimiter`].
///
/// Dereferences to the underlying queue for `add`, `get`, `done` and friends.
pub struct RateLimitingQueue<K> {
    queue: WorkQueue<K>,
    limiter: Box<dyn RateLimiter<K>>,
}

impl<K: QueueKey> RateLimitingQueue<K> {
    pub fn new(limiter: impl RateLimiter<K> + 'static) -> Self {
        Self {
            queue: WorkQueue::new(),
            limiter: Box::new(limiter),
        }
    }

    /// Queue using the default controller limiter shaped by `config`.
    pub fn from_config(config: &RateLimiterConfig) -> Self {
        Self::new(default_controller_rate_limiter(config))
    }

    /// Re-adds `key` after the delay the limiter assigns it. Returns that
    /// delay.
    /// Once the queue is shutting down the key is dropped without touching
    /// the limiter, and the returned delay is zero.
    pub fn add_rate_limited(&self, key: K) -> Duration {
        if self.queue.is_shutting_down() {
            return Duration::ZERO;
        }
        let delay = self.limiter.when(&key);
        self.queue.add_after(key, delay);
        delay
    }

    /// Clears the limiter's failure history for `key`.
    pub fn forget(&self, key: &K) {
        self.limiter.forget(key);
    }

    /// How many times `key` has been rate-limited since it was last forgotten.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.limiter.num_requeues(key)
    }
}

impl<K> Deref for RateLimitingQueue<K> {
    type Target = WorkQueue<K>;

    fn deref(&self) -> &Self::Target {
        &self.queue
    }
}

impl<K: QueueKey> fmt::Debug for RateLimitingQueue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitingQueue")
            .field("queue", &self.queue)
            .finish()
    }
}
