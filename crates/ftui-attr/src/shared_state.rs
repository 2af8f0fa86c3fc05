#![forbid(unsafe_code)]

//! Thread-safe, generation-counted state with direct or deferred delivery.
//!
//! [`SharedState<S>`] is the synchronized counterpart of an attribute: any
//! thread may [`set`](SharedState::set) it, and listeners choose how they hear
//! about it.
//!
//! - [`Delivery::Direct`] runs the callback on the setting thread, after the
//!   internal lock is released.
//! - [`Delivery::Deferred`] queues the callback on a [`DeferredQueue`]; it runs
//!   when the owner thread drains the queue (the
//!   [`TransitionScheduler`](ftui_transition::TransitionScheduler) does so at
//!   the end of every tick). With `fire_once` set, queued callbacks for the
//!   same listener coalesce and only the latest state is delivered.
//!
//! # Invariants
//!
//! 1. `generation` increases by exactly 1 per value-changing mutation.
//! 2. A listener never observes a generation lower than or equal to one it
//!    already observed; stale deliveries are dropped.
//! 3. After [`remove_listener`](SharedState::remove_listener) returns, queued
//!    deliveries for that listener are skipped when drained.
//!
//! # Failure Modes
//!
//! - **Poisoned lock**: a panic while the lock is held (only possible inside
//!   a `PartialEq` or `Clone` impl of `S`) is recovered from; the state keeps
//!   whatever value it had.
//! - **Re-entrant update**: the closure passed to
//!   [`update`](SharedState::update) runs under the lock; touching the same
//!   state from inside it deadlocks. Listener callbacks run outside the lock
//!   and may set the state freely.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ftui_transition::DeferredQueue;
use tracing::trace;

/// How a [`SharedState`] listener is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Synchronously on the thread that changed the state.
    Direct,
    /// On the owner thread, when the deferred queue is drained.
    Deferred {
        /// Coalesce queued deliveries and deliver only the latest state.
        fire_once: bool,
    },
}

/// Handle returned by [`SharedState::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SharedListenerId(u64);

impl SharedListenerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

type SharedCallback<S> = Arc<dyn Fn(&S, u64) + Send + Sync>;

#[derive(Clone)]
struct SharedListener<S> {
    id: SharedListenerId,
    delivery: Delivery,
    callback: SharedCallback<S>,
    alive: Arc<AtomicBool>,
    last_delivered: Arc<AtomicU64>,
}

impl<S> SharedListener<S> {
    fn deliver(&self, state: &S, generation: u64) -> bool {
        if !self.alive.load(Ordering::Acquire) {
            return false;
        }
        let previous = self.last_delivered.fetch_max(generation, Ordering::AcqRel);
        if previous >= generation {
            trace!(
                listener = self.id.0,
                generation, previous, "dropping stale shared state delivery"
            );
            return false;
        }
        (self.callback)(state, generation);
        true
    }
}

struct SharedInner<S> {
    state: S,
    generation: u64,
    listeners: Vec<SharedListener<S>>,
}

/// Mutex-guarded state shared across threads.
///
/// Cloning yields another handle to the same state.
pub struct SharedState<S> {
    inner: Arc<Mutex<SharedInner<S>>>,
    queue: DeferredQueue,
}

impl<S> Clone for SharedState<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            queue: self.queue.clone(),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for SharedState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("SharedState")
            .field("state", &inner.state)
            .field("generation", &inner.generation)
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

impl<S> SharedState<S> {
    fn lock(&self) -> MutexGuard<'_, SharedInner<S>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<S: Clone + PartialEq + Send + 'static> SharedState<S> {
    /// State starting at `initial` (generation 0). Deferred listeners are
    /// queued on `queue`.
    #[must_use]
    pub fn new(initial: S, queue: DeferredQueue) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SharedInner {
                state: initial,
                generation: 0,
                listeners: Vec::new(),
            })),
            queue,
        }
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> S {
        self.lock().state.clone()
    }

    /// Number of value-changing mutations so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Queue that deferred listeners are delivered through.
    #[must_use]
    pub fn queue(&self) -> &DeferredQueue {
        &self.queue
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Register `callback`, invoked with the new state and its generation.
    ///
    /// Only changes made after registration are delivered.
    pub fn add_listener(
        &self,
        delivery: Delivery,
        callback: impl Fn(&S, u64) + Send + Sync + 'static,
    ) -> SharedListenerId {
        let id = SharedListenerId::next();
        let mut inner = self.lock();
        let generation = inner.generation;
        inner.listeners.push(SharedListener {
            id,
            delivery,
            callback: Arc::new(callback),
            alive: Arc::new(AtomicBool::new(true)),
            last_delivered: Arc::new(AtomicU64::new(generation)),
        });
        id
    }

    /// Remove a listener and cancel its queued deliveries. Idempotent.
    pub fn remove_listener(&self, id: SharedListenerId) -> bool {
        let mut inner = self.lock();
        let Some(pos) = inner.listeners.iter().position(|l| l.id == id) else {
            return false;
        };
        let listener = inner.listeners.remove(pos);
        listener.alive.store(false, Ordering::Release);
        true
    }

    /// Replace the state. Returns the new generation, or `None` if `state`
    /// equals the current one.
    pub fn set(&self, state: S) -> Option<u64> {
        self.publish(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        })
    }

    /// Mutate the state in place under the lock. Returns the new generation,
    /// or `None` if `f` left the state unchanged.
    pub fn update(&self, f: impl FnOnce(&mut S)) -> Option<u64> {
        self.publish(|current| {
            let before = current.clone();
            f(current);
            *current != before
        })
    }

    fn publish(&self, mutate: impl FnOnce(&mut S) -> bool) -> Option<u64> {
        let (state, generation, direct) = {
            let mut inner = self.lock();
            if !mutate(&mut inner.state) {
                return None;
            }
            inner.generation += 1;
            let generation = inner.generation;
            let mut direct = Vec::new();
            // Queued under the lock so queue order follows generation order.
            for listener in &inner.listeners {
                match listener.delivery {
                    Delivery::Direct => direct.push(listener.clone()),
                    Delivery::Deferred { fire_once } => {
                        self.enqueue(listener.clone(), inner.state.clone(), generation, fire_once);
                    }
                }
            }
            trace!(
                generation,
                listeners = inner.listeners.len(),
                "shared state changed"
            );
            (inner.state.clone(), generation, direct)
        };

        for listener in direct {
            listener.deliver(&state, generation);
        }
        Some(generation)
    }

    fn enqueue(&self, listener: SharedListener<S>, state: S, generation: u64, fire_once: bool) {
        let key = listener.id.0;
        let job = move || {
            listener.deliver(&state, generation);
        };
        if fire_once {
            self.queue.defer_keyed(key, job);
        } else {
            self.queue.defer(job);
        }
    }
}

impl<S> SharedState<S>
where
    S: bitflags::Flags + Clone + PartialEq + Send + 'static,
{
    /// Set `flags` in the state.
    pub fn insert_flags(&self, flags: S) -> Option<u64> {
        self.update(|state| state.insert(flags))
    }

    /// Clear `flags` in the state.
    pub fn remove_flags(&self, flags: S) -> Option<u64> {
        self.update(|state| state.remove(flags))
    }
}
