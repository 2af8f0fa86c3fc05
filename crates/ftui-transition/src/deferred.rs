#![forbid(unsafe_code)]

//! Queue of notifications deferred to the owner thread's next update.
//!
//! Any thread may enqueue; the owner drains the queue with
//! [`DeferredQueue::run_pending`], which the
//! [`TransitionScheduler`](crate::TransitionScheduler) calls at the end of
//! every tick.
//!
//! # Invariants
//!
//! 1. Callbacks run in the order they were first enqueued.
//! 2. A keyed entry replaces the queued callback with the same key in place:
//!    the latest callback wins, the original position is kept.
//! 3. Callbacks enqueued while the queue is draining run on the next drain.
//!
//! # Failure Modes
//!
//! - **Callback panics while draining**: remaining callbacks still run. The
//!   first panic is re-raised after all callbacks have been attempted.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::debug_span;
use web_time::Instant;

type DeferredCall = Box<dyn FnOnce() + Send>;

struct DeferredEntry {
    key: Option<u64>,
    call: DeferredCall,
}

/// Shared handle to a deferred notification queue.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone, Default)]
pub struct DeferredQueue {
    entries: Arc<Mutex<Vec<DeferredEntry>>>,
}

impl fmt::Debug for DeferredQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredQueue")
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl DeferredQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DeferredEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue `f` to run on the next drain.
    pub fn defer(&self, f: impl FnOnce() + Send + 'static) {
        self.lock().push(DeferredEntry {
            key: None,
            call: Box::new(f),
        });
    }

    /// Queue `f` under `key`, replacing any callback already queued with it.
    ///
    /// Returns `true` if an earlier callback was replaced.
    pub fn defer_keyed(&self, key: u64, f: impl FnOnce() + Send + 'static) -> bool {
        let mut entries = self.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.key == Some(key)) {
            entry.call = Box::new(f);
            true
        } else {
            entries.push(DeferredEntry {
                key: Some(key),
                call: Box::new(f),
            });
            false
        }
    }

    /// Number of queued callbacks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Whether any callback is queued.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.lock().is_empty()
    }

    /// Run every queued callback. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let pending = std::mem::take(&mut *self.lock());
        if pending.is_empty() {
            return 0;
        }

        let count = pending.len();
        let start = Instant::now();
        let span = debug_span!(
            "transition.deferred",
            count,
            duration_us = tracing::field::Empty
        )
        .entered();

        let mut first_panic: Option<Box<dyn std::any::Any + Send>> = None;
        for entry in pending {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(entry.call));
            if let Err(payload) = result
                && first_panic.is_none()
            {
                first_panic = Some(payload);
            }
        }

        span.record("duration_us", start.elapsed().as_micros() as u64);

        if let Some(payload) = first_panic {
            std::panic::resume_unwind(payload);
        }
        count
    }
}
