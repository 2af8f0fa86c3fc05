#![forbid(unsafe_code)]

//! Per-frame driver for every transition pool of an application.
//!
//! The scheduler owns one [`TransitionPool`] per value type, created lazily
//! the first time [`pool::<T>()`](TransitionScheduler::pool) asks for it, and
//! a [`DeferredQueue`] for notifications that must run on the owner thread.
//! The host loop calls [`tick`](TransitionScheduler::tick) once per frame.
//!
//! # Tick order
//!
//! 1. Value pass of every pool, in pool creation order.
//! 2. Structure pass of every pool.
//! 3. Deferred notifications.
//!
//! Running every value pass before any structure pass means no slot moves
//! while any attribute is receiving values during the frame.

use std::any::{Any, TypeId};
use std::fmt;

use ahash::AHashMap;
use tracing::{debug, debug_span};
use web_time::Instant;

use crate::config::SchedulerConfig;
use crate::deferred::DeferredQueue;
use crate::interpolate::Interpolate;
use crate::pool::{PoolStats, TransitionPool};

/// Type-erased view of a pool, so pools of different value types share one
/// list.
trait ErasedPool {
    fn update_transitions(&self, dt: f64) -> usize;
    fn update_structure(&self);
    fn stats(&self) -> PoolStats;
    fn value_type(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Interpolate + 'static> ErasedPool for TransitionPool<T> {
    fn update_transitions(&self, dt: f64) -> usize {
        TransitionPool::update_transitions(self, dt)
    }

    fn update_structure(&self) {
        TransitionPool::update_structure(self);
    }

    fn stats(&self) -> PoolStats {
        TransitionPool::stats(self)
    }

    fn value_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Aggregate statistics across every pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    /// Number of pools created so far.
    pub pools: usize,
    /// Frames ticked.
    pub frames: u64,
    /// Sum of every pool's [`PoolStats`].
    pub totals: PoolStats,
}

/// Owns the transition pools and drives them once per frame.
pub struct TransitionScheduler {
    config: SchedulerConfig,
    pools: Vec<Box<dyn ErasedPool>>,
    by_type: AHashMap<TypeId, usize>,
    deferred: DeferredQueue,
    frames: u64,
}

impl fmt::Debug for TransitionScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types: Vec<_> = self.pools.iter().map(|p| p.value_type()).collect();
        f.debug_struct("TransitionScheduler")
            .field("config", &self.config)
            .field("pools", &types)
            .field("frames", &self.frames)
            .field("deferred", &self.deferred)
            .finish()
    }
}

impl Default for TransitionScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl TransitionScheduler {
    /// Create a scheduler with no pools.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            pools: Vec::new(),
            by_type: AHashMap::new(),
            deferred: DeferredQueue::new(),
            frames: 0,
        }
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Pool for values of type `T`, created on first use.
    pub fn pool<T: Interpolate + 'static>(&mut self) -> TransitionPool<T> {
        let type_id = TypeId::of::<T>();
        if let Some(&index) = self.by_type.get(&type_id)
            && let Some(pool) = self.pools[index]
                .as_any()
                .downcast_ref::<TransitionPool<T>>()
        {
            return pool.clone();
        }
        let pool = TransitionPool::<T>::new(self.config.pool);
        debug!(
            value_type = std::any::type_name::<T>(),
            bucket_capacity = self.config.pool.bucket_capacity,
            "created transition pool"
        );
        self.by_type.insert(type_id, self.pools.len());
        self.pools.push(Box::new(pool.clone()));
        pool
    }

    /// Whether a pool for `T` has been created.
    #[must_use]
    pub fn has_pool<T: 'static>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    /// Handle to the queue drained at the end of every tick.
    #[must_use]
    pub fn deferred_queue(&self) -> DeferredQueue {
        self.deferred.clone()
    }

    /// Advance every transition by `dt` seconds, compact the pools, then run
    /// deferred notifications.
    ///
    /// `dt` is clamped to [`SchedulerConfig::max_tick_seconds`] when set.
    pub fn tick(&mut self, dt: f64) {
        let dt = match self.config.max_tick_seconds {
            Some(max) if dt > max => max,
            _ => dt,
        };
        self.frames += 1;

        let start = Instant::now();
        let span = debug_span!(
            "transition.frame",
            frame = self.frames,
            pools = self.pools.len(),
            delivered = tracing::field::Empty,
            duration_us = tracing::field::Empty
        )
        .entered();

        let delivered: usize = self
            .pools
            .iter()
            .map(|pool| pool.update_transitions(dt))
            .sum();
        for pool in &self.pools {
            pool.update_structure();
        }
        self.deferred.run_pending();

        span.record("delivered", delivered as u64);
        span.record("duration_us", start.elapsed().as_micros() as u64);
    }

    /// Aggregate statistics.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let mut totals = PoolStats::default();
        for pool in &self.pools {
            let s = pool.stats();
            totals.buckets += s.buckets;
            totals.active += s.active;
            totals.occupied += s.occupied;
            totals.capacity += s.capacity;
        }
        SchedulerStats {
            pools: self.pools.len(),
            frames: self.frames,
            totals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::TransitionParameters;
    use crate::pool::{TransitionKey, TransitionTarget};
    use std::cell::Cell;
    use std::rc::{Rc, Weak};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Last<T: Copy>(Cell<Option<T>>);

    impl<T: Copy> TransitionTarget<T> for Last<T> {
        fn apply_transition_value(&self, _key: TransitionKey, value: T, _finished: bool) {
            self.0.set(Some(value));
        }
    }

    #[test]
    fn pools_are_created_lazily_per_type() {
        let mut scheduler = TransitionScheduler::default();
        assert!(!scheduler.has_pool::<f64>());
        let a = scheduler.pool::<f64>();
        let b = scheduler.pool::<f64>();
        let c = scheduler.pool::<i32>();
        assert!(a.ptr_eq(&b));
        assert!(scheduler.has_pool::<i32>());
        assert_eq!(scheduler.stats().pools, 2);
        drop(c);
    }

    #[test]
    fn tick_drives_every_pool() {
        let mut scheduler = TransitionScheduler::default();
        let floats = Rc::new(Last::<f64>(Cell::new(None)));
        let ints = Rc::new(Last::<i32>(Cell::new(None)));
        let params = TransitionParameters::new(1.0);

        let weak: Weak<dyn TransitionTarget<f64>> = Rc::downgrade(&floats) as Weak<Last<f64>>;
        scheduler.pool::<f64>().acquire(0.0, 10.0, &params, weak);
        let weak: Weak<dyn TransitionTarget<i32>> = Rc::downgrade(&ints) as Weak<Last<i32>>;
        scheduler.pool::<i32>().acquire(0, 100, &params, weak);

        scheduler.tick(0.5);
        assert_eq!(floats.0.get(), Some(5.0));
        assert_eq!(ints.0.get(), Some(50));
        assert_eq!(scheduler.stats().totals.active, 2);

        scheduler.tick(0.5);
        assert_eq!(floats.0.get(), Some(10.0));
        assert_eq!(ints.0.get(), Some(100));
        let stats = scheduler.stats();
        assert_eq!(stats.totals.active, 0);
        assert_eq!(stats.totals.buckets, 0);
        assert_eq!(stats.frames, 2);
    }

    #[test]
    fn max_tick_clamps_delta() {
        let mut scheduler = TransitionScheduler::new(SchedulerConfig {
            max_tick_seconds: Some(0.1),
            ..SchedulerConfig::default()
        });
        let target = Rc::new(Last::<f64>(Cell::new(None)));
        let weak: Weak<dyn TransitionTarget<f64>> = Rc::downgrade(&target) as Weak<Last<f64>>;
        let pool = scheduler.pool::<f64>();
        let key = pool.acquire(0.0, 1.0, &TransitionParameters::new(1.0), weak);
        scheduler.tick(5.0);
        assert_eq!(pool.progress(key), Some(0.1));
    }

    #[test]
    fn tick_drains_deferred_queue() {
        let mut scheduler = TransitionScheduler::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        scheduler.deferred_queue().defer(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        scheduler.tick(0.016);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
