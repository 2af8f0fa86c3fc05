#![forbid(unsafe_code)]

//! Bucketed, compacting pool of transition slots.
//!
//! # Design
//!
//! A [`TransitionPool<T>`] stores every in-flight transition of one value type
//! in fixed-capacity buckets. Slots are packed at the front of each bucket, so
//! a tick scans exactly the occupied slots. Churn (thousands of short
//! animations per second) reuses bucket storage instead of allocating per
//! slot.
//!
//! Attributes never hold slot addresses. They hold a [`TransitionKey`], a
//! generational index into the pool's key table, and the table maps each key to
//! the slot's current `(bucket, slot)` location. Compaction and merging move
//! slots and repair the table in the same step, so a key always resolves to its
//! own slot or to nothing.
//!
//! # Tick
//!
//! 1. **Value pass** ([`update_transitions`](TransitionPool::update_transitions)):
//!    advance every active slot, compute its value, then hand values to their
//!    [`TransitionTarget`]s *after* releasing the pool borrow. Slot locations
//!    never change during this pass.
//! 2. **Structure pass** ([`update_structure`](TransitionPool::update_structure)):
//!    free expired and detached slots with swap-compaction, drop empty buckets,
//!    and merge small buckets smallest-first.
//!
//! # Slot lifecycle
//!
//! `Free → Active → (Expired | Detached) → Free`. A slot leaves the `Active`
//! state either by reaching `progress >= 1` (expired) or by being released
//! (detached); both retired states are reclaimed by the next structure pass.
//! Its key stops resolving the moment it leaves `Active`.
//!
//! # Failure Modes
//!
//! - **Dropped target**: a slot whose target has been dropped is detached on
//!   the next value pass.
//! - **Stale key**: every keyed operation on a stale key is a no-op returning
//!   `false` / `None`.
//! - **Re-entrant tick**: calling `tick()` from a target callback panics
//!   (`RefCell` borrow rules). Retargeting, acquiring and releasing from a
//!   callback are fine.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, debug_span, trace};
use web_time::Instant;

use crate::config::PoolConfig;
use crate::easing::Easing;
use crate::interpolate::Interpolate;
use crate::params::TransitionParameters;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Receiver of the values a transition slot produces.
///
/// Implemented by attributes; the pool holds a `Weak` to it.
pub trait TransitionTarget<T> {
    /// Called once per tick while the slot behind `key` is running. `finished`
    /// is `true` exactly once, on the tick that writes the exact target value.
    ///
    /// Writes are delivered after the whole value pass, so a target that moved
    /// to a new slot earlier in the same pass may still receive a write for
    /// its old `key` and should ignore it.
    ///
    /// A slot retargeted or restarted during the pass does not deliver the
    /// value it computed before the restart.
    fn apply_transition_value(&self, key: TransitionKey, value: T, finished: bool);
}

/// Generational handle to a slot in a [`TransitionPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionKey {
    index: u32,
    generation: u32,
}

impl TransitionKey {
    /// Index into the pool's key table.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation the key was issued with.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

/// Lifecycle state of an occupied slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Progress is being advanced each tick.
    Active,
    /// Reached its target; reclaimed by the next structure pass.
    Expired,
    /// Released by its owner; reclaimed by the next structure pass.
    Detached,
}

/// Occupancy snapshot of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Number of buckets.
    pub buckets: usize,
    /// Slots in the `Active` state.
    pub active: usize,
    /// Occupied slots, including retired ones awaiting the structure pass.
    pub occupied: usize,
    /// Total slot capacity across buckets.
    pub capacity: usize,
}

// ---------------------------------------------------------------------------
// Internal storage
// ---------------------------------------------------------------------------

struct Slot<T> {
    key_index: u32,
    /// Bumped by every retarget or restart.
    epoch: u32,
    state: SlotState,
    source: T,
    target: T,
    progress: f64,
    speed: f64,
    easing: Easing,
    link: Weak<dyn TransitionTarget<T>>,
}

struct Bucket<T> {
    slots: Vec<Slot<T>>,
}

impl<T> Bucket<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotLocation {
    bucket: u32,
    slot: u32,
}

/// Entry in the key table. `location` is `Some` while a slot exists for the
/// entry; `live` is `true` only while that slot is `Active`.
#[derive(Debug, Clone, Copy)]
struct KeyEntry {
    generation: u32,
    location: Option<SlotLocation>,
    live: bool,
}

/// Value produced by the value pass, applied after the pool borrow ends.
struct PendingWrite<T> {
    link: Weak<dyn TransitionTarget<T>>,
    key: TransitionKey,
    epoch: u32,
    value: T,
    finished: bool,
}

/// Summary of one structure pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct StructureReport {
    freed: usize,
    dropped_buckets: usize,
    merges: usize,
}

struct PoolInner<T> {
    config: PoolConfig,
    buckets: Vec<Bucket<T>>,
    keys: Vec<KeyEntry>,
    free_keys: Vec<u32>,
}

fn index_u32(i: usize) -> u32 {
    u32::try_from(i).unwrap_or(u32::MAX)
}

impl<T: Interpolate + 'static> PoolInner<T> {
    fn new(config: PoolConfig) -> Self {
        Self {
            config: config.with_bucket_capacity(config.bucket_capacity),
            buckets: Vec::new(),
            keys: Vec::new(),
            free_keys: Vec::new(),
        }
    }

    fn capacity(&self) -> usize {
        self.config.bucket_capacity
    }

    /// Location of the slot behind `key`, if the key is live.
    fn resolve(&self, key: TransitionKey) -> Option<SlotLocation> {
        let entry = self.keys.get(key.index as usize)?;
        if entry.generation != key.generation || !entry.live {
            return None;
        }
        entry.location
    }

    fn slot(&self, key: TransitionKey) -> Option<&Slot<T>> {
        let loc = self.resolve(key)?;
        self.buckets
            .get(loc.bucket as usize)?
            .slots
            .get(loc.slot as usize)
    }

    fn slot_mut(&mut self, key: TransitionKey) -> Option<&mut Slot<T>> {
        let loc = self.resolve(key)?;
        self.buckets
            .get_mut(loc.bucket as usize)?
            .slots
            .get_mut(loc.slot as usize)
    }

    /// Whether a write computed for `key` at `epoch` still describes the slot.
    fn is_current(&self, key: TransitionKey, epoch: u32) -> bool {
        self.slot(key).is_some_and(|s| s.epoch == epoch)
    }

    fn allocate_key(&mut self, location: SlotLocation) -> TransitionKey {
        if let Some(index) = self.free_keys.pop() {
            let entry = &mut self.keys[index as usize];
            entry.location = Some(location);
            entry.live = true;
            TransitionKey {
                index,
                generation: entry.generation,
            }
        } else {
            let index = index_u32(self.keys.len());
            self.keys.push(KeyEntry {
                generation: 0,
                location: Some(location),
                live: true,
            });
            TransitionKey {
                index,
                generation: 0,
            }
        }
    }

    /// Return a key entry to the free list. Bumping the generation makes every
    /// copy of the old key stale.
    fn free_key(&mut self, index: u32) {
        let entry = &mut self.keys[index as usize];
        entry.generation = entry.generation.wrapping_add(1);
        entry.location = None;
        entry.live = false;
        self.free_keys.push(index);
    }

    /// Point the key entry of the slot now at `(bucket, slot)` to its new home.
    fn relocate(&mut self, bucket: usize, slot: usize) {
        let key_index = self.buckets[bucket].slots[slot].key_index;
        self.keys[key_index as usize].location = Some(SlotLocation {
            bucket: index_u32(bucket),
            slot: index_u32(slot),
        });
    }

    /// Repair every key entry after buckets were removed or reordered.
    fn reindex(&mut self) {
        for bucket in 0..self.buckets.len() {
            for slot in 0..self.buckets[bucket].slots.len() {
                self.relocate(bucket, slot);
            }
        }
    }

    fn acquire(
        &mut self,
        source: T,
        target: T,
        params: &TransitionParameters,
        link: Weak<dyn TransitionTarget<T>>,
    ) -> TransitionKey {
        let capacity = self.capacity();
        let bucket = match self
            .buckets
            .iter()
            .position(|b| b.slots.len() < capacity)
        {
            Some(bucket) => bucket,
            None => {
                self.buckets.push(Bucket::with_capacity(capacity));
                trace!(
                    buckets = self.buckets.len(),
                    capacity, "transition pool grew by one bucket"
                );
                self.buckets.len() - 1
            }
        };
        let slot = self.buckets[bucket].slots.len();
        let key = self.allocate_key(SlotLocation {
            bucket: index_u32(bucket),
            slot: index_u32(slot),
        });
        self.buckets[bucket].slots.push(Slot {
            key_index: key.index,
            epoch: 0,
            state: SlotState::Active,
            source,
            target,
            progress: params.initial_progress(),
            speed: params.speed(),
            easing: params.easing,
            link,
        });
        key
    }

    fn retire(&mut self, key: TransitionKey, state: SlotState) -> bool {
        let Some(slot) = self.slot_mut(key) else {
            return false;
        };
        slot.state = state;
        self.keys[key.index as usize].live = false;
        true
    }

    fn advance(&mut self, dt: f64) -> Vec<PendingWrite<T>> {
        let mut writes = Vec::new();
        let mut retired = Vec::new();
        let keys = &self.keys;
        for bucket in &mut self.buckets {
            for slot in &mut bucket.slots {
                if slot.state != SlotState::Active {
                    continue;
                }
                if slot.link.strong_count() == 0 {
                    slot.state = SlotState::Detached;
                    retired.push(slot.key_index);
                    continue;
                }
                slot.progress += dt * slot.speed;
                if slot.progress < 0.0 {
                    continue;
                }
                let key = TransitionKey {
                    index: slot.key_index,
                    generation: keys[slot.key_index as usize].generation,
                };
                let (value, finished) = if slot.progress < 1.0 {
                    let t = slot.easing.apply(slot.progress);
                    (T::interpolate(&slot.source, &slot.target, t), false)
                } else {
                    slot.state = SlotState::Expired;
                    retired.push(slot.key_index);
                    (slot.target.clone(), true)
                };
                writes.push(PendingWrite {
                    link: slot.link.clone(),
                    key,
                    epoch: slot.epoch,
                    value,
                    finished,
                });
            }
        }
        for index in retired {
            self.keys[index as usize].live = false;
        }
        writes
    }

    fn compact(&mut self) -> StructureReport {
        let mut report = StructureReport::default();

        // Swap-compaction: the last slot of the bucket fills each freed index.
        for bucket in 0..self.buckets.len() {
            let mut i = 0;
            while i < self.buckets[bucket].slots.len() {
                if self.buckets[bucket].slots[i].state == SlotState::Active {
                    i += 1;
                    continue;
                }
                let freed = self.buckets[bucket].slots.swap_remove(i);
                self.free_key(freed.key_index);
                report.freed += 1;
                if i < self.buckets[bucket].slots.len() {
                    self.relocate(bucket, i);
                }
            }
        }

        let before = self.buckets.len();
        self.buckets.retain(|b| !b.slots.is_empty());
        report.dropped_buckets = before - self.buckets.len();

        if self.config.merge_buckets {
            report.merges = self.merge_small_buckets();
        }
        if report.dropped_buckets > 0 || report.merges > 0 {
            self.reindex();
        }
        report
    }

    /// Greedily merge the two emptiest buckets while their combined load fits
    /// in one bucket. Returns the number of merges.
    fn merge_small_buckets(&mut self) -> usize {
        if self.buckets.len() < 2 {
            return 0;
        }
        let capacity = self.capacity();
        let mut heap: BinaryHeap<Reverse<(usize, usize)>> = self
            .buckets
            .iter()
            .enumerate()
            .map(|(i, b)| Reverse((b.slots.len(), i)))
            .collect();
        let mut merged_away = vec![false; self.buckets.len()];
        let mut merges = 0;

        loop {
            let Some(Reverse((small_len, small))) = heap.pop() else {
                break;
            };
            let Some(Reverse((large_len, large))) = heap.pop() else {
                break;
            };
            if small_len + large_len > capacity {
                break;
            }
            let moved = std::mem::take(&mut self.buckets[small].slots);
            self.buckets[large].slots.extend(moved);
            merged_away[small] = true;
            merges += 1;
            trace!(
                from = small,
                into = large,
                load = small_len + large_len,
                "merged transition buckets"
            );
            heap.push(Reverse((small_len + large_len, large)));
        }

        if merges > 0 {
            let mut index = 0;
            self.buckets.retain(|_| {
                let keep = !merged_away[index];
                index += 1;
                keep
            });
        }
        merges
    }

    fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            buckets: self.buckets.len(),
            capacity: self.buckets.len() * self.capacity(),
            ..PoolStats::default()
        };
        for bucket in &self.buckets {
            stats.occupied += bucket.slots.len();
            stats.active += bucket
                .slots
                .iter()
                .filter(|s| s.state == SlotState::Active)
                .count();
        }
        stats
    }
}

// ---------------------------------------------------------------------------
// TransitionPool
// ---------------------------------------------------------------------------

/// Pool of transition slots for values of type `T`.
///
/// Cloning a `TransitionPool` creates a new handle to the **same** storage;
/// attributes keep a handle so they can retarget their slot on `set()`.
///
/// # Invariants
///
/// 1. Occupied slots are packed at the front of their bucket.
/// 2. A live [`TransitionKey`] resolves to exactly the slot it was issued for,
///    across any number of compactions and merges.
/// 3. Slot locations change only inside the structure pass.
/// 4. The final value written by a transition is its target, bit for bit.
pub struct TransitionPool<T> {
    inner: Rc<RefCell<PoolInner<T>>>,
}

impl<T> Clone for TransitionPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Interpolate + 'static> fmt::Debug for TransitionPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("TransitionPool")
            .field("config", &inner.config)
            .field("stats", &inner.stats())
            .finish()
    }
}

impl<T: Interpolate + 'static> Default for TransitionPool<T> {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl<T: Interpolate + 'static> TransitionPool<T> {
    /// Create an empty pool. No bucket is allocated until the first acquire.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(PoolInner::new(config))),
        }
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> PoolConfig {
        self.inner.borrow().config
    }

    /// Whether two handles refer to the same pool.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Start a transition from `source` to `target`.
    ///
    /// Always succeeds; a full pool grows by exactly one bucket.
    pub fn acquire(
        &self,
        source: T,
        target: T,
        params: &TransitionParameters,
        link: Weak<dyn TransitionTarget<T>>,
    ) -> TransitionKey {
        self.inner
            .borrow_mut()
            .acquire(source, target, params, link)
    }

    /// Restart a live transition from `source` toward a new `target`.
    ///
    /// Progress returns to the start of the delay. Returns `false` for a stale
    /// key.
    pub fn retarget(&self, key: TransitionKey, source: T, target: T) -> bool {
        let mut inner = self.inner.borrow_mut();
        let Some(slot) = inner.slot_mut(key) else {
            return false;
        };
        slot.source = source;
        slot.target = target;
        slot.progress = 0.0;
        slot.epoch = slot.epoch.wrapping_add(1);
        true
    }

    /// Restart a live transition with new parameters.
    ///
    /// Returns `false` for a stale key.
    pub fn restart(
        &self,
        key: TransitionKey,
        source: T,
        target: T,
        params: &TransitionParameters,
    ) -> bool {
        let mut inner = self.inner.borrow_mut();
        let Some(slot) = inner.slot_mut(key) else {
            return false;
        };
        slot.source = source;
        slot.target = target;
        slot.progress = params.initial_progress();
        slot.speed = params.speed();
        slot.easing = params.easing;
        slot.epoch = slot.epoch.wrapping_add(1);
        true
    }

    /// Change speed and easing of a running transition without restarting it.
    pub fn update_parameters(&self, key: TransitionKey, params: &TransitionParameters) -> bool {
        let mut inner = self.inner.borrow_mut();
        let Some(slot) = inner.slot_mut(key) else {
            return false;
        };
        slot.speed = params.speed();
        slot.easing = params.easing;
        true
    }

    /// Detach a transition. The slot is reclaimed by the next structure pass.
    ///
    /// Idempotent: returns `false` if the key is already stale.
    pub fn release(&self, key: TransitionKey) -> bool {
        self.inner.borrow_mut().retire(key, SlotState::Detached)
    }

    /// Whether `key` refers to an active slot.
    #[must_use]
    pub fn contains(&self, key: TransitionKey) -> bool {
        self.inner.borrow().resolve(key).is_some()
    }

    /// Target of a live transition.
    #[must_use]
    pub fn target(&self, key: TransitionKey) -> Option<T> {
        self.inner.borrow().slot(key).map(|s| s.target.clone())
    }

    /// Source snapshot of a live transition.
    #[must_use]
    pub fn source(&self, key: TransitionKey) -> Option<T> {
        self.inner.borrow().slot(key).map(|s| s.source.clone())
    }

    /// Raw (uneased, unclamped) progress of a live transition.
    #[must_use]
    pub fn progress(&self, key: TransitionKey) -> Option<f64> {
        self.inner.borrow().slot(key).map(|s| s.progress)
    }

    /// Occupancy snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.borrow().stats()
    }

    /// Number of active transitions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.stats().active
    }

    /// Value pass: advance every active slot by `dt` seconds and deliver the
    /// resulting values to their targets.
    ///
    /// Returns the number of values delivered. A non-final value whose slot was
    /// retargeted, restarted or released by an earlier delivery in the same
    /// pass is dropped. Non-finite or negative `dt` is treated as zero.
    pub fn update_transitions(&self, dt: f64) -> usize {
        let dt = if dt.is_finite() && dt >= 0.0 {
            dt
        } else {
            debug!(dt, "ignoring invalid transition tick delta");
            0.0
        };
        let writes = self.inner.borrow_mut().advance(dt);
        let mut delivered = 0;
        // The pool borrow is released: targets may retarget or acquire.
        for write in writes {
            if !write.finished && !self.inner.borrow().is_current(write.key, write.epoch) {
                continue;
            }
            if let Some(target) = write.link.upgrade() {
                target.apply_transition_value(write.key, write.value, write.finished);
                delivered += 1;
            }
        }
        delivered
    }

    /// Structure pass: reclaim retired slots, compact, drop empty buckets and
    /// merge small ones.
    pub fn update_structure(&self) {
        let report = self.inner.borrow_mut().compact();
        if report != StructureReport::default() {
            trace!(
                freed = report.freed,
                dropped_buckets = report.dropped_buckets,
                merges = report.merges,
                "transition pool structure pass"
            );
        }
    }

    /// Run the value pass followed by the structure pass.
    pub fn tick(&self, dt: f64) {
        let start = Instant::now();
        let span = debug_span!(
            "transition.tick",
            value_type = std::any::type_name::<T>(),
            delivered = tracing::field::Empty,
            buckets = tracing::field::Empty,
            duration_us = tracing::field::Empty
        )
        .entered();

        let delivered = self.update_transitions(dt);
        self.update_structure();

        span.record("delivered", delivered as u64);
        span.record("buckets", self.inner.borrow().buckets.len() as u64);
        span.record("duration_us", start.elapsed().as_micros() as u64);
    }

    #[cfg(test)]
    fn bucket_loads(&self) -> Vec<usize> {
        self.inner
            .borrow()
            .buckets
            .iter()
            .map(|b| b.slots.len())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    /// Records every value a slot delivers.
    struct Probe {
        values: RefCell<Vec<f64>>,
        finished: Cell<u32>,
    }

    impl Probe {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                values: RefCell::new(Vec::new()),
                finished: Cell::new(0),
            })
        }

        fn last(&self) -> Option<f64> {
            self.values.borrow().last().copied()
        }
    }

    impl TransitionTarget<f64> for Probe {
        fn apply_transition_value(&self, _key: TransitionKey, value: f64, finished: bool) {
            self.values.borrow_mut().push(value);
            if finished {
                self.finished.set(self.finished.get() + 1);
            }
        }
    }

    fn link(probe: &Rc<Probe>) -> Weak<dyn TransitionTarget<f64>> {
        let weak: Weak<dyn TransitionTarget<f64>> = Rc::downgrade(probe) as Weak<Probe>;
        weak
    }

    fn small_pool() -> TransitionPool<f64> {
        TransitionPool::new(PoolConfig::default().with_bucket_capacity(4))
    }

    #[test]
    fn empty_pool_has_no_buckets() {
        let pool = small_pool();
        assert_eq!(pool.stats(), PoolStats::default());
        pool.tick(0.016);
        assert_eq!(pool.stats().buckets, 0);
    }

    #[test]
    fn transition_converges_exactly() {
        let pool = small_pool();
        let probe = Probe::new();
        let key = pool.acquire(10.0, 20.0, &TransitionParameters::new(1.0), link(&probe));

        pool.tick(0.5);
        let mid = probe.last().expect("value delivered");
        assert!(mid > 10.0 && mid < 20.0, "mid value {mid}");
        assert!(pool.contains(key));

        pool.tick(0.5);
        assert_eq!(probe.last().map(f64::to_bits), Some(20.0_f64.to_bits()));
        assert_eq!(probe.finished.get(), 1);
        assert!(!pool.contains(key));
        assert_eq!(pool.stats().occupied, 0);
        assert_eq!(pool.stats().buckets, 0);
    }

    #[test]
    fn delay_holds_value_without_writes() {
        let pool = small_pool();
        let probe = Probe::new();
        let params = TransitionParameters::new(1.0).with_delay(0.5);
        let key = pool.acquire(0.0, 1.0, &params, link(&probe));

        pool.tick(0.25);
        assert!(probe.values.borrow().is_empty());
        assert_eq!(pool.progress(key), Some(-0.25));

        pool.tick(0.5);
        assert_eq!(probe.last(), Some(0.25));
    }

    #[test]
    fn growth_is_one_bucket_at_a_time() {
        let pool = small_pool();
        let probe = Probe::new();
        let params = TransitionParameters::new(1.0);
        for i in 0..9 {
            pool.acquire(0.0, f64::from(i), &params, link(&probe));
        }
        let stats = pool.stats();
        assert_eq!(stats.buckets, 3);
        assert_eq!(stats.capacity, 12);
        assert_eq!(stats.active, 9);
        assert_eq!(pool.bucket_loads(), vec![4, 4, 1]);
    }

    #[test]
    fn release_is_idempotent() {
        let pool = small_pool();
        let probe = Probe::new();
        let key = pool.acquire(0.0, 1.0, &TransitionParameters::new(1.0), link(&probe));
        assert!(pool.release(key));
        assert!(!pool.release(key));
        assert!(!pool.contains(key));
        assert_eq!(pool.stats().occupied, 1);
        pool.update_structure();
        assert_eq!(pool.stats().occupied, 0);
        assert!(!pool.release(key));
    }

    #[test]
    fn release_during_delay_is_reclaimed() {
        let pool = small_pool();
        let probe = Probe::new();
        let params = TransitionParameters::new(1.0).with_delay(10.0);
        let key = pool.acquire(0.0, 1.0, &params, link(&probe));
        pool.tick(0.1);
        assert!(pool.progress(key).is_some_and(|p| p < 0.0));
        pool.release(key);
        pool.tick(0.1);
        assert_eq!(pool.stats().buckets, 0);
        assert!(probe.values.borrow().is_empty());
    }

    #[test]
    fn compaction_moves_last_slot_into_hole() {
        let pool = small_pool();
        let probes: Vec<_> = (0..4).map(|_| Probe::new()).collect();
        let params = TransitionParameters::new(1.0);
        let keys: Vec<_> = probes
            .iter()
            .enumerate()
            .map(|(i, p)| pool.acquire(0.0, 10.0 * (i as f64 + 1.0), &params, link(p)))
            .collect();

        pool.release(keys[0]);
        pool.update_structure();
        assert_eq!(pool.bucket_loads(), vec![3]);

        // Every surviving key still reaches its own slot.
        for (i, key) in keys.iter().enumerate().skip(1) {
            assert_eq!(pool.target(*key), Some(10.0 * (i as f64 + 1.0)));
        }

        pool.tick(0.5);
        for (i, probe) in probes.iter().enumerate().skip(1) {
            assert_eq!(probe.last(), Some(5.0 * (i as f64 + 1.0)));
        }
        assert!(probes[0].values.borrow().is_empty());
    }

    #[test]
    fn small_buckets_merge_smallest_first() {
        let pool = small_pool();
        let probe = Probe::new();
        let params = TransitionParameters::new(1.0);
        let keys: Vec<_> = (0..12)
            .map(|i| pool.acquire(0.0, f64::from(i), &params, link(&probe)))
            .collect();
        assert_eq!(pool.bucket_loads(), vec![4, 4, 4]);

        // Leave loads 1, 2, 3.
        for &i in &[0, 1, 2, 4, 5, 8] {
            pool.release(keys[i]);
        }
        pool.update_structure();

        // 1 + 2 merge into 3; 3 + 3 does not fit in 4.
        let mut loads = pool.bucket_loads();
        loads.sort_unstable();
        assert_eq!(loads, vec![3, 3]);
        for &i in &[3, 6, 7, 9, 10, 11] {
            assert_eq!(pool.target(keys[i]), Some(i as f64));
        }
    }

    #[test]
    fn merging_can_be_disabled() {
        let pool = TransitionPool::<f64>::new(
            PoolConfig::default()
                .with_bucket_capacity(4)
                .with_merging(false),
        );
        let probe = Probe::new();
        let params = TransitionParameters::new(1.0);
        let keys: Vec<_> = (0..8)
            .map(|i| pool.acquire(0.0, f64::from(i), &params, link(&probe)))
            .collect();
        pool.release(keys[0]);
        pool.release(keys[4]);
        pool.update_structure();
        assert_eq!(pool.bucket_loads(), vec![3, 3]);
    }

    #[test]
    fn dropped_target_detaches_slot() {
        let pool = small_pool();
        let probe = Probe::new();
        let key = pool.acquire(0.0, 1.0, &TransitionParameters::new(1.0), link(&probe));
        drop(probe);
        pool.tick(0.1);
        assert!(!pool.contains(key));
        assert_eq!(pool.stats().occupied, 0);
    }

    #[test]
    fn stale_key_after_reuse_is_rejected() {
        let pool = small_pool();
        let probe = Probe::new();
        let params = TransitionParameters::new(1.0);
        let old = pool.acquire(0.0, 1.0, &params, link(&probe));
        pool.release(old);
        pool.update_structure();

        let new = pool.acquire(0.0, 2.0, &params, link(&probe));
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());
        assert_eq!(pool.target(old), None);
        assert!(!pool.retarget(old, 0.0, 5.0));
        assert_eq!(pool.target(new), Some(2.0));
    }

    #[test]
    fn retarget_restarts_progress() {
        let pool = small_pool();
        let probe = Probe::new();
        let key = pool.acquire(0.0, 10.0, &TransitionParameters::new(1.0), link(&probe));
        pool.tick(0.5);
        assert!(pool.retarget(key, 5.0, 0.0));
        assert_eq!(pool.progress(key), Some(0.0));
        pool.tick(0.5);
        assert_eq!(probe.last(), Some(2.5));
    }

    #[test]
    fn retarget_during_delivery_drops_the_older_value() {
        struct Nudge {
            pool: TransitionPool<f64>,
            other: Cell<Option<TransitionKey>>,
        }
        impl TransitionTarget<f64> for Nudge {
            fn apply_transition_value(&self, _key: TransitionKey, _value: f64, _finished: bool) {
                if let Some(key) = self.other.take() {
                    assert!(self.pool.retarget(key, 0.0, -100.0));
                }
            }
        }

        let pool = small_pool();
        let params = TransitionParameters::new(1.0);
        let nudge = Rc::new(Nudge {
            pool: pool.clone(),
            other: Cell::new(None),
        });
        let weak: Weak<dyn TransitionTarget<f64>> = Rc::downgrade(&nudge) as Weak<Nudge>;
        pool.acquire(0.0, 10.0, &params, weak);
        let probe = Probe::new();
        let key = pool.acquire(0.0, 10.0, &params, link(&probe));
        nudge.other.set(Some(key));

        // The nudge slot is delivered first and restarts the probe's slot.
        pool.tick(0.5);
        assert!(probe.values.borrow().is_empty());
        assert_eq!(pool.progress(key), Some(0.0));

        pool.tick(0.5);
        assert_eq!(probe.last(), Some(-50.0));
    }

    #[test]
    fn restart_applies_new_delay() {
        let pool = small_pool();
        let probe = Probe::new();
        let key = pool.acquire(0.0, 10.0, &TransitionParameters::new(1.0), link(&probe));
        let params = TransitionParameters::new(2.0).with_delay(1.0);
        assert!(pool.restart(key, 3.0, 4.0, &params));
        assert_eq!(pool.progress(key), Some(-0.5));
        assert_eq!(pool.source(key), Some(3.0));
    }

    #[test]
    fn invalid_dt_is_ignored() {
        let pool = small_pool();
        let probe = Probe::new();
        let key = pool.acquire(0.0, 1.0, &TransitionParameters::new(1.0), link(&probe));
        pool.tick(f64::NAN);
        pool.tick(-4.0);
        assert_eq!(pool.progress(key), Some(0.0));
    }

    #[test]
    fn target_may_acquire_during_delivery() {
        struct Chain {
            pool: TransitionPool<f64>,
            me: RefCell<Weak<Chain>>,
            spawned: Cell<u32>,
        }
        impl TransitionTarget<f64> for Chain {
            fn apply_transition_value(&self, _key: TransitionKey, _value: f64, finished: bool) {
                if finished && self.spawned.get() == 0 {
                    self.spawned.set(1);
                    let weak: Weak<dyn TransitionTarget<f64>> = self.me.borrow().clone();
                    self.pool
                        .acquire(1.0, 2.0, &TransitionParameters::new(1.0), weak);
                }
            }
        }

        let pool = small_pool();
        let chain = Rc::new(Chain {
            pool: pool.clone(),
            me: RefCell::new(Weak::new()),
            spawned: Cell::new(0),
        });
        *chain.me.borrow_mut() = Rc::downgrade(&chain);
        let weak: Weak<dyn TransitionTarget<f64>> = Rc::downgrade(&chain) as Weak<Chain>;
        pool.acquire(0.0, 1.0, &TransitionParameters::new(0.1), weak);

        pool.tick(0.2);
        assert_eq!(chain.spawned.get(), 1);
        assert_eq!(pool.active_count(), 1);
    }
}
