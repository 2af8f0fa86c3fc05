#![forbid(unsafe_code)]

//! FrankenTUI Transitions
//!
//! Pooled, compacting storage for the animations that drive attribute
//! transitions.
//!
//! # Key Components
//!
//! - [`TransitionPool`] - Bucketed slot allocator for one value type, advanced
//!   once per frame with a value pass followed by a structure pass
//! - [`TransitionKey`] - Generational handle an attribute keeps for its slot
//! - [`TransitionTarget`] - Seam through which the pool writes values back
//! - [`TransitionParameters`] - Duration, delay and [`Easing`] of a transition
//! - [`Interpolate`] - Per-type blending between source and target
//! - [`TransitionScheduler`] - One pool per value type plus the per-frame
//!   `tick(dt)` entry point
//! - [`DeferredQueue`] - Thread-safe queue of notifications drained after
//!   every scheduler tick
//!
//! # Role in FrankenTUI
//! `ftui-attr` stores every visual property as a layered attribute. When an
//! attribute has transition parameters, changes to its resolved value are
//! handed to a pool slot here instead of being applied immediately; the
//! scheduler then moves the visible value toward the target frame by frame.

pub mod config;
pub mod deferred;
pub mod easing;
pub mod interpolate;
pub mod params;
pub mod pool;
pub mod scheduler;

pub use config::{ConfigError, PoolConfig, SchedulerConfig};
pub use deferred::DeferredQueue;
pub use easing::Easing;
pub use interpolate::Interpolate;
pub use params::TransitionParameters;
pub use pool::{PoolStats, SlotState, TransitionKey, TransitionPool, TransitionTarget};
pub use scheduler::{SchedulerStats, TransitionScheduler};
