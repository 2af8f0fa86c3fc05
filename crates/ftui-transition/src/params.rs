#![forbid(unsafe_code)]

//! Transition parameters: duration, delay and easing.
//!
//! Progress of a transition is a single unclamped number. It starts at
//! `-delay / duration` and advances by `dt / duration` per tick, so the delay
//! phase is simply the stretch where progress is still negative.

use std::time::Duration;

use crate::easing::Easing;

/// How an attribute animates toward a newly resolved value.
///
/// Parameters with a non-positive or non-finite duration are *invalid*;
/// handing invalid parameters to an attribute removes its transition.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct TransitionParameters {
    /// Duration in seconds.
    pub duration: f64,
    /// Delay before the value starts moving, in seconds. Negative delays start
    /// part-way through the transition.
    pub delay: f64,
    /// Progress curve.
    pub easing: Easing,
}

impl TransitionParameters {
    /// Parameters that detach any transition.
    pub const NONE: Self = Self {
        duration: 0.0,
        delay: 0.0,
        easing: Easing::Linear,
    };

    /// Linear transition lasting `duration` seconds.
    #[must_use]
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            ..Self::NONE
        }
    }

    /// Linear transition lasting `duration`.
    #[must_use]
    pub fn from_duration(duration: Duration) -> Self {
        Self::new(duration.as_secs_f64())
    }

    /// Set the delay in seconds (builder pattern).
    #[must_use]
    pub fn with_delay(mut self, delay: f64) -> Self {
        self.delay = delay;
        self
    }

    /// Set the easing curve (builder pattern).
    #[must_use]
    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    /// Whether these parameters describe a real transition.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.duration.is_finite() && self.duration > 0.0 && self.delay.is_finite()
    }

    /// Progress gained per second, `1 / duration`.
    #[inline]
    #[must_use]
    pub fn speed(&self) -> f64 {
        1.0 / self.duration
    }

    /// Progress at the moment a transition (re)starts.
    #[inline]
    #[must_use]
    pub fn initial_progress(&self) -> f64 {
        -self.delay * self.speed()
    }
}

impl Default for TransitionParameters {
    fn default() -> Self {
        Self::NONE
    }
}
