#![forbid(unsafe_code)]

//! Easing curves applied to transition progress.
//!
//! Every curve maps normalized progress in `[0, 1]` onto `[0, 1]` and fixes
//! both endpoints (`f(0) == 0`, `f(1) == 1`). Input outside the unit range is
//! clamped first.

/// Shape of a transition over its duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "kebab-case"))]
pub enum Easing {
    /// Constant speed.
    #[default]
    Linear,
    /// Quadratic acceleration from rest.
    EaseIn,
    /// Quadratic deceleration to rest.
    EaseOut,
    /// Quadratic acceleration, then deceleration.
    EaseInOut,
    /// Cubic acceleration from rest.
    EaseInCubic,
    /// Cubic deceleration to rest.
    EaseOutCubic,
}

impl Easing {
    /// Map linear progress `t` through this curve.
    #[inline]
    #[must_use]
    pub fn apply(self, t: f64) -> f64 {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        match self {
            Self::Linear => t,
            Self::EaseIn => t * t,
            Self::EaseOut => 1.0 - (1.0 - t) * (1.0 - t),
            Self::EaseInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
                }
            }
            Self::EaseInCubic => t * t * t,
            Self::EaseOutCubic => 1.0 - (1.0 - t).powi(3),
        }
    }

    /// Parse a CSS-style timing function keyword.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.trim() {
            "linear" => Some(Self::Linear),
            "ease-in" => Some(Self::EaseIn),
            "ease-out" => Some(Self::EaseOut),
            "ease-in-out" | "ease" => Some(Self::EaseInOut),
            "ease-in-cubic" => Some(Self::EaseInCubic),
            "ease-out-cubic" => Some(Self::EaseOutCubic),
            _ => None,
        }
    }
}
