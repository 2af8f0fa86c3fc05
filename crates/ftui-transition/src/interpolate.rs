#![forbid(unsafe_code)]

//! Blending between a transition's source and target.
//!
//! Numeric types blend linearly. Types without a meaningful midpoint
//! (`bool`, `String`, vectors of differing length) hold the source value and
//! step to the target when the transition completes; the pool always writes the
//! exact target on the final frame, so no implementation needs to special-case
//! `t == 1`.

/// A value that can be blended for a transition.
pub trait Interpolate: Clone {
    /// Blend from `from` toward `to`. `t` is eased progress in `[0, 1]`.
    fn interpolate(from: &Self, to: &Self, t: f64) -> Self;
}

impl Interpolate for f64 {
    #[inline]
    fn interpolate(from: &Self, to: &Self, t: f64) -> Self {
        from + (to - from) * t
    }
}

impl Interpolate for f32 {
    #[inline]
    fn interpolate(from: &Self, to: &Self, t: f64) -> Self {
        let from = f64::from(*from);
        (from + (f64::from(*to) - from) * t) as f32
    }
}

macro_rules! impl_interpolate_int {
    ($($ty:ty),*) => {
        $(
            impl Interpolate for $ty {
                #[inline]
                fn interpolate(from: &Self, to: &Self, t: f64) -> Self {
                    let from_f = *from as f64;
                    let blended = from_f + (*to as f64 - from_f) * t;
                    blended.round().clamp(<$ty>::MIN as f64, <$ty>::MAX as f64) as $ty
                }
            }
        )*
    };
}

impl_interpolate_int!(i32, i64, u32);

impl Interpolate for bool {
    #[inline]
    fn interpolate(from: &Self, to: &Self, t: f64) -> Self {
        if t >= 1.0 { *to } else { *from }
    }
}

impl Interpolate for String {
    fn interpolate(from: &Self, to: &Self, t: f64) -> Self {
        if t >= 1.0 { to.clone() } else { from.clone() }
    }
}

impl<T: Interpolate> Interpolate for Vec<T> {
    fn interpolate(from: &Self, to: &Self, t: f64) -> Self {
        if from.len() != to.len() {
            return if t >= 1.0 { to.clone() } else { from.clone() };
        }
        from.iter()
            .zip(to)
            .map(|(a, b)| T::interpolate(a, b, t))
            .collect()
    }
}
