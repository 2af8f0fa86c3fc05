#![forbid(unsafe_code)]

//! Equality used for change detection.
//!
//! Floating-point values compare by bit pattern: `+0.0` and `-0.0` differ,
//! a NaN equals an identical NaN, and nothing panics. Everything else uses
//! structural equality.

/// Equality that decides whether a write is a visible change.
pub trait ValueEq {
    /// Whether `self` and `other` are the same value for notification
    /// purposes.
    fn value_eq(&self, other: &Self) -> bool;
}

impl ValueEq for f64 {
    #[inline]
    fn value_eq(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

impl ValueEq for f32 {
    #[inline]
    fn value_eq(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

macro_rules! impl_value_eq_structural {
    ($($ty:ty),*) => {
        $(
            impl ValueEq for $ty {
                #[inline]
                fn value_eq(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

impl_value_eq_structural!(i32, i64, u32, bool, String);

impl<T: ValueEq> ValueEq for Vec<T> {
    fn value_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.value_eq(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_zeros_differ() {
        assert!(!0.0_f64.value_eq(&-0.0));
        assert!(!0.0_f32.value_eq(&-0.0));
        assert!(1.5_f64.value_eq(&1.5));
    }

    #[test]
    fn nan_is_equal_to_itself() {
        let nan = f64::NAN;
        assert!(nan.value_eq(&nan));
    }

    #[test]
    fn vectors_compare_elementwise() {
        assert!(vec![0.0_f64, 1.0].value_eq(&vec![0.0, 1.0]));
        assert!(!vec![0.0_f64, 1.0].value_eq(&vec![-0.0, 1.0]));
        assert!(!vec![0.0_f64].value_eq(&vec![0.0, 0.0]));
    }
}
