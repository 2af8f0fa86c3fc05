#![forbid(unsafe_code)]

//! Error types for attribute access and conversion.

use crate::style_value::Unit;

/// Result alias for attribute operations.
pub type Result<T> = std::result::Result<T, AttrError>;

/// A value could not be converted between representations.
///
/// These are expected on hot paths (stylesheet text, command-line input) and
/// are always returned, never raised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    /// Text did not parse as the target type.
    #[error("cannot parse {input:?} as {target}")]
    Parse {
        /// Text that failed to parse.
        input: String,
        /// Name of the target type.
        target: &'static str,
    },

    /// The unit has no fixed conversion to the attribute's scale.
    #[error("unit {0} is not supported here")]
    UnsupportedUnit(Unit),

    /// The style value has the wrong shape for the target type.
    #[error("expected {expected}, found {found}")]
    ShapeMismatch {
        /// What the target type accepts.
        expected: &'static str,
        /// What was supplied.
        found: &'static str,
    },

    /// The attribute type has no representation for this operation.
    #[error("{operation} is not supported for {target}")]
    Unsupported {
        /// Conversion that was attempted.
        operation: &'static str,
        /// Name of the attribute type.
        target: &'static str,
    },
}

/// Errors from attribute operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttrError {
    /// The layer cannot be used for this operation (clearing `Default`, or a
    /// malformed layer index or name).
    #[error("invalid layer: {0}")]
    InvalidLayer(String),

    /// A value failed to convert.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// An element carried no value to deserialize.
    #[error("element {0:?} carries no value")]
    MissingValue(String),

    /// An element was addressed to a different attribute.
    #[error("element {found:?} does not match attribute {expected:?}")]
    NameMismatch {
        /// Name of the attribute.
        expected: String,
        /// Name on the element.
        found: String,
    },
}
