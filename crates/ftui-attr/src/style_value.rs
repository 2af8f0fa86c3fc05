#![forbid(unsafe_code)]

//! Tagged values produced by the styling layer.
//!
//! The stylesheet parser hands attributes a [`StyleValue`]; each attribute
//! type decides which variants it accepts (see
//! [`AttrType::from_style`](crate::AttrType::from_style)). Numeric values carry
//! a [`Unit`] that is normalized before use.

use std::fmt;

use crate::error::ConversionError;
use crate::types::Color;

/// Unit attached to a numeric style value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Unit {
    /// Plain number.
    #[default]
    None,
    /// Pixels; taken as-is.
    Px,
    /// Percent; scaled to a fraction (`50%` is `0.5`).
    Percent,
    /// Font-relative; needs layout context, so it is rejected here.
    Em,
    /// Milliseconds; scaled to seconds.
    Ms,
    /// Seconds; taken as-is.
    Seconds,
}

impl Unit {
    /// Convert `value` in this unit to the attribute's native scale.
    pub fn normalize(self, value: f64) -> Result<f64, ConversionError> {
        match self {
            Self::None | Self::Px | Self::Seconds => Ok(value),
            Self::Percent => Ok(value * 0.01),
            Self::Ms => Ok(value * 0.001),
            Self::Em => Err(ConversionError::UnsupportedUnit(self)),
        }
    }

    /// Suffix used in style text.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Px => "px",
            Self::Percent => "%",
            Self::Em => "em",
            Self::Ms => "ms",
            Self::Seconds => "s",
        }
    }

    /// Split a trailing unit suffix off `text`.
    ///
    /// Returns the numeric part and the unit; text without a known suffix is
    /// returned whole with [`Unit::None`].
    #[must_use]
    pub fn split_suffix(text: &str) -> (&str, Self) {
        let text = text.trim();
        // Longest suffixes first so "ms" is not read as "s".
        for unit in [Self::Px, Self::Em, Self::Ms, Self::Percent, Self::Seconds] {
            if let Some(number) = text.strip_suffix(unit.suffix()) {
                return (number.trim_end(), unit);
            }
        }
        (text, Self::None)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            other => f.write_str(other.suffix()),
        }
    }
}

/// Closed set of values the styling layer can produce.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", content = "value", rename_all = "lowercase"))]
pub enum StyleValue {
    /// Number with a unit.
    Number {
        /// Magnitude in `unit`.
        value: f64,
        /// Unit of `value`.
        unit: Unit,
    },
    /// Free text.
    Text(String),
    /// List of numbers.
    Vector(Vec<f64>),
    /// RGBA color.
    Color(Color),
    /// Bare identifier such as `auto` or `true`.
    Keyword(String),
    /// Unevaluated expression, passed through as text.
    Expression(String),
}

impl StyleValue {
    /// Unitless number.
    #[must_use]
    pub const fn number(value: f64) -> Self {
        Self::Number {
            value,
            unit: Unit::None,
        }
    }

    /// Name of the variant, used in error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Number { .. } => "number",
            Self::Text(_) => "text",
            Self::Vector(_) => "vector",
            Self::Color(_) => "color",
            Self::Keyword(_) => "keyword",
            Self::Expression(_) => "expression",
        }
    }

    fn mismatch(&self, expected: &'static str) -> ConversionError {
        ConversionError::ShapeMismatch {
            expected,
            found: self.kind(),
        }
    }

    /// Read as a single number in native units.
    ///
    /// Accepts numbers, one-element vectors, and text holding a number with
    /// an optional unit suffix.
    pub fn as_number(&self) -> Result<f64, ConversionError> {
        match self {
            Self::Number { value, unit } => unit.normalize(*value),
            Self::Vector(items) if items.len() == 1 => Ok(items[0]),
            Self::Text(text) => parse_number(text),
            _ => Err(self.mismatch("number")),
        }
    }

    /// Read as a list of numbers in native units.
    ///
    /// A single number becomes a one-element list; text is split on
    /// whitespace and commas.
    pub fn as_vector(&self) -> Result<Vec<f64>, ConversionError> {
        match self {
            Self::Vector(items) => Ok(items.clone()),
            Self::Number { value, unit } => Ok(vec![unit.normalize(*value)?]),
            Self::Text(text) => text
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|part| !part.is_empty())
                .map(parse_number)
                .collect(),
            _ => Err(self.mismatch("vector")),
        }
    }

    /// Read as text. Every variant except `Vector` has a text form.
    pub fn as_text(&self) -> Result<String, ConversionError> {
        match self {
            Self::Text(text) | Self::Keyword(text) | Self::Expression(text) => Ok(text.clone()),
            Self::Number { value, unit } => Ok(format!("{value}{}", unit.suffix())),
            Self::Color(color) => Ok(color.to_hex()),
            Self::Vector(_) => Err(self.mismatch("text")),
        }
    }
}

/// Parse a number with an optional unit suffix, normalized to native units.
pub fn parse_number(text: &str) -> Result<f64, ConversionError> {
    let (number, unit) = Unit::split_suffix(text);
    let value: f64 = number.parse().map_err(|_| ConversionError::Parse {
        input: text.to_string(),
        target: "number",
    })?;
    unit.normalize(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_normalize() {
        assert_eq!(Unit::Percent.normalize(50.0), Ok(0.5));
        assert_eq!(Unit::Ms.normalize(250.0), Ok(0.25));
        assert_eq!(Unit::Px.normalize(12.0), Ok(12.0));
        assert_eq!(
            Unit::Em.normalize(1.0),
            Err(ConversionError::UnsupportedUnit(Unit::Em))
        );
    }

    #[test]
    fn suffixes_split() {
        assert_eq!(Unit::split_suffix("12px"), ("12", Unit::Px));
        assert_eq!(Unit::split_suffix("250ms"), ("250", Unit::Ms));
        assert_eq!(Unit::split_suffix("1.5s"), ("1.5", Unit::Seconds));
        assert_eq!(Unit::split_suffix(" 40 % "), ("40", Unit::Percent));
        assert_eq!(Unit::split_suffix("-3"), ("-3", Unit::None));
    }

    #[test]
    fn number_from_text() {
        assert_eq!(StyleValue::Text("50%".into()).as_number(), Ok(0.5));
        assert_eq!(StyleValue::Vector(vec![7.0]).as_number(), Ok(7.0));
        assert!(matches!(
            StyleValue::Text("wide".into()).as_number(),
            Err(ConversionError::Parse { .. })
        ));
        assert!(matches!(
            StyleValue::Keyword("auto".into()).as_number(),
            Err(ConversionError::ShapeMismatch {
                expected: "number",
                found: "keyword"
            })
        ));
    }

    #[test]
    fn vector_from_text() {
        assert_eq!(
            StyleValue::Text("1, 2 3".into()).as_vector(),
            Ok(vec![1.0, 2.0, 3.0])
        );
        assert_eq!(StyleValue::number(4.0).as_vector(), Ok(vec![4.0]));
    }

    #[test]
    fn text_forms() {
        assert_eq!(
            StyleValue::Number {
                value: 12.0,
                unit: Unit::Px
            }
            .as_text(),
            Ok("12px".to_string())
        );
        assert!(StyleValue::Vector(vec![1.0]).as_text().is_err());
    }
}
