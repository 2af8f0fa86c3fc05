#![forbid(unsafe_code)]

//! Value types an attribute can hold.
//!
//! [`AttrType`] is the per-type conversion table: from and to [`StyleValue`],
//! text, and serialization [`Element`]s. Unsupported conversions return a
//! [`ConversionError`]; there is no fallback that silently logs.
//!
//! # Text round trip
//!
//! For every scalar type `T::parse_text(&v.to_text())` reproduces `v` under
//! [`ValueEq`], including `-0.0` and non-finite floats. Lists serialize as
//! child elements so their items round-trip the same way.

use std::fmt;

use ftui_transition::Interpolate;

use crate::element::Element;
use crate::error::{AttrError, ConversionError};
use crate::style_value::{StyleValue, parse_number};
use crate::value_eq::ValueEq;

/// A type that can be stored in an [`Attribute`](crate::Attribute).
pub trait AttrType: Interpolate + ValueEq + fmt::Debug + 'static {
    /// Name recorded on serialized elements.
    const TYPE_NAME: &'static str;

    /// Convert a styling-layer value.
    fn from_style(value: &StyleValue) -> Result<Self, ConversionError>;

    /// Representation handed back to the styling layer.
    fn to_style(&self) -> StyleValue;

    /// Canonical text form.
    fn to_text(&self) -> String;

    /// Parse the canonical text form.
    fn parse_text(text: &str) -> Result<Self, ConversionError>;

    /// Write this value into `element`. Scalars use the text content.
    fn write_element(&self, element: &mut Element) {
        element.text = Some(self.to_text());
    }

    /// Read a value written by [`write_element`](Self::write_element).
    fn read_element(element: &Element) -> Result<Self, AttrError> {
        let text = element
            .text()
            .ok_or_else(|| AttrError::MissingValue(element.name.clone()))?;
        Ok(Self::parse_text(text)?)
    }
}

fn parse_error(input: &str, target: &'static str) -> ConversionError {
    ConversionError::Parse {
        input: input.to_string(),
        target,
    }
}

// ---------------------------------------------------------------------------
// Floats
// ---------------------------------------------------------------------------

macro_rules! impl_attr_float {
    ($($ty:ty => $name:literal),*) => {
        $(
            impl AttrType for $ty {
                const TYPE_NAME: &'static str = $name;

                fn from_style(value: &StyleValue) -> Result<Self, ConversionError> {
                    value.as_number().map(|n| n as $ty)
                }

                fn to_style(&self) -> StyleValue {
                    StyleValue::number(f64::from(*self))
                }

                fn to_text(&self) -> String {
                    // Display emits the shortest text that parses back to the
                    // same bits, keeping the sign of zero.
                    self.to_string()
                }

                fn parse_text(text: &str) -> Result<Self, ConversionError> {
                    let trimmed = text.trim();
                    trimmed
                        .parse::<$ty>()
                        .or_else(|_| parse_number(trimmed).map(|n| n as $ty))
                        .map_err(|_| parse_error(text, $name))
                }
            }
        )*
    };
}

impl_attr_float!(f64 => "float", f32 => "float32");

// ---------------------------------------------------------------------------
// Integers
// ---------------------------------------------------------------------------

macro_rules! impl_attr_int {
    ($($ty:ty => $name:literal),*) => {
        $(
            impl AttrType for $ty {
                const TYPE_NAME: &'static str = $name;

                fn from_style(value: &StyleValue) -> Result<Self, ConversionError> {
                    let n = value.as_number()?.round();
                    // `MAX as f64` rounds up for 64-bit types; compare against MAX + 1.
                    if n.is_finite() && n >= <$ty>::MIN as f64 && n < <$ty>::MAX as f64 + 1.0 {
                        Ok(n as $ty)
                    } else {
                        Err(parse_error(&n.to_string(), $name))
                    }
                }

                fn to_style(&self) -> StyleValue {
                    StyleValue::number(*self as f64)
                }

                fn to_text(&self) -> String {
                    self.to_string()
                }

                fn parse_text(text: &str) -> Result<Self, ConversionError> {
                    text.trim().parse().map_err(|_| parse_error(text, $name))
                }
            }
        )*
    };
}

impl_attr_int!(i32 => "int", i64 => "int64", u32 => "uint");

// ---------------------------------------------------------------------------
// bool, String
// ---------------------------------------------------------------------------

fn parse_bool_keyword(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

impl AttrType for bool {
    const TYPE_NAME: &'static str = "bool";

    fn from_style(value: &StyleValue) -> Result<Self, ConversionError> {
        match value {
            StyleValue::Number { value, .. } => Ok(*value != 0.0),
            StyleValue::Text(text) | StyleValue::Keyword(text) => {
                parse_bool_keyword(text).ok_or_else(|| parse_error(text, "bool"))
            }
            other => Err(ConversionError::ShapeMismatch {
                expected: "bool",
                found: other.kind(),
            }),
        }
    }

    fn to_style(&self) -> StyleValue {
        StyleValue::Keyword(self.to_text())
    }

    fn to_text(&self) -> String {
        String::from(if *self { "true" } else { "false" })
    }

    fn parse_text(text: &str) -> Result<Self, ConversionError> {
        parse_bool_keyword(text).ok_or_else(|| parse_error(text, "bool"))
    }
}

impl AttrType for String {
    const TYPE_NAME: &'static str = "string";

    fn from_style(value: &StyleValue) -> Result<Self, ConversionError> {
        value.as_text()
    }

    fn to_style(&self) -> StyleValue {
        StyleValue::Text(self.clone())
    }

    fn to_text(&self) -> String {
        self.clone()
    }

    fn parse_text(text: &str) -> Result<Self, ConversionError> {
        Ok(text.to_string())
    }
}

// ---------------------------------------------------------------------------
// Vec2
// ---------------------------------------------------------------------------

/// Two-component vector (positions, sizes, offsets).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Vec2 {
    /// Horizontal component.
    pub x: f64,
    /// Vertical component.
    pub y: f64,
}

impl Vec2 {
    /// Vector `(x, y)`.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn from_components(items: &[f64], found: &'static str) -> Result<Self, ConversionError> {
        match *items {
            [v] => Ok(Self::new(v, v)),
            [x, y] => Ok(Self::new(x, y)),
            _ => Err(ConversionError::ShapeMismatch {
                expected: "1 or 2 components",
                found,
            }),
        }
    }
}

impl Interpolate for Vec2 {
    fn interpolate(from: &Self, to: &Self, t: f64) -> Self {
        Self::new(
            f64::interpolate(&from.x, &to.x, t),
            f64::interpolate(&from.y, &to.y, t),
        )
    }
}

impl ValueEq for Vec2 {
    fn value_eq(&self, other: &Self) -> bool {
        self.x.value_eq(&other.x) && self.y.value_eq(&other.y)
    }
}

impl AttrType for Vec2 {
    const TYPE_NAME: &'static str = "vec2";

    fn from_style(value: &StyleValue) -> Result<Self, ConversionError> {
        Self::from_components(&value.as_vector()?, value.kind())
    }

    fn to_style(&self) -> StyleValue {
        StyleValue::Vector(vec![self.x, self.y])
    }

    fn to_text(&self) -> String {
        format!("{} {}", self.x, self.y)
    }

    fn parse_text(text: &str) -> Result<Self, ConversionError> {
        let parts: Vec<&str> = text.split_whitespace().collect();
        let [x, y] = parts.as_slice() else {
            return Err(parse_error(text, "vec2"));
        };
        Ok(Self::new(f64::parse_text(x)?, f64::parse_text(y)?))
    }
}

// ---------------------------------------------------------------------------
// Color
// ---------------------------------------------------------------------------

/// 8-bit RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Color {
    /// Red.
    pub r: u8,
    /// Green.
    pub g: u8,
    /// Blue.
    pub b: u8,
    /// Alpha; 255 is opaque.
    pub a: u8,
}

impl Color {
    /// Opaque black.
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    /// Opaque white.
    pub const WHITE: Self = Self::rgb(255, 255, 255);
    /// Fully transparent black.
    pub const TRANSPARENT: Self = Self::rgba(0, 0, 0, 0);

    /// Opaque color.
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }

    /// Color with alpha.
    #[must_use]
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// `#rrggbbaa` form.
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
    }

    /// Parse `#rgb`, `#rrggbb`, `#rrggbbaa`, or one of `black`, `white`,
    /// `transparent`.
    pub fn parse(text: &str) -> Result<Self, ConversionError> {
        let trimmed = text.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "black" => return Ok(Self::BLACK),
            "white" => return Ok(Self::WHITE),
            "transparent" => return Ok(Self::TRANSPARENT),
            _ => {}
        }
        let hex = trimmed
            .strip_prefix('#')
            .filter(|h| h.bytes().all(|b| b.is_ascii_hexdigit()))
            .ok_or_else(|| parse_error(text, "color"))?;
        let byte = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| parse_error(text, "color"))
        };
        match hex.len() {
            3 => {
                let nibble = |i: usize| {
                    u8::from_str_radix(&hex[i..=i], 16)
                        .map(|n| n * 17)
                        .map_err(|_| parse_error(text, "color"))
                };
                Ok(Self::rgb(nibble(0)?, nibble(1)?, nibble(2)?))
            }
            6 => Ok(Self::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Ok(Self::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => Err(parse_error(text, "color")),
        }
    }

    fn from_unit_components(items: &[f64]) -> Result<Self, ConversionError> {
        let channel = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        match *items {
            [r, g, b] => Ok(Self::rgb(channel(r), channel(g), channel(b))),
            [r, g, b, a] => Ok(Self::rgba(channel(r), channel(g), channel(b), channel(a))),
            _ => Err(ConversionError::ShapeMismatch {
                expected: "3 or 4 components",
                found: "vector",
            }),
        }
    }
}

impl Interpolate for Color {
    fn interpolate(from: &Self, to: &Self, t: f64) -> Self {
        let channel = |a: u8, b: u8| {
            let a = f64::from(a);
            (a + (f64::from(b) - a) * t).round().clamp(0.0, 255.0) as u8
        };
        Self::rgba(
            channel(from.r, to.r),
            channel(from.g, to.g),
            channel(from.b, to.b),
            channel(from.a, to.a),
        )
    }
}

impl ValueEq for Color {
    fn value_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl AttrType for Color {
    const TYPE_NAME: &'static str = "color";

    fn from_style(value: &StyleValue) -> Result<Self, ConversionError> {
        match value {
            StyleValue::Color(color) => Ok(*color),
            StyleValue::Text(text) | StyleValue::Keyword(text) => Self::parse(text),
            StyleValue::Vector(items) => Self::from_unit_components(items),
            other => Err(ConversionError::ShapeMismatch {
                expected: "color",
                found: other.kind(),
            }),
        }
    }

    fn to_style(&self) -> StyleValue {
        StyleValue::Color(*self)
    }

    fn to_text(&self) -> String {
        self.to_hex()
    }

    fn parse_text(text: &str) -> Result<Self, ConversionError> {
        Self::parse(text)
    }
}

// ---------------------------------------------------------------------------
// Lists
// ---------------------------------------------------------------------------

/// Child element name used for list items.
pub const ITEM_ELEMENT: &str = "item";

impl<T: AttrType> AttrType for Vec<T> {
    const TYPE_NAME: &'static str = "list";

    fn from_style(value: &StyleValue) -> Result<Self, ConversionError> {
        match value {
            StyleValue::Text(text) => Self::parse_text(text),
            other => other
                .as_vector()?
                .into_iter()
                .map(|n| T::from_style(&StyleValue::number(n)))
                .collect(),
        }
    }

    fn to_style(&self) -> StyleValue {
        let numbers: Result<Vec<f64>, _> = self.iter().map(|v| v.to_style().as_number()).collect();
        match numbers {
            Ok(numbers) => StyleValue::Vector(numbers),
            Err(_) => StyleValue::Text(self.to_text()),
        }
    }

    fn to_text(&self) -> String {
        self.iter()
            .map(AttrType::to_text)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn parse_text(text: &str) -> Result<Self, ConversionError> {
        text.split_whitespace().map(T::parse_text).collect()
    }

    fn write_element(&self, element: &mut Element) {
        for item in self {
            let mut child = Element::new(ITEM_ELEMENT);
            item.write_element(&mut child);
            element.push_child(child);
        }
    }

    fn read_element(element: &Element) -> Result<Self, AttrError> {
        element
            .children
            .iter()
            .filter(|child| child.name == ITEM_ELEMENT)
            .map(T::read_element)
            .collect()
    }
}
