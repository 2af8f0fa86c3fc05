#![forbid(unsafe_code)]

//! Priority layers an attribute value can be set on.

use std::fmt;

use crate::error::AttrError;

/// Number of real layers.
pub const LAYER_COUNT: usize = 4;

/// Priority level of an attribute value, lowest first.
///
/// The highest layer holding a value wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u8)]
pub enum Layer {
    /// Built-in value; always set.
    #[default]
    Default = 0,
    /// Value from a stylesheet.
    Style = 1,
    /// Value set by application code.
    User = 2,
    /// Stylesheet value marked important; beats user values.
    StyleImportant = 3,
}

impl Layer {
    /// Every layer, lowest priority first.
    pub const ALL: [Layer; LAYER_COUNT] = [
        Layer::Default,
        Layer::Style,
        Layer::User,
        Layer::StyleImportant,
    ];

    /// Storage index of this layer.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Layer for a storage index.
    pub fn from_index(index: u8) -> Result<Self, AttrError> {
        Self::ALL
            .get(usize::from(index))
            .copied()
            .ok_or_else(|| AttrError::InvalidLayer(format!("index {index}")))
    }

    /// Name used in serialized elements.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Style => "style",
            Self::User => "user",
            Self::StyleImportant => "style-important",
        }
    }

    /// Parse a layer name as produced by [`name`](Self::name).
    pub fn from_name(name: &str) -> Result<Self, AttrError> {
        Self::ALL
            .into_iter()
            .find(|layer| layer.name() == name)
            .ok_or_else(|| AttrError::InvalidLayer(format!("name {name:?}")))
    }

    /// Next lower layer, if any.
    #[must_use]
    pub const fn below(self) -> Option<Self> {
        match self {
            Self::Default => None,
            Self::Style => Some(Self::Default),
            Self::User => Some(Self::Style),
            Self::StyleImportant => Some(Self::User),
        }
    }
}

impl TryFrom<u8> for Layer {
    type Error = AttrError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Self::from_index(index)
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What to read from an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LayerQuery {
    /// The value stored on one layer.
    Layer(Layer),
    /// The value of the highest layer that is set.
    CurrentLayer,
    /// The externally visible value. Differs from `CurrentLayer` while a
    /// transition is running.
    #[default]
    CurrentValue,
}

impl From<Layer> for LayerQuery {
    fn from(layer: Layer) -> Self {
        Self::Layer(layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_priority() {
        assert!(Layer::Default < Layer::Style);
        assert!(Layer::Style < Layer::User);
        assert!(Layer::User < Layer::StyleImportant);
    }

    #[test]
    fn malformed_index_is_rejected() {
        assert_eq!(Layer::try_from(2), Ok(Layer::User));
        assert!(matches!(
            Layer::from_index(4),
            Err(AttrError::InvalidLayer(_))
        ));
    }

    #[test]
    fn names_round_trip() {
        for layer in Layer::ALL {
            assert_eq!(Layer::from_name(layer.name()), Ok(layer));
        }
        assert!(Layer::from_name("inline").is_err());
    }

    #[test]
    fn below_walks_to_default() {
        let mut layer = Layer::StyleImportant;
        let mut steps = 0;
        while let Some(lower) = layer.below() {
            layer = lower;
            steps += 1;
        }
        assert_eq!(layer, Layer::Default);
        assert_eq!(steps, 3);
    }
}
