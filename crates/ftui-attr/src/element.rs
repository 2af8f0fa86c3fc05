#![forbid(unsafe_code)]

//! Format-neutral serialization element.
//!
//! Attributes serialize into an [`Element`]: a name, named string
//! attributes, ordered children and optional text. Archive formats (XML, JSON,
//! binary) are built on top by their owners; nothing here knows a wire format.

use std::collections::BTreeMap;

use crate::layer::{Layer, LayerQuery};

/// Abstract document node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Element {
    /// Element name.
    pub name: String,
    /// Named string attributes.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "BTreeMap::is_empty"))]
    pub attributes: BTreeMap<String, String>,
    /// Ordered child elements.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Vec::is_empty"))]
    pub children: Vec<Element>,
    /// Text content.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub text: Option<String>,
}

impl Element {
    /// Empty element called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set text content (builder pattern).
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Set a named attribute (builder pattern).
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(key, value);
        self
    }

    /// Set a named attribute.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Named attribute value.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Append a child.
    pub fn push_child(&mut self, child: Element) {
        self.children.push(child);
    }

    /// Text content, if any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

/// Options for [`Attribute::serialize`](crate::Attribute::serialize).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializeOptions {
    /// Which value to write. Defaults to the `User` layer, so stylesheet and
    /// built-in values are not persisted.
    pub query: LayerQuery,
    /// Record the value type name on the element.
    pub include_type: bool,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            query: LayerQuery::Layer(Layer::User),
            include_type: true,
        }
    }
}

impl SerializeOptions {
    /// Serialize `query` instead of the `User` layer (builder pattern).
    #[must_use]
    pub fn with_query(mut self, query: impl Into<LayerQuery>) -> Self {
        self.query = query.into();
        self
    }
}
