#![forbid(unsafe_code)]

//! FrankenTUI Attributes
//!
//! Reactive properties for widget objects. Every property is an
//! [`Attribute<T>`]: a named value with independently settable priority layers
//! (`Default < Style < User < StyleImportant`), change listeners, and an
//! optional smooth transition toward each newly resolved value.
//!
//! # Key Components
//!
//! - [`Attribute`] - Layered value with listeners and transitions
//! - [`Layer`] / [`LayerQuery`] - Priority layers and read selectors
//! - [`ListenerRegistry`] / [`Host`] - Listener dispatch and listener owners
//! - [`AttrType`] - Conversions to and from style values, text and elements
//! - [`StyleValue`] / [`Unit`] - Values handed over by the styling layer
//! - [`Element`] - Format-neutral serialization node
//! - [`SharedState`] - Thread-safe state with direct or deferred delivery
//!
//! # Role in FrankenTUI
//! Widgets hold attributes; stylesheets write the `Style` layers, user code
//! and input handlers write `User`. Transitions are advanced by the
//! [`TransitionScheduler`](ftui_transition::TransitionScheduler) once per
//! frame, which also drains deferred [`SharedState`] notifications.

pub mod attribute;
pub mod element;
pub mod error;
pub mod layer;
pub mod listener;
pub mod shared_state;
pub mod style_value;
pub mod types;
pub mod value_eq;

pub use attribute::{Attribute, LAYER_KEY, TYPE_KEY, WeakAttribute};
pub use element::{Element, SerializeOptions};
pub use error::{AttrError, ConversionError};
pub use layer::{LAYER_COUNT, Layer, LayerQuery};
pub use listener::{Host, ListenerId, ListenerRegistry, ListenerRole, WeakHost};
pub use shared_state::{Delivery, SharedListenerId, SharedState};
pub use style_value::{StyleValue, Unit, parse_number};
pub use types::{AttrType, Color, ITEM_ELEMENT, Vec2};
pub use value_eq::ValueEq;

pub use ftui_transition::{Easing, TransitionParameters, TransitionPool, TransitionScheduler};
