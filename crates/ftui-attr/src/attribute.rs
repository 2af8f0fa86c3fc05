#![forbid(unsafe_code)]

//! Layered, animatable attribute.
//!
//! An [`Attribute<T>`] stores one value per [`Layer`] and exposes the value of
//! the highest layer that is set. When that resolved value changes the
//! attribute either updates its visible value at once and fires `CHANGE`
//! listeners, or, with transition parameters attached, hands the new target to
//! a [`TransitionPool`] slot and lets the pool move the visible value there
//! over the following ticks.
//!
//! # Usage
//!
//! ```ignore
//! let mut scheduler = TransitionScheduler::default();
//! let width = Attribute::new("width", 10.0_f64);
//! width.set_transition_parameters(TransitionParameters::new(1.0), &scheduler.pool());
//!
//! width.set(20.0, Layer::User);   // starts a transition, value() is still 10
//! scheduler.tick(0.5);            // value() is 15
//! scheduler.tick(0.5);            // value() is exactly 20
//! ```
//!
//! # Invariants
//!
//! 1. `Default` is always set; the current layer is the highest set layer.
//! 2. `CHANGE` fires only when the visible value changes under
//!    [`ValueEq`](crate::ValueEq) (bit equality for floats).
//! 3. With no transition running the visible value equals the current layer's
//!    value.
//! 4. A finished transition leaves the visible value bit-identical to its
//!    target.
//! 5. `DELETE` listeners run exactly once, first thing when the attribute is
//!    dropped; nothing is notified afterwards.
//!
//! # Threading
//!
//! Attributes are `!Send`: every mutation and dispatch happens on the thread
//! that owns the object graph. Use [`SharedState`](crate::SharedState) for
//! values observed from other threads.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ftui_transition::{TransitionKey, TransitionParameters, TransitionPool, TransitionTarget};
use tracing::{debug, error, trace};

use crate::element::{Element, SerializeOptions};
use crate::error::{AttrError, ConversionError};
use crate::layer::{LAYER_COUNT, Layer, LayerQuery};
use crate::listener::{Host, ListenerId, ListenerRegistry, ListenerRole, WeakHost};
use crate::style_value::{StyleValue, Unit};
use crate::types::AttrType;

/// Element attribute naming the layer a value was serialized from.
pub const LAYER_KEY: &str = "layer";
/// Element attribute naming the value type.
pub const TYPE_KEY: &str = "type";

struct LayeredState<T> {
    values: [T; LAYER_COUNT],
    value_set: [bool; LAYER_COUNT],
    current_layer: Layer,
    current_value: T,
}

impl<T: Clone> LayeredState<T> {
    fn resolved(&self) -> &T {
        &self.values[self.current_layer.index()]
    }
}

struct TransitionLink<T> {
    pool: TransitionPool<T>,
    params: TransitionParameters,
    key: Option<TransitionKey>,
}

struct AttrCell<T> {
    name: String,
    state: RefCell<LayeredState<T>>,
    listeners: ListenerRegistry,
    host: RefCell<WeakHost>,
    transition: RefCell<Option<TransitionLink<T>>>,
    me: Weak<AttrCell<T>>,
}

impl<T: AttrType> AttrCell<T> {
    fn path(&self) -> String {
        match self.host.borrow().upgrade() {
            Some(host) => format!("{}/{}", host.path(), self.name),
            None => self.name.clone(),
        }
    }

    fn value_at(&self, query: LayerQuery) -> T {
        let state = self.state.borrow();
        match query {
            LayerQuery::Layer(layer) => state.values[layer.index()].clone(),
            LayerQuery::CurrentLayer => state.resolved().clone(),
            LayerQuery::CurrentValue => state.current_value.clone(),
        }
    }

    fn set(&self, value: T, layer: Layer) -> bool {
        {
            let mut state = self.state.borrow_mut();
            state.values[layer.index()] = value;
            state.value_set[layer.index()] = true;
            if layer >= state.current_layer {
                state.current_layer = layer;
            }
        }
        self.apply_resolved()
    }

    /// Propagate the current layer's value to the visible value, directly or
    /// through the transition. Returns whether anything changed.
    fn apply_resolved(&self) -> bool {
        let resolved = self.state.borrow().resolved().clone();
        if let Some(link) = self.transition.borrow_mut().as_mut() {
            return self.retarget(link, resolved);
        }
        self.write_visible(resolved)
    }

    fn retarget(&self, link: &mut TransitionLink<T>, resolved: T) -> bool {
        let source = self.state.borrow().current_value.clone();
        if let Some(key) = link.key {
            match link.pool.target(key) {
                Some(target) if target.value_eq(&resolved) => return false,
                Some(_) => {
                    link.pool.restart(key, source, resolved, &link.params);
                    trace!(attr = %self.name, "transition retargeted");
                    return true;
                }
                // Finished or detached since the last look.
                None => link.key = None,
            }
        }
        if source.value_eq(&resolved) {
            return false;
        }
        let target: Weak<dyn TransitionTarget<T>> = self.me.clone();
        link.key = Some(link.pool.acquire(source, resolved, &link.params, target));
        trace!(attr = %self.name, "transition started");
        true
    }

    fn write_visible(&self, value: T) -> bool {
        let changed = {
            let mut state = self.state.borrow_mut();
            if state.current_value.value_eq(&value) {
                false
            } else {
                state.current_value = value;
                true
            }
        };
        if changed {
            trace!(attr = %self.name, "visible value changed");
            self.listeners.notify(ListenerRole::CHANGE);
        }
        changed
    }

    fn release_transition(&self) -> bool {
        let link = self.transition.borrow_mut().take();
        match link {
            Some(TransitionLink {
                pool,
                key: Some(key),
                ..
            }) => pool.release(key),
            _ => false,
        }
    }
}

impl<T: AttrType> TransitionTarget<T> for AttrCell<T> {
    fn apply_transition_value(&self, key: TransitionKey, value: T, finished: bool) {
        {
            let mut link = self.transition.borrow_mut();
            match link.as_mut() {
                Some(link) if link.key == Some(key) => {
                    if finished {
                        link.key = None;
                    }
                }
                // A write for a slot this attribute no longer owns.
                _ => return,
            }
        }
        self.write_visible(value);
    }
}

// ---------------------------------------------------------------------------
// Attribute
// ---------------------------------------------------------------------------

/// Named value with priority layers, change listeners and optional
/// transitions.
pub struct Attribute<T: AttrType> {
    cell: Rc<AttrCell<T>>,
}

impl<T: AttrType> fmt::Debug for Attribute<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.cell.state.borrow();
        f.debug_struct("Attribute")
            .field("name", &self.cell.name)
            .field("current_layer", &state.current_layer)
            .field("value", &state.current_value)
            .finish()
    }
}

impl<T: AttrType> Attribute<T> {
    /// Attribute called `name` whose `Default` layer holds `default`.
    #[must_use]
    pub fn new(name: impl Into<String>, default: T) -> Self {
        let name = name.into();
        let cell = Rc::new_cyclic(|me| AttrCell {
            name,
            state: RefCell::new(LayeredState {
                values: std::array::from_fn(|_| default.clone()),
                value_set: std::array::from_fn(|i| i == Layer::Default.index()),
                current_layer: Layer::Default,
                current_value: default,
            }),
            listeners: ListenerRegistry::new(),
            host: RefCell::new(WeakHost::default()),
            transition: RefCell::new(None),
            me: me.clone(),
        });
        Self { cell }
    }

    /// Attribute attached to `host` from the start.
    #[must_use]
    pub fn with_host(name: impl Into<String>, default: T, host: &Host) -> Self {
        let attr = Self::new(name, default);
        *attr.cell.host.borrow_mut() = host.downgrade();
        attr
    }

    /// Attribute name, unique within its host.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// Non-owning handle, for use inside listener callbacks.
    #[must_use]
    pub fn downgrade(&self) -> WeakAttribute<T> {
        WeakAttribute {
            cell: Rc::downgrade(&self.cell),
        }
    }

    // ── Layers ──────────────────────────────────────────────────────────

    /// Write `value` on `layer`.
    ///
    /// Returns whether the resolved value changed: either the visible value
    /// changed (and `CHANGE` listeners ran) or a transition was started or
    /// retargeted.
    pub fn set(&self, value: T, layer: Layer) -> bool {
        self.cell.set(value, layer)
    }

    /// Unset `layer`; the next lower set layer takes over.
    ///
    /// # Errors
    ///
    /// Clearing [`Layer::Default`] is a contract violation: it panics in
    /// debug builds and returns [`AttrError::InvalidLayer`] otherwise.
    pub fn clear_value(&self, layer: Layer) -> Result<bool, AttrError> {
        if layer == Layer::Default {
            error!(attr = %self.path(), "attempted to clear the default layer");
            debug_assert_ne!(
                layer,
                Layer::Default,
                "cannot clear the default layer of {}",
                self.cell.name
            );
            return Err(AttrError::InvalidLayer(format!(
                "cannot clear the default layer of {}",
                self.cell.name
            )));
        }
        {
            let mut state = self.cell.state.borrow_mut();
            state.value_set[layer.index()] = false;
            if layer == state.current_layer {
                let mut current = layer;
                while !state.value_set[current.index()] {
                    match current.below() {
                        Some(lower) => current = lower,
                        None => break,
                    }
                }
                state.current_layer = current;
            }
        }
        Ok(self.cell.apply_resolved())
    }

    /// Unset every layer above `Default`.
    pub fn clear_all_layers(&self) -> bool {
        {
            let mut state = self.cell.state.borrow_mut();
            for layer in &Layer::ALL[1..] {
                state.value_set[layer.index()] = false;
            }
            state.current_layer = Layer::Default;
        }
        self.cell.apply_resolved()
    }

    /// Visible value.
    #[must_use]
    pub fn value(&self) -> T {
        self.cell.value_at(LayerQuery::CurrentValue)
    }

    /// Value selected by `query`. A layer that is not set returns whatever it
    /// last held (initially the default).
    #[must_use]
    pub fn value_at(&self, query: impl Into<LayerQuery>) -> T {
        self.cell.value_at(query.into())
    }

    /// Borrow the visible value without cloning. `f` must not write to this
    /// attribute.
    pub fn with_value<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.cell.state.borrow().current_value)
    }

    /// Highest layer that is set.
    #[must_use]
    pub fn current_layer(&self) -> Layer {
        self.cell.state.borrow().current_layer
    }

    /// Whether `layer` holds a value.
    #[must_use]
    pub fn is_value_defined_on_layer(&self, layer: Layer) -> bool {
        self.cell.state.borrow().value_set[layer.index()]
    }

    /// Whether a layer above `Default` wins with a value different from the
    /// default.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        let state = self.cell.state.borrow();
        state.current_layer > Layer::Default
            && !state
                .resolved()
                .value_eq(&state.values[Layer::Default.index()])
    }

    // ── Transitions ─────────────────────────────────────────────────────

    /// Attach transitions driven by `pool`, or detach them when `params` is
    /// not valid.
    ///
    /// Detaching snaps the visible value to the current layer's value and
    /// releases the slot. Returns whether the visible value moved.
    pub fn set_transition_parameters(
        &self,
        params: TransitionParameters,
        pool: &TransitionPool<T>,
    ) -> bool {
        if !params.is_valid() {
            let released = self.cell.release_transition();
            if released {
                debug!(attr = %self.cell.name, "transition detached mid-flight");
            }
            let resolved = self.cell.state.borrow().resolved().clone();
            return self.cell.write_visible(resolved);
        }

        let moved_pools = {
            let mut slot = self.cell.transition.borrow_mut();
            let same_pool = slot.as_ref().is_some_and(|link| link.pool.ptr_eq(pool));
            if same_pool {
                if let Some(link) = slot.as_mut() {
                    link.params = params;
                    if let Some(key) = link.key {
                        link.pool.update_parameters(key, &params);
                    }
                }
                false
            } else {
                let old = slot.replace(TransitionLink {
                    pool: pool.clone(),
                    params,
                    key: None,
                });
                match old {
                    Some(TransitionLink {
                        pool: old_pool,
                        key: Some(key),
                        ..
                    }) => old_pool.release(key),
                    _ => false,
                }
            }
        };
        // Resume a transition that was running in the old pool.
        moved_pools && self.cell.apply_resolved()
    }

    /// Parameters of the attached transition, if any.
    #[must_use]
    pub fn transition_parameters(&self) -> Option<TransitionParameters> {
        self.cell.transition.borrow().as_ref().map(|link| link.params)
    }

    /// Whether a transition is currently moving the visible value.
    #[must_use]
    pub fn is_transitioning(&self) -> bool {
        self.cell
            .transition
            .borrow()
            .as_ref()
            .and_then(|link| link.key.map(|key| link.pool.contains(key)))
            .unwrap_or(false)
    }

    // ── Listeners ───────────────────────────────────────────────────────

    /// Register `callback` for `role`; see
    /// [`ListenerRegistry::add_listener`].
    pub fn add_listener(
        &self,
        owner: Option<&Host>,
        role: ListenerRole,
        callback: impl Fn() + 'static,
    ) -> Option<ListenerId> {
        self.cell.listeners.add_listener(owner, role, callback)
    }

    /// Remove one listener. Idempotent.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.cell.listeners.remove_listener(id)
    }

    /// Remove the listeners `owner` registered for `role`.
    pub fn remove_owner_listeners(&self, owner: &Host, role: ListenerRole) -> usize {
        self.cell.listeners.remove_owner_listeners(owner, role)
    }

    /// Remove every listener whose role intersects `role`.
    pub fn remove_listeners(&self, role: ListenerRole) -> usize {
        self.cell.listeners.remove_listeners(role)
    }

    /// The attribute's listener registry.
    #[must_use]
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.cell.listeners
    }

    // ── Host ────────────────────────────────────────────────────────────

    /// Move the attribute to `host` (or detach it with `None`). Fires
    /// `HOST_CHANGE` listeners when the host actually changes.
    pub fn set_host(&self, host: Option<&Host>) -> bool {
        let next = host.map(Host::downgrade).unwrap_or_default();
        {
            let mut current = self.cell.host.borrow_mut();
            if current.ptr_eq(&next) {
                return false;
            }
            *current = next;
        }
        self.cell.listeners.notify(ListenerRole::HOST_CHANGE);
        true
    }

    /// Owning host, if attached and alive.
    #[must_use]
    pub fn host(&self) -> Option<Host> {
        self.cell.host.borrow().upgrade()
    }

    /// `host/path/name`, or just the name without a host.
    #[must_use]
    pub fn path(&self) -> String {
        self.cell.path()
    }

    // ── Conversions ─────────────────────────────────────────────────────

    /// Write a styling-layer value on `layer`.
    pub fn set_style(&self, value: &StyleValue, layer: Layer) -> Result<bool, ConversionError> {
        let converted = T::from_style(value).inspect_err(|err| {
            debug!(attr = %self.cell.name, %err, "style value conversion failed");
        })?;
        Ok(self.set(converted, layer))
    }

    /// Write a number in `unit`.
    pub fn set_float(&self, value: f64, unit: Unit, layer: Layer) -> Result<bool, ConversionError> {
        self.set_style(&StyleValue::Number { value, unit }, layer)
    }

    /// Write an integer.
    pub fn set_int(&self, value: i64, layer: Layer) -> Result<bool, ConversionError> {
        self.set_style(&StyleValue::number(value as f64), layer)
    }

    /// Write text in the attribute's style syntax (`"50%"`, `"#ff0000"`,
    /// `"1 2"`).
    pub fn set_string(&self, text: &str, layer: Layer) -> Result<bool, ConversionError> {
        self.set_style(&StyleValue::Text(text.to_string()), layer)
    }

    /// Write a list of numbers.
    pub fn set_vector(&self, values: &[f64], layer: Layer) -> Result<bool, ConversionError> {
        self.set_style(&StyleValue::Vector(values.to_vec()), layer)
    }

    /// Read as a number.
    pub fn as_float(&self, query: impl Into<LayerQuery>) -> Result<f64, ConversionError> {
        self.value_at(query).to_style().as_number().inspect_err(|err| {
            debug!(attr = %self.cell.name, %err, "attribute is not numeric");
        })
    }

    /// Read as an integer (rounded to nearest).
    pub fn as_int(&self, query: impl Into<LayerQuery>) -> Result<i64, ConversionError> {
        i64::from_style(&self.value_at(query).to_style()).inspect_err(|err| {
            debug!(attr = %self.cell.name, %err, "attribute is not an integer");
        })
    }

    /// Read in canonical text form. Every type has one.
    #[must_use]
    pub fn as_string(&self, query: impl Into<LayerQuery>) -> String {
        self.value_at(query).to_text()
    }

    // ── Serialization ───────────────────────────────────────────────────

    /// Serialize the value selected by `options`.
    ///
    /// Returns `None` (the null element) when the selected layer is not set.
    #[must_use]
    pub fn serialize(&self, options: &SerializeOptions) -> Option<Element> {
        let (value, layer) = {
            let state = self.cell.state.borrow();
            match options.query {
                LayerQuery::Layer(layer) => {
                    if !state.value_set[layer.index()] {
                        return None;
                    }
                    (state.values[layer.index()].clone(), layer)
                }
                LayerQuery::CurrentLayer => (state.resolved().clone(), state.current_layer),
                LayerQuery::CurrentValue => (state.current_value.clone(), state.current_layer),
            }
        };
        let mut element = Element::new(self.cell.name.as_str());
        element.set_attribute(LAYER_KEY, layer.name());
        if options.include_type {
            element.set_attribute(TYPE_KEY, T::TYPE_NAME);
        }
        value.write_element(&mut element);
        Some(element)
    }

    /// Restore a value produced by [`serialize`](Self::serialize).
    ///
    /// The value lands on the layer recorded on the element, or `User` when
    /// none is recorded. Returns whether the resolved value changed.
    pub fn deserialize(&self, element: &Element) -> Result<bool, AttrError> {
        if element.name != self.cell.name {
            return Err(AttrError::NameMismatch {
                expected: self.cell.name.clone(),
                found: element.name.clone(),
            });
        }
        if let Some(type_name) = element.attribute(TYPE_KEY)
            && type_name != T::TYPE_NAME
        {
            return Err(ConversionError::Parse {
                input: type_name.to_string(),
                target: T::TYPE_NAME,
            }
            .into());
        }
        let layer = element
            .attribute(LAYER_KEY)
            .map(Layer::from_name)
            .transpose()?
            .unwrap_or(Layer::User);
        let value = T::read_element(element)?;
        Ok(self.set(value, layer))
    }
}

impl<T: AttrType> Drop for Attribute<T> {
    fn drop(&mut self) {
        let deleted = self.cell.listeners.close();
        self.cell.release_transition();
        trace!(attr = %self.cell.name, deleted, "attribute dropped");
    }
}

/// Non-owning handle to an [`Attribute`].
pub struct WeakAttribute<T: AttrType> {
    cell: Weak<AttrCell<T>>,
}

impl<T: AttrType> Clone for WeakAttribute<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: AttrType> fmt::Debug for WeakAttribute<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.upgrade() {
            Some(cell) => write!(f, "WeakAttribute({})", cell.name),
            None => f.write_str("WeakAttribute(<dropped>)"),
        }
    }
}

impl<T: AttrType> WeakAttribute<T> {
    /// Whether the attribute still exists.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.cell.strong_count() > 0
    }

    /// Visible value, if the attribute still exists.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        self.value_at(LayerQuery::CurrentValue)
    }

    /// Value selected by `query`, if the attribute still exists.
    #[must_use]
    pub fn value_at(&self, query: impl Into<LayerQuery>) -> Option<T> {
        self.cell.upgrade().map(|cell| cell.value_at(query.into()))
    }

    /// [`Attribute::set`] through the weak handle. `None` if dropped.
    pub fn set(&self, value: T, layer: Layer) -> Option<bool> {
        self.cell.upgrade().map(|cell| cell.set(value, layer))
    }
}
