#![forbid(unsafe_code)]

//! Listener registry and listener owners.
//!
//! Every attribute carries a [`ListenerRegistry`]: an ordered list of
//! `(role, callback, owner)` entries. Dispatch runs matching callbacks in
//! registration order from a snapshot, so callbacks may add or remove
//! listeners (themselves included) while it runs.
//!
//! A [`Host`] is an object in the host object model. It owns attributes (for
//! path reporting) and can own listeners registered on other objects'
//! attributes; when a host is destroyed, every listener it owns is removed
//! from every registry it was added to.
//!
//! # Invariants
//!
//! 1. Entries matching a role run in insertion order.
//! 2. An entry removed during a dispatch does not run later in that dispatch.
//!    An entry added during a dispatch first runs in the next one.
//! 3. After [`close`](ListenerRegistry::close) the registry holds nothing and
//!    accepts nothing; `DELETE` listeners ran exactly once.
//! 4. A host that has begun destruction cannot own new listeners.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use smallvec::SmallVec;
use tracing::{debug, trace};

bitflags! {
    /// Events a listener is invoked for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ListenerRole: u8 {
        /// The attribute is being destroyed.
        const DELETE      = 0b001;
        /// The attribute's visible value changed.
        const CHANGE      = 0b010;
        /// The attribute moved to a different host.
        const HOST_CHANGE = 0b100;
    }
}

/// Handle returned by [`ListenerRegistry::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct ListenerEntry {
    id: ListenerId,
    role: ListenerRole,
    callback: Rc<dyn Fn()>,
    owner: Option<Weak<HostInner>>,
    removed: Cell<bool>,
}

impl ListenerEntry {
    /// Mark removed and drop the owner's index entry.
    fn detach(&self) {
        self.removed.set(true);
        if let Some(owner) = self.owner.as_ref().and_then(Weak::upgrade) {
            owner.links.borrow_mut().retain(|link| link.id != self.id);
        }
    }
}

#[derive(Default)]
struct RegistryState {
    entries: SmallVec<[Rc<ListenerEntry>; 4]>,
    closed: bool,
}

type Snapshot = SmallVec<[Rc<ListenerEntry>; 8]>;

/// Ordered, role-filtered set of listener callbacks.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    state: Rc<RefCell<RegistryState>>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ListenerRegistry")
            .field("listeners", &state.entries.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl ListenerRegistry {
    /// Empty, open registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `role`.
    ///
    /// Returns `None` if `owner` has begun destruction or the registry is
    /// closed.
    pub fn add_listener(
        &self,
        owner: Option<&Host>,
        role: ListenerRole,
        callback: impl Fn() + 'static,
    ) -> Option<ListenerId> {
        if let Some(owner) = owner
            && owner.is_destroying()
        {
            debug!(owner = %owner.name(), "listener refused: owner is being destroyed");
            return None;
        }
        let mut state = self.state.borrow_mut();
        if state.closed {
            debug!("listener refused: registry is closed");
            return None;
        }
        let id = ListenerId::next();
        state.entries.push(Rc::new(ListenerEntry {
            id,
            role,
            callback: Rc::new(callback),
            owner: owner.map(|o| Rc::downgrade(&o.inner)),
            removed: Cell::new(false),
        }));
        drop(state);

        if let Some(owner) = owner {
            owner.inner.links.borrow_mut().push(OwnedLink {
                registry: Rc::downgrade(&self.state),
                id,
            });
        }
        Some(id)
    }

    fn remove_where(&self, mut pred: impl FnMut(&ListenerEntry) -> bool) -> usize {
        let removed: Snapshot = {
            let mut state = self.state.borrow_mut();
            let mut removed = Snapshot::new();
            state.entries.retain(|entry| {
                if pred(entry) {
                    removed.push(Rc::clone(entry));
                    false
                } else {
                    true
                }
            });
            removed
        };
        for entry in &removed {
            entry.detach();
        }
        removed.len()
    }

    /// Remove one listener. Returns `false` if it was already removed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.remove_where(|entry| entry.id == id) > 0
    }

    /// Remove every listener owned by `owner` whose role intersects `role`.
    pub fn remove_owner_listeners(&self, owner: &Host, role: ListenerRole) -> usize {
        let target = Rc::downgrade(&owner.inner);
        self.remove_where(|entry| {
            entry.role.intersects(role)
                && entry.owner.as_ref().is_some_and(|o| o.ptr_eq(&target))
        })
    }

    /// Remove every listener whose role intersects `role`.
    pub fn remove_listeners(&self, role: ListenerRole) -> usize {
        self.remove_where(|entry| entry.role.intersects(role))
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().entries.len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    fn snapshot(&self, role: ListenerRole) -> Snapshot {
        self.state
            .borrow()
            .entries
            .iter()
            .filter(|entry| entry.role.intersects(role))
            .cloned()
            .collect()
    }

    fn run(snapshot: Snapshot) -> usize {
        let mut invoked = 0;
        for entry in snapshot {
            if entry.removed.get() {
                continue;
            }
            (entry.callback)();
            invoked += 1;
        }
        invoked
    }

    /// Invoke every listener whose role intersects `role`. Returns how many
    /// ran. A closed registry runs nothing.
    pub fn notify(&self, role: ListenerRole) -> usize {
        if self.is_closed() {
            return 0;
        }
        let snapshot = self.snapshot(role);
        if snapshot.is_empty() {
            return 0;
        }
        let invoked = Self::run(snapshot);
        trace!(role = ?role, invoked, "listeners notified");
        invoked
    }

    /// Run `DELETE` listeners once, then remove every entry and refuse new
    /// ones. Returns how many `DELETE` listeners ran; a second call runs none.
    pub fn close(&self) -> usize {
        {
            let mut state = self.state.borrow_mut();
            if state.closed {
                return 0;
            }
            state.closed = true;
        }
        let invoked = Self::run(self.snapshot(ListenerRole::DELETE));
        let all: Snapshot = std::mem::take(&mut self.state.borrow_mut().entries)
            .into_iter()
            .collect();
        for entry in &all {
            entry.detach();
        }
        invoked
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// Index entry recording a listener a host owns in some registry.
struct OwnedLink {
    registry: Weak<RefCell<RegistryState>>,
    id: ListenerId,
}

struct HostInner {
    name: String,
    parent: Option<Weak<HostInner>>,
    destroying: Cell<bool>,
    links: RefCell<Vec<OwnedLink>>,
}

impl HostInner {
    fn path(&self) -> String {
        match self.parent.as_ref().and_then(Weak::upgrade) {
            Some(parent) => format!("{}/{}", parent.path(), self.name),
            None => self.name.clone(),
        }
    }

    /// Remove every listener this host owns from every registry.
    fn unlink_all(links: Vec<OwnedLink>) -> usize {
        let mut removed = 0;
        for link in links {
            if let Some(state) = link.registry.upgrade() {
                let registry = ListenerRegistry { state };
                if registry.remove_listener(link.id) {
                    removed += 1;
                }
            }
        }
        removed
    }
}

impl Drop for HostInner {
    fn drop(&mut self) {
        let links = std::mem::take(self.links.get_mut());
        Self::unlink_all(links);
    }
}

/// Object in the host model: owns attributes and listeners.
///
/// Cloning yields another handle to the same host. The host is destroyed when
/// the last handle drops, or earlier via [`begin_destroy`](Self::begin_destroy).
#[derive(Clone)]
pub struct Host {
    inner: Rc<HostInner>,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("path", &self.path())
            .field("destroying", &self.is_destroying())
            .finish()
    }
}

impl Host {
    /// Root host called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(HostInner {
                name: name.into(),
                parent: None,
                destroying: Cell::new(false),
                links: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Host called `name` nested under `self` for path reporting.
    #[must_use]
    pub fn child(&self, name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(HostInner {
                name: name.into(),
                parent: Some(Rc::downgrade(&self.inner)),
                destroying: Cell::new(false),
                links: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Host name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Slash-separated path from the root host.
    #[must_use]
    pub fn path(&self) -> String {
        self.inner.path()
    }

    /// Whether destruction has begun.
    #[must_use]
    pub fn is_destroying(&self) -> bool {
        self.inner.destroying.get()
    }

    /// Mark the host as being destroyed and remove every listener it owns.
    ///
    /// Returns how many listeners were removed. Later `add_listener` calls
    /// naming this host as owner are refused.
    pub fn begin_destroy(&self) -> usize {
        self.inner.destroying.set(true);
        let links = std::mem::take(&mut *self.inner.links.borrow_mut());
        HostInner::unlink_all(links)
    }

    /// Number of listeners this host owns.
    #[must_use]
    pub fn owned_listener_count(&self) -> usize {
        self.inner.links.borrow().len()
    }

    /// Whether two handles refer to the same host.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Non-owning handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakHost {
        WeakHost(Rc::downgrade(&self.inner))
    }
}

/// Non-owning handle to a [`Host`].
#[derive(Clone, Default)]
pub struct WeakHost(Weak<HostInner>);

impl fmt::Debug for WeakHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(host) => write!(f, "WeakHost({})", host.path()),
            None => f.write_str("WeakHost(<dropped>)"),
        }
    }
}

impl WeakHost {
    /// Strong handle, if the host is alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Host> {
        self.0.upgrade().map(|inner| Host { inner })
    }

    /// Whether both handles refer to the same host (or are both empty).
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> Rc<RefCell<Vec<&'static str>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn dispatch_runs_in_insertion_order() {
        let registry = ListenerRegistry::new();
        let calls = log();
        for name in ["a", "b", "c"] {
            let calls = Rc::clone(&calls);
            registry.add_listener(None, ListenerRole::CHANGE, move || calls.borrow_mut().push(name));
        }
        let c = Rc::clone(&calls);
        registry.add_listener(None, ListenerRole::DELETE, move || c.borrow_mut().push("delete"));

        assert_eq!(registry.notify(ListenerRole::CHANGE), 3);
        assert_eq!(*calls.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn removal_is_idempotent() {
        let registry = ListenerRegistry::new();
        let id = registry
            .add_listener(None, ListenerRole::CHANGE, || {})
            .expect("open registry");
        assert!(registry.remove_listener(id));
        assert!(!registry.remove_listener(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn listener_removed_mid_dispatch_is_skipped() {
        let registry = ListenerRegistry::new();
        let calls = log();
        let later: Rc<Cell<Option<ListenerId>>> = Rc::new(Cell::new(None));

        let (r, l) = (registry.clone(), Rc::clone(&later));
        let c = Rc::clone(&calls);
        registry.add_listener(None, ListenerRole::CHANGE, move || {
            c.borrow_mut().push("first");
            if let Some(id) = l.get() {
                r.remove_listener(id);
            }
        });
        let c = Rc::clone(&calls);
        later.set(registry.add_listener(None, ListenerRole::CHANGE, move || {
            c.borrow_mut().push("second");
        }));

        registry.notify(ListenerRole::CHANGE);
        assert_eq!(*calls.borrow(), vec!["first"]);
    }

    #[test]
    fn listener_added_mid_dispatch_waits() {
        let registry = ListenerRegistry::new();
        let calls = log();
        let r = registry.clone();
        let c = Rc::clone(&calls);
        registry.add_listener(None, ListenerRole::CHANGE, move || {
            let c2 = Rc::clone(&c);
            r.add_listener(None, ListenerRole::CHANGE, move || c2.borrow_mut().push("added"));
        });
        assert_eq!(registry.notify(ListenerRole::CHANGE), 1);
        assert!(calls.borrow().is_empty());
        assert_eq!(registry.notify(ListenerRole::CHANGE), 2);
        assert_eq!(*calls.borrow(), vec!["added"]);
    }

    #[test]
    fn close_runs_delete_once_and_refuses_new_entries() {
        let registry = ListenerRegistry::new();
        let deletes = Rc::new(Cell::new(0));
        let d = Rc::clone(&deletes);
        registry.add_listener(None, ListenerRole::DELETE, move || d.set(d.get() + 1));
        registry.add_listener(None, ListenerRole::CHANGE, || panic!("change after delete"));

        assert_eq!(registry.close(), 1);
        assert_eq!(registry.close(), 0);
        assert_eq!(deletes.get(), 1);
        assert!(registry.is_empty());
        assert_eq!(registry.notify(ListenerRole::CHANGE), 0);
        assert!(registry.add_listener(None, ListenerRole::CHANGE, || {}).is_none());
    }

    #[test]
    fn role_filtered_removal() {
        let registry = ListenerRegistry::new();
        registry.add_listener(None, ListenerRole::CHANGE, || {});
        registry.add_listener(None, ListenerRole::CHANGE | ListenerRole::DELETE, || {});
        registry.add_listener(None, ListenerRole::HOST_CHANGE, || {});
        assert_eq!(registry.remove_listeners(ListenerRole::CHANGE), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn destroyed_owner_loses_listeners() {
        let registry = ListenerRegistry::new();
        let owner = Host::new("panel");
        registry.add_listener(Some(&owner), ListenerRole::CHANGE, || {});
        registry.add_listener(None, ListenerRole::CHANGE, || {});
        assert_eq!(owner.owned_listener_count(), 1);

        assert_eq!(owner.begin_destroy(), 1);
        assert_eq!(registry.len(), 1);
        assert!(
            registry
                .add_listener(Some(&owner), ListenerRole::CHANGE, || {})
                .is_none()
        );
    }

    #[test]
    fn dropping_owner_removes_its_listeners() {
        let registry = ListenerRegistry::new();
        let owner = Host::new("panel");
        let other = Host::new("other");
        registry.add_listener(Some(&owner), ListenerRole::CHANGE, || {});
        registry.add_listener(Some(&other), ListenerRole::CHANGE, || {});
        drop(owner);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.remove_owner_listeners(&other, ListenerRole::all()), 1);
        assert_eq!(other.owned_listener_count(), 0);
    }

    #[test]
    fn removing_a_listener_unindexes_it_from_its_owner() {
        let registry = ListenerRegistry::new();
        let owner = Host::new("panel");
        let id = registry
            .add_listener(Some(&owner), ListenerRole::CHANGE, || {})
            .expect("open registry");
        assert!(registry.remove_listener(id));
        assert_eq!(owner.owned_listener_count(), 0);
    }

    #[test]
    fn host_paths_nest() {
        let root = Host::new("window");
        let child = root.child("sidebar");
        assert_eq!(child.path(), "window/sidebar");
        assert!(child.downgrade().upgrade().is_some_and(|h| h.ptr_eq(&child)));
    }
}
