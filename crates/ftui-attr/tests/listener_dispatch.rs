//! Listener dispatch through attributes: ordering, self-removal, owner
//! destruction and the delete-once guarantee.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ftui_attr::{Attribute, Host, Layer, ListenerId, ListenerRole};

type Log = Rc<RefCell<Vec<&'static str>>>;

fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

// ═════════════════════════════════════════════════════════════════════════
// Ordering & re-entrancy
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn change_listeners_run_in_registration_order() {
    let attr = Attribute::new("opacity", 1.0_f64);
    let calls = log();
    for name in ["first", "second", "third"] {
        let calls = Rc::clone(&calls);
        attr.add_listener(None, ListenerRole::CHANGE, move || {
            calls.borrow_mut().push(name)
        });
    }
    attr.set(0.5, Layer::User);
    assert_eq!(*calls.borrow(), vec!["first", "second", "third"]);
}

#[test]
fn listener_may_remove_itself_during_dispatch() {
    let attr = Attribute::new("opacity", 1.0_f64);
    let calls = log();
    let own_id: Rc<Cell<Option<ListenerId>>> = Rc::new(Cell::new(None));
    {
        let registry = attr.listeners().clone();
        let calls = Rc::clone(&calls);
        let id_slot = Rc::clone(&own_id);
        own_id.set(attr.add_listener(None, ListenerRole::CHANGE, move || {
            calls.borrow_mut().push("once");
            if let Some(id) = id_slot.get() {
                assert!(registry.remove_listener(id));
            }
        }));
    }
    {
        let calls = Rc::clone(&calls);
        attr.add_listener(None, ListenerRole::CHANGE, move || {
            calls.borrow_mut().push("always")
        });
    }

    attr.set(0.5, Layer::User);
    attr.set(0.25, Layer::User);
    assert_eq!(*calls.borrow(), vec!["once", "always", "always"]);
}

#[test]
fn listener_removed_mid_dispatch_does_not_run() {
    let attr = Attribute::new("opacity", 1.0_f64);
    let calls = log();
    let victim: Rc<Cell<Option<ListenerId>>> = Rc::new(Cell::new(None));
    {
        let registry = attr.listeners().clone();
        let victim = Rc::clone(&victim);
        attr.add_listener(None, ListenerRole::CHANGE, move || {
            if let Some(id) = victim.get() {
                registry.remove_listener(id);
            }
        });
    }
    {
        let calls = Rc::clone(&calls);
        victim.set(attr.add_listener(None, ListenerRole::CHANGE, move || {
            calls.borrow_mut().push("victim")
        }));
    }
    attr.set(0.5, Layer::User);
    assert!(calls.borrow().is_empty());
    assert_eq!(attr.listeners().len(), 1);
}

#[test]
fn listener_added_mid_dispatch_waits_for_next_change() {
    let attr = Attribute::new("opacity", 1.0_f64);
    let calls = log();
    {
        let registry = attr.listeners().clone();
        let calls = Rc::clone(&calls);
        let added = Cell::new(false);
        attr.add_listener(None, ListenerRole::CHANGE, move || {
            if !added.replace(true) {
                let calls = Rc::clone(&calls);
                registry.add_listener(None, ListenerRole::CHANGE, move || {
                    calls.borrow_mut().push("late")
                });
            }
        });
    }
    attr.set(0.5, Layer::User);
    assert!(calls.borrow().is_empty());
    attr.set(0.25, Layer::User);
    assert_eq!(*calls.borrow(), vec!["late"]);
}

#[test]
fn listener_writing_the_attribute_sees_consistent_state() {
    let attr = Attribute::new("opacity", 1.0_f64);
    let weak = attr.downgrade();
    let seen = Rc::new(RefCell::new(Vec::new()));
    {
        let seen = Rc::clone(&seen);
        attr.add_listener(None, ListenerRole::CHANGE, move || {
            let v = weak.value().expect("alive during dispatch");
            seen.borrow_mut().push(v);
            // Clamp from inside the callback.
            if v > 0.8 {
                weak.set(0.8, Layer::User);
            }
        });
    }
    attr.set(0.9, Layer::User);
    assert_eq!(attr.value(), 0.8);
    assert_eq!(*seen.borrow(), vec![0.9, 0.8]);
}

// ═════════════════════════════════════════════════════════════════════════
// Owners
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn destroying_owner_removes_its_listeners_everywhere() {
    let width = Attribute::new("width", 1.0_f64);
    let height = Attribute::new("height", 1.0_f64);
    let hits = Rc::new(Cell::new(0u32));
    let observer = Host::new("observer");

    for attr in [&width, &height] {
        let hits = Rc::clone(&hits);
        attr.add_listener(Some(&observer), ListenerRole::CHANGE, move || {
            hits.set(hits.get() + 1)
        });
    }
    assert_eq!(observer.owned_listener_count(), 2);

    width.set(2.0, Layer::User);
    assert_eq!(hits.get(), 1);

    drop(observer);
    width.set(3.0, Layer::User);
    height.set(3.0, Layer::User);
    assert_eq!(hits.get(), 1);
    assert!(width.listeners().is_empty());
    assert!(height.listeners().is_empty());
}

#[test]
fn destroying_owner_refuses_new_listeners() {
    let attr = Attribute::new("width", 1.0_f64);
    let observer = Host::new("observer");
    observer.begin_destroy();
    assert!(
        attr.add_listener(Some(&observer), ListenerRole::CHANGE, || {})
            .is_none()
    );
}

#[test]
fn remove_owner_listeners_filters_by_role() {
    let attr = Attribute::new("width", 1.0_f64);
    let observer = Host::new("observer");
    attr.add_listener(Some(&observer), ListenerRole::CHANGE, || {});
    attr.add_listener(Some(&observer), ListenerRole::DELETE, || {});
    attr.add_listener(None, ListenerRole::CHANGE, || {});

    assert_eq!(attr.remove_owner_listeners(&observer, ListenerRole::CHANGE), 1);
    assert_eq!(attr.listeners().len(), 2);
    assert_eq!(attr.remove_listeners(ListenerRole::all()), 2);
    assert_eq!(attr.remove_listeners(ListenerRole::all()), 0);
}

// ═════════════════════════════════════════════════════════════════════════
// Delete
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn delete_listeners_fire_exactly_once_and_first() {
    let calls = log();
    let attr = Attribute::new("width", 1.0_f64);
    let weak = attr.downgrade();
    {
        let calls = Rc::clone(&calls);
        let weak = weak.clone();
        attr.add_listener(None, ListenerRole::DELETE, move || {
            // The attribute is still readable while DELETE runs.
            assert_eq!(weak.value(), Some(1.0));
            calls.borrow_mut().push("delete");
        });
    }
    {
        let calls = Rc::clone(&calls);
        attr.add_listener(None, ListenerRole::CHANGE, move || {
            calls.borrow_mut().push("change")
        });
    }
    drop(attr);
    assert_eq!(*calls.borrow(), vec!["delete"]);
    assert!(!weak.is_alive());
}

#[test]
fn delete_listener_owned_by_destroyed_host_does_not_fire() {
    let hits = Rc::new(Cell::new(0u32));
    let attr = Attribute::new("width", 1.0_f64);
    let observer = Host::new("observer");
    {
        let hits = Rc::clone(&hits);
        attr.add_listener(Some(&observer), ListenerRole::DELETE, move || {
            hits.set(hits.get() + 1)
        });
    }
    drop(observer);
    drop(attr);
    assert_eq!(hits.get(), 0);
}

#[test]
fn host_outliving_attribute_forgets_its_links() {
    let observer = Host::new("observer");
    {
        let attr = Attribute::new("width", 1.0_f64);
        attr.add_listener(Some(&observer), ListenerRole::CHANGE, || {});
        assert_eq!(observer.owned_listener_count(), 1);
    }
    assert_eq!(observer.owned_listener_count(), 0);
}
