mod common;

use common::Fixture;
use minigen::memory_manager as mm;
use minigen::vm::ForeignHandle;

#[test]
fn unowned_dead_object_releases_its_handle() {
    let mut f = Fixture::new();
    let handle = ForeignHandle(100);
    f.rt.refcounts.insert(handle, 1);
    let obj = f.new_node(1);
    mm::register_foreign(&mut f.gc, &mut f.rt, obj, handle);

    f.minor();
    assert_eq!(f.rt.released, vec![handle]);
}

#[test]
fn rooted_object_keeps_its_handle() {
    let mut f = Fixture::new();
    let handle = ForeignHandle(101);
    f.rt.refcounts.insert(handle, 1);
    let obj = f.new_node(1);
    mm::register_foreign(&mut f.gc, &mut f.rt, obj, handle);
    f.root(obj);

    f.minor();
    f.full();
    assert!(f.rt.released.is_empty());
}

#[test]
fn external_owner_resurrects_a_young_object() {
    let mut f = Fixture::new();
    let handle = ForeignHandle(102);
    f.rt.refcounts.insert(handle, 1);
    let obj = f.new_node(9);
    mm::register_foreign(&mut f.gc, &mut f.rt, obj, handle);

    // The foreign side acquires a reference after registration.
    f.rt.refcounts.insert(handle, 2);
    f.minor();
    assert!(f.rt.released.is_empty());

    // Still alive while owned, across major cycles too.
    f.full();
    assert!(f.rt.released.is_empty());

    // The foreign side drops back to the baseline; the object dies.
    f.rt.refcounts.insert(handle, 1);
    f.full();
    assert_eq!(f.rt.released, vec![handle]);
}

#[test]
fn old_bridge_object_released_when_unreachable() {
    let mut f = Fixture::new();
    let handle = ForeignHandle(103);
    f.rt.refcounts.insert(handle, 1);
    let obj = f.new_node(1);
    mm::register_foreign(&mut f.gc, &mut f.rt, obj, handle);
    let slot = f.root(obj);
    f.minor();
    assert!(f.rt.released.is_empty());

    f.rt.roots.truncate(slot);
    f.full();
    assert_eq!(f.rt.released, vec![handle]);
}

#[test]
fn handles_release_once_each() {
    let mut f = Fixture::new();
    let h1 = ForeignHandle(1);
    let h2 = ForeignHandle(2);
    f.rt.refcounts.insert(h1, 1);
    f.rt.refcounts.insert(h2, 1);
    let a = f.new_node(1);
    let b = f.new_node(2);
    mm::register_foreign(&mut f.gc, &mut f.rt, a, h1);
    mm::register_foreign(&mut f.gc, &mut f.rt, b, h2);
    f.root(b);

    f.minor();
    assert_eq!(f.rt.released, vec![h1]);
    f.unroot_all();
    f.full();
    assert_eq!(f.rt.released, vec![h1, h2]);
    f.full();
    assert_eq!(f.rt.released, vec![h1, h2]);
}
