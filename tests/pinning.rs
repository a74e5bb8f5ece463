mod common;

use common::Fixture;
use minigen::memory_manager as mm;

#[test]
fn pinned_object_survives_in_place() {
    let mut f = Fixture::new();
    let leaf = f.new_leaf(41);
    assert!(mm::pin(&mut f.gc, leaf));
    let slot = f.root(leaf);

    f.minor();
    f.minor();
    assert_eq!(f.rt.roots[slot], leaf);

    for _ in 0..5 {
        f.full();
    }
    assert_eq!(f.rt.roots[slot], leaf);
    assert_eq!(f.tag(leaf), 41);
    assert_eq!(f.gc.pinned_count(), 1);
}

#[test]
fn unpinned_object_moves_at_the_next_collection() {
    let mut f = Fixture::new();
    let leaf = f.new_leaf(42);
    assert!(mm::pin(&mut f.gc, leaf));
    let slot = f.root(leaf);
    f.minor();

    mm::unpin(&mut f.gc, leaf);
    f.minor();
    let moved = f.rt.roots[slot];
    assert_ne!(moved, leaf);
    assert_eq!(f.tag(moved), 42);
    assert_eq!(f.gc.pinned_count(), 0);
}

#[test]
fn objects_with_references_cannot_be_pinned() {
    let mut f = Fixture::new();
    let node = f.new_node(1);
    assert!(!mm::pin(&mut f.gc, node));
    let arr = f.new_parray(4);
    assert!(!mm::pin(&mut f.gc, arr));
}

#[test]
fn old_objects_cannot_be_pinned() {
    let mut f = Fixture::new();
    let leaf = f.new_leaf(1);
    let slot = f.root(leaf);
    f.minor();
    assert!(!mm::pin(&mut f.gc, f.rt.roots[slot]));
}

#[test]
fn double_pin_is_rejected() {
    let mut f = Fixture::new();
    let leaf = f.new_leaf(1);
    assert!(mm::pin(&mut f.gc, leaf));
    assert!(!mm::pin(&mut f.gc, leaf));
}

#[test]
fn pin_registry_capacity_is_bounded() {
    let mut f = Fixture::with_options(&[("nursery_size", "65536"), ("max_pinned", "2")]);
    let a = f.new_leaf(1);
    let b = f.new_leaf(2);
    let c = f.new_leaf(3);
    assert!(mm::pin(&mut f.gc, a));
    assert!(mm::pin(&mut f.gc, b));
    assert!(!mm::pin(&mut f.gc, c));
    mm::unpin(&mut f.gc, a);
    assert!(mm::pin(&mut f.gc, c));
}

#[test]
fn allocation_proceeds_around_a_pin() {
    let mut f = Fixture::new();
    let pin = f.new_leaf(88);
    assert!(mm::pin(&mut f.gc, pin));
    f.root(pin);
    f.minor();

    for i in 0..5_000 {
        let obj = f.new_leaf(i);
        assert_ne!(obj, pin);
    }
    assert_eq!(f.tag(pin), 88);
}

#[test]
fn old_object_keeps_pinned_target_alive() {
    let mut f = Fixture::new();
    let a = f.new_node(1);
    let slot = f.root(a);
    f.minor();
    let a = f.rt.roots[slot];

    let pin = f.new_leaf(9);
    assert!(mm::pin(&mut f.gc, pin));
    f.link(a, 0, pin);

    // The pin is reachable only through the old object, across several
    // collections.
    f.minor();
    f.minor();
    assert_eq!(f.child(a, 0), pin);
    assert_eq!(f.tag(pin), 9);

    mm::unpin(&mut f.gc, pin);
    f.minor();
    let moved = f.child(a, 0);
    assert_ne!(moved, pin);
    assert_eq!(f.tag(moved), 9);
}
