mod common;

use common::Fixture;
use minigen::memory_manager as mm;

#[test]
fn token_is_stable_across_promotion() {
    let mut f = Fixture::new();
    let obj = f.new_node(1);
    let slot = f.root(obj);
    let token = mm::identity_token(&mut f.gc, obj);

    f.minor();
    let moved = f.rt.roots[slot];
    assert_ne!(moved, obj);
    assert_eq!(mm::identity_token(&mut f.gc, moved), token);

    f.full();
    assert_eq!(mm::identity_token(&mut f.gc, f.rt.roots[slot]), token);
}

#[test]
fn token_is_idempotent() {
    let mut f = Fixture::new();
    let obj = f.new_node(1);
    assert_eq!(
        mm::identity_token(&mut f.gc, obj),
        mm::identity_token(&mut f.gc, obj)
    );
}

#[test]
fn old_objects_use_their_address() {
    let mut f = Fixture::new();
    let obj = f.new_node(1);
    let slot = f.root(obj);
    f.minor();
    let obj = f.rt.roots[slot];
    assert_eq!(
        mm::identity_token(&mut f.gc, obj),
        obj.to_raw_address().as_usize()
    );
}

#[test]
fn tokens_of_distinct_objects_differ() {
    let mut f = Fixture::new();
    let a = f.new_node(1);
    let b = f.new_node(2);
    assert_ne!(
        mm::identity_token(&mut f.gc, a),
        mm::identity_token(&mut f.gc, b)
    );
}

#[test]
fn token_survives_pinning_and_release() {
    let mut f = Fixture::new();
    let leaf = f.new_leaf(6);
    assert!(mm::pin(&mut f.gc, leaf));
    let slot = f.root(leaf);
    let token = mm::identity_token(&mut f.gc, leaf);

    f.minor();
    assert_eq!(f.rt.roots[slot], leaf);
    assert_eq!(mm::identity_token(&mut f.gc, leaf), token);

    mm::unpin(&mut f.gc, leaf);
    f.minor();
    let moved = f.rt.roots[slot];
    assert_ne!(moved, leaf);
    assert_eq!(mm::identity_token(&mut f.gc, moved), token);
    assert_eq!(f.tag(moved), 6);
}

#[test]
fn shadow_of_a_dead_object_is_reclaimed() {
    let mut f = Fixture::new();
    let obj = f.new_node(1);
    let _ = mm::identity_token(&mut f.gc, obj);
    f.minor();
    let with_shadow = f.gc.bytes_in_use();
    f.full();
    assert!(f.gc.bytes_in_use() < with_shadow);
}
