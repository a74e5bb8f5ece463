mod common;

use std::collections::HashSet;

use common::Fixture;
use minigen::memory_manager as mm;
use minigen::util::ObjectReference;
use minigen::GcPhase;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// Builds a rooted linked list of `n` nodes, newest first.
fn build_list(f: &mut Fixture, n: usize) -> usize {
    let head = f.new_node(0);
    let slot = f.root(head);
    for i in 1..n {
        let new = f.new_node(i);
        let head = f.rt.roots[slot];
        f.link(new, 0, head);
        f.rt.roots[slot] = new;
    }
    slot
}

fn check_list(f: &Fixture, slot: usize, n: usize) {
    let mut cur = f.rt.roots[slot];
    for expect in (0..n).rev() {
        assert_eq!(f.node_tag(cur), expect);
        cur = f.child(cur, 0);
    }
    assert!(cur.is_null());
}

#[test]
fn cycle_advances_through_every_phase() {
    // A small increment so marking takes more than one step.
    let mut f = Fixture::with_options(&[("nursery_size", "65536"), ("increment_step", "4096")]);
    let slot = build_list(&mut f, 800);
    f.minor();

    assert_eq!(f.gc.phase(), GcPhase::Scanning);
    assert!(!f.step());
    assert_eq!(f.gc.phase(), GcPhase::Marking);

    let mut seen_sweeping = false;
    let mut steps = 0;
    while !f.step() {
        seen_sweeping |= f.gc.phase() == GcPhase::Sweeping;
        steps += 1;
        assert!(steps < 1_000, "major cycle never completed");
    }
    assert!(seen_sweeping);
    assert_eq!(f.gc.phase(), GcPhase::Scanning);
    assert_eq!(f.gc.stats().major_cycles, 1);
    assert!(f.gc.stats().steps[GcPhase::Marking] > 1);

    check_list(&f, slot, 800);
}

#[test]
fn full_collection_preserves_the_live_graph() {
    let mut f = Fixture::new();
    let slot = build_list(&mut f, 500);
    f.full();
    f.full();
    check_list(&f, slot, 500);
}

#[test]
fn full_collection_reclaims_garbage() {
    let mut f = Fixture::new();
    build_list(&mut f, 500);
    f.minor();
    let before = f.gc.bytes_in_use();
    assert!(before > 0);

    f.unroot_all();
    f.full();
    let after = f.gc.bytes_in_use();
    assert!(after < before / 4, "{} not reclaimed down from {}", after, before);
}

#[test]
fn sweeping_a_partly_live_page_refills_the_free_list() {
    let mut f = Fixture::new();
    let mut slots = Vec::new();
    for i in 0..100 {
        let node = f.new_node(i);
        slots.push(f.root(node));
    }
    f.minor();
    f.full();
    let full_bytes = f.gc.bytes_in_use();

    for &slot in slots.iter().step_by(2) {
        f.rt.roots[slot] = ObjectReference::NULL;
    }
    f.full();
    assert!(f.gc.bytes_in_use() < full_bytes);

    // The survivors keep their pages alive, so the next promotions must
    // reuse the swept cells instead of carving fresh pages.
    for i in 0..50 {
        let node = f.new_node(100 + i);
        f.root(node);
    }
    f.minor();
    f.full();
    assert!(f.gc.bytes_in_use() <= full_bytes);
}

#[test]
fn mutation_during_marking_is_not_lost() {
    let mut f = Fixture::with_options(&[("nursery_size", "65536"), ("increment_step", "4096")]);
    // a -> b -> c, all promoted.
    let a = f.new_node(1);
    let b = f.new_node(2);
    let c = f.new_node(3);
    f.link(a, 0, b);
    f.link(b, 0, c);
    let slot = f.root(a);
    build_list(&mut f, 800);
    f.minor();
    let a = f.rt.roots[slot];

    // Enter marking, then hide c behind a different edge and cut the
    // original path.
    assert!(!f.step());
    assert_eq!(f.gc.phase(), GcPhase::Marking);
    let b = f.child(a, 0);
    let c = f.child(b, 0);
    f.link(a, 1, c);
    f.link(b, 0, ObjectReference::NULL);
    f.link(a, 0, ObjectReference::NULL);

    let mut steps = 0;
    while !f.step() {
        steps += 1;
        assert!(steps < 1_000);
    }
    let c = f.child(f.rt.roots[slot], 1);
    assert_eq!(f.node_tag(c), 3);

    // And c stays live through the next full cycle too.
    f.full();
    assert_eq!(f.node_tag(f.child(f.rt.roots[slot], 1)), 3);
}

fn reachable_nodes(f: &Fixture) -> Vec<ObjectReference> {
    let mut seen = HashSet::new();
    let mut stack: Vec<ObjectReference> =
        f.rt.roots.iter().copied().filter(|r| !r.is_null()).collect();
    let mut out = Vec::new();
    while let Some(obj) = stack.pop() {
        if !seen.insert(obj) {
            continue;
        }
        out.push(obj);
        for field in 0..2 {
            let child = f.child(obj, field);
            if !child.is_null() {
                stack.push(child);
            }
        }
    }
    out
}

#[test]
fn random_graph_survives_interleaved_collection() {
    let mut f = Fixture::with_options(&[("nursery_size", "65536"), ("increment_step", "4096")]);
    let mut rng = ChaCha8Rng::seed_from_u64(0x1157);
    let mut created = 0usize;

    for _ in 0..2_000 {
        match rng.random_range(0..10) {
            0..=4 => {
                let node = f.new_node(created);
                created += 1;
                f.root(node);
            }
            5..=6 => {
                if f.rt.roots.len() >= 2 {
                    let i = rng.random_range(0..f.rt.roots.len());
                    let j = rng.random_range(0..f.rt.roots.len());
                    let field = rng.random_range(0..2);
                    let (parent, child) = (f.rt.roots[i], f.rt.roots[j]);
                    f.link(parent, field, child);
                }
            }
            7 => {
                if f.rt.roots.len() > 5 {
                    let i = rng.random_range(0..f.rt.roots.len());
                    f.rt.roots.swap_remove(i);
                }
            }
            8 => {
                f.step();
            }
            _ => f.minor(),
        }
    }
    f.full();
    assert!(f.gc.stats().major_cycles >= 1);

    for node in reachable_nodes(&f) {
        assert_eq!(mm::type_of(&f.gc, node), f.node);
        assert!(f.node_tag(node) < created);
    }
    // A second cycle over the settled heap changes nothing.
    let before: HashSet<usize> = reachable_nodes(&f).iter().map(|&n| f.node_tag(n)).collect();
    f.full();
    let after: HashSet<usize> = reachable_nodes(&f).iter().map(|&n| f.node_tag(n)).collect();
    assert_eq!(before, after);
}
