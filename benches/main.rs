use criterion::{criterion_group, criterion_main, Criterion};

use minigen::memory_manager as mm;
use minigen::util::ObjectReference;
use minigen::vm::object_model::{TypeDescriptor, TypeId};
use minigen::vm::Runtime;
use minigen::{Gc, GcBuilder, Generation};

struct BenchRuntime {
    roots: Vec<ObjectReference>,
}

impl Runtime for BenchRuntime {
    fn walk_roots(&mut self, visit: &mut dyn FnMut(&mut ObjectReference)) {
        for slot in self.roots.iter_mut() {
            visit(slot);
        }
    }

    fn run_finalizer(
        &mut self,
        _heap: minigen::vm::HeapView<'_>,
        _object: ObjectReference,
        _queue: usize,
    ) {
    }
}

fn setup() -> (Gc<BenchRuntime>, BenchRuntime, TypeId) {
    let mut builder = GcBuilder::new();
    builder.set_option("nursery_size", "4194304");
    let node = builder.register_type(TypeDescriptor {
        name: "node",
        fixed_words: 3,
        ptr_offsets: vec![0, 1].into(),
        varsize: None,
        has_destructor: false,
        weak_offset: None,
    });
    let gc = builder.build::<BenchRuntime>();
    (gc, BenchRuntime { roots: Vec::new() }, node)
}

fn alloc_nodes(c: &mut Criterion) {
    let (mut gc, mut rt, node) = setup();
    c.bench_function("alloc_node", |b| {
        b.iter(|| {
            let obj = mm::allocate_fixed(&mut gc, &mut rt, node, 24).unwrap();
            mm::store_ref_field(&mut gc, obj, 0, ObjectReference::NULL);
            mm::store_ref_field(&mut gc, obj, 1, ObjectReference::NULL);
            mm::store_data_field(&mut gc, obj, 2, 1);
            obj
        })
    });
}

fn barrier_store(c: &mut Criterion) {
    let (mut gc, mut rt, node) = setup();
    let old = mm::allocate_fixed(&mut gc, &mut rt, node, 24).unwrap();
    mm::store_ref_field(&mut gc, old, 0, ObjectReference::NULL);
    mm::store_ref_field(&mut gc, old, 1, ObjectReference::NULL);
    mm::store_data_field(&mut gc, old, 2, 0);
    rt.roots.push(old);
    gc.collect(&mut rt, Generation::Nursery);
    let old = rt.roots[0];
    c.bench_function("barrier_store", |b| {
        b.iter(|| mm::store_ref_field(&mut gc, old, 0, ObjectReference::NULL))
    });
}

fn minor_collection(c: &mut Criterion) {
    let (mut gc, mut rt, node) = setup();
    c.bench_function("minor_collection_64k_dead", |b| {
        b.iter(|| {
            for i in 0..2048 {
                let obj = mm::allocate_fixed(&mut gc, &mut rt, node, 24).unwrap();
                mm::store_ref_field(&mut gc, obj, 0, ObjectReference::NULL);
                mm::store_ref_field(&mut gc, obj, 1, ObjectReference::NULL);
                mm::store_data_field(&mut gc, obj, 2, i);
            }
            gc.collect(&mut rt, Generation::Nursery);
        })
    });
}

criterion_group!(benches, alloc_nodes, barrier_store, minor_collection);
criterion_main!(benches);
