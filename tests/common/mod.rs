#![allow(dead_code)]

//! A mock runtime and a small type universe shared by the integration
//! tests.

use std::collections::HashMap;

use minigen::memory_manager as mm;
use minigen::util::ObjectReference;
use minigen::vm::object_model::{TypeDescriptor, TypeId, VarsizeDescriptor};
use minigen::vm::{ForeignHandle, HeapView, Runtime};
use minigen::{Gc, GcBuilder, Generation};

/// A runtime whose roots are an explicit vector and whose callbacks just
/// log what they were called with.
#[derive(Default)]
pub struct MockRuntime {
    pub roots: Vec<ObjectReference>,
    pub finalized: Vec<(ObjectReference, usize)>,
    pub destructed: Vec<ObjectReference>,
    pub refcounts: HashMap<ForeignHandle, usize>,
    pub released: Vec<ForeignHandle>,
}

impl Runtime for MockRuntime {
    fn walk_roots(&mut self, visit: &mut dyn FnMut(&mut ObjectReference)) {
        for slot in self.roots.iter_mut() {
            visit(slot);
        }
    }

    fn run_finalizer(&mut self, _heap: HeapView<'_>, object: ObjectReference, queue: usize) {
        self.finalized.push((object, queue));
    }

    fn run_destructor(&mut self, _heap: HeapView<'_>, object: ObjectReference) {
        self.destructed.push(object);
    }

    fn foreign_refcount(&mut self, handle: ForeignHandle) -> usize {
        self.refcounts.get(&handle).copied().unwrap_or(0)
    }

    fn release_foreign(&mut self, handle: ForeignHandle) {
        self.released.push(handle);
    }
}

pub struct Fixture {
    pub gc: Gc<MockRuntime>,
    pub rt: MockRuntime,
    /// 2 data words, no references. Pinnable.
    pub leaf: TypeId,
    /// 2 reference fields (0, 1) and a data word (2).
    pub node: TypeId,
    /// Pointer array, no fixed fields.
    pub parray: TypeId,
    /// Data array of 2-word items, one fixed data word.
    pub darray: TypeId,
    /// Weak reference at field 0, data word at field 1.
    pub weak_holder: TypeId,
    /// 1 data word, destructor callback on death.
    pub droppable: TypeId,
}

impl Fixture {
    /// A 64 KiB nursery, so collections are cheap to provoke.
    pub fn new() -> Self {
        Self::with_options(&[("nursery_size", "65536")])
    }

    pub fn with_options(pairs: &[(&str, &str)]) -> Self {
        let mut builder = GcBuilder::new();
        for &(name, value) in pairs {
            assert!(builder.set_option(name, value), "bad option {}", name);
        }
        let leaf = builder.register_type(TypeDescriptor {
            name: "leaf",
            fixed_words: 2,
            ptr_offsets: vec![].into(),
            varsize: None,
            has_destructor: false,
            weak_offset: None,
        });
        let node = builder.register_type(TypeDescriptor {
            name: "node",
            fixed_words: 3,
            ptr_offsets: vec![0, 1].into(),
            varsize: None,
            has_destructor: false,
            weak_offset: None,
        });
        let parray = builder.register_type(TypeDescriptor {
            name: "parray",
            fixed_words: 0,
            ptr_offsets: vec![].into(),
            varsize: Some(VarsizeDescriptor {
                item_words: 1,
                ptr_item: true,
            }),
            has_destructor: false,
            weak_offset: None,
        });
        let darray = builder.register_type(TypeDescriptor {
            name: "darray",
            fixed_words: 1,
            ptr_offsets: vec![].into(),
            varsize: Some(VarsizeDescriptor {
                item_words: 2,
                ptr_item: false,
            }),
            has_destructor: false,
            weak_offset: None,
        });
        let weak_holder = builder.register_type(TypeDescriptor {
            name: "weak_holder",
            fixed_words: 2,
            ptr_offsets: vec![].into(),
            varsize: None,
            has_destructor: false,
            weak_offset: Some(0),
        });
        let droppable = builder.register_type(TypeDescriptor {
            name: "droppable",
            fixed_words: 1,
            ptr_offsets: vec![].into(),
            varsize: None,
            has_destructor: true,
            weak_offset: None,
        });
        let gc = mm::gc_init::<MockRuntime>(builder);
        Fixture {
            gc,
            rt: MockRuntime::default(),
            leaf,
            node,
            parray,
            darray,
            weak_holder,
            droppable,
        }
    }

    /* Allocation helpers; every field is initialized before returning. */

    pub fn new_leaf(&mut self, tag: usize) -> ObjectReference {
        let obj = mm::allocate_fixed(&mut self.gc, &mut self.rt, self.leaf, 16).unwrap();
        mm::store_data_field(&mut self.gc, obj, 0, tag);
        mm::store_data_field(&mut self.gc, obj, 1, 0);
        obj
    }

    pub fn new_node(&mut self, tag: usize) -> ObjectReference {
        let obj = mm::allocate_fixed(&mut self.gc, &mut self.rt, self.node, 24).unwrap();
        mm::store_ref_field(&mut self.gc, obj, 0, ObjectReference::NULL);
        mm::store_ref_field(&mut self.gc, obj, 1, ObjectReference::NULL);
        mm::store_data_field(&mut self.gc, obj, 2, tag);
        obj
    }

    pub fn new_parray(&mut self, length: usize) -> ObjectReference {
        let obj =
            mm::allocate_varsize(&mut self.gc, &mut self.rt, self.parray, length, 8).unwrap();
        for i in 0..length {
            mm::store_ref_item(&mut self.gc, obj, i, ObjectReference::NULL);
        }
        obj
    }

    pub fn new_weak_holder(&mut self, tag: usize) -> ObjectReference {
        let obj =
            mm::allocate_fixed(&mut self.gc, &mut self.rt, self.weak_holder, 16).unwrap();
        mm::store_weak_field(&mut self.gc, obj, ObjectReference::NULL);
        mm::store_data_field(&mut self.gc, obj, 1, tag);
        obj
    }

    pub fn new_droppable(&mut self, tag: usize) -> ObjectReference {
        let obj =
            mm::allocate_fixed(&mut self.gc, &mut self.rt, self.droppable, 8).unwrap();
        mm::store_data_field(&mut self.gc, obj, 0, tag);
        obj
    }

    /* Roots */

    /// Roots `obj` and returns the root slot index.
    pub fn root(&mut self, obj: ObjectReference) -> usize {
        self.rt.roots.push(obj);
        self.rt.roots.len() - 1
    }

    pub fn unroot_all(&mut self) {
        self.rt.roots.clear();
    }

    /* Collection */

    pub fn minor(&mut self) {
        self.gc.collect(&mut self.rt, Generation::Nursery);
    }

    pub fn full(&mut self) {
        self.gc.collect(&mut self.rt, Generation::Full);
    }

    pub fn step(&mut self) -> bool {
        self.gc.collect_step(&mut self.rt)
    }

    /* Field shorthands */

    pub fn tag(&self, obj: ObjectReference) -> usize {
        mm::load_data_field(&self.gc, obj, 0)
    }

    pub fn node_tag(&self, obj: ObjectReference) -> usize {
        mm::load_data_field(&self.gc, obj, 2)
    }

    pub fn link(&mut self, parent: ObjectReference, field: usize, child: ObjectReference) {
        mm::store_ref_field(&mut self.gc, parent, field, child);
    }

    pub fn child(&self, parent: ObjectReference, field: usize) -> ObjectReference {
        mm::load_ref_field(&self.gc, parent, field)
    }
}
