//! The interface between the collector and the runtime it serves.
//!
//! The runtime implements [`Runtime`] to let the collector enumerate roots
//! and to receive the callbacks a collection can trigger (finalizers,
//! destructors, foreign-handle releases). Callbacks that may inspect the
//! heap get a read-only [`HeapView`].

use crate::util::memory::Memory;
use crate::util::ObjectReference;

pub mod object_model;

use object_model::{TypeId, TypeRegistry};

/// An opaque token identifying an object on the foreign (reference-counted)
/// side of the bridge. The collector never interprets it; it only hands it
/// back through [`Runtime::foreign_refcount`] and
/// [`Runtime::release_foreign`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ForeignHandle(pub usize);

/// Read-only access to the heap, granted to runtime callbacks. The heap is
/// in a consistent state whenever a callback runs: a collection phase has
/// completed and no object the callback can reach has been freed.
#[derive(Copy, Clone)]
pub struct HeapView<'a> {
    mem: &'a Memory,
    types: &'a TypeRegistry,
}

impl<'a> HeapView<'a> {
    pub(crate) fn new(mem: &'a Memory, types: &'a TypeRegistry) -> Self {
        HeapView { mem, types }
    }

    pub fn type_of(&self, object: ObjectReference) -> TypeId {
        object_model::type_id(self.mem, object)
    }

    pub fn type_name(&self, object: ObjectReference) -> &'static str {
        self.types.get(self.type_of(object)).name
    }

    /// The tail length of a varsize object.
    pub fn length(&self, object: ObjectReference) -> usize {
        object_model::length(self.mem, object)
    }

    pub fn load_ref_field(&self, object: ObjectReference, field: usize) -> ObjectReference {
        let desc = self.types.get(self.type_of(object));
        let addr = object_model::fixed_base(desc, object)
            + crate::util::conversions::words_to_bytes(field);
        ObjectReference::from_raw_address(crate::util::Address::from_usize(self.mem.load(addr)))
    }

    pub fn load_data_field(&self, object: ObjectReference, field: usize) -> usize {
        let desc = self.types.get(self.type_of(object));
        let addr = object_model::fixed_base(desc, object)
            + crate::util::conversions::words_to_bytes(field);
        self.mem.load(addr)
    }

    pub fn load_ref_item(&self, object: ObjectReference, index: usize) -> ObjectReference {
        let desc = self.types.get(self.type_of(object));
        debug_assert!(index < self.length(object));
        let addr = object_model::item_address(desc, object, index);
        ObjectReference::from_raw_address(crate::util::Address::from_usize(self.mem.load(addr)))
    }

    pub fn load_data_item(&self, object: ObjectReference, index: usize, word: usize) -> usize {
        let desc = self.types.get(self.type_of(object));
        debug_assert!(index < self.length(object));
        let addr = object_model::item_address(desc, object, index)
            + crate::util::conversions::words_to_bytes(word);
        self.mem.load(addr)
    }
}

/// What the collector needs from the runtime it manages memory for.
///
/// All collector entry points take the runtime as a separate `&mut R`
/// argument next to the [`Gc`](crate::Gc) context, so the two never fight
/// over a borrow.
pub trait Runtime: 'static + Sized {
    /// Enumerate every root slot. The collector rewrites slots in place
    /// when the referenced object moves; the callback must be invoked once
    /// per slot, including slots holding null.
    fn walk_roots(&mut self, visit: &mut dyn FnMut(&mut ObjectReference));

    /// Run the finalizer registered for `object` on queue `queue`. Called
    /// after the major collection that found the object unreachable has
    /// fully completed; the object and everything it references are still
    /// valid.
    fn run_finalizer(&mut self, heap: HeapView<'_>, object: ObjectReference, queue: usize);

    /// Run the lightweight destructor of a dying object. Unlike a
    /// finalizer, a destructor cannot resurrect the object and must not
    /// assume the objects it references are still alive.
    fn run_destructor(&mut self, heap: HeapView<'_>, object: ObjectReference) {
        let _ = (heap, object);
    }

    /// The current foreign reference count of `handle`.
    fn foreign_refcount(&mut self, handle: ForeignHandle) -> usize {
        let _ = handle;
        0
    }

    /// The heap object paired with `handle` has been collected; the foreign
    /// side may drop its bookkeeping. Called outside any collection phase.
    fn release_foreign(&mut self, handle: ForeignHandle) {
        let _ = handle;
    }
}
