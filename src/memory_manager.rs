//! The safe API a runtime calls into.
//!
//! Every mutator-visible operation is a free function here: allocation,
//! field and item access with the write barrier applied, collection
//! triggers, pinning, identity, and the finalizer/weakref/bridge
//! registrations. Functions take the collector context and the runtime as
//! separate `&mut` arguments.
//!
//! Two contracts the runtime must hold:
//!
//! - New objects are not zero-filled. Every reference field and pointer
//!   item must be stored (possibly with null) before the next operation
//!   that can trigger a collection.
//! - A freshly allocated object must be reachable from a root before the
//!   next allocation, or a collection between the two frees it.

use crate::gc::{AllocationError, Gc, GcBuilder, Generation};
use crate::util::conversions;
use crate::util::memory::SegmentKind;
use crate::util::{logger, Address, ObjectReference};
use crate::vm::object_model::{self, GcFlags, TypeId};
use crate::vm::{ForeignHandle, Runtime};

/// Builds the collector and initializes the built-in logger (a no-op if
/// another `log` backend is already installed).
pub fn gc_init<R: Runtime>(builder: GcBuilder) -> Gc<R> {
    match logger::try_init() {
        Ok(_) => debug!("logger initialized"),
        Err(_) => debug!("logger not initialized, external backend present"),
    }
    let gc = builder.build();
    info!(
        "initialized minigen {} ({} types, {} byte nursery)",
        env!("CARGO_PKG_VERSION"),
        gc.types().len(),
        gc.options().nursery_size
    );
    gc
}

/// Allocates a fixed-size object of `type_id`. `size` is the payload byte
/// size the caller computed; it must agree with the registered layout.
pub fn allocate_fixed<R: Runtime>(
    gc: &mut Gc<R>,
    rt: &mut R,
    type_id: TypeId,
    size: usize,
) -> Result<ObjectReference, AllocationError> {
    debug_assert_eq!(
        conversions::bytes_to_words_up(size),
        gc.types().get(type_id).fixed_words,
        "size mismatch for type {}",
        gc.types().get(type_id).name
    );
    gc.allocate_object(rt, type_id, None)
}

/// Allocates a varsize object of `type_id` with `length` items of
/// `item_size` bytes each.
pub fn allocate_varsize<R: Runtime>(
    gc: &mut Gc<R>,
    rt: &mut R,
    type_id: TypeId,
    length: usize,
    item_size: usize,
) -> Result<ObjectReference, AllocationError> {
    debug_assert_eq!(
        conversions::bytes_to_words_up(item_size),
        match gc.types().get(type_id).varsize {
            Some(v) => v.item_words,
            None => panic!("varsize allocation of fixed type {}", gc.types().get(type_id).name),
        },
        "item size mismatch for type {}",
        gc.types().get(type_id).name
    );
    gc.allocate_object(rt, type_id, Some(length))
}

/// Allocates an immortal object outside both generations, for data built
/// before the heap exists. Prebuilt objects are never collected and are
/// assumed free of heap pointers until a write barrier proves otherwise.
pub fn allocate_prebuilt<R: Runtime>(
    gc: &mut Gc<R>,
    type_id: TypeId,
    length: Option<usize>,
) -> ObjectReference {
    let desc = gc.types.descriptor(type_id);
    debug_assert_eq!(desc.varsize.is_some(), length.is_some());
    // Weak fields are resolved by generation scans that never visit
    // prebuilt objects, so a prebuilt weak reference would dangle.
    assert!(
        desc.weak_offset.is_none(),
        "prebuilt {} cannot hold a weak reference",
        desc.name
    );
    let len = length.unwrap_or(0);
    let words = match desc.checked_total_words(len) {
        Some(words) => words,
        None => panic!("prebuilt {} of length {} overflows", desc.name, len),
    };
    assert!(
        words < crate::util::constants::SEGMENT_WORDS,
        "prebuilt {} of length {} overflows",
        desc.name,
        len
    );
    let addr = gc.mem.reserve(SegmentKind::Prebuilt, words);
    object_model::write_header(&mut gc.mem, addr, type_id, GcFlags::new_prebuilt());
    let object = ObjectReference::from_raw_address(addr);
    if desc.varsize.is_some() {
        object_model::set_length(&mut gc.mem, addr, len);
    }
    object
}

/* Write barriers */

/// Must run before a reference field of `object` is overwritten through
/// any path that bypasses [`store_ref_field`].
pub fn write_barrier<R: Runtime>(gc: &mut Gc<R>, object: ObjectReference) {
    gc.record_write(object);
}

/// Must run before item `index` of a pointer array is overwritten through
/// any path that bypasses [`store_ref_item`].
pub fn write_barrier_array<R: Runtime>(gc: &mut Gc<R>, object: ObjectReference, index: usize) {
    gc.record_array_write(object, index);
}

/// Copies `length` items from `src` starting at `src_index` to `dst`
/// starting at `dst_index`, with the barrier applied. The arrays must
/// have the same item layout; overlapping self-copies behave like
/// `memmove`.
pub fn array_copy<R: Runtime>(
    gc: &mut Gc<R>,
    src: ObjectReference,
    dst: ObjectReference,
    src_index: usize,
    dst_index: usize,
    length: usize,
) {
    if length == 0 {
        return;
    }
    let src_desc = gc.types.descriptor(object_model::type_id(&gc.mem, src));
    let dst_desc = gc.types.descriptor(object_model::type_id(&gc.mem, dst));
    let (src_items, dst_items) = match (src_desc.varsize, dst_desc.varsize) {
        (Some(s), Some(d)) => (s, d),
        _ => panic!("array_copy on fixed type"),
    };
    debug_assert_eq!(src_items.item_words, dst_items.item_words);
    debug_assert_eq!(src_items.ptr_item, dst_items.ptr_item);
    debug_assert!(src_index + length <= object_model::length(&gc.mem, src));
    debug_assert!(dst_index + length <= object_model::length(&gc.mem, dst));
    if src_items.ptr_item {
        gc.record_array_copy(src, dst, src_index, dst_index, length);
    }
    let from = object_model::item_address(&src_desc, src, src_index);
    let to = object_model::item_address(&dst_desc, dst, dst_index);
    gc.mem.copy_words(from, to, length * src_items.item_words);
}

/* Field and item access */

fn ref_field_slot<R: Runtime>(gc: &Gc<R>, object: ObjectReference, field: usize) -> Address {
    let desc = gc.types.get(object_model::type_id(&gc.mem, object));
    debug_assert!(
        desc.ptr_offsets.contains(&field),
        "field {} of {} is not a reference field",
        field,
        desc.name
    );
    object_model::fixed_base(desc, object) + conversions::words_to_bytes(field)
}

fn data_field_slot<R: Runtime>(gc: &Gc<R>, object: ObjectReference, field: usize) -> Address {
    let desc = gc.types.get(object_model::type_id(&gc.mem, object));
    debug_assert!(field < desc.fixed_words);
    debug_assert!(
        !desc.ptr_offsets.contains(&field) && desc.weak_offset != Some(field),
        "field {} of {} is not a data field",
        field,
        desc.name
    );
    object_model::fixed_base(desc, object) + conversions::words_to_bytes(field)
}

pub fn load_ref_field<R: Runtime>(
    gc: &Gc<R>,
    object: ObjectReference,
    field: usize,
) -> ObjectReference {
    let slot = ref_field_slot(gc, object, field);
    ObjectReference::from_raw_address(Address::from_usize(gc.mem.load(slot)))
}

/// Stores a reference into a fixed field, firing the write barrier.
pub fn store_ref_field<R: Runtime>(
    gc: &mut Gc<R>,
    object: ObjectReference,
    field: usize,
    value: ObjectReference,
) {
    gc.record_write(object);
    let slot = ref_field_slot(gc, object, field);
    gc.mem.store(slot, value.to_raw_address().as_usize());
}

pub fn load_data_field<R: Runtime>(gc: &Gc<R>, object: ObjectReference, field: usize) -> usize {
    let slot = data_field_slot(gc, object, field);
    gc.mem.load(slot)
}

pub fn store_data_field<R: Runtime>(
    gc: &mut Gc<R>,
    object: ObjectReference,
    field: usize,
    value: usize,
) {
    let slot = data_field_slot(gc, object, field);
    gc.mem.store(slot, value);
}

fn weak_field_slot<R: Runtime>(gc: &Gc<R>, object: ObjectReference) -> Address {
    let desc = gc.types.get(object_model::type_id(&gc.mem, object));
    let weak = match desc.weak_offset {
        Some(offset) => offset,
        None => panic!("{} has no weak field", desc.name),
    };
    object_model::fixed_base(desc, object) + conversions::words_to_bytes(weak)
}

pub fn load_weak_field<R: Runtime>(gc: &Gc<R>, object: ObjectReference) -> ObjectReference {
    let slot = weak_field_slot(gc, object);
    ObjectReference::from_raw_address(Address::from_usize(gc.mem.load(slot)))
}

/// Stores into the weak field. A weak reference must not be older than
/// its target: storing a young target into an old holder is unsupported,
/// because weak fields are resolved without generation-crossing scans.
pub fn store_weak_field<R: Runtime>(
    gc: &mut Gc<R>,
    object: ObjectReference,
    value: ObjectReference,
) {
    debug_assert!(
        value.is_null() || !gc.is_young(value) || gc.is_young(object),
        "weak reference {} would be older than its target {}",
        object,
        value
    );
    let slot = weak_field_slot(gc, object);
    gc.mem.store(slot, value.to_raw_address().as_usize());
}

fn item_slot<R: Runtime>(
    gc: &Gc<R>,
    object: ObjectReference,
    index: usize,
    want_ptr: bool,
) -> Address {
    let desc = gc.types.get(object_model::type_id(&gc.mem, object));
    debug_assert!(index < object_model::length(&gc.mem, object));
    debug_assert_eq!(
        matches!(desc.varsize, Some(v) if v.ptr_item),
        want_ptr,
        "wrong item kind for {}",
        desc.name
    );
    object_model::item_address(desc, object, index)
}

pub fn load_ref_item<R: Runtime>(
    gc: &Gc<R>,
    object: ObjectReference,
    index: usize,
) -> ObjectReference {
    let slot = item_slot(gc, object, index, true);
    ObjectReference::from_raw_address(Address::from_usize(gc.mem.load(slot)))
}

/// Stores a reference into item `index`, firing the array write barrier.
pub fn store_ref_item<R: Runtime>(
    gc: &mut Gc<R>,
    object: ObjectReference,
    index: usize,
    value: ObjectReference,
) {
    gc.record_array_write(object, index);
    let slot = item_slot(gc, object, index, true);
    gc.mem.store(slot, value.to_raw_address().as_usize());
}

pub fn load_data_item<R: Runtime>(
    gc: &Gc<R>,
    object: ObjectReference,
    index: usize,
    word: usize,
) -> usize {
    let slot = item_slot(gc, object, index, false);
    gc.mem.load(slot + conversions::words_to_bytes(word))
}

pub fn store_data_item<R: Runtime>(
    gc: &mut Gc<R>,
    object: ObjectReference,
    index: usize,
    word: usize,
    value: usize,
) {
    let slot = item_slot(gc, object, index, false);
    gc.mem.store(slot + conversions::words_to_bytes(word), value);
}

pub fn array_length<R: Runtime>(gc: &Gc<R>, object: ObjectReference) -> usize {
    debug_assert!(gc
        .types
        .get(object_model::type_id(&gc.mem, object))
        .varsize
        .is_some());
    object_model::length(&gc.mem, object)
}

pub fn type_of<R: Runtime>(gc: &Gc<R>, object: ObjectReference) -> TypeId {
    object_model::type_id(&gc.mem, object)
}

/* Collection */

/// Triggers a collection of the given generation.
pub fn collect<R: Runtime>(gc: &mut Gc<R>, rt: &mut R, generation: Generation) {
    gc.collect(rt, generation);
}

/// Runs a minor collection plus one bounded major step. Returns true if
/// the step completed a major cycle.
pub fn collect_step<R: Runtime>(gc: &mut Gc<R>, rt: &mut R) -> bool {
    gc.collect_step(rt)
}

/* Pinning and identity */

/// Tries to pin `object` at its current address; see
/// [`Gc::pin`] for the preconditions.
pub fn pin<R: Runtime>(gc: &mut Gc<R>, object: ObjectReference) -> bool {
    gc.pin(object)
}

pub fn unpin<R: Runtime>(gc: &mut Gc<R>, object: ObjectReference) {
    gc.unpin(object);
}

/// A token identifying `object` for its whole lifetime, stable across
/// moves.
pub fn identity_token<R: Runtime>(gc: &mut Gc<R>, object: ObjectReference) -> usize {
    gc.identity_token(object)
}

/* Registrations */

/// Registers a finalizer for `object` on the runtime-defined `queue`. The
/// finalizer runs after a major collection finds the object unreachable.
pub fn register_finalizer<R: Runtime>(gc: &mut Gc<R>, object: ObjectReference, queue: usize) {
    gc.register_finalizer(object, queue);
}

/// Suppresses a previously registered finalizer for `object`.
pub fn ignore_finalizer<R: Runtime>(gc: &mut Gc<R>, object: ObjectReference) {
    gc.ignore_finalizer(object);
}

/// Pairs `object` with a reference-counted foreign proxy; see
/// [`crate::vm::Runtime::foreign_refcount`].
pub fn register_foreign<R: Runtime>(
    gc: &mut Gc<R>,
    rt: &mut R,
    object: ObjectReference,
    handle: ForeignHandle,
) {
    gc.register_foreign(rt, object, handle);
}
