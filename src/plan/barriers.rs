//! The generational write barrier and its remembered sets.
//!
//! The barrier is object-remembering with a card-marking refinement for
//! large pointer arrays. Every old object starts with `track_young_ptrs`
//! set; the first young-pointer store clears the flag and records the
//! object, so each old object is scanned at most once per minor
//! collection. Card objects never clear the flag; they set the card byte
//! covering the written index instead and only the dirty cards get
//! scanned. Young objects keep the flag clear, which makes stores to them
//! free of bookkeeping.

use crate::gc::Gc;
use crate::util::ObjectReference;
use crate::vm::object_model;
use crate::vm::Runtime;

/// Objects the next minor collection must scan for young pointers.
#[derive(Default)]
pub(crate) struct RememberedSets {
    /// Coarsely remembered old objects; scanned in full.
    pub(crate) old_objects_pointing_to_young: Vec<ObjectReference>,
    /// Card-marked arrays with at least one dirty card.
    pub(crate) old_objects_with_cards_set: Vec<ObjectReference>,
    /// Prebuilt objects a barrier has proven may point into the heap.
    /// Permanent major-collection roots from then on.
    pub(crate) prebuilt_root_objects: Vec<ObjectReference>,
}

impl<R: Runtime> Gc<R> {
    /// Pre-store barrier for a reference field of `object`.
    pub(crate) fn record_write(&mut self, object: ObjectReference) {
        let mut flags = object_model::flags(&self.mem, object);
        if !flags.track_young_ptrs() {
            return;
        }
        trace!("barrier remembers {}", object);
        flags.set_track_young_ptrs(false);
        self.remsets.old_objects_pointing_to_young.push(object);
        if flags.no_heap_ptrs() {
            flags.set_no_heap_ptrs(false);
            self.remsets.prebuilt_root_objects.push(object);
        }
        object_model::set_flags(&mut self.mem, object, flags);
    }

    /// Pre-store barrier for item `index` of a pointer array.
    pub(crate) fn record_array_write(&mut self, object: ObjectReference, index: usize) {
        let mut flags = object_model::flags(&self.mem, object);
        if !flags.track_young_ptrs() {
            return;
        }
        if !flags.has_cards() {
            self.record_write(object);
            return;
        }
        self.mem.set_card(object, index / self.options.card_size);
        if !flags.cards_set() {
            flags.set_cards_set(true);
            self.remsets.old_objects_with_cards_set.push(object);
        }
        if flags.no_heap_ptrs() {
            flags.set_no_heap_ptrs(false);
            self.remsets.prebuilt_root_objects.push(object);
        }
        object_model::set_flags(&mut self.mem, object, flags);
    }

    /// Pre-copy barrier for a bulk item copy from `src` to `dst`. When
    /// both arrays are card-marked and the copy preserves card alignment,
    /// the source's dirty cards are replicated; otherwise `dst` is
    /// remembered coarsely unless the source provably holds no young
    /// pointers.
    pub(crate) fn record_array_copy(
        &mut self,
        src: ObjectReference,
        dst: ObjectReference,
        src_index: usize,
        dst_index: usize,
        length: usize,
    ) {
        if length == 0 {
            return;
        }
        let dst_flags = object_model::flags(&self.mem, dst);
        if !dst_flags.track_young_ptrs() {
            return;
        }
        let src_flags = object_model::flags(&self.mem, src);
        if !self.is_young(src) && src_flags.track_young_ptrs() && !src_flags.cards_set() {
            // The source has no young pointers, so neither will the copy.
            return;
        }
        let card_size = self.options.card_size;
        if src_flags.cards_set()
            && src_flags.has_cards()
            && dst_flags.has_cards()
            && src_index % card_size == dst_index % card_size
        {
            let first = src_index / card_size;
            let last = (src_index + length - 1) / card_size;
            let shift = (dst_index / card_size) as isize - first as isize;
            let mut any = false;
            for card in first..=last {
                if self.mem.card_is_set(src, card) {
                    self.mem.set_card(dst, (card as isize + shift) as usize);
                    any = true;
                }
            }
            if any {
                let mut flags = dst_flags;
                if !flags.cards_set() {
                    flags.set_cards_set(true);
                    self.remsets.old_objects_with_cards_set.push(dst);
                }
                if flags.no_heap_ptrs() {
                    flags.set_no_heap_ptrs(false);
                    self.remsets.prebuilt_root_objects.push(dst);
                }
                object_model::set_flags(&mut self.mem, dst, flags);
            }
            return;
        }
        self.record_write(dst);
    }
}
