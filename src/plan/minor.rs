//! The minor (nursery) collector.
//!
//! A minor collection is a stop-the-world copying pass over the young
//! generation. Reachability starts from the remembered sets and the
//! runtime's roots; every reached nursery object is promoted to the old
//! generation (or into its shadow, if it has one), pinned objects survive
//! in place, raw-young objects survive by flipping their segment kind.
//! Everything else in the nursery is dead by construction and the nursery
//! is rebuilt as the free gaps between surviving pins.

use itertools::Itertools;

use crate::gc::Gc;
use crate::plan::major::GcPhase;
use crate::util::conversions;
use crate::util::memory::SegmentKind;
use crate::util::object_forwarding;
use crate::util::{Address, ObjectReference};
use crate::vm::object_model;
use crate::vm::{HeapView, Runtime};

impl<R: Runtime> Gc<R> {
    pub(crate) fn collect_minor(&mut self, rt: &mut R) {
        debug_assert!(self.minor_queue.is_empty());
        debug_assert!(self.minor_pins.is_empty());
        debug_assert!(self.pinned_owners.is_empty());
        trace!("minor collection #{} starting", self.stats.minor_collections);

        // Dirty card arrays first: only their marked cards get scanned.
        let with_cards = std::mem::take(&mut self.remsets.old_objects_with_cards_set);
        for object in with_cards {
            self.scan_dirty_cards(object);
        }

        // Coarsely remembered old objects, scanned in full. Their fields
        // are about to be rewritten with promoted addresses, and they may
        // have been mutated since the incremental marker visited them, so
        // they also go back on the gray list while a marking is underway.
        let coarse = std::mem::take(&mut self.remsets.old_objects_pointing_to_young);
        for object in coarse {
            object_model::update_flags(&mut self.mem, object, |f| {
                f.set_track_young_ptrs(true);
            });
            self.regray_if_marking(object);
            self.scan_object(object, Some(object));
        }

        // Roots. While marking is underway they re-enter the gray list
        // too: the root set can change between major steps.
        let marking = self.major.phase == GcPhase::Marking;
        let mut gray_roots = Vec::new();
        rt.walk_roots(&mut |slot: &mut ObjectReference| {
            if slot.is_null() {
                return;
            }
            self.current_owner = None;
            let new = self.trace_young(*slot);
            *slot = new;
            if marking && !self.is_young(new) {
                gray_roots.push(new);
            }
        });
        self.major.gray.extend(gray_roots);
        self.drain_minor_queue();

        // Everything reachable is now promoted or flagged surviving; sort
        // out the registries that track young objects.
        self.process_young_finalizers();
        self.process_young_bridge(rt);
        self.process_young_weakrefs();
        self.process_young_destructors(rt);
        self.promote_raw_survivors();
        self.remember_pinned_owners();
        self.retire_stale_shadows();
        self.rebuild_nursery();
        self.current_owner = None;

        self.stats.minor_collections += 1;
        debug!(
            "minor collection #{} done, {} pins, old space {} bytes",
            self.stats.minor_collections,
            self.nursery.pinned_count(),
            self.old.bytes_in_use()
        );

        self.flush_foreign_releases(rt);
    }

    /// Copies a reachable young object out of the nursery and returns its
    /// new address. Pinned and raw-young objects stay put and are returned
    /// unchanged; old objects are returned unchanged.
    pub(crate) fn trace_young(&mut self, object: ObjectReference) -> ObjectReference {
        debug_assert!(!object.is_null());
        let addr = object.to_raw_address();
        match self.mem.kind(addr) {
            SegmentKind::Nursery => {
                if object_forwarding::is_forwarded(&self.mem, object) {
                    return object_forwarding::forwarding_address(&self.mem, object);
                }
                let mut flags = object_model::flags(&self.mem, object);
                if flags.pinned() {
                    if let Some(owner) = self.current_owner {
                        self.pinned_owners.push(owner);
                    }
                    if !flags.survived_minor() {
                        flags.set_survived_minor(true);
                        object_model::set_flags(&mut self.mem, object, flags);
                        self.minor_pins.push(object);
                    }
                    return object;
                }
                self.promote(object, flags)
            }
            SegmentKind::RawYoung { .. } => {
                let mut flags = object_model::flags(&self.mem, object);
                if !flags.survived_minor() {
                    flags.set_survived_minor(true);
                    object_model::set_flags(&mut self.mem, object, flags);
                    self.minor_queue.push(object);
                }
                object
            }
            _ => object,
        }
    }

    fn promote(
        &mut self,
        object: ObjectReference,
        flags: object_model::GcFlags,
    ) -> ObjectReference {
        let type_id = object_model::type_id(&self.mem, object);
        let desc = self.types.descriptor(type_id);
        let len = if desc.varsize.is_some() {
            object_model::length(&self.mem, object)
        } else {
            0
        };
        let words = desc.total_words(len);
        let target = if flags.has_shadow() {
            match self.shadows.remove(&object) {
                Some(shadow) => shadow,
                None => panic!("{} flagged has_shadow without a shadow entry", object),
            }
        } else {
            self.allocate_old_copy(&desc, len, words)
        };
        self.mem
            .copy_words(object.to_raw_address(), target.to_raw_address(), words);
        let has_cards = self.mem.kind(target.to_raw_address()).card_words() > 0;
        object_model::update_flags(&mut self.mem, target, |f| {
            f.set_track_young_ptrs(true);
            f.set_pinned(false);
            f.set_survived_minor(false);
            f.set_has_shadow(false);
            f.set_dummy(false);
            f.set_visited(false);
            f.set_cards_set(false);
            f.set_has_cards(has_cards);
        });
        object_forwarding::forward(&mut self.mem, object, target);
        self.stats.promoted_bytes += conversions::words_to_bytes(words);
        self.minor_queue.push(target);
        self.note_new_old_object(target);
        trace!("promoted {} -> {} ({} words)", object, target, words);
        target
    }

    pub(crate) fn drain_minor_queue(&mut self) {
        while let Some(object) = self.minor_queue.pop() {
            self.scan_object(object, Some(object));
        }
    }

    fn scan_object(&mut self, object: ObjectReference, owner: Option<ObjectReference>) {
        if object_model::flags(&self.mem, object).no_heap_ptrs() {
            return;
        }
        for slot in self.ref_slots(object) {
            self.trace_slot(slot, owner);
        }
    }

    fn trace_slot(&mut self, slot: Address, owner: Option<ObjectReference>) {
        let value = ObjectReference::from_raw_address(Address::from_usize(self.mem.load(slot)));
        if value.is_null() {
            return;
        }
        self.current_owner = owner;
        let new = self.trace_young(value);
        if new != value {
            self.mem.store(slot, new.to_raw_address().as_usize());
        }
    }

    fn scan_dirty_cards(&mut self, object: ObjectReference) {
        let mut flags = object_model::flags(&self.mem, object);
        debug_assert!(flags.has_cards() && flags.cards_set());
        self.regray_if_marking(object);
        let length = object_model::length(&self.mem, object);
        let cards = conversions::cards_for_length(length, self.options.card_size);
        for card in 0..cards {
            if self.mem.card_is_set(object, card) {
                for slot in self.card_slots(object, card) {
                    self.trace_slot(slot, Some(object));
                }
            }
        }
        self.mem.clear_cards(object);
        flags = object_model::flags(&self.mem, object);
        flags.set_cards_set(false);
        object_model::set_flags(&mut self.mem, object, flags);
    }

    /// An old object the mutator wrote to since the last minor collection
    /// must be traced again by an in-progress marking.
    fn regray_if_marking(&mut self, object: ObjectReference) {
        if self.major.phase != GcPhase::Marking {
            return;
        }
        let flags = object_model::flags(&self.mem, object);
        if flags.visited() && !flags.no_heap_ptrs() {
            object_model::update_flags(&mut self.mem, object, |f| f.set_visited(false));
            self.major.gray.push(object);
        }
    }

    /// Young finalizer candidates are always resurrected: the finalizer
    /// runs from the old generation, once a major collection proves the
    /// object unreachable.
    fn process_young_finalizers(&mut self) {
        let candidates = std::mem::take(&mut self.finalizers.young);
        for (object, queue) in candidates {
            self.current_owner = None;
            let new = self.trace_young(object);
            self.drain_minor_queue();
            if self.nursery.contains(new.to_raw_address()) {
                // pinned survivor, still young
                self.finalizers.young.push((new, queue));
            } else {
                self.finalizers.old.push((new, queue));
            }
        }
    }

    /// Where a surviving young object ended up, or `None` if it died.
    fn young_survivor(&self, object: ObjectReference) -> Option<ObjectReference> {
        if self.nursery.contains(object.to_raw_address()) {
            if object_forwarding::is_forwarded(&self.mem, object) {
                return Some(object_forwarding::forwarding_address(&self.mem, object));
            }
        }
        if object_model::flags(&self.mem, object).survived_minor() {
            Some(object)
        } else {
            None
        }
    }

    fn process_young_weakrefs(&mut self) {
        let owners = std::mem::take(&mut self.weakrefs.young);
        for owner in owners {
            let Some(new_owner) = self.young_survivor(owner) else {
                continue;
            };
            let desc = self
                .types
                .descriptor(object_model::type_id(&self.mem, new_owner));
            let weak = match desc.weak_offset {
                Some(offset) => offset,
                None => panic!("weakref list holds {} without a weak field", new_owner),
            };
            let slot =
                object_model::fixed_base(&desc, new_owner) + conversions::words_to_bytes(weak);
            let target =
                ObjectReference::from_raw_address(Address::from_usize(self.mem.load(slot)));
            if !target.is_null() && self.is_young(target) {
                match self.young_survivor(target) {
                    Some(new_target) => {
                        self.mem.store(slot, new_target.to_raw_address().as_usize())
                    }
                    None => {
                        trace!("weak field of {} nulled", new_owner);
                        self.mem.store(slot, 0);
                    }
                }
            }
            if self.nursery.contains(new_owner.to_raw_address()) {
                self.weakrefs.young.push(new_owner);
            } else {
                self.weakrefs.old.push(new_owner);
            }
        }
    }

    fn process_young_destructors(&mut self, rt: &mut R) {
        let list = std::mem::take(&mut self.destructors_young);
        let mut dead = Vec::new();
        for object in list {
            match self.young_survivor(object) {
                Some(new) => {
                    if self.nursery.contains(new.to_raw_address()) {
                        self.destructors_young.push(new);
                    } else {
                        self.destructors_old.push(new);
                    }
                }
                None => dead.push(object),
            }
        }
        // The nursery has not been rebuilt yet, so a destructor can still
        // read the dying object's fields.
        for object in dead {
            rt.run_destructor(HeapView::new(&self.mem, &self.types), object);
        }
    }

    fn promote_raw_survivors(&mut self) {
        let raw = std::mem::take(&mut self.old.raw_young);
        for object in raw {
            if object_model::flags(&self.mem, object).survived_minor() {
                object_model::update_flags(&mut self.mem, object, |f| {
                    f.set_survived_minor(false);
                    f.set_track_young_ptrs(true);
                });
                self.mem.promote_raw(object.to_raw_address());
                self.old.raw_old.push(object);
                self.note_new_old_object(object);
            } else {
                trace!("raw young {} died", object);
                self.old.release_raw(&mut self.mem, object);
            }
        }
    }

    /// Old objects that still point at a surviving pinned object stay in
    /// the remembered set: the pin target is still young and must be found
    /// again by the next minor collection.
    fn remember_pinned_owners(&mut self) {
        let owners = std::mem::take(&mut self.pinned_owners);
        for owner in owners {
            let flags = object_model::flags(&self.mem, owner);
            if flags.track_young_ptrs() {
                object_model::update_flags(&mut self.mem, owner, |f| {
                    f.set_track_young_ptrs(false);
                });
                self.remsets.old_objects_pointing_to_young.push(owner);
            }
        }
    }

    /// Shadows whose young object was promoted were consumed as the
    /// promotion target; shadows whose young object died are dropped here
    /// and swept as garbage by the next major cycle. Only shadows of
    /// surviving pinned objects remain.
    fn retire_stale_shadows(&mut self) {
        let mem = &self.mem;
        let nursery = &self.nursery;
        self.shadows.retain(|&object, _| {
            nursery.contains(object.to_raw_address())
                && !object_forwarding::is_forwarded(mem, object)
                && {
                    let flags = object_model::flags(mem, object);
                    flags.pinned() && flags.survived_minor()
                }
        });
    }

    fn rebuild_nursery(&mut self) {
        let pins = std::mem::take(&mut self.minor_pins);
        let extents: Vec<(Address, usize)> = pins
            .iter()
            .map(|&p| {
                (
                    p.to_raw_address(),
                    object_model::object_words(&self.mem, &self.types, p),
                )
            })
            .sorted_by_key(|&(addr, _)| addr)
            .collect();
        for &object in &pins {
            object_model::update_flags(&mut self.mem, object, |f| {
                f.set_survived_minor(false);
            });
        }
        self.nursery
            .rebuild(&mut self.mem, &extents, pins, self.options.fill_pattern);
    }
}
