//! The collector context.
//!
//! A [`Gc`] owns the whole heap: the backing [`Memory`], both generations,
//! the remembered sets, and the incremental major collector's state. There
//! is no global instance; the runtime builds one through [`GcBuilder`] and
//! threads it (together with `&mut R`) through every entry point in
//! [`memory_manager`](crate::memory_manager).

use std::collections::HashMap;
use std::marker::PhantomData;

use delegate::delegate;
use enum_map::EnumMap;

use crate::plan::barriers::RememberedSets;
use crate::plan::bridge::ForeignBridge;
use crate::plan::major::{GcPhase, MajorCollector};
use crate::policy::nursery::Nursery;
use crate::policy::oldspace::OldSpace;
use crate::util::constants::*;
use crate::util::conversions;
use crate::util::finalizable_processor::FinalizableProcessor;
use crate::util::memory::Memory;
use crate::util::options::Options;
use crate::util::reference_processor::ReferenceProcessor;
use crate::util::{Address, ObjectReference};
use crate::vm::object_model::{self, GcFlags, TypeDescriptor, TypeId, TypeRegistry};
use crate::vm::Runtime;

/// A recoverable allocation failure, reported to the mutator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocationError {
    /// The heap ceiling would be breached, or a freshly collected nursery
    /// still cannot satisfy the request.
    HeapOutOfMemory,
    /// The requested size does not fit in address arithmetic.
    SizeOverflow,
}

/// Which generation a manual [`collect`](crate::memory_manager::collect)
/// call targets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Generation {
    /// A minor collection of the nursery only.
    Nursery,
    /// A minor collection followed by one complete major cycle.
    Full,
}

/// Collection counters, readable at any time through
/// [`Gc::stats`] and logged at cycle boundaries.
#[derive(Default)]
pub struct GcStats {
    pub minor_collections: usize,
    pub major_cycles: usize,
    pub promoted_bytes: usize,
    /// Major-collection steps taken, by the phase they ran in.
    pub steps: EnumMap<GcPhase, usize>,
}

/// Builds a [`Gc`]. Options and the type registry must be final before
/// `build` is called; both are immutable afterwards.
#[derive(Default)]
pub struct GcBuilder {
    pub options: Options,
    pub types: TypeRegistry,
}

impl GcBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an option by name. Returns false if the value was rejected.
    pub fn set_option(&mut self, name: &str, value: &str) -> bool {
        self.options.set_from_str(name, value)
    }

    pub fn register_type(&mut self, desc: TypeDescriptor) -> TypeId {
        self.types.register(desc)
    }

    /// Builds the collector for a runtime type `R`.
    pub fn build<R: Runtime>(self) -> Gc<R> {
        Gc::new(self)
    }
}

/// The collector context for runtime `R`.
pub struct Gc<R: Runtime> {
    pub(crate) options: Options,
    pub(crate) types: TypeRegistry,
    pub(crate) mem: Memory,
    pub(crate) nursery: Nursery,
    pub(crate) old: OldSpace,
    pub(crate) remsets: RememberedSets,
    pub(crate) major: MajorCollector,
    pub(crate) finalizers: FinalizableProcessor,
    pub(crate) weakrefs: ReferenceProcessor,
    pub(crate) bridge: ForeignBridge,
    /// Old copies reserved by `identity_token` for still-young objects.
    pub(crate) shadows: HashMap<ObjectReference, ObjectReference>,
    /// Young objects with a destructor, checked at each minor collection.
    pub(crate) destructors_young: Vec<ObjectReference>,
    /// Old objects with a destructor, checked at each major cycle.
    pub(crate) destructors_old: Vec<ObjectReference>,
    /// Promotion worklist of the minor collection in progress.
    pub(crate) minor_queue: Vec<ObjectReference>,
    /// Pinned objects reached by the minor collection in progress.
    pub(crate) minor_pins: Vec<ObjectReference>,
    /// Old objects found pointing at a surviving pinned object; they
    /// re-enter the remembered set after the minor completes.
    pub(crate) pinned_owners: Vec<ObjectReference>,
    /// The old object whose fields are being scanned, if any. Lets the
    /// tracer know whom to re-remember when it hits a pinned target.
    pub(crate) current_owner: Option<ObjectReference>,
    pub(crate) stats: GcStats,
    _runtime: PhantomData<R>,
}

impl<R: Runtime> Gc<R> {
    fn new(builder: GcBuilder) -> Self {
        let options = builder.options;
        let mut mem = Memory::new();
        let nursery_bytes = conversions::raw_align_up(options.nursery_size, BYTES_IN_WORD);
        let nursery = Nursery::new(&mut mem, nursery_bytes, options.max_pinned);
        let old = OldSpace::new(options.small_request_threshold);
        let major = MajorCollector::new(options.min_heap_size);
        Gc {
            options,
            types: builder.types,
            mem,
            nursery,
            old,
            remsets: RememberedSets::default(),
            major,
            finalizers: FinalizableProcessor::new(),
            weakrefs: ReferenceProcessor::new(),
            bridge: ForeignBridge::default(),
            shadows: HashMap::new(),
            destructors_young: Vec::new(),
            destructors_old: Vec::new(),
            minor_queue: Vec::new(),
            minor_pins: Vec::new(),
            pinned_owners: Vec::new(),
            current_owner: None,
            stats: GcStats::default(),
            _runtime: PhantomData,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// The current major-collection phase.
    pub fn phase(&self) -> GcPhase {
        self.major.phase
    }

    delegate! {
        to self.nursery {
            pub fn pinned_count(&self) -> usize;
        }
        to self.old {
            /// Old-space bytes currently allocated.
            pub fn bytes_in_use(&self) -> usize;
        }
    }

    /// Is the object in the young generation (nursery or raw-young)?
    pub(crate) fn is_young(&self, object: ObjectReference) -> bool {
        self.mem.kind(object.to_raw_address()).is_young()
    }

    /* Allocation */

    pub(crate) fn allocate_object(
        &mut self,
        rt: &mut R,
        type_id: TypeId,
        length: Option<usize>,
    ) -> Result<ObjectReference, AllocationError> {
        let desc = self.types.descriptor(type_id);
        debug_assert_eq!(desc.varsize.is_some(), length.is_some());
        let len = length.unwrap_or(0);
        let words = desc
            .checked_total_words(len)
            .ok_or(AllocationError::SizeOverflow)?;
        let bytes = words
            .checked_mul(BYTES_IN_WORD)
            .ok_or(AllocationError::SizeOverflow)?;
        // The object and its card prefix must fit one segment, or the
        // offset would spill into the segment-index bits of its address.
        if self.card_words_for(&desc, len) + words >= SEGMENT_WORDS {
            return Err(AllocationError::SizeOverflow);
        }

        let object = if bytes > self.nursery.size_bytes() / 2 {
            // Too large for the nursery; raw-allocate it, flagged young.
            self.allocate_raw_young(rt, type_id, &desc, len, words)?
        } else {
            let addr = match self.nursery.allocate(words) {
                Some(addr) => addr,
                None => {
                    self.collect_nursery(rt);
                    self.nursery
                        .allocate(words)
                        .ok_or(AllocationError::HeapOutOfMemory)?
                }
            };
            let object = ObjectReference::from_raw_address(addr);
            object_model::write_header(&mut self.mem, addr, type_id, GcFlags::new_young());
            object
        };
        if desc.varsize.is_some() {
            object_model::set_length(&mut self.mem, object.to_raw_address(), len);
        }
        if desc.has_destructor {
            self.destructors_young.push(object);
        }
        if desc.weak_offset.is_some() {
            self.weakrefs.register(object, true);
        }
        trace!(
            "allocated {} ({}, {} words)",
            object,
            desc.name,
            words
        );
        Ok(object)
    }

    fn allocate_raw_young(
        &mut self,
        rt: &mut R,
        type_id: TypeId,
        desc: &TypeDescriptor,
        len: usize,
        words: usize,
    ) -> Result<ObjectReference, AllocationError> {
        // Raw bytes count toward the old generation; keep the collector
        // ahead of them. This must happen before the object exists, since
        // nothing references it yet.
        if self.old.bytes_in_use() > self.major.threshold {
            self.collect_nursery(rt);
        }
        // The ceiling covers the whole segment, card prefix included.
        let card_words = self.card_words_for(desc, len);
        let bytes = conversions::words_to_bytes(card_words + words);
        if self.ceiling_would_be_breached(bytes) {
            return Err(self.note_ceiling_breach());
        }
        let object = self
            .old
            .allocate_raw(&mut self.mem, words, card_words, true);
        let mut flags = GcFlags::new_young();
        flags.set_has_cards(card_words > 0);
        object_model::write_header(&mut self.mem, object.to_raw_address(), type_id, flags);
        Ok(object)
    }

    /// Words of card prefix an old or raw copy of this object needs.
    pub(crate) fn card_words_for(&self, desc: &TypeDescriptor, len: usize) -> usize {
        match desc.varsize {
            Some(v) if v.ptr_item && len >= MIN_CARDS * self.options.card_size => {
                conversions::card_words_for_cards(conversions::cards_for_length(
                    len,
                    self.options.card_size,
                ))
            }
            _ => 0,
        }
    }

    /// Allocates old-space storage for a copy of `words` words, arena cell
    /// or raw segment by size. Writes no header.
    pub(crate) fn allocate_old_copy(
        &mut self,
        desc: &TypeDescriptor,
        len: usize,
        words: usize,
    ) -> ObjectReference {
        if self.old.fits_small(words) {
            ObjectReference::from_raw_address(self.old.allocate_small(&mut self.mem, words))
        } else {
            let card_words = self.card_words_for(desc, len);
            self.old.allocate_raw(&mut self.mem, words, card_words, false)
        }
    }

    fn ceiling_would_be_breached(&self, bytes: usize) -> bool {
        self.options.max_heap_size > 0
            && self.old.bytes_in_use() + bytes > self.options.max_heap_size
    }

    /// One ceiling breach is recoverable; the second in a row, without the
    /// heap having shrunk back below the ceiling, is fatal.
    pub(crate) fn note_ceiling_breach(&mut self) -> AllocationError {
        self.major.ceiling_strikes += 1;
        if self.major.ceiling_strikes >= 2 {
            error!(
                "heap ceiling of {} bytes reached twice in a row ({} bytes in use)",
                self.options.max_heap_size,
                self.old.bytes_in_use()
            );
            panic!("heap ceiling reached twice in a row");
        }
        warn!(
            "heap ceiling of {} bytes reached ({} bytes in use)",
            self.options.max_heap_size,
            self.old.bytes_in_use()
        );
        AllocationError::HeapOutOfMemory
    }

    /* Collection triggers */

    /// A nursery collection, plus a major step when one is in progress or
    /// the old generation has outgrown its threshold.
    pub(crate) fn collect_nursery(&mut self, rt: &mut R) {
        self.collect_minor(rt);
        if self.major.phase != GcPhase::Scanning
            || self.old.bytes_in_use() > self.major.threshold
        {
            self.major_step(rt);
        }
    }

    pub fn collect(&mut self, rt: &mut R, generation: Generation) {
        match generation {
            Generation::Nursery => self.collect_minor(rt),
            Generation::Full => self.collect_full(rt),
        }
    }

    fn collect_full(&mut self, rt: &mut R) {
        self.collect_minor(rt);
        // Finish any cycle already in progress; its marking may predate
        // current mutations, so run one complete fresh cycle after it.
        if self.major.phase != GcPhase::Scanning {
            while !self.major_step(rt) {}
        }
        while !self.major_step(rt) {}
    }

    /// A minor collection followed by one bounded major step. Returns true
    /// if the step completed a major cycle.
    pub fn collect_step(&mut self, rt: &mut R) -> bool {
        self.collect_minor(rt);
        self.major_step(rt)
    }

    /* Pinning */

    /// Pins `object` at its current address. Fails (returning false) if
    /// the object is not in the nursery, is already pinned, may contain
    /// heap pointers, has a finalizer, weakref field or destructor, or the
    /// pin registry is full.
    pub fn pin(&mut self, object: ObjectReference) -> bool {
        if object.is_null() || !self.nursery.contains(object.to_raw_address()) {
            return false;
        }
        let flags = object_model::flags(&self.mem, object);
        if flags.pinned() || self.nursery.pinned_full() {
            return false;
        }
        let desc = self.types.get(object_model::type_id(&self.mem, object));
        if !desc.ptr_offsets.is_empty()
            || desc.weak_offset.is_some()
            || desc.has_destructor
            || matches!(desc.varsize, Some(v) if v.ptr_item)
        {
            return false;
        }
        if self.finalizers.young.iter().any(|&(o, _)| o == object) {
            return false;
        }
        object_model::update_flags(&mut self.mem, object, |f| f.set_pinned(true));
        self.nursery.register_pin(object);
        true
    }

    pub fn unpin(&mut self, object: ObjectReference) {
        debug_assert!(object_model::flags(&self.mem, object).pinned());
        object_model::update_flags(&mut self.mem, object, |f| f.set_pinned(false));
        self.nursery.unregister_pin(object);
    }

    /* Identity */

    /// A token that identifies `object` for its whole lifetime, stable
    /// across moves. Old and raw objects use their address; a nursery
    /// object gets an old shadow copy reserved now, which promotion will
    /// later move it into.
    pub fn identity_token(&mut self, object: ObjectReference) -> usize {
        debug_assert!(!object.is_null());
        let addr = object.to_raw_address();
        if !self.nursery.contains(addr) {
            return addr.as_usize();
        }
        if object_model::flags(&self.mem, object).has_shadow() {
            return self.shadows[&object].to_raw_address().as_usize();
        }
        let desc = self
            .types
            .descriptor(object_model::type_id(&self.mem, object));
        let len = if desc.varsize.is_some() {
            object_model::length(&self.mem, object)
        } else {
            0
        };
        let words = desc.total_words(len);
        let shadow = self.allocate_old_copy(&desc, len, words);
        // Copy now so the shadow carries a valid header and length even if
        // the object dies before promotion.
        self.mem.copy_words(addr, shadow.to_raw_address(), words);
        object_model::update_flags(&mut self.mem, shadow, |f| {
            *f = GcFlags::new_old();
            f.set_dummy(true);
        });
        self.note_new_old_object(shadow);
        object_model::update_flags(&mut self.mem, object, |f| f.set_has_shadow(true));
        self.shadows.insert(object, shadow);
        shadow.to_raw_address().as_usize()
    }

    /* Finalizers, weakrefs, bridge registration */

    pub fn register_finalizer(&mut self, object: ObjectReference, queue: usize) {
        let young = self.is_young(object);
        self.finalizers.register(object, queue, young);
    }

    pub fn ignore_finalizer(&mut self, object: ObjectReference) {
        object_model::update_flags(&mut self.mem, object, |f| f.set_ignore_finalizer(true));
    }

    /* Tracing helpers shared by the minor and major collectors */

    /// Addresses of every traced reference slot of `object`: the fixed
    /// pointer fields plus, for pointer arrays, every item. The weak field
    /// is deliberately absent.
    pub(crate) fn ref_slots(&self, object: ObjectReference) -> Vec<Address> {
        let desc = self.types.get(object_model::type_id(&self.mem, object));
        let base = object_model::fixed_base(desc, object);
        let mut slots: Vec<Address> = desc
            .ptr_offsets
            .iter()
            .map(|&off| base + conversions::words_to_bytes(off))
            .collect();
        if let Some(v) = desc.varsize {
            if v.ptr_item {
                let length = object_model::length(&self.mem, object);
                let items = object_model::item_base(desc, object);
                slots.reserve(length);
                for i in 0..length {
                    slots.push(items + conversions::words_to_bytes(i));
                }
            }
        }
        slots
    }

    /// Reference slots of one card of a pointer array.
    pub(crate) fn card_slots(&self, object: ObjectReference, card: usize) -> Vec<Address> {
        let desc = self.types.get(object_model::type_id(&self.mem, object));
        let length = object_model::length(&self.mem, object);
        let items = object_model::item_base(desc, object);
        let start = card * self.options.card_size;
        let end = (start + self.options.card_size).min(length);
        (start..end)
            .map(|i| items + conversions::words_to_bytes(i))
            .collect()
    }
}
