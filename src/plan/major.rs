//! The incremental major collector.
//!
//! A major cycle is an explicit state machine driven by bounded
//! [`major_step`](crate::gc::Gc::major_step) calls, so the mutator runs
//! between steps:
//!
//! - **Scanning**: snapshot the roots into the gray worklist. One step.
//! - **Marking**: budgeted tri-color marking. Old objects promoted while
//!   this phase is live are grayed; a minor collection re-grays the roots
//!   and every remembered object the mutator touched, which keeps the
//!   incremental marking sound without a separate dirty-marking barrier.
//! - **Sweeping**: budgeted reclamation of unmarked raw objects and arena
//!   cells; pages left with no survivor are released whole. Objects
//!   promoted while sweeping is live are allocated already marked.
//! - **Finalizing**: run due finalizers and flush foreign releases, then
//!   back to Scanning.

use crate::gc::Gc;
use crate::util::constants::*;
use crate::util::conversions;
use crate::util::{Address, ObjectReference};
use crate::vm::object_model;
use crate::vm::{HeapView, Runtime};

/// The phase a major cycle is in. `Scanning` doubles as "no cycle in
/// progress": the next step starts a fresh one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, enum_map::Enum, strum_macros::Display)]
pub enum GcPhase {
    Scanning,
    Marking,
    Sweeping,
    Finalizing,
}

pub(crate) struct MajorCollector {
    pub(crate) phase: GcPhase,
    /// Gray worklist: reached, fields not yet scanned.
    pub(crate) gray: Vec<ObjectReference>,
    /// How much of the prebuilt root list marking has consumed; the list
    /// can grow while a cycle runs.
    pub(crate) prebuilt_scan_cursor: usize,
    pub(crate) raw_cursor: usize,
    pub(crate) class_cursor: usize,
    pub(crate) page_cursor: usize,
    /// Pages per class that existed when sweeping started; later pages
    /// hold only fresh objects and are skipped.
    pub(crate) sweep_limits: Vec<usize>,
    /// Objects allocated marked during sweeping; unmarked at completion.
    pub(crate) sweep_fresh: Vec<ObjectReference>,
    /// (cell_words, base) of pages with no surviving cell, released when
    /// sweeping completes.
    pub(crate) dead_pages: Vec<(usize, Address)>,
    /// Old-space bytes past which allocation drives the collector.
    pub(crate) threshold: usize,
    /// Consecutive heap-ceiling breaches; two in a row are fatal.
    pub(crate) ceiling_strikes: usize,
}

impl MajorCollector {
    pub(crate) fn new(initial_threshold: usize) -> Self {
        MajorCollector {
            phase: GcPhase::Scanning,
            gray: Vec::new(),
            prebuilt_scan_cursor: 0,
            raw_cursor: 0,
            class_cursor: 0,
            page_cursor: 0,
            sweep_limits: Vec::new(),
            sweep_fresh: Vec::new(),
            dead_pages: Vec::new(),
            threshold: initial_threshold,
            ceiling_strikes: 0,
        }
    }
}

impl<R: Runtime> Gc<R> {
    /// Runs one bounded step of the major state machine. Returns true when
    /// the step completed a cycle.
    pub(crate) fn major_step(&mut self, rt: &mut R) -> bool {
        let phase = self.major.phase;
        self.stats.steps[phase] += 1;
        trace!("major step in phase {}", phase);
        match phase {
            GcPhase::Scanning => {
                self.scan_major_roots(rt);
                self.major.phase = GcPhase::Marking;
                false
            }
            GcPhase::Marking => {
                if self.marking_step() {
                    self.finish_marking(rt);
                    self.major.phase = GcPhase::Sweeping;
                }
                false
            }
            GcPhase::Sweeping => {
                if self.sweeping_step() {
                    self.finish_sweeping();
                    self.major.phase = GcPhase::Finalizing;
                }
                false
            }
            GcPhase::Finalizing => {
                self.run_due_finalizers(rt);
                self.flush_foreign_releases(rt);
                self.stats.major_cycles += 1;
                info!(
                    "major cycle #{} complete, {} bytes live, next threshold {} bytes",
                    self.stats.major_cycles,
                    self.old.bytes_in_use(),
                    self.major.threshold
                );
                self.major.phase = GcPhase::Scanning;
                true
            }
        }
    }

    fn scan_major_roots(&mut self, rt: &mut R) {
        debug_assert!(self.major.gray.is_empty());
        let mut roots = Vec::new();
        rt.walk_roots(&mut |slot: &mut ObjectReference| {
            if !slot.is_null() {
                roots.push(*slot);
            }
        });
        self.major.gray = roots;
        self.major
            .gray
            .extend(self.remsets.prebuilt_root_objects.iter().copied());
        self.major.prebuilt_scan_cursor = self.remsets.prebuilt_root_objects.len();
        // Reserved shadow copies stay alive as long as the map holds them.
        self.major.gray.extend(self.shadows.values().copied());
        // Externally owned bridge objects are roots too.
        let mut bridge_roots = Vec::new();
        for entry in &self.bridge.old {
            bridge_roots.push((entry.object, entry.handle, entry.baseline));
        }
        for (object, handle, baseline) in bridge_roots {
            if rt.foreign_refcount(handle) != baseline {
                self.major.gray.push(object);
            }
        }
    }

    /// Budgeted marking. Returns true when the worklist is exhausted and
    /// no prebuilt root discovered since scanning remains.
    fn marking_step(&mut self) -> bool {
        let budget = self.options.increment_step / BYTES_IN_WORD;
        let mut traced = 0usize;
        while traced < budget {
            let object = match self.major.gray.pop() {
                Some(object) => object,
                None => {
                    if self.major.prebuilt_scan_cursor
                        < self.remsets.prebuilt_root_objects.len()
                    {
                        let tail = self.remsets.prebuilt_root_objects
                            [self.major.prebuilt_scan_cursor..]
                            .to_vec();
                        self.major.prebuilt_scan_cursor =
                            self.remsets.prebuilt_root_objects.len();
                        self.major.gray.extend(tail);
                        continue;
                    }
                    return true;
                }
            };
            traced += self.mark_object(object);
        }
        self.major.gray.is_empty()
            && self.major.prebuilt_scan_cursor == self.remsets.prebuilt_root_objects.len()
    }

    /// Blackens one gray object, pushing its unmarked old children.
    /// Returns the tracing cost in words.
    fn mark_object(&mut self, object: ObjectReference) -> usize {
        if self.is_young(object) {
            // Young objects are not this collector's concern; pinned and
            // raw-young survivors are kept by the minor collections.
            return 1;
        }
        let flags = object_model::flags(&self.mem, object);
        if flags.visited() || flags.no_heap_ptrs() {
            return 1;
        }
        object_model::update_flags(&mut self.mem, object, |f| f.set_visited(true));
        if flags.dummy() {
            // A shadow carries a copy of still-young data; its fields are
            // not live references.
            return 1;
        }
        let words = object_model::object_words(&self.mem, &self.types, object);
        for slot in self.ref_slots(object) {
            let value =
                ObjectReference::from_raw_address(Address::from_usize(self.mem.load(slot)));
            if !value.is_null() && !self.is_young(value) {
                self.major.gray.push(value);
            }
        }
        words.max(1)
    }

    fn drain_gray(&mut self) {
        while let Some(object) = self.major.gray.pop() {
            self.mark_object(object);
        }
    }

    /// Marking is complete; resolve everything that depends on the final
    /// mark state before any memory is reclaimed.
    fn finish_marking(&mut self, rt: &mut R) {
        self.deal_with_old_finalizers();
        self.drain_gray();
        self.null_old_weakrefs();
        self.reap_old_bridge();
        self.run_old_destructors(rt);

        // Unreachable objects may still sit in the remembered sets (a
        // dead old object can be re-remembered for pointing at a pinned
        // survivor). Drop them now, while the mark state is final and
        // their storage has not been reclaimed.
        let mem = &self.mem;
        self.remsets
            .old_objects_pointing_to_young
            .retain(|&object| object_model::flags(mem, object).visited());
        self.remsets
            .old_objects_with_cards_set
            .retain(|&object| object_model::flags(mem, object).visited());

        // Arena free lists are rebuilt by the sweep.
        for class in &mut self.old.classes {
            class.free_head = Address::ZERO;
        }
        self.major.sweep_limits = self
            .old
            .classes
            .iter()
            .map(|class| class.pages.len())
            .collect();
        self.major.raw_cursor = 0;
        self.major.class_cursor = 0;
        self.major.page_cursor = 0;
        debug_assert!(self.major.dead_pages.is_empty());
    }

    fn null_old_weakrefs(&mut self) {
        let owners = std::mem::take(&mut self.weakrefs.old);
        for owner in owners {
            if !object_model::flags(&self.mem, owner).visited() {
                // the owner dies with its weakref
                continue;
            }
            let desc = self
                .types
                .descriptor(object_model::type_id(&self.mem, owner));
            let weak = match desc.weak_offset {
                Some(offset) => offset,
                None => panic!("weakref list holds {} without a weak field", owner),
            };
            let slot = object_model::fixed_base(&desc, owner) + conversions::words_to_bytes(weak);
            let target =
                ObjectReference::from_raw_address(Address::from_usize(self.mem.load(slot)));
            if !target.is_null()
                && !self.is_young(target)
                && !object_model::flags(&self.mem, target).visited()
            {
                trace!("weak field of {} nulled", owner);
                self.mem.store(slot, 0);
            }
            self.weakrefs.old.push(owner);
        }
    }

    fn run_old_destructors(&mut self, rt: &mut R) {
        let list = std::mem::take(&mut self.destructors_old);
        let mut dead = Vec::new();
        for object in list {
            if object_model::flags(&self.mem, object).visited() {
                self.destructors_old.push(object);
            } else {
                dead.push(object);
            }
        }
        // Nothing is swept yet, so the dying objects are still readable.
        for object in dead {
            rt.run_destructor(HeapView::new(&self.mem, &self.types), object);
        }
    }

    /* Finalization ordering */

    /// Decides which unreachable finalizer candidates may run now.
    ///
    /// A candidate becomes ready only when every object it points to is
    /// itself ready or done, so no finalizer observes a peer whose own
    /// finalizer already ran. Candidates reachable from an earlier-ordered
    /// candidate are deferred to a later cycle; ready candidates are
    /// resurrected (grayed) so the sweep keeps them and everything they
    /// reference until their finalizer has run.
    fn deal_with_old_finalizers(&mut self) {
        let candidates = std::mem::take(&mut self.finalizers.old);
        if candidates.is_empty() {
            return;
        }
        let mut new_list = Vec::new();
        let mut marked = Vec::new();
        let mut touched: Vec<ObjectReference> = Vec::new();
        let mut pending: Vec<ObjectReference> = Vec::new();
        for (object, queue) in candidates {
            debug_assert_ne!(self.finalization_state(object), 1);
            if object_model::flags(&self.mem, object).visited() {
                new_list.push((object, queue));
                continue;
            }
            marked.push((object, queue));
            if self.finalization_state(object) == 0 {
                self.set_finalization_state(object, 1, &mut touched);
                pending.extend(self.old_children(object));
            }
            while let Some(y) = pending.pop() {
                match self.finalization_state(y) {
                    0 => {
                        self.set_finalization_state(y, 1, &mut touched);
                        pending.extend(self.old_children(y));
                    }
                    2 => self.bump_finalization_states(y, 2, 3, &mut touched),
                    _ => {}
                }
            }
            self.bump_finalization_states(object, 1, 2, &mut touched);
        }
        for (object, queue) in marked {
            let state = self.finalization_state(object);
            debug_assert!(state >= 2);
            if state == 2 {
                self.finalizers.run_queue.push((object, queue));
                self.major.gray.push(object);
                self.bump_finalization_states(object, 2, 3, &mut touched);
            } else {
                // Deferred: kept alive through the chain of the candidate
                // that made it state 3, runs in a later cycle.
                new_list.push((object, queue));
            }
        }
        for object in touched {
            object_model::update_flags(&mut self.mem, object, |f| f.set_finalization_state(0));
        }
        self.finalizers.old = new_list;
    }

    fn finalization_state(&self, object: ObjectReference) -> u8 {
        object_model::flags(&self.mem, object).finalization_state()
    }

    fn set_finalization_state(
        &mut self,
        object: ObjectReference,
        state: u8,
        touched: &mut Vec<ObjectReference>,
    ) {
        object_model::update_flags(&mut self.mem, object, |f| f.set_finalization_state(state));
        touched.push(object);
    }

    /// Moves `object` and everything reachable from it through
    /// `from`-state objects into state `to`.
    fn bump_finalization_states(
        &mut self,
        object: ObjectReference,
        from: u8,
        to: u8,
        touched: &mut Vec<ObjectReference>,
    ) {
        let mut pending = vec![object];
        while let Some(x) = pending.pop() {
            if self.finalization_state(x) != from {
                continue;
            }
            self.set_finalization_state(x, to, touched);
            pending.extend(self.old_children(x));
        }
    }

    /// Non-null old objects referenced by `object`.
    fn old_children(&self, object: ObjectReference) -> Vec<ObjectReference> {
        let flags = object_model::flags(&self.mem, object);
        if flags.no_heap_ptrs() || flags.dummy() {
            return Vec::new();
        }
        self.ref_slots(object)
            .into_iter()
            .map(|slot| {
                ObjectReference::from_raw_address(Address::from_usize(self.mem.load(slot)))
            })
            .filter(|value| !value.is_null() && !self.is_young(*value))
            .collect()
    }

    /* Sweeping */

    /// Budgeted sweeping. Returns true when both the raw list and every
    /// page that existed at mark time have been processed.
    fn sweeping_step(&mut self) -> bool {
        let mut budget = self.options.increment_step / BYTES_IN_WORD;

        while budget > 0 && self.major.raw_cursor < self.old.raw_old.len() {
            let object = self.old.raw_old[self.major.raw_cursor];
            let base = self.mem.segment_base(object.to_raw_address());
            let words = self.mem.segment_words(base);
            if object_model::flags(&self.mem, object).visited() {
                object_model::update_flags(&mut self.mem, object, |f| f.set_visited(false));
                self.major.raw_cursor += 1;
            } else {
                trace!("swept raw {}", object);
                self.old.raw_old.swap_remove(self.major.raw_cursor);
                self.old.release_raw(&mut self.mem, object);
            }
            budget = budget.saturating_sub(words);
        }
        if self.major.raw_cursor < self.old.raw_old.len() {
            return false;
        }

        while budget > 0 && self.major.class_cursor < self.old.classes.len() {
            let class = self.major.class_cursor;
            if self.major.page_cursor >= self.major.sweep_limits[class] {
                self.major.class_cursor += 1;
                self.major.page_cursor = 0;
                continue;
            }
            let base = self.old.classes[class].pages[self.major.page_cursor];
            self.sweep_page(class, base);
            self.major.page_cursor += 1;
            budget = budget.saturating_sub(WORDS_IN_PAGE);
        }
        self.major.class_cursor >= self.old.classes.len()
    }

    fn sweep_page(&mut self, cell_words: usize, base: Address) {
        let cells = WORDS_IN_PAGE / cell_words;
        let mut was_free = Vec::new();
        let mut dead = Vec::new();
        let mut live = 0usize;
        for i in 0..cells {
            let cell = base + conversions::words_to_bytes(i * cell_words);
            if self.mem.load(cell) == CELL_FREE_TAG {
                was_free.push(cell);
                continue;
            }
            let object = ObjectReference::from_raw_address(cell);
            if object_model::flags(&self.mem, object).visited() {
                object_model::update_flags(&mut self.mem, object, |f| f.set_visited(false));
                live += 1;
            } else {
                trace!("swept {}", object);
                dead.push(cell);
            }
        }
        if live == 0 {
            // Whole page is free; release it instead of refilling the
            // free list with its cells.
            self.old.bytes_small -= conversions::words_to_bytes(dead.len() * cell_words);
            self.major.dead_pages.push((cell_words, base));
        } else {
            for cell in dead {
                self.old.free_cell(&mut self.mem, cell, cell_words);
            }
            // Cells already free when marking started keep their tag and
            // only need re-linking.
            for cell in was_free {
                self.mem
                    .store(cell + BYTES_IN_WORD, self.old.classes[cell_words].free_head.as_usize());
                self.old.classes[cell_words].free_head = cell;
            }
        }
    }

    fn finish_sweeping(&mut self) {
        for (cell_words, base) in std::mem::take(&mut self.major.dead_pages) {
            self.mem.release(base);
            self.old.classes[cell_words].pages.retain(|&p| p != base);
        }

        // Objects allocated marked while sweeping ran start the next
        // cycle unmarked like everyone else. They cannot have been
        // reclaimed: the sweep skips fresh pages and keeps marked raws.
        for object in std::mem::take(&mut self.major.sweep_fresh) {
            object_model::update_flags(&mut self.mem, object, |f| f.set_visited(false));
        }
        for i in 0..self.remsets.prebuilt_root_objects.len() {
            let object = self.remsets.prebuilt_root_objects[i];
            object_model::update_flags(&mut self.mem, object, |f| f.set_visited(false));
        }

        let live = self.old.bytes_in_use();
        let mut next = (live as f64 * self.options.growth) as usize;
        next = next.min(live + self.options.max_delta);
        next = next.max(self.options.min_heap_size);
        if self.options.max_heap_size > 0 {
            next = next.min(self.options.max_heap_size);
            if live <= self.options.max_heap_size {
                self.major.ceiling_strikes = 0;
            }
        }
        self.major.threshold = next;
        debug!("sweep done, {} bytes live, next threshold {}", live, next);
    }

    fn run_due_finalizers(&mut self, rt: &mut R) {
        let due = std::mem::take(&mut self.finalizers.run_queue);
        for (object, queue) in due {
            if object_model::flags(&self.mem, object).ignore_finalizer() {
                continue;
            }
            debug!("running finalizer for {} on queue {}", object, queue);
            rt.run_finalizer(HeapView::new(&self.mem, &self.types), object, queue);
        }
    }

    /// Every freshly created old object passes through here so an
    /// in-progress cycle does not miss or prematurely reclaim it.
    pub(crate) fn note_new_old_object(&mut self, object: ObjectReference) {
        match self.major.phase {
            GcPhase::Marking => self.major.gray.push(object),
            GcPhase::Sweeping => {
                object_model::update_flags(&mut self.mem, object, |f| f.set_visited(true));
                self.major.sweep_fresh.push(object);
            }
            GcPhase::Scanning | GcPhase::Finalizing => {}
        }
    }
}
