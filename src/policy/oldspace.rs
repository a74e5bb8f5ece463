//! The old generation: size-classed arena pages plus raw allocations.
//!
//! Small objects (up to `small_request_threshold` bytes) live in arena
//! pages carved into equal cells, one size class per cell word count, with
//! an intrusive free list threaded through free cells. Larger objects each
//! get their own raw segment, optionally prefixed with card bytes when they
//! are pointer arrays worth card-marking.

use crate::util::constants::*;
use crate::util::conversions;
use crate::util::memory::{Memory, SegmentKind};
use crate::util::{Address, ObjectReference};

pub(crate) struct SizeClass {
    /// Head of the free-cell list, zero when empty.
    pub(crate) free_head: Address,
    /// Every page ever carved for this class, by base address.
    pub(crate) pages: Vec<Address>,
}

pub struct OldSpace {
    /// Indexed by cell word count; entries below [`MIN_CELL_WORDS`] unused.
    pub(crate) classes: Vec<SizeClass>,
    /// Raw objects in the old generation.
    pub(crate) raw_old: Vec<ObjectReference>,
    /// Raw objects that have not yet survived a minor collection.
    pub(crate) raw_young: Vec<ObjectReference>,
    pub(crate) bytes_small: usize,
    pub(crate) bytes_raw: usize,
    small_max_words: usize,
}

impl OldSpace {
    pub fn new(small_request_threshold: usize) -> Self {
        let small_max_words =
            conversions::bytes_to_words_up(small_request_threshold).max(MIN_CELL_WORDS);
        let classes = (0..=small_max_words)
            .map(|_| SizeClass {
                free_head: Address::ZERO,
                pages: Vec::new(),
            })
            .collect();
        OldSpace {
            classes,
            raw_old: Vec::new(),
            raw_young: Vec::new(),
            bytes_small: 0,
            bytes_raw: 0,
            small_max_words,
        }
    }

    /// Does a request of `words` words fit the arena?
    pub fn fits_small(&self, words: usize) -> bool {
        words.max(MIN_CELL_WORDS) <= self.small_max_words
    }

    /// The cell word count serving a request of `words` words.
    pub fn cell_words_for(&self, words: usize) -> usize {
        words.max(MIN_CELL_WORDS)
    }

    /// Allocates an arena cell for an object of `words` words. The cell is
    /// not zeroed beyond whatever the free-list link left behind.
    pub fn allocate_small(&mut self, mem: &mut Memory, words: usize) -> Address {
        let cell_words = self.cell_words_for(words);
        debug_assert!(cell_words <= self.small_max_words);
        if self.classes[cell_words].free_head.is_zero() {
            self.carve_page(mem, cell_words);
        }
        let class = &mut self.classes[cell_words];
        let cell = class.free_head;
        debug_assert_eq!(mem.load(cell), CELL_FREE_TAG);
        class.free_head = Address::from_usize(mem.load(cell + BYTES_IN_WORD));
        self.bytes_small += conversions::words_to_bytes(cell_words);
        cell
    }

    fn carve_page(&mut self, mem: &mut Memory, cell_words: usize) {
        let base = mem.reserve(SegmentKind::OldPage { cell_words }, WORDS_IN_PAGE);
        let cells = WORDS_IN_PAGE / cell_words;
        debug_assert!(cells > 0);
        let class = &mut self.classes[cell_words];
        let mut next = class.free_head;
        // Thread the free list backwards so allocation walks the page
        // front to back.
        for i in (0..cells).rev() {
            let cell = base + conversions::words_to_bytes(i * cell_words);
            mem.store(cell, CELL_FREE_TAG);
            mem.store(cell + BYTES_IN_WORD, next.as_usize());
            next = cell;
        }
        class.free_head = next;
        class.pages.push(base);
    }

    /// Returns a cell to its class free list.
    pub fn free_cell(&mut self, mem: &mut Memory, cell: Address, cell_words: usize) {
        mem.store(cell, CELL_FREE_TAG);
        mem.store(cell + BYTES_IN_WORD, self.classes[cell_words].free_head.as_usize());
        self.classes[cell_words].free_head = cell;
        self.bytes_small -= conversions::words_to_bytes(cell_words);
    }

    /// Allocates a raw segment for an object of `words` words, preceded by
    /// `card_words` words of card bytes, and returns the object address.
    pub fn allocate_raw(
        &mut self,
        mem: &mut Memory,
        words: usize,
        card_words: usize,
        young: bool,
    ) -> ObjectReference {
        let total = card_words + words;
        let kind = if young {
            SegmentKind::RawYoung { card_words }
        } else {
            SegmentKind::RawOld { card_words }
        };
        let base = mem.reserve(kind, total);
        let object =
            ObjectReference::from_raw_address(base + conversions::words_to_bytes(card_words));
        if young {
            self.raw_young.push(object);
        } else {
            self.raw_old.push(object);
        }
        self.bytes_raw += conversions::words_to_bytes(total);
        object
    }

    /// Releases the raw segment backing `object`. The caller removes the
    /// object from whichever raw list held it.
    pub fn release_raw(&mut self, mem: &mut Memory, object: ObjectReference) {
        let base = mem.segment_base(object.to_raw_address());
        self.bytes_raw -= conversions::words_to_bytes(mem.segment_words(base));
        mem.release(base);
    }

    pub fn bytes_in_use(&self) -> usize {
        self.bytes_small + self.bytes_raw
    }

    pub fn small_max_words(&self) -> usize {
        self.small_max_words
    }
}
