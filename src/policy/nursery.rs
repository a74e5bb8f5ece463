//! The bump-pointer nursery.
//!
//! One segment, allocated front to back. Allocation never zero-fills; the
//! mutator initializes every word it cares about. Pinned objects survive a
//! minor collection in place, so after each minor the nursery is a sequence
//! of free gaps between pins and allocation walks the gaps in address
//! order.

use std::collections::VecDeque;

use crate::util::constants::BYTES_IN_WORD;
use crate::util::conversions;
use crate::util::memory::{Memory, SegmentKind};
use crate::util::options::FillPattern;
use crate::util::{Address, ObjectReference};

pub struct Nursery {
    base: Address,
    size_bytes: usize,
    /// Next allocation goes here.
    free: Address,
    /// End of the gap currently being filled.
    top: Address,
    /// Remaining free gaps, in address order.
    gaps: VecDeque<(Address, Address)>,
    /// Currently pinned objects, unordered.
    pinned: Vec<ObjectReference>,
    max_pinned: usize,
}

impl Nursery {
    pub fn new(mem: &mut Memory, size_bytes: usize, max_pinned: usize) -> Self {
        debug_assert!(size_bytes % BYTES_IN_WORD == 0);
        let base = mem.reserve(SegmentKind::Nursery, size_bytes / BYTES_IN_WORD);
        Nursery {
            base,
            size_bytes,
            free: base,
            top: base + size_bytes,
            gaps: VecDeque::new(),
            pinned: Vec::new(),
            max_pinned,
        }
    }

    /// Bump-allocates `words` words. `None` means the nursery is exhausted
    /// and a minor collection is due.
    pub fn allocate(&mut self, words: usize) -> Option<Address> {
        let bytes = conversions::words_to_bytes(words);
        loop {
            if self.free + bytes <= self.top {
                let result = self.free;
                self.free += bytes;
                return Some(result);
            }
            let (start, end) = self.gaps.pop_front()?;
            self.free = start;
            self.top = end;
        }
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr.segment_index() == self.base.segment_index()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn pinned(&self) -> &[ObjectReference] {
        &self.pinned
    }

    pub fn pinned_count(&self) -> usize {
        self.pinned.len()
    }

    pub fn pinned_full(&self) -> bool {
        self.pinned.len() >= self.max_pinned
    }

    pub fn register_pin(&mut self, object: ObjectReference) {
        debug_assert!(!self.pinned.contains(&object));
        self.pinned.push(object);
    }

    pub fn unregister_pin(&mut self, object: ObjectReference) {
        self.pinned.retain(|&p| p != object);
    }

    /// Resets the nursery after a minor collection. `survivor_extents` are
    /// the (address, words) ranges of surviving pinned objects, sorted by
    /// address; everything between them is free again. `survivors` becomes
    /// the new pin registry.
    pub fn rebuild(
        &mut self,
        mem: &mut Memory,
        survivor_extents: &[(Address, usize)],
        survivors: Vec<ObjectReference>,
        fill: FillPattern,
    ) {
        use crate::util::constants::ZAP_FILL_WORD;

        let limit = self.base + self.size_bytes;
        self.gaps.clear();
        let mut cursor = self.base;
        for &(addr, words) in survivor_extents {
            debug_assert!(addr >= cursor && addr < limit);
            if addr > cursor {
                self.gaps.push_back((cursor, addr));
            }
            cursor = addr + conversions::words_to_bytes(words);
        }
        if cursor < limit {
            self.gaps.push_back((cursor, limit));
        }

        if fill == FillPattern::Zap {
            for &(start, end) in &self.gaps {
                mem.fill(start, (end - start) / BYTES_IN_WORD, ZAP_FILL_WORD);
            }
        }

        match self.gaps.pop_front() {
            Some((start, end)) => {
                self.free = start;
                self.top = end;
            }
            None => {
                // Fully pinned. The next allocation fails and retriggers
                // collection until a pin is released.
                self.free = limit;
                self.top = limit;
            }
        }
        self.pinned = survivors;
    }
}
