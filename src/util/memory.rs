//! The segmented heap backing store.
//!
//! The collector never touches host memory directly. All object words live
//! in [`Segment`]s owned by a [`Memory`], and an
//! [`Address`](crate::util::Address) is a (segment, offset) pair encoded in
//! one word. Every load and store is bounds-checked by the backing slice;
//! a reference into a released segment is an internal consistency failure
//! and panics rather than reading stale data.

use crate::util::constants::*;
use crate::util::{Address, ObjectReference};

/// What a segment is used for. The kind decides how the collector treats
/// objects inside it: nursery and raw-young segments hold young objects,
/// everything else is old.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    /// The bump-allocated nursery.
    Nursery,
    /// An old-space arena page carved into cells of `cell_words` words.
    OldPage { cell_words: usize },
    /// A single old object too large for the arena, preceded by
    /// `card_words` words of card bytes (zero if the object has no cards).
    RawOld { card_words: usize },
    /// Like `RawOld`, but the object has not yet survived a minor
    /// collection.
    RawYoung { card_words: usize },
    /// Immortal objects constructed before the heap existed. Never swept.
    Prebuilt,
}

impl SegmentKind {
    /// Does this segment hold young objects?
    pub fn is_young(&self) -> bool {
        matches!(self, SegmentKind::Nursery | SegmentKind::RawYoung { .. })
    }

    /// The card-prefix length of a raw segment, zero for all other kinds.
    pub fn card_words(&self) -> usize {
        match *self {
            SegmentKind::RawOld { card_words } | SegmentKind::RawYoung { card_words } => card_words,
            _ => 0,
        }
    }
}

/// A contiguous run of heap words.
struct Segment {
    kind: SegmentKind,
    words: Box<[usize]>,
}

/// The collector's entire address space. Segment index 0 is permanently
/// unmapped so that the zero address stays null.
pub struct Memory {
    segments: Vec<Option<Segment>>,
    free_ids: Vec<usize>,
}

impl Memory {
    pub fn new() -> Self {
        Memory {
            segments: vec![None],
            free_ids: Vec::new(),
        }
    }

    fn segment(&self, index: usize) -> &Segment {
        match &self.segments[index] {
            Some(seg) => seg,
            None => panic!("access through released segment {}", index),
        }
    }

    fn segment_mut(&mut self, index: usize) -> &mut Segment {
        match &mut self.segments[index] {
            Some(seg) => seg,
            None => panic!("access through released segment {}", index),
        }
    }

    /// Maps a new zero-filled segment of `words` words and returns its base
    /// address.
    pub fn reserve(&mut self, kind: SegmentKind, words: usize) -> Address {
        debug_assert!(words > 0);
        debug_assert!(words < SEGMENT_WORDS);
        let segment = Segment {
            kind,
            words: vec![0usize; words].into_boxed_slice(),
        };
        let index = match self.free_ids.pop() {
            Some(index) => {
                self.segments[index] = Some(segment);
                index
            }
            None => {
                self.segments.push(Some(segment));
                self.segments.len() - 1
            }
        };
        Address::from_parts(index, 0)
    }

    /// Unmaps the segment containing `base`. Any address into it becomes
    /// invalid; its index will be reused.
    pub fn release(&mut self, base: Address) {
        debug_assert_eq!(base.segment_offset(), 0);
        let index = base.segment_index();
        debug_assert!(self.segments[index].is_some());
        self.segments[index] = None;
        self.free_ids.push(index);
    }

    /// Is the segment containing `addr` still mapped?
    pub fn is_mapped(&self, addr: Address) -> bool {
        let index = addr.segment_index();
        index < self.segments.len() && self.segments[index].is_some()
    }

    pub fn kind(&self, addr: Address) -> SegmentKind {
        self.segment(addr.segment_index()).kind
    }

    /// The word length of the segment containing `addr`.
    pub fn segment_words(&self, addr: Address) -> usize {
        self.segment(addr.segment_index()).words.len()
    }

    /// The base address of the segment containing `addr`.
    pub fn segment_base(&self, addr: Address) -> Address {
        Address::from_parts(addr.segment_index(), 0)
    }

    /// Flips a raw-young segment to raw-old once its object survives a
    /// minor collection.
    pub fn promote_raw(&mut self, addr: Address) {
        let seg = self.segment_mut(addr.segment_index());
        match seg.kind {
            SegmentKind::RawYoung { card_words } => {
                seg.kind = SegmentKind::RawOld { card_words };
            }
            _ => panic!("promote_raw on {:?} segment", seg.kind),
        }
    }

    pub fn load(&self, addr: Address) -> usize {
        debug_assert!(addr.is_aligned_to(BYTES_IN_WORD));
        self.segment(addr.segment_index()).words[addr.word_index()]
    }

    pub fn store(&mut self, addr: Address, value: usize) {
        debug_assert!(addr.is_aligned_to(BYTES_IN_WORD));
        self.segment_mut(addr.segment_index()).words[addr.word_index()] = value;
    }

    /// Fills `nwords` words starting at `addr` with `value`.
    pub fn fill(&mut self, addr: Address, nwords: usize, value: usize) {
        let start = addr.word_index();
        let seg = self.segment_mut(addr.segment_index());
        seg.words[start..start + nwords].fill(value);
    }

    /// Copies `nwords` words from `src` to `dst`. The ranges may overlap
    /// within one segment; `memmove` semantics apply.
    pub fn copy_words(&mut self, src: Address, dst: Address, nwords: usize) {
        if nwords == 0 {
            return;
        }
        let (src_seg, src_word) = (src.segment_index(), src.word_index());
        let (dst_seg, dst_word) = (dst.segment_index(), dst.word_index());
        if src_seg == dst_seg {
            let seg = self.segment_mut(src_seg);
            seg.words
                .copy_within(src_word..src_word + nwords, dst_word);
        } else {
            // Split the segment table to borrow source and destination
            // segments at the same time.
            let (lo, hi, lo_is_src) = if src_seg < dst_seg {
                (src_seg, dst_seg, true)
            } else {
                (dst_seg, src_seg, false)
            };
            let (head, tail) = self.segments.split_at_mut(hi);
            let lo_seg = match &mut head[lo] {
                Some(seg) => seg,
                None => panic!("access through released segment {}", lo),
            };
            let hi_seg = match &mut tail[0] {
                Some(seg) => seg,
                None => panic!("access through released segment {}", hi),
            };
            let (from, to) = if lo_is_src {
                (&lo_seg.words, &mut hi_seg.words)
            } else {
                (&hi_seg.words, &mut lo_seg.words)
            };
            to[dst_word..dst_word + nwords].copy_from_slice(&from[src_word..src_word + nwords]);
        }
    }

    /* Card bytes.
     *
     * A raw segment with cards packs one card byte per card into its first
     * `card_words` words; the object itself starts right after the prefix.
     */

    fn card_prefix(&self, object: ObjectReference) -> (usize, usize) {
        let addr = object.to_raw_address();
        let card_words = self.kind(addr).card_words();
        debug_assert!(card_words > 0, "{} has no cards", object);
        (addr.segment_index(), card_words)
    }

    pub fn card_is_set(&self, object: ObjectReference, card: usize) -> bool {
        let (index, card_words) = self.card_prefix(object);
        debug_assert!(card < card_words * BYTES_IN_WORD);
        let word = self.segment(index).words[card / BYTES_IN_WORD];
        (word >> ((card % BYTES_IN_WORD) * BITS_IN_BYTE)) & 0xff != 0
    }

    pub fn set_card(&mut self, object: ObjectReference, card: usize) {
        let (index, card_words) = self.card_prefix(object);
        debug_assert!(card < card_words * BYTES_IN_WORD);
        let seg = self.segment_mut(index);
        seg.words[card / BYTES_IN_WORD] |= 1 << ((card % BYTES_IN_WORD) * BITS_IN_BYTE);
    }

    pub fn clear_cards(&mut self, object: ObjectReference) {
        let (index, card_words) = self.card_prefix(object);
        let seg = self.segment_mut(index);
        seg.words[..card_words].fill(0);
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}
