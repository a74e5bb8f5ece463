//! Object headers, flags, and the type registry.
//!
//! Every object starts with a three-word header: a type word and two flag
//! words. The type word holds the raw [`TypeId`], or one of two reserved
//! tags ([`FORWARDED_TAG`], [`CELL_FREE_TAG`]) when the words no longer
//! describe a live object. The flag words are a [`GcFlags`] struct of
//! byte-sized fields, converted to and from heap words with `bytemuck`
//! rather than manual shifting and masking.
//!
//! Varsize objects carry a length word after the header, then their fixed
//! fields, then `length` items of `item_words` words each:
//!
//! ```text
//! [type][flags0][flags1]                    [field 0].. fixed object
//! [type][flags0][flags1][length][field 0].. [item 0].. varsize object
//! ```

use std::sync::Arc;

use crate::util::constants::*;
use crate::util::conversions;
use crate::util::memory::Memory;
use crate::util::{Address, ObjectReference};

/// An index into the [`TypeRegistry`]. The runtime registers every object
/// layout once at boot and stamps the id into each allocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeId(pub u32);

impl TypeId {
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// The varsize tail of a type: `length` items of `item_words` words. If
/// `ptr_item` is set every item is a single object reference and arrays of
/// this type are card-marked when large enough.
#[derive(Copy, Clone, Debug)]
pub struct VarsizeDescriptor {
    pub item_words: usize,
    pub ptr_item: bool,
}

/// Everything the collector needs to know about one object layout.
#[derive(Clone, Debug)]
pub struct TypeDescriptor {
    /// Diagnostic name, shows up in trace logging only.
    pub name: &'static str,
    /// Number of fixed payload words (excluding header and length word).
    pub fixed_words: usize,
    /// Word offsets of reference fields within the fixed payload.
    pub ptr_offsets: Arc<[usize]>,
    /// Present iff objects of this type have a varsize tail.
    pub varsize: Option<VarsizeDescriptor>,
    /// Objects of this type get a destructor callback when collected.
    pub has_destructor: bool,
    /// If present, the fixed field at this word offset is a weak reference:
    /// not traced, nulled when its target dies. The offset must not also
    /// appear in `ptr_offsets`.
    pub weak_offset: Option<usize>,
}

impl TypeDescriptor {
    /// The word size of an object of this type with the given tail length
    /// (zero for fixed types).
    pub fn total_words(&self, length: usize) -> usize {
        match self.varsize {
            Some(v) => HEADER_WORDS + 1 + self.fixed_words + v.item_words * length,
            None => HEADER_WORDS + self.fixed_words,
        }
    }

    /// Like [`total_words`](Self::total_words), but reports overflow.
    pub fn checked_total_words(&self, length: usize) -> Option<usize> {
        match self.varsize {
            Some(v) => v
                .item_words
                .checked_mul(length)?
                .checked_add(HEADER_WORDS + 1 + self.fixed_words),
            None => Some(HEADER_WORDS + self.fixed_words),
        }
    }
}

/// Maps [`TypeId`]s to layouts. Populated before the heap is built and
/// read-only afterwards.
#[derive(Default)]
pub struct TypeRegistry {
    types: Vec<TypeDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a layout and returns its id.
    pub fn register(&mut self, desc: TypeDescriptor) -> TypeId {
        assert!(self.types.len() < MAX_TYPE_ID, "type registry full");
        for &offset in desc.ptr_offsets.iter() {
            assert!(
                offset < desc.fixed_words,
                "type {}: ptr offset {} outside fixed payload of {} words",
                desc.name,
                offset,
                desc.fixed_words
            );
        }
        if let Some(weak) = desc.weak_offset {
            assert!(weak < desc.fixed_words);
            assert!(
                !desc.ptr_offsets.contains(&weak),
                "type {}: weak offset {} also listed as a strong ptr",
                desc.name,
                weak
            );
        }
        if let Some(v) = desc.varsize {
            assert!(v.item_words > 0);
            assert!(!v.ptr_item || v.item_words == 1);
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(desc);
        id
    }

    pub fn get(&self, id: TypeId) -> &TypeDescriptor {
        &self.types[id.as_usize()]
    }

    /// A clone of the descriptor, cheap because the pointer-offset table is
    /// shared. Collector loops clone so they can keep mutating the heap
    /// while walking the layout.
    pub fn descriptor(&self, id: TypeId) -> TypeDescriptor {
        self.types[id.as_usize()].clone()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Per-object collector state, one byte per flag. Lives in the two flag
/// words of the header; `bytemuck` casts it to and from `[usize; 2]`.
#[repr(C)]
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GcFlags {
    /// Set on old objects the write barrier has not yet remembered. The
    /// barrier fires on objects with this flag set, clears it, and records
    /// the object; young objects keep it clear so stores to them are free.
    track_young_ptrs: u8,
    /// Set on prebuilt objects until a barrier proves they may point into
    /// the heap. While set, tracing skips the object's fields.
    no_heap_ptrs: u8,
    /// Tri-color mark bit of the major collector: set means black (or gray
    /// while still on the worklist).
    visited: u8,
    /// Set on a pinned or raw-young object once a minor collection reached
    /// it; such objects stay put but count as survivors.
    survived_minor: u8,
    /// Set on a young object whose identity token forced allocation of an
    /// old shadow copy.
    has_shadow: u8,
    /// The object has a card-byte prefix in its raw segment.
    has_cards: u8,
    /// At least one card byte of this object is set, and the object is on
    /// the cards-set remembered list.
    cards_set: u8,
    /// The object must not be moved by a minor collection.
    pinned: u8,
    /// The object's registered finalizer must not run.
    ignore_finalizer: u8,
    /// The object is a shadow: a reserved old copy of a still-young object,
    /// not yet carrying live data.
    dummy: u8,
    /// Finalization-ordering state (0 untouched, 1 in progress, 2 reachable
    /// from a finalizer candidate, 3 ordering resolved).
    finalization_state: u8,
    _reserved: [u8; 5],
}

static_assertions::const_assert_eq!(
    std::mem::size_of::<GcFlags>(),
    FLAG_WORDS * BYTES_IN_WORD
);

macro_rules! flag_accessors {
    ($($flag:ident => $setter:ident),*$(,)?) => {
        impl GcFlags {
            $(
                pub fn $flag(&self) -> bool {
                    self.$flag != 0
                }
                pub fn $setter(&mut self, value: bool) {
                    self.$flag = value as u8;
                }
            )*
        }
    };
}

flag_accessors! {
    track_young_ptrs => set_track_young_ptrs,
    no_heap_ptrs => set_no_heap_ptrs,
    visited => set_visited,
    survived_minor => set_survived_minor,
    has_shadow => set_has_shadow,
    has_cards => set_has_cards,
    cards_set => set_cards_set,
    pinned => set_pinned,
    ignore_finalizer => set_ignore_finalizer,
    dummy => set_dummy,
}

impl GcFlags {
    pub fn finalization_state(&self) -> u8 {
        self.finalization_state
    }

    pub fn set_finalization_state(&mut self, state: u8) {
        debug_assert!(state <= 3);
        self.finalization_state = state;
    }

    /// Flags of a freshly allocated young object: everything clear.
    pub fn new_young() -> Self {
        GcFlags::default()
    }

    /// Flags of an object living in (or just promoted to) the old
    /// generation: the barrier must fire on its first young store.
    pub fn new_old() -> Self {
        let mut flags = GcFlags::default();
        flags.set_track_young_ptrs(true);
        flags
    }

    /// Flags of a prebuilt object: old, and assumed free of heap pointers
    /// until a barrier proves otherwise.
    pub fn new_prebuilt() -> Self {
        let mut flags = GcFlags::new_old();
        flags.set_no_heap_ptrs(true);
        flags
    }
}

/// Writes a fresh header at `addr`.
pub fn write_header(mem: &mut Memory, addr: Address, type_id: TypeId, flags: GcFlags) {
    mem.store(addr, type_id.as_usize());
    set_flags(mem, ObjectReference::from_raw_address(addr), flags);
}

/// The raw type word, which may be a reserved tag.
pub fn type_word(mem: &Memory, object: ObjectReference) -> usize {
    mem.load(object.to_raw_address())
}

pub fn type_id(mem: &Memory, object: ObjectReference) -> TypeId {
    let word = type_word(mem, object);
    debug_assert!(
        word <= MAX_TYPE_ID,
        "{} does not hold a live object (type word {:#x})",
        object,
        word
    );
    TypeId(word as u32)
}

pub fn flags(mem: &Memory, object: ObjectReference) -> GcFlags {
    let addr = object.to_raw_address();
    let words = [mem.load(addr + BYTES_IN_WORD), mem.load(addr + 2 * BYTES_IN_WORD)];
    bytemuck::cast(words)
}

pub fn set_flags(mem: &mut Memory, object: ObjectReference, flags: GcFlags) {
    let addr = object.to_raw_address();
    let words: [usize; 2] = bytemuck::cast(flags);
    mem.store(addr + BYTES_IN_WORD, words[0]);
    mem.store(addr + 2 * BYTES_IN_WORD, words[1]);
}

/// Read-modify-write on the flag words.
pub fn update_flags(
    mem: &mut Memory,
    object: ObjectReference,
    update: impl FnOnce(&mut GcFlags),
) {
    let mut f = flags(mem, object);
    update(&mut f);
    set_flags(mem, object, f);
}

/// The tail length of a varsize object.
pub fn length(mem: &Memory, object: ObjectReference) -> usize {
    mem.load(object.to_raw_address() + conversions::words_to_bytes(HEADER_WORDS))
}

pub fn set_length(mem: &mut Memory, addr: Address, len: usize) {
    mem.store(addr + conversions::words_to_bytes(HEADER_WORDS), len);
}

/// The word size of a live object, length word included for varsize types.
pub fn object_words(mem: &Memory, types: &TypeRegistry, object: ObjectReference) -> usize {
    let desc = types.get(type_id(mem, object));
    let len = if desc.varsize.is_some() {
        length(mem, object)
    } else {
        0
    };
    desc.total_words(len)
}

/// Address of fixed field 0. Fixed fields follow the length word in varsize
/// objects and the header in fixed ones.
pub fn fixed_base(desc: &TypeDescriptor, object: ObjectReference) -> Address {
    let skip = HEADER_WORDS + usize::from(desc.varsize.is_some());
    object.to_raw_address() + conversions::words_to_bytes(skip)
}

/// Address of item 0 of a varsize object.
pub fn item_base(desc: &TypeDescriptor, object: ObjectReference) -> Address {
    debug_assert!(desc.varsize.is_some());
    object.to_raw_address() + conversions::words_to_bytes(HEADER_WORDS + 1 + desc.fixed_words)
}

/// Address of item `index` of a varsize object.
pub fn item_address(desc: &TypeDescriptor, object: ObjectReference, index: usize) -> Address {
    let item_words = match desc.varsize {
        Some(v) => v.item_words,
        None => panic!("item access on fixed type {}", desc.name),
    };
    item_base(desc, object) + conversions::words_to_bytes(index * item_words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::memory::SegmentKind;

    fn node_type() -> TypeDescriptor {
        TypeDescriptor {
            name: "node",
            fixed_words: 3,
            ptr_offsets: vec![0, 2].into(),
            varsize: None,
            has_destructor: false,
            weak_offset: None,
        }
    }

    #[test]
    fn flag_words_round_trip() {
        let mut flags = GcFlags::default();
        flags.set_track_young_ptrs(true);
        flags.set_pinned(true);
        flags.set_finalization_state(2);
        let words: [usize; 2] = bytemuck::cast(flags);
        let back: GcFlags = bytemuck::cast(words);
        assert_eq!(back, flags);
        assert!(back.track_young_ptrs());
        assert!(back.pinned());
        assert!(!back.visited());
        assert_eq!(back.finalization_state(), 2);
    }

    #[test]
    fn header_round_trip() {
        let mut mem = Memory::new();
        let mut types = TypeRegistry::new();
        let id = types.register(node_type());

        let addr = mem.reserve(SegmentKind::Nursery, 16);
        write_header(&mut mem, addr, id, GcFlags::new_old());
        let obj = ObjectReference::from_raw_address(addr);
        assert_eq!(type_id(&mem, obj), id);
        assert!(flags(&mem, obj).track_young_ptrs());
        assert_eq!(object_words(&mem, &types, obj), 6);

        update_flags(&mut mem, obj, |f| f.set_visited(true));
        assert!(flags(&mem, obj).visited());
        assert!(flags(&mem, obj).track_young_ptrs());
    }

    #[test]
    fn varsize_layout() {
        let desc = TypeDescriptor {
            name: "array",
            fixed_words: 1,
            ptr_offsets: vec![].into(),
            varsize: Some(VarsizeDescriptor {
                item_words: 1,
                ptr_item: true,
            }),
            has_destructor: false,
            weak_offset: None,
        };
        assert_eq!(desc.total_words(0), 5);
        assert_eq!(desc.total_words(4), 9);
        assert_eq!(desc.checked_total_words(usize::MAX), None);

        let obj = ObjectReference::from_raw_address(Address::from_parts(1, 0));
        assert_eq!(fixed_base(&desc, obj).word_index(), 4);
        assert_eq!(item_base(&desc, obj).word_index(), 5);
        assert_eq!(item_address(&desc, obj, 3).word_index(), 8);
    }

    #[test]
    #[should_panic]
    fn weak_offset_overlapping_ptr() {
        let mut types = TypeRegistry::new();
        types.register(TypeDescriptor {
            name: "bad",
            fixed_words: 2,
            ptr_offsets: vec![0].into(),
            varsize: None,
            has_destructor: false,
            weak_offset: Some(0),
        });
    }
}
