use bytemuck::NoUninit;

use std::fmt;
use std::ops::*;

use crate::util::constants::{LOG_SEGMENT_BYTES, SEGMENT_OFFSET_MASK};

/// size in bytes
pub type ByteSize = usize;
/// offset in bytes
pub type ByteOffset = isize;

/// Address represents a location in the GC's virtual, segmented address
/// space. The high bits select a segment (one nursery, arena page, or raw
/// allocation), the low bits are a byte offset into it. This is designed to
/// support address arithmetic in a safe way; it never aliases host memory,
/// so it can be constructed and manipulated freely. Dereferencing goes
/// through [`Memory`](crate::util::memory::Memory), which bounds-checks.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, NoUninit)]
pub struct Address(usize);

/// Address + ByteSize (positive)
impl Add<ByteSize> for Address {
    type Output = Address;
    fn add(self, offset: ByteSize) -> Address {
        Address(self.0 + offset)
    }
}

/// Address += ByteSize (positive)
impl AddAssign<ByteSize> for Address {
    fn add_assign(&mut self, offset: ByteSize) {
        self.0 += offset;
    }
}

/// Address + ByteOffset (positive or negative)
impl Add<ByteOffset> for Address {
    type Output = Address;
    fn add(self, offset: ByteOffset) -> Address {
        Address((self.0 as isize + offset) as usize)
    }
}

/// Address - ByteSize (positive)
impl Sub<ByteSize> for Address {
    type Output = Address;
    fn sub(self, offset: ByteSize) -> Address {
        Address(self.0 - offset)
    }
}

/// Address - Address (the first address must be higher)
impl Sub<Address> for Address {
    type Output = ByteSize;
    fn sub(self, other: Address) -> ByteSize {
        debug_assert!(
            self.0 >= other.0,
            "for (addr_a - addr_b), a({}) needs to be larger than b({})",
            self,
            other
        );
        self.0 - other.0
    }
}

impl Address {
    /// The null address.
    pub const ZERO: Self = Address(0);

    /// creates an arbitrary Address. Addresses are opaque tokens in this
    /// model; an invalid one is caught on first dereference.
    pub const fn from_usize(raw: usize) -> Address {
        Address(raw)
    }

    /// builds the address of byte `offset` within segment `segment`
    pub const fn from_parts(segment: usize, offset: usize) -> Address {
        Address((segment << LOG_SEGMENT_BYTES) | offset)
    }

    /// the segment this address falls in
    pub const fn segment_index(self) -> usize {
        self.0 >> LOG_SEGMENT_BYTES
    }

    /// the byte offset of this address within its segment
    pub const fn segment_offset(self) -> usize {
        self.0 & SEGMENT_OFFSET_MASK
    }

    /// the word offset of this address within its segment
    pub const fn word_index(self) -> usize {
        use crate::util::constants::LOG_BYTES_IN_WORD;
        self.segment_offset() >> LOG_BYTES_IN_WORD
    }

    /// Add an offset to the address. The const fn version of the `Add`
    /// trait, usable to declare constants.
    #[allow(clippy::should_implement_trait)]
    pub const fn add(self, size: usize) -> Address {
        Address(self.0 + size)
    }

    /// Subtract an offset from the address. The const fn version of the
    /// `Sub` trait, usable to declare constants.
    #[allow(clippy::should_implement_trait)]
    pub const fn sub(self, size: usize) -> Address {
        Address(self.0 - size)
    }

    /// is this address zero?
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// aligns up the address to the given alignment
    pub const fn align_up(self, align: ByteSize) -> Address {
        use crate::util::conversions;
        Address(conversions::raw_align_up(self.0, align))
    }

    /// aligns down the address to the given alignment
    pub const fn align_down(self, align: ByteSize) -> Address {
        use crate::util::conversions;
        Address(conversions::raw_align_down(self.0, align))
    }

    /// is this address aligned to the given alignment
    pub const fn is_aligned_to(self, align: usize) -> bool {
        use crate::util::conversions;
        conversions::raw_is_aligned(self.0, align)
    }

    /// converts the Address to a pointer-sized integer
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

/// allows print Address as upper-case hex value
impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

/// allows print Address as lower-case hex value
impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// allows Display format the Address (as hex value with 0x prefix)
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// allows Debug format the Address (as hex value with 0x prefix)
impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// ObjectReference represents the address of an object header. Compared with
/// Address, operations allowed on ObjectReference are very limited: no
/// address arithmetic, so collector code cannot accidentally manufacture an
/// interior pointer and treat it as an object.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, NoUninit)]
pub struct ObjectReference(usize);

impl ObjectReference {
    /// The null object reference, represented as zero.
    pub const NULL: ObjectReference = ObjectReference(0);

    /// Cast the object reference to its raw address.
    pub const fn to_raw_address(self) -> Address {
        Address(self.0)
    }

    /// Cast a raw address to an object reference. The address must be the
    /// address of an object header (or null).
    pub const fn from_raw_address(addr: Address) -> ObjectReference {
        ObjectReference(addr.0)
    }

    /// is this object reference null?
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
