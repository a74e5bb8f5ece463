//! Forwarding words for objects moved by a minor collection.
//!
//! A promoted object leaves a broken heart behind: its type word becomes
//! [`FORWARDED_TAG`] and the first flag word holds the new address. The old
//! copy stays readable until the nursery is reset, so late tracers can
//! still resolve it.

use crate::util::constants::{BYTES_IN_WORD, FORWARDED_TAG};
use crate::util::memory::Memory;
use crate::util::{Address, ObjectReference};

pub fn is_forwarded(mem: &Memory, object: ObjectReference) -> bool {
    mem.load(object.to_raw_address()) == FORWARDED_TAG
}

/// Where a forwarded object moved to.
pub fn forwarding_address(mem: &Memory, object: ObjectReference) -> ObjectReference {
    debug_assert!(is_forwarded(mem, object));
    let raw = mem.load(object.to_raw_address() + BYTES_IN_WORD);
    ObjectReference::from_raw_address(Address::from_usize(raw))
}

/// Stamps the forwarding word over `object`'s header. The payload must
/// already have been copied to `to`.
pub fn forward(mem: &mut Memory, object: ObjectReference, to: ObjectReference) {
    debug_assert!(!is_forwarded(mem, object));
    debug_assert_ne!(object, to);
    let addr = object.to_raw_address();
    mem.store(addr, FORWARDED_TAG);
    mem.store(addr + BYTES_IN_WORD, to.to_raw_address().as_usize());
}
