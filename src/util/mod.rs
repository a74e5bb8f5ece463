//! Utilities used across the crate.

/// The segmented address and object reference types.
pub mod address;
/// Word- and heap-layout constants.
pub mod constants;
/// Alignment and unit conversions.
pub mod conversions;
/// Finalizer candidate lists.
pub(crate) mod finalizable_processor;
/// An optional env_logger backend.
pub mod logger;
/// The segmented heap backing store.
pub mod memory;
/// Forwarding words for moved objects.
pub(crate) mod object_forwarding;
/// Collector tuning knobs.
pub mod options;
/// Weak-reference owner lists.
pub(crate) mod reference_processor;
/// Helpers shared by unit tests.
#[cfg(test)]
pub mod test_util;

pub use self::address::{Address, ByteOffset, ByteSize, ObjectReference};
