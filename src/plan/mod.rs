//! The collectors: write barrier, minor, incremental major, and the
//! foreign-refcount bridge.

pub(crate) mod barriers;
pub(crate) mod bridge;
pub(crate) mod major;
pub(crate) mod minor;

pub use major::GcPhase;
