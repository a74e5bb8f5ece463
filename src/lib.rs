//! Minigen is an incremental generational garbage collector for
//! translated runtimes.
//!
//! Objects are born in a bump-pointer nursery and promoted on survival
//! into a size-classed old space. Old-to-young pointers are tracked with
//! a coarse object-remembering write barrier, refined with card marking
//! for large pointer arrays. Major collections are incremental: an
//! explicit state machine marks and sweeps the old space in bounded
//! steps interleaved with mutator progress, so no single pause scans the
//! whole heap. On top of the core cycle sit pinning, identity tokens
//! stable across moves, ordered finalization, weak references, and a
//! bridge for objects paired with reference-counted foreign proxies.
//!
//! A runtime embeds the collector by implementing [`vm::Runtime`]
//! (root enumeration, finalizer and destructor callbacks, the foreign
//! refcount hooks), registering its object layouts in a
//! [`vm::object_model::TypeRegistry`], and driving everything through
//! the functions in [`memory_manager`]:
//!
//! ```ignore
//! let mut builder = GcBuilder::new();
//! builder.register_type(node_descriptor());
//! let mut gc = memory_manager::gc_init::<MyRuntime>(builder);
//! let obj = memory_manager::allocate_fixed(&mut gc, &mut rt, NODE, 16)?;
//! memory_manager::store_ref_field(&mut gc, obj, 0, other);
//! ```
//!
//! The heap is plain allocated memory, not raw pages: addresses are
//! indices into segments owned by the collector, and every access goes
//! through [`util::memory::Memory`]. Behavior is tuned through
//! [`util::options::Options`], from the environment (`MINIGEN_*`) or
//! programmatically through the builder.

#[macro_use]
extern crate log;
#[macro_use]
extern crate static_assertions;

mod gc;
pub mod memory_manager;
pub mod plan;
pub mod policy;
pub mod util;
pub mod vm;

pub use crate::gc::{AllocationError, Gc, GcBuilder, GcStats, Generation};
pub use crate::plan::GcPhase;
