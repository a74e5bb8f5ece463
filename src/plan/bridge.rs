//! The foreign-refcount bridge.
//!
//! Some heap objects have a reference-counted proxy on the foreign side of
//! the runtime. Each pairing records the proxy's refcount at registration
//! time as its "owned-by-heap" baseline: while the current count differs
//! from the baseline somebody external holds a reference and the heap
//! object must stay alive even if nothing in the heap points at it. When
//! the object is collected its handle goes on a release queue, flushed to
//! [`Runtime::release_foreign`] only after the collection phase completes,
//! so foreign code never observes the count reach zero without the
//! deallocation callback firing.

use crate::gc::Gc;
use crate::util::object_forwarding;
use crate::util::ObjectReference;
use crate::vm::object_model;
use crate::vm::{ForeignHandle, Runtime};

pub(crate) struct ForeignEntry {
    pub(crate) object: ObjectReference,
    pub(crate) handle: ForeignHandle,
    /// The proxy refcount that means "no external owner".
    pub(crate) baseline: usize,
}

#[derive(Default)]
pub(crate) struct ForeignBridge {
    pub(crate) young: Vec<ForeignEntry>,
    pub(crate) old: Vec<ForeignEntry>,
    pub(crate) release_queue: Vec<ForeignHandle>,
}

impl<R: Runtime> Gc<R> {
    /// Pairs `object` with a foreign proxy. The proxy's current refcount
    /// becomes the baseline meaning "owned by the heap alone".
    pub fn register_foreign(&mut self, rt: &mut R, object: ObjectReference, handle: ForeignHandle) {
        let baseline = rt.foreign_refcount(handle);
        let entry = ForeignEntry {
            object,
            handle,
            baseline,
        };
        if self.is_young(object) {
            self.bridge.young.push(entry);
        } else {
            self.bridge.old.push(entry);
        }
    }

    /// Minor-collection epilogue for the young bridge list: externally
    /// owned entries force their object to survive, surviving entries
    /// follow their object to its new address and list, dead entries
    /// queue their handle for release.
    pub(crate) fn process_young_bridge(&mut self, rt: &mut R) {
        let entries = std::mem::take(&mut self.bridge.young);
        for mut entry in entries {
            let externally_owned = rt.foreign_refcount(entry.handle) != entry.baseline;
            let mut survivor = self.bridge_survivor(entry.object);
            if survivor.is_none() && externally_owned {
                // keep the object alive for its external owner
                self.current_owner = None;
                self.trace_young(entry.object);
                self.drain_minor_queue();
                survivor = self.bridge_survivor(entry.object);
            }
            match survivor {
                Some(new) => {
                    entry.object = new;
                    if self.nursery.contains(new.to_raw_address()) {
                        self.bridge.young.push(entry);
                    } else {
                        self.bridge.old.push(entry);
                    }
                }
                None => {
                    trace!("bridge object {} died", entry.object);
                    self.bridge.release_queue.push(entry.handle);
                }
            }
        }
    }

    /// Where a young bridge object survived to, `None` if it died.
    fn bridge_survivor(&self, object: ObjectReference) -> Option<ObjectReference> {
        if self.nursery.contains(object.to_raw_address())
            && object_forwarding::is_forwarded(&self.mem, object)
        {
            return Some(object_forwarding::forwarding_address(&self.mem, object));
        }
        if object_model::flags(&self.mem, object).survived_minor() {
            Some(object)
        } else {
            None
        }
    }

    /// Major-collection reaping of the old bridge list, run when marking
    /// completes. Externally owned entries were grayed at scan time, so
    /// an unmarked object here is truly dead.
    pub(crate) fn reap_old_bridge(&mut self) {
        let entries = std::mem::take(&mut self.bridge.old);
        for entry in entries {
            if object_model::flags(&self.mem, entry.object).visited() {
                self.bridge.old.push(entry);
            } else {
                trace!("bridge object {} died", entry.object);
                self.bridge.release_queue.push(entry.handle);
            }
        }
    }

    /// Hands queued handles to the runtime. Called after a minor
    /// collection finishes and after each major cycle completes, never
    /// from inside a collection phase.
    pub(crate) fn flush_foreign_releases(&mut self, rt: &mut R) {
        for handle in std::mem::take(&mut self.bridge.release_queue) {
            rt.release_foreign(handle);
        }
    }
}
