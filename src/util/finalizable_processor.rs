//! Bookkeeping for objects with registered finalizers.
//!
//! Candidates are split by generation so a minor collection only touches
//! the young list. The major collector moves unreachable candidates onto
//! the run queue in finalization order; queued entries are handed to
//! [`Runtime::run_finalizer`](crate::vm::Runtime::run_finalizer) once the
//! cycle completes.

use crate::util::ObjectReference;

#[derive(Default)]
pub struct FinalizableProcessor {
    /// Candidates still in the nursery, paired with their queue index.
    pub(crate) young: Vec<(ObjectReference, usize)>,
    /// Candidates in the old generation.
    pub(crate) old: Vec<(ObjectReference, usize)>,
    /// Unreachable candidates whose finalizer is due, in run order.
    pub(crate) run_queue: Vec<(ObjectReference, usize)>,
}

impl FinalizableProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, object: ObjectReference, queue: usize, young: bool) {
        if young {
            self.young.push((object, queue));
        } else {
            self.old.push((object, queue));
        }
    }
}
