//! Bookkeeping for objects carrying a weak-reference field.
//!
//! A weak field is never traced. When its target dies the collector stores
//! null into the field; the owning object otherwise behaves like any other
//! object. Lists are split by generation like the finalizer lists.

use crate::util::ObjectReference;

#[derive(Default)]
pub struct ReferenceProcessor {
    /// Weak-field owners still in the nursery.
    pub(crate) young: Vec<ObjectReference>,
    /// Weak-field owners in the old generation.
    pub(crate) old: Vec<ObjectReference>,
}

impl ReferenceProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, object: ObjectReference, young: bool) {
        if young {
            self.young.push(object);
        } else {
            self.old.push(object);
        }
    }
}
