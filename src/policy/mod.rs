//! The spaces objects live in.

pub mod nursery;
pub mod oldspace;
