//! Compiled queries: predicates, updates and index descriptions.
//!
//! Predicates and updates arrive already compiled; this module only
//! evaluates them.

mod index;
mod predicate;
mod update;

pub use index::{IndexSpec, IndexValue};
pub use predicate::{Predicate, Resolved, Selector};
pub use update::{DocumentUpdate, Update};
