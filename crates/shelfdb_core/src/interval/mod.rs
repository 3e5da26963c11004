//! Interval algebra.
//!
//! [`Interval`] is a single range with independently inclusive bounds;
//! [`IntervalSet`] is a canonical union of intervals supporting union and
//! intersection. [`dissect`] lowers a predicate to the set of index values
//! it can match, which the shard router uses to pick shards.

mod dissect;
mod range;
mod set;

pub use dissect::dissect;
pub use range::Interval;
pub use set::IntervalSet;
