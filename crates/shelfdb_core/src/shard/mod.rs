//! Range sharding.
//!
//! A sharded table spreads its rows over many [`RowStore`](crate::RowStore)s,
//! each owning a fixed-width interval of integer row keys. Point operations
//! go to the one owning shard; predicate operations are dissected into an
//! interval set over the key and fan out to every known shard it touches,
//! in ascending key order.

mod cursor;
mod provider;
mod router;

pub use cursor::{CompositeCursor, EmptyCursor};
pub use provider::IntervalProvider;
pub use router::ShardRouter;
