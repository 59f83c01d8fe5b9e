//! Stream scheduling of a (fused) graph.
//!
//! Calls are grouped into levels of ready kernels. Level `k` is spread over
//! streams one kernel per stream, and every stream waits on barrier `k`
//! before its level-`k` kernel. Barriers that protect no cross-stream
//! producer/consumer pair are then dropped.

mod leveler;
mod sync;

pub use leveler::{StreamEntry, StreamLeveler, StreamSchedule};
pub use sync::{remove_independent_barriers, remove_single_stream_barriers};
