//! Cache-line-packed hash index.
//!
//! Maps `(table_id, object_id)` keys to pointers into the log. Buckets are
//! exactly one cache line wide (eight 64-bit entries); collisions beyond a
//! line chain into overflow lines through a tagged pointer in the last
//! slot. Each entry is a single naturally-aligned 64-bit word, so readers
//! never observe torn entries.

mod bucket;
mod entry;
mod hash;
mod index;
mod perf;

pub use bucket::{CacheLine, ENTRIES_PER_CACHE_LINE};
pub use entry::{pack, unpack, Entry, IndexError, UnpackedEntry};
pub use hash::key_hash;
pub use index::HashIndex;
pub use perf::{PerfDistribution, BIN_WIDTH, NBINS};
