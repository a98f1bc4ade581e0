//! Log-structured object memory.
//!
//! Object and tombstone records live in an append-only in-memory arena;
//! the hash index holds offsets into it. The same records travel to
//! backups inside fixed-size segments whose frames carry a crc32c, and
//! come back during crash recovery through [`segment::SegmentReader`].

mod log;
mod record;
mod segment;

pub use log::{Log, LogEntry};
pub use record::{LogEntryType, LogError, ObjectRecord, TombstoneRecord};
pub use segment::{SegmentBuilder, SegmentReader, SegmentRecord};
