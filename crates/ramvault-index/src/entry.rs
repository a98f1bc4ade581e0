//! Packed hash index entry.
//!
//! One entry is a single 64-bit word:
//!
//! ```text
//! 63            48 47      46                    0
//! +---------------+-------+----------------------+
//! | hash fragment | chain |       pointer        |
//! |    16 bits    | 1 bit |       47 bits        |
//! +---------------+-------+----------------------+
//! ```
//!
//! With `chain == 0` the pointer addresses a log record and the fragment
//! is the low 16 bits of the key hash; with `chain == 1` the fragment is
//! zero and the pointer addresses the next overflow line. The all-zero
//! word means the entry is unused.

use ramvault_common::LogPtr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

const PTR_MASK: u64 = (1 << LogPtr::WIDTH) - 1;
const CHAIN_BIT: u64 = 1 << LogPtr::WIDTH;
const HASH_SHIFT: u32 = 48;

/// Errors raised by index mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    /// A pointer had set bits above bit 46. Treated as a fatal invariant
    /// violation by callers.
    #[error("pointer does not fit in 47 bits: {0:#x}")]
    PointerTooWide(u64),

    /// `replace` found no entry matching the record's key.
    #[error("no index entry matches the record's key")]
    NotPresent,
}

/// The three fields of an entry, unpacked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnpackedEntry {
    pub hash: u16,
    pub chain: bool,
    pub ptr: u64,
}

/// Pack the three entry fields into one word. `ptr` must be within the
/// legal 47-bit domain.
#[must_use]
pub fn pack(hash: u16, chain: bool, ptr: u64) -> u64 {
    debug_assert_eq!(ptr & !PTR_MASK, 0, "pointer exceeds 47 bits");
    (u64::from(hash) << HASH_SHIFT) | (u64::from(chain) << LogPtr::WIDTH) | (ptr & PTR_MASK)
}

/// Unpack an entry word into its fields. Inverse of [`pack`] on the legal
/// domain.
#[must_use]
pub fn unpack(word: u64) -> UnpackedEntry {
    UnpackedEntry {
        hash: (word >> HASH_SHIFT) as u16,
        chain: word & CHAIN_BIT != 0,
        ptr: word & PTR_MASK,
    }
}

/// One slot of a cache-line bucket.
///
/// Stored as an atomic so that lookups running concurrently with each
/// other (and with at most one serialized mutator) always read a whole
/// entry. The index itself is not internally synchronized; callers must
/// serialize mutators.
#[repr(transparent)]
#[derive(Debug, Default)]
pub struct Entry(AtomicU64);

impl Entry {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    #[inline]
    pub(crate) fn load_raw(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn store_raw(&self, word: u64) {
        self.0.store(word, Ordering::Release);
    }

    /// Reset the entry to unused.
    pub fn clear(&self) {
        self.store_raw(0);
    }

    /// Point this entry at a log record.
    pub fn set_log_pointer(&self, hash: u16, ptr: u64) -> Result<(), IndexError> {
        if ptr & !PTR_MASK != 0 {
            return Err(IndexError::PointerTooWide(ptr));
        }
        self.store_raw(pack(hash, false, ptr));
        Ok(())
    }

    /// Point this entry at the next overflow line.
    pub fn set_chain_pointer(&self, ptr: u64) -> Result<(), IndexError> {
        if ptr & !PTR_MASK != 0 {
            return Err(IndexError::PointerTooWide(ptr));
        }
        self.store_raw(pack(0, true, ptr));
        Ok(())
    }

    /// Whether the entry is unused.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.load_raw() == 0
    }

    /// Whether the entry links to an overflow line.
    #[must_use]
    pub fn is_chain_link(&self) -> bool {
        self.load_raw() & CHAIN_BIT != 0
    }

    /// Whether this is a log entry whose hash fragment equals `hash`.
    /// Unused and chain entries never match.
    #[must_use]
    pub fn hash_matches(&self, hash: u16) -> bool {
        let word = self.load_raw();
        word != 0 && word & CHAIN_BIT == 0 && (word >> HASH_SHIFT) as u16 == hash
    }

    /// The log pointer stored in this entry, if it holds one.
    #[must_use]
    pub fn log_pointer(&self) -> Option<LogPtr> {
        let word = self.load_raw();
        if word & CHAIN_BIT != 0 {
            return None;
        }
        LogPtr::new(word & PTR_MASK)
    }

    /// The raw overflow pointer stored in this entry, if it is a chain
    /// link.
    #[must_use]
    pub fn chain_pointer(&self) -> Option<u64> {
        let word = self.load_raw();
        if word & CHAIN_BIT != 0 {
            Some(word & PTR_MASK)
        } else {
            None
        }
    }

    /// The entry's unpacked fields.
    #[must_use]
    pub fn unpack(&self) -> UnpackedEntry {
        unpack(self.load_raw())
    }
}

const _: () = assert!(std::mem::size_of::<Entry>() == 8);
