//! The hash index proper.

use crate::bucket::{CacheLine, ENTRIES_PER_CACHE_LINE};
use crate::entry::IndexError;
use crate::hash::key_hash;
use crate::perf::PerfDistribution;
use ramvault_common::{KeySource, LogPtr, ObjectId, TableId};
use std::time::Instant;

/// Identifies one cache line during a walk: a primary bucket or an
/// overflow line in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Line {
    Primary(usize),
    Overflow(usize),
}

/// Open-addressed hash index with chained cache-line buckets.
///
/// Maps `(table_id, object_id)` to a [`LogPtr`]. The index stores only a
/// 16-bit fragment of the key hash per entry; candidates are confirmed by
/// dereferencing through the caller-supplied [`KeySource`].
///
/// Not internally synchronized: callers must serialize mutators. Lookups
/// may run in parallel with other lookups; every entry is read and written
/// as a single aligned 64-bit word.
pub struct HashIndex {
    buckets: Box<[CacheLine]>,
    /// Overflow lines, allocated on first chain and never freed while the
    /// index lives. Chain pointers store `arena index + 1` so that zero
    /// stays unused.
    overflow: Vec<CacheLine>,
    bucket_mask: u64,
    lookup_latency: PerfDistribution,
}

impl HashIndex {
    /// Create an index able to hold roughly `capacity` entries before
    /// chaining. The bucket count is `capacity / 8` rounded up to a power
    /// of two.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let num_buckets = (capacity / ENTRIES_PER_CACHE_LINE)
            .next_power_of_two()
            .max(1);
        let mut buckets = Vec::with_capacity(num_buckets);
        buckets.resize_with(num_buckets, CacheLine::new);
        Self {
            buckets: buckets.into_boxed_slice(),
            overflow: Vec::new(),
            bucket_mask: num_buckets as u64 - 1,
            lookup_latency: PerfDistribution::new(),
        }
    }

    /// Number of primary buckets.
    #[must_use]
    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Lookup-latency histogram, one sample per `lookup` call.
    #[must_use]
    pub fn lookup_latency(&self) -> &PerfDistribution {
        &self.lookup_latency
    }

    fn line(&self, line: Line) -> &CacheLine {
        match line {
            Line::Primary(i) => &self.buckets[i],
            Line::Overflow(i) => &self.overflow[i],
        }
    }

    fn primary_line(&self, hash: u64) -> Line {
        Line::Primary(((hash >> 16) & self.bucket_mask) as usize)
    }

    fn next_line(&self, line: Line) -> Option<Line> {
        self.line(line)
            .last()
            .chain_pointer()
            .map(|raw| Line::Overflow(raw as usize - 1))
    }

    /// Find the pointer stored for a key.
    pub fn lookup<K: KeySource>(
        &self,
        keys: &K,
        table_id: TableId,
        object_id: ObjectId,
    ) -> Option<LogPtr> {
        let started = Instant::now();
        let hash = key_hash(table_id, object_id);
        let fragment = (hash & 0xffff) as u16;
        let mut line = self.primary_line(hash);
        let result = 'walk: loop {
            let cl = self.line(line);
            for entry in &cl.entries {
                if entry.hash_matches(fragment) {
                    if let Some(ptr) = entry.log_pointer() {
                        if keys.key_at(ptr) == Some((table_id, object_id)) {
                            break 'walk Some(ptr);
                        }
                    }
                }
            }
            match self.next_line(line) {
                Some(next) => line = next,
                None => break None,
            }
        };
        self.lookup_latency
            .store_sample(started.elapsed().as_nanos() as u64);
        result
    }

    /// Insert a pointer for a key. The caller is responsible for first
    /// removing or replacing any existing entry for the same key.
    pub fn insert(
        &mut self,
        table_id: TableId,
        object_id: ObjectId,
        ptr: LogPtr,
    ) -> Result<(), IndexError> {
        let hash = key_hash(table_id, object_id);
        let fragment = (hash & 0xffff) as u16;
        let mut line = self.primary_line(hash);
        loop {
            let cl = self.line(line);
            for entry in &cl.entries {
                if entry.is_available() {
                    return entry.set_log_pointer(fragment, ptr.offset());
                }
            }
            match self.next_line(line) {
                Some(next) => line = next,
                None => break,
            }
        }

        // Every slot on the walk is occupied, including the tail's last
        // slot. Allocate a fresh overflow line, displace the tail's last
        // entry into its slot 0 and turn that slot into the chain link, so
        // every non-chain entry stays reachable.
        let tail = line;
        let new_index = self.overflow.len();
        self.overflow.push(CacheLine::new());
        let new_line = &self.overflow[new_index];
        let displaced = self.line(tail).last().load_raw();
        new_line.entries[0].store_raw(displaced);
        new_line.entries[1].set_log_pointer(fragment, ptr.offset())?;
        self.line(tail)
            .last()
            .set_chain_pointer(new_index as u64 + 1)?;
        Ok(())
    }

    /// Atomically repoint the entry for the key of the record at `ptr`.
    /// Returns the pointer the entry previously held, or
    /// [`IndexError::NotPresent`] if no entry matches.
    pub fn replace<K: KeySource>(&mut self, keys: &K, ptr: LogPtr) -> Result<LogPtr, IndexError> {
        let (table_id, object_id) = keys.key_at(ptr).ok_or(IndexError::NotPresent)?;
        let hash = key_hash(table_id, object_id);
        let fragment = (hash & 0xffff) as u16;
        let mut line = self.primary_line(hash);
        loop {
            let cl = self.line(line);
            for entry in &cl.entries {
                if entry.hash_matches(fragment) {
                    if let Some(old) = entry.log_pointer() {
                        if keys.key_at(old) == Some((table_id, object_id)) {
                            entry.set_log_pointer(fragment, ptr.offset())?;
                            return Ok(old);
                        }
                    }
                }
            }
            match self.next_line(line) {
                Some(next) => line = next,
                None => return Err(IndexError::NotPresent),
            }
        }
    }

    /// Remove the entry for a key. Returns whether an entry was removed.
    /// Chains are not compacted.
    pub fn remove<K: KeySource>(
        &mut self,
        keys: &K,
        table_id: TableId,
        object_id: ObjectId,
    ) -> bool {
        let hash = key_hash(table_id, object_id);
        let fragment = (hash & 0xffff) as u16;
        let mut line = self.primary_line(hash);
        loop {
            let cl = self.line(line);
            for entry in &cl.entries {
                if entry.hash_matches(fragment) {
                    if let Some(ptr) = entry.log_pointer() {
                        if keys.key_at(ptr) == Some((table_id, object_id)) {
                            entry.clear();
                            return true;
                        }
                    }
                }
            }
            match self.next_line(line) {
                Some(next) => line = next,
                None => return false,
            }
        }
    }

    /// Visit every non-empty, non-chain entry.
    pub fn for_each(&self, mut visitor: impl FnMut(LogPtr)) {
        for i in 0..self.buckets.len() {
            let mut line = Line::Primary(i);
            loop {
                let cl = self.line(line);
                for entry in &cl.entries {
                    if let Some(ptr) = entry.log_pointer() {
                        visitor(ptr);
                    }
                }
                match self.next_line(line) {
                    Some(next) => line = next,
                    None => break,
                }
            }
        }
    }
}
