//! Lookup-latency histogram.

use std::sync::atomic::{AtomicU64, Ordering};

/// Width of one histogram bin in nanoseconds.
pub const BIN_WIDTH: u64 = 10;

/// Number of histogram bins.
pub const NBINS: usize = 5000;

/// Fixed-width latency histogram with overflow counter and min/max
/// tracking. Counters are atomics so the read path can record samples
/// through a shared reference.
pub struct PerfDistribution {
    bins: Box<[AtomicU64]>,
    bin_overflows: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl PerfDistribution {
    #[must_use]
    pub fn new() -> Self {
        let mut bins = Vec::with_capacity(NBINS);
        bins.resize_with(NBINS, AtomicU64::default);
        Self {
            bins: bins.into_boxed_slice(),
            bin_overflows: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }

    /// Record one sample.
    pub fn store_sample(&self, sample: u64) {
        let bin = (sample / BIN_WIDTH) as usize;
        if bin >= NBINS {
            self.bin_overflows.fetch_add(1, Ordering::Relaxed);
        } else {
            self.bins[bin].fetch_add(1, Ordering::Relaxed);
        }
        self.min.fetch_min(sample, Ordering::Relaxed);
        self.max.fetch_max(sample, Ordering::Relaxed);
    }

    /// Count in bin `i`.
    #[must_use]
    pub fn bin(&self, i: usize) -> u64 {
        self.bins[i].load(Ordering::Relaxed)
    }

    /// Samples that fell beyond the last bin.
    #[must_use]
    pub fn bin_overflows(&self) -> u64 {
        self.bin_overflows.load(Ordering::Relaxed)
    }

    /// Smallest sample seen; `u64::MAX` before the first sample.
    #[must_use]
    pub fn min(&self) -> u64 {
        self.min.load(Ordering::Relaxed)
    }

    /// Largest sample seen; zero before the first sample.
    #[must_use]
    pub fn max(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }
}

impl Default for PerfDistribution {
    fn default() -> Self {
        Self::new()
    }
}
