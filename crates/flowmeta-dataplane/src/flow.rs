//! Fixed-Capacity Flow Count Table
//!
//! One signed counter per bucket, indexed by the sum of the raw source and
//! destination address words modulo the table size.
//!
//! # Design
//!
//! - No per-flow keys are stored, so two flows whose address sums agree
//!   modulo the capacity share a bucket
//! - No eviction; the only way to clear a bucket is a global reset
//! - Single writer, owned by the engine and passed down by reference

use crate::MAX_FLOW;

/// Approximate per-flow packet counters
#[derive(Debug, Clone)]
pub struct FlowCountTable {
    counts: Box<[i64; MAX_FLOW]>,
}

impl FlowCountTable {
    /// Create a zeroed table
    pub fn new() -> Self {
        Self {
            counts: Box::new([0; MAX_FLOW]),
        }
    }

    /// Bucket index for an address pair.
    ///
    /// The sum wraps at 32 bits before the modulo.
    #[inline(always)]
    pub fn bucket_for(src_addr: u32, dst_addr: u32) -> usize {
        (src_addr.wrapping_add(dst_addr) as usize) % MAX_FLOW
    }

    /// Count one packet for the address pair, returning its bucket
    #[inline(always)]
    pub fn record(&mut self, src_addr: u32, dst_addr: u32) -> usize {
        let bucket = Self::bucket_for(src_addr, dst_addr);
        self.counts[bucket] += 1;
        bucket
    }

    /// Counter value of a bucket (0 when out of range)
    pub fn count(&self, bucket: usize) -> i64 {
        self.counts.get(bucket).copied().unwrap_or(0)
    }

    /// Number of buckets with a nonzero count
    pub fn count_active_flows(&self) -> usize {
        self.counts.iter().filter(|&&c| c != 0).count()
    }

    /// Zero every bucket
    pub fn reset_counts(&mut self) {
        self.counts.fill(0);
    }

    /// Sum of all counters
    pub fn total(&self) -> i64 {
        self.counts.iter().sum()
    }

    /// Number of buckets
    pub const fn capacity(&self) -> usize {
        MAX_FLOW
    }

    /// Iterate `(bucket, count)` over nonzero buckets in index order
    pub fn active_buckets(&self) -> impl Iterator<Item = (usize, i64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, &c)| c != 0)
            .map(|(i, &c)| (i, c))
    }

    /// The `n` highest buckets, largest first; ties keep index order
    pub fn busiest(&self, n: usize) -> Vec<(usize, i64)> {
        let mut active: Vec<_> = self.active_buckets().collect();
        active.sort_by(|a, b| b.1.cmp(&a.1));
        active.truncate(n);
        active
    }
}

impl Default for FlowCountTable {
    fn default() -> Self {
        Self::new()
    }
}
