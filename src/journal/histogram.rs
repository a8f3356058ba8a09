use std::{collections::BTreeMap, time::Duration};

/// Maps a measured duration onto a bin key.
pub type BinReducer = fn(Duration) -> u64;

/// Bins by the power of two at or above the duration in milliseconds:
/// 0, 1, 2, 4, 8 ... Sub-millisecond durations land in bin 0.
pub fn log2_millis(d: Duration) -> u64 {
    let ms = d.as_millis().min(u64::MAX as u128) as u64;
    if ms == 0 { 0 } else { ms.next_power_of_two() }
}

// -----------------------------------------------------------------------------
// ----- Histogram -------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Histogram {
    reducer: BinReducer,
    bins: BTreeMap<u64, u64>,
    count: u64,
    total: Duration,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new(log2_millis)
    }
}

impl Histogram {
    pub fn new(reducer: BinReducer) -> Self {
        Self {
            reducer,
            bins: BTreeMap::new(),
            count: 0,
            total: Duration::ZERO,
        }
    }

    pub fn record(&mut self, d: Duration) {
        *self.bins.entry((self.reducer)(d)).or_insert(0) += 1;
        self.count += 1;
        self.total = self.total.saturating_add(d);
    }

    /// `(bin, hits)` pairs in ascending bin order.
    pub fn bins(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.bins.iter().map(|(bin, hits)| (*bin, *hits))
    }

    pub fn hits(&self, bin: u64) -> u64 {
        self.bins.get(&bin).copied().unwrap_or(0)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn mean(&self) -> Option<Duration> {
        if self.count == 0 {
            return None;
        }
        let nanos = self.total.as_nanos() / self.count as u128;
        Some(Duration::from_nanos(nanos.min(u64::MAX as u128) as u64))
    }

    /// Fold `other` into this histogram. Bins are merged key by key, so
    /// both sides should share a reducer.
    pub fn merge(&mut self, other: &Histogram) {
        for (bin, hits) in other.bins() {
            *self.bins.entry(bin).or_insert(0) += hits;
        }
        self.count += other.count;
        self.total = self.total.saturating_add(other.total);
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
