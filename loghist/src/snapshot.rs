//! Frozen histogram copies and the rank/quantile queries over them.

use std::sync::atomic::Ordering;

use crate::histogram::{Bucket, Histogram};
use crate::key::{Layout, BINS};

/// A point-in-time copy of a [`Histogram`].
///
/// A snapshot owns a flat copy of every counter that existed when it was
/// taken, along with a per-group total and the overall population, which is
/// what the rank and quantile queries need. Snapshots are immutable and
/// independent of the histogram they came from: the histogram can keep
/// taking writes, or be dropped outright, without affecting the snapshot.
///
/// Taking a snapshot while writers are active is safe. Writes that land
/// after the capture -- and bucket groups allocated after it -- are simply
/// not included, so a snapshot's population is a lower bound on the writes
/// in flight at the time. Within the snapshot, each group's total always
/// equals the sum of its copied counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    layout: Layout,
    /// Bitmap of the bucket groups that existed at capture time.
    binmap: u64,
    population: u64,
    /// One total per captured group, packed in group order.
    totals: Box<[u64]>,
    /// The counter copies, `mantissas` per captured group, packed.
    counts: Box<[u64]>,
}

impl Snapshot {
    pub(crate) fn capture(histogram: &Histogram) -> Snapshot {
        let layout = histogram.layout;

        // Capture which bucket groups exist, once, up front. Groups that
        // appear after this scan are left out of the snapshot entirely;
        // re-loading the pointers later could observe a group whose counters
        // this snapshot never accounted for.
        let mut binmap = 0u64;
        let mut captured = Vec::with_capacity(BINS);
        for bin in 0..layout.exponents() {
            if let Some(counters) = histogram.bins.get(bin) {
                binmap |= 1 << bin;
                captured.push(counters);
            }
        }

        let mut counts = Vec::with_capacity(captured.len() * layout.mantissas());
        let mut totals = Vec::with_capacity(captured.len());
        let mut population = 0u64;
        for counters in captured {
            let mut total = 0u64;
            for counter in counters {
                let count = counter.load(Ordering::Relaxed);
                total += count;
                counts.push(count);
            }
            totals.push(total);
            population += total;
        }

        Snapshot {
            layout,
            binmap,
            population,
            totals: totals.into_boxed_slice(),
            counts: counts.into_boxed_slice(),
        }
    }

    /// The `sigbits` setting of the histogram this snapshot was taken from.
    pub fn sigbits(&self) -> u32 {
        self.layout.sigbits()
    }

    /// Total number of samples captured in this snapshot.
    pub fn population(&self) -> u64 {
        self.population
    }

    /// Looks up the bucket for `key`, or `None` if the key is out of range.
    pub fn get(&self, key: usize) -> Option<Bucket> {
        if key >= self.layout.keys() {
            return None;
        }

        let count = self
            .bin_counts(self.layout.bin_of_key(key))
            .map_or(0, |counts| counts[self.layout.slot_of_key(key)]);

        Some(Bucket {
            key,
            min: self.layout.key_to_min(key),
            max: self.layout.key_to_max(key),
            count,
        })
    }

    /// Iterates the snapshot's buckets in key order, skipping bucket groups
    /// that were never allocated.
    pub fn iter(&self) -> SnapshotBuckets<'_> {
        SnapshotBuckets { snapshot: self, key: 0 }
    }

    /// The approximate value at `rank` in the captured data, interpolated
    /// within its bucket.
    ///
    /// Returns `None` when `rank >= population()`, which includes every rank
    /// on an empty snapshot.
    pub fn value_at_rank(&self, rank: u64) -> Option<u64> {
        if rank >= self.population {
            return None;
        }

        let mut rank = rank;
        let mut bin = 0;
        let counts = loop {
            if bin >= self.layout.exponents() {
                return None;
            }
            let total = self.bin_total(bin);
            if rank < total {
                break self.bin_counts(bin).expect("a bin with a nonzero total was captured");
            }
            rank -= total;
            bin += 1;
        };

        let mut slot = 0;
        let count = loop {
            if slot >= counts.len() {
                return None;
            }
            if rank < counts[slot] {
                break counts[slot];
            }
            rank -= counts[slot];
            slot += 1;
        };

        let key = bin * self.layout.mantissas() + slot;
        let min = self.layout.key_to_min(key);
        let max = self.layout.key_to_max(key);
        Some(min + interpolate(max - min, rank, count))
    }

    /// The approximate value at `quantile` in the captured data.
    ///
    /// The quantile is clamped to `[0.0, 1.0]`. Quantile `1.0` denotes the
    /// rank one past the last sample, so it -- and any quantile on an empty
    /// snapshot -- returns `None`.
    pub fn value_at_quantile(&self, quantile: f64) -> Option<u64> {
        let quantile = quantile.max(0.0).min(1.0);
        self.value_at_rank((quantile * self.population as f64) as u64)
    }

    /// The approximate number of captured samples whose value is below
    /// `value`, interpolating within `value`'s bucket.
    ///
    /// Any value can be queried; the result is in `[0, population()]`.
    pub fn rank_of_value(&self, value: u64) -> u64 {
        let key = self.layout.value_to_key(value);
        let bin = self.layout.bin_of_key(key);
        let slot = self.layout.slot_of_key(key);

        let mut rank = 0;
        for lower in 0..bin {
            rank += self.bin_total(lower);
        }

        if let Some(counts) = self.bin_counts(bin) {
            rank += counts[..slot].iter().sum::<u64>();

            let min = self.layout.key_to_min(key);
            let max = self.layout.key_to_max(key);
            // In a single-value bucket nothing sits below `value`, so the
            // bucket contributes only when it has width to interpolate over.
            if max > min {
                rank += interpolate(counts[slot], value - min, max - min);
            }
        }

        rank
    }

    /// The approximate quantile of `value` in the captured data.
    ///
    /// Returns NaN on an empty snapshot.
    pub fn quantile_of_value(&self, value: u64) -> f64 {
        self.rank_of_value(value) as f64 / self.population as f64
    }

    fn bin_rank(&self, bin: usize) -> Option<usize> {
        let bit = 1u64 << bin;
        if self.binmap & bit == 0 {
            None
        } else {
            Some((self.binmap & (bit - 1)).count_ones() as usize)
        }
    }

    fn bin_total(&self, bin: usize) -> u64 {
        self.bin_rank(bin).map_or(0, |rank| self.totals[rank])
    }

    fn bin_counts(&self, bin: usize) -> Option<&[u64]> {
        self.bin_rank(bin).map(|rank| {
            let mantissas = self.layout.mantissas();
            &self.counts[rank * mantissas..(rank + 1) * mantissas]
        })
    }
}

/// Evaluates `range * mul / div` in floating point, with an empty divisor
/// standing in for a full fraction.
fn interpolate(range: u64, mul: u64, div: u64) -> u64 {
    let frac = if div == 0 { 1.0 } else { mul as f64 / div as f64 };
    (range as f64 * frac) as u64
}

/// Iterator over a snapshot's buckets, created by [`Snapshot::iter`].
pub struct SnapshotBuckets<'a> {
    snapshot: &'a Snapshot,
    key: usize,
}

impl<'a> Iterator for SnapshotBuckets<'a> {
    type Item = Bucket;

    fn next(&mut self) -> Option<Bucket> {
        let layout = self.snapshot.layout;
        while self.key < layout.keys() {
            let bin = layout.bin_of_key(self.key);
            match self.snapshot.bin_counts(bin) {
                None => self.key = (bin + 1) * layout.mantissas(),
                Some(counts) => {
                    let key = self.key;
                    self.key += 1;
                    return Some(Bucket {
                        key,
                        min: layout.key_to_min(key),
                        max: layout.key_to_max(key),
                        count: counts[layout.slot_of_key(key)],
                    });
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use crate::Histogram;

    #[test]
    fn empty_snapshot_has_no_ranks() {
        let histogram = Histogram::new(5).unwrap();
        let snapshot = histogram.snapshot();

        assert_eq!(snapshot.population(), 0);
        assert_eq!(snapshot.value_at_rank(0), None);
        assert_eq!(snapshot.value_at_quantile(0.5), None);
        assert!(snapshot.quantile_of_value(42).is_nan());
    }

    #[test]
    fn single_sample_ranks() {
        let histogram = Histogram::new(5).unwrap();
        histogram.increment(42);
        let snapshot = histogram.snapshot();

        assert_eq!(snapshot.value_at_rank(0), Some(42));
        assert_eq!(snapshot.value_at_rank(1), None);
    }

    #[test]
    fn median_of_a_uniform_run_interpolates() {
        let histogram = Histogram::new(5).unwrap();
        for value in 100..200 {
            histogram.increment(value);
        }
        let snapshot = histogram.snapshot();

        let median = snapshot.value_at_quantile(0.5).unwrap();
        assert!((149..=150).contains(&median), "median {}", median);

        let rank = snapshot.rank_of_value(150);
        assert!((49..=51).contains(&rank), "rank {}", rank);
    }

    #[test]
    fn quantile_is_clamped() {
        let histogram = Histogram::new(5).unwrap();
        for value in 0..10 {
            histogram.increment(value);
        }
        let snapshot = histogram.snapshot();

        assert_eq!(snapshot.value_at_quantile(-3.0), snapshot.value_at_quantile(0.0));
        assert_eq!(snapshot.value_at_quantile(0.0), Some(0));
        // Quantile 1.0 is one past the last sample.
        assert_eq!(snapshot.value_at_quantile(2.0), None);
    }

    #[test]
    fn value_at_rank_is_monotone() {
        let histogram = Histogram::new(4).unwrap();
        for value in [1u64, 5, 17, 300, 300, 4096, 70_000, u64::MAX] {
            histogram.increment(value);
        }
        let snapshot = histogram.snapshot();

        let mut previous = 0;
        for rank in 0..snapshot.population() {
            let value = snapshot.value_at_rank(rank).unwrap();
            assert!(value >= previous, "rank {} value {} previous {}", rank, value, previous);
            previous = value;
        }
    }

    #[test]
    fn rank_of_value_is_monotone() {
        let histogram = Histogram::new(4).unwrap();
        for value in [3u64, 90, 1024, 1_000_000] {
            histogram.add(value, 5);
        }
        let snapshot = histogram.snapshot();

        let mut previous = 0;
        for value in (0..2_000_000u64).step_by(997) {
            let rank = snapshot.rank_of_value(value);
            assert!(rank >= previous, "value {} rank {} previous {}", value, rank, previous);
            assert!(rank <= snapshot.population());
            previous = rank;
        }
    }

    #[test]
    fn rank_round_trips_within_one() {
        let histogram = Histogram::new(5).unwrap();
        for value in 100..200 {
            histogram.increment(value);
        }
        let snapshot = histogram.snapshot();

        for rank in 0..snapshot.population() {
            let value = snapshot.value_at_rank(rank).unwrap();
            let back = snapshot.rank_of_value(value);
            assert!(
                back + 1 >= rank && back <= rank + 1,
                "rank {} -> value {} -> rank {}",
                rank,
                value,
                back
            );
        }
    }

    #[test]
    fn snapshots_of_an_unmutated_histogram_are_identical() {
        let histogram = Histogram::new(6).unwrap();
        for value in [0u64, 12, 77, 100_000, u64::MAX] {
            histogram.add(value, 3);
        }

        let first = histogram.snapshot();
        let second = histogram.snapshot();
        assert_eq!(first, second);
    }

    #[test]
    fn snapshot_outlives_its_histogram() {
        let histogram = Histogram::new(5).unwrap();
        histogram.add(1000, 4);
        let snapshot = histogram.snapshot();
        drop(histogram);

        assert_eq!(snapshot.population(), 4);
        let bucket = snapshot.iter().find(|bucket| bucket.count != 0).unwrap();
        assert!(bucket.min <= 1000 && 1000 <= bucket.max);
    }

    #[test]
    fn snapshot_misses_later_writes() {
        let histogram = Histogram::new(5).unwrap();
        histogram.increment(10);
        let snapshot = histogram.snapshot();

        // Into an already captured group, and into a brand new one.
        histogram.increment(11);
        histogram.increment(1_000_000);

        assert_eq!(snapshot.population(), 1);
        assert_eq!(histogram.snapshot().population(), 3);
    }

    #[test]
    fn population_matches_bucket_counts() {
        let histogram = Histogram::new(3).unwrap();
        for value in [0u64, 9, 200, 200, 65_536, u64::MAX - 1] {
            histogram.increment(value);
        }
        let snapshot = histogram.snapshot();

        let total: u64 = snapshot.iter().map(|bucket| bucket.count).sum();
        assert_eq!(total, snapshot.population());
        // An allocated group still reports its untouched buckets as zero.
        assert_eq!(snapshot.get(1).map(|bucket| bucket.count), Some(0));
    }
}
