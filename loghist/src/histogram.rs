//! The live, concurrently writable histogram.

use std::fmt;
use std::mem;
use std::sync::atomic::Ordering;

use thiserror::Error;

use crate::bins::BinTable;
use crate::key::Layout;
use crate::snapshot::Snapshot;

/// Errors that could occur while building a [`Histogram`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// The requested precision was outside the supported range.
    #[error("sigbits must be in the range 1..=15, got {0}")]
    InvalidSigbits(u32),
}

/// A single bucket of a histogram or snapshot.
///
/// `min` and `max` are the inclusive bounds of the values the bucket
/// collects, and `count` is how many samples it has collected so far.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bucket {
    /// The bucket's key.
    pub key: usize,
    /// Smallest value mapping to this bucket.
    pub min: u64,
    /// Largest value mapping to this bucket.
    pub max: u64,
    /// Number of samples collected by this bucket.
    pub count: u64,
}

/// A lock-free histogram of unsigned 64-bit values.
///
/// Buckets are laid out on a logarithmic grid: values are grouped by their
/// top `sigbits` significant bits, which bounds the relative error of any
/// recorded value by `2^(1 - sigbits)`. Values below `2^sigbits` get one
/// bucket each and are therefore recorded exactly.
///
/// Recording is wait-free apart from the one-time allocation of a bucket
/// group: any number of threads can call [`increment`](Histogram::increment)
/// or [`add`](Histogram::add) on a shared histogram. Reads that need a
/// consistent view of the data -- rank and quantile queries in particular --
/// go through [`snapshot`](Histogram::snapshot).
///
/// # Example
///
/// ```
/// use loghist::Histogram;
///
/// let histogram = Histogram::new(9)?;
/// for latency in [352, 512, 487, 408, 366] {
///     histogram.increment(latency);
/// }
///
/// let snapshot = histogram.snapshot();
/// assert_eq!(snapshot.population(), 5);
/// let p50 = snapshot.value_at_quantile(0.5).unwrap();
/// assert!(p50 >= 366 && p50 <= 487);
/// # Ok::<(), loghist::BuildError>(())
/// ```
pub struct Histogram {
    pub(crate) layout: Layout,
    pub(crate) bins: BinTable,
}

impl Histogram {
    /// The lowest supported `sigbits` setting.
    pub const MIN_SIGBITS: u32 = 1;

    /// The highest supported `sigbits` setting.
    pub const MAX_SIGBITS: u32 = 15;

    /// Creates a histogram that keeps `sigbits` significant bits per value.
    ///
    /// Higher settings mean finer buckets and more memory per bucket group:
    /// each group holds `2^sigbits` 8-byte counters, and groups are
    /// allocated lazily as values hit them.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::InvalidSigbits`] unless
    /// `sigbits` is in the range `1..=15`.
    pub fn new(sigbits: u32) -> Result<Histogram, BuildError> {
        if !(Self::MIN_SIGBITS..=Self::MAX_SIGBITS).contains(&sigbits) {
            return Err(BuildError::InvalidSigbits(sigbits));
        }

        let layout = Layout::new(sigbits);
        Ok(Histogram { layout, bins: BinTable::new(layout.mantissas()) })
    }

    /// The histogram's `sigbits` setting.
    pub fn sigbits(&self) -> u32 {
        self.layout.sigbits()
    }

    /// Memory resident for this histogram, in bytes. O(64).
    pub fn size_bytes(&self) -> usize {
        mem::size_of::<Histogram>()
            + self.bins.installed() * self.layout.mantissas() * mem::size_of::<u64>()
    }

    /// Records one sample with the given value.
    pub fn increment(&self, value: u64) {
        self.add(value, 1);
    }

    /// Records `count` samples with the given value.
    ///
    /// A `count` of zero is a no-op and does not allocate the value's
    /// bucket group.
    pub fn add(&self, value: u64, count: u64) {
        if count == 0 {
            return;
        }
        self.add_to_key(self.layout.value_to_key(value), count);
    }

    fn add_to_key(&self, key: usize, count: u64) {
        let counters = self.bins.get_or_install(self.layout.bin_of_key(key));
        counters[self.layout.slot_of_key(key)].fetch_add(count, Ordering::Relaxed);
    }

    /// Looks up the bucket for `key`, or `None` if the key is out of range.
    ///
    /// The returned count is zero for buckets that have never been hit,
    /// whether or not their group has been allocated. The count is a relaxed
    /// read: it can trail concurrent writers.
    pub fn get(&self, key: usize) -> Option<Bucket> {
        if key >= self.layout.keys() {
            return None;
        }

        let count = self
            .bins
            .get(self.layout.bin_of_key(key))
            .map(|counters| counters[self.layout.slot_of_key(key)].load(Ordering::Relaxed))
            .unwrap_or(0);

        Some(Bucket {
            key,
            min: self.layout.key_to_min(key),
            max: self.layout.key_to_max(key),
            count,
        })
    }

    /// Iterates the histogram's buckets in key order.
    ///
    /// Buckets whose group has never been allocated are skipped wholesale;
    /// allocated groups yield every bucket, including zero-count ones.
    /// Counts are relaxed reads, so buckets visited early can miss writes
    /// that buckets visited later observe; use
    /// [`snapshot`](Histogram::snapshot) when that matters.
    pub fn iter(&self) -> Buckets<'_> {
        Buckets { layout: self.layout, bins: &self.bins, key: 0 }
    }

    /// Computes the mean and the (biased) variance of the recorded data.
    ///
    /// Each bucket contributes its midpoint, so the result carries the same
    /// relative error as the buckets themselves. The standard deviation is
    /// the square root of the returned variance.
    ///
    /// Returns `(NaN, NaN)` when the histogram is empty.
    pub fn mean_variance(&self) -> (f64, f64) {
        let mut population = 0.0;
        let mut mean = 0.0;
        let mut sigma = 0.0;

        for bucket in self.iter() {
            if bucket.count == 0 {
                continue;
            }
            let count = bucket.count as f64;
            // Halve the endpoints before summing so the midpoint stays
            // inside f64 range across the whole 64-bit domain.
            let midpoint = bucket.min as f64 / 2.0 + bucket.max as f64 / 2.0;
            let delta = midpoint - mean;
            population += count;
            mean += count * delta / population;
            sigma += count * delta * (midpoint - mean);
        }

        if population == 0.0 {
            (f64::NAN, f64::NAN)
        } else {
            (mean, sigma / population)
        }
    }

    /// Adds every count recorded in `source` to this histogram.
    ///
    /// The histograms do not need to share a `sigbits` setting. Where the
    /// source buckets are finer than the target's, counts simply coarsen
    /// into the containing bucket; where they are coarser, each source count
    /// is split evenly across the spanned target buckets, with the
    /// remainder going to the lowest ones.
    ///
    /// The caller must ensure no other thread writes to `source` during the
    /// merge; counts written concurrently may or may not be carried over.
    pub fn merge_from(&mut self, source: &Histogram) {
        for bucket in source.iter() {
            if bucket.count == 0 {
                continue;
            }

            let first = self.layout.value_to_key(bucket.min);
            let last = self.layout.value_to_key(bucket.max);
            let spread = (last - first + 1) as u64;
            let each = bucket.count / spread;
            let remainder = bucket.count % spread;

            for (offset, key) in (first..=last).enumerate() {
                let count = each + u64::from((offset as u64) < remainder);
                if count != 0 {
                    self.add_to_key(key, count);
                }
            }
        }
    }

    /// Takes a point-in-time copy of the histogram for rank and quantile
    /// queries.
    ///
    /// The snapshot may run concurrently with writers: it captures the set
    /// of allocated bucket groups once, up front, and then copies their
    /// counters, so it is internally consistent even though late-arriving
    /// writes may be missing from it.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(self)
    }

    /// Checks the bucket-grid invariants, panicking on any violation.
    ///
    /// This walks the entire key space, so it is strictly a debugging aid;
    /// it is never called on any production path.
    pub fn validate(&self) {
        let layout = self.layout;
        let keys = layout.keys();

        assert_eq!(layout.key_to_min(0), 0);
        assert_eq!(layout.key_to_max(keys - 1), u64::MAX);

        for key in 1..keys {
            assert!(
                layout.key_to_max(key - 1) < layout.key_to_min(key),
                "buckets {} and {} overlap",
                key - 1,
                key
            );
            assert_eq!(
                layout.key_to_max(key - 1) + 1,
                layout.key_to_min(key),
                "gap between buckets {} and {}",
                key - 1,
                key
            );
        }

        for key in 0..keys {
            assert_eq!(layout.value_to_key(layout.key_to_min(key)), key);
            assert_eq!(layout.value_to_key(layout.key_to_max(key)), key);
        }
    }
}

impl fmt::Debug for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Histogram")
            .field("sigbits", &self.sigbits())
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}

/// Iterator over a histogram's buckets, created by
/// [`Histogram::iter`].
pub struct Buckets<'a> {
    layout: Layout,
    bins: &'a BinTable,
    key: usize,
}

impl<'a> Iterator for Buckets<'a> {
    type Item = Bucket;

    fn next(&mut self) -> Option<Bucket> {
        while self.key < self.layout.keys() {
            let bin = self.layout.bin_of_key(self.key);
            match self.bins.get(bin) {
                // Skip the whole unallocated group in one step.
                None => self.key = (bin + 1) * self.layout.mantissas(),
                Some(counters) => {
                    let key = self.key;
                    self.key += 1;
                    return Some(Bucket {
                        key,
                        min: self.layout.key_to_min(key),
                        max: self.layout.key_to_max(key),
                        count: counters[self.layout.slot_of_key(key)].load(Ordering::Relaxed),
                    });
                }
            }
        }
        None
    }
}
