//! Value-to-key mapping for the logarithmic bucket grid.
//!
//! Every unsigned 64-bit value maps to a dense integer key. Keys partition
//! the full `u64` range into contiguous, non-overlapping buckets whose
//! widths grow geometrically, `2^sigbits` buckets per binary decade. The
//! mapping is
//! integer-only and branchless apart from the `leading_zeros` intrinsic, so
//! it can sit directly on the histogram's write path.

/// Number of top-level bins, one per binary exponent of a 64-bit value.
pub(crate) const BINS: usize = 64;

/// The bucket grid derived from a `sigbits` setting.
///
/// A key is laid out as `(exponent << sigbits) | mantissa`. Values below
/// `2^sigbits` are denormal: they collapse into bin zero and get one bucket
/// each. Normalized values contribute their top `sigbits + 1` bits, with the
/// implicit leading one carrying into the exponent, which keeps the key
/// space contiguous across the denormal/normal boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Layout {
    sigbits: u32,
}

impl Layout {
    /// Creates a layout for the given precision.
    ///
    /// Callers are expected to have validated `sigbits` already.
    pub(crate) const fn new(sigbits: u32) -> Layout {
        Layout { sigbits }
    }

    /// Significant bits of precision per binary decade.
    pub(crate) const fn sigbits(self) -> u32 {
        self.sigbits
    }

    /// Buckets (counters) per bin; also the denormal threshold.
    pub(crate) const fn mantissas(self) -> usize {
        1 << self.sigbits
    }

    /// Number of bins that can actually hold keys.
    ///
    /// The bottom `sigbits - 1` exponent classes are folded into bin zero,
    /// so the top of the key space stops short of all 64 bins.
    pub(crate) const fn exponents(self) -> usize {
        BINS - (self.sigbits as usize - 1)
    }

    /// Total number of distinct keys.
    pub(crate) const fn keys(self) -> usize {
        self.exponents() * self.mantissas()
    }

    /// Top-level bin holding `key`.
    pub(crate) const fn bin_of_key(self, key: usize) -> usize {
        key / self.mantissas()
    }

    /// Counter slot of `key` within its bin.
    pub(crate) const fn slot_of_key(self, key: usize) -> usize {
        key % self.mantissas()
    }

    /// Maps a value to its key.
    pub(crate) fn value_to_key(self, value: u64) -> usize {
        // Force denormal values into the exponent class of the denormal
        // threshold so that a single leading-zero count covers both ranges.
        let binned = value | self.mantissas() as u64;
        let exponent = 63 - self.sigbits - binned.leading_zeros();
        // One extra mantissa bit: the leading one of a normalized value
        // lands in the low bit of the exponent slot, and the arithmetic add
        // below carries it into the exponent.
        let mantissa = (value >> exponent) & (2 * self.mantissas() as u64 - 1);
        ((exponent as usize) << self.sigbits) + mantissa as usize
    }

    /// Smallest value stored in `key`'s bucket.
    pub(crate) fn key_to_min(self, key: usize) -> u64 {
        if key < self.mantissas() {
            key as u64
        } else {
            let exponent = self.bin_of_key(key) - 1;
            let mantissa = self.slot_of_key(key) + self.mantissas();
            (mantissa as u64) << exponent
        }
    }

    /// Largest value stored in `key`'s bucket.
    pub(crate) fn key_to_max(self, key: usize) -> u64 {
        // The pre-divided, pre-shifted form sidesteps both a shift by 64 for
        // the denormal range and overflow in the top bin.
        let shift = 63 - self.bin_of_key(key) as u32;
        let range = (u64::MAX / 4) >> shift;
        self.key_to_min(key) + range
    }
}
