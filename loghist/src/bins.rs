//! Lock-free storage for the histogram's counters.
//!
//! Counters live in a two-level table: a fixed top index of 64 bins, each of
//! which is a one-shot publication cell for a dense, heap-allocated array of
//! atomic counters. A bin's array is created lazily by the first writer that
//! touches it and stays in place until the table is dropped, so readers can
//! hold onto a bin for the lifetime of the table without any reclamation
//! scheme.

use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicPtr, Ordering};

#[cfg(target_pointer_width = "32")]
pub(crate) use portable_atomic::AtomicU64;
#[cfg(not(target_pointer_width = "32"))]
pub(crate) use std::sync::atomic::AtomicU64;

use crate::key::BINS;

/// One top-level slot: either empty or an installed counter array.
struct Bin {
    counters: AtomicPtr<AtomicU64>,
}

impl Bin {
    const fn empty() -> Bin {
        Bin { counters: AtomicPtr::new(ptr::null_mut()) }
    }
}

/// The two-level counter table.
///
/// Every installed bin holds exactly `counters_per_bin` counters. Counter
/// updates are relaxed atomic adds; bin installation is an acquire/release
/// compare-and-swap, which guarantees that a thread observing a non-null bin
/// pointer also observes the zero-initialized counters published with it.
pub(crate) struct BinTable {
    bins: [Bin; BINS],
    counters_per_bin: usize,
}

impl BinTable {
    /// Creates a table with every bin empty.
    pub(crate) fn new(counters_per_bin: usize) -> BinTable {
        const EMPTY: Bin = Bin::empty();
        BinTable { bins: [EMPTY; BINS], counters_per_bin }
    }

    /// Returns the counter array for `bin` if one has been installed.
    ///
    /// Read-only paths treat an empty bin as all-zero counts.
    pub(crate) fn get(&self, bin: usize) -> Option<&[AtomicU64]> {
        let ptr = self.bins[bin].counters.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { slice::from_raw_parts(ptr, self.counters_per_bin) })
        }
    }

    /// Returns the counter array for `bin`, installing one if necessary.
    pub(crate) fn get_or_install(&self, bin: usize) -> &[AtomicU64] {
        let ptr = self.bins[bin].counters.load(Ordering::Acquire);
        let ptr = if ptr.is_null() { self.install(bin) } else { ptr };
        unsafe { slice::from_raw_parts(ptr, self.counters_per_bin) }
    }

    /// Races to publish a freshly zeroed counter array for `bin`.
    ///
    /// Exactly one writer wins; losers free their allocation and continue
    /// with the winner's array.
    fn install(&self, bin: usize) -> *mut AtomicU64 {
        let fresh: Box<[AtomicU64]> =
            (0..self.counters_per_bin).map(|_| AtomicU64::new(0)).collect();
        let fresh = Box::into_raw(fresh) as *mut AtomicU64;

        match self.bins[bin].counters.compare_exchange(
            ptr::null_mut(),
            fresh,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => fresh,
            Err(winner) => {
                unsafe { drop_array(fresh, self.counters_per_bin) };
                winner
            }
        }
    }

    /// Number of bins with an installed counter array. O(64).
    pub(crate) fn installed(&self) -> usize {
        (0..BINS).filter(|&bin| self.get(bin).is_some()).count()
    }
}

impl Drop for BinTable {
    fn drop(&mut self) {
        for bin in &mut self.bins {
            let ptr = *bin.counters.get_mut();
            if !ptr.is_null() {
                unsafe { drop_array(ptr, self.counters_per_bin) };
            }
        }
    }
}

/// Reconstitutes and drops a counter array created by `install`.
///
/// Safety: `ptr` must have come from `Box::into_raw` on a boxed slice of
/// exactly `len` counters, and must not be used again afterwards.
unsafe fn drop_array(ptr: *mut AtomicU64, len: usize) {
    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(ptr, len)));
}
