//! A lock-free logarithmic histogram for 64-bit measurements.
//!
//! `loghist` records unsigned 64-bit values -- latencies in nanoseconds,
//! payload sizes in bytes, queue depths -- into buckets laid out on a
//! logarithmic grid, then answers rank and quantile queries over a frozen
//! snapshot of the data.
//!
//! The grid keeps a configurable number of significant bits per value
//! (`sigbits`), which bounds the relative error of every recorded value at
//! `2^(1 - sigbits)` while keeping memory proportional to the range of
//! values actually seen: bucket groups are allocated lazily, 64 groups of
//! `2^sigbits` counters at most.
//!
//! # Concurrency
//!
//! A [`Histogram`] is meant to be shared: recording is a relaxed atomic add
//! on the value's counter, and the one-time allocation of a bucket group is
//! published with a lock-free compare-and-swap. Aggregate reads over the
//! live histogram are best-effort; queries that need a consistent view take
//! a [`Snapshot`] first and run against that.
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use loghist::Histogram;
//!
//! let histogram = Arc::new(Histogram::new(7)?);
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|worker| {
//!         let histogram = Arc::clone(&histogram);
//!         thread::spawn(move || {
//!             for i in 0..1000u64 {
//!                 histogram.increment(worker * 1000 + i);
//!             }
//!         })
//!     })
//!     .collect();
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//!
//! let snapshot = histogram.snapshot();
//! assert_eq!(snapshot.population(), 4000);
//! let p99 = snapshot.value_at_quantile(0.99).unwrap();
//! assert!(p99 >= 3900);
//! # Ok::<(), loghist::BuildError>(())
//! ```

#![deny(missing_docs)]

mod bins;
mod histogram;
mod key;
mod snapshot;

pub use histogram::{Bucket, Buckets, BuildError, Histogram};
pub use snapshot::{Snapshot, SnapshotBuckets};
