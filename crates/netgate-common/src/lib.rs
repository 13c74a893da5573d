//! netgate common - shared types for the connection classification engine
//!
//! This crate provides the plain value types that cross the boundary between
//! the classification engine and its collaborators:
//! - Connection tuples (the lookup key)
//! - Actions, rule and generation identities, verdicts
//! - Error taxonomy for rule updates
//! - Lock-free counters and latency histograms
//!
//! Everything here is `Copy` or cheaply cloneable and free of interior
//! mutability, apart from the metric primitives.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod policy;
pub mod flow;
pub mod metrics;
pub mod error;

pub use policy::*;
pub use flow::*;
pub use error::*;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch
///
/// Audit events and generations are stamped with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Read the wall clock; a clock set before 1970 reads as zero
    #[inline]
    pub fn now() -> Self {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Self(since_epoch.as_nanos() as u64)
    }

    /// Wrap raw nanoseconds
    #[inline]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Raw nanoseconds
    #[inline]
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Microseconds from this timestamp to now, saturating at zero
    #[inline]
    pub fn elapsed_micros(&self) -> u64 {
        Self::now().0.saturating_sub(self.0) / 1_000
    }
}

/// Relaxed monotonic counter for stats
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Counter starting at `start`
    pub const fn new(start: u64) -> Self {
        Self(AtomicU64::new(start))
    }

    /// Add one, returning the previous value
    #[inline]
    pub fn inc(&self) -> u64 {
        self.add(1)
    }

    /// Add `n`, returning the previous value
    #[inline]
    pub fn add(&self, n: u64) -> u64 {
        self.0.fetch_add(n, Ordering::Relaxed)
    }

    /// Current value
    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
