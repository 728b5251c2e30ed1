//! Bandwidth probing engine
//!
//! A [`ProbeGroup`] runs transfer attempts under a concurrency ceiling and
//! [`speed_collect`] folds their completions into a bytes-per-second estimate.

mod collect;
mod group;

use std::fmt;

use futures::future::BoxFuture;
use serde::Serialize;

use crate::error::ProbeError;

pub use collect::speed_collect;
pub use group::ProbeGroup;

/// Bytes successfully moved by one transfer attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct BytesTransferred(pub u64);

/// Throughput estimate
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize)]
pub struct BytesPerSecond(pub f64);

impl BytesPerSecond {
    /// Estimate from a byte total and elapsed seconds; zero when either is zero
    pub fn from_total(bytes: u64, elapsed_secs: f64) -> Self {
        if bytes == 0 || elapsed_secs <= 0.0 {
            return Self(0.0);
        }
        Self(bytes as f64 / elapsed_secs)
    }

    pub fn as_f64(self) -> f64 {
        self.0
    }

    pub fn megabits_per_second(self) -> f64 {
        self.0 * 8.0 / 1_000_000.0
    }
}

impl fmt::Display for BytesPerSecond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} Mbps", self.megabits_per_second())
    }
}

/// Result of one probe task
pub type ProbeResult = Result<BytesTransferred, ProbeError>;

/// A single transfer attempt, started by the scheduler when a slot frees up
pub type ProbeTask = Box<dyn FnOnce() -> BoxFuture<'static, ProbeResult> + Send>;
