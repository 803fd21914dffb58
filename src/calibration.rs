//! Clock calibration: measure the cost of reading the monotonic clock.
//!
//! A spin delay is bracketed by clock reads, so its accuracy floor is set
//! by how expensive one read is. Calibration measures that cost once per
//! process: a warmup pass primes caches and the vDSO mapping, then a tight
//! loop of reads is timed and averaged.
//!
//! The result is written exactly once into a process-wide [`OnceLock`] and
//! is read-only thereafter. Every delay-consuming entry point reaches the
//! calibrated state through [`Calibration::global`], so no delay can be
//! requested before calibration has run.

use std::sync::OnceLock;
use std::time::Instant;

use crate::clock;

/// Clock reads discarded before measurement to prime caches/TLB.
const WARMUP_READS: u32 = 1_000;

/// Clock reads averaged during the measurement phase.
const MEASURE_READS: u32 = 100_000;

static GLOBAL: OnceLock<Calibration> = OnceLock::new();

/// Immutable result of one calibration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    /// Measured cost of a single monotonic clock read, in nanoseconds.
    pub overhead_ns: u64,
    /// Whether calibration has completed. Always true for a value obtained
    /// from [`Calibration::global`] or [`Calibration::measure`].
    pub calibrated: bool,
}

impl Calibration {
    /// The process-wide calibration, measured on first access.
    ///
    /// `Instant::now()` cannot fail on supported platforms; a platform
    /// without a monotonic clock cannot load this crate at all, which is
    /// the fatal-at-initialization behavior the delay guarantees require.
    pub fn global() -> &'static Calibration {
        GLOBAL.get_or_init(|| {
            let cal = Self::measure();
            tracing::info!(
                overhead_ns = cal.overhead_ns,
                min_delay_ns = cal.min_delay_ns(),
                "clock calibrated"
            );
            cal
        })
    }

    /// Run a fresh calibration pass, bypassing the process-wide cache.
    ///
    /// Used by tests to check stability across runs; production code goes
    /// through [`Calibration::global`].
    pub fn measure() -> Calibration {
        clock::ensure_anchor();

        // Warmup: discard the first reads so the measurement loop does not
        // pay first-touch costs.
        for _ in 0..WARMUP_READS {
            let _ = Instant::now();
        }

        let start = Instant::now();
        for _ in 0..MEASURE_READS {
            let _ = Instant::now();
        }
        let elapsed = start.elapsed().as_nanos() as u64;

        Calibration {
            overhead_ns: elapsed / u64::from(MEASURE_READS),
            calibrated: true,
        }
    }

    /// Minimum delay this process can honor: `2 × overhead_ns`.
    ///
    /// Any delay measurement needs at least a start read and an end read,
    /// so nothing shorter than two clock reads is achievable.
    pub fn min_delay_ns(&self) -> u64 {
        2 * self.overhead_ns
    }
}

/// Calibrated cost of one monotonic clock read, in nanoseconds.
pub fn clock_overhead_ns() -> u64 {
    Calibration::global().overhead_ns
}

/// Minimum achievable spin delay, in nanoseconds (`2 ×` clock overhead).
pub fn min_delay_ns() -> u64 {
    Calibration::global().min_delay_ns()
}

/// Whether the process-wide calibration has completed.
///
/// Calling this forces calibration, so it always returns true; it exists
/// for API symmetry with hosts that surface the flag to operators.
pub fn is_calibrated() -> bool {
    Calibration::global().calibrated
}
