//! Spin delay: a race-free busy-wait of a requested number of nanoseconds.
//!
//! `spin_delay_ns` does NOT yield or sleep; it re-reads the monotonic clock
//! in a tight loop until the target is reached, issuing a CPU pause hint
//! each iteration. Burning CPU is the point: the delay must hold the
//! executing thread for a deterministic duration so a benchmark harness can
//! attribute throughput changes to the slowed code path.
//!
//! # Thread safety
//!
//! The function touches only locals, so any number of threads may spin
//! concurrently with no coordination. Under a serializing host (one logical
//! thread of interpreted code at a time) N concurrent delays add up to
//! ~N×d wall time; under genuine parallelism they overlap to ~1×d. Both are
//! correct by construction — the primitive itself never changes.
//!
//! # Guarantees
//!
//! Elapsed time is always >= the requested delay. There is no upper-bound
//! guarantee (the scheduler may preempt mid-spin), but overshoot is
//! typically within a small constant factor. A delay, once started, always
//! runs to completion; there is no cancellation.

use std::time::Instant;

/// Busy-wait for at least `delay_ns` nanoseconds, then return.
///
/// A zero delay performs the two bracketing clock reads and returns
/// immediately. Delays below the calibrated minimum
/// ([`crate::calibration::min_delay_ns`]) still complete but elapse the
/// minimum instead; configuration loading clamps and warns about this.
#[inline]
pub fn spin_delay_ns(delay_ns: u64) {
    let start = Instant::now();
    while (start.elapsed().as_nanos() as u64) < delay_ns {
        std::hint::spin_loop();
    }
}
