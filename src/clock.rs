//! Process-relative monotonic nanosecond timestamps.
//!
//! All timing in freno is expressed as nanoseconds since a per-process
//! anchor captured on first use. Using a monotonic clock makes delay
//! windows immune to wall-clock steps (NTP adjustments, suspend/resume
//! slewing), and a process-relative epoch means configuration windows can
//! be written as simple offsets ("start 500ms after launch").

use std::sync::OnceLock;
use std::time::Instant;

/// Anchor for all process-relative timestamps. Set once, on the first call
/// to [`monotonic_ns`], and never mutated afterwards.
static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Current monotonic time in nanoseconds since the process anchor.
///
/// The first call establishes the anchor and returns a small value; every
/// subsequent call returns a strictly non-decreasing count.
#[inline]
pub fn monotonic_ns() -> u64 {
    let anchor = ANCHOR.get_or_init(Instant::now);
    anchor.elapsed().as_nanos() as u64
}

/// Force the anchor to be established now.
///
/// Called from calibration so that the anchor predates any installed
/// configuration window; harmless if the anchor already exists.
pub(crate) fn ensure_anchor() {
    let _ = ANCHOR.get_or_init(Instant::now);
}
