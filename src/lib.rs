//! Freno - selective slowdown profiler for throughput analysis
//!
//! Freno injects controlled, calibrated spin delays into chosen callables
//! of a running program. By slowing a specific code path and measuring the
//! impact on end-to-end throughput, you can tell "code that runs often"
//! apart from "code that actually gates performance" — a distinction
//! conventional profilers cannot make. Freno is consumed by larger
//! benchmarking workflows; it does not run benchmarks itself.
//!
//! The pipeline per intercepted call: match-cache lookup, glob matching on
//! a miss (fail-open on matcher errors), window/frequency gating, then a
//! busy-wait delay whose accuracy floor is established by one-time clock
//! calibration. Everything is correct under both serialized and genuinely
//! parallel callback delivery.
//!
//! Environment variables (see [`Config::from_env`]):
//!
//! ```text
//! FRENO_TARGETS      Path to file containing target patterns (one per line)
//! FRENO_DELAY_NS     Delay in nanoseconds per trigger (default: 1000)
//! FRENO_FREQUENCY    Trigger every Nth matching call (default: 1)
//! FRENO_START_MS     Milliseconds after process start before enabling
//! FRENO_DURATION_MS  Duration in milliseconds (0 = indefinite)
//! ```

pub mod cache;
pub mod calibration;
pub mod clock;
pub mod config;
pub mod counters;
pub mod delay;
pub mod engine;
pub mod gate;
pub mod hook;
pub mod patterns;

pub use cache::{CacheEntry, CallableId, MatchCache};
pub use calibration::{clock_overhead_ns, is_calibrated, min_delay_ns, Calibration};
pub use clock::monotonic_ns;
pub use config::{Config, ConfigError};
pub use delay::spin_delay_ns;
pub use engine::{Engine, GlobMatcher, InstallError, MatchError, PatternMatcher};
pub use hook::{CallEvent, CallHook, HookError, HookHandle, ManualHook};
pub use patterns::{load_targets, matches_any, parse_targets, PatternError, TargetPattern};

use anyhow::Context;
use tracing_subscriber::EnvFilter;

/// Load configuration from `FRENO_*` environment variables and install it
/// into `engine` in one step — the usual activation path for an embedded
/// host at startup.
///
/// Returns `Ok(true)` when delay injection is active, `Ok(false)` when the
/// environment leaves freno disabled (no `FRENO_TARGETS`).
pub fn install_from_env(engine: &Engine) -> anyhow::Result<bool> {
    let config = Config::from_env().context("loading freno configuration")?;
    engine
        .install(config)
        .context("installing freno configuration")
}

/// Initialize a stderr tracing subscriber for freno's diagnostic output
/// (calibration numbers, config reports, clamping warnings).
///
/// Filter with `RUST_LOG` as usual; repeated calls are no-ops. Hosts with
/// their own subscriber should skip this.
pub fn init_diagnostics() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
