//! Configuration: what to slow down, by how much, and when.
//!
//! A [`Config`] is immutable once installed into an engine; exactly one may
//! be installed at a time. It can be built programmatically with the
//! chainable builder or loaded from the environment:
//!
//! ```text
//! FRENO_TARGETS      Path to a targets file (required to enable)
//! FRENO_DELAY_NS     Delay in nanoseconds per trigger (default: 1000)
//! FRENO_FREQUENCY    Trigger every Nth matching call (default: 1)
//! FRENO_START_MS     Milliseconds after process start before enabling (default: 0)
//! FRENO_DURATION_MS  Active duration in milliseconds, 0 = indefinite (default: 0)
//! ```

use thiserror::Error;

use crate::calibration;
use crate::patterns::{load_targets, PatternError, TargetPattern};

/// Error in configuration values or environment parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name}: invalid integer '{value}'")]
    InvalidInt { name: &'static str, value: String },

    #[error("{name}: value {value} is below minimum {min}")]
    BelowMinimum {
        name: &'static str,
        value: i64,
        min: i64,
    },

    #[error("FRENO_TARGETS: file not found: {path}")]
    TargetsNotFound { path: String },

    #[error("FRENO_TARGETS: {0}")]
    Pattern(#[from] PatternError),
}

/// Delay-injection configuration.
///
/// # Example
/// ```
/// use freno::Config;
///
/// let config = Config::new()
///     .with_targets(freno::parse_targets("mypkg.*:hot_loop").unwrap())
///     .with_delay_ns(10_000)
///     .with_frequency(4)
///     .with_window(0, None)
///     .build();
/// assert!(config.enabled);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Whether delay injection is enabled at all.
    pub enabled: bool,

    /// Compiled target patterns; any match is sufficient, order is
    /// irrelevant to semantics.
    pub targets: Vec<TargetPattern>,

    /// Delay in nanoseconds applied per triggered call.
    pub delay_ns: u64,

    /// Trigger every Nth matching call. Always >= 1; the setters clamp.
    pub frequency: u32,

    /// Process-relative time (ns) when the active window opens.
    pub start_ns: u64,

    /// Process-relative time (ns) when the window closes, or `None` for
    /// indefinite. A stored zero also means indefinite.
    pub end_ns: Option<u64>,
}

impl Config {
    /// New enabled configuration with the environment defaults: 1µs delay,
    /// every call, window open from process start, indefinitely.
    pub fn new() -> Self {
        Config {
            enabled: true,
            targets: Vec::new(),
            delay_ns: 1_000,
            frequency: 1,
            start_ns: 0,
            end_ns: None,
        }
    }

    /// The disabled configuration (what `from_env` returns when no targets
    /// file is specified).
    pub fn disabled() -> Self {
        Config::default()
    }

    /// Set the target patterns.
    pub fn with_targets(mut self, targets: Vec<TargetPattern>) -> Self {
        self.targets = targets;
        self
    }

    /// Set the per-trigger delay in nanoseconds.
    pub fn with_delay_ns(mut self, delay_ns: u64) -> Self {
        self.delay_ns = delay_ns;
        self
    }

    /// Set the trigger frequency. Values below 1 are clamped to 1
    /// ("every call" is the reasonable reading of 0).
    pub fn with_frequency(mut self, frequency: u32) -> Self {
        self.frequency = frequency.max(1);
        self
    }

    /// Set the active window in process-relative nanoseconds.
    /// `end_ns` of `None` or `Some(0)` means unbounded.
    pub fn with_window(mut self, start_ns: u64, end_ns: Option<u64>) -> Self {
        self.start_ns = start_ns;
        self.end_ns = end_ns.filter(|&e| e > 0);
        self
    }

    /// Enable or disable delay injection.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Build the final configuration (re-applies clamping and returns).
    pub fn build(mut self) -> Self {
        self.frequency = self.frequency.max(1);
        self
    }

    /// Whether `now_ns` (process-relative) falls inside the active window.
    pub fn is_in_window(&self, now_ns: u64) -> bool {
        if !self.enabled {
            return false;
        }
        if now_ns < self.start_ns {
            return false;
        }
        if let Some(end_ns) = self.end_ns {
            if now_ns >= end_ns {
                return false;
            }
        }
        true
    }

    /// Load configuration from `FRENO_*` environment variables.
    ///
    /// Absent `FRENO_TARGETS` means freno is disabled and a disabled config
    /// is returned; that is the normal state for uninstrumented runs, not an
    /// error. A targets file that exists but contains no patterns also
    /// yields a disabled config, with a warning.
    pub fn from_env() -> Result<Config, ConfigError> {
        let Some(targets_path) = std::env::var_os("FRENO_TARGETS") else {
            return Ok(Config::disabled());
        };
        let targets_path = std::path::PathBuf::from(targets_path);

        if !targets_path.exists() {
            return Err(ConfigError::TargetsNotFound {
                path: targets_path.display().to_string(),
            });
        }

        let targets = load_targets(&targets_path)?;
        if targets.is_empty() {
            tracing::warn!(
                path = %targets_path.display(),
                "FRENO_TARGETS: no patterns found, freno disabled"
            );
            return Ok(Config::disabled());
        }

        let mut delay_ns = parse_env_int("FRENO_DELAY_NS", 1_000, 0)? as u64;
        let frequency = parse_env_int("FRENO_FREQUENCY", 1, 1)? as u32;
        let start_ms = parse_env_int("FRENO_START_MS", 0, 0)? as u64;
        let duration_ms = parse_env_int("FRENO_DURATION_MS", 0, 0)? as u64;

        // A delay shorter than two clock reads cannot be honored; clamp up
        // and point the operator at frequency for smaller effective rates.
        let min_delay = calibration::min_delay_ns();
        if delay_ns < min_delay {
            tracing::warn!(
                requested_ns = delay_ns,
                min_ns = min_delay,
                "FRENO_DELAY_NS below achievable minimum, clamping; \
                 for smaller effective delays increase FRENO_FREQUENCY"
            );
            delay_ns = min_delay;
        }

        let start_ns = start_ms * 1_000_000;
        let end_ns = (duration_ms > 0).then(|| start_ns + duration_ms * 1_000_000);

        let config = Config {
            enabled: true,
            targets,
            delay_ns,
            frequency,
            start_ns,
            end_ns,
        };

        report_config(&config, &targets_path);
        Ok(config)
    }
}

fn parse_env_int(name: &'static str, default: i64, min_value: i64) -> Result<i64, ConfigError> {
    let Ok(value_str) = std::env::var(name) else {
        return Ok(default);
    };

    let value: i64 = value_str
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidInt {
            name,
            value: value_str.clone(),
        })?;

    if value < min_value {
        return Err(ConfigError::BelowMinimum {
            name,
            value,
            min: min_value,
        });
    }

    Ok(value)
}

fn report_config(config: &Config, targets_path: &std::path::Path) {
    tracing::info!(
        patterns = config.targets.len(),
        path = %targets_path.display(),
        delay_ns = config.delay_ns,
        frequency = config.frequency,
        "freno targets loaded"
    );
    if config.start_ns > 0 {
        tracing::info!(start_delay_ms = config.start_ns / 1_000_000, "freno start delay");
    }
    match config.end_ns {
        Some(end_ns) => tracing::info!(
            duration_ms = (end_ns - config.start_ns) / 1_000_000,
            "freno active duration"
        ),
        None => tracing::info!("freno active duration: indefinite"),
    }
}
