//! The delay-injection engine: dispatch, lifecycle, and ownership of all
//! mutable state.
//!
//! One [`Engine`] owns one installation lifecycle: the active [`Config`],
//! the match cache, the call counters, and the hook registration. State is
//! explicit and instance-owned rather than process-global so tests can run
//! several independent engines, and so install/uninstall has a single
//! obvious owner.
//!
//! # Dispatch fast path
//!
//! [`Engine::on_call`] runs once per intercepted call, possibly from many
//! threads at once:
//!
//! 1. cache lookup — a known `NoMatch` returns immediately;
//! 2. on `Unknown`, consult the matcher; a matcher error is converted to
//!    `NoMatch` (fail-open: a broken matcher must never crash the program
//!    being measured) and the decision is cached either way;
//! 3. gate: timing window, then every-Nth frequency;
//! 4. spin delay for the configured nanoseconds.
//!
//! This is correct under both execution models the host may present — one
//! where some outer mechanism serializes all interpreted code, and one
//! where callbacks run genuinely in parallel — because the cache and the
//! counters are internally synchronized and everything else is immutable
//! after install.

use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;

use crate::cache::{CacheEntry, MatchCache};
use crate::calibration::Calibration;
use crate::clock;
use crate::config::Config;
use crate::counters::CallCounters;
use crate::delay::spin_delay_ns;
use crate::gate::Gate;
use crate::hook::{CallEvent, CallHook, HookError, HookHandle, ManualHook};
use crate::patterns::{matches_any, TargetPattern};

/// Failure reported by an external pattern matcher.
#[derive(Debug, Error)]
#[error("pattern matcher failed: {0}")]
pub struct MatchError(pub String);

/// Error installing a configuration.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("a configuration is already installed")]
    AlreadyInstalled,

    #[error(transparent)]
    Hook(#[from] HookError),
}

/// Decides whether a callable matches the active target set.
///
/// The decision must be a pure function of the (immutable) module path and
/// qualified name under a fixed target set; the cache relies on that to
/// tolerate redundant concurrent evaluation.
pub trait PatternMatcher: Send + Sync {
    fn matches(
        &self,
        targets: &[TargetPattern],
        module_path: &str,
        qualified_name: &str,
    ) -> Result<bool, MatchError>;
}

/// Default matcher: the crate's own glob patterns.
pub struct GlobMatcher;

impl PatternMatcher for GlobMatcher {
    fn matches(
        &self,
        targets: &[TargetPattern],
        module_path: &str,
        qualified_name: &str,
    ) -> Result<bool, MatchError> {
        Ok(matches_any(targets, module_path, qualified_name))
    }
}

/// State shared between the engine handle and the hook callback.
struct EngineCore {
    calibration: Calibration,
    cache: MatchCache,
    counters: CallCounters,
    /// The installed configuration. Written by install/uninstall, read on
    /// every call event; the `Arc` is cloned out so the read lock is held
    /// only for the clone, never across matching or delaying.
    installed: RwLock<Option<Arc<Config>>>,
    matcher: Box<dyn PatternMatcher>,
}

impl EngineCore {
    fn on_call(&self, event: &CallEvent<'_>) {
        let config = {
            let slot = self.installed.read().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(config) => Arc::clone(config),
                None => return,
            }
        };

        match self.cache.lookup(event.identity) {
            CacheEntry::NoMatch => return,
            CacheEntry::Match => {}
            CacheEntry::Unknown => {
                let is_match = match self.matcher.matches(
                    &config.targets,
                    event.module_path,
                    event.qualified_name,
                ) {
                    Ok(is_match) => is_match,
                    Err(err) => {
                        // Fail open: cache NoMatch so the broken matcher is
                        // not consulted again for this callable.
                        tracing::warn!(
                            identity = event.identity.0,
                            qualified_name = event.qualified_name,
                            error = %err,
                            "pattern matcher failed, treating as no-match"
                        );
                        false
                    }
                };
                self.cache.store(event.identity, is_match);
                if !is_match {
                    return;
                }
            }
        }

        let now_ns = clock::monotonic_ns();
        if Gate::new(&config, &self.counters).should_delay(now_ns, event.identity) {
            spin_delay_ns(config.delay_ns);
        }
    }
}

/// The delay-injection engine.
///
/// # Example
/// ```
/// use freno::{CallEvent, CallableId, Config, Engine};
///
/// let (engine, hook) = Engine::with_manual_hook();
/// let config = Config::new()
///     .with_targets(freno::parse_targets("mypkg:hot_*").unwrap())
///     .with_delay_ns(freno::min_delay_ns())
///     .build();
/// assert!(engine.install(config).unwrap());
///
/// hook.fire(&CallEvent {
///     identity: CallableId(1),
///     module_path: "mypkg",
///     qualified_name: "hot_loop",
/// });
///
/// engine.uninstall();
/// assert!(!engine.is_installed());
/// ```
pub struct Engine {
    core: Arc<EngineCore>,
    hook: Arc<dyn CallHook>,
    handle: Mutex<Option<HookHandle>>,
}

impl Engine {
    /// New engine using the built-in glob matcher.
    ///
    /// Forces clock calibration, so the overhead estimate exists before any
    /// delay can be requested.
    pub fn new(hook: Arc<dyn CallHook>) -> Self {
        Self::with_matcher(hook, Box::new(GlobMatcher))
    }

    /// New engine with a custom matcher (external matchers, counting or
    /// failing stubs in tests).
    pub fn with_matcher(hook: Arc<dyn CallHook>, matcher: Box<dyn PatternMatcher>) -> Self {
        Engine {
            core: Arc::new(EngineCore {
                calibration: *Calibration::global(),
                cache: MatchCache::new(),
                counters: CallCounters::new(),
                installed: RwLock::new(None),
                matcher,
            }),
            hook,
            handle: Mutex::new(None),
        }
    }

    /// Convenience for in-process hosts and tests: an engine wired to a
    /// [`ManualHook`] the caller can fire events through.
    pub fn with_manual_hook() -> (Self, Arc<ManualHook>) {
        let hook = Arc::new(ManualHook::new());
        let engine = Engine::new(Arc::clone(&hook) as Arc<dyn CallHook>);
        (engine, hook)
    }

    /// Install `config` and register with the call-interception hook.
    ///
    /// Returns `Ok(true)` when delay injection is now active, `Ok(false)`
    /// when the config is disabled or has no targets (the engine stays
    /// uninstalled; this is how an uninstrumented run looks, not an error).
    /// Fails with [`InstallError::AlreadyInstalled`] if a configuration is
    /// active; the existing installation is left untouched.
    pub fn install(&self, config: Config) -> Result<bool, InstallError> {
        if !config.enabled || config.targets.is_empty() {
            return Ok(false);
        }

        let config = config.build(); // re-clamp frequency >= 1

        {
            let mut slot = self
                .core
                .installed
                .write()
                .unwrap_or_else(|e| e.into_inner());
            if slot.is_some() {
                return Err(InstallError::AlreadyInstalled);
            }
            // Fresh install starts clean: no decisions or counts from a
            // previous installation may leak in.
            self.core.cache.clear();
            self.core.counters.clear();
            *slot = Some(Arc::new(config));
        }

        let core = Arc::clone(&self.core);
        let registration = self
            .hook
            .register(Arc::new(move |event: &CallEvent<'_>| core.on_call(event)));

        match registration {
            Ok(handle) => {
                *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
                tracing::debug!("freno installed");
                Ok(true)
            }
            Err(err) => {
                // Roll back so a failed install leaves the engine exactly
                // as it was.
                let mut slot = self
                    .core
                    .installed
                    .write()
                    .unwrap_or_else(|e| e.into_inner());
                *slot = None;
                Err(InstallError::Hook(err))
            }
        }
    }

    /// Deregister and tear down all per-installation state (configuration,
    /// cache, counters). No-op when not installed.
    pub fn uninstall(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            // Best-effort: a host that already tore down its hook is fine.
            if let Err(err) = self.hook.unregister(handle) {
                tracing::warn!(error = %err, "hook deregistration failed");
            }
        }

        let was_installed = {
            let mut slot = self
                .core
                .installed
                .write()
                .unwrap_or_else(|e| e.into_inner());
            slot.take().is_some()
        };

        if was_installed {
            self.core.cache.clear();
            self.core.counters.clear();
            tracing::debug!("freno uninstalled");
        }
    }

    /// Whether a configuration is currently installed.
    pub fn is_installed(&self) -> bool {
        self.core
            .installed
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// A clone of the installed configuration, if any.
    pub fn config(&self) -> Option<Arc<Config>> {
        self.core
            .installed
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Reset every cached match decision to unknown. The next call event
    /// per callable consults the matcher again.
    pub fn clear_cache(&self) {
        self.core.cache.clear();
    }

    /// Number of decided entries in the match cache.
    pub fn cache_len(&self) -> usize {
        self.core.cache.len()
    }

    /// Dispatch one call event. This is the entry point the hook callback
    /// feeds; it is public so embedded hosts can drive the engine directly.
    pub fn on_call(&self, event: &CallEvent<'_>) {
        self.core.on_call(event);
    }

    /// Calibrated clock-read overhead in nanoseconds.
    pub fn clock_overhead_ns(&self) -> u64 {
        self.core.calibration.overhead_ns
    }

    /// Minimum achievable delay in nanoseconds.
    pub fn min_delay_ns(&self) -> u64 {
        self.core.calibration.min_delay_ns()
    }

    /// Whether clock calibration has completed (always true once the
    /// engine exists).
    pub fn is_calibrated(&self) -> bool {
        self.core.calibration.calibrated
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.uninstall();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CallableId;
    use crate::patterns::parse_targets;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Matcher stub that counts invocations and delegates to the globs.
    struct CountingMatcher {
        calls: AtomicUsize,
    }

    impl CountingMatcher {
        fn new() -> Self {
            CountingMatcher {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl PatternMatcher for CountingMatcher {
        fn matches(
            &self,
            targets: &[TargetPattern],
            module_path: &str,
            qualified_name: &str,
        ) -> Result<bool, MatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(matches_any(targets, module_path, qualified_name))
        }
    }

    /// Matcher stub that always fails.
    struct BrokenMatcher;

    impl PatternMatcher for BrokenMatcher {
        fn matches(&self, _: &[TargetPattern], _: &str, _: &str) -> Result<bool, MatchError> {
            Err(MatchError("deliberately broken".into()))
        }
    }

    fn basic_config() -> Config {
        Config::new()
            .with_targets(parse_targets("pkg.target:*").unwrap())
            .with_delay_ns(0)
            .build()
    }

    fn event<'a>(id: u64, module: &'a str, name: &'a str) -> CallEvent<'a> {
        CallEvent {
            identity: CallableId(id),
            module_path: module,
            qualified_name: name,
        }
    }

    #[test]
    fn test_install_lifecycle() {
        let (engine, hook) = Engine::with_manual_hook();
        assert!(!engine.is_installed());

        assert!(engine.install(basic_config()).unwrap());
        assert!(engine.is_installed());
        assert!(hook.is_registered());

        engine.uninstall();
        assert!(!engine.is_installed());
        assert!(!hook.is_registered());
    }

    #[test]
    fn test_install_disabled_config_returns_false() {
        let (engine, _hook) = Engine::with_manual_hook();
        let config = basic_config().with_enabled(false);
        assert!(!engine.install(config).unwrap());
        assert!(!engine.is_installed());
    }

    #[test]
    fn test_install_empty_targets_returns_false() {
        let (engine, _hook) = Engine::with_manual_hook();
        assert!(!engine.install(Config::new()).unwrap());
        assert!(!engine.is_installed());
    }

    #[test]
    fn test_double_install_fails_and_keeps_first_config() {
        let (engine, _hook) = Engine::with_manual_hook();
        let first = basic_config().with_delay_ns(111);
        assert!(engine.install(first).unwrap());

        let second = basic_config().with_delay_ns(222);
        assert!(matches!(
            engine.install(second),
            Err(InstallError::AlreadyInstalled)
        ));
        assert!(engine.is_installed());
        assert_eq!(engine.config().unwrap().delay_ns, 111);

        // uninstall then install succeeds
        engine.uninstall();
        assert!(engine.install(basic_config().with_delay_ns(222)).unwrap());
        assert_eq!(engine.config().unwrap().delay_ns, 222);
    }

    #[test]
    fn test_uninstall_when_not_installed_is_noop() {
        let (engine, _hook) = Engine::with_manual_hook();
        engine.uninstall();
        engine.uninstall();
        assert!(!engine.is_installed());
    }

    #[test]
    fn test_events_before_install_are_ignored() {
        let (engine, _hook) = Engine::with_manual_hook();
        engine.on_call(&event(1, "pkg.target", "func"));
        assert_eq!(engine.cache_len(), 0);
    }

    #[test]
    fn test_match_decisions_are_cached() {
        let hook = Arc::new(ManualHook::new());
        let engine = Engine::with_matcher(
            Arc::clone(&hook) as Arc<dyn CallHook>,
            Box::new(CountingMatcher::new()),
        );
        engine.install(basic_config()).unwrap();

        for _ in 0..1_000 {
            engine.on_call(&event(1, "pkg.target", "func"));
            engine.on_call(&event(2, "pkg.other", "func"));
        }

        // One decided entry per distinct identity, regardless of call count.
        assert_eq!(engine.cache_len(), 2);
    }

    #[test]
    fn test_counting_matcher_called_once_per_identity() {
        let counting = Arc::new(CountingMatcher::new());

        struct Shared(Arc<CountingMatcher>);
        impl PatternMatcher for Shared {
            fn matches(
                &self,
                targets: &[TargetPattern],
                module_path: &str,
                qualified_name: &str,
            ) -> Result<bool, MatchError> {
                self.0.matches(targets, module_path, qualified_name)
            }
        }

        let hook = Arc::new(ManualHook::new());
        let engine = Engine::with_matcher(
            Arc::clone(&hook) as Arc<dyn CallHook>,
            Box::new(Shared(Arc::clone(&counting))),
        );
        engine.install(basic_config()).unwrap();

        for _ in 0..1_000 {
            engine.on_call(&event(1, "pkg.target", "func"));
        }
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);

        // clear_cache forces exactly one fresh matcher consultation.
        engine.clear_cache();
        for _ in 0..100 {
            engine.on_call(&event(1, "pkg.target", "func"));
        }
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_broken_matcher_fails_open() {
        let hook = Arc::new(ManualHook::new());
        let engine =
            Engine::with_matcher(Arc::clone(&hook) as Arc<dyn CallHook>, Box::new(BrokenMatcher));
        engine.install(basic_config()).unwrap();

        // Would match the globs, but the matcher errors: treated as
        // no-match, cached, and the program keeps running.
        engine.on_call(&event(1, "pkg.target", "func"));
        assert_eq!(engine.cache_len(), 1);
        engine.on_call(&event(1, "pkg.target", "func"));
    }

    #[test]
    fn test_uninstall_clears_cache_and_counters() {
        let (engine, _hook) = Engine::with_manual_hook();
        engine.install(basic_config()).unwrap();
        engine.on_call(&event(1, "pkg.target", "func"));
        assert_eq!(engine.cache_len(), 1);

        engine.uninstall();
        assert_eq!(engine.cache_len(), 0);

        // Reinstall starts clean.
        engine.install(basic_config()).unwrap();
        assert_eq!(engine.cache_len(), 0);
    }

    #[test]
    fn test_hook_fires_through_engine() {
        let (engine, hook) = Engine::with_manual_hook();
        engine.install(basic_config()).unwrap();

        hook.fire(&event(5, "pkg.target", "func"));
        hook.fire(&event(6, "pkg.other", "func"));
        assert_eq!(engine.cache_len(), 2);
    }

    #[test]
    fn test_calibration_accessors() {
        let (engine, _hook) = Engine::with_manual_hook();
        assert!(engine.is_calibrated());
        assert!(engine.clock_overhead_ns() > 0);
        assert_eq!(engine.min_delay_ns(), 2 * engine.clock_overhead_ns());
    }

    #[test]
    fn test_frequency_gating_through_dispatch() {
        let (engine, _hook) = Engine::with_manual_hook();
        let config = basic_config().with_frequency(5).with_delay_ns(200_000);
        engine.install(config).unwrap();

        // 4 calls: none delayed (fast). 5th call: delayed ~200µs.
        let start = std::time::Instant::now();
        for _ in 0..4 {
            engine.on_call(&event(1, "pkg.target", "func"));
        }
        let fast = start.elapsed().as_nanos() as u64;

        let start = std::time::Instant::now();
        engine.on_call(&event(1, "pkg.target", "func"));
        let fifth = start.elapsed().as_nanos() as u64;

        assert!(fifth >= 200_000, "5th call not delayed: {fifth}ns");
        assert!(fast < 200_000, "first 4 calls were delayed: {fast}ns");
    }
}
