//! Window and frequency gating.
//!
//! Called only after a callable is known to match. Decides whether this
//! particular invocation receives a delay: the timing window is checked
//! first (calls outside the window are not counted), then the frequency
//! gate increments the per-callable counter and passes every Nth call.
//!
//! The counter starts at 1 on the first matched in-window call, so with
//! `frequency = N` the Nth, 2Nth, 3Nth calls are delayed — not the 1st.
//! Increments are atomic: the every-Nth contract is user-visible behavior
//! and must stay exact under parallel callback delivery.

use crate::cache::CallableId;
use crate::config::Config;
use crate::counters::CallCounters;

/// Gate decision logic. Borrows the installed configuration and the
/// per-installation counters owned by the engine.
pub struct Gate<'a> {
    config: &'a Config,
    counters: &'a CallCounters,
}

impl<'a> Gate<'a> {
    pub fn new(config: &'a Config, counters: &'a CallCounters) -> Self {
        Gate { config, counters }
    }

    /// Should this matched invocation be delayed?
    ///
    /// `now_ns` is the process-relative timestamp of the call event.
    pub fn should_delay(&self, now_ns: u64, id: CallableId) -> bool {
        if now_ns < self.config.start_ns {
            return false;
        }
        if let Some(end_ns) = self.config.end_ns {
            if now_ns >= end_ns {
                return false;
            }
        }
        if self.config.frequency <= 1 {
            return true;
        }

        let count = self.counters.increment(id);
        count % u64::from(self.config.frequency) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate_fixture(config: &Config, counters: &CallCounters) -> Vec<bool> {
        let gate = Gate::new(config, counters);
        (0..10).map(|_| gate.should_delay(1_000, CallableId(1))).collect()
    }

    #[test]
    fn test_frequency_one_always_delays() {
        let config = Config::new().with_frequency(1);
        let counters = CallCounters::new();
        assert!(gate_fixture(&config, &counters).iter().all(|&d| d));
        // frequency 1 never touches the counters
        assert_eq!(counters.get(CallableId(1)), 0);
    }

    #[test]
    fn test_every_third_call_delays() {
        let config = Config::new().with_frequency(3);
        let counters = CallCounters::new();
        let decisions = gate_fixture(&config, &counters);
        // calls 1..10: delayed on 3, 6, 9
        assert_eq!(
            decisions,
            vec![false, false, true, false, false, true, false, false, true, false]
        );
    }

    #[test]
    fn test_first_call_is_not_delayed_with_frequency() {
        let config = Config::new().with_frequency(2);
        let counters = CallCounters::new();
        let gate = Gate::new(&config, &counters);
        assert!(!gate.should_delay(0, CallableId(9)));
        assert!(gate.should_delay(0, CallableId(9)));
    }

    #[test]
    fn test_before_window_no_delay_no_count() {
        let config = Config::new().with_frequency(2).with_window(5_000, None);
        let counters = CallCounters::new();
        let gate = Gate::new(&config, &counters);

        assert!(!gate.should_delay(4_999, CallableId(1)));
        // Out-of-window calls must not advance the counter.
        assert_eq!(counters.get(CallableId(1)), 0);

        assert!(!gate.should_delay(5_000, CallableId(1))); // count 1
        assert!(gate.should_delay(5_000, CallableId(1))); // count 2
    }

    #[test]
    fn test_after_window_no_delay() {
        let config = Config::new().with_window(0, Some(5_000));
        let counters = CallCounters::new();
        let gate = Gate::new(&config, &counters);
        assert!(gate.should_delay(4_999, CallableId(1)));
        assert!(!gate.should_delay(5_000, CallableId(1)));
        assert!(!gate.should_delay(9_000, CallableId(1)));
    }

    #[test]
    fn test_counters_are_per_callable() {
        let config = Config::new().with_frequency(2);
        let counters = CallCounters::new();
        let gate = Gate::new(&config, &counters);

        assert!(!gate.should_delay(0, CallableId(1)));
        // A different callable has its own count; its first call is not
        // the 2nd overall.
        assert!(!gate.should_delay(0, CallableId(2)));
        assert!(gate.should_delay(0, CallableId(1)));
        assert!(gate.should_delay(0, CallableId(2)));
    }
}
