//! Circuit breaker: loop detection and soft-limit warnings.
//!
//! Monitors call history and budget usage to detect when an agent is stuck
//! calling the same model or tool over and over, and to warn once when spend
//! approaches the budget. Neither check fails; both return signal values and
//! leave enforcement to the session.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{BudgetError, Result};

/// Default number of calls to one key allowed inside the window.
pub const DEFAULT_MAX_REPEATED_CALLS: usize = 10;

/// Default loop detection window.
pub const DEFAULT_LOOP_WINDOW_SECONDS: f64 = 60.0;

/// Default fraction of the budget at which the soft-limit warning fires.
pub const DEFAULT_SOFT_LIMIT_FRACTION: f64 = 0.9;

/// Checks that a soft-limit fraction lies in (0, 1]. NaN is rejected.
pub fn validate_soft_limit_fraction(fraction: f64) -> Result<()> {
    if fraction > 0.0 && fraction <= 1.0 {
        Ok(())
    } else {
        Err(BudgetError::Config(format!(
            "soft_limit must be in (0, 1], got {}",
            fraction
        )))
    }
}

/// Configuration for loop detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopDetectorConfig {
    /// Calls to one key tolerated inside the window; one more is a loop.
    pub max_repeated_calls: usize,
    /// Length of the trailing window, in seconds.
    pub time_window_seconds: f64,
}

impl Default for LoopDetectorConfig {
    fn default() -> Self {
        Self {
            max_repeated_calls: DEFAULT_MAX_REPEATED_CALLS,
            time_window_seconds: DEFAULT_LOOP_WINDOW_SECONDS,
        }
    }
}

impl LoopDetectorConfig {
    /// Creates a config with the given threshold and window.
    pub fn new(max_repeated_calls: usize, time_window_seconds: f64) -> Self {
        Self {
            max_repeated_calls,
            time_window_seconds,
        }
    }

    /// The window as a `Duration`. Negative or non-finite values collapse to zero.
    pub fn window(&self) -> Duration {
        Duration::try_from_secs_f64(self.time_window_seconds).unwrap_or(Duration::ZERO)
    }
}

/// Detects when the same tool or model is called repeatedly in a short window.
///
/// Each key keeps its own sliding window of call instants. Every access
/// drops the instants that fell out of the window before counting.
#[derive(Debug, Default)]
pub struct LoopDetector {
    config: LoopDetectorConfig,
    calls: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl LoopDetector {
    /// Creates a detector with the given configuration.
    pub fn new(config: LoopDetectorConfig) -> Self {
        Self {
            config,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &LoopDetectorConfig {
        &self.config
    }

    fn calls(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Instant>>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a call and returns `true` if a loop is detected.
    pub fn record_call(&self, key: &str) -> bool {
        self.record_call_at(key, Instant::now())
    }

    /// Records a call observed at `now`.
    pub fn record_call_at(&self, key: &str, now: Instant) -> bool {
        let window = self.config.window();
        let mut calls = self.calls();
        let history = calls.entry(key.to_string()).or_default();
        prune(history, now, window);
        history.push_back(now);
        history.len() > self.config.max_repeated_calls
    }

    /// Number of calls to `key` still inside the window.
    pub fn call_count(&self, key: &str) -> usize {
        let window = self.config.window();
        let now = Instant::now();
        let mut calls = self.calls();
        match calls.get_mut(key) {
            Some(history) => {
                prune(history, now, window);
                history.len()
            }
            None => 0,
        }
    }

    /// Clears all recorded calls.
    pub fn reset(&self) {
        self.calls().clear();
    }
}

/// Drops instants at least `window` older than `now`. Histories are in
/// insertion order, so expired entries are always at the front.
fn prune(history: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = history.front() {
        if now.saturating_duration_since(*oldest) >= window {
            history.pop_front();
        } else {
            break;
        }
    }
}

/// Monitors budget usage and detects runaway loops.
#[derive(Debug)]
pub struct CircuitBreaker {
    soft_limit_fraction: f64,
    loop_detector: LoopDetector,
    soft_limit_triggered: AtomicBool,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_SOFT_LIMIT_FRACTION, LoopDetectorConfig::default())
    }
}

impl CircuitBreaker {
    /// Creates a breaker with a soft-limit fraction and loop configuration.
    pub fn new(soft_limit_fraction: f64, loop_config: LoopDetectorConfig) -> Self {
        Self {
            soft_limit_fraction,
            loop_detector: LoopDetector::new(loop_config),
            soft_limit_triggered: AtomicBool::new(false),
        }
    }

    /// The configured soft-limit fraction.
    pub fn soft_limit_fraction(&self) -> f64 {
        self.soft_limit_fraction
    }

    /// Whether the soft-limit warning has already fired.
    pub fn soft_limit_triggered(&self) -> bool {
        self.soft_limit_triggered.load(Ordering::SeqCst)
    }

    /// The underlying loop detector.
    pub fn loop_detector(&self) -> &LoopDetector {
        &self.loop_detector
    }

    /// Checks budget thresholds. Returns a warning message the first time the
    /// spent fraction reaches the soft limit, and `None` on every other call.
    ///
    /// A non-positive budget means no limit is configured.
    pub fn check_budget(&self, spent: f64, budget: f64) -> Option<String> {
        if budget <= 0.0 {
            return None;
        }
        let fraction = spent / budget;
        if fraction < self.soft_limit_fraction {
            return None;
        }
        // Only the caller that flips the flag gets the warning.
        if self
            .soft_limit_triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }

        let message = format!(
            "Soft limit reached: {:.0}% of budget used (${:.4} / ${:.2})",
            fraction * 100.0,
            spent,
            budget
        );
        warn!(spent, budget, "{}", message);
        Some(message)
    }

    /// Records a call and returns `true` if a loop is detected.
    pub fn check_loop(&self, key: &str) -> bool {
        self.loop_detector.record_call(key)
    }

    /// Clears loop history and re-arms the soft-limit warning.
    pub fn reset(&self) {
        self.loop_detector.reset();
        self.soft_limit_triggered.store(false, Ordering::SeqCst);
    }
}
