//! Retry strategies, poll schedules and deadlines for appdrop.
//!
//! This crate provides:
//! - Backoff strategies (immediate, exponential, linear, constant) with jitter
//! - A [`RetryExecutor`] that re-runs a fallible step within an attempt budget
//! - A [`PollSchedule`] that spaces out upload status requests, either by a
//!   fixed delay or by a delay derived from the artifact size
//! - A [`Deadline`] used to bound waits by the caller's overall time budget
//!
//! # Example
//!
//! ```
//! use appdrop_retry::{PollSchedule, RetryPolicy, calculate_delay};
//! use std::time::Duration;
//!
//! let config = RetryPolicy::Default.to_config();
//! let delay = calculate_delay(&config, 2);
//! println!("Retry after: {:?}", delay);
//!
//! let schedule = PollSchedule {
//!     max_requests: 20,
//!     delay: Duration::from_secs(1),
//!     delay_coefficient: Some(10),
//! };
//! // 50 MiB at 10 MiB per second of delay
//! assert_eq!(schedule.delay_for(50 * 1024 * 1024), Duration::from_secs(5));
//! ```

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Default number of upload status requests.
pub const DEFAULT_MAX_STATUS_REQUESTS: u32 = 20;

/// Default delay between upload status requests.
pub const DEFAULT_STATUS_REQUEST_DELAY: Duration = Duration::from_secs(1);

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

/// Strategy type for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyType {
    /// No delay between retries - retry immediately
    Immediate,
    /// Exponential backoff: delay doubles each attempt (default)
    #[default]
    Exponential,
    /// Linear backoff: delay increases linearly each attempt
    Linear,
    /// Constant delay: same delay every attempt
    Constant,
}

/// Predefined retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// A single attempt, no retry
    #[default]
    None,
    /// A few quick retries for flaky networks
    Default,
    /// More attempts, shorter delays
    Aggressive,
    /// Explicitly configured values
    Custom,
}

impl RetryPolicy {
    /// Get the retry configuration for this policy.
    pub fn to_config(&self) -> RetryStrategyConfig {
        match self {
            RetryPolicy::None => RetryStrategyConfig {
                max_attempts: 1,
                ..RetryStrategyConfig::default()
            },
            RetryPolicy::Default => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 3,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(30),
                jitter: 0.5,
            },
            RetryPolicy::Aggressive => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 6,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(15),
                jitter: 0.3,
            },
            RetryPolicy::Custom => RetryStrategyConfig::default(),
        }
    }
}

/// Configuration for a retry strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryStrategyConfig {
    /// Strategy type for calculating delay between retries.
    #[serde(default)]
    pub strategy: RetryStrategyType,
    /// Maximum number of attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for backoff calculations.
    #[serde(default = "default_base_delay")]
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Maximum delay cap for backoff.
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Jitter factor for randomized delays (0.0 = no jitter, 1.0 = full jitter).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_jitter() -> f64 {
    0.5
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategyType::Exponential,
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

/// Calculate the delay before the next attempt.
///
/// `attempt` is the attempt that just failed, starting at 1.
///
/// ```
/// use appdrop_retry::{RetryStrategyConfig, RetryStrategyType, calculate_delay};
/// use std::time::Duration;
///
/// let config = RetryStrategyConfig {
///     strategy: RetryStrategyType::Exponential,
///     base_delay: Duration::from_secs(1),
///     max_delay: Duration::from_secs(60),
///     jitter: 0.0,
///     max_attempts: 10,
/// };
///
/// assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
/// assert_eq!(calculate_delay(&config, 3), Duration::from_secs(4));
/// ```
pub fn calculate_delay(config: &RetryStrategyConfig, attempt: u32) -> Duration {
    let delay = match config.strategy {
        RetryStrategyType::Immediate => Duration::ZERO,
        RetryStrategyType::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        RetryStrategyType::Linear => config.base_delay.saturating_mul(attempt),
        RetryStrategyType::Constant => config.base_delay,
    };

    let capped = delay.min(config.max_delay);

    if config.jitter > 0.0 {
        apply_jitter(capped, config.jitter)
    } else {
        capped
    }
}

/// Jitter factor of 0.5 means delay * (0.5 to 1.5).
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    let jitter_range = 2.0 * jitter;
    let random_factor = 1.0 - jitter + (rand::random::<f64>() * jitter_range);
    let millis = (delay.as_millis() as f64 * random_factor).round().max(0.0) as u64;
    Duration::from_millis(millis)
}

/// Runs a fallible step with the configured retry behavior.
pub struct RetryExecutor {
    config: RetryStrategyConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryStrategyConfig) -> Self {
        Self { config }
    }

    pub fn from_policy(policy: RetryPolicy) -> Self {
        Self::new(policy.to_config())
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Execute `operation` until it succeeds or the attempt budget runs out.
    ///
    /// The operation receives the current attempt number (starting at 1).
    pub fn run<T, E, F>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
    {
        self.run_while(operation, |_| true)
    }

    /// Like [`RetryExecutor::run`], but stops early when `should_retry`
    /// rejects an error.
    pub fn run_while<T, E, F, P>(&self, mut operation: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1;

        loop {
            match operation(attempt) {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempt >= self.max_attempts() || !should_retry(&e) {
                        return Err(e);
                    }

                    std::thread::sleep(calculate_delay(&self.config, attempt));
                    attempt += 1;
                }
            }
        }
    }

    /// Like [`RetryExecutor::run_while`], but backoff sleeps are clamped to
    /// `deadline`. Once it passes, the error from `timed_out` is returned
    /// instead of starting another attempt.
    pub fn run_within<T, E, F, P, D>(
        &self,
        deadline: Deadline,
        mut operation: F,
        should_retry: P,
        timed_out: D,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
        D: FnOnce() -> E,
    {
        let mut attempt = 1;

        loop {
            match operation(attempt) {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempt >= self.max_attempts() || !should_retry(&e) {
                        return Err(e);
                    }
                    if deadline.is_expired()
                        || !deadline.sleep(calculate_delay(&self.config, attempt))
                    {
                        return Err(timed_out());
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Spacing and budget for upload status polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSchedule {
    /// Maximum number of status requests.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Fixed delay between requests.
    #[serde(default = "default_poll_delay", with = "humantime_serde")]
    pub delay: Duration,
    /// When nonzero, the delay becomes `artifact_size_mb / coefficient` seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_coefficient: Option<u64>,
}

fn default_max_requests() -> u32 {
    DEFAULT_MAX_STATUS_REQUESTS
}

fn default_poll_delay() -> Duration {
    DEFAULT_STATUS_REQUEST_DELAY
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_STATUS_REQUESTS,
            delay: DEFAULT_STATUS_REQUEST_DELAY,
            delay_coefficient: None,
        }
    }
}

impl PollSchedule {
    /// Delay between status requests for an artifact of `artifact_size` bytes.
    pub fn delay_for(&self, artifact_size: u64) -> Duration {
        match self.delay_coefficient {
            Some(coefficient) if coefficient > 0 => {
                let size_mb = artifact_size as f64 / BYTES_PER_MEGABYTE;
                Duration::from_secs_f64(size_mb / coefficient as f64)
            }
            _ => self.delay,
        }
    }
}

/// Overall time budget of an operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never expires.
    pub fn none() -> Self {
        Self { at: None }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    pub fn after(timeout: Duration) -> Self {
        Self::at(Instant::now() + timeout)
    }

    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map(Self::after).unwrap_or_default()
    }

    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Shorten `wait` so it does not run past the deadline.
    pub fn clamp(&self, wait: Duration) -> Duration {
        match self.remaining() {
            Some(left) => wait.min(left),
            None => wait,
        }
    }

    /// Sleep for `wait`, clamped to the deadline. Returns `false` when the
    /// deadline has passed after sleeping.
    pub fn sleep(&self, wait: Duration) -> bool {
        std::thread::sleep(self.clamp(wait));
        !self.is_expired()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn no_wait(max_attempts: u32) -> RetryStrategyConfig {
        RetryStrategyConfig {
            strategy: RetryStrategyType::Immediate,
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_retry_policy_none_is_single_attempt() {
        let config = RetryPolicy::None.to_config();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(RetryPolicy::default(), RetryPolicy::None);
    }

    #[test]
    fn test_retry_policy_to_config_default() {
        let config = RetryPolicy::Default.to_config();
        assert_eq!(config.strategy, RetryStrategyType::Exponential);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_calculate_delay_strategies() {
        let mut config = RetryStrategyConfig {
            strategy: RetryStrategyType::Linear,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
            max_attempts: 10,
        };
        assert_eq!(calculate_delay(&config, 5), Duration::from_secs(5));
        assert_eq!(calculate_delay(&config, 15), Duration::from_secs(10));

        config.strategy = RetryStrategyType::Constant;
        assert_eq!(calculate_delay(&config, 7), Duration::from_secs(1));

        config.strategy = RetryStrategyType::Immediate;
        assert_eq!(calculate_delay(&config, 3), Duration::ZERO);

        config.strategy = RetryStrategyType::Exponential;
        assert_eq!(calculate_delay(&config, 4), Duration::from_secs(8));
        assert_eq!(calculate_delay(&config, 9), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Constant,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            jitter: 0.5,
            max_attempts: 10,
        };

        for _ in 0..100 {
            let delay = calculate_delay(&config, 1);
            assert!(delay >= Duration::from_millis(5000));
            assert!(delay <= Duration::from_millis(15000));
        }
    }

    #[test]
    fn test_retry_executor_success_after_retries() {
        let executor = RetryExecutor::new(no_wait(5));
        let mut attempts = 0;
        let result = executor.run(|attempt| {
            attempts = attempt;
            if attempt < 3 { Err("transient") } else { Ok("sent") }
        });
        assert_eq!(result, Ok("sent"));
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_retry_executor_gives_up_after_budget() {
        let executor = RetryExecutor::new(no_wait(3));
        let calls = Cell::new(0);
        let result = executor.run(|_| {
            calls.set(calls.get() + 1);
            Err::<(), _>("down")
        });
        assert_eq!(result, Err("down"));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_executor_zero_attempts_still_runs_once() {
        let executor = RetryExecutor::new(no_wait(0));
        let calls = Cell::new(0);
        let _ = executor.run(|_| {
            calls.set(calls.get() + 1);
            Err::<(), _>("down")
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_run_while_stops_on_rejected_error() {
        let executor = RetryExecutor::new(no_wait(5));
        let calls = Cell::new(0);
        let result = executor.run_while(
            |_| {
                calls.set(calls.get() + 1);
                Err::<(), _>("fatal")
            },
            |e| *e != "fatal",
        );
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_run_within_stops_backoff_at_deadline() {
        let executor = RetryExecutor::new(RetryStrategyConfig {
            strategy: RetryStrategyType::Constant,
            max_attempts: 5,
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(3),
            jitter: 0.0,
        });
        let calls = Cell::new(0);
        let started = Instant::now();

        let result = executor.run_within(
            Deadline::after(Duration::from_millis(100)),
            |_| {
                calls.set(calls.get() + 1);
                Err::<(), _>("busy")
            },
            |_| true,
            || "timed out",
        );

        assert_eq!(result, Err("timed out"));
        assert_eq!(calls.get(), 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_run_within_unbounded_uses_attempt_budget() {
        let executor = RetryExecutor::new(no_wait(3));
        let calls = Cell::new(0);
        let result = executor.run_within(
            Deadline::none(),
            |_| {
                calls.set(calls.get() + 1);
                Err::<(), _>("down")
            },
            |_| true,
            || "timed out",
        );
        assert_eq!(result, Err("down"));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_poll_schedule_fixed_delay() {
        let schedule = PollSchedule::default();
        assert_eq!(schedule.max_requests, 20);
        assert_eq!(schedule.delay_for(500 * 1024 * 1024), Duration::from_secs(1));

        let zero = PollSchedule {
            delay_coefficient: Some(0),
            ..PollSchedule::default()
        };
        assert_eq!(zero.delay_for(500 * 1024 * 1024), Duration::from_secs(1));
    }

    #[test]
    fn test_poll_schedule_size_based_delay() {
        let schedule = PollSchedule {
            max_requests: 5,
            delay: Duration::from_secs(1),
            delay_coefficient: Some(4),
        };
        assert_eq!(schedule.delay_for(20 * 1024 * 1024), Duration::from_secs(5));
        assert_eq!(schedule.delay_for(2 * 1024 * 1024), Duration::from_millis(500));
    }

    #[test]
    fn test_poll_schedule_deserializes_with_defaults() {
        let schedule: PollSchedule =
            serde_json::from_str(r#"{"delay":"250ms"}"#).expect("parse");
        assert_eq!(schedule.max_requests, 20);
        assert_eq!(schedule.delay, Duration::from_millis(250));
        assert!(schedule.delay_coefficient.is_none());
    }

    #[test]
    fn test_deadline_clamps_waits() {
        let unbounded = Deadline::none();
        assert!(!unbounded.is_expired());
        assert_eq!(unbounded.clamp(Duration::from_secs(9)), Duration::from_secs(9));

        let bounded = Deadline::after(Duration::from_secs(60));
        assert!(bounded.clamp(Duration::from_secs(600)) <= Duration::from_secs(60));

        let expired = Deadline::at(Instant::now());
        assert!(expired.is_expired());
        assert_eq!(expired.clamp(Duration::from_secs(5)), Duration::ZERO);
        assert!(!expired.sleep(Duration::from_secs(5)));
    }
}
