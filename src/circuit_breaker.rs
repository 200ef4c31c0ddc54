use failsafe::backoff::{self, EqualJittered};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::{Config, StateMachine};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Breaker guarding the CRM relay webhook.
pub type RelayCircuitBreaker = StateMachine<ConsecutiveFailures<EqualJittered>, ()>;

/// Creates the circuit breaker for the CRM relay.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Equal-jittered exponential backoff from 10s to 60s before
///   attempting recovery.
///
/// # States
///
/// - **CLOSED**: Normal operation, requests pass through.
/// - **OPEN**: Too many failures, requests fail fast.
/// - **HALF_OPEN**: Testing if service recovered.
pub fn create_relay_circuit_breaker() -> RelayCircuitBreaker {
    let backoff_strategy = backoff::equal_jittered(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

/// Bounded retry for idempotent outbound calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            attempts,
            ..Self::default()
        }
    }

    /// Equal-jittered exponential delays between `base_delay` and `max_delay`.
    ///
    /// failsafe's backoff only accepts whole seconds of at least 1s, so the
    /// schedule is built with one second standing for one millisecond and
    /// scaled back down. Delays resolve to whole milliseconds.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let start_ms = u64::try_from(self.base_delay.as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        let max_ms = u64::try_from(self.max_delay.as_millis())
            .unwrap_or(u64::MAX)
            .max(start_ms);
        backoff::equal_jittered(Duration::from_secs(start_ms), Duration::from_secs(max_ms))
            .map(|scaled| Duration::from_millis(scaled.as_secs()))
    }
}

/// Run `operation` until it succeeds or `policy.attempts` is exhausted,
/// sleeping an equal-jittered exponential delay between attempts.
///
/// # Arguments
///
/// * `label` - Name used in log lines.
/// * `policy` - Attempt count and delay bounds.
/// * `operation` - Produces a fresh future per attempt.
pub async fn retry_with_backoff<T, E, F, Fut>(
    label: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.attempts.max(1);
    let mut delays = policy.delays();
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt < attempts => {
                let delay = delays.next().unwrap_or(policy.max_delay);
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    label,
                    attempt,
                    attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!("{} failed after {} attempts: {}", label, attempts, e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::{CircuitBreaker, Error};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = create_relay_circuit_breaker();

        for _ in 0..5 {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("relay down"));
            assert!(result.is_err());
        }

        let result: Result<(), Error<&str>> = cb.call(|| Ok::<(), &str>(()));
        match result {
            Err(Error::Rejected) => {}
            _ => panic!("Expected circuit to be open and reject requests"),
        }
    }

    #[test]
    fn test_circuit_breaker_allows_success() {
        let cb = create_relay_circuit_breaker();
        let result: Result<i32, Error<&str>> = cb.call(|| Ok::<i32, &str>(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_with_backoff("test", fast_policy(3), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(format!("failure {}", n))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_with_backoff("test", fast_policy(2), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("always".to_string())
        })
        .await;

        assert_eq!(result, Err("always".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_delays_stay_within_policy_bounds() {
        let policy = RetryPolicy::default();
        for delay in policy.delays().take(10) {
            assert!(delay <= policy.max_delay, "{:?} exceeds max", delay);
        }

        let sub_millisecond = RetryPolicy {
            attempts: 2,
            base_delay: Duration::from_micros(10),
            max_delay: Duration::ZERO,
        };
        assert!(sub_millisecond.delays().next().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_default_policy() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> =
            retry_with_backoff("test", RetryPolicy::default(), || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("failure {}", n))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _: Result<(), String> = retry_with_backoff("test", fast_policy(0), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("nope".to_string())
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
