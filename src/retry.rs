use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_delay_ms() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        RetryPolicy {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` is exhausted,
/// sleeping a fixed delay between attempts. The last error is returned.
pub fn with_retry<T, E, F>(label: &str, policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Result<T, E>,
{
    with_retry_if(label, policy, |_| true, operation)
}

/// Like [`with_retry`], but gives up immediately on errors `retryable`
/// rejects.
pub fn with_retry_if<T, E, R, F>(
    label: &str,
    policy: &RetryPolicy,
    retryable: R,
    mut operation: F,
) -> Result<T, E>
where
    E: Display,
    R: Fn(&E) -> bool,
    F: FnMut() -> Result<T, E>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation() {
            Ok(value) => {
                log::debug!("{label} succeeded on attempt {attempt}");
                return Ok(value);
            }
            Err(e) if attempt < attempts && retryable(&e) => {
                log::warn!("{label} failed on attempt {attempt}/{attempts}: {e}");
                std::thread::sleep(policy.delay());
                attempt += 1;
            }
            Err(e) => {
                log::error!("{label} failed after {attempt} attempts: {e}");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(0))
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let mut calls = 0;
        let result: Result<u32, String> = with_retry("op", &fast(5), || {
            calls += 1;
            if calls < 3 {
                Err(format!("fail {calls}"))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(3));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_returns_last_error_when_exhausted() {
        let mut calls = 0;
        let result: Result<(), String> = with_retry("op", &fast(4), || {
            calls += 1;
            Err(format!("fail {calls}"))
        });
        assert_eq!(result, Err("fail 4".to_string()));
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let mut calls = 0;
        let _: Result<(), &str> = with_retry("op", &fast(0), || {
            calls += 1;
            Err("nope")
        });
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), String> = with_retry_if(
            "op",
            &fast(5),
            |e: &String| e.starts_with("transient"),
            || {
                calls += 1;
                Err("permanent".to_string())
            },
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.delay(), Duration::from_secs(1));
    }
}
