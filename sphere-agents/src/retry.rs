//! Retry with exponential backoff for transient provider errors.
//!
//! Rate limits, timeouts and network failures are retried; auth failures,
//! invalid responses and local configuration errors are returned on the
//! first attempt. Every attempt runs under its own timeout.

use rand::Rng;
use std::time::Duration;
use tracing::warn;

use crate::{CompletionRequest, ProviderError, ProviderGateway};

/// Configuration for retry behavior on transient provider errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial one).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Backoff is capped here.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Timeout applied to each individual attempt.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Backoff before retry number `retry` (1-based), without jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn jittered(&self, retry: u32) -> Duration {
        let delay = self.backoff(retry);
        let spread = (delay.as_millis() as u64) / 10;
        if spread == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

/// Send a request, retrying transient failures per `policy`.
///
/// Returns the last error once the attempt ceiling is reached.
pub async fn send_with_retry(
    gateway: &dyn ProviderGateway,
    request: &CompletionRequest,
    policy: &RetryPolicy,
) -> Result<String, ProviderError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = match tokio::time::timeout(policy.request_timeout, gateway.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "no response within {:?}",
                policy.request_timeout
            ))),
        };

        let error = match result {
            Ok(text) => return Ok(text),
            Err(e) => e,
        };

        if !error.is_retryable() || attempt >= max_attempts {
            warn!(
                "{} call failed (attempt {}/{}), giving up: {}",
                gateway.provider_name(),
                attempt,
                max_attempts,
                error
            );
            return Err(error);
        }

        let delay = policy.jittered(attempt);
        warn!(
            "{} call failed (attempt {}/{}): {}; retrying in {:?}",
            gateway.provider_name(),
            attempt,
            max_attempts,
            error,
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays a fixed script of outcomes, counting calls
    struct ScriptedBackend {
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        calls: Mutex<u32>,
        delay: Duration,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl ProviderGateway for ScriptedBackend {
        async fn send(&self, _request: &CompletionRequest) -> Result<String, ProviderError> {
            *self.calls.lock() += 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok("default".to_string()))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }

        fn provider_name(&self) -> &str {
            "Mock"
        }
    }

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(attempts)
            .with_base_delay(Duration::from_millis(1))
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new("system", "user")
    }

    #[tokio::test]
    async fn test_retries_transient_errors_until_success() {
        let backend = ScriptedBackend::new(vec![
            Err(ProviderError::RateLimit("429".into())),
            Err(ProviderError::Network("reset".into())),
            Ok("finally".into()),
        ]);

        let result = send_with_retry(&backend, &request(), &fast_policy(3)).await;
        assert_eq!(result.unwrap(), "finally");
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_stops_at_attempt_ceiling() {
        let backend = ScriptedBackend::new(vec![
            Err(ProviderError::Network("a".into())),
            Err(ProviderError::Network("b".into())),
            Err(ProviderError::Network("c".into())),
            Ok("too late".into()),
        ]);

        let result = send_with_retry(&backend, &request(), &fast_policy(3)).await;
        assert_eq!(result, Err(ProviderError::Network("c".into())));
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        for fatal in [
            ProviderError::Auth("bad key".into()),
            ProviderError::InvalidResponse("garbage".into()),
        ] {
            let backend = ScriptedBackend::new(vec![Err(fatal.clone()), Ok("never".into())]);
            let result = send_with_retry(&backend, &request(), &fast_policy(5)).await;
            assert_eq!(result, Err(fatal));
            assert_eq!(backend.calls(), 1);
        }
    }

    #[tokio::test]
    async fn test_attempt_timeout_maps_to_timeout() {
        let mut backend = ScriptedBackend::new(vec![]);
        backend.delay = Duration::from_millis(200);

        let policy = fast_policy(2).with_request_timeout(Duration::from_millis(20));
        let result = send_with_retry(&backend, &request(), &policy).await;

        assert!(matches!(result, Err(ProviderError::Timeout(_))));
        assert_eq!(backend.calls(), 2);
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
    }

    #[test]
    fn test_backoff_saturates_for_large_retry_counts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(70), policy.max_delay);
        assert_eq!(policy.backoff(1000), policy.max_delay);
        assert_eq!(policy.backoff(u32::MAX), policy.max_delay);
        assert_eq!(policy.jittered(1000).min(policy.max_delay), policy.max_delay);
    }
}
