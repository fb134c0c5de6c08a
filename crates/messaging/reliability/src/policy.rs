//! Retry policy with bounded exponential backoff.
//!
//! Delay for retry `n` (1-based) is
//! `min(max_delay, initial_delay * multiplier^(n-1))`.

use std::time::Duration;

use crate::classifier::{FailureClassifier, FailureType};
use crate::config::DeadLetterConfig;
use crate::error::HandlerError;

/// Decides whether a failed message is retried and how long to wait.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the initial delivery.
    pub max_retry_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Growth factor per retry.
    pub multiplier: f64,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Whether `Unknown` failures are retried.
    pub retry_unknown: bool,
    classifier: FailureClassifier,
}

impl RetryPolicy {
    /// Creates a policy with the default settings (3 retries, 2s, x2, 60s cap).
    pub fn new() -> Self {
        Self {
            max_retry_attempts: 3,
            initial_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            retry_unknown: false,
            classifier: FailureClassifier::new(),
        }
    }

    /// Builds a policy from the `DeadLetter` configuration section.
    pub fn from_config(config: &DeadLetterConfig) -> Self {
        Self::new()
            .max_retry_attempts(config.max_retry_attempts)
            .initial_delay(config.initial_retry_delay())
            .multiplier(config.backoff_multiplier)
            .max_delay(config.max_retry_delay())
            .retry_unknown(config.retry_unknown_failures)
    }

    /// Sets the maximum retries.
    pub fn max_retry_attempts(mut self, max: u32) -> Self {
        self.max_retry_attempts = max;
        self
    }

    /// Sets the initial delay.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the backoff multiplier. Values below 1.0 are raised to 1.0.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            1.0
        };
        self
    }

    /// Sets the maximum delay.
    pub fn max_delay(mut self, max: Duration) -> Self {
        self.max_delay = max;
        self
    }

    /// Sets whether unknown failures are retried.
    pub fn retry_unknown(mut self, retry: bool) -> Self {
        self.retry_unknown = retry;
        self
    }

    /// Replaces the classifier.
    pub fn with_classifier(mut self, classifier: FailureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Returns the classifier used by this policy.
    pub fn classifier(&self) -> &FailureClassifier {
        &self.classifier
    }

    /// Classifies an error.
    pub fn classify(&self, error: &HandlerError) -> FailureType {
        self.classifier.classify(error)
    }

    /// Returns true if the error may be retried after `attempt_count` retries.
    pub fn should_retry(&self, error: &HandlerError, attempt_count: u32) -> bool {
        self.should_retry_type(self.classify(error), attempt_count)
    }

    /// Same as [`RetryPolicy::should_retry`] for an already classified failure.
    pub fn should_retry_type(&self, failure_type: FailureType, attempt_count: u32) -> bool {
        if attempt_count >= self.max_retry_attempts {
            return false;
        }

        match failure_type {
            FailureType::Transient => true,
            FailureType::Unknown => self.retry_unknown,
            FailureType::Permanent | FailureType::Critical => false,
        }
    }

    /// Computes the delay before retry `attempt_count` (1-based, 0 treated as 1).
    pub fn calculate_retry_delay(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.max(1) - 1;
        let cap = self.max_delay.as_secs_f64();

        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powf(exponent as f64);
        let secs = if scaled.is_finite() {
            scaled.clamp(0.0, cap)
        } else {
            cap
        };

        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_backoff_sequence() {
        let policy = RetryPolicy::new();

        assert_eq!(policy.calculate_retry_delay(1), Duration::from_secs(2));
        assert_eq!(policy.calculate_retry_delay(2), Duration::from_secs(4));
        assert_eq!(policy.calculate_retry_delay(3), Duration::from_secs(8));
        assert_eq!(policy.calculate_retry_delay(5), Duration::from_secs(32));
        assert_eq!(policy.calculate_retry_delay(6), Duration::from_secs(60));
        assert_eq!(policy.calculate_retry_delay(100), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_treated_as_first_retry() {
        let policy = RetryPolicy::new();
        assert_eq!(policy.calculate_retry_delay(0), policy.calculate_retry_delay(1));
    }

    #[test]
    fn test_huge_attempt_saturates_at_cap() {
        let policy = RetryPolicy::new().multiplier(10.0);
        assert_eq!(policy.calculate_retry_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_should_retry_by_classification() {
        let policy = RetryPolicy::new();

        assert!(policy.should_retry(&HandlerError::Timeout("t".into()), 0));
        assert!(policy.should_retry(&HandlerError::Timeout("t".into()), 2));
        assert!(!policy.should_retry(&HandlerError::Timeout("t".into()), 3));

        assert!(!policy.should_retry(&HandlerError::Validation("v".into()), 0));
        assert!(!policy.should_retry(&HandlerError::ResourceExhausted("m".into()), 0));
        assert!(!policy.should_retry(&HandlerError::other("X", "y"), 0));
    }

    #[test]
    fn test_unknown_retry_configurable() {
        let policy = RetryPolicy::new().retry_unknown(true);
        assert!(policy.should_retry(&HandlerError::other("X", "y"), 1));
        assert!(!policy.should_retry(&HandlerError::other("X", "y"), 3));
    }

    #[test]
    fn test_from_config() {
        let config = DeadLetterConfig {
            max_retry_attempts: 5,
            initial_retry_delay_seconds: 1.0,
            backoff_multiplier: 3.0,
            max_retry_delay_seconds: 20.0,
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&config);

        assert_eq!(policy.max_retry_attempts, 5);
        assert_eq!(policy.calculate_retry_delay(1), Duration::from_secs(1));
        assert_eq!(policy.calculate_retry_delay(2), Duration::from_secs(3));
        assert_eq!(policy.calculate_retry_delay(3), Duration::from_secs(9));
        assert_eq!(policy.calculate_retry_delay(4), Duration::from_secs(20));
    }

    #[test]
    fn test_oversized_config_does_not_panic() {
        let config = DeadLetterConfig {
            max_retry_delay_seconds: 1e20,
            initial_retry_delay_seconds: 1e19,
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_delay, Duration::from_secs(86_400));
        assert_eq!(policy.calculate_retry_delay(10), Duration::from_secs(86_400));
    }

    #[test]
    fn test_unbounded_cap_saturates() {
        let policy = RetryPolicy::new().max_delay(Duration::MAX).multiplier(10.0);
        assert_eq!(policy.calculate_retry_delay(u32::MAX), Duration::MAX);
    }

    fn failure_type() -> impl Strategy<Value = FailureType> {
        prop_oneof![
            Just(FailureType::Permanent),
            Just(FailureType::Critical),
        ]
    }

    proptest! {
        #[test]
        fn prop_permanent_and_critical_never_retry(ft in failure_type(), attempt in 1u32..1000) {
            let policy = RetryPolicy::new().max_retry_attempts(u32::MAX).retry_unknown(true);
            prop_assert!(!policy.should_retry_type(ft, attempt));
        }

        #[test]
        fn prop_transient_retries_below_max(max in 1u32..50, attempt in 0u32..50) {
            prop_assume!(attempt < max);
            let policy = RetryPolicy::new().max_retry_attempts(max);
            prop_assert!(policy.should_retry_type(FailureType::Transient, attempt));
        }

        #[test]
        fn prop_delay_monotonic_and_capped(
            initial_ms in 0u64..10_000,
            multiplier in 1.0f64..5.0,
            cap_ms in 10_000u64..600_000,
            n in 1u32..200,
        ) {
            let policy = RetryPolicy::new()
                .initial_delay(Duration::from_millis(initial_ms))
                .multiplier(multiplier)
                .max_delay(Duration::from_millis(cap_ms));

            let current = policy.calculate_retry_delay(n);
            let next = policy.calculate_retry_delay(n + 1);
            prop_assert!(current <= next);
            prop_assert!(next <= Duration::from_millis(cap_ms));
        }
    }
}
