use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry configuration for node execution (§3 "RetryPolicy", Table 7-A).
///
/// Delay at attempt `k` is `min(initial_delay * multiplier^k, max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "duration_secs_f64")]
    pub initial_delay: Duration,
    #[serde(with = "duration_secs_f64")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub retry_on_timeout: bool,
    pub retry_on_connection_error: bool,
    pub retry_on_server_error: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            retry_on_timeout: true,
            retry_on_connection_error: true,
            retry_on_server_error: true,
        }
    }
}

impl RetryPolicy {
    /// Triggers never retry (§3: "Triggers have `max_attempts = 1`").
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// AI-agent / LLM chat default (Table 7-A).
    pub fn ai_default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            ..Self::default()
        }
    }

    /// HTTP request default (Table 7-A).
    pub fn http_default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Classify an error message against the retry-class flags (§3:
    /// "substring match on the error message against well-known tokens").
    pub fn is_retryable(&self, error: &str, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        let lower = error.to_lowercase();
        if self.retry_on_timeout && lower.contains("timeout") {
            return true;
        }
        if self.retry_on_connection_error
            && (lower.contains("connection") || lower.contains("connect"))
        {
            return true;
        }
        if self.retry_on_server_error
            && ["500", "502", "503", "504"].iter().any(|c| error.contains(c))
        {
            return true;
        }
        false
    }
}

/// Default retry policy for a node type, per Table 7-A.
pub fn default_retry_policy(node_type: &str) -> RetryPolicy {
    match node_type {
        "httpRequest" => RetryPolicy::http_default(),
        "webhookTrigger" | "whatsappReceive" | "start" | "cronScheduler" => RetryPolicy::no_retry(),
        "aiAgent" | "chatAgent" | "openaiChatModel" | "anthropicChatModel" | "googleChatModel" => {
            RetryPolicy::ai_default()
        }
        _ => RetryPolicy::default(),
    }
}

mod duration_secs_f64 {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_backs_off_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        // attempt 10 would be 1024s, capped at max_delay
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn classifies_retryable_errors() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable("request timeout", 0));
        assert!(policy.is_retryable("connection refused", 0));
        assert!(policy.is_retryable("upstream returned 503", 0));
        assert!(!policy.is_retryable("invalid argument", 0));
    }

    #[test]
    fn exhausted_attempts_never_retry() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_retryable("timeout", 3));
    }

    #[test]
    fn default_policy_table() {
        assert_eq!(default_retry_policy("httpRequest").max_attempts, 3);
        assert_eq!(default_retry_policy("webhookTrigger").max_attempts, 1);
        assert_eq!(default_retry_policy("aiAgent").max_attempts, 2);
        assert_eq!(default_retry_policy("unknownType").max_attempts, 3);
    }
}
