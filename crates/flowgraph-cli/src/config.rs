//! Environment-driven configuration (§6 ambient config stack): read via
//! `dotenvy` + plain `std::env`, mirroring the teacher's worker binary.

use std::time::Duration;

use flowgraph_cache::CacheConfig;

pub struct CliConfig {
    pub cache: CacheConfig,
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl CliConfig {
    pub fn from_env() -> Self {
        let defaults = CacheConfig::default();
        Self {
            cache: CacheConfig {
                result_ttl: env_secs("FLOWGRAPH_RESULT_TTL_SECS", defaults.result_ttl),
                heartbeat_ttl: env_secs("FLOWGRAPH_HEARTBEAT_TTL_SECS", defaults.heartbeat_ttl),
                dlq_ttl: env_secs("FLOWGRAPH_DLQ_TTL_SECS", defaults.dlq_ttl),
                event_log_max_len: std::env::var("FLOWGRAPH_EVENT_LOG_MAX_LEN")
                    .ok()
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(defaults.event_log_max_len),
            },
        }
    }
}
