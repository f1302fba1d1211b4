use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Environment variable prefix for every config key.
const ENV_PREFIX: &str = "QUILL_";

/// All quill client parameters. Loaded from `QUILL_*` environment variables;
/// anything unset or unparsable keeps its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuillCfg {
    // endpoints
    pub api_base_url: String,
    pub channel_url: String,

    // reply watchdog
    pub watchdog_secs: u64,

    // transient-error retry
    pub max_retries: u32,
    pub base_retry_delay_secs: u64,

    // http
    pub http_timeout_secs: u64,

    // tables
    pub items_per_page: usize,

    // logging
    pub log_file: String,
}

impl Default for QuillCfg {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            channel_url: String::new(),
            watchdog_secs: 60,
            max_retries: 5,
            base_retry_delay_secs: 1,
            http_timeout_secs: 30,
            items_per_page: 10,
            log_file: "/tmp/quill.log".into(),
        }
    }
}

impl QuillCfg {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        let map: HashMap<String, String> = std::env::vars()
            .filter_map(|(k, v)| k.strip_prefix(ENV_PREFIX).map(|k| (k.to_lowercase(), v)))
            .collect();
        Self::from_map(&map)
    }

    pub fn from_map(m: &HashMap<String, String>) -> Self {
        let d = Self::default();
        Self {
            api_base_url: get_or(m, "api_base_url", d.api_base_url),
            channel_url: get_or(m, "channel_url", d.channel_url),
            watchdog_secs: get_or(m, "watchdog_secs", d.watchdog_secs),
            max_retries: get_or(m, "max_retries", d.max_retries),
            base_retry_delay_secs: get_or(m, "base_retry_delay_secs", d.base_retry_delay_secs),
            http_timeout_secs: get_or(m, "http_timeout_secs", d.http_timeout_secs),
            items_per_page: get_or(m, "items_per_page", d.items_per_page).max(1),
            log_file: get_or(m, "log_file", d.log_file),
        }
    }

    pub fn to_entries(&self) -> Vec<(&str, String, &str)> {
        vec![
            ("api_base_url", self.api_base_url.clone(), "REST API base URL"),
            ("channel_url", self.channel_url.clone(), "Duplex channel (websocket) URL"),
            ("watchdog_secs", self.watchdog_secs.to_string(), "Seconds to wait for a streamed reply"),
            ("max_retries", self.max_retries.to_string(), "Retries for throttled model replies"),
            ("base_retry_delay_secs", self.base_retry_delay_secs.to_string(), "First retry delay, doubled per retry"),
            ("http_timeout_secs", self.http_timeout_secs.to_string(), "REST request timeout seconds"),
            ("items_per_page", self.items_per_page.to_string(), "Table rows per page"),
            ("log_file", self.log_file.clone(), "JSON log file when RUST_LOG is set"),
        ]
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_secs(self.watchdog_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Delay before the retry that follows `retries` earlier retries.
    pub fn retry_delay(&self, retries: u32) -> Duration {
        let factor = 2u64.saturating_pow(retries);
        Duration::from_secs(self.base_retry_delay_secs.saturating_mul(factor))
    }
}

fn get_or<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    map.get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
