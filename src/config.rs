use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::query::refresher::RefreshSettings;

#[derive(Debug, Clone)]
pub struct Config {
    // HTTP surface
    pub bind_address: String,
    pub port: u16,

    // Query engine
    pub query_bind: String,
    pub query_expiry_ms: u64,
    pub dispatcher_idle_ms: u64,
    pub detail_interval_ms: u64,
    pub detail_window_ms: u64,
    pub detail_poll_ms: u64,
    pub tick_interval_ms: u64,

    // List sources
    pub sources_dir: PathBuf,
    pub http_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 7777,
            query_bind: "0.0.0.0:0".to_string(),
            query_expiry_ms: 5000,
            dispatcher_idle_ms: 20,
            detail_interval_ms: 2000,
            detail_window_ms: 1000,
            detail_poll_ms: 25,
            tick_interval_ms: 1000,
            sources_dir: PathBuf::from("./sources"),
            http_timeout_secs: 10,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: env_or("BIND_ADDRESS", defaults.bind_address),
            port: env_or("PORT", defaults.port),
            query_bind: env_or("QUERY_BIND", defaults.query_bind),
            query_expiry_ms: env_or("QUERY_EXPIRY_MS", defaults.query_expiry_ms),
            dispatcher_idle_ms: env_or("DISPATCHER_IDLE_MS", defaults.dispatcher_idle_ms),
            detail_interval_ms: env_or("DETAIL_INTERVAL_MS", defaults.detail_interval_ms),
            detail_window_ms: env_or("DETAIL_WINDOW_MS", defaults.detail_window_ms),
            detail_poll_ms: env_or("DETAIL_POLL_MS", defaults.detail_poll_ms),
            tick_interval_ms: env_or("TICK_INTERVAL_MS", defaults.tick_interval_ms),
            sources_dir: env_or("SOURCES_DIR", defaults.sources_dir),
            http_timeout_secs: env_or("HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
        }
    }

    pub fn bind(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn query_expiry(&self) -> Duration {
        Duration::from_millis(self.query_expiry_ms)
    }

    pub fn dispatcher_idle(&self) -> Duration {
        Duration::from_millis(self.dispatcher_idle_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            response_window: Duration::from_millis(self.detail_window_ms),
            poll_step: Duration::from_millis(self.detail_poll_ms),
            interval: Duration::from_millis(self.detail_interval_ms),
        }
    }
}
