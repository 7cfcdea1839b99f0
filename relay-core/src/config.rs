use chrono_tz::Tz;
use config::{Config, ConfigError, File};
use serde::Deserialize;

/// Upstream feed connection settings
#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    /// Base URL of the per-symbol aggregate-trade stream endpoint
    #[serde(default = "default_ws_url_base")]
    pub ws_url_base: String,
    /// Delay before the connection supervisor starts, in seconds
    #[serde(default = "default_supervisor_initial_delay_secs")]
    pub supervisor_initial_delay_secs: u64,
    /// Interval between supervisor liveness checks, in seconds
    #[serde(default = "default_supervisor_interval_secs")]
    pub supervisor_interval_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url_base: default_ws_url_base(),
            supervisor_initial_delay_secs: default_supervisor_initial_delay_secs(),
            supervisor_interval_secs: default_supervisor_interval_secs(),
        }
    }
}

fn default_ws_url_base() -> String {
    "wss://stream.binance.com:9443/ws".to_string()
}
fn default_supervisor_initial_delay_secs() -> u64 {
    10
}
fn default_supervisor_interval_secs() -> u64 {
    20
}

/// Redis connection settings (bus and rolling-window store)
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

/// Aggregation engine settings
#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisSettings {
    /// Minimum seconds between aggregation cycles for one symbol
    #[serde(default = "default_analysis_interval_secs")]
    pub interval_secs: u64,
    /// Interval of the proactive aggregation trigger, in seconds
    #[serde(default = "default_trigger_interval_secs")]
    pub trigger_interval_secs: u64,
    /// Minimum trades in a window before the trigger runs a cycle
    #[serde(default = "default_min_trades")]
    pub min_trades: usize,
    /// Maximum trades retained per symbol in the rolling window
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    /// Trades read from the window per aggregation cycle
    #[serde(default = "default_window_read_limit")]
    pub window_read_limit: usize,
    /// Time-to-live of the window and analysis log keys, in seconds
    #[serde(default = "default_window_ttl_secs")]
    pub window_ttl_secs: i64,
    /// Notional width of each regular size bucket
    #[serde(default = "default_bucket_width")]
    pub bucket_width: f64,
    /// Notional at or above which a trade counts as a large trade
    #[serde(default = "default_large_trade_threshold")]
    pub large_trade_threshold: f64,
    /// Volume imbalance above which the volatility flag is raised
    #[serde(default = "default_volatility_threshold")]
    pub volatility_threshold: f64,
    /// Time zone defining the trading day (e.g., "Asia/Seoul")
    #[serde(
        deserialize_with = "tz_serde::deserialize",
        default = "default_timezone"
    )]
    pub timezone: Tz,
    /// Local hour at which the trading day starts and history resets
    #[serde(default = "default_day_start_hour")]
    pub day_start_hour: u32,
    /// Local minute of the trading-day boundary
    #[serde(default = "default_day_start_minute")]
    pub day_start_minute: u32,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_analysis_interval_secs(),
            trigger_interval_secs: default_trigger_interval_secs(),
            min_trades: default_min_trades(),
            window_capacity: default_window_capacity(),
            window_read_limit: default_window_read_limit(),
            window_ttl_secs: default_window_ttl_secs(),
            bucket_width: default_bucket_width(),
            large_trade_threshold: default_large_trade_threshold(),
            volatility_threshold: default_volatility_threshold(),
            timezone: default_timezone(),
            day_start_hour: default_day_start_hour(),
            day_start_minute: default_day_start_minute(),
        }
    }
}

fn default_analysis_interval_secs() -> u64 {
    10
}
fn default_trigger_interval_secs() -> u64 {
    5
}
fn default_min_trades() -> usize {
    10
}
fn default_window_capacity() -> usize {
    1000
}
fn default_window_read_limit() -> usize {
    100
}
fn default_window_ttl_secs() -> i64 {
    86_400
}
fn default_bucket_width() -> f64 {
    10_000.0
}
fn default_large_trade_threshold() -> f64 {
    100_000.0
}
fn default_volatility_threshold() -> f64 {
    1_000.0
}
fn default_timezone() -> Tz {
    chrono_tz::Asia::Seoul
}
fn default_day_start_hour() -> u32 {
    8
}
fn default_day_start_minute() -> u32 {
    0
}

/// Custom serde module for chrono_tz::Tz
mod tz_serde {
    use chrono_tz::Tz;
    use serde::{self, Deserialize, Deserializer};
    use std::str::FromStr;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Tz, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Tz::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Bus publisher settings
#[derive(Debug, Deserialize, Clone)]
pub struct PublisherSettings {
    /// Maximum serialized payload size accepted for publication, in bytes
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Maximum publish attempts per message
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff between attempts; attempt N waits N times this
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            max_message_bytes: default_max_message_bytes(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_max_message_bytes() -> usize {
    3000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    100
}

/// Downstream WebSocket server settings
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Request path accepted for WebSocket upgrades
    #[serde(default = "default_server_path")]
    pub path: String,
    /// Outbound message queue capacity per session
    #[serde(default = "default_session_buffer")]
    pub session_buffer: usize,
    /// Interval of the closed-session sweep, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            path: default_server_path(),
            session_buffer: default_session_buffer(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:9001".to_string()
}
fn default_server_path() -> String {
    "/ws/trade".to_string()
}
fn default_session_buffer() -> usize {
    256
}
fn default_sweep_interval_secs() -> u64 {
    30
}

/// Prometheus exposition settings
#[derive(Debug, Deserialize, Clone)]
pub struct MetricsSettings {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9100
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Symbols tracked upstream and fanned out downstream
    pub symbols: Vec<String>,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub analysis: AnalysisSettings,
    #[serde(default)]
    pub publisher: PublisherSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(true));

        if let Ok(redis_url) = std::env::var("REDIS_URL") {
            builder = builder.set_override("redis.url", redis_url)?;
        }

        let s = builder.build()?;
        s.try_deserialize()
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.is_empty() {
            return Err(ConfigError::Message(
                "no symbols configured for monitoring".to_string(),
            ));
        }
        if self.analysis.bucket_width <= 0.0 {
            return Err(ConfigError::Message(
                "analysis.bucket_width must be positive".to_string(),
            ));
        }
        if self.analysis.large_trade_threshold <= 0.0 {
            return Err(ConfigError::Message(
                "analysis.large_trade_threshold must be positive".to_string(),
            ));
        }
        if self.analysis.day_start_hour > 23 || self.analysis.day_start_minute > 59 {
            return Err(ConfigError::Message(
                "analysis.day_start_hour/minute out of range".to_string(),
            ));
        }
        if self.analysis.window_read_limit == 0 || self.analysis.window_capacity == 0 {
            return Err(ConfigError::Message(
                "analysis window sizes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let analysis = AnalysisSettings::default();
        assert_eq!(analysis.interval_secs, 10);
        assert_eq!(analysis.trigger_interval_secs, 5);
        assert_eq!(analysis.min_trades, 10);
        assert_eq!(analysis.window_capacity, 1000);
        assert_eq!(analysis.timezone, chrono_tz::Asia::Seoul);
        assert_eq!(analysis.day_start_hour, 8);

        let publisher = PublisherSettings::default();
        assert_eq!(publisher.max_message_bytes, 3000);
        assert_eq!(publisher.max_attempts, 3);
        assert_eq!(publisher.retry_delay_ms, 100);
    }

    #[test]
    fn validation_rejects_bad_configurations() {
        let mut settings = Settings {
            symbols: vec!["BTCUSDT".to_string()],
            feed: FeedConfig::default(),
            redis: RedisConfig::default(),
            analysis: AnalysisSettings::default(),
            publisher: PublisherSettings::default(),
            server: ServerSettings::default(),
            metrics: MetricsSettings::default(),
        };
        assert!(settings.validate().is_ok());

        settings.symbols.clear();
        assert!(settings.validate().is_err());

        settings.symbols.push("BTCUSDT".to_string());
        settings.analysis.bucket_width = 0.0;
        assert!(settings.validate().is_err());

        settings.analysis.bucket_width = 10_000.0;
        settings.analysis.day_start_hour = 24;
        assert!(settings.validate().is_err());
    }
}
