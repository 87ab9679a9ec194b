use crate::state::policy::BPS_MAX;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Retry budget for optimistic-concurrency conflicts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total commit attempts before a conflict is surfaced to the caller
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles each retry
    pub base_backoff_ms: u64,
    /// Upper bound for a single backoff sleep
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    /// Backoff to sleep after the given failed attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .base_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 5,
            base_backoff_ms: 5,
            max_backoff_ms: 200,
        }
    }
}

/// Booking and event-ticket economics knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingConfig {
    /// Minimum check-in rate (basis points) before a group event pays out
    pub checkin_threshold_bps: u16,
    /// How long after check-in an appearance mismatch may be reported
    pub mismatch_window_secs: u64,
    /// How early before the scheduled start check-in opens
    pub checkin_opens_before_secs: u64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        BookingConfig {
            checkin_threshold_bps: 7_000,
            mismatch_window_secs: 15 * 60,
            checkin_opens_before_secs: 15 * 60,
        }
    }
}

/// Per-minute session pricing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingConfig {
    pub standard_price_per_minute: u64,
    pub vip_price_per_minute: u64,
    /// Active sessions older than this are ended by `sweep`
    pub max_session_secs: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        BillingConfig {
            standard_price_per_minute: 20,
            vip_price_per_minute: 14,
            max_session_secs: 2 * 60 * 60,
        }
    }
}

/// Configuration for the token-ledger engine and CLI.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory path (default: `.token-ledger/` in current directory)
    pub data_dir: PathBuf,

    /// Output format: "human" (default) or "json"
    pub output_format: String,

    /// Log level: "info", "debug", "warn", "error" (default: "info")
    pub log_level: String,

    pub retry: RetryConfig,
    pub booking: BookingConfig,
    pub billing: BillingConfig,
}

impl Config {
    /// Create a new config with defaults
    pub fn new() -> Self {
        let data_dir = env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".token-ledger");

        Config {
            data_dir,
            output_format: "human".to_string(),
            log_level: "info".to_string(),
            retry: RetryConfig::default(),
            booking: BookingConfig::default(),
            billing: BillingConfig::default(),
        }
    }

    /// Create config with custom data directory
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Config {
            data_dir,
            ..Config::new()
        }
    }

    pub fn get_data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    pub fn set_data_dir(&mut self, dir: PathBuf) {
        self.data_dir = dir;
    }

    pub fn get_output_format(&self) -> &str {
        &self.output_format
    }

    /// Set output format ("human" or "json")
    pub fn set_output_format(&mut self, format: String) {
        self.output_format = format;
    }

    pub fn get_log_level(&self) -> &str {
        &self.log_level
    }

    pub fn set_log_level(&mut self, level: String) {
        self.log_level = level;
    }

    /// Append-only commit journal (carries the ledger entries)
    pub fn get_log_path(&self) -> PathBuf {
        self.data_dir.join("ledger.log")
    }

    /// Store snapshot (wallets, bookings, sessions, counters)
    pub fn get_state_path(&self) -> PathBuf {
        self.data_dir.join("state.bin")
    }

    /// Load config from environment variables
    ///
    /// Environment variables:
    /// - `TOKEN_LEDGER_DATA_DIR`: override data directory
    /// - `TOKEN_LEDGER_OUTPUT_FORMAT`: "human" or "json"
    /// - `TOKEN_LEDGER_LOG_LEVEL`: log level
    /// - `TOKEN_LEDGER_MAX_RETRIES`: commit attempts per operation
    /// - `TOKEN_LEDGER_CHECKIN_THRESHOLD_BPS`: group-event payout threshold
    /// - `TOKEN_LEDGER_STANDARD_PRICE` / `TOKEN_LEDGER_VIP_PRICE`: tokens per minute
    ///
    /// Unparseable or out-of-range numeric values are ignored and the
    /// default kept.
    pub fn from_env() -> Self {
        let mut config = Config::new();

        if let Ok(dir) = env::var("TOKEN_LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Ok(format) = env::var("TOKEN_LEDGER_OUTPUT_FORMAT") {
            config.output_format = format;
        }

        if let Ok(level) = env::var("TOKEN_LEDGER_LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(n) = env_number("TOKEN_LEDGER_MAX_RETRIES") {
            config.retry.max_attempts = n;
        }

        if let Some(bps) = env::var("TOKEN_LEDGER_CHECKIN_THRESHOLD_BPS")
            .ok()
            .and_then(|v| parse_bps(&v))
        {
            config.booking.checkin_threshold_bps = bps;
        }

        if let Some(price) = env_number("TOKEN_LEDGER_STANDARD_PRICE") {
            config.billing.standard_price_per_minute = price;
        }

        if let Some(price) = env_number("TOKEN_LEDGER_VIP_PRICE") {
            config.billing.vip_price_per_minute = price;
        }

        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// A basis-point value no larger than 100%.
fn parse_bps(raw: &str) -> Option<u16> {
    raw.trim().parse::<u16>().ok().filter(|bps| *bps <= BPS_MAX)
}
