use std::env;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::endpoints::{builtin_seeds, Endpoint};
use crate::limiter::BucketSettings;
use crate::payment::PaymentSettings;
use crate::session::SessionSettings;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DB_PATH: &str = "./store.db";
const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TX_PRICE: i64 = 1;
const DEFAULT_TX_BUFFER: i64 = 10;
const DEFAULT_BUCKET_CAPACITY: u32 = 5;
const DEFAULT_REFILL_INTERVAL_MS: u64 = 500;
const DEFAULT_SESSION_IDLE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Consumer account charged for every session until clients carry their own identity.
pub const DEFAULT_CONSUMER_ACCOUNT: &str =
    "JXBIEWEBYCZOKBHIGDXT9VNLUTGCZGXJLCSAUTCRGEEHFETHRIVMTBNKGPQUXNVSCLIWEKHWFBASGYFLWZOGJE9YPX";

/// Everything the metering pipeline needs to decide on a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterSettings {
    /// Account whose balance pays for proxied requests.
    pub consumer_account: String,
    pub payment: PaymentSettings,
    pub bucket: BucketSettings,
    pub sessions: SessionSettings,
    /// Accrue debt on requests the rate limiter turns away as well.
    pub charge_throttled: bool,
}

impl Default for MeterSettings {
    fn default() -> Self {
        Self {
            consumer_account: DEFAULT_CONSUMER_ACCOUNT.to_string(),
            payment: PaymentSettings::default(),
            bucket: BucketSettings::default(),
            sessions: SessionSettings::default(),
            charge_throttled: true,
        }
    }
}

#[derive(Clone)]
pub struct ProxyConfig {
    /// Server port
    pub port: u16,
    /// SQLite store path
    pub db_path: String,
    /// Ledger node queried for balances (None = fixed in-memory balances, dev mode)
    pub balance_node_url: Option<String>,
    pub oracle_timeout: Duration,
    /// Time allowed for the upstream to send its response head
    pub upstream_timeout: Duration,
    pub meter: MeterSettings,
    /// JSON file with the endpoints to seed (None = built-in seeds)
    pub seed_file: Option<String>,
    /// Bearer token for endpoint writes (None = writes disabled)
    pub admin_token: Option<String>,
    /// Bearer token required for /metrics (None = public)
    pub metrics_token: Option<String>,
    /// Largest request body forwarded upstream
    pub max_body_bytes: usize,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("port", &self.port)
            .field("db_path", &self.db_path)
            .field("balance_node_url", &self.balance_node_url)
            .field("oracle_timeout", &self.oracle_timeout)
            .field("upstream_timeout", &self.upstream_timeout)
            .field("meter", &self.meter)
            .field("seed_file", &self.seed_file)
            .field(
                "admin_token",
                &self.admin_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db_path: DEFAULT_DB_PATH.to_string(),
            balance_node_url: None,
            oracle_timeout: Duration::from_secs(DEFAULT_ORACLE_TIMEOUT_SECS),
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            meter: MeterSettings::default(),
            seed_file: None,
            admin_token: None,
            metrics_token: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Parse `name` from `lookup`, falling back to `default` when unset or empty.
fn parse_var<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).filter(|s| !s.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        None => Ok(default),
    }
}

fn parse_flag<F>(lookup: &F, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) if v == "true" || v == "1" || v == "yes" => Ok(true),
        Some(v) if v == "false" || v == "0" || v == "no" => Ok(false),
        Some(value) => Err(ConfigError::InvalidValue { name, value }),
    }
}

fn optional<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = parse_var(&lookup, "PORT", DEFAULT_PORT)?;
        let db_path = optional(&lookup, "DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let balance_node_url = optional(&lookup, "BALANCE_NODE_URL");
        if let Some(ref url) = balance_node_url {
            Url::parse(url).map_err(|_| ConfigError::InvalidUrl(url.clone()))?;
        }

        let oracle_timeout = Duration::from_secs(parse_var(
            &lookup,
            "ORACLE_TIMEOUT_SECS",
            DEFAULT_ORACLE_TIMEOUT_SECS,
        )?);
        let upstream_timeout = Duration::from_secs(parse_var(
            &lookup,
            "UPSTREAM_TIMEOUT_SECS",
            DEFAULT_UPSTREAM_TIMEOUT_SECS,
        )?);

        let price: i64 = parse_var(&lookup, "TX_PRICE", DEFAULT_TX_PRICE)?;
        let buffer: i64 = parse_var(&lookup, "TX_BUFFER", DEFAULT_TX_BUFFER)?;
        if price < 0 {
            return Err(ConfigError::OutOfRange("TX_PRICE must not be negative"));
        }
        if buffer < 0 {
            return Err(ConfigError::OutOfRange("TX_BUFFER must not be negative"));
        }

        let capacity: u32 = parse_var(&lookup, "BUCKET_CAPACITY", DEFAULT_BUCKET_CAPACITY)?;
        let capacity = NonZeroU32::new(capacity)
            .ok_or(ConfigError::OutOfRange("BUCKET_CAPACITY must be at least 1"))?;
        let refill_ms: u64 = parse_var(&lookup, "REFILL_INTERVAL_MS", DEFAULT_REFILL_INTERVAL_MS)?;
        if refill_ms == 0 {
            return Err(ConfigError::OutOfRange(
                "REFILL_INTERVAL_MS must be at least 1",
            ));
        }

        let idle_secs: u64 = parse_var(
            &lookup,
            "SESSION_IDLE_TIMEOUT_SECS",
            DEFAULT_SESSION_IDLE_TIMEOUT_SECS,
        )?;
        let sweep_secs: u64 =
            parse_var(&lookup, "SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?;
        if sweep_secs == 0 {
            return Err(ConfigError::OutOfRange(
                "SWEEP_INTERVAL_SECS must be at least 1",
            ));
        }

        let meter = MeterSettings {
            consumer_account: optional(&lookup, "CONSUMER_ACCOUNT")
                .unwrap_or_else(|| DEFAULT_CONSUMER_ACCOUNT.to_string()),
            payment: PaymentSettings { price, buffer },
            bucket: BucketSettings {
                capacity,
                refill_interval: Duration::from_millis(refill_ms),
            },
            sessions: SessionSettings {
                idle_timeout: Duration::from_secs(idle_secs),
                sweep_interval: Duration::from_secs(sweep_secs),
            },
            charge_throttled: parse_flag(&lookup, "CHARGE_THROTTLED", true)?,
        };

        let seed_file = optional(&lookup, "SEED_FILE");
        let admin_token = optional(&lookup, "ADMIN_TOKEN");
        let metrics_token = optional(&lookup, "METRICS_TOKEN");
        let max_body_bytes = parse_var(&lookup, "MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)?;

        if balance_node_url.is_none() {
            tracing::warn!(
                "BALANCE_NODE_URL not set: balances come from a fixed in-memory oracle (dev mode)"
            );
        }
        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set: /metrics endpoint is publicly accessible");
        }
        if admin_token.is_none() {
            tracing::info!("ADMIN_TOKEN not set: endpoint writes over HTTP are disabled");
        }

        Ok(Self {
            port,
            db_path,
            balance_node_url,
            oracle_timeout,
            upstream_timeout,
            meter,
            seed_file,
            admin_token,
            metrics_token,
            max_body_bytes,
        })
    }

    /// Endpoints to seed at startup: the seed file if configured, else the built-in set.
    pub fn seeds(&self) -> Result<Vec<Endpoint>, ConfigError> {
        match self.seed_file {
            Some(ref path) => load_seeds(path),
            None => Ok(builtin_seeds()),
        }
    }
}

/// Read a JSON array of `{id, url, address}` records.
pub fn load_seeds(path: &str) -> Result<Vec<Endpoint>, ConfigError> {
    let raw = std::fs::read(path)
        .map_err(|e| ConfigError::Seeds(format!("failed to read {path}: {e}")))?;
    serde_json::from_slice(&raw)
        .map_err(|e| ConfigError::Seeds(format!("failed to parse {path}: {e}")))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("out of range: {0}")]
    OutOfRange(&'static str),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("seed file: {0}")]
    Seeds(String),
}
