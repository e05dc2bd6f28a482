//! Application configuration loaded from environment variables.

use std::time::Duration;

use checkout::CheckoutConfig;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `pretty` or `json` (default: `pretty`)
/// - `DATABASE_URL` — PostgreSQL storage when set, in-memory otherwise
/// - `STORE_CURRENCY` — currency passed to the payment provider (default: `"GBP"`)
/// - `PAYMENT_TIMEOUT_MS` — payment call deadline (default: `10000`)
/// - `COMMIT_TIMEOUT_MS` — unit of work commit deadline (default: `5000`)
/// - `RECONCILIATION_INTERVAL_SECS` — reversal sweep period (default: `30`)
/// - `REVERSAL_GRACE_SECS` — wait before reversing a captured payment (default: `60`)
/// - `SEED_INVENTORY` — `SKU=qty,SKU=qty` stock for the in-memory backend
///
/// Values that fail to parse fall back to their default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub currency: String,
    pub payment_timeout: Duration,
    pub commit_timeout: Duration,
    pub reconciliation_interval: Duration,
    pub reversal_grace: Duration,
    pub seed_inventory: Vec<(String, u32)>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            currency: lookup("STORE_CURRENCY")
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(defaults.currency),
            payment_timeout: millis("PAYMENT_TIMEOUT_MS", defaults.payment_timeout),
            commit_timeout: millis("COMMIT_TIMEOUT_MS", defaults.commit_timeout),
            reconciliation_interval: secs(
                "RECONCILIATION_INTERVAL_SECS",
                defaults.reconciliation_interval,
            )
            .max(Duration::from_secs(1)),
            reversal_grace: secs("REVERSAL_GRACE_SECS", defaults.reversal_grace),
            seed_inventory: lookup("SEED_INVENTORY")
                .map(|s| parse_seed_inventory(&s))
                .unwrap_or_default(),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Orchestrator settings derived from this configuration.
    pub fn checkout(&self) -> CheckoutConfig {
        CheckoutConfig::default()
            .with_currency(self.currency.clone())
            .with_payment_timeout(self.payment_timeout)
            .with_commit_timeout(self.commit_timeout)
            .with_reversal_grace(self.reversal_grace)
    }
}

impl Default for Config {
    fn default() -> Self {
        let checkout = CheckoutConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            currency: checkout.currency,
            payment_timeout: checkout.payment_timeout,
            commit_timeout: checkout.commit_timeout,
            reconciliation_interval: Duration::from_secs(30),
            reversal_grace: checkout.reversal_grace,
            seed_inventory: Vec::new(),
        }
    }
}

/// Parses `SKU=qty,SKU=qty`. Malformed entries are skipped.
pub fn parse_seed_inventory(raw: &str) -> Vec<(String, u32)> {
    raw.split(',')
        .filter_map(|entry| {
            let (sku, qty) = entry.split_once('=')?;
            let sku = sku.trim();
            if sku.is_empty() {
                return None;
            }
            Some((sku.to_string(), qty.trim().parse().ok()?))
        })
        .collect()
}
