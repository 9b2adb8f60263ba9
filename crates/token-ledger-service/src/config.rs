//! Service configuration.

use std::path::Path;

use token_ledger_core::PricingConfig;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/token-ledger").
    pub data_dir: String,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// Payment gateway base URL (optional).
    pub gateway_base_url: Option<String>,

    /// Payment gateway API key (optional).
    pub gateway_api_key: Option<String>,

    /// Payment gateway request timeout in seconds.
    pub gateway_timeout_seconds: u64,

    /// Interval between subscription billing runs, in seconds.
    pub billing_interval_seconds: u64,

    /// Interval between auto-top-up scans, in seconds.
    pub topup_interval_seconds: u64,

    /// Interval between reconciliation passes, in seconds.
    pub reconcile_interval_seconds: u64,

    /// Minutes a purchase may sit in `processing` before reconciliation
    /// picks it up.
    pub reconcile_stale_minutes: i64,

    /// Days a subscription may retry after a failed payment.
    pub grace_period_days: i64,

    /// Failed payments before a subscription is cancelled.
    pub max_failed_payments: u32,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Pricing configuration.
    pub pricing: PricingConfig,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/token-ledger".into()),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            gateway_base_url: std::env::var("GATEWAY_BASE_URL").ok(),
            gateway_api_key: std::env::var("GATEWAY_API_KEY").ok(),
            gateway_timeout_seconds: env_parse("GATEWAY_TIMEOUT_SECONDS", 10),
            billing_interval_seconds: env_parse("BILLING_INTERVAL_SECONDS", 60),
            topup_interval_seconds: env_parse("TOPUP_INTERVAL_SECONDS", 300),
            reconcile_interval_seconds: env_parse("RECONCILE_INTERVAL_SECONDS", 300),
            reconcile_stale_minutes: env_parse("RECONCILE_STALE_MINUTES", 10),
            grace_period_days: env_parse("GRACE_PERIOD_DAYS", 7),
            max_failed_payments: env_parse("MAX_FAILED_PAYMENTS", 3),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES", 1024 * 1024),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS", 30),
            pricing: load_pricing(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/token-ledger".into(),
            service_api_key: None,
            gateway_base_url: None,
            gateway_api_key: None,
            gateway_timeout_seconds: 10,
            billing_interval_seconds: 60,
            topup_interval_seconds: 300,
            reconcile_interval_seconds: 300,
            reconcile_stale_minutes: 10,
            grace_period_days: 7,
            max_failed_payments: 3,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            pricing: PricingConfig::default(),
        }
    }
}

/// Parse an environment variable, falling back to a default.
fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Load the pricing catalog from `PRICING_CONFIG` (a JSON file path), or
/// fall back to the built-in defaults.
fn load_pricing() -> PricingConfig {
    let Ok(path) = std::env::var("PRICING_CONFIG") else {
        tracing::debug!("PRICING_CONFIG not set, using default pricing");
        return PricingConfig::default();
    };

    match load_pricing_file(&path) {
        Ok(pricing) => {
            tracing::info!(path = %path, "Loaded pricing configuration from file");
            pricing
        }
        Err(err) => {
            tracing::warn!(path = %path, error = %err, "Failed to load pricing file, using defaults");
            PricingConfig::default()
        }
    }
}

fn load_pricing_file(path: &str) -> Result<PricingConfig, std::io::Error> {
    let path = Path::new(path);
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
