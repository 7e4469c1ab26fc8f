//! Relay service configuration

use std::time::Duration;

use crate::BoxError;

/// Service configuration, loaded once at startup
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    pub http_port: u16,
    /// Environment: development | staging | production
    pub environment: String,
    /// Platform-wide webhook signing secret (tenants may override)
    pub webhook_secret: String,
    /// JWT secret for tenant operator tokens
    pub jwt_secret: String,
    /// Storefront admin API version segment
    pub platform_api_version: String,
    /// Fulfillment endpoint; `None` disables live export
    pub fulfillment_url: Option<String>,
    pub fulfillment_api_key: Option<String>,
    pub http_timeout: Duration,
    pub pipeline: PipelineSettings,
}

/// Worker cadence and paging
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub poll_interval: Duration,
    /// How far back each poll asks for updated orders
    pub poll_lookback: Duration,
    pub poll_page_size: u32,
    /// Pause between merchants in one poll run
    pub poll_merchant_delay: Duration,
    pub sweep_tick: Duration,
    pub export_tick: Duration,
    pub export_batch_size: i64,
    /// Claims older than this are considered abandoned
    pub claim_ttl: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            poll_lookback: Duration::from_secs(60 * 60),
            poll_page_size: 50,
            poll_merchant_delay: Duration::from_millis(500),
            sweep_tick: Duration::from_secs(30),
            export_tick: Duration::from_secs(60),
            export_batch_size: 10,
            claim_ttl: Duration::from_secs(600),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Require a secret env var: must be set and non-empty in non-development environments.
    fn require_secret(name: &str, environment: &str) -> Result<String, BoxError> {
        let val = match std::env::var(name) {
            Ok(v) => v,
            Err(_) => {
                if environment != "development" {
                    return Err(format!("{name} must be set in {environment} environment").into());
                }
                format!("dev-{name}-not-for-production")
            }
        };
        if val.is_empty() && environment != "development" {
            return Err(format!("{name} must not be empty in {environment} environment").into());
        }
        Ok(val)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, BoxError> {
        let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into());
        let defaults = PipelineSettings::default();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set")?,
            http_port: env_parse("HTTP_PORT", 8080),
            webhook_secret: Self::require_secret("WEBHOOK_SECRET", &environment)?,
            jwt_secret: Self::require_secret("JWT_SECRET", &environment)?,
            environment,
            platform_api_version: std::env::var("PLATFORM_API_VERSION")
                .unwrap_or_else(|_| "2024-07".into()),
            fulfillment_url: std::env::var("FULFILLMENT_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            fulfillment_api_key: std::env::var("FULFILLMENT_API_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 15)),
            pipeline: PipelineSettings {
                poll_interval: Duration::from_secs(env_parse(
                    "POLL_INTERVAL_SECS",
                    defaults.poll_interval.as_secs(),
                )),
                poll_lookback: Duration::from_secs(
                    env_parse("POLL_LOOKBACK_MINUTES", 60u64) * 60,
                ),
                poll_page_size: env_parse("POLL_PAGE_SIZE", defaults.poll_page_size),
                poll_merchant_delay: Duration::from_millis(env_parse(
                    "POLL_MERCHANT_DELAY_MS",
                    500,
                )),
                sweep_tick: Duration::from_secs(env_parse(
                    "SWEEP_TICK_SECS",
                    defaults.sweep_tick.as_secs(),
                )),
                export_tick: Duration::from_secs(env_parse(
                    "EXPORT_TICK_SECS",
                    defaults.export_tick.as_secs(),
                )),
                export_batch_size: env_parse("EXPORT_BATCH_SIZE", defaults.export_batch_size)
                    .max(1),
                claim_ttl: Duration::from_secs(env_parse(
                    "CLAIM_TTL_SECS",
                    defaults.claim_ttl.as_secs(),
                )),
            },
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_get_dev_placeholder_only_in_development() {
        // Unlikely to be set in any test environment
        let name = "ORDER_RELAY_TEST_UNSET_SECRET";
        let dev = Config::require_secret(name, "development").unwrap();
        assert!(dev.starts_with("dev-"));
        assert!(Config::require_secret(name, "production").is_err());
    }

    #[test]
    fn pipeline_defaults() {
        let p = PipelineSettings::default();
        assert_eq!(p.export_batch_size, 10);
        assert_eq!(p.poll_lookback, Duration::from_secs(3600));
        assert_eq!(p.claim_ttl, Duration::from_secs(600));
    }
}
