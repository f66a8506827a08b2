//! Application configuration module
//! Handles environment variable loading, configuration validation, and the
//! policy values (retry limits, delays, tolerances, cron schedules) used by
//! the payment engine.

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub gateway: GatewayConfig,
    pub retry_queue: RetryQueueConfig,
    pub reconciliation: ReconciliationConfig,
    pub jobs: JobsConfig,
    /// Run against in-memory stores without a database or gateway credentials
    pub skip_externals: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Payment gateway credentials and webhook settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub provider: String,
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Treat `payment.authorized` as final when the gateway captures automatically
    pub auto_capture: bool,
    pub signature_header: String,
}

/// Durable side-effect retry queue policy
#[derive(Debug, Clone)]
pub struct RetryQueueConfig {
    pub enabled: bool,
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub max_attempts: u32,
    /// Delay before a failed task becomes eligible again
    pub retry_delay: Duration,
    /// Delay before a freshly enqueued task is first picked up
    pub initial_delay: Duration,
    /// How long a claimed task may stay `processing` before another pass reclaims it
    pub claim_lease: Duration,
}

/// Ledger vs gateway reconciliation policy
#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// Maximum tolerated difference in major currency units
    pub amount_tolerance: Decimal,
    pub lookup_timeout: Duration,
    pub concurrency: usize,
    /// Whether the scheduled daily run corrects status mismatches
    pub scheduled_auto_fix: bool,
}

/// Scheduled retry and escalation jobs
#[derive(Debug, Clone)]
pub struct JobsConfig {
    pub enabled: bool,
    pub subscription_retry_cron: String,
    pub order_retry_cron: String,
    pub reminder_cron: String,
    pub expiry_cron: String,
    pub reconciliation_cron: String,
    pub max_retry_attempts: u32,
    pub subscription_retry_window: chrono::Duration,
    pub order_retry_window: chrono::Duration,
    pub reminder_after: chrono::Duration,
    pub reminder_max_age: chrono::Duration,
    pub pending_expiry: chrono::Duration,
    pub batch_size: i64,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            gateway: GatewayConfig::from_env()?,
            retry_queue: RetryQueueConfig::from_env()?,
            reconciliation: ReconciliationConfig::from_env()?,
            jobs: JobsConfig::from_env()?,
            skip_externals: parse_env("SKIP_EXTERNALS", false)?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.logging.validate()?;
        self.retry_queue.validate()?;
        self.reconciliation.validate()?;
        self.jobs.validate()?;

        if !self.skip_externals {
            self.database.validate()?;
            self.gateway.validate()?;
        }

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_env("SERVER_PORT", 8000)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            max_connections: parse_env("DB_MAX_CONNECTIONS", 20)?,
            min_connections: parse_env("DB_MIN_CONNECTIONS", 5)?,
            connection_timeout: parse_env("DB_CONNECTION_TIMEOUT", 30)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_none() {
            return Err(ConfigError::MissingVariable("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(GatewayConfig {
            provider: env::var("PAYMENT_PROVIDER").unwrap_or_else(|_| "razorpay".to_string()),
            key_id: env::var("GATEWAY_KEY_ID").unwrap_or_default(),
            key_secret: env::var("GATEWAY_KEY_SECRET").unwrap_or_default(),
            webhook_secret: env::var("GATEWAY_WEBHOOK_SECRET").unwrap_or_default(),
            base_url: env::var("GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.razorpay.com/v1".to_string()),
            timeout_secs: parse_env("GATEWAY_TIMEOUT_SECS", 30)?,
            max_retries: parse_env("GATEWAY_MAX_RETRIES", 2)?,
            auto_capture: parse_env("GATEWAY_AUTO_CAPTURE", false)?,
            signature_header: env::var("WEBHOOK_SIGNATURE_HEADER")
                .unwrap_or_else(|_| "x-razorpay-signature".to_string())
                .to_lowercase(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_id.is_empty() {
            return Err(ConfigError::MissingVariable("GATEWAY_KEY_ID".to_string()));
        }
        if self.key_secret.is_empty() {
            return Err(ConfigError::MissingVariable(
                "GATEWAY_KEY_SECRET".to_string(),
            ));
        }
        if self.webhook_secret.is_empty() {
            return Err(ConfigError::MissingVariable(
                "GATEWAY_WEBHOOK_SECRET".to_string(),
            ));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_BASE_URL must be a valid URL".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("GATEWAY_TIMEOUT_SECS".to_string()));
        }

        Ok(())
    }
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(300),
            batch_size: 10,
            max_attempts: 3,
            retry_delay: Duration::from_secs(300),
            initial_delay: Duration::from_secs(300),
            claim_lease: Duration::from_secs(900),
        }
    }
}

impl RetryQueueConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            enabled: parse_env("RETRY_QUEUE_ENABLED", defaults.enabled)?,
            poll_interval: Duration::from_secs(parse_env(
                "RETRY_QUEUE_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )?),
            batch_size: parse_env("RETRY_QUEUE_BATCH_SIZE", defaults.batch_size)?,
            max_attempts: parse_env("RETRY_QUEUE_MAX_ATTEMPTS", defaults.max_attempts)?,
            retry_delay: Duration::from_secs(parse_env(
                "RETRY_QUEUE_DELAY_SECS",
                defaults.retry_delay.as_secs(),
            )?),
            initial_delay: Duration::from_secs(parse_env(
                "RETRY_QUEUE_INITIAL_DELAY_SECS",
                defaults.initial_delay.as_secs(),
            )?),
            claim_lease: Duration::from_secs(parse_env(
                "RETRY_QUEUE_CLAIM_LEASE_SECS",
                defaults.claim_lease.as_secs(),
            )?),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "RETRY_QUEUE_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "RETRY_QUEUE_BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "RETRY_QUEUE_INTERVAL_SECS".to_string(),
            ));
        }
        if self.claim_lease.is_zero() {
            return Err(ConfigError::InvalidValue(
                "RETRY_QUEUE_CLAIM_LEASE_SECS".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            amount_tolerance: Decimal::ONE,
            lookup_timeout: Duration::from_secs(10),
            concurrency: 8,
            scheduled_auto_fix: false,
        }
    }
}

impl ReconciliationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            amount_tolerance: parse_env(
                "RECONCILIATION_AMOUNT_TOLERANCE",
                defaults.amount_tolerance,
            )?,
            lookup_timeout: Duration::from_secs(parse_env(
                "RECONCILIATION_LOOKUP_TIMEOUT_SECS",
                defaults.lookup_timeout.as_secs(),
            )?),
            concurrency: parse_env("RECONCILIATION_CONCURRENCY", defaults.concurrency)?,
            scheduled_auto_fix: parse_env(
                "RECONCILIATION_AUTO_FIX",
                defaults.scheduled_auto_fix,
            )?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.amount_tolerance.is_sign_negative() {
            return Err(ConfigError::InvalidValue(
                "RECONCILIATION_AMOUNT_TOLERANCE cannot be negative".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "RECONCILIATION_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            subscription_retry_cron: "0 0 */6 * * *".to_string(),
            order_retry_cron: "0 30 * * * *".to_string(),
            reminder_cron: "0 0 * * * *".to_string(),
            expiry_cron: "0 0 3 * * *".to_string(),
            reconciliation_cron: "0 15 2 * * *".to_string(),
            max_retry_attempts: 3,
            subscription_retry_window: chrono::Duration::hours(72),
            order_retry_window: chrono::Duration::hours(24),
            reminder_after: chrono::Duration::minutes(60),
            reminder_max_age: chrono::Duration::hours(24),
            pending_expiry: chrono::Duration::days(7),
            batch_size: 100,
        }
    }
}

impl JobsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            enabled: parse_env("JOBS_ENABLED", defaults.enabled)?,
            subscription_retry_cron: env::var("JOB_SUBSCRIPTION_RETRY_CRON")
                .unwrap_or(defaults.subscription_retry_cron),
            order_retry_cron: env::var("JOB_ORDER_RETRY_CRON")
                .unwrap_or(defaults.order_retry_cron),
            reminder_cron: env::var("JOB_PAYMENT_REMINDER_CRON").unwrap_or(defaults.reminder_cron),
            expiry_cron: env::var("JOB_STALE_PAYMENT_EXPIRY_CRON")
                .unwrap_or(defaults.expiry_cron),
            reconciliation_cron: env::var("JOB_RECONCILIATION_CRON")
                .unwrap_or(defaults.reconciliation_cron),
            max_retry_attempts: parse_env(
                "PAYMENT_MAX_RETRY_ATTEMPTS",
                defaults.max_retry_attempts,
            )?,
            subscription_retry_window: chrono::Duration::hours(parse_env(
                "SUBSCRIPTION_RETRY_WINDOW_HOURS",
                72,
            )?),
            order_retry_window: chrono::Duration::hours(parse_env(
                "ORDER_RETRY_WINDOW_HOURS",
                24,
            )?),
            reminder_after: chrono::Duration::minutes(parse_env("REMINDER_AFTER_MINUTES", 60)?),
            reminder_max_age: chrono::Duration::hours(parse_env("REMINDER_MAX_AGE_HOURS", 24)?),
            pending_expiry: chrono::Duration::days(parse_env("PENDING_EXPIRY_DAYS", 7)?),
            batch_size: parse_env("JOBS_BATCH_SIZE", defaults.batch_size)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reminder_after >= self.reminder_max_age {
            return Err(ConfigError::ValidationFailed(
                "REMINDER_AFTER_MINUTES must be shorter than REMINDER_MAX_AGE_HOURS".to_string(),
            ));
        }
        if self.batch_size <= 0 {
            return Err(ConfigError::InvalidValue("JOBS_BATCH_SIZE".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        _ => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_defaults_match_observed_behavior() {
        let retry = RetryQueueConfig::default();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.batch_size, 10);
        assert_eq!(retry.retry_delay, Duration::from_secs(300));
        assert_eq!(retry.initial_delay, Duration::from_secs(300));
        assert_eq!(retry.claim_lease, Duration::from_secs(900));

        let recon = ReconciliationConfig::default();
        assert_eq!(recon.amount_tolerance, Decimal::ONE);

        let jobs = JobsConfig::default();
        assert_eq!(jobs.max_retry_attempts, 3);
        assert_eq!(jobs.subscription_retry_window, chrono::Duration::days(3));
        assert_eq!(jobs.pending_expiry, chrono::Duration::days(7));
        assert!(jobs.validate().is_ok());
    }

    #[test]
    fn test_gateway_validation_requires_secrets() {
        let config = GatewayConfig {
            provider: "razorpay".to_string(),
            key_id: "rzp_test".to_string(),
            key_secret: "secret".to_string(),
            webhook_secret: String::new(),
            base_url: "https://api.razorpay.com/v1".to_string(),
            timeout_secs: 30,
            max_retries: 2,
            auto_capture: false,
            signature_header: "x-razorpay-signature".to_string(),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingVariable(_))
        ));
    }

    #[test]
    fn test_reminder_window_must_be_ordered() {
        let config = JobsConfig {
            reminder_after: chrono::Duration::hours(48),
            ..JobsConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
