//! Configuration management for marketplace-sync
//!
//! This module handles loading, parsing, and validating application
//! configuration from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::ConfigError;
use crate::models::AccountType;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Remote API endpoint configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Seller account configurations keyed by account name ("main", "fbe")
    #[serde(default)]
    pub accounts: HashMap<String, AccountConfig>,

    /// Retry configuration for transient API failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Circuit breaker configuration
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Sync loop configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Request audit log configuration
    #[serde(default)]
    pub audit: AuditConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // First, expand environment variables in the YAML string
        let expanded = expand_env_vars(yaml);
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides with prefix MARKETPLACE_SYNC_
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = std::env::var("MARKETPLACE_SYNC_API_BASE_URL") {
            self.api.base_url = url;
        }
        if let Ok(path) = std::env::var("MARKETPLACE_SYNC_DATABASE_PATH") {
            self.database.path = path;
        }
        if let Ok(level) = std::env::var("MARKETPLACE_SYNC_LOG_LEVEL") {
            self.logging.level = level;
        }
        for account in AccountType::all() {
            let prefix = format!("MARKETPLACE_SYNC_{}", account.to_string().to_uppercase());
            if let Ok(username) = std::env::var(format!("{}_USERNAME", prefix)) {
                self.accounts
                    .entry(account.to_string())
                    .or_default()
                    .username = username;
            }
            if let Ok(password) = std::env::var(format!("{}_PASSWORD", prefix)) {
                self.accounts
                    .entry(account.to_string())
                    .or_default()
                    .password = password;
            }
        }
        Ok(())
    }

    /// Validate configuration invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audit.retention_days < 30 {
            return Err(ConfigError::Validation(format!(
                "audit.retention_days must be at least 30, got {}",
                self.audit.retention_days
            )));
        }
        if self.sync.items_per_page == 0 {
            return Err(ConfigError::Validation(
                "sync.items_per_page must be at least 1".to_string(),
            ));
        }
        for (name, account) in &self.accounts {
            if account.rate_limit.orders_per_second == 0
                || account.rate_limit.other_per_second == 0
            {
                return Err(ConfigError::Validation(format!(
                    "accounts.{}.rate_limit ceilings must be at least 1 req/s",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Configuration for one account type, if present and enabled
    pub fn account(&self, account: AccountType) -> Option<&AccountConfig> {
        self.accounts
            .get(&account.to_string())
            .filter(|a| a.enabled)
    }

    /// Enabled accounts, MAIN first
    pub fn enabled_accounts(&self) -> Vec<AccountType> {
        AccountType::all()
            .into_iter()
            .filter(|a| self.account(*a).is_some())
            .collect()
    }
}

/// Remote API endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    /// Base URL for the marketplace API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Total request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://marketplace.example.com/api-3".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

/// Seller account configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountConfig {
    /// Whether this account participates in syncs
    #[serde(default = "default_account_enabled")]
    pub enabled: bool,

    /// HTTP Basic username
    #[serde(default)]
    pub username: String,

    /// HTTP Basic password
    #[serde(default)]
    pub password: String,

    /// Request-rate ceilings for this account
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            enabled: default_account_enabled(),
            username: String::new(),
            password: String::new(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn default_account_enabled() -> bool {
    true
}

/// Per-account request-rate ceilings, one per endpoint bucket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Ceiling for order endpoints, requests per second
    #[serde(default = "default_orders_per_second")]
    pub orders_per_second: u32,

    /// Ceiling for all other endpoints, requests per second
    #[serde(default = "default_other_per_second")]
    pub other_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            orders_per_second: default_orders_per_second(),
            other_per_second: default_other_per_second(),
        }
    }
}

fn default_orders_per_second() -> u32 {
    12
}

fn default_other_per_second() -> u32 {
    3
}

/// Retry configuration for transient API failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the initial one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff duration in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Whether to add jitter to backoff
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Whether the breaker is active
    #[serde(default = "default_breaker_enabled")]
    pub enabled: bool,

    /// Consecutive transient failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the breaker stays open, in milliseconds
    #[serde(default = "default_open_duration")]
    pub open_duration_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: default_breaker_enabled(),
            failure_threshold: default_failure_threshold(),
            open_duration_ms: default_open_duration(),
        }
    }
}

fn default_breaker_enabled() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_open_duration() -> u64 {
    30_000
}

/// Sync loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Page size requested from listing endpoints
    #[serde(default = "default_items_per_page")]
    pub items_per_page: u32,

    /// Safety cap on pages per account when the caller supplies none
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Delay between page requests in milliseconds
    #[serde(default = "default_inter_page_delay")]
    pub inter_page_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            items_per_page: default_items_per_page(),
            max_pages: default_max_pages(),
            inter_page_delay_ms: default_inter_page_delay(),
        }
    }
}

fn default_items_per_page() -> u32 {
    100
}

fn default_max_pages() -> u32 {
    500
}

fn default_inter_page_delay() -> u64 {
    200
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "/data/marketplace-sync.db".to_string()
}

/// Request audit log configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditConfig {
    /// Days to retain request log entries; the API's compliance terms
    /// require at least 30
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

fn default_retention_days() -> u32 {
    30
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .expect("Invalid regex pattern for environment variable expansion");

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Parse complete configuration from YAML
    #[test]
    fn test_parse_complete_yaml_config() {
        let yaml = r#"
api:
  base_url: "https://marketplace.test/api-3"
  connect_timeout_secs: 5
  request_timeout_secs: 20

accounts:
  main:
    username: "seller-main"
    password: "secret-main"
    rate_limit:
      orders_per_second: 10
      other_per_second: 2
  fbe:
    enabled: false
    username: "seller-fbe"
    password: "secret-fbe"

retry:
  max_retries: 5
  initial_backoff_ms: 100
  max_backoff_ms: 5000
  backoff_multiplier: 3.0
  jitter: false

circuit_breaker:
  enabled: true
  failure_threshold: 4
  open_duration_ms: 10000

sync:
  items_per_page: 50
  max_pages: 20
  inter_page_delay_ms: 100

database:
  path: "/tmp/test.db"

audit:
  retention_days: 45

logging:
  level: "debug"
  format: "pretty"
"#;

        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.api.base_url, "https://marketplace.test/api-3");
        assert_eq!(config.api.connect_timeout_secs, 5);
        assert_eq!(config.api.request_timeout_secs, 20);

        let main = config.accounts.get("main").unwrap();
        assert!(main.enabled);
        assert_eq!(main.username, "seller-main");
        assert_eq!(main.rate_limit.orders_per_second, 10);
        assert_eq!(main.rate_limit.other_per_second, 2);

        let fbe = config.accounts.get("fbe").unwrap();
        assert!(!fbe.enabled);

        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_backoff_ms, 100);
        assert!(!config.retry.jitter);

        assert_eq!(config.circuit_breaker.failure_threshold, 4);

        assert_eq!(config.sync.items_per_page, 50);
        assert_eq!(config.sync.max_pages, 20);

        assert_eq!(config.database.path, "/tmp/test.db");
        assert_eq!(config.audit.retention_days, 45);
        assert_eq!(config.logging.level, "debug");
    }

    // Test 2: Default values are applied for missing fields
    #[test]
    fn test_default_values_applied() {
        let yaml = r#"
accounts:
  main:
    username: "seller"
    password: "secret"
"#;

        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.api.connect_timeout_secs, 10);
        assert_eq!(config.api.request_timeout_secs, 30);
        assert_eq!(config.retry.max_retries, 3);
        assert!((config.retry.backoff_multiplier - 2.0).abs() < f64::EPSILON);
        assert!(config.retry.jitter);
        assert_eq!(config.sync.items_per_page, 100);
        assert_eq!(config.audit.retention_days, 30);

        let main = config.accounts.get("main").unwrap();
        assert_eq!(main.rate_limit.orders_per_second, 12);
        assert_eq!(main.rate_limit.other_per_second, 3);
    }

    // Test 3: Environment variable expansion in YAML
    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("TEST_MP_PASSWORD", "from-env");

        let yaml = r#"
accounts:
  main:
    username: "seller"
    password: "${TEST_MP_PASSWORD}"
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.accounts.get("main").unwrap().password, "from-env");

        std::env::remove_var("TEST_MP_PASSWORD");
    }

    // Test 4: Unknown env vars are left as-is
    #[test]
    fn test_unknown_env_var_left_intact() {
        let yaml = r#"
accounts:
  main:
    username: "${DEFINITELY_NOT_SET_VAR_42}"
    password: "x"
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(
            config.accounts.get("main").unwrap().username,
            "${DEFINITELY_NOT_SET_VAR_42}"
        );
    }

    // Test 5: Retention below the compliance floor is rejected
    #[test]
    fn test_retention_floor_enforced() {
        let yaml = r#"
audit:
  retention_days: 7
"#;

        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("retention_days"));
    }

    // Test 6: Zero rate ceilings are rejected
    #[test]
    fn test_zero_rate_ceiling_rejected() {
        let yaml = r#"
accounts:
  main:
    username: "seller"
    password: "secret"
    rate_limit:
      orders_per_second: 0
"#;

        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    // Test 7: Account accessor respects the enabled flag
    #[test]
    fn test_account_accessor() {
        let yaml = r#"
accounts:
  main:
    username: "seller"
    password: "secret"
  fbe:
    enabled: false
    username: "seller-fbe"
    password: "secret"
"#;

        let config = Config::from_yaml(yaml).unwrap();

        assert!(config.account(AccountType::Main).is_some());
        assert!(config.account(AccountType::Fbe).is_none());
        assert_eq!(config.enabled_accounts(), vec![AccountType::Main]);
    }

    // Test 8: Invalid YAML is a parse error
    #[test]
    fn test_invalid_yaml() {
        let result = Config::from_yaml("accounts: [not: a, map");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
