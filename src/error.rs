//! Application error types for marketplace-sync
//!
//! This module defines the error taxonomy used throughout the engine.
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Errors returned by the marketplace API client
///
/// Every HTTP/transport outcome is classified into exactly one of these
/// variants; no other component inspects raw status codes or the remote
/// response envelope.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApiError {
    /// Credential failure (401 after re-authentication)
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Rate limited by the remote API (429), with optional Retry-After hint
    #[error("Rate limited by remote API{}", .retry_after.map(|s| format!(", retry after {} seconds", s)).unwrap_or_default())]
    RateLimited {
        /// Server-supplied wait hint in seconds, if any
        retry_after: Option<u64>,
    },

    /// Request rejected by the remote API (400 or an error envelope)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Remote resource does not exist (404)
    #[error("Remote resource not found")]
    NotFound,

    /// Network failure, timeout, or server error (5xx)
    #[error("Transient API error: {0}")]
    Transient(String),

    /// Circuit breaker is open after consecutive transient failures
    #[error("Circuit breaker open")]
    CircuitOpen,

    /// Response body could not be decoded into the expected envelope
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Async connection error
    #[error("Database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    /// Record not found
    #[error("Record not found")]
    NotFound,

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Attempted to mutate a sync log that already reached a terminal status
    #[error("Sync log {0} is already finalized")]
    AlreadyFinalized(i64),
}

/// Configuration error types
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Application-level error type
///
/// Aggregates all domain-specific error types. This is what the
/// orchestrator and service facade return to callers.
#[derive(Debug, Error)]
pub enum AppError {
    /// Marketplace API error
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;
}

impl RetryableError for ApiError {
    fn is_retryable(&self) -> bool {
        match self {
            // Retryable errors
            ApiError::Transient(_) => true,
            ApiError::RateLimited { .. } => true,

            // Non-retryable errors
            ApiError::Auth(_) => false,
            ApiError::Validation(_) => false,
            ApiError::NotFound => false,
            ApiError::CircuitOpen => false,
            ApiError::InvalidResponse(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: ApiError message formatting
    #[test]
    fn test_api_error_messages() {
        assert_eq!(
            ApiError::Auth("bad credentials".to_string()).to_string(),
            "Authentication failed: bad credentials"
        );
        assert_eq!(
            ApiError::RateLimited {
                retry_after: Some(30)
            }
            .to_string(),
            "Rate limited by remote API, retry after 30 seconds"
        );
        assert_eq!(
            ApiError::RateLimited { retry_after: None }.to_string(),
            "Rate limited by remote API"
        );
        assert_eq!(
            ApiError::Validation("sku is required".to_string()).to_string(),
            "Validation error: sku is required"
        );
        assert_eq!(ApiError::NotFound.to_string(), "Remote resource not found");
        assert_eq!(
            ApiError::Transient("connection reset".to_string()).to_string(),
            "Transient API error: connection reset"
        );
        assert_eq!(ApiError::CircuitOpen.to_string(), "Circuit breaker open");
    }

    // Test 2: RetryableError classification for ApiError
    #[test]
    fn test_api_error_retryable() {
        // Retryable errors
        assert!(ApiError::Transient("timeout".to_string()).is_retryable());
        assert!(ApiError::RateLimited {
            retry_after: Some(2)
        }
        .is_retryable());
        assert!(ApiError::RateLimited { retry_after: None }.is_retryable());

        // Non-retryable errors
        assert!(!ApiError::Auth("denied".to_string()).is_retryable());
        assert!(!ApiError::Validation("bad field".to_string()).is_retryable());
        assert!(!ApiError::NotFound.is_retryable());
        assert!(!ApiError::CircuitOpen.is_retryable());
        assert!(!ApiError::InvalidResponse("not json".to_string()).is_retryable());
    }

    // Test 3: From conversion for ApiError
    #[test]
    fn test_app_error_from_api_error() {
        let api_err = ApiError::NotFound;
        let app_err: AppError = api_err.into();

        match app_err {
            AppError::Api(ApiError::NotFound) => (),
            _ => panic!("Expected AppError::Api(ApiError::NotFound)"),
        }
    }

    // Test 4: From conversion for DbError
    #[test]
    fn test_app_error_from_db_error() {
        let db_err = DbError::NotFound;
        let app_err: AppError = db_err.into();

        match app_err {
            AppError::Database(DbError::NotFound) => (),
            _ => panic!("Expected AppError::Database(DbError::NotFound)"),
        }
    }

    // Test 5: AppError display includes source error
    #[test]
    fn test_app_error_display() {
        let app_err = AppError::Api(ApiError::RateLimited {
            retry_after: Some(120),
        });
        assert_eq!(
            app_err.to_string(),
            "API error: Rate limited by remote API, retry after 120 seconds"
        );

        let app_err = AppError::Config(ConfigError::Validation("bad port".to_string()));
        assert_eq!(
            app_err.to_string(),
            "Configuration error: Invalid configuration: bad port"
        );
    }

    // Test 6: DbError messages
    #[test]
    fn test_db_error_messages() {
        assert_eq!(DbError::NotFound.to_string(), "Record not found");
        assert_eq!(
            DbError::ConstraintViolation("unique".to_string()).to_string(),
            "Constraint violation: unique"
        );
        assert_eq!(
            DbError::AlreadyFinalized(7).to_string(),
            "Sync log 7 is already finalized"
        );
    }

    // Test 7: DbError from rusqlite::Error
    #[test]
    fn test_db_error_from_sqlite() {
        let sqlite_err = rusqlite::Error::InvalidParameterName("test".to_string());
        let db_err: DbError = sqlite_err.into();

        match db_err {
            DbError::Sqlite(_) => (),
            _ => panic!("Expected DbError::Sqlite"),
        }
    }

    // Test 8: ApiError Clone and PartialEq
    #[test]
    fn test_api_error_clone_and_eq() {
        let err1 = ApiError::Validation("missing sku".to_string());
        let err2 = err1.clone();
        assert_eq!(err1, err2);

        let err3 = ApiError::Validation("missing name".to_string());
        assert_ne!(err1, err3);
    }
}
