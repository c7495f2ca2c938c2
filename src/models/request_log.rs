//! API request audit log model
//!
//! The remote API's compliance terms require every request and response
//! to be recorded and retained for at least 30 days. Credential-bearing
//! headers are masked before an entry is built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One audited API request/response pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    /// Database ID (set after insertion)
    pub id: Option<i64>,

    /// HTTP method
    pub method: String,

    /// Full request URL
    pub url: String,

    /// Request headers with credential values masked
    pub headers: Value,

    /// Request payload, if any
    pub payload: Option<Value>,

    /// Response status code; None when the request never got a response
    pub status: Option<u16>,

    /// Wall-clock request duration in milliseconds
    pub duration_ms: u64,

    /// Whether the request ended in an error
    pub is_error: bool,

    /// When the entry was recorded
    pub created_at: DateTime<Utc>,
}

impl RequestLogEntry {
    /// Create a new entry stamped with the current time
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: None,
            method: method.into(),
            url: url.into(),
            headers: Value::Null,
            payload: None,
            status: None,
            duration_ms: 0,
            is_error: false,
            created_at: Utc::now(),
        }
    }
}

/// Mask a credential-bearing header value for audit logging
///
/// Keeps a short prefix so entries remain correlatable, truncates the
/// rest.
pub fn mask_header_value(value: &str) -> String {
    const VISIBLE: usize = 12;
    if value.len() <= VISIBLE {
        "***".to_string()
    } else {
        format!("{}***", &value[..VISIBLE])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_defaults() {
        let entry = RequestLogEntry::new("POST", "https://api.example.com/product/read");

        assert_eq!(entry.method, "POST");
        assert_eq!(entry.status, None);
        assert!(!entry.is_error);
        assert_eq!(entry.headers, Value::Null);
    }

    #[test]
    fn test_mask_header_value() {
        let masked = mask_header_value("Basic dXNlcjpzZWNyZXQtcGFzcw==");
        assert_eq!(masked, "Basic dXNlcj***");
        assert!(!masked.contains("cGFzcw"));

        // Short values are masked entirely
        assert_eq!(mask_header_value("short"), "***");
    }
}
