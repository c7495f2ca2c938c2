//! Remote API response envelope
//!
//! Every listing endpoint answers with the same
//! `{isError, messages, results, pagination}` envelope. It is decoded
//! and normalized inside the client; other components only ever see the
//! parsed page payload or a typed error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body shape for paginated listing endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// 1-based page index
    #[serde(rename = "currentPage")]
    pub current_page: u32,

    /// Requested page size
    #[serde(rename = "itemsPerPage")]
    pub items_per_page: u32,
}

/// Pagination metadata echoed by listing endpoints
///
/// `total_pages`/`total_items` are known to be unreliable on some
/// endpoints; they are used only as progress estimates, never for
/// termination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationInfo {
    /// Echoed page index
    #[serde(rename = "currentPage", default)]
    pub current_page: Option<u32>,

    /// Echoed page size
    #[serde(rename = "itemsPerPage", default)]
    pub items_per_page: Option<u32>,

    /// Reported page count
    #[serde(rename = "totalPages", default)]
    pub total_pages: Option<u32>,

    /// Reported item count
    #[serde(rename = "totalItems", default)]
    pub total_items: Option<u64>,
}

/// Standard response envelope of the remote API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope {
    /// API-level error flag
    #[serde(rename = "isError", default)]
    pub is_error: bool,

    /// API-supplied messages, usually error details
    #[serde(default)]
    pub messages: Vec<String>,

    /// Result payload; an array of records for listing endpoints
    #[serde(default)]
    pub results: Value,

    /// Pagination metadata, when present
    #[serde(default)]
    pub pagination: Option<PaginationInfo>,
}

impl ApiEnvelope {
    /// The result payload as a list of records
    pub fn items(&self) -> Result<Vec<Value>, String> {
        match &self.results {
            Value::Array(items) => Ok(items.clone()),
            Value::Null => Ok(Vec::new()),
            other => Err(format!(
                "results must be an array, got {}",
                value_kind(other)
            )),
        }
    }

    /// Joined API messages, for error reporting
    pub fn error_message(&self) -> String {
        if self.messages.is_empty() {
            "remote API reported an error without messages".to_string()
        } else {
            self.messages.join("; ")
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
