//! Export Log Model

use serde::{Deserialize, Serialize};

/// Outcome of one delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportOutcome {
    Sent,
    Failed,
}

impl ExportOutcome {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "SENT" => Some(Self::Sent),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }
}

/// Immutable record of one export attempt for one order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportLogEntry {
    pub id: i64,
    pub order_id: i64,
    pub merchant_id: i64,
    pub batch_id: String,
    pub outcome: ExportOutcome,
    /// Receipt summary on success, error text on failure
    pub summary: String,
    pub created_at: i64,
}
