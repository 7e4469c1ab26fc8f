//! Order Exception Model

use serde::{Deserialize, Serialize};

/// Exception status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionStatus {
    Open,
    Resolved,
}

impl ExceptionStatus {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
        }
    }
}

/// Who closed an exception
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedBy {
    /// A later validation pass no longer reported the code
    Revalidation,
    /// Closed by hand through the operator API
    Operator,
}

impl ResolvedBy {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "revalidation" => Some(Self::Revalidation),
            "operator" => Some(Self::Operator),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Revalidation => "revalidation",
            Self::Operator => "operator",
        }
    }
}

/// Validation finding attached to one order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderException {
    pub id: i64,
    pub order_id: i64,
    pub merchant_id: i64,
    /// Stable machine code (e.g. `ADDRESS_INCOMPLETE`)
    pub code: String,
    pub message: String,
    pub status: ExceptionStatus,
    pub resolved_by: Option<ResolvedBy>,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
}

impl OrderException {
    pub fn is_open(&self) -> bool {
        self.status == ExceptionStatus::Open
    }
}

/// A rule failure before it is persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFinding {
    pub code: String,
    pub message: String,
}

impl ValidationFinding {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
