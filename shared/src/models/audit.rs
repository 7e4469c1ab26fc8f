//! Tenant audit log model

use serde::{Deserialize, Serialize};

/// One tenant-level audit record (settings changes, operator actions, erasures)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub tenant_id: String,
    pub action: String,
    pub detail: Option<serde_json::Value>,
    pub created_at: i64,
}
