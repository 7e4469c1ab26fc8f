//! Tenant audit log

use shared::models::AuditEntry;
use sqlx::PgPool;

use crate::db::StoreResult;

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: i64,
    tenant_id: String,
    action: String,
    detail: Option<serde_json::Value>,
    created_at: i64,
}

pub async fn log(
    pool: &PgPool,
    tenant_id: &str,
    action: &str,
    detail: Option<&serde_json::Value>,
    now: i64,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO audit_logs (tenant_id, action, detail, created_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(tenant_id)
    .bind(action)
    .bind(detail)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn query(
    pool: &PgPool,
    tenant_id: &str,
    limit: i64,
    offset: i64,
) -> StoreResult<Vec<AuditEntry>> {
    let rows: Vec<AuditRow> = sqlx::query_as(
        "SELECT id, tenant_id, action, detail, created_at FROM audit_logs
         WHERE tenant_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
    )
    .bind(tenant_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| AuditEntry {
            id: r.id,
            tenant_id: r.tenant_id,
            action: r.action,
            detail: r.detail,
            created_at: r.created_at,
        })
        .collect())
}
