//! Export log queries (append-only)

use shared::models::{ExportLogEntry, ExportOutcome};
use sqlx::{PgConnection, PgPool};

use crate::db::{StoreError, StoreResult};

#[derive(sqlx::FromRow)]
struct ExportLogRow {
    id: i64,
    order_id: i64,
    merchant_id: i64,
    batch_id: String,
    outcome: String,
    summary: String,
    created_at: i64,
}

impl TryFrom<ExportLogRow> for ExportLogEntry {
    type Error = StoreError;

    fn try_from(row: ExportLogRow) -> Result<Self, Self::Error> {
        let outcome = ExportOutcome::from_db(&row.outcome).ok_or_else(|| {
            StoreError::Corrupt(format!("export log {} outcome '{}'", row.id, row.outcome))
        })?;
        Ok(ExportLogEntry {
            id: row.id,
            order_id: row.order_id,
            merchant_id: row.merchant_id,
            batch_id: row.batch_id,
            outcome,
            summary: row.summary,
            created_at: row.created_at,
        })
    }
}

fn into_entries(rows: Vec<ExportLogRow>) -> StoreResult<Vec<ExportLogEntry>> {
    rows.into_iter().map(ExportLogEntry::try_from).collect()
}

pub(super) async fn append(
    conn: &mut PgConnection,
    order_id: i64,
    merchant_id: i64,
    batch_id: &str,
    outcome: ExportOutcome,
    summary: &str,
    now: i64,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO export_logs (id, order_id, merchant_id, batch_id, outcome, summary, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(shared::util::snowflake_id())
    .bind(order_id)
    .bind(merchant_id)
    .bind(batch_id)
    .bind(outcome.as_db())
    .bind(summary)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn for_order(pool: &PgPool, order_id: i64) -> StoreResult<Vec<ExportLogEntry>> {
    let rows: Vec<ExportLogRow> = sqlx::query_as(
        "SELECT * FROM export_logs WHERE order_id = $1 ORDER BY created_at ASC, id ASC",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    into_entries(rows)
}

pub async fn recent(pool: &PgPool, merchant_id: i64, limit: i64) -> StoreResult<Vec<ExportLogEntry>> {
    let rows: Vec<ExportLogRow> = sqlx::query_as(
        "SELECT * FROM export_logs WHERE merchant_id = $1
         ORDER BY created_at DESC, id DESC LIMIT $2",
    )
    .bind(merchant_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    into_entries(rows)
}

pub(super) async fn delete_for_orders(conn: &mut PgConnection, order_ids: &[i64]) -> StoreResult<u64> {
    let result = sqlx::query("DELETE FROM export_logs WHERE order_id = ANY($1)")
        .bind(order_ids)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
