//! Order exception queries

use shared::models::{ExceptionStatus, OrderException, ResolvedBy, ValidationFinding};
use sqlx::{PgConnection, PgPool};

use crate::db::{StoreError, StoreResult};

#[derive(sqlx::FromRow)]
struct ExceptionRow {
    id: i64,
    order_id: i64,
    merchant_id: i64,
    code: String,
    message: String,
    status: String,
    resolved_by: Option<String>,
    created_at: i64,
    resolved_at: Option<i64>,
}

impl TryFrom<ExceptionRow> for OrderException {
    type Error = StoreError;

    fn try_from(row: ExceptionRow) -> Result<Self, Self::Error> {
        let status = ExceptionStatus::from_db(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("exception {} status '{}'", row.id, row.status))
        })?;
        let resolved_by = match row.resolved_by.as_deref() {
            None => None,
            Some(s) => Some(ResolvedBy::from_db(s).ok_or_else(|| {
                StoreError::Corrupt(format!("exception {} resolved_by '{s}'", row.id))
            })?),
        };
        Ok(OrderException {
            id: row.id,
            order_id: row.order_id,
            merchant_id: row.merchant_id,
            code: row.code,
            message: row.message,
            status,
            resolved_by,
            created_at: row.created_at,
            resolved_at: row.resolved_at,
        })
    }
}

fn into_exceptions(rows: Vec<ExceptionRow>) -> StoreResult<Vec<OrderException>> {
    rows.into_iter().map(OrderException::try_from).collect()
}

/// Close open exceptions whose code is no longer reported
pub(super) async fn resolve_missing(
    conn: &mut PgConnection,
    order_id: i64,
    still_failing: &[String],
    now: i64,
) -> StoreResult<u64> {
    let result = sqlx::query(
        "UPDATE order_exceptions
         SET status = 'resolved', resolved_by = 'revalidation', resolved_at = $1
         WHERE order_id = $2 AND status = 'open' AND NOT (code = ANY($3))",
    )
    .bind(now)
    .bind(order_id)
    .bind(still_failing)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Open one exception per finding; codes already open are left as they are
pub(super) async fn open_findings(
    conn: &mut PgConnection,
    order_id: i64,
    merchant_id: i64,
    findings: &[ValidationFinding],
    now: i64,
) -> StoreResult<()> {
    for finding in findings {
        sqlx::query(
            "INSERT INTO order_exceptions (id, order_id, merchant_id, code, message, status, created_at)
             VALUES ($1, $2, $3, $4, $5, 'open', $6)
             ON CONFLICT (order_id, code) WHERE status = 'open' DO NOTHING",
        )
        .bind(shared::util::snowflake_id())
        .bind(order_id)
        .bind(merchant_id)
        .bind(&finding.code)
        .bind(&finding.message)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn for_order(pool: &PgPool, order_id: i64) -> StoreResult<Vec<OrderException>> {
    let rows: Vec<ExceptionRow> = sqlx::query_as(
        "SELECT * FROM order_exceptions WHERE order_id = $1 ORDER BY created_at ASC, id ASC",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    into_exceptions(rows)
}

pub async fn find(
    pool: &PgPool,
    merchant_id: i64,
    exception_id: i64,
) -> StoreResult<Option<OrderException>> {
    let row: Option<ExceptionRow> =
        sqlx::query_as("SELECT * FROM order_exceptions WHERE id = $1 AND merchant_id = $2")
            .bind(exception_id)
            .bind(merchant_id)
            .fetch_optional(pool)
            .await?;
    row.map(OrderException::try_from).transpose()
}

pub async fn resolve_by_operator(
    pool: &PgPool,
    merchant_id: i64,
    exception_id: i64,
    now: i64,
) -> StoreResult<Option<OrderException>> {
    let row: Option<ExceptionRow> = sqlx::query_as(
        "UPDATE order_exceptions
         SET status = 'resolved', resolved_by = 'operator', resolved_at = $1
         WHERE id = $2 AND merchant_id = $3 AND status = 'open'
         RETURNING *",
    )
    .bind(now)
    .bind(exception_id)
    .bind(merchant_id)
    .fetch_optional(pool)
    .await?;
    row.map(OrderException::try_from).transpose()
}

pub async fn recent(
    pool: &PgPool,
    merchant_id: i64,
    open_only: bool,
    limit: i64,
) -> StoreResult<Vec<OrderException>> {
    let rows: Vec<ExceptionRow> = sqlx::query_as(
        "SELECT * FROM order_exceptions
         WHERE merchant_id = $1 AND (NOT $2 OR status = 'open')
         ORDER BY created_at DESC, id DESC
         LIMIT $3",
    )
    .bind(merchant_id)
    .bind(open_only)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    into_exceptions(rows)
}

pub(super) async fn delete_for_orders(conn: &mut PgConnection, order_ids: &[i64]) -> StoreResult<u64> {
    let result = sqlx::query("DELETE FROM order_exceptions WHERE order_id = ANY($1)")
        .bind(order_ids)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
