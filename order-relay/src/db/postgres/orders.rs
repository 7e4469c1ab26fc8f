//! Order queries

use rust_decimal::Decimal;
use shared::models::{Order, OrderPayload, OrderState, OrderStateCounts};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use crate::db::{
    CANCELLED_ON_PLATFORM, CancelOutcome, OrderUpsert, StoreError, StoreResult, Transition,
    UpsertOutcome,
};

#[derive(sqlx::FromRow)]
pub(super) struct OrderRow {
    id: i64,
    tenant_id: String,
    merchant_id: i64,
    external_order_id: String,
    display_name: String,
    state: String,
    payload: Json<OrderPayload>,
    currency: String,
    total_price: Decimal,
    placed_at: i64,
    ready_at: i64,
    created_at: i64,
    updated_at: i64,
    cancelled_at: Option<i64>,
    export_batch_id: Option<String>,
    last_error: Option<String>,
    claimed_by: Option<String>,
    claimed_at: Option<i64>,
    version: i64,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let state = OrderState::from_db(&row.state)
            .ok_or_else(|| StoreError::Corrupt(format!("order {} state '{}'", row.id, row.state)))?;
        Ok(Order {
            id: row.id,
            tenant_id: row.tenant_id,
            merchant_id: row.merchant_id,
            external_order_id: row.external_order_id,
            display_name: row.display_name,
            state,
            payload: row.payload.0,
            currency: row.currency,
            total_price: row.total_price,
            placed_at: row.placed_at,
            ready_at: row.ready_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            cancelled_at: row.cancelled_at,
            export_batch_id: row.export_batch_id,
            last_error: row.last_error,
            claimed_by: row.claimed_by,
            claimed_at: row.claimed_at,
            version: row.version,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UpsertRow {
    #[sqlx(flatten)]
    order: OrderRow,
    inserted: bool,
}

pub(super) fn into_orders(rows: Vec<OrderRow>) -> StoreResult<Vec<Order>> {
    rows.into_iter().map(Order::try_from).collect()
}

fn state_list(states: &[OrderState]) -> Vec<String> {
    states.iter().map(|s| s.as_db().to_string()).collect()
}

pub async fn upsert(pool: &PgPool, upsert: &OrderUpsert) -> StoreResult<UpsertOutcome> {
    // xmax = 0 only for freshly inserted tuples. An unclaimed READY order
    // drops back to PENDING only when the order content actually changed.
    let row: Option<UpsertRow> = sqlx::query_as(
        r#"
        INSERT INTO orders (
            id, tenant_id, merchant_id, external_order_id, display_name, state, payload,
            currency, total_price, placed_at, ready_at, created_at, updated_at, version
        )
        VALUES ($1, $2, $3, $4, $5, 'PENDING', $6, $7, $8, $9, $10, $11, $11, 1)
        ON CONFLICT (merchant_id, external_order_id) DO UPDATE SET
            display_name = EXCLUDED.display_name,
            payload = EXCLUDED.payload,
            currency = EXCLUDED.currency,
            total_price = EXCLUDED.total_price,
            placed_at = EXCLUDED.placed_at,
            ready_at = CASE
                WHEN orders.state = 'PENDING'
                  OR (orders.state = 'READY' AND orders.claimed_by IS NULL
                      AND (orders.payload IS DISTINCT FROM EXCLUDED.payload
                           OR orders.placed_at <> EXCLUDED.placed_at))
                THEN EXCLUDED.ready_at
                ELSE orders.ready_at
            END,
            state = CASE
                WHEN orders.state = 'READY' AND orders.claimed_by IS NULL
                  AND (orders.payload IS DISTINCT FROM EXCLUDED.payload
                       OR orders.placed_at <> EXCLUDED.placed_at)
                THEN 'PENDING'
                ELSE orders.state
            END,
            updated_at = EXCLUDED.updated_at,
            version = CASE
                WHEN orders.payload IS DISTINCT FROM EXCLUDED.payload
                  OR orders.placed_at <> EXCLUDED.placed_at
                  OR (orders.state = 'PENDING' AND orders.ready_at <> EXCLUDED.ready_at)
                THEN orders.version + 1
                ELSE orders.version
            END
        WHERE orders.state <> 'EXPORTED'
        RETURNING *, (xmax = 0) AS inserted
        "#,
    )
    .bind(shared::util::snowflake_id())
    .bind(&upsert.tenant_id)
    .bind(upsert.merchant_id)
    .bind(&upsert.external_order_id)
    .bind(&upsert.display_name)
    .bind(Json(&upsert.payload))
    .bind(&upsert.currency)
    .bind(upsert.total_price)
    .bind(upsert.placed_at)
    .bind(upsert.ready_at)
    .bind(upsert.now)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) if r.inserted => Ok(UpsertOutcome::Created(r.order.try_into()?)),
        Some(r) => Ok(UpsertOutcome::Updated(r.order.try_into()?)),
        None => {
            let existing =
                find_by_external(pool, upsert.merchant_id, &upsert.external_order_id)
                    .await?
                    .ok_or_else(|| {
                        StoreError::Corrupt(format!(
                            "upsert of {} skipped but row missing",
                            upsert.external_order_id
                        ))
                    })?;
            Ok(UpsertOutcome::Unchanged(existing))
        }
    }
}

pub async fn cancel(pool: &PgPool, upsert: &OrderUpsert, reason: &str) -> StoreResult<CancelOutcome> {
    let row: Option<UpsertRow> = sqlx::query_as(
        r#"
        INSERT INTO orders (
            id, tenant_id, merchant_id, external_order_id, display_name, state, payload,
            currency, total_price, placed_at, ready_at, created_at, updated_at,
            cancelled_at, last_error, version
        )
        VALUES ($1, $2, $3, $4, $5, 'ERROR', $6, $7, $8, $9, $10, $11, $11, $11, $12, 1)
        ON CONFLICT (merchant_id, external_order_id) DO UPDATE SET
            display_name = EXCLUDED.display_name,
            payload = EXCLUDED.payload,
            state = CASE
                WHEN orders.claimed_by IS NULL THEN 'ERROR'
                ELSE orders.state
            END,
            last_error = CASE
                WHEN orders.claimed_by IS NULL THEN EXCLUDED.last_error
                ELSE orders.last_error
            END,
            cancelled_at = COALESCE(orders.cancelled_at, EXCLUDED.cancelled_at),
            updated_at = EXCLUDED.updated_at,
            version = orders.version + 1
        WHERE orders.state <> 'EXPORTED'
        RETURNING *, (xmax = 0) AS inserted
        "#,
    )
    .bind(shared::util::snowflake_id())
    .bind(&upsert.tenant_id)
    .bind(upsert.merchant_id)
    .bind(&upsert.external_order_id)
    .bind(&upsert.display_name)
    .bind(Json(&upsert.payload))
    .bind(&upsert.currency)
    .bind(upsert.total_price)
    .bind(upsert.placed_at)
    .bind(upsert.ready_at)
    .bind(upsert.now)
    .bind(reason)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => {
            let order: Order = r.order.try_into()?;
            if order.state == OrderState::Error {
                Ok(CancelOutcome::Cancelled(order))
            } else {
                Ok(CancelOutcome::TooLate(order))
            }
        }
        None => {
            let existing =
                find_by_external(pool, upsert.merchant_id, &upsert.external_order_id)
                    .await?
                    .ok_or_else(|| {
                        StoreError::Corrupt(format!(
                            "cancel of {} skipped but row missing",
                            upsert.external_order_id
                        ))
                    })?;
            Ok(CancelOutcome::TooLate(existing))
        }
    }
}

pub async fn find_by_id(pool: &PgPool, merchant_id: i64, order_id: i64) -> StoreResult<Option<Order>> {
    let row: Option<OrderRow> =
        sqlx::query_as("SELECT * FROM orders WHERE id = $1 AND merchant_id = $2")
            .bind(order_id)
            .bind(merchant_id)
            .fetch_optional(pool)
            .await?;
    row.map(Order::try_from).transpose()
}

pub async fn find_by_external(
    pool: &PgPool,
    merchant_id: i64,
    external_order_id: &str,
) -> StoreResult<Option<Order>> {
    let row: Option<OrderRow> = sqlx::query_as(
        "SELECT * FROM orders WHERE merchant_id = $1 AND external_order_id = $2",
    )
    .bind(merchant_id)
    .bind(external_order_id)
    .fetch_optional(pool)
    .await?;
    row.map(Order::try_from).transpose()
}

pub async fn due(
    pool: &PgPool,
    merchant_id: i64,
    states: &[OrderState],
    now: i64,
    limit: i64,
) -> StoreResult<Vec<Order>> {
    let rows: Vec<OrderRow> = sqlx::query_as(
        "SELECT * FROM orders
         WHERE merchant_id = $1 AND state = ANY($2) AND ready_at <= $3
         ORDER BY ready_at ASC, id ASC
         LIMIT $4",
    )
    .bind(merchant_id)
    .bind(state_list(states))
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    into_orders(rows)
}

pub async fn transition(pool: &PgPool, t: &Transition) -> StoreResult<Option<Order>> {
    let row: Option<OrderRow> = sqlx::query_as(
        r#"
        UPDATE orders
        SET state = $1, last_error = $2, updated_at = $3, version = version + 1
        WHERE id = $4 AND version = $5
          AND ($1 <> 'READY' OR NOT EXISTS (
              SELECT 1 FROM order_exceptions e
              WHERE e.order_id = orders.id AND e.status = 'open'
          ))
        RETURNING *
        "#,
    )
    .bind(t.to.as_db())
    .bind(&t.last_error)
    .bind(t.now)
    .bind(t.order_id)
    .bind(t.expected_version)
    .fetch_optional(pool)
    .await?;
    row.map(Order::try_from).transpose()
}

/// Versioned state update inside a caller-owned transaction
pub(super) async fn set_state_versioned(
    conn: &mut PgConnection,
    order_id: i64,
    expected_version: i64,
    to: OrderState,
    last_error: Option<&str>,
    now: i64,
) -> StoreResult<Option<Order>> {
    let row: Option<OrderRow> = sqlx::query_as(
        "UPDATE orders
         SET state = $1, last_error = $2, updated_at = $3, version = version + 1
         WHERE id = $4 AND version = $5
         RETURNING *",
    )
    .bind(to.as_db())
    .bind(last_error)
    .bind(now)
    .bind(order_id)
    .bind(expected_version)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(Order::try_from).transpose()
}

pub async fn update_payload(
    pool: &PgPool,
    order_id: i64,
    expected_version: i64,
    payload: &OrderPayload,
    now: i64,
) -> StoreResult<Option<Order>> {
    let row: Option<OrderRow> = sqlx::query_as(
        "UPDATE orders
         SET payload = $1, updated_at = $2, version = version + 1
         WHERE id = $3 AND version = $4
         RETURNING *",
    )
    .bind(Json(payload))
    .bind(now)
    .bind(order_id)
    .bind(expected_version)
    .fetch_optional(pool)
    .await?;
    row.map(Order::try_from).transpose()
}

pub async fn claim_ready(
    pool: &PgPool,
    merchant_id: i64,
    batch_id: &str,
    limit: i64,
    now: i64,
) -> StoreResult<Vec<Order>> {
    // SKIP LOCKED keeps overlapping batch runs from claiming the same rows
    let rows: Vec<OrderRow> = sqlx::query_as(
        r#"
        UPDATE orders
        SET claimed_by = $2, claimed_at = $3, version = version + 1
        WHERE claimed_by IS NULL AND state = 'READY' AND cancelled_at IS NULL AND id IN (
            SELECT id FROM orders
            WHERE merchant_id = $1 AND state = 'READY' AND claimed_by IS NULL
              AND cancelled_at IS NULL
            ORDER BY ready_at ASC, id ASC
            LIMIT $4
            FOR UPDATE SKIP LOCKED
        )
        RETURNING *
        "#,
    )
    .bind(merchant_id)
    .bind(batch_id)
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut orders = into_orders(rows)?;
    orders.sort_by_key(|o| (o.ready_at, o.id));
    Ok(orders)
}

pub async fn release_stale_claims(
    pool: &PgPool,
    merchant_id: i64,
    claimed_before: i64,
) -> StoreResult<u64> {
    let result = sqlx::query(
        "UPDATE orders
         SET claimed_by = NULL,
             claimed_at = NULL,
             state = CASE WHEN cancelled_at IS NULL THEN state ELSE 'ERROR' END,
             last_error = CASE WHEN cancelled_at IS NULL THEN last_error ELSE $3 END,
             version = version + 1
         WHERE merchant_id = $1 AND state = 'READY'
           AND claimed_by IS NOT NULL AND claimed_at < $2",
    )
    .bind(merchant_id)
    .bind(claimed_before)
    .bind(CANCELLED_ON_PLATFORM)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Claimed READY order to EXPORTED/ERROR inside a caller-owned transaction
pub(super) async fn finish_claim(
    conn: &mut PgConnection,
    order_id: i64,
    batch_id: &str,
    to: OrderState,
    last_error: Option<&str>,
    now: i64,
) -> StoreResult<Option<Order>> {
    let exported_batch = (to == OrderState::Exported).then_some(batch_id);
    let row: Option<OrderRow> = sqlx::query_as(
        r#"
        UPDATE orders
        SET state = $1,
            export_batch_id = COALESCE($2, export_batch_id),
            last_error = $3,
            claimed_by = NULL,
            claimed_at = NULL,
            updated_at = $4,
            version = version + 1
        WHERE id = $5 AND state = 'READY' AND claimed_by = $6
        RETURNING *
        "#,
    )
    .bind(to.as_db())
    .bind(exported_batch)
    .bind(last_error)
    .bind(now)
    .bind(order_id)
    .bind(batch_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(Order::try_from).transpose()
}

pub async fn state_counts(pool: &PgPool, merchant_id: i64) -> StoreResult<OrderStateCounts> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT state, COUNT(*) FROM orders WHERE merchant_id = $1 GROUP BY state",
    )
    .bind(merchant_id)
    .fetch_all(pool)
    .await?;

    let mut counts = OrderStateCounts::default();
    for (state, n) in rows {
        match OrderState::from_db(&state) {
            Some(s) => counts.add(s, n),
            None => tracing::warn!(state = %state, "Unknown order state in counts"),
        }
    }
    Ok(counts)
}

pub async fn recent(
    pool: &PgPool,
    merchant_id: i64,
    state: Option<OrderState>,
    limit: i64,
    offset: i64,
) -> StoreResult<Vec<Order>> {
    let rows: Vec<OrderRow> = sqlx::query_as(
        "SELECT * FROM orders
         WHERE merchant_id = $1 AND ($2::TEXT IS NULL OR state = $2)
         ORDER BY updated_at DESC, id DESC
         LIMIT $3 OFFSET $4",
    )
    .bind(merchant_id)
    .bind(state.map(|s| s.as_db()))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    into_orders(rows)
}

/// Ids of the orders an erasure targets
pub(super) async fn ids_for_erasure(
    conn: &mut PgConnection,
    merchant_id: i64,
    external_ids: Option<&[String]>,
) -> StoreResult<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM orders
         WHERE merchant_id = $1 AND ($2::TEXT[] IS NULL OR external_order_id = ANY($2))
         FOR UPDATE",
    )
    .bind(merchant_id)
    .bind(external_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

pub(super) async fn delete_by_ids(conn: &mut PgConnection, ids: &[i64]) -> StoreResult<u64> {
    let result = sqlx::query("DELETE FROM orders WHERE id = ANY($1)")
        .bind(ids)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
