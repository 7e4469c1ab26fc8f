//! Merchant credential queries

use shared::models::Merchant;
use sqlx::PgPool;

use crate::db::StoreResult;

#[derive(sqlx::FromRow)]
struct MerchantRow {
    id: i64,
    tenant_id: String,
    shop_domain: String,
    access_token: String,
    active: bool,
    last_export_at: Option<i64>,
    last_sweep_at: Option<i64>,
}

impl From<MerchantRow> for Merchant {
    fn from(row: MerchantRow) -> Self {
        Merchant {
            id: row.id,
            tenant_id: row.tenant_id,
            shop_domain: row.shop_domain,
            access_token: row.access_token,
            active: row.active,
            last_export_at: row.last_export_at,
            last_sweep_at: row.last_sweep_at,
        }
    }
}

pub async fn find_by_domain(pool: &PgPool, shop_domain: &str) -> StoreResult<Option<Merchant>> {
    let row: Option<MerchantRow> =
        sqlx::query_as("SELECT * FROM merchants WHERE shop_domain = $1")
            .bind(shop_domain)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(Merchant::from))
}

pub async fn find_by_id(pool: &PgPool, merchant_id: i64) -> StoreResult<Option<Merchant>> {
    let row: Option<MerchantRow> = sqlx::query_as("SELECT * FROM merchants WHERE id = $1")
        .bind(merchant_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(Merchant::from))
}

pub async fn list_active(pool: &PgPool) -> StoreResult<Vec<Merchant>> {
    let rows: Vec<MerchantRow> =
        sqlx::query_as("SELECT * FROM merchants WHERE active ORDER BY id")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(Merchant::from).collect())
}

pub async fn mark_export_run(pool: &PgPool, merchant_id: i64, now: i64) -> StoreResult<()> {
    sqlx::query("UPDATE merchants SET last_export_at = $1 WHERE id = $2")
        .bind(now)
        .bind(merchant_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_sweep_run(pool: &PgPool, merchant_id: i64, now: i64) -> StoreResult<()> {
    sqlx::query("UPDATE merchants SET last_sweep_at = $1 WHERE id = $2")
        .bind(now)
        .bind(merchant_id)
        .execute(pool)
        .await?;
    Ok(())
}
