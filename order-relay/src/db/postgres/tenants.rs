//! Tenant settings and SKU registry queries

use std::collections::HashSet;

use shared::models::{HeldRevalidation, TenantSettings};
use sqlx::PgPool;

use crate::db::{StoreError, StoreResult};

#[derive(sqlx::FromRow)]
struct SettingsRow {
    tenant_id: String,
    delay_hours: i32,
    export_cadence_minutes: i32,
    sweep_interval_minutes: i32,
    demo_mode: bool,
    enforce_sku_registry: bool,
    allowed_countries: Vec<String>,
    held_revalidation: String,
    webhook_secret: Option<String>,
    updated_at: i64,
}

impl TryFrom<SettingsRow> for TenantSettings {
    type Error = StoreError;

    fn try_from(row: SettingsRow) -> Result<Self, Self::Error> {
        let held_revalidation = HeldRevalidation::from_db(&row.held_revalidation).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "tenant {} held_revalidation '{}'",
                row.tenant_id, row.held_revalidation
            ))
        })?;
        Ok(TenantSettings {
            tenant_id: row.tenant_id,
            delay_hours: row.delay_hours,
            export_cadence_minutes: row.export_cadence_minutes,
            sweep_interval_minutes: row.sweep_interval_minutes,
            demo_mode: row.demo_mode,
            enforce_sku_registry: row.enforce_sku_registry,
            allowed_countries: row.allowed_countries,
            held_revalidation,
            webhook_secret: row.webhook_secret,
            updated_at: row.updated_at,
        })
    }
}

pub async fn get(pool: &PgPool, tenant_id: &str) -> StoreResult<TenantSettings> {
    let row: Option<SettingsRow> =
        sqlx::query_as("SELECT * FROM tenant_settings WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_optional(pool)
            .await?;
    match row {
        Some(r) => r.try_into(),
        None => Ok(TenantSettings::defaults(tenant_id)),
    }
}

pub async fn save(pool: &PgPool, s: &TenantSettings) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO tenant_settings (
            tenant_id, delay_hours, export_cadence_minutes, sweep_interval_minutes,
            demo_mode, enforce_sku_registry, allowed_countries, held_revalidation,
            webhook_secret, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (tenant_id) DO UPDATE SET
            delay_hours = EXCLUDED.delay_hours,
            export_cadence_minutes = EXCLUDED.export_cadence_minutes,
            sweep_interval_minutes = EXCLUDED.sweep_interval_minutes,
            demo_mode = EXCLUDED.demo_mode,
            enforce_sku_registry = EXCLUDED.enforce_sku_registry,
            allowed_countries = EXCLUDED.allowed_countries,
            held_revalidation = EXCLUDED.held_revalidation,
            webhook_secret = EXCLUDED.webhook_secret,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&s.tenant_id)
    .bind(s.delay_hours)
    .bind(s.export_cadence_minutes)
    .bind(s.sweep_interval_minutes)
    .bind(s.demo_mode)
    .bind(s.enforce_sku_registry)
    .bind(&s.allowed_countries)
    .bind(s.held_revalidation.as_db())
    .bind(&s.webhook_secret)
    .bind(s.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn registered_skus(
    pool: &PgPool,
    tenant_id: &str,
    skus: &[String],
) -> StoreResult<HashSet<String>> {
    if skus.is_empty() {
        return Ok(HashSet::new());
    }
    let found: Vec<String> =
        sqlx::query_scalar("SELECT sku FROM tenant_skus WHERE tenant_id = $1 AND sku = ANY($2)")
            .bind(tenant_id)
            .bind(skus)
            .fetch_all(pool)
            .await?;
    Ok(found.into_iter().collect())
}
