//! Tenant-level endpoints: settings and audit log

use axum::{
    Extension, Json,
    extract::{Query, State},
};
use serde::Deserialize;
use shared::models::{AuditEntry, TenantSettings, TenantSettingsUpdate};
use shared::util::now_millis;

use super::ApiResult;
use crate::auth::TenantIdentity;
use crate::pipeline::operator;
use crate::state::AppState;

/// GET /api/tenant/settings
pub async fn get_settings(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
) -> ApiResult<TenantSettings> {
    let settings = state
        .pipeline
        .store
        .tenant_settings(&identity.tenant_id)
        .await?;
    Ok(Json(settings))
}

/// PUT /api/tenant/settings
pub async fn update_settings(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
    Json(update): Json<TenantSettingsUpdate>,
) -> ApiResult<TenantSettings> {
    let settings =
        operator::update_settings(&state.pipeline, &identity.tenant_id, &update, now_millis())
            .await?;
    tracing::info!(tenant_id = %identity.tenant_id, by = %identity.email, "Tenant settings updated");
    Ok(Json(settings))
}

#[derive(Deserialize)]
pub struct AuditQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// GET /api/tenant/audit-log
pub async fn audit_log(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Vec<AuditEntry>> {
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let page = query.page.unwrap_or(1).max(1);
    let offset = (page - 1) * per_page;

    let entries = state
        .pipeline
        .store
        .audit_entries(&identity.tenant_id, per_page, offset)
        .await?;
    Ok(Json(entries))
}
