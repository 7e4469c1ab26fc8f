//! Per-merchant operator endpoints: read projections and manual order actions

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use shared::error::{AppError, ErrorCode};
use shared::models::{
    ExportLogEntry, Merchant, Order, OrderException, OrderState, OrderStateCounts,
    ShippingAddress,
};
use shared::util::now_millis;

use super::ApiResult;
use crate::auth::TenantIdentity;
use crate::pipeline::operator::{self, ResolvedException};
use crate::state::AppState;

/// Merchant must exist and belong to the caller's tenant
pub async fn verify_merchant(
    state: &AppState,
    merchant_id: i64,
    tenant_id: &str,
) -> Result<Merchant, AppError> {
    state
        .pipeline
        .store
        .find_merchant(merchant_id)
        .await?
        .filter(|m| m.tenant_id == tenant_id)
        .ok_or_else(|| {
            AppError::with_message(
                ErrorCode::MerchantNotFound,
                "Merchant not found or access denied",
            )
        })
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub state: Option<String>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    /// Only open exceptions (default true)
    pub open: Option<bool>,
}

/// GET /api/tenant/merchants/{id}/summary
pub async fn summary(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
    Path(merchant_id): Path<i64>,
) -> ApiResult<OrderStateCounts> {
    verify_merchant(&state, merchant_id, &identity.tenant_id).await?;
    let counts = state.pipeline.store.state_counts(merchant_id).await?;
    Ok(Json(counts))
}

/// GET /api/tenant/merchants/{id}/orders
pub async fn list_orders(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
    Path(merchant_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Vec<Order>> {
    verify_merchant(&state, merchant_id, &identity.tenant_id).await?;

    let filter = match query.state.as_deref() {
        None | Some("") => None,
        Some(s) => Some(
            OrderState::from_db(&s.to_ascii_uppercase())
                .ok_or_else(|| AppError::validation(format!("unknown order state '{s}'")))?,
        ),
    };
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let page = query.page.unwrap_or(1).max(1);
    let offset = (page - 1) * per_page;

    let orders = state
        .pipeline
        .store
        .recent_orders(merchant_id, filter, per_page, offset)
        .await?;
    Ok(Json(orders))
}

#[derive(Serialize)]
pub struct OrderDetail {
    pub order: Order,
    pub exceptions: Vec<OrderException>,
    pub export_logs: Vec<ExportLogEntry>,
}

/// GET /api/tenant/merchants/{id}/orders/{order_id}
pub async fn order_detail(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
    Path((merchant_id, order_id)): Path<(i64, i64)>,
) -> ApiResult<OrderDetail> {
    verify_merchant(&state, merchant_id, &identity.tenant_id).await?;
    let store = &state.pipeline.store;

    let order = store
        .get_order(merchant_id, order_id)
        .await?
        .ok_or_else(|| AppError::new(ErrorCode::OrderNotFound))?;
    let exceptions = store.exceptions_for_order(order.id).await?;
    let export_logs = store.export_logs_for_order(order.id).await?;

    Ok(Json(OrderDetail {
        order,
        exceptions,
        export_logs,
    }))
}

/// GET /api/tenant/merchants/{id}/exceptions
pub async fn list_exceptions(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
    Path(merchant_id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<OrderException>> {
    verify_merchant(&state, merchant_id, &identity.tenant_id).await?;
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let list = state
        .pipeline
        .store
        .recent_exceptions(merchant_id, query.open.unwrap_or(true), limit)
        .await?;
    Ok(Json(list))
}

/// GET /api/tenant/merchants/{id}/export-logs
pub async fn list_export_logs(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
    Path(merchant_id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<ExportLogEntry>> {
    verify_merchant(&state, merchant_id, &identity.tenant_id).await?;
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let list = state
        .pipeline
        .store
        .recent_export_logs(merchant_id, limit)
        .await?;
    Ok(Json(list))
}

// ========== Operator actions ==========

/// POST /api/tenant/merchants/{id}/orders/{order_id}/revalidate
pub async fn revalidate(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
    Path((merchant_id, order_id)): Path<(i64, i64)>,
) -> ApiResult<Order> {
    verify_merchant(&state, merchant_id, &identity.tenant_id).await?;
    let order = operator::revalidate(&state.pipeline, merchant_id, order_id, now_millis()).await?;
    Ok(Json(order))
}

/// POST /api/tenant/merchants/{id}/orders/{order_id}/retry
pub async fn retry(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
    Path((merchant_id, order_id)): Path<(i64, i64)>,
) -> ApiResult<Order> {
    verify_merchant(&state, merchant_id, &identity.tenant_id).await?;
    let order = operator::retry(&state.pipeline, merchant_id, order_id, now_millis()).await?;
    Ok(Json(order))
}

/// PUT /api/tenant/merchants/{id}/orders/{order_id}/address
pub async fn update_address(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
    Path((merchant_id, order_id)): Path<(i64, i64)>,
    Json(address): Json<ShippingAddress>,
) -> ApiResult<Order> {
    verify_merchant(&state, merchant_id, &identity.tenant_id).await?;
    let order = operator::update_order_address(
        &state.pipeline,
        merchant_id,
        order_id,
        address,
        now_millis(),
    )
    .await?;
    Ok(Json(order))
}

/// POST /api/tenant/merchants/{id}/exceptions/{exception_id}/resolve
pub async fn resolve_exception(
    State(state): State<AppState>,
    Extension(identity): Extension<TenantIdentity>,
    Path((merchant_id, exception_id)): Path<(i64, i64)>,
) -> ApiResult<ResolvedException> {
    verify_merchant(&state, merchant_id, &identity.tenant_id).await?;
    let resolved =
        operator::resolve_exception(&state.pipeline, merchant_id, exception_id, now_millis())
            .await?;
    Ok(Json(resolved))
}
