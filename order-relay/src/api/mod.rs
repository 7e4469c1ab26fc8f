//! HTTP routes for order-relay

pub mod health;
pub mod merchant;
pub mod tenant;
pub mod webhook;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::{Router, middleware};
use shared::error::AppError;
use tower_http::trace::TraceLayer;

use crate::auth::tenant_auth_middleware;
use crate::state::AppState;

pub type ApiResult<T> = Result<axum::Json<T>, AppError>;

/// Webhook bodies above this are rejected before signature checks
const WEBHOOK_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Create the combined router
pub fn create_router(state: AppState) -> Router {
    // Operator API (tenant JWT)
    let tenant = Router::new()
        .route(
            "/api/tenant/settings",
            get(tenant::get_settings).put(tenant::update_settings),
        )
        .route("/api/tenant/audit-log", get(tenant::audit_log))
        .route(
            "/api/tenant/merchants/{id}/summary",
            get(merchant::summary),
        )
        .route(
            "/api/tenant/merchants/{id}/orders",
            get(merchant::list_orders),
        )
        .route(
            "/api/tenant/merchants/{id}/orders/{order_id}",
            get(merchant::order_detail),
        )
        .route(
            "/api/tenant/merchants/{id}/orders/{order_id}/revalidate",
            post(merchant::revalidate),
        )
        .route(
            "/api/tenant/merchants/{id}/orders/{order_id}/retry",
            post(merchant::retry),
        )
        .route(
            "/api/tenant/merchants/{id}/orders/{order_id}/address",
            put(merchant::update_address),
        )
        .route(
            "/api/tenant/merchants/{id}/exceptions",
            get(merchant::list_exceptions),
        )
        .route(
            "/api/tenant/merchants/{id}/exceptions/{exception_id}/resolve",
            post(merchant::resolve_exception),
        )
        .route(
            "/api/tenant/merchants/{id}/export-logs",
            get(merchant::list_export_logs),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            tenant_auth_middleware,
        ));

    // Storefront webhooks (signature-verified, raw body)
    let webhooks = Router::new()
        .route("/webhooks/storefront", post(webhook::receive))
        .layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT));

    Router::new()
        .route("/health", get(health::health_check))
        .merge(webhooks)
        .merge(tenant)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
