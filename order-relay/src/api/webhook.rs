//! Storefront webhook handler
//!
//! POST /webhooks/storefront. Needs the raw body for signature verification.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use crate::error::PipelineError;
use crate::pipeline::ingest::{WebhookDelivery, handle_webhook};
use crate::state::AppState;

pub const SHOP_DOMAIN_HEADER: &str = "x-shop-domain";
pub const TOPIC_HEADER: &str = "x-shop-topic";
pub const SIGNATURE_HEADER: &str = "x-shop-hmac-sha256";
pub const WEBHOOK_ID_HEADER: &str = "x-shop-webhook-id";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// 401 on a bad signature, 500 when the store failed (so the platform
/// redelivers), 200 for everything else.
pub async fn receive(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let delivery = WebhookDelivery {
        shop_domain: header(&headers, SHOP_DOMAIN_HEADER).unwrap_or_default(),
        topic: header(&headers, TOPIC_HEADER).unwrap_or_default(),
        signature: header(&headers, SIGNATURE_HEADER),
        webhook_id: header(&headers, WEBHOOK_ID_HEADER),
        body: &body,
    };

    match handle_webhook(&state.pipeline, delivery, shared::util::now_millis()).await {
        Ok(_) => StatusCode::OK,
        Err(PipelineError::Authentication(reason)) => {
            tracing::warn!(
                shop_domain = %delivery.shop_domain,
                topic = %delivery.topic,
                reason = %reason,
                "Webhook authentication failed"
            );
            StatusCode::UNAUTHORIZED
        }
        Err(e @ PipelineError::Store(_)) => {
            tracing::error!(
                shop_domain = %delivery.shop_domain,
                topic = %delivery.topic,
                error = %e,
                "Webhook could not be stored"
            );
            StatusCode::INTERNAL_SERVER_ERROR
        }
        Err(e) => {
            tracing::warn!(
                shop_domain = %delivery.shop_domain,
                topic = %delivery.topic,
                error = %e,
                "Webhook acknowledged with error"
            );
            StatusCode::OK
        }
    }
}
