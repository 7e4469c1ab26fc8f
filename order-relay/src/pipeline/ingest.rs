//! Event ingestion
//!
//! Webhook deliveries and poll results both end up in [`apply_event`]. The
//! store's unique `(merchant_id, external_order_id)` key makes every path
//! idempotent; redelivery updates, never duplicates.

use serde::Serialize;
use serde_json::json;
use shared::models::{Merchant, TenantSettings};

use super::Pipeline;
use crate::db::{
    CANCELLED_ON_PLATFORM, CancelOutcome, ErasureCounts, OrderUpsert, UpsertOutcome,
};
use crate::error::{PipelineError, PipelineResult};
use crate::platform::{ExternalOrder, InboundEvent, verify_webhook_signature};

/// Raw webhook delivery, as received
#[derive(Debug, Clone, Copy)]
pub struct WebhookDelivery<'a> {
    pub shop_domain: &'a str,
    pub topic: &'a str,
    pub signature: Option<&'a str>,
    pub webhook_id: Option<&'a str>,
    pub body: &'a [u8],
}

/// What one event did to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Created { order_id: i64 },
    Updated { order_id: i64 },
    /// Already exported; left as is
    Unchanged { order_id: i64 },
    Cancelled { order_id: i64 },
    /// Cancellation arrived after export started
    CancelTooLate { order_id: i64 },
    Erased(ErasureCounts),
    /// Signed correctly but for a shop we do not know
    UnknownShop,
    /// Merchant is deactivated; only compliance topics are applied
    Inactive,
    Malformed,
    Ignored,
}

/// Canonical upsert for a platform order
pub fn canonicalize(
    merchant: &Merchant,
    settings: &TenantSettings,
    order: &ExternalOrder,
    now: i64,
) -> PipelineResult<OrderUpsert> {
    let placed_at = shared::util::parse_rfc3339_millis(&order.created_at).ok_or_else(|| {
        PipelineError::Invalid(format!(
            "order {} has unparseable created_at '{}'",
            order.id, order.created_at
        ))
    })?;
    Ok(OrderUpsert {
        tenant_id: merchant.tenant_id.clone(),
        merchant_id: merchant.id,
        external_order_id: order.id.clone(),
        display_name: order.display_name(),
        payload: order.to_payload(),
        currency: order.currency.clone().unwrap_or_default(),
        total_price: order.total_price,
        placed_at,
        ready_at: settings.ready_at(placed_at),
        now,
    })
}

fn cancel_reason(order: &ExternalOrder) -> String {
    match order.cancel_reason.as_deref().filter(|r| !r.is_empty()) {
        Some(reason) => format!("{CANCELLED_ON_PLATFORM}: {reason}"),
        None => CANCELLED_ON_PLATFORM.to_string(),
    }
}

pub async fn ingest_order(
    pipeline: &Pipeline,
    merchant: &Merchant,
    settings: &TenantSettings,
    order: &ExternalOrder,
    now: i64,
) -> PipelineResult<IngestOutcome> {
    let upsert = canonicalize(merchant, settings, order, now)?;
    let outcome = match pipeline.store.upsert_order(&upsert).await? {
        UpsertOutcome::Created(o) => IngestOutcome::Created { order_id: o.id },
        UpsertOutcome::Updated(o) => IngestOutcome::Updated { order_id: o.id },
        UpsertOutcome::Unchanged(o) => IngestOutcome::Unchanged { order_id: o.id },
    };
    Ok(outcome)
}

pub async fn cancel_order(
    pipeline: &Pipeline,
    merchant: &Merchant,
    settings: &TenantSettings,
    order: &ExternalOrder,
    now: i64,
) -> PipelineResult<IngestOutcome> {
    let upsert = canonicalize(merchant, settings, order, now)?;
    let outcome = match pipeline
        .store
        .cancel_order(&upsert, &cancel_reason(order))
        .await?
    {
        CancelOutcome::Cancelled(o) => {
            tracing::info!(merchant_id = merchant.id, order_id = o.id, "Order cancelled");
            IngestOutcome::Cancelled { order_id: o.id }
        }
        CancelOutcome::TooLate(o) => {
            tracing::warn!(
                merchant_id = merchant.id,
                order_id = o.id,
                state = %o.state,
                "Cancellation arrived after export started"
            );
            IngestOutcome::CancelTooLate { order_id: o.id }
        }
    };
    Ok(outcome)
}

/// Apply one decoded event for a known merchant
pub async fn apply_event(
    pipeline: &Pipeline,
    merchant: &Merchant,
    event: &InboundEvent,
    now: i64,
) -> PipelineResult<IngestOutcome> {
    match event {
        InboundEvent::ComplianceErasure => {
            let counts = pipeline.store.erase_merchant_data(merchant.id).await?;
            tracing::info!(
                merchant_id = merchant.id,
                orders = counts.orders,
                "Compliance erasure applied"
            );
            audit(pipeline, merchant, "compliance.erasure", json!(counts), now).await;
            return Ok(IngestOutcome::Erased(counts));
        }
        InboundEvent::CustomerRedact(redact) => {
            let ids = redact.order_ids();
            let counts = pipeline.store.erase_orders(merchant.id, &ids).await?;
            audit(
                pipeline,
                merchant,
                "compliance.customer_redact",
                json!({ "requested": ids.len(), "erased": counts }),
                now,
            )
            .await;
            return Ok(IngestOutcome::Erased(counts));
        }
        InboundEvent::Unknown(topic) => {
            tracing::debug!(merchant_id = merchant.id, topic = %topic, "Ignoring webhook topic");
            return Ok(IngestOutcome::Ignored);
        }
        InboundEvent::OrderUpserted(_) | InboundEvent::OrderCancelled(_) => {}
    }

    if !merchant.active {
        return Ok(IngestOutcome::Inactive);
    }

    let settings = pipeline.store.tenant_settings(&merchant.tenant_id).await?;
    match event {
        InboundEvent::OrderUpserted(order) => {
            ingest_order(pipeline, merchant, &settings, order, now).await
        }
        InboundEvent::OrderCancelled(order) => {
            cancel_order(pipeline, merchant, &settings, order, now).await
        }
        _ => Ok(IngestOutcome::Ignored),
    }
}

async fn audit(
    pipeline: &Pipeline,
    merchant: &Merchant,
    action: &str,
    detail: serde_json::Value,
    now: i64,
) {
    let detail = json!({ "merchant_id": merchant.id, "detail": detail });
    if let Err(e) = pipeline
        .store
        .append_audit(&merchant.tenant_id, action, Some(&detail), now)
        .await
    {
        tracing::warn!(merchant_id = merchant.id, action, error = %e, "Failed to write audit entry");
    }
}

/// Authenticate and apply one webhook delivery.
///
/// `Err(Authentication)` for a missing or bad signature and `Err(Store)` when
/// the write failed; everything else is acknowledged.
pub async fn handle_webhook(
    pipeline: &Pipeline,
    delivery: WebhookDelivery<'_>,
    now: i64,
) -> PipelineResult<IngestOutcome> {
    let signature = delivery
        .signature
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PipelineError::Authentication("missing signature header".into()))?;

    let merchant = pipeline
        .store
        .find_merchant_by_domain(delivery.shop_domain)
        .await?;

    let secret = match merchant {
        Some(ref m) => pipeline
            .store
            .tenant_settings(&m.tenant_id)
            .await?
            .webhook_secret
            .unwrap_or_else(|| pipeline.webhook_secret.clone()),
        None => pipeline.webhook_secret.clone(),
    };
    verify_webhook_signature(delivery.body, signature, &secret)?;

    let Some(merchant) = merchant else {
        tracing::info!(
            shop_domain = %delivery.shop_domain,
            topic = %delivery.topic,
            "Webhook for unknown shop acknowledged"
        );
        return Ok(IngestOutcome::UnknownShop);
    };

    let event = match InboundEvent::from_topic(delivery.topic, delivery.body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                merchant_id = merchant.id,
                topic = %delivery.topic,
                webhook_id = delivery.webhook_id.unwrap_or("-"),
                error = %e,
                "Malformed webhook body"
            );
            return Ok(IngestOutcome::Malformed);
        }
    };

    match apply_event(pipeline, &merchant, &event, now).await {
        // a bad timestamp is the platform's problem; retrying will not help
        Err(PipelineError::Invalid(msg)) => {
            tracing::warn!(merchant_id = merchant.id, error = %msg, "Rejected webhook order");
            Ok(IngestOutcome::Malformed)
        }
        other => {
            if let Ok(ref outcome) = other {
                tracing::debug!(
                    merchant_id = merchant.id,
                    topic = %delivery.topic,
                    event = event.kind(),
                    ?outcome,
                    "Webhook applied"
                );
            }
            other
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub merchants: usize,
    pub failed_merchants: usize,
    pub orders: usize,
    pub failed_orders: usize,
}

/// Fetch and ingest recent orders for one merchant
pub async fn poll_merchant(
    pipeline: &Pipeline,
    merchant: &Merchant,
    now: i64,
) -> PipelineResult<(usize, usize)> {
    let settings = pipeline.store.tenant_settings(&merchant.tenant_id).await?;
    let since = now - pipeline.settings.poll_lookback.as_millis() as i64;
    let orders = pipeline.platform.fetch_orders(merchant, since).await?;

    let (mut ok, mut failed) = (0, 0);
    for order in &orders {
        let result = if order.is_cancelled() {
            cancel_order(pipeline, merchant, &settings, order, now).await
        } else {
            ingest_order(pipeline, merchant, &settings, order, now).await
        };
        match result {
            Ok(_) => ok += 1,
            Err(e) => {
                failed += 1;
                tracing::warn!(
                    merchant_id = merchant.id,
                    external_order_id = %order.id,
                    error = %e,
                    "Failed to ingest polled order"
                );
            }
        }
    }
    Ok((ok, failed))
}

/// One poll run across all active merchants, isolating per-merchant failures
pub async fn poll_all(pipeline: &Pipeline, now: i64) -> PipelineResult<PollReport> {
    let merchants = pipeline.store.active_merchants().await?;
    let mut report = PollReport::default();

    for (i, merchant) in merchants.iter().enumerate() {
        if i > 0 && !pipeline.settings.poll_merchant_delay.is_zero() {
            tokio::time::sleep(pipeline.settings.poll_merchant_delay).await;
        }
        report.merchants += 1;
        match poll_merchant(pipeline, merchant, now).await {
            Ok((ok, failed)) => {
                report.orders += ok;
                report.failed_orders += failed;
            }
            Err(e) => {
                report.failed_merchants += 1;
                tracing::warn!(
                    merchant_id = merchant.id,
                    shop_domain = %merchant.shop_domain,
                    error = %e,
                    "Poll failed for merchant"
                );
            }
        }
    }

    tracing::info!(
        merchants = report.merchants,
        failed_merchants = report.failed_merchants,
        orders = report.orders,
        "Poll run complete"
    );
    Ok(report)
}
