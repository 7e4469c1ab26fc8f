//! Operator actions
//!
//! Manual moves for HELD and ERROR orders, plus tenant settings updates.
//! Every action writes a tenant audit entry.

use serde::Serialize;
use serde_json::json;
use shared::models::{
    Order, OrderException, OrderState, ShippingAddress, TenantSettings, TenantSettingsUpdate,
};

use super::Pipeline;
use super::scheduler::evaluate_order;
use crate::db::Transition;
use crate::error::{Missing, PipelineError, PipelineResult};

const CONCURRENT_WRITE: &str = "order changed concurrently, reload and retry";

async fn load_order(pipeline: &Pipeline, merchant_id: i64, order_id: i64) -> PipelineResult<Order> {
    pipeline
        .store
        .get_order(merchant_id, order_id)
        .await?
        .ok_or(PipelineError::NotFound(Missing::Order(order_id)))
}

async fn audit(pipeline: &Pipeline, tenant_id: &str, action: &str, detail: serde_json::Value, now: i64) {
    if let Err(e) = pipeline
        .store
        .append_audit(tenant_id, action, Some(&detail), now)
        .await
    {
        tracing::warn!(tenant_id, action, error = %e, "Failed to write audit entry");
    }
}

async fn revalidate_now(pipeline: &Pipeline, order: &Order, now: i64) -> PipelineResult<Order> {
    let settings = pipeline.store.tenant_settings(&order.tenant_id).await?;
    evaluate_order(pipeline, order, &settings, now)
        .await?
        .ok_or_else(|| PipelineError::InvalidState(CONCURRENT_WRITE.into()))
}

/// Re-run validation on a HELD order, or a PENDING one past its delay window
pub async fn revalidate(
    pipeline: &Pipeline,
    merchant_id: i64,
    order_id: i64,
    now: i64,
) -> PipelineResult<Order> {
    let order = load_order(pipeline, merchant_id, order_id).await?;
    match order.state {
        OrderState::Held => {}
        OrderState::Pending if order.is_due(now) => {}
        OrderState::Pending => {
            return Err(PipelineError::InvalidState(
                "order is still inside its delay window".into(),
            ));
        }
        OrderState::Exported => return Err(PipelineError::AlreadyExported(order.id)),
        other => {
            return Err(PipelineError::InvalidState(format!(
                "cannot revalidate an order in state {other}"
            )));
        }
    }

    let updated = revalidate_now(pipeline, &order, now).await?;
    audit(
        pipeline,
        &order.tenant_id,
        "order.revalidate",
        json!({ "order_id": order.id, "from": order.state, "to": updated.state }),
        now,
    )
    .await;
    Ok(updated)
}

/// Send an ERROR order back through validation
pub async fn retry(
    pipeline: &Pipeline,
    merchant_id: i64,
    order_id: i64,
    now: i64,
) -> PipelineResult<Order> {
    let order = load_order(pipeline, merchant_id, order_id).await?;
    if order.state == OrderState::Exported {
        return Err(PipelineError::AlreadyExported(order.id));
    }
    if order.state != OrderState::Error {
        return Err(PipelineError::InvalidState(format!(
            "only ERROR orders can be retried (state is {})",
            order.state
        )));
    }
    if order.is_cancelled() {
        return Err(PipelineError::OrderCancelled(order.id));
    }

    let updated = revalidate_now(pipeline, &order, now).await?;
    audit(
        pipeline,
        &order.tenant_id,
        "order.retry",
        json!({
            "order_id": order.id,
            "previous_error": order.last_error,
            "to": updated.state,
        }),
        now,
    )
    .await;
    Ok(updated)
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedException {
    pub exception: OrderException,
    pub order: Order,
}

/// Close one exception by hand. A HELD order with nothing left open moves on.
pub async fn resolve_exception(
    pipeline: &Pipeline,
    merchant_id: i64,
    exception_id: i64,
    now: i64,
) -> PipelineResult<ResolvedException> {
    let store = &pipeline.store;
    let existing = store
        .find_exception(merchant_id, exception_id)
        .await?
        .ok_or(PipelineError::NotFound(Missing::Exception(exception_id)))?;
    if !existing.is_open() {
        return Err(PipelineError::ExceptionResolved(exception_id));
    }

    let exception = store
        .resolve_exception(merchant_id, exception_id, now)
        .await?
        .ok_or(PipelineError::ExceptionResolved(exception_id))?;

    let mut order = load_order(pipeline, merchant_id, exception.order_id).await?;
    if order.state == OrderState::Held {
        let still_open = store
            .exceptions_for_order(order.id)
            .await?
            .iter()
            .any(OrderException::is_open);
        if !still_open {
            let to = if order.is_due(now) {
                OrderState::Ready
            } else {
                OrderState::Pending
            };
            match store
                .transition(&Transition {
                    order_id: order.id,
                    expected_version: order.version,
                    to,
                    last_error: None,
                    now,
                })
                .await?
            {
                Some(moved) => order = moved,
                None => {
                    tracing::info!(order_id = order.id, "Order changed while resolving exception");
                }
            }
        }
    }

    audit(
        pipeline,
        &order.tenant_id,
        "exception.resolve",
        json!({
            "exception_id": exception.id,
            "order_id": order.id,
            "code": exception.code,
            "order_state": order.state,
        }),
        now,
    )
    .await;
    Ok(ResolvedException { exception, order })
}

/// Replace the shipping address on a HELD or ERROR order.
///
/// State is untouched; call [`revalidate`] or [`retry`] afterwards.
pub async fn update_order_address(
    pipeline: &Pipeline,
    merchant_id: i64,
    order_id: i64,
    address: ShippingAddress,
    now: i64,
) -> PipelineResult<Order> {
    let order = load_order(pipeline, merchant_id, order_id).await?;
    if order.state == OrderState::Exported {
        return Err(PipelineError::AlreadyExported(order.id));
    }
    if !matches!(order.state, OrderState::Held | OrderState::Error) {
        return Err(PipelineError::InvalidState(format!(
            "address can only be edited on HELD or ERROR orders (state is {})",
            order.state
        )));
    }

    let mut address = address;
    address.country_code = address
        .country_code
        .map(|c| c.trim().to_ascii_uppercase());
    let mut payload = order.payload.clone();
    payload.shipping_address = Some(address);

    let updated = pipeline
        .store
        .update_order_payload(order.id, order.version, &payload, now)
        .await?
        .ok_or_else(|| PipelineError::InvalidState(CONCURRENT_WRITE.into()))?;

    audit(
        pipeline,
        &order.tenant_id,
        "order.address_update",
        json!({ "order_id": order.id }),
        now,
    )
    .await;
    Ok(updated)
}

/// Apply a partial settings update for `tenant_id`
pub async fn update_settings(
    pipeline: &Pipeline,
    tenant_id: &str,
    update: &TenantSettingsUpdate,
    now: i64,
) -> PipelineResult<TenantSettings> {
    update.check().map_err(PipelineError::Invalid)?;

    let mut settings = pipeline.store.tenant_settings(tenant_id).await?;
    let changed = settings.apply(update, now);
    pipeline.store.save_tenant_settings(&settings).await?;

    audit(
        pipeline,
        tenant_id,
        "settings.update",
        json!({ "changed": changed }),
        now,
    )
    .await;
    Ok(settings)
}
