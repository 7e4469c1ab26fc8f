//! Delay sweep
//!
//! Picks up orders whose delay window has elapsed, validates them, and moves
//! them to READY or HELD. Transitions are compare-and-set on the row version;
//! an order written by ingestion mid-sweep is skipped and seen again on the
//! next pass.

use serde::Serialize;
use shared::models::{HeldRevalidation, Merchant, Order, OrderState, TenantSettings};

use super::Pipeline;
use super::validation::{self, RegistryLookup};
use crate::db::ValidationCommit;
use crate::error::PipelineResult;

/// Orders examined per merchant per sweep
const SWEEP_PAGE: i64 = 500;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub ready: usize,
    pub held: usize,
    /// Lost the compare-and-set to a concurrent write
    pub skipped: usize,
}

impl SweepReport {
    fn merge(&mut self, other: SweepReport) {
        self.examined += other.examined;
        self.ready += other.ready;
        self.held += other.held;
        self.skipped += other.skipped;
    }
}

/// Validate `order` and commit the resulting state with its findings.
///
/// `None` when the order changed since it was read.
pub async fn evaluate_order(
    pipeline: &Pipeline,
    order: &Order,
    settings: &TenantSettings,
    now: i64,
) -> PipelineResult<Option<Order>> {
    let registry: RegistryLookup =
        validation::lookup_registry(pipeline.store.as_ref(), settings, &order.payload).await;
    let findings = validation::evaluate(&order.payload, settings, &registry);
    let to = validation::next_state(&findings, order.ready_at, now);

    let committed = pipeline
        .store
        .commit_validation(&ValidationCommit {
            order_id: order.id,
            expected_version: order.version,
            to,
            findings,
            last_error: None,
            now,
        })
        .await?;
    Ok(committed)
}

pub async fn sweep_merchant(
    pipeline: &Pipeline,
    merchant: &Merchant,
    now: i64,
) -> PipelineResult<SweepReport> {
    let settings = pipeline.store.tenant_settings(&merchant.tenant_id).await?;
    let states: &[OrderState] = match settings.held_revalidation {
        HeldRevalidation::Automatic => &[OrderState::Pending, OrderState::Held],
        HeldRevalidation::Manual => &[OrderState::Pending],
    };

    let due = pipeline
        .store
        .due_orders(merchant.id, states, now, SWEEP_PAGE)
        .await?;

    let mut report = SweepReport::default();
    for order in &due {
        report.examined += 1;
        match evaluate_order(pipeline, order, &settings, now).await {
            Ok(Some(updated)) => match updated.state {
                OrderState::Ready => report.ready += 1,
                OrderState::Held => report.held += 1,
                _ => {}
            },
            Ok(None) => {
                tracing::debug!(order_id = order.id, "Order changed during sweep, skipping");
                report.skipped += 1;
            }
            Err(e) => {
                tracing::warn!(order_id = order.id, error = %e, "Order validation failed");
                report.skipped += 1;
            }
        }
    }
    Ok(report)
}

/// One sweep over every active merchant, ignoring tenant sweep intervals
pub async fn sweep(pipeline: &Pipeline, now: i64) -> PipelineResult<SweepReport> {
    let merchants = pipeline.store.active_merchants().await?;
    let mut total = SweepReport::default();
    for merchant in &merchants {
        match sweep_merchant(pipeline, merchant, now).await {
            Ok(r) => total.merge(r),
            Err(e) => {
                tracing::warn!(merchant_id = merchant.id, error = %e, "Sweep failed for merchant");
            }
        }
    }
    if total.examined > 0 {
        tracing::info!(
            examined = total.examined,
            ready = total.ready,
            held = total.held,
            skipped = total.skipped,
            "Delay sweep complete"
        );
    }
    Ok(total)
}

/// Sweep every merchant whose tenant sweep interval has elapsed
pub async fn run_due_sweeps(pipeline: &Pipeline, now: i64) -> PipelineResult<SweepReport> {
    let merchants = pipeline.store.active_merchants().await?;
    let mut total = SweepReport::default();
    for merchant in &merchants {
        let settings = match pipeline.store.tenant_settings(&merchant.tenant_id).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(merchant_id = merchant.id, error = %e, "Failed to load tenant settings");
                continue;
            }
        };
        if !merchant.sweep_due(settings.sweep_interval_ms(), now) {
            continue;
        }
        if let Err(e) = pipeline.store.mark_sweep_run(merchant.id, now).await {
            tracing::warn!(merchant_id = merchant.id, error = %e, "Failed to record sweep run");
            continue;
        }
        match sweep_merchant(pipeline, merchant, now).await {
            Ok(r) => total.merge(r),
            Err(e) => {
                tracing::warn!(merchant_id = merchant.id, error = %e, "Sweep failed for merchant");
            }
        }
    }
    Ok(total)
}
