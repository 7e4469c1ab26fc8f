//! Export batcher
//!
//! Per merchant: release abandoned claims, claim a page of READY orders under
//! a fresh batch id, deliver each one, and record the outcome. A failed
//! delivery only affects its own order.

use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use shared::models::{ExportOutcome, Merchant, OrderState, TenantSettings};

use super::Pipeline;
use crate::db::ExportCompletion;
use crate::error::{PipelineError, PipelineResult};
use crate::platform::{DemoFulfillment, FulfillmentSink};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub released: u64,
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    /// Claim was taken away before the outcome could be recorded
    pub lost: usize,
}

/// `exp-{merchant_id}-{yyyymmddHHMMSS}-{4 hex}`
pub fn batch_id(merchant_id: i64, now: i64) -> String {
    let stamp = chrono::DateTime::from_timestamp_millis(now)
        .unwrap_or_default()
        .format("%Y%m%d%H%M%S");
    let suffix: u16 = rand::thread_rng().r#gen();
    format!("exp-{merchant_id}-{stamp}-{suffix:04x}")
}

fn sink_for(
    pipeline: &Pipeline,
    settings: &TenantSettings,
) -> PipelineResult<Arc<dyn FulfillmentSink>> {
    if settings.demo_mode {
        return Ok(Arc::new(DemoFulfillment));
    }
    pipeline.fulfillment.clone().ok_or_else(|| {
        PipelineError::Configuration("FULFILLMENT_URL is not configured".into())
    })
}

/// Run one export batch for `merchant`
pub async fn export_merchant(
    pipeline: &Pipeline,
    merchant: &Merchant,
    settings: &TenantSettings,
    now: i64,
) -> PipelineResult<BatchReport> {
    let sink = sink_for(pipeline, settings)?;
    let store = &pipeline.store;
    store.mark_export_run(merchant.id, now).await?;

    let ttl_ms = pipeline.settings.claim_ttl.as_millis() as i64;
    let released = store.release_stale_claims(merchant.id, now - ttl_ms).await?;
    if released > 0 {
        tracing::warn!(merchant_id = merchant.id, released, "Released stale export claims");
    }

    let batch_id = batch_id(merchant.id, now);
    let claimed = store
        .claim_ready(
            merchant.id,
            &batch_id,
            pipeline.settings.export_batch_size,
            now,
        )
        .await?;

    let mut report = BatchReport {
        batch_id: batch_id.clone(),
        released,
        claimed: claimed.len(),
        ..Default::default()
    };
    if claimed.is_empty() {
        return Ok(report);
    }

    for order in &claimed {
        let (outcome, summary) = match sink.deliver(&batch_id, order).await {
            Ok(receipt) => (ExportOutcome::Sent, receipt.summary),
            Err(e) => {
                tracing::warn!(
                    merchant_id = merchant.id,
                    batch_id = %batch_id,
                    order_id = order.id,
                    error = %e,
                    "Delivery failed"
                );
                (ExportOutcome::Failed, e.to_string())
            }
        };

        let completed = store
            .complete_export(&ExportCompletion {
                order_id: order.id,
                batch_id: batch_id.clone(),
                outcome,
                summary,
                now,
            })
            .await;

        match completed {
            Ok(Some(done)) => {
                if done.state == OrderState::Exported {
                    report.sent += 1;
                    if !settings.demo_mode
                        && let Err(e) = pipeline
                            .platform
                            .sync_exported(merchant, &done, &batch_id)
                            .await
                    {
                        tracing::warn!(
                            merchant_id = merchant.id,
                            order_id = done.id,
                            error = %e,
                            "Status sync-back failed"
                        );
                    }
                } else {
                    report.failed += 1;
                }
            }
            Ok(None) => {
                report.lost += 1;
                tracing::warn!(
                    batch_id = %batch_id,
                    order_id = order.id,
                    "Export claim lost before completion"
                );
            }
            // claim stays; released after the TTL and redelivered under the same key
            Err(e) => {
                report.lost += 1;
                tracing::error!(
                    batch_id = %batch_id,
                    order_id = order.id,
                    error = %e,
                    "Failed to record export outcome"
                );
            }
        }
    }

    tracing::info!(
        merchant_id = merchant.id,
        batch_id = %report.batch_id,
        claimed = report.claimed,
        sent = report.sent,
        failed = report.failed,
        "Export batch complete"
    );
    Ok(report)
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRunReport {
    pub batches: Vec<BatchReport>,
    pub failed_merchants: usize,
}

/// Export every merchant whose tenant cadence has elapsed
pub async fn run_due_exports(pipeline: &Pipeline, now: i64) -> PipelineResult<ExportRunReport> {
    let merchants = pipeline.store.active_merchants().await?;
    let mut run = ExportRunReport::default();

    for merchant in &merchants {
        let settings = match pipeline.store.tenant_settings(&merchant.tenant_id).await {
            Ok(s) => s,
            Err(e) => {
                run.failed_merchants += 1;
                tracing::warn!(merchant_id = merchant.id, error = %e, "Failed to load tenant settings");
                continue;
            }
        };
        if !merchant.export_due(settings.export_cadence_ms(), now) {
            continue;
        }
        match export_merchant(pipeline, merchant, &settings, now).await {
            Ok(report) => run.batches.push(report),
            Err(e) => {
                run.failed_merchants += 1;
                tracing::warn!(merchant_id = merchant.id, error = %e, "Export run failed for merchant");
            }
        }
    }
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_id_format() {
        // 2024-03-01T15:04:05Z
        let now = 1_709_305_445_000;
        let id = batch_id(42, now);
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts[0], "exp");
        assert_eq!(parts[1], "42");
        assert_eq!(parts[2], "20240301150405");
        assert_eq!(parts[3].len(), 4);
        assert!(parts[3].chars().all(|c| c.is_ascii_hexdigit()));
    }
}
