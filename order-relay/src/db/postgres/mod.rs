//! PostgreSQL store
//!
//! Query functions live in one module per table; [`PgStore`] wires them to
//! [`OrderStore`] and owns the multi-statement transactions.

pub mod audit;
pub mod exceptions;
pub mod export_logs;
pub mod merchants;
pub mod orders;
pub mod tenants;

use std::collections::HashSet;

use async_trait::async_trait;
use shared::models::{
    AuditEntry, ExportLogEntry, ExportOutcome, Merchant, Order, OrderException, OrderPayload,
    OrderState, OrderStateCounts, TenantSettings,
};
use sqlx::PgPool;

use super::{
    CancelOutcome, ErasureCounts, ExportCompletion, OrderStore, OrderUpsert, StoreResult,
    Transition, UpsertOutcome, ValidationCommit,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply pending migrations
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPool::connect(database_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn erase(
        &self,
        merchant_id: i64,
        external_ids: Option<&[String]>,
    ) -> StoreResult<ErasureCounts> {
        let mut tx = self.pool.begin().await?;
        let ids = orders::ids_for_erasure(&mut tx, merchant_id, external_ids).await?;
        if ids.is_empty() {
            tx.rollback().await?;
            return Ok(ErasureCounts::default());
        }
        let export_logs = export_logs::delete_for_orders(&mut tx, &ids).await?;
        let exceptions = exceptions::delete_for_orders(&mut tx, &ids).await?;
        let orders = orders::delete_by_ids(&mut tx, &ids).await?;
        tx.commit().await?;
        Ok(ErasureCounts {
            orders,
            exceptions,
            export_logs,
        })
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn find_merchant_by_domain(&self, shop_domain: &str) -> StoreResult<Option<Merchant>> {
        merchants::find_by_domain(&self.pool, shop_domain).await
    }

    async fn find_merchant(&self, merchant_id: i64) -> StoreResult<Option<Merchant>> {
        merchants::find_by_id(&self.pool, merchant_id).await
    }

    async fn active_merchants(&self) -> StoreResult<Vec<Merchant>> {
        merchants::list_active(&self.pool).await
    }

    async fn tenant_settings(&self, tenant_id: &str) -> StoreResult<TenantSettings> {
        tenants::get(&self.pool, tenant_id).await
    }

    async fn save_tenant_settings(&self, settings: &TenantSettings) -> StoreResult<()> {
        tenants::save(&self.pool, settings).await
    }

    async fn registered_skus(
        &self,
        tenant_id: &str,
        skus: &[String],
    ) -> StoreResult<HashSet<String>> {
        tenants::registered_skus(&self.pool, tenant_id, skus).await
    }

    async fn mark_export_run(&self, merchant_id: i64, now: i64) -> StoreResult<()> {
        merchants::mark_export_run(&self.pool, merchant_id, now).await
    }

    async fn mark_sweep_run(&self, merchant_id: i64, now: i64) -> StoreResult<()> {
        merchants::mark_sweep_run(&self.pool, merchant_id, now).await
    }

    async fn upsert_order(&self, upsert: &OrderUpsert) -> StoreResult<UpsertOutcome> {
        orders::upsert(&self.pool, upsert).await
    }

    async fn cancel_order(&self, upsert: &OrderUpsert, reason: &str) -> StoreResult<CancelOutcome> {
        orders::cancel(&self.pool, upsert, reason).await
    }

    async fn get_order(&self, merchant_id: i64, order_id: i64) -> StoreResult<Option<Order>> {
        orders::find_by_id(&self.pool, merchant_id, order_id).await
    }

    async fn find_order_by_external(
        &self,
        merchant_id: i64,
        external_order_id: &str,
    ) -> StoreResult<Option<Order>> {
        orders::find_by_external(&self.pool, merchant_id, external_order_id).await
    }

    async fn due_orders(
        &self,
        merchant_id: i64,
        states: &[OrderState],
        now: i64,
        limit: i64,
    ) -> StoreResult<Vec<Order>> {
        orders::due(&self.pool, merchant_id, states, now, limit).await
    }

    async fn transition(&self, transition: &Transition) -> StoreResult<Option<Order>> {
        orders::transition(&self.pool, transition).await
    }

    async fn update_order_payload(
        &self,
        order_id: i64,
        expected_version: i64,
        payload: &OrderPayload,
        now: i64,
    ) -> StoreResult<Option<Order>> {
        orders::update_payload(&self.pool, order_id, expected_version, payload, now).await
    }

    async fn commit_validation(&self, commit: &ValidationCommit) -> StoreResult<Option<Order>> {
        let mut tx = self.pool.begin().await?;
        let Some(order) = orders::set_state_versioned(
            &mut tx,
            commit.order_id,
            commit.expected_version,
            commit.to,
            commit.last_error.as_deref(),
            commit.now,
        )
        .await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        let codes: Vec<String> = commit.findings.iter().map(|f| f.code.clone()).collect();
        exceptions::resolve_missing(&mut tx, order.id, &codes, commit.now).await?;
        exceptions::open_findings(&mut tx, order.id, order.merchant_id, &commit.findings, commit.now)
            .await?;
        tx.commit().await?;
        Ok(Some(order))
    }

    async fn exceptions_for_order(&self, order_id: i64) -> StoreResult<Vec<OrderException>> {
        exceptions::for_order(&self.pool, order_id).await
    }

    async fn resolve_exception(
        &self,
        merchant_id: i64,
        exception_id: i64,
        now: i64,
    ) -> StoreResult<Option<OrderException>> {
        exceptions::resolve_by_operator(&self.pool, merchant_id, exception_id, now).await
    }

    async fn find_exception(
        &self,
        merchant_id: i64,
        exception_id: i64,
    ) -> StoreResult<Option<OrderException>> {
        exceptions::find(&self.pool, merchant_id, exception_id).await
    }

    async fn claim_ready(
        &self,
        merchant_id: i64,
        batch_id: &str,
        limit: i64,
        now: i64,
    ) -> StoreResult<Vec<Order>> {
        orders::claim_ready(&self.pool, merchant_id, batch_id, limit, now).await
    }

    async fn release_stale_claims(&self, merchant_id: i64, claimed_before: i64) -> StoreResult<u64> {
        orders::release_stale_claims(&self.pool, merchant_id, claimed_before).await
    }

    async fn complete_export(&self, completion: &ExportCompletion) -> StoreResult<Option<Order>> {
        let (to, last_error) = match completion.outcome {
            ExportOutcome::Sent => (OrderState::Exported, None),
            ExportOutcome::Failed => (OrderState::Error, Some(completion.summary.as_str())),
        };

        let mut tx = self.pool.begin().await?;
        let Some(order) = orders::finish_claim(
            &mut tx,
            completion.order_id,
            &completion.batch_id,
            to,
            last_error,
            completion.now,
        )
        .await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        export_logs::append(
            &mut tx,
            order.id,
            order.merchant_id,
            &completion.batch_id,
            completion.outcome,
            &completion.summary,
            completion.now,
        )
        .await?;
        tx.commit().await?;
        Ok(Some(order))
    }

    async fn export_logs_for_order(&self, order_id: i64) -> StoreResult<Vec<ExportLogEntry>> {
        export_logs::for_order(&self.pool, order_id).await
    }

    async fn erase_merchant_data(&self, merchant_id: i64) -> StoreResult<ErasureCounts> {
        self.erase(merchant_id, None).await
    }

    async fn erase_orders(
        &self,
        merchant_id: i64,
        external_order_ids: &[String],
    ) -> StoreResult<ErasureCounts> {
        if external_order_ids.is_empty() {
            return Ok(ErasureCounts::default());
        }
        self.erase(merchant_id, Some(external_order_ids)).await
    }

    async fn state_counts(&self, merchant_id: i64) -> StoreResult<OrderStateCounts> {
        orders::state_counts(&self.pool, merchant_id).await
    }

    async fn recent_orders(
        &self,
        merchant_id: i64,
        state: Option<OrderState>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Order>> {
        orders::recent(&self.pool, merchant_id, state, limit, offset).await
    }

    async fn recent_exceptions(
        &self,
        merchant_id: i64,
        open_only: bool,
        limit: i64,
    ) -> StoreResult<Vec<OrderException>> {
        exceptions::recent(&self.pool, merchant_id, open_only, limit).await
    }

    async fn recent_export_logs(
        &self,
        merchant_id: i64,
        limit: i64,
    ) -> StoreResult<Vec<ExportLogEntry>> {
        export_logs::recent(&self.pool, merchant_id, limit).await
    }

    async fn append_audit(
        &self,
        tenant_id: &str,
        action: &str,
        detail: Option<&serde_json::Value>,
        now: i64,
    ) -> StoreResult<()> {
        audit::log(&self.pool, tenant_id, action, detail, now).await
    }

    async fn audit_entries(
        &self,
        tenant_id: &str,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<AuditEntry>> {
        audit::query(&self.pool, tenant_id, limit, offset).await
    }
}
