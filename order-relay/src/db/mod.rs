//! Database access layer
//!
//! The pipeline talks to storage only through [`OrderStore`]. Production uses
//! [`PgStore`]; tests and local demos use [`MemoryStore`]. Every state change
//! goes through a single atomic store call (compare-and-set on the order row
//! `version`, or a claim on `claimed_by`), so concurrent workers never both
//! transition the same order.

pub mod memory;
pub mod postgres;

use std::collections::HashSet;

use async_trait::async_trait;
use rust_decimal::Decimal;
use shared::models::{
    AuditEntry, ExportLogEntry, ExportOutcome, Merchant, Order, OrderException, OrderPayload,
    OrderState, OrderStateCounts, TenantSettings, ValidationFinding,
};
use thiserror::Error;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// `last_error` prefix for orders cancelled on the storefront
pub const CANCELLED_ON_PLATFORM: &str = "Cancelled on platform";

/// Canonical order data carried by one ingestion event
#[derive(Debug, Clone)]
pub struct OrderUpsert {
    pub tenant_id: String,
    pub merchant_id: i64,
    pub external_order_id: String,
    pub display_name: String,
    pub payload: OrderPayload,
    pub currency: String,
    pub total_price: Decimal,
    pub placed_at: i64,
    pub ready_at: i64,
    pub now: i64,
}

#[derive(Debug, Clone)]
pub enum UpsertOutcome {
    /// First sight of this external id
    Created(Order),
    /// Existing order refreshed
    Updated(Order),
    /// Order already exported; nothing written
    Unchanged(Order),
}

impl UpsertOutcome {
    pub fn order(&self) -> &Order {
        match self {
            Self::Created(o) | Self::Updated(o) | Self::Unchanged(o) => o,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// Order is now ERROR (created that way if it was unknown)
    Cancelled(Order),
    /// Order already exported or mid-export; state left alone
    TooLate(Order),
}

impl CancelOutcome {
    pub fn order(&self) -> &Order {
        match self {
            Self::Cancelled(o) | Self::TooLate(o) => o,
        }
    }
}

/// Compare-and-set state change
#[derive(Debug, Clone)]
pub struct Transition {
    pub order_id: i64,
    pub expected_version: i64,
    pub to: OrderState,
    pub last_error: Option<String>,
    pub now: i64,
}

/// Result of one validation pass, committed atomically with the state change
#[derive(Debug, Clone)]
pub struct ValidationCommit {
    pub order_id: i64,
    pub expected_version: i64,
    pub to: OrderState,
    /// Every failing rule; empty on a clean pass
    pub findings: Vec<ValidationFinding>,
    pub last_error: Option<String>,
    pub now: i64,
}

/// Outcome of a delivery attempt for a claimed order
#[derive(Debug, Clone)]
pub struct ExportCompletion {
    pub order_id: i64,
    pub batch_id: String,
    pub outcome: ExportOutcome,
    pub summary: String,
    pub now: i64,
}

/// Rows removed by a compliance erasure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ErasureCounts {
    pub orders: u64,
    pub exceptions: u64,
    pub export_logs: u64,
}

/// Repository over merchants, tenant settings, orders, exceptions,
/// export logs, and the tenant audit log.
#[async_trait]
pub trait OrderStore: Send + Sync {
    // ========== Credentials & settings ==========

    async fn find_merchant_by_domain(&self, shop_domain: &str) -> StoreResult<Option<Merchant>>;

    async fn find_merchant(&self, merchant_id: i64) -> StoreResult<Option<Merchant>>;

    async fn active_merchants(&self) -> StoreResult<Vec<Merchant>>;

    /// Stored settings, or defaults when the tenant never saved any
    async fn tenant_settings(&self, tenant_id: &str) -> StoreResult<TenantSettings>;

    async fn save_tenant_settings(&self, settings: &TenantSettings) -> StoreResult<()>;

    /// Subset of `skus` present in the tenant SKU registry
    async fn registered_skus(&self, tenant_id: &str, skus: &[String])
    -> StoreResult<HashSet<String>>;

    async fn mark_export_run(&self, merchant_id: i64, now: i64) -> StoreResult<()>;

    async fn mark_sweep_run(&self, merchant_id: i64, now: i64) -> StoreResult<()>;

    // ========== Ingestion ==========

    /// Insert or refresh by `(merchant_id, external_order_id)`.
    ///
    /// PENDING orders get a new `ready_at`; unclaimed READY orders drop back
    /// to PENDING; HELD and ERROR keep their state; EXPORTED is untouched.
    async fn upsert_order(&self, upsert: &OrderUpsert) -> StoreResult<UpsertOutcome>;

    /// Upsert with cancellation semantics: force ERROR unless exported or claimed
    async fn cancel_order(&self, upsert: &OrderUpsert, reason: &str)
    -> StoreResult<CancelOutcome>;

    // ========== Orders ==========

    async fn get_order(&self, merchant_id: i64, order_id: i64) -> StoreResult<Option<Order>>;

    async fn find_order_by_external(
        &self,
        merchant_id: i64,
        external_order_id: &str,
    ) -> StoreResult<Option<Order>>;

    /// Orders in `states` whose delay window has elapsed, oldest first
    async fn due_orders(
        &self,
        merchant_id: i64,
        states: &[OrderState],
        now: i64,
        limit: i64,
    ) -> StoreResult<Vec<Order>>;

    /// Compare-and-set on version. Refuses READY while exceptions are open.
    async fn transition(&self, transition: &Transition) -> StoreResult<Option<Order>>;

    /// Replace the payload (operator fix). Compare-and-set on version.
    async fn update_order_payload(
        &self,
        order_id: i64,
        expected_version: i64,
        payload: &OrderPayload,
        now: i64,
    ) -> StoreResult<Option<Order>>;

    /// State change plus exception bookkeeping in one transaction:
    /// findings not yet open are opened, open codes no longer reported are
    /// resolved by revalidation.
    async fn commit_validation(&self, commit: &ValidationCommit) -> StoreResult<Option<Order>>;

    // ========== Exceptions ==========

    async fn exceptions_for_order(&self, order_id: i64) -> StoreResult<Vec<OrderException>>;

    /// Resolve one open exception by operator action
    async fn resolve_exception(
        &self,
        merchant_id: i64,
        exception_id: i64,
        now: i64,
    ) -> StoreResult<Option<OrderException>>;

    async fn find_exception(
        &self,
        merchant_id: i64,
        exception_id: i64,
    ) -> StoreResult<Option<OrderException>>;

    // ========== Export ==========

    /// Atomically tag up to `limit` unclaimed READY orders with `batch_id`,
    /// oldest `ready_at` first.
    async fn claim_ready(
        &self,
        merchant_id: i64,
        batch_id: &str,
        limit: i64,
        now: i64,
    ) -> StoreResult<Vec<Order>>;

    /// Drop claims older than `claimed_before`; returns how many were released.
    /// Orders cancelled while claimed go to ERROR instead of back to READY.
    async fn release_stale_claims(&self, merchant_id: i64, claimed_before: i64)
    -> StoreResult<u64>;

    /// Record the delivery outcome and append the export log entry.
    /// `None` when the claim no longer belongs to this batch.
    async fn complete_export(&self, completion: &ExportCompletion) -> StoreResult<Option<Order>>;

    async fn export_logs_for_order(&self, order_id: i64) -> StoreResult<Vec<ExportLogEntry>>;

    // ========== Compliance ==========

    async fn erase_merchant_data(&self, merchant_id: i64) -> StoreResult<ErasureCounts>;

    async fn erase_orders(
        &self,
        merchant_id: i64,
        external_order_ids: &[String],
    ) -> StoreResult<ErasureCounts>;

    // ========== Read projections ==========

    async fn state_counts(&self, merchant_id: i64) -> StoreResult<OrderStateCounts>;

    async fn recent_orders(
        &self,
        merchant_id: i64,
        state: Option<OrderState>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Order>>;

    async fn recent_exceptions(
        &self,
        merchant_id: i64,
        open_only: bool,
        limit: i64,
    ) -> StoreResult<Vec<OrderException>>;

    async fn recent_export_logs(&self, merchant_id: i64, limit: i64)
    -> StoreResult<Vec<ExportLogEntry>>;

    // ========== Audit ==========

    async fn append_audit(
        &self,
        tenant_id: &str,
        action: &str,
        detail: Option<&serde_json::Value>,
        now: i64,
    ) -> StoreResult<()>;

    async fn audit_entries(
        &self,
        tenant_id: &str,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<AuditEntry>>;
}
