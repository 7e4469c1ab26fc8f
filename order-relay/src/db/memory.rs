//! In-memory store
//!
//! Same contract as [`PgStore`](super::PgStore), backed by one mutex so every
//! trait call is atomic. Used by the test suite.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use shared::models::{
    AuditEntry, ExceptionStatus, ExportLogEntry, ExportOutcome, Merchant, Order, OrderException,
    OrderPayload, OrderState, OrderStateCounts, ResolvedBy, TenantSettings,
};

use super::{
    CANCELLED_ON_PLATFORM, CancelOutcome, ErasureCounts, ExportCompletion, OrderStore,
    OrderUpsert, StoreError, StoreResult, Transition, UpsertOutcome, ValidationCommit,
};

#[derive(Default)]
struct Inner {
    next_id: i64,
    offline: bool,
    sku_registry_down: bool,
    merchants: BTreeMap<i64, Merchant>,
    settings: HashMap<String, TenantSettings>,
    skus: HashMap<String, HashSet<String>>,
    orders: BTreeMap<i64, Order>,
    exceptions: Vec<OrderException>,
    export_logs: Vec<ExportLogEntry>,
    audit: Vec<AuditEntry>,
}

impl Inner {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn order_by_external(&mut self, merchant_id: i64, external_id: &str) -> Option<&mut Order> {
        self.orders
            .values_mut()
            .find(|o| o.merchant_id == merchant_id && o.external_order_id == external_id)
    }

    fn has_open_exceptions(&self, order_id: i64) -> bool {
        self.exceptions
            .iter()
            .any(|e| e.order_id == order_id && e.is_open())
    }

    fn new_order(&mut self, upsert: &OrderUpsert, state: OrderState) -> Order {
        Order {
            id: self.id(),
            tenant_id: upsert.tenant_id.clone(),
            merchant_id: upsert.merchant_id,
            external_order_id: upsert.external_order_id.clone(),
            display_name: upsert.display_name.clone(),
            state,
            payload: upsert.payload.clone(),
            currency: upsert.currency.clone(),
            total_price: upsert.total_price,
            placed_at: upsert.placed_at,
            ready_at: upsert.ready_at,
            created_at: upsert.now,
            updated_at: upsert.now,
            cancelled_at: None,
            export_batch_id: None,
            last_error: None,
            claimed_by: None,
            claimed_at: None,
            version: 1,
        }
    }

    fn erase(&mut self, merchant_id: i64, external_ids: Option<&[String]>) -> ErasureCounts {
        let doomed: HashSet<i64> = self
            .orders
            .values()
            .filter(|o| {
                o.merchant_id == merchant_id
                    && external_ids.is_none_or(|ids| ids.contains(&o.external_order_id))
            })
            .map(|o| o.id)
            .collect();

        let before_ex = self.exceptions.len();
        self.exceptions.retain(|e| !doomed.contains(&e.order_id));
        let before_logs = self.export_logs.len();
        self.export_logs.retain(|l| !doomed.contains(&l.order_id));
        self.orders.retain(|id, _| !doomed.contains(id));

        ErasureCounts {
            orders: doomed.len() as u64,
            exceptions: (before_ex - self.exceptions.len()) as u64,
            export_logs: (before_logs - self.export_logs.len()) as u64,
        }
    }
}

/// Mutex-guarded store for tests
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        let inner = self.inner.lock();
        if inner.offline {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(inner)
    }

    // ========== Provisioning & fault injection ==========

    pub fn insert_merchant(&self, merchant: Merchant) {
        self.inner.lock().merchants.insert(merchant.id, merchant);
    }

    pub fn register_skus(&self, tenant_id: &str, skus: &[&str]) {
        self.inner
            .lock()
            .skus
            .entry(tenant_id.to_string())
            .or_default()
            .extend(skus.iter().map(|s| s.to_string()));
    }

    /// Make every store call fail with [`StoreError::Unavailable`]
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Make SKU registry lookups fail while everything else keeps working
    pub fn set_sku_registry_down(&self, down: bool) {
        self.inner.lock().sku_registry_down = down;
    }

    /// Overwrite an order row directly (test setup)
    pub fn put_order(&self, order: Order) {
        self.inner.lock().orders.insert(order.id, order);
    }

    pub fn all_orders(&self) -> Vec<Order> {
        self.inner.lock().orders.values().cloned().collect()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn find_merchant_by_domain(&self, shop_domain: &str) -> StoreResult<Option<Merchant>> {
        let inner = self.lock()?;
        Ok(inner
            .merchants
            .values()
            .find(|m| m.shop_domain == shop_domain)
            .cloned())
    }

    async fn find_merchant(&self, merchant_id: i64) -> StoreResult<Option<Merchant>> {
        Ok(self.lock()?.merchants.get(&merchant_id).cloned())
    }

    async fn active_merchants(&self) -> StoreResult<Vec<Merchant>> {
        let inner = self.lock()?;
        Ok(inner.merchants.values().filter(|m| m.active).cloned().collect())
    }

    async fn tenant_settings(&self, tenant_id: &str) -> StoreResult<TenantSettings> {
        let inner = self.lock()?;
        Ok(inner
            .settings
            .get(tenant_id)
            .cloned()
            .unwrap_or_else(|| TenantSettings::defaults(tenant_id)))
    }

    async fn save_tenant_settings(&self, settings: &TenantSettings) -> StoreResult<()> {
        self.lock()?
            .settings
            .insert(settings.tenant_id.clone(), settings.clone());
        Ok(())
    }

    async fn registered_skus(
        &self,
        tenant_id: &str,
        skus: &[String],
    ) -> StoreResult<HashSet<String>> {
        let inner = self.lock()?;
        if inner.sku_registry_down {
            return Err(StoreError::Unavailable("sku registry offline".into()));
        }
        let Some(registry) = inner.skus.get(tenant_id) else {
            return Ok(HashSet::new());
        };
        Ok(skus
            .iter()
            .filter(|s| registry.contains(*s))
            .cloned()
            .collect())
    }

    async fn mark_export_run(&self, merchant_id: i64, now: i64) -> StoreResult<()> {
        if let Some(m) = self.lock()?.merchants.get_mut(&merchant_id) {
            m.last_export_at = Some(now);
        }
        Ok(())
    }

    async fn mark_sweep_run(&self, merchant_id: i64, now: i64) -> StoreResult<()> {
        if let Some(m) = self.lock()?.merchants.get_mut(&merchant_id) {
            m.last_sweep_at = Some(now);
        }
        Ok(())
    }

    async fn upsert_order(&self, upsert: &OrderUpsert) -> StoreResult<UpsertOutcome> {
        let mut inner = self.lock()?;
        if let Some(order) = inner.order_by_external(upsert.merchant_id, &upsert.external_order_id)
        {
            if order.state == OrderState::Exported {
                return Ok(UpsertOutcome::Unchanged(order.clone()));
            }
            let changed = order.payload != upsert.payload || order.placed_at != upsert.placed_at;
            let demote = changed && order.state == OrderState::Ready && order.claimed_by.is_none();
            let rescheduled = order.state == OrderState::Pending && order.ready_at != upsert.ready_at;
            if order.state == OrderState::Pending || demote {
                order.ready_at = upsert.ready_at;
            }
            if demote {
                order.state = OrderState::Pending;
            }
            order.display_name = upsert.display_name.clone();
            order.payload = upsert.payload.clone();
            order.currency = upsert.currency.clone();
            order.total_price = upsert.total_price;
            order.placed_at = upsert.placed_at;
            order.updated_at = upsert.now;
            if changed || rescheduled {
                order.version += 1;
            }
            return Ok(UpsertOutcome::Updated(order.clone()));
        }

        let order = inner.new_order(upsert, OrderState::Pending);
        inner.orders.insert(order.id, order.clone());
        Ok(UpsertOutcome::Created(order))
    }

    async fn cancel_order(&self, upsert: &OrderUpsert, reason: &str) -> StoreResult<CancelOutcome> {
        let mut inner = self.lock()?;
        if let Some(order) = inner.order_by_external(upsert.merchant_id, &upsert.external_order_id)
        {
            if order.state == OrderState::Exported {
                return Ok(CancelOutcome::TooLate(order.clone()));
            }
            order.display_name = upsert.display_name.clone();
            order.payload = upsert.payload.clone();
            order.cancelled_at = order.cancelled_at.or(Some(upsert.now));
            order.updated_at = upsert.now;
            order.version += 1;
            if order.claimed_by.is_some() {
                return Ok(CancelOutcome::TooLate(order.clone()));
            }
            order.state = OrderState::Error;
            order.last_error = Some(reason.to_string());
            return Ok(CancelOutcome::Cancelled(order.clone()));
        }

        let mut order = inner.new_order(upsert, OrderState::Error);
        order.cancelled_at = Some(upsert.now);
        order.last_error = Some(reason.to_string());
        inner.orders.insert(order.id, order.clone());
        Ok(CancelOutcome::Cancelled(order))
    }

    async fn get_order(&self, merchant_id: i64, order_id: i64) -> StoreResult<Option<Order>> {
        let inner = self.lock()?;
        Ok(inner
            .orders
            .get(&order_id)
            .filter(|o| o.merchant_id == merchant_id)
            .cloned())
    }

    async fn find_order_by_external(
        &self,
        merchant_id: i64,
        external_order_id: &str,
    ) -> StoreResult<Option<Order>> {
        let mut inner = self.lock()?;
        Ok(inner
            .order_by_external(merchant_id, external_order_id)
            .cloned())
    }

    async fn due_orders(
        &self,
        merchant_id: i64,
        states: &[OrderState],
        now: i64,
        limit: i64,
    ) -> StoreResult<Vec<Order>> {
        let inner = self.lock()?;
        let mut due: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| o.merchant_id == merchant_id && states.contains(&o.state) && o.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|o| (o.ready_at, o.id));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn transition(&self, t: &Transition) -> StoreResult<Option<Order>> {
        let mut inner = self.lock()?;
        if t.to == OrderState::Ready && inner.has_open_exceptions(t.order_id) {
            return Ok(None);
        }
        let Some(order) = inner
            .orders
            .get_mut(&t.order_id)
            .filter(|o| o.version == t.expected_version)
        else {
            return Ok(None);
        };
        order.state = t.to;
        order.last_error = t.last_error.clone();
        order.updated_at = t.now;
        order.version += 1;
        Ok(Some(order.clone()))
    }

    async fn update_order_payload(
        &self,
        order_id: i64,
        expected_version: i64,
        payload: &OrderPayload,
        now: i64,
    ) -> StoreResult<Option<Order>> {
        let mut inner = self.lock()?;
        let Some(order) = inner
            .orders
            .get_mut(&order_id)
            .filter(|o| o.version == expected_version)
        else {
            return Ok(None);
        };
        order.payload = payload.clone();
        order.updated_at = now;
        order.version += 1;
        Ok(Some(order.clone()))
    }

    async fn commit_validation(&self, c: &ValidationCommit) -> StoreResult<Option<Order>> {
        let mut inner = self.lock()?;
        let Some(order) = inner
            .orders
            .get_mut(&c.order_id)
            .filter(|o| o.version == c.expected_version)
        else {
            return Ok(None);
        };
        order.state = c.to;
        order.last_error = c.last_error.clone();
        order.updated_at = c.now;
        order.version += 1;
        let order = order.clone();

        let reported: HashSet<&str> = c.findings.iter().map(|f| f.code.as_str()).collect();
        let mut still_open = HashSet::new();
        for e in inner
            .exceptions
            .iter_mut()
            .filter(|e| e.order_id == order.id && e.is_open())
        {
            if reported.contains(e.code.as_str()) {
                still_open.insert(e.code.clone());
            } else {
                e.status = ExceptionStatus::Resolved;
                e.resolved_by = Some(ResolvedBy::Revalidation);
                e.resolved_at = Some(c.now);
            }
        }

        for finding in c.findings.iter().filter(|f| !still_open.contains(&f.code)) {
            let id = inner.id();
            inner.exceptions.push(OrderException {
                id,
                order_id: order.id,
                merchant_id: order.merchant_id,
                code: finding.code.clone(),
                message: finding.message.clone(),
                status: ExceptionStatus::Open,
                resolved_by: None,
                created_at: c.now,
                resolved_at: None,
            });
        }
        Ok(Some(order))
    }

    async fn exceptions_for_order(&self, order_id: i64) -> StoreResult<Vec<OrderException>> {
        let inner = self.lock()?;
        Ok(inner
            .exceptions
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn resolve_exception(
        &self,
        merchant_id: i64,
        exception_id: i64,
        now: i64,
    ) -> StoreResult<Option<OrderException>> {
        let mut inner = self.lock()?;
        let Some(e) = inner
            .exceptions
            .iter_mut()
            .find(|e| e.id == exception_id && e.merchant_id == merchant_id && e.is_open())
        else {
            return Ok(None);
        };
        e.status = ExceptionStatus::Resolved;
        e.resolved_by = Some(ResolvedBy::Operator);
        e.resolved_at = Some(now);
        Ok(Some(e.clone()))
    }

    async fn find_exception(
        &self,
        merchant_id: i64,
        exception_id: i64,
    ) -> StoreResult<Option<OrderException>> {
        let inner = self.lock()?;
        Ok(inner
            .exceptions
            .iter()
            .find(|e| e.id == exception_id && e.merchant_id == merchant_id)
            .cloned())
    }

    async fn claim_ready(
        &self,
        merchant_id: i64,
        batch_id: &str,
        limit: i64,
        now: i64,
    ) -> StoreResult<Vec<Order>> {
        let mut inner = self.lock()?;
        let mut candidates: Vec<(i64, i64)> = inner
            .orders
            .values()
            .filter(|o| {
                o.merchant_id == merchant_id
                    && o.state == OrderState::Ready
                    && o.claimed_by.is_none()
                    && o.cancelled_at.is_none()
            })
            .map(|o| (o.ready_at, o.id))
            .collect();
        candidates.sort();
        candidates.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(candidates.len());
        for (_, id) in candidates {
            if let Some(order) = inner.orders.get_mut(&id) {
                order.claimed_by = Some(batch_id.to_string());
                order.claimed_at = Some(now);
                order.version += 1;
                claimed.push(order.clone());
            }
        }
        Ok(claimed)
    }

    async fn release_stale_claims(&self, merchant_id: i64, claimed_before: i64) -> StoreResult<u64> {
        let mut inner = self.lock()?;
        let mut released = 0;
        for order in inner.orders.values_mut().filter(|o| {
            o.merchant_id == merchant_id
                && o.state == OrderState::Ready
                && o.claimed_by.is_some()
                && o.claimed_at.is_some_and(|at| at < claimed_before)
        }) {
            order.claimed_by = None;
            order.claimed_at = None;
            if order.cancelled_at.is_some() {
                order.state = OrderState::Error;
                order.last_error = Some(CANCELLED_ON_PLATFORM.to_string());
            }
            order.version += 1;
            released += 1;
        }
        Ok(released)
    }

    async fn complete_export(&self, c: &ExportCompletion) -> StoreResult<Option<Order>> {
        let mut inner = self.lock()?;
        let Some(order) = inner.orders.get_mut(&c.order_id).filter(|o| {
            o.state == OrderState::Ready && o.claimed_by.as_deref() == Some(c.batch_id.as_str())
        }) else {
            return Ok(None);
        };
        match c.outcome {
            ExportOutcome::Sent => {
                order.state = OrderState::Exported;
                order.export_batch_id = Some(c.batch_id.clone());
                order.last_error = None;
            }
            ExportOutcome::Failed => {
                order.state = OrderState::Error;
                order.last_error = Some(c.summary.clone());
            }
        }
        order.claimed_by = None;
        order.claimed_at = None;
        order.updated_at = c.now;
        order.version += 1;
        let order = order.clone();

        let id = inner.id();
        inner.export_logs.push(ExportLogEntry {
            id,
            order_id: order.id,
            merchant_id: order.merchant_id,
            batch_id: c.batch_id.clone(),
            outcome: c.outcome,
            summary: c.summary.clone(),
            created_at: c.now,
        });
        Ok(Some(order))
    }

    async fn export_logs_for_order(&self, order_id: i64) -> StoreResult<Vec<ExportLogEntry>> {
        let inner = self.lock()?;
        Ok(inner
            .export_logs
            .iter()
            .filter(|l| l.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn erase_merchant_data(&self, merchant_id: i64) -> StoreResult<ErasureCounts> {
        Ok(self.lock()?.erase(merchant_id, None))
    }

    async fn erase_orders(
        &self,
        merchant_id: i64,
        external_order_ids: &[String],
    ) -> StoreResult<ErasureCounts> {
        if external_order_ids.is_empty() {
            return Ok(ErasureCounts::default());
        }
        Ok(self.lock()?.erase(merchant_id, Some(external_order_ids)))
    }

    async fn state_counts(&self, merchant_id: i64) -> StoreResult<OrderStateCounts> {
        let inner = self.lock()?;
        let mut counts = OrderStateCounts::default();
        for o in inner.orders.values().filter(|o| o.merchant_id == merchant_id) {
            counts.add(o.state, 1);
        }
        Ok(counts)
    }

    async fn recent_orders(
        &self,
        merchant_id: i64,
        state: Option<OrderState>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Order>> {
        let inner = self.lock()?;
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| o.merchant_id == merchant_id && state.is_none_or(|s| o.state == s))
            .cloned()
            .collect();
        orders.sort_by(|a, b| (b.updated_at, b.id).cmp(&(a.updated_at, a.id)));
        Ok(orders
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn recent_exceptions(
        &self,
        merchant_id: i64,
        open_only: bool,
        limit: i64,
    ) -> StoreResult<Vec<OrderException>> {
        let inner = self.lock()?;
        let mut list: Vec<OrderException> = inner
            .exceptions
            .iter()
            .filter(|e| e.merchant_id == merchant_id && (!open_only || e.is_open()))
            .cloned()
            .collect();
        list.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        list.truncate(limit.max(0) as usize);
        Ok(list)
    }

    async fn recent_export_logs(
        &self,
        merchant_id: i64,
        limit: i64,
    ) -> StoreResult<Vec<ExportLogEntry>> {
        let inner = self.lock()?;
        let mut list: Vec<ExportLogEntry> = inner
            .export_logs
            .iter()
            .filter(|l| l.merchant_id == merchant_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        list.truncate(limit.max(0) as usize);
        Ok(list)
    }

    async fn append_audit(
        &self,
        tenant_id: &str,
        action: &str,
        detail: Option<&serde_json::Value>,
        now: i64,
    ) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let id = inner.id();
        inner.audit.push(AuditEntry {
            id,
            tenant_id: tenant_id.to_string(),
            action: action.to_string(),
            detail: detail.cloned(),
            created_at: now,
        });
        Ok(())
    }

    async fn audit_entries(
        &self,
        tenant_id: &str,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<AuditEntry>> {
        let inner = self.lock()?;
        let mut list: Vec<AuditEntry> = inner
            .audit
            .iter()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(list
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use shared::models::ValidationFinding;

    fn upsert(external: &str, ready_at: i64, now: i64) -> OrderUpsert {
        OrderUpsert {
            tenant_id: "t1".into(),
            merchant_id: 1,
            external_order_id: external.into(),
            display_name: format!("#{external}"),
            payload: OrderPayload::default(),
            currency: "USD".into(),
            total_price: Decimal::new(1999, 2),
            placed_at: 0,
            ready_at,
            now,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_per_external_id() {
        let store = MemoryStore::new();
        let first = store.upsert_order(&upsert("100", 10, 1)).await.unwrap();
        let second = store.upsert_order(&upsert("100", 10, 2)).await.unwrap();
        assert!(matches!(first, UpsertOutcome::Created(_)));
        assert!(matches!(second, UpsertOutcome::Updated(_)));
        assert_eq!(first.order().id, second.order().id);
        assert_eq!(store.all_orders().len(), 1);
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = MemoryStore::new();
        let order = store.upsert_order(&upsert("1", 0, 0)).await.unwrap().order().clone();
        let t = Transition {
            order_id: order.id,
            expected_version: order.version,
            to: OrderState::Ready,
            last_error: None,
            now: 5,
        };
        assert!(store.transition(&t).await.unwrap().is_some());
        // same expected version loses the second time
        assert!(store.transition(&t).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ready_refused_while_exception_open() {
        let store = MemoryStore::new();
        let order = store.upsert_order(&upsert("1", 0, 0)).await.unwrap().order().clone();
        let held = store
            .commit_validation(&ValidationCommit {
                order_id: order.id,
                expected_version: order.version,
                to: OrderState::Held,
                findings: vec![ValidationFinding::new("NO_LINE_ITEMS", "no lines")],
                last_error: None,
                now: 1,
            })
            .await
            .unwrap()
            .unwrap();

        let to_ready = Transition {
            order_id: held.id,
            expected_version: held.version,
            to: OrderState::Ready,
            last_error: None,
            now: 2,
        };
        assert!(store.transition(&to_ready).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claims_are_exclusive() {
        let store = MemoryStore::new();
        for i in 0..3 {
            let o = store
                .upsert_order(&upsert(&i.to_string(), i, 0))
                .await
                .unwrap()
                .order()
                .clone();
            store
                .transition(&Transition {
                    order_id: o.id,
                    expected_version: o.version,
                    to: OrderState::Ready,
                    last_error: None,
                    now: 0,
                })
                .await
                .unwrap();
        }
        let a = store.claim_ready(1, "a", 2, 10).await.unwrap();
        let b = store.claim_ready(1, "b", 10, 10).await.unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 1);
        assert!(a.iter().all(|o| !b.iter().any(|x| x.id == o.id)));
        // oldest ready_at first
        assert!(a[0].ready_at <= a[1].ready_at);
    }

    #[tokio::test]
    async fn offline_store_errors() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let err = store.upsert_order(&upsert("1", 0, 0)).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
