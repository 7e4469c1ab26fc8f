//! Fixtures shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use order_relay::config::PipelineSettings;
use order_relay::db::{MemoryStore, OrderStore};
use order_relay::error::{PipelineError, PipelineResult};
use order_relay::pipeline::Pipeline;
use order_relay::platform::{DeliveryReceipt, ExternalOrder, FulfillmentSink, PlatformClient};
use parking_lot::Mutex;
use serde_json::{Value, json};
use shared::models::{Merchant, Order, TenantSettings};

pub const TENANT: &str = "tenant-a";
pub const OTHER_TENANT: &str = "tenant-b";
pub const SHOP: &str = "acme.myshop.example";
pub const WEBHOOK_SECRET: &str = "platform-webhook-secret";
pub const JWT_SECRET: &str = "test-jwt-secret";

pub const HOUR_MS: i64 = 3_600_000;
/// 2024-03-01T12:00:00Z
pub const T0: i64 = 1_709_294_400_000;

pub fn merchant(id: i64, tenant_id: &str, shop_domain: &str) -> Merchant {
    Merchant {
        id,
        tenant_id: tenant_id.to_string(),
        shop_domain: shop_domain.to_string(),
        access_token: format!("token-{id}"),
        active: true,
        last_export_at: None,
        last_sweep_at: None,
    }
}

/// Complete, valid order body created at `created_at_ms`
pub fn order_json(id: i64, created_at_ms: i64) -> Value {
    json!({
        "id": id,
        "name": format!("#{id}"),
        "created_at": shared::util::millis_to_rfc3339(created_at_ms),
        "currency": "USD",
        "total_price": "42.50",
        "line_items": [
            { "sku": "MUG-01", "title": "Mug", "quantity": 2, "price": "21.25" }
        ],
        "shipping_address": {
            "name": "Ada Lovelace",
            "address1": "1 Main St",
            "city": "Springfield",
            "zip": "12345",
            "country_code": "us"
        },
        "email": "ada@example.com"
    })
}

pub fn external(value: Value) -> ExternalOrder {
    serde_json::from_value(value).expect("valid external order")
}

/// Platform double: canned orders per merchant, optional per-merchant failure
#[derive(Default)]
pub struct FakePlatform {
    orders: Mutex<HashMap<i64, Vec<Value>>>,
    failing: Mutex<Vec<i64>>,
    pub synced: AtomicUsize,
}

impl FakePlatform {
    pub fn set_orders(&self, merchant_id: i64, orders: Vec<Value>) {
        self.orders.lock().insert(merchant_id, orders);
    }

    pub fn fail_for(&self, merchant_id: i64) {
        self.failing.lock().push(merchant_id);
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn fetch_orders(
        &self,
        merchant: &Merchant,
        _updated_since: i64,
    ) -> PipelineResult<Vec<ExternalOrder>> {
        if self.failing.lock().contains(&merchant.id) {
            return Err(PipelineError::ExternalCall("platform returned 503".into()));
        }
        let orders = self.orders.lock().get(&merchant.id).cloned().unwrap_or_default();
        orders
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(|e| PipelineError::ExternalCall(e.to_string())))
            .collect()
    }

    async fn sync_exported(
        &self,
        _merchant: &Merchant,
        _order: &Order,
        _batch_id: &str,
    ) -> PipelineResult<()> {
        self.synced.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fulfillment double that records every delivery.
///
/// With `fail_every = Some(n)`, deliveries 1, n+1, 2n+1, ... fail.
#[derive(Default)]
pub struct RecordingSink {
    pub delivered: Mutex<Vec<i64>>,
    attempts: AtomicUsize,
    fail_every: Option<usize>,
}

impl RecordingSink {
    pub fn failing_every(n: usize) -> Self {
        Self {
            fail_every: Some(n),
            ..Default::default()
        }
    }

    pub fn delivered_ids(&self) -> Vec<i64> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl FulfillmentSink for RecordingSink {
    async fn deliver(&self, batch_id: &str, order: &Order) -> PipelineResult<DeliveryReceipt> {
        // let a concurrent batch run in between claims and deliveries
        tokio::task::yield_now().await;
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        self.delivered.lock().push(order.id);
        if self.fail_every.is_some_and(|n| attempt % n == 0) {
            return Err(PipelineError::ExternalCall(format!(
                "fulfillment rejected order {} (attempt {attempt})",
                order.id
            )));
        }
        Ok(DeliveryReceipt {
            reference: Some(format!("ful-{}", order.id)),
            summary: format!("accepted in {batch_id}"),
        })
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub platform: Arc<FakePlatform>,
    pub sink: Arc<RecordingSink>,
    pub pipeline: Pipeline,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_sink(RecordingSink::default())
    }

    pub fn with_sink(sink: RecordingSink) -> Self {
        let store = Arc::new(MemoryStore::new());
        store.insert_merchant(merchant(1, TENANT, SHOP));

        let platform = Arc::new(FakePlatform::default());
        let sink = Arc::new(sink);
        let settings = PipelineSettings {
            poll_merchant_delay: Duration::ZERO,
            export_batch_size: 100,
            ..Default::default()
        };
        let fulfillment: Arc<dyn FulfillmentSink> = sink.clone();
        let pipeline = Pipeline::new(
            store.clone(),
            platform.clone(),
            Some(fulfillment),
            WEBHOOK_SECRET.to_string(),
            settings,
        );
        Self {
            store,
            platform,
            sink,
            pipeline,
        }
    }

    pub async fn save_settings(&self, settings: TenantSettings) {
        self.store
            .save_tenant_settings(&settings)
            .await
            .expect("save settings");
    }

    pub async fn order(&self, merchant_id: i64, external_id: i64) -> Order {
        self.store
            .find_order_by_external(merchant_id, &external_id.to_string())
            .await
            .expect("store")
            .expect("order exists")
    }

    pub fn merchant(&self, id: i64) -> Merchant {
        merchant(id, TENANT, SHOP)
    }
}
