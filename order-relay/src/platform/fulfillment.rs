//! Fulfillment delivery
//!
//! One call per order. Every request carries `Idempotency-Key: order-{id}`,
//! so a redelivery after a lost commit is deduplicated by the receiver.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::models::{LineItem, Order, ShippingAddress};

use crate::error::{PipelineError, PipelineResult};

/// What the receiver acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Receiver-side reference, if it returned one
    pub reference: Option<String>,
    /// Text recorded in the export log
    pub summary: String,
}

#[async_trait]
pub trait FulfillmentSink: Send + Sync {
    async fn deliver(&self, batch_id: &str, order: &Order) -> PipelineResult<DeliveryReceipt>;
}

pub fn idempotency_key(order: &Order) -> String {
    format!("order-{}", order.id)
}

/// JSON body posted to the fulfillment endpoint
#[derive(Debug, Serialize)]
pub struct FulfillmentRequest<'a> {
    pub batch_id: &'a str,
    pub order_id: i64,
    pub tenant_id: &'a str,
    pub merchant_id: i64,
    pub external_order_id: &'a str,
    pub display_name: &'a str,
    pub currency: &'a str,
    pub total_price: Decimal,
    pub placed_at: String,
    pub line_items: &'a [LineItem],
    pub shipping_address: Option<&'a ShippingAddress>,
    pub email: Option<&'a str>,
    pub note: Option<&'a str>,
}

impl<'a> FulfillmentRequest<'a> {
    pub fn new(batch_id: &'a str, order: &'a Order) -> Self {
        Self {
            batch_id,
            order_id: order.id,
            tenant_id: &order.tenant_id,
            merchant_id: order.merchant_id,
            external_order_id: &order.external_order_id,
            display_name: &order.display_name,
            currency: &order.currency,
            total_price: order.total_price,
            placed_at: shared::util::millis_to_rfc3339(order.placed_at),
            line_items: &order.payload.line_items,
            shipping_address: order.payload.shipping_address.as_ref(),
            email: order.payload.email.as_deref(),
            note: order.payload.note.as_deref(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FulfillmentResponse {
    #[serde(default)]
    reference: Option<String>,
}

/// POSTs each order to a configured HTTP endpoint
pub struct HttpFulfillment {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpFulfillment {
    pub fn new(url: String, api_key: Option<String>, timeout: Duration) -> PipelineResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url,
            api_key,
        })
    }
}

#[async_trait]
impl FulfillmentSink for HttpFulfillment {
    async fn deliver(&self, batch_id: &str, order: &Order) -> PipelineResult<DeliveryReceipt> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", idempotency_key(order))
            .json(&FulfillmentRequest::new(batch_id, order));
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(200).collect();
            return Err(PipelineError::ExternalCall(format!(
                "fulfillment returned {status}: {body}"
            )));
        }

        // Receivers may answer with an empty body
        let body = response.bytes().await?;
        let parsed: FulfillmentResponse = serde_json::from_slice(&body).unwrap_or_default();
        let summary = match parsed.reference {
            Some(ref r) => format!("accepted ({status}), ref {r}"),
            None => format!("accepted ({status})"),
        };
        Ok(DeliveryReceipt {
            reference: parsed.reference,
            summary,
        })
    }
}

/// Simulated delivery for tenants in demo mode
#[derive(Debug, Default, Clone, Copy)]
pub struct DemoFulfillment;

#[async_trait]
impl FulfillmentSink for DemoFulfillment {
    async fn deliver(&self, batch_id: &str, order: &Order) -> PipelineResult<DeliveryReceipt> {
        tracing::debug!(batch_id, order_id = order.id, "Demo delivery");
        Ok(DeliveryReceipt {
            reference: None,
            summary: "demo export".into(),
        })
    }
}
