//! Storefront platform and fulfillment integrations

pub mod client;
pub mod events;
pub mod fulfillment;
pub mod model;
pub mod signature;

pub use client::{HttpPlatformClient, PlatformClient};
pub use events::InboundEvent;
pub use fulfillment::{DeliveryReceipt, DemoFulfillment, FulfillmentSink, HttpFulfillment};
pub use model::ExternalOrder;
pub use signature::{sign_webhook, verify_webhook_signature};
