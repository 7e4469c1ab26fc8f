//! Order pipeline
//!
//! Ingest -> validate after the delay window -> export, plus the operator
//! actions that move HELD and ERROR orders along. Every function takes the
//! current time explicitly; the background workers pass `now_millis()`.

pub mod export;
pub mod ingest;
pub mod operator;
pub mod scheduler;
pub mod validation;

use std::sync::Arc;

use crate::config::PipelineSettings;
use crate::db::OrderStore;
use crate::platform::{FulfillmentSink, PlatformClient};

/// Shared handles for pipeline work
#[derive(Clone)]
pub struct Pipeline {
    pub store: Arc<dyn OrderStore>,
    pub platform: Arc<dyn PlatformClient>,
    /// Live fulfillment endpoint; `None` when not configured
    pub fulfillment: Option<Arc<dyn FulfillmentSink>>,
    /// Platform-wide webhook secret
    pub webhook_secret: String,
    pub settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn OrderStore>,
        platform: Arc<dyn PlatformClient>,
        fulfillment: Option<Arc<dyn FulfillmentSink>>,
        webhook_secret: String,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            platform,
            fulfillment,
            webhook_secret,
            settings,
        }
    }
}
