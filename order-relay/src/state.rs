//! Shared application state

use std::sync::Arc;

use crate::BoxError;
use crate::config::Config;
use crate::db::{OrderStore, PgStore};
use crate::pipeline::Pipeline;
use crate::platform::{FulfillmentSink, HttpFulfillment, HttpPlatformClient};

/// Handler and worker state; cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    /// JWT secret for tenant operator tokens
    pub jwt_secret: String,
}

impl AppState {
    pub fn from_parts(pipeline: Pipeline, jwt_secret: impl Into<String>) -> Self {
        Self {
            pipeline,
            jwt_secret: jwt_secret.into(),
        }
    }

    /// Connect to Postgres, run migrations, and build the outbound clients
    pub async fn new(config: &Config) -> Result<Self, BoxError> {
        let store: Arc<dyn OrderStore> = Arc::new(PgStore::connect(&config.database_url).await?);

        let platform = Arc::new(HttpPlatformClient::new(
            config.platform_api_version.clone(),
            config.pipeline.poll_page_size,
            config.http_timeout,
        )?);

        let fulfillment: Option<Arc<dyn FulfillmentSink>> = match config.fulfillment_url {
            Some(ref url) => Some(Arc::new(HttpFulfillment::new(
                url.clone(),
                config.fulfillment_api_key.clone(),
                config.http_timeout,
            )?)),
            None => {
                tracing::warn!("FULFILLMENT_URL not set; only demo-mode tenants will export");
                None
            }
        };

        let pipeline = Pipeline::new(
            store,
            platform,
            fulfillment,
            config.webhook_secret.clone(),
            config.pipeline.clone(),
        );
        Ok(Self::from_parts(pipeline, config.jwt_secret.clone()))
    }
}
