//! Storefront admin API client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use shared::models::{Merchant, Order};

use super::model::ExternalOrder;
use crate::error::{PipelineError, PipelineResult};

const ACCESS_TOKEN_HEADER: &str = "X-Shop-Access-Token";
/// Upper bound on `Link: rel="next"` pages followed in one fetch
const MAX_PAGES: usize = 20;

/// Outbound calls to the storefront platform
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Orders updated at or after `updated_since` (Unix millis)
    async fn fetch_orders(
        &self,
        merchant: &Merchant,
        updated_since: i64,
    ) -> PipelineResult<Vec<ExternalOrder>>;

    /// Mark an order as exported on the platform side
    async fn sync_exported(
        &self,
        merchant: &Merchant,
        order: &Order,
        batch_id: &str,
    ) -> PipelineResult<()>;
}

#[derive(Deserialize)]
struct OrdersPage {
    #[serde(default)]
    orders: Vec<ExternalOrder>,
}

/// reqwest-backed [`PlatformClient`]
pub struct HttpPlatformClient {
    client: Client,
    api_version: String,
    page_size: u32,
}

impl HttpPlatformClient {
    pub fn new(api_version: String, page_size: u32, timeout: Duration) -> PipelineResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_version,
            page_size,
        })
    }

    fn admin_url(&self, shop_domain: &str, path: &str) -> String {
        format!(
            "https://{shop_domain}/admin/api/{}/{path}",
            self.api_version
        )
    }
}

/// Extract the `rel="next"` target from a `Link` header
fn next_page_url(link: &str) -> Option<String> {
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params
            .split(';')
            .any(|p| p.trim() == r#"rel="next""#)
            .then(|| {
                target
                    .trim()
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string()
            })
    })
}

async fn error_for_status(what: &str, response: reqwest::Response) -> PipelineError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(200).collect();
    PipelineError::ExternalCall(format!("{what} returned {status}: {body}"))
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn fetch_orders(
        &self,
        merchant: &Merchant,
        updated_since: i64,
    ) -> PipelineResult<Vec<ExternalOrder>> {
        let first = reqwest::Url::parse_with_params(
            &self.admin_url(&merchant.shop_domain, "orders.json"),
            &[
                ("status", "any".to_string()),
                (
                    "updated_at_min",
                    shared::util::millis_to_rfc3339(updated_since),
                ),
                ("limit", self.page_size.to_string()),
            ],
        )
        .map_err(|e| PipelineError::Configuration(format!("bad shop domain: {e}")))?;

        let mut orders = Vec::new();
        let mut next = Some(first.to_string());
        let mut pages = 0;
        while let Some(url) = next.take() {
            let response = self
                .client
                .get(&url)
                .header(ACCESS_TOKEN_HEADER, &merchant.access_token)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(error_for_status("orders fetch", response).await);
            }

            next = response
                .headers()
                .get(reqwest::header::LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_page_url);

            let page: OrdersPage = response.json().await?;
            orders.extend(page.orders);

            pages += 1;
            if pages >= MAX_PAGES {
                if next.is_some() {
                    tracing::warn!(
                        merchant_id = merchant.id,
                        pages,
                        "Order fetch stopped at page limit"
                    );
                }
                break;
            }
        }
        Ok(orders)
    }

    async fn sync_exported(
        &self,
        merchant: &Merchant,
        order: &Order,
        batch_id: &str,
    ) -> PipelineResult<()> {
        let url = self.admin_url(
            &merchant.shop_domain,
            &format!("orders/{}/metafields.json", order.external_order_id),
        );
        let body = serde_json::json!({
            "metafield": {
                "namespace": "order_relay",
                "key": "export_batch",
                "type": "single_line_text_field",
                "value": batch_id,
            }
        });

        let response = self
            .client
            .post(&url)
            .header(ACCESS_TOKEN_HEADER, &merchant.access_token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for_status("export sync", response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_next_link() {
        let link = r#"<https://a.example/admin/api/2024-07/orders.json?page_info=abc>; rel="previous", <https://a.example/admin/api/2024-07/orders.json?page_info=def>; rel="next""#;
        assert_eq!(
            next_page_url(link).as_deref(),
            Some("https://a.example/admin/api/2024-07/orders.json?page_info=def")
        );
        assert_eq!(next_page_url(r#"<https://x>; rel="previous""#), None);
    }

    #[test]
    fn admin_url_includes_version() {
        let c = HttpPlatformClient::new("2024-07".into(), 50, Duration::from_secs(1)).unwrap();
        assert_eq!(
            c.admin_url("a.example", "orders.json"),
            "https://a.example/admin/api/2024-07/orders.json"
        );
    }
}
