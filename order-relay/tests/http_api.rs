//! Webhook endpoint and tenant operator API through the full router

mod common;

use axum::Router;
use axum::body::Body;
use common::*;
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use order_relay::api::create_router;
use order_relay::api::webhook::{SHOP_DOMAIN_HEADER, SIGNATURE_HEADER, TOPIC_HEADER};
use order_relay::auth::create_token;
use order_relay::db::OrderStore;
use order_relay::platform::sign_webhook;
use order_relay::state::AppState;
use serde_json::{Value, json};
use shared::models::TenantSettings;
use tower::ServiceExt;

fn router(h: &Harness) -> Router {
    create_router(AppState::from_parts(h.pipeline.clone(), JWT_SECRET))
}

fn webhook(shop: &str, topic: &str, body: &[u8], signature: Option<String>) -> Request<Body> {
    let mut req = Request::post("/webhooks/storefront")
        .header(SHOP_DOMAIN_HEADER, shop)
        .header(TOPIC_HEADER, topic)
        .header("content-type", "application/json");
    if let Some(sig) = signature {
        req = req.header(SIGNATURE_HEADER, sig);
    }
    req.body(Body::from(body.to_vec())).unwrap()
}

fn authed(method: &str, uri: &str, tenant: &str, body: Option<Value>) -> Request<Body> {
    let token = create_token(tenant, "ops@example.com", JWT_SECRET).unwrap();
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"));
    match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&v).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn now_order(id: i64) -> Vec<u8> {
    serde_json::to_vec(&order_json(id, shared::util::now_millis())).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let h = Harness::new();
    let resp = router(&h)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn signed_webhook_is_stored() {
    let h = Harness::new();
    let body = now_order(500);
    let sig = sign_webhook(&body, WEBHOOK_SECRET);

    let resp = router(&h)
        .oneshot(webhook(SHOP, "orders/create", &body, Some(sig.clone())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // redelivery of the same event
    let resp = router(&h)
        .oneshot(webhook(SHOP, "orders/create", &body, Some(sig)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(h.store.all_orders().len(), 1);
}

#[tokio::test]
async fn bad_or_missing_signature_is_rejected() {
    let h = Harness::new();
    let body = now_order(501);

    let forged = sign_webhook(&body, "not-the-secret");
    let resp = router(&h)
        .oneshot(webhook(SHOP, "orders/create", &body, Some(forged)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = router(&h)
        .oneshot(webhook(SHOP, "orders/create", &body, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(h.store.all_orders().is_empty());
}

#[tokio::test]
async fn tenant_secret_overrides_platform_secret() {
    let h = Harness::new();
    let mut settings = TenantSettings::defaults(TENANT);
    settings.webhook_secret = Some("tenant-secret".into());
    h.save_settings(settings).await;
    let body = now_order(502);

    let resp = router(&h)
        .oneshot(webhook(
            SHOP,
            "orders/create",
            &body,
            Some(sign_webhook(&body, WEBHOOK_SECRET)),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = router(&h)
        .oneshot(webhook(
            SHOP,
            "orders/create",
            &body,
            Some(sign_webhook(&body, "tenant-secret")),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_shop_and_malformed_body_are_acknowledged() {
    let h = Harness::new();
    let body = now_order(503);
    let resp = router(&h)
        .oneshot(webhook(
            "stranger.myshop.example",
            "orders/create",
            &body,
            Some(sign_webhook(&body, WEBHOOK_SECRET)),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let garbage = b"{\"id\": ".to_vec();
    let resp = router(&h)
        .oneshot(webhook(
            SHOP,
            "orders/create",
            &garbage,
            Some(sign_webhook(&garbage, WEBHOOK_SECRET)),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(h.store.all_orders().is_empty());
}

#[tokio::test]
async fn store_failure_asks_for_redelivery() {
    let h = Harness::new();
    h.store.set_offline(true);
    let body = now_order(504);
    let resp = router(&h)
        .oneshot(webhook(
            SHOP,
            "orders/create",
            &body,
            Some(sign_webhook(&body, WEBHOOK_SECRET)),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn operator_api_requires_a_token() {
    let h = Harness::new();
    let resp = router(&h)
        .oneshot(
            Request::get("/api/tenant/merchants/1/orders")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = router(&h)
        .oneshot(
            Request::get("/api/tenant/merchants/1/orders")
                .header("authorization", "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn merchants_are_scoped_to_their_tenant() {
    let h = Harness::new();
    let body = now_order(600);
    router(&h)
        .oneshot(webhook(
            SHOP,
            "orders/create",
            &body,
            Some(sign_webhook(&body, WEBHOOK_SECRET)),
        ))
        .await
        .unwrap();

    let resp = router(&h)
        .oneshot(authed("GET", "/api/tenant/merchants/1/orders", TENANT, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let orders = json_body(resp).await;
    assert_eq!(orders.as_array().map(Vec::len), Some(1));
    assert_eq!(orders[0]["state"], "PENDING");

    let resp = router(&h)
        .oneshot(authed("GET", "/api/tenant/merchants/1/orders", OTHER_TENANT, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = router(&h)
        .oneshot(authed("GET", "/api/tenant/merchants/1/summary", TENANT, None))
        .await
        .unwrap();
    assert_eq!(json_body(resp).await["pending"], 1);
}

#[tokio::test]
async fn operator_actions_check_order_state() {
    let h = Harness::new();
    let body = now_order(601);
    router(&h)
        .oneshot(webhook(
            SHOP,
            "orders/create",
            &body,
            Some(sign_webhook(&body, WEBHOOK_SECRET)),
        ))
        .await
        .unwrap();
    let order = h.order(1, 601).await;

    let uri = format!("/api/tenant/merchants/1/orders/{}/retry", order.id);
    let resp = router(&h)
        .oneshot(authed("POST", &uri, TENANT, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let uri = format!("/api/tenant/merchants/1/orders/{}", order.id);
    let resp = router(&h)
        .oneshot(authed("GET", &uri, TENANT, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let detail = json_body(resp).await;
    assert_eq!(detail["order"]["external_order_id"], "601");
    assert_eq!(detail["exceptions"], json!([]));

    let resp = router(&h)
        .oneshot(authed("GET", "/api/tenant/merchants/1/orders/999999", TENANT, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn settings_updates_are_validated_and_audited() {
    let h = Harness::new();

    let resp = router(&h)
        .oneshot(authed(
            "PUT",
            "/api/tenant/settings",
            TENANT,
            Some(json!({ "delay_hours": 500 })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = router(&h)
        .oneshot(authed(
            "PUT",
            "/api/tenant/settings",
            TENANT,
            Some(json!({ "delay_hours": 2, "webhook_secret": "s3cret" })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let saved = json_body(resp).await;
    assert_eq!(saved["delay_hours"], 2);
    assert!(saved.get("webhook_secret").is_none());

    let stored = h.store.tenant_settings(TENANT).await.unwrap();
    assert_eq!(stored.webhook_secret.as_deref(), Some("s3cret"));

    let resp = router(&h)
        .oneshot(authed("GET", "/api/tenant/audit-log", TENANT, None))
        .await
        .unwrap();
    let entries = json_body(resp).await;
    assert_eq!(entries[0]["action"], "settings.update");
}
