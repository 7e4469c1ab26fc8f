//! Ingestion, delay, validation, and operator flows against the memory store

mod common;

use common::*;
use order_relay::db::OrderStore;
use order_relay::error::PipelineError;
use order_relay::pipeline::ingest::{
    IngestOutcome, WebhookDelivery, apply_event, handle_webhook, poll_all,
};
use order_relay::pipeline::validation::{ADDRESS_INCOMPLETE, LINE_ITEM_INCOMPLETE, REGION_NOT_ALLOWED};
use order_relay::pipeline::{export, operator, scheduler};
use order_relay::platform::{InboundEvent, sign_webhook};
use serde_json::{Value, json};
use shared::models::{
    ExportOutcome, OrderState, ResolvedBy, ShippingAddress, TenantSettings,
};

async fn deliver(h: &Harness, topic: &str, body: &Value, now: i64) -> IngestOutcome {
    let bytes = serde_json::to_vec(body).unwrap();
    let event = InboundEvent::from_topic(topic, &bytes).unwrap();
    apply_event(&h.pipeline, &h.merchant(1), &event, now)
        .await
        .unwrap()
}

#[tokio::test]
async fn redelivered_webhook_updates_without_duplicating() {
    let h = Harness::new();
    let body = order_json(1001, T0);

    let first = deliver(&h, "orders/create", &body, T0).await;
    let IngestOutcome::Created { order_id } = first else {
        panic!("expected Created, got {first:?}");
    };

    let mut edited = body.clone();
    edited["note"] = json!("leave at door");
    let second = deliver(&h, "orders/updated", &edited, T0 + 1_000).await;
    assert_eq!(second, IngestOutcome::Updated { order_id });

    let orders = h.store.all_orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].payload.note.as_deref(), Some("leave at door"));
    assert_eq!(orders[0].state, OrderState::Pending);
    assert_eq!(orders[0].ready_at, T0 + 6 * HOUR_MS);
}

#[tokio::test]
async fn identical_redelivery_keeps_a_ready_order_ready() {
    let h = Harness::new();
    let body = order_json(1002, T0);
    deliver(&h, "orders/create", &body, T0).await;
    let due = T0 + 6 * HOUR_MS;
    scheduler::sweep(&h.pipeline, due).await.unwrap();
    let ready = h.order(1, 1002).await;
    assert_eq!(ready.state, OrderState::Ready);

    // poll refetch or duplicate webhook with the same content
    let outcome = deliver(&h, "orders/updated", &body, due + 60_000).await;
    assert_eq!(outcome, IngestOutcome::Updated { order_id: ready.id });
    let order = h.order(1, 1002).await;
    assert_eq!(order.state, OrderState::Ready);
    assert_eq!(order.version, ready.version);
    assert_eq!(order.ready_at, ready.ready_at);

    let mut edited = body.clone();
    edited["shipping_address"]["address1"] = json!("2 Side St");
    deliver(&h, "orders/updated", &edited, due + 120_000).await;
    let order = h.order(1, 1002).await;
    assert_eq!(order.state, OrderState::Pending);
    assert!(order.version > ready.version);
}

#[tokio::test]
async fn concurrent_deliveries_of_one_order_store_one_row() {
    let h = Harness::new();
    let body = serde_json::to_vec(&order_json(1003, T0)).unwrap();
    let signature = sign_webhook(&body, WEBHOOK_SECRET);
    let delivery = WebhookDelivery {
        shop_domain: SHOP,
        topic: "orders/create",
        signature: Some(signature.as_str()),
        webhook_id: None,
        body: &body,
    };

    let (a, b) = tokio::join!(
        handle_webhook(&h.pipeline, delivery, T0),
        handle_webhook(&h.pipeline, delivery, T0),
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    let created = outcomes
        .iter()
        .filter(|o| matches!(o, IngestOutcome::Created { .. }))
        .count();
    assert_eq!(created, 1);
    assert_eq!(h.store.all_orders().len(), 1);
}

#[tokio::test]
async fn delay_sweeps_follow_tenant_interval() {
    let h = Harness::new();
    let mut settings = TenantSettings::defaults(TENANT);
    settings.sweep_interval_minutes = 30;
    h.save_settings(settings).await;
    deliver(&h, "orders/create", &order_json(1, T0), T0).await;

    let due = T0 + 6 * HOUR_MS;
    let first = scheduler::run_due_sweeps(&h.pipeline, due).await.unwrap();
    assert_eq!(first.ready, 1);

    deliver(&h, "orders/create", &order_json(2, T0), due).await;
    let too_soon = scheduler::run_due_sweeps(&h.pipeline, due + 10 * 60_000)
        .await
        .unwrap();
    assert_eq!(too_soon.examined, 0);
    assert_eq!(h.order(1, 2).await.state, OrderState::Pending);

    let later = scheduler::run_due_sweeps(&h.pipeline, due + 31 * 60_000)
        .await
        .unwrap();
    assert_eq!(later.ready, 1);
    assert_eq!(h.order(1, 2).await.state, OrderState::Ready);
}

#[tokio::test]
async fn orders_are_not_exported_before_the_delay_elapses() {
    let h = Harness::new();
    deliver(&h, "orders/create", &order_json(1, T0), T0).await;
    let settings = TenantSettings::defaults(TENANT);

    let early = T0 + 5 * HOUR_MS;
    let sweep = scheduler::sweep(&h.pipeline, early).await.unwrap();
    assert_eq!(sweep.examined, 0);
    let batch = export::export_merchant(&h.pipeline, &h.merchant(1), &settings, early)
        .await
        .unwrap();
    assert_eq!(batch.claimed, 0);
    assert_eq!(h.order(1, 1).await.state, OrderState::Pending);

    let due = T0 + 6 * HOUR_MS;
    let sweep = scheduler::sweep(&h.pipeline, due).await.unwrap();
    assert_eq!(sweep.ready, 1);
    let batch = export::export_merchant(&h.pipeline, &h.merchant(1), &settings, due)
        .await
        .unwrap();
    assert_eq!(batch.sent, 1);
    assert_eq!(h.order(1, 1).await.state, OrderState::Exported);
}

#[tokio::test]
async fn validation_reports_every_failing_rule() {
    let h = Harness::new();
    let mut settings = TenantSettings::defaults(TENANT);
    settings.allowed_countries = vec!["CA".into()];
    h.save_settings(settings).await;

    let mut body = order_json(7, T0);
    body["shipping_address"]["city"] = Value::Null;
    body["line_items"][0]["sku"] = json!("");
    deliver(&h, "orders/create", &body, T0).await;

    let report = scheduler::sweep(&h.pipeline, T0 + 6 * HOUR_MS).await.unwrap();
    assert_eq!(report.held, 1);

    let order = h.order(1, 7).await;
    assert_eq!(order.state, OrderState::Held);
    let codes: Vec<String> = h
        .store
        .exceptions_for_order(order.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.is_open())
        .map(|e| e.code)
        .collect();
    assert_eq!(
        codes,
        vec![ADDRESS_INCOMPLETE, LINE_ITEM_INCOMPLETE, REGION_NOT_ALLOWED]
    );

    // a second pass over the same input opens nothing new
    let settings = h.store.tenant_settings(TENANT).await.unwrap();
    scheduler::evaluate_order(&h.pipeline, &order, &settings, T0 + 7 * HOUR_MS)
        .await
        .unwrap()
        .expect("version unchanged");
    let open = h
        .store
        .exceptions_for_order(order.id)
        .await
        .unwrap()
        .iter()
        .filter(|e| e.is_open())
        .count();
    assert_eq!(open, 3);
}

#[tokio::test]
async fn cancellation_wins_over_pending_and_held() {
    let h = Harness::new();
    deliver(&h, "orders/create", &order_json(1, T0), T0).await;
    let mut held = order_json(2, T0);
    held["shipping_address"] = Value::Null;
    deliver(&h, "orders/create", &held, T0).await;
    scheduler::sweep(&h.pipeline, T0 + 6 * HOUR_MS).await.unwrap();
    assert_eq!(h.order(1, 1).await.state, OrderState::Ready);
    assert_eq!(h.order(1, 2).await.state, OrderState::Held);

    for id in [1, 2] {
        let mut body = order_json(id, T0);
        body["cancelled_at"] = json!("2024-03-01T19:00:00Z");
        body["cancel_reason"] = json!("customer");
        let outcome = deliver(&h, "orders/cancelled", &body, T0 + 7 * HOUR_MS).await;
        assert!(matches!(outcome, IngestOutcome::Cancelled { .. }));

        let order = h.order(1, id).await;
        assert_eq!(order.state, OrderState::Error);
        assert!(order.is_cancelled());
        assert_eq!(
            order.last_error.as_deref(),
            Some("Cancelled on platform: customer")
        );
    }

    // a late update does not revive the order
    deliver(&h, "orders/updated", &order_json(1, T0), T0 + 8 * HOUR_MS).await;
    assert_eq!(h.order(1, 1).await.state, OrderState::Error);

    let order = h.order(1, 1).await;
    let err = operator::retry(&h.pipeline, 1, order.id, T0 + 8 * HOUR_MS)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::OrderCancelled(id) if id == order.id));
}

#[tokio::test]
async fn cancellation_after_export_is_too_late() {
    let h = Harness::new();
    deliver(&h, "orders/create", &order_json(5, T0), T0).await;
    let due = T0 + 6 * HOUR_MS;
    scheduler::sweep(&h.pipeline, due).await.unwrap();
    export::export_merchant(&h.pipeline, &h.merchant(1), &TenantSettings::defaults(TENANT), due)
        .await
        .unwrap();

    let mut body = order_json(5, T0);
    body["cancelled_at"] = json!("2024-03-01T19:00:00Z");
    let outcome = deliver(&h, "orders/cancelled", &body, due + 1_000).await;
    assert!(matches!(outcome, IngestOutcome::CancelTooLate { .. }));
    assert_eq!(h.order(1, 5).await.state, OrderState::Exported);
}

#[tokio::test]
async fn held_order_fixed_by_operator_is_exported_once() {
    let h = Harness::new();
    let mut body = order_json(1001, T0);
    body["shipping_address"] = Value::Null;
    deliver(&h, "orders/create", &body, T0).await;

    let t6 = T0 + 6 * HOUR_MS;
    scheduler::sweep(&h.pipeline, t6).await.unwrap();
    let order = h.order(1, 1001).await;
    assert_eq!(order.state, OrderState::Held);
    let exceptions = h.store.exceptions_for_order(order.id).await.unwrap();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].code, ADDRESS_INCOMPLETE);

    let address = ShippingAddress {
        name: Some("Ada Lovelace".into()),
        address1: Some("1 Main St".into()),
        city: Some("Springfield".into()),
        postal_code: Some("12345".into()),
        country_code: Some("us".into()),
        ..Default::default()
    };
    let fixed = operator::update_order_address(&h.pipeline, 1, order.id, address, t6 + 60_000)
        .await
        .unwrap();
    assert_eq!(fixed.state, OrderState::Held);
    assert_eq!(
        fixed.payload.shipping_address.unwrap().country_code.as_deref(),
        Some("US")
    );

    let ready = operator::revalidate(&h.pipeline, 1, order.id, t6 + 120_000)
        .await
        .unwrap();
    assert_eq!(ready.state, OrderState::Ready);
    let exceptions = h.store.exceptions_for_order(order.id).await.unwrap();
    assert!(!exceptions[0].is_open());
    assert_eq!(exceptions[0].resolved_by, Some(ResolvedBy::Revalidation));

    let report = export::export_merchant(
        &h.pipeline,
        &h.merchant(1),
        &TenantSettings::defaults(TENANT),
        t6 + 180_000,
    )
    .await
    .unwrap();
    assert_eq!(report.sent, 1);

    let exported = h.order(1, 1001).await;
    assert_eq!(exported.state, OrderState::Exported);
    assert!(exported.last_error.is_none());
    assert_eq!(exported.export_batch_id.as_deref(), Some(report.batch_id.as_str()));
    let logs = h.store.export_logs_for_order(order.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].outcome, ExportOutcome::Sent);
    assert_eq!(h.sink.delivered_ids(), vec![order.id]);

    let actions: Vec<String> = h
        .store
        .audit_entries(TENANT, 10, 0)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert!(actions.contains(&"order.address_update".to_string()));
    assert!(actions.contains(&"order.revalidate".to_string()));
}

#[tokio::test]
async fn resolving_the_last_exception_releases_a_held_order() {
    let h = Harness::new();
    let mut body = order_json(3, T0);
    body["shipping_address"] = Value::Null;
    deliver(&h, "orders/create", &body, T0).await;
    let t6 = T0 + 6 * HOUR_MS;
    scheduler::sweep(&h.pipeline, t6).await.unwrap();

    let order = h.order(1, 3).await;
    let exception = h.store.exceptions_for_order(order.id).await.unwrap()[0].clone();
    let resolved = operator::resolve_exception(&h.pipeline, 1, exception.id, t6 + 1)
        .await
        .unwrap();
    assert_eq!(resolved.exception.resolved_by, Some(ResolvedBy::Operator));
    assert_eq!(resolved.order.state, OrderState::Ready);

    let again = operator::resolve_exception(&h.pipeline, 1, exception.id, t6 + 2).await;
    assert!(matches!(again, Err(PipelineError::ExceptionResolved(id)) if id == exception.id));

    let missing = operator::resolve_exception(&h.pipeline, 1, 999_999, t6 + 3).await;
    assert!(matches!(missing, Err(PipelineError::NotFound(_))));
}

#[tokio::test]
async fn automatic_held_revalidation_picks_up_fixed_orders() {
    let h = Harness::new();
    let mut settings = TenantSettings::defaults(TENANT);
    settings.enforce_sku_registry = true;
    settings.held_revalidation = shared::models::HeldRevalidation::Automatic;
    h.save_settings(settings).await;
    deliver(&h, "orders/create", &order_json(9, T0), T0).await;

    h.store.set_sku_registry_down(true);
    let t6 = T0 + 6 * HOUR_MS;
    scheduler::sweep(&h.pipeline, t6).await.unwrap();
    assert_eq!(h.order(1, 9).await.state, OrderState::Held);

    h.store.set_sku_registry_down(false);
    h.store.register_skus(TENANT, &["MUG-01"]);
    let report = scheduler::sweep(&h.pipeline, t6 + 60_000).await.unwrap();
    assert_eq!(report.ready, 1);
    assert_eq!(h.order(1, 9).await.state, OrderState::Ready);
}

#[tokio::test]
async fn compliance_events_erase_order_data() {
    let h = Harness::new();
    for id in [1, 2, 3] {
        deliver(&h, "orders/create", &order_json(id, T0), T0).await;
    }

    let outcome = deliver(
        &h,
        "customers/redact",
        &json!({ "orders_to_redact": [1, "2"] }),
        T0 + 1,
    )
    .await;
    let IngestOutcome::Erased(counts) = outcome else {
        panic!("expected Erased, got {outcome:?}");
    };
    assert_eq!(counts.orders, 2);
    assert_eq!(h.store.all_orders().len(), 1);

    let outcome = deliver(&h, "shop/redact", &json!({}), T0 + 2).await;
    assert!(matches!(outcome, IngestOutcome::Erased(c) if c.orders == 1));
    assert!(h.store.all_orders().is_empty());

    let actions: Vec<String> = h
        .store
        .audit_entries(TENANT, 10, 0)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert!(actions.contains(&"compliance.customer_redact".to_string()));
    assert!(actions.contains(&"compliance.erasure".to_string()));
}

#[tokio::test]
async fn inactive_merchant_ignores_order_events() {
    let h = Harness::new();
    let mut m = h.merchant(1);
    m.active = false;
    let bytes = serde_json::to_vec(&order_json(1, T0)).unwrap();
    let event = InboundEvent::from_topic("orders/create", &bytes).unwrap();
    let outcome = apply_event(&h.pipeline, &m, &event, T0).await.unwrap();
    assert_eq!(outcome, IngestOutcome::Inactive);
    assert!(h.store.all_orders().is_empty());
}

#[tokio::test]
async fn poll_failure_for_one_merchant_does_not_stop_others() {
    let h = Harness::new();
    h.store.insert_merchant(merchant(2, TENANT, "other.myshop.example"));
    h.store.insert_merchant(merchant(3, OTHER_TENANT, "third.myshop.example"));

    h.platform.fail_for(2);
    h.platform.set_orders(1, vec![order_json(11, T0), order_json(12, T0)]);
    let mut cancelled = order_json(31, T0);
    cancelled["cancelled_at"] = json!("2024-03-01T13:00:00Z");
    h.platform.set_orders(3, vec![cancelled]);

    let report = poll_all(&h.pipeline, T0 + HOUR_MS).await.unwrap();
    assert_eq!(report.merchants, 3);
    assert_eq!(report.failed_merchants, 1);
    assert_eq!(report.orders, 3);

    assert_eq!(h.order(1, 11).await.state, OrderState::Pending);
    assert_eq!(h.order(3, 31).await.state, OrderState::Error);
    assert_eq!(h.order(3, 31).await.tenant_id, OTHER_TENANT);

    // polling again is idempotent
    poll_all(&h.pipeline, T0 + 2 * HOUR_MS).await.unwrap();
    assert_eq!(h.store.all_orders().len(), 3);
}

#[tokio::test]
async fn store_outage_surfaces_as_store_error() {
    let h = Harness::new();
    h.store.set_offline(true);
    let bytes = serde_json::to_vec(&order_json(1, T0)).unwrap();
    let event = InboundEvent::from_topic("orders/create", &bytes).unwrap();
    let err = apply_event(&h.pipeline, &h.merchant(1), &event, T0)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Store(_)));
}
