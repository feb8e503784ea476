mod common;

use std::sync::Arc;

use axum::{http::StatusCode, Extension, Router};
use hmac::{Hmac, Mac};
use hyper::{Body, Request};
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;
use uuid::Uuid;

use billingd::api::AppContext;
use billingd::gateway::{GatewayConfig, PaymentGateway, StripeLikeGateway};
use billingd::models::InvoiceStatus;
use billingd::routes::api_routes;
use billingd::store::BillingStore;

use common::{harness, renewal_invoice, seed_subscription, single_gateway, Harness, MockBehavior};

const WEBHOOK_SECRET: &str = "whsec_http_test";

fn app(h: &Harness) -> Router {
    let context = AppContext {
        invoices: h.invoices.clone(),
        router: h.router.clone(),
        dunning: h.dunning.clone(),
        processor: h.processor.clone(),
    };
    api_routes().layer(Extension(context))
}

fn stripelike() -> Arc<dyn PaymentGateway> {
    Arc::new(StripeLikeGateway::new(GatewayConfig {
        name: "stripelike".into(),
        active: true,
        currencies: vec!["EUR".into(), "USD".into()],
        methods: vec![billingd::models::PaymentMethod::Card],
        webhook_secret: WEBHOOK_SECRET.into(),
    }))
}

fn sign(payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: hyper::Response<axum::body::BoxBody>) -> Value {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn create_and_fetch_invoice_over_http() {
    let (_, gateways) = single_gateway(MockBehavior::Approve);
    let h = harness(gateways);
    let subscription = seed_subscription(&h.store).await;
    let app = app(&h);

    let payload = json!({
        "subscription_id": subscription.id,
        "amount_cents": 10_000,
        "currency": "EUR",
        "description": "Subscription renewal",
        "due_date": "2026-09-06T00:00:00Z",
        "items": [
            {"description": "Subscription renewal", "quantity": 1, "unit_price_cents": 10_000}
        ]
    });
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/invoices", payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created = body_json(response).await;
    assert_eq!(created["status"], "draft");
    assert_eq!(created["tax_cents"], 1_900);
    assert_eq!(created["total_cents"], 11_900);

    let id = created["id"].as_str().unwrap();
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/invoices/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["number"], created["number"]);
}

#[tokio::test]
async fn missing_invoice_is_a_404_and_bad_filter_a_400() {
    let (_, gateways) = single_gateway(MockBehavior::Approve);
    let h = harness(gateways);
    let app = app(&h);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/invoices/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/invoices?status=bogus")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn checkout_decline_is_a_structured_body_not_an_error_status() {
    let (_, gateways) = single_gateway(MockBehavior::Decline);
    let h = harness(gateways);
    let app = app(&h);

    let payload = json!({
        "amount_cents": 2_500,
        "currency": "EUR",
        "method": "card",
        "description": "checkout"
    });
    let response = app
        .oneshot(json_request("POST", "/api/payments", payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "card_declined");
}

#[tokio::test]
async fn webhook_without_valid_signature_is_unauthorized() {
    let h = harness(vec![stripelike()]);
    let app = app(&h);

    let payload = br#"{"event_type":"payment.succeeded","transaction_id":"ch_1","invoice_id":null}"#;

    // No signature header at all.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/stripelike")
                .body(Body::from(payload.to_vec()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Wrong signature.
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/stripelike")
                .header("x-webhook-signature", "sha256=deadbeef")
                .body(Body::from(payload.to_vec()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn signed_settlement_webhook_pays_invoice_and_closes_dunning() {
    let h = harness(vec![stripelike()]);
    let subscription = seed_subscription(&h.store).await;
    let invoice = h
        .invoices
        .create_invoice(renewal_invoice(subscription.id, 5_000))
        .await
        .unwrap();
    let mut metadata = billingd::models::Metadata::new();
    metadata.insert("invoice_id".into(), invoice.id.to_string());
    h.dunning
        .open_chain(subscription.id, metadata)
        .await
        .unwrap()
        .unwrap();
    let app = app(&h);

    let payload = serde_json::to_vec(&json!({
        "event_type": "payment.succeeded",
        "transaction_id": "ch_webhook_1",
        "invoice_id": invoice.id,
    }))
    .unwrap();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/stripelike")
                .header("x-webhook-signature", sign(&payload))
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let settled = h.invoices.get_invoice(invoice.id).await.unwrap();
    assert_eq!(settled.status, InvoiceStatus::Paid);
    assert_eq!(settled.payment_reference.as_deref(), Some("ch_webhook_1"));
    assert!(h
        .store
        .active_dunning_event(subscription.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn manual_run_endpoints_answer_with_reports() {
    let (_, gateways) = single_gateway(MockBehavior::Approve);
    let h = harness(gateways);
    let app = app(&h);

    for uri in ["/api/billing/run-schedules", "/api/billing/run-dunning"] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        assert_eq!(report["processed"].as_u64().or(report["completed"].as_u64()), Some(0));
    }
}
