mod common;

use common::TestApp;
use gateway_service::models::{CustomerLink, SubscriptionSnapshot, UserTierState};
use mongodb::bson::doc;
use serde_json::json;

fn checkout_body(customer: &str, user_id: &str) -> String {
    json!({
        "type": "checkout.completed",
        "data": { "customer": customer, "user_id": user_id }
    })
    .to_string()
}

fn subscription_body(kind: &str, customer: &str, status: &str, price_id: &str) -> String {
    json!({
        "type": kind,
        "data": {
            "id": format!("sub_{}", customer),
            "customer": customer,
            "status": status,
            "items": [{ "price_id": price_id }],
            "current_period_end": 1_760_000_000,
            "cancel_at_period_end": false
        }
    })
    .to_string()
}

async fn tier_of(app: &TestApp, user_id: &str) -> Option<String> {
    app.db
        .collection::<UserTierState>("user_tiers")
        .find_one(doc! { "_id": user_id }, None)
        .await
        .expect("Failed to query user tiers")
        .map(|state| state.tier.as_str().to_string())
}

#[tokio::test]
async fn missing_signature_is_rejected() {
    let app = TestApp::spawn().await;

    let response = reqwest::Client::new()
        .post(format!("{}/webhooks/billing", app.address))
        .body(checkout_body("cus_1", "u1"))
        .send()
        .await
        .expect("Failed to post webhook");

    assert_eq!(response.status().as_u16(), 400);

    app.cleanup().await;
}

#[tokio::test]
async fn invalid_signature_rejects_before_any_state_change() {
    let app = TestApp::spawn().await;

    let body = checkout_body("cus_sig", "u_sig");
    let response = reqwest::Client::new()
        .post(format!("{}/webhooks/billing", app.address))
        .header("x-billing-signature", "deadbeef")
        .body(body)
        .send()
        .await
        .expect("Failed to post webhook");

    assert_eq!(response.status().as_u16(), 400);

    // Verification runs before dispatch: no link may exist.
    let link = app
        .db
        .collection::<CustomerLink>("customer_links")
        .find_one(doc! { "_id": "cus_sig" }, None)
        .await
        .expect("Failed to query links");
    assert!(link.is_none());

    app.cleanup().await;
}

#[tokio::test]
async fn checkout_links_customer_without_setting_tier() {
    let app = TestApp::spawn().await;

    let response = app.post_webhook(&checkout_body("cus_1", "u1")).await;
    assert_eq!(response.status().as_u16(), 200);
    let ack: serde_json::Value = response.json().await.expect("Invalid ack body");
    assert_eq!(ack, json!({ "received": true }));

    let link = app
        .db
        .collection::<CustomerLink>("customer_links")
        .find_one(doc! { "_id": "cus_1" }, None)
        .await
        .expect("Failed to query links")
        .expect("Link not created");
    assert_eq!(link.user_id, "u1");

    // Tier is finalized by a subscription event, not by checkout.
    assert_eq!(tier_of(&app, "u1").await, None);

    app.cleanup().await;
}

#[tokio::test]
async fn subscription_lifecycle_drives_tier() {
    let app = TestApp::spawn().await;

    app.post_webhook(&checkout_body("cus_1", "u1")).await;

    let response = app
        .post_webhook(&subscription_body(
            "subscription.updated",
            "cus_1",
            "active",
            "price_pro",
        ))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(tier_of(&app, "u1").await.as_deref(), Some("pro"));

    // Deletion collapses to free.
    let response = app
        .post_webhook(&subscription_body(
            "subscription.deleted",
            "cus_1",
            "canceled",
            "price_pro",
        ))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(tier_of(&app, "u1").await.as_deref(), Some("free"));

    app.cleanup().await;
}

#[tokio::test]
async fn non_entitled_status_collapses_to_free() {
    let app = TestApp::spawn().await;

    app.post_webhook(&checkout_body("cus_2", "u2")).await;
    app.post_webhook(&subscription_body(
        "subscription.updated",
        "cus_2",
        "past_due",
        "price_agency",
    ))
    .await;

    assert_eq!(tier_of(&app, "u2").await.as_deref(), Some("free"));

    app.cleanup().await;
}

#[tokio::test]
async fn trialing_keeps_paid_tier() {
    let app = TestApp::spawn().await;

    app.post_webhook(&checkout_body("cus_3", "u3")).await;
    app.post_webhook(&subscription_body(
        "subscription.created",
        "cus_3",
        "trialing",
        "price_agency",
    ))
    .await;

    assert_eq!(tier_of(&app, "u3").await.as_deref(), Some("agency"));

    app.cleanup().await;
}

#[tokio::test]
async fn replaying_an_event_is_idempotent() {
    let app = TestApp::spawn().await;

    app.post_webhook(&checkout_body("cus_4", "u4")).await;

    let body = subscription_body("subscription.updated", "cus_4", "active", "price_pro");
    app.post_webhook(&body).await;
    app.post_webhook(&body).await;

    assert_eq!(tier_of(&app, "u4").await.as_deref(), Some("pro"));

    let snapshots = app
        .db
        .collection::<SubscriptionSnapshot>("subscription_snapshots")
        .count_documents(doc! { "customer_id": "cus_4" }, None)
        .await
        .expect("Failed to count snapshots");
    assert_eq!(snapshots, 1);

    app.cleanup().await;
}

#[tokio::test]
async fn unknown_event_kind_is_acknowledged() {
    let app = TestApp::spawn().await;

    let body = json!({ "type": "invoice.paid", "data": { "id": "in_1" } }).to_string();
    let response = app.post_webhook(&body).await;

    assert_eq!(response.status().as_u16(), 200);
    let ack: serde_json::Value = response.json().await.expect("Invalid ack body");
    assert_eq!(ack, json!({ "received": true }));

    app.cleanup().await;
}

#[tokio::test]
async fn checkout_with_missing_user_id_is_dropped() {
    let app = TestApp::spawn().await;

    let body = json!({
        "type": "checkout.completed",
        "data": { "customer": "cus_5" }
    })
    .to_string();
    let response = app.post_webhook(&body).await;

    // Tolerated, acknowledged, but no link is created.
    assert_eq!(response.status().as_u16(), 200);
    let link = app
        .db
        .collection::<CustomerLink>("customer_links")
        .find_one(doc! { "_id": "cus_5" }, None)
        .await
        .expect("Failed to query links");
    assert!(link.is_none());

    app.cleanup().await;
}

#[tokio::test]
async fn out_of_order_subscription_is_parked_and_replayed() {
    let app = TestApp::spawn().await;

    // Subscription event arrives before the checkout link exists.
    let response = app
        .post_webhook(&subscription_body(
            "subscription.updated",
            "cus_6",
            "active",
            "price_pro",
        ))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(tier_of(&app, "u6").await, None);

    // The late checkout links the customer and replays the parked event.
    app.post_webhook(&checkout_body("cus_6", "u6")).await;
    assert_eq!(tier_of(&app, "u6").await.as_deref(), Some("pro"));

    app.cleanup().await;
}

#[tokio::test]
async fn malformed_payload_is_rejected() {
    let app = TestApp::spawn().await;

    let response = app.post_webhook("{not json").await;
    assert_eq!(response.status().as_u16(), 400);

    app.cleanup().await;
}
