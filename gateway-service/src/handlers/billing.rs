//! Billing webhook handler.
//!
//! Verification runs unconditionally before dispatch: a missing or invalid
//! signature rejects the request before any parsing, linking or tier logic.
//! Recognized-but-inapplicable events (missing fields, unlinked customers,
//! unknown kinds) are acknowledged with the same success body so the sender
//! never retries a condition a retry cannot fix.

use axum::{extract::State, http::HeaderMap, Json};
use mongodb::bson::DateTime;
use serde_json::json;
use service_core::error::AppError;

use crate::services::billing::{
    BillingEvent, CheckoutPayload, PendingBillingEvent, SubscriptionPayload, SIGNATURE_HEADER,
};
use crate::services::metrics::record_billing_event;
use crate::services::tier::effective_tier;
use crate::models::SubscriptionSnapshot;
use crate::AppState;

pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing billing webhook signature header");
            AppError::BadRequest(anyhow::anyhow!("Missing webhook signature"))
        })?;

    let is_valid = state
        .billing
        .verify_signature(&body, signature)
        .map_err(|e| {
            tracing::error!(error = %e, "Webhook signature verification error");
            AppError::InternalError(anyhow::anyhow!("Webhook verification failed"))
        })?;

    if !is_valid {
        tracing::warn!("Invalid billing webhook signature");
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Invalid webhook signature"
        )));
    }

    let event = state.billing.parse_event(&body).map_err(|e| {
        tracing::warn!(error = %e, "Failed to parse billing event");
        AppError::BadRequest(anyhow::anyhow!("Malformed webhook payload"))
    })?;

    match event {
        BillingEvent::CheckoutCompleted(payload) => {
            handle_checkout(&state, payload).await?;
        }
        BillingEvent::SubscriptionCreated(payload)
        | BillingEvent::SubscriptionUpdated(payload)
        | BillingEvent::SubscriptionDeleted(payload)
        | BillingEvent::TrialWillEnd(payload) => {
            handle_subscription(&state, payload).await?;
        }
        BillingEvent::Unknown { kind } => {
            tracing::debug!(kind = %kind, "Ignoring unrecognized billing event kind");
            record_billing_event(&kind, "ignored");
        }
    }

    // The acknowledgment is identical for applied and ignored events.
    Ok(Json(json!({ "received": true })))
}

async fn handle_checkout(state: &AppState, payload: CheckoutPayload) -> Result<(), AppError> {
    let (Some(customer_id), Some(user_id)) = (payload.customer, payload.user_id) else {
        tracing::warn!("Checkout event missing customer id or user id; dropping");
        record_billing_event("checkout.completed", "dropped");
        return Ok(());
    };

    state
        .repository
        .link_customer(&customer_id, &user_id)
        .await
        .map_err(AppError::DatabaseError)?;

    tracing::info!(
        customer_id = %customer_id,
        user_id = %user_id,
        "Linked billing customer to user"
    );
    record_billing_event("checkout.completed", "linked");

    // Tier is deliberately not set here; a subscription event finalizes it.
    // Events that beat this link are parked, so replay them now.
    let parked = state
        .repository
        .pending_events(&customer_id)
        .await
        .map_err(AppError::DatabaseError)?;

    if !parked.is_empty() {
        for event in &parked {
            apply_subscription_update(state, &user_id, &event.payload).await?;
        }
        state
            .repository
            .clear_pending_events(&customer_id)
            .await
            .map_err(AppError::DatabaseError)?;

        tracing::info!(
            customer_id = %customer_id,
            replayed = parked.len(),
            "Replayed parked subscription events"
        );
    }

    Ok(())
}

async fn handle_subscription(
    state: &AppState,
    payload: SubscriptionPayload,
) -> Result<(), AppError> {
    let Some(customer_id) = payload.customer.clone() else {
        tracing::warn!(subscription_id = %payload.id, "Subscription event missing customer id; dropping");
        record_billing_event("subscription", "dropped");
        return Ok(());
    };

    let resolved = state
        .repository
        .resolve_customer(&customer_id)
        .await
        .map_err(AppError::DatabaseError)?;

    match resolved {
        Some(user_id) => apply_subscription_update(state, &user_id, &payload).await,
        None => {
            // A retry cannot fix a missing link, so acknowledge success and
            // park the payload for replay once the checkout event lands.
            tracing::warn!(
                customer_id = %customer_id,
                subscription_id = %payload.id,
                "Subscription event for unlinked customer; parking for replay"
            );
            state
                .repository
                .park_pending_event(PendingBillingEvent {
                    customer_id,
                    payload,
                    received_at: DateTime::now(),
                })
                .await
                .map_err(AppError::DatabaseError)?;
            record_billing_event("subscription", "parked");
            Ok(())
        }
    }
}

async fn apply_subscription_update(
    state: &AppState,
    user_id: &str,
    payload: &SubscriptionPayload,
) -> Result<(), AppError> {
    let mapped = state.tiers.tier_for_price(payload.first_price_id());
    let effective = effective_tier(mapped, payload.status);

    let snapshot = SubscriptionSnapshot {
        subscription_id: payload.id.clone(),
        customer_id: payload.customer.clone().unwrap_or_default(),
        price_id: payload.first_price_id().map(str::to_string),
        status: payload.status,
        current_period_end: payload.current_period_end,
        cancel_at_period_end: payload.cancel_at_period_end,
        updated_at: DateTime::now(),
    };

    state
        .repository
        .apply_subscription(user_id, snapshot, effective)
        .await
        .map_err(AppError::DatabaseError)?;

    tracing::info!(
        user_id = %user_id,
        subscription_id = %payload.id,
        status = %payload.status.as_str(),
        tier = %effective.as_str(),
        "Applied subscription update"
    );
    record_billing_event("subscription", "applied");

    Ok(())
}
