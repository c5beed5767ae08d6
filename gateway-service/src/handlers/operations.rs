//! Gated operation handlers.
//!
//! Each request runs quota admission (a single atomic check-and-increment)
//! and then forwards to the compute backend with the caller's signed identity.
//! Upstream failures arrive here already normalized to typed responses and
//! are relayed as-is.

use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::{extract::State, Extension, Json};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::tracing::RequestId;
use validator::Validate;

use crate::middleware::UserIdentity;
use crate::models::{OperationKind, Tier};
use crate::services::compute::{
    CallOptions, ComputeBody, ComputeResponse, UserContext, IDEMPOTENCY_KEY_HEADER,
    REQUEST_ID_HEADER,
};
use crate::services::metrics::{record_compute_call, record_quota_decision};
use crate::services::quota::{limit_for, seconds_until_next_utc_day, today_utc, QuotaDecision};
use crate::AppState;

/// Request to render a screenshot of a published site.
#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct ScreenshotRequest {
    #[validate(url)]
    pub url: String,
    #[serde(default)]
    pub full_page: bool,
}

/// Request to generate a draft preview.
#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct PreviewRequest {
    #[validate(length(min = 1))]
    pub site_id: String,
}

/// Screenshot rendering is a long job: the caller only needs to know work was
/// kicked off, so a timeout is converted into a 202 acceptance.
pub async fn screenshot(
    State(state): State<AppState>,
    identity: UserIdentity,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Json(payload): Json<ScreenshotRequest>,
) -> Result<Response, AppError> {
    payload.validate()?;

    run_gated(
        &state,
        identity,
        request_id,
        &headers,
        OperationKind::Screenshot,
        "/render/screenshot",
        json!(payload),
        true,
    )
    .await
}

/// Previews are interactive; a timeout surfaces as 504.
pub async fn preview(
    State(state): State<AppState>,
    identity: UserIdentity,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Json(payload): Json<PreviewRequest>,
) -> Result<Response, AppError> {
    payload.validate()?;

    run_gated(
        &state,
        identity,
        request_id,
        &headers,
        OperationKind::Preview,
        "/render/preview",
        json!(payload),
        false,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn run_gated(
    state: &AppState,
    identity: UserIdentity,
    request_id: RequestId,
    headers: &HeaderMap,
    kind: OperationKind,
    path: &str,
    body: serde_json::Value,
    accept_on_timeout: bool,
) -> Result<Response, AppError> {
    let tier = state
        .repository
        .get_tier(&identity.user_id)
        .await
        .map_err(AppError::DatabaseError)?
        .map(|t| t.tier)
        .unwrap_or(Tier::Free);

    let limit = limit_for(tier, kind);
    let date = today_utc();

    // The check and the increment are one conditional atomic update; two
    // concurrent requests from the same user cannot both pass an almost-spent
    // limit.
    match state
        .repository
        .try_consume_quota(&identity.user_id, kind, &date, limit)
        .await
        .map_err(AppError::DatabaseError)?
    {
        QuotaDecision::Allowed { used_today } => {
            record_quota_decision(tier.as_str(), kind.as_str(), true);
            tracing::debug!(
                user_id = %identity.user_id,
                kind = %kind.as_str(),
                used_today,
                "Quota unit consumed"
            );
        }
        QuotaDecision::Denied => {
            record_quota_decision(tier.as_str(), kind.as_str(), false);
            tracing::info!(
                user_id = %identity.user_id,
                tier = %tier.as_str(),
                kind = %kind.as_str(),
                "Daily quota exhausted"
            );
            return Err(AppError::TooManyRequests(
                format!(
                    "Daily {} quota exhausted for tier {}",
                    kind.as_str(),
                    tier.as_str()
                ),
                Some(seconds_until_next_utc_day()),
            ));
        }
    }

    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let ctx = UserContext {
        user_id: identity.user_id,
        email: identity.email,
        tier,
    };

    let response = state
        .compute
        .call(
            Method::POST,
            path,
            Some(&body),
            Some(&ctx),
            Some(request_id.0),
            CallOptions {
                idempotency_key,
                accept_on_timeout,
                timeout: None,
            },
        )
        .await;

    record_compute_call(compute_outcome(&response));
    Ok(relay(response))
}

fn compute_outcome(response: &ComputeResponse) -> &'static str {
    match response.status.as_u16() {
        202 => "accepted",
        504 => "timeout",
        502 => "unreachable",
        s if (200..300).contains(&s) => "ok",
        _ => "upstream_error",
    }
}

/// Relay a normalized compute response to the caller, preserving the
/// correlation id.
fn relay(response: ComputeResponse) -> Response {
    let ComputeResponse {
        status,
        body,
        request_id,
    } = response;

    let mut relayed = match body {
        ComputeBody::Parsed(value) => (status, Json(value)).into_response(),
        ComputeBody::Unparsed(text) => (status, text).into_response(),
    };

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        relayed.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    relayed
}
