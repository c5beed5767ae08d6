//! Authenticated-user extractor.
//!
//! The session-authenticating frontend sits in front of this gateway and
//! forwards the caller's identity as headers. Requests without them are
//! rejected before any quota or forwarding logic runs.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

/// Identity of the user making a gated request.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub user_id: String,
    pub email: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for UserIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing x-user-id header"))
            })?;

        let email = parts
            .headers
            .get("x-user-email")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing x-user-email header"))
            })?;

        let span = tracing::Span::current();
        span.record("user_id", user_id);

        Ok(UserIdentity {
            user_id: user_id.to_string(),
            email: email.to_string(),
        })
    }
}
