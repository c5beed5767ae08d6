//! Internal compute backend client.
//!
//! Builds authenticated outbound requests (internal shared key, signed user
//! context, request-id correlation, optional idempotency key) and normalizes
//! every failure mode into a typed response. After construction this client
//! never returns an error across its boundary: timeouts and transport
//! failures become synthesized 202/504/502 responses. It performs no retries;
//! retry policy belongs to the caller, layered on the idempotency key.

use axum::http::StatusCode;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use serde_json::json;
use service_core::error::AppError;
use service_core::utils::signature;
use std::time::Duration;
use uuid::Uuid;

use crate::config::ComputeConfig;
use crate::models::Tier;

pub const INTERNAL_KEY_HEADER: &str = "x-internal-key";
pub const USER_CTX_HEADER: &str = "x-user-ctx";
pub const USER_CTX_SIG_HEADER: &str = "x-user-ctx-sig";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const REQUEST_ID_HEADER: &str = service_core::middleware::tracing::REQUEST_ID_HEADER;

/// Identity bundle forwarded to the compute backend. Constructed per call,
/// never persisted. The backend re-verifies the detached signature instead of
/// trusting the payload.
#[derive(Debug, Serialize)]
pub struct UserContext {
    pub user_id: String,
    pub email: String,
    pub tier: Tier,
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Forwarded as `idempotency-key` so retried calls are safely replayable.
    pub idempotency_key: Option<String>,
    /// Convert a timeout into a synthesized 202 acceptance, for long jobs
    /// where the caller only needs to know work was kicked off.
    pub accept_on_timeout: bool,
    /// Override the configured timeout budget for this call.
    pub timeout: Option<Duration>,
}

/// Upstream body, kept explicit so callers cannot mistake raw text for
/// structured data.
#[derive(Debug)]
pub enum ComputeBody {
    Parsed(serde_json::Value),
    Unparsed(String),
}

#[derive(Debug)]
pub struct ComputeResponse {
    pub status: StatusCode,
    pub body: ComputeBody,
    pub request_id: String,
}

#[derive(Clone)]
pub struct ComputeClient {
    http: Client,
    origin: String,
    path_prefix: String,
    internal_namespace: String,
    internal_key: Secret<String>,
    context_secret: Secret<String>,
    timeout: Duration,
}

impl ComputeClient {
    /// Create the client. Fails here, not per call, when the internal shared
    /// key is unset.
    pub fn new(config: &ComputeConfig) -> Result<Self, AppError> {
        if config.internal_key.expose_secret().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "COMPUTE_INTERNAL_KEY is not set"
            )));
        }

        Ok(Self {
            http: Client::new(),
            origin: config.origin.trim_end_matches('/').to_string(),
            path_prefix: config.path_prefix.clone(),
            internal_namespace: config.internal_namespace.clone(),
            internal_key: config.internal_key.clone(),
            context_secret: config.context_secret.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Outbound URL: origin + prefix + path, except the reserved internal
    /// namespace which bypasses the prefix.
    fn url_for(&self, path: &str) -> String {
        if path.starts_with(&self.internal_namespace) {
            format!("{}{}", self.origin, path)
        } else {
            format!("{}{}{}", self.origin, self.path_prefix, path)
        }
    }

    /// Serialize and sign a user context for header transport: base64 of the
    /// JSON payload plus a hex HMAC-SHA256 signature over the same JSON.
    fn sign_context(&self, ctx: &UserContext) -> anyhow::Result<(String, String)> {
        let serialized = serde_json::to_string(ctx)?;
        let sig = signature::sign(self.context_secret.expose_secret(), &serialized)?;
        Ok((BASE64.encode(serialized.as_bytes()), sig))
    }

    /// Send one request to the compute backend.
    ///
    /// `request_id` should carry the inbound correlation id when there is one;
    /// a fresh id is minted otherwise. The id actually sent is returned so the
    /// caller can correlate.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        user_ctx: Option<&UserContext>,
        request_id: Option<String>,
        opts: CallOptions,
    ) -> ComputeResponse {
        let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let timeout = opts.timeout.unwrap_or(self.timeout);
        let url = self.url_for(path);

        let mut request = self
            .http
            .request(method, url.as_str())
            .timeout(timeout)
            .header(REQUEST_ID_HEADER, &request_id)
            .header(INTERNAL_KEY_HEADER, self.internal_key.expose_secret());

        if let Some(ctx) = user_ctx {
            match self.sign_context(ctx) {
                Ok((payload, sig)) => {
                    request = request
                        .header(USER_CTX_HEADER, payload)
                        .header(USER_CTX_SIG_HEADER, sig);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to sign user context");
                    return self.synthesized(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "CONTEXT_SIGNING_FAILED",
                        "failed to sign user context",
                        request_id,
                    );
                }
            }
        }

        if let Some(key) = opts.idempotency_key {
            request = request.header(IDEMPOTENCY_KEY_HEADER, key);
        }

        if let Some(body) = body {
            request = request.json(body);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                match response.text().await {
                    Ok(text) => {
                        let body = match serde_json::from_str(&text) {
                            Ok(value) => ComputeBody::Parsed(value),
                            Err(_) => ComputeBody::Unparsed(text),
                        };
                        ComputeResponse {
                            status,
                            body,
                            request_id,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "Failed to read compute response body");
                        self.synthesized(
                            StatusCode::BAD_GATEWAY,
                            "UPSTREAM_UNREACHABLE",
                            "failed to reach compute backend",
                            request_id,
                        )
                    }
                }
            }
            Err(e) if e.is_timeout() => {
                if opts.accept_on_timeout {
                    tracing::info!(url = %url, "Compute call exceeded budget; accepted as started");
                    ComputeResponse {
                        status: StatusCode::ACCEPTED,
                        body: ComputeBody::Parsed(json!({
                            "started": true,
                            "code": "TIMEOUT_ACCEPTED"
                        })),
                        request_id,
                    }
                } else {
                    tracing::warn!(url = %url, "Compute call timed out");
                    self.synthesized(
                        StatusCode::GATEWAY_TIMEOUT,
                        "UPSTREAM_TIMEOUT",
                        "compute backend timed out",
                        request_id,
                    )
                }
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Compute call failed");
                self.synthesized(
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_UNREACHABLE",
                    "failed to reach compute backend",
                    request_id,
                )
            }
        }
    }

    fn synthesized(
        &self,
        status: StatusCode,
        code: &str,
        message: &str,
        request_id: String,
    ) -> ComputeResponse {
        ComputeResponse {
            status,
            body: ComputeBody::Parsed(json!({ "error": message, "code": code })),
            request_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ComputeConfig {
        ComputeConfig {
            origin: "http://compute.internal:8090/".to_string(),
            path_prefix: "/api".to_string(),
            internal_namespace: "/internal".to_string(),
            internal_key: Secret::new("test_internal_key".to_string()),
            context_secret: Secret::new("test_context_secret".to_string()),
            timeout_secs: 15,
        }
    }

    #[test]
    fn test_missing_internal_key_fails_construction() {
        let mut config = test_config();
        config.internal_key = Secret::new(String::new());

        assert!(ComputeClient::new(&config).is_err());
    }

    #[test]
    fn test_url_prefixing() {
        let client = ComputeClient::new(&test_config()).unwrap();

        assert_eq!(
            client.url_for("/render/screenshot"),
            "http://compute.internal:8090/api/render/screenshot"
        );
        assert_eq!(
            client.url_for("/internal/jobs/123"),
            "http://compute.internal:8090/internal/jobs/123"
        );
    }

    #[test]
    fn test_signed_context_verifies() {
        let client = ComputeClient::new(&test_config()).unwrap();
        let ctx = UserContext {
            user_id: "u1".to_string(),
            email: "u1@example.com".to_string(),
            tier: Tier::Pro,
        };

        let (payload_b64, sig) = client.sign_context(&ctx).unwrap();
        let payload = String::from_utf8(BASE64.decode(payload_b64).unwrap()).unwrap();

        assert!(signature::verify("test_context_secret", &payload, &sig).unwrap());
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["user_id"], "u1");
        assert_eq!(value["tier"], "pro");
    }
}
