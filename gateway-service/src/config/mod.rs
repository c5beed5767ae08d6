use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub billing: BillingConfig,
    pub compute: ComputeConfig,
    pub pricing: PricingConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct BillingConfig {
    /// Shared secret for verifying inbound billing webhook signatures.
    /// An empty secret rejects every webhook.
    pub webhook_secret: Secret<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ComputeConfig {
    pub origin: String,
    pub path_prefix: String,
    /// Paths under this namespace bypass `path_prefix`.
    pub internal_namespace: String,
    pub internal_key: Secret<String>,
    pub context_secret: Secret<String>,
    pub timeout_secs: u64,
}

/// Billing price ids mapped to paid tiers. Anything else resolves to free.
#[derive(Deserialize, Clone, Debug)]
pub struct PricingConfig {
    pub pro_price_id: String,
    pub agency_price_id: String,
    pub enterprise_price_id: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("GATEWAY_PORT")
            .unwrap_or_else(|_| "3005".to_string())
            .parse()?;

        let db_url =
            env::var("GATEWAY_DATABASE_URL").context("GATEWAY_DATABASE_URL must be set")?;
        let db_name =
            env::var("GATEWAY_DATABASE_NAME").unwrap_or_else(|_| "gateway_db".to_string());

        let webhook_secret = env::var("BILLING_WEBHOOK_SECRET").unwrap_or_default();

        let compute_origin =
            env::var("COMPUTE_ORIGIN").unwrap_or_else(|_| "http://localhost:8090".to_string());
        let path_prefix = env::var("COMPUTE_PATH_PREFIX").unwrap_or_else(|_| "/api".to_string());
        let internal_namespace =
            env::var("COMPUTE_INTERNAL_NAMESPACE").unwrap_or_else(|_| "/internal".to_string());
        let internal_key = Secret::new(env::var("COMPUTE_INTERNAL_KEY").unwrap_or_default());
        // The context-signing secret falls back to the internal key so a
        // single-secret deployment stays valid.
        let context_secret = match env::var("COMPUTE_CONTEXT_SECRET") {
            Ok(s) => Secret::new(s),
            Err(_) => Secret::new(internal_key.expose_secret().clone()),
        };
        let timeout_secs = env::var("COMPUTE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "15".to_string())
            .parse()?;

        let pro_price_id = env::var("PRICE_ID_PRO").unwrap_or_else(|_| "price_pro".to_string());
        let agency_price_id =
            env::var("PRICE_ID_AGENCY").unwrap_or_else(|_| "price_agency".to_string());
        let enterprise_price_id =
            env::var("PRICE_ID_ENTERPRISE").unwrap_or_else(|_| "price_enterprise".to_string());

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                db_name,
            },
            billing: BillingConfig {
                webhook_secret: Secret::new(webhook_secret),
            },
            compute: ComputeConfig {
                origin: compute_origin,
                path_prefix,
                internal_namespace,
                internal_key,
                context_secret,
                timeout_secs,
            },
            pricing: PricingConfig {
                pro_price_id,
                agency_price_id,
                enterprise_price_id,
            },
            service_name: "gateway-service".to_string(),
        })
    }
}
