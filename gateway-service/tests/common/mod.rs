use gateway_service::config::{
    BillingConfig, ComputeConfig, Config, DatabaseConfig, PricingConfig, ServerConfig,
};
use gateway_service::Application;
use secrecy::Secret;

pub const TEST_WEBHOOK_SECRET: &str = "test_webhook_secret";
pub const TEST_INTERNAL_KEY: &str = "test_internal_key";
pub const TEST_CONTEXT_SECRET: &str = "test_context_secret";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub db: mongodb::Database,
    pub db_name: String,
}

impl TestApp {
    /// Spawn the app with an unreachable compute backend, for tests that
    /// never forward (or that assert the 502 relay).
    pub async fn spawn() -> Self {
        Self::spawn_with_compute("http://127.0.0.1:9", 15).await
    }

    /// Spawn the app forwarding to the given compute origin.
    pub async fn spawn_with_compute(compute_origin: &str, timeout_secs: u64) -> Self {
        let db_name = format!("gateway_test_{}", uuid::Uuid::new_v4());

        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Random port
            },
            database: DatabaseConfig {
                url: Secret::new(
                    std::env::var("TEST_MONGODB_URI")
                        .unwrap_or_else(|_| "mongodb://localhost:27017".to_string()),
                ),
                db_name: db_name.clone(),
            },
            billing: BillingConfig {
                webhook_secret: Secret::new(TEST_WEBHOOK_SECRET.to_string()),
            },
            compute: ComputeConfig {
                origin: compute_origin.to_string(),
                path_prefix: "/api".to_string(),
                internal_namespace: "/internal".to_string(),
                internal_key: Secret::new(TEST_INTERNAL_KEY.to_string()),
                context_secret: Secret::new(TEST_CONTEXT_SECRET.to_string()),
                timeout_secs,
            },
            pricing: PricingConfig {
                pro_price_id: "price_pro".to_string(),
                agency_price_id: "price_agency".to_string(),
                enterprise_price_id: "price_enterprise".to_string(),
            },
            service_name: "gateway-service-test".to_string(),
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);
        let db = app.db().clone();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to be ready by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            db,
            db_name,
        }
    }

    /// Sign a webhook body the way the billing provider does.
    pub fn sign(&self, body: &str) -> String {
        service_core::utils::signature::sign(TEST_WEBHOOK_SECRET, body)
            .expect("Failed to sign test body")
    }

    /// Post a signed billing webhook.
    pub async fn post_webhook(&self, body: &str) -> reqwest::Response {
        let signature = self.sign(body);
        reqwest::Client::new()
            .post(format!("{}/webhooks/billing", self.address))
            .header("x-billing-signature", signature)
            .body(body.to_string())
            .send()
            .await
            .expect("Failed to post webhook")
    }

    /// Cleanup test database after test completes.
    pub async fn cleanup(&self) {
        self.db
            .drop(None)
            .await
            .expect("Failed to drop test database");
    }
}
