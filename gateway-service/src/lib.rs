pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use config::Config;
use services::{BillingWebhook, ComputeClient, GatewayRepository, TierCatalog};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub repository: GatewayRepository,
    pub billing: BillingWebhook,
    pub compute: ComputeClient,
    pub tiers: TierCatalog,
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    db: mongodb::Database,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let mut client_options = ClientOptions::parse(config.database.url.expose_secret())
            .await
            .map_err(|e| {
                tracing::error!("Failed to parse MongoDB connection string: {}", e);
                AppError::DatabaseError(e.into())
            })?;
        client_options.app_name = Some("gateway-service".to_string());

        let client = Client::with_options(client_options).map_err(|e| {
            tracing::error!("Failed to create MongoDB client: {}", e);
            AppError::DatabaseError(e.into())
        })?;
        let db = client.database(&config.database.db_name);

        let repository = GatewayRepository::new(&db);
        repository.init_indexes().await.map_err(|e| {
            tracing::error!("Failed to initialize database indexes: {}", e);
            AppError::DatabaseError(e)
        })?;

        let billing = BillingWebhook::new(config.billing.webhook_secret.clone());

        // Fails at construction when the internal key is unset, not per call.
        let compute = ComputeClient::new(&config.compute)?;

        let tiers = TierCatalog::new(&config.pricing);

        services::metrics::init_metrics();

        let state = AppState {
            config: config.clone(),
            repository,
            billing,
            compute,
            tiers,
        };

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics))
            // Billing webhook (raw-body, signature-verified)
            .route("/webhooks/billing", post(handlers::billing::webhook))
            // Gated operations (identity headers, quota-admitted, forwarded)
            .route(
                "/operations/screenshot",
                post(handlers::operations::screenshot),
            )
            .route("/operations/preview", post(handlers::operations::preview))
            .route("/me/entitlements", get(handlers::entitlements::entitlements))
            .layer(from_fn(metrics_middleware))
            .layer(from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                        user_id = tracing::field::Empty,
                    )
                }),
            )
            .with_state(state);

        // Port 0 binds a random port, used by the test harness.
        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            router,
            db,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn db(&self) -> &mongodb::Database {
        &self.db
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        tracing::info!("Listening on port {}", self.port);
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}
