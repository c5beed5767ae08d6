pub mod billing;
pub mod compute;
pub mod metrics;
pub mod quota;
pub mod repository;
pub mod tier;

pub use billing::BillingWebhook;
pub use compute::ComputeClient;
pub use repository::GatewayRepository;
pub use tier::TierCatalog;
