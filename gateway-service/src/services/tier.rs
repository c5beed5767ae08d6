//! Tier resolution.
//!
//! Maps billing price ids to internal tiers and collapses non-entitled
//! subscription statuses to free. Both functions are pure; all persistence is
//! owned by the webhook path.

use crate::config::PricingConfig;
use crate::models::{SubscriptionStatus, Tier};

/// Price-id to tier table, built once from configuration.
#[derive(Debug, Clone)]
pub struct TierCatalog {
    pro_price_id: String,
    agency_price_id: String,
    enterprise_price_id: String,
}

impl TierCatalog {
    pub fn new(pricing: &PricingConfig) -> Self {
        Self {
            pro_price_id: pricing.pro_price_id.clone(),
            agency_price_id: pricing.agency_price_id.clone(),
            enterprise_price_id: pricing.enterprise_price_id.clone(),
        }
    }

    /// Resolve a price id to its tier.
    ///
    /// A missing or unrecognized price id resolves to `Tier::Free`; this is
    /// the documented default and never an error.
    pub fn tier_for_price(&self, price_id: Option<&str>) -> Tier {
        match price_id {
            Some(p) if p == self.pro_price_id => Tier::Pro,
            Some(p) if p == self.agency_price_id => Tier::Agency,
            Some(p) if p == self.enterprise_price_id => Tier::Enterprise,
            _ => Tier::Free,
        }
    }
}

/// Collapse a mapped tier through the subscription status: the mapped tier
/// applies only while the subscription is active or trialing, free otherwise.
pub fn effective_tier(mapped: Tier, status: SubscriptionStatus) -> Tier {
    if status.is_entitled() {
        mapped
    } else {
        Tier::Free
    }
}
