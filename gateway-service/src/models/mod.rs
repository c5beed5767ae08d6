use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};

/// Service level controlling quota limits.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Agency,
    Enterprise,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Agency => "agency",
            Tier::Enterprise => "enterprise",
        }
    }
}

/// Subscription lifecycle status as reported by the billing provider.
///
/// Statuses the provider may add later deserialize as `Unknown`, which is
/// never entitled.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Paused,
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    /// Only actively-paying or trialing subscribers keep a paid tier.
    pub fn is_entitled(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Unknown => "unknown",
        }
    }
}

/// Operation kinds gated by daily quotas.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Screenshot,
    Preview,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Screenshot => "screenshot",
            OperationKind::Preview => "preview",
        }
    }
}

/// Association between an external billing customer id and an internal user.
///
/// One user per customer id; overwritten on conflict, never deleted.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CustomerLink {
    #[serde(rename = "_id")]
    pub customer_id: String,
    pub user_id: String,
    pub linked_at: DateTime,
}

/// Latest known state of one subscription, overwritten wholesale on every
/// lifecycle event. No history is retained.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubscriptionSnapshot {
    #[serde(rename = "_id")]
    pub subscription_id: String,
    pub customer_id: String,
    pub price_id: Option<String>,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<i64>,
    pub cancel_at_period_end: bool,
    pub updated_at: DateTime,
}

/// Source of truth for gating decisions. Mutated only by the billing webhook
/// path; always derived from the most recently applied snapshot.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserTierState {
    #[serde(rename = "_id")]
    pub user_id: String,
    pub tier: Tier,
    pub updated_at: DateTime,
}

/// Per-user, per-kind, per-day consumption count. A new date is a new counter.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QuotaCounter {
    pub user_id: String,
    pub kind: OperationKind,
    pub date: String,
    pub count: i64,
}
