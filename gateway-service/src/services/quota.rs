//! Quota policy.
//!
//! Static per-tier daily limits for gated operations. The policy check here is
//! pure; the increment of today's usage is owned by the repository, which
//! embeds the same predicate in a single conditional atomic update so that
//! check and increment can never race (see `GatewayRepository::try_consume_quota`).

use chrono::{Duration, Utc};

use crate::models::{OperationKind, Tier};

/// Daily ceiling for one tier/kind pair.
///
/// `Unlimited` is an explicit variant rather than a numeric sentinel; the
/// `0 == unlimited` convention exists only at the configuration boundary and
/// is translated by [`QuotaLimit::from_daily`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaLimit {
    Unlimited,
    Limited(u32),
}

impl QuotaLimit {
    /// Translate a configured daily limit, where `0` is reserved to mean
    /// "no ceiling" rather than "zero allowed".
    pub fn from_daily(limit: u32) -> Self {
        if limit == 0 {
            QuotaLimit::Unlimited
        } else {
            QuotaLimit::Limited(limit)
        }
    }

    /// The configured daily value, `None` for unlimited.
    pub fn daily(&self) -> Option<u32> {
        match self {
            QuotaLimit::Unlimited => None,
            QuotaLimit::Limited(l) => Some(*l),
        }
    }
}

/// Static {tier, kind} -> daily limit table.
pub fn limit_for(tier: Tier, kind: OperationKind) -> QuotaLimit {
    let daily = match (tier, kind) {
        (Tier::Free, OperationKind::Screenshot) => 5,
        (Tier::Pro, OperationKind::Screenshot) => 100,
        (Tier::Agency, OperationKind::Screenshot) => 500,
        (Tier::Enterprise, OperationKind::Screenshot) => 0,
        (Tier::Free, OperationKind::Preview) => 20,
        (Tier::Pro, OperationKind::Preview) => 300,
        (Tier::Agency, OperationKind::Preview) => 1000,
        (Tier::Enterprise, OperationKind::Preview) => 0,
    };
    QuotaLimit::from_daily(daily)
}

/// Pure policy check: may one more unit be consumed given today's usage?
pub fn can_consume(limit: QuotaLimit, used_today: i64) -> bool {
    match limit {
        QuotaLimit::Unlimited => true,
        QuotaLimit::Limited(l) => used_today < i64::from(l),
    }
}

/// Outcome of an atomic consume attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed { used_today: i64 },
    Denied,
}

/// Counter key for the current UTC date. A new date is a new counter; nothing
/// is ever reset or deleted.
pub fn today_utc() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Seconds until the quota window rolls over, for `Retry-After`.
pub fn seconds_until_next_utc_day() -> u64 {
    let now = Utc::now();
    let tomorrow = (now + Duration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_else(|| now.naive_utc());
    (tomorrow - now.naive_utc()).num_seconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_config_limit_means_unlimited() {
        assert_eq!(QuotaLimit::from_daily(0), QuotaLimit::Unlimited);
        assert_eq!(QuotaLimit::from_daily(5), QuotaLimit::Limited(5));
    }

    #[test]
    fn test_unlimited_allows_arbitrarily_large_usage() {
        assert!(can_consume(QuotaLimit::Unlimited, 10_000));
        assert!(can_consume(
            limit_for(Tier::Enterprise, OperationKind::Screenshot),
            10_000
        ));
    }

    #[test]
    fn test_monotonic_in_used_today() {
        let limit = QuotaLimit::Limited(5);
        for used in 0..5 {
            assert!(can_consume(limit, used));
        }
        assert!(!can_consume(limit, 5));
        assert!(!can_consume(limit, 6));
        assert!(!can_consume(limit, 10_000));
    }

    #[test]
    fn test_free_tier_has_positive_limits() {
        assert_eq!(
            limit_for(Tier::Free, OperationKind::Screenshot).daily(),
            Some(5)
        );
        assert_eq!(
            limit_for(Tier::Free, OperationKind::Preview).daily(),
            Some(20)
        );
    }

    #[test]
    fn test_retry_after_is_within_a_day() {
        let secs = seconds_until_next_utc_day();
        assert!(secs <= 86_400);
    }
}
