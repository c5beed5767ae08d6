use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Idempotent so test harnesses can spawn
/// several applications in one process.
pub fn init_metrics() {
    if METRICS_HANDLE.get().is_some() {
        return;
    }
    if let Ok(handle) = PrometheusBuilder::new().install_recorder() {
        let _ = METRICS_HANDLE.set(handle);
    }
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

/// Record a processed billing event by kind and outcome
/// (applied/linked/parked/dropped/ignored).
pub fn record_billing_event(kind: &str, outcome: &str) {
    counter!(
        "billing_events_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a quota decision for a gated operation.
pub fn record_quota_decision(tier: &str, kind: &str, allowed: bool) {
    counter!(
        "quota_decisions_total",
        "tier" => tier.to_string(),
        "kind" => kind.to_string(),
        "decision" => if allowed { "allowed" } else { "denied" }
    )
    .increment(1);
}

/// Record a forwarded compute call by normalized outcome.
pub fn record_compute_call(outcome: &str) {
    counter!("compute_calls_total", "outcome" => outcome.to_string()).increment(1);
}
