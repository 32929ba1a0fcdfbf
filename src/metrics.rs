// Prometheus metrics definitions for the skirmish backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// 1 while the simulation loops are running.
    pub static ref SIMULATION_RUNNING: IntGauge =
        IntGauge::new("skirmish_simulation_running", "Whether the simulation loops are running").unwrap();

    /// Decision requests currently awaiting the provider.
    pub static ref DECISIONS_IN_FLIGHT: IntGauge =
        IntGauge::new("skirmish_decisions_in_flight", "Decision requests awaiting a reply").unwrap();

    /// Live WebSocket connections.
    pub static ref CONNECTED_WEBSOCKETS: IntGauge =
        IntGauge::new("skirmish_connected_websockets", "Live WebSocket connections").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Decision rounds per team, by outcome (ok, rate_limited, error, skipped, stale).
    pub static ref DECISION_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("skirmish_decision_requests_total", "Decision requests by team and outcome"),
        &["team", "outcome"],
    )
    .unwrap();

    /// Individual provider attempts, by provider tier and outcome.
    pub static ref DISPATCH_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("skirmish_dispatch_attempts_total", "Provider attempts by tier and outcome"),
        &["provider", "outcome"],
    )
    .unwrap();

    /// Times every key was warm and the least recently used one was forced.
    pub static ref KEY_FORCED_FALLBACK_TOTAL: IntCounter = IntCounter::new(
        "skirmish_key_forced_fallback_total",
        "Keys handed out while still cooling down",
    )
    .unwrap();

    /// Decision actions accepted, by action type.
    pub static ref ACTIONS_APPLIED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("skirmish_actions_applied_total", "Decision actions accepted"),
        &["action"],
    )
    .unwrap();

    /// Decision actions discarded, by reason.
    pub static ref ACTIONS_DROPPED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("skirmish_actions_dropped_total", "Decision actions discarded"),
        &["reason"],
    )
    .unwrap();

    /// Kills resolved by the reflex engine, by victim role.
    pub static ref KILLS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("skirmish_kills_total", "Units killed"),
        &["role"],
    )
    .unwrap();

    /// Total WebSocket messages sent to clients.
    pub static ref WEBSOCKET_MESSAGES_SENT_TOTAL: IntCounter = IntCounter::new(
        "skirmish_websocket_messages_sent_total",
        "Total WebSocket messages sent",
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Physics tick processing time in milliseconds.
    pub static ref PHYSICS_TICK_DURATION_MS: Histogram = Histogram::with_opts(
        HistogramOpts::new("skirmish_physics_tick_duration_ms", "Physics tick processing time in ms")
            .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 16.0]),
    )
    .unwrap();

    /// Reflex tick processing time in milliseconds.
    pub static ref REFLEX_TICK_DURATION_MS: Histogram = Histogram::with_opts(
        HistogramOpts::new("skirmish_reflex_tick_duration_ms", "Reflex tick processing time in ms")
            .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]),
    )
    .unwrap();

    /// End-to-end decision latency in seconds.
    pub static ref DECISION_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("skirmish_decision_latency_seconds", "Decision request latency in seconds")
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0]),
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Safe to call more than once.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(SIMULATION_RUNNING.clone()),
        Box::new(DECISIONS_IN_FLIGHT.clone()),
        Box::new(CONNECTED_WEBSOCKETS.clone()),
        Box::new(DECISION_REQUESTS_TOTAL.clone()),
        Box::new(DISPATCH_ATTEMPTS_TOTAL.clone()),
        Box::new(KEY_FORCED_FALLBACK_TOTAL.clone()),
        Box::new(ACTIONS_APPLIED_TOTAL.clone()),
        Box::new(ACTIONS_DROPPED_TOTAL.clone()),
        Box::new(KILLS_TOTAL.clone()),
        Box::new(WEBSOCKET_MESSAGES_SENT_TOTAL.clone()),
        Box::new(PHYSICS_TICK_DURATION_MS.clone()),
        Box::new(REFLEX_TICK_DURATION_MS.clone()),
        Box::new(DECISION_LATENCY_SECONDS.clone()),
    ];

    for c in collectors {
        // AlreadyReg on repeat calls (tests, router rebuilds) is fine.
        if let Err(e) = REGISTRY.register(c) {
            tracing::debug!("metric registration skipped: {}", e);
        }
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_metrics_returns_string() {
        register_metrics();
        register_metrics();
        KEY_FORCED_FALLBACK_TOTAL.inc();
        let output = gather_metrics();
        assert!(output.contains("skirmish_key_forced_fallback_total"));
    }

    #[test]
    fn test_metric_increments() {
        SIMULATION_RUNNING.set(1);
        assert_eq!(SIMULATION_RUNNING.get(), 1);
        SIMULATION_RUNNING.set(0);

        DECISIONS_IN_FLIGHT.inc();
        DECISIONS_IN_FLIGHT.dec();

        DECISION_REQUESTS_TOTAL
            .with_label_values(&["BLUE", "ok"])
            .inc();
        DISPATCH_ATTEMPTS_TOTAL
            .with_label_values(&["standard", "rate_limited"])
            .inc();
        ACTIONS_APPLIED_TOTAL.with_label_values(&["MOVE"]).inc();
        ACTIONS_DROPPED_TOTAL.with_label_values(&["dead"]).inc();
        KILLS_TOTAL.with_label_values(&["sniper"]).inc();

        PHYSICS_TICK_DURATION_MS.observe(0.3);
        REFLEX_TICK_DURATION_MS.observe(1.2);
        DECISION_LATENCY_SECONDS.observe(1.5);
    }
}
