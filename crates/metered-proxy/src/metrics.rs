use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Proxied requests by endpoint and outcome (forwarded, not_found, rate_limited, ...)
pub static PROXY_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("meter_proxy_requests_total", "Proxied requests by outcome"),
        &["endpoint", "outcome"],
    )
    .unwrap()
});

pub static SESSIONS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("meter_sessions_created_total", "Sessions created").unwrap()
});

pub static SESSIONS_EVICTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "meter_sessions_evicted_total",
        "Sessions evicted after idling",
    )
    .unwrap()
});

pub static SESSIONS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("meter_sessions_active", "Sessions currently tracked").unwrap()
});

pub static BALANCE_LOOKUP_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "meter_balance_lookup_failures_total",
        "Balance oracle queries that failed",
    )
    .unwrap()
});

pub static UPSTREAM_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "meter_upstream_latency_seconds",
            "Time until the upstream response head arrives",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .unwrap()
});

/// Register all metrics with the registry
pub fn register_metrics() {
    REGISTRY
        .register(Box::new(PROXY_REQUESTS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(SESSIONS_CREATED.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(SESSIONS_EVICTED.clone()))
        .unwrap();
    REGISTRY.register(Box::new(SESSIONS_ACTIVE.clone())).unwrap();
    REGISTRY
        .register(Box::new(BALANCE_LOOKUP_FAILURES.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(UPSTREAM_LATENCY.clone()))
        .unwrap();
}
