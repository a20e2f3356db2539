//! Process-wide Prometheus metrics.
//!
//! Registration happens once at first touch; `force_init` pins every family
//! so `/metrics` shows them before their first update. All updates are safe
//! from any task.

use std::sync::LazyLock;

use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Registry, TextEncoder,
};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/* ============================= GAUGES ============================= */

pub static POLICIES_TOTAL: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let g = IntGaugeVec::new(
        prometheus::Opts::new("gc_policies_total", "Known policies per phase"),
        &["phase"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

pub static INFORMERS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    let g = IntGauge::new("gc_informers_active", "Live informer entries")
        .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

pub static RATE_LIMITERS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    let g = IntGauge::new("gc_rate_limiters_active", "Live rate limiter entries")
        .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

pub static RESOURCES_PENDING: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let g = IntGaugeVec::new(
        prometheus::Opts::new(
            "gc_resources_pending",
            "Matched resources not yet eligible for deletion",
        ),
        &["policy", "gvk"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

/* ============================= COUNTERS ============================= */

pub static RESOURCES_MATCHED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "gc_resources_matched_total",
        "Resources matched by policy selectors across all evaluations",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static RESOURCES_DELETED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new("gc_resources_deleted_total", "Resources deleted, by reason"),
        &["reason"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new("gc_errors_total", "Controller errors, by kind"),
        &["error_type"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

/* ============================= HISTOGRAMS ============================= */

pub static EVALUATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    let h = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "gc_evaluation_duration_seconds",
            "Duration of one evaluation pass",
        ),
        &["policy"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(h.clone()))
        .expect("metric not yet registered");
    h
});

pub static DELETION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    let h = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "gc_deletion_duration_seconds",
            "Duration of the batched deletion phase",
        ),
        &["policy", "gvk"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(h.clone()))
        .expect("metric not yet registered");
    h
});

/* ============================= HELPERS ============================= */

/// Touch every family so all of them appear on `/metrics` from startup.
pub fn force_init() {
    LazyLock::force(&POLICIES_TOTAL);
    LazyLock::force(&INFORMERS_ACTIVE);
    LazyLock::force(&RATE_LIMITERS_ACTIVE);
    LazyLock::force(&RESOURCES_PENDING);
    LazyLock::force(&RESOURCES_MATCHED_TOTAL);
    LazyLock::force(&RESOURCES_DELETED_TOTAL);
    LazyLock::force(&ERRORS_TOTAL);
    LazyLock::force(&EVALUATION_DURATION);
    LazyLock::force(&DELETION_DURATION);
}

/// Render the registry in the Prometheus text exposition format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/* ============================= TESTS ============================= */
