//! Prometheus metrics for larder.
//!
//! Counters live in a crate-local registry. Hosts that serve a `/metrics`
//! endpoint call [`register_metrics`] once and render [`gather_text`].

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Registry holding every larder metric.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Backend errors hidden from callers by `exists` and `release`.
pub static SUPPRESSED_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "larder_suppressed_errors_total",
            "Backend errors swallowed by operations that never fail, by operation",
        ),
        &["operation"],
    )
    .expect("metric creation failed")
});

/// Successful lease acquisitions, by how the row was obtained.
pub static LOCKS_ACQUIRED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "larder_lock_acquired_total",
            "Leases acquired, by outcome (inserted or reclaimed)",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

/// Acquisitions refused because a live lease was held elsewhere.
pub static LOCKS_CONTENDED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "larder_lock_contended_total",
        "Lease acquisitions refused because the key was locked",
    )
    .expect("metric creation failed")
});

/// Abandoned lease rows removed by acquire housekeeping.
pub static LEASES_PURGED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "larder_leases_purged_total",
        "Expired lease rows removed during acquire housekeeping",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with [`REGISTRY`]. Safe to call more than once.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(SUPPRESSED_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(LOCKS_ACQUIRED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(LOCKS_CONTENDED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(LEASES_PURGED.clone()))
            .expect("metric registration failed");
    });
}

/// Render the registry in the Prometheus text exposition format.
pub fn gather_text() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
