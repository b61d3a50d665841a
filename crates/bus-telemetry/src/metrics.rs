//! Prometheus metrics for the unicast bus.
//!
//! All metrics follow the naming convention: `bus_<area>_<metric>_<unit>`
//!
//! Metrics register themselves with [`REGISTRY`] on first use, so components can
//! record values whether or not [`init_telemetry`](crate::init_telemetry) ran.

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, Encoder, Histogram, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Registry holding every bus metric
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // SEND PATH
    // =========================================================================

    /// Transport messages handed to the transport, by intent
    pub static ref MESSAGES_SENT: IntCounterVec = register_int_counter_vec_with_registry!(
        Opts::new("bus_messages_sent_total", "Transport messages sent"),
        &["intent"],  // intent: Send/Publish/Subscribe/Unsubscribe
        REGISTRY
    ).expect("metric creation failed");

    /// Copies produced by publish fan-out
    pub static ref PUBLISH_COPIES: IntCounter = register_int_counter_with_registry!(
        Opts::new("bus_publish_copies_total", "Per-subscriber copies sent by publish"),
        REGISTRY
    ).expect("metric creation failed");

    // =========================================================================
    // RECEIVE PATH
    // =========================================================================

    /// Transport messages dispatched successfully
    pub static ref MESSAGES_DISPATCHED: IntCounter = register_int_counter_with_registry!(
        Opts::new("bus_messages_dispatched_total", "Transport messages dispatched successfully"),
        REGISTRY
    ).expect("metric creation failed");

    /// Dispatch failures by escalation decision
    pub static ref DISPATCH_FAILURES: IntCounterVec = register_int_counter_vec_with_registry!(
        Opts::new("bus_dispatch_failures_total", "Failed dispatch attempts"),
        &["decision"],  // decision: retry/escalate
        REGISTRY
    ).expect("metric creation failed");

    /// Messages discarded because their time-to-be-received elapsed
    pub static ref MESSAGES_EXPIRED: IntCounter = register_int_counter_with_registry!(
        Opts::new("bus_messages_expired_total", "Messages discarded after their time-to-be-received"),
        REGISTRY
    ).expect("metric creation failed");

    /// Dispatch duration histogram
    pub static ref DISPATCH_DURATION: Histogram = register_histogram_with_registry!(
        prometheus::HistogramOpts::new(
            "bus_dispatch_duration_seconds",
            "Time spent dispatching one transport message"
        ).buckets(exponential_buckets(0.0001, 2.0, 16).expect("valid bucket layout")),
        REGISTRY
    ).expect("metric creation failed");

    // =========================================================================
    // FAULTS & SUBSCRIPTIONS
    // =========================================================================

    /// Messages routed to the error queue, by error kind
    pub static ref MESSAGES_ESCALATED: IntCounterVec = register_int_counter_vec_with_registry!(
        Opts::new("bus_messages_escalated_total", "Messages routed to the error queue"),
        &["error_kind"],
        REGISTRY
    ).expect("metric creation failed");

    /// Subscription store changes
    pub static ref SUBSCRIPTION_CHANGES: IntCounterVec = register_int_counter_vec_with_registry!(
        Opts::new("bus_subscription_changes_total", "Subscriptions added or removed"),
        &["change"],  // change: subscribe/unsubscribe
        REGISTRY
    ).expect("metric creation failed");
}

/// Force creation of every metric so they appear in the exposition output
/// before their first use.
pub fn register_metrics() {
    lazy_static::initialize(&MESSAGES_SENT);
    lazy_static::initialize(&PUBLISH_COPIES);
    lazy_static::initialize(&MESSAGES_DISPATCHED);
    lazy_static::initialize(&DISPATCH_FAILURES);
    lazy_static::initialize(&MESSAGES_EXPIRED);
    lazy_static::initialize(&DISPATCH_DURATION);
    lazy_static::initialize(&MESSAGES_ESCALATED);
    lazy_static::initialize(&SUBSCRIPTION_CHANGES);
}

/// Encode all metrics as Prometheus text format.
pub fn gather_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
}
