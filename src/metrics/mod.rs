use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;


lazy_static! {
    pub static ref SESSION_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("session_events", "Session notifications received, by keeper state"),
        &["state"]
    )
    .expect("metric can not be created");

    pub static ref BARRIER_RELEASES: IntCounter = IntCounter::new(
        "barrier_releases",
        "Connection barrier armed -> released transitions"
    )
    .expect("metric can not be created");

    pub static ref OPERATION_RESULTS: IntCounterVec = IntCounterVec::new(
        Opts::new("operation_results", "Node operation outcomes, by operation and result code"),
        &["op", "code"]
    )
    .expect("metric can not be created");

    pub static ref QUERY_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("query_failures", "Queries that could not be answered, by operation"),
        &["op"]
    )
    .expect("metric can not be created");

    pub static ref OPERATION_LATENCY_METRIC: HistogramVec = HistogramVec::new(
        HistogramOpts::new("operation_latency_ms", "Histogram of node operation latency in ms")
            .buckets(exponential_buckets(0.5, 2.0, 14).expect("valid buckets")),
        &["op"]
    )
    .expect("metric can not be created");
}

/// Registers every connector metric with `registry`.
///
/// Registering twice in the same registry fails; callers own that registry.
pub fn register_custom_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(SESSION_EVENTS.clone()))?;
    registry.register(Box::new(BARRIER_RELEASES.clone()))?;
    registry.register(Box::new(OPERATION_RESULTS.clone()))?;
    registry.register(Box::new(QUERY_FAILURES.clone()))?;
    registry.register(Box::new(OPERATION_LATENCY_METRIC.clone()))?;
    Ok(())
}

/// Renders all families of `registry` in the text exposition format
pub fn gather_text(registry: &Registry) -> String {
    use prometheus::Encoder;

    let mut buffer = Vec::new();
    let encoder = prometheus::TextEncoder::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
