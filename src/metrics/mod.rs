use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::Encoder;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::error;


lazy_static! {
    pub static ref SESSION_CONNECT_ATTEMPTS: IntCounterVec = IntCounterVec::new(
        Opts::new("session_connect_attempts", "Session connection attempts by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref CACHE_EVENTS_DISPATCHED: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_events_dispatched", "Cache events delivered to listeners by kind"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref WATCH_REARM_FAILURES: IntCounter = IntCounter::new(
        "watch_rearm_failures",
        "Fired watches that could not be re-registered"
    )
    .expect("metric can not be created");

    pub static ref NODE_OPERATION_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("node_operation_latency_ms", "NodeStore operation latency in ms")
            .buckets(exponential_buckets(1.0, 2.0, 12).expect("valid buckets")),
        &["op"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new_custom(Some("treewatch".to_string()), None)
            .expect("registry can be created");
        register_custom_metrics(&registry);
        registry
    };
}

fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(SESSION_CONNECT_ATTEMPTS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(CACHE_EVENTS_DISPATCHED.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(WATCH_REARM_FAILURES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(NODE_OPERATION_LATENCY.clone()))
        .expect("collector can be registered");
}

/// Renders the crate registry in the Prometheus text exposition format
pub fn gather_metrics() -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("custom metrics could not be from_utf8'd: {}", e);
        String::default()
    })
}
