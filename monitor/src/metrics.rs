use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref READINGS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("monitor_readings_total", "Sensor readings received per feed group"),
        &["group"]
    )
    .unwrap();
    pub static ref READINGS_APPLIED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_readings_applied_total",
        "Readings merged into a bin record"
    ))
    .unwrap();
    pub static ref READINGS_DROPPED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_readings_dropped_total",
        "Readings dropped as malformed or for an unknown bin"
    ))
    .unwrap();
    pub static ref COMMANDS_SENT_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_commands_sent_total",
        "Commands delivered to a bin"
    ))
    .unwrap();
    pub static ref COMMANDS_FAILED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_commands_failed_total",
        "Commands whose delivery failed"
    ))
    .unwrap();
    pub static ref ALERTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_alerts_total",
        "Alerts raised on rising fill tier"
    ))
    .unwrap();
    pub static ref BINS_TRACKED: Gauge = Gauge::with_opts(Opts::new(
        "monitor_bins_tracked",
        "Number of bins currently known"
    ))
    .unwrap();
}

pub fn init_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(READINGS_TOTAL.clone()),
        Box::new(READINGS_APPLIED_TOTAL.clone()),
        Box::new(READINGS_DROPPED_TOTAL.clone()),
        Box::new(COMMANDS_SENT_TOTAL.clone()),
        Box::new(COMMANDS_FAILED_TOTAL.clone()),
        Box::new(ALERTS_TOTAL.clone()),
        Box::new(BINS_TRACKED.clone()),
    ];
    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            error!("Failed to register metric: {}", e);
        }
    }
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
