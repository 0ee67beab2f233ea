use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub transitions_total: IntCounterVec,
    pub orders_awaiting_driver: IntGauge,
    pub assignments_total: IntCounterVec,
    pub assignment_latency_seconds: HistogramVec,
    pub notifications_total: IntCounterVec,
    pub activations_total: IntCounterVec,
    pub inconsistent_assignments_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let transitions_total = IntCounterVec::new(
            Opts::new("transitions_total", "Order phase transitions by target phase"),
            &["phase"],
        )
        .expect("valid transitions_total metric");

        let orders_awaiting_driver = IntGauge::new(
            "orders_awaiting_driver",
            "Orders currently queued for driver assignment",
        )
        .expect("valid orders_awaiting_driver metric");

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Driver assignment attempts by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let assignment_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of assignment processing in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Notification dispatches by outcome"),
            &["outcome"],
        )
        .expect("valid notifications_total metric");

        let activations_total = IntCounterVec::new(
            Opts::new(
                "activations_total",
                "Scheduled order activations by outcome",
            ),
            &["outcome"],
        )
        .expect("valid activations_total metric");

        let inconsistent_assignments_total = IntCounter::new(
            "inconsistent_assignments_total",
            "Order/driver linkage disagreements found by reconciliation",
        )
        .expect("valid inconsistent_assignments_total metric");

        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register transitions_total");
        registry
            .register(Box::new(orders_awaiting_driver.clone()))
            .expect("register orders_awaiting_driver");
        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");
        registry
            .register(Box::new(notifications_total.clone()))
            .expect("register notifications_total");
        registry
            .register(Box::new(activations_total.clone()))
            .expect("register activations_total");
        registry
            .register(Box::new(inconsistent_assignments_total.clone()))
            .expect("register inconsistent_assignments_total");

        Self {
            registry,
            transitions_total,
            orders_awaiting_driver,
            assignments_total,
            assignment_latency_seconds,
            notifications_total,
            activations_total,
            inconsistent_assignments_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
