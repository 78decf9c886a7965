use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub delivery_transitions_total: IntCounterVec,
    pub accept_attempts_total: IntCounterVec,
    pub engine_operation_seconds: HistogramVec,
    pub events_published_total: IntCounterVec,
    pub events_in_flight: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let delivery_transitions_total = IntCounterVec::new(
            Opts::new(
                "delivery_transitions_total",
                "Committed delivery status changes by target status",
            ),
            &["to"],
        )
        .expect("valid delivery_transitions_total metric");

        let accept_attempts_total = IntCounterVec::new(
            Opts::new("accept_attempts_total", "Driver accept attempts by outcome"),
            &["outcome"],
        )
        .expect("valid accept_attempts_total metric");

        let engine_operation_seconds = HistogramVec::new(
            HistogramOpts::new(
                "engine_operation_seconds",
                "Latency of lifecycle engine operations in seconds",
            ),
            &["operation", "outcome"],
        )
        .expect("valid engine_operation_seconds metric");

        let events_published_total = IntCounterVec::new(
            Opts::new("events_published_total", "Delivery events by publish outcome"),
            &["outcome"],
        )
        .expect("valid events_published_total metric");

        let events_in_flight =
            IntGauge::new("events_in_flight", "Event publishes currently running")
                .expect("valid events_in_flight metric");

        registry
            .register(Box::new(delivery_transitions_total.clone()))
            .expect("register delivery_transitions_total");
        registry
            .register(Box::new(accept_attempts_total.clone()))
            .expect("register accept_attempts_total");
        registry
            .register(Box::new(engine_operation_seconds.clone()))
            .expect("register engine_operation_seconds");
        registry
            .register(Box::new(events_published_total.clone()))
            .expect("register events_published_total");
        registry
            .register(Box::new(events_in_flight.clone()))
            .expect("register events_in_flight");

        Self {
            registry,
            delivery_transitions_total,
            accept_attempts_total,
            engine_operation_seconds,
            events_published_total,
            events_in_flight,
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
