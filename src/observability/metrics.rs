use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub location_updates_total: IntCounterVec,
    pub location_history_appends_total: IntCounter,
    pub delivery_transitions_total: IntCounterVec,
    pub arrivals_total: IntCounterVec,
    pub tracking_events_total: IntCounterVec,
    pub customer_notifications_total: IntCounterVec,
    pub location_update_latency_seconds: Histogram,
    pub active_deliveries: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let location_updates_total = IntCounterVec::new(
            Opts::new("location_updates_total", "Driver location updates by outcome"),
            &["outcome"],
        )
        .expect("valid location_updates_total metric");

        let location_history_appends_total = IntCounter::new(
            "location_history_appends_total",
            "Location samples persisted to delivery history",
        )
        .expect("valid location_history_appends_total metric");

        let delivery_transitions_total = IntCounterVec::new(
            Opts::new(
                "delivery_transitions_total",
                "Delivery lifecycle transitions by transition and outcome",
            ),
            &["transition", "outcome"],
        )
        .expect("valid delivery_transitions_total metric");

        let arrivals_total = IntCounterVec::new(
            Opts::new("arrivals_total", "Geofence arrivals detected by kind"),
            &["kind"],
        )
        .expect("valid arrivals_total metric");

        let tracking_events_total = IntCounterVec::new(
            Opts::new("tracking_events_total", "Tracking events handed to the broadcaster"),
            &["outcome"],
        )
        .expect("valid tracking_events_total metric");

        let customer_notifications_total = IntCounterVec::new(
            Opts::new(
                "customer_notifications_total",
                "Customer notifications by outcome",
            ),
            &["outcome"],
        )
        .expect("valid customer_notifications_total metric");

        let location_update_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "location_update_latency_seconds",
            "Latency of processing one driver location update in seconds",
        ))
        .expect("valid location_update_latency_seconds metric");

        let active_deliveries = IntGauge::new(
            "active_deliveries",
            "Deliveries created and not yet delivered or cancelled",
        )
        .expect("valid active_deliveries metric");

        registry
            .register(Box::new(location_updates_total.clone()))
            .expect("register location_updates_total");
        registry
            .register(Box::new(location_history_appends_total.clone()))
            .expect("register location_history_appends_total");
        registry
            .register(Box::new(delivery_transitions_total.clone()))
            .expect("register delivery_transitions_total");
        registry
            .register(Box::new(arrivals_total.clone()))
            .expect("register arrivals_total");
        registry
            .register(Box::new(tracking_events_total.clone()))
            .expect("register tracking_events_total");
        registry
            .register(Box::new(customer_notifications_total.clone()))
            .expect("register customer_notifications_total");
        registry
            .register(Box::new(location_update_latency_seconds.clone()))
            .expect("register location_update_latency_seconds");
        registry
            .register(Box::new(active_deliveries.clone()))
            .expect("register active_deliveries");

        Self {
            registry,
            location_updates_total,
            location_history_appends_total,
            delivery_transitions_total,
            arrivals_total,
            tracking_events_total,
            customer_notifications_total,
            location_update_latency_seconds,
            active_deliveries,
        }
    }

    pub fn record_transition(&self, transition: &str, outcome: &str) {
        self.delivery_transitions_total
            .with_label_values(&[transition, outcome])
            .inc();
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
