use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub order_transitions_total: IntCounterVec,
    pub assignments_total: IntCounterVec,
    pub assignment_latency_seconds: HistogramVec,
    pub orders_in_queue: IntGauge,
    pub position_reports_total: IntCounterVec,
    pub tracked_drivers: IntGauge,
    pub drivers_busy: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let order_transitions_total = IntCounterVec::new(
            Opts::new("order_transitions_total", "Applied order status transitions"),
            &["to"],
        )
        .expect("valid order_transitions_total metric");

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Driver assignment attempts by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let assignment_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of automatic matching per order in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        let orders_in_queue = IntGauge::new("orders_in_queue", "Orders waiting for automatic matching")
            .expect("valid orders_in_queue metric");

        let position_reports_total = IntCounterVec::new(
            Opts::new("position_reports_total", "Driver position reports by outcome"),
            &["outcome"],
        )
        .expect("valid position_reports_total metric");

        let tracked_drivers = IntGauge::new("tracked_drivers", "Drivers with a retained position")
            .expect("valid tracked_drivers metric");

        let drivers_busy = IntGauge::new("drivers_busy", "Drivers currently bound to an order")
            .expect("valid drivers_busy metric");

        registry
            .register(Box::new(order_transitions_total.clone()))
            .expect("register order_transitions_total");
        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");
        registry
            .register(Box::new(orders_in_queue.clone()))
            .expect("register orders_in_queue");
        registry
            .register(Box::new(position_reports_total.clone()))
            .expect("register position_reports_total");
        registry
            .register(Box::new(tracked_drivers.clone()))
            .expect("register tracked_drivers");
        registry
            .register(Box::new(drivers_busy.clone()))
            .expect("register drivers_busy");

        Self {
            registry,
            order_transitions_total,
            assignments_total,
            assignment_latency_seconds,
            orders_in_queue,
            position_reports_total,
            tracked_drivers,
            drivers_busy,
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

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
