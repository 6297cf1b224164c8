use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::dispatch::DispatchCoordinator;
use crate::engine::ledger::OrderLedger;
use crate::engine::registry::DriverRegistry;
use crate::observability::metrics::Metrics;
use crate::tracking::gateway::TrackingGateway;
use crate::tracking::store::{LocationSink, LocationStore};

pub struct AppState {
    pub ledger: Arc<OrderLedger>,
    pub drivers: Arc<DriverRegistry>,
    pub locations: Arc<LocationStore>,
    pub dispatch: DispatchCoordinator,
    pub tracking: TrackingGateway,
    pub order_tx: mpsc::Sender<Uuid>,
    pub auto_dispatch: bool,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: &Config) -> (Self, mpsc::Receiver<Uuid>) {
        Self::build(config, None)
    }

    pub fn with_location_sink(
        config: &Config,
        sink: Arc<dyn LocationSink>,
    ) -> (Self, mpsc::Receiver<Uuid>) {
        Self::build(config, Some(sink))
    }

    fn build(
        config: &Config,
        sink: Option<Arc<dyn LocationSink>>,
    ) -> (Self, mpsc::Receiver<Uuid>) {
        let metrics = Metrics::new();
        let (order_tx, order_rx) = mpsc::channel(config.order_queue_size.max(1));

        let ledger = Arc::new(OrderLedger::new(metrics.clone()));
        let drivers = Arc::new(DriverRegistry::new());

        let mut store = LocationStore::new(config.tracking.retention, metrics.clone());
        if let Some(sink) = sink {
            store = store.with_sink(sink);
        }
        let locations = Arc::new(store);

        let dispatch = DispatchCoordinator::new(
            ledger.clone(),
            drivers.clone(),
            locations.clone(),
            config.dispatch.clone(),
            config.event_buffer_size,
            metrics.clone(),
        );
        let tracking = TrackingGateway::new(
            locations.clone(),
            ledger.clone(),
            drivers.clone(),
            config.tracking.clock_skew_tolerance,
            config.event_buffer_size,
            metrics.clone(),
        );

        (
            Self {
                ledger,
                drivers,
                locations,
                dispatch,
                tracking,
                order_tx,
                auto_dispatch: config.dispatch.auto_dispatch,
                metrics,
            },
            order_rx,
        )
    }
}
