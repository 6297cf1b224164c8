use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::ledger::OrderLedger;
use crate::engine::registry::DriverRegistry;
use crate::error::AppError;
use crate::geo::validate_coordinates;
use crate::models::location::LocationSample;
use crate::observability::metrics::Metrics;
use crate::tracking::store::{LocationStore, RecordOutcome};

/// Boundary for inbound position reports and outbound position queries.
pub struct TrackingGateway {
    store: Arc<LocationStore>,
    ledger: Arc<OrderLedger>,
    drivers: Arc<DriverRegistry>,
    positions_tx: broadcast::Sender<LocationSample>,
    clock_skew_tolerance: chrono::Duration,
    metrics: Metrics,
}

impl TrackingGateway {
    pub fn new(
        store: Arc<LocationStore>,
        ledger: Arc<OrderLedger>,
        drivers: Arc<DriverRegistry>,
        clock_skew_tolerance: Duration,
        event_buffer_size: usize,
        metrics: Metrics,
    ) -> Self {
        let (positions_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));

        Self {
            store,
            ledger,
            drivers,
            positions_tx,
            clock_skew_tolerance: chrono::Duration::from_std(clock_skew_tolerance)
                .unwrap_or_else(|_| chrono::Duration::zero()),
            metrics,
        }
    }

    pub fn report_position(
        &self,
        driver_id: Uuid,
        lat: f64,
        lng: f64,
        sampled_at: DateTime<Utc>,
    ) -> Result<RecordOutcome, AppError> {
        if let Err(err) = self.validate_report(driver_id, lat, lng, sampled_at) {
            self.metrics
                .position_reports_total
                .with_label_values(&["rejected"])
                .inc();
            return Err(err);
        }

        let sample = LocationSample {
            driver_id,
            lat,
            lng,
            sampled_at,
        };
        let outcome = self.store.record(sample.clone());

        match outcome {
            RecordOutcome::Applied => {
                self.metrics
                    .position_reports_total
                    .with_label_values(&["applied"])
                    .inc();
                let _ = self.positions_tx.send(sample);
            }
            RecordOutcome::Stale => {
                self.metrics
                    .position_reports_total
                    .with_label_values(&["stale"])
                    .inc();
            }
            RecordOutcome::Expired => {
                self.metrics
                    .position_reports_total
                    .with_label_values(&["expired"])
                    .inc();
            }
        }

        Ok(outcome)
    }

    pub fn current_position(&self, driver_id: Uuid) -> Result<LocationSample, AppError> {
        self.store
            .current(driver_id)
            .ok_or_else(|| AppError::NotFound(format!("no recent position for driver {driver_id}")))
    }

    /// Position of whoever is delivering `order_id` right now.
    pub async fn current_position_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<LocationSample, AppError> {
        let driver_id = self.active_driver(order_id).await?;
        self.current_position(driver_id)
    }

    /// Every accepted sample of the driver currently assigned to `order_id`.
    /// The assignment is re-resolved per sample, so a reassignment is followed.
    pub fn track_order(&self, order_id: Uuid) -> BoxStream<'static, LocationSample> {
        let ledger = Arc::clone(&self.ledger);

        BroadcastStream::new(self.positions_tx.subscribe())
            .filter_map(move |event| {
                let ledger = Arc::clone(&ledger);
                async move {
                    let sample = event.ok()?;
                    let order = ledger.get(order_id).await.ok()?;
                    let tracking = !order.status.is_terminal()
                        && order.driver_id == Some(sample.driver_id);
                    tracking.then_some(sample)
                }
            })
            .boxed()
    }

    async fn active_driver(&self, order_id: Uuid) -> Result<Uuid, AppError> {
        let order = self.ledger.get(order_id).await?;
        if order.deleted || order.status.is_terminal() {
            return Err(AppError::NotFound(format!(
                "order {order_id} is {} and no longer tracked",
                order.status
            )));
        }
        order
            .driver_id
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} has no driver assigned")))
    }

    fn validate_report(
        &self,
        driver_id: Uuid,
        lat: f64,
        lng: f64,
        sampled_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        validate_coordinates(lat, lng)?;

        let horizon = Utc::now() + self.clock_skew_tolerance;
        if sampled_at > horizon {
            return Err(AppError::Validation(format!(
                "sample timestamp {sampled_at} is in the future"
            )));
        }

        if !self.drivers.contains(driver_id) {
            return Err(AppError::NotFound(format!("driver {driver_id} not found")));
        }

        Ok(())
    }
}

pub async fn run_retention_sweeper(store: Arc<LocationStore>, every: Duration) {
    info!(interval_secs = every.as_secs(), "location retention sweeper started");

    let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
    loop {
        ticker.tick().await;
        let evicted = store.sweep(Utc::now());
        if evicted > 0 {
            debug!(evicted, remaining = store.len(), "evicted expired positions");
        }
    }
}
