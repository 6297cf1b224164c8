use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::models::location::{GeoPoint, LocationSample};
use crate::observability::metrics::Metrics;

/// Receives every sample the store accepts, after the in-memory commit.
/// Implementations must not block; queue the write if it involves I/O.
pub trait LocationSink: Send + Sync {
    fn persist(&self, sample: &LocationSample);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Applied,
    /// Not newer than the retained sample; dropped.
    Stale,
    /// Already older than the retention window; dropped.
    Expired,
}

/// Latest known position per driver, last writer wins by sample time.
pub struct LocationStore {
    samples: DashMap<Uuid, LocationSample>,
    retention: Duration,
    sink: Option<Arc<dyn LocationSink>>,
    metrics: Metrics,
}

impl LocationStore {
    pub fn new(retention: Duration, metrics: Metrics) -> Self {
        Self {
            samples: DashMap::new(),
            retention,
            sink: None,
            metrics,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn LocationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn record(&self, sample: LocationSample) -> RecordOutcome {
        self.record_at(sample, Utc::now())
    }

    /// Replaces the driver's sample only if `sample` is strictly newer and
    /// still inside the retention window as of `now`. Without the window
    /// check a report older than an evicted sample would be taken as current.
    pub fn record_at(&self, sample: LocationSample, now: DateTime<Utc>) -> RecordOutcome {
        if self.is_expired(&sample, now) {
            debug!(
                driver_id = %sample.driver_id,
                sampled_at = %sample.sampled_at,
                "dropping expired position"
            );
            return RecordOutcome::Expired;
        }

        let outcome = match self.samples.entry(sample.driver_id) {
            Entry::Occupied(mut current) => {
                if sample.sampled_at > current.get().sampled_at {
                    current.insert(sample.clone());
                    RecordOutcome::Applied
                } else {
                    debug!(
                        driver_id = %sample.driver_id,
                        sampled_at = %sample.sampled_at,
                        retained_at = %current.get().sampled_at,
                        "dropping stale position"
                    );
                    RecordOutcome::Stale
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(sample.clone());
                RecordOutcome::Applied
            }
        };

        if outcome == RecordOutcome::Applied {
            self.metrics.tracked_drivers.set(self.samples.len() as i64);
            if let Some(sink) = &self.sink {
                sink.persist(&sample);
            }
        }

        outcome
    }

    pub fn current(&self, driver_id: Uuid) -> Option<LocationSample> {
        self.current_at(driver_id, Utc::now())
    }

    /// Freshest retained sample as of `now`; an expired one is evicted on the way.
    pub fn current_at(&self, driver_id: Uuid, now: DateTime<Utc>) -> Option<LocationSample> {
        let sample = self.samples.get(&driver_id).map(|entry| entry.value().clone())?;
        if self.is_expired(&sample, now) {
            self.samples
                .remove_if(&driver_id, |_, retained| retained.sampled_at == sample.sampled_at);
            self.metrics.tracked_drivers.set(self.samples.len() as i64);
            return None;
        }
        Some(sample)
    }

    pub fn positions(&self, driver_ids: impl IntoIterator<Item = Uuid>) -> HashMap<Uuid, GeoPoint> {
        let now = Utc::now();
        driver_ids
            .into_iter()
            .filter_map(|id| self.current_at(id, now).map(|sample| (id, sample.point())))
            .collect()
    }

    /// Evicts every sample older than the retention window; returns how many went.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.samples.len();
        self.samples.retain(|_, sample| !self.is_expired(sample, now));
        let after = self.samples.len();
        self.metrics.tracked_drivers.set(after as i64);
        before.saturating_sub(after)
    }

    fn is_expired(&self, sample: &LocationSample, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(sample.sampled_at)
            .to_std()
            .is_ok_and(|age| age > self.retention)
    }
}
