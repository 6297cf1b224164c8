use std::cmp::Ordering;
use std::collections::HashMap;

use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::geo::haversine_km;
use crate::models::driver::Driver;
use crate::models::location::GeoPoint;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub driver_id: Uuid,
    /// Distance from the last known position to the order's delivery point.
    pub distance_km: Option<f64>,
    fairness_bucket: i64,
    distance_bucket: i64,
}

/// Orders drivers for automatic matching: longest waiting first (drivers
/// inside the same fairness window count as equal), then nearest when the
/// difference exceeds the comparable distance, then driver id.
pub fn rank_candidates(
    drivers: &[Driver],
    target: &GeoPoint,
    positions: &HashMap<Uuid, GeoPoint>,
    config: &DispatchConfig,
) -> Vec<Candidate> {
    let window_ms = (config.fairness_window.as_millis() as i64).max(1);
    let comparable_km = config.comparable_distance_km.max(f64::EPSILON);

    let mut candidates: Vec<Candidate> = drivers
        .iter()
        .map(|driver| {
            let distance_km = positions
                .get(&driver.id)
                .map(|position| haversine_km(position, target));

            Candidate {
                driver_id: driver.id,
                distance_km,
                fairness_bucket: driver
                    .available_since
                    .map(|since| since.timestamp_millis().div_euclid(window_ms))
                    .unwrap_or(i64::MAX),
                distance_bucket: distance_km
                    .map(|km| (km / comparable_km).floor() as i64)
                    .unwrap_or(i64::MAX),
            }
        })
        .collect();

    candidates.sort_by(compare);
    candidates
}

fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    a.fairness_bucket
        .cmp(&b.fairness_bucket)
        .then(a.distance_bucket.cmp(&b.distance_bucket))
        .then(a.driver_id.cmp(&b.driver_id))
}
