use crate::error::AppError;
use crate::models::location::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();
    let haversine =
        sin_lat * sin_lat + a.lat.to_radians().cos() * b.lat.to_radians().cos() * sin_lng * sin_lng;

    EARTH_RADIUS_KM * 2.0 * haversine.sqrt().min(1.0).asin()
}

/// Rejects non-finite values and anything outside ±90 latitude / ±180 longitude.
pub fn validate_coordinates(lat: f64, lng: f64) -> Result<(), AppError> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(AppError::Validation(format!(
            "latitude {lat} is outside [-90, 90]"
        )));
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(AppError::Validation(format!(
            "longitude {lng} is outside [-180, 180]"
        )));
    }
    Ok(())
}
