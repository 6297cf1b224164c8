use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::claim::Claim;
use crate::api::rest::ws;
use crate::engine::state_machine::owns;
use crate::error::AppError;
use crate::models::actor::Role;
use crate::models::location::LocationSample;
use crate::state::AppState;
use crate::tracking::store::RecordOutcome;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/drivers/:id/position",
            post(report_position).get(driver_position),
        )
        .route("/orders/:id/position", get(order_position))
        .route("/orders/:id/track", get(ws::track_order_handler))
}

#[derive(Deserialize)]
pub struct PositionReport {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct PositionAck {
    pub outcome: RecordOutcome,
}

async fn report_position(
    State(state): State<Arc<AppState>>,
    claim: Claim,
    Path(id): Path<Uuid>,
    Json(report): Json<PositionReport>,
) -> Result<(StatusCode, Json<PositionAck>), AppError> {
    claim.require_self_or_admin(Role::Driver, id)?;
    let outcome = state
        .tracking
        .report_position(id, report.lat, report.lng, report.timestamp)?;

    Ok((StatusCode::ACCEPTED, Json(PositionAck { outcome })))
}

async fn driver_position(
    State(state): State<Arc<AppState>>,
    claim: Claim,
    Path(id): Path<Uuid>,
) -> Result<Json<LocationSample>, AppError> {
    if claim.0.role != Role::Restaurant {
        claim.require_self_or_admin(Role::Driver, id)?;
    }
    Ok(Json(state.tracking.current_position(id)?))
}

pub(crate) async fn authorize_tracking(
    state: &AppState,
    claim: &Claim,
    order_id: Uuid,
) -> Result<(), AppError> {
    let order = state.ledger.get(order_id).await?;
    if owns(&order, &claim.0) {
        Ok(())
    } else {
        Err(AppError::Authorization(format!(
            "order {order_id} is not visible to this actor"
        )))
    }
}

async fn order_position(
    State(state): State<Arc<AppState>>,
    claim: Claim,
    Path(id): Path<Uuid>,
) -> Result<Json<LocationSample>, AppError> {
    authorize_tracking(&state, &claim, id).await?;
    Ok(Json(state.tracking.current_position_for_order(id).await?))
}
