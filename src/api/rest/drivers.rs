use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::claim::Claim;
use crate::engine::registry::NewDriver;
use crate::error::AppError;
use crate::models::actor::Role;
use crate::models::driver::{Availability, Driver};
use crate::models::order::Order;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver).get(list_drivers))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/availability", patch(update_availability))
        .route("/drivers/:id/deactivate", post(deactivate_driver))
        .route(
            "/restaurants/:id/orders/unassigned",
            get(list_unassigned_orders),
        )
        .route(
            "/restaurants/:id/drivers/available",
            get(list_available_drivers),
        )
}

#[derive(Deserialize)]
pub struct RegisterDriverRequest {
    pub name: String,
    pub phone: String,
    pub restaurant_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub availability: Availability,
}

/// Restaurants invite drivers into their own fleet; admins may register
/// unaffiliated drivers or attach them to any restaurant.
async fn register_driver(
    State(state): State<Arc<AppState>>,
    Claim(actor): Claim,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    let restaurant_id = match actor.role {
        Role::Admin => payload.restaurant_id,
        Role::Restaurant => actor.id,
        role => {
            return Err(AppError::Authorization(format!(
                "{role:?} may not register drivers"
            )));
        }
    };

    let driver = state.drivers.register(NewDriver {
        name: payload.name,
        phone: payload.phone,
        restaurant_id,
    })?;
    Ok(Json(driver))
}

async fn list_drivers(
    State(state): State<Arc<AppState>>,
    claim: Claim,
) -> Result<Json<Vec<Driver>>, AppError> {
    claim.require_role(&[Role::Admin, Role::Restaurant])?;
    Ok(Json(state.drivers.list().await))
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    claim: Claim,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    claim.require_role(&[Role::Admin, Role::Restaurant, Role::Driver])?;
    if claim.0.role == Role::Driver {
        claim.require_self_or_admin(Role::Driver, id)?;
    }
    Ok(Json(state.drivers.get(id).await?))
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    claim: Claim,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAvailabilityRequest>,
) -> Result<Json<Driver>, AppError> {
    claim.require_self_or_admin(Role::Driver, id)?;
    let driver = state
        .drivers
        .set_availability(id, payload.availability)
        .await?;
    Ok(Json(driver))
}

async fn deactivate_driver(
    State(state): State<Arc<AppState>>,
    claim: Claim,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    claim.require_role(&[Role::Admin])?;
    Ok(Json(state.drivers.deactivate(id).await?))
}

async fn list_unassigned_orders(
    State(state): State<Arc<AppState>>,
    claim: Claim,
    Path(restaurant_id): Path<Uuid>,
) -> Result<Json<Vec<Order>>, AppError> {
    claim.require_self_or_admin(Role::Restaurant, restaurant_id)?;
    Ok(Json(
        state.dispatch.list_unassigned_orders(restaurant_id).await,
    ))
}

async fn list_available_drivers(
    State(state): State<Arc<AppState>>,
    claim: Claim,
    Path(restaurant_id): Path<Uuid>,
) -> Result<Json<Vec<Driver>>, AppError> {
    claim.require_self_or_admin(Role::Restaurant, restaurant_id)?;
    Ok(Json(
        state.dispatch.list_available_drivers(restaurant_id).await,
    ))
}
