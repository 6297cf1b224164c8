use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::claim::Claim;
use crate::engine::queue::enqueue_order;
use crate::engine::state_machine::owns;
use crate::error::AppError;
use crate::models::actor::Role;
use crate::models::location::GeoPoint;
use crate::models::order::{NewOrder, Order, OrderFilter, OrderItem, OrderStatus, PaymentMethod};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order).delete(delete_order))
        .route("/orders/:id/transition", post(transition_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/assign", post(assign_driver))
        .route("/orders/:id/release", post(release_driver))
        .route("/orders/:id/rating", post(rate_order))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub restaurant_id: Uuid,
    /// Only honoured for admin claims; customers always order for themselves.
    pub customer_id: Option<Uuid>,
    pub items: Vec<OrderItem>,
    pub delivery: GeoPoint,
    pub payment_method: PaymentMethod,
}

#[derive(Deserialize)]
pub struct TransitionRequest {
    pub status: OrderStatus,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct RatingRequest {
    pub score: u8,
    pub feedback: Option<String>,
}

#[derive(Serialize)]
pub struct ReleaseResponse {
    pub order_id: Uuid,
    pub released: bool,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Claim(actor): Claim,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    let customer_id = match actor.role {
        Role::Customer => actor.id,
        Role::Admin => payload.customer_id,
        role => {
            return Err(AppError::Authorization(format!(
                "{role:?} may not place orders"
            )));
        }
    }
    .ok_or_else(|| AppError::Validation("customer_id is required".to_string()))?;

    let order = state.dispatch.place_order(
        NewOrder {
            customer_id,
            restaurant_id: payload.restaurant_id,
            items: payload.items,
            delivery: payload.delivery,
            payment_method: payload.payment_method,
        },
        actor,
    )?;

    if state.auto_dispatch {
        enqueue_order(&state, order.id).await?;
    }

    Ok(Json(order))
}

/// Non-admins only ever see their own orders.
async fn list_orders(
    State(state): State<Arc<AppState>>,
    Claim(actor): Claim,
    Query(mut filter): Query<OrderFilter>,
) -> Json<Vec<Order>> {
    match actor.role {
        Role::Admin => {}
        Role::Customer => filter.customer_id = actor.id,
        Role::Restaurant => filter.restaurant_id = actor.id,
        Role::Driver => filter.driver_id = actor.id,
    }

    Json(state.ledger.list(filter).await)
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Claim(actor): Claim,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state.ledger.get(id).await?;
    if !owns(&order, &actor) {
        return Err(AppError::Authorization(format!(
            "order {id} is not visible to this actor"
        )));
    }

    Ok(Json(order))
}

async fn transition_order(
    State(state): State<Arc<AppState>>,
    Claim(actor): Claim,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransitionRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state.dispatch.transition(id, payload.status, actor).await?;
    Ok(Json(order))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Claim(actor): Claim,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state.dispatch.cancel(id, actor).await?;
    Ok(Json(order))
}

async fn assign_driver(
    State(state): State<Arc<AppState>>,
    Claim(actor): Claim,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<Order>, AppError> {
    state.dispatch.authorize_dispatch(id, &actor).await?;
    let order = state.dispatch.assign(id, payload.driver_id).await?;
    Ok(Json(order))
}

async fn release_driver(
    State(state): State<Arc<AppState>>,
    Claim(actor): Claim,
    Path(id): Path<Uuid>,
) -> Result<Json<ReleaseResponse>, AppError> {
    state.dispatch.authorize_dispatch(id, &actor).await?;
    let released = state.dispatch.release(id).await?;

    if released && state.auto_dispatch {
        let order = state.ledger.get(id).await?;
        if order.is_unassigned() {
            enqueue_order(&state, id).await?;
        }
    }

    Ok(Json(ReleaseResponse {
        order_id: id,
        released,
    }))
}

async fn rate_order(
    State(state): State<Arc<AppState>>,
    Claim(actor): Claim,
    Path(id): Path<Uuid>,
    Json(payload): Json<RatingRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .ledger
        .rate(id, actor, payload.score, payload.feedback)
        .await?;
    Ok(Json(order))
}

async fn delete_order(
    State(state): State<Arc<AppState>>,
    Claim(actor): Claim,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state.ledger.soft_delete(id, actor).await?;
    Ok(Json(order))
}
