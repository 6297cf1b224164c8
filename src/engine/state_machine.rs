use crate::error::AppError;
use crate::models::actor::{Actor, Role};
use crate::models::order::{Order, OrderStatus};

use OrderStatus::*;
use Role::*;

/// Every allowed edge of the order lifecycle and the roles that may take it.
/// Anything absent from this table, same-state moves included, is rejected.
pub const TRANSITIONS: &[(OrderStatus, OrderStatus, &[Role])] = &[
    (Pending, Accepted, &[Restaurant, Admin]),
    (Accepted, Preparing, &[Restaurant, Admin]),
    (Preparing, Ready, &[Restaurant, Admin]),
    (Ready, Picked, &[Driver]),
    (Picked, EnRoute, &[Driver]),
    (EnRoute, Delivered, &[Driver]),
    (Pending, Canceled, &[Customer, Restaurant, Admin]),
    (Accepted, Canceled, &[Restaurant, Admin]),
    (Preparing, Canceled, &[Restaurant, Admin]),
    (Ready, Canceled, &[Restaurant, Admin]),
];

pub fn allowed_roles(from: OrderStatus, to: OrderStatus) -> Option<&'static [Role]> {
    TRANSITIONS
        .iter()
        .find(|(edge_from, edge_to, _)| *edge_from == from && *edge_to == to)
        .map(|(_, _, roles)| *roles)
}

/// Validates `order.status -> target` for `actor` without mutating anything.
pub fn check_transition(order: &Order, target: OrderStatus, actor: &Actor) -> Result<(), AppError> {
    let current = order.status;

    let Some(roles) = allowed_roles(current, target) else {
        return Err(AppError::InvalidTransition(rejection_message(order, target)));
    };

    if target == Picked && order.driver_id.is_none() {
        return Err(AppError::InvalidTransition(format!(
            "order {} has no driver assigned, cannot mark it picked",
            order.id
        )));
    }

    if !roles.contains(&actor.role) {
        return Err(AppError::Authorization(format!(
            "{:?} may not move order {} from {current} to {target}",
            actor.role, order.id
        )));
    }

    if !owns(order, actor) {
        return Err(AppError::Authorization(format!(
            "{:?} {} is not a party to order {}",
            actor.role,
            actor.id.map(|id| id.to_string()).unwrap_or_else(|| "<none>".to_string()),
            order.id
        )));
    }

    Ok(())
}

/// Whether the claim's identity is bound to this order.
pub fn owns(order: &Order, actor: &Actor) -> bool {
    match actor.role {
        Admin => true,
        Customer => actor.id == Some(order.customer_id),
        Restaurant => actor.id == Some(order.restaurant_id),
        Driver => actor.id.is_some() && actor.id == order.driver_id,
    }
}

fn rejection_message(order: &Order, target: OrderStatus) -> String {
    let current = order.status;
    if current == target {
        return format!("order {} is already {current}", order.id);
    }
    if current.is_terminal() {
        let verb = match target {
            Canceled => "cancel".to_string(),
            other => format!("move it to {other}"),
        };
        return format!("order already {current}, cannot {verb}");
    }
    format!("order {} cannot move from {current} to {target}", order.id)
}
