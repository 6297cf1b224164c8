use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::engine::ledger::OrderLedger;
use crate::engine::matching::rank_candidates;
use crate::engine::registry::DriverRegistry;
use crate::error::AppError;
use crate::models::actor::{Actor, Role};
use crate::models::driver::{Availability, Driver};
use crate::models::order::{NewOrder, Order, OrderStatus};
use crate::observability::metrics::Metrics;
use crate::tracking::store::LocationStore;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    OrderPlaced {
        order_id: Uuid,
        restaurant_id: Uuid,
        at: DateTime<Utc>,
    },
    OrderTransitioned {
        order_id: Uuid,
        status: OrderStatus,
        at: DateTime<Utc>,
    },
    DriverAssigned {
        order_id: Uuid,
        driver_id: Uuid,
        at: DateTime<Utc>,
    },
    DriverReleased {
        order_id: Uuid,
        driver_id: Uuid,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Assigned(Order),
    /// Nobody could take the order right now.
    NoDriver,
    /// The order was assigned, finished or removed in the meantime.
    NotNeeded,
}

/// Binds drivers to orders.
///
/// Lock discipline: an order lock is always taken before a driver lock and
/// no path takes them the other way round, so concurrent `assign`/`release`
/// calls over overlapping order/driver pairs cannot deadlock. Neither lock is
/// held across anything but in-memory work.
pub struct DispatchCoordinator {
    ledger: Arc<OrderLedger>,
    drivers: Arc<DriverRegistry>,
    locations: Arc<LocationStore>,
    events_tx: broadcast::Sender<DispatchEvent>,
    config: DispatchConfig,
    metrics: Metrics,
}

impl DispatchCoordinator {
    pub fn new(
        ledger: Arc<OrderLedger>,
        drivers: Arc<DriverRegistry>,
        locations: Arc<LocationStore>,
        config: DispatchConfig,
        event_buffer_size: usize,
        metrics: Metrics,
    ) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));

        Self {
            ledger,
            drivers,
            locations,
            events_tx,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events_tx.subscribe()
    }

    pub fn place_order(&self, new_order: NewOrder, actor: Actor) -> Result<Order, AppError> {
        let order = self.ledger.create(new_order, actor)?;
        let _ = self.events_tx.send(DispatchEvent::OrderPlaced {
            order_id: order.id,
            restaurant_id: order.restaurant_id,
            at: order.created_at,
        });
        Ok(order)
    }

    pub async fn list_unassigned_orders(&self, restaurant_id: Uuid) -> Vec<Order> {
        self.ledger.list_unassigned(restaurant_id).await
    }

    pub async fn list_available_drivers(&self, restaurant_id: Uuid) -> Vec<Driver> {
        self.drivers.list_available(restaurant_id).await
    }

    /// Admins may dispatch any order, a restaurant only its own.
    pub async fn authorize_dispatch(&self, order_id: Uuid, actor: &Actor) -> Result<(), AppError> {
        match actor.role {
            Role::Admin => Ok(()),
            Role::Restaurant => {
                let order = self.ledger.get(order_id).await?;
                if actor.id == Some(order.restaurant_id) {
                    Ok(())
                } else {
                    Err(AppError::Authorization(format!(
                        "order {order_id} belongs to another restaurant"
                    )))
                }
            }
            role => Err(AppError::Authorization(format!(
                "{role:?} may not dispatch orders"
            ))),
        }
    }

    /// Binds `driver_id` to `order_id`. All preconditions are checked with
    /// both locks held and nothing is written unless all of them pass.
    pub async fn assign(&self, order_id: Uuid, driver_id: Uuid) -> Result<Order, AppError> {
        let result = self.try_assign(order_id, driver_id).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        self.metrics
            .assignments_total
            .with_label_values(&[outcome])
            .inc();

        result
    }

    async fn try_assign(&self, order_id: Uuid, driver_id: Uuid) -> Result<Order, AppError> {
        let mut order = self.ledger.lock(order_id).await?;
        if order.deleted {
            return Err(AppError::NotFound(format!("order {order_id} not found")));
        }
        let mut driver = self.drivers.lock(driver_id).await?;

        if let Some(current) = order.driver_id {
            return Err(AppError::Conflict(format!(
                "order {order_id} is already assigned to driver {current}"
            )));
        }
        if !order.status.is_assignable() {
            return Err(AppError::Conflict(format!(
                "order {order_id} is {}, only pending or accepted orders can be assigned",
                order.status
            )));
        }
        if let Some(current) = driver.current_order {
            return Err(AppError::Conflict(format!(
                "driver {driver_id} is busy with order {current}"
            )));
        }
        match driver.availability {
            Availability::Available if driver.active => {}
            Availability::Busy => {
                return Err(AppError::Conflict(format!("driver {driver_id} is busy")));
            }
            _ => {
                return Err(AppError::NotAvailable(format!(
                    "driver {driver_id} is not available"
                )));
            }
        }
        if !driver.serves(order.restaurant_id) {
            return Err(AppError::NotAvailable(format!(
                "driver {driver_id} is affiliated with another restaurant"
            )));
        }

        let now = Utc::now();
        order.driver_id = Some(driver_id);
        order.touch(now);
        driver.availability = Availability::Busy;
        driver.current_order = Some(order_id);
        driver.available_since = None;
        driver.updated_at = now;

        let assigned = order.clone();
        drop(driver);
        drop(order);

        self.metrics.drivers_busy.inc();
        let _ = self.events_tx.send(DispatchEvent::DriverAssigned {
            order_id,
            driver_id,
            at: now,
        });
        info!(order_id = %order_id, driver_id = %driver_id, "driver assigned");

        Ok(assigned)
    }

    /// Frees the driver bound to `order_id`. Returns `false` without
    /// touching anything when the driver is no longer linked to the order,
    /// so repeated releases are harmless.
    ///
    /// A finished order keeps its driver on record. A live assignment can
    /// only be revoked while the order is still `pending` or `accepted`,
    /// where it can be dispatched again; once the kitchen has started the
    /// order stays with its driver until it is delivered or canceled.
    pub async fn release(&self, order_id: Uuid) -> Result<bool, AppError> {
        let mut order = self.ledger.lock(order_id).await?;
        let released = self.release_locked(&mut order).await?;
        drop(order);

        Ok(match released {
            Some((driver_id, at)) => {
                self.announce_release(order_id, driver_id, at);
                true
            }
            None => false,
        })
    }

    /// Release with the order lock already held by the caller. Takes the
    /// driver lock second, keeping the crate-wide lock order.
    async fn release_locked(
        &self,
        order: &mut Order,
    ) -> Result<Option<(Uuid, DateTime<Utc>)>, AppError> {
        let order_id = order.id;
        let Some(driver_id) = order.driver_id else {
            return Ok(None);
        };
        let terminal = order.status.is_terminal();
        if !terminal && !order.status.is_assignable() {
            return Err(AppError::InvalidTransition(format!(
                "order {order_id} is {}, its driver can no longer be released",
                order.status
            )));
        }
        let mut driver = self.drivers.lock(driver_id).await?;

        if driver.current_order != Some(order_id) {
            debug!(order_id = %order_id, driver_id = %driver_id, "release ignored, driver no longer linked");
            return Ok(None);
        }

        let now = Utc::now();
        driver.current_order = None;
        driver.availability = Availability::Available;
        driver.available_since = Some(now);
        driver.updated_at = now;

        if !terminal {
            order.driver_id = None;
            order.touch(now);
        }

        Ok(Some((driver_id, now)))
    }

    fn announce_release(&self, order_id: Uuid, driver_id: Uuid, at: DateTime<Utc>) {
        self.metrics.drivers_busy.dec();
        let _ = self.events_tx.send(DispatchEvent::DriverReleased {
            order_id,
            driver_id,
            at,
        });
        info!(order_id = %order_id, driver_id = %driver_id, "driver released");
    }

    /// Status transition that also frees the driver once the order is
    /// finished. The driver is freed before the order lock is dropped, so
    /// nobody observes a finished order whose driver is still busy.
    pub async fn transition(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        actor: Actor,
    ) -> Result<Order, AppError> {
        let mut order = self.ledger.lock(order_id).await?;
        self.ledger.apply_transition(&mut order, target, actor)?;
        let released = if order.status.is_terminal() {
            self.release_locked(&mut order).await?
        } else {
            None
        };
        let snapshot = order.clone();
        drop(order);

        let _ = self.events_tx.send(DispatchEvent::OrderTransitioned {
            order_id,
            status: snapshot.status,
            at: snapshot.updated_at,
        });
        if let Some((driver_id, at)) = released {
            self.announce_release(order_id, driver_id, at);
        }

        Ok(snapshot)
    }

    pub async fn cancel(&self, order_id: Uuid, actor: Actor) -> Result<Order, AppError> {
        self.transition(order_id, OrderStatus::Canceled, actor).await
    }

    /// Tries ranked candidates in turn until one assignment commits.
    pub async fn match_order(&self, order_id: Uuid) -> Result<MatchOutcome, AppError> {
        let order = self.ledger.get(order_id).await?;
        if !order.is_unassigned() {
            return Ok(MatchOutcome::NotNeeded);
        }

        let drivers = self.drivers.list_available(order.restaurant_id).await;
        let positions = self.locations.positions(drivers.iter().map(|driver| driver.id));
        let ranked = rank_candidates(&drivers, &order.delivery, &positions, &self.config);

        for candidate in ranked {
            match self.assign(order_id, candidate.driver_id).await {
                Ok(order) => return Ok(MatchOutcome::Assigned(order)),
                Err(err) if err.is_retryable() => {
                    debug!(
                        order_id = %order_id,
                        driver_id = %candidate.driver_id,
                        error = %err,
                        "candidate lost, trying next"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        Ok(MatchOutcome::NoDriver)
    }
}
