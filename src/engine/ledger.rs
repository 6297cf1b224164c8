use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;
use uuid::Uuid;

use crate::engine::state_machine::{check_transition, owns};
use crate::error::AppError;
use crate::geo::validate_coordinates;
use crate::models::actor::{Actor, Role};
use crate::models::order::{
    NewOrder, Order, OrderFilter, OrderItem, OrderStatus, Rating, StatusChange,
};
use crate::observability::metrics::Metrics;

/// Authoritative record of orders. Every mutation happens under the
/// order's own lock, so concurrent writers on one order serialize and the
/// loser observes the winner's result.
pub struct OrderLedger {
    orders: DashMap<Uuid, Arc<Mutex<Order>>>,
    metrics: Metrics,
}

impl OrderLedger {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            orders: DashMap::new(),
            metrics,
        }
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn create(&self, new_order: NewOrder, actor: Actor) -> Result<Order, AppError> {
        let total_cents = validate_items(&new_order.items)?;
        validate_coordinates(new_order.delivery.lat, new_order.delivery.lng)?;

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            customer_id: new_order.customer_id,
            restaurant_id: new_order.restaurant_id,
            driver_id: None,
            items: new_order.items,
            total_cents,
            payment_method: new_order.payment_method,
            delivery: new_order.delivery,
            status: OrderStatus::Pending,
            history: vec![StatusChange {
                from: None,
                to: OrderStatus::Pending,
                actor,
                at: now,
            }],
            rating: None,
            deleted: false,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        self.orders
            .insert(order.id, Arc::new(Mutex::new(order.clone())));
        self.metrics
            .order_transitions_total
            .with_label_values(&[OrderStatus::Pending.as_str()])
            .inc();

        info!(
            order_id = %order.id,
            restaurant_id = %order.restaurant_id,
            total_cents = order.total_cents,
            "order placed"
        );

        Ok(order)
    }

    pub async fn get(&self, order_id: Uuid) -> Result<Order, AppError> {
        let handle = self.handle(order_id)?;
        let order = handle.lock().await;
        Ok(order.clone())
    }

    /// Exclusive access to one order. Callers holding this may additionally
    /// take a driver lock, never the other way round.
    pub(crate) async fn lock(&self, order_id: Uuid) -> Result<OwnedMutexGuard<Order>, AppError> {
        let handle = self.handle(order_id)?;
        Ok(handle.lock_owned().await)
    }

    pub async fn transition(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        actor: Actor,
    ) -> Result<Order, AppError> {
        let mut order = self.lock(order_id).await?;
        self.apply_transition(&mut order, target, actor)?;
        Ok(order.clone())
    }

    /// Moves an order the caller already holds locked. Lets the dispatcher
    /// free the driver before the order lock is given up.
    pub(crate) fn apply_transition(
        &self,
        order: &mut Order,
        target: OrderStatus,
        actor: Actor,
    ) -> Result<(), AppError> {
        let order_id = order.id;
        if order.deleted {
            return Err(AppError::NotFound(format!("order {order_id} not found")));
        }

        check_transition(order, target, &actor)?;

        let now = Utc::now();
        let from = order.status;
        order.status = target;
        order.history.push(StatusChange {
            from: Some(from),
            to: target,
            actor,
            at: now,
        });
        order.touch(now);

        self.metrics
            .order_transitions_total
            .with_label_values(&[target.as_str()])
            .inc();

        info!(
            order_id = %order_id,
            from = %from,
            to = %target,
            role = ?actor.role,
            "order transitioned"
        );

        Ok(())
    }

    pub async fn cancel(&self, order_id: Uuid, actor: Actor) -> Result<Order, AppError> {
        self.transition(order_id, OrderStatus::Canceled, actor).await
    }

    pub async fn rate(
        &self,
        order_id: Uuid,
        actor: Actor,
        score: u8,
        feedback: Option<String>,
    ) -> Result<Order, AppError> {
        if !(1..=5).contains(&score) {
            return Err(AppError::Validation(format!(
                "rating must be between 1 and 5, got {score}"
            )));
        }

        let mut order = self.lock(order_id).await?;
        if actor.role != Role::Customer || !owns(&order, &actor) {
            return Err(AppError::Authorization(format!(
                "only the customer of order {order_id} may rate it"
            )));
        }
        if order.status != OrderStatus::Delivered {
            return Err(AppError::InvalidTransition(format!(
                "order {order_id} is {}, only delivered orders can be rated",
                order.status
            )));
        }
        if order.rating.is_some() {
            return Err(AppError::Conflict(format!("order {order_id} is already rated")));
        }

        let now = Utc::now();
        order.rating = Some(Rating {
            score,
            feedback: feedback.filter(|text| !text.trim().is_empty()),
            rated_at: now,
        });
        order.touch(now);

        info!(order_id = %order_id, score, "order rated");
        Ok(order.clone())
    }

    /// Hides a finished order from listings; the record itself is kept.
    pub async fn soft_delete(&self, order_id: Uuid, actor: Actor) -> Result<Order, AppError> {
        if actor.role != Role::Admin {
            return Err(AppError::Authorization(
                "only admins may delete orders".to_string(),
            ));
        }

        let mut order = self.lock(order_id).await?;
        if !order.status.is_terminal() {
            return Err(AppError::InvalidTransition(format!(
                "order {order_id} is still {}, only delivered or canceled orders can be deleted",
                order.status
            )));
        }
        if !order.deleted {
            order.deleted = true;
            order.touch(Utc::now());
            info!(order_id = %order_id, "order soft-deleted");
        }

        Ok(order.clone())
    }

    pub async fn list(&self, filter: OrderFilter) -> Vec<Order> {
        let mut orders = Vec::new();
        for handle in self.handles() {
            let order = handle.lock().await;
            if !order.deleted && filter.matches(&order) {
                orders.push(order.clone());
            }
        }
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        orders
    }

    /// Orders of one restaurant that still wait for a driver, oldest first.
    pub async fn list_unassigned(&self, restaurant_id: Uuid) -> Vec<Order> {
        let filter = OrderFilter {
            restaurant_id: Some(restaurant_id),
            ..OrderFilter::default()
        };
        let mut orders = self.list(filter).await;
        orders.retain(Order::is_unassigned);
        orders
    }

    fn handle(&self, order_id: Uuid) -> Result<Arc<Mutex<Order>>, AppError> {
        self.orders
            .get(&order_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
    }

    fn handles(&self) -> Vec<Arc<Mutex<Order>>> {
        self.orders
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

fn validate_items(items: &[OrderItem]) -> Result<u64, AppError> {
    if items.is_empty() {
        return Err(AppError::Validation(
            "an order needs at least one item".to_string(),
        ));
    }

    items.iter().try_fold(0u64, |total, item| {
        if item.name.trim().is_empty() {
            return Err(AppError::Validation("item name cannot be empty".to_string()));
        }
        if item.quantity <= 0 {
            return Err(AppError::Validation(format!(
                "quantity of {} must be > 0, got {}",
                item.name, item.quantity
            )));
        }

        item.unit_price_cents
            .checked_mul(item.quantity as u64)
            .and_then(|line| total.checked_add(line))
            .ok_or_else(|| AppError::Validation("order total overflows".to_string()))
    })
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::OrderLedger;
    use crate::error::AppError;
    use crate::models::actor::Actor;
    use crate::models::location::GeoPoint;
    use crate::models::order::{NewOrder, OrderItem, OrderStatus, PaymentMethod};
    use crate::observability::metrics::Metrics;

    const CUSTOMER: Uuid = Uuid::from_u128(10);
    const RESTAURANT: Uuid = Uuid::from_u128(20);

    fn new_order(items: Vec<OrderItem>) -> NewOrder {
        NewOrder {
            customer_id: CUSTOMER,
            restaurant_id: RESTAURANT,
            items,
            delivery: GeoPoint {
                lat: 9.02,
                lng: 38.75,
            },
            payment_method: PaymentMethod::Cash,
        }
    }

    fn item(name: &str, unit_price_cents: u64, quantity: i64) -> OrderItem {
        OrderItem {
            name: name.to_string(),
            unit_price_cents,
            quantity,
        }
    }

    #[test]
    fn create_computes_total_and_starts_pending() {
        let ledger = OrderLedger::new(Metrics::new());
        let order = ledger
            .create(
                new_order(vec![item("tibs", 25_000, 2), item("injera", 1_500, 3)]),
                Actor::customer(CUSTOMER),
            )
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_cents, 54_500);
        assert_eq!(order.history.len(), 1);
        assert!(order.driver_id.is_none());
    }

    #[test]
    fn create_rejects_empty_items_and_bad_quantities() {
        let ledger = OrderLedger::new(Metrics::new());
        let actor = Actor::customer(CUSTOMER);

        let err = ledger.create(new_order(Vec::new()), actor).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = ledger
            .create(new_order(vec![item("shiro", 900, 0)]), actor)
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = ledger
            .create(new_order(vec![item("shiro", 900, -2)]), actor)
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let ledger = OrderLedger::new(Metrics::new());
        let err = ledger
            .transition(Uuid::new_v4(), OrderStatus::Accepted, Actor::admin())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn history_records_every_applied_edge() {
        let ledger = OrderLedger::new(Metrics::new());
        let order = ledger
            .create(new_order(vec![item("kitfo", 30_000, 1)]), Actor::customer(CUSTOMER))
            .unwrap();
        let restaurant = Actor::restaurant(RESTAURANT);

        ledger
            .transition(order.id, OrderStatus::Accepted, restaurant)
            .await
            .unwrap();
        let err = ledger
            .transition(order.id, OrderStatus::Accepted, restaurant)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
        let order = ledger
            .transition(order.id, OrderStatus::Preparing, restaurant)
            .await
            .unwrap();

        let path: Vec<_> = order.history.iter().map(|change| change.to).collect();
        assert_eq!(
            path,
            vec![OrderStatus::Pending, OrderStatus::Accepted, OrderStatus::Preparing]
        );
        assert_eq!(order.history[2].from, Some(OrderStatus::Accepted));
        assert_eq!(order.version, 3);
    }

    #[tokio::test]
    async fn canceled_order_accepts_no_further_transition() {
        let ledger = OrderLedger::new(Metrics::new());
        let order = ledger
            .create(new_order(vec![item("kitfo", 30_000, 1)]), Actor::customer(CUSTOMER))
            .unwrap();
        ledger.cancel(order.id, Actor::customer(CUSTOMER)).await.unwrap();

        for target in [OrderStatus::Accepted, OrderStatus::Canceled, OrderStatus::Delivered] {
            let err = ledger
                .transition(order.id, target, Actor::admin())
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::InvalidTransition(_)));
        }
    }

    #[tokio::test]
    async fn rating_only_after_delivery() {
        let ledger = OrderLedger::new(Metrics::new());
        let order = ledger
            .create(new_order(vec![item("kitfo", 30_000, 1)]), Actor::customer(CUSTOMER))
            .unwrap();

        let err = ledger
            .rate(order.id, Actor::customer(CUSTOMER), 5, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));

        let err = ledger
            .rate(order.id, Actor::customer(CUSTOMER), 9, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn soft_delete_hides_finished_orders() {
        let ledger = OrderLedger::new(Metrics::new());
        let order = ledger
            .create(new_order(vec![item("kitfo", 30_000, 1)]), Actor::customer(CUSTOMER))
            .unwrap();

        let err = ledger.soft_delete(order.id, Actor::admin()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));

        ledger.cancel(order.id, Actor::admin()).await.unwrap();
        let err = ledger
            .soft_delete(order.id, Actor::restaurant(RESTAURANT))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));

        let deleted = ledger.soft_delete(order.id, Actor::admin()).await.unwrap();
        assert!(deleted.deleted);
        assert!(ledger.list(Default::default()).await.is_empty());
        assert!(ledger.get(order.id).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_transitions_on_one_order_apply_once() {
        let ledger = std::sync::Arc::new(OrderLedger::new(Metrics::new()));
        let order = ledger
            .create(new_order(vec![item("kitfo", 30_000, 1)]), Actor::customer(CUSTOMER))
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(async move {
                ledger
                    .transition(order.id, OrderStatus::Accepted, Actor::restaurant(RESTAURANT))
                    .await
            }));
        }

        let mut applied = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(ledger.get(order.id).await.unwrap().history.len(), 2);
    }
}
