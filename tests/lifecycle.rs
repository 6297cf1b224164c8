use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use delivery_dispatch::config::Config;
use delivery_dispatch::engine::registry::NewDriver;
use delivery_dispatch::error::AppError;
use delivery_dispatch::models::actor::Actor;
use delivery_dispatch::models::driver::Availability;
use delivery_dispatch::models::location::{GeoPoint, LocationSample};
use delivery_dispatch::models::order::{NewOrder, OrderItem, OrderStatus, PaymentMethod};
use delivery_dispatch::state::AppState;
use delivery_dispatch::tracking::store::LocationSink;
use uuid::Uuid;

const CUSTOMER: Uuid = Uuid::from_u128(0xC0);
const RESTAURANT: Uuid = Uuid::from_u128(0x40);

fn new_order() -> NewOrder {
    NewOrder {
        customer_id: CUSTOMER,
        restaurant_id: RESTAURANT,
        items: vec![
            OrderItem {
                name: "beyaynetu".to_string(),
                unit_price_cents: 18_000,
                quantity: 2,
            },
            OrderItem {
                name: "macchiato".to_string(),
                unit_price_cents: 3_000,
                quantity: 1,
            },
        ],
        delivery: GeoPoint {
            lat: 9.03,
            lng: 38.76,
        },
        payment_method: PaymentMethod::MobileMoney,
    }
}

fn register_driver(state: &AppState, name: &str) -> Uuid {
    state
        .drivers
        .register(NewDriver {
            name: name.to_string(),
            phone: "+251911223344".to_string(),
            restaurant_id: Some(RESTAURANT),
        })
        .unwrap()
        .id
}

#[derive(Default)]
struct CountingSink(std::sync::Mutex<usize>);

impl LocationSink for CountingSink {
    fn persist(&self, _sample: &LocationSample) {
        *self.0.lock().unwrap() += 1;
    }
}

#[tokio::test]
async fn order_lifecycle_from_placement_to_release() {
    let sink = Arc::new(CountingSink::default());
    let (state, _rx) = AppState::with_location_sink(&Config::default(), sink.clone());
    let restaurant = Actor::restaurant(RESTAURANT);

    let order = state
        .dispatch
        .place_order(new_order(), Actor::customer(CUSTOMER))
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total_cents, 39_000);

    state
        .dispatch
        .transition(order.id, OrderStatus::Accepted, restaurant)
        .await
        .unwrap();

    let d1 = register_driver(&state, "Abebe");
    let impostor = register_driver(&state, "Dawit");
    state.dispatch.assign(order.id, d1).await.unwrap();
    assert_eq!(
        state.drivers.get(d1).await.unwrap().availability,
        Availability::Busy
    );

    state
        .dispatch
        .transition(order.id, OrderStatus::Preparing, restaurant)
        .await
        .unwrap();
    state
        .dispatch
        .transition(order.id, OrderStatus::Ready, restaurant)
        .await
        .unwrap();

    let err = state
        .dispatch
        .transition(order.id, OrderStatus::Picked, Actor::driver(impostor))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));
    state
        .dispatch
        .transition(order.id, OrderStatus::Picked, Actor::driver(d1))
        .await
        .unwrap();

    let t1 = Utc::now() - chrono::Duration::seconds(20);
    let t2 = t1 + chrono::Duration::seconds(10);
    state.tracking.report_position(d1, 9.02, 38.75, t1).unwrap();
    state.tracking.report_position(d1, 9.021, 38.751, t2).unwrap();

    let position = state
        .tracking
        .current_position_for_order(order.id)
        .await
        .unwrap();
    assert_eq!(position.sampled_at, t2);
    assert_eq!(position.lat, 9.021);
    assert_eq!(position.lng, 38.751);

    state
        .dispatch
        .transition(order.id, OrderStatus::EnRoute, Actor::driver(d1))
        .await
        .unwrap();
    let delivered = state
        .dispatch
        .transition(order.id, OrderStatus::Delivered, Actor::driver(d1))
        .await
        .unwrap();
    assert_eq!(delivered.driver_id, Some(d1));

    // Delivery already released the driver; the explicit release is a no-op.
    assert!(!state.dispatch.release(order.id).await.unwrap());
    let driver = state.drivers.get(d1).await.unwrap();
    assert_eq!(driver.availability, Availability::Available);
    assert!(driver.current_order.is_none());

    let path: Vec<_> = delivered.history.iter().map(|change| change.to).collect();
    assert_eq!(
        path,
        vec![
            OrderStatus::Pending,
            OrderStatus::Accepted,
            OrderStatus::Preparing,
            OrderStatus::Ready,
            OrderStatus::Picked,
            OrderStatus::EnRoute,
            OrderStatus::Delivered,
        ]
    );

    for target in [OrderStatus::Canceled, OrderStatus::Delivered, OrderStatus::EnRoute] {
        let err = state
            .dispatch
            .transition(order.id, target, Actor::admin())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    assert_eq!(*sink.0.lock().unwrap(), 2);
}

#[tokio::test]
async fn customer_cannot_cancel_once_preparing_but_restaurant_can() {
    let (state, _rx) = AppState::new(&Config::default());
    let restaurant = Actor::restaurant(RESTAURANT);
    let order = state
        .dispatch
        .place_order(new_order(), Actor::customer(CUSTOMER))
        .unwrap();

    state
        .dispatch
        .transition(order.id, OrderStatus::Accepted, restaurant)
        .await
        .unwrap();
    state
        .dispatch
        .transition(order.id, OrderStatus::Preparing, restaurant)
        .await
        .unwrap();

    let err = state
        .dispatch
        .cancel(order.id, Actor::customer(CUSTOMER))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));

    let canceled = state.dispatch.cancel(order.id, restaurant).await.unwrap();
    assert_eq!(canceled.status, OrderStatus::Canceled);

    let err = state.dispatch.cancel(order.id, Actor::admin()).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_transition");
}

#[tokio::test]
async fn canceling_an_assigned_order_frees_its_driver() {
    let (state, _rx) = AppState::new(&Config::default());
    let order = state
        .dispatch
        .place_order(new_order(), Actor::customer(CUSTOMER))
        .unwrap();
    let driver_id = register_driver(&state, "Sara");
    state.dispatch.assign(order.id, driver_id).await.unwrap();

    state
        .dispatch
        .cancel(order.id, Actor::customer(CUSTOMER))
        .await
        .unwrap();

    let driver = state.drivers.get(driver_id).await.unwrap();
    assert_eq!(driver.availability, Availability::Available);
    assert!(
        state
            .dispatch
            .list_available_drivers(RESTAURANT)
            .await
            .iter()
            .any(|driver| driver.id == driver_id)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_orders_racing_for_few_drivers_never_double_book() {
    let (state, _rx) = AppState::new(&Config::default());
    let state = Arc::new(state);

    let drivers: Vec<Uuid> = (0..3)
        .map(|i| register_driver(&state, &format!("driver-{i}")))
        .collect();
    let orders: Vec<Uuid> = (0..12)
        .map(|_| {
            state
                .dispatch
                .place_order(new_order(), Actor::customer(CUSTOMER))
                .unwrap()
                .id
        })
        .collect();

    let mut tasks = Vec::new();
    for (i, order_id) in orders.iter().copied().enumerate() {
        for offset in 0..drivers.len() {
            let driver_id = drivers[(i + offset) % drivers.len()];
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                state.dispatch.assign(order_id, driver_id).await
            }));
        }
    }

    let mut won = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(order) => won.push((order.id, order.driver_id.unwrap())),
            Err(err) => assert!(err.is_retryable(), "unexpected error: {err}"),
        }
    }

    assert_eq!(won.len(), drivers.len());
    for driver_id in &drivers {
        let driver = state.drivers.get(*driver_id).await.unwrap();
        assert_eq!(driver.availability, Availability::Busy);
        let order_id = driver.current_order.unwrap();
        let order = state.ledger.get(order_id).await.unwrap();
        assert_eq!(order.driver_id, Some(*driver_id));
    }
}

#[tokio::test]
async fn assignment_engine_matches_queued_orders() {
    let mut config = Config::default();
    config.dispatch.auto_dispatch = true;
    config.dispatch.retry_delay = Duration::from_millis(20);
    let (state, rx) = AppState::new(&config);
    let state = Arc::new(state);
    tokio::spawn(delivery_dispatch::engine::assignment::run_assignment_engine(
        state.clone(),
        rx,
    ));

    let order = state
        .dispatch
        .place_order(new_order(), Actor::customer(CUSTOMER))
        .unwrap();
    delivery_dispatch::engine::queue::enqueue_order(&state, order.id)
        .await
        .unwrap();

    // Nobody is on shift yet; the order keeps cycling through the queue.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(state.ledger.get(order.id).await.unwrap().driver_id.is_none());

    let driver_id = register_driver(&state, "Abebe");
    tokio::time::sleep(Duration::from_millis(200)).await;

    let order = state.ledger.get(order.id).await.unwrap();
    assert_eq!(order.driver_id, Some(driver_id));
    assert_eq!(order.status, OrderStatus::Pending);
}
