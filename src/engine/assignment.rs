use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::dispatch::MatchOutcome;
use crate::engine::queue::enqueue_order;
use crate::state::AppState;

/// Background matcher: takes queued order ids and binds each to the best
/// ranked available driver, re-queueing orders nobody could take yet.
pub async fn run_assignment_engine(state: Arc<AppState>, mut order_rx: mpsc::Receiver<Uuid>) {
    info!("assignment engine started");

    while let Some(order_id) = order_rx.recv().await {
        state.metrics.orders_in_queue.dec();

        let start = Instant::now();
        let outcome = state.dispatch.match_order(order_id).await;
        let elapsed = start.elapsed().as_secs_f64();

        let label = match &outcome {
            Ok(MatchOutcome::Assigned(order)) => {
                info!(
                    order_id = %order.id,
                    driver_id = ?order.driver_id,
                    "order matched"
                );
                "assigned"
            }
            Ok(MatchOutcome::NoDriver) => {
                warn!(order_id = %order_id, "no eligible drivers; re-queueing order");
                requeue_later(state.clone(), order_id);
                "no_driver"
            }
            Ok(MatchOutcome::NotNeeded) => "skipped",
            Err(err) => {
                error!(order_id = %order_id, error = %err, "failed to match order");
                "error"
            }
        };

        state
            .metrics
            .assignment_latency_seconds
            .with_label_values(&[label])
            .observe(elapsed);
    }

    warn!("assignment engine stopped: queue channel closed");
}

fn requeue_later(state: Arc<AppState>, order_id: Uuid) {
    let delay = state.dispatch.config().retry_delay;
    tokio::spawn(async move {
        sleep(delay).await;
        if let Err(err) = enqueue_order(&state, order_id).await {
            error!(order_id = %order_id, error = %err, "failed to re-queue order");
        }
    });
}
