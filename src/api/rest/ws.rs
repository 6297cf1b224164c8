use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::rest::claim::{AdminClaim, Claim};
use crate::api::rest::tracking::authorize_tracking;
use crate::error::AppError;
use crate::state::AppState;

/// Streams every dispatch event to the connected client. The feed spans all
/// restaurants, so only admins may open it.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    AdminClaim(admin): AdminClaim,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    debug!(role = ?admin.role, "dispatch event feed requested");
    let events = BroadcastStream::new(state.dispatch.subscribe())
        .filter_map(|event| async move { event.ok() })
        .boxed();
    ws.on_upgrade(|socket| pump(socket, events, "dispatch"))
}

/// Streams position updates of whichever driver is delivering the order.
pub async fn track_order_handler(
    State(state): State<Arc<AppState>>,
    claim: Claim,
    Path(order_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    authorize_tracking(&state, &claim, order_id).await?;
    let positions = state.tracking.track_order(order_id);
    Ok(ws.on_upgrade(move |socket| pump(socket, positions, "tracking")))
}

async fn pump<T>(socket: WebSocket, mut updates: BoxStream<'static, T>, channel: &'static str)
where
    T: Serialize + Send + 'static,
{
    let (mut sender, mut receiver) = socket.split();

    info!(channel, "websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(update) = updates.next().await {
            let json = match serde_json::to_string(&update) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize websocket update");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(channel, "websocket client disconnected");
}
