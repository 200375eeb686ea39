use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::directory::ConnectionHandle;
use crate::metrics::ConnectionMetrics;
use crate::router::RouteError;
use crate::server::AppState;

use super::message::{ClientEvent, ServerEvent};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Optional identity asserted at upgrade time, same as an `authenticate` event
    pub user_id: Option<String>,
}

/// WebSocket upgrade handler
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query),
    fields(has_user_id = query.user_id.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.user_id))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState, user_id: Option<String>) {
    let connection_start = std::time::Instant::now();

    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.settings.websocket.channel_buffer_size);
    let handle = state.directory.open(tx);
    let connection_id = handle.id;

    ConnectionMetrics::record_opened();

    // Greeting goes out before anything else can be queued
    let _ = handle.deliver(ServerEvent::connected());

    if let Some(user_id) = user_id {
        let _ = state
            .router
            .route(connection_id, ClientEvent::Authenticate(user_id));
    }

    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for sending events from channel to WebSocket
    let mut send_task = tokio::spawn(forward_events(rx, ws_sender));

    // Task for receiving events from WebSocket
    let state_clone = state.clone();
    let handle_clone = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &state_clone, &handle_clone) {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
            recv_task.abort();
        }
        _ = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
            send_task.abort();
        }
        _ = handle.closed() => {
            tracing::debug!(connection_id = %connection_id, "Connection closed by server");
            recv_task.abort();
            send_task.abort();
        }
    }

    let released = state.directory.disconnect(connection_id);

    let duration = connection_start.elapsed().as_secs_f64();
    ConnectionMetrics::record_closed(duration);

    tracing::info!(
        connection_id = %connection_id,
        user_id = ?released.map(|e| e.user_id),
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Write queued events to the socket until the channel or the socket closes.
///
/// Each `heartbeat` is followed by a protocol-level ping. Browsers answer it
/// on their own, and the pong counts as activity, so a client that only
/// listens is not mistaken for an idle one.
async fn forward_events<S>(mut rx: mpsc::Receiver<ServerEvent>, mut ws_sender: S)
where
    S: Sink<Message> + Unpin,
{
    while let Some(event) = rx.recv().await {
        let text = match event.to_json() {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(error = %e, event = event.name(), "Failed to serialize event");
                continue;
            }
        };

        if ws_sender.send(Message::Text(text.into())).await.is_err() {
            break;
        }

        if matches!(event, ServerEvent::Heartbeat)
            && ws_sender.send(Message::Ping(Default::default())).await.is_err()
        {
            break;
        }
    }
    let _ = ws_sender.close().await;
}

/// Process a received WebSocket frame.
/// Returns false if the connection should be closed.
fn process_message(msg: Message, state: &AppState, handle: &Arc<ConnectionHandle>) -> bool {
    match msg {
        Message::Text(text) => {
            handle.update_activity();

            match state.router.route_text(handle.id, &text) {
                Ok(outcome) => {
                    tracing::trace!(
                        connection_id = %handle.id,
                        delivered = outcome.delivered,
                        dropped = outcome.dropped,
                        suppressed = outcome.suppressed,
                        failed = outcome.failed,
                        "Event routed"
                    );
                }
                // Bad events are dropped, the connection stays open
                Err(RouteError::Malformed(e)) => {
                    tracing::warn!(connection_id = %handle.id, error = %e, "Failed to parse client event");
                }
                Err(e) => {
                    tracing::warn!(connection_id = %handle.id, error = %e, "Dropping client event");
                }
            }
            true
        }
        Message::Binary(_) => {
            tracing::debug!(connection_id = %handle.id, "Ignoring binary frame");
            true
        }
        Message::Ping(_) | Message::Pong(_) => {
            // Pongs answer our heartbeat pings; axum answers client pings itself
            handle.update_activity();
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}
