//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::bus::Frame;
use crate::game::TankId;
use crate::ws::connection::Connection;
use crate::ws::OUTBOUND_QUEUE;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    info!(connection_id = %connection_id, "New WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE);

    // Spawn writer task: outbound queue -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = ws_sink.send(Message::Text(frame.to_string())).await {
                debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    let mut connection = Connection::new(connection_id, state.clone(), outbound_tx);

    // Reader loop: WebSocket -> connection, plus topics closed by teardown
    loop {
        tokio::select! {
            message = ws_stream.next() => match message {
                Some(Ok(Message::Text(text))) => connection.handle_text(&text).await,
                Some(Ok(Message::Binary(_))) => {
                    warn!(connection_id = %connection_id, "Received binary message, ignoring");
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    info!(connection_id = %connection_id, "Client initiated close");
                    break;
                }
                Some(Err(e)) => {
                    error!(connection_id = %connection_id, error = %e, "WebSocket error");
                    break;
                }
            },
            Some(topic) = connection.topic_closed() => connection.release_topic(topic),
        }
        if writer_handle.is_finished() {
            break;
        }
    }

    let seats = connection.close();
    drop(connection);
    writer_handle.abort();

    if !seats.is_empty() {
        tokio::spawn(release_seats_after_grace(state, connection_id, seats));
    }

    info!(connection_id = %connection_id, "WebSocket connection closed");
}

/// Leave every seat the dropped connection still owns once the grace period
/// has passed. Seats taken over by a reconnect are skipped.
async fn release_seats_after_grace(state: AppState, connection_id: Uuid, seats: Vec<(Uuid, TankId)>) {
    tokio::time::sleep(state.config.disconnect_grace).await;

    for (session_id, tank_id) in seats {
        if state.seats.release(&tank_id, connection_id) {
            info!(connection_id = %connection_id, session_id = %session_id, tank_id = %tank_id, "Releasing seat of dropped connection");
            state.director.leave(session_id, tank_id).await;
        } else {
            debug!(connection_id = %connection_id, tank_id = %tank_id, "Seat was reclaimed, keeping it");
        }
    }
}
