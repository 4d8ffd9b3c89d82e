//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{MatchCommand, MatchHandle};
use crate::http::routes::AppError;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg, Side};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub match_id: Uuid,
    pub player_id: Uuid,
}

/// WebSocket upgrade handler. The match and side are resolved before upgrading.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let handle = match state.match_registry.lookup(&query.match_id) {
        Ok(handle) => handle,
        Err(e) => {
            warn!(match_id = %query.match_id, "WebSocket for unknown match");
            return AppError::from(e).into_response();
        }
    };

    let Some(side) = handle.side_of(query.player_id) else {
        warn!(
            match_id = %query.match_id,
            player_id = %query.player_id,
            "WebSocket for a player outside the match"
        );
        return AppError::NotFound(format!(
            "player {} in match {}",
            query.player_id, query.match_id
        ))
        .into_response();
    };

    let Some(ws) = ws else {
        return AppError::BadRequest("Expected a WebSocket upgrade".to_string()).into_response();
    };

    info!(match_id = %query.match_id, player_id = %query.player_id, ?side, "WebSocket upgrade");
    let player_id = query.player_id;
    ws.on_upgrade(move |socket| handle_socket(socket, handle, side, player_id))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, handle: MatchHandle, side: Side, player_id: Uuid) {
    let match_id = handle.id();
    info!(match_id = %match_id, player_id = %player_id, ?side, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();

    // Subscribe before connecting so this socket sees its own join confirmation.
    let updates = handle.subscribe();
    let (direct_tx, direct_rx) = mpsc::channel(16);
    let writer = tokio::spawn(write_loop(ws_sink, updates, direct_rx, match_id, side));

    let socket_gen = handle.open_socket(side);
    if !handle
        .send(MatchCommand::Connected {
            side,
            socket: socket_gen,
        })
        .await
    {
        debug!(match_id = %match_id, ?side, "Match task already gone");
        writer.abort();
        return;
    }

    read_loop(ws_stream, &handle, side, direct_tx).await;

    // Signal disconnect to match loop
    let _ = handle
        .send(MatchCommand::Disconnected {
            side,
            socket: socket_gen,
        })
        .await;
    writer.abort();

    info!(match_id = %match_id, player_id = %player_id, ?side, "WebSocket connection closed");
}

/// Forward match broadcasts and socket-specific replies to the client
async fn write_loop(
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut updates: broadcast::Receiver<ServerMsg>,
    mut direct_rx: mpsc::Receiver<ServerMsg>,
    match_id: Uuid,
    side: Side,
) {
    loop {
        let msg = tokio::select! {
            received = updates.recv() => match received {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(match_id = %match_id, ?side, lagged_count = n, "Client lagged, skipping updates");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(match_id = %match_id, ?side, "Update channel closed");
                    break;
                }
            },
            Some(msg) = direct_rx.recv() => msg,
        };

        let ended = matches!(msg, ServerMsg::GameEnded { .. });
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(match_id = %match_id, ?side, error = %e, "WebSocket send failed");
            break;
        }
        if ended {
            let _ = ws_sink.send(Message::Close(None)).await;
            break;
        }
    }
}

/// Read client messages until the socket closes
async fn read_loop(
    mut ws_stream: SplitStream<WebSocket>,
    handle: &MatchHandle,
    side: Side,
    direct_tx: mpsc::Sender<ServerMsg>,
) {
    let match_id = handle.id();
    let rate_limiter = ConnectionRateLimiter::default();

    while let Some(result) = ws_stream.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                info!(match_id = %match_id, ?side, "Client initiated close");
                break;
            }
            Ok(Message::Binary(_)) => {
                warn!(match_id = %match_id, ?side, "Received binary message, ignoring");
                continue;
            }
            Ok(_) => continue,
            Err(e) => {
                error!(match_id = %match_id, ?side, error = %e, "WebSocket error");
                break;
            }
        };

        let client_msg = match serde_json::from_str::<ClientMsg>(&text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(match_id = %match_id, ?side, error = %e, "Failed to parse client message");
                let _ = direct_tx.try_send(error_msg("bad_message", e.to_string()));
                continue;
            }
        };

        match client_msg {
            ClientMsg::Input {
                direction,
                timestamp,
            } => {
                if !rate_limiter.check_input() {
                    debug!(match_id = %match_id, ?side, "Rate limited input message");
                    continue;
                }
                if let Err(e) = handle.record_input(side, direction, timestamp) {
                    debug!(
                        match_id = %match_id,
                        ?side,
                        client_timestamp = ?timestamp,
                        error = %e,
                        "Input rejected"
                    );
                    let _ = direct_tx.try_send(error_msg("input_rejected", e.to_string()));
                }
            }
            ClientMsg::Surrender => {
                if !handle.send(MatchCommand::Surrender(side)).await {
                    break;
                }
            }
            ClientMsg::Ping { t } => {
                let _ = direct_tx.try_send(ServerMsg::Pong {
                    t,
                    server_time: handle.now_ms(),
                });
            }
        }
    }
}

fn error_msg(code: &str, message: String) -> ServerMsg {
    ServerMsg::Error {
        code: code.to_string(),
        message,
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
