//! WebSocket upgrade and the per-connection task
//!
//! Each socket is split in two. A writer task drains the connection's
//! outbound queue into the sink; the reader loop feeds inbound frames to the
//! router until the peer goes away or the connection is terminated. Cleanup
//! runs before the task returns, so no registry or room entry outlives the
//! socket.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};

use crate::error::RelayError;
use crate::relay::connection::ConnectionHandle;
use crate::relay::hub::{ConnectParams, Relay};
use crate::relay::protocol::ProtocolError;
use crate::state::AppState;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// `GET /ws?sessionId=&deviceType=&roomId=`
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    let relay = state.relay.clone();
    ws.max_message_size(relay.config().max_message_size_bytes)
        .on_upgrade(move |socket| serve_socket(socket, relay, params))
}

/// Drive one accepted socket to completion
pub async fn serve_socket(socket: WebSocket, relay: Relay, params: ConnectParams) {
    let (mut sink, mut stream) = socket.split();
    let (connection, mut outbound) =
        ConnectionHandle::channel(relay.config().outbound_queue_capacity);

    let writer_handle = connection.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = writer_handle.terminated() => break,
                next = outbound.recv() => match next {
                    Some(message) => {
                        if let Err(e) = sink.send(message).await {
                            tracing::debug!(
                                connection_id = %writer_handle.id(),
                                error = %e,
                                "Write failed, closing connection"
                            );
                            writer_handle.terminate();
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
    });

    let session = relay.connect(params, connection.clone()).await;

    loop {
        tokio::select! {
            () = connection.terminated() => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => relay.route_text(&session, text.as_str()).await,
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => relay.route_text(&session, text).await,
                    Err(_) => {
                        relay.metrics().message_received();
                        relay.report(
                            &session,
                            ProtocolError::Malformed("binary frame is not UTF-8".into()).into(),
                        );
                    }
                },
                Some(Ok(Message::Pong(_))) => {
                    relay.sessions().mark_alive(&session.id, connection.id());
                }
                // pings are answered by the websocket layer
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(session_id = %session.id, ?frame, "Peer closed connection");
                    break;
                }
                Some(Err(e)) => {
                    relay.report(&session, RelayError::Transport(e.to_string()));
                    break;
                }
                None => break,
            },
        }
    }

    relay.disconnect(&session).await;
    if let Err(e) = writer.await {
        tracing::error!(session_id = %session.id, error = %e, "Writer task failed");
    }
}
