//! Connection handlers for Huddle server.
//!
//! This module handles the connection lifecycle and frame processing.

use crate::api;
use crate::config::Config;
use crate::db::SqliteStore;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use huddle_protocol::{codec, codes, ConnectionId, Encoding, Frame, ProtocolError};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tenvis_huddle_core::{ChatHub, ConnectionStream};
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};

/// Shared server state.
pub struct AppState {
    /// The chat hub.
    pub hub: Arc<ChatHub>,
    /// Persistent users, rooms and messages.
    pub store: Arc<SqliteStore>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state over a connected store.
    #[must_use]
    pub fn new(config: Config, store: SqliteStore) -> Self {
        let store = Arc::new(store);
        let hub = Arc::new(ChatHub::with_backend(config.hub_config(), Arc::clone(&store)));

        Self { hub, store, config }
    }
}

/// Build the HTTP/WebSocket application.
pub fn app(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    api::router()
        .route(&ws_path, get(ws_handler))
        .with_state(state)
}

/// Serve the application on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn run_server(state: Arc<AppState>, listener: TcpListener) -> Result<()> {
    let addr = listener.local_addr()?;

    info!("Huddle server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Upgrade query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// `json` selects the text encoding before the client sends anything.
    encoding: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    if state.hub.connection_count() >= state.config.limits.max_connections {
        warn!("Connection limit reached, refusing upgrade");
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }

    let encoding = match params.encoding.as_deref() {
        Some("json") => Encoding::Text,
        _ => Encoding::Binary,
    };

    ws.max_message_size(state.config.limits.max_frame_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, encoding))
        .into_response()
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, mut encoding: Encoding) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let (connection_id, mut outbound) = state.hub.connect();

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    let heartbeat = u32::try_from(state.config.heartbeat.interval_ms).unwrap_or(u32::MAX);
    let connected = Frame::connected(connection_id.as_str(), heartbeat);
    if write_frame(&mut sender, &connected, encoding).await.is_err() {
        error!(connection = %connection_id, "Failed to send Connected frame");
        state.hub.disconnect(&connection_id);
        return;
    }

    let timeout = Duration::from_millis(state.config.heartbeat.timeout_ms);
    let idle = tokio::time::sleep(timeout);
    tokio::pin!(idle);

    // Read buffer for partial binary frames
    let mut read_buffer = BytesMut::with_capacity(4096);
    let max_frame_size = state.config.limits.max_frame_size;

    loop {
        tokio::select! {
            biased;

            // Frames queued by the hub for this connection
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if write_frame(&mut sender, &frame, encoding).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                idle.as_mut().reset(tokio::time::Instant::now() + timeout);

                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        encoding = Encoding::Binary;
                        read_buffer.extend_from_slice(&data);

                        let mut close = false;
                        loop {
                            match next_frame(&mut read_buffer, max_frame_size) {
                                Ok(Some((frame, len))) => {
                                    metrics::record_frame(len, "inbound");
                                    // Make room for the reply before handling the next frame.
                                    let flushed =
                                        flush_outbound(&mut outbound, &mut sender, encoding).await;
                                    if flushed.is_err() {
                                        close = true;
                                        break;
                                    }
                                    dispatch(frame, &connection_id, &state).await;
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    warn!(connection = %connection_id, error = %e, "Undecodable binary frame");
                                    metrics::record_error("decode");
                                    let reply = Frame::error(0, codes::INVALID_FRAME, e.to_string());
                                    let _ = write_frame(&mut sender, &reply, encoding).await;
                                    close = true;
                                    break;
                                }
                            }
                        }

                        metrics::record_latency(start.elapsed().as_secs_f64());
                        if close {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        let start = Instant::now();
                        encoding = Encoding::Text;

                        match codec::decode_json(&text, max_frame_size) {
                            Ok(frame) => {
                                metrics::record_frame(text.len(), "inbound");
                                dispatch(frame, &connection_id, &state).await;
                            }
                            Err(e) => {
                                debug!(connection = %connection_id, error = %e, "Undecodable text frame");
                                metrics::record_error("decode");
                                state.hub.send_to(
                                    &connection_id,
                                    Frame::error(0, codes::INVALID_FRAME, e.to_string()),
                                );
                            }
                        }

                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            () = &mut idle => {
                debug!(connection = %connection_id, "Heartbeat timeout");
                metrics::record_error("heartbeat_timeout");
                break;
            }
        }
    }

    state.hub.disconnect(&connection_id);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Handle a decoded frame and queue the reply, if any.
async fn dispatch(frame: Frame, connection_id: &ConnectionId, state: &AppState) {
    trace!(connection = %connection_id, frame_type = ?frame.frame_type(), "Inbound frame");

    if let Some(reply) = handle_frame(frame, connection_id, &state.hub).await {
        state.hub.send_to(connection_id, reply);
    }
}

/// Apply a client frame to the hub.
///
/// Replies go through the connection's outbound queue so they stay ordered
/// after any events the request produced for the same connection.
async fn handle_frame(frame: Frame, connection_id: &ConnectionId, hub: &ChatHub) -> Option<Frame> {
    match frame {
        Frame::Register { id, user_id } => Some(match hub.register(connection_id, user_id) {
            Ok(_) => Frame::ack(id),
            Err(e) => Frame::error(id, e.code(), e.to_string()),
        }),

        Frame::JoinRoom { id, room_id } => Some(match hub.join_room(connection_id, room_id) {
            Ok(()) => Frame::ack(id),
            Err(e) => {
                debug!(connection = %connection_id, room = %room_id, error = %e, "Join refused");
                Frame::error(id, e.code(), e.to_string())
            }
        }),

        Frame::LeaveRoom { id, room_id } => {
            hub.leave_room(connection_id, room_id);
            Some(Frame::ack(id))
        }

        Frame::SendMessage {
            id,
            room_id,
            sender_id,
            content,
        } => Some(match hub.send_message(room_id, sender_id, content).await {
            Ok(_) => {
                metrics::record_message_persisted();
                Frame::ack(id)
            }
            Err(e) => {
                if !e.is_rejection() {
                    metrics::record_error("send_message");
                }
                debug!(connection = %connection_id, room = %room_id, error = %e, "Message rejected");
                Frame::error(id, e.code(), e.to_string())
            }
        }),

        Frame::Typing {
            room_id,
            user_id,
            is_typing,
        } => {
            hub.set_typing(room_id, user_id, is_typing).await;
            None
        }

        Frame::Ping { timestamp } => Some(Frame::pong(timestamp)),

        Frame::Pong { .. } => None,

        other => {
            warn!(connection = %connection_id, frame_type = ?other.frame_type(), "Unexpected frame type");
            Some(Frame::error(
                0,
                codes::INVALID_FRAME,
                "server frames cannot be sent by clients",
            ))
        }
    }
}

/// Decode the next buffered binary frame along with its encoded length.
fn next_frame(
    read_buffer: &mut BytesMut,
    max_frame_size: usize,
) -> Result<Option<(Frame, usize)>, ProtocolError> {
    let buffered = read_buffer.len();
    let frame = codec::decode_from_limited(read_buffer, max_frame_size)?;
    Ok(frame.map(|frame| (frame, buffered - read_buffer.len())))
}

/// Write every frame already queued for the connection.
async fn flush_outbound(
    outbound: &mut ConnectionStream,
    sender: &mut SplitSink<WebSocket, Message>,
    encoding: Encoding,
) -> Result<()> {
    while let Ok(frame) = outbound.try_recv() {
        write_frame(sender, &frame, encoding).await?;
    }
    Ok(())
}

/// Send a frame to the WebSocket in the given encoding.
async fn write_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &Frame,
    encoding: Encoding,
) -> Result<()> {
    let message = match encoding {
        Encoding::Binary => Message::Binary(codec::encode(frame)?.to_vec()),
        Encoding::Text => Message::Text(codec::encode_json(frame)?),
    };
    let len = match &message {
        Message::Binary(data) => data.len(),
        Message::Text(text) => text.len(),
        _ => 0,
    };
    metrics::record_frame(len, "outbound");
    sender.send(message).await?;
    Ok(())
}
