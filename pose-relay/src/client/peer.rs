//! Reconnecting relay peer over tokio-tungstenite
//!
//! [`RelayPeer`] is a thin handle around a background task that owns the
//! socket. Envelopes go in through an unbounded channel; [`PeerEvent`]s come
//! out on a bounded one returned from [`RelayPeer::start`].
//!
//! On an unexpected close the task reconnects with exponential backoff,
//! reusing the session id the relay last assigned, and re-sends `join_room`
//! for the room it was in. Once attempts are exhausted it emits
//! [`PeerEvent::Failed`] and stops.
//!
//! ```rust,ignore
//! let config = PeerConfig::new("ws://127.0.0.1:8080/ws", DeviceClass::Vr)?.with_room("AB12CD");
//! let (peer, mut events) = RelayPeer::start(config);
//!
//! while let Some(event) = events.recv().await {
//!     if let PeerEvent::Envelope(value) = event {
//!         // pose_data, pairing_success, ...
//!     }
//! }
//! ```

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::client::backoff::{Backoff, ReconnectPolicy};
use crate::client::state::{ConnectionEvent, ConnectionState};
use crate::relay::{DeviceClass, PoseFrame};

const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("invalid relay url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("relay url must use ws:// or wss://, got {0}")]
    UnsupportedScheme(String),

    #[error("peer task has stopped")]
    Closed,

    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Where and how a peer connects
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// WebSocket endpoint, e.g. `ws://host:8080/ws`
    pub url: Url,
    pub device: DeviceClass,
    /// Session id to request on first connect
    pub session_id: Option<String>,
    /// Room to join on first connect
    pub room: Option<String>,
    pub policy: ReconnectPolicy,
    pub event_channel_capacity: usize,
}

impl PeerConfig {
    pub fn new(url: &str, device: DeviceClass) -> Result<Self, PeerError> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(PeerError::UnsupportedScheme(url.scheme().to_string()));
        }
        Ok(Self {
            url,
            device,
            session_id: None,
            room: None,
            policy: ReconnectPolicy::default(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        })
    }

    #[must_use]
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Endpoint with `sessionId`, `deviceType` and `roomId` query parameters
    #[must_use]
    pub fn connect_url(&self, session_id: Option<&str>, room: Option<&str>) -> Url {
        let mut url = self.url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.clear();
            if let Some(id) = session_id {
                query.append_pair("sessionId", id);
            }
            query.append_pair("deviceType", self.device.as_str());
            if let Some(room) = room {
                query.append_pair("roomId", room);
            }
        }
        url
    }
}

/// Things the peer task reports
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    StateChanged(ConnectionState),
    /// The relay greeted us with this session id
    Registered { session_id: String },
    /// Any envelope received from the relay
    Envelope(Value),
    /// Waiting `delay` before attempt number `attempt`
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnect attempts exhausted; the task has stopped
    Failed { attempts: u32 },
}

/// Handle to a running peer
#[derive(Debug)]
pub struct RelayPeer {
    outbound: mpsc::UnboundedSender<Value>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl RelayPeer {
    /// Spawn the peer task
    pub fn start(config: PeerConfig) -> (Self, mpsc::Receiver<PeerEvent>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(
            PeerTask {
                backoff: Backoff::new(config.policy),
                session_id: config.session_id.clone(),
                room: config.room.clone(),
                state: ConnectionState::Connecting,
                config,
                outbound: outbound_rx,
                events: events_tx,
                shutdown: shutdown.clone(),
            }
            .run(),
        );

        (
            Self {
                outbound,
                shutdown,
                task,
            },
            events_rx,
        )
    }

    /// Queue an envelope. Envelopes queued while disconnected are discarded
    /// on reconnect.
    pub fn send(&self, envelope: Value) -> Result<(), PeerError> {
        self.outbound.send(envelope).map_err(|_| PeerError::Closed)
    }

    pub fn join_room(&self, room: &str) -> Result<(), PeerError> {
        self.send(json!({"type": "join_room", "roomId": room}))
    }

    pub fn create_room(&self) -> Result<(), PeerError> {
        self.send(json!({"type": "create_room"}))
    }

    pub fn leave_room(&self) -> Result<(), PeerError> {
        self.send(json!({"type": "leave_room"}))
    }

    /// Send one pose frame (`data` is relayed untouched)
    pub fn send_pose(&self, data: Value) -> Result<(), PeerError> {
        self.send(json!({"type": "pose_data", "data": data}))
    }

    /// Send a typed frame
    pub fn send_frame(&self, frame: &PoseFrame) -> Result<(), PeerError> {
        self.send_pose(serde_json::to_value(frame).map_err(PeerError::Encode)?)
    }

    /// Close the socket and stop reconnecting
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let mut task = self.task;
        if tokio::time::timeout(DEFAULT_SHUTDOWN_TIMEOUT, &mut task)
            .await
            .is_err()
        {
            tracing::warn!("Peer task did not stop in time, aborting");
            task.abort();
        }
    }
}

enum Ended {
    Shutdown,
    Dropped,
}

struct PeerTask {
    config: PeerConfig,
    backoff: Backoff,
    session_id: Option<String>,
    room: Option<String>,
    state: ConnectionState,
    outbound: mpsc::UnboundedReceiver<Value>,
    events: mpsc::Sender<PeerEvent>,
    shutdown: CancellationToken,
}

impl PeerTask {
    async fn run(mut self) {
        let mut reconnecting = false;
        self.emit(PeerEvent::StateChanged(self.state));

        loop {
            // first attempt auto-joins via the query string; later ones re-send join_room
            let room = if reconnecting { None } else { self.room.clone() };
            let url = self.config.connect_url(self.session_id.as_deref(), room.as_deref());

            let attempt = tokio::select! {
                () = self.shutdown.cancelled() => return,
                attempt = connect_async(url.as_str()) => attempt,
            };

            match attempt {
                Ok((socket, _)) => {
                    self.advance(ConnectionEvent::Opened);
                    self.backoff.reset();
                    if let Ended::Shutdown = self.drive(socket, reconnecting).await {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Connection attempt failed");
                    self.advance(ConnectionEvent::TransportFailed);
                }
            }

            match self.backoff.next_delay() {
                Some(delay) => {
                    let attempt = self.backoff.attempts();
                    tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
                    self.emit(PeerEvent::Reconnecting { attempt, delay });
                    tokio::select! {
                        () = self.shutdown.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                    self.advance(ConnectionEvent::Retry);
                    reconnecting = true;
                }
                None => {
                    self.advance(ConnectionEvent::GaveUp);
                    let attempts = self.backoff.attempts();
                    tracing::error!(attempts, "Giving up on relay connection");
                    // terminal event waits for room in the channel
                    let _ = self.events.send(PeerEvent::Failed { attempts }).await;
                    return;
                }
            }
        }
    }

    async fn drive(&mut self, socket: WsStream, rejoin: bool) -> Ended {
        let (mut sink, mut stream) = socket.split();

        let mut stale = 0usize;
        while self.outbound.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            tracing::debug!(discarded = stale, "Dropped envelopes queued while offline");
        }

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    self.close(&mut sink).await;
                    return Ended::Shutdown;
                }
                next = self.outbound.recv() => {
                    let Some(envelope) = next else {
                        self.close(&mut sink).await;
                        return Ended::Shutdown;
                    };
                    if envelope.get("type").and_then(Value::as_str) == Some("leave_room") {
                        self.room = None;
                        if self.state == ConnectionState::InRoom {
                            self.advance(ConnectionEvent::Left);
                        }
                    }
                    if let Err(e) = sink.send(Message::text(envelope.to_string())).await {
                        tracing::warn!(error = %e, "Send failed");
                        self.advance(ConnectionEvent::TransportFailed);
                        return Ended::Dropped;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = self.on_envelope(text.as_str(), rejoin) {
                            if let Err(e) = sink.send(Message::text(reply.to_string())).await {
                                tracing::warn!(error = %e, "Send failed");
                                self.advance(ConnectionEvent::TransportFailed);
                                return Ended::Dropped;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "Relay closed the connection");
                        self.advance(ConnectionEvent::Closed);
                        return Ended::Dropped;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Transport error");
                        self.advance(ConnectionEvent::TransportFailed);
                        return Ended::Dropped;
                    }
                    None => {
                        self.advance(ConnectionEvent::Closed);
                        return Ended::Dropped;
                    }
                },
            }
        }
    }

    /// Track session/room from an inbound envelope; returns an envelope to send back
    fn on_envelope(&mut self, raw: &str, rejoin: bool) -> Option<Value> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Relay sent a non-JSON frame");
                return None;
            }
        };

        let mut reply = None;
        match value.get("type").and_then(Value::as_str) {
            Some("connected") => {
                if let Some(id) = value.get("sessionId").and_then(Value::as_str) {
                    self.session_id = Some(id.to_string());
                    self.emit(PeerEvent::Registered {
                        session_id: id.to_string(),
                    });
                }
                self.advance(ConnectionEvent::Registered);
                if rejoin {
                    reply = self
                        .room
                        .as_ref()
                        .map(|room| json!({"type": "join_room", "roomId": room}));
                }
            }
            Some("room_joined" | "room_created") => {
                if let Some(room) = value.get("roomId").and_then(Value::as_str) {
                    self.room = Some(room.to_string());
                }
                self.advance(ConnectionEvent::Joined);
            }
            _ => {}
        }

        self.emit(PeerEvent::Envelope(value));
        reply
    }

    async fn close<S>(&mut self, sink: &mut S)
    where
        S: futures::Sink<Message> + Unpin,
    {
        self.advance(ConnectionEvent::CloseRequested);
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
        self.advance(ConnectionEvent::Closed);
    }

    fn advance(&mut self, event: ConnectionEvent) {
        match self.state.transition(event) {
            Ok(next) => {
                self.state = next;
                self.emit(PeerEvent::StateChanged(next));
            }
            Err(e) => tracing::debug!(error = %e, "Ignoring state event"),
        }
    }

    fn emit(&self, event: PeerEvent) {
        if self.events.try_send(event).is_err() {
            tracing::warn!("Peer event channel full or closed, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_websocket_scheme() {
        assert!(matches!(
            PeerConfig::new("http://localhost/ws", DeviceClass::Vr),
            Err(PeerError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            PeerConfig::new("not a url", DeviceClass::Vr),
            Err(PeerError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_connect_url_query() {
        let config = PeerConfig::new("ws://localhost:8080/ws?stale=1", DeviceClass::Mobile).unwrap();

        let url = config.connect_url(Some("sess 1"), Some("AB12CD"));

        assert_eq!(url.path(), "/ws");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("sessionId".to_string(), "sess 1".to_string()),
                ("deviceType".to_string(), "mobile".to_string()),
                ("roomId".to_string(), "AB12CD".to_string()),
            ]
        );
    }

    #[test]
    fn test_connect_url_without_optional_params() {
        let config = PeerConfig::new("ws://localhost:8080/ws", DeviceClass::Vr).unwrap();
        let url = config.connect_url(None, None);
        assert_eq!(url.query(), Some("deviceType=vr"));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        // bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = PeerConfig::new(&format!("ws://127.0.0.1:{port}/ws"), DeviceClass::Vr)
            .unwrap()
            .with_policy(ReconnectPolicy {
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                max_attempts: 3,
            });
        let (_peer, mut events) = RelayPeer::start(config);

        let mut reconnects = Vec::new();
        let failed = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = events.recv().await {
                match event {
                    PeerEvent::Reconnecting { attempt, delay } => reconnects.push((attempt, delay)),
                    PeerEvent::Failed { attempts } => return Some(attempts),
                    _ => {}
                }
            }
            None
        })
        .await
        .unwrap();

        assert_eq!(failed, Some(3));
        assert_eq!(
            reconnects,
            vec![
                (1, Duration::from_millis(5)),
                (2, Duration::from_millis(10)),
                (3, Duration::from_millis(20)),
            ]
        );
    }
}
