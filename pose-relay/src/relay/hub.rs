//! The relay hub: owns every shared structure and the connection lifecycle

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;

use crate::config::{Config, RelayConfig};
use crate::ids::RoomCode;
use crate::metrics::Metrics;
use crate::relay::broadcast::Broadcaster;
use crate::relay::connection::{ConnectionHandle, Delivery, SessionHandle};
use crate::relay::protocol::{now_millis, ServerMessage};
use crate::relay::rate_limit::RateLimiter;
use crate::relay::registry::{DeviceClass, SessionRegistry};
use crate::relay::rooms::{PairingRule, RoomDirectory};

/// Connection-time query parameters
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub session_id: Option<String>,
    pub device_type: Option<String>,
    pub room_id: Option<String>,
}

/// Shared relay state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

#[derive(Debug)]
struct RelayInner {
    config: RelayConfig,
    verbose: bool,
    sessions: SessionRegistry,
    rooms: RoomDirectory,
    limiter: RateLimiter,
    metrics: Arc<Metrics>,
    broadcaster: Broadcaster,
}

impl Relay {
    #[must_use]
    pub fn new(config: RelayConfig, verbose: bool) -> Self {
        let metrics = Arc::new(Metrics::new());
        let broadcaster = Broadcaster::new(Arc::clone(&metrics));
        let pairing = PairingRule {
            capture: config.capture(),
            display: config.display(),
        };
        let rooms = RoomDirectory::new(broadcaster.clone(), pairing, config.room_code_length);
        let limiter = RateLimiter::new(config.rate_limit_per_window, config.rate_window());

        Self {
            inner: Arc::new(RelayInner {
                config,
                verbose,
                sessions: SessionRegistry::new(),
                rooms,
                limiter,
                metrics,
                broadcaster,
            }),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.relay.clone(), config.service.verbose)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    pub fn verbose(&self) -> bool {
        self.inner.verbose
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    pub fn rooms(&self) -> &RoomDirectory {
        &self.inner.rooms
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.inner.broadcaster
    }

    /// Admit a new connection: register it, greet it, auto-join if asked
    pub async fn connect(&self, params: ConnectParams, connection: ConnectionHandle) -> SessionHandle {
        let device = params
            .device_type
            .as_deref()
            .map(DeviceClass::parse)
            .unwrap_or_default();
        let session = self
            .sessions()
            .register(params.session_id.as_deref(), device, connection);
        self.metrics().connection_opened();

        tracing::info!(
            session_id = %session.id,
            device = %session.device,
            connection_id = %session.connection.id(),
            "Session connected"
        );

        self.send(
            &session,
            &ServerMessage::Connected {
                session_id: session.id.clone(),
                device_type: session.device,
                timestamp: now_millis(),
            },
        );

        if let Some(raw) = params.room_id.as_deref().filter(|r| !r.trim().is_empty()) {
            match RoomCode::parse(raw) {
                Ok(code) => {
                    self.rooms().join(&session, code).await;
                }
                Err(e) => self.report(&session, e.into()),
            }
        }

        session
    }

    /// Release everything a connection holds.
    ///
    /// Safe to call more than once; only the first call for a given
    /// connection has any effect.
    pub async fn disconnect(&self, session: &SessionHandle) {
        let connection_id = session.connection.id();
        self.rooms().leave(&session.id, connection_id).await;
        if self.sessions().unregister(&session.id, connection_id).is_some() {
            self.limiter().purge(&session.id);
            self.metrics().connection_closed();
            tracing::info!(session_id = %session.id, "Session disconnected");
        }
        session.connection.terminate();
    }

    /// Forcibly close an unresponsive session
    pub async fn evict(&self, session: &SessionHandle) {
        tracing::info!(session_id = %session.id, "Evicting unresponsive session");
        self.metrics().eviction();
        session.connection.terminate();
        self.disconnect(session).await;
    }

    /// Ask every live connection to close
    pub fn close_all(&self) -> usize {
        let sessions = self.sessions().snapshot();
        for session in &sessions {
            session.connection.terminate();
        }
        sessions.len()
    }

    /// Send one envelope to one session
    pub fn send(&self, session: &SessionHandle, message: &ServerMessage) -> Delivery {
        if self.verbose() {
            tracing::debug!(session_id = %session.id, kind = message.kind(), "Sending envelope");
        }
        self.broadcaster().send_to(&session.connection, message)
    }

    /// Counters plus live session and room counts
    pub async fn stats(&self) -> ServerMessage {
        ServerMessage::Stats {
            metrics: self.metrics().snapshot(),
            active_sessions: self.sessions().len(),
            active_rooms: self.rooms().len().await,
            timestamp: now_millis(),
        }
    }

    /// Drop idle rate-limit counters
    pub fn sweep_rate_limits(&self) -> usize {
        let removed = self
            .limiter()
            .sweep_idle(Instant::now(), self.config().rate_idle_after());
        if removed > 0 {
            tracing::debug!(removed, "Swept idle rate-limit counters");
        }
        removed
    }
}
