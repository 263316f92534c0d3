//! Message router: decode an inbound frame and dispatch it

use crate::error::RelayError;
use crate::ids::{RoomCode, SessionId};
use crate::relay::connection::{Delivery, SessionHandle};
use crate::relay::hub::Relay;
use crate::relay::protocol::{now_millis, ClientMessage, ProtocolError, ServerMessage};
use crate::relay::rate_limit::MessageClass;

impl Relay {
    /// Handle one inbound text frame from `session`.
    ///
    /// Failures never close the connection: they are either answered with
    /// an `error` envelope or dropped.
    pub async fn route_text(&self, session: &SessionHandle, raw: &str) {
        self.metrics().message_received();

        let result = match ClientMessage::decode(raw) {
            Ok(message) => {
                if self.verbose() {
                    tracing::debug!(
                        session_id = %session.id,
                        kind = message.kind(),
                        bytes = raw.len(),
                        "Routing envelope"
                    );
                }
                self.dispatch(session, message).await
            }
            Err(e) => Err(e.into()),
        };

        if let Err(err) = result {
            self.report(session, err);
        }
    }

    async fn dispatch(&self, session: &SessionHandle, message: ClientMessage) -> Result<(), RelayError> {
        match message {
            ClientMessage::JoinRoom { room_id } => {
                let code = RoomCode::parse(&room_id)?;
                self.rooms().join(session, code).await;
            }
            ClientMessage::CreateRoom {} => {
                self.rooms().create(session).await;
            }
            ClientMessage::LeaveRoom {} => {
                self.rooms().leave(&session.id, session.connection.id()).await;
            }
            ClientMessage::PoseData { data } => {
                if !self.limiter().admit(&session.id, MessageClass::Stream) {
                    return Err(RelayError::Overload);
                }
                let frame = ServerMessage::pose(session.id.clone(), session.device, data);
                if self
                    .rooms()
                    .broadcast_from_member(&session.id, &frame)
                    .await
                    .is_none()
                {
                    tracing::debug!(session_id = %session.id, "Pose frame from session outside any room");
                }
            }
            ClientMessage::DeviceRegister { capabilities } => {
                self.sessions()
                    .set_capabilities(&session.id, capabilities.clone());
                tracing::info!(session_id = %session.id, "Device capabilities registered");
                self.send(
                    session,
                    &ServerMessage::DeviceRegistered {
                        session_id: session.id.clone(),
                        capabilities,
                        timestamp: now_millis(),
                    },
                );
            }
            ClientMessage::Ping { timestamp } => {
                self.send(
                    session,
                    &ServerMessage::Pong {
                        timestamp: now_millis(),
                        client_timestamp: timestamp,
                    },
                );
            }
            ClientMessage::GetStats {} => {
                let stats = self.stats().await;
                self.send(session, &stats);
            }
            ClientMessage::RoomList {} => {
                let rooms = self.rooms().room_list().await;
                self.send(
                    session,
                    &ServerMessage::RoomList {
                        rooms,
                        timestamp: now_millis(),
                    },
                );
            }
            ClientMessage::SyncRequest { target, payload } => {
                self.forward_sync(session, target, payload).await?;
            }
            ClientMessage::Unknown => {
                return Err(ProtocolError::UnknownType("unknown".into()).into());
            }
        }
        Ok(())
    }

    async fn forward_sync(
        &self,
        session: &SessionHandle,
        target: Option<String>,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), RelayError> {
        let Some(raw_target) = target else {
            let message = ServerMessage::forwarded_sync(session.id.clone(), None, payload);
            return match self.rooms().broadcast_from_member(&session.id, &message).await {
                Some(_) => Ok(()),
                None => Err(RelayError::NotInRoom),
            };
        };

        let target_id = SessionId::from_requested(&raw_target).ok_or_else(|| {
            ProtocolError::invalid("sync_request", "targetSessionId must be a non-empty id")
        })?;
        let connection = self
            .sessions()
            .open_connection(&target_id)
            .ok_or_else(|| RelayError::TargetNotFound(target_id.clone()))?;

        let message = ServerMessage::forwarded_sync(session.id.clone(), Some(raw_target), payload);
        match self.broadcaster().send_to(&connection, &message) {
            Delivery::Closed => Err(RelayError::TargetNotFound(target_id)),
            Delivery::Sent | Delivery::Backlogged => Ok(()),
        }
    }

    /// Log a failure and answer the peer when the failure kind calls for it
    pub(crate) fn report(&self, session: &SessionHandle, err: RelayError) {
        match &err {
            RelayError::Overload => {
                self.metrics().message_dropped();
                return;
            }
            RelayError::Transport(reason) => {
                tracing::debug!(session_id = %session.id, reason = %reason, "Transport error");
                return;
            }
            RelayError::Protocol(e) => {
                self.metrics().protocol_error();
                tracing::warn!(session_id = %session.id, error = %e, "Protocol error");
            }
            RelayError::TargetNotFound(_) | RelayError::NotInRoom => {
                tracing::warn!(session_id = %session.id, error = %err, "Request could not be delivered");
            }
        }

        if let Some(message) = err.reply_message() {
            self.send(session, &ServerMessage::error(message));
        }
    }
}
