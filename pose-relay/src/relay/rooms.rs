//! Room directory
//!
//! Maps room codes to their ordered member lists. A room exists exactly while
//! it has members: the first join creates it and the last leave deletes it.
//! A session is in at most one room.
//!
//! All mutations and every room-scoped broadcast run under one lock, and the
//! notifications a mutation causes are queued before the lock is released.
//! Recipients therefore observe `participant_joined`, `participant_left` and
//! `pairing_success` in the same order the directory changed.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::ids::{RoomCode, SessionId, MAX_ROOM_CODE_LEN};
use crate::relay::broadcast::Broadcaster;
use crate::relay::connection::{ConnectionId, SessionHandle};
use crate::relay::protocol::{now_millis, Participant, ServerMessage};
use crate::relay::DeviceClass;

const MINT_ATTEMPTS: usize = 16;

/// The two complementary device classes whose co-presence pairs a room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingRule {
    pub capture: DeviceClass,
    pub display: DeviceClass,
}

impl Default for PairingRule {
    fn default() -> Self {
        Self {
            capture: DeviceClass::Mobile,
            display: DeviceClass::Vr,
        }
    }
}

impl PairingRule {
    fn satisfied(&self, members: &[RoomMember]) -> bool {
        let has = |class| members.iter().any(|m| m.session.device == class);
        has(self.capture) && has(self.display)
    }

    /// Capture class first, then display, then the rest in declaration order
    fn sort(&self, devices: &mut [DeviceClass]) {
        devices.sort_by_key(|&class| {
            let rank = if class == self.capture {
                0
            } else if class == self.display {
                1
            } else {
                2
            };
            (rank, class)
        });
    }
}

/// Which reply the joiner receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinReply {
    Joined,
    Created,
}

#[derive(Debug, Clone)]
struct RoomMember {
    session: SessionHandle,
    joined_at: DateTime<Utc>,
}

impl RoomMember {
    fn participant(&self) -> Participant {
        Participant {
            session_id: self.session.id.clone(),
            device_type: self.session.device,
            joined_at: self.joined_at.timestamp_millis(),
        }
    }
}

#[derive(Debug)]
struct Room {
    code: RoomCode,
    created_at: DateTime<Utc>,
    members: Vec<RoomMember>,
}

impl Room {
    fn new(code: RoomCode) -> Self {
        Self {
            code,
            created_at: Utc::now(),
            members: Vec::new(),
        }
    }

    fn sessions(&self) -> impl Iterator<Item = &SessionHandle> {
        self.members.iter().map(|m| &m.session)
    }

    fn participants(&self) -> Vec<Participant> {
        self.members.iter().map(RoomMember::participant).collect()
    }

    /// Distinct device classes, ordered by the pairing rule
    fn devices(&self, pairing: &PairingRule) -> Vec<DeviceClass> {
        let mut devices = Vec::new();
        for member in &self.members {
            if !devices.contains(&member.session.device) {
                devices.push(member.session.device);
            }
        }
        pairing.sort(&mut devices);
        devices
    }

    fn summary(&self, pairing: &PairingRule) -> RoomSummary {
        RoomSummary {
            room_id: self.code.clone(),
            participant_count: self.members.len(),
            devices: self.devices(pairing),
            created_at: self.created_at.timestamp_millis(),
        }
    }
}

/// Read-only view of a room for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: RoomCode,
    pub participant_count: usize,
    pub devices: Vec<DeviceClass>,
    pub created_at: i64,
}

/// What a join did
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub room: RoomCode,
    pub created_at: DateTime<Utc>,
    /// Members other than the joiner, in join order
    pub others: Vec<Participant>,
    /// The room did not exist before this join
    pub created: bool,
    /// Room the session was moved out of
    pub previous_room: Option<RoomCode>,
    /// This join completed a capture/display pair
    pub paired: bool,
}

/// What a leave did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub room: RoomCode,
    pub remaining: usize,
    pub room_closed: bool,
}

#[derive(Debug, Default)]
struct DirectoryState {
    rooms: HashMap<RoomCode, Room>,
    memberships: HashMap<SessionId, RoomCode>,
}

/// Room code → members, plus the reverse index
#[derive(Debug)]
pub struct RoomDirectory {
    state: Mutex<DirectoryState>,
    broadcaster: Broadcaster,
    pairing: PairingRule,
    code_length: usize,
}

impl RoomDirectory {
    pub fn new(broadcaster: Broadcaster, pairing: PairingRule, code_length: usize) -> Self {
        Self {
            state: Mutex::new(DirectoryState::default()),
            broadcaster,
            pairing,
            code_length: code_length.max(1),
        }
    }

    /// Join `code`, leaving any other room first
    pub async fn join(&self, member: &SessionHandle, code: RoomCode) -> JoinOutcome {
        let mut state = self.state.lock().await;
        self.join_locked(&mut state, member, code, JoinReply::Joined)
    }

    /// Mint an unused code and join it; the joiner gets `room_created`
    pub async fn create(&self, member: &SessionHandle) -> JoinOutcome {
        let mut state = self.state.lock().await;
        let code = Self::mint_unique(&state.rooms, self.code_length);
        self.join_locked(&mut state, member, code, JoinReply::Created)
    }

    /// Random code not used by any live room. The length grows when a
    /// short code space is saturated.
    fn mint_unique(rooms: &HashMap<RoomCode, Room>, length: usize) -> RoomCode {
        let mut length = length.clamp(1, MAX_ROOM_CODE_LEN);
        loop {
            for _ in 0..MINT_ATTEMPTS {
                let candidate = RoomCode::random(length);
                if !rooms.contains_key(&candidate) {
                    return candidate;
                }
            }
            length = (length + 1).min(MAX_ROOM_CODE_LEN);
        }
    }

    fn join_locked(
        &self,
        state: &mut DirectoryState,
        member: &SessionHandle,
        code: RoomCode,
        reply: JoinReply,
    ) -> JoinOutcome {
        let previous = state.memberships.get(&member.id).cloned();

        let previous_room = match previous {
            Some(current) if current == code => None,
            Some(current) => {
                self.remove_member(state, &current, &member.id, None);
                Some(current)
            }
            None => None,
        };

        let created = !state.rooms.contains_key(&code);
        let room = state
            .rooms
            .entry(code.clone())
            .or_insert_with(|| Room::new(code.clone()));

        let rejoin = room.members.iter().position(|m| m.session.id == member.id);
        let was_paired = self.pairing.satisfied(&room.members);

        let (joined_at, others) = match rejoin {
            // Same room again: refresh the connection, announce nothing new.
            Some(index) => {
                room.members[index].session = member.clone();
                let others = room
                    .members
                    .iter()
                    .filter(|m| m.session.id != member.id)
                    .map(RoomMember::participant)
                    .collect();
                (room.members[index].joined_at, others)
            }
            None => {
                let others = room.participants();
                let joined_at = Utc::now();
                room.members.push(RoomMember {
                    session: member.clone(),
                    joined_at,
                });
                (joined_at, others)
            }
        };
        state.memberships.insert(member.id.clone(), code.clone());

        let timestamp = now_millis();
        if rejoin.is_none() {
            let announcement = ServerMessage::ParticipantJoined {
                room_id: code.clone(),
                participant: Participant {
                    session_id: member.id.clone(),
                    device_type: member.device,
                    joined_at: joined_at.timestamp_millis(),
                },
                timestamp,
            };
            self.broadcaster
                .fan_out(room.sessions(), &announcement, Some(&member.id));
        }

        let created_at = room.created_at;
        let confirmation = match reply {
            JoinReply::Joined => ServerMessage::RoomJoined {
                room_id: code.clone(),
                participants: others.clone(),
                created_at: created_at.timestamp_millis(),
                timestamp,
            },
            JoinReply::Created => ServerMessage::RoomCreated {
                room_id: code.clone(),
                participants: others.clone(),
                created_at: created_at.timestamp_millis(),
                timestamp,
            },
        };
        self.broadcaster.send_to(&member.connection, &confirmation);

        let paired = !was_paired && self.pairing.satisfied(&room.members);
        if paired {
            let success = ServerMessage::PairingSuccess {
                room_id: code.clone(),
                devices: room.devices(&self.pairing),
                participants: room.participants(),
                timestamp,
            };
            self.broadcaster.fan_out(room.sessions(), &success, None);
            tracing::info!(
                room = %code,
                devices = ?room.devices(&self.pairing),
                "Room paired"
            );
        }

        tracing::info!(
            room = %code,
            session_id = %member.id,
            device = %member.device,
            member_count = room.members.len(),
            created,
            "Member joined room"
        );

        JoinOutcome {
            room: code,
            created_at,
            others,
            created,
            previous_room,
            paired,
        }
    }

    /// Remove `id` from `code`, notify the rest, drop the room if empty.
    ///
    /// With `connection` set, only a member on that connection is removed.
    fn remove_member(
        &self,
        state: &mut DirectoryState,
        code: &RoomCode,
        id: &SessionId,
        connection: Option<ConnectionId>,
    ) -> Option<LeaveOutcome> {
        let room = state.rooms.get_mut(code)?;
        let index = room.members.iter().position(|m| {
            m.session.id == *id && connection.map_or(true, |c| m.session.connection.id() == c)
        })?;
        let departed = room.members.remove(index);
        state.memberships.remove(id);

        let notice = ServerMessage::ParticipantLeft {
            room_id: code.clone(),
            session_id: departed.session.id.clone(),
            device_type: departed.session.device,
            timestamp: now_millis(),
        };
        self.broadcaster.fan_out(room.sessions(), &notice, None);

        let remaining = room.members.len();
        let room_closed = remaining == 0;
        if room_closed {
            state.rooms.remove(code);
            tracing::info!(room = %code, "Room closed");
        }

        tracing::info!(
            room = %code,
            session_id = %id,
            member_count = remaining,
            "Member left room"
        );

        Some(LeaveOutcome {
            room: code.clone(),
            remaining,
            room_closed,
        })
    }

    /// Leave the current room; `None` if the session (on this connection) is in none
    pub async fn leave(&self, id: &SessionId, connection: ConnectionId) -> Option<LeaveOutcome> {
        let mut state = self.state.lock().await;
        let code = state.memberships.get(id)?.clone();
        self.remove_member(&mut state, &code, id, Some(connection))
    }

    /// Send to every open member of `code` except `exclude`
    pub async fn broadcast(
        &self,
        code: &RoomCode,
        message: &ServerMessage,
        exclude: Option<&SessionId>,
    ) -> Option<usize> {
        let state = self.state.lock().await;
        let room = state.rooms.get(code)?;
        Some(self.broadcaster.fan_out(room.sessions(), message, exclude))
    }

    /// Send to the rest of `sender`'s room; `None` if it is in no room
    pub async fn broadcast_from_member(
        &self,
        sender: &SessionId,
        message: &ServerMessage,
    ) -> Option<usize> {
        let state = self.state.lock().await;
        let room = state
            .memberships
            .get(sender)
            .and_then(|code| state.rooms.get(code))?;
        Some(self.broadcaster.fan_out(room.sessions(), message, Some(sender)))
    }

    pub async fn room_of(&self, id: &SessionId) -> Option<RoomCode> {
        self.state.lock().await.memberships.get(id).cloned()
    }

    pub async fn summary(&self, code: &RoomCode) -> Option<RoomSummary> {
        self.state
            .lock()
            .await
            .rooms
            .get(code)
            .map(|room| room.summary(&self.pairing))
    }

    /// All rooms, oldest first
    pub async fn room_list(&self) -> Vec<RoomSummary> {
        let state = self.state.lock().await;
        let mut rooms: Vec<RoomSummary> = state
            .rooms
            .values()
            .map(|room| room.summary(&self.pairing))
            .collect();
        rooms.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.room_id.cmp(&b.room_id))
        });
        rooms
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.rooms.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::relay::connection::ConnectionHandle;
    use axum::extract::ws::Message;
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Peer {
        handle: SessionHandle,
        rx: mpsc::Receiver<Message>,
    }

    impl Peer {
        fn new(name: &str, device: DeviceClass) -> Self {
            let (connection, rx) = ConnectionHandle::channel(32);
            Self {
                handle: SessionHandle {
                    id: SessionId::from_requested(name).unwrap(),
                    device,
                    connection,
                },
                rx,
            }
        }

        fn drain(&mut self) -> Vec<Value> {
            let mut frames = Vec::new();
            while let Ok(Message::Text(text)) = self.rx.try_recv() {
                frames.push(serde_json::from_str(text.as_str()).unwrap());
            }
            frames
        }

        fn kinds(&mut self) -> Vec<String> {
            self.drain()
                .into_iter()
                .map(|v| v["type"].as_str().unwrap().to_string())
                .collect()
        }
    }

    fn directory() -> RoomDirectory {
        RoomDirectory::new(
            Broadcaster::new(Arc::new(Metrics::new())),
            PairingRule::default(),
            6,
        )
    }

    fn code(raw: &str) -> RoomCode {
        RoomCode::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_first_join_creates_room() {
        let dir = directory();
        let mut a = Peer::new("a", DeviceClass::Mobile);

        let outcome = dir.join(&a.handle, code("AB12CD")).await;

        assert!(outcome.created);
        assert!(outcome.others.is_empty());
        assert_eq!(dir.len().await, 1);
        let frames = a.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "room_joined");
        assert_eq!(frames[0]["roomId"], "AB12CD");
    }

    #[tokio::test]
    async fn test_join_reports_others_and_notifies_them() {
        let dir = directory();
        let mut a = Peer::new("a", DeviceClass::Desktop);
        let mut b = Peer::new("b", DeviceClass::Desktop);
        dir.join(&a.handle, code("ROOM")).await;
        a.drain();

        let outcome = dir.join(&b.handle, code("ROOM")).await;

        assert!(!outcome.created);
        assert_eq!(outcome.others.len(), 1);
        assert_eq!(outcome.others[0].session_id.as_str(), "a");
        let to_a = a.drain();
        assert_eq!(to_a.len(), 1);
        assert_eq!(to_a[0]["type"], "participant_joined");
        assert_eq!(to_a[0]["participant"]["sessionId"], "b");
        let to_b = b.drain();
        assert_eq!(to_b[0]["type"], "room_joined");
        assert_eq!(to_b[0]["participants"][0]["sessionId"], "a");
    }

    #[tokio::test]
    async fn test_last_leave_deletes_room() {
        let dir = directory();
        let a = Peer::new("a", DeviceClass::Mobile);
        let mut b = Peer::new("b", DeviceClass::Mobile);
        dir.join(&a.handle, code("X1")).await;
        dir.join(&b.handle, code("X1")).await;
        b.drain();

        let first = dir.leave(&a.handle.id, a.handle.connection.id()).await.unwrap();
        assert_eq!(first.remaining, 1);
        assert!(!first.room_closed);
        assert_eq!(b.kinds(), vec!["participant_left"]);

        let second = dir.leave(&b.handle.id, b.handle.connection.id()).await.unwrap();
        assert!(second.room_closed);
        assert_eq!(dir.len().await, 0);
        assert!(dir.summary(&code("X1")).await.is_none());
    }

    #[tokio::test]
    async fn test_leave_without_room_is_noop() {
        let dir = directory();
        let a = Peer::new("a", DeviceClass::Mobile);
        assert!(dir.leave(&a.handle.id, a.handle.connection.id()).await.is_none());
    }

    #[tokio::test]
    async fn test_leave_from_stale_connection_is_ignored() {
        let dir = directory();
        let a = Peer::new("a", DeviceClass::Mobile);
        dir.join(&a.handle, code("X1")).await;

        assert!(dir.leave(&a.handle.id, ConnectionId::new()).await.is_none());
        assert_eq!(dir.room_of(&a.handle.id).await, Some(code("X1")));
    }

    #[tokio::test]
    async fn test_switching_rooms_moves_membership() {
        let dir = directory();
        let a = Peer::new("a", DeviceClass::Mobile);
        let mut b = Peer::new("b", DeviceClass::Mobile);
        dir.join(&a.handle, code("ONE")).await;
        dir.join(&b.handle, code("ONE")).await;
        b.drain();

        let outcome = dir.join(&a.handle, code("TWO")).await;

        assert_eq!(outcome.previous_room, Some(code("ONE")));
        assert_eq!(dir.room_of(&a.handle.id).await, Some(code("TWO")));
        assert_eq!(dir.summary(&code("ONE")).await.unwrap().participant_count, 1);
        assert_eq!(b.kinds(), vec!["participant_left"]);
    }

    #[tokio::test]
    async fn test_switching_out_of_sole_room_deletes_it() {
        let dir = directory();
        let a = Peer::new("a", DeviceClass::Mobile);
        dir.join(&a.handle, code("ONE")).await;
        dir.join(&a.handle, code("TWO")).await;

        assert!(dir.summary(&code("ONE")).await.is_none());
        assert_eq!(dir.len().await, 1);
    }

    #[tokio::test]
    async fn test_rejoining_same_room_is_idempotent() {
        let dir = directory();
        let a = Peer::new("a", DeviceClass::Mobile);
        let mut b = Peer::new("b", DeviceClass::Vr);
        dir.join(&a.handle, code("SAME")).await;
        dir.join(&b.handle, code("SAME")).await;
        b.drain();

        let outcome = dir.join(&a.handle, code("SAME")).await;

        assert!(outcome.previous_room.is_none());
        assert!(!outcome.paired);
        assert_eq!(outcome.others.len(), 1);
        assert_eq!(dir.summary(&code("SAME")).await.unwrap().participant_count, 2);
        assert!(b.drain().is_empty());
    }

    #[tokio::test]
    async fn test_pairing_fires_once() {
        let dir = directory();
        let mut a = Peer::new("a", DeviceClass::Mobile);
        let mut b = Peer::new("b", DeviceClass::Vr);
        let mut c = Peer::new("c", DeviceClass::Mobile);

        let first = dir.join(&a.handle, code("AB12CD")).await;
        assert!(!first.paired);
        a.drain();

        let second = dir.join(&b.handle, code("AB12CD")).await;
        assert!(second.paired);

        let to_a = a.drain();
        let to_b = b.drain();
        let pairing_a: Vec<_> = to_a.iter().filter(|v| v["type"] == "pairing_success").collect();
        let pairing_b: Vec<_> = to_b.iter().filter(|v| v["type"] == "pairing_success").collect();
        assert_eq!(pairing_a.len(), 1);
        assert_eq!(pairing_b.len(), 1);
        assert_eq!(pairing_a[0]["devices"], serde_json::json!(["mobile", "vr"]));
        // joiner hears about the room before the pairing
        assert_eq!(to_b[0]["type"], "room_joined");

        let third = dir.join(&c.handle, code("AB12CD")).await;
        assert!(!third.paired);
        assert!(!a.kinds().contains(&"pairing_success".to_string()));
        assert!(!c.kinds().contains(&"pairing_success".to_string()));
    }

    #[tokio::test]
    async fn test_pairing_devices_follow_rule_not_join_order() {
        let dir = directory();
        let mut display = Peer::new("display", DeviceClass::Vr);
        let mut desktop = Peer::new("desktop", DeviceClass::Desktop);
        let mut capture = Peer::new("capture", DeviceClass::Mobile);

        dir.join(&display.handle, code("VR1ST0")).await;
        dir.join(&desktop.handle, code("VR1ST0")).await;
        display.drain();
        desktop.drain();

        let outcome = dir.join(&capture.handle, code("VR1ST0")).await;
        assert!(outcome.paired);

        for peer in [&mut display, &mut desktop, &mut capture] {
            let pairing: Vec<_> = peer
                .drain()
                .into_iter()
                .filter(|v| v["type"] == "pairing_success")
                .collect();
            assert_eq!(pairing.len(), 1);
            assert_eq!(
                pairing[0]["devices"],
                serde_json::json!(["mobile", "vr", "desktop"])
            );
        }

        let summary = dir.summary(&code("VR1ST0")).await.unwrap();
        assert_eq!(
            summary.devices,
            vec![DeviceClass::Mobile, DeviceClass::Vr, DeviceClass::Desktop]
        );
    }

    #[tokio::test]
    async fn test_pairing_refires_after_pair_is_broken_and_restored() {
        let dir = directory();
        let a = Peer::new("a", DeviceClass::Mobile);
        let b = Peer::new("b", DeviceClass::Vr);
        let b2 = Peer::new("b2", DeviceClass::Vr);

        dir.join(&a.handle, code("P")).await;
        assert!(dir.join(&b.handle, code("P")).await.paired);
        dir.leave(&b.handle.id, b.handle.connection.id()).await;
        assert!(dir.join(&b2.handle, code("P")).await.paired);
    }

    #[tokio::test]
    async fn test_create_mints_fresh_code() {
        let dir = directory();
        let mut a = Peer::new("a", DeviceClass::Mobile);

        let outcome = dir.create(&a.handle).await;

        assert!(outcome.created);
        assert_eq!(outcome.room.as_str().len(), 6);
        let frames = a.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "room_created");
        assert_eq!(frames[0]["roomId"], outcome.room.as_str());
    }

    #[tokio::test]
    async fn test_create_grows_code_when_space_is_full() {
        let dir = RoomDirectory::new(
            Broadcaster::new(Arc::new(Metrics::new())),
            PairingRule::default(),
            1,
        );

        // 36 one-character codes exist; the rest must be longer
        let mut codes = std::collections::HashSet::new();
        for i in 0..50 {
            let peer = Peer::new(&format!("p{i}"), DeviceClass::Mobile);
            codes.insert(dir.create(&peer.handle).await.room);
        }

        assert_eq!(codes.len(), 50);
        assert_eq!(dir.len().await, 50);
        assert!(codes.iter().any(|c| c.as_str().len() > 1));
    }

    #[tokio::test]
    async fn test_broadcast_from_member_excludes_sender() {
        let dir = directory();
        let mut a = Peer::new("a", DeviceClass::Mobile);
        let mut b = Peer::new("b", DeviceClass::Vr);
        dir.join(&a.handle, code("R")).await;
        dir.join(&b.handle, code("R")).await;
        a.drain();
        b.drain();

        let sent = dir
            .broadcast_from_member(&a.handle.id, &ServerMessage::error("frame"))
            .await;

        assert_eq!(sent, Some(1));
        assert!(a.drain().is_empty());
        assert_eq!(b.kinds(), vec!["error"]);
    }

    #[tokio::test]
    async fn test_broadcast_from_roomless_member() {
        let dir = directory();
        let a = Peer::new("a", DeviceClass::Mobile);
        assert!(dir
            .broadcast_from_member(&a.handle.id, &ServerMessage::error("x"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_broadcast_to_room_by_code() {
        let dir = directory();
        let mut a = Peer::new("a", DeviceClass::Mobile);
        dir.join(&a.handle, code("R")).await;
        a.drain();

        assert_eq!(dir.broadcast(&code("R"), &ServerMessage::error("all"), None).await, Some(1));
        assert_eq!(a.kinds(), vec!["error"]);
        assert!(dir
            .broadcast(&code("NOPE"), &ServerMessage::error("x"), None)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_room_list_summaries() {
        let dir = directory();
        let a = Peer::new("a", DeviceClass::Mobile);
        let b = Peer::new("b", DeviceClass::Vr);
        let c = Peer::new("c", DeviceClass::Desktop);
        dir.join(&a.handle, code("R1")).await;
        dir.join(&b.handle, code("R1")).await;
        dir.join(&c.handle, code("R2")).await;

        let rooms = dir.room_list().await;
        assert_eq!(rooms.len(), 2);
        let r1 = rooms.iter().find(|r| r.room_id == code("R1")).unwrap();
        assert_eq!(r1.participant_count, 2);
        assert_eq!(r1.devices, vec![DeviceClass::Mobile, DeviceClass::Vr]);
    }

    #[tokio::test]
    async fn test_room_exists_iff_members_under_churn() {
        let dir = directory();
        let peers: Vec<Peer> = (0..6)
            .map(|i| Peer::new(&format!("p{i}"), DeviceClass::Desktop))
            .collect();
        let codes = [code("A"), code("B"), code("C")];

        for round in 0..30usize {
            let peer = &peers[round % peers.len()].handle;
            if round % 4 == 3 {
                dir.leave(&peer.id, peer.connection.id()).await;
            } else {
                dir.join(peer, codes[round % codes.len()].clone()).await;
            }

            for summary in dir.room_list().await {
                assert!(summary.participant_count > 0);
            }
            let mut members = 0;
            for peer in &peers {
                if dir.room_of(&peer.handle.id).await.is_some() {
                    members += 1;
                }
            }
            let counted: usize = dir
                .room_list()
                .await
                .iter()
                .map(|r| r.participant_count)
                .sum();
            assert_eq!(members, counted);
        }
    }
}
