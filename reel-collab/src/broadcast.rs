//! Per-session fan-out rooms for the relay.
//!
//! Every connection in a session subscribes to the room's broadcast channel.
//! A frame is sent once and each receiver skips the frames it sent itself.
//! Slow receivers lag and lose the oldest frames rather than stalling the room.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::UserInfo;

/// An encoded frame together with the connection that produced it.
#[derive(Debug)]
pub struct RelayFrame {
    pub from: Uuid,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct RoomStats {
    pub frames_sent: u64,
    pub frames_lagged: u64,
    pub members: usize,
}

#[derive(Default)]
struct AtomicRoomStats {
    frames_sent: AtomicU64,
    frames_lagged: AtomicU64,
}

/// A connection in a room. `user` is set once it sends `join_session`.
#[derive(Debug, Clone)]
pub struct Member {
    pub connection_id: Uuid,
    pub user: Option<UserInfo>,
}

/// One collaboration session's room.
pub struct RelayRoom {
    sender: broadcast::Sender<Arc<RelayFrame>>,
    /// Join order.
    members: RwLock<Vec<Member>>,
    stats: AtomicRoomStats,
}

impl RelayRoom {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            members: RwLock::new(Vec::new()),
            stats: AtomicRoomStats::default(),
        }
    }

    /// Add a connection and return its receiver.
    pub async fn join(&self, connection_id: Uuid) -> broadcast::Receiver<Arc<RelayFrame>> {
        let mut members = self.members.write().await;
        members.push(Member {
            connection_id,
            user: None,
        });
        self.sender.subscribe()
    }

    /// Attach a user identity to a connection. Returns `false` for unknown connections.
    pub async fn identify(&self, connection_id: Uuid, user: UserInfo) -> bool {
        let mut members = self.members.write().await;
        match members.iter_mut().find(|m| m.connection_id == connection_id) {
            Some(member) => {
                member.user = Some(user);
                true
            }
            None => false,
        }
    }

    pub async fn leave(&self, connection_id: Uuid) -> Option<Member> {
        let mut members = self.members.write().await;
        let index = members.iter().position(|m| m.connection_id == connection_id)?;
        Some(members.remove(index))
    }

    /// Identified users other than `except`, in join order.
    pub async fn users_except(&self, except: Uuid) -> Vec<UserInfo> {
        self.members
            .read()
            .await
            .iter()
            .filter(|m| m.connection_id != except)
            .filter_map(|m| m.user.clone())
            .collect()
    }

    /// Whether any connection is identified as `user_id`.
    pub async fn has_user(&self, user_id: &str) -> bool {
        self.members
            .read()
            .await
            .iter()
            .any(|m| m.user.as_ref().is_some_and(|u| u.id == user_id))
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    /// Send `text` to every receiver. Returns how many receivers there were.
    pub fn broadcast(&self, from: Uuid, text: String) -> usize {
        let count = self.sender.send(Arc::new(RelayFrame { from, text })).unwrap_or(0);
        self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub fn record_lag(&self, skipped: u64) {
        self.stats.frames_lagged.fetch_add(skipped, Ordering::Relaxed);
    }

    pub async fn stats(&self) -> RoomStats {
        RoomStats {
            frames_sent: self.stats.frames_sent.load(Ordering::Relaxed),
            frames_lagged: self.stats.frames_lagged.load(Ordering::Relaxed),
            members: self.member_count().await,
        }
    }
}

/// Maps session ids to rooms.
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<RelayRoom>>>,
    capacity: usize,
}

impl RoomManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub async fn get_or_create(&self, session_id: &str) -> Arc<RelayRoom> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(session_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        // Another connection may have created it meanwhile.
        if let Some(room) = rooms.get(session_id) {
            return room.clone();
        }
        log::debug!("Opening room for session {session_id}");
        let room = Arc::new(RelayRoom::new(self.capacity));
        rooms.insert(session_id.to_string(), room.clone());
        room
    }

    pub async fn remove_if_empty(&self, session_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(session_id) {
            if room.member_count().await == 0 {
                rooms.remove(session_id);
                log::debug!("Closed empty room for session {session_id}");
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_sessions(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}
