use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::ServerMsg;

pub type ConnId = Uuid;
/// Bounded outbound queue of one connection; holds serialized frames.
pub type Mailbox = mpsc::Sender<String>;

pub fn room_name(event_id: &str) -> String { format!("event:{event_id}") }

struct Peer {
    mailbox: Mailbox,
    rooms:   HashSet<String>,
}

/* ------------ 連線池 + 房間表 ------------ */
/// Connection pool and room membership. Fan-out is fire-and-forget:
/// a full mailbox loses the frame, a closed one is evicted from every room.
#[derive(Default)]
pub struct Bus {
    peers: HashMap<ConnId, Peer>,
    rooms: HashMap<String, HashSet<ConnId>>,
}

impl Bus {
    pub fn new() -> Self { Self::default() }

    pub fn register(&mut self, conn: ConnId, mailbox: Mailbox) {
        self.peers.insert(conn, Peer { mailbox, rooms: HashSet::new() });
    }

    /// Forgets the connection and returns the event ids of the rooms it was in.
    pub fn unregister(&mut self, conn: ConnId) -> Vec<String> {
        let Some(peer) = self.peers.remove(&conn) else { return Vec::new() };
        let mut events = Vec::with_capacity(peer.rooms.len());
        for room in peer.rooms {
            self.drop_member(&room, conn);
            if let Some(ev) = room.strip_prefix("event:") { events.push(ev.to_owned()); }
        }
        events
    }

    /// Returns false for an unknown (already gone) connection.
    pub fn join_room(&mut self, conn: ConnId, event_id: &str) -> bool {
        let Some(peer) = self.peers.get_mut(&conn) else { return false };
        let room = room_name(event_id);
        peer.rooms.insert(room.clone());
        self.rooms.entry(room).or_default().insert(conn);
        true
    }

    pub fn leave_room(&mut self, conn: ConnId, event_id: &str) {
        let room = room_name(event_id);
        if let Some(peer) = self.peers.get_mut(&conn) {
            peer.rooms.remove(&room);
        }
        self.drop_member(&room, conn);
    }

    /// Delivers `msg` to every member of the event's room, sender included.
    /// Returns how many mailboxes accepted the frame.
    pub fn broadcast(&mut self, event_id: &str, msg: &ServerMsg) -> usize {
        let room = room_name(event_id);
        let Some(members) = self.rooms.get(&room) else { return 0 };
        let text = match serde_json::to_string(msg) {
            Ok(t) => t,
            Err(e) => { warn!("encode {}: {e}", msg.kind()); return 0; }
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for conn in members {
            let Some(peer) = self.peers.get(conn) else { continue };
            match peer.mailbox.try_send(text.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => warn!(%conn, "mailbox full, dropped {}", msg.kind()),
                Err(TrySendError::Closed(_)) => closed.push(*conn),
            }
        }
        for conn in closed { self.evict(conn); }
        debug!(%room, kind = msg.kind(), delivered, "broadcast");
        delivered
    }

    /// Single-recipient reply, bypasses the rooms.
    pub fn direct_reply(&mut self, conn: ConnId, msg: &ServerMsg) -> bool {
        let Some(peer) = self.peers.get(&conn) else { return false };
        let Ok(text) = serde_json::to_string(msg) else { return false };
        match peer.mailbox.try_send(text) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => { warn!(%conn, "mailbox full, dropped {}", msg.kind()); false }
            Err(TrySendError::Closed(_)) => { self.evict(conn); false }
        }
    }

    #[cfg(test)]
    pub fn room_size(&self, event_id: &str) -> usize {
        self.rooms.get(&room_name(event_id)).map_or(0, HashSet::len)
    }

    #[cfg(test)]
    pub fn in_room(&self, conn: ConnId, event_id: &str) -> bool {
        self.rooms.get(&room_name(event_id)).is_some_and(|m| m.contains(&conn))
    }

    pub fn rooms(&self) -> usize { self.rooms.len() }
    pub fn connections(&self) -> usize { self.peers.len() }

    pub fn clear(&mut self) {
        self.rooms.clear();
        self.peers.clear();
    }

    /// Closed mailbox: stop routing to it but keep the peer until its
    /// connection task reports the disconnect.
    fn evict(&mut self, conn: ConnId) {
        let Some(peer) = self.peers.get_mut(&conn) else { return };
        let rooms: Vec<String> = peer.rooms.drain().collect();
        for room in rooms { self.drop_member(&room, conn); }
        debug!(%conn, "evicted closed connection");
    }

    fn drop_member(&mut self, room: &str, conn: ConnId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&conn);
            if members.is_empty() { self.rooms.remove(room); }
        }
    }
}
