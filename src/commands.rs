//! Inbound command handling. Runs on the hub task only.
use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::{info, warn};

use crate::{
    config::AdminPolicy,
    protocol::{ClientMsg, ServerMsg},
    state::{bus::{Bus, ConnId, Mailbox}, presence::PresenceRegistry},
    store::{FlashLog, FlashRecord},
    utils::jwt::Caller,
};

/// (eventId, userId) a connection has joined as.
type Membership = (String, String);

struct Session {
    caller: Caller,
    joined: HashSet<Membership>,
}

/// Presence, bus and per-connection bookkeeping behind the command table.
pub struct Dispatcher {
    presence:  PresenceRegistry,
    bus:       Bus,
    sessions:  HashMap<ConnId, Session>,
    policy:    AdminPolicy,
    flash_log: Option<FlashLog>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct Stats {
    pub rooms:       usize,
    pub connections: usize,
    pub events:      usize,
}

impl Dispatcher {
    pub fn new(policy: AdminPolicy, flash_log: Option<FlashLog>) -> Self {
        Self {
            presence: PresenceRegistry::new(),
            bus: Bus::new(),
            sessions: HashMap::new(),
            policy,
            flash_log,
        }
    }

    pub fn connect(&mut self, conn: ConnId, caller: Caller, mailbox: Mailbox) {
        self.bus.register(conn, mailbox);
        self.sessions.insert(conn, Session { caller, joined: HashSet::new() });
    }

    /// Implicit leave from every room the connection joined.
    pub fn disconnect(&mut self, conn: ConnId) {
        self.bus.unregister(conn);
        let Some(session) = self.sessions.remove(&conn) else { return };

        let mut touched: HashSet<String> = HashSet::new();
        for (event_id, user_id) in session.joined {
            // another device of the same user keeps them present
            let still_held = self.sessions.values()
                .any(|s| s.joined.contains(&(event_id.clone(), user_id.clone())));
            if !still_held {
                let left = self.presence.leave(&event_id, &user_id);
                info!("user {user_id} dropped from event {event_id} on disconnect. Active: {left}");
            }
            touched.insert(event_id);
        }
        for event_id in touched {
            self.broadcast_count(&event_id);
        }
    }

    pub fn handle(&mut self, conn: ConnId, msg: ClientMsg) {
        let Some(session) = self.sessions.get(&conn) else {
            warn!(%conn, "command from unknown connection");
            return;
        };
        if msg.is_admin_only() && self.policy == AdminPolicy::Enforce && !session.caller.is_admin() {
            warn!(%conn, user = ?session.caller.user_id, "refused admin command for event {}", msg.event_id());
            self.bus.direct_reply(conn, &ServerMsg::Error { message: "admin role required".into() });
            return;
        }

        match msg {
            ClientMsg::JoinEvent { event_id, user_id, session_id } => {
                self.bus.join_room(conn, &event_id);
                let count = self.presence.join(&event_id, &user_id);
                if let Some(s) = self.sessions.get_mut(&conn) {
                    s.joined.insert((event_id.clone(), user_id.clone()));
                }
                info!("user {user_id} ({conn}, session {session_id}) joined event {event_id}. Active: {count}");
                self.bus.broadcast(&event_id, &ServerMsg::AttendeeCountUpdate { event_id: event_id.clone(), count });
            }
            ClientMsg::LeaveEvent { event_id, user_id } => {
                self.bus.leave_room(conn, &event_id);
                let count = self.presence.leave(&event_id, &user_id);
                if let Some(s) = self.sessions.get_mut(&conn) {
                    s.joined.remove(&(event_id.clone(), user_id.clone()));
                }
                info!("user {user_id} left event {event_id}. Active: {count}");
                self.bus.broadcast(&event_id, &ServerMsg::AttendeeCountUpdate { event_id: event_id.clone(), count });
            }
            ClientMsg::TriggerFlash { event_id, color, duration, pattern } => {
                info!("triggering flash for event {event_id}: {color} for {duration}ms");
                self.log_flash(conn, &event_id, &color, duration, pattern.clone());
                let flash = ServerMsg::Flash { color, duration, pattern, timestamp: now_ms() };
                self.bus.broadcast(&event_id, &flash);
            }
            ClientMsg::UpdateFlashSettings { event_id, flash_interval, flash_enabled, colors } => {
                info!("updating flash settings for event {event_id}");
                self.bus.broadcast(&event_id, &ServerMsg::FlashSettingsUpdated { flash_interval, flash_enabled, colors });
            }
            ClientMsg::SendEventNotification { event_id, title, body } => {
                info!("sending notification for event {event_id}");
                let note = ServerMsg::Notification { title, body, event_id: event_id.clone(), timestamp: now_ms() };
                self.bus.broadcast(&event_id, &note);
            }
            ClientMsg::GetActiveCount { event_id } => {
                let count = self.presence.count(&event_id);
                self.bus.direct_reply(conn, &ServerMsg::ActiveCount { event_id, count });
            }
        }
    }

    pub fn count(&self, event_id: &str) -> usize { self.presence.count(event_id) }

    pub fn stats(&self) -> Stats {
        Stats {
            rooms:       self.bus.rooms(),
            connections: self.bus.connections(),
            events:      self.presence.events(),
        }
    }

    /// Shutdown: forget every connection, room and presence entry.
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.bus.clear();
        self.presence.clear();
    }

    fn broadcast_count(&mut self, event_id: &str) {
        let count = self.presence.count(event_id);
        self.bus.broadcast(event_id, &ServerMsg::AttendeeCountUpdate { event_id: event_id.into(), count });
    }

    /// Fire-and-forget insert; the hub never waits on the database.
    fn log_flash(&self, conn: ConnId, event_id: &str, color: &str, duration: u64, pattern: Option<String>) {
        let Some(log) = self.flash_log.clone() else { return };
        let by = self.sessions.get(&conn).and_then(|s| s.caller.user_id.clone());
        let rec = FlashRecord::now(event_id, by, color, duration, pattern, self.presence.count(event_id));
        tokio::spawn(async move {
            if let Err(e) = log.record(&rec).await {
                warn!("flash log write failed for event {}: {e}", rec.event_id);
            }
        });
    }
}

fn now_ms() -> i64 { Utc::now().timestamp_millis() }
