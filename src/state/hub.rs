//! The Hub - central shared state for the collaboration daemon.
//!
//! The Hub holds every project room, the outbound event sender for each
//! connection, and the project registry, all in concurrent maps accessible
//! from any async task. Room maps are keyed by project id so unrelated
//! projects never contend.

use crate::protocol::ServerEvent;
use crate::state::registry::ProjectRegistry;
use crate::state::room::Room;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Connection identifier (one per WebSocket session).
pub type ConnId = String;

/// Central shared state container.
pub struct Hub {
    /// Project rooms, created lazily on first join. Each room is guarded by
    /// its own mutex so room mutation never spans an await point.
    rooms: DashMap<String, Mutex<Room>>,

    /// Connection id -> outbound event sender, for fan-out.
    senders: DashMap<ConnId, mpsc::Sender<ServerEvent>>,

    /// Known projects (roles, live content, current branch).
    pub registry: ProjectRegistry,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            senders: DashMap::new(),
            registry: ProjectRegistry::new(),
        }
    }

    /// Register a connection's outbound sender for routing.
    pub fn register_sender(&self, conn_id: &str, sender: mpsc::Sender<ServerEvent>) {
        self.senders.insert(conn_id.to_string(), sender);
    }

    /// Unregister a connection's sender.
    pub fn unregister_sender(&self, conn_id: &str) {
        self.senders.remove(conn_id);
    }

    /// Run a closure against a project's room, creating it lazily. The room
    /// lock is held only for the duration of the closure; callers collect
    /// whatever snapshots they need and broadcast after it returns.
    pub fn with_room<T>(&self, project_id: &str, f: impl FnOnce(&mut Room) -> T) -> T {
        let entry = self
            .rooms
            .entry(project_id.to_string())
            .or_insert_with(|| Mutex::new(Room::default()));
        let mut room = entry.lock();
        f(&mut room)
    }

    /// Send an event to a single connection.
    pub async fn send_to(&self, conn_id: &str, event: ServerEvent) {
        let sender = self.senders.get(conn_id).map(|s| s.clone());
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    /// Broadcast an event to every member of a project's room, optionally
    /// excluding one connection (usually the sender).
    pub async fn broadcast(&self, project_id: &str, event: ServerEvent, exclude: Option<&str>) {
        // Snapshot recipients first; never hold the room lock across a send.
        let recipients: Vec<mpsc::Sender<ServerEvent>> = {
            let Some(entry) = self.rooms.get(project_id) else {
                return;
            };
            let room = entry.lock();
            room.members
                .keys()
                .filter(|conn| exclude.is_none_or(|e| e != conn.as_str()))
                .filter_map(|conn| self.senders.get(conn).map(|s| s.clone()))
                .collect()
        };
        for sender in recipients {
            let _ = sender.send(event.clone()).await;
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
