#![warn(missing_docs)]

//! Room management for WebSocket connections: named member sets with scoped
//! broadcast. Rooms come into existence on first join and disappear when
//! their last member leaves, emitting typed [`RoomEvent`]s either way.

use crate::websocket::{Connection, Message};
use ahash::AHashMap;
use std::sync::{Arc, Mutex};

/// A room lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// A first member joined a room that did not exist.
    Created {
        /// The room name.
        room: String,
    },
    /// The last member left and the room was dropped.
    Destroyed {
        /// The room name.
        room: String,
    },
}

type Observer = Arc<dyn Fn(&RoomEvent) + Send + Sync>;

/// Tracks room membership for a WebSocket plugin instance.
///
/// All mutation happens on the server's reactor; the internal locks only
/// guard against overlap between connection tasks and the heartbeat.
pub struct RoomManager {
    rooms: Mutex<AHashMap<String, AHashMap<String, Connection>>>,
    observers: Mutex<Vec<Observer>>,
}

impl RoomManager {
    pub(crate) fn new() -> Self {
        Self {
            rooms: Mutex::new(AHashMap::new()),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Registers an observer for room lifecycle events.
    pub fn on_event<F: Fn(&RoomEvent) + Send + Sync + 'static>(&self, observer: F) {
        self.observers.lock().unwrap().push(Arc::new(observer));
    }

    /// Adds a connection to a room, creating the room if needed.
    pub fn add(&self, conn: &Connection, room: &str) {
        let created = {
            let mut rooms = self.rooms.lock().unwrap();
            let members = rooms.entry(room.to_string()).or_default();
            let was_empty = members.is_empty();
            members.insert(conn.id().to_string(), conn.clone());
            was_empty
        };
        conn.record_join(room);
        if created {
            self.emit(&RoomEvent::Created {
                room: room.to_string(),
            });
        }
    }

    /// Removes a connection from a room, destroying the room if it empties.
    pub fn remove(&self, conn: &Connection, room: &str) {
        let destroyed = {
            let mut rooms = self.rooms.lock().unwrap();
            match rooms.get_mut(room) {
                Some(members) => {
                    members.remove(conn.id());
                    if members.is_empty() {
                        rooms.remove(room);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        conn.record_leave(room);
        if destroyed {
            self.emit(&RoomEvent::Destroyed {
                room: room.to_string(),
            });
        }
    }

    /// Removes a connection from every room it belongs to.
    pub fn leave_all(&self, conn: &Connection) {
        let mut destroyed = Vec::new();
        {
            let mut rooms = self.rooms.lock().unwrap();
            rooms.retain(|room, members| {
                if members.remove(conn.id()).is_some() && members.is_empty() {
                    destroyed.push(room.clone());
                    return false;
                }
                true
            });
        }
        conn.record_leave_all();
        for room in destroyed {
            self.emit(&RoomEvent::Destroyed { room });
        }
    }

    /// Sends a message to every member of a room, optionally excluding one
    /// connection. Per-connection send failures are swallowed so one bad
    /// socket cannot poison the broadcast.
    pub fn broadcast(&self, room: &str, message: &Message, except: Option<&Connection>) {
        let members: Vec<Connection> = {
            let rooms = self.rooms.lock().unwrap();
            match rooms.get(room) {
                Some(members) => members.values().cloned().collect(),
                None => return,
            }
        };

        let skip = except.map(Connection::id);
        for member in members {
            if Some(member.id()) == skip {
                continue;
            }
            if let Err(err) = member.send(message.clone()) {
                tracing::debug!(conn = member.id(), error = %err, "dropping failed broadcast send");
            }
        }
    }

    /// The number of members currently in a room.
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms
            .lock()
            .unwrap()
            .get(room)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    /// The names of all live rooms.
    pub fn room_names(&self) -> Vec<String> {
        self.rooms.lock().unwrap().keys().cloned().collect()
    }

    fn emit(&self, event: &RoomEvent) {
        let observers: Vec<Observer> = self.observers.lock().unwrap().clone();
        for observer in observers {
            observer(event);
        }
    }
}
