//! Room registry and connected-client map
//!
//! All of the state shared between connections lives here, guarded by a
//! single mutex owned by the server. Rooms hold member ids, not client
//! records; members are resolved through the client map while the lock is
//! held.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::warn;

use crate::protocol::messages::{ClientId, RoomId, LOBBY};

/// Shared view of one connected client
#[derive(Debug)]
pub struct ClientHandle {
    pub id: ClientId,
    /// Display name; starts as "(ip, port)" until a CSName arrives
    pub name: String,
    /// Current room, [`LOBBY`] when in none
    pub room: RoomId,
    outbox: mpsc::UnboundedSender<Bytes>,
}

impl ClientHandle {
    /// Queue framed wire bytes for this client's writer task
    pub fn push(&self, wire: Bytes) {
        if self.outbox.send(wire).is_err() {
            // Writer already gone; the peer's own task is tearing down.
            warn!(client = self.id, "send failed: peer is closing");
        }
    }
}

/// A chat room
#[derive(Debug)]
pub struct Room {
    pub id: RoomId,
    pub title: String,
    members: BTreeSet<ClientId>,
}

impl Room {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.members.iter().copied()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.members.contains(&id)
    }
}

/// What happened when a client left its room
#[derive(Debug, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub room_id: RoomId,
    /// Title read before any deletion
    pub title: String,
    /// True when the room emptied and was removed from the registry
    pub deleted: bool,
}

/// All rooms and clients, plus the id counters
///
/// Room ids grow monotonically from 1 and are never reused. Rooms are kept
/// in a `BTreeMap` so listings iterate in ascending id order.
pub struct Registry {
    clients: HashMap<ClientId, ClientHandle>,
    rooms: BTreeMap<RoomId, Room>,
    next_room_id: RoomId,
    next_client_id: ClientId,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
            rooms: BTreeMap::new(),
            next_room_id: 1,
            next_client_id: 1,
        }
    }

    /// Register a newly accepted client
    pub fn add_client(&mut self, name: String, outbox: mpsc::UnboundedSender<Bytes>) -> ClientId {
        let id = self.next_client_id;
        self.next_client_id += 1;
        self.clients.insert(
            id,
            ClientHandle {
                id,
                name,
                room: LOBBY,
                outbox,
            },
        );
        id
    }

    /// Erase a client, removing it from its room first
    ///
    /// Returns what happened to the room, if the client was in one.
    pub fn remove_client(&mut self, id: ClientId) -> Option<LeaveOutcome> {
        let outcome = self.leave_room(id);
        self.clients.remove(&id);
        outcome
    }

    pub fn client(&self, id: ClientId) -> Option<&ClientHandle> {
        self.clients.get(&id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Change a client's display name, returning the old one
    pub fn rename_client(&mut self, id: ClientId, name: String) -> Option<String> {
        let client = self.clients.get_mut(&id)?;
        Some(std::mem::replace(&mut client.name, name))
    }

    /// Create a room with the next id; the creator becomes its sole member
    pub fn create_room(&mut self, title: String, creator: ClientId) -> RoomId {
        let room_id = self.next_room_id;
        self.next_room_id += 1;

        let mut members = BTreeSet::new();
        members.insert(creator);
        self.rooms.insert(
            room_id,
            Room {
                id: room_id,
                title,
                members,
            },
        );
        if let Some(client) = self.clients.get_mut(&creator) {
            client.room = room_id;
        }
        room_id
    }

    /// Add a client to an existing room
    pub fn join_room(&mut self, id: ClientId, room_id: RoomId) -> bool {
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return false;
        };
        room.members.insert(id);
        if let Some(client) = self.clients.get_mut(&id) {
            client.room = room_id;
        }
        true
    }

    /// Remove a client from its room, deleting the room if it empties
    pub fn leave_room(&mut self, id: ClientId) -> Option<LeaveOutcome> {
        let room_id = {
            let client = self.clients.get_mut(&id)?;
            if client.room == LOBBY {
                return None;
            }
            std::mem::replace(&mut client.room, LOBBY)
        };

        let room = self.rooms.get_mut(&room_id)?;
        room.members.remove(&id);
        let title = room.title.clone();
        let deleted = room.members.is_empty();
        if deleted {
            self.rooms.remove(&room_id);
        }

        Some(LeaveOutcome {
            room_id,
            title,
            deleted,
        })
    }

    pub fn room(&self, room_id: RoomId) -> Option<&Room> {
        self.rooms.get(&room_id)
    }

    /// Rooms in ascending id order
    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Display names of a room's members, resolved through the client map
    pub fn member_names(&self, room: &Room) -> Vec<String> {
        room.members()
            .filter_map(|id| self.clients.get(&id))
            .map(|client| client.name.clone())
            .collect()
    }

    /// Queue wire bytes for one client
    pub fn send_to(&self, id: ClientId, wire: &Bytes) {
        if let Some(client) = self.clients.get(&id) {
            client.push(wire.clone());
        }
    }

    /// Queue wire bytes for every co-member of the sender's room
    ///
    /// The caller holds the registry lock for the duration, so membership
    /// cannot change and the room cannot be deleted mid-fan-out. A sender
    /// in the lobby is silently skipped.
    pub fn broadcast(&self, sender: ClientId, wire: &Bytes) {
        let Some(client) = self.clients.get(&sender) else {
            return;
        };
        if client.room == LOBBY {
            return;
        }
        let Some(room) = self.rooms.get(&client.room) else {
            return;
        };
        for member_id in room.members() {
            if member_id == sender {
                continue;
            }
            if let Some(peer) = self.clients.get(&member_id) {
                peer.push(wire.clone());
            }
        }
    }

    /// Drop every room and client record (shutdown path)
    pub fn clear(&mut self) {
        self.clients.clear();
        self.rooms.clear();
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
