//! Room store and identity registry.
//!
//! Owns all `Room` entities, indexed by room code and by participant
//! identity, and maps stable identities to their current transient
//! connection handles. A participant's *identity* (client-supplied, stable
//! across reconnections) owns room membership; its *connection handle*
//! (server-assigned, per physical connection) is rebindable.
//!
//! The store is a plain synchronous structure; it is driven exclusively by
//! the controller actor, so no interior locking is needed.

use crate::codes;
use crate::errors::RcError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role of a participant within its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The room's single host.
    Host,
    /// One of up to `max_guests` guests.
    Guest,
}

/// Active content mode of a room.
///
/// Persisted on the room so late-joining guests can be briefed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentMode {
    /// Shared local file playback.
    #[default]
    File,
    /// Live stream from the host.
    Stream,
    /// Externally-played audio, synchronized by commands only.
    ExternalAudio,
}

/// Metadata of the last-announced transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// File name as announced by the host.
    pub name: String,
    /// File size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// MIME type, if the host knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
}

/// A bounded group session: one host, up to `max_guests` guests.
#[derive(Debug)]
pub struct Room {
    /// Short human-typeable room code.
    pub code: String,
    /// Stable identity of the host.
    pub host_identity: String,
    /// Host's current connection handle; `None` while the host is away
    /// (inside the reconnection grace window).
    pub host_connection: Option<String>,
    /// Guest identity -> current connection handle.
    pub guests: HashMap<String, String>,
    /// Last-announced transfer metadata.
    pub file_info: Option<FileInfo>,
    /// Active content mode.
    pub current_mode: ContentMode,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub last_activity: DateTime<Utc>,
}

impl Room {
    fn new(code: String, host_identity: String, host_connection: String) -> Self {
        let now = Utc::now();
        Self {
            code,
            host_identity,
            host_connection: Some(host_connection),
            guests: HashMap::new(),
            file_info: None,
            current_mode: ContentMode::default(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Number of guests currently in the room.
    #[must_use]
    pub fn guest_count(&self) -> usize {
        self.guests.len()
    }

    /// Connection handles of every current member, excluding `except`.
    ///
    /// Resolved at call time, so a just-reconnected member with a new
    /// handle is included and a departed one is not.
    #[must_use]
    pub fn member_connections(&self, except: Option<&str>) -> Vec<String> {
        self.host_connection
            .iter()
            .chain(self.guests.values())
            .filter(|conn| Some(conn.as_str()) != except)
            .cloned()
            .collect()
    }

    /// Immutable view of the room for replies to participants.
    #[must_use]
    pub fn snapshot(&self) -> RoomSnapshot {
        let mut guests: Vec<String> = self.guests.keys().cloned().collect();
        guests.sort();
        RoomSnapshot {
            code: self.code.clone(),
            host_identity: self.host_identity.clone(),
            guests,
            guest_count: self.guest_count(),
            file_info: self.file_info.clone(),
            current_mode: self.current_mode,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Serializable view of a room, returned to joining/rejoining participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    /// Room code.
    pub code: String,
    /// Host identity.
    pub host_identity: String,
    /// Guest identities, sorted.
    pub guests: Vec<String>,
    /// Guest count.
    pub guest_count: usize,
    /// Last-announced transfer metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_info: Option<FileInfo>,
    /// Active content mode.
    pub current_mode: ContentMode,
}

/// Result of [`RoomStore::remove_connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedConnection {
    /// Role the connection held.
    pub role: Role,
    /// Code of the room it belonged to.
    pub room_code: String,
    /// Stable identity behind the connection.
    pub identity: String,
    /// Guests remaining in the room after the removal.
    pub remaining_guests: usize,
}

/// Identity -> room membership record.
#[derive(Debug, Clone)]
struct Membership {
    room_code: String,
    role: Role,
}

/// Owns rooms and the identity/connection registries.
#[derive(Debug)]
pub struct RoomStore {
    /// Rooms by code.
    rooms: HashMap<String, Room>,
    /// Identity -> (room code, role).
    memberships: HashMap<String, Membership>,
    /// Connection handle -> identity.
    connections: HashMap<String, String>,
    /// Guest capacity per room.
    max_guests: usize,
}

impl RoomStore {
    /// Create an empty store with the given per-room guest capacity.
    #[must_use]
    pub fn new(max_guests: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            memberships: HashMap::new(),
            connections: HashMap::new(),
            max_guests,
        }
    }

    /// Create a room for `host_identity`, generating a fresh unique code.
    ///
    /// Always succeeds; the caller must have dissolved any previous
    /// membership of the identity first (see [`RoomStore::membership_of`]).
    pub fn create_room(&mut self, host_identity: &str, host_connection: &str) -> &Room {
        let code = codes::generate_unique(|c| self.rooms.contains_key(c));
        let room = Room::new(
            code.clone(),
            host_identity.to_string(),
            host_connection.to_string(),
        );
        self.memberships.insert(
            host_identity.to_string(),
            Membership {
                room_code: code.clone(),
                role: Role::Host,
            },
        );
        self.connections
            .insert(host_connection.to_string(), host_identity.to_string());
        self.rooms.entry(code).or_insert(room)
    }

    /// Add `guest_identity` to the room `code`.
    ///
    /// Re-joining with an identity already present overwrites its
    /// connection mapping instead of consuming another slot.
    pub fn join_room(
        &mut self,
        code: &str,
        guest_identity: &str,
        guest_connection: &str,
    ) -> Result<&Room, RcError> {
        let room = self
            .rooms
            .get_mut(code)
            .ok_or_else(|| RcError::RoomNotFound(code.to_string()))?;

        if !room.guests.contains_key(guest_identity) && room.guests.len() >= self.max_guests {
            return Err(RcError::RoomFull(code.to_string()));
        }

        if let Some(stale) = room
            .guests
            .insert(guest_identity.to_string(), guest_connection.to_string())
        {
            self.connections.remove(&stale);
        }
        room.touch();

        self.memberships.insert(
            guest_identity.to_string(),
            Membership {
                room_code: code.to_string(),
                role: Role::Guest,
            },
        );
        self.connections
            .insert(guest_connection.to_string(), guest_identity.to_string());

        Ok(&*room)
    }

    /// Rebind the host's connection after a reconnect.
    ///
    /// Returns the room owned by `host_identity`, or `None` if no room is
    /// associated with that identity (already destroyed).
    pub fn reconnect_host(&mut self, host_identity: &str, new_connection: &str) -> Option<&Room> {
        let membership = self.memberships.get(host_identity)?;
        if membership.role != Role::Host {
            return None;
        }
        let code = membership.room_code.clone();
        let room = self.rooms.get_mut(&code)?;

        if let Some(stale) = room.host_connection.take() {
            self.connections.remove(&stale);
        }
        room.host_connection = Some(new_connection.to_string());
        room.touch();
        self.connections
            .insert(new_connection.to_string(), host_identity.to_string());
        Some(&*room)
    }

    /// Rebind a guest's connection after a reconnect, removing any stale
    /// mapping under the old handle first.
    pub fn reconnect_guest(&mut self, guest_identity: &str, new_connection: &str) -> Option<&Room> {
        let membership = self.memberships.get(guest_identity)?;
        if membership.role != Role::Guest {
            return None;
        }
        let code = membership.room_code.clone();
        let room = self.rooms.get_mut(&code)?;

        if let Some(stale) = room
            .guests
            .insert(guest_identity.to_string(), new_connection.to_string())
        {
            self.connections.remove(&stale);
        }
        room.touch();
        self.connections
            .insert(new_connection.to_string(), guest_identity.to_string());
        Some(&*room)
    }

    /// Handle a dropped connection.
    ///
    /// A host keeps its identity -> room association (the controller runs
    /// the grace period); only the dead handle is unbound. A guest is
    /// removed from the room immediately, identity association included.
    pub fn remove_connection(&mut self, connection: &str) -> Option<RemovedConnection> {
        let identity = self.connections.remove(connection)?;
        let membership = self.memberships.get(&identity)?.clone();
        let room = self.rooms.get_mut(&membership.room_code)?;

        let remaining_guests = match membership.role {
            Role::Host => {
                if room.host_connection.as_deref() == Some(connection) {
                    room.host_connection = None;
                }
                room.touch();
                room.guest_count()
            }
            Role::Guest => {
                room.guests.remove(&identity);
                room.touch();
                self.memberships.remove(&identity);
                room.guest_count()
            }
        };

        Some(RemovedConnection {
            role: membership.role,
            room_code: membership.room_code,
            identity,
            remaining_guests,
        })
    }

    /// Destroy a room and clear every identity/connection association of
    /// its participants. Idempotent: unknown codes are a no-op.
    pub fn destroy_room(&mut self, code: &str) -> Option<Room> {
        let room = self.rooms.remove(code)?;

        self.memberships.remove(&room.host_identity);
        if let Some(conn) = &room.host_connection {
            self.connections.remove(conn);
        }
        for (identity, conn) in &room.guests {
            self.memberships.remove(identity);
            self.connections.remove(conn);
        }

        Some(room)
    }

    /// Room by code.
    #[must_use]
    pub fn room(&self, code: &str) -> Option<&Room> {
        self.rooms.get(code)
    }

    /// Mutable room by code.
    pub fn room_mut(&mut self, code: &str) -> Option<&mut Room> {
        self.rooms.get_mut(code)
    }

    /// Current membership of an identity, if any.
    #[must_use]
    pub fn membership_of(&self, identity: &str) -> Option<(&str, Role)> {
        self.memberships
            .get(identity)
            .map(|m| (m.room_code.as_str(), m.role))
    }

    /// Identity behind a connection handle, if any.
    #[must_use]
    pub fn identity_of(&self, connection: &str) -> Option<&str> {
        self.connections.get(connection).map(String::as_str)
    }

    /// Room a connection currently belongs to, with its role.
    #[must_use]
    pub fn room_of_connection(&self, connection: &str) -> Option<(&Room, Role)> {
        let identity = self.identity_of(connection)?;
        let membership = self.memberships.get(identity)?;
        let room = self.rooms.get(&membership.room_code)?;
        Some((room, membership.role))
    }

    /// Current connection handle of an identity, if connected.
    #[must_use]
    pub fn connection_of(&self, identity: &str) -> Option<&str> {
        let membership = self.memberships.get(identity)?;
        let room = self.rooms.get(&membership.room_code)?;
        match membership.role {
            Role::Host => room.host_connection.as_deref(),
            Role::Guest => room.guests.get(identity).map(String::as_str),
        }
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Codes of all live rooms.
    #[must_use]
    pub fn room_codes(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    /// Number of participants across all rooms (hosts included, away
    /// hosts too: their identity still owns the room).
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.memberships.len()
    }
}
