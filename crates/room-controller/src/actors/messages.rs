//! Message types for the controller actor.
//!
//! All communication with the actor uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Operations with a synchronous result use
//! `tokio::sync::oneshot` for request-reply semantics; everything else is
//! fire-and-forget, with failures surfaced to participants as events.

use crate::errors::RcError;
use crate::events::ServerEvent;
use crate::rooms::{ContentMode, FileInfo, RoomSnapshot};

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

/// Messages sent to the `RoomControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    /// Create a room; the caller becomes its host.
    CreateRoom {
        identity: String,
        connection: String,
        respond_to: oneshot::Sender<RoomSnapshot>,
    },

    /// Join a room as a guest.
    JoinRoom {
        code: String,
        identity: String,
        connection: String,
        respond_to: oneshot::Sender<Result<RoomSnapshot, RcError>>,
    },

    /// Host reclaims its room from a new connection. `None` when no room
    /// is associated with the identity any more.
    HostRejoin {
        code: String,
        identity: String,
        connection: String,
        respond_to: oneshot::Sender<Option<RoomSnapshot>>,
    },

    /// Guest reclaims its slot from a new connection.
    GuestRejoin {
        code: String,
        identity: String,
        connection: String,
        respond_to: oneshot::Sender<Option<RoomSnapshot>>,
    },

    /// A transport connection dropped.
    ConnectionClosed { connection: String },

    /// Host announces transfer metadata.
    FileInfo { connection: String, file: FileInfo },

    /// Readiness ping, forwarded to the target or the host.
    GuestReady {
        connection: String,
        target: Option<String>,
    },

    /// Opaque signaling envelope to forward.
    Signal {
        connection: String,
        target: String,
        kind: String,
        payload: Value,
    },

    /// Host starts a relay transfer.
    RelayStart {
        connection: String,
        total_chunks: u32,
        file: Option<FileInfo>,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    /// One relay chunk from the sender (payload already base64-decoded).
    RelayChunk {
        connection: String,
        index: u32,
        payload: Bytes,
        is_last: bool,
    },

    /// Chunk acknowledgement, forwarded to the sender.
    RelayAck { connection: String, index: u32 },

    /// Retry request: re-deliver the buffered subset of `missing` to the
    /// requester only.
    RelayRetry {
        connection: String,
        missing: Vec<u32>,
    },

    /// Host cancels the active transfer.
    RelayAbort {
        connection: String,
        reason: Option<String>,
    },

    /// Host switches the room's content mode (persisted for late joiners).
    ModeSwitch {
        connection: String,
        mode: ContentMode,
    },

    /// Host-only broadcast of a pre-built event (content sync commands,
    /// transfer progress state). Validated for host origin, then relayed
    /// verbatim to the rest of the room.
    HostBroadcast {
        connection: String,
        event: ServerEvent,
    },

    /// Host closes the room for everyone.
    CloseRoom { connection: String },

    /// Get current controller status (for `/status`).
    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },

    /// A host grace period elapsed. Stale generations are ignored.
    GraceExpired { code: String, generation: u64 },

    /// A completed relay session's purge delay elapsed. Stale generations
    /// are ignored.
    RelayPurge { code: String, generation: u64 },
}

/// Status of the controller, served by `/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    /// Live rooms.
    pub rooms: usize,
    /// Participants across all rooms (away hosts included).
    pub participants: usize,
    /// In-flight relay sessions.
    pub relay_sessions: usize,
    /// Current controller mailbox depth.
    pub mailbox_depth: usize,
}
