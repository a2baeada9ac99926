//! Wire event envelopes.
//!
//! Frames are JSON objects `{"event": <kebab-case name>, "data": {...}}` in
//! both directions. Field names are camelCase on the wire. Signaling and
//! sync payloads are opaque [`serde_json::Value`]s: the controller forwards
//! them without ever parsing their contents.

use crate::errors::RcError;
use crate::rooms::{ContentMode, FileInfo, RoomSnapshot};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events accepted from participants.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    /// Create a room; the sender becomes its host.
    CreateRoom { identity: String },
    /// Join an existing room as a guest.
    JoinRoom { code: String, identity: String },
    /// Host reclaiming its room after a reconnect.
    HostRejoin { code: String, identity: String },
    /// Guest reclaiming its slot after a reconnect.
    GuestRejoin { code: String, identity: String },
    /// Host announces transfer metadata.
    FileInfo(FileInfo),
    /// Readiness ping, optionally targeted at a specific identity.
    GuestReady {
        #[serde(default)]
        target: Option<String>,
    },
    /// Opaque signaling envelope for a named target.
    Signal {
        target: String,
        kind: String,
        payload: Value,
    },
    /// Host starts a chunked relay transfer.
    RelayStart {
        total_chunks: u32,
        #[serde(default)]
        file: Option<FileInfo>,
    },
    /// One chunk of the active transfer (base64 payload).
    RelayChunk {
        index: u32,
        payload: String,
        #[serde(default)]
        is_last: bool,
    },
    /// Receiver acknowledges a chunk; forwarded to the sender.
    RelayAck { index: u32 },
    /// Receiver requests re-delivery of missing chunk indexes.
    RelayRetry { missing: Vec<u32> },
    /// Host cancels the active transfer.
    RelayAbort {
        #[serde(default)]
        reason: Option<String>,
    },
    /// Host publishes transfer progress state.
    TransferState { state: Value },
    /// Host switches the room's content mode.
    ModeSwitch { mode: ContentMode },
    /// Content sync: start playback.
    PlayCommand {
        #[serde(default)]
        position: Option<f64>,
    },
    /// Content sync: pause playback.
    PauseCommand {
        #[serde(default)]
        position: Option<f64>,
    },
    /// Content sync: seek.
    SeekCommand { position: f64 },
    /// External-audio sync: start.
    AudioPlay {
        #[serde(default)]
        position: Option<f64>,
    },
    /// External-audio sync: pause.
    AudioPause,
    /// Host closes the room for everyone.
    CloseRoom,
}

/// Events emitted to participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Reply to `create-room`.
    RoomCreated { room: RoomSnapshot },
    /// Reply to `join-room`.
    RoomJoined { room: RoomSnapshot },
    /// Reply to `host-rejoin`: restored room state for the host.
    HostRestored { room: RoomSnapshot },
    /// Reply to `guest-rejoin`: restored room state for the guest.
    GuestRestored { room: RoomSnapshot },
    /// A guest joined the room.
    GuestJoined { identity: String, guest_count: usize },
    /// A guest left (disconnect or displacement).
    GuestLeft { identity: String, guest_count: usize },
    /// A guest reconnected under a new connection.
    GuestBack { identity: String },
    /// Host disconnected; grace window running.
    HostAway { grace_seconds: u64 },
    /// Host reconnected within the grace window.
    HostBack,
    /// Host gone for good; the room is being destroyed.
    HostDisconnected,
    /// Host closed the room explicitly.
    RoomClosed,
    /// Transfer metadata is available.
    FileAvailable { file: FileInfo },
    /// Forwarded readiness ping.
    GuestReady { from: String },
    /// Forwarded opaque signaling envelope.
    Signal {
        from: String,
        kind: String,
        payload: Value,
    },
    /// A relay transfer is starting.
    RelayReady {
        total_chunks: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<FileInfo>,
    },
    /// One relay chunk (live forward or retry re-delivery).
    RelayChunk {
        index: u32,
        total_chunks: u32,
        is_last: bool,
        payload: String,
    },
    /// Forwarded chunk acknowledgement.
    RelayAck { index: u32, from: String },
    /// The relay transfer was aborted.
    RelayAborted { reason: String },
    /// Forwarded transfer progress state.
    TransferState { state: Value },
    /// The room's content mode changed.
    ModeChanged { mode: ContentMode },
    /// Content sync: start playback.
    PlayCommand {
        #[serde(skip_serializing_if = "Option::is_none")]
        position: Option<f64>,
    },
    /// Content sync: pause playback.
    PauseCommand {
        #[serde(skip_serializing_if = "Option::is_none")]
        position: Option<f64>,
    },
    /// Content sync: seek.
    SeekCommand { position: f64 },
    /// External-audio sync: start.
    AudioPlay {
        #[serde(skip_serializing_if = "Option::is_none")]
        position: Option<f64>,
    },
    /// External-audio sync: pause.
    AudioPause,
    /// Operation failed; synchronous reply to the initiating caller.
    Error { code: String, message: String },
}

impl ServerEvent {
    /// Build the wire error reply for an operation failure.
    #[must_use]
    pub fn error(err: &RcError) -> Self {
        ServerEvent::Error {
            code: err.error_code().to_string(),
            message: err.client_message(),
        }
    }
}
