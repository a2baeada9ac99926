//! Relay session manager: the chunked-transfer fallback.
//!
//! One session per room. Chunks are forwarded to room members as they
//! arrive (the controller's job); the buffer kept here exists solely to
//! service pull-based retry requests from receivers that detect gaps.
//! Re-delivery is receiver-driven, which keeps the sender stateless with
//! respect to each receiver's loss pattern.
//!
//! Like [`crate::rooms::RoomStore`], this is a plain synchronous structure
//! driven only by the controller actor.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Fixed-capacity chunk buffer: slot vector plus a present bitmap.
///
/// The bitmap is the source of truth for presence; `received()` is a
/// popcount over its words.
#[derive(Debug)]
pub struct ChunkBuffer {
    slots: Vec<Bytes>,
    present: Vec<u64>,
    total: u32,
}

impl ChunkBuffer {
    /// Create a buffer sized for `total` chunks.
    #[must_use]
    pub fn new(total: u32) -> Self {
        let total_usize = total as usize;
        Self {
            slots: vec![Bytes::new(); total_usize],
            present: vec![0u64; total_usize.div_ceil(64)],
            total,
        }
    }

    /// Total number of chunks this buffer is sized for.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Store `payload` at `index`. Overwriting is allowed (re-delivery is
    /// idempotent). Returns `false` if the index is out of range.
    pub fn insert(&mut self, index: u32, payload: Bytes) -> bool {
        if index >= self.total {
            return false;
        }
        let i = index as usize;
        if let Some(slot) = self.slots.get_mut(i) {
            *slot = payload;
        }
        if let Some(word) = self.present.get_mut(i / 64) {
            *word |= 1u64 << (i % 64);
        }
        true
    }

    /// Payload at `index`, if buffered.
    #[must_use]
    pub fn get(&self, index: u32) -> Option<&Bytes> {
        if !self.contains(index) {
            return None;
        }
        self.slots.get(index as usize)
    }

    /// Whether `index` has been received.
    #[must_use]
    pub fn contains(&self, index: u32) -> bool {
        if index >= self.total {
            return false;
        }
        let i = index as usize;
        self.present
            .get(i / 64)
            .is_some_and(|word| word & (1u64 << (i % 64)) != 0)
    }

    /// Number of chunks received so far (popcount over the bitmap).
    #[must_use]
    pub fn received(&self) -> u32 {
        self.present.iter().map(|w| w.count_ones()).sum()
    }
}

/// A buffered chunk handed back for re-delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayChunk {
    /// Chunk index.
    pub index: u32,
    /// Total chunks in the transfer.
    pub total_chunks: u32,
    /// Whether this is the final chunk.
    pub is_last: bool,
    /// Chunk payload.
    pub payload: Bytes,
}

/// One in-flight chunked transfer, scoped to a room.
#[derive(Debug)]
pub struct RelaySession {
    /// Code of the owning room.
    pub room_code: String,
    /// Identity of the sending host.
    pub sender_identity: String,
    /// Chunk buffer for retry service.
    pub buffer: ChunkBuffer,
    /// Terminal completion flag; set when the `is_last` chunk arrives.
    pub completed: bool,
    /// Session creation timestamp.
    pub started_at: DateTime<Utc>,
    /// Last chunk/retry activity timestamp.
    pub last_activity: DateTime<Utc>,
}

impl RelaySession {
    fn new(room_code: String, sender_identity: String, total_chunks: u32) -> Self {
        let now = Utc::now();
        Self {
            room_code,
            sender_identity,
            buffer: ChunkBuffer::new(total_chunks),
            completed: false,
            started_at: now,
            last_activity: now,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Outcome of [`RelayManager::add_chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkStored {
    /// Total chunks in the transfer, for forwarding metadata.
    pub total_chunks: u32,
    /// Whether this chunk completed the session (first sight of `is_last`).
    pub completed_now: bool,
}

/// Owns the in-flight relay sessions, keyed by room code.
#[derive(Debug)]
pub struct RelayManager {
    sessions: HashMap<String, RelaySession>,
    max_chunks: u32,
}

impl RelayManager {
    /// Create an empty manager accepting transfers of up to `max_chunks`
    /// chunks.
    #[must_use]
    pub fn new(max_chunks: u32) -> Self {
        Self {
            sessions: HashMap::new(),
            max_chunks,
        }
    }

    /// Start a session for `room_code` with `sender_identity` as the only
    /// permitted chunk source.
    ///
    /// Host validation is the controller's job. Returns `None` (no-op) for
    /// degenerate chunk counts: zero, or beyond the configured bound.
    /// A previous session for the room must have been removed by the
    /// caller first (see [`RelayManager::remove`]).
    pub fn start(
        &mut self,
        room_code: &str,
        sender_identity: &str,
        total_chunks: u32,
    ) -> Option<&RelaySession> {
        if total_chunks == 0 || total_chunks > self.max_chunks {
            return None;
        }
        let session = RelaySession::new(
            room_code.to_string(),
            sender_identity.to_string(),
            total_chunks,
        );
        Some(self.sessions.entry(room_code.to_string()).or_insert(session))
    }

    /// Store a chunk arriving from `sender_identity`.
    ///
    /// Silent no-op (returns `None`) when the room has no session, the
    /// caller is not the session's sender, or the index is out of range.
    /// Overwrites are allowed; `completed` is terminal and is reported as
    /// freshly-set only once.
    pub fn add_chunk(
        &mut self,
        room_code: &str,
        sender_identity: &str,
        index: u32,
        payload: Bytes,
        is_last: bool,
    ) -> Option<ChunkStored> {
        let session = self.sessions.get_mut(room_code)?;
        if session.sender_identity != sender_identity {
            return None;
        }
        if !session.buffer.insert(index, payload) {
            return None;
        }
        session.touch();

        let completed_now = is_last && !session.completed;
        if completed_now {
            session.completed = true;
        }

        Some(ChunkStored {
            total_chunks: session.buffer.total(),
            completed_now,
        })
    }

    /// Buffered chunks for a retry request, in the order asked.
    ///
    /// Indexes not yet buffered are silently skipped; the requester must
    /// retry again later.
    #[must_use]
    pub fn chunks_for_retry(&mut self, room_code: &str, missing: &[u32]) -> Vec<RelayChunk> {
        let Some(session) = self.sessions.get_mut(room_code) else {
            return Vec::new();
        };
        session.touch();
        let total = session.buffer.total();
        missing
            .iter()
            .filter_map(|&index| {
                session.buffer.get(index).map(|payload| RelayChunk {
                    index,
                    total_chunks: total,
                    is_last: index + 1 == total,
                    payload: payload.clone(),
                })
            })
            .collect()
    }

    /// Session for a room, if any.
    #[must_use]
    pub fn session(&self, room_code: &str) -> Option<&RelaySession> {
        self.sessions.get(room_code)
    }

    /// Remove a session (abort or purge). Idempotent.
    pub fn remove(&mut self, room_code: &str) -> Option<RelaySession> {
        self.sessions.remove(room_code)
    }

    /// Number of in-flight sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
