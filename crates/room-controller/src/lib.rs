//! Matinee Room Controller Library
//!
//! This library provides the core functionality for the Matinee Room
//! Controller - an ephemeral room broker for watch-together sessions,
//! responsible for:
//!
//! - Room lifecycle: short-code creation, joining, identity-stable
//!   reconnection, host grace periods
//! - WebRTC signaling pass-through (opaque envelopes, never parsed)
//! - A chunked-data relay fallback with acknowledgements and pull-based
//!   chunk re-delivery for when the direct peer transport fails
//!
//! # Architecture
//!
//! A single `RoomControllerActor` owns every room, identity mapping and
//! relay session behind an mpsc mailbox:
//!
//! ```text
//! transport (ws) -> EventGateway -> RoomControllerActor
//!                                   ├── RoomStore (rooms + identity registry)
//!                                   ├── RelayManager (chunk buffers)
//!                                   └── ScheduledNotices (grace / purge)
//!                                        └── outbound via EventSink
//! ```
//!
//! # Key Design Decisions
//!
//! - **Identity owns membership**: a participant's stable identity, not
//!   its transient connection handle, owns its room slot; reconnection
//!   rebinds the handle
//! - **Host grace period**: a room survives its host's disconnection for
//!   a bounded window before being destroyed exactly once
//! - **Receiver-driven retry**: relay chunk recovery is pull-based; the
//!   buffer exists only to service retries, live delivery is unbuffered
//!
//! # Modules
//!
//! - [`actors`] - Controller actor, handle, messages, metrics
//! - [`rooms`] - Room store and identity registry
//! - [`relay`] - Relay session manager and chunk buffers
//! - [`gateway`] - Wire event dispatch
//! - [`ws`] - Bundled WebSocket transport
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with wire error codes

pub mod actors;
pub mod codes;
pub mod config;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod observability;
pub mod relay;
pub mod rooms;
pub mod timers;
pub mod transport;
pub mod ws;

// Test fixtures (recording sink + config builders). Compiled for this
// crate's own unit tests, and exposed to external test helpers behind
// the `test-support` feature so both share one copy of the crate types.
#[cfg(any(test, feature = "test-support"))]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
pub mod test_support;
