//! Actor model for the room controller.
//!
//! A single `RoomControllerActor` owns all room, identity, and relay
//! state behind an mpsc mailbox; the cloneable [`RoomControllerHandle`]
//! is the public interface. Request-reply operations resolve via oneshot
//! channels, timer-driven transitions arrive as generation-stamped
//! mailbox messages.

mod controller;
mod messages;
mod metrics;

pub use controller::RoomControllerHandle;
pub use messages::{ControllerMessage, ControllerStatus};
pub use metrics::{ControllerMetrics, ControllerMetricsSnapshot, MailboxMonitor};
