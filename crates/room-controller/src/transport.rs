//! Boundary to the external messaging transport.
//!
//! The controller addresses participants only through [`EventSink`]:
//! fire-and-forget delivery of a [`ServerEvent`] to a connection handle.
//! Delivery never blocks the controller; a sink implementation queues
//! internally (the bundled WebSocket transport uses one unbounded sender
//! per connection). Sends to unknown handles are silently dropped - the
//! benign race between a disconnect and an in-flight forward.

use crate::events::ServerEvent;

/// Outbound event delivery, keyed by connection handle.
pub trait EventSink: Send + Sync {
    /// Deliver `event` to a single connection. Must not block.
    fn unicast(&self, connection: &str, event: &ServerEvent);

    /// Deliver `event` to several connections.
    fn multicast(&self, connections: &[String], event: &ServerEvent) {
        for connection in connections {
            self.unicast(connection, event);
        }
    }
}
