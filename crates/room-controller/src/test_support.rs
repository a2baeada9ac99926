//! Shared test utilities for the Room Controller.
//!
//! Provides a recording transport sink and configuration fixtures for
//! isolated controller testing without real WebSocket connections. The
//! module is compiled for this crate's own unit tests (`cfg(test)`) and,
//! behind the `test-support` feature, re-exported to external test
//! helpers (`rc-test-utils`) so both share a single definition and a
//! single copy of the crate's types.

use crate::config::Config;
use crate::events::ServerEvent;
use crate::transport::EventSink;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// An [`EventSink`] that records every delivered event per connection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, ServerEvent)>>,
}

impl RecordingSink {
    /// Create a new shared recording sink.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every recorded `(connection, event)` pair, in delivery order.
    pub fn all(&self) -> Vec<(String, ServerEvent)> {
        self.events.lock().unwrap().clone()
    }

    /// Events delivered to one connection, in delivery order.
    pub fn events_for(&self, connection: &str) -> Vec<ServerEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(conn, _)| conn == connection)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Last event delivered to one connection, if any.
    pub fn last_for(&self, connection: &str) -> Option<ServerEvent> {
        self.events_for(connection).pop()
    }

    /// Number of events delivered to one connection.
    pub fn count_for(&self, connection: &str) -> usize {
        self.events_for(connection).len()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventSink for RecordingSink {
    fn unicast(&self, connection: &str, event: &ServerEvent) {
        self.events
            .lock()
            .unwrap()
            .push((connection.to_string(), event.clone()));
    }
}

/// Config fixture with short timers suitable for paused-clock tests.
pub fn test_config() -> Config {
    let vars = HashMap::from([
        ("RC_INSTANCE_ID".to_string(), "rc-test".to_string()),
        ("RC_HOST_GRACE_SECONDS".to_string(), "50".to_string()),
        ("RC_RELAY_PURGE_SECONDS".to_string(), "300".to_string()),
    ]);
    Config::from_vars(&vars).expect("test config must load")
}

/// Config fixture with a custom guest capacity.
pub fn test_config_with_capacity(max_guests: usize) -> Config {
    let vars = HashMap::from([
        ("RC_INSTANCE_ID".to_string(), "rc-test".to_string()),
        ("RC_MAX_GUESTS".to_string(), max_guests.to_string()),
    ]);
    Config::from_vars(&vars).expect("test config must load")
}

/// Base64 helper for building relay chunk payloads in tests.
pub fn b64(payload: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(payload)
}
