//! # Room Controller Test Utilities
//!
//! Shared test utilities for the Matinee Room Controller.
//!
//! This crate provides a recording transport sink and configuration
//! fixtures for isolated controller testing without real WebSocket
//! connections.
//!
//! The fixtures are defined in `room_controller::test_support` (behind
//! the `test-support` feature) so that the controller crate's own unit
//! tests and this external helper share a single definition and a single
//! copy of the crate's types. This module simply re-exports them.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rc_test_utils::{test_config, RecordingSink};
//! use room_controller::actors::{ControllerMetrics, RoomControllerHandle};
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let sink = RecordingSink::new();
//!     let handle = RoomControllerHandle::new(
//!         &test_config(),
//!         Arc::clone(&sink) as _,
//!         ControllerMetrics::new(),
//!     );
//!
//!     let room = handle
//!         .create_room("host-1".into(), "conn-h".into())
//!         .await
//!         .unwrap();
//!     // drive more events, then assert on sink.events_for("conn-h")
//! }
//! ```

pub use room_controller::test_support::{
    b64, test_config, test_config_with_capacity, RecordingSink,
};
