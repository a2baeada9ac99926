//! Thin relay between the transport and the controller actor.
//!
//! Inbound frames are parsed into [`ClientEvent`]s and mapped onto
//! controller operations; operations with a synchronous result are
//! answered with a direct reply event to the calling connection.
//! Malformed frames and frames with missing required fields are dropped
//! with a debug log - availability over strict protocol conformance.

use crate::actors::RoomControllerHandle;
use crate::errors::RcError;
use crate::events::{ClientEvent, ServerEvent};
use crate::transport::EventSink;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Maps named wire events to controller operations.
#[derive(Clone)]
pub struct EventGateway {
    controller: RoomControllerHandle,
    sink: Arc<dyn EventSink>,
}

impl EventGateway {
    /// Create a gateway over a controller handle and a reply sink.
    #[must_use]
    pub fn new(controller: RoomControllerHandle, sink: Arc<dyn EventSink>) -> Self {
        Self { controller, sink }
    }

    /// A transport connection dropped; the controller decides what that
    /// means for its room.
    pub async fn on_disconnect(&self, connection: &str) {
        if let Err(err) = self
            .controller
            .connection_closed(connection.to_string())
            .await
        {
            warn!(target: "rc.gateway", error = %err, "Disconnect notification failed");
        }
    }

    /// Parse and dispatch one raw inbound frame.
    pub async fn dispatch_text(&self, connection: &str, raw: &str) {
        match serde_json::from_str::<ClientEvent>(raw) {
            Ok(event) => self.dispatch(connection, event).await,
            Err(err) => {
                debug!(
                    target: "rc.gateway",
                    error = %err,
                    "Dropping malformed frame"
                );
            }
        }
    }

    /// Dispatch one parsed inbound event.
    pub async fn dispatch(&self, connection: &str, event: ClientEvent) {
        let conn = connection.to_string();
        match event {
            ClientEvent::CreateRoom { identity } => {
                match self.controller.create_room(identity, conn).await {
                    Ok(room) => self.reply(connection, &ServerEvent::RoomCreated { room }),
                    Err(err) => self.reply_error(connection, &err),
                }
            }

            ClientEvent::JoinRoom { code, identity } => {
                match self.controller.join_room(code, identity, conn).await {
                    Ok(room) => self.reply(connection, &ServerEvent::RoomJoined { room }),
                    Err(err) => self.reply_error(connection, &err),
                }
            }

            ClientEvent::HostRejoin { code, identity } => {
                match self.controller.host_rejoin(code.clone(), identity, conn).await {
                    Ok(Some(room)) => {
                        self.reply(connection, &ServerEvent::HostRestored { room });
                    }
                    Ok(None) => {
                        self.reply_error(connection, &RcError::RoomNotFound(code));
                    }
                    Err(err) => self.reply_error(connection, &err),
                }
            }

            ClientEvent::GuestRejoin { code, identity } => {
                match self
                    .controller
                    .guest_rejoin(code.clone(), identity, conn)
                    .await
                {
                    Ok(Some(room)) => {
                        self.reply(connection, &ServerEvent::GuestRestored { room });
                    }
                    Ok(None) => {
                        self.reply_error(connection, &RcError::RoomNotFound(code));
                    }
                    Err(err) => self.reply_error(connection, &err),
                }
            }

            ClientEvent::FileInfo(file) => {
                self.fire(self.controller.file_info(conn, file).await);
            }

            ClientEvent::GuestReady { target } => {
                self.fire(self.controller.guest_ready(conn, target).await);
            }

            ClientEvent::Signal {
                target,
                kind,
                payload,
            } => {
                self.fire(self.controller.signal(conn, target, kind, payload).await);
            }

            ClientEvent::RelayStart { total_chunks, file } => {
                match self.controller.relay_start(conn, total_chunks, file).await {
                    Ok(()) => {}
                    Err(err) => self.reply_error(connection, &err),
                }
            }

            ClientEvent::RelayChunk {
                index,
                payload,
                is_last,
            } => match BASE64.decode(&payload) {
                Ok(bytes) => {
                    self.fire(
                        self.controller
                            .relay_chunk(conn, index, Bytes::from(bytes), is_last)
                            .await,
                    );
                }
                Err(err) => {
                    debug!(
                        target: "rc.gateway",
                        index,
                        error = %err,
                        "Dropping relay chunk with undecodable payload"
                    );
                }
            },

            ClientEvent::RelayAck { index } => {
                self.fire(self.controller.relay_ack(conn, index).await);
            }

            ClientEvent::RelayRetry { missing } => {
                self.fire(self.controller.relay_retry(conn, missing).await);
            }

            ClientEvent::RelayAbort { reason } => {
                self.fire(self.controller.relay_abort(conn, reason).await);
            }

            ClientEvent::TransferState { state } => {
                self.fire(
                    self.controller
                        .host_broadcast(conn, ServerEvent::TransferState { state })
                        .await,
                );
            }

            ClientEvent::ModeSwitch { mode } => {
                self.fire(self.controller.mode_switch(conn, mode).await);
            }

            ClientEvent::PlayCommand { position } => {
                self.fire(
                    self.controller
                        .host_broadcast(conn, ServerEvent::PlayCommand { position })
                        .await,
                );
            }

            ClientEvent::PauseCommand { position } => {
                self.fire(
                    self.controller
                        .host_broadcast(conn, ServerEvent::PauseCommand { position })
                        .await,
                );
            }

            ClientEvent::SeekCommand { position } => {
                self.fire(
                    self.controller
                        .host_broadcast(conn, ServerEvent::SeekCommand { position })
                        .await,
                );
            }

            ClientEvent::AudioPlay { position } => {
                self.fire(
                    self.controller
                        .host_broadcast(conn, ServerEvent::AudioPlay { position })
                        .await,
                );
            }

            ClientEvent::AudioPause => {
                self.fire(
                    self.controller
                        .host_broadcast(conn, ServerEvent::AudioPause)
                        .await,
                );
            }

            ClientEvent::CloseRoom => {
                self.fire(self.controller.close_room(conn).await);
            }
        }
    }

    fn reply(&self, connection: &str, event: &ServerEvent) {
        self.sink.unicast(connection, event);
    }

    fn reply_error(&self, connection: &str, err: &RcError) {
        self.reply(connection, &ServerEvent::error(err));
    }

    /// Fire-and-forget operations only fail when the actor is gone.
    fn fire(&self, result: Result<(), RcError>) {
        if let Err(err) = result {
            warn!(target: "rc.gateway", error = %err, "Controller unavailable");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::actors::ControllerMetrics;
    use crate::test_support::{b64, test_config, RecordingSink};

    fn gateway() -> (EventGateway, RoomControllerHandle, Arc<RecordingSink>) {
        let sink = RecordingSink::new();
        let controller = RoomControllerHandle::new(
            &test_config(),
            Arc::clone(&sink) as Arc<dyn EventSink>,
            ControllerMetrics::new(),
        );
        (
            EventGateway::new(controller.clone(), Arc::clone(&sink) as Arc<dyn EventSink>),
            controller,
            sink,
        )
    }

    fn created_code(sink: &RecordingSink, connection: &str) -> String {
        match sink.last_for(connection) {
            Some(ServerEvent::RoomCreated { room }) => room.code,
            other => panic!("expected room-created reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_and_join_through_wire_frames() {
        let (gateway, _controller, sink) = gateway();

        gateway
            .dispatch_text(
                "conn-h",
                r#"{"event":"create-room","data":{"identity":"host-1"}}"#,
            )
            .await;
        let code = created_code(&sink, "conn-h");

        gateway
            .dispatch_text(
                "conn-g",
                &format!(r#"{{"event":"join-room","data":{{"code":"{code}","identity":"guest-1"}}}}"#),
            )
            .await;

        assert!(matches!(
            sink.last_for("conn-g"),
            Some(ServerEvent::RoomJoined { room }) if room.code == code
        ));
        assert!(sink.events_for("conn-h").iter().any(|e| matches!(
            e,
            ServerEvent::GuestJoined { identity, guest_count: 1 } if identity == "guest-1"
        )));
    }

    #[tokio::test]
    async fn test_join_error_reply() {
        let (gateway, _controller, sink) = gateway();

        gateway
            .dispatch(
                "conn-g",
                ClientEvent::JoinRoom {
                    code: "ZZZZZZ".to_string(),
                    identity: "guest-1".to_string(),
                },
            )
            .await;

        assert!(matches!(
            sink.last_for("conn-g"),
            Some(ServerEvent::Error { code, .. }) if code == "NOT_FOUND"
        ));
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let (gateway, _controller, sink) = gateway();

        gateway.dispatch_text("conn-x", "not json at all").await;
        gateway
            .dispatch_text("conn-x", r#"{"event":"no-such-event"}"#)
            .await;
        // Missing required field
        gateway
            .dispatch_text("conn-x", r#"{"event":"join-room","data":{"code":"ABCDEF"}}"#)
            .await;

        assert!(sink.all().is_empty());
    }

    #[tokio::test]
    async fn test_relay_chunk_with_bad_base64_is_dropped() {
        let (gateway, controller, sink) = gateway();

        gateway
            .dispatch(
                "conn-h",
                ClientEvent::CreateRoom {
                    identity: "host-1".to_string(),
                },
            )
            .await;
        let code = created_code(&sink, "conn-h");
        gateway
            .dispatch(
                "conn-g",
                ClientEvent::JoinRoom {
                    code,
                    identity: "guest-1".to_string(),
                },
            )
            .await;
        gateway
            .dispatch(
                "conn-h",
                ClientEvent::RelayStart {
                    total_chunks: 2,
                    file: None,
                },
            )
            .await;
        sink.clear();

        gateway
            .dispatch(
                "conn-h",
                ClientEvent::RelayChunk {
                    index: 0,
                    payload: "%%% not base64 %%%".to_string(),
                    is_last: false,
                },
            )
            .await;
        let _ = controller.status().await.unwrap();
        assert!(sink.all().is_empty());

        // A valid chunk flows through to the guest
        gateway
            .dispatch(
                "conn-h",
                ClientEvent::RelayChunk {
                    index: 0,
                    payload: b64(b"zero"),
                    is_last: false,
                },
            )
            .await;
        // Barrier: the mailbox is FIFO, so a status round-trip means the
        // chunk was processed
        let _ = controller.status().await.unwrap();

        let expected = b64(b"zero");
        assert!(sink.events_for("conn-g").iter().any(|e| matches!(
            e,
            ServerEvent::RelayChunk { index: 0, payload, .. } if *payload == expected
        )));
    }

    #[tokio::test]
    async fn test_host_rejoin_not_found_reply() {
        let (gateway, _controller, sink) = gateway();

        gateway
            .dispatch(
                "conn-h",
                ClientEvent::HostRejoin {
                    code: "ABCDEF".to_string(),
                    identity: "host-9".to_string(),
                },
            )
            .await;

        assert!(matches!(
            sink.last_for("conn-h"),
            Some(ServerEvent::Error { code, .. }) if code == "NOT_FOUND"
        ));
    }
}
