//! `RoomControllerActor` - singleton actor that owns all room and relay
//! state.
//!
//! Every inbound event lands in this actor's mailbox and is processed to
//! completion (state mutation plus outbound forwards) before the next, so
//! no room or relay session is ever mutated from two execution contexts
//! at once. The only asynchronous boundaries are the grace and purge
//! notices, which arrive as ordinary mailbox messages and re-validate
//! both the referent's existence and their generation stamp before acting.
//!
//! # Host Disconnect Handling
//!
//! When the host's connection drops:
//! 1. The room enters the grace window (`host-away` broadcast)
//! 2. A reconnect within the window rebinds the host and cancels the timer
//! 3. On expiry: `host-disconnected` broadcast, relay aborted, room
//!    destroyed exactly once
//!
//! Guests get no grace window: a departed guest only shrinks the room,
//! and an identity-stable rejoin restores the slot without host
//! re-approval.

use crate::config::Config;
use crate::errors::RcError;
use crate::events::ServerEvent;
use crate::relay::RelayManager;
use crate::rooms::{FileInfo, Role, RoomSnapshot, RoomStore};
use crate::timers::ScheduledNotice;
use crate::transport::EventSink;

use super::messages::{ControllerMessage, ControllerStatus};
use super::metrics::{ControllerMetrics, MailboxMonitor};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// Handle to the `RoomControllerActor`.
///
/// This is the public interface for interacting with the controller.
/// Request-reply methods are async and resolve via oneshot channels.
#[derive(Clone)]
pub struct RoomControllerHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
}

impl RoomControllerHandle {
    /// Spawn the controller actor and return a handle to it.
    #[must_use]
    pub fn new(config: &Config, sink: Arc<dyn EventSink>, metrics: Arc<ControllerMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomControllerActor {
            instance_id: config.instance_id.clone(),
            receiver,
            self_sender: sender.clone(),
            cancel_token: cancel_token.clone(),
            store: RoomStore::new(config.max_guests),
            relay: RelayManager::new(config.relay_max_chunks),
            grace_timers: HashMap::new(),
            purge_timers: HashMap::new(),
            timer_generation: 0,
            host_grace: Duration::from_secs(config.host_grace_seconds),
            relay_purge: Duration::from_secs(config.relay_purge_seconds),
            sink,
            metrics,
            mailbox: MailboxMonitor::new(&config.instance_id),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    async fn request<T>(
        &self,
        rx: oneshot::Receiver<T>,
        send: impl std::future::Future<Output = Result<(), mpsc::error::SendError<ControllerMessage>>>,
    ) -> Result<T, RcError> {
        send.await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    async fn post(&self, message: ControllerMessage) -> Result<(), RcError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))
    }

    /// Create a room; `identity` becomes its host. Always succeeds.
    pub async fn create_room(
        &self,
        identity: String,
        connection: String,
    ) -> Result<RoomSnapshot, RcError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            rx,
            self.sender.send(ControllerMessage::CreateRoom {
                identity,
                connection,
                respond_to: tx,
            }),
        )
        .await
    }

    /// Join a room as a guest.
    pub async fn join_room(
        &self,
        code: String,
        identity: String,
        connection: String,
    ) -> Result<RoomSnapshot, RcError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            rx,
            self.sender.send(ControllerMessage::JoinRoom {
                code,
                identity,
                connection,
                respond_to: tx,
            }),
        )
        .await?
    }

    /// Host reclaims its room after a reconnect.
    pub async fn host_rejoin(
        &self,
        code: String,
        identity: String,
        connection: String,
    ) -> Result<Option<RoomSnapshot>, RcError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            rx,
            self.sender.send(ControllerMessage::HostRejoin {
                code,
                identity,
                connection,
                respond_to: tx,
            }),
        )
        .await
    }

    /// Guest reclaims its slot after a reconnect.
    pub async fn guest_rejoin(
        &self,
        code: String,
        identity: String,
        connection: String,
    ) -> Result<Option<RoomSnapshot>, RcError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            rx,
            self.sender.send(ControllerMessage::GuestRejoin {
                code,
                identity,
                connection,
                respond_to: tx,
            }),
        )
        .await
    }

    /// Notify of a dropped transport connection.
    pub async fn connection_closed(&self, connection: String) -> Result<(), RcError> {
        self.post(ControllerMessage::ConnectionClosed { connection })
            .await
    }

    /// Host announces transfer metadata.
    pub async fn file_info(&self, connection: String, file: FileInfo) -> Result<(), RcError> {
        self.post(ControllerMessage::FileInfo { connection, file })
            .await
    }

    /// Forward a readiness ping.
    pub async fn guest_ready(
        &self,
        connection: String,
        target: Option<String>,
    ) -> Result<(), RcError> {
        self.post(ControllerMessage::GuestReady { connection, target })
            .await
    }

    /// Forward an opaque signaling envelope.
    pub async fn signal(
        &self,
        connection: String,
        target: String,
        kind: String,
        payload: Value,
    ) -> Result<(), RcError> {
        self.post(ControllerMessage::Signal {
            connection,
            target,
            kind,
            payload,
        })
        .await
    }

    /// Host starts a relay transfer.
    pub async fn relay_start(
        &self,
        connection: String,
        total_chunks: u32,
        file: Option<FileInfo>,
    ) -> Result<(), RcError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            rx,
            self.sender.send(ControllerMessage::RelayStart {
                connection,
                total_chunks,
                file,
                respond_to: tx,
            }),
        )
        .await?
    }

    /// Buffer and forward one relay chunk.
    pub async fn relay_chunk(
        &self,
        connection: String,
        index: u32,
        payload: Bytes,
        is_last: bool,
    ) -> Result<(), RcError> {
        self.post(ControllerMessage::RelayChunk {
            connection,
            index,
            payload,
            is_last,
        })
        .await
    }

    /// Forward a chunk acknowledgement to the sender.
    pub async fn relay_ack(&self, connection: String, index: u32) -> Result<(), RcError> {
        self.post(ControllerMessage::RelayAck { connection, index })
            .await
    }

    /// Request targeted re-delivery of missing chunks.
    pub async fn relay_retry(&self, connection: String, missing: Vec<u32>) -> Result<(), RcError> {
        self.post(ControllerMessage::RelayRetry {
            connection,
            missing,
        })
        .await
    }

    /// Host cancels the active transfer.
    pub async fn relay_abort(
        &self,
        connection: String,
        reason: Option<String>,
    ) -> Result<(), RcError> {
        self.post(ControllerMessage::RelayAbort { connection, reason })
            .await
    }

    /// Host switches the room's content mode.
    pub async fn mode_switch(
        &self,
        connection: String,
        mode: crate::rooms::ContentMode,
    ) -> Result<(), RcError> {
        self.post(ControllerMessage::ModeSwitch { connection, mode })
            .await
    }

    /// Host-only broadcast of a pre-built event (sync commands, transfer
    /// state).
    pub async fn host_broadcast(
        &self,
        connection: String,
        event: ServerEvent,
    ) -> Result<(), RcError> {
        self.post(ControllerMessage::HostBroadcast { connection, event })
            .await
    }

    /// Host closes the room for everyone.
    pub async fn close_room(&self, connection: String) -> Result<(), RcError> {
        self.post(ControllerMessage::CloseRoom { connection }).await
    }

    /// Get the current controller status.
    pub async fn status(&self) -> Result<ControllerStatus, RcError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            rx,
            self.sender
                .send(ControllerMessage::GetStatus { respond_to: tx }),
        )
        .await
    }

    /// Cancel the actor (process shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for dependent tasks (HTTP server, transport).
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// The `RoomControllerActor` implementation.
struct RoomControllerActor {
    /// Instance ID for log context.
    instance_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<ControllerMessage>,
    /// Sender for timer notices posted back to this mailbox.
    self_sender: mpsc::Sender<ControllerMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    /// Rooms and identity registry.
    store: RoomStore,
    /// In-flight relay sessions.
    relay: RelayManager,
    /// Pending host grace notices by room code.
    grace_timers: HashMap<String, ScheduledNotice>,
    /// Pending relay purge notices by room code.
    purge_timers: HashMap<String, ScheduledNotice>,
    /// Monotonic stamp source for timer notices.
    timer_generation: u64,
    /// Host reconnection grace window.
    host_grace: Duration,
    /// Completed-relay purge delay.
    relay_purge: Duration,
    /// Outbound event delivery.
    sink: Arc<dyn EventSink>,
    /// Shared live counters.
    metrics: Arc<ControllerMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl RoomControllerActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "rc.actor.controller", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "rc.actor.controller",
            instance_id = %self.instance_id,
            "RoomControllerActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.controller",
                        instance_id = %self.instance_id,
                        "RoomControllerActor received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(
                                target: "rc.actor.controller",
                                instance_id = %self.instance_id,
                                "RoomControllerActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.actor.controller",
            instance_id = %self.instance_id,
            messages_processed = self.mailbox.messages_processed(),
            "RoomControllerActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::CreateRoom {
                identity,
                connection,
                respond_to,
            } => {
                let result = self.handle_create_room(&identity, &connection);
                let _ = respond_to.send(result);
            }

            ControllerMessage::JoinRoom {
                code,
                identity,
                connection,
                respond_to,
            } => {
                let result = self.handle_join_room(&code, &identity, &connection);
                let _ = respond_to.send(result);
            }

            ControllerMessage::HostRejoin {
                code,
                identity,
                connection,
                respond_to,
            } => {
                let result = self.handle_host_rejoin(&code, &identity, &connection);
                let _ = respond_to.send(result);
            }

            ControllerMessage::GuestRejoin {
                code,
                identity,
                connection,
                respond_to,
            } => {
                let result = self.handle_guest_rejoin(&code, &identity, &connection);
                let _ = respond_to.send(result);
            }

            ControllerMessage::ConnectionClosed { connection } => {
                self.handle_connection_closed(&connection);
            }

            ControllerMessage::FileInfo { connection, file } => {
                self.handle_file_info(&connection, file);
            }

            ControllerMessage::GuestReady { connection, target } => {
                self.handle_guest_ready(&connection, target.as_deref());
            }

            ControllerMessage::Signal {
                connection,
                target,
                kind,
                payload,
            } => {
                self.handle_signal(&connection, &target, kind, payload);
            }

            ControllerMessage::RelayStart {
                connection,
                total_chunks,
                file,
                respond_to,
            } => {
                let result = self.handle_relay_start(&connection, total_chunks, file);
                let _ = respond_to.send(result);
            }

            ControllerMessage::RelayChunk {
                connection,
                index,
                payload,
                is_last,
            } => {
                self.handle_relay_chunk(&connection, index, payload, is_last);
            }

            ControllerMessage::RelayAck { connection, index } => {
                self.handle_relay_ack(&connection, index);
            }

            ControllerMessage::RelayRetry {
                connection,
                missing,
            } => {
                self.handle_relay_retry(&connection, &missing);
            }

            ControllerMessage::RelayAbort { connection, reason } => {
                self.handle_relay_abort(&connection, reason);
            }

            ControllerMessage::ModeSwitch { connection, mode } => {
                self.handle_mode_switch(&connection, mode);
            }

            ControllerMessage::HostBroadcast { connection, event } => {
                self.handle_host_broadcast(&connection, &event);
            }

            ControllerMessage::CloseRoom { connection } => {
                self.handle_close_room(&connection);
            }

            ControllerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            ControllerMessage::GraceExpired { code, generation } => {
                self.handle_grace_expired(&code, generation);
            }

            ControllerMessage::RelayPurge { code, generation } => {
                self.handle_relay_purge(&code, generation);
            }
        }
    }

    // ------------------------------------------------------------------
    // Room lifecycle
    // ------------------------------------------------------------------

    fn handle_create_room(&mut self, identity: &str, connection: &str) -> RoomSnapshot {
        self.release_foreign_connection(connection, identity);
        self.dissolve_membership(identity);

        let snapshot = self.store.create_room(identity, connection).snapshot();

        info!(
            target: "rc.actor.controller",
            room_code = %snapshot.code,
            total_rooms = self.store.room_count(),
            "Room created"
        );
        self.publish_counts();
        snapshot
    }

    fn handle_join_room(
        &mut self,
        code: &str,
        identity: &str,
        connection: &str,
    ) -> Result<RoomSnapshot, RcError> {
        let code = normalize_code(code);
        self.release_foreign_connection(connection, identity);

        // Same-room re-join just overwrites the guest's connection mapping;
        // any other previous membership is dissolved first.
        let prior = self
            .store
            .membership_of(identity)
            .map(|(code, role)| (code.to_string(), role));
        match prior {
            Some((current, Role::Guest)) if current == code => {}
            Some(_) => self.dissolve_membership(identity),
            None => {}
        }

        let snapshot = self.store.join_room(&code, identity, connection)?.snapshot();

        self.broadcast(
            &code,
            Some(connection),
            &ServerEvent::GuestJoined {
                identity: identity.to_string(),
                guest_count: snapshot.guest_count,
            },
        );

        info!(
            target: "rc.actor.controller",
            room_code = %code,
            guest_count = snapshot.guest_count,
            "Guest joined"
        );
        self.publish_counts();
        Ok(snapshot)
    }

    fn handle_host_rejoin(
        &mut self,
        code: &str,
        identity: &str,
        connection: &str,
    ) -> Option<RoomSnapshot> {
        self.release_foreign_connection(connection, identity);

        let snapshot = self.store.reconnect_host(identity, connection)?.snapshot();

        if normalize_code(code) != snapshot.code {
            debug!(
                target: "rc.actor.controller",
                requested = %code,
                actual = %snapshot.code,
                "Host rejoin carried a stale room code; identity wins"
            );
        }

        // Race-free against expiry: removing the notice both cancels the
        // timer and invalidates any already-fired message's generation.
        self.grace_timers.remove(&snapshot.code);

        self.broadcast(&snapshot.code, Some(connection), &ServerEvent::HostBack);

        info!(
            target: "rc.actor.controller",
            room_code = %snapshot.code,
            "Host reconnected within grace window"
        );
        Some(snapshot)
    }

    fn handle_guest_rejoin(
        &mut self,
        code: &str,
        identity: &str,
        connection: &str,
    ) -> Option<RoomSnapshot> {
        let code = normalize_code(code);
        self.release_foreign_connection(connection, identity);

        // A hosting identity cannot reclaim a guest slot
        if matches!(self.store.membership_of(identity), Some((_, Role::Host))) {
            return None;
        }

        // Still registered (e.g. rebinding without a seen disconnect)
        if let Some(room) = self.store.reconnect_guest(identity, connection) {
            let snapshot = room.snapshot();
            self.broadcast(
                &snapshot.code,
                Some(connection),
                &ServerEvent::GuestBack {
                    identity: identity.to_string(),
                },
            );
            return Some(snapshot);
        }

        // The association was cleared when the guest disconnected;
        // re-enter by code, restoring the same slot.
        match self.store.join_room(&code, identity, connection) {
            Ok(room) => {
                let snapshot = room.snapshot();
                self.broadcast(
                    &code,
                    Some(connection),
                    &ServerEvent::GuestJoined {
                        identity: identity.to_string(),
                        guest_count: snapshot.guest_count,
                    },
                );
                self.publish_counts();
                Some(snapshot)
            }
            Err(err) => {
                debug!(
                    target: "rc.actor.controller",
                    room_code = %code,
                    error = %err,
                    "Guest rejoin failed"
                );
                None
            }
        }
    }

    fn handle_connection_closed(&mut self, connection: &str) {
        let Some(removed) = self.store.remove_connection(connection) else {
            // Connection never joined a room, or was already cleaned up
            return;
        };

        match removed.role {
            Role::Guest => {
                self.broadcast(
                    &removed.room_code,
                    None,
                    &ServerEvent::GuestLeft {
                        identity: removed.identity.clone(),
                        guest_count: removed.remaining_guests,
                    },
                );
                info!(
                    target: "rc.actor.controller",
                    room_code = %removed.room_code,
                    remaining_guests = removed.remaining_guests,
                    "Guest disconnected and removed"
                );
            }
            Role::Host => {
                self.start_grace(&removed.room_code);
            }
        }
        self.publish_counts();
    }

    fn handle_close_room(&mut self, connection: &str) {
        let Some((code, role)) = self.room_role_of(connection) else {
            return;
        };
        if role != Role::Host {
            warn!(
                target: "rc.actor.controller",
                room_code = %code,
                "Non-host attempted to close the room"
            );
            return;
        }

        self.destroy_room_notified(
            &code,
            &ServerEvent::RoomClosed,
            "room-closed",
            Some(connection),
        );
        info!(
            target: "rc.actor.controller",
            room_code = %code,
            "Room closed by host"
        );
    }

    // ------------------------------------------------------------------
    // Grace period
    // ------------------------------------------------------------------

    fn start_grace(&mut self, code: &str) {
        // Idempotent: a second disconnect while a notice is pending is a no-op
        if self.grace_timers.contains_key(code) {
            return;
        }

        let generation = self.next_generation();
        let sender = self.self_sender.clone();
        let code_owned = code.to_string();
        let notice = ScheduledNotice::schedule(generation, self.host_grace, async move {
            let _ = sender
                .send(ControllerMessage::GraceExpired {
                    code: code_owned,
                    generation,
                })
                .await;
        });
        self.grace_timers.insert(code.to_string(), notice);

        self.broadcast(
            code,
            None,
            &ServerEvent::HostAway {
                grace_seconds: self.host_grace.as_secs(),
            },
        );

        info!(
            target: "rc.actor.controller",
            room_code = %code,
            grace_seconds = self.host_grace.as_secs(),
            "Host away, grace window started"
        );
    }

    fn handle_grace_expired(&mut self, code: &str, generation: u64) {
        match self.grace_timers.get(code) {
            Some(notice) if notice.generation() == generation => {}
            _ => {
                debug!(
                    target: "rc.actor.controller",
                    room_code = %code,
                    "Stale grace notice ignored"
                );
                return;
            }
        }
        self.grace_timers.remove(code);

        // The room may have been explicitly destroyed between scheduling
        // and firing
        if self.store.room(code).is_none() {
            return;
        }

        self.destroy_room_notified(
            code,
            &ServerEvent::HostDisconnected,
            "host-disconnected",
            None,
        );
        info!(
            target: "rc.actor.controller",
            room_code = %code,
            "Grace window expired, room destroyed"
        );
    }

    // ------------------------------------------------------------------
    // Signaling forwarder
    // ------------------------------------------------------------------

    fn handle_file_info(&mut self, connection: &str, file: FileInfo) {
        let Some((code, role)) = self.room_role_of(connection) else {
            return;
        };
        if role != Role::Host {
            warn!(
                target: "rc.actor.controller",
                room_code = %code,
                "Ignoring file info from non-host"
            );
            return;
        }

        if let Some(room) = self.store.room_mut(&code) {
            room.file_info = Some(file.clone());
        }
        self.broadcast(&code, Some(connection), &ServerEvent::FileAvailable { file });
    }

    fn handle_guest_ready(&mut self, connection: &str, target: Option<&str>) {
        let Some(from) = self.store.identity_of(connection).map(String::from) else {
            return;
        };
        let Some((code, _)) = self.room_role_of(connection) else {
            return;
        };

        let target_connection = match target {
            Some(target) => self.resolve_target(&code, target),
            None => self
                .store
                .room(&code)
                .and_then(|room| room.host_connection.clone()),
        };

        if let Some(target_connection) = target_connection {
            self.sink
                .unicast(&target_connection, &ServerEvent::GuestReady { from });
        }
    }

    fn handle_signal(&mut self, connection: &str, target: &str, kind: String, payload: Value) {
        let Some(from) = self.store.identity_of(connection).map(String::from) else {
            return;
        };
        let Some((code, _)) = self.room_role_of(connection) else {
            return;
        };

        let Some(target_connection) = self.resolve_target(&code, target) else {
            debug!(
                target: "rc.actor.controller",
                room_code = %code,
                "Dropping signal for unresolvable target"
            );
            return;
        };

        self.sink.unicast(
            &target_connection,
            &ServerEvent::Signal {
                from,
                kind,
                payload,
            },
        );
    }

    fn handle_mode_switch(&mut self, connection: &str, mode: crate::rooms::ContentMode) {
        let Some((code, role)) = self.room_role_of(connection) else {
            return;
        };
        if role != Role::Host {
            warn!(
                target: "rc.actor.controller",
                room_code = %code,
                "Ignoring mode switch from non-host"
            );
            return;
        }

        if let Some(room) = self.store.room_mut(&code) {
            room.current_mode = mode;
        }
        self.broadcast(&code, Some(connection), &ServerEvent::ModeChanged { mode });
    }

    fn handle_host_broadcast(&mut self, connection: &str, event: &ServerEvent) {
        let Some((code, role)) = self.room_role_of(connection) else {
            return;
        };
        if role != Role::Host {
            warn!(
                target: "rc.actor.controller",
                room_code = %code,
                "Ignoring host-only broadcast from non-host"
            );
            return;
        }
        self.broadcast(&code, Some(connection), event);
    }

    // ------------------------------------------------------------------
    // Relay transfer
    // ------------------------------------------------------------------

    fn handle_relay_start(
        &mut self,
        connection: &str,
        total_chunks: u32,
        file: Option<FileInfo>,
    ) -> Result<(), RcError> {
        let Some((code, role)) = self.room_role_of(connection) else {
            return Err(RcError::RoomNotFound(
                "connection is not in a room".to_string(),
            ));
        };
        if role != Role::Host {
            let identity = self
                .store
                .identity_of(connection)
                .unwrap_or("unknown")
                .to_string();
            return Err(RcError::NotHost(identity));
        }

        let Some(host_identity) = self.store.room(&code).map(|r| r.host_identity.clone()) else {
            return Err(RcError::RoomNotFound(code));
        };

        // At most one active session per room
        if self.relay.session(&code).is_some() {
            self.abort_relay(&code, "superseded", Some(connection));
        }

        if self
            .relay
            .start(&code, &host_identity, total_chunks)
            .is_none()
        {
            warn!(
                target: "rc.actor.controller",
                room_code = %code,
                total_chunks,
                "Ignoring relay start with degenerate chunk count"
            );
            return Ok(());
        }

        if let Some(file) = &file {
            if let Some(room) = self.store.room_mut(&code) {
                room.file_info = Some(file.clone());
            }
        }

        self.broadcast(
            &code,
            Some(connection),
            &ServerEvent::RelayReady { total_chunks, file },
        );

        info!(
            target: "rc.actor.controller",
            room_code = %code,
            total_chunks,
            "Relay session started"
        );
        self.publish_counts();
        Ok(())
    }

    fn handle_relay_chunk(&mut self, connection: &str, index: u32, payload: Bytes, is_last: bool) {
        let Some((code, _)) = self.room_role_of(connection) else {
            return;
        };
        let Some(identity) = self.store.identity_of(connection).map(String::from) else {
            return;
        };

        let Some(stored) = self
            .relay
            .add_chunk(&code, &identity, index, payload.clone(), is_last)
        else {
            debug!(
                target: "rc.actor.controller",
                room_code = %code,
                index,
                "Ignoring relay chunk without a matching session"
            );
            return;
        };
        self.metrics.record_relay_chunk();

        // Live forward; the buffer only exists for retries
        self.broadcast(
            &code,
            Some(connection),
            &ServerEvent::RelayChunk {
                index,
                total_chunks: stored.total_chunks,
                is_last,
                payload: BASE64.encode(&payload),
            },
        );

        if stored.completed_now {
            self.arm_purge(&code);
            info!(
                target: "rc.actor.controller",
                room_code = %code,
                total_chunks = stored.total_chunks,
                "Relay transfer completed, purge scheduled"
            );
        }
    }

    fn handle_relay_ack(&mut self, connection: &str, index: u32) {
        let Some((code, _)) = self.room_role_of(connection) else {
            return;
        };
        let Some(from) = self.store.identity_of(connection).map(String::from) else {
            return;
        };
        let Some(sender_identity) = self
            .relay
            .session(&code)
            .map(|s| s.sender_identity.clone())
        else {
            return;
        };

        // Informational only; no server-side state change
        if let Some(sender_connection) = self.store.connection_of(&sender_identity) {
            self.sink
                .unicast(sender_connection, &ServerEvent::RelayAck { index, from });
        }
    }

    fn handle_relay_retry(&mut self, connection: &str, missing: &[u32]) {
        let Some((code, _)) = self.room_role_of(connection) else {
            return;
        };

        for chunk in self.relay.chunks_for_retry(&code, missing) {
            self.sink.unicast(
                connection,
                &ServerEvent::RelayChunk {
                    index: chunk.index,
                    total_chunks: chunk.total_chunks,
                    is_last: chunk.is_last,
                    payload: BASE64.encode(&chunk.payload),
                },
            );
        }
    }

    fn handle_relay_abort(&mut self, connection: &str, reason: Option<String>) {
        let Some((code, role)) = self.room_role_of(connection) else {
            return;
        };
        if role != Role::Host {
            warn!(
                target: "rc.actor.controller",
                room_code = %code,
                "Ignoring relay abort from non-host"
            );
            return;
        }

        let reason = reason.unwrap_or_else(|| "cancelled".to_string());
        if self.abort_relay(&code, &reason, Some(connection)) {
            info!(
                target: "rc.actor.controller",
                room_code = %code,
                reason = %reason,
                "Relay session aborted"
            );
        }
    }

    fn handle_relay_purge(&mut self, code: &str, generation: u64) {
        match self.purge_timers.get(code) {
            Some(notice) if notice.generation() == generation => {}
            _ => {
                debug!(
                    target: "rc.actor.controller",
                    room_code = %code,
                    "Stale purge notice ignored"
                );
                return;
            }
        }
        self.purge_timers.remove(code);

        if self.relay.remove(code).is_some() {
            debug!(
                target: "rc.actor.controller",
                room_code = %code,
                "Completed relay session purged"
            );
            self.publish_counts();
        }
    }

    fn arm_purge(&mut self, code: &str) {
        let generation = self.next_generation();
        let sender = self.self_sender.clone();
        let code_owned = code.to_string();
        let notice = ScheduledNotice::schedule(generation, self.relay_purge, async move {
            let _ = sender
                .send(ControllerMessage::RelayPurge {
                    code: code_owned,
                    generation,
                })
                .await;
        });
        // Overwriting a pending notice invalidates it (generation changes)
        self.purge_timers.insert(code.to_string(), notice);
    }

    /// Remove a relay session immediately and notify the room.
    ///
    /// Returns `false` if the room had no session (idempotent).
    fn abort_relay(&mut self, code: &str, reason: &str, except: Option<&str>) -> bool {
        if self.relay.remove(code).is_none() {
            return false;
        }
        self.purge_timers.remove(code);
        self.broadcast(
            code,
            except,
            &ServerEvent::RelayAborted {
                reason: reason.to_string(),
            },
        );
        self.publish_counts();
        true
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    /// Notify the room, abort any relay session, and destroy the room with
    /// all its associations. Idempotent through `RoomStore::destroy_room`.
    fn destroy_room_notified(
        &mut self,
        code: &str,
        event: &ServerEvent,
        abort_reason: &str,
        except: Option<&str>,
    ) {
        self.abort_relay(code, abort_reason, except);
        self.grace_timers.remove(code);
        self.purge_timers.remove(code);
        self.broadcast(code, except, event);
        self.store.destroy_room(code);
        self.publish_counts();
    }

    /// A connection taking on a new identity releases whatever identity it
    /// carried before (a connection handle maps to at most one (room,
    /// role) pair).
    fn release_foreign_connection(&mut self, connection: &str, identity: &str) {
        if self
            .store
            .identity_of(connection)
            .is_some_and(|existing| existing != identity)
        {
            self.handle_connection_closed(connection);
        }
    }

    /// Dissolve an identity's current membership before it takes on a new
    /// one (one (room, role) pair per identity).
    fn dissolve_membership(&mut self, identity: &str) {
        let Some((code, role)) = self
            .store
            .membership_of(identity)
            .map(|(code, role)| (code.to_string(), role))
        else {
            return;
        };

        match role {
            Role::Host => {
                self.destroy_room_notified(&code, &ServerEvent::RoomClosed, "room-closed", None);
                info!(
                    target: "rc.actor.controller",
                    room_code = %code,
                    "Previous hosted room dissolved"
                );
            }
            Role::Guest => {
                if let Some(connection) = self.store.connection_of(identity).map(String::from) {
                    self.handle_connection_closed(&connection);
                }
            }
        }
    }

    /// Resolve a target (identity first, then raw connection handle) to a
    /// connection inside the given room.
    fn resolve_target(&self, code: &str, target: &str) -> Option<String> {
        if let Some((room_code, _)) = self.store.membership_of(target) {
            if room_code == code {
                return self.store.connection_of(target).map(String::from);
            }
            return None;
        }
        match self.store.room_of_connection(target) {
            Some((room, _)) if room.code == code => Some(target.to_string()),
            _ => None,
        }
    }

    /// Room code and role of a connection, if it belongs to a room.
    fn room_role_of(&self, connection: &str) -> Option<(String, Role)> {
        self.store
            .room_of_connection(connection)
            .map(|(room, role)| (room.code.clone(), role))
    }

    /// Deliver `event` to every current member of `code`, except one
    /// connection. Membership is resolved at forward time.
    fn broadcast(&self, code: &str, except: Option<&str>, event: &ServerEvent) {
        if let Some(room) = self.store.room(code) {
            self.sink.multicast(&room.member_connections(except), event);
        }
    }

    fn get_status(&self) -> ControllerStatus {
        ControllerStatus {
            rooms: self.store.room_count(),
            participants: self.store.participant_count(),
            relay_sessions: self.relay.session_count(),
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    fn publish_counts(&self) {
        self.metrics.set_rooms(self.store.room_count() as u64);
        self.metrics
            .set_participants(self.store.participant_count() as u64);
        self.metrics
            .set_relay_sessions(self.relay.session_count() as u64);
    }

    fn next_generation(&mut self) -> u64 {
        self.timer_generation += 1;
        self.timer_generation
    }

    /// Perform graceful shutdown: tell every room goodbye and drop all
    /// pending timers.
    fn graceful_shutdown(&mut self) {
        info!(
            target: "rc.actor.controller",
            instance_id = %self.instance_id,
            rooms = self.store.room_count(),
            "Performing graceful shutdown"
        );

        for code in self.store.room_codes() {
            self.destroy_room_notified(&code, &ServerEvent::RoomClosed, "shutdown", None);
        }

        self.grace_timers.clear();
        self.purge_timers.clear();

        info!(
            target: "rc.actor.controller",
            instance_id = %self.instance_id,
            "Graceful shutdown complete"
        );
    }
}

/// Room codes are case-insensitive on input; the canonical form is upper.
fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::rooms::ContentMode;
    use crate::test_support::{test_config, test_config_with_capacity, RecordingSink};

    fn spawn() -> (RoomControllerHandle, Arc<RecordingSink>) {
        let sink = RecordingSink::new();
        let handle = RoomControllerHandle::new(
            &test_config(),
            Arc::clone(&sink) as Arc<dyn EventSink>,
            ControllerMetrics::new(),
        );
        (handle, sink)
    }

    /// Fire-and-forget messages are processed in mailbox order; a status
    /// round-trip is therefore a barrier.
    async fn drain(handle: &RoomControllerHandle) {
        let _ = handle.status().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_room_yields_valid_code() {
        let (handle, _sink) = spawn();

        let room = handle
            .create_room("host-1".to_string(), "conn-h".to_string())
            .await
            .unwrap();

        assert_eq!(room.code.len(), crate::codes::CODE_LENGTH);
        assert!(room
            .code
            .bytes()
            .all(|b| crate::codes::CODE_ALPHABET.contains(&b)));
        assert_eq!(room.host_identity, "host-1");
        assert_eq!(room.guest_count, 0);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_join_notifies_host() {
        let (handle, sink) = spawn();

        let room = handle
            .create_room("host-1".to_string(), "conn-h".to_string())
            .await
            .unwrap();
        let joined = handle
            .join_room(room.code.clone(), "guest-1".to_string(), "conn-g".to_string())
            .await
            .unwrap();

        assert_eq!(joined.guest_count, 1);
        assert_eq!(
            sink.last_for("conn-h"),
            Some(ServerEvent::GuestJoined {
                identity: "guest-1".to_string(),
                guest_count: 1,
            })
        );
        // The joining guest does not receive its own join broadcast
        assert_eq!(sink.count_for("conn-g"), 0);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_join_unknown_code() {
        let (handle, _sink) = spawn();

        let result = handle
            .join_room("ZZZZZZ".to_string(), "guest-1".to_string(), "conn-g".to_string())
            .await;
        assert!(matches!(result, Err(RcError::RoomNotFound(_))));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_join_full_room() {
        let sink = RecordingSink::new();
        let handle = RoomControllerHandle::new(
            &test_config_with_capacity(2),
            Arc::clone(&sink) as Arc<dyn EventSink>,
            ControllerMetrics::new(),
        );

        let room = handle
            .create_room("host-1".to_string(), "conn-h".to_string())
            .await
            .unwrap();
        for i in 0..2 {
            handle
                .join_room(
                    room.code.clone(),
                    format!("guest-{i}"),
                    format!("conn-g{i}"),
                )
                .await
                .unwrap();
        }

        let result = handle
            .join_room(room.code.clone(), "guest-9".to_string(), "conn-g9".to_string())
            .await;
        assert!(matches!(result, Err(RcError::RoomFull(_))));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_room_codes_join_case_insensitively() {
        let (handle, _sink) = spawn();

        let room = handle
            .create_room("host-1".to_string(), "conn-h".to_string())
            .await
            .unwrap();
        let joined = handle
            .join_room(
                room.code.to_lowercase(),
                "guest-1".to_string(),
                "conn-g".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(joined.code, room.code);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_guest_disconnect_and_rejoin() {
        let (handle, sink) = spawn();

        let room = handle
            .create_room("host-1".to_string(), "conn-h".to_string())
            .await
            .unwrap();
        handle
            .join_room(room.code.clone(), "guest-1".to_string(), "conn-g1".to_string())
            .await
            .unwrap();

        handle.connection_closed("conn-g1".to_string()).await.unwrap();
        drain(&handle).await;

        assert_eq!(
            sink.last_for("conn-h"),
            Some(ServerEvent::GuestLeft {
                identity: "guest-1".to_string(),
                guest_count: 0,
            })
        );

        // Identity-stable rejoin restores the slot in the same room
        let restored = handle
            .guest_rejoin(room.code.clone(), "guest-1".to_string(), "conn-g2".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(restored.code, room.code);
        assert_eq!(restored.guest_count, 1);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_guest_rejoin_unknown_room() {
        let (handle, _sink) = spawn();

        let restored = handle
            .guest_rejoin("ZZZZZZ".to_string(), "guest-1".to_string(), "conn-g".to_string())
            .await
            .unwrap();
        assert!(restored.is_none());

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_grace_expiry_destroys_room_once() {
        let (handle, sink) = spawn();

        let room = handle
            .create_room("host-1".to_string(), "conn-h".to_string())
            .await
            .unwrap();
        handle
            .join_room(room.code.clone(), "guest-1".to_string(), "conn-g".to_string())
            .await
            .unwrap();

        handle.connection_closed("conn-h".to_string()).await.unwrap();
        drain(&handle).await;

        assert!(sink
            .events_for("conn-g")
            .iter()
            .any(|e| matches!(e, ServerEvent::HostAway { grace_seconds: 50 })));

        // Just inside the window: the room survives
        tokio::time::advance(Duration::from_secs(49)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.status().await.unwrap().rooms, 1);

        // Past the window: destroyed, members notified, associations purged
        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let status = handle.status().await.unwrap();
        assert_eq!(status.rooms, 0);
        assert_eq!(status.participants, 0);
        assert!(sink
            .events_for("conn-g")
            .iter()
            .any(|e| matches!(e, ServerEvent::HostDisconnected)));

        let result = handle
            .join_room(room.code.clone(), "guest-2".to_string(), "conn-g2".to_string())
            .await;
        assert!(matches!(result, Err(RcError::RoomNotFound(_))));

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_rejoin_within_grace_cancels_destruction() {
        let (handle, sink) = spawn();

        let room = handle
            .create_room("host-1".to_string(), "conn-h1".to_string())
            .await
            .unwrap();
        handle
            .join_room(room.code.clone(), "guest-1".to_string(), "conn-g".to_string())
            .await
            .unwrap();

        handle.connection_closed("conn-h1".to_string()).await.unwrap();
        drain(&handle).await;

        tokio::time::advance(Duration::from_secs(20)).await;

        let restored = handle
            .host_rejoin(room.code.clone(), "host-1".to_string(), "conn-h2".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(restored.code, room.code);
        assert_eq!(restored.guest_count, 1);
        assert!(sink
            .events_for("conn-g")
            .iter()
            .any(|e| matches!(e, ServerEvent::HostBack)));

        // Long after the original deadline the room is still addressable
        // under the same code with the same guest set
        tokio::time::advance(Duration::from_secs(120)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let status = handle.status().await.unwrap();
        assert_eq!(status.rooms, 1);
        assert_eq!(status.participants, 2);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_host_rejoin_after_destruction_yields_none() {
        let (handle, _sink) = spawn();

        let result = handle
            .host_rejoin("ZZZZZZ".to_string(), "host-9".to_string(), "conn-h".to_string())
            .await
            .unwrap();
        assert!(result.is_none());

        handle.cancel();
    }

    #[tokio::test]
    async fn test_relay_start_requires_host() {
        let (handle, _sink) = spawn();

        let room = handle
            .create_room("host-1".to_string(), "conn-h".to_string())
            .await
            .unwrap();
        handle
            .join_room(room.code.clone(), "guest-1".to_string(), "conn-g".to_string())
            .await
            .unwrap();

        let result = handle.relay_start("conn-g".to_string(), 3, None).await;
        assert!(matches!(result, Err(RcError::NotHost(_))));

        let result = handle.relay_start("conn-h".to_string(), 3, None).await;
        assert!(result.is_ok());

        handle.cancel();
    }

    #[tokio::test]
    async fn test_relay_chunk_forwarding_and_ack() {
        let (handle, sink) = spawn();

        let room = handle
            .create_room("host-1".to_string(), "conn-h".to_string())
            .await
            .unwrap();
        handle
            .join_room(room.code.clone(), "guest-1".to_string(), "conn-g".to_string())
            .await
            .unwrap();
        handle.relay_start("conn-h".to_string(), 2, None).await.unwrap();

        assert!(sink
            .events_for("conn-g")
            .iter()
            .any(|e| matches!(e, ServerEvent::RelayReady { total_chunks: 2, .. })));

        handle
            .relay_chunk("conn-h".to_string(), 0, Bytes::from_static(b"zero"), false)
            .await
            .unwrap();
        drain(&handle).await;

        let expected_payload = BASE64.encode(b"zero");
        assert!(sink.events_for("conn-g").iter().any(|e| matches!(
            e,
            ServerEvent::RelayChunk { index: 0, total_chunks: 2, is_last: false, payload }
                if *payload == expected_payload
        )));

        // Ack goes to the sender only
        handle.relay_ack("conn-g".to_string(), 0).await.unwrap();
        drain(&handle).await;
        assert!(sink.events_for("conn-h").iter().any(|e| matches!(
            e,
            ServerEvent::RelayAck { index: 0, from } if from == "guest-1"
        )));
        assert!(!sink
            .events_for("conn-g")
            .iter()
            .any(|e| matches!(e, ServerEvent::RelayAck { .. })));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_relay_retry_targets_requester_only() {
        let (handle, sink) = spawn();

        let room = handle
            .create_room("host-1".to_string(), "conn-h".to_string())
            .await
            .unwrap();
        handle
            .join_room(room.code.clone(), "guest-1".to_string(), "conn-g1".to_string())
            .await
            .unwrap();
        handle
            .join_room(room.code.clone(), "guest-2".to_string(), "conn-g2".to_string())
            .await
            .unwrap();
        handle.relay_start("conn-h".to_string(), 3, None).await.unwrap();
        handle
            .relay_chunk("conn-h".to_string(), 1, Bytes::from_static(b"one"), false)
            .await
            .unwrap();
        drain(&handle).await;
        sink.clear();

        // Index 0 is not buffered and is silently skipped
        handle
            .relay_retry("conn-g1".to_string(), vec![0, 1])
            .await
            .unwrap();
        drain(&handle).await;

        let expected_payload = BASE64.encode(b"one");
        let g1_events = sink.events_for("conn-g1");
        assert_eq!(g1_events.len(), 1);
        assert!(matches!(
            g1_events.first().unwrap(),
            ServerEvent::RelayChunk { index: 1, total_chunks: 3, is_last: false, payload }
                if *payload == expected_payload
        ));
        assert_eq!(sink.count_for("conn-g2"), 0);

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_completion_and_deferred_purge() {
        let (handle, sink) = spawn();

        let room = handle
            .create_room("host-1".to_string(), "conn-h".to_string())
            .await
            .unwrap();
        handle
            .join_room(room.code.clone(), "guest-1".to_string(), "conn-g".to_string())
            .await
            .unwrap();
        handle.relay_start("conn-h".to_string(), 2, None).await.unwrap();
        handle
            .relay_chunk("conn-h".to_string(), 0, Bytes::from_static(b"zero"), false)
            .await
            .unwrap();
        handle
            .relay_chunk("conn-h".to_string(), 1, Bytes::from_static(b"one"), true)
            .await
            .unwrap();
        drain(&handle).await;

        assert!(sink
            .events_for("conn-g")
            .iter()
            .any(|e| matches!(e, ServerEvent::RelayChunk { index: 1, is_last: true, .. })));

        // Completed but not yet purged: retries still served
        assert_eq!(handle.status().await.unwrap().relay_sessions, 1);
        handle
            .relay_retry("conn-g".to_string(), vec![0])
            .await
            .unwrap();
        drain(&handle).await;
        assert!(sink
            .events_for("conn-g")
            .iter()
            .any(|e| matches!(e, ServerEvent::RelayChunk { index: 0, .. })));

        // Past the purge delay the session is gone
        tokio::time::advance(Duration::from_secs(301)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.status().await.unwrap().relay_sessions, 0);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_relay_abort_removes_immediately() {
        let (handle, sink) = spawn();

        let room = handle
            .create_room("host-1".to_string(), "conn-h".to_string())
            .await
            .unwrap();
        handle
            .join_room(room.code.clone(), "guest-1".to_string(), "conn-g".to_string())
            .await
            .unwrap();
        handle.relay_start("conn-h".to_string(), 4, None).await.unwrap();

        handle
            .relay_abort("conn-h".to_string(), Some("changed my mind".to_string()))
            .await
            .unwrap();
        drain(&handle).await;

        assert_eq!(handle.status().await.unwrap().relay_sessions, 0);
        assert!(sink.events_for("conn-g").iter().any(|e| matches!(
            e,
            ServerEvent::RelayAborted { reason } if reason == "changed my mind"
        )));

        // Chunks after the abort are silently ignored
        handle
            .relay_chunk("conn-h".to_string(), 0, Bytes::from_static(b"late"), false)
            .await
            .unwrap();
        drain(&handle).await;
        assert_eq!(handle.status().await.unwrap().relay_sessions, 0);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_second_relay_start_supersedes() {
        let (handle, sink) = spawn();

        let room = handle
            .create_room("host-1".to_string(), "conn-h".to_string())
            .await
            .unwrap();
        handle
            .join_room(room.code.clone(), "guest-1".to_string(), "conn-g".to_string())
            .await
            .unwrap();
        handle.relay_start("conn-h".to_string(), 4, None).await.unwrap();
        handle.relay_start("conn-h".to_string(), 8, None).await.unwrap();

        let g_events = sink.events_for("conn-g");
        assert!(g_events.iter().any(|e| matches!(
            e,
            ServerEvent::RelayAborted { reason } if reason == "superseded"
        )));
        assert!(g_events
            .iter()
            .any(|e| matches!(e, ServerEvent::RelayReady { total_chunks: 8, .. })));
        assert_eq!(handle.status().await.unwrap().relay_sessions, 1);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_mode_switch_persists_for_late_joiners() {
        let (handle, sink) = spawn();

        let room = handle
            .create_room("host-1".to_string(), "conn-h".to_string())
            .await
            .unwrap();
        handle
            .join_room(room.code.clone(), "guest-1".to_string(), "conn-g1".to_string())
            .await
            .unwrap();

        handle
            .mode_switch("conn-h".to_string(), ContentMode::Stream)
            .await
            .unwrap();
        drain(&handle).await;

        assert!(sink.events_for("conn-g1").iter().any(|e| matches!(
            e,
            ServerEvent::ModeChanged { mode: ContentMode::Stream }
        )));

        // A late joiner is briefed through the snapshot
        let late = handle
            .join_room(room.code.clone(), "guest-2".to_string(), "conn-g2".to_string())
            .await
            .unwrap();
        assert_eq!(late.current_mode, ContentMode::Stream);

        // Non-host mode switches are ignored
        handle
            .mode_switch("conn-g1".to_string(), ContentMode::ExternalAudio)
            .await
            .unwrap();
        drain(&handle).await;
        let late = handle
            .guest_rejoin(room.code.clone(), "guest-2".to_string(), "conn-g2".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(late.current_mode, ContentMode::Stream);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_file_info_broadcast_and_persistence() {
        let (handle, sink) = spawn();

        let room = handle
            .create_room("host-1".to_string(), "conn-h".to_string())
            .await
            .unwrap();
        handle
            .join_room(room.code.clone(), "guest-1".to_string(), "conn-g".to_string())
            .await
            .unwrap();

        let file = FileInfo {
            name: "movie.mkv".to_string(),
            size: Some(1_450_000_000),
            mime: None,
        };
        handle
            .file_info("conn-h".to_string(), file.clone())
            .await
            .unwrap();
        drain(&handle).await;

        assert!(sink.events_for("conn-g").iter().any(|e| matches!(
            e,
            ServerEvent::FileAvailable { file: f } if f.name == "movie.mkv"
        )));

        // Late joiners see the metadata in the snapshot
        let late = handle
            .join_room(room.code.clone(), "guest-2".to_string(), "conn-g2".to_string())
            .await
            .unwrap();
        assert_eq!(late.file_info, Some(file));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_signal_forwarded_opaque() {
        let (handle, sink) = spawn();

        let room = handle
            .create_room("host-1".to_string(), "conn-h".to_string())
            .await
            .unwrap();
        handle
            .join_room(room.code.clone(), "guest-1".to_string(), "conn-g".to_string())
            .await
            .unwrap();

        let payload = serde_json::json!({"sdp": "v=0\r\no=- 46117 2 IN IP4 127.0.0.1"});
        handle
            .signal(
                "conn-g".to_string(),
                "host-1".to_string(),
                "offer".to_string(),
                payload.clone(),
            )
            .await
            .unwrap();
        drain(&handle).await;

        assert!(sink.events_for("conn-h").iter().any(|e| matches!(
            e,
            ServerEvent::Signal { from, kind, payload: p }
                if from == "guest-1" && kind == "offer" && *p == payload
        )));

        // Unresolvable targets are dropped
        sink.clear();
        handle
            .signal(
                "conn-g".to_string(),
                "nobody".to_string(),
                "offer".to_string(),
                serde_json::json!({}),
            )
            .await
            .unwrap();
        drain(&handle).await;
        assert!(sink.all().is_empty());

        handle.cancel();
    }

    #[tokio::test]
    async fn test_guest_ready_defaults_to_host() {
        let (handle, sink) = spawn();

        let room = handle
            .create_room("host-1".to_string(), "conn-h".to_string())
            .await
            .unwrap();
        handle
            .join_room(room.code.clone(), "guest-1".to_string(), "conn-g".to_string())
            .await
            .unwrap();

        handle
            .guest_ready("conn-g".to_string(), None)
            .await
            .unwrap();
        drain(&handle).await;

        assert!(sink.events_for("conn-h").iter().any(|e| matches!(
            e,
            ServerEvent::GuestReady { from } if from == "guest-1"
        )));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_close_room_destroys_and_notifies() {
        let (handle, sink) = spawn();

        let room = handle
            .create_room("host-1".to_string(), "conn-h".to_string())
            .await
            .unwrap();
        handle
            .join_room(room.code.clone(), "guest-1".to_string(), "conn-g".to_string())
            .await
            .unwrap();

        // Guests cannot close the room
        handle.close_room("conn-g".to_string()).await.unwrap();
        drain(&handle).await;
        assert_eq!(handle.status().await.unwrap().rooms, 1);

        handle.close_room("conn-h".to_string()).await.unwrap();
        drain(&handle).await;

        let status = handle.status().await.unwrap();
        assert_eq!(status.rooms, 0);
        assert_eq!(status.participants, 0);
        assert!(sink
            .events_for("conn-g")
            .iter()
            .any(|e| matches!(e, ServerEvent::RoomClosed)));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_host_broadcast_requires_host() {
        let (handle, sink) = spawn();

        let room = handle
            .create_room("host-1".to_string(), "conn-h".to_string())
            .await
            .unwrap();
        handle
            .join_room(room.code.clone(), "guest-1".to_string(), "conn-g".to_string())
            .await
            .unwrap();
        sink.clear();

        handle
            .host_broadcast(
                "conn-g".to_string(),
                ServerEvent::PlayCommand { position: Some(1.0) },
            )
            .await
            .unwrap();
        drain(&handle).await;
        assert!(sink.all().is_empty());

        handle
            .host_broadcast(
                "conn-h".to_string(),
                ServerEvent::PlayCommand { position: Some(12.5) },
            )
            .await
            .unwrap();
        drain(&handle).await;
        assert!(sink.events_for("conn-g").iter().any(|e| matches!(
            e,
            ServerEvent::PlayCommand { position: Some(p) } if (*p - 12.5).abs() < f64::EPSILON
        )));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_create_room_dissolves_previous_hosted_room() {
        let (handle, sink) = spawn();

        let first = handle
            .create_room("host-1".to_string(), "conn-h1".to_string())
            .await
            .unwrap();
        handle
            .join_room(first.code.clone(), "guest-1".to_string(), "conn-g".to_string())
            .await
            .unwrap();

        let second = handle
            .create_room("host-1".to_string(), "conn-h2".to_string())
            .await
            .unwrap();
        assert_ne!(first.code, second.code);

        let status = handle.status().await.unwrap();
        assert_eq!(status.rooms, 1);
        assert!(sink
            .events_for("conn-g")
            .iter()
            .any(|e| matches!(e, ServerEvent::RoomClosed)));

        let result = handle
            .join_room(first.code, "guest-2".to_string(), "conn-g2".to_string())
            .await;
        assert!(matches!(result, Err(RcError::RoomNotFound(_))));

        handle.cancel();
    }
}
