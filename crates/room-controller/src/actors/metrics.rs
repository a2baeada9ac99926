//! Controller metrics and mailbox monitoring.
//!
//! `ControllerMetrics` holds the live counters reported by the `/status`
//! endpoint; `MailboxMonitor` tracks mailbox depth with warning thresholds.
//! Prometheus series are emitted with the `rc_` prefix.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth above which a debug note is logged.
pub const MAILBOX_NORMAL: usize = 100;
/// Mailbox depth above which a warning is logged.
pub const MAILBOX_WARNING: usize = 500;

/// Mailbox monitor for tracking queue depth.
#[derive(Debug)]
pub struct MailboxMonitor {
    /// Actor identifier for log context.
    actor_id: String,
    /// Current mailbox depth.
    depth: AtomicUsize,
    /// Total messages processed.
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    /// Create a new mailbox monitor.
    #[must_use]
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;

        if new_depth > MAILBOX_WARNING {
            warn!(
                target: "rc.actor.mailbox",
                actor_id = %self.actor_id,
                depth = new_depth,
                threshold = MAILBOX_WARNING,
                "Mailbox depth critical"
            );
        } else if new_depth == MAILBOX_NORMAL {
            debug!(
                target: "rc.actor.mailbox",
                actor_id = %self.actor_id,
                depth = new_depth,
                "Mailbox depth elevated"
            );
        }
    }

    /// Record a message being removed from the mailbox (processed).
    pub fn record_dequeue(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current mailbox depth.
    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Get total messages processed.
    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }
}

/// Live counters shared between the controller actor (writer) and the
/// `/status` endpoint (reader). All fields are atomic for lock-free
/// concurrent access.
#[derive(Debug, Default)]
pub struct ControllerMetrics {
    /// Current number of live rooms.
    rooms: AtomicU64,
    /// Current number of participants across all rooms.
    participants: AtomicU64,
    /// Current number of in-flight relay sessions.
    relay_sessions: AtomicU64,
    /// Total relay chunks buffered and forwarded.
    relay_chunks: AtomicU64,
}

/// Snapshot of controller metrics at a point in time.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ControllerMetricsSnapshot {
    /// Current number of live rooms.
    pub rooms: u64,
    /// Current number of participants.
    pub participants: u64,
    /// Current number of relay sessions.
    pub relay_sessions: u64,
    /// Total relay chunks handled.
    pub relay_chunks: u64,
}

impl ControllerMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Update the live room count.
    pub fn set_rooms(&self, count: u64) {
        self.rooms.store(count, Ordering::SeqCst);
        metrics::gauge!("rc_rooms").set(count as f64);
    }

    /// Update the live participant count.
    pub fn set_participants(&self, count: u64) {
        self.participants.store(count, Ordering::SeqCst);
        metrics::gauge!("rc_participants").set(count as f64);
    }

    /// Update the in-flight relay session count.
    pub fn set_relay_sessions(&self, count: u64) {
        self.relay_sessions.store(count, Ordering::SeqCst);
        metrics::gauge!("rc_relay_sessions").set(count as f64);
    }

    /// Count one relayed chunk.
    pub fn record_relay_chunk(&self) {
        self.relay_chunks.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("rc_relay_chunks_total").increment(1);
    }

    /// Read all counters at once.
    #[must_use]
    pub fn snapshot(&self) -> ControllerMetricsSnapshot {
        ControllerMetricsSnapshot {
            rooms: self.rooms.load(Ordering::SeqCst),
            participants: self.participants.load(Ordering::SeqCst),
            relay_sessions: self.relay_sessions.load(Ordering::SeqCst),
            relay_chunks: self.relay_chunks.load(Ordering::Relaxed),
        }
    }
}
