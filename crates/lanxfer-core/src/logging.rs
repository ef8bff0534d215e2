/// Structured transfer logging.
///
/// Listener and sessions report lifecycle events through a [`TransferLogger`]
/// so the host decides where they go: `tracing`, a progress dashboard, or
/// nowhere.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::progress::Progress;

/// Structured log entry for one session (or the listener, with a nil id).
#[derive(Debug, Clone)]
pub struct TransferLog {
    pub component: &'static str,
    pub transfer_id: Uuid,
    pub event: TransferEvent,
}

#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Listener: socket bound and accepting
    ListenerStarted { bind_addr: String },
    /// Listener: new connection handed to a session
    ConnectionAccepted { peer: String },
    /// Listener: stop requested, loop exited
    ListenerStopped { sessions: u64 },
    /// Sender: TCP connection established
    Connected { peer: String },
    /// Sender: descriptor written and accepted
    DescriptorSent {
        kind: &'static str,
        name: String,
        entries: u64,
        bytes: u64,
    },
    /// Receiver: descriptor parsed and validated
    DescriptorAccepted {
        name: String,
        entries: u64,
        bytes: u64,
    },
    /// Receiver: descriptor refused before anything touched the disk
    DescriptorRejected { reason: String },
    EntryStarted {
        index: u64,
        path: String,
        size: u64,
    },
    EntryVerified {
        index: u64,
        path: String,
        digest: String,
    },
    /// Digests differ. `actual` is unknown on the sending side.
    ChecksumMismatch {
        index: u64,
        path: String,
        expected: String,
        actual: Option<String>,
    },
    TransferComplete {
        bytes: u64,
        entries: u64,
        mismatches: u64,
        duration_ms: u64,
    },
    Cancelled { bytes_done: u64 },
    Error { kind: &'static str, message: String },
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListenerStarted { bind_addr } => {
                write!(f, "listener_started bind={}", bind_addr)
            }
            Self::ConnectionAccepted { peer } => {
                write!(f, "connection_accepted peer={}", peer)
            }
            Self::ListenerStopped { sessions } => {
                write!(f, "listener_stopped sessions={}", sessions)
            }
            Self::Connected { peer } => write!(f, "connected peer={}", peer),
            Self::DescriptorSent { kind, name, entries, bytes } => {
                write!(f, "descriptor_sent kind={} name={} entries={} bytes={}", kind, name, entries, bytes)
            }
            Self::DescriptorAccepted { name, entries, bytes } => {
                write!(f, "descriptor_accepted name={} entries={} bytes={}", name, entries, bytes)
            }
            Self::DescriptorRejected { reason } => {
                write!(f, "descriptor_rejected: {}", reason)
            }
            Self::EntryStarted { index, path, size } => {
                write!(f, "entry_started idx={} path={} size={}", index, path, size)
            }
            Self::EntryVerified { index, path, digest } => {
                write!(f, "entry_verified idx={} path={} digest={}", index, path, digest)
            }
            Self::ChecksumMismatch { index, path, expected, actual } => match actual {
                Some(actual) => write!(
                    f,
                    "checksum_mismatch idx={} path={} expected={} actual={}",
                    index, path, expected, actual
                ),
                None => write!(f, "checksum_mismatch idx={} path={} expected={}", index, path, expected),
            },
            Self::TransferComplete { bytes, entries, mismatches, duration_ms } => {
                write!(
                    f,
                    "transfer_complete bytes={} entries={} mismatches={} duration_ms={}",
                    bytes, entries, mismatches, duration_ms
                )
            }
            Self::Cancelled { bytes_done } => write!(f, "cancelled bytes_done={}", bytes_done),
            Self::Error { kind, message } => write!(f, "error kind={}: {}", kind, message),
        }
    }
}

/// Sink for transfer events. Implementations may also want the live
/// [`Progress`] of each session, which is offered once the totals are known.
pub trait TransferLogger: Send + Sync {
    fn log(&self, entry: TransferLog);

    fn attach_progress(&self, _transfer_id: Uuid, _progress: &Arc<Progress>) {}
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl TransferLogger for TracingLogger {
    fn log(&self, entry: TransferLog) {
        let tid = entry.transfer_id.simple();
        // info for lifecycle, debug for per-entry spam, warn when something went wrong
        match &entry.event {
            TransferEvent::ChecksumMismatch { .. }
            | TransferEvent::DescriptorRejected { .. }
            | TransferEvent::Error { .. } => {
                tracing::warn!(component = entry.component, transfer_id = %tid, "{}", entry.event);
            }
            TransferEvent::EntryStarted { .. } | TransferEvent::EntryVerified { .. } => {
                tracing::debug!(component = entry.component, transfer_id = %tid, "{}", entry.event);
            }
            _ => {
                tracing::info!(component = entry.component, transfer_id = %tid, "{}", entry.event);
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl TransferLogger for NullLogger {
    fn log(&self, _entry: TransferLog) {}
}
