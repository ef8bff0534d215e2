//! Transfer session: one complete run of the protocol, send or receive.
//!
//! ```text
//! Idle → Connecting → MetadataExchange → Streaming → Verifying → Completed
//!                                                               → Failed
//!                                                               → Cancelled
//! ```
//!
//! The session owns its [`Connection`](crate::connection::Connection) and any
//! open file handles for its whole run; both are released on every exit path
//! because they are scoped to the run and dropped on return.

use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::logging::{TracingLogger, TransferEvent, TransferLog, TransferLogger};
use crate::progress::Progress;
use crate::protocol::{TransferDescriptor, TransferKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Connecting = 1,
    MetadataExchange = 2,
    Streaming = 3,
    Verifying = 4,
    Completed = 5,
    Failed = 6,
    Cancelled = 7,
}

impl SessionState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::MetadataExchange,
            3 => Self::Streaming,
            4 => Self::Verifying,
            5 => Self::Completed,
            6 => Self::Failed,
            7 => Self::Cancelled,
            _ => Self::Idle,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::MetadataExchange => "exchanging metadata",
            Self::Streaming => "streaming",
            Self::Verifying => "verifying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// Not transferred (yet): the session ended before reaching this entry.
    Pending,
    Verified,
    /// Non-fatal: later entries are still transferred.
    ChecksumMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryReport {
    pub path: String,
    pub size: u64,
    /// Digest computed on this end.
    pub digest: Option<String>,
    /// Digest declared by the sender (receive side only).
    pub peer_digest: Option<String>,
    pub status: EntryStatus,
}

/// Outcome of a session that did not hit a fatal error.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub transfer_id: Uuid,
    pub kind: Option<TransferKind>,
    pub name: String,
    pub total_size: u64,
    pub entries: Vec<EntryReport>,
    pub state: SessionState,
    pub bytes_transferred: u64,
    pub elapsed: Duration,
}

impl TransferReport {
    pub(crate) fn empty(transfer_id: Uuid) -> Self {
        Self {
            transfer_id,
            kind: None,
            name: String::new(),
            total_size: 0,
            entries: Vec::new(),
            state: SessionState::Idle,
            bytes_transferred: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn for_descriptor(transfer_id: Uuid, descriptor: &TransferDescriptor) -> Self {
        Self {
            transfer_id,
            kind: Some(descriptor.kind),
            name: descriptor.name.clone(),
            total_size: descriptor.total_size,
            entries: descriptor
                .entries
                .iter()
                .map(|e| EntryReport {
                    path: e.path.clone(),
                    size: e.size,
                    digest: None,
                    peer_digest: None,
                    status: EntryStatus::Pending,
                })
                .collect(),
            state: SessionState::Idle,
            bytes_transferred: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.state == SessionState::Completed
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &EntryReport> {
        self.entries
            .iter()
            .filter(|e| e.status == EntryStatus::ChecksumMismatch)
    }

    pub fn verified_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == EntryStatus::Verified)
            .count()
    }
}

/// Why a run stopped early. Cancellation is not an error for the caller: it
/// becomes a report in the `Cancelled` state.
#[derive(Debug)]
pub(crate) enum Halt {
    Cancelled,
    Failed(TransferError),
}

impl From<TransferError> for Halt {
    fn from(err: TransferError) -> Self {
        Self::Failed(err)
    }
}

/// A single send or receive run. Consumed by [`Session::send`] or
/// [`Session::receive`].
pub struct Session {
    pub(crate) config: TransferConfig,
    pub(crate) transfer_id: Uuid,
    pub(crate) progress: Arc<Progress>,
    pub(crate) cancel: CancelToken,
    pub(crate) logger: Arc<dyn TransferLogger>,
}

impl Session {
    pub fn new(config: TransferConfig, cancel: CancelToken) -> Self {
        Self {
            config,
            transfer_id: Uuid::new_v4(),
            progress: Arc::new(Progress::new()),
            cancel,
            logger: Arc::new(TracingLogger),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn TransferLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn transfer_id(&self) -> Uuid {
        self.transfer_id
    }

    /// Shared progress counters, safe to poll from any thread.
    pub fn progress(&self) -> Arc<Progress> {
        self.progress.clone()
    }

    pub(crate) fn emit(&self, component: &'static str, event: TransferEvent) {
        self.logger.log(TransferLog {
            component,
            transfer_id: self.transfer_id,
            event,
        });
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), Halt> {
        if self.cancel.is_cancelled() {
            Err(Halt::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Turn the run's result into the caller-facing outcome, updating the
    /// shared state and logging the terminal event.
    pub(crate) fn finish(
        &self,
        component: &'static str,
        mut report: TransferReport,
        result: Result<(), Halt>,
        started: Instant,
    ) -> Result<TransferReport, TransferError> {
        let snapshot = self.progress.snapshot();
        report.bytes_transferred = snapshot.bytes_done;
        report.elapsed = started.elapsed();

        match result {
            Ok(()) => {
                let mismatches = report.mismatches().count() as u64;
                report.state = if mismatches == 0 {
                    SessionState::Completed
                } else {
                    SessionState::Failed
                };
                self.progress.set_state(report.state);
                self.emit(
                    component,
                    TransferEvent::TransferComplete {
                        bytes: report.bytes_transferred,
                        entries: report.entries.len() as u64,
                        mismatches,
                        duration_ms: report.elapsed.as_millis() as u64,
                    },
                );
                Ok(report)
            }
            Err(Halt::Cancelled) => {
                report.state = SessionState::Cancelled;
                self.progress.set_state(SessionState::Cancelled);
                self.emit(
                    component,
                    TransferEvent::Cancelled {
                        bytes_done: report.bytes_transferred,
                    },
                );
                Ok(report)
            }
            Err(Halt::Failed(err)) => {
                self.progress.set_state(SessionState::Failed);
                self.emit(
                    component,
                    TransferEvent::Error {
                        kind: err.kind(),
                        message: err.to_string(),
                    },
                );
                Err(err)
            }
        }
    }
}
