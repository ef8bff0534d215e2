//! lanxfer: direct TCP file transfer between two hosts on a LAN.
//!
//! One sender, one receiver, one active transfer at a time:
//! - Sender: enumerate source → connect → length-prefixed JSON descriptor →
//!   raw entry bytes in bounded chunks, each entry followed by its hex digest
//! - Receiver: accept → validate descriptor → write + hash every chunk as it
//!   lands → compare digests and answer with a one-byte status per entry
//! - Progress counters are plain atomics written on the I/O thread and polled
//!   by any number of observer threads
//! - Cancellation is cooperative, checked between chunks and on every socket
//!   poll tick

pub mod cancel;
pub mod config;
mod connection;
pub mod enumerate;
pub mod error;
pub mod hash;
pub mod listener;
pub mod logging;
pub mod progress;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod session;

// Re-export key types for convenience.
pub use cancel::CancelToken;
pub use config::{ConfigError, TransferConfig};
pub use enumerate::{Manifest, SourceEntry, enumerate_source};
pub use error::{EnumerationError, TransferError};
pub use hash::{HashAlgorithm, Hasher, hash_file, hash_reader};
pub use listener::{Listener, ListenerSummary, ReceivedSession};
pub use logging::{NullLogger, TracingLogger, TransferEvent, TransferLog, TransferLogger};
pub use progress::{Progress, ProgressSnapshot, SpeedWindow};
pub use protocol::{EntryDescriptor, TransferDescriptor, TransferKind};
pub use session::{EntryReport, EntryStatus, Session, SessionState, TransferReport};
