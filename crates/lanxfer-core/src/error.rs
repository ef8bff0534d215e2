use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failure to build a manifest from a source path. The transfer never starts.
#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("source path {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("cannot read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is neither a regular file nor a directory, or its name is not valid UTF-8", .0.display())]
    Unsupported(PathBuf),
}

/// Fatal session errors. Checksum mismatches are not errors: they are
/// reported per entry in the [`TransferReport`](crate::session::TransferReport).
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Enumeration(#[from] EnumerationError),

    #[error("connection with {addr} failed: {source}")]
    Connection {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TransferError {
    pub fn connection(addr: impl ToString, source: io::Error) -> Self {
        Self::Connection {
            addr: addr.to_string(),
            source,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Short kind label for user-facing reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Enumeration(_) => "EnumerationError",
            Self::Connection { .. } => "ConnectionError",
            Self::Protocol(_) => "ProtocolError",
            Self::Io { .. } => "IOError",
        }
    }

    /// True when the peer closed the stream before the expected bytes arrived.
    pub(crate) fn is_peer_eof(&self) -> bool {
        matches!(self, Self::Connection { source, .. } if source.kind() == io::ErrorKind::UnexpectedEof)
    }
}
