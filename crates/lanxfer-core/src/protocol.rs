//! Wire format for one TCP session (sender → receiver unless noted).
//!
//! ```text
//! [0..4]      Descriptor length N (u32 BE), 0 < N <= max_metadata_size
//! [4..4+N]    Descriptor JSON (TransferDescriptor)
//!                               ← receiver: 1 byte META_ACCEPTED / META_REJECTED
//!                                           / META_IO_FAILED
//! for each entry, in descriptor order:
//!   [size]    Raw entry bytes, sent in chunks of at most buffer_size
//!   [hex_len] Lowercase hex digest of the entry (64 bytes for SHA-256)
//!                               ← receiver: 1 byte ENTRY_VERIFIED / ENTRY_MISMATCH
//!                                           / ENTRY_IO_FAILED
//! ```
//!
//! Entry boundaries are implicit: both ends know every entry's size from the
//! descriptor, so no delimiter is sent between entries.
//!
//! `META_REJECTED`, `META_IO_FAILED` and `ENTRY_IO_FAILED` are followed by
//! the receiver closing the connection. A receiver that fails to write an
//! entry still reads the rest of its bytes and its digest first, so the
//! status byte reaches a sender that is waiting for it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransferError;
use crate::hash::HashAlgorithm;

/// Size of the big-endian descriptor length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Receiver accepted the descriptor; entry bytes may follow.
pub const META_ACCEPTED: u8 = 0x01;

/// Receiver rejected the descriptor and is closing the connection.
pub const META_REJECTED: u8 = 0x00;

/// Descriptor was fine but the receiver could not create its destination.
pub const META_IO_FAILED: u8 = 0x02;

/// Receiver's digest matched the sender's for the entry just sent.
pub const ENTRY_VERIFIED: u8 = 0x01;

/// Receiver's digest differed from the sender's for the entry just sent.
pub const ENTRY_MISMATCH: u8 = 0x00;

/// Receiver could not write the entry just sent; the session ends.
pub const ENTRY_IO_FAILED: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferKind {
    SingleFile,
    Directory,
}

impl TransferKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleFile => "single-file",
            Self::Directory => "directory",
        }
    }
}

/// One entry as announced on the wire. `path` is relative to the transfer
/// root and always uses `/` separators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDescriptor {
    pub path: String,
    pub size: u64,
}

/// Pre-transfer manifest. Built by the sender before connecting and never
/// modified after it has been serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDescriptor {
    pub kind: TransferKind,
    pub name: String,
    pub total_size: u64,
    pub total_entries: u64,
    pub algorithm: HashAlgorithm,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<EntryDescriptor>,
}

impl TransferDescriptor {
    /// Build a descriptor whose totals are derived from `entries`.
    pub fn new(
        kind: TransferKind,
        name: impl Into<String>,
        entries: Vec<EntryDescriptor>,
        algorithm: HashAlgorithm,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            total_size: entries.iter().map(|e| e.size).sum(),
            total_entries: entries.len() as u64,
            algorithm,
            created_at: Utc::now(),
            entries,
        }
    }

    /// Check every invariant the receiver relies on before touching the disk.
    pub fn validate(&self) -> Result<(), TransferError> {
        validate_root_name(&self.name)?;

        if self.total_entries != self.entries.len() as u64 {
            return Err(TransferError::protocol(format!(
                "descriptor declares {} entries but lists {}",
                self.total_entries,
                self.entries.len()
            )));
        }

        if self.kind == TransferKind::SingleFile && self.entries.len() != 1 {
            return Err(TransferError::protocol(format!(
                "single-file transfer lists {} entries",
                self.entries.len()
            )));
        }

        let mut sum: u64 = 0;
        let mut seen = HashSet::with_capacity(self.entries.len());
        for entry in &self.entries {
            if self.kind == TransferKind::Directory {
                validate_relative_path(&entry.path)?;
            }
            if !seen.insert(entry.path.as_str()) {
                return Err(TransferError::protocol(format!(
                    "duplicate entry path {:?}",
                    entry.path
                )));
            }
            sum = sum
                .checked_add(entry.size)
                .ok_or_else(|| TransferError::protocol("entry sizes overflow u64"))?;
        }

        if sum != self.total_size {
            return Err(TransferError::protocol(format!(
                "descriptor declares {} bytes but entries sum to {}",
                self.total_size, sum
            )));
        }
        Ok(())
    }

    /// Serialize as a length-prefixed frame ready to write to the socket.
    pub fn encode(&self, max_size: usize) -> Result<Vec<u8>, TransferError> {
        let payload = serde_json::to_vec(self)
            .map_err(|e| TransferError::protocol(format!("cannot serialize descriptor: {}", e)))?;
        if payload.len() > max_size || payload.len() > u32::MAX as usize {
            return Err(TransferError::protocol(format!(
                "descriptor is {} bytes, limit is {}",
                payload.len(),
                max_size
            )));
        }

        let mut frame = Vec::with_capacity(LENGTH_PREFIX + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Parse and validate a descriptor payload (without its length prefix).
    pub fn decode(payload: &[u8]) -> Result<Self, TransferError> {
        let descriptor: Self = serde_json::from_slice(payload)
            .map_err(|e| TransferError::protocol(format!("malformed descriptor: {}", e)))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Directory (or file) this transfer materializes under `received_dir`.
    pub fn root_path(&self, received_dir: &Path) -> PathBuf {
        received_dir.join(&self.name)
    }

    /// Where `entry` lands under `received_dir`. Single-file transfers write
    /// straight into `received_dir` under the declared name; directory
    /// transfers recreate the relative structure under `received_dir/name`.
    pub fn destination(&self, received_dir: &Path, entry: &EntryDescriptor) -> PathBuf {
        match self.kind {
            TransferKind::SingleFile => received_dir.join(&self.name),
            TransferKind::Directory => entry
                .path
                .split('/')
                .fold(self.root_path(received_dir), |acc, part| acc.join(part)),
        }
    }
}

/// Decode the 4-byte length prefix.
pub fn decode_length(prefix: [u8; LENGTH_PREFIX], max_size: usize) -> Result<usize, TransferError> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len == 0 {
        return Err(TransferError::protocol("descriptor length prefix is zero"));
    }
    if len > max_size {
        return Err(TransferError::protocol(format!(
            "descriptor length {} exceeds limit {}",
            len, max_size
        )));
    }
    Ok(len)
}

fn validate_root_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
    {
        return Err(TransferError::protocol(format!("invalid transfer name {:?}", name)));
    }
    Ok(())
}

/// Reject anything that could escape the transfer root once joined.
fn validate_relative_path(path: &str) -> Result<(), TransferError> {
    let bad = path.is_empty()
        || path.split('/').any(|part| {
            part.is_empty()
                || part == "."
                || part == ".."
                || part.contains(|c: char| matches!(c, '\\' | ':' | '\0'))
        });
    if bad {
        return Err(TransferError::protocol(format!("invalid entry path {:?}", path)));
    }
    Ok(())
}
