//! Receiving half of a session.
//!
//! Nothing touches the disk until the descriptor has been read in full and
//! validated. After that, every chunk is written and hashed as it lands, so
//! an entry's digest is ready the moment its last byte is on disk.
//!
//! Files written before a failure or cancellation are left in place. A local
//! write failure ends the session, but only after the failed entry's bytes
//! and digest have been read, so the sender gets `ENTRY_IO_FAILED` instead
//! of a dropped connection.

use std::cmp;
use std::fs::{self, File};
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::time::Instant;

use crate::connection::Connection;
use crate::error::TransferError;
use crate::hash::Hasher;
use crate::logging::TransferEvent;
use crate::protocol::{
    ENTRY_IO_FAILED, ENTRY_MISMATCH, ENTRY_VERIFIED, EntryDescriptor, LENGTH_PREFIX, META_ACCEPTED,
    META_IO_FAILED, META_REJECTED, TransferDescriptor, TransferKind, decode_length,
};
use crate::session::{EntryStatus, Halt, Session, SessionState, TransferReport};

const COMPONENT: &str = "receiver";

impl Session {
    /// Run the receiving side over a freshly accepted stream.
    pub fn receive(self, stream: TcpStream, peer: SocketAddr) -> Result<TransferReport, TransferError> {
        let started = Instant::now();
        let mut report = TransferReport::empty(self.transfer_id);
        let result = self.run_receive(stream, peer, &mut report);
        self.finish(COMPONENT, report, result, started)
    }

    fn run_receive(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        report: &mut TransferReport,
    ) -> Result<(), Halt> {
        let mut conn = Connection::accepted(stream, peer, &self.config, self.cancel.clone())?;

        self.progress.set_state(SessionState::MetadataExchange);
        let descriptor = match self.read_descriptor(&mut conn) {
            Ok(descriptor) => descriptor,
            Err(Halt::Failed(err @ TransferError::Protocol(_))) => {
                self.reject(&mut conn, &err);
                return Err(err.into());
            }
            Err(halt) => return Err(halt),
        };

        // Single-file transfers land directly in received_dir.
        let root = match descriptor.kind {
            TransferKind::SingleFile => self.config.received_dir.clone(),
            TransferKind::Directory => descriptor.root_path(&self.config.received_dir),
        };
        if let Err(e) = fs::create_dir_all(&root) {
            let err = TransferError::io(&root, e);
            let _ = conn.write_all(&[META_IO_FAILED]);
            return Err(err.into());
        }

        *report = TransferReport::for_descriptor(self.transfer_id, &descriptor);
        self.logger.attach_progress(self.transfer_id, &self.progress);
        conn.write_all(&[META_ACCEPTED])?;
        self.emit(
            COMPONENT,
            TransferEvent::DescriptorAccepted {
                name: descriptor.name.clone(),
                entries: descriptor.total_entries,
                bytes: descriptor.total_size,
            },
        );

        self.progress.begin(descriptor.total_size, descriptor.total_entries);
        self.progress.set_state(SessionState::Streaming);

        let digest_len = descriptor.algorithm.hex_len();
        let mut buf = vec![0u8; self.config.buffer_size];
        let mut declared = vec![0u8; digest_len];
        for (index, entry) in descriptor.entries.iter().enumerate() {
            self.check_cancelled()?;
            self.progress.set_current_entry(&entry.path);
            self.emit(
                COMPONENT,
                TransferEvent::EntryStarted {
                    index: index as u64,
                    path: entry.path.clone(),
                    size: entry.size,
                },
            );

            let written = self.receive_entry(&mut conn, &descriptor, entry, &mut buf)?;

            conn.read_exact(&mut declared)?;
            let actual = match written {
                Ok(actual) => actual,
                Err(err) => {
                    let _ = conn.write_all(&[ENTRY_IO_FAILED]);
                    return Err(err.into());
                }
            };
            let expected = parse_digest(&declared, &entry.path)?;
            let matched = expected == actual;
            conn.write_all(&[if matched { ENTRY_VERIFIED } else { ENTRY_MISMATCH }])?;

            let record = &mut report.entries[index];
            record.digest = Some(actual.clone());
            record.peer_digest = Some(expected.clone());
            if matched {
                record.status = EntryStatus::Verified;
                self.emit(
                    COMPONENT,
                    TransferEvent::EntryVerified {
                        index: index as u64,
                        path: entry.path.clone(),
                        digest: actual,
                    },
                );
            } else {
                record.status = EntryStatus::ChecksumMismatch;
                self.emit(
                    COMPONENT,
                    TransferEvent::ChecksumMismatch {
                        index: index as u64,
                        path: entry.path.clone(),
                        expected,
                        actual: Some(actual),
                    },
                );
            }
            self.progress.finish_entry();
        }

        self.progress.set_state(SessionState::Verifying);
        Ok(())
    }

    /// Read the length prefix and the payload, then parse and validate.
    /// A peer that hangs up anywhere in here has broken the protocol.
    fn read_descriptor(&self, conn: &mut Connection) -> Result<TransferDescriptor, Halt> {
        let as_protocol = |halt: Halt, what: &str| match halt {
            Halt::Failed(err) if err.is_peer_eof() => {
                Halt::Failed(TransferError::protocol(format!("connection closed before {}", what)))
            }
            other => other,
        };

        let mut prefix = [0u8; LENGTH_PREFIX];
        conn.read_exact(&mut prefix)
            .map_err(|h| as_protocol(h, "the descriptor length prefix"))?;
        let len = decode_length(prefix, self.config.max_metadata_size)?;

        let mut payload = vec![0u8; len];
        conn.read_exact(&mut payload)
            .map_err(|h| as_protocol(h, "the full descriptor arrived"))?;
        Ok(TransferDescriptor::decode(&payload)?)
    }

    /// Tell the sender the descriptor was refused. The connection is about to
    /// close anyway, so a failed write changes nothing.
    fn reject(&self, conn: &mut Connection, err: &TransferError) {
        let _ = conn.write_all(&[META_REJECTED]);
        self.emit(
            COMPONENT,
            TransferEvent::DescriptorRejected {
                reason: err.to_string(),
            },
        );
    }

    /// Read exactly `entry.size` bytes, writing them to the entry's
    /// destination, and return the digest of what was written.
    ///
    /// The outer error ends the session on the spot. The inner one is a local
    /// write failure: the remaining bytes are still read and discarded so the
    /// caller can answer the sender before giving up.
    fn receive_entry(
        &self,
        conn: &mut Connection,
        descriptor: &TransferDescriptor,
        entry: &EntryDescriptor,
        buf: &mut [u8],
    ) -> Result<Result<String, TransferError>, Halt> {
        let dest = descriptor.destination(&self.config.received_dir, entry);
        let mut sink = create_destination(&dest);
        let mut hasher = Hasher::new(descriptor.algorithm);

        let mut remaining = entry.size;
        while remaining > 0 {
            let want = cmp::min(buf.len() as u64, remaining) as usize;
            let n = conn.read_some(&mut buf[..want])?;
            if let Ok(file) = sink.as_mut() {
                match file.write_all(&buf[..n]) {
                    Ok(()) => hasher.update(&buf[..n]),
                    Err(e) => sink = Err(TransferError::io(&dest, e)),
                }
            }
            self.progress.add_bytes(n as u64);
            remaining -= n as u64;
            self.check_cancelled()?;
        }

        Ok(sink
            .and_then(|mut file| file.flush().map_err(|e| TransferError::io(&dest, e)))
            .map(|()| hasher.finalize_hex()))
    }
}

fn create_destination(dest: &Path) -> Result<File, TransferError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| TransferError::io(parent, e))?;
    }
    File::create(dest).map_err(|e| TransferError::io(dest, e))
}

/// The sender's digest must be hex; compare case-insensitively.
fn parse_digest(raw: &[u8], path: &str) -> Result<String, TransferError> {
    if !raw.iter().all(u8::is_ascii_hexdigit) {
        return Err(TransferError::protocol(format!("malformed digest for {}", path)));
    }
    Ok(String::from_utf8_lossy(raw).to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_digest() {
        assert_eq!(parse_digest(b"ABcd09", "a").unwrap(), "abcd09");
        assert!(matches!(parse_digest(b"zz", "a"), Err(TransferError::Protocol(_))));
    }
}
