//! Sending half of a session.
//!
//! ```text
//! enumerate ─→ connect ─→ descriptor ─→ for each entry:
//!                                         hash pass over the file (hash_chunk_size reads)
//!                                         read chunk ─→ socket (buffer_size reads)
//!                                         digest ─→ socket, wait for status byte
//! ```
//!
//! The digest comes from a pass over the file made just before its bytes are
//! sent. A file modified between the two reads shows up as a mismatch on the
//! receiving side instead of being silently accepted.

use std::cmp;
use std::fs::File;
use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Instant;

use crate::connection::Connection;
use crate::enumerate::{Manifest, SourceEntry, enumerate_source};
use crate::error::TransferError;
use crate::logging::TransferEvent;
use crate::protocol::{
    ENTRY_IO_FAILED, ENTRY_MISMATCH, ENTRY_VERIFIED, META_ACCEPTED, META_IO_FAILED, META_REJECTED,
    TransferDescriptor,
};
use crate::session::{EntryStatus, Halt, Session, SessionState, TransferReport};

const COMPONENT: &str = "sender";

impl Session {
    /// Send a file or directory to the listener at `target`. Blocks until the
    /// session reaches a terminal state.
    ///
    /// Checksum mismatches and cancellation come back as `Ok` with the
    /// matching [`SessionState`]; every other failure is an `Err`.
    pub fn send(
        self,
        source: &Path,
        target: SocketAddr,
        local_ip: Option<IpAddr>,
    ) -> Result<TransferReport, TransferError> {
        let started = Instant::now();

        let manifest = match enumerate_source(source) {
            Ok(manifest) => manifest,
            Err(err) => {
                let report = TransferReport::empty(self.transfer_id);
                return self.finish(COMPONENT, report, Err(Halt::Failed(err.into())), started);
            }
        };

        let descriptor = manifest.descriptor(self.config.hash_algorithm);
        let mut report = TransferReport::for_descriptor(self.transfer_id, &descriptor);
        self.logger.attach_progress(self.transfer_id, &self.progress);

        let result = self.run_send(&manifest, &descriptor, &mut report, target, local_ip);
        self.finish(COMPONENT, report, result, started)
    }

    fn run_send(
        &self,
        manifest: &Manifest,
        descriptor: &TransferDescriptor,
        report: &mut TransferReport,
        target: SocketAddr,
        local_ip: Option<IpAddr>,
    ) -> Result<(), Halt> {
        self.check_cancelled()?;
        self.progress.set_state(SessionState::Connecting);
        let mut conn = Connection::connect(target, local_ip, &self.config, self.cancel.clone())?;
        self.emit(
            COMPONENT,
            TransferEvent::Connected {
                peer: conn.peer().to_string(),
            },
        );

        self.progress.set_state(SessionState::MetadataExchange);
        let frame = descriptor.encode(self.config.max_metadata_size)?;
        conn.write_all(&frame)?;
        match conn.read_byte()? {
            META_ACCEPTED => {}
            META_REJECTED => {
                return Err(TransferError::protocol("receiver rejected the transfer descriptor").into());
            }
            META_IO_FAILED => {
                return Err(remote_io_error(
                    &descriptor.name,
                    format!("receiver {} could not create the destination", conn.peer()),
                )
                .into());
            }
            other => {
                return Err(TransferError::protocol(format!(
                    "unexpected descriptor acknowledgement 0x{:02x}",
                    other
                ))
                .into());
            }
        }
        self.emit(
            COMPONENT,
            TransferEvent::DescriptorSent {
                kind: descriptor.kind.as_str(),
                name: descriptor.name.clone(),
                entries: descriptor.total_entries,
                bytes: descriptor.total_size,
            },
        );

        self.progress.begin(descriptor.total_size, descriptor.total_entries);
        self.progress.set_state(SessionState::Streaming);

        let mut buf = vec![0u8; self.config.buffer_size];
        for (index, entry) in manifest.entries.iter().enumerate() {
            self.check_cancelled()?;
            self.progress.set_current_entry(&entry.relative_path);
            self.emit(
                COMPONENT,
                TransferEvent::EntryStarted {
                    index: index as u64,
                    path: entry.relative_path.clone(),
                    size: entry.size,
                },
            );

            let digest = self.digest_entry(entry)?;
            self.stream_entry(&mut conn, entry, &mut buf)?;
            conn.write_all(digest.as_bytes())?;
            let status = conn.read_byte()?;

            let record = &mut report.entries[index];
            record.digest = Some(digest.clone());
            match status {
                ENTRY_VERIFIED => {
                    record.status = EntryStatus::Verified;
                    self.emit(
                        COMPONENT,
                        TransferEvent::EntryVerified {
                            index: index as u64,
                            path: entry.relative_path.clone(),
                            digest,
                        },
                    );
                }
                ENTRY_IO_FAILED => {
                    return Err(remote_io_error(
                        &entry.relative_path,
                        format!("receiver {} could not write the file", conn.peer()),
                    )
                    .into());
                }
                ENTRY_MISMATCH => {
                    record.status = EntryStatus::ChecksumMismatch;
                    self.emit(
                        COMPONENT,
                        TransferEvent::ChecksumMismatch {
                            index: index as u64,
                            path: entry.relative_path.clone(),
                            expected: digest,
                            actual: None,
                        },
                    );
                }
                other => {
                    return Err(TransferError::protocol(format!(
                        "unexpected entry acknowledgement 0x{:02x} for {}",
                        other, entry.relative_path
                    ))
                    .into());
                }
            }
            self.progress.finish_entry();
        }

        self.progress.set_state(SessionState::Verifying);
        Ok(())
    }

    /// Hash the first `entry.size` bytes of the entry, checking for
    /// cancellation between reads.
    fn digest_entry(&self, entry: &SourceEntry) -> Result<String, Halt> {
        let path = entry.absolute_path.as_path();
        let mut file = File::open(path).map_err(|e| TransferError::io(path, e))?;
        let mut hasher = self.config.hash_algorithm.hasher();
        let mut buf = vec![0u8; self.config.hash_chunk_size];

        let mut remaining = entry.size;
        while remaining > 0 {
            let want = cmp::min(buf.len() as u64, remaining) as usize;
            let n = read_chunk(&mut file, &mut buf[..want], path)?;
            hasher.update(&buf[..n]);
            remaining -= n as u64;
            self.check_cancelled()?;
        }
        Ok(hasher.finalize_hex())
    }

    /// Send exactly `entry.size` bytes of the entry.
    fn stream_entry(
        &self,
        conn: &mut Connection,
        entry: &SourceEntry,
        buf: &mut [u8],
    ) -> Result<(), Halt> {
        let path = entry.absolute_path.as_path();
        let mut file = File::open(path).map_err(|e| TransferError::io(path, e))?;

        let mut remaining = entry.size;
        while remaining > 0 {
            let want = cmp::min(buf.len() as u64, remaining) as usize;
            let n = read_chunk(&mut file, &mut buf[..want], path)?;
            conn.write_all(&buf[..n])?;
            self.progress.add_bytes(n as u64);
            remaining -= n as u64;
            self.check_cancelled()?;
        }
        Ok(())
    }
}

/// A write failure on the receiving host, named by the path it announced.
fn remote_io_error(path: &str, message: String) -> TransferError {
    TransferError::io(Path::new(path), io::Error::other(message))
}

/// Read at least one byte. The descriptor promised more, so EOF is an error.
fn read_chunk(file: &mut File, buf: &mut [u8], path: &Path) -> Result<usize, TransferError> {
    loop {
        match file.read(buf) {
            Ok(0) => {
                let err = io::Error::new(io::ErrorKind::UnexpectedEof, "file shrank after enumeration");
                return Err(TransferError::io(path, err));
            }
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransferError::io(path, e)),
        }
    }
}
