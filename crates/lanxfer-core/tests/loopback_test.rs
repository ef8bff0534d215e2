/// End-to-end transfers over loopback TCP: a real Listener on one thread, a
/// sending Session on another, results compared byte for byte.

mod common;

use std::fs;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use common::*;
use lanxfer_core::protocol::META_ACCEPTED;
use lanxfer_core::{
    CancelToken, EntryStatus, HashAlgorithm, SessionState, TransferKind, hash_file,
};

const KIB: usize = 1024;
const MIB: usize = 1024 * 1024;

#[test]
fn empty_file_is_verified() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let file = write_file(src.path(), "empty.bin", &[]);

    let listener = RunningListener::start(config(dst.path()));
    let session = sender(&config(dst.path()));
    let progress = session.progress();
    let report = session.send(&file, listener.addr, None).unwrap();
    let summary = listener.stop();

    assert_eq!(report.state, SessionState::Completed);
    assert_eq!(report.kind, Some(TransferKind::SingleFile));
    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.entries[0].status, EntryStatus::Verified);
    assert_eq!(
        report.entries[0].digest.as_deref(),
        Some("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
    );
    assert_eq!(progress.snapshot().fraction(), 1.0);

    let received = dst.path().join("empty.bin");
    assert_eq!(fs::metadata(&received).unwrap().len(), 0);

    assert_eq!(summary.sessions.len(), 1);
    let recv = summary.sessions[0].result.as_ref().unwrap();
    assert!(recv.is_verified());
    assert_eq!(recv.entries[0].peer_digest, recv.entries[0].digest);
}

#[test]
fn directory_transfer_reproduces_tree() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let root = src.path().join("bundle");
    write_file(&root, "small.bin", &random(KIB));
    write_file(&root, "nested/medium.bin", &random(MIB));
    write_file(&root, "nested/deeper/large.bin", &pattern(10 * MIB));

    let listener = RunningListener::start(config(dst.path()));
    let session = sender(&config(dst.path()));
    let progress = session.progress();
    let report = session.send(&root, listener.addr, None).unwrap();
    let summary = listener.stop();

    assert_eq!(report.state, SessionState::Completed);
    assert_eq!(report.kind, Some(TransferKind::Directory));
    assert_eq!(report.total_size, (KIB + MIB + 10 * MIB) as u64);
    assert_eq!(report.bytes_transferred, report.total_size);
    assert_eq!(report.verified_count(), 3);

    let paths: Vec<&str> = report.entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["nested/deeper/large.bin", "nested/medium.bin", "small.bin"]);

    for entry in &report.entries {
        let original = root.join(&entry.path);
        let copy = dst.path().join("bundle").join(&entry.path);
        assert_eq!(fs::read(&original).unwrap(), fs::read(&copy).unwrap(), "{}", entry.path);
        let digest = hash_file(&copy, HashAlgorithm::Sha256, 8 * KIB).unwrap();
        assert_eq!(entry.digest.as_deref(), Some(digest.as_str()));
    }

    let snapshot = progress.snapshot();
    assert_eq!(snapshot.bytes_done, snapshot.bytes_total);
    assert_eq!(snapshot.entries_done, 3);
    assert_eq!(snapshot.state, SessionState::Completed);

    let recv = summary.sessions[0].result.as_ref().unwrap();
    assert!(recv.is_verified());
    assert_eq!(recv.bytes_transferred, report.total_size);
}

#[test]
fn configured_algorithm_travels_with_descriptor() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let file = write_file(src.path(), "notes.txt", b"hello over the lan");

    // Receiver keeps its default; the descriptor tells it which digest to expect.
    let listener = RunningListener::start(config(dst.path()));
    let mut send_config = config(dst.path());
    send_config.hash_algorithm = HashAlgorithm::Md5;
    let report = sender(&send_config).send(&file, listener.addr, None).unwrap();
    let summary = listener.stop();

    assert!(report.is_verified());
    assert_eq!(report.entries[0].digest.as_ref().map(String::len), Some(32));
    assert!(summary.all_verified());
}

#[test]
fn empty_directory_creates_root() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let root = src.path().join("nothing");
    fs::create_dir(&root).unwrap();

    let listener = RunningListener::start(config(dst.path()));
    let report = sender(&config(dst.path())).send(&root, listener.addr, None).unwrap();
    listener.stop();

    assert_eq!(report.state, SessionState::Completed);
    assert!(report.entries.is_empty());
    assert!(dst.path().join("nothing").is_dir());
}

/// Forward sender → receiver traffic, flipping the byte `skip` bytes past the
/// end of the descriptor frame. Replies are passed through untouched.
fn corrupting_relay(upstream: SocketAddr, skip: u64) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (mut client, _) = listener.accept().unwrap();
        let mut server = TcpStream::connect(upstream).unwrap();

        let mut client_back = client.try_clone().unwrap();
        let mut server_back = server.try_clone().unwrap();
        let back = thread::spawn(move || {
            let _ = io::copy(&mut server_back, &mut client_back);
            let _ = client_back.shutdown(Shutdown::Write);
        });

        let mut prefix = [0u8; 4];
        client.read_exact(&mut prefix).unwrap();
        server.write_all(&prefix).unwrap();
        let target = u32::from_be_bytes(prefix) as u64 + skip;

        let mut offset = 0u64;
        let mut buf = [0u8; 4096];
        loop {
            let n = match client.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if target >= offset && target < offset + n as u64 {
                buf[(target - offset) as usize] ^= 0xFF;
            }
            offset += n as u64;
            if server.write_all(&buf[..n]).is_err() {
                break;
            }
        }
        let _ = server.shutdown(Shutdown::Write);
        let _ = back.join();
    });
    addr
}

#[test]
fn corrupted_entry_is_reported_and_others_complete() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let root = src.path().join("batch");
    write_file(&root, "a.bin", &pattern(KIB));
    let b = write_file(&root, "b.bin", &pattern(4 * KIB));
    write_file(&root, "c.bin", &pattern(2 * KIB));

    let listener = RunningListener::start(config(dst.path()));
    // a.bin payload, a.bin digest, then 100 bytes into b.bin.
    let relay = corrupting_relay(listener.addr, (KIB + 64 + 100) as u64);
    let report = sender(&config(dst.path())).send(&root, relay, None).unwrap();
    let summary = listener.stop();

    assert_eq!(report.state, SessionState::Failed);
    let statuses: Vec<EntryStatus> = report.entries.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![EntryStatus::Verified, EntryStatus::ChecksumMismatch, EntryStatus::Verified]
    );
    let failed: Vec<&str> = report.mismatches().map(|e| e.path.as_str()).collect();
    assert_eq!(failed, vec!["b.bin"]);

    let recv = summary.sessions[0].result.as_ref().unwrap();
    assert_eq!(recv.state, SessionState::Failed);
    assert_eq!(recv.mismatches().count(), 1);
    let bad = &recv.entries[1];
    assert_ne!(bad.digest, bad.peer_digest);

    let copy = fs::read(dst.path().join("batch/b.bin")).unwrap();
    let original = fs::read(&b).unwrap();
    assert_eq!(copy.len(), original.len());
    assert_ne!(copy[100], original[100]);
    assert_eq!(
        fs::read(dst.path().join("batch/c.bin")).unwrap(),
        pattern(2 * KIB)
    );
}

#[test]
fn unwritable_entry_ends_the_batch() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let root = src.path().join("bundle");
    write_file(&root, "a.bin", &pattern(KIB));
    write_file(&root, "b.bin", &pattern(64 * KIB));
    write_file(&root, "c.bin", &pattern(2 * KIB));
    // A directory already sits where b.bin has to go.
    fs::create_dir_all(dst.path().join("bundle/b.bin")).unwrap();

    let listener = RunningListener::start(config(dst.path()));
    let started = Instant::now();
    let err = sender(&config(dst.path())).send(&root, listener.addr, None).unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));
    let summary = listener.stop();

    assert_eq!(err.kind(), "IOError");
    assert!(err.to_string().contains("b.bin"), "{}", err);
    assert!(err.to_string().contains("could not write"), "{}", err);

    let recv_err = summary.sessions[0].result.as_ref().unwrap_err();
    assert_eq!(recv_err.kind(), "IOError");
    assert!(recv_err.to_string().contains("b.bin"), "{}", recv_err);

    assert_eq!(fs::read(dst.path().join("bundle/a.bin")).unwrap(), pattern(KIB));
    assert!(dst.path().join("bundle/b.bin").is_dir());
    assert!(!dst.path().join("bundle/c.bin").exists());
}

#[test]
fn unreachable_receiver_fails_fast() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let file = write_file(src.path(), "a.bin", &pattern(KIB));

    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let session = sender(&config(dst.path()));
    let progress = session.progress();
    let started = Instant::now();
    let err = session.send(&file, addr, None).unwrap_err();
    assert_eq!(err.kind(), "ConnectionError");
    assert!(started.elapsed() < Duration::from_secs(5));

    let snapshot = progress.snapshot();
    assert_eq!(snapshot.state, SessionState::Failed);
    assert_eq!(snapshot.bytes_done, 0);
    assert_eq!(snapshot.fraction(), 0.0);
    assert_eq!(fs::read_dir(dst.path()).unwrap().count(), 0);
}

#[test]
fn missing_source_fails_before_connecting() {
    let dst = tempfile::tempdir().unwrap();
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let err = sender(&config(dst.path()))
        .send(&dst.path().join("does-not-exist"), addr, None)
        .unwrap_err();
    assert_eq!(err.kind(), "EnumerationError");
}

#[test]
fn sender_cancel_mid_stream() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let file = write_file(src.path(), "big.bin", &pattern(32 * MIB));

    let cancel = CancelToken::new();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    // Accept, take 1 MiB, cancel, then drain until the sender hangs up.
    let token = cancel.clone();
    let receiver = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        read_descriptor(&mut stream);
        stream.write_all(&[META_ACCEPTED]).unwrap();

        let mut chunk = vec![0u8; MIB];
        stream.read_exact(&mut chunk).unwrap();
        token.cancel();
        let cancelled_at = Instant::now();

        let mut drained = 0u64;
        let mut buf = [0u8; 64 * 1024];
        loop {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => drained += n as u64,
            }
        }
        (MIB as u64 + drained, cancelled_at)
    });

    let report = sender_with(&config(dst.path()), cancel)
        .send(&file, addr, None)
        .unwrap();
    let returned_at = Instant::now();
    let (seen, cancelled_at) = receiver.join().unwrap();

    let latency = returned_at.duration_since(cancelled_at);
    assert!(
        latency < config(dst.path()).socket_timeout + Duration::from_secs(1),
        "cancel took {:?}",
        latency
    );

    assert_eq!(report.state, SessionState::Cancelled);
    assert_eq!(report.entries[0].status, EntryStatus::Pending);
    assert!(report.bytes_transferred >= MIB as u64);
    assert!(report.bytes_transferred < report.total_size);
    assert_eq!(seen, report.bytes_transferred);
}
