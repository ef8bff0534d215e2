#![allow(dead_code)]

use std::fs;
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lanxfer_core::protocol::LENGTH_PREFIX;
use lanxfer_core::{
    CancelToken, Listener, ListenerSummary, NullLogger, Session, TransferConfig,
    TransferDescriptor, TransferError,
};
use rand::RngCore;

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Short poll interval so cancellation tests finish quickly.
pub fn config(received_dir: &Path) -> TransferConfig {
    TransferConfig {
        port: 0,
        socket_timeout: Duration::from_millis(50),
        idle_timeout: Duration::from_secs(10),
        received_dir: received_dir.to_path_buf(),
        ..TransferConfig::default()
    }
}

/// Deterministic content, prime modulus so chunk boundaries never line up.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn random(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::rng().fill_bytes(&mut data);
    data
}

pub fn write_file(root: &Path, relative: &str, data: &[u8]) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, data).unwrap();
    path
}

pub fn sender(config: &TransferConfig) -> Session {
    sender_with(config, CancelToken::new())
}

pub fn sender_with(config: &TransferConfig, cancel: CancelToken) -> Session {
    Session::new(config.clone(), cancel).with_logger(Arc::new(NullLogger))
}

/// A listener running `run` on its own thread.
pub struct RunningListener {
    pub addr: SocketAddr,
    pub stop: CancelToken,
    handle: JoinHandle<Result<ListenerSummary, TransferError>>,
}

impl RunningListener {
    pub fn start(config: TransferConfig) -> Self {
        let listener = Listener::bind(LOCALHOST, config)
            .unwrap()
            .with_logger(Arc::new(NullLogger));
        let addr = listener.local_addr();
        let stop = CancelToken::new();
        let token = stop.clone();
        let handle = thread::spawn(move || listener.run(&token));
        Self { addr, stop, handle }
    }

    pub fn stop(self) -> ListenerSummary {
        self.stop.cancel();
        self.handle.join().expect("listener panicked").unwrap()
    }
}

/// Connect as a hand-rolled sender and write a descriptor frame.
pub fn raw_sender(addr: SocketAddr, descriptor: &TransferDescriptor) -> TcpStream {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    let payload = serde_json::to_vec(descriptor).unwrap();
    stream.write_all(&(payload.len() as u32).to_be_bytes()).unwrap();
    stream.write_all(&payload).unwrap();
    stream
}

pub fn read_byte(stream: &mut TcpStream) -> u8 {
    let mut byte = [0u8; 1];
    stream.read_exact(&mut byte).unwrap();
    byte[0]
}

/// Read a descriptor frame the way a receiver would.
pub fn read_descriptor(stream: &mut TcpStream) -> TransferDescriptor {
    let mut prefix = [0u8; LENGTH_PREFIX];
    stream.read_exact(&mut prefix).unwrap();
    let mut payload = vec![0u8; u32::from_be_bytes(prefix) as usize];
    stream.read_exact(&mut payload).unwrap();
    TransferDescriptor::decode(&payload).unwrap()
}

/// Poll `cond` until it holds or `timeout` runs out.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}
