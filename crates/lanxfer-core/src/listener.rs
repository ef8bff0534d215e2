//! Receive-side accept loop.
//!
//! One connection at a time: each accepted stream runs a full receive session
//! on the calling thread before the next `accept`. The listening socket has a
//! read timeout (SO_RCVTIMEO), which on Linux and macOS also bounds `accept`,
//! so an idle listener still notices a stop request within one socket timeout.

use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::Arc;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::logging::{TracingLogger, TransferEvent, TransferLog, TransferLogger};
use crate::session::{Session, TransferReport};

const COMPONENT: &str = "listener";

/// Pending connections beyond the one being served are left to the kernel.
const LISTEN_BACKLOG: i32 = 1;

/// Outcome of one accepted connection.
#[derive(Debug)]
pub struct ReceivedSession {
    pub peer: SocketAddr,
    pub result: Result<TransferReport, TransferError>,
}

/// Everything a listener received before it was stopped.
#[derive(Debug, Default)]
pub struct ListenerSummary {
    pub sessions: Vec<ReceivedSession>,
}

impl ListenerSummary {
    /// True when every session completed with all entries verified.
    pub fn all_verified(&self) -> bool {
        self.sessions
            .iter()
            .all(|s| matches!(&s.result, Ok(report) if report.is_verified()))
    }
}

pub struct Listener {
    config: TransferConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    logger: Arc<dyn TransferLogger>,
}

impl Listener {
    /// Bind `bind_ip:config.port`. Port 0 picks an ephemeral port; see
    /// [`Listener::local_addr`].
    pub fn bind(bind_ip: IpAddr, config: TransferConfig) -> Result<Self, TransferError> {
        let addr = SocketAddr::new(bind_ip, config.port);
        let fail = |e: io::Error| TransferError::connection(addr, e);

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(fail)?;
        socket.set_reuse_address(true).map_err(fail)?;
        socket.bind(&SockAddr::from(addr)).map_err(fail)?;
        socket.listen(LISTEN_BACKLOG).map_err(fail)?;
        socket
            .set_read_timeout(Some(config.socket_timeout))
            .map_err(fail)?;

        let listener: TcpListener = socket.into();
        let local_addr = listener.local_addr().map_err(fail)?;

        Ok(Self {
            config,
            listener,
            local_addr,
            logger: Arc::new(TracingLogger),
        })
    }

    pub fn with_logger(mut self, logger: Arc<dyn TransferLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Wait for one connection and receive from it. Returns `None` once `stop`
    /// is set while no connection is pending. The same token cancels the
    /// session if it is set mid-transfer.
    pub fn accept_one(&self, stop: &CancelToken) -> Result<Option<ReceivedSession>, TransferError> {
        loop {
            if stop.is_cancelled() {
                return Ok(None);
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    self.emit(TransferEvent::ConnectionAccepted {
                        peer: peer.to_string(),
                    });
                    let result = Session::new(self.config.clone(), stop.clone())
                        .with_logger(self.logger.clone())
                        .receive(stream, peer);
                    return Ok(Some(ReceivedSession { peer, result }));
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(TransferError::connection(self.local_addr, e)),
            }
        }
    }

    /// Accept and receive until `stop` is set.
    pub fn run(&self, stop: &CancelToken) -> Result<ListenerSummary, TransferError> {
        self.emit(TransferEvent::ListenerStarted {
            bind_addr: self.local_addr.to_string(),
        });

        let mut summary = ListenerSummary::default();
        while let Some(session) = self.accept_one(stop)? {
            summary.sessions.push(session);
        }

        self.emit(TransferEvent::ListenerStopped {
            sessions: summary.sessions.len() as u64,
        });
        Ok(summary)
    }

    fn emit(&self, event: TransferEvent) {
        self.logger.log(TransferLog {
            component: COMPONENT,
            transfer_id: Uuid::nil(),
            event,
        });
    }
}
