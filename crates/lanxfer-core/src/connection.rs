/// Blocking TCP stream with cooperative cancellation.
///
/// Every socket read and write is bounded by the configured socket timeout.
/// When one expires the cancel token is checked, so a session notices a
/// cancel request within one timeout period even while the peer is silent.
/// A peer that stays silent for longer than the idle timeout fails the
/// session with a connection error.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::cancel::CancelToken;
use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::session::Halt;

pub(crate) struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    cancel: CancelToken,
    idle: Duration,
}

impl Connection {
    /// Open a connection to `target`, optionally from a specific local address.
    pub(crate) fn connect(
        target: SocketAddr,
        local_ip: Option<IpAddr>,
        config: &TransferConfig,
        cancel: CancelToken,
    ) -> Result<Self, TransferError> {
        let fail = |e: io::Error| TransferError::connection(target, e);

        let socket = Socket::new(Domain::for_address(target), Type::STREAM, Some(Protocol::TCP))
            .map_err(fail)?;
        if let Some(ip) = local_ip {
            socket
                .bind(&SockAddr::from(SocketAddr::new(ip, 0)))
                .map_err(fail)?;
        }
        socket
            .connect_timeout(&SockAddr::from(target), config.socket_timeout)
            .map_err(fail)?;

        let stream: TcpStream = socket.into();
        Self::configure(stream, target, config, cancel)
    }

    /// Wrap a stream returned by `accept`.
    pub(crate) fn accepted(
        stream: TcpStream,
        peer: SocketAddr,
        config: &TransferConfig,
        cancel: CancelToken,
    ) -> Result<Self, TransferError> {
        Self::configure(stream, peer, config, cancel)
    }

    fn configure(
        stream: TcpStream,
        peer: SocketAddr,
        config: &TransferConfig,
        cancel: CancelToken,
    ) -> Result<Self, TransferError> {
        let fail = |e: io::Error| TransferError::connection(peer, e);
        stream.set_nonblocking(false).map_err(fail)?;
        stream.set_nodelay(true).map_err(fail)?;
        stream.set_read_timeout(Some(config.socket_timeout)).map_err(fail)?;
        stream.set_write_timeout(Some(config.socket_timeout)).map_err(fail)?;
        Ok(Self {
            stream,
            peer,
            cancel,
            idle: config.idle_timeout,
        })
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Read at least one byte. EOF before that is a connection error.
    pub(crate) fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, Halt> {
        let deadline = Instant::now() + self.idle;
        loop {
            match self.stream.read(buf) {
                Ok(0) if !buf.is_empty() => {
                    return Err(self.failed(io::ErrorKind::UnexpectedEof.into()));
                }
                Ok(n) => return Ok(n),
                Err(e) => self.wait(e, deadline)?,
            }
        }
    }

    pub(crate) fn read_exact(&mut self, mut buf: &mut [u8]) -> Result<(), Halt> {
        while !buf.is_empty() {
            let n = self.read_some(buf)?;
            buf = &mut buf[n..];
        }
        Ok(())
    }

    pub(crate) fn read_byte(&mut self) -> Result<u8, Halt> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    pub(crate) fn write_all(&mut self, mut buf: &[u8]) -> Result<(), Halt> {
        let mut deadline = Instant::now() + self.idle;
        while !buf.is_empty() {
            match self.stream.write(buf) {
                Ok(0) => return Err(self.failed(io::ErrorKind::WriteZero.into())),
                Ok(n) => {
                    buf = &buf[n..];
                    deadline = Instant::now() + self.idle;
                }
                Err(e) => self.wait(e, deadline)?,
            }
        }
        Ok(())
    }

    /// Decide whether a failed read/write should be retried.
    fn wait(&self, err: io::Error, deadline: Instant) -> Result<(), Halt> {
        match err.kind() {
            // Windows reports TimedOut, Unix WouldBlock
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                if self.cancel.is_cancelled() {
                    return Err(Halt::Cancelled);
                }
                if Instant::now() >= deadline {
                    return Err(self.failed(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("peer idle for more than {:?}", self.idle),
                    )));
                }
                Ok(())
            }
            io::ErrorKind::Interrupted => Ok(()),
            _ => Err(self.failed(err)),
        }
    }

    fn failed(&self, err: io::Error) -> Halt {
        Halt::Failed(TransferError::connection(self.peer, err))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
