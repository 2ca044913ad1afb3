use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use crate::libs::common::DebugError;
use crate::libs::interrupt;

/// Granularity of the break-flag poll inside blocking calls. A raised
/// break unwinds any call in this module within one tick.
const INTR_POLL_MS: u64 = 50;

/// Upper bound on the time spent trying to establish a connection.
const CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Outcome of a [`recv`] call. Timeout is kept apart from peer close so
/// callers can poll without misreading an idle line as a hangup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recv {
    /// Some bytes were received.
    Data(usize),
    /// The peer shut the connection down in an orderly fashion.
    Closed,
    /// The timeout expired with no data.
    Timeout,
}

/// Creates the server listening socket: `0.0.0.0:<port>`, address
/// reuse enabled, backlog of one pending connection.
pub fn listen(port: u16) -> Result<TcpListener, DebugError> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into())?;
    socket.listen(1)?;

    let listener: TcpListener = socket.into();
    // The accept loop polls, so the listener stays non-blocking.
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Waits for a client on a listener created by [`listen`].
///
/// Returns the accepted stream switched back to blocking mode, or
/// `Interrupted` if the user breaks the wait.
pub fn accept(listener: &TcpListener) -> Result<(TcpStream, SocketAddr), DebugError> {
    loop {
        if interrupt::check() {
            return Err(DebugError::Interrupted);
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                return Ok((stream, peer));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(INTR_POLL_MS));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Connects to a remote endpoint, honouring the break flag between
/// bounded connection attempts.
pub fn connect(addr: &SocketAddr) -> Result<TcpStream, DebugError> {
    let start = Instant::now();
    loop {
        if interrupt::check() {
            return Err(DebugError::Interrupted);
        }
        match TcpStream::connect_timeout(addr, Duration::from_millis(500)) {
            Ok(stream) => return Ok(stream),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                if start.elapsed() >= Duration::from_millis(CONNECT_TIMEOUT_MS) {
                    return Err(e.into());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Sends the whole buffer, checking the break flag between
/// tick-bounded partial writes so a full send queue cannot wedge the
/// caller past a user break.
pub fn send(stream: &mut TcpStream, buf: &[u8]) -> Result<(), DebugError> {
    let mut off = 0;
    while off < buf.len() {
        if interrupt::check() {
            return Err(DebugError::Interrupted);
        }
        stream.set_write_timeout(Some(Duration::from_millis(INTR_POLL_MS)))?;
        match stream.write(&buf[off..]) {
            Ok(0) => return Err(DebugError::Closed),
            Ok(n) => off += n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Receives into `buf`, waiting up to `timeout_ms` milliseconds.
/// A negative timeout means wait forever. The wait is interleaved with
/// break-flag checks on a short tick, so a user break surfaces as
/// `Err(Interrupted)` rather than stalling until data arrives.
pub fn recv(stream: &mut TcpStream, buf: &mut [u8], timeout_ms: i32) -> Result<Recv, DebugError> {
    let start = Instant::now();
    loop {
        if interrupt::check() {
            return Err(DebugError::Interrupted);
        }

        let mut wait = Duration::from_millis(INTR_POLL_MS);
        if timeout_ms >= 0 {
            let limit = Duration::from_millis(timeout_ms as u64);
            let remaining = limit.saturating_sub(start.elapsed());
            // set_read_timeout rejects a zero duration, so a poll-style
            // call still performs one millisecond-bounded read.
            wait = wait.min(remaining).max(Duration::from_millis(1));
        }
        stream.set_read_timeout(Some(wait))?;

        match stream.read(buf) {
            Ok(0) => return Ok(Recv::Closed),
            Ok(n) => return Ok(Recv::Data(n)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                if timeout_ms >= 0 && start.elapsed() >= Duration::from_millis(timeout_ms as u64) {
                    return Ok(Recv::Timeout);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}
