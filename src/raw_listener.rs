use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags};

use crate::error::Error;

/// A bound stream listener whose accept can be bounded by a deadline.
pub trait RawListener: Send {
    type Stream: Send + 'static;

    /// accept(2) waiting at most `timeout`
    ///
    /// * `timeout`
    ///   Timeout for _accept_. Expiry is reported as `io::ErrorKind::TimedOut`.
    fn accept_timeout(&self, timeout: Duration) -> io::Result<(Self::Stream, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl RawListener for TcpListener {
    type Stream = TcpStream;

    fn accept_timeout(&self, timeout: Duration) -> io::Result<(TcpStream, SocketAddr)> {
        let mut fds = [PollFd::new(self.as_raw_fd(), PollFlags::POLLIN)];
        let n = poll(&mut fds, timeout_millis(timeout))
            .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "poll accept"));
        }
        // the listener may be non-blocking; accepted streams never are
        let (strm, addr) = self.accept()?;
        strm.set_nonblocking(false)?;
        Ok((strm, addr))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Convert timeout to poll(2) milliseconds
fn timeout_millis(timeout: Duration) -> libc::c_int {
    // round up so a sub-millisecond timeout does not busy-loop
    let millis = timeout.as_nanos().div_ceil(1_000_000);
    libc::c_int::try_from(millis).unwrap_or(libc::c_int::MAX)
}

/// Errors after which accepting again is expected to succeed
pub fn is_transient(err: &io::Error) -> bool {
    use io::ErrorKind::*;
    matches!(
        err.kind(),
        TimedOut | WouldBlock | Interrupted | ConnectionAborted | ConnectionReset
    )
}

/// Bind a reusable TCP listener on `addr`
pub fn bind(addr: SocketAddr) -> Result<TcpListener, Error> {
    let tcp = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    tcp.set_reuse_address(true)
        .map_err(|err| addr_error(err, addr))?;
    tcp.bind(&addr.into())
        .map_err(|err| addr_error(err, addr))?;

    // `backlog` parameter is directly passed to `listen(2)` system call.
    // If it is too small, clients may not `connect(2)` to the server.
    // Here, `backlog` is intended to be as large as `net.core.somaxconn` kernel parameter,
    tcp.listen(256)?;
    // a connection reset between poll(2) and accept(2) must not block the loop
    tcp.set_nonblocking(true)?;
    Ok(tcp.into())
}

fn addr_error(io_err: io::Error, addr: SocketAddr) -> Error {
    match io_err.kind() {
        io::ErrorKind::AddrInUse => Error::AddressAlreadyInUse { addr },
        io::ErrorKind::AddrNotAvailable => Error::AddressNotAvailable { addr },
        _ => Error::Io(io_err),
    }
}
