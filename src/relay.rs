//! Byte relay from admitted connections to a fixed upstream.
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use log::*;

use crate::error::Error;
use crate::server::ConnectionHandler;
use crate::thread::{join_thread, spawn_thread};

/// Relays each admitted connection to `upstream`.
///
/// Every connection gets its own thread, so the accept loop never waits
/// on a relay. Without an upstream, admitted connections are closed.
#[derive(Debug, Clone)]
pub struct TcpRelay {
    upstream: Option<SocketAddr>,
    connect_timeout: Duration,
}

impl TcpRelay {
    pub fn new(upstream: Option<SocketAddr>, connect_timeout: Duration) -> Self {
        Self {
            upstream,
            connect_timeout,
        }
    }
}

impl ConnectionHandler<TcpStream> for TcpRelay {
    fn handle(&mut self, client: TcpStream, peer: SocketAddr) {
        let upstream = match self.upstream {
            Some(upstream) => upstream,
            None => {
                info!("no upstream configured: closing {}", peer);
                return;
            }
        };
        let connect_timeout = self.connect_timeout;
        let spawned = spawn_thread(&format!("relay:{}", peer), move || {
            if let Err(err) = relay(client, peer, upstream, connect_timeout) {
                error!("relay error: {} ==> {}: {}", peer, upstream, err);
            }
        });
        if let Err(err) = spawned {
            error!("spawn relay: {}: {}", peer, err);
        }
    }
}

/// Relay both directions until each side is finished.
///
/// * `client`
///   Connection between client and this proxy.
/// * `client_addr`
///   The address of the client.
/// * `upstream`
///   The address of the server to connect to.
fn relay(
    client: TcpStream,
    client_addr: SocketAddr,
    upstream: SocketAddr,
    connect_timeout: Duration,
) -> Result<(), Error> {
    let server = TcpStream::connect_timeout(&upstream, connect_timeout)?;
    info!("connected: {} ==> {}", client_addr, upstream);

    let outbound_th = {
        let src = client.try_clone()?;
        let dst = server.try_clone()?;
        spawn_thread("outbound", move || {
            relay_half(client_addr, upstream, src, dst)
        })?
    };
    let incoming = relay_half(upstream, client_addr, server, client);
    let outbound = join_thread(outbound_th)?;
    incoming.and(outbound)
}

fn relay_half(
    src_addr: SocketAddr,
    dst_addr: SocketAddr,
    mut src: TcpStream,
    mut dst: TcpStream,
) -> Result<(), Error> {
    match io::copy(&mut src, &mut dst) {
        Ok(size) => {
            debug!("relay finished: {} ==> {}: {} bytes", src_addr, dst_addr, size);
            // pass EOF on; the other direction may still be running
            dst.shutdown(Shutdown::Write).ok();
            Ok(())
        }
        Err(err) => {
            trace!("relay error: {} ==> {}: {:?}", src_addr, dst_addr, err);
            // unblock the other direction
            src.shutdown(Shutdown::Both).ok();
            dst.shutdown(Shutdown::Both).ok();
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn echo_server() -> (SocketAddr, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let th = thread::spawn(move || {
            let (mut strm, _) = listener.accept().unwrap();
            let mut rd = strm.try_clone().unwrap();
            io::copy(&mut rd, &mut strm).unwrap();
        });
        (addr, th)
    }

    /// a connected (client, accepted) pair
    fn connected_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let front = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(front.local_addr().unwrap()).unwrap();
        let (accepted, peer) = front.accept().unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        (client, accepted, peer)
    }

    #[test]
    fn relay_to_echo_server() {
        let (upstream, echo_th) = echo_server();
        let (mut client, accepted, peer) = connected_pair();

        let mut relay = TcpRelay::new(Some(upstream), Duration::from_secs(5));
        relay.handle(accepted, peer);

        client.write_all(b"hello upstream").unwrap();
        client.shutdown(Shutdown::Write).unwrap();
        let mut buff = vec![];
        client.read_to_end(&mut buff).unwrap();
        assert_eq!(&buff[..], &b"hello upstream"[..]);
        echo_th.join().unwrap();
    }

    #[test]
    fn no_upstream_closes_connection() {
        let (mut client, accepted, peer) = connected_pair();
        let mut relay = TcpRelay::new(None, Duration::from_secs(5));
        relay.handle(accepted, peer);
        let mut buff = [0u8; 16];
        assert_eq!(client.read(&mut buff).unwrap(), 0);
    }

    #[test]
    fn unreachable_upstream_closes_connection() {
        let upstream = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let (mut client, accepted, peer) = connected_pair();
        let mut relay = TcpRelay::new(Some(upstream), Duration::from_secs(1));
        relay.handle(accepted, peer);
        let mut buff = [0u8; 16];
        match client.read(&mut buff) {
            Ok(size) => assert_eq!(size, 0),
            Err(err) => assert_eq!(err.kind(), io::ErrorKind::ConnectionReset),
        }
    }
}
