use std::io;
use std::os::fd::AsRawFd;
use std::time::Duration;

use nix::sys::socket::{
    bind, setsockopt, socket, sockopt, AddressFamily, SockFlag, SockType, SockaddrIn,
};
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// Maximum accepted payload; longer datagrams are truncated.
pub const MAX_DATAGRAM: usize = 255;

/// Outcome of one poll on the heartbeat socket.
#[derive(Debug)]
pub enum Poll {
    /// One datagram, at most `MAX_DATAGRAM` bytes.
    Message(Vec<u8>),
    /// Nothing arrived within the timeout (includes signal interruptions,
    /// which are benign: the loop just runs its next tick).
    Timeout,
    /// The socket failed; the supervisor exits with the restart code so an
    /// outer launcher can rebind a fresh socket.
    Error(io::Error),
}

/// The supervisor's single UDP endpoint, bound to `INADDR_ANY:port` with
/// `SO_REUSEADDR` so a restarted supervisor can rebind immediately.
#[derive(Debug)]
pub struct UdpEndpoint {
    socket: UdpSocket,
}

impl UdpEndpoint {
    pub fn bind(port: u16) -> io::Result<UdpEndpoint> {
        let fd = socket(
            AddressFamily::Inet,
            SockType::Datagram,
            SockFlag::empty(),
            None,
        )
        .map_err(io::Error::from)?;
        setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(io::Error::from)?;
        bind(fd.as_raw_fd(), &SockaddrIn::new(0, 0, 0, 0, port)).map_err(io::Error::from)?;

        let std_socket = std::net::UdpSocket::from(fd);
        std_socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_socket)?;

        info!(port, "UDP server started");
        Ok(UdpEndpoint { socket })
    }

    /// The bound port (the configured one, or the ephemeral port when
    /// bound to 0 in tests).
    pub fn local_port(&self) -> io::Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Wait up to `timeout_ms` for one datagram.
    pub async fn poll(&self, timeout_ms: u64) -> Poll {
        let mut buf = [0u8; MAX_DATAGRAM + 1];
        let recv = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.socket.recv_from(&mut buf),
        )
        .await;

        match recv {
            Err(_elapsed) => Poll::Timeout,
            Ok(Ok((len, peer))) => {
                if len == 0 {
                    return Poll::Timeout;
                }
                let len = len.min(MAX_DATAGRAM);
                debug!(%peer, len, "datagram received");
                Poll::Message(buf[..len].to_vec())
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => Poll::Timeout,
            Ok(Err(e)) => Poll::Error(e),
        }
    }
}
