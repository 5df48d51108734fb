//! Group transport: one reliable ordered byte stream per peer host.
//!
//! A [`Group`] is a host's view of the cluster: its own rank and one
//! [`PeerConnection`] per other host. The multiplexer is the sole consumer;
//! it splits each connection into a dedicated send task and receive task.
//!
//! Two meshes are provided:
//!
//! - [`Group::local_mesh`]: fully connected in-process pipes, used by tests
//!   and single-process runs.
//! - [`Group::tcp_mesh`]: a TCP full mesh where host `h` listens on
//!   `addrs[h]`, accepts from lower ranks, and connects to higher ranks.
//!   Connections identify themselves with a one-`u32` rank hello.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use flowmesh_core::{Error, Result};

/// Both halves of a reliable ordered byte stream to one peer host.
pub struct PeerConnection {
    pub(crate) reader: Box<dyn AsyncRead + Send + Unpin>,
    pub(crate) writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl PeerConnection {
    pub fn from_split<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// A host's peer connections, indexed by host rank. The slot for the host
/// itself is empty.
pub struct Group {
    host_rank: usize,
    peers: Vec<Option<PeerConnection>>,
}

impl Group {
    pub fn new(host_rank: usize, peers: Vec<Option<PeerConnection>>) -> Self {
        assert!(host_rank < peers.len(), "host rank outside the mesh");
        assert!(
            peers[host_rank].is_none(),
            "a host has no connection to itself"
        );
        Self { host_rank, peers }
    }

    pub fn host_rank(&self) -> usize {
        self.host_rank
    }

    pub fn num_hosts(&self) -> usize {
        self.peers.len()
    }

    pub(crate) fn into_parts(self) -> (usize, Vec<Option<PeerConnection>>) {
        (self.host_rank, self.peers)
    }

    /// A fully connected in-process mesh of `num_hosts` groups.
    pub fn local_mesh(num_hosts: usize) -> Vec<Group> {
        let mut slots: Vec<Vec<Option<PeerConnection>>> = (0..num_hosts)
            .map(|_| (0..num_hosts).map(|_| None).collect())
            .collect();

        for low in 0..num_hosts {
            for high in low + 1..num_hosts {
                let (a, b) = tokio::io::duplex(256 * 1024);
                let (read_a, write_a) = tokio::io::split(a);
                let (read_b, write_b) = tokio::io::split(b);
                slots[low][high] = Some(PeerConnection::from_split(read_a, write_a));
                slots[high][low] = Some(PeerConnection::from_split(read_b, write_b));
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(rank, peers)| Group::new(rank, peers))
            .collect()
    }

    /// Loopback addresses for a single-machine mesh: host `h` gets
    /// `127.0.0.1:base_port + h`.
    pub fn local_addrs(num_hosts: usize, base_port: u16) -> Vec<SocketAddr> {
        (0..num_hosts)
            .map(|h| SocketAddr::from(([127, 0, 0, 1], base_port + h as u16)))
            .collect()
    }

    /// Establish the TCP full mesh for `host_rank` within `addrs`.
    ///
    /// Hosts may start in any order: connecting retries until the peer's
    /// listener is up (bounded by `CONNECT_TIMEOUT`).
    pub async fn tcp_mesh(host_rank: usize, addrs: &[SocketAddr]) -> Result<Group> {
        const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
        const RETRY_DELAY: Duration = Duration::from_millis(50);

        if host_rank >= addrs.len() {
            return Err(Error::InvalidArgument(format!(
                "host rank {host_rank} outside mesh of {} hosts",
                addrs.len()
            )));
        }

        let listener = TcpListener::bind(addrs[host_rank]).await?;
        debug!(host_rank, addr = %addrs[host_rank], "mesh listener up");

        // Accept one connection from every lower rank; they tell us who
        // they are in the first four bytes.
        let accept_from_lower = async {
            let mut accepted = Vec::with_capacity(host_rank);
            for _ in 0..host_rank {
                let (mut stream, remote) = listener.accept().await?;
                stream.set_nodelay(true)?;
                let mut hello = [0u8; 4];
                stream.read_exact(&mut hello).await?;
                let peer = u32::from_le_bytes(hello) as usize;
                if peer >= host_rank {
                    return Err(Error::Transport(format!(
                        "unexpected rank hello {peer} from {remote}"
                    )));
                }
                accepted.push((peer, stream));
            }
            Ok::<_, Error>(accepted)
        };

        // Connect to every higher rank, announcing our own.
        let connect_to_higher = async {
            let attempts = (host_rank + 1..addrs.len()).map(|peer| {
                let addr = addrs[peer];
                async move {
                    let deadline = tokio::time::Instant::now() + CONNECT_TIMEOUT;
                    let mut stream = loop {
                        match TcpStream::connect(addr).await {
                            Ok(stream) => break stream,
                            Err(error) if tokio::time::Instant::now() < deadline => {
                                debug!(peer, %error, "peer not listening yet, retrying");
                                tokio::time::sleep(RETRY_DELAY).await;
                            }
                            Err(error) => return Err(Error::from(error)),
                        }
                    };
                    stream.set_nodelay(true)?;
                    stream
                        .write_all(&(host_rank as u32).to_le_bytes())
                        .await?;
                    Ok::<_, Error>((peer, stream))
                }
            });
            futures::future::try_join_all(attempts).await
        };

        let (accepted, connected) = tokio::try_join!(accept_from_lower, connect_to_higher)?;

        let mut peers: Vec<Option<PeerConnection>> =
            (0..addrs.len()).map(|_| None).collect();
        for (peer, stream) in accepted.into_iter().chain(connected) {
            if peers[peer].is_some() {
                return Err(Error::Transport(format!(
                    "duplicate mesh connection from host {peer}"
                )));
            }
            let (read_half, write_half) = stream.into_split();
            peers[peer] = Some(PeerConnection::from_split(read_half, write_half));
        }

        info!(host_rank, num_hosts = addrs.len(), "mesh established");
        Ok(Group::new(host_rank, peers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_mesh_shape() {
        let groups = Group::local_mesh(3);
        assert_eq!(groups.len(), 3);
        for (rank, group) in groups.iter().enumerate() {
            assert_eq!(group.host_rank(), rank);
            assert_eq!(group.num_hosts(), 3);
            let connected = group.peers.iter().filter(|p| p.is_some()).count();
            assert_eq!(connected, 2);
        }
    }

    #[tokio::test]
    async fn test_local_mesh_pipes_carry_bytes() {
        let mut groups = Group::local_mesh(2);
        let mut g1 = groups.pop().unwrap();
        let mut g0 = groups.pop().unwrap();

        let to_peer = g0.peers[1].as_mut().unwrap();
        to_peer.writer.write_all(b"ping").await.unwrap();
        to_peer.writer.flush().await.unwrap();

        let from_peer = g1.peers[0].as_mut().unwrap();
        let mut buf = [0u8; 4];
        from_peer.reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }
}
