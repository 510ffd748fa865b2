//! Streaming session
//!
//! A session is created on ANNOUNCE, armed with ports on SETUP and then runs
//! exactly one background loop: either receiving datagrams from the sender
//! or, for an outbound peer session, writing queued packets to the peer.
//!
//! ```text
//! Created ──arm──▶ Armed ──start_receiving──▶ Receiving ──close──▶ Closed
//!                    └────start_sending────▶ Sending   ──close──▶ Closed
//! ```
//!
//! The packet queue is bounded. When the consumer stalls the receive loop
//! blocks on the queue instead of dropping packets.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::constants::{PACKET_CHANNEL_CAPACITY, READ_BUFFER_SIZE};
use crate::error::{CryptoError, NetworkError};
use crate::sdp::SessionDescription;

/// Turns a received datagram into the payload handed to the player
pub trait Decrypter: Send + Sync {
    fn decrypt(&self, packet: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Transport ports negotiated for one side of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortSet {
    pub address: Option<IpAddr>,
    pub control: u16,
    pub timing: u16,
    pub data: u16,
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Armed,
    Receiving,
    Sending,
    Closed,
}

/// Receiving end of a session's packet queue, handed to a player
pub struct PacketStream {
    pub description: Arc<SessionDescription>,
    packets: mpsc::Receiver<Bytes>,
}

impl PacketStream {
    pub fn new(description: Arc<SessionDescription>, packets: mpsc::Receiver<Bytes>) -> Self {
        Self {
            description,
            packets,
        }
    }

    /// Next packet, or `None` once the session's loop has ended
    pub async fn next(&mut self) -> Option<Bytes> {
        self.packets.recv().await
    }
}

/// One audio stream, inbound or outbound
pub struct Session {
    description: Arc<SessionDescription>,
    decrypter: Option<Arc<dyn Decrypter>>,
    remote_ports: PortSet,
    local_ports: PortSet,
    state: SessionState,
    close_tx: Option<oneshot::Sender<()>>,
    stream: Option<PacketStream>,
    sender: Option<mpsc::Sender<Bytes>>,
    /// Bound at SETUP, handed to the receive loop at RECORD
    data_socket: Option<std::net::UdpSocket>,
}

impl Session {
    pub fn new(description: SessionDescription) -> Self {
        Self {
            description: Arc::new(description),
            decrypter: None,
            remote_ports: PortSet::default(),
            local_ports: PortSet::default(),
            state: SessionState::Created,
            close_tx: None,
            stream: None,
            sender: None,
            data_socket: None,
        }
    }

    /// Payload transform applied by the receive loop; absent means cleartext
    pub fn with_decrypter(mut self, decrypter: Arc<dyn Decrypter>) -> Self {
        self.decrypter = Some(decrypter);
        self
    }

    pub fn description(&self) -> &SessionDescription {
        &self.description
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn remote_ports(&self) -> &PortSet {
        &self.remote_ports
    }

    pub fn local_ports(&self) -> &PortSet {
        &self.local_ports
    }

    pub fn is_encrypted(&self) -> bool {
        self.decrypter.is_some()
    }

    /// Record the negotiated transport
    pub fn arm(&mut self, remote: PortSet, local: PortSet) {
        self.remote_ports = remote;
        self.local_ports = local;
        self.state = SessionState::Armed;
    }

    /// Overwrite the remote data port once the peer has answered SETUP
    pub fn set_remote_data_port(&mut self, port: u16) {
        self.remote_ports.data = port;
    }

    /// Reserve the local data port ahead of RECORD
    ///
    /// Binds exclusively. When the configured port is already taken, by
    /// another session for instance, an ephemeral port is bound instead.
    /// The bound port is recorded in `local_ports().data` and returned.
    pub fn bind_data_port(&mut self) -> Result<u16, NetworkError> {
        self.ensure_armed()?;
        if let Some(socket) = &self.data_socket {
            return bound_port(socket);
        }

        let ip = self
            .local_ports
            .address
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let configured = SocketAddr::new(ip, self.local_ports.data);
        let socket = match bind_udp(configured) {
            Ok(socket) => socket,
            Err(e) if configured.port() != 0 => {
                warn!("{}; falling back to an ephemeral data port", e);
                bind_udp(SocketAddr::new(ip, 0))?
            }
            Err(e) => return Err(e),
        };

        let port = bound_port(&socket)?;
        self.local_ports.data = port;
        self.data_socket = Some(socket);
        Ok(port)
    }

    /// Start the receive loop on the data port
    ///
    /// Binds the port first if [`bind_data_port`](Self::bind_data_port) was
    /// not called. Returns the bound port.
    pub fn start_receiving(&mut self) -> Result<u16, NetworkError> {
        let port = self.bind_data_port()?;
        let socket = self
            .data_socket
            .take()
            .ok_or_else(|| NetworkError::BindFailed(format!("data port {} not bound", port)))?;
        let socket = UdpSocket::from_std(socket)
            .map_err(|e| NetworkError::BindFailed(format!("port {}: {}", port, e)))?;

        let (tx, rx) = mpsc::channel(PACKET_CHANNEL_CAPACITY);
        let (close_tx, close_rx) = oneshot::channel();
        tokio::spawn(receive_loop(socket, self.decrypter.clone(), tx, close_rx));

        self.stream = Some(PacketStream::new(self.description.clone(), rx));
        self.close_tx = Some(close_tx);
        self.state = SessionState::Receiving;
        info!("Session listening for audio on UDP port {}", port);
        Ok(port)
    }

    /// Take the packet stream produced by the receive loop
    pub fn take_stream(&mut self) -> Option<PacketStream> {
        self.stream.take()
    }

    /// Dial the remote data port and start draining the outbound queue
    pub fn start_sending(&mut self) -> Result<(), NetworkError> {
        self.ensure_armed()?;
        let remote_ip = self
            .remote_ports
            .address
            .ok_or_else(|| NetworkError::InvalidTransport("no remote address".to_string()))?;
        let remote = SocketAddr::new(remote_ip, self.remote_ports.data);

        let unspecified = match remote_ip {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = bind_udp(SocketAddr::new(unspecified, 0))?;
        socket
            .connect(remote)
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", remote, e)))?;
        let socket = UdpSocket::from_std(socket)
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", remote, e)))?;

        let (tx, rx) = mpsc::channel(PACKET_CHANNEL_CAPACITY);
        let (close_tx, close_rx) = oneshot::channel();
        tokio::spawn(send_loop(socket, remote, rx, close_rx));

        self.sender = Some(tx);
        self.close_tx = Some(close_tx);
        self.state = SessionState::Sending;
        info!("Session forwarding audio to {}", remote);
        Ok(())
    }

    /// Queue handle for an outbound session
    pub fn sender(&self) -> Option<mpsc::Sender<Bytes>> {
        self.sender.clone()
    }

    /// Stop the running loop; the packet queue closes once the loop exits
    pub fn close(&mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        } else {
            debug!("Closing session with no data connection");
        }
        self.sender = None;
        self.data_socket = None;
        self.state = SessionState::Closed;
    }

    fn ensure_armed(&self) -> Result<(), NetworkError> {
        match self.state {
            SessionState::Armed => Ok(()),
            SessionState::Receiving | SessionState::Sending => Err(NetworkError::SessionActive),
            SessionState::Created | SessionState::Closed => Err(NetworkError::SessionNotArmed),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("remote_ports", &self.remote_ports)
            .field("local_ports", &self.local_ports)
            .field("encrypted", &self.is_encrypted())
            .finish()
    }
}

/// Non-blocking std socket, ready for `UdpSocket::from_std`
fn bind_udp(addr: SocketAddr) -> Result<std::net::UdpSocket, NetworkError> {
    let bind_err = |e: std::io::Error| NetworkError::BindFailed(format!("{}: {}", addr, e));

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(bind_err)?;
    socket
        .set_recv_buffer_size(READ_BUFFER_SIZE * 64)
        .map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    Ok(socket.into())
}

fn bound_port(socket: &std::net::UdpSocket) -> Result<u16, NetworkError> {
    socket
        .local_addr()
        .map(|addr| addr.port())
        .map_err(|e| NetworkError::BindFailed(e.to_string()))
}

async fn receive_loop(
    socket: UdpSocket,
    decrypter: Option<Arc<dyn Decrypter>>,
    tx: mpsc::Sender<Bytes>,
    mut close: oneshot::Receiver<()>,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            _ = &mut close => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, _)) => n,
                Err(e) => {
                    warn!("Error reading data from socket: {}", e);
                    break;
                }
            },
        };

        let packet = match &decrypter {
            Some(decrypter) => match decrypter.decrypt(&buf[..n]) {
                Ok(payload) => Bytes::from(payload),
                Err(e) => {
                    warn!("Dropping undecryptable packet: {}", e);
                    continue;
                }
            },
            None => Bytes::copy_from_slice(&buf[..n]),
        };

        tokio::select! {
            _ = &mut close => break,
            sent = tx.send(packet) => if sent.is_err() {
                debug!("Packet consumer gone, stopping receive loop");
                break;
            },
        }
    }

    info!("Session receive loop closed");
}

async fn send_loop(
    socket: UdpSocket,
    remote: SocketAddr,
    mut rx: mpsc::Receiver<Bytes>,
    mut close: oneshot::Receiver<()>,
) {
    loop {
        let packet = tokio::select! {
            _ = &mut close => break,
            packet = rx.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };

        // Not retried; the next membership event re-establishes the peer
        if let Err(e) = socket.send(&packet).await {
            warn!("Write to {} failed, stopping forwarder: {}", remote, e);
            break;
        }
    }

    info!("Forwarding to {} stopped", remote);
}
