//! Forwarding player
//!
//! Renders locally like [`LocalPlayer`](crate::player::LocalPlayer) and also
//! keeps one outbound session per music peer of the zone:
//!
//! ```text
//!                   ┌─▶ peer A send queue ─▶ UDP
//! inbound packet ───┼─▶ peer B send queue ─▶ UDP
//!                   └─▶ decode ─▶ volume ─▶ local sink
//! ```
//!
//! The peer registry is read-locked only long enough to copy the current
//! peer list; packets and control commands are then sent outside the lock.
//! Sends to a full peer queue wait for space, so a stalled peer slows the
//! whole fan-out instead of losing packets.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::audio::AudioSink;
use crate::cluster::{NodeMeta, NodeRole};
use crate::codec::{CodecRegistry, APPLE_LOSSLESS};
use crate::constants::{ESTABLISH_RETRIES, ESTABLISH_RETRY_DELAY};
use crate::error::{NetworkError, Result};
use crate::player::{LocalOutput, Player, Spawner, Track};
use crate::raop::{dmap, establish, volume};
use crate::rtsp::{PacketStream, Session, SessionState};
use crate::sdp::{ConnectData, MediaDescription, Origin, SessionDescription, Timing};

const DEFAULT_RTPMAP: &str = "96 AppleLossless";
const DEFAULT_FMTP: &str = "96 352 0 16 40 10 14 2 255 0 0 44100";

/// Fixed-delay retry schedule for reaching a joining peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub retries: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: ESTABLISH_RETRIES,
            delay: ESTABLISH_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Run `operation` until it succeeds or the retries are used up
    pub async fn run<F, Fut, T>(&self, action: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "{} failed: {}; retrying (attempt {}/{}) in {:?}",
                        action,
                        e,
                        attempt + 1,
                        self.retries + 1,
                        self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Outbound stream to one peer
pub struct PeerSession {
    name: String,
    control: SocketAddr,
    sender: mpsc::Sender<Bytes>,
    /// Dropping the session stops its send loop
    session: Option<Mutex<Session>>,
}

impl PeerSession {
    /// Wrap a session whose send loop is running
    pub fn new(name: impl Into<String>, control: SocketAddr, session: Session) -> Result<Self> {
        let sender = session
            .sender()
            .ok_or_else(|| NetworkError::InvalidTransport("session is not sending".to_string()))?;
        Ok(Self {
            name: name.into(),
            control,
            sender,
            session: Some(Mutex::new(session)),
        })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        name: impl Into<String>,
        control: SocketAddr,
        sender: mpsc::Sender<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            control,
            sender,
            session: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address of the peer's control server
    pub fn control_addr(&self) -> SocketAddr {
        self.control
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.lock().state())
            .unwrap_or(SessionState::Sending)
    }

    /// Queue a packet, waiting while the queue is full
    async fn forward(&self, packet: Bytes) {
        if self.sender.send(packet).await.is_err() {
            debug!("Send queue for {} is closed", self.name);
        }
    }
}

type PeerRegistry = Arc<RwLock<HashMap<String, Arc<PeerSession>>>>;

fn snapshot(peers: &PeerRegistry) -> Vec<Arc<PeerSession>> {
    peers.read().values().cloned().collect()
}

/// Move an established peer from pending into the registry
///
/// Both locks are held together (pending, then peers) so a removal can
/// never land between the two steps. Returns false when the peer was
/// removed while connecting.
fn register_peer(peers: &PeerRegistry, pending: &Mutex<HashSet<String>>, peer: PeerSession) -> bool {
    let mut pending = pending.lock();
    if !pending.remove(peer.name()) {
        return false;
    }
    peers.write().insert(peer.name().to_string(), Arc::new(peer));
    true
}

/// Player that plays locally and forwards to every registered peer
pub struct ForwardingPlayer {
    output: Arc<LocalOutput>,
    peers: PeerRegistry,
    pending: Arc<Mutex<HashSet<String>>>,
    current: Arc<RwLock<Option<Arc<SessionDescription>>>>,
    retry: RetryPolicy,
    spawner: Spawner,
}

impl ForwardingPlayer {
    /// Build a player bound to the current runtime, if there is one
    pub fn new(sink: Box<dyn AudioSink>, codecs: CodecRegistry) -> Self {
        Self {
            output: Arc::new(LocalOutput::new(sink, codecs)),
            peers: Arc::new(RwLock::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashSet::new())),
            current: Arc::new(RwLock::new(None)),
            retry: RetryPolicy::default(),
            spawner: Spawner::current(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run establishment, fan-out and control pushes on `handle`
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.spawner = Spawner::with_handle(handle);
        self
    }

    /// Start forwarding to a music peer
    ///
    /// Returns false when the peer is not a music node or already has a
    /// session, established or in progress. Establishment runs in the
    /// background with retries.
    pub fn add_session_for_peer(&self, name: &str, addr: IpAddr, meta: &NodeMeta) -> bool {
        if meta.role != NodeRole::Music {
            debug!("Not forwarding to {} node {}", meta.role, name);
            return false;
        }

        {
            let mut pending = self.pending.lock();
            if self.peers.read().contains_key(name) || !pending.insert(name.to_string()) {
                debug!("Already forwarding to {}", name);
                return false;
            }
        }

        let peers = self.peers.clone();
        let pending = self.pending.clone();
        let description = self.forward_description();
        let retry = self.retry;
        let name = name.to_string();
        let rtsp_port = meta.rtsp_port;
        info!("Adding forwarding session for {} at {}:{}", name, addr, rtsp_port);

        let task_pending = pending.clone();
        let task_name = name.clone();
        let started = self.spawner.spawn("peer establishment", async move {
            let (pending, name) = (task_pending, task_name);
            let description = &description;
            let result = retry
                .run(&format!("Connecting to {}", name), || {
                    connect_peer(addr, rtsp_port, description)
                })
                .await;

            let session = match result {
                Ok(session) => session,
                Err(e) => {
                    error!("Giving up on peer {}: {}", name, e);
                    pending.lock().remove(&name);
                    return;
                }
            };

            let peer = match PeerSession::new(name.clone(), SocketAddr::new(addr, rtsp_port), session) {
                Ok(peer) => peer,
                Err(e) => {
                    error!("Session for {} is unusable: {}", name, e);
                    pending.lock().remove(&name);
                    return;
                }
            };

            if register_peer(&peers, &pending, peer) {
                info!("Forwarding audio to {}", name);
            } else {
                info!("Peer {} left before its session was ready", name);
            }
        });
        if !started {
            pending.lock().remove(&name);
        }
        started
    }

    /// Stop forwarding to a music peer; returns whether an entry was removed
    pub fn remove_session_for_peer(&self, name: &str, meta: &NodeMeta) -> bool {
        if meta.role != NodeRole::Music {
            return false;
        }
        let was_pending = self.pending.lock().remove(name);
        let removed = self.peers.write().remove(name).is_some();
        if removed || was_pending {
            info!("Removed forwarding session for {}", name);
        }
        removed || was_pending
    }

    /// Drop every peer session at once
    pub fn remove_all_sessions(&self) {
        self.pending.lock().clear();
        let mut peers = self.peers.write();
        info!("Removing all {} forwarding sessions", peers.len());
        peers.clear();
    }

    /// Names of peers with an established session, sorted
    pub fn peer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.peers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_peer(&self, name: &str) -> bool {
        self.peers.read().contains_key(name) || self.pending.lock().contains(name)
    }

    #[cfg(test)]
    pub(crate) fn insert_peer(&self, peer: PeerSession) {
        self.peers.write().insert(peer.name().to_string(), Arc::new(peer));
    }

    /// Description announced to peers: the current stream's codec, no keys
    pub fn forward_description(&self) -> SessionDescription {
        let current = self.current.read().clone();
        let mut attributes = BTreeMap::new();
        let rtpmap = current
            .as_ref()
            .and_then(|d| d.rtpmap())
            .unwrap_or(DEFAULT_RTPMAP);
        let fmtp = current.as_ref().and_then(|d| d.fmtp()).unwrap_or(DEFAULT_FMTP);
        attributes.insert("rtpmap".to_string(), rtpmap.to_string());
        attributes.insert("fmtp".to_string(), fmtp.to_string());

        SessionDescription {
            version: 0,
            origin: Origin {
                username: "zone".to_string(),
                session_id: "0".to_string(),
                session_version: "0".to_string(),
                net_type: "IN".to_string(),
                addr_type: "IP4".to_string(),
                unicast_address: "0.0.0.0".to_string(),
            },
            session_name: "zone".to_string(),
            information: String::new(),
            connect_data: ConnectData {
                net_type: "IN".to_string(),
                addr_type: "IP4".to_string(),
                connection_address: "0.0.0.0".to_string(),
            },
            timing: Timing::default(),
            media: vec![MediaDescription {
                media: "audio".to_string(),
                port: "0".to_string(),
                proto: "RTP/AVP".to_string(),
                fmt: "96".to_string(),
            }],
            attributes,
        }
    }

    /// Push a `SET_PARAMETER` to every peer from a background task
    fn broadcast(&self, content_type: &'static str, body: Vec<u8>) {
        let targets = snapshot(&self.peers);
        if targets.is_empty() {
            return;
        }

        self.spawner.spawn("control broadcast", async move {
            let sends = targets.iter().map(|peer| {
                let body = body.clone();
                async move {
                    if let Err(e) = establish::send_control(peer.control_addr(), content_type, body).await
                    {
                        warn!("Failed to send {} to {}: {}", content_type, peer.name(), e);
                    }
                }
            });
            join_all(sends).await;
        });
    }
}

async fn connect_peer(
    addr: IpAddr,
    rtsp_port: u16,
    description: &SessionDescription,
) -> Result<Session> {
    let mut session = establish::establish_session(addr, rtsp_port, description).await?;
    session.start_sending()?;
    Ok(session)
}

impl Player for ForwardingPlayer {
    fn play(&self, mut stream: PacketStream) {
        if stream.description.rtpmap().is_some_and(|r| !r.contains(APPLE_LOSSLESS)) {
            warn!("Forwarding a stream peers may not decode");
        }
        *self.current.write() = Some(stream.description.clone());

        let output = self.output.clone();
        let peers = self.peers.clone();
        self.spawner.spawn("forwarding playback", async move {
            let mut decoder = output.codecs().select(&stream.description);
            while let Some(packet) = stream.next().await {
                for peer in snapshot(&peers) {
                    peer.forward(packet.clone()).await;
                }
                output.render(decoder.as_mut(), &packet);
            }
            info!("Playback stream ended");
        });
    }

    fn set_volume(&self, volume: f64) {
        let stored = self.output.set_volume(volume);
        let body = format!("volume: {:.6}\r\n", volume::denormalize(stored));
        self.broadcast("text/parameters", body.into_bytes());
    }

    fn volume(&self) -> f64 {
        self.output.volume()
    }

    fn set_muted(&self, muted: bool) {
        self.output.set_muted(muted);
    }

    fn is_muted(&self) -> bool {
        self.output.is_muted()
    }

    fn set_track(&self, album: &str, artist: &str, title: &str) {
        let track = self.output.set_track(album, artist, title);
        self.broadcast("application/x-dmap-tagged", dmap::encode(&track));
    }

    fn set_album_art(&self, artwork: Vec<u8>) {
        self.output.set_album_art(artwork.clone());
        self.broadcast("image/jpeg", artwork);
    }

    fn track(&self) -> Track {
        self.output.track()
    }
}
