//! Playback
//!
//! A player consumes the packet stream of an inbound session. Two variants
//! exist: [`LocalPlayer`] renders to the local sink only, while
//! [`ForwardingPlayer`] also fans every raw packet and every control change
//! out to the peers of its zone.

pub mod forwarding;
pub mod local;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::audio::{adjust_audio, AudioSink};
use crate::codec::{CodecRegistry, PacketDecoder};
use crate::rtsp::PacketStream;

pub use forwarding::{ForwardingPlayer, PeerSession, RetryPolicy};
pub use local::LocalPlayer;

/// "Now playing" metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Track {
    pub artist: String,
    pub album: String,
    pub title: String,
    #[serde(skip_serializing_if = "Vec::is_empty", serialize_with = "as_base64")]
    pub artwork: Vec<u8>,
}

fn as_base64<S: serde::Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

/// Playback capability shared by the local and forwarding variants
pub trait Player: Send + Sync {
    /// Start consuming a session's packets; returns immediately
    fn play(&self, stream: PacketStream);

    /// Set the output volume, 0 (silent) to 1 (full)
    fn set_volume(&self, volume: f64);

    fn volume(&self) -> f64;

    /// Hard mute of local output
    fn set_muted(&self, muted: bool);

    fn is_muted(&self) -> bool;

    fn set_track(&self, album: &str, artist: &str, title: &str);

    fn set_album_art(&self, artwork: Vec<u8>);

    /// Snapshot of the current metadata
    fn track(&self) -> Track;
}

/// Runtime that background playback work is started on
///
/// Captured when a player is built, so calls that arrive on threads outside
/// the runtime (membership callbacks, for one) can still start tasks.
#[derive(Debug, Clone)]
pub(crate) struct Spawner {
    handle: Option<Handle>,
}

impl Spawner {
    /// Capture the runtime of the calling context, if any
    pub(crate) fn current() -> Self {
        Self {
            handle: Handle::try_current().ok(),
        }
    }

    pub(crate) fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Start `task` on the captured runtime; false when there is none
    pub(crate) fn spawn<F>(&self, what: &str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.handle.clone().or_else(|| Handle::try_current().ok()) {
            Some(handle) => {
                handle.spawn(task);
                true
            }
            None => {
                error!("No async runtime to run {}", what);
                false
            }
        }
    }
}

/// Local render state: volume, mute, metadata and the sink
///
/// Volume, mute and track each have their own lock so unrelated updates do
/// not contend.
pub struct LocalOutput {
    volume: RwLock<f64>,
    muted: AtomicBool,
    track: RwLock<Track>,
    sink: Mutex<Box<dyn AudioSink>>,
    codecs: CodecRegistry,
}

impl LocalOutput {
    pub fn new(sink: Box<dyn AudioSink>, codecs: CodecRegistry) -> Self {
        Self {
            volume: RwLock::new(1.0),
            muted: AtomicBool::new(false),
            track: RwLock::new(Track::default()),
            sink: Mutex::new(sink),
            codecs,
        }
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    pub fn volume(&self) -> f64 {
        *self.volume.read()
    }

    /// Store a volume clamped to [0, 1]; returns the stored value
    pub fn set_volume(&self, volume: f64) -> f64 {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        *self.volume.write() = volume;
        volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Replace the text fields; artwork is kept until new art arrives
    pub fn set_track(&self, album: &str, artist: &str, title: &str) -> Track {
        let mut track = self.track.write();
        track.album = album.to_string();
        track.artist = artist.to_string();
        track.title = title.to_string();
        track.clone()
    }

    pub fn set_album_art(&self, artwork: Vec<u8>) {
        self.track.write().artwork = artwork;
    }

    pub fn track(&self) -> Track {
        self.track.read().clone()
    }

    /// Decode one packet and write it to the sink
    ///
    /// Decode and sink failures are logged and the packet is dropped.
    pub fn render(&self, decoder: &mut dyn PacketDecoder, packet: &[u8]) {
        let pcm = match decoder.decode(packet) {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!("Dropping packet for local playback: {}", e);
                return;
            }
        };

        if self.is_muted() {
            return;
        }

        let adjusted = adjust_audio(&pcm, self.volume());
        if let Err(e) = self.sink.lock().write(&adjusted) {
            debug!("Local sink rejected {} bytes: {}", adjusted.len(), e);
        }
    }
}
