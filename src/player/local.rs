//! Player that renders to the local sink only

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::info;

use crate::audio::AudioSink;
use crate::codec::CodecRegistry;
use crate::player::{LocalOutput, Player, Spawner, Track};
use crate::rtsp::PacketStream;

/// Plays sessions on this node without forwarding
pub struct LocalPlayer {
    output: Arc<LocalOutput>,
    spawner: Spawner,
}

impl LocalPlayer {
    /// Build a player bound to the current runtime, if there is one
    pub fn new(sink: Box<dyn AudioSink>, codecs: CodecRegistry) -> Self {
        Self {
            output: Arc::new(LocalOutput::new(sink, codecs)),
            spawner: Spawner::current(),
        }
    }

    /// Run playback tasks on `handle`
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.spawner = Spawner::with_handle(handle);
        self
    }
}

impl Player for LocalPlayer {
    fn play(&self, mut stream: PacketStream) {
        let output = self.output.clone();
        self.spawner.spawn("local playback", async move {
            let mut decoder = output.codecs().select(&stream.description);
            while let Some(packet) = stream.next().await {
                output.render(decoder.as_mut(), &packet);
            }
            info!("Playback stream ended");
        });
    }

    fn set_volume(&self, volume: f64) {
        self.output.set_volume(volume);
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
        self.output.set_track(album, artist, title);
    }

    fn set_album_art(&self, artwork: Vec<u8>) {
        self.output.set_album_art(artwork);
    }

    fn track(&self) -> Track {
        self.output.track()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MemorySink;
    use crate::sdp::SessionDescription;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_play_renders_stream_in_order() {
        let sink = MemorySink::new();
        let player = LocalPlayer::new(Box::new(sink.clone()), CodecRegistry::new());

        let (tx, rx) = mpsc::channel(8);
        player.play(PacketStream::new(Arc::new(SessionDescription::default()), rx));
        for packet in [&[1u8, 0][..], &[2, 0], &[3, 0]] {
            tx.send(Bytes::copy_from_slice(packet)).await.unwrap();
        }
        drop(tx);

        tokio::time::timeout(Duration::from_secs(2), async {
            while sink.len() < 6 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(sink.contents(), vec![1, 0, 2, 0, 3, 0]);
    }

    #[test]
    fn test_play_from_plain_thread_uses_bound_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let sink = MemorySink::new();
        let player = LocalPlayer::new(Box::new(sink.clone()), CodecRegistry::new())
            .with_runtime(runtime.handle().clone());

        let (tx, rx) = mpsc::channel(8);
        tx.try_send(Bytes::from_static(&[9, 0])).unwrap();
        drop(tx);
        player.play(PacketStream::new(Arc::new(SessionDescription::default()), rx));

        runtime.block_on(async {
            tokio::time::timeout(Duration::from_secs(2), async {
                while sink.len() < 2 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .unwrap();
        });
        assert_eq!(sink.contents(), vec![9, 0]);
    }

    #[test]
    fn test_track_and_mute() {
        let player = LocalPlayer::new(Box::new(MemorySink::new()), CodecRegistry::new());
        player.set_track("A", "B", "C");
        player.set_muted(true);

        assert_eq!(player.track().album, "A");
        assert_eq!(player.track().artist, "B");
        assert!(player.is_muted());
    }
}
