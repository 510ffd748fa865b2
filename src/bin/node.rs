//! Zone Speaker Node
//!
//! Receives a stream from a remote sender, plays it locally and forwards it
//! to the other speakers of its zone.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_zone_audio::{
    api::{self, AppState},
    audio::{AudioSink, NullSink},
    cluster::{EventDelegate, ForwardingListener, MemberDirectory, MembershipListener, StaticMembership},
    codec::CodecRegistry,
    config::NodeConfig,
    player::{ForwardingPlayer, LocalPlayer, Player},
    raop::{Receiver, ReceiverSettings},
    store::MemoryStore,
};

#[cfg(feature = "device-output")]
fn open_sink() -> Box<dyn AudioSink> {
    match lan_zone_audio::audio::DeviceSink::open(None) {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            tracing::warn!("No audio output ({}), discarding decoded audio", e);
            Box::new(NullSink)
        }
    }
}

#[cfg(not(feature = "device-output"))]
fn open_sink() -> Box<dyn AudioSink> {
    tracing::info!("Built without device output, discarding decoded audio");
    Box::new(NullSink)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = NodeConfig::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    tracing::info!(
        "Starting {} as {} ({} node)",
        config.name,
        config.node_name(),
        config.node.role
    );

    let codecs = CodecRegistry::with_defaults();
    tracing::info!("Decoders: {:?}", codecs.names());

    let (player, forwarder): (Arc<dyn Player>, Option<Arc<ForwardingPlayer>>) = if config.node.forward {
        let forwarder = Arc::new(ForwardingPlayer::new(open_sink(), codecs));
        (forwarder.clone(), Some(forwarder))
    } else {
        (Arc::new(LocalPlayer::new(open_sink(), codecs)), None)
    };

    let settings = ReceiverSettings::from_config(&config).context("Failed to prepare receiver")?;
    let receiver = Arc::new(Receiver::new(settings, player));

    // Membership fans out to the directory first so forwarding sees a known peer
    let directory = Arc::new(MemberDirectory::new(config.node_name()));
    let mut listeners: Vec<Arc<dyn MembershipListener>> = vec![directory.clone()];
    if let Some(forwarder) = &forwarder {
        listeners.push(Arc::new(ForwardingListener::new(forwarder.clone())));
    }
    let events = EventDelegate::new(listeners);
    let membership = StaticMembership::from_config(&config.peers).context("Invalid peer list")?;
    membership.join(&events);
    tracing::info!("Cluster has {} known members", directory.len());

    let state = Arc::new(AppState {
        receiver: receiver.clone(),
        forwarder: forwarder.clone(),
        directory,
        store: Arc::new(MemoryStore::new()),
    });
    let api_addr = SocketAddr::new(config.network.bind_address, config.network.api_port);
    tokio::spawn(async move {
        if let Err(e) = api::serve(state, api_addr).await {
            tracing::error!("Management API stopped: {}", e);
        }
    });

    let server = receiver.server();
    let stop = server.stop_handle();
    let control = tokio::spawn(server.start());

    tracing::info!("Waiting for senders on port {}", config.network.rtsp_port);
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    stop.stop();
    membership.leave(&events);
    if let Some(forwarder) = &forwarder {
        forwarder.remove_all_sessions();
    }
    control.await?.context("Control server failed")?;

    Ok(())
}
