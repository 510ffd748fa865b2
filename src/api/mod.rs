//! Management HTTP API
//!
//! JSON endpoints for naming and advertising the receiver, steering
//! forwarding, muting local output, and editing speaker and zone settings
//! held in the replicated store.

pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::cluster::MemberDirectory;
use crate::error::Result;
use crate::player::ForwardingPlayer;
use crate::raop::Receiver;
use crate::store::Store;

pub use handlers::ApiResponse;

/// Shared state behind every handler
pub struct AppState {
    pub receiver: Arc<Receiver>,
    /// Present when this node forwards to its zone
    pub forwarder: Option<Arc<ForwardingPlayer>>,
    pub directory: Arc<MemberDirectory>,
    pub store: Arc<dyn Store>,
}

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/broadcast", post(handlers::toggle_broadcast))
        .route("/name", post(handlers::change_name))
        .route("/forward", post(handlers::forward_to_nodes))
        .route("/forward/remove", post(handlers::remove_forward_to_nodes))
        .route("/track", get(handlers::get_track))
        .route("/mute", get(handlers::get_mute).post(handlers::set_mute))
        .route(
            "/speakers/:id",
            get(handlers::get_speaker).put(handlers::save_speaker),
        )
        .route("/zones", get(handlers::get_zones))
        .route(
            "/zones/:id",
            put(handlers::save_zone).delete(handlers::delete_zone),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until the listener fails
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Management API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MemorySink;
    use crate::cluster::{Member, MembershipListener, NodeMeta, NodeRole};
    use crate::codec::CodecRegistry;
    use crate::player::{PeerSession, Player, RetryPolicy};
    use crate::raop::{HardwareAddr, ReceiverSettings};
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn settings() -> ReceiverSettings {
        ReceiverSettings {
            name: "Kitchen".to_string(),
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            rtsp_port: 0,
            data_port: 0,
            control_port: 6001,
            timing_port: 6002,
            hardware_address: HardwareAddr::from_name("kitchen"),
            device_key: None,
            verbose: false,
        }
    }

    fn music_meta() -> NodeMeta {
        NodeMeta {
            rtsp_port: 1,
            api_port: 8080,
            role: NodeRole::Music,
            raft_port: 0,
        }
    }

    fn state_with(store: MemoryStore, forwarding: bool) -> Arc<AppState> {
        let forwarder = Arc::new(
            ForwardingPlayer::new(Box::new(MemorySink::new()), CodecRegistry::new())
                .with_retry_policy(RetryPolicy {
                    retries: 0,
                    delay: Duration::ZERO,
                }),
        );
        let player: Arc<dyn Player> = forwarder.clone();
        let directory = Arc::new(MemberDirectory::new("kitchen"));
        let den = Member::new("den", IpAddr::V4(Ipv4Addr::LOCALHOST), &music_meta()).unwrap();
        directory.notify_join(&den);

        Arc::new(AppState {
            receiver: Arc::new(Receiver::new(settings(), player)),
            forwarder: forwarding.then_some(forwarder),
            directory,
            store: Arc::new(store),
        })
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_change_name() {
        let state = state_with(MemoryStore::new(), true);
        let router = router(state.clone());

        let (status, body) = send(&router, "POST", "/name", Some(json!({"new_name": "Patio"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], "Patio");
        assert_eq!(state.receiver.name(), "Patio");

        let (status, body) = send(&router, "POST", "/name", Some(json!({"new_name": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(state.receiver.name(), "Patio");
    }

    #[tokio::test]
    async fn test_toggle_broadcast() {
        let state = state_with(MemoryStore::new(), true);
        let router = router(state.clone());

        let (status, body) = send(
            &router,
            "POST",
            "/broadcast",
            Some(json!({"should_broadcast": false})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], false);
        assert!(!state.receiver.is_advertising());
    }

    #[tokio::test]
    async fn test_mute_round_trip() {
        let state = state_with(MemoryStore::new(), true);
        let router = router(state);

        let (_, body) = send(&router, "GET", "/mute", None).await;
        assert_eq!(body["data"]["is_muted"], false);

        let (status, _) = send(&router, "POST", "/mute", Some(json!({"is_muted": true}))).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&router, "GET", "/mute", None).await;
        assert_eq!(body["data"]["is_muted"], true);
    }

    #[tokio::test]
    async fn test_get_track() {
        let state = state_with(MemoryStore::new(), true);
        state.receiver.player().set_track("Album", "Artist", "Title");
        let router = router(state);

        let (status, body) = send(&router, "GET", "/track", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["title"], "Title");
        assert!(body["data"].get("artwork").is_none());
    }

    #[tokio::test]
    async fn test_forward_resolves_known_members() {
        let state = state_with(MemoryStore::new(), true);
        let router = router(state.clone());

        let (status, body) = send(
            &router,
            "POST",
            "/forward",
            Some(json!({"ids": ["den", "kitchen", "attic"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!(["den"]));
    }

    #[tokio::test]
    async fn test_forward_remove() {
        let state = state_with(MemoryStore::new(), true);
        let forwarder = state.forwarder.clone().unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let control = "127.0.0.1:1".parse().unwrap();
        forwarder.insert_peer(PeerSession::from_parts("den", control, tx.clone()));
        forwarder.insert_peer(PeerSession::from_parts("office", control, tx));
        let router = router(state);

        let (_, body) = send(&router, "POST", "/forward/remove", Some(json!({"ids": ["den"]}))).await;
        assert_eq!(body["data"], json!(["den"]));
        assert_eq!(forwarder.peer_names(), vec!["office".to_string()]);

        let (_, body) = send(
            &router,
            "POST",
            "/forward/remove",
            Some(json!({"remove_all": true})),
        )
        .await;
        assert_eq!(body["data"], json!(["office"]));
        assert!(forwarder.peer_names().is_empty());
    }

    #[tokio::test]
    async fn test_forward_without_forwarder_conflicts() {
        let state = state_with(MemoryStore::new(), false);
        let router = router(state);

        let (status, body) = send(&router, "POST", "/forward", Some(json!({"ids": ["den"]}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_speaker_settings() {
        let state = state_with(MemoryStore::new(), true);
        let router = router(state);

        let (status, _) = send(&router, "GET", "/speakers/den", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &router,
            "PUT",
            "/speakers/den",
            Some(json!({"display_name": "Den"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&router, "GET", "/speakers/den", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!({"id": "den", "display_name": "Den"}));
    }

    #[tokio::test]
    async fn test_zone_lifecycle() {
        let state = state_with(MemoryStore::new(), true);
        let router = router(state.clone());

        let zone = json!({"display_name": "Downstairs", "leader": "kitchen", "members": ["den"]});
        let (status, body) = send(&router, "PUT", "/zones/down", Some(zone)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["leader"], "kitchen");

        let (_, body) = send(&router, "GET", "/zones", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, _) = send(&router, "DELETE", "/zones/down", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&router, "DELETE", "/zones/down", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_follower_points_at_leader() {
        let store = MemoryStore::follower(Some("10.0.0.7:8080".to_string()));
        let state = state_with(store, true);
        let router = router(state);

        let zone = json!({"display_name": "Up", "leader": "kitchen"});
        let (status, body) = send(&router, "PUT", "/zones/up", Some(zone)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("10.0.0.7:8080"));
    }
}
