//! HTTP API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::AppState;
use crate::cluster::apply_zone;
use crate::error::StoreError;
use crate::player::{Player, Track};
use crate::store::{SpeakerConfig, ZoneConfig};

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

fn ok<T>(data: T) -> Reply<T> {
    (StatusCode::OK, Json(ApiResponse::ok(data)))
}

fn fail<T>(status: StatusCode, msg: impl Into<String>) -> Reply<T> {
    (status, Json(ApiResponse::error(msg)))
}

/// Followers point the caller at the leader so it can retry there
fn store_failure<T>(err: StoreError) -> Reply<T> {
    let status = match &err {
        StoreError::NotLeader { .. } => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Apply(_) => StatusCode::BAD_REQUEST,
    };
    fail(status, err.to_string())
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub should_broadcast: bool,
}

/// Turn service advertisement on or off
pub async fn toggle_broadcast(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BroadcastRequest>,
) -> Reply<bool> {
    state.receiver.toggle_advertise(req.should_broadcast);
    ok(state.receiver.is_advertising())
}

#[derive(Debug, Deserialize)]
pub struct NameRequest {
    pub new_name: String,
}

/// Rename the service
pub async fn change_name(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NameRequest>,
) -> Reply<String> {
    match state.receiver.change_name(&req.new_name) {
        Ok(()) => ok(state.receiver.name()),
        Err(e) => fail(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct ForwardRequest {
    pub ids: Vec<String>,
}

/// Start forwarding to the named members
pub async fn forward_to_nodes(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ForwardRequest>,
) -> Reply<Vec<String>> {
    let Some(forwarder) = &state.forwarder else {
        return fail(StatusCode::CONFLICT, "forwarding is disabled on this node");
    };

    let added = state
        .directory
        .resolve(&req.ids)
        .into_iter()
        .filter(|member| forwarder.add_session_for_peer(&member.name, member.addr, &member.meta))
        .map(|member| member.name)
        .collect();
    ok(added)
}

#[derive(Debug, Deserialize)]
pub struct RemoveForwardRequest {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub remove_all: bool,
}

/// Stop forwarding to some or all members
pub async fn remove_forward_to_nodes(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RemoveForwardRequest>,
) -> Reply<Vec<String>> {
    let Some(forwarder) = &state.forwarder else {
        return fail(StatusCode::CONFLICT, "forwarding is disabled on this node");
    };

    if req.remove_all {
        let removed = forwarder.peer_names();
        forwarder.remove_all_sessions();
        return ok(removed);
    }

    let removed = state
        .directory
        .resolve(&req.ids)
        .into_iter()
        .filter(|member| forwarder.remove_session_for_peer(&member.name, &member.meta))
        .map(|member| member.name)
        .collect();
    ok(removed)
}

/// Currently playing track
pub async fn get_track(State(state): State<Arc<AppState>>) -> Reply<Track> {
    ok(state.receiver.player().track())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MuteState {
    pub is_muted: bool,
}

pub async fn get_mute(State(state): State<Arc<AppState>>) -> Reply<MuteState> {
    ok(MuteState {
        is_muted: state.receiver.player().is_muted(),
    })
}

pub async fn set_mute(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MuteState>,
) -> Reply<MuteState> {
    state.receiver.player().set_muted(req.is_muted);
    ok(MuteState {
        is_muted: state.receiver.player().is_muted(),
    })
}

/// Speaker settings
pub async fn get_speaker(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Reply<SpeakerConfig> {
    match state.store.get_speaker_config(&id) {
        Ok(config) => ok(config),
        Err(e) => store_failure(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SpeakerUpdate {
    pub display_name: String,
}

pub async fn save_speaker(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<SpeakerUpdate>,
) -> Reply<SpeakerConfig> {
    if update.display_name.trim().is_empty() {
        return fail(StatusCode::BAD_REQUEST, "display_name must not be empty");
    }
    let config = SpeakerConfig {
        id,
        display_name: update.display_name,
    };
    match state.store.save_speaker_config(config.clone()) {
        Ok(()) => ok(config),
        Err(e) => store_failure(e),
    }
}

pub async fn get_zones(State(state): State<Arc<AppState>>) -> Reply<Vec<ZoneConfig>> {
    match state.store.get_zone_configs() {
        Ok(zones) => ok(zones),
        Err(e) => store_failure(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ZoneUpdate {
    pub display_name: String,
    pub leader: String,
    #[serde(default)]
    pub members: Vec<String>,
}

/// Save a zone; the zone's leader starts forwarding to its members
pub async fn save_zone(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<ZoneUpdate>,
) -> Reply<ZoneConfig> {
    if update.leader.is_empty() {
        return fail(StatusCode::BAD_REQUEST, "zone needs a leader");
    }
    let zone = ZoneConfig {
        id,
        display_name: update.display_name,
        leader: update.leader,
        members: update.members,
    };
    if let Err(e) = state.store.save_zone_config(zone.clone()) {
        return store_failure(e);
    }

    if let Some(forwarder) = &state.forwarder {
        apply_zone(&zone, &state.directory, forwarder);
    }
    (StatusCode::CREATED, Json(ApiResponse::ok(zone)))
}

pub async fn delete_zone(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Reply<()> {
    match state.store.delete_zone_config(&id) {
        Ok(()) => ok(()),
        Err(e) => store_failure(e),
    }
}
