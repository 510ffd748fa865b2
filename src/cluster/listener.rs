//! Turns membership events into forwarding sessions

use std::sync::Arc;

use tracing::{info, warn};

use crate::cluster::{Member, MembershipListener, NodeMeta};
use crate::player::ForwardingPlayer;

/// Adds a forwarding session when a music node joins and drops it on leave
pub struct ForwardingListener {
    player: Arc<ForwardingPlayer>,
}

impl ForwardingListener {
    pub fn new(player: Arc<ForwardingPlayer>) -> Self {
        Self { player }
    }

    fn meta(member: &Member) -> Option<NodeMeta> {
        match member.node_meta() {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!("Cannot read metadata of {}: {}", member.name, e);
                None
            }
        }
    }
}

impl MembershipListener for ForwardingListener {
    fn notify_join(&self, member: &Member) {
        let Some(meta) = Self::meta(member) else {
            return;
        };
        self.player
            .add_session_for_peer(&member.name, member.addr, &meta);
    }

    fn notify_leave(&self, member: &Member) {
        let Some(meta) = Self::meta(member) else {
            return;
        };
        self.player.remove_session_for_peer(&member.name, &meta);
    }

    fn notify_update(&self, member: &Member) {
        info!("Member {} updated", member.name);
    }
}
