//! Membership from a fixed peer list
//!
//! Stands in for the gossip layer: configured peers are announced as joins
//! when the node starts and as leaves when it shuts down.

use tracing::info;

use crate::cluster::{Member, MembershipListener, NodeMeta};
use crate::config::PeerConfig;
use crate::error::ClusterError;

pub struct StaticMembership {
    members: Vec<Member>,
}

impl StaticMembership {
    pub fn new(members: Vec<Member>) -> Self {
        Self { members }
    }

    pub fn from_config(peers: &[PeerConfig]) -> Result<Self, ClusterError> {
        let members = peers
            .iter()
            .map(|peer| {
                let meta = NodeMeta {
                    rtsp_port: peer.rtsp_port,
                    api_port: peer.api_port,
                    role: peer.role,
                    raft_port: 0,
                };
                Member::new(peer.name.clone(), peer.address, &meta)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(members))
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Announce every peer as joined
    pub fn join(&self, listener: &dyn MembershipListener) {
        info!("Announcing {} configured peers", self.members.len());
        for member in &self.members {
            listener.notify_join(member);
        }
    }

    /// Announce every peer as gone
    pub fn leave(&self, listener: &dyn MembershipListener) {
        for member in &self.members {
            listener.notify_leave(member);
        }
    }
}
