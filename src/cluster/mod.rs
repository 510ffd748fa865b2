//! Cluster membership
//!
//! The gossip transport is external. It reports joins, leaves and updates
//! as [`Member`] values whose metadata blob decodes into a [`NodeMeta`].
//! [`EventDelegate`] fans each event out to a fixed, ordered list of
//! listeners.

pub mod directory;
pub mod listener;
pub mod seed;
pub mod zone;

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ClusterError;

pub use directory::MemberDirectory;
pub use listener::ForwardingListener;
pub use seed::StaticMembership;
pub use zone::apply_zone;

/// Role a node volunteers for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Plays music
    #[default]
    Music,
    /// Serves the management API
    Management,
    /// Controls the front proxy
    Frontend,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeRole::Music => "music",
            NodeRole::Management => "management",
            NodeRole::Frontend => "frontend",
        })
    }
}

impl FromStr for NodeRole {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "music" => Ok(NodeRole::Music),
            "management" | "mgmt" => Ok(NodeRole::Management),
            "frontend" => Ok(NodeRole::Frontend),
            other => Err(ClusterError::MetadataDecode(format!("unknown role {}", other))),
        }
    }
}

/// Metadata a node gossips about itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub rtsp_port: u16,
    pub api_port: u16,
    pub role: NodeRole,
    pub raft_port: u16,
}

impl NodeMeta {
    /// Serialize for the gossip metadata field
    pub fn encode(&self) -> Result<Vec<u8>, ClusterError> {
        bincode::serialize(self).map_err(|e| ClusterError::MetadataEncode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ClusterError> {
        bincode::deserialize(bytes).map_err(|e| ClusterError::MetadataDecode(e.to_string()))
    }
}

/// A node as reported by the membership layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub addr: IpAddr,
    /// Encoded [`NodeMeta`]
    pub meta: Vec<u8>,
}

impl Member {
    pub fn new(name: impl Into<String>, addr: IpAddr, meta: &NodeMeta) -> Result<Self, ClusterError> {
        Ok(Self {
            name: name.into(),
            addr,
            meta: meta.encode()?,
        })
    }

    pub fn node_meta(&self) -> Result<NodeMeta, ClusterError> {
        NodeMeta::decode(&self.meta)
    }
}

/// Receiver of membership events
pub trait MembershipListener: Send + Sync {
    fn notify_join(&self, member: &Member);
    fn notify_leave(&self, member: &Member);
    fn notify_update(&self, member: &Member);
}

/// Forwards each event to every listener, in registration order
pub struct EventDelegate {
    listeners: Vec<Arc<dyn MembershipListener>>,
}

impl EventDelegate {
    pub fn new(listeners: Vec<Arc<dyn MembershipListener>>) -> Self {
        Self { listeners }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl MembershipListener for EventDelegate {
    fn notify_join(&self, member: &Member) {
        debug!("Member {} joined from {}", member.name, member.addr);
        for listener in &self.listeners {
            listener.notify_join(member);
        }
    }

    fn notify_leave(&self, member: &Member) {
        debug!("Member {} left", member.name);
        for listener in &self.listeners {
            listener.notify_leave(member);
        }
    }

    fn notify_update(&self, member: &Member) {
        for listener in &self.listeners {
            listener.notify_update(member);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::net::Ipv4Addr;

    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl MembershipListener for Recorder {
        fn notify_join(&self, member: &Member) {
            self.log.lock().push(format!("{} join {}", self.tag, member.name));
        }

        fn notify_leave(&self, member: &Member) {
            self.log.lock().push(format!("{} leave {}", self.tag, member.name));
        }

        fn notify_update(&self, member: &Member) {
            self.log.lock().push(format!("{} update {}", self.tag, member.name));
        }
    }

    fn meta(role: NodeRole) -> NodeMeta {
        NodeMeta {
            rtsp_port: 5000,
            api_port: 8080,
            role,
            raft_port: 7000,
        }
    }

    #[test]
    fn test_node_meta_roundtrip() {
        let member = Member::new(
            "kitchen",
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            &meta(NodeRole::Management),
        )
        .unwrap();
        assert_eq!(member.node_meta().unwrap(), meta(NodeRole::Management));
    }

    #[test]
    fn test_garbage_meta_is_error() {
        assert!(matches!(
            NodeMeta::decode(&[1, 2]),
            Err(ClusterError::MetadataDecode(_))
        ));
    }

    #[test]
    fn test_role_parse_and_display() {
        for role in [NodeRole::Music, NodeRole::Management, NodeRole::Frontend] {
            assert_eq!(role.to_string().parse::<NodeRole>().unwrap(), role);
        }
        assert!("speaker".parse::<NodeRole>().is_err());
    }

    #[test]
    fn test_delegate_calls_listeners_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let delegate = EventDelegate::new(vec![
            Arc::new(Recorder { tag: "first", log: log.clone() }),
            Arc::new(Recorder { tag: "second", log: log.clone() }),
        ]);
        let member = Member::new("den", IpAddr::V4(Ipv4Addr::LOCALHOST), &meta(NodeRole::Music)).unwrap();

        delegate.notify_join(&member);
        delegate.notify_leave(&member);

        assert_eq!(
            *log.lock(),
            vec!["first join den", "second join den", "first leave den", "second leave den"]
        );
    }
}
