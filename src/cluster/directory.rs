//! Current members, by name

use std::net::IpAddr;

use dashmap::DashMap;
use serde::Serialize;
use tracing::warn;

use crate::cluster::{Member, MembershipListener, NodeMeta, NodeRole};

/// Decoded view of one member
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberInfo {
    pub name: String,
    pub addr: IpAddr,
    pub meta: NodeMeta,
}

/// Keeps the live member set so requests can name peers by id
pub struct MemberDirectory {
    local_name: String,
    members: DashMap<String, MemberInfo>,
}

impl MemberDirectory {
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            members: DashMap::new(),
        }
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn get(&self, name: &str) -> Option<MemberInfo> {
        self.members.get(name).map(|m| m.clone())
    }

    /// Members named in `ids`, excluding this node and unknown names
    pub fn resolve(&self, ids: &[String]) -> Vec<MemberInfo> {
        ids.iter()
            .filter(|id| id.as_str() != self.local_name)
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// Every other member with the given role, sorted by name
    pub fn with_role(&self, role: NodeRole) -> Vec<MemberInfo> {
        let mut members: Vec<MemberInfo> = self
            .members
            .iter()
            .filter(|m| m.name != self.local_name && m.meta.role == role)
            .map(|m| m.clone())
            .collect();
        members.sort_by(|a, b| a.name.cmp(&b.name));
        members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl MembershipListener for MemberDirectory {
    fn notify_join(&self, member: &Member) {
        match member.node_meta() {
            Ok(meta) => {
                self.members.insert(
                    member.name.clone(),
                    MemberInfo {
                        name: member.name.clone(),
                        addr: member.addr,
                        meta,
                    },
                );
            }
            Err(e) => warn!("Ignoring member {} with bad metadata: {}", member.name, e),
        }
    }

    fn notify_leave(&self, member: &Member) {
        self.members.remove(&member.name);
    }

    fn notify_update(&self, member: &Member) {
        self.notify_join(member);
    }
}
