//! Zone reconciliation
//!
//! A zone's leader forwards to every other member of the zone. Applying a
//! zone replaces the whole forwarding set.

use tracing::{info, warn};

use crate::cluster::{MemberDirectory, NodeRole};
use crate::player::ForwardingPlayer;
use crate::store::ZoneConfig;

/// Rebuild forwarding sessions for a zone led by this node
///
/// Returns the names of the peers a session was requested for. Zones led by
/// another node leave the forwarding set untouched.
pub fn apply_zone(
    zone: &ZoneConfig,
    directory: &MemberDirectory,
    player: &ForwardingPlayer,
) -> Vec<String> {
    if zone.leader != directory.local_name() {
        info!("Zone {} is led by {}, not forwarding", zone.id, zone.leader);
        return Vec::new();
    }

    player.remove_all_sessions();

    let mut added = Vec::new();
    for member in directory.resolve(&zone.members) {
        if member.meta.role != NodeRole::Music {
            continue;
        }
        if player.add_session_for_peer(&member.name, member.addr, &member.meta) {
            added.push(member.name);
        }
    }

    let missing = zone
        .members
        .iter()
        .filter(|id| id.as_str() != directory.local_name() && directory.get(id).is_none())
        .count();
    if missing > 0 {
        warn!("{} members of zone {} are not in the cluster", missing, zone.id);
    }

    info!("Zone {} forwarding to {:?}", zone.id, added);
    added
}
