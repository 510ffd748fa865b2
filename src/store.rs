//! Replicated configuration store
//!
//! The consensus log lives outside this crate; [`Store`] is the capability
//! the management API consumes. Mutations are only accepted by the leader.
//! Followers answer [`StoreError::NotLeader`] with the leader's address so
//! the caller can proxy the request.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// User-facing settings of one speaker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerConfig {
    pub id: String,
    pub display_name: String,
}

/// A named group of speakers playing together
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub id: String,
    pub display_name: String,
    /// Member that receives the stream and forwards it
    pub leader: String,
    pub members: Vec<String>,
}

pub trait Store: Send + Sync {
    fn get_speaker_config(&self, id: &str) -> Result<SpeakerConfig, StoreError>;
    fn save_speaker_config(&self, config: SpeakerConfig) -> Result<(), StoreError>;
    fn get_zone_configs(&self) -> Result<Vec<ZoneConfig>, StoreError>;
    fn save_zone_config(&self, config: ZoneConfig) -> Result<(), StoreError>;
    fn delete_zone_config(&self, id: &str) -> Result<(), StoreError>;
    fn is_leader(&self) -> bool;
    fn leader_address(&self) -> Option<String>;
}

/// Single-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    speakers: RwLock<BTreeMap<String, SpeakerConfig>>,
    zones: RwLock<BTreeMap<String, ZoneConfig>>,
    leader: RwLock<Leadership>,
}

#[derive(Debug, Clone)]
struct Leadership {
    is_leader: bool,
    address: Option<String>,
}

impl Default for Leadership {
    fn default() -> Self {
        Self {
            is_leader: true,
            address: None,
        }
    }
}

impl MemoryStore {
    /// A store that leads
    pub fn new() -> Self {
        Self::default()
    }

    /// A follower that points writers at `leader`
    pub fn follower(leader: Option<String>) -> Self {
        let store = Self::default();
        store.set_leader(false, leader);
        store
    }

    pub fn set_leader(&self, is_leader: bool, address: Option<String>) {
        *self.leader.write() = Leadership { is_leader, address };
    }

    fn ensure_leader(&self) -> Result<(), StoreError> {
        let leader = self.leader.read();
        if leader.is_leader {
            return Ok(());
        }
        Err(StoreError::NotLeader {
            leader: leader.address.clone(),
        })
    }
}

impl Store for MemoryStore {
    fn get_speaker_config(&self, id: &str) -> Result<SpeakerConfig, StoreError> {
        self.speakers
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn save_speaker_config(&self, config: SpeakerConfig) -> Result<(), StoreError> {
        self.ensure_leader()?;
        if config.id.is_empty() {
            return Err(StoreError::Apply("speaker id is empty".to_string()));
        }
        self.speakers.write().insert(config.id.clone(), config);
        Ok(())
    }

    fn get_zone_configs(&self) -> Result<Vec<ZoneConfig>, StoreError> {
        Ok(self.zones.read().values().cloned().collect())
    }

    fn save_zone_config(&self, config: ZoneConfig) -> Result<(), StoreError> {
        self.ensure_leader()?;
        if config.id.is_empty() {
            return Err(StoreError::Apply("zone id is empty".to_string()));
        }
        self.zones.write().insert(config.id.clone(), config);
        Ok(())
    }

    fn delete_zone_config(&self, id: &str) -> Result<(), StoreError> {
        self.ensure_leader()?;
        self.zones
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn is_leader(&self) -> bool {
        self.leader.read().is_leader
    }

    fn leader_address(&self) -> Option<String> {
        self.leader.read().address.clone()
    }
}
