//! Persistent client database
//!
//! Clients and the steering history survive restarts through a bincode snapshot
//! written by the periodic commit operation. Entries are aged out once they have
//! not been seen for the configured maximum age.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use mesh_core::{MacAddress, MeshError, Result, Timestamp};
use serde::{Deserialize, Serialize};

/// Steering history entries kept in memory and in the snapshot
pub const MAX_STEERING_HISTORY: usize = 64;

/// One remembered client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentClient {
    pub mac: MacAddress,
    pub name: String,
    pub last_seen: Timestamp,
    pub last_bssid: Option<MacAddress>,
    pub btm_supported: bool,
}

/// Outcome of one steering attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SteeringHistoryEntry {
    pub timestamp: Timestamp,
    pub sta_mac: MacAddress,
    pub original_bssid: Option<MacAddress>,
    pub target_bssid: MacAddress,
    pub triggered_by: String,
    pub btm: bool,
    pub success: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    clients: Vec<PersistentClient>,
    steering_history: Vec<SteeringHistoryEntry>,
}

/// In-memory image of the persistent database
#[derive(Debug, Default)]
pub struct PersistentStore {
    clients: BTreeMap<MacAddress, PersistentClient>,
    steering_history: VecDeque<SteeringHistoryEntry>,
    dirty: bool,
}

impl PersistentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn client(&self, mac: &MacAddress) -> Option<&PersistentClient> {
        self.clients.get(mac)
    }

    /// Insert or refresh a client; the oldest entry makes room when full
    pub fn upsert(&mut self, client: PersistentClient, max_clients: usize) {
        if !self.clients.contains_key(&client.mac) && self.clients.len() >= max_clients {
            let oldest = self
                .clients
                .values()
                .min_by_key(|c| c.last_seen)
                .map(|c| c.mac);
            if let Some(mac) = oldest {
                self.clients.remove(&mac);
            }
        }
        self.clients.insert(client.mac, client);
        self.dirty = true;
    }

    pub fn record_steering(&mut self, entry: SteeringHistoryEntry) {
        if self.steering_history.len() >= MAX_STEERING_HISTORY {
            self.steering_history.pop_front();
        }
        self.steering_history.push_back(entry);
        self.dirty = true;
    }

    pub fn steering_history(&self) -> impl Iterator<Item = &SteeringHistoryEntry> {
        self.steering_history.iter()
    }

    /// Drop clients not seen for `max_age_ms`; returns how many were removed
    pub fn age(&mut self, now: Timestamp, max_age_ms: u64) -> usize {
        let before = self.clients.len();
        self.clients
            .retain(|_, client| now - client.last_seen <= max_age_ms);
        let removed = before - self.clients.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let snapshot = Snapshot {
            clients: self.clients.values().cloned().collect(),
            steering_history: self.steering_history.iter().cloned().collect(),
        };
        bincode::serialize(&snapshot)
            .map_err(|e| MeshError::database(format!("snapshot encoding failed: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Snapshot = bincode::deserialize(bytes)
            .map_err(|e| MeshError::database(format!("snapshot decoding failed: {e}")))?;
        Ok(Self {
            clients: snapshot
                .clients
                .into_iter()
                .map(|client| (client.mac, client))
                .collect(),
            steering_history: snapshot.steering_history.into_iter().collect(),
            dirty: false,
        })
    }

    /// Write the snapshot and clear the dirty flag
    pub fn commit(&mut self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).map_err(|e| {
            MeshError::database(format!("writing {} failed: {e}", path.display()))
        })?;
        self.dirty = false;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| MeshError::database(format!("reading {} failed: {e}", path.display())))?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(last: u8, seen: u64) -> PersistentClient {
        PersistentClient {
            mac: MacAddress::new([0x02, 0, 0, 0, 0, last]),
            name: format!("client-{last}"),
            last_seen: Timestamp::new(seen),
            last_bssid: None,
            btm_supported: false,
        }
    }

    #[test]
    fn test_upsert_evicts_oldest() {
        let mut store = PersistentStore::new();
        store.upsert(client(1, 100), 2);
        store.upsert(client(2, 50), 2);
        store.upsert(client(3, 200), 2);

        assert_eq!(store.len(), 2);
        assert!(store.client(&client(2, 0).mac).is_none());
        assert!(store.is_dirty());
    }

    #[test]
    fn test_aging() {
        let mut store = PersistentStore::new();
        store.upsert(client(1, 1_000), 10);
        store.upsert(client(2, 9_000), 10);

        assert_eq!(store.age(Timestamp::new(10_000), 5_000), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.age(Timestamp::new(10_000), 5_000), 0);
    }

    #[test]
    fn test_snapshot_restores_history() {
        let mut store = PersistentStore::new();
        store.upsert(client(1, 1_000), 10);
        store.record_steering(SteeringHistoryEntry {
            timestamp: Timestamp::new(5),
            sta_mac: client(1, 0).mac,
            original_bssid: None,
            target_bssid: MacAddress::new([0x02, 1, 1, 1, 1, 1]),
            triggered_by: "cli".to_string(),
            btm: true,
            success: false,
        });

        let restored = PersistentStore::from_bytes(&store.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.steering_history().count(), 1);
        assert!(!restored.is_dirty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut store = PersistentStore::new();
        for i in 0..(MAX_STEERING_HISTORY as u64 + 5) {
            store.record_steering(SteeringHistoryEntry {
                timestamp: Timestamp::new(i),
                sta_mac: MacAddress::ZERO,
                original_bssid: None,
                target_bssid: MacAddress::ZERO,
                triggered_by: String::new(),
                btm: false,
                success: true,
            });
        }
        assert_eq!(store.steering_history().count(), MAX_STEERING_HISTORY);
        assert_eq!(store.steering_history().next().unwrap().timestamp, Timestamp::new(5));
    }
}
