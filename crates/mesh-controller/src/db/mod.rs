//! Network database
//!
//! This module contains the controller's view of the network:
//! - `entities`: agents, radios, BSSes and stations
//! - `persistent`: clients and steering history kept across restarts
//!
//! The database is plain data. It never sends anything and never reaches back into
//! the controller; tasks and handlers receive it by `&mut` through their context.

pub mod entities;
pub mod persistent;

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::HashMap;
use mesh_core::channel::{which_subband, Subband};
use mesh_core::{FreqBand, MacAddress, Timestamp};
use tracing::{debug, info};

use crate::tasks::TaskId;

// Re-export entity types
pub use entities::{
    Agent, AgentState, Bss, LinkMetrics, Radio, Station, StationState, StationTaskKind,
    StationTasks,
};

// Re-export persistence types
pub use persistent::{PersistentClient, PersistentStore, SteeringHistoryEntry};

// ----------------------------------------------------------------------------
// Steering Statistics
// ----------------------------------------------------------------------------

/// Steering outcome counters, split by 11v capability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SteeringStats {
    pub btm_attempts: u32,
    pub btm_successes: u32,
    pub btm_failures: u32,
    pub blacklist_attempts: u32,
    pub blacklist_successes: u32,
    pub blacklist_failures: u32,
    pub band_2g_to_5g: u32,
    pub band_5g_to_2g: u32,
    pub same_band: u32,
}

impl SteeringStats {
    pub fn record_attempt(&mut self, btm: bool) {
        if btm {
            self.btm_attempts += 1;
        } else {
            self.blacklist_attempts += 1;
        }
    }

    pub fn record_outcome(&mut self, btm: bool, success: bool) {
        match (btm, success) {
            (true, true) => self.btm_successes += 1,
            (true, false) => self.btm_failures += 1,
            (false, true) => self.blacklist_successes += 1,
            (false, false) => self.blacklist_failures += 1,
        }
    }

    pub fn record_band_transition(&mut self, from: FreqBand, to: FreqBand) {
        match (from, to) {
            (FreqBand::Band24G, FreqBand::Band5G) => self.band_2g_to_5g += 1,
            (FreqBand::Band5G, FreqBand::Band24G) => self.band_5g_to_2g += 1,
            _ => self.same_band += 1,
        }
    }
}

// ----------------------------------------------------------------------------
// Database
// ----------------------------------------------------------------------------

/// Runtime topology plus the controller's long-lived task ids
#[derive(Debug, Default)]
pub struct Database {
    agents: BTreeMap<MacAddress, Agent>,
    radios: BTreeMap<MacAddress, Radio>,
    bsses: BTreeMap<MacAddress, Bss>,
    stations: HashMap<MacAddress, Station>,
    gateway: Option<MacAddress>,
    global_restricted_channels: Vec<u8>,
    pub steering_stats: SteeringStats,
    pub persistent: PersistentStore,
    pub channel_selection_task: Option<TaskId>,
    pub health_check_task: Option<TaskId>,
    pub service_prioritization_task: Option<TaskId>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------------

    /// Fetch or create an agent
    pub fn add_agent(&mut self, al_mac: MacAddress, now: Timestamp) -> &mut Agent {
        self.agents.entry(al_mac).or_insert_with(|| {
            info!(al_mac = %al_mac, "new agent");
            Agent::new(al_mac, now)
        })
    }

    pub fn agent(&self, al_mac: &MacAddress) -> Option<&Agent> {
        self.agents.get(al_mac)
    }

    pub fn agent_mut(&mut self, al_mac: &MacAddress) -> Option<&mut Agent> {
        self.agents.get_mut(al_mac)
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn set_gateway(&mut self, al_mac: MacAddress) {
        if let Some(agent) = self.agents.get_mut(&al_mac) {
            agent.is_gateway = true;
            agent.parent = None;
        }
        self.gateway = Some(al_mac);
    }

    pub fn gateway(&self) -> Option<MacAddress> {
        self.gateway
    }

    /// Agent whose uplink is the station `sta_mac`
    pub fn agent_by_backhaul_sta(&self, sta_mac: &MacAddress) -> Option<&Agent> {
        self.agents
            .values()
            .find(|agent| agent.backhaul_sta == Some(*sta_mac))
    }

    // ------------------------------------------------------------------------
    // Radios
    // ------------------------------------------------------------------------

    /// Fetch or create a radio under `agent`; a radio that moved is re-parented
    pub fn add_radio(&mut self, agent: MacAddress, ruid: MacAddress) -> &mut Radio {
        let previous_owner = self.radios.get(&ruid).map(|radio| radio.agent);
        if let Some(owner) = previous_owner.filter(|owner| *owner != agent) {
            if let Some(old) = self.agents.get_mut(&owner) {
                old.radios.remove(&ruid);
            }
        }
        if let Some(owner) = self.agents.get_mut(&agent) {
            owner.radios.insert(ruid);
        }
        let radio = self.radios.entry(ruid).or_insert_with(|| {
            info!(ruid = %ruid, agent = %agent, "new radio");
            Radio::new(ruid, agent)
        });
        radio.agent = agent;
        radio
    }

    pub fn has_radio(&self, ruid: &MacAddress) -> bool {
        self.radios.contains_key(ruid)
    }

    pub fn radio(&self, ruid: &MacAddress) -> Option<&Radio> {
        self.radios.get(ruid)
    }

    pub fn radio_mut(&mut self, ruid: &MacAddress) -> Option<&mut Radio> {
        self.radios.get_mut(ruid)
    }

    pub fn radios(&self) -> impl Iterator<Item = &Radio> {
        self.radios.values()
    }

    pub fn radios_of_agent(&self, al_mac: &MacAddress) -> Vec<&Radio> {
        self.radios
            .values()
            .filter(|radio| radio.agent == *al_mac)
            .collect()
    }

    /// 5 GHz sub-band of the gateway's first active 5 GHz radio
    pub fn gateway_5g_subband(&self) -> Option<Subband> {
        let gateway = self.gateway?;
        self.radios
            .values()
            .find(|radio| radio.agent == gateway && radio.active && radio.band == FreqBand::Band5G)
            .map(|radio| which_subband(radio.channel.channel))
    }

    /// Restricted channels of a radio: the global list wins when configured
    pub fn restricted_channels(&self, ruid: &MacAddress) -> Vec<u8> {
        if !self.global_restricted_channels.is_empty() {
            return self.global_restricted_channels.clone();
        }
        self.radios
            .get(ruid)
            .map(|radio| radio.restricted_channels.clone())
            .unwrap_or_default()
    }

    pub fn global_restricted_channels(&self) -> &[u8] {
        &self.global_restricted_channels
    }

    pub fn set_global_restricted_channels(&mut self, channels: Vec<u8>) {
        self.global_restricted_channels = channels;
    }

    // ------------------------------------------------------------------------
    // BSSes
    // ------------------------------------------------------------------------

    /// Fetch or create a BSS on `radio`
    pub fn add_bss(&mut self, radio: MacAddress, bssid: MacAddress) -> &mut Bss {
        if let Some(owner) = self.radios.get_mut(&radio) {
            owner.bsses.insert(bssid);
        }
        let bss = self
            .bsses
            .entry(bssid)
            .or_insert_with(|| Bss::new(bssid, radio));
        bss.radio = radio;
        bss
    }

    pub fn bss(&self, bssid: &MacAddress) -> Option<&Bss> {
        self.bsses.get(bssid)
    }

    pub fn bss_mut(&mut self, bssid: &MacAddress) -> Option<&mut Bss> {
        self.bsses.get_mut(bssid)
    }

    pub fn remove_bss(&mut self, bssid: &MacAddress) -> Option<Bss> {
        let bss = self.bsses.remove(bssid)?;
        if let Some(radio) = self.radios.get_mut(&bss.radio) {
            radio.bsses.remove(bssid);
        }
        Some(bss)
    }

    pub fn bsses_of_radio(&self, ruid: &MacAddress) -> Vec<&Bss> {
        self.bsses.values().filter(|bss| bss.radio == *ruid).collect()
    }

    pub fn radio_of_bss(&self, bssid: &MacAddress) -> Option<&Radio> {
        self.bsses
            .get(bssid)
            .and_then(|bss| self.radios.get(&bss.radio))
    }

    /// AL-MAC of the agent hosting `bssid`
    pub fn agent_of_bss(&self, bssid: &MacAddress) -> Option<MacAddress> {
        self.radio_of_bss(bssid).map(|radio| radio.agent)
    }

    /// Enabled BSSes sharing the SSID of `bssid`, itself excluded
    pub fn same_ssid_bsses(&self, bssid: &MacAddress) -> Vec<MacAddress> {
        let Some(ssid) = self.bsses.get(bssid).map(|bss| bss.ssid.clone()) else {
            return Vec::new();
        };
        self.bsses
            .values()
            .filter(|bss| bss.bssid != *bssid && bss.enabled && bss.ssid == ssid)
            .map(|bss| bss.bssid)
            .collect()
    }

    // ------------------------------------------------------------------------
    // Stations
    // ------------------------------------------------------------------------

    pub fn add_station(&mut self, mac: MacAddress, now: Timestamp) -> &mut Station {
        self.stations
            .entry(mac)
            .or_insert_with(|| Station::new(mac, now))
    }

    pub fn station(&self, mac: &MacAddress) -> Option<&Station> {
        self.stations.get(mac)
    }

    pub fn station_mut(&mut self, mac: &MacAddress) -> Option<&mut Station> {
        self.stations.get_mut(mac)
    }

    pub fn stations(&self) -> impl Iterator<Item = &Station> {
        self.stations.values()
    }

    pub fn remove_station(&mut self, mac: &MacAddress) -> Option<Station> {
        self.stations.remove(mac)
    }

    /// Record a wireless association
    pub fn associate_station(&mut self, mac: MacAddress, bssid: MacAddress, now: Timestamp) {
        let station = self.add_station(mac, now);
        station.parent_bssid = Some(bssid);
        station.parent_agent = None;
        station.is_wireless = true;
        station.state = StationState::Connected;
        station.last_seen = now;
        debug!(sta = %mac, bssid = %bssid, "station associated");
    }

    pub fn disconnect_station(&mut self, mac: &MacAddress) {
        if let Some(station) = self.stations.get_mut(mac) {
            station.state = StationState::Disconnected;
            station.parent_bssid = None;
            station.cross_rx_rssi.clear();
        }
    }

    /// Connected stations of one BSS, sorted
    pub fn stations_of_bss(&self, bssid: &MacAddress) -> Vec<MacAddress> {
        let mut macs: Vec<MacAddress> = self
            .stations
            .values()
            .filter(|sta| sta.is_connected() && sta.parent_bssid == Some(*bssid))
            .map(|sta| sta.mac)
            .collect();
        macs.sort();
        macs
    }

    /// Connected stations of every BSS on a radio, sorted
    pub fn stations_of_radio(&self, ruid: &MacAddress) -> Vec<MacAddress> {
        let bsses: BTreeSet<MacAddress> = self
            .bsses_of_radio(ruid)
            .into_iter()
            .map(|bss| bss.bssid)
            .collect();
        let mut macs: Vec<MacAddress> = self
            .stations
            .values()
            .filter(|sta| {
                sta.is_connected()
                    && sta
                        .parent_bssid
                        .map(|bssid| bsses.contains(&bssid))
                        .unwrap_or(false)
            })
            .map(|sta| sta.mac)
            .collect();
        macs.sort();
        macs
    }

    /// Agent serving a station, through its BSS or directly when wired
    pub fn agent_of_station(&self, mac: &MacAddress) -> Option<MacAddress> {
        let station = self.stations.get(mac)?;
        match station.parent_bssid {
            Some(bssid) => self.agent_of_bss(&bssid),
            None => station.parent_agent,
        }
    }

    pub fn station_task(&self, mac: &MacAddress, kind: StationTaskKind) -> Option<TaskId> {
        self.stations.get(mac).and_then(|sta| sta.tasks.get(kind))
    }

    pub fn set_station_task(&mut self, mac: &MacAddress, kind: StationTaskKind, id: Option<TaskId>) {
        if let Some(station) = self.stations.get_mut(mac) {
            station.tasks.set(kind, id);
        }
    }

    // ------------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------------

    /// Forget every reference to a task that ended
    pub fn clear_task_references(&mut self, id: TaskId) {
        for station in self.stations.values_mut() {
            if station.tasks.release(id) {
                debug!(sta = %station.mac, task = %id, "released task reference");
            }
        }
        for slot in [
            &mut self.channel_selection_task,
            &mut self.health_check_task,
            &mut self.service_prioritization_task,
        ] {
            if *slot == Some(id) {
                *slot = None;
            }
        }
    }

    /// Refresh the last-contact time of whatever entity `mac` names
    pub fn update_last_seen(&mut self, mac: &MacAddress, now: Timestamp) {
        if let Some(agent) = self.agents.get_mut(mac) {
            agent.last_seen = now;
        } else if let Some(station) = self.stations.get_mut(mac) {
            station.last_seen = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, 0, last])
    }

    fn populated() -> Database {
        let now = Timestamp::new(0);
        let mut db = Database::new();
        db.add_agent(mac(1), now);
        db.add_radio(mac(1), mac(10)).band = FreqBand::Band24G;
        db.add_radio(mac(1), mac(11)).band = FreqBand::Band5G;
        db.add_bss(mac(10), mac(20)).ssid = "home".to_string();
        db.add_bss(mac(11), mac(21)).ssid = "home".to_string();
        db.add_bss(mac(11), mac(22)).ssid = "guest".to_string();
        db
    }

    #[test]
    fn test_topology_lookups() {
        let db = populated();
        assert_eq!(db.agent(&mac(1)).unwrap().radios.len(), 2);
        assert_eq!(db.agent_of_bss(&mac(21)), Some(mac(1)));
        assert_eq!(db.same_ssid_bsses(&mac(20)), vec![mac(21)]);
        assert_eq!(db.bsses_of_radio(&mac(11)).len(), 2);
    }

    #[test]
    fn test_station_association() {
        let mut db = populated();
        db.associate_station(mac(30), mac(21), Timestamp::new(5));
        assert_eq!(db.stations_of_bss(&mac(21)), vec![mac(30)]);
        assert_eq!(db.stations_of_radio(&mac(11)), vec![mac(30)]);
        assert_eq!(db.agent_of_station(&mac(30)), Some(mac(1)));

        db.disconnect_station(&mac(30));
        assert!(db.stations_of_bss(&mac(21)).is_empty());
    }

    #[test]
    fn test_clear_task_references() {
        let mut db = populated();
        db.add_station(mac(30), Timestamp::new(0));
        db.set_station_task(&mac(30), StationTaskKind::Steering, Some(TaskId::new(7)));
        db.channel_selection_task = Some(TaskId::new(7));

        db.clear_task_references(TaskId::new(7));

        assert_eq!(db.station_task(&mac(30), StationTaskKind::Steering), None);
        assert_eq!(db.channel_selection_task, None);
    }

    #[test]
    fn test_global_restricted_channels_override() {
        let mut db = populated();
        db.radio_mut(&mac(11)).unwrap().restricted_channels = vec![52];
        assert_eq!(db.restricted_channels(&mac(11)), vec![52]);

        db.set_global_restricted_channels(vec![100, 104]);
        assert_eq!(db.restricted_channels(&mac(11)), vec![100, 104]);
    }

    #[test]
    fn test_steering_stats() {
        let mut stats = SteeringStats::default();
        stats.record_attempt(true);
        stats.record_outcome(true, false);
        stats.record_outcome(false, true);
        stats.record_band_transition(FreqBand::Band24G, FreqBand::Band5G);

        assert_eq!(stats.btm_attempts, 1);
        assert_eq!(stats.btm_failures, 1);
        assert_eq!(stats.blacklist_successes, 1);
        assert_eq!(stats.band_2g_to_5g, 1);
    }
}
