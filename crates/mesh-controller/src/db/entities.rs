//! Agents, radios, BSSes and stations

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use mesh_core::channel::WifiChannel;
use mesh_core::protocol::tlv::OperatingClassInfo;
use mesh_core::protocol::vendor::{HostapParams, SupportedChannel};
use mesh_core::{Bandwidth, FreqBand, MacAddress, Timestamp};

use crate::tasks::TaskId;

// ----------------------------------------------------------------------------
// Agent
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Seen in an autoconfiguration search, not joined yet
    Connecting,
    Connected,
    Disconnected,
}

/// A Multi-AP device, keyed by AL-MAC
#[derive(Debug, Clone)]
pub struct Agent {
    pub al_mac: MacAddress,
    /// EasyMesh profile, zero when the agent did not advertise one
    pub profile: u8,
    /// Same-vendor peer that speaks the CONTROL sub-protocol
    pub is_prplmesh: bool,
    pub is_gateway: bool,
    pub state: AgentState,
    /// Parent agent in the backhaul tree; `None` for the gateway
    pub parent: Option<MacAddress>,
    /// Station representing this agent's uplink in its parent
    pub backhaul_sta: Option<MacAddress>,
    pub wired_backhaul: bool,
    /// Ethernet switch placeholder hanging off the gateway
    pub eth_switch_mac: Option<MacAddress>,
    pub ipv4: Option<Ipv4Addr>,
    pub version: String,
    pub manufacturer: String,
    pub radios: BTreeSet<MacAddress>,
    pub last_seen: Timestamp,
}

impl Agent {
    pub fn new(al_mac: MacAddress, now: Timestamp) -> Self {
        Self {
            al_mac,
            profile: 0,
            is_prplmesh: false,
            is_gateway: false,
            state: AgentState::Connecting,
            parent: None,
            backhaul_sta: None,
            wired_backhaul: false,
            eth_switch_mac: None,
            ipv4: None,
            version: String::new(),
            manufacturer: String::new(),
            radios: BTreeSet::new(),
            last_seen: now,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == AgentState::Connected
    }
}

// ----------------------------------------------------------------------------
// Radio
// ----------------------------------------------------------------------------

/// A radio, keyed by RUID
#[derive(Debug, Clone)]
pub struct Radio {
    pub ruid: MacAddress,
    pub agent: MacAddress,
    pub band: FreqBand,
    pub max_bandwidth: Bandwidth,
    pub channel: WifiChannel,
    pub operating_class: u8,
    pub tx_power: i8,
    pub supported_channels: Vec<SupportedChannel>,
    pub operating_classes: Vec<OperatingClassInfo>,
    pub max_bss: u8,
    pub bsses: BTreeSet<MacAddress>,
    pub active: bool,
    /// Channel is picked by the agent's ACS rather than configured
    pub acs_enabled: bool,
    pub cac_completed: bool,
    pub is_backhaul_manager: bool,
    pub restricted_channels: Vec<u8>,
    pub hostap: HostapParams,
    pub backhaul_sta_mac: Option<MacAddress>,
    pub utilization: u8,
}

impl Radio {
    pub fn new(ruid: MacAddress, agent: MacAddress) -> Self {
        Self {
            ruid,
            agent,
            band: FreqBand::Unknown,
            max_bandwidth: Bandwidth::Bw20,
            channel: WifiChannel::default(),
            operating_class: 0,
            tx_power: 0,
            supported_channels: Vec::new(),
            operating_classes: Vec::new(),
            max_bss: 1,
            bsses: BTreeSet::new(),
            active: false,
            acs_enabled: false,
            cac_completed: false,
            is_backhaul_manager: false,
            restricted_channels: Vec::new(),
            hostap: HostapParams::default(),
            backhaul_sta_mac: None,
            utilization: 0,
        }
    }

    /// Set the radar flag on every supported entry of the given 20 MHz channels
    pub fn set_radar_affected(&mut self, channels: &[u8], affected: bool) {
        for entry in self
            .supported_channels
            .iter_mut()
            .filter(|entry| channels.contains(&entry.channel))
        {
            entry.radar_affected = affected;
        }
    }

    /// Replace the supported channel list, keeping radar marks the agent does not know of
    pub fn update_supported_channels(&mut self, channels: &[SupportedChannel]) {
        let radar: Vec<u8> = self
            .supported_channels
            .iter()
            .filter(|entry| entry.radar_affected)
            .map(|entry| entry.channel)
            .collect();
        self.supported_channels = channels.to_vec();
        self.set_radar_affected(&radar, true);
    }

    pub fn is_radar_affected(&self, channel: u8) -> bool {
        self.supported_channels
            .iter()
            .any(|entry| entry.channel == channel && entry.radar_affected)
    }
}

// ----------------------------------------------------------------------------
// BSS
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Bss {
    pub bssid: MacAddress,
    pub radio: MacAddress,
    pub vap_id: u8,
    pub ssid: String,
    pub fronthaul: bool,
    pub backhaul: bool,
    pub enabled: bool,
    pub utilization: u8,
    pub associated_sta_count: u16,
}

impl Bss {
    pub fn new(bssid: MacAddress, radio: MacAddress) -> Self {
        Self {
            bssid,
            radio,
            vap_id: 0,
            ssid: String::new(),
            fronthaul: true,
            backhaul: false,
            enabled: true,
            utilization: 0,
            associated_sta_count: 0,
        }
    }
}

// ----------------------------------------------------------------------------
// Station
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationState {
    Connecting,
    Connected,
    Disconnected,
}

/// Workflow kinds limited to one live task per station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StationTaskKind {
    Steering,
    BtmRequest,
    AssociationHandling,
    ClientLocating,
}

/// Back-references to the tasks currently working on a station
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StationTasks {
    pub steering: Option<TaskId>,
    pub btm_request: Option<TaskId>,
    pub association_handling: Option<TaskId>,
    pub client_locating: Option<TaskId>,
}

impl StationTasks {
    pub fn get(&self, kind: StationTaskKind) -> Option<TaskId> {
        match kind {
            StationTaskKind::Steering => self.steering,
            StationTaskKind::BtmRequest => self.btm_request,
            StationTaskKind::AssociationHandling => self.association_handling,
            StationTaskKind::ClientLocating => self.client_locating,
        }
    }

    pub fn set(&mut self, kind: StationTaskKind, id: Option<TaskId>) {
        let slot = match kind {
            StationTaskKind::Steering => &mut self.steering,
            StationTaskKind::BtmRequest => &mut self.btm_request,
            StationTaskKind::AssociationHandling => &mut self.association_handling,
            StationTaskKind::ClientLocating => &mut self.client_locating,
        };
        *slot = id;
    }

    /// Drop every reference to `id`; returns true when one was held
    pub fn release(&mut self, id: TaskId) -> bool {
        let mut released = false;
        for slot in [
            &mut self.steering,
            &mut self.btm_request,
            &mut self.association_handling,
            &mut self.client_locating,
        ] {
            if *slot == Some(id) {
                *slot = None;
                released = true;
            }
        }
        released
    }
}

/// Uplink measurements from the last link metrics report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkMetrics {
    pub downlink_rate_mbps: u32,
    pub uplink_rate_mbps: u32,
    pub uplink_rcpi: u8,
}

/// A client or a repeater's backhaul station
#[derive(Debug, Clone)]
pub struct Station {
    pub mac: MacAddress,
    pub state: StationState,
    pub parent_bssid: Option<MacAddress>,
    /// Owning agent of a wired station
    pub parent_agent: Option<MacAddress>,
    pub ipv4: Option<Ipv4Addr>,
    pub name: String,
    pub is_wireless: bool,
    pub is_backhaul: bool,
    /// Answered a BSS transition management request at least once
    pub btm_supported: bool,
    pub beacon_measurement_supported: bool,
    /// A steering workflow is moving this station
    pub handoff: bool,
    pub tasks: StationTasks,
    /// RSSI heard by other radios, keyed by radio
    pub cross_rx_rssi: BTreeMap<MacAddress, i8>,
    pub link_metrics: LinkMetrics,
    pub last_seen: Timestamp,
}

impl Station {
    pub fn new(mac: MacAddress, now: Timestamp) -> Self {
        Self {
            mac,
            state: StationState::Connecting,
            parent_bssid: None,
            parent_agent: None,
            ipv4: None,
            name: String::new(),
            is_wireless: true,
            is_backhaul: false,
            btm_supported: false,
            beacon_measurement_supported: true,
            handoff: false,
            tasks: StationTasks::default(),
            cross_rx_rssi: BTreeMap::new(),
            link_metrics: LinkMetrics::default(),
            last_seen: now,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == StationState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_tasks_release() {
        let mut tasks = StationTasks::default();
        tasks.set(StationTaskKind::Steering, Some(TaskId::new(3)));
        tasks.set(StationTaskKind::BtmRequest, Some(TaskId::new(4)));

        assert!(tasks.release(TaskId::new(3)));
        assert_eq!(tasks.get(StationTaskKind::Steering), None);
        assert_eq!(tasks.get(StationTaskKind::BtmRequest), Some(TaskId::new(4)));
        assert!(!tasks.release(TaskId::new(3)));
    }

    #[test]
    fn test_supported_channel_update_keeps_radar_marks() {
        let channel = |channel, radar_affected| SupportedChannel {
            channel,
            bandwidth: Bandwidth::Bw20,
            tx_power: 20,
            is_dfs: true,
            radar_affected,
        };
        let mut radio = Radio::new(MacAddress::new([2, 0, 0, 0, 0, 1]), MacAddress::ZERO);
        radio.supported_channels = vec![channel(100, true), channel(104, false)];

        radio.update_supported_channels(&[channel(100, false), channel(104, false), channel(108, false)]);

        assert!(radio.is_radar_affected(100));
        assert!(!radio.is_radar_affected(104));
        assert_eq!(radio.supported_channels.len(), 3);
    }
}
