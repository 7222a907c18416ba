//! Vendor-specific envelope
//!
//! Same-vendor agents and the northbound clients talk to the controller through a
//! Vendor-Specific TLV (OUI 00:17:35) inside a VENDOR_SPECIFIC CMDU. After the OUI comes
//! an 11-byte header
//!
//! ```text
//! [action u8][action_op u8][direction u8][id u16 BE][radio_mac 6]
//! ```
//!
//! and the body of the message selected by `(action, action_op)`. `action` picks one
//! of three sub-protocols: CONTROL (agent operations), CLI and BML (northbound). The
//! `id` is the task id a response must be routed back to, zero when unsolicited.

use std::net::Ipv4Addr;

use crate::config::MonitorThresholds;
use crate::errors::{MeshError, Result, TlvError, VendorMessageError};
use crate::protocol::cmdu::{Cmdu, MessageType};
use crate::protocol::tlv::{TlvType, VendorSpecificTlv};
use crate::protocol::wire::{WireReader, WireWriter};
use crate::types::{Bandwidth, FreqBand, MacAddress};

/// OUI carried by every same-vendor envelope
pub const INTEL_OUI: [u8; 3] = [0x00, 0x17, 0x35];

/// Length of the header following the OUI
pub const VENDOR_HEADER_LEN: usize = 11;

/// Header direction values
pub mod direction {
    pub const TO_AGENT: u8 = 0;
    pub const TO_CONTROLLER: u8 = 1;
}

/// Error codes of the slave joined response
pub mod join_response {
    pub const OK: u8 = 0;
    pub const REJECT: u8 = 1;
}

/// CSA switch reasons
pub mod switch_reason {
    pub const NONE: u8 = 0;
    pub const RADAR: u8 = 1;
}

/// CONTROL opcodes of the responses tasks correlate on
pub mod control_op {
    pub const START_MONITORING_RESPONSE: u8 = 16;
    pub const BEACON_11K_RESPONSE: u8 = 18;
    pub const RX_RSSI_MEASUREMENT_RESPONSE: u8 = 20;
    pub const ARP_QUERY_RESPONSE: u8 = 22;
}

/// Client disconnect kinds
pub mod disconnect_type {
    pub const DISASSOC: u8 = 0;
    pub const DEAUTH: u8 = 1;
}

/// Sub-protocol multiplexed on the header `action` field
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Control = 1,
    Cli = 2,
    Bml = 3,
}

impl Action {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Action::Control),
            2 => Some(Action::Cli),
            3 => Some(Action::Bml),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Body Codec
// ----------------------------------------------------------------------------

trait WireBody: Sized {
    fn write(&self, writer: &mut WireWriter);
    fn read(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError>;
}

fn read_bandwidth(reader: &mut WireReader<'_>) -> core::result::Result<Bandwidth, TlvError> {
    let code = reader.read_u8()?;
    Bandwidth::from_code(code).ok_or_else(|| TlvError::Malformed {
        tlv_type: TlvType::VendorSpecific as u8,
        reason: format!("unknown bandwidth code {code}"),
    })
}

fn write_list<T: WireBody>(writer: &mut WireWriter, items: &[T]) {
    writer.put_u8(items.len().min(u8::MAX as usize) as u8);
    for item in items.iter().take(u8::MAX as usize) {
        item.write(writer);
    }
}

fn read_list<T: WireBody>(reader: &mut WireReader<'_>) -> core::result::Result<Vec<T>, TlvError> {
    let count = reader.read_u8()? as usize;
    (0..count).map(|_| T::read(reader)).collect()
}

// ----------------------------------------------------------------------------
// Shared Payload Structures
// ----------------------------------------------------------------------------

/// Channel parameters of a switch request or a CSA/ACS notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelSwitchParams {
    pub channel: u8,
    pub bandwidth: Bandwidth,
    pub vht_center_frequency: u16,
    /// 1 above, -1 below, 0 none
    pub channel_ext_above_primary: i8,
    pub switch_reason: u8,
    pub is_dfs_channel: bool,
    pub tx_power: i8,
}

impl WireBody for ChannelSwitchParams {
    fn write(&self, writer: &mut WireWriter) {
        writer
            .put_u8(self.channel)
            .put_u8(self.bandwidth.code())
            .put_u16(self.vht_center_frequency)
            .put_i8(self.channel_ext_above_primary)
            .put_u8(self.switch_reason)
            .put_bool(self.is_dfs_channel)
            .put_i8(self.tx_power);
    }

    fn read(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self {
            channel: reader.read_u8()?,
            bandwidth: read_bandwidth(reader)?,
            vht_center_frequency: reader.read_u16()?,
            channel_ext_above_primary: reader.read_i8()?,
            switch_reason: reader.read_u8()?,
            is_dfs_channel: reader.read_bool()?,
            tx_power: reader.read_i8()?,
        })
    }
}

/// One entry of a radio's supported channel list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedChannel {
    pub channel: u8,
    pub bandwidth: Bandwidth,
    pub tx_power: i8,
    pub is_dfs: bool,
    pub radar_affected: bool,
}

impl WireBody for SupportedChannel {
    fn write(&self, writer: &mut WireWriter) {
        writer
            .put_u8(self.channel)
            .put_u8(self.bandwidth.code())
            .put_i8(self.tx_power)
            .put_bool(self.is_dfs)
            .put_bool(self.radar_affected);
    }

    fn read(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self {
            channel: reader.read_u8()?,
            bandwidth: read_bandwidth(reader)?,
            tx_power: reader.read_i8()?,
            is_dfs: reader.read_bool()?,
            radar_affected: reader.read_bool()?,
        })
    }
}

/// A BSS hosted by the joining radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VapInfo {
    pub vap_id: u8,
    pub bssid: MacAddress,
    pub ssid: String,
    pub fronthaul: bool,
    pub backhaul: bool,
}

impl WireBody for VapInfo {
    fn write(&self, writer: &mut WireWriter) {
        writer
            .put_u8(self.vap_id)
            .put_mac(&self.bssid)
            .put_string(&self.ssid)
            .put_bool(self.fronthaul)
            .put_bool(self.backhaul);
    }

    fn read(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self {
            vap_id: reader.read_u8()?,
            bssid: reader.read_mac()?,
            ssid: reader.read_string()?,
            fronthaul: reader.read_bool()?,
            backhaul: reader.read_bool()?,
        })
    }
}

/// Interface an agent uses to reach its parent
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackhaulIfaceType {
    Wifi = 1,
    Ethernet = 2,
    /// The agent is the gateway itself
    GwBridge = 3,
}

impl BackhaulIfaceType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Wifi),
            2 => Some(Self::Ethernet),
            3 => Some(Self::GwBridge),
            _ => None,
        }
    }
}

/// Backhaul link description sent by a joining same-vendor agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackhaulParams {
    pub gw_ipv4: Ipv4Addr,
    pub gw_bridge_mac: MacAddress,
    pub bridge_mac: MacAddress,
    pub bridge_ipv4: Ipv4Addr,
    pub backhaul_mac: MacAddress,
    pub backhaul_ipv4: Ipv4Addr,
    /// Parent BSS of a wireless backhaul
    pub backhaul_bssid: MacAddress,
    pub backhaul_channel: u8,
    pub backhaul_is_wireless: bool,
    pub backhaul_iface_type: BackhaulIfaceType,
    pub is_backhaul_manager: bool,
}

impl Default for BackhaulParams {
    fn default() -> Self {
        Self {
            gw_ipv4: Ipv4Addr::UNSPECIFIED,
            gw_bridge_mac: MacAddress::ZERO,
            bridge_mac: MacAddress::ZERO,
            bridge_ipv4: Ipv4Addr::UNSPECIFIED,
            backhaul_mac: MacAddress::ZERO,
            backhaul_ipv4: Ipv4Addr::UNSPECIFIED,
            backhaul_bssid: MacAddress::ZERO,
            backhaul_channel: 0,
            backhaul_is_wireless: false,
            backhaul_iface_type: BackhaulIfaceType::Ethernet,
            is_backhaul_manager: false,
        }
    }
}

impl WireBody for BackhaulParams {
    fn write(&self, writer: &mut WireWriter) {
        writer
            .put_ipv4(&self.gw_ipv4)
            .put_mac(&self.gw_bridge_mac)
            .put_mac(&self.bridge_mac)
            .put_ipv4(&self.bridge_ipv4)
            .put_mac(&self.backhaul_mac)
            .put_ipv4(&self.backhaul_ipv4)
            .put_mac(&self.backhaul_bssid)
            .put_u8(self.backhaul_channel)
            .put_bool(self.backhaul_is_wireless)
            .put_u8(self.backhaul_iface_type as u8)
            .put_bool(self.is_backhaul_manager);
    }

    fn read(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        let gw_ipv4 = reader.read_ipv4()?;
        let gw_bridge_mac = reader.read_mac()?;
        let bridge_mac = reader.read_mac()?;
        let bridge_ipv4 = reader.read_ipv4()?;
        let backhaul_mac = reader.read_mac()?;
        let backhaul_ipv4 = reader.read_ipv4()?;
        let backhaul_bssid = reader.read_mac()?;
        let backhaul_channel = reader.read_u8()?;
        let backhaul_is_wireless = reader.read_bool()?;
        let iface = reader.read_u8()?;
        let backhaul_iface_type =
            BackhaulIfaceType::from_u8(iface).ok_or_else(|| TlvError::Malformed {
                tlv_type: TlvType::VendorSpecific as u8,
                reason: format!("unknown backhaul interface type {iface}"),
            })?;
        Ok(Self {
            gw_ipv4,
            gw_bridge_mac,
            bridge_mac,
            bridge_ipv4,
            backhaul_mac,
            backhaul_ipv4,
            backhaul_bssid,
            backhaul_channel,
            backhaul_is_wireless,
            backhaul_iface_type,
            is_backhaul_manager: reader.read_bool()?,
        })
    }
}

/// Radio (hostap) capabilities of a joining same-vendor agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostapParams {
    pub iface_name: String,
    pub ant_num: u8,
    pub ant_gain: u8,
    pub conducted_power: u8,
    pub frequency_band: FreqBand,
    pub max_bandwidth: Bandwidth,
    pub ht_supported: bool,
    pub vht_supported: bool,
    pub he_supported: bool,
    pub is_zwdfs: bool,
}

impl Default for HostapParams {
    fn default() -> Self {
        Self {
            iface_name: String::new(),
            ant_num: 2,
            ant_gain: 0,
            conducted_power: 20,
            frequency_band: FreqBand::Band24G,
            max_bandwidth: Bandwidth::Bw20,
            ht_supported: true,
            vht_supported: false,
            he_supported: false,
            is_zwdfs: false,
        }
    }
}

impl WireBody for HostapParams {
    fn write(&self, writer: &mut WireWriter) {
        writer
            .put_string(&self.iface_name)
            .put_u8(self.ant_num)
            .put_u8(self.ant_gain)
            .put_u8(self.conducted_power)
            .put_u8(self.frequency_band.to_ieee1905())
            .put_u8(self.max_bandwidth.code())
            .put_bool(self.ht_supported)
            .put_bool(self.vht_supported)
            .put_bool(self.he_supported)
            .put_bool(self.is_zwdfs);
    }

    fn read(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self {
            iface_name: reader.read_string()?,
            ant_num: reader.read_u8()?,
            ant_gain: reader.read_u8()?,
            conducted_power: reader.read_u8()?,
            frequency_band: FreqBand::from_ieee1905(reader.read_u8()?),
            max_bandwidth: read_bandwidth(reader)?,
            ht_supported: reader.read_bool()?,
            vht_supported: reader.read_bool()?,
            he_supported: reader.read_bool()?,
            is_zwdfs: reader.read_bool()?,
        })
    }
}

/// Same-vendor join notification
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlaveJoined {
    pub is_slave_reconf: bool,
    pub slave_version: String,
    pub local_master: bool,
    pub local_gw: bool,
    pub backhaul: BackhaulParams,
    /// Configured channel; zero when the radio runs ACS
    pub wlan_channel: u8,
    pub cs_params: ChannelSwitchParams,
    pub hostap: HostapParams,
    pub supported_channels: Vec<SupportedChannel>,
    pub vaps: Vec<VapInfo>,
}

impl WireBody for SlaveJoined {
    fn write(&self, writer: &mut WireWriter) {
        writer
            .put_bool(self.is_slave_reconf)
            .put_string(&self.slave_version)
            .put_bool(self.local_master)
            .put_bool(self.local_gw);
        self.backhaul.write(writer);
        writer.put_u8(self.wlan_channel);
        self.cs_params.write(writer);
        self.hostap.write(writer);
        write_list(writer, &self.supported_channels);
        write_list(writer, &self.vaps);
    }

    fn read(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self {
            is_slave_reconf: reader.read_bool()?,
            slave_version: reader.read_string()?,
            local_master: reader.read_bool()?,
            local_gw: reader.read_bool()?,
            backhaul: BackhaulParams::read(reader)?,
            wlan_channel: reader.read_u8()?,
            cs_params: ChannelSwitchParams::read(reader)?,
            hostap: HostapParams::read(reader)?,
            supported_channels: read_list(reader)?,
            vaps: read_list(reader)?,
        })
    }
}

impl WireBody for MonitorThresholds {
    fn write(&self, writer: &mut WireWriter) {
        writer
            .put_u8(self.total_channel_load_notification_lo_th_percent)
            .put_u8(self.total_channel_load_notification_hi_th_percent)
            .put_u8(self.total_channel_load_notification_delta_th_percent)
            .put_u8(self.min_active_clients)
            .put_u8(self.active_client_th)
            .put_u8(self.client_load_notification_delta_th_percent)
            .put_i8(self.rx_rssi_notification_threshold_dbm)
            .put_u8(self.rx_rssi_notification_delta_db)
            .put_u32(self.ap_idle_threshold_bytes)
            .put_u32(self.ap_active_threshold_bytes)
            .put_u16(self.ap_idle_stable_time_sec)
            .put_bool(self.disable_initiative_arp)
            .put_u8(self.slave_keep_alive_retries);
    }

    fn read(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self {
            total_channel_load_notification_lo_th_percent: reader.read_u8()?,
            total_channel_load_notification_hi_th_percent: reader.read_u8()?,
            total_channel_load_notification_delta_th_percent: reader.read_u8()?,
            min_active_clients: reader.read_u8()?,
            active_client_th: reader.read_u8()?,
            client_load_notification_delta_th_percent: reader.read_u8()?,
            rx_rssi_notification_threshold_dbm: reader.read_i8()?,
            rx_rssi_notification_delta_db: reader.read_u8()?,
            ap_idle_threshold_bytes: reader.read_u32()?,
            ap_active_threshold_bytes: reader.read_u32()?,
            ap_idle_stable_time_sec: reader.read_u16()?,
            disable_initiative_arp: reader.read_bool()?,
            slave_keep_alive_retries: reader.read_u8()?,
        })
    }
}

// ----------------------------------------------------------------------------
// CONTROL Sub-protocol
// ----------------------------------------------------------------------------

/// Agent and controller operational messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    SlaveHandshakeRequest,
    SlaveHandshakeResponse,
    SlaveJoinedNotification(Box<SlaveJoined>),
    SlaveJoinedResponse {
        err_code: u8,
        master_version: String,
        config: MonitorThresholds,
    },
    RestrictedFailsafeChannelRequest {
        failsafe_channel: u8,
        failsafe_bandwidth: Bandwidth,
        vht_center_frequency: u16,
        restricted_channels: Vec<u8>,
    },
    RestrictedFailsafeChannelResponse {
        success: bool,
    },
    ChannelSwitchAcsStart {
        cs_params: ChannelSwitchParams,
    },
    CsaNotification {
        cs_params: ChannelSwitchParams,
    },
    AcsNotification {
        cs_params: ChannelSwitchParams,
        supported_channels: Vec<SupportedChannel>,
    },
    CsaErrorNotification {
        cs_params: ChannelSwitchParams,
    },
    DfsCacCompleted {
        success: bool,
        frequency: u16,
        channel: u8,
        bandwidth: Bandwidth,
    },
    DfsChannelAvailable {
        frequency: u16,
        channel: u8,
        bandwidth: Bandwidth,
        vht_center_frequency: u16,
    },
    ApDisabled {
        vap_id: u8,
        bssid: MacAddress,
    },
    ApEnabled {
        vap: VapInfo,
    },
    StartMonitoringRequest {
        mac: MacAddress,
        ipv4: Ipv4Addr,
        is_ire: bool,
        bridge_4addr_mac: MacAddress,
    },
    StartMonitoringResponse {
        success: bool,
    },
    Beacon11kRequest {
        measurement_mode: u8,
        channel: u8,
        op_class: u8,
        rand_ival: u16,
        duration: u16,
        sta_mac: MacAddress,
        bssid: MacAddress,
        expected_reports_count: u8,
    },
    Beacon11kResponse {
        sta_mac: MacAddress,
        bssid: MacAddress,
        channel: u8,
        op_class: u8,
        rcpi: u8,
        rsni: u8,
        rep_mode: u8,
        duration: u16,
        dialog_token: u8,
    },
    RxRssiMeasurementRequest {
        mac: MacAddress,
        ipv4: Ipv4Addr,
        channel: u8,
        bandwidth: Bandwidth,
        cross: bool,
    },
    RxRssiMeasurementResponse {
        mac: MacAddress,
        rx_rssi: i8,
        rx_packets: u16,
    },
    ArpQueryRequest {
        mac: MacAddress,
        ipv4: Ipv4Addr,
    },
    ArpQueryResponse {
        mac: MacAddress,
        ipv4: Ipv4Addr,
        state: u8,
        source: u8,
    },
    DhcpComplete {
        mac: MacAddress,
        ipv4: Ipv4Addr,
        name: String,
    },
    ClientDisconnectRequest {
        mac: MacAddress,
        vap_id: u8,
        kind: u8,
        reason: u16,
    },
}

impl ControlMessage {
    pub fn op(&self) -> u8 {
        use ControlMessage::*;
        match self {
            SlaveHandshakeRequest => 1,
            SlaveHandshakeResponse => 2,
            SlaveJoinedNotification(_) => 3,
            SlaveJoinedResponse { .. } => 4,
            RestrictedFailsafeChannelRequest { .. } => 5,
            RestrictedFailsafeChannelResponse { .. } => 6,
            ChannelSwitchAcsStart { .. } => 7,
            CsaNotification { .. } => 8,
            AcsNotification { .. } => 9,
            CsaErrorNotification { .. } => 10,
            DfsCacCompleted { .. } => 11,
            DfsChannelAvailable { .. } => 12,
            ApDisabled { .. } => 13,
            ApEnabled { .. } => 14,
            StartMonitoringRequest { .. } => 15,
            StartMonitoringResponse { .. } => control_op::START_MONITORING_RESPONSE,
            Beacon11kRequest { .. } => 17,
            Beacon11kResponse { .. } => control_op::BEACON_11K_RESPONSE,
            RxRssiMeasurementRequest { .. } => 19,
            RxRssiMeasurementResponse { .. } => control_op::RX_RSSI_MEASUREMENT_RESPONSE,
            ArpQueryRequest { .. } => 21,
            ArpQueryResponse { .. } => control_op::ARP_QUERY_RESPONSE,
            DhcpComplete { .. } => 23,
            ClientDisconnectRequest { .. } => 24,
        }
    }

    fn write(&self, w: &mut WireWriter) {
        use ControlMessage::*;
        match self {
            SlaveHandshakeRequest | SlaveHandshakeResponse => {}
            SlaveJoinedNotification(joined) => joined.write(w),
            SlaveJoinedResponse {
                err_code,
                master_version,
                config,
            } => {
                w.put_u8(*err_code).put_string(master_version);
                config.write(w);
            }
            RestrictedFailsafeChannelRequest {
                failsafe_channel,
                failsafe_bandwidth,
                vht_center_frequency,
                restricted_channels,
            } => {
                w.put_u8(*failsafe_channel)
                    .put_u8(failsafe_bandwidth.code())
                    .put_u16(*vht_center_frequency)
                    .put_u8_list(restricted_channels);
            }
            RestrictedFailsafeChannelResponse { success }
            | StartMonitoringResponse { success } => {
                w.put_bool(*success);
            }
            ChannelSwitchAcsStart { cs_params }
            | CsaNotification { cs_params }
            | CsaErrorNotification { cs_params } => cs_params.write(w),
            AcsNotification {
                cs_params,
                supported_channels,
            } => {
                cs_params.write(w);
                write_list(w, supported_channels);
            }
            DfsCacCompleted {
                success,
                frequency,
                channel,
                bandwidth,
            } => {
                w.put_bool(*success)
                    .put_u16(*frequency)
                    .put_u8(*channel)
                    .put_u8(bandwidth.code());
            }
            DfsChannelAvailable {
                frequency,
                channel,
                bandwidth,
                vht_center_frequency,
            } => {
                w.put_u16(*frequency)
                    .put_u8(*channel)
                    .put_u8(bandwidth.code())
                    .put_u16(*vht_center_frequency);
            }
            ApDisabled { vap_id, bssid } => {
                w.put_u8(*vap_id).put_mac(bssid);
            }
            ApEnabled { vap } => vap.write(w),
            StartMonitoringRequest {
                mac,
                ipv4,
                is_ire,
                bridge_4addr_mac,
            } => {
                w.put_mac(mac)
                    .put_ipv4(ipv4)
                    .put_bool(*is_ire)
                    .put_mac(bridge_4addr_mac);
            }
            Beacon11kRequest {
                measurement_mode,
                channel,
                op_class,
                rand_ival,
                duration,
                sta_mac,
                bssid,
                expected_reports_count,
            } => {
                w.put_u8(*measurement_mode)
                    .put_u8(*channel)
                    .put_u8(*op_class)
                    .put_u16(*rand_ival)
                    .put_u16(*duration)
                    .put_mac(sta_mac)
                    .put_mac(bssid)
                    .put_u8(*expected_reports_count);
            }
            Beacon11kResponse {
                sta_mac,
                bssid,
                channel,
                op_class,
                rcpi,
                rsni,
                rep_mode,
                duration,
                dialog_token,
            } => {
                w.put_mac(sta_mac)
                    .put_mac(bssid)
                    .put_u8(*channel)
                    .put_u8(*op_class)
                    .put_u8(*rcpi)
                    .put_u8(*rsni)
                    .put_u8(*rep_mode)
                    .put_u16(*duration)
                    .put_u8(*dialog_token);
            }
            RxRssiMeasurementRequest {
                mac,
                ipv4,
                channel,
                bandwidth,
                cross,
            } => {
                w.put_mac(mac)
                    .put_ipv4(ipv4)
                    .put_u8(*channel)
                    .put_u8(bandwidth.code())
                    .put_bool(*cross);
            }
            RxRssiMeasurementResponse {
                mac,
                rx_rssi,
                rx_packets,
            } => {
                w.put_mac(mac).put_i8(*rx_rssi).put_u16(*rx_packets);
            }
            ArpQueryRequest { mac, ipv4 } => {
                w.put_mac(mac).put_ipv4(ipv4);
            }
            ArpQueryResponse {
                mac,
                ipv4,
                state,
                source,
            } => {
                w.put_mac(mac).put_ipv4(ipv4).put_u8(*state).put_u8(*source);
            }
            DhcpComplete { mac, ipv4, name } => {
                w.put_mac(mac).put_ipv4(ipv4).put_string(name);
            }
            ClientDisconnectRequest {
                mac,
                vap_id,
                kind,
                reason,
            } => {
                w.put_mac(mac).put_u8(*vap_id).put_u8(*kind).put_u16(*reason);
            }
        }
    }

    fn read(op: u8, r: &mut WireReader<'_>) -> Result<Self> {
        use ControlMessage::*;
        let message = match op {
            1 => SlaveHandshakeRequest,
            2 => SlaveHandshakeResponse,
            3 => SlaveJoinedNotification(Box::new(SlaveJoined::read(r)?)),
            4 => SlaveJoinedResponse {
                err_code: r.read_u8()?,
                master_version: r.read_string()?,
                config: MonitorThresholds::read(r)?,
            },
            5 => RestrictedFailsafeChannelRequest {
                failsafe_channel: r.read_u8()?,
                failsafe_bandwidth: read_bandwidth(r)?,
                vht_center_frequency: r.read_u16()?,
                restricted_channels: r.read_u8_list()?,
            },
            6 => RestrictedFailsafeChannelResponse {
                success: r.read_bool()?,
            },
            7 => ChannelSwitchAcsStart {
                cs_params: ChannelSwitchParams::read(r)?,
            },
            8 => CsaNotification {
                cs_params: ChannelSwitchParams::read(r)?,
            },
            9 => AcsNotification {
                cs_params: ChannelSwitchParams::read(r)?,
                supported_channels: read_list(r)?,
            },
            10 => CsaErrorNotification {
                cs_params: ChannelSwitchParams::read(r)?,
            },
            11 => DfsCacCompleted {
                success: r.read_bool()?,
                frequency: r.read_u16()?,
                channel: r.read_u8()?,
                bandwidth: read_bandwidth(r)?,
            },
            12 => DfsChannelAvailable {
                frequency: r.read_u16()?,
                channel: r.read_u8()?,
                bandwidth: read_bandwidth(r)?,
                vht_center_frequency: r.read_u16()?,
            },
            13 => ApDisabled {
                vap_id: r.read_u8()?,
                bssid: r.read_mac()?,
            },
            14 => ApEnabled {
                vap: VapInfo::read(r)?,
            },
            15 => StartMonitoringRequest {
                mac: r.read_mac()?,
                ipv4: r.read_ipv4()?,
                is_ire: r.read_bool()?,
                bridge_4addr_mac: r.read_mac()?,
            },
            16 => StartMonitoringResponse {
                success: r.read_bool()?,
            },
            17 => Beacon11kRequest {
                measurement_mode: r.read_u8()?,
                channel: r.read_u8()?,
                op_class: r.read_u8()?,
                rand_ival: r.read_u16()?,
                duration: r.read_u16()?,
                sta_mac: r.read_mac()?,
                bssid: r.read_mac()?,
                expected_reports_count: r.read_u8()?,
            },
            18 => Beacon11kResponse {
                sta_mac: r.read_mac()?,
                bssid: r.read_mac()?,
                channel: r.read_u8()?,
                op_class: r.read_u8()?,
                rcpi: r.read_u8()?,
                rsni: r.read_u8()?,
                rep_mode: r.read_u8()?,
                duration: r.read_u16()?,
                dialog_token: r.read_u8()?,
            },
            19 => RxRssiMeasurementRequest {
                mac: r.read_mac()?,
                ipv4: r.read_ipv4()?,
                channel: r.read_u8()?,
                bandwidth: read_bandwidth(r)?,
                cross: r.read_bool()?,
            },
            20 => RxRssiMeasurementResponse {
                mac: r.read_mac()?,
                rx_rssi: r.read_i8()?,
                rx_packets: r.read_u16()?,
            },
            21 => ArpQueryRequest {
                mac: r.read_mac()?,
                ipv4: r.read_ipv4()?,
            },
            22 => ArpQueryResponse {
                mac: r.read_mac()?,
                ipv4: r.read_ipv4()?,
                state: r.read_u8()?,
                source: r.read_u8()?,
            },
            23 => DhcpComplete {
                mac: r.read_mac()?,
                ipv4: r.read_ipv4()?,
                name: r.read_string()?,
            },
            24 => ClientDisconnectRequest {
                mac: r.read_mac()?,
                vap_id: r.read_u8()?,
                kind: r.read_u8()?,
                reason: r.read_u16()?,
            },
            other => {
                return Err(VendorMessageError::UnknownActionOp {
                    action: Action::Control as u8,
                    action_op: other,
                }
                .into())
            }
        };
        Ok(message)
    }
}

// ----------------------------------------------------------------------------
// CLI Sub-protocol
// ----------------------------------------------------------------------------

/// Northbound CLI requests and their single response type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliMessage {
    ClientDisconnect {
        client_mac: MacAddress,
        kind: u8,
        reason: u16,
    },
    ClientBssSteer {
        client_mac: MacAddress,
        bssid: MacAddress,
        disassoc_timer_ms: u32,
    },
    HostapChannelSwitch {
        mac: MacAddress,
        cs_params: ChannelSwitchParams,
    },
    ClientAllow {
        client_mac: MacAddress,
        hostap_mac: MacAddress,
    },
    ClientDisallow {
        client_mac: MacAddress,
        hostap_mac: MacAddress,
    },
    ResponseInt {
        is_ok: bool,
        current_value: i32,
    },
    /// Opcode this controller does not implement; still answered
    Unknown { op: u8 },
}

impl CliMessage {
    pub const RESPONSE_INT_OP: u8 = 0x80;

    pub fn op(&self) -> u8 {
        match self {
            CliMessage::ClientDisconnect { .. } => 1,
            CliMessage::ClientBssSteer { .. } => 2,
            CliMessage::HostapChannelSwitch { .. } => 3,
            CliMessage::ClientAllow { .. } => 4,
            CliMessage::ClientDisallow { .. } => 5,
            CliMessage::ResponseInt { .. } => Self::RESPONSE_INT_OP,
            CliMessage::Unknown { op } => *op,
        }
    }

    fn write(&self, w: &mut WireWriter) {
        match self {
            CliMessage::ClientDisconnect {
                client_mac,
                kind,
                reason,
            } => {
                w.put_mac(client_mac).put_u8(*kind).put_u16(*reason);
            }
            CliMessage::ClientBssSteer {
                client_mac,
                bssid,
                disassoc_timer_ms,
            } => {
                w.put_mac(client_mac).put_mac(bssid).put_u32(*disassoc_timer_ms);
            }
            CliMessage::HostapChannelSwitch { mac, cs_params } => {
                w.put_mac(mac);
                cs_params.write(w);
            }
            CliMessage::ClientAllow {
                client_mac,
                hostap_mac,
            }
            | CliMessage::ClientDisallow {
                client_mac,
                hostap_mac,
            } => {
                w.put_mac(client_mac).put_mac(hostap_mac);
            }
            CliMessage::ResponseInt {
                is_ok,
                current_value,
            } => {
                w.put_bool(*is_ok).put_i32(*current_value);
            }
            CliMessage::Unknown { .. } => {}
        }
    }

    fn read(op: u8, r: &mut WireReader<'_>) -> Result<Self> {
        let message = match op {
            1 => CliMessage::ClientDisconnect {
                client_mac: r.read_mac()?,
                kind: r.read_u8()?,
                reason: r.read_u16()?,
            },
            2 => CliMessage::ClientBssSteer {
                client_mac: r.read_mac()?,
                bssid: r.read_mac()?,
                disassoc_timer_ms: r.read_u32()?,
            },
            3 => CliMessage::HostapChannelSwitch {
                mac: r.read_mac()?,
                cs_params: ChannelSwitchParams::read(r)?,
            },
            4 => CliMessage::ClientAllow {
                client_mac: r.read_mac()?,
                hostap_mac: r.read_mac()?,
            },
            5 => CliMessage::ClientDisallow {
                client_mac: r.read_mac()?,
                hostap_mac: r.read_mac()?,
            },
            Self::RESPONSE_INT_OP => CliMessage::ResponseInt {
                is_ok: r.read_bool()?,
                current_value: r.read_i32()?,
            },
            other => CliMessage::Unknown { op: other },
        };
        Ok(message)
    }
}

// ----------------------------------------------------------------------------
// BML Sub-protocol
// ----------------------------------------------------------------------------

/// Runtime feature toggles exposed through BML
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    ClientRoaming = 0,
    ClientBandSteering = 1,
    IreRoaming = 2,
    LoadBalancer = 3,
    DfsReentry = 4,
    CertificationMode = 5,
}

impl Feature {
    const FIRST_OP: u8 = 0x10;
    const COUNT: u8 = 6;

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Feature::ClientRoaming),
            1 => Some(Feature::ClientBandSteering),
            2 => Some(Feature::IreRoaming),
            3 => Some(Feature::LoadBalancer),
            4 => Some(Feature::DfsReentry),
            5 => Some(Feature::CertificationMode),
            _ => None,
        }
    }

    /// Opcode of the `slot`-th message of this feature: set req, set resp, get req, get resp
    fn op(self, slot: u8) -> u8 {
        Self::FIRST_OP + (self as u8) * 4 + slot
    }
}

/// BML result codes
pub mod bml_code {
    pub const SUCCESS: u8 = 0;
    pub const FAILURE: u8 = 1;
    pub const NOT_SUPPORTED: u8 = 2;
    pub const INVALID_ARGUMENT: u8 = 3;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BmlMessage {
    Ping,
    PingResponse,
    SetFeature { feature: Feature, enable: bool },
    SetFeatureResponse { feature: Feature, code: u8 },
    GetFeature { feature: Feature },
    GetFeatureResponse { feature: Feature, enabled: bool },
    SetRestrictedChannels { channels: Vec<u8> },
    SetRestrictedChannelsResponse { code: u8 },
    GetRestrictedChannels,
    GetRestrictedChannelsResponse { channels: Vec<u8> },
    TriggerChannelSelection,
    TriggerChannelSelectionResponse { code: u8 },
    /// Explicit negative answer to a request
    Error { failed_op: u8, code: u8 },
    Unknown { op: u8 },
}

impl BmlMessage {
    pub fn op(&self) -> u8 {
        match self {
            BmlMessage::Ping => 0x01,
            BmlMessage::PingResponse => 0x02,
            BmlMessage::SetFeature { feature, .. } => feature.op(0),
            BmlMessage::SetFeatureResponse { feature, .. } => feature.op(1),
            BmlMessage::GetFeature { feature } => feature.op(2),
            BmlMessage::GetFeatureResponse { feature, .. } => feature.op(3),
            BmlMessage::SetRestrictedChannels { .. } => 0x40,
            BmlMessage::SetRestrictedChannelsResponse { .. } => 0x41,
            BmlMessage::GetRestrictedChannels => 0x42,
            BmlMessage::GetRestrictedChannelsResponse { .. } => 0x43,
            BmlMessage::TriggerChannelSelection => 0x44,
            BmlMessage::TriggerChannelSelectionResponse { .. } => 0x45,
            BmlMessage::Error { .. } => 0x7f,
            BmlMessage::Unknown { op } => *op,
        }
    }

    fn write(&self, w: &mut WireWriter) {
        match self {
            BmlMessage::Ping
            | BmlMessage::PingResponse
            | BmlMessage::GetFeature { .. }
            | BmlMessage::GetRestrictedChannels
            | BmlMessage::TriggerChannelSelection
            | BmlMessage::Unknown { .. } => {}
            BmlMessage::SetFeature { enable, .. } => {
                w.put_bool(*enable);
            }
            BmlMessage::GetFeatureResponse { enabled, .. } => {
                w.put_bool(*enabled);
            }
            BmlMessage::SetFeatureResponse { code, .. }
            | BmlMessage::SetRestrictedChannelsResponse { code }
            | BmlMessage::TriggerChannelSelectionResponse { code } => {
                w.put_u8(*code);
            }
            BmlMessage::SetRestrictedChannels { channels }
            | BmlMessage::GetRestrictedChannelsResponse { channels } => {
                w.put_u8_list(channels);
            }
            BmlMessage::Error { failed_op, code } => {
                w.put_u8(*failed_op).put_u8(*code);
            }
        }
    }

    fn read(op: u8, r: &mut WireReader<'_>) -> Result<Self> {
        let feature_range = Feature::FIRST_OP..Feature::FIRST_OP + Feature::COUNT * 4;
        if feature_range.contains(&op) {
            let index = (op - Feature::FIRST_OP) / 4;
            let feature = Feature::from_u8(index).ok_or(VendorMessageError::UnknownActionOp {
                action: Action::Bml as u8,
                action_op: op,
            })?;
            let message = match (op - Feature::FIRST_OP) % 4 {
                0 => BmlMessage::SetFeature {
                    feature,
                    enable: r.read_bool()?,
                },
                1 => BmlMessage::SetFeatureResponse {
                    feature,
                    code: r.read_u8()?,
                },
                2 => BmlMessage::GetFeature { feature },
                _ => BmlMessage::GetFeatureResponse {
                    feature,
                    enabled: r.read_bool()?,
                },
            };
            return Ok(message);
        }

        let message = match op {
            0x01 => BmlMessage::Ping,
            0x02 => BmlMessage::PingResponse,
            0x40 => BmlMessage::SetRestrictedChannels {
                channels: r.read_u8_list()?,
            },
            0x41 => BmlMessage::SetRestrictedChannelsResponse { code: r.read_u8()? },
            0x42 => BmlMessage::GetRestrictedChannels,
            0x43 => BmlMessage::GetRestrictedChannelsResponse {
                channels: r.read_u8_list()?,
            },
            0x44 => BmlMessage::TriggerChannelSelection,
            0x45 => BmlMessage::TriggerChannelSelectionResponse { code: r.read_u8()? },
            0x7f => BmlMessage::Error {
                failed_op: r.read_u8()?,
                code: r.read_u8()?,
            },
            other => BmlMessage::Unknown { op: other },
        };
        Ok(message)
    }
}

// ----------------------------------------------------------------------------
// Envelope
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VendorBody {
    Control(ControlMessage),
    Cli(CliMessage),
    Bml(BmlMessage),
}

impl VendorBody {
    pub fn action(&self) -> Action {
        match self {
            VendorBody::Control(_) => Action::Control,
            VendorBody::Cli(_) => Action::Cli,
            VendorBody::Bml(_) => Action::Bml,
        }
    }

    pub fn action_op(&self) -> u8 {
        match self {
            VendorBody::Control(message) => message.op(),
            VendorBody::Cli(message) => message.op(),
            VendorBody::Bml(message) => message.op(),
        }
    }
}

/// A decoded vendor-specific message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorMessage {
    /// Task id the message answers, zero when unsolicited
    pub id: u16,
    pub direction: u8,
    pub radio_mac: MacAddress,
    pub body: VendorBody,
}

impl VendorMessage {
    pub fn new(body: VendorBody) -> Self {
        Self {
            id: 0,
            direction: direction::TO_AGENT,
            radio_mac: MacAddress::ZERO,
            body,
        }
    }

    pub fn control(message: ControlMessage) -> Self {
        Self::new(VendorBody::Control(message))
    }

    pub fn with_id(mut self, id: u16) -> Self {
        self.id = id;
        self
    }

    pub fn with_radio(mut self, radio_mac: MacAddress) -> Self {
        self.radio_mac = radio_mac;
        self
    }

    pub fn with_direction(mut self, direction: u8) -> Self {
        self.direction = direction;
        self
    }

    pub fn action(&self) -> Action {
        self.body.action()
    }

    pub fn action_op(&self) -> u8 {
        self.body.action_op()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = WireWriter::new();
        writer
            .put_u8(self.action() as u8)
            .put_u8(self.action_op())
            .put_u8(self.direction)
            .put_u16(self.id)
            .put_mac(&self.radio_mac);
        match &self.body {
            VendorBody::Control(message) => message.write(&mut writer),
            VendorBody::Cli(message) => message.write(&mut writer),
            VendorBody::Bml(message) => message.write(&mut writer),
        }
        writer.into_bytes()
    }

    /// Decode the bytes following the OUI
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < VENDOR_HEADER_LEN {
            return Err(VendorMessageError::Truncated {
                expected: VENDOR_HEADER_LEN,
                actual: payload.len(),
            }
            .into());
        }
        let mut reader = WireReader::new(payload);
        let action_raw = reader.read_u8()?;
        let action_op = reader.read_u8()?;
        let direction = reader.read_u8()?;
        let id = reader.read_u16()?;
        let radio_mac = reader.read_mac()?;

        let action = Action::from_u8(action_raw)
            .ok_or(VendorMessageError::UnknownAction { action: action_raw })?;
        let body = match action {
            Action::Control => VendorBody::Control(ControlMessage::read(action_op, &mut reader)?),
            Action::Cli => VendorBody::Cli(CliMessage::read(action_op, &mut reader)?),
            Action::Bml => VendorBody::Bml(BmlMessage::read(action_op, &mut reader)?),
        };
        Ok(Self {
            id,
            direction,
            radio_mac,
            body,
        })
    }

    pub fn to_tlv(&self) -> VendorSpecificTlv {
        VendorSpecificTlv {
            oui: INTEL_OUI,
            payload: self.encode(),
        }
    }

    pub fn from_tlv(tlv: &VendorSpecificTlv) -> Result<Self> {
        if tlv.oui != INTEL_OUI {
            return Err(VendorMessageError::ForeignOui {
                oui: hex::encode(tlv.oui),
            }
            .into());
        }
        Self::decode(&tlv.payload)
    }

    /// Wrap into a standalone VENDOR_SPECIFIC CMDU
    pub fn to_cmdu(&self, message_id: u16) -> Cmdu {
        Cmdu::new(MessageType::VendorSpecific, message_id).with(&self.to_tlv())
    }

    /// First same-vendor message carried by `cmdu`, if any
    pub fn from_cmdu(cmdu: &Cmdu) -> Result<Option<Self>> {
        cmdu.get_all::<VendorSpecificTlv>()?
            .iter()
            .find(|tlv| tlv.oui == INTEL_OUI)
            .map(Self::from_tlv)
            .transpose()
    }
}

impl From<ControlMessage> for VendorBody {
    fn from(message: ControlMessage) -> Self {
        VendorBody::Control(message)
    }
}

impl From<CliMessage> for VendorBody {
    fn from(message: CliMessage) -> Self {
        VendorBody::Cli(message)
    }
}

impl From<BmlMessage> for VendorBody {
    fn from(message: BmlMessage) -> Self {
        VendorBody::Bml(message)
    }
}

/// Returns true when `err` only says the envelope belongs to another vendor
pub fn is_foreign(err: &MeshError) -> bool {
    matches!(err, MeshError::Vendor(VendorMessageError::ForeignOui { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radio() -> MacAddress {
        MacAddress::new([0x02, 0x10, 0x20, 0x30, 0x40, 0x50])
    }

    #[test]
    fn test_header_layout() {
        let message = VendorMessage::control(ControlMessage::SlaveHandshakeRequest)
            .with_id(0x0102)
            .with_radio(radio());
        let bytes = message.encode();
        assert_eq!(bytes.len(), VENDOR_HEADER_LEN);
        assert_eq!(&bytes[..5], &[1, 1, 0, 0x01, 0x02]);
        assert_eq!(&bytes[5..], radio().as_bytes());
    }

    #[test]
    fn test_slave_joined_through_cmdu() {
        let joined = SlaveJoined {
            slave_version: "2.2.0".to_string(),
            backhaul: BackhaulParams {
                backhaul_iface_type: BackhaulIfaceType::Wifi,
                backhaul_is_wireless: true,
                backhaul_bssid: MacAddress::new([0x02, 0, 0, 0, 0, 0x99]),
                backhaul_channel: 149,
                ..Default::default()
            },
            wlan_channel: 0,
            hostap: HostapParams {
                iface_name: "wlan2".to_string(),
                frequency_band: FreqBand::Band5G,
                max_bandwidth: Bandwidth::Bw80,
                ..Default::default()
            },
            supported_channels: vec![SupportedChannel {
                channel: 100,
                bandwidth: Bandwidth::Bw80,
                tx_power: 23,
                is_dfs: true,
                radar_affected: false,
            }],
            vaps: vec![VapInfo {
                vap_id: 0,
                bssid: MacAddress::new([0x02, 0, 0, 0, 1, 0]),
                ssid: "home".to_string(),
                fronthaul: true,
                backhaul: false,
            }],
            ..Default::default()
        };
        let message = VendorMessage::control(ControlMessage::SlaveJoinedNotification(Box::new(
            joined.clone(),
        )))
        .with_radio(radio());

        let wire = message.to_cmdu(9).encode().unwrap();
        let cmdu = Cmdu::decode(&wire).unwrap();
        let decoded = VendorMessage::from_cmdu(&cmdu).unwrap().unwrap();
        assert_eq!(decoded.radio_mac, radio());
        match decoded.body {
            VendorBody::Control(ControlMessage::SlaveJoinedNotification(got)) => {
                assert_eq!(*got, joined)
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn test_bml_feature_opcodes() {
        let set = BmlMessage::SetFeature {
            feature: Feature::DfsReentry,
            enable: true,
        };
        assert_eq!(set.op(), 0x10 + 4 * 4);
        let bytes = VendorMessage::new(set.clone().into()).encode();
        let decoded = VendorMessage::decode(&bytes).unwrap();
        assert_eq!(decoded.body, VendorBody::Bml(set));
    }

    #[test]
    fn test_unknown_ops() {
        let mut bytes = VendorMessage::new(BmlMessage::Ping.into()).encode();
        bytes[1] = 0x66;
        assert_eq!(
            VendorMessage::decode(&bytes).unwrap().body,
            VendorBody::Bml(BmlMessage::Unknown { op: 0x66 })
        );

        bytes[0] = Action::Control as u8;
        assert!(VendorMessage::decode(&bytes).is_err());

        bytes[0] = 9;
        assert!(matches!(
            VendorMessage::decode(&bytes),
            Err(MeshError::Vendor(VendorMessageError::UnknownAction { action: 9 }))
        ));
    }

    #[test]
    fn test_foreign_oui() {
        let tlv = VendorSpecificTlv {
            oui: [0x00, 0x50, 0xf2],
            payload: vec![0; VENDOR_HEADER_LEN],
        };
        let err = VendorMessage::from_tlv(&tlv).unwrap_err();
        assert!(is_foreign(&err));
    }

    #[test]
    fn test_truncated_header() {
        assert!(VendorMessage::decode(&[1, 1, 0]).is_err());
    }
}
