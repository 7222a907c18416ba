//! TLV codec and the typed TLV catalogue
//!
//! A TLV is `type (u8) | length (u16, big-endian) | value`. Received chains are kept
//! as raw [`TlvEntry`] values and decoded on demand into the typed structs below, each
//! implementing [`Tlv`]. Unknown types survive decoding untouched.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::errors::{MeshError, Result, TlvError};
use crate::protocol::wire::{WireReader, WireWriter};
use crate::types::MacAddress;

/// Size of the TLV type + length prefix
pub const TLV_HEADER_LEN: usize = 3;

// ----------------------------------------------------------------------------
// TLV Types
// ----------------------------------------------------------------------------

/// IEEE 1905.1 and Multi-AP TLV types understood by the controller
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TlvType {
    EndOfMessage = 0x00,
    AlMacAddress = 0x01,
    MacAddress = 0x02,
    VendorSpecific = 0x0b,
    SearchedRole = 0x0d,
    AutoconfigFreqBand = 0x0e,
    SupportedRole = 0x0f,
    SupportedFreqBand = 0x10,
    Wsc = 0x11,
    SupportedService = 0x80,
    SearchedService = 0x81,
    ApRadioIdentifier = 0x82,
    ApRadioBasicCapabilities = 0x85,
    OperatingChannelReport = 0x8f,
    ClientAssociationEvent = 0x92,
    ApMetrics = 0x94,
    StaMacAddress = 0x95,
    AssociatedStaLinkMetrics = 0x96,
    BeaconMetricsResponse = 0x9a,
    SteeringRequest = 0x9b,
    SteeringBtmReport = 0x9c,
    ClientAssociationControlRequest = 0x9d,
    BackhaulSteeringRequest = 0x9e,
    BackhaulSteeringResponse = 0x9f,
    HigherLayerData = 0xa0,
    ApCapability = 0xa1,
    ErrorCode = 0xa3,
    ChannelScanResult = 0xa7,
    MultiApProfile = 0xb3,
    ProfileTwoApCapability = 0xb4,
    ServicePrioritizationRule = 0xb9,
    DscpMappingTable = 0xba,
    StatusCode = 0xbd,
    BackhaulStaRadioCapabilities = 0xd2,
    ControllerCapability = 0xdd,
    QosManagementDescriptor = 0xe1,
}

impl TlvType {
    /// Known type for a raw value; unknown values are tolerated by the codec
    pub fn from_u8(value: u8) -> Option<Self> {
        use TlvType::*;
        let known = [
            EndOfMessage,
            AlMacAddress,
            MacAddress,
            VendorSpecific,
            SearchedRole,
            AutoconfigFreqBand,
            SupportedRole,
            SupportedFreqBand,
            Wsc,
            SupportedService,
            SearchedService,
            ApRadioIdentifier,
            ApRadioBasicCapabilities,
            OperatingChannelReport,
            ClientAssociationEvent,
            ApMetrics,
            StaMacAddress,
            AssociatedStaLinkMetrics,
            BeaconMetricsResponse,
            SteeringRequest,
            SteeringBtmReport,
            ClientAssociationControlRequest,
            BackhaulSteeringRequest,
            BackhaulSteeringResponse,
            HigherLayerData,
            ApCapability,
            ErrorCode,
            ChannelScanResult,
            MultiApProfile,
            ProfileTwoApCapability,
            ServicePrioritizationRule,
            DscpMappingTable,
            StatusCode,
            BackhaulStaRadioCapabilities,
            ControllerCapability,
            QosManagementDescriptor,
        ];
        known.into_iter().find(|t| *t as u8 == value)
    }
}

// ----------------------------------------------------------------------------
// Raw TLV Entries
// ----------------------------------------------------------------------------

/// A single undecoded TLV
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvEntry {
    pub tlv_type: u8,
    pub value: Vec<u8>,
}

impl TlvEntry {
    /// Create a new TLV entry
    pub fn new(tlv_type: u8, value: Vec<u8>) -> Self {
        Self { tlv_type, value }
    }

    /// Encode this TLV entry to bytes
    pub fn encode_into(&self, out: &mut Vec<u8>) -> core::result::Result<(), TlvError> {
        if self.value.len() > u16::MAX as usize {
            return Err(TlvError::ValueTooLarge {
                length: self.value.len(),
            });
        }
        out.push(self.tlv_type);
        out.extend_from_slice(&(self.value.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.value);
        Ok(())
    }

    /// Decode a TLV entry, returning it and the number of bytes consumed
    pub fn decode(data: &[u8]) -> core::result::Result<(Self, usize), TlvError> {
        if data.len() < TLV_HEADER_LEN {
            return Err(TlvError::Truncated {
                expected: TLV_HEADER_LEN,
                actual: data.len(),
            });
        }
        let tlv_type = data[0];
        let length = u16::from_be_bytes([data[1], data[2]]) as usize;
        let remaining = data.len() - TLV_HEADER_LEN;
        if length > remaining {
            return Err(TlvError::LengthOverflow {
                tlv_type,
                length,
                remaining,
            });
        }
        let value = data[TLV_HEADER_LEN..TLV_HEADER_LEN + length].to_vec();
        Ok((TlvEntry::new(tlv_type, value), TLV_HEADER_LEN + length))
    }

    /// Decode this entry as a typed TLV
    pub fn parse<T: Tlv>(&self) -> Result<T> {
        if self.tlv_type != T::TYPE as u8 {
            return Err(MeshError::malformed(
                self.tlv_type,
                format!("expected TLV type 0x{:02x}", T::TYPE as u8),
            ));
        }
        let mut reader = WireReader::new(&self.value);
        let tlv = T::decode_value(&mut reader)
            .map_err(|err| MeshError::malformed(self.tlv_type, err.to_string()))?;
        Ok(tlv)
    }

    pub fn from_tlv<T: Tlv>(tlv: &T) -> Self {
        let mut writer = WireWriter::new();
        tlv.encode_value(&mut writer);
        TlvEntry::new(T::TYPE as u8, writer.into_bytes())
    }
}

/// Ordered chain of TLVs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlvCodec {
    entries: Vec<TlvEntry>,
}

impl TlvCodec {
    /// Create a new empty TLV codec
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, entry: TlvEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TlvEntry] {
        &self.entries
    }

    pub fn find_entry(&self, tlv_type: u8) -> Option<&TlvEntry> {
        self.entries.iter().find(|entry| entry.tlv_type == tlv_type)
    }

    /// Encode every entry followed by an End-of-Message TLV
    pub fn encode(&self) -> core::result::Result<Vec<u8>, TlvError> {
        let mut encoded = Vec::new();
        for entry in &self.entries {
            entry.encode_into(&mut encoded)?;
        }
        TlvEntry::new(TlvType::EndOfMessage as u8, Vec::new()).encode_into(&mut encoded)?;
        Ok(encoded)
    }

    /// Decode a chain up to the End-of-Message TLV or the end of the buffer
    pub fn decode(data: &[u8]) -> core::result::Result<Self, TlvError> {
        let mut codec = TlvCodec::new();
        let mut offset = 0;

        while offset < data.len() {
            let (entry, consumed) = TlvEntry::decode(&data[offset..])?;
            offset += consumed;
            if entry.tlv_type == TlvType::EndOfMessage as u8 {
                break;
            }
            if TlvType::from_u8(entry.tlv_type).is_none() {
                trace!(tlv_type = entry.tlv_type, len = entry.value.len(), "Keeping unknown TLV");
            }
            codec.add_entry(entry);
        }

        Ok(codec)
    }

    /// Validate that required TLV types are present
    pub fn validate_required(&self, required_types: &[TlvType]) -> core::result::Result<(), TlvError> {
        for required_type in required_types {
            if self.find_entry(*required_type as u8).is_none() {
                return Err(TlvError::MissingTlv {
                    tlv_type: *required_type as u8,
                });
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Typed TLV Trait
// ----------------------------------------------------------------------------

/// A TLV with a typed value layout
pub trait Tlv: Sized {
    const TYPE: TlvType;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError>;

    fn encode_value(&self, writer: &mut WireWriter);
}

/// TLVs whose value is exactly one MAC address
macro_rules! mac_tlv {
    ($name:ident, $tlv_type:expr, $field:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            pub $field: MacAddress,
        }

        impl Tlv for $name {
            const TYPE: TlvType = $tlv_type;

            fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
                Ok(Self {
                    $field: reader.read_mac()?,
                })
            }

            fn encode_value(&self, writer: &mut WireWriter) {
                writer.put_mac(&self.$field);
            }
        }
    };
}

mac_tlv!(AlMacAddressTlv, TlvType::AlMacAddress, mac);
mac_tlv!(MacAddressTlv, TlvType::MacAddress, mac);
mac_tlv!(ApRadioIdentifierTlv, TlvType::ApRadioIdentifier, ruid);
mac_tlv!(StaMacAddressTlv, TlvType::StaMacAddress, mac);

// ----------------------------------------------------------------------------
// Autoconfiguration TLVs
// ----------------------------------------------------------------------------

/// 1905.1 role values
pub mod role {
    pub const REGISTRAR: u8 = 0x00;
}

/// Multi-AP service values
pub mod service {
    pub const CONTROLLER: u8 = 0x00;
    pub const AGENT: u8 = 0x01;
}

/// Multi-AP profile values
pub mod profile {
    pub const PROFILE_1: u8 = 0x01;
    pub const PROFILE_2: u8 = 0x02;
    pub const PROFILE_3: u8 = 0x03;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchedRoleTlv {
    pub role: u8,
}

impl Tlv for SearchedRoleTlv {
    const TYPE: TlvType = TlvType::SearchedRole;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self { role: reader.read_u8()? })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer.put_u8(self.role);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedRoleTlv {
    pub role: u8,
}

impl Tlv for SupportedRoleTlv {
    const TYPE: TlvType = TlvType::SupportedRole;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self { role: reader.read_u8()? })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer.put_u8(self.role);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoconfigFreqBandTlv {
    pub band: u8,
}

impl Tlv for AutoconfigFreqBandTlv {
    const TYPE: TlvType = TlvType::AutoconfigFreqBand;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self { band: reader.read_u8()? })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer.put_u8(self.band);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedFreqBandTlv {
    pub band: u8,
}

impl Tlv for SupportedFreqBandTlv {
    const TYPE: TlvType = TlvType::SupportedFreqBand;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self { band: reader.read_u8()? })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer.put_u8(self.band);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedServiceTlv {
    pub services: Vec<u8>,
}

impl Tlv for SupportedServiceTlv {
    const TYPE: TlvType = TlvType::SupportedService;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self {
            services: reader.read_u8_list()?,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer.put_u8_list(&self.services);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchedServiceTlv {
    pub services: Vec<u8>,
}

impl Tlv for SearchedServiceTlv {
    const TYPE: TlvType = TlvType::SearchedService;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self {
            services: reader.read_u8_list()?,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer.put_u8_list(&self.services);
    }
}

/// Opaque WSC frame (M1, M2 or M8 attribute list)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WscTlv {
    pub frame: Vec<u8>,
}

impl Tlv for WscTlv {
    const TYPE: TlvType = TlvType::Wsc;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self {
            frame: reader.read_rest().to_vec(),
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer.put_bytes(&self.frame);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatingClassInfo {
    pub operating_class: u8,
    pub max_tx_power: u8,
    pub non_operable_channels: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApRadioBasicCapabilitiesTlv {
    pub ruid: MacAddress,
    pub max_bss: u8,
    pub operating_classes: Vec<OperatingClassInfo>,
}

impl ApRadioBasicCapabilitiesTlv {
    pub fn supports_operating_class(&self, operating_class: u8) -> bool {
        self.operating_classes
            .iter()
            .any(|info| info.operating_class == operating_class)
    }
}

impl Tlv for ApRadioBasicCapabilitiesTlv {
    const TYPE: TlvType = TlvType::ApRadioBasicCapabilities;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        let ruid = reader.read_mac()?;
        let max_bss = reader.read_u8()?;
        let count = reader.read_u8()? as usize;
        let mut operating_classes = Vec::with_capacity(count);
        for _ in 0..count {
            operating_classes.push(OperatingClassInfo {
                operating_class: reader.read_u8()?,
                max_tx_power: reader.read_u8()?,
                non_operable_channels: reader.read_u8_list()?,
            });
        }
        Ok(Self {
            ruid,
            max_bss,
            operating_classes,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer.put_mac(&self.ruid).put_u8(self.max_bss);
        writer.put_u8(self.operating_classes.len() as u8);
        for info in &self.operating_classes {
            writer
                .put_u8(info.operating_class)
                .put_u8(info.max_tx_power)
                .put_u8_list(&info.non_operable_channels);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiApProfileTlv {
    pub profile: u8,
}

impl Tlv for MultiApProfileTlv {
    const TYPE: TlvType = TlvType::MultiApProfile;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self {
            profile: reader.read_u8()?,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer.put_u8(self.profile);
    }
}

/// Byte counter unit values of the Profile-2 AP capability
pub mod byte_counter_units {
    pub const BYTES: u8 = 0x00;
    pub const KIBIBYTES: u8 = 0x01;
    pub const MEBIBYTES: u8 = 0x02;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileTwoApCapabilityTlv {
    pub max_prioritization_rules: u8,
    pub byte_counter_units: u8,
    pub max_vids: u8,
}

impl Tlv for ProfileTwoApCapabilityTlv {
    const TYPE: TlvType = TlvType::ProfileTwoApCapability;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        let max_prioritization_rules = reader.read_u8()?;
        let _reserved = reader.read_u8()?;
        let flags = reader.read_u8()?;
        let max_vids = reader.read_u8()?;
        Ok(Self {
            max_prioritization_rules,
            byte_counter_units: flags >> 6,
            max_vids,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer
            .put_u8(self.max_prioritization_rules)
            .put_u8(0)
            .put_u8((self.byte_counter_units & 0x03) << 6)
            .put_u8(self.max_vids);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerCapabilityTlv {
    pub ki_bmi_b_counter: bool,
    pub early_ap_capability: bool,
}

impl Tlv for ControllerCapabilityTlv {
    const TYPE: TlvType = TlvType::ControllerCapability;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        let flags = reader.read_u8()?;
        Ok(Self {
            ki_bmi_b_counter: flags & 0x80 != 0,
            early_ap_capability: flags & 0x40 != 0,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        let mut flags = 0u8;
        if self.ki_bmi_b_counter {
            flags |= 0x80;
        }
        if self.early_ap_capability {
            flags |= 0x40;
        }
        writer.put_u8(flags);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApCapabilityTlv {
    pub unassociated_sta_metrics_on_operating: bool,
    pub unassociated_sta_metrics_off_channel: bool,
    pub agent_initiated_rcpi_steering: bool,
}

impl Tlv for ApCapabilityTlv {
    const TYPE: TlvType = TlvType::ApCapability;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        let flags = reader.read_u8()?;
        Ok(Self {
            unassociated_sta_metrics_on_operating: flags & 0x80 != 0,
            unassociated_sta_metrics_off_channel: flags & 0x40 != 0,
            agent_initiated_rcpi_steering: flags & 0x20 != 0,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        let flags = (self.unassociated_sta_metrics_on_operating as u8) << 7
            | (self.unassociated_sta_metrics_off_channel as u8) << 6
            | (self.agent_initiated_rcpi_steering as u8) << 5;
        writer.put_u8(flags);
    }
}

// ----------------------------------------------------------------------------
// Topology and Metrics TLVs
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAssociationEventTlv {
    pub client_mac: MacAddress,
    pub bssid: MacAddress,
    pub associated: bool,
}

impl Tlv for ClientAssociationEventTlv {
    const TYPE: TlvType = TlvType::ClientAssociationEvent;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self {
            client_mac: reader.read_mac()?,
            bssid: reader.read_mac()?,
            associated: reader.read_u8()? & 0x80 != 0,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer
            .put_mac(&self.client_mac)
            .put_mac(&self.bssid)
            .put_u8(if self.associated { 0x80 } else { 0x00 });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatingChannelReportTlv {
    pub ruid: MacAddress,
    /// (operating class, channel) pairs
    pub channels: Vec<(u8, u8)>,
    pub tx_power: u8,
}

impl Tlv for OperatingChannelReportTlv {
    const TYPE: TlvType = TlvType::OperatingChannelReport;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        let ruid = reader.read_mac()?;
        let count = reader.read_u8()? as usize;
        let mut channels = Vec::with_capacity(count);
        for _ in 0..count {
            channels.push((reader.read_u8()?, reader.read_u8()?));
        }
        Ok(Self {
            ruid,
            channels,
            tx_power: reader.read_u8()?,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer.put_mac(&self.ruid).put_u8(self.channels.len() as u8);
        for (op_class, channel) in &self.channels {
            writer.put_u8(*op_class).put_u8(*channel);
        }
        writer.put_u8(self.tx_power);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApMetricsTlv {
    pub bssid: MacAddress,
    pub channel_utilization: u8,
    pub associated_sta_count: u16,
}

impl Tlv for ApMetricsTlv {
    const TYPE: TlvType = TlvType::ApMetrics;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        let bssid = reader.read_mac()?;
        let channel_utilization = reader.read_u8()?;
        let associated_sta_count = reader.read_u16()?;
        // Estimated service parameters follow and are not used
        reader.read_rest();
        Ok(Self {
            bssid,
            channel_utilization,
            associated_sta_count,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer
            .put_mac(&self.bssid)
            .put_u8(self.channel_utilization)
            .put_u16(self.associated_sta_count);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaLinkMetrics {
    pub bssid: MacAddress,
    pub time_delta_ms: u32,
    pub downlink_rate_mbps: u32,
    pub uplink_rate_mbps: u32,
    pub uplink_rcpi: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociatedStaLinkMetricsTlv {
    pub sta_mac: MacAddress,
    pub metrics: Vec<StaLinkMetrics>,
}

impl Tlv for AssociatedStaLinkMetricsTlv {
    const TYPE: TlvType = TlvType::AssociatedStaLinkMetrics;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        let sta_mac = reader.read_mac()?;
        let count = reader.read_u8()? as usize;
        let mut metrics = Vec::with_capacity(count);
        for _ in 0..count {
            metrics.push(StaLinkMetrics {
                bssid: reader.read_mac()?,
                time_delta_ms: reader.read_u32()?,
                downlink_rate_mbps: reader.read_u32()?,
                uplink_rate_mbps: reader.read_u32()?,
                uplink_rcpi: reader.read_u8()?,
            });
        }
        Ok(Self { sta_mac, metrics })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer.put_mac(&self.sta_mac).put_u8(self.metrics.len() as u8);
        for m in &self.metrics {
            writer
                .put_mac(&m.bssid)
                .put_u32(m.time_delta_ms)
                .put_u32(m.downlink_rate_mbps)
                .put_u32(m.uplink_rate_mbps)
                .put_u8(m.uplink_rcpi);
        }
    }
}

/// 802.11 beacon report carried inside a beacon metrics response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconReport {
    pub operating_class: u8,
    pub channel: u8,
    pub rcpi: u8,
    pub rsni: u8,
    pub bssid: MacAddress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconMetricsResponseTlv {
    pub sta_mac: MacAddress,
    pub reports: Vec<BeaconReport>,
}

impl Tlv for BeaconMetricsResponseTlv {
    const TYPE: TlvType = TlvType::BeaconMetricsResponse;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        let sta_mac = reader.read_mac()?;
        let _reserved = reader.read_u8()?;
        let count = reader.read_u8()? as usize;
        let mut reports = Vec::with_capacity(count);
        for _ in 0..count {
            reports.push(BeaconReport {
                operating_class: reader.read_u8()?,
                channel: reader.read_u8()?,
                rcpi: reader.read_u8()?,
                rsni: reader.read_u8()?,
                bssid: reader.read_mac()?,
            });
        }
        Ok(Self { sta_mac, reports })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer
            .put_mac(&self.sta_mac)
            .put_u8(0)
            .put_u8(self.reports.len() as u8);
        for r in &self.reports {
            writer
                .put_u8(r.operating_class)
                .put_u8(r.channel)
                .put_u8(r.rcpi)
                .put_u8(r.rsni)
                .put_mac(&r.bssid);
        }
    }
}

// ----------------------------------------------------------------------------
// Steering TLVs
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SteeringTarget {
    pub bssid: MacAddress,
    pub operating_class: u8,
    pub channel: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SteeringRequestTlv {
    pub bssid: MacAddress,
    pub request_mode_mandate: bool,
    pub btm_disassociation_imminent: bool,
    pub btm_abridged: bool,
    pub steering_opportunity_window_sec: u16,
    pub btm_disassociation_timer: u16,
    pub sta_list: Vec<MacAddress>,
    pub targets: Vec<SteeringTarget>,
}

impl Tlv for SteeringRequestTlv {
    const TYPE: TlvType = TlvType::SteeringRequest;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        let bssid = reader.read_mac()?;
        let flags = reader.read_u8()?;
        let steering_opportunity_window_sec = reader.read_u16()?;
        let btm_disassociation_timer = reader.read_u16()?;
        let sta_list = reader.read_mac_list()?;
        let count = reader.read_u8()? as usize;
        let mut targets = Vec::with_capacity(count);
        for _ in 0..count {
            targets.push(SteeringTarget {
                bssid: reader.read_mac()?,
                operating_class: reader.read_u8()?,
                channel: reader.read_u8()?,
            });
        }
        Ok(Self {
            bssid,
            request_mode_mandate: flags & 0x80 != 0,
            btm_disassociation_imminent: flags & 0x40 != 0,
            btm_abridged: flags & 0x20 != 0,
            steering_opportunity_window_sec,
            btm_disassociation_timer,
            sta_list,
            targets,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        let flags = (self.request_mode_mandate as u8) << 7
            | (self.btm_disassociation_imminent as u8) << 6
            | (self.btm_abridged as u8) << 5;
        writer
            .put_mac(&self.bssid)
            .put_u8(flags)
            .put_u16(self.steering_opportunity_window_sec)
            .put_u16(self.btm_disassociation_timer)
            .put_mac_list(&self.sta_list);
        writer.put_u8(self.targets.len() as u8);
        for t in &self.targets {
            writer
                .put_mac(&t.bssid)
                .put_u8(t.operating_class)
                .put_u8(t.channel);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SteeringBtmReportTlv {
    pub bssid: MacAddress,
    pub sta_mac: MacAddress,
    pub status_code: u8,
    pub target_bssid: Option<MacAddress>,
}

impl Tlv for SteeringBtmReportTlv {
    const TYPE: TlvType = TlvType::SteeringBtmReport;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        let bssid = reader.read_mac()?;
        let sta_mac = reader.read_mac()?;
        let status_code = reader.read_u8()?;
        let target_bssid = if reader.remaining() >= 6 {
            Some(reader.read_mac()?)
        } else {
            None
        };
        Ok(Self {
            bssid,
            sta_mac,
            status_code,
            target_bssid,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer
            .put_mac(&self.bssid)
            .put_mac(&self.sta_mac)
            .put_u8(self.status_code);
        if let Some(target) = &self.target_bssid {
            writer.put_mac(target);
        }
    }
}

/// Association control request values
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationControl {
    Block = 0x00,
    Unblock = 0x01,
    TimedBlock = 0x02,
    IndefiniteBlock = 0x03,
}

impl AssociationControl {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Block),
            0x01 => Some(Self::Unblock),
            0x02 => Some(Self::TimedBlock),
            0x03 => Some(Self::IndefiniteBlock),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAssociationControlRequestTlv {
    pub bssid: MacAddress,
    pub control: AssociationControl,
    pub validity_period_sec: u16,
    pub sta_list: Vec<MacAddress>,
}

impl Tlv for ClientAssociationControlRequestTlv {
    const TYPE: TlvType = TlvType::ClientAssociationControlRequest;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        let bssid = reader.read_mac()?;
        let raw = reader.read_u8()?;
        let control = AssociationControl::from_u8(raw).ok_or_else(|| TlvError::Malformed {
            tlv_type: Self::TYPE as u8,
            reason: format!("unknown association control {raw}"),
        })?;
        Ok(Self {
            bssid,
            control,
            validity_period_sec: reader.read_u16()?,
            sta_list: reader.read_mac_list()?,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer
            .put_mac(&self.bssid)
            .put_u8(self.control as u8)
            .put_u16(self.validity_period_sec)
            .put_mac_list(&self.sta_list);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackhaulSteeringRequestTlv {
    pub backhaul_sta_mac: MacAddress,
    pub target_bssid: MacAddress,
    pub operating_class: u8,
    pub channel: u8,
}

impl Tlv for BackhaulSteeringRequestTlv {
    const TYPE: TlvType = TlvType::BackhaulSteeringRequest;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self {
            backhaul_sta_mac: reader.read_mac()?,
            target_bssid: reader.read_mac()?,
            operating_class: reader.read_u8()?,
            channel: reader.read_u8()?,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer
            .put_mac(&self.backhaul_sta_mac)
            .put_mac(&self.target_bssid)
            .put_u8(self.operating_class)
            .put_u8(self.channel);
    }
}

pub mod backhaul_steering_result {
    pub const SUCCESS: u8 = 0x00;
    pub const FAILURE: u8 = 0x01;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackhaulSteeringResponseTlv {
    pub backhaul_sta_mac: MacAddress,
    pub target_bssid: MacAddress,
    pub result: u8,
}

impl Tlv for BackhaulSteeringResponseTlv {
    const TYPE: TlvType = TlvType::BackhaulSteeringResponse;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self {
            backhaul_sta_mac: reader.read_mac()?,
            target_bssid: reader.read_mac()?,
            result: reader.read_u8()?,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer
            .put_mac(&self.backhaul_sta_mac)
            .put_mac(&self.target_bssid)
            .put_u8(self.result);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCodeTlv {
    pub reason_code: u8,
    pub sta_mac: MacAddress,
}

impl Tlv for ErrorCodeTlv {
    const TYPE: TlvType = TlvType::ErrorCode;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self {
            reason_code: reader.read_u8()?,
            sta_mac: reader.read_mac()?,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer.put_u8(self.reason_code).put_mac(&self.sta_mac);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCodeTlv {
    pub status_code: u16,
}

impl Tlv for StatusCodeTlv {
    const TYPE: TlvType = TlvType::StatusCode;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self {
            status_code: reader.read_u16()?,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer.put_u16(self.status_code);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HigherLayerDataTlv {
    pub protocol: u8,
    pub payload: Vec<u8>,
}

impl Tlv for HigherLayerDataTlv {
    const TYPE: TlvType = TlvType::HigherLayerData;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self {
            protocol: reader.read_u8()?,
            payload: reader.read_rest().to_vec(),
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer.put_u8(self.protocol).put_bytes(&self.payload);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackhaulStaRadioCapabilitiesTlv {
    pub ruid: MacAddress,
    pub backhaul_sta_mac: Option<MacAddress>,
}

impl Tlv for BackhaulStaRadioCapabilitiesTlv {
    const TYPE: TlvType = TlvType::BackhaulStaRadioCapabilities;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        let ruid = reader.read_mac()?;
        let flags = reader.read_u8()?;
        let backhaul_sta_mac = if flags & 0x80 != 0 {
            Some(reader.read_mac()?)
        } else {
            None
        };
        Ok(Self {
            ruid,
            backhaul_sta_mac,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer.put_mac(&self.ruid);
        match &self.backhaul_sta_mac {
            Some(mac) => {
                writer.put_u8(0x80).put_mac(mac);
            }
            None => {
                writer.put_u8(0x00);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Service Prioritization TLVs
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServicePrioritizationRuleTlv {
    pub rule_id: u32,
    pub add: bool,
    pub precedence: u8,
    pub output: u8,
    pub always_match: bool,
}

impl Tlv for ServicePrioritizationRuleTlv {
    const TYPE: TlvType = TlvType::ServicePrioritizationRule;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        let rule_id = reader.read_u32()?;
        let add = reader.read_u8()? & 0x80 != 0;
        let precedence = reader.read_u8()?;
        let output = reader.read_u8()?;
        let always_match = reader.read_u8()? & 0x80 != 0;
        Ok(Self {
            rule_id,
            add,
            precedence,
            output,
            always_match,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer
            .put_u32(self.rule_id)
            .put_u8(if self.add { 0x80 } else { 0x00 })
            .put_u8(self.precedence)
            .put_u8(self.output)
            .put_u8(if self.always_match { 0x80 } else { 0x00 });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DscpMappingTableTlv {
    /// Priority for each of the 64 DSCP code points
    pub table: [u8; 64],
}

impl Tlv for DscpMappingTableTlv {
    const TYPE: TlvType = TlvType::DscpMappingTable;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self {
            table: reader.read_array()?,
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer.put_bytes(&self.table);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QosManagementDescriptorTlv {
    pub qmid: u16,
    pub bssid: MacAddress,
    pub client_mac: MacAddress,
    pub descriptor: Vec<u8>,
}

impl Tlv for QosManagementDescriptorTlv {
    const TYPE: TlvType = TlvType::QosManagementDescriptor;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self {
            qmid: reader.read_u16()?,
            bssid: reader.read_mac()?,
            client_mac: reader.read_mac()?,
            descriptor: reader.read_rest().to_vec(),
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer
            .put_u16(self.qmid)
            .put_mac(&self.bssid)
            .put_mac(&self.client_mac)
            .put_bytes(&self.descriptor);
    }
}

// ----------------------------------------------------------------------------
// Vendor Specific TLV
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorSpecificTlv {
    pub oui: [u8; 3],
    pub payload: Vec<u8>,
}

impl Tlv for VendorSpecificTlv {
    const TYPE: TlvType = TlvType::VendorSpecific;

    fn decode_value(reader: &mut WireReader<'_>) -> core::result::Result<Self, TlvError> {
        Ok(Self {
            oui: reader.read_array()?,
            payload: reader.read_rest().to_vec(),
        })
    }

    fn encode_value(&self, writer: &mut WireWriter) {
        writer.put_bytes(&self.oui).put_bytes(&self.payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tlv_type_lookup() {
        assert_eq!(TlvType::from_u8(0x0b), Some(TlvType::VendorSpecific));
        assert_eq!(TlvType::from_u8(0x80), Some(TlvType::SupportedService));
        assert_eq!(TlvType::from_u8(0xfe), None);
    }

    #[test]
    fn test_codec_appends_end_of_message() {
        let mut codec = TlvCodec::new();
        codec.add_entry(TlvEntry::from_tlv(&SupportedRoleTlv {
            role: role::REGISTRAR,
        }));
        let bytes = codec.encode().unwrap();
        assert_eq!(bytes, vec![0x0f, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]);

        let decoded = TlvCodec::decode(&bytes).unwrap();
        assert_eq!(decoded.entries().len(), 1);
    }

    #[test]
    fn test_codec_preserves_unknown_types() {
        let bytes = [0xfe, 0x00, 0x02, 0xaa, 0xbb, 0x00, 0x00, 0x00];
        let codec = TlvCodec::decode(&bytes).unwrap();
        assert_eq!(codec.entries()[0].tlv_type, 0xfe);
        assert_eq!(codec.entries()[0].value, vec![0xaa, 0xbb]);
    }

    #[test]
    fn test_length_overflow_rejected() {
        let bytes = [0x01, 0x00, 0x10, 0x00];
        assert!(matches!(
            TlvCodec::decode(&bytes),
            Err(TlvError::LengthOverflow { tlv_type: 0x01, .. })
        ));
    }

    #[test]
    fn test_validate_required() {
        let mut codec = TlvCodec::new();
        codec.add_entry(TlvEntry::from_tlv(&AlMacAddressTlv {
            mac: MacAddress::new([1, 2, 3, 4, 5, 6]),
        }));
        assert!(codec.validate_required(&[TlvType::AlMacAddress]).is_ok());
        assert_eq!(
            codec.validate_required(&[TlvType::SearchedRole]),
            Err(TlvError::MissingTlv { tlv_type: 0x0d })
        );
    }

    #[test]
    fn test_steering_request_layout() {
        let tlv = SteeringRequestTlv {
            bssid: MacAddress::new([0xaa; 6]),
            request_mode_mandate: true,
            btm_disassociation_imminent: true,
            btm_abridged: false,
            steering_opportunity_window_sec: 0,
            btm_disassociation_timer: 10,
            sta_list: vec![MacAddress::new([0x11; 6])],
            targets: vec![SteeringTarget {
                bssid: MacAddress::new([0xbb; 6]),
                operating_class: 115,
                channel: 36,
            }],
        };
        let entry = TlvEntry::from_tlv(&tlv);
        assert_eq!(entry.value[6], 0xc0);
        assert_eq!(entry.parse::<SteeringRequestTlv>().unwrap(), tlv);
    }

    #[test]
    fn test_parse_rejects_wrong_type() {
        let entry = TlvEntry::from_tlv(&SearchedRoleTlv { role: 0 });
        assert!(entry.parse::<SupportedRoleTlv>().is_err());
    }
}
