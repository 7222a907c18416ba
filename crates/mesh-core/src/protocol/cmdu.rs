//! CMDU framing
//!
//! An IEEE 1905.1 CMDU is an 8-byte header followed by a TLV chain terminated by the
//! End-of-Message TLV. [`Cmdu`] owns its TLVs, so a transmitted frame is always fully
//! built before [`Cmdu::encode`] hands out the bytes.

use serde::{Deserialize, Serialize};

use crate::errors::{MeshError, Result, TlvError};
use crate::protocol::tlv::{Tlv, TlvCodec, TlvEntry, TlvType};

/// Length of the CMDU header
pub const CMDU_HEADER_LEN: usize = 8;

const FLAG_LAST_FRAGMENT: u8 = 0x80;
const FLAG_RELAY: u8 = 0x40;

// ----------------------------------------------------------------------------
// Message Types
// ----------------------------------------------------------------------------

/// IEEE 1905.1 and Multi-AP message types
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    TopologyDiscovery = 0x0000,
    TopologyNotification = 0x0001,
    TopologyQuery = 0x0002,
    TopologyResponse = 0x0003,
    VendorSpecific = 0x0004,
    LinkMetricQuery = 0x0005,
    LinkMetricResponse = 0x0006,
    ApAutoconfigurationSearch = 0x0007,
    ApAutoconfigurationResponse = 0x0008,
    ApAutoconfigurationWsc = 0x0009,
    ApAutoconfigurationRenew = 0x000a,
    HigherLayerQuery = 0x000d,
    HigherLayerResponse = 0x000e,
    Ack = 0x8000,
    ApCapabilityQuery = 0x8001,
    ApCapabilityReport = 0x8002,
    MultiApPolicyConfigRequest = 0x8003,
    ChannelPreferenceQuery = 0x8004,
    ChannelPreferenceReport = 0x8005,
    ChannelSelectionRequest = 0x8006,
    ChannelSelectionResponse = 0x8007,
    OperatingChannelReport = 0x8008,
    ClientCapabilityQuery = 0x8009,
    ClientCapabilityReport = 0x800a,
    ApMetricsQuery = 0x800b,
    ApMetricsResponse = 0x800c,
    AssociatedStaLinkMetricsQuery = 0x800d,
    AssociatedStaLinkMetricsResponse = 0x800e,
    BeaconMetricsQuery = 0x8011,
    BeaconMetricsResponse = 0x8012,
    ClientSteeringRequest = 0x8014,
    ClientSteeringBtmReport = 0x8015,
    ClientAssociationControlRequest = 0x8016,
    SteeringCompleted = 0x8017,
    HigherLayerData = 0x8018,
    BackhaulSteeringRequest = 0x8019,
    BackhaulSteeringResponse = 0x801a,
    ChannelScanRequest = 0x801b,
    ChannelScanReport = 0x801c,
    ServicePrioritizationRequest = 0x8023,
    Tunnelled = 0x8026,
    BackhaulStaCapabilityQuery = 0x8027,
    BackhaulStaCapabilityReport = 0x8028,
    FailedConnection = 0x8033,
    BssConfigurationRequest = 0x8035,
    BssConfigurationResponse = 0x8036,
    BssConfigurationResult = 0x8037,
    EarlyApCapabilityReport = 0x8060,
    QosManagementNotification = 0x8062,
}

impl MessageType {
    pub fn from_u16(value: u16) -> Option<Self> {
        use MessageType::*;
        let known = [
            TopologyDiscovery,
            TopologyNotification,
            TopologyQuery,
            TopologyResponse,
            VendorSpecific,
            LinkMetricQuery,
            LinkMetricResponse,
            ApAutoconfigurationSearch,
            ApAutoconfigurationResponse,
            ApAutoconfigurationWsc,
            ApAutoconfigurationRenew,
            HigherLayerQuery,
            HigherLayerResponse,
            Ack,
            ApCapabilityQuery,
            ApCapabilityReport,
            MultiApPolicyConfigRequest,
            ChannelPreferenceQuery,
            ChannelPreferenceReport,
            ChannelSelectionRequest,
            ChannelSelectionResponse,
            OperatingChannelReport,
            ClientCapabilityQuery,
            ClientCapabilityReport,
            ApMetricsQuery,
            ApMetricsResponse,
            AssociatedStaLinkMetricsQuery,
            AssociatedStaLinkMetricsResponse,
            BeaconMetricsQuery,
            BeaconMetricsResponse,
            ClientSteeringRequest,
            ClientSteeringBtmReport,
            ClientAssociationControlRequest,
            SteeringCompleted,
            HigherLayerData,
            BackhaulSteeringRequest,
            BackhaulSteeringResponse,
            ChannelScanRequest,
            ChannelScanReport,
            ServicePrioritizationRequest,
            Tunnelled,
            BackhaulStaCapabilityQuery,
            BackhaulStaCapabilityReport,
            FailedConnection,
            BssConfigurationRequest,
            BssConfigurationResponse,
            BssConfigurationResult,
            EarlyApCapabilityReport,
            QosManagementNotification,
        ];
        known.into_iter().find(|t| *t as u16 == value)
    }
}

// ----------------------------------------------------------------------------
// CMDU
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmduHeader {
    pub message_version: u8,
    /// Raw message type; unknown values are kept for dispatch to report
    pub message_type: u16,
    pub message_id: u16,
    pub fragment_id: u8,
    pub last_fragment: bool,
    pub relay: bool,
}

impl CmduHeader {
    fn encode_into(&self, out: &mut Vec<u8>) {
        let mut flags = 0u8;
        if self.last_fragment {
            flags |= FLAG_LAST_FRAGMENT;
        }
        if self.relay {
            flags |= FLAG_RELAY;
        }
        out.push(self.message_version);
        out.push(0);
        out.extend_from_slice(&self.message_type.to_be_bytes());
        out.extend_from_slice(&self.message_id.to_be_bytes());
        out.push(self.fragment_id);
        out.push(flags);
    }

    fn decode(data: &[u8]) -> core::result::Result<Self, TlvError> {
        if data.len() < CMDU_HEADER_LEN {
            return Err(TlvError::Truncated {
                expected: CMDU_HEADER_LEN,
                actual: data.len(),
            });
        }
        if data[0] != 0 {
            return Err(TlvError::UnsupportedVersion { version: data[0] });
        }
        Ok(Self {
            message_version: data[0],
            message_type: u16::from_be_bytes([data[2], data[3]]),
            message_id: u16::from_be_bytes([data[4], data[5]]),
            fragment_id: data[6],
            last_fragment: data[7] & FLAG_LAST_FRAGMENT != 0,
            relay: data[7] & FLAG_RELAY != 0,
        })
    }
}

/// A complete CMDU: header plus ordered TLVs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmdu {
    pub header: CmduHeader,
    tlvs: TlvCodec,
}

impl Cmdu {
    /// Start a new single-fragment CMDU
    pub fn new(message_type: MessageType, message_id: u16) -> Self {
        Self {
            header: CmduHeader {
                message_version: 0,
                message_type: message_type as u16,
                message_id,
                fragment_id: 0,
                last_fragment: true,
                relay: false,
            },
            tlvs: TlvCodec::new(),
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u16(self.header.message_type)
    }

    pub fn message_id(&self) -> u16 {
        self.header.message_id
    }

    pub fn set_relay(&mut self, relay: bool) -> &mut Self {
        self.header.relay = relay;
        self
    }

    /// Append a typed TLV
    pub fn add<T: Tlv>(&mut self, tlv: &T) -> &mut Self {
        self.tlvs.add_entry(TlvEntry::from_tlv(tlv));
        self
    }

    /// Builder form of [`Cmdu::add`]
    pub fn with<T: Tlv>(mut self, tlv: &T) -> Self {
        self.add(tlv);
        self
    }

    pub fn add_raw(&mut self, entry: TlvEntry) -> &mut Self {
        self.tlvs.add_entry(entry);
        self
    }

    pub fn entries(&self) -> &[TlvEntry] {
        self.tlvs.entries()
    }

    pub fn has(&self, tlv_type: TlvType) -> bool {
        self.tlvs.find_entry(tlv_type as u8).is_some()
    }

    /// First TLV of type `T`, decoded
    pub fn get<T: Tlv>(&self) -> Result<Option<T>> {
        self.tlvs
            .find_entry(T::TYPE as u8)
            .map(|entry| entry.parse::<T>())
            .transpose()
    }

    /// First TLV of type `T`; missing is an error
    pub fn require<T: Tlv>(&self) -> Result<T> {
        self.get::<T>()?
            .ok_or_else(|| MeshError::missing_tlv(T::TYPE as u8))
    }

    /// Every TLV of type `T`, decoded in order
    pub fn get_all<T: Tlv>(&self) -> Result<Vec<T>> {
        self.tlvs
            .entries()
            .iter()
            .filter(|entry| entry.tlv_type == T::TYPE as u8)
            .map(|entry| entry.parse::<T>())
            .collect()
    }

    /// Serialize header, TLVs and End-of-Message
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(CMDU_HEADER_LEN + 64);
        self.header.encode_into(&mut out);
        out.extend_from_slice(&self.tlvs.encode()?);
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = CmduHeader::decode(data)?;
        let tlvs = TlvCodec::decode(&data[CMDU_HEADER_LEN..])?;
        Ok(Self { header, tlvs })
    }
}
