//! WSC M1 (enrollee to registrar)

use crate::errors::{Result, WscError};
use crate::types::MacAddress;
use crate::wsc::attributes::*;
use crate::wsc::crypto::{DH_KEY_LEN, NONCE_LEN};

/// Parsed M1 together with the exact bytes it was parsed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct M1 {
    pub mac: MacAddress,
    pub uuid_e: [u8; 16],
    pub enrollee_nonce: [u8; NONCE_LEN],
    pub public_key: Vec<u8>,
    pub auth_type_flags: u16,
    pub encr_type_flags: u16,
    pub rf_bands: u8,
    pub manufacturer: String,
    pub model_name: String,
    pub model_number: String,
    pub serial_number: String,
    pub device_name: String,
    pub os_version: u32,
    /// Multi-AP extension of the enrollee, when present
    pub multiap_bss_type: Option<u8>,
    raw: Vec<u8>,
}

impl M1 {
    pub fn parse(frame: &[u8]) -> Result<Self> {
        let attrs = AttributeList::decode(frame)?;
        let msg_type = attrs.require_u8(ATTR_MSG_TYPE)?;
        if msg_type != message_type::M1 {
            return Err(WscError::UnexpectedMessageType {
                expected: message_type::M1,
                actual: msg_type,
            }
            .into());
        }

        let public_key = attrs.require(ATTR_PUBLIC_KEY)?.to_vec();
        if public_key.is_empty() || public_key.len() > DH_KEY_LEN {
            return Err(WscError::InvalidAttribute {
                attr_type: ATTR_PUBLIC_KEY,
                reason: format!("public key length {}", public_key.len()),
            }
            .into());
        }

        let os_version = attrs
            .get(ATTR_OS_VERSION)
            .and_then(|v| <[u8; 4]>::try_from(v).ok())
            .map(|v| u32::from_be_bytes(v) & 0x7fff_ffff)
            .unwrap_or(0);

        Ok(Self {
            mac: MacAddress::new(attrs.require_array(ATTR_MAC_ADDR)?),
            uuid_e: attrs.require_array(ATTR_UUID_E)?,
            enrollee_nonce: attrs.require_array(ATTR_ENROLLEE_NONCE)?,
            public_key,
            auth_type_flags: attrs.require_u16(ATTR_AUTH_TYPE_FLAGS)?,
            encr_type_flags: attrs.require_u16(ATTR_ENCR_TYPE_FLAGS)?,
            rf_bands: attrs.require_u8(ATTR_RF_BANDS)?,
            manufacturer: attrs.get_string(ATTR_MANUFACTURER),
            model_name: attrs.get_string(ATTR_MODEL_NAME),
            model_number: attrs.get_string(ATTR_MODEL_NUMBER),
            serial_number: attrs.get_string(ATTR_SERIAL_NUMBER),
            device_name: attrs.get_string(ATTR_DEV_NAME),
            os_version,
            multiap_bss_type: attrs.get(ATTR_VENDOR_EXTENSION).and_then(parse_multiap_bss_type),
            raw: frame.to_vec(),
        })
    }

    /// The received frame, input to the authenticator
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Build an M1 frame as an enrollee would
    pub fn build(params: &M1Params) -> Vec<u8> {
        let mut attrs = AttributeList::new();
        attrs
            .push_u8(ATTR_VERSION, WSC_VERSION)
            .push_u8(ATTR_MSG_TYPE, message_type::M1)
            .push(ATTR_UUID_E, params.uuid_e.to_vec())
            .push(ATTR_MAC_ADDR, params.mac.as_bytes().to_vec())
            .push(ATTR_ENROLLEE_NONCE, params.enrollee_nonce.to_vec())
            .push(ATTR_PUBLIC_KEY, params.public_key.clone())
            .push_u16(ATTR_AUTH_TYPE_FLAGS, params.auth_type_flags)
            .push_u16(ATTR_ENCR_TYPE_FLAGS, params.encr_type_flags)
            .push_u8(ATTR_CONN_TYPE_FLAGS, 0x01)
            .push_u16(ATTR_CONFIG_METHODS, 0x0080)
            .push_u8(ATTR_WPS_STATE, 0x01)
            .push(ATTR_MANUFACTURER, params.manufacturer.as_bytes().to_vec())
            .push(ATTR_MODEL_NAME, params.model_name.as_bytes().to_vec())
            .push(ATTR_MODEL_NUMBER, b"1".to_vec())
            .push(ATTR_SERIAL_NUMBER, b"1".to_vec())
            .push(ATTR_DEV_NAME, params.device_name.as_bytes().to_vec())
            .push_u8(ATTR_RF_BANDS, params.rf_bands)
            .push_u16(ATTR_ASSOC_STATE, 0)
            .push_u16(ATTR_DEV_PASSWORD_ID, 0)
            .push_u16(ATTR_CONFIG_ERROR, 0)
            .push(ATTR_OS_VERSION, 0x8000_0001u32.to_be_bytes().to_vec())
            .push(ATTR_VENDOR_EXTENSION, wfa_vendor_extension(bss_type::BACKHAUL_STA));
        attrs.encode()
    }
}

/// Inputs of [`M1::build`]
#[derive(Debug, Clone)]
pub struct M1Params {
    pub mac: MacAddress,
    pub uuid_e: [u8; 16],
    pub enrollee_nonce: [u8; NONCE_LEN],
    pub public_key: Vec<u8>,
    pub auth_type_flags: u16,
    pub encr_type_flags: u16,
    pub rf_bands: u8,
    pub manufacturer: String,
    pub model_name: String,
    pub device_name: String,
}
