//! WSC attribute codec
//!
//! WSC frames are flat lists of `type (u16) | length (u16) | value` attributes in
//! network byte order.

use serde::{Deserialize, Serialize};

use crate::errors::WscError;

pub const ATTR_ASSOC_STATE: u16 = 0x1002;
pub const ATTR_AUTH_TYPE: u16 = 0x1003;
pub const ATTR_AUTH_TYPE_FLAGS: u16 = 0x1004;
pub const ATTR_AUTHENTICATOR: u16 = 0x1005;
pub const ATTR_CONFIG_METHODS: u16 = 0x1008;
pub const ATTR_CONFIG_ERROR: u16 = 0x1009;
pub const ATTR_CONN_TYPE_FLAGS: u16 = 0x100d;
pub const ATTR_ENCR_TYPE: u16 = 0x100f;
pub const ATTR_ENCR_TYPE_FLAGS: u16 = 0x1010;
pub const ATTR_DEV_NAME: u16 = 0x1011;
pub const ATTR_DEV_PASSWORD_ID: u16 = 0x1012;
pub const ATTR_ENCR_SETTINGS: u16 = 0x1018;
pub const ATTR_ENROLLEE_NONCE: u16 = 0x101a;
pub const ATTR_KEY_WRAP_AUTH: u16 = 0x101e;
pub const ATTR_MAC_ADDR: u16 = 0x1020;
pub const ATTR_MANUFACTURER: u16 = 0x1021;
pub const ATTR_MSG_TYPE: u16 = 0x1022;
pub const ATTR_MODEL_NAME: u16 = 0x1023;
pub const ATTR_MODEL_NUMBER: u16 = 0x1024;
pub const ATTR_NETWORK_KEY: u16 = 0x1027;
pub const ATTR_OS_VERSION: u16 = 0x102d;
pub const ATTR_PUBLIC_KEY: u16 = 0x1032;
pub const ATTR_REGISTRAR_NONCE: u16 = 0x1039;
pub const ATTR_RF_BANDS: u16 = 0x103c;
pub const ATTR_SERIAL_NUMBER: u16 = 0x1042;
pub const ATTR_WPS_STATE: u16 = 0x1044;
pub const ATTR_SSID: u16 = 0x1045;
pub const ATTR_UUID_E: u16 = 0x1047;
pub const ATTR_UUID_R: u16 = 0x1048;
pub const ATTR_VENDOR_EXTENSION: u16 = 0x1049;
pub const ATTR_VERSION: u16 = 0x104a;
pub const ATTR_PRIMARY_DEV_TYPE: u16 = 0x1054;

/// WSC message type values
pub mod message_type {
    pub const M1: u8 = 0x04;
    pub const M2: u8 = 0x05;
    pub const M8: u8 = 0x0c;
}

/// RF band bits
pub mod rf_band {
    pub const BAND_2_4GHZ: u8 = 0x01;
    pub const BAND_5GHZ: u8 = 0x02;
    pub const BAND_60GHZ: u8 = 0x04;
    pub const BAND_6GHZ: u8 = 0x08;
}

/// Multi-AP extension subelement bits describing the provisioned BSS
pub mod bss_type {
    pub const PROFILE2_BACKHAUL_STA_ASSOC_DISALLOWED: u8 = 0x04;
    pub const PROFILE1_BACKHAUL_STA_ASSOC_DISALLOWED: u8 = 0x08;
    pub const TEARDOWN: u8 = 0x10;
    pub const FRONTHAUL_BSS: u8 = 0x20;
    pub const BACKHAUL_BSS: u8 = 0x40;
    pub const BACKHAUL_STA: u8 = 0x80;
}

/// Wi-Fi Alliance vendor extension
pub const WFA_OUI: [u8; 3] = [0x00, 0x37, 0x2a];
pub const WFA_ELEM_VERSION2: u8 = 0x00;
pub const WFA_ELEM_MULTIAP: u8 = 0x06;
pub const WSC_VERSION2: u8 = 0x20;
pub const WSC_VERSION: u8 = 0x10;

/// Authentication type of a provisioned BSS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticationType {
    Open,
    WpaPsk,
    Wpa2Psk,
    Sae,
    Wpa2PskSae,
}

impl AuthenticationType {
    pub fn bits(self) -> u16 {
        match self {
            AuthenticationType::Open => 0x0001,
            AuthenticationType::WpaPsk => 0x0002,
            AuthenticationType::Wpa2Psk => 0x0020,
            AuthenticationType::Sae => 0x0040,
            AuthenticationType::Wpa2PskSae => 0x0060,
        }
    }

    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            0x0001 => Some(AuthenticationType::Open),
            0x0002 => Some(AuthenticationType::WpaPsk),
            0x0020 => Some(AuthenticationType::Wpa2Psk),
            0x0040 => Some(AuthenticationType::Sae),
            0x0060 => Some(AuthenticationType::Wpa2PskSae),
            _ => None,
        }
    }
}

/// Encryption type of a provisioned BSS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionType {
    None,
    Tkip,
    Aes,
}

impl EncryptionType {
    pub fn bits(self) -> u16 {
        match self {
            EncryptionType::None => 0x0001,
            EncryptionType::Tkip => 0x0004,
            EncryptionType::Aes => 0x0008,
        }
    }

    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            0x0001 => Some(EncryptionType::None),
            0x0004 => Some(EncryptionType::Tkip),
            0x0008 => Some(EncryptionType::Aes),
            _ => None,
        }
    }
}

/// A single WSC attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attr_type: u16,
    pub value: Vec<u8>,
}

/// Ordered list of WSC attributes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeList {
    attrs: Vec<Attribute>,
}

impl AttributeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, attr_type: u16, value: impl Into<Vec<u8>>) -> &mut Self {
        self.attrs.push(Attribute {
            attr_type,
            value: value.into(),
        });
        self
    }

    pub fn push_u8(&mut self, attr_type: u16, value: u8) -> &mut Self {
        self.push(attr_type, vec![value])
    }

    pub fn push_u16(&mut self, attr_type: u16, value: u16) -> &mut Self {
        self.push(attr_type, value.to_be_bytes().to_vec())
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attrs
    }

    pub fn get(&self, attr_type: u16) -> Option<&[u8]> {
        self.attrs
            .iter()
            .find(|attr| attr.attr_type == attr_type)
            .map(|attr| attr.value.as_slice())
    }

    pub fn require(&self, attr_type: u16) -> Result<&[u8], WscError> {
        self.get(attr_type)
            .ok_or(WscError::MissingAttribute { attr_type })
    }

    pub fn require_u8(&self, attr_type: u16) -> Result<u8, WscError> {
        match self.require(attr_type)? {
            [value] => Ok(*value),
            _ => Err(WscError::InvalidAttribute {
                attr_type,
                reason: "expected 1 byte".to_string(),
            }),
        }
    }

    pub fn require_u16(&self, attr_type: u16) -> Result<u16, WscError> {
        match self.require(attr_type)? {
            [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
            _ => Err(WscError::InvalidAttribute {
                attr_type,
                reason: "expected 2 bytes".to_string(),
            }),
        }
    }

    pub fn require_array<const N: usize>(&self, attr_type: u16) -> Result<[u8; N], WscError> {
        let value = self.require(attr_type)?;
        value.try_into().map_err(|_| WscError::InvalidAttribute {
            attr_type,
            reason: format!("expected {N} bytes, got {}", value.len()),
        })
    }

    pub fn get_string(&self, attr_type: u16) -> String {
        self.get(attr_type)
            .map(|value| String::from_utf8_lossy(value).into_owned())
            .unwrap_or_default()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for attr in &self.attrs {
            out.extend_from_slice(&attr.attr_type.to_be_bytes());
            out.extend_from_slice(&(attr.value.len() as u16).to_be_bytes());
            out.extend_from_slice(&attr.value);
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, WscError> {
        let mut list = AttributeList::new();
        let mut offset = 0;
        while offset < data.len() {
            if data.len() - offset < 4 {
                return Err(WscError::Truncated { offset });
            }
            let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            let start = offset + 4;
            if data.len() - start < len {
                return Err(WscError::Truncated { offset });
            }
            list.push(attr_type, data[start..start + len].to_vec());
            offset = start + len;
        }
        Ok(list)
    }
}

/// WFA vendor extension with the version2 and Multi-AP subelements
pub fn wfa_vendor_extension(multiap_bss_type: u8) -> Vec<u8> {
    let mut ext = WFA_OUI.to_vec();
    ext.extend_from_slice(&[WFA_ELEM_VERSION2, 1, WSC_VERSION2]);
    ext.extend_from_slice(&[WFA_ELEM_MULTIAP, 1, multiap_bss_type]);
    ext
}

/// Multi-AP subelement value of a WFA vendor extension, if present
pub fn parse_multiap_bss_type(vendor_ext: &[u8]) -> Option<u8> {
    let body = vendor_ext.strip_prefix(&WFA_OUI[..])?;
    let mut offset = 0;
    while offset + 2 <= body.len() {
        let id = body[offset];
        let len = body[offset + 1] as usize;
        let value = body.get(offset + 2..offset + 2 + len)?;
        if id == WFA_ELEM_MULTIAP && len == 1 {
            return Some(value[0]);
        }
        offset += 2 + len;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_list_round_trip() {
        let mut list = AttributeList::new();
        list.push_u8(ATTR_MSG_TYPE, message_type::M2)
            .push_u16(ATTR_AUTH_TYPE, AuthenticationType::Wpa2Psk.bits())
            .push(ATTR_SSID, b"home".to_vec());
        let bytes = list.encode();
        assert_eq!(&bytes[..5], &[0x10, 0x22, 0x00, 0x01, 0x05]);

        let decoded = AttributeList::decode(&bytes).unwrap();
        assert_eq!(decoded.require_u8(ATTR_MSG_TYPE).unwrap(), message_type::M2);
        assert_eq!(decoded.require_u16(ATTR_AUTH_TYPE).unwrap(), 0x0020);
        assert_eq!(decoded.get_string(ATTR_SSID), "home");
        assert!(decoded.require(ATTR_NETWORK_KEY).is_err());
    }

    #[test]
    fn test_truncated_attribute() {
        assert!(AttributeList::decode(&[0x10, 0x22, 0x00, 0x05, 0x01]).is_err());
        assert!(AttributeList::decode(&[0x10]).is_err());
    }

    #[test]
    fn test_multiap_extension() {
        let ext = wfa_vendor_extension(bss_type::TEARDOWN);
        assert_eq!(parse_multiap_bss_type(&ext), Some(bss_type::TEARDOWN));
        assert_eq!(parse_multiap_bss_type(&[0x00, 0x17, 0x35]), None);
    }
}
