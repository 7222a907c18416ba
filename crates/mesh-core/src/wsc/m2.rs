//! WSC M2/M8 (registrar to enrollee)
//!
//! Both messages carry the same encrypted ConfigData: credentials for one BSS plus
//! the Multi-AP bss_type bits. A ConfigData with only the TEARDOWN bit tells the
//! agent that nothing is configured for the radio.

use rand_core::{CryptoRng, RngCore};

use crate::errors::{CryptographicError, Result, WscError};
use crate::types::MacAddress;
use crate::wsc::attributes::*;
use crate::wsc::crypto::{
    self, compute_authenticator, DhKeyPair, WscKeys, AUTHENTICATOR_LEN, NONCE_LEN,
};
use crate::wsc::m1::M1;

/// Authenticator attribute: type + length + 8 bytes
const AUTHENTICATOR_ATTR_LEN: usize = 4 + AUTHENTICATOR_LEN;

/// Credentials and role of one BSS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigData {
    pub ssid: String,
    pub authentication_type: AuthenticationType,
    pub encryption_type: EncryptionType,
    pub network_key: String,
    /// By convention the enrollee's own MAC, the real BSSID is not known yet
    pub bssid: MacAddress,
    pub bss_type: u8,
}

impl ConfigData {
    /// "No BSS configured" marker
    pub fn teardown(bssid: MacAddress) -> Self {
        Self {
            ssid: String::new(),
            authentication_type: AuthenticationType::Open,
            encryption_type: EncryptionType::None,
            network_key: String::new(),
            bssid,
            bss_type: bss_type::TEARDOWN,
        }
    }

    pub fn is_teardown(&self) -> bool {
        self.bss_type & bss_type::TEARDOWN != 0
    }

    fn to_attributes(&self) -> AttributeList {
        let mut attrs = AttributeList::new();
        if !self.is_teardown() {
            attrs.push(ATTR_SSID, self.ssid.as_bytes().to_vec());
        }
        attrs
            .push_u16(ATTR_AUTH_TYPE, self.authentication_type.bits())
            .push_u16(ATTR_ENCR_TYPE, self.encryption_type.bits());
        if !self.is_teardown() {
            attrs.push(ATTR_NETWORK_KEY, self.network_key.as_bytes().to_vec());
        }
        attrs
            .push(ATTR_MAC_ADDR, self.bssid.as_bytes().to_vec())
            .push(ATTR_VENDOR_EXTENSION, wfa_vendor_extension(self.bss_type));
        attrs
    }

    fn from_attributes(attrs: &AttributeList) -> Result<Self> {
        let auth_bits = attrs.require_u16(ATTR_AUTH_TYPE)?;
        let encr_bits = attrs.require_u16(ATTR_ENCR_TYPE)?;
        let ext = attrs.require(ATTR_VENDOR_EXTENSION)?;
        Ok(Self {
            ssid: attrs.get_string(ATTR_SSID),
            authentication_type: AuthenticationType::from_bits(auth_bits).ok_or_else(|| {
                WscError::InvalidAttribute {
                    attr_type: ATTR_AUTH_TYPE,
                    reason: format!("unknown authentication 0x{auth_bits:04x}"),
                }
            })?,
            encryption_type: EncryptionType::from_bits(encr_bits).ok_or_else(|| {
                WscError::InvalidAttribute {
                    attr_type: ATTR_ENCR_TYPE,
                    reason: format!("unknown encryption 0x{encr_bits:04x}"),
                }
            })?,
            network_key: attrs.get_string(ATTR_NETWORK_KEY),
            bssid: MacAddress::new(attrs.require_array(ATTR_MAC_ADDR)?),
            bss_type: parse_multiap_bss_type(ext).ok_or_else(|| WscError::InvalidAttribute {
                attr_type: ATTR_VENDOR_EXTENSION,
                reason: "missing Multi-AP subelement".to_string(),
            })?,
        })
    }
}

/// Registrar identity advertised in M2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrarInfo {
    pub uuid_r: [u8; 16],
    pub manufacturer: String,
    pub model_name: String,
    pub model_number: String,
    pub serial_number: String,
    pub device_name: String,
}

impl Default for RegistrarInfo {
    fn default() -> Self {
        Self {
            uuid_r: [0u8; 16],
            manufacturer: "prplMesh".to_string(),
            model_name: "Ubuntu".to_string(),
            model_number: "18.04".to_string(),
            serial_number: "prpl12345".to_string(),
            device_name: "prplmesh-controller".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrarMessageKind {
    /// Fronthaul/backhaul BSS configuration
    M2,
    /// Backhaul station reconfiguration
    M8,
}

impl RegistrarMessageKind {
    fn message_type(self) -> u8 {
        match self {
            RegistrarMessageKind::M2 => message_type::M2,
            RegistrarMessageKind::M8 => message_type::M8,
        }
    }
}

/// Build an M2 or M8 for `config` in response to `m1`
///
/// A fresh registrar nonce and DH key pair are generated for every message. Any
/// cryptographic failure aborts the build; no partial frame is returned.
pub fn build_registrar_message<R: RngCore + CryptoRng>(
    kind: RegistrarMessageKind,
    m1: &M1,
    config: &ConfigData,
    registrar: &RegistrarInfo,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let mut registrar_nonce = [0u8; NONCE_LEN];
    rng.try_fill_bytes(&mut registrar_nonce)
        .map_err(|_| CryptographicError::RandomGenerationFailed)?;
    let keypair = DhKeyPair::generate(rng)?;
    let shared = keypair.shared_secret(&m1.public_key)?;
    let keys = WscKeys::derive(&shared, &m1.enrollee_nonce, &m1.mac, &registrar_nonce)?;

    let mut settings = config.to_attributes();
    let kwa = crypto::key_wrap_authenticator(&keys.auth_key, &settings.encode())?;
    settings.push(ATTR_KEY_WRAP_AUTH, kwa.to_vec());
    let encrypted = crypto::encrypt_settings(&keys.key_wrap_key, &settings.encode(), rng)?;

    let mut attrs = AttributeList::new();
    attrs
        .push_u8(ATTR_VERSION, WSC_VERSION)
        .push_u8(ATTR_MSG_TYPE, kind.message_type())
        .push(ATTR_ENROLLEE_NONCE, m1.enrollee_nonce.to_vec())
        .push(ATTR_REGISTRAR_NONCE, registrar_nonce.to_vec())
        .push(ATTR_PUBLIC_KEY, keypair.public_key().to_vec());
    if kind == RegistrarMessageKind::M2 {
        attrs
            .push(ATTR_UUID_R, registrar.uuid_r.to_vec())
            .push_u16(ATTR_AUTH_TYPE_FLAGS, m1.auth_type_flags)
            .push_u16(ATTR_ENCR_TYPE_FLAGS, m1.encr_type_flags)
            .push_u8(ATTR_CONN_TYPE_FLAGS, 0x01)
            .push_u16(ATTR_CONFIG_METHODS, 0x0080)
            .push(ATTR_MANUFACTURER, registrar.manufacturer.as_bytes().to_vec())
            .push(ATTR_MODEL_NAME, registrar.model_name.as_bytes().to_vec())
            .push(ATTR_MODEL_NUMBER, registrar.model_number.as_bytes().to_vec())
            .push(ATTR_SERIAL_NUMBER, registrar.serial_number.as_bytes().to_vec())
            .push(ATTR_DEV_NAME, registrar.device_name.as_bytes().to_vec())
            .push_u8(ATTR_RF_BANDS, m1.rf_bands)
            .push_u16(ATTR_ASSOC_STATE, 0)
            .push_u16(ATTR_CONFIG_ERROR, 0)
            .push_u16(ATTR_DEV_PASSWORD_ID, 0)
            .push(ATTR_OS_VERSION, 0x8000_0001u32.to_be_bytes().to_vec());
    }
    attrs
        .push(ATTR_VENDOR_EXTENSION, wfa_vendor_extension(0))
        .push(ATTR_ENCR_SETTINGS, encrypted);

    let mut frame = attrs.encode();
    let authenticator = compute_authenticator(&keys.auth_key, m1.raw(), &frame)?;
    attrs.push(ATTR_AUTHENTICATOR, authenticator.to_vec());
    frame = attrs.encode();
    Ok(frame)
}

/// Enrollee side: verify the authenticator and KWA of an M2/M8 and recover ConfigData
pub fn open_registrar_message(
    enrollee_keypair: &DhKeyPair,
    m1_frame: &[u8],
    frame: &[u8],
) -> Result<ConfigData> {
    let m1 = M1::parse(m1_frame)?;
    let attrs = AttributeList::decode(frame)?;
    let registrar_nonce: [u8; NONCE_LEN] = attrs.require_array(ATTR_REGISTRAR_NONCE)?;
    let shared = enrollee_keypair.shared_secret(attrs.require(ATTR_PUBLIC_KEY)?)?;
    let keys = WscKeys::derive(&shared, &m1.enrollee_nonce, &m1.mac, &registrar_nonce)?;

    let received: [u8; AUTHENTICATOR_LEN] = attrs.require_array(ATTR_AUTHENTICATOR)?;
    if frame.len() < AUTHENTICATOR_ATTR_LEN {
        return Err(WscError::Truncated { offset: frame.len() }.into());
    }
    let covered = &frame[..frame.len() - AUTHENTICATOR_ATTR_LEN];
    if compute_authenticator(&keys.auth_key, m1_frame, covered)? != received {
        return Err(CryptographicError::AuthenticatorMismatch.into());
    }

    let plaintext = crypto::decrypt_settings(&keys.key_wrap_key, attrs.require(ATTR_ENCR_SETTINGS)?)?;
    let settings = AttributeList::decode(&plaintext)?;
    let kwa = settings.require(ATTR_KEY_WRAP_AUTH)?;
    let kwa_attr_len = 4 + kwa.len();
    if plaintext.len() < kwa_attr_len {
        return Err(WscError::Truncated { offset: plaintext.len() }.into());
    }
    let expected = crypto::key_wrap_authenticator(
        &keys.auth_key,
        &plaintext[..plaintext.len() - kwa_attr_len],
    )?;
    if expected[..] != *kwa {
        return Err(CryptographicError::KeyWrapAuthenticatorMismatch.into());
    }

    ConfigData::from_attributes(&settings)
}
