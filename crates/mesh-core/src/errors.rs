//! Error types for the Multi-AP wire layer
//!
//! This module contains the error types raised while decoding and encoding CMDUs,
//! TLVs, vendor-specific envelopes and WSC attribute lists, the cryptographic errors of
//! the WSC registrar, and the `MeshError` type that unifies them.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors raised by the CMDU and TLV codec
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TlvError {
    #[error("Buffer too short (expected at least {expected}, got {actual})")]
    Truncated { expected: usize, actual: usize },
    #[error("TLV 0x{tlv_type:02x} length {length} exceeds remaining {remaining} bytes")]
    LengthOverflow {
        tlv_type: u8,
        length: usize,
        remaining: usize,
    },
    #[error("TLV value too large for a 16-bit length: {length}")]
    ValueTooLarge { length: usize },
    #[error("Missing mandatory TLV 0x{tlv_type:02x}")]
    MissingTlv { tlv_type: u8 },
    #[error("Malformed TLV 0x{tlv_type:02x}: {reason}")]
    Malformed { tlv_type: u8, reason: String },
    #[error("Unsupported CMDU version {version}")]
    UnsupportedVersion { version: u8 },
    #[error("{message}")]
    Generic { message: String },
}

impl From<String> for TlvError {
    fn from(message: String) -> Self {
        TlvError::Generic { message }
    }
}

impl From<&str> for TlvError {
    fn from(message: &str) -> Self {
        TlvError::Generic {
            message: message.to_string(),
        }
    }
}

/// Errors raised by the vendor-specific (CLI/BML/CONTROL) envelope
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VendorMessageError {
    #[error("Vendor OUI {oui} is not ours")]
    ForeignOui { oui: String },
    #[error("Unknown action {action}")]
    UnknownAction { action: u8 },
    #[error("Unknown action op {action_op} for action {action}")]
    UnknownActionOp { action: u8, action_op: u8 },
    #[error("Vendor payload truncated (expected at least {expected}, got {actual})")]
    Truncated { expected: usize, actual: usize },
}

/// Errors raised while parsing or building WSC attribute lists
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WscError {
    #[error("WSC attribute list truncated at offset {offset}")]
    Truncated { offset: usize },
    #[error("Missing WSC attribute 0x{attr_type:04x}")]
    MissingAttribute { attr_type: u16 },
    #[error("Invalid WSC attribute 0x{attr_type:04x}: {reason}")]
    InvalidAttribute { attr_type: u16, reason: String },
    #[error("Unexpected WSC message type {actual} (expected {expected})")]
    UnexpectedMessageType { expected: u8, actual: u8 },
}

/// Cryptographic failures of the WSC registrar
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptographicError {
    #[error("Diffie-Hellman public key is invalid")]
    InvalidPublicKey,
    #[error("Random number generation failed")]
    RandomGenerationFailed,
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Key derivation failed")]
    KeyDerivationFailed,
    #[error("Authenticator mismatch")]
    AuthenticatorMismatch,
    #[error("Key wrap authenticator mismatch")]
    KeyWrapAuthenticatorMismatch,
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error type for the Multi-AP controller
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),

    #[error("Vendor message error: {0}")]
    Vendor(#[from] VendorMessageError),

    #[error("WSC error: {0}")]
    Wsc(#[from] WscError),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptographicError),

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// Network database lookup or consistency error
    #[error("Database error: {reason}")]
    Database { reason: String },

    /// Sending towards the broker failed
    #[error("Transport error: {reason}")]
    Transport { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl MeshError {
    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        MeshError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a database error with a reason
    pub fn database<T: Into<String>>(reason: T) -> Self {
        MeshError::Database {
            reason: reason.into(),
        }
    }

    /// Create a transport error with a reason
    pub fn transport<T: Into<String>>(reason: T) -> Self {
        MeshError::Transport {
            reason: reason.into(),
        }
    }

    /// Mandatory TLV absent from a received CMDU
    pub fn missing_tlv(tlv_type: u8) -> Self {
        MeshError::Tlv(TlvError::MissingTlv { tlv_type })
    }

    /// Create a malformed TLV error
    pub fn malformed<T: Into<String>>(tlv_type: u8, reason: T) -> Self {
        MeshError::Tlv(TlvError::Malformed {
            tlv_type,
            reason: reason.into(),
        })
    }
}

pub type Result<T> = core::result::Result<T, MeshError>;
