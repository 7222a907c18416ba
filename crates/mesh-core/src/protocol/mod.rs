//! Multi-AP wire protocol
//!
//! This module contains the binary message layer shared by the controller and its tests:
//! - `wire`: bounds-checked big-endian reader and writer
//! - `tlv`: TLV codec and the typed TLV catalogue
//! - `cmdu`: CMDU header and framing
//! - `vendor`: vendor-specific envelope with the CONTROL, CLI and BML sub-protocols

pub mod cmdu;
pub mod tlv;
pub mod vendor;
pub mod wire;

// Re-export framing types
pub use cmdu::{Cmdu, CmduHeader, MessageType, CMDU_HEADER_LEN};

// Re-export TLV codec types
pub use tlv::{Tlv, TlvCodec, TlvEntry, TlvType};

// Re-export vendor envelope types
pub use vendor::{
    Action, BmlMessage, CliMessage, ControlMessage, VendorBody, VendorMessage, INTEL_OUI,
};
