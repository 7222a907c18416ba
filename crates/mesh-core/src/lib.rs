//! Multi-AP Controller Core
//!
//! This crate provides the wire-level building blocks of the Multi-AP (EasyMesh)
//! controller: MAC/time/band types, the IEEE 1905.1 CMDU and TLV codec, the
//! vendor-specific CONTROL/CLI/BML envelope, the WSC registrar (M1 parsing, M2/M8
//! construction and its cryptography), wireless channel arithmetic and the serde
//! configuration model.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod channel;
pub mod config;
pub mod errors;
pub mod protocol;
pub mod types;
pub mod wsc;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{BssInfoConf, ControllerConfig, FeatureSettings};
pub use errors::{MeshError, Result};
pub use protocol::{Cmdu, MessageType, TlvType, VendorMessage};
pub use types::{Bandwidth, FreqBand, MacAddress, SystemTimeSource, TimeSource, Timestamp};
