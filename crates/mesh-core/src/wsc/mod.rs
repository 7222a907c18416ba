//! Wi-Fi Simple Configuration registrar
//!
//! - [`attributes`]: the WSC attribute list codec and constants
//! - [`crypto`]: DH group 5, key derivation, KWA, AES-CBC and the authenticator
//! - [`m1`]: enrollee message parser
//! - [`m2`]: M2/M8 construction and the enrollee-side verification used in tests

pub mod attributes;
pub mod crypto;
pub mod m1;
pub mod m2;

pub use attributes::{bss_type, AuthenticationType, EncryptionType};
pub use crypto::{DhKeyPair, WscKeys};
pub use m1::{M1Params, M1};
pub use m2::{
    build_registrar_message, open_registrar_message, ConfigData, RegistrarInfo,
    RegistrarMessageKind,
};
