//! Core types for the Multi-AP controller
//!
//! This module defines the fundamental identifiers and value types used throughout the
//! wire layer and the controller engine, using newtype patterns for type safety.

use core::fmt;
use core::ops::{Add, Deref, Sub};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::errors::MeshError;

// ----------------------------------------------------------------------------
// MAC Address
// ----------------------------------------------------------------------------

/// 48-bit IEEE MAC address (AL-MAC, RUID, BSSID or station MAC)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Create a new address from 6 bytes
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Create an address from the first 6 bytes of a slice, zero padded
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut mac = [0u8; 6];
        let len = core::cmp::min(bytes.len(), 6);
        mac[..len].copy_from_slice(&bytes[..len]);
        Self(mac)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 6]
    }

    /// All-zero address, never a valid source or destination
    pub const ZERO: Self = Self([0u8; 6]);

    /// IEEE 1905.1 multicast destination
    pub const MULTICAST_1905: Self = Self([0x01, 0x80, 0xc2, 0x00, 0x00, 0x13]);

    /// Copy of this address with the locally administered bit set and the
    /// fifth octet incremented, used for synthesized backhaul interfaces.
    pub fn derived_backhaul(&self) -> Self {
        let mut bytes = self.0;
        bytes[0] |= 0x02;
        bytes[4] = bytes[4].wrapping_add(1);
        Self(bytes)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddress {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let bytes = hex::decode(&clean)
            .map_err(|_| MeshError::config_error(format!("invalid hex in MAC address {s}")))?;
        if bytes.len() != 6 {
            return Err(MeshError::config_error(format!(
                "MAC address must be 6 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self::from_bytes(&bytes))
    }
}

impl Deref for MacAddress {
    type Target = [u8; 6];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(other))
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Get duration since another timestamp
    pub fn duration_since(&self, other: Self) -> core::time::Duration {
        core::time::Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Source of "now" for the scheduler and the tasks
///
/// The controller never reads the clock directly so tests can drive time
/// deterministically.
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Standard library implementation of TimeSource
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

// ----------------------------------------------------------------------------
// Radio Bands
// ----------------------------------------------------------------------------

/// Frequency band a radio operates in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FreqBand {
    Band24G,
    Band5G,
    Band6G,
    Unknown,
}

impl FreqBand {
    /// Decode the 1905.1 supported/searched frequency band value
    pub fn from_ieee1905(value: u8) -> Self {
        match value {
            0x00 => FreqBand::Band24G,
            0x01 => FreqBand::Band5G,
            0x03 => FreqBand::Band6G,
            _ => FreqBand::Unknown,
        }
    }

    pub fn to_ieee1905(self) -> u8 {
        match self {
            FreqBand::Band24G => 0x00,
            FreqBand::Band5G => 0x01,
            FreqBand::Band6G => 0x03,
            FreqBand::Unknown => 0xff,
        }
    }
}

impl fmt::Display for FreqBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FreqBand::Band24G => "2.4GHz",
            FreqBand::Band5G => "5GHz",
            FreqBand::Band6G => "6GHz",
            FreqBand::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Channel bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Bandwidth {
    Bw20,
    Bw40,
    Bw80,
    Bw80Plus80,
    Bw160,
}

impl Bandwidth {
    /// Wire code used by the vendor-specific sub-protocol
    pub fn code(self) -> u8 {
        match self {
            Bandwidth::Bw20 => 0,
            Bandwidth::Bw40 => 1,
            Bandwidth::Bw80 => 2,
            Bandwidth::Bw80Plus80 => 3,
            Bandwidth::Bw160 => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Bandwidth::Bw20),
            1 => Some(Bandwidth::Bw40),
            2 => Some(Bandwidth::Bw80),
            3 => Some(Bandwidth::Bw80Plus80),
            4 => Some(Bandwidth::Bw160),
            _ => None,
        }
    }

    pub fn mhz(self) -> u16 {
        match self {
            Bandwidth::Bw20 => 20,
            Bandwidth::Bw40 => 40,
            Bandwidth::Bw80 | Bandwidth::Bw80Plus80 => 80,
            Bandwidth::Bw160 => 160,
        }
    }

    /// Number of 20 MHz channels covered by this bandwidth
    pub fn count_20mhz(self) -> usize {
        match self {
            Bandwidth::Bw20 => 1,
            Bandwidth::Bw40 => 2,
            Bandwidth::Bw80 => 4,
            Bandwidth::Bw80Plus80 | Bandwidth::Bw160 => 8,
        }
    }
}

impl Default for Bandwidth {
    fn default() -> Self {
        Bandwidth::Bw20
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bandwidth::Bw80Plus80 => f.write_str("80+80MHz"),
            other => write!(f, "{}MHz", other.mhz()),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_address_display_and_parse() {
        let mac: MacAddress = "aa:bb:cc:dd:ee:01".parse().unwrap();
        assert_eq!(mac.as_bytes(), &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:01");

        assert!("aa:bb:cc".parse::<MacAddress>().is_err());
        assert!("zz:bb:cc:dd:ee:01".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_derived_backhaul_mac() {
        let bridge = MacAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let backhaul = bridge.derived_backhaul();
        assert_eq!(backhaul.as_bytes(), &[0x02, 0x11, 0x22, 0x33, 0x45, 0x55]);
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t = Timestamp::new(1_000);
        assert_eq!((t + 500) - t, 500);
        assert_eq!(t - (t + 500), 0);
    }

    #[test]
    fn test_bandwidth_codes() {
        for bw in [
            Bandwidth::Bw20,
            Bandwidth::Bw40,
            Bandwidth::Bw80,
            Bandwidth::Bw80Plus80,
            Bandwidth::Bw160,
        ] {
            assert_eq!(Bandwidth::from_code(bw.code()), Some(bw));
        }
        assert_eq!(Bandwidth::Bw160.count_20mhz(), 8);
    }
}
