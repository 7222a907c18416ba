//! Controller Configuration
//!
//! Everything the controller reads from its configuration file: the BSS credentials
//! handed out during WSC, the feature toggles that BML can flip at runtime, the
//! fail-safe channel, health-check and persistent database timers, and the monitoring
//! thresholds forwarded to same-vendor agents.

use crate::errors::{MeshError, Result};
use crate::types::Bandwidth;
use crate::wsc::attributes::{AuthenticationType, EncryptionType};

// ----------------------------------------------------------------------------
// BSS Configuration
// ----------------------------------------------------------------------------

/// One SSID the controller provisions on matching radios
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BssInfoConf {
    /// Network name, at most 32 bytes
    pub ssid: String,
    /// Passphrase (empty for open networks)
    pub network_key: String,
    pub authentication_type: AuthenticationType,
    pub encryption_type: EncryptionType,
    /// Operating classes this BSS may be instantiated on
    pub operating_classes: Vec<u8>,
    /// Serves regular clients
    pub fronthaul: bool,
    /// Serves backhaul stations of repeaters
    pub backhaul: bool,
    /// Refuse Profile-1 backhaul stations on this BSS
    pub profile1_backhaul_sta_association_disallowed: bool,
    /// Refuse Profile-2 backhaul stations on this BSS
    pub profile2_backhaul_sta_association_disallowed: bool,
}

impl Default for BssInfoConf {
    fn default() -> Self {
        Self {
            ssid: "prplMesh".to_string(),
            network_key: "prplmesh_pass".to_string(),
            authentication_type: AuthenticationType::Wpa2Psk,
            encryption_type: EncryptionType::Aes,
            operating_classes: vec![81, 83, 84, 115, 116, 117, 118, 119, 120, 121, 122, 123, 124, 125, 126, 127, 128, 129, 130],
            fronthaul: true,
            backhaul: false,
            profile1_backhaul_sta_association_disallowed: false,
            profile2_backhaul_sta_association_disallowed: false,
        }
    }
}

impl BssInfoConf {
    fn validate(&self) -> Result<()> {
        if self.ssid.is_empty() || self.ssid.len() > 32 {
            return Err(MeshError::config_error(format!(
                "SSID '{}' must be 1 to 32 bytes",
                self.ssid
            )));
        }
        if self.authentication_type != AuthenticationType::Open
            && !(8..=64).contains(&self.network_key.len())
        {
            return Err(MeshError::config_error(format!(
                "network key of '{}' must be 8 to 64 characters",
                self.ssid
            )));
        }
        if !self.fronthaul && !self.backhaul {
            return Err(MeshError::config_error(format!(
                "BSS '{}' is neither fronthaul nor backhaul",
                self.ssid
            )));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Feature Settings
// ----------------------------------------------------------------------------

/// Feature toggles, mutable at runtime through BML
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FeatureSettings {
    /// Steer clients towards the best path
    pub client_optimal_path_roaming: bool,
    /// Steer dual-band clients between bands
    pub client_band_steering: bool,
    /// Use 802.11k beacon measurements when the client supports them
    pub client_11k_roaming: bool,
    /// Roam repeater backhauls
    pub ire_roaming: bool,
    pub load_balancing: bool,
    /// Move clients away from a radio while it performs CAC on a DFS channel
    pub dfs_reentry: bool,
    pub certification_mode: bool,
    /// Never hand out backhaul BSSes to repeaters of repeaters
    pub daisy_chaining_disabled: bool,
    /// Ask agents to monitor new clients on their VAPs
    pub monitor_on_vaps: bool,
    pub health_check: bool,
    pub persistent_db: bool,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            client_optimal_path_roaming: true,
            client_band_steering: true,
            client_11k_roaming: true,
            ire_roaming: true,
            load_balancing: false,
            dfs_reentry: true,
            certification_mode: false,
            daisy_chaining_disabled: false,
            monitor_on_vaps: true,
            health_check: true,
            persistent_db: false,
        }
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Fail-safe channel and restricted channel list
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Frequency a 5 GHz radio falls back to while its channel is unusable
    pub fail_safe_5g_frequency: u16,
    pub fail_safe_5g_bandwidth: Bandwidth,
    pub fail_safe_5g_vht_frequency: u16,
    /// Channels no radio may select; overrides per-radio lists when non-empty
    pub global_restricted_channels: Vec<u8>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            fail_safe_5g_frequency: 5180,   // channel 36
            fail_safe_5g_bandwidth: Bandwidth::Bw80,
            fail_safe_5g_vht_frequency: 5210, // 36-48 block center
            global_restricted_channels: Vec::new(),
        }
    }
}

// ----------------------------------------------------------------------------
// Health Check Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Delay before the first pass after start-up
    pub starting_delay_ms: u64,
    /// Interval between passes
    pub interval_ms: u64,
    /// A repeater silent for this long is declared dead
    pub ire_last_seen_timeout_ms: u64,
    /// A client silent for this long is queried with ARP
    pub client_last_seen_timeout_ms: u64,
    /// Time to wait for ARP responses
    pub arp_query_timeout_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            starting_delay_ms: 20_000,            // let agents finish joining
            interval_ms: 10_000,                  // 10 second passes
            ire_last_seen_timeout_ms: 300_000,    // 5 minutes
            client_last_seen_timeout_ms: 180_000, // 3 minutes
            arp_query_timeout_ms: 3_000,
        }
    }
}

// ----------------------------------------------------------------------------
// Monitoring Thresholds
// ----------------------------------------------------------------------------

/// Thresholds forwarded to same-vendor agents in the slave joined response
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MonitorThresholds {
    pub total_channel_load_notification_lo_th_percent: u8,
    pub total_channel_load_notification_hi_th_percent: u8,
    pub total_channel_load_notification_delta_th_percent: u8,
    pub min_active_clients: u8,
    pub active_client_th: u8,
    pub client_load_notification_delta_th_percent: u8,
    pub rx_rssi_notification_threshold_dbm: i8,
    pub rx_rssi_notification_delta_db: u8,
    pub ap_idle_threshold_bytes: u32,
    pub ap_active_threshold_bytes: u32,
    pub ap_idle_stable_time_sec: u16,
    pub disable_initiative_arp: bool,
    pub slave_keep_alive_retries: u8,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            total_channel_load_notification_lo_th_percent: 10,
            total_channel_load_notification_hi_th_percent: 90,
            total_channel_load_notification_delta_th_percent: 10,
            min_active_clients: 2,
            active_client_th: 10,
            client_load_notification_delta_th_percent: 10,
            rx_rssi_notification_threshold_dbm: -60,
            rx_rssi_notification_delta_db: 8,
            ap_idle_threshold_bytes: 100_000,  // bytes per measurement period
            ap_active_threshold_bytes: 500_000,
            ap_idle_stable_time_sec: 15,
            disable_initiative_arp: false,
            slave_keep_alive_retries: 3,
        }
    }
}

// ----------------------------------------------------------------------------
// Persistent Database Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PersistentDbConfig {
    /// Interval of the aging operation
    pub aging_interval_sec: u64,
    /// Interval of the commit operation
    pub commit_interval_sec: u64,
    /// Client entries older than this are dropped by aging
    pub max_client_age_sec: u64,
    /// Maximum number of persisted clients
    pub max_clients: usize,
    /// Snapshot file written by the commit operation
    pub path: Option<String>,
}

impl Default for PersistentDbConfig {
    fn default() -> Self {
        Self {
            aging_interval_sec: 3600,           // hourly
            commit_interval_sec: 10,
            max_client_age_sec: 86400 * 30,     // 30 days
            max_clients: 256,
            path: None,
        }
    }
}

// ----------------------------------------------------------------------------
// Top-level Configuration
// ----------------------------------------------------------------------------

/// Complete controller configuration
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Controller version reported to same-vendor agents
    pub version: String,
    pub bss_info: Vec<BssInfoConf>,
    pub settings: FeatureSettings,
    pub channel: ChannelConfig,
    pub health_check: HealthCheckConfig,
    pub monitor: MonitorThresholds,
    pub persistent_db: PersistentDbConfig,
    /// Period of the task scheduler tick
    pub tasks_tick_ms: u64,
    /// Period of the periodic operations tick
    pub operations_tick_ms: u64,
    /// Run without a local agent on the gateway
    pub controller_only: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let backhaul = BssInfoConf {
            ssid: "prplMesh-backhaul".to_string(),
            fronthaul: false,
            backhaul: true,
            ..BssInfoConf::default()
        };
        Self {
            version: "2.2.0".to_string(),
            bss_info: vec![BssInfoConf::default(), backhaul],
            settings: FeatureSettings::default(),
            channel: ChannelConfig::default(),
            health_check: HealthCheckConfig::default(),
            monitor: MonitorThresholds::default(),
            persistent_db: PersistentDbConfig::default(),
            tasks_tick_ms: 250,      // scheduler tick
            operations_tick_ms: 1000, // periodic operations tick
            controller_only: true,
        }
    }
}

impl ControllerConfig {
    /// Configuration for EasyMesh certification runs: no proprietary optimizations
    pub fn certification() -> Self {
        Self {
            settings: FeatureSettings {
                client_optimal_path_roaming: false,
                client_band_steering: false,
                client_11k_roaming: false,
                ire_roaming: false,
                load_balancing: false,
                dfs_reentry: false,
                certification_mode: true,
                health_check: false,
                ..FeatureSettings::default()
            },
            bss_info: Vec::new(),
            ..Self::default()
        }
    }

    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            health_check: HealthCheckConfig {
                starting_delay_ms: 0,
                interval_ms: 1_000,
                ire_last_seen_timeout_ms: 10_000,
                client_last_seen_timeout_ms: 5_000,
                arp_query_timeout_ms: 1_000,
            },
            persistent_db: PersistentDbConfig {
                aging_interval_sec: 1,
                commit_interval_sec: 1,
                ..PersistentDbConfig::default()
            },
            ..Self::default()
        }
    }

    /// Time budget of one scheduler tick: 80% of the tick period
    pub fn tasks_time_budget_ms(&self) -> u64 {
        self.tasks_tick_ms * 8 / 10
    }

    pub fn validate(&self) -> Result<()> {
        if self.tasks_tick_ms == 0 || self.operations_tick_ms == 0 {
            return Err(MeshError::config_error("tick periods must be non-zero"));
        }
        for bss in &self.bss_info {
            bss.validate()?;
        }
        parse_version(&self.version)
            .ok_or_else(|| MeshError::config_error(format!("invalid version '{}'", self.version)))?;
        Ok(())
    }
}

/// Parse `major.minor.patch`, tolerating a missing patch component
pub fn parse_version(version: &str) -> Option<(u32, u32, u32)> {
    let mut parts = version.split('.');
    let major = parts.next()?.trim().parse().ok()?;
    let minor = parts.next()?.trim().parse().ok()?;
    let patch = parts.next().map(|p| p.trim().parse().ok()).unwrap_or(Some(0))?;
    Some((major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tasks_time_budget_ms(), 200);
    }

    #[test]
    fn test_presets() {
        let cert = ControllerConfig::certification();
        assert!(cert.settings.certification_mode);
        assert!(!cert.settings.dfs_reentry);
        assert!(cert.validate().is_ok());

        let testing = ControllerConfig::testing();
        assert_eq!(testing.health_check.starting_delay_ms, 0);
    }

    #[test]
    fn test_invalid_bss_rejected() {
        let mut config = ControllerConfig::default();
        config.bss_info[0].network_key = "short".to_string();
        assert!(config.validate().is_err());

        let mut config = ControllerConfig::default();
        config.bss_info[0].ssid = "x".repeat(33);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("2.2.0"), Some((2, 2, 0)));
        assert_eq!(parse_version("1.4"), Some((1, 4, 0)));
        assert_eq!(parse_version("abc"), None);
    }
}
