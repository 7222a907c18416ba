//! Test utilities for driving the controller deterministically
//!
//! The controller under test runs against a [`MockTimeSource`] and a
//! [`RecordingSender`], so a test feeds it CMDUs, steps the scheduler by hand and
//! inspects every CMDU that went out.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mesh_controller::{AgentState, Controller, RecordingSender};
use mesh_core::channel::{is_dfs_channel, WifiChannel};
use mesh_core::protocol::tlv::{
    role, service, AlMacAddressTlv, ApRadioBasicCapabilitiesTlv, AutoconfigFreqBandTlv,
    OperatingClassInfo, SearchedRoleTlv, SearchedServiceTlv, SupportedServiceTlv, WscTlv,
};
use mesh_core::protocol::vendor::SupportedChannel;
use mesh_core::protocol::{Cmdu, MessageType, VendorMessage};
use mesh_core::wsc::attributes::rf_band;
use mesh_core::wsc::{DhKeyPair, M1Params, M1};
use mesh_core::{Bandwidth, ControllerConfig, FreqBand, MacAddress, TimeSource, Timestamp};
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;

// ----------------------------------------------------------------------------
// Mock Time Source
// ----------------------------------------------------------------------------

/// Mock time source for deterministic testing
///
/// Clones share the same clock, so the controller and the test see the same time.
#[derive(Debug, Clone)]
pub struct MockTimeSource {
    current_time: Arc<AtomicU64>,
}

impl MockTimeSource {
    /// Create a new mock time source starting at time 0
    pub fn new() -> Self {
        Self {
            current_time: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a new mock time source starting at a specific time
    pub fn new_at(start_time: u64) -> Self {
        Self {
            current_time: Arc::new(AtomicU64::new(start_time)),
        }
    }

    /// Advance time by the specified number of milliseconds
    pub fn advance(&self, millis: u64) {
        self.current_time.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the time to a specific value
    pub fn set_time(&self, millis: u64) {
        self.current_time.store(millis, Ordering::SeqCst);
    }

    /// Get the current mock time
    pub fn current_time(&self) -> u64 {
        self.current_time.load(Ordering::SeqCst)
    }
}

impl Default for MockTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Addresses
// ----------------------------------------------------------------------------

pub const BRIDGE: MacAddress = MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);

/// Locally administered address `02:<group>:00:00:00:<index>`
pub fn mac(group: u8, index: u8) -> MacAddress {
    MacAddress::new([0x02, group, 0x00, 0x00, 0x00, index])
}

pub fn agent_mac(index: u8) -> MacAddress {
    mac(0xa0, index)
}

pub fn radio_mac(index: u8) -> MacAddress {
    mac(0xb0, index)
}

pub fn bss_mac(index: u8) -> MacAddress {
    mac(0xc0, index)
}

pub fn sta_mac(index: u8) -> MacAddress {
    mac(0xd0, index)
}

// ----------------------------------------------------------------------------
// Controller Harness
// ----------------------------------------------------------------------------

/// Configuration without the periodic background tasks that send on their own
pub fn quiet_config() -> ControllerConfig {
    let mut config = ControllerConfig::testing();
    config.settings.health_check = false;
    config
}

/// A started controller wired to a recording sender and a mock clock
pub struct TestController {
    pub controller: Controller,
    pub sent: RecordingSender,
    pub time: MockTimeSource,
}

impl TestController {
    pub fn new(config: ControllerConfig) -> Self {
        let sent = RecordingSender::new();
        let time = MockTimeSource::new_at(1_000_000);
        let mut controller = Controller::with_rng(
            config,
            BRIDGE,
            Box::new(sent.clone()),
            Arc::new(time.clone()),
            ChaCha20Rng::seed_from_u64(7),
        )
        .unwrap();
        controller.start();
        Self {
            controller,
            sent,
            time,
        }
    }

    pub fn quiet() -> Self {
        Self::new(quiet_config())
    }

    pub fn deliver(&mut self, src: MacAddress, cmdu: &Cmdu) -> bool {
        self.controller.handle_cmdu(src, cmdu)
    }

    pub fn deliver_vendor(&mut self, src: MacAddress, message: &VendorMessage) -> bool {
        self.deliver(src, &message.to_cmdu(0x4000))
    }

    /// One scheduler tick
    pub fn tick(&mut self) -> usize {
        self.time.advance(self.controller.config().tasks_tick_ms);
        self.controller.run_tasks()
    }

    /// Tick until `millis` of mock time have passed
    pub fn run_for(&mut self, millis: u64) {
        let end = self.time.current_time() + millis;
        while self.time.current_time() < end {
            self.tick();
        }
    }

    /// Vendor replies sent to `dst`
    pub fn vendor_to(&self, dst: MacAddress) -> Vec<VendorMessage> {
        self.sent
            .vendor_messages()
            .into_iter()
            .filter(|(to, _)| *to == dst)
            .map(|(_, message)| message)
            .collect()
    }

    // ------------------------------------------------------------------------
    // Topology Setup
    // ------------------------------------------------------------------------

    /// A connected agent owning an active radio on `channel`
    pub fn add_radio(&mut self, agent: MacAddress, ruid: MacAddress, channel: u8, bandwidth: Bandwidth) {
        let now = self.controller.now();
        let db = self.controller.db_mut();
        let owner = db.add_agent(agent, now);
        owner.state = AgentState::Connected;
        let radio = db.add_radio(agent, ruid);
        radio.channel = WifiChannel::from_primary(channel, bandwidth, true);
        radio.band = radio.channel.band();
        radio.max_bandwidth = bandwidth;
        radio.operating_class = if radio.band == FreqBand::Band24G { 81 } else { 128 };
        radio.active = true;
        if radio.band == FreqBand::Band5G {
            radio.supported_channels = supported_5g_channels();
        }
    }

    pub fn add_bss(&mut self, ruid: MacAddress, bssid: MacAddress, ssid: &str) {
        let bss = self.controller.db_mut().add_bss(ruid, bssid);
        bss.ssid = ssid.to_string();
        bss.fronthaul = true;
        bss.enabled = true;
    }

    pub fn connect_station(&mut self, sta: MacAddress, bssid: MacAddress) {
        let now = self.controller.now();
        self.controller.db_mut().associate_station(sta, bssid, now);
    }
}

// ----------------------------------------------------------------------------
// Message Builders
// ----------------------------------------------------------------------------

pub fn search_cmdu(mid: u16, al_mac: MacAddress, band: FreqBand) -> Cmdu {
    Cmdu::new(MessageType::ApAutoconfigurationSearch, mid)
        .with(&AlMacAddressTlv { mac: al_mac })
        .with(&SearchedRoleTlv {
            role: role::REGISTRAR,
        })
        .with(&AutoconfigFreqBandTlv {
            band: band.to_ieee1905(),
        })
        .with(&SupportedServiceTlv {
            services: vec![service::AGENT],
        })
        .with(&SearchedServiceTlv {
            services: vec![service::CONTROLLER],
        })
}

pub fn radio_caps(ruid: MacAddress, max_bss: u8, operating_classes: &[u8]) -> ApRadioBasicCapabilitiesTlv {
    ApRadioBasicCapabilitiesTlv {
        ruid,
        max_bss,
        operating_classes: operating_classes
            .iter()
            .map(|operating_class| OperatingClassInfo {
                operating_class: *operating_class,
                max_tx_power: 20,
                non_operable_channels: Vec::new(),
            })
            .collect(),
    }
}

/// Enrollee side of a WSC exchange: its key pair and the M1 it sent
pub struct Enrollee {
    pub keypair: DhKeyPair,
    pub m1: Vec<u8>,
}

impl Enrollee {
    pub fn new(seed: u64, radio: MacAddress, rf_bands: u8) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let keypair = DhKeyPair::generate(&mut rng).unwrap();
        let m1 = M1::build(&M1Params {
            mac: radio,
            uuid_e: [0x5a; 16],
            enrollee_nonce: [seed as u8; 16],
            public_key: keypair.public_key().to_vec(),
            auth_type_flags: 0x0021,
            encr_type_flags: 0x0009,
            rf_bands,
            manufacturer: "prplMesh".to_string(),
            model_name: "agent".to_string(),
            device_name: "agent".to_string(),
        });
        Self { keypair, m1 }
    }

    pub fn five_ghz(seed: u64, radio: MacAddress) -> Self {
        Self::new(seed, radio, rf_band::BAND_5GHZ)
    }

    /// M1 CMDU as an agent sends it for one radio
    pub fn wsc_cmdu(&self, mid: u16, caps: &ApRadioBasicCapabilitiesTlv) -> Cmdu {
        Cmdu::new(MessageType::ApAutoconfigurationWsc, mid)
            .with(caps)
            .with(&WscTlv {
                frame: self.m1.clone(),
            })
    }
}

/// WSC frames carried by a registrar response
pub fn wsc_frames(cmdu: &Cmdu) -> Vec<Vec<u8>> {
    cmdu.get_all::<WscTlv>()
        .unwrap()
        .into_iter()
        .map(|tlv| tlv.frame)
        .collect()
}

/// Every 20 MHz 5 GHz channel, usable at 80 MHz
pub fn supported_5g_channels() -> Vec<SupportedChannel> {
    (36u8..=64)
        .step_by(4)
        .chain((100u8..=144).step_by(4))
        .chain((149u8..=165).step_by(4))
        .map(|channel| SupportedChannel {
            channel,
            bandwidth: Bandwidth::Bw80,
            tx_power: 20,
            is_dfs: is_dfs_channel(channel),
            radar_affected: false,
        })
        .collect()
}
