//! Autoconfiguration search, WSC registrar and join tests
//!
//! These tests drive the controller with the CMDUs an agent sends while onboarding
//! and check the registrar's answers from the enrollee's point of view.

use mesh_controller::{AgentState, StationState};
use mesh_core::protocol::tlv::{
    profile, role, service, AlMacAddressTlv, ApRadioIdentifierTlv, AutoconfigFreqBandTlv,
    ControllerCapabilityTlv, MultiApProfileTlv, SearchedRoleTlv, SearchedServiceTlv,
    SupportedFreqBandTlv, SupportedRoleTlv, SupportedServiceTlv,
};
use mesh_core::protocol::vendor::{
    join_response, BackhaulIfaceType, BackhaulParams, ChannelSwitchParams, HostapParams,
    SlaveJoined, VapInfo,
};
use mesh_core::protocol::{Cmdu, ControlMessage, MessageType, VendorBody, VendorMessage};
use mesh_core::wsc::{bss_type, open_registrar_message};
use mesh_core::{Bandwidth, BssInfoConf, FreqBand, MacAddress};

mod test_utils;
use test_utils::{
    agent_mac, bss_mac, quiet_config, radio_caps, radio_mac, search_cmdu, supported_5g_channels,
    wsc_frames, Enrollee, TestController, BRIDGE,
};

fn join_response_of(message: &VendorMessage) -> Option<u8> {
    match &message.body {
        VendorBody::Control(ControlMessage::SlaveJoinedResponse { err_code, .. }) => Some(*err_code),
        _ => None,
    }
}

fn slave_joined(backhaul: BackhaulParams) -> SlaveJoined {
    SlaveJoined {
        slave_version: "2.2.0".to_string(),
        backhaul,
        wlan_channel: 36,
        cs_params: ChannelSwitchParams {
            channel: 36,
            bandwidth: Bandwidth::Bw80,
            vht_center_frequency: 5210,
            ..ChannelSwitchParams::default()
        },
        hostap: HostapParams {
            iface_name: "wlan0".to_string(),
            frequency_band: FreqBand::Band5G,
            max_bandwidth: Bandwidth::Bw80,
            vht_supported: true,
            ..HostapParams::default()
        },
        supported_channels: supported_5g_channels(),
        vaps: vec![VapInfo {
            vap_id: 0,
            bssid: bss_mac(9),
            ssid: "prplMesh".to_string(),
            fronthaul: true,
            backhaul: false,
        }],
        ..SlaveJoined::default()
    }
}

// ----------------------------------------------------------------------------
// Search
// ----------------------------------------------------------------------------

#[test]
fn test_search_gets_registrar_response_with_same_mid() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);

    assert!(harness.deliver(agent, &search_cmdu(0x1234, agent, FreqBand::Band5G)));

    let responses = harness.sent.of_type(MessageType::ApAutoconfigurationResponse);
    assert_eq!(responses.len(), 1);
    let response = &responses[0];
    assert_eq!(response.dst, agent);
    assert_eq!(response.cmdu.message_id(), 0x1234);
    assert_eq!(
        response.cmdu.require::<SupportedRoleTlv>().unwrap().role,
        role::REGISTRAR
    );
    assert_eq!(
        response.cmdu.require::<SupportedFreqBandTlv>().unwrap().band,
        FreqBand::Band5G.to_ieee1905()
    );
    assert_eq!(
        response.cmdu.require::<SupportedServiceTlv>().unwrap().services,
        vec![service::CONTROLLER]
    );
    // no profile TLV in the search, none in the answer
    assert!(response.cmdu.get::<MultiApProfileTlv>().unwrap().is_none());

    let state = harness.controller.db().agent(&agent).map(|agent| agent.state);
    assert_eq!(state, Some(AgentState::Connecting));
}

#[test]
fn test_search_with_profile_advertises_profile_two() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    let search = search_cmdu(7, agent, FreqBand::Band24G).with(&MultiApProfileTlv {
        profile: profile::PROFILE_1,
    });

    harness.deliver(agent, &search);

    let response = harness.sent.of_type(MessageType::ApAutoconfigurationResponse).remove(0);
    assert_eq!(
        response.cmdu.require::<MultiApProfileTlv>().unwrap().profile,
        profile::PROFILE_2
    );
    assert!(response.cmdu.require::<ControllerCapabilityTlv>().unwrap().early_ap_capability);
    assert_eq!(harness.controller.db().agent(&agent).unwrap().profile, profile::PROFILE_1);
}

#[test]
fn test_search_with_handshake_marks_same_vendor_agent() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    let handshake = VendorMessage::control(ControlMessage::SlaveHandshakeRequest);
    let search = search_cmdu(9, agent, FreqBand::Band5G).with(&handshake.to_tlv());

    harness.deliver(agent, &search);

    let response = harness.sent.of_type(MessageType::ApAutoconfigurationResponse).remove(0);
    let reply = response.vendor().expect("handshake reply embedded");
    assert_eq!(reply.body, VendorBody::Control(ControlMessage::SlaveHandshakeResponse));
    assert!(harness.controller.db().agent(&agent).unwrap().is_prplmesh);
}

#[test]
fn test_search_for_other_service_is_ignored() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    let search = Cmdu::new(MessageType::ApAutoconfigurationSearch, 3)
        .with(&AlMacAddressTlv { mac: agent })
        .with(&SearchedRoleTlv {
            role: role::REGISTRAR,
        })
        .with(&AutoconfigFreqBandTlv {
            band: FreqBand::Band5G.to_ieee1905(),
        })
        .with(&SupportedServiceTlv {
            services: vec![service::AGENT],
        })
        .with(&SearchedServiceTlv {
            services: vec![service::AGENT],
        });

    assert!(harness.deliver(agent, &search));
    assert!(harness.sent.of_type(MessageType::ApAutoconfigurationResponse).is_empty());
}

/// A registrar search with the given supported services
fn search_supporting(mid: u16, al_mac: MacAddress, services: Vec<u8>) -> Cmdu {
    Cmdu::new(MessageType::ApAutoconfigurationSearch, mid)
        .with(&AlMacAddressTlv { mac: al_mac })
        .with(&SearchedRoleTlv {
            role: role::REGISTRAR,
        })
        .with(&AutoconfigFreqBandTlv {
            band: FreqBand::Band24G.to_ieee1905(),
        })
        .with(&SupportedServiceTlv { services })
        .with(&SearchedServiceTlv {
            services: vec![service::CONTROLLER],
        })
}

#[test]
fn test_search_without_agent_service_is_not_answered() {
    let mut harness = TestController::quiet();
    let peer = agent_mac(1);

    assert!(harness.deliver(peer, &search_supporting(4, peer, vec![service::CONTROLLER])));

    assert!(harness.sent.of_type(MessageType::ApAutoconfigurationResponse).is_empty());
    assert!(harness.controller.db().agent(&peer).is_none());
}

#[test]
fn test_search_from_agent_with_controller_service_is_answered() {
    let mut harness = TestController::quiet();
    let peer = agent_mac(1);
    let services = vec![service::CONTROLLER, service::AGENT];

    assert!(harness.deliver(peer, &search_supporting(5, peer, services)));

    let responses = harness.sent.of_type(MessageType::ApAutoconfigurationResponse);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].cmdu.message_id(), 5);
}

#[test]
fn test_search_missing_supported_service_reports_failure() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    let search = Cmdu::new(MessageType::ApAutoconfigurationSearch, 6)
        .with(&AlMacAddressTlv { mac: agent })
        .with(&SearchedRoleTlv {
            role: role::REGISTRAR,
        })
        .with(&AutoconfigFreqBandTlv {
            band: FreqBand::Band5G.to_ieee1905(),
        })
        .with(&SearchedServiceTlv {
            services: vec![service::CONTROLLER],
        });

    assert!(!harness.deliver(agent, &search));
    assert!(harness.sent.is_empty());
}

#[test]
fn test_search_missing_al_mac_reports_failure() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    let search = Cmdu::new(MessageType::ApAutoconfigurationSearch, 3);

    assert!(!harness.deliver(agent, &search));
    assert!(harness.sent.is_empty());
}

// ----------------------------------------------------------------------------
// WSC
// ----------------------------------------------------------------------------

#[test]
fn test_wsc_response_decrypts_on_enrollee_side() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    let ruid = radio_mac(1);
    let enrollee = Enrollee::five_ghz(11, ruid);

    assert!(harness.deliver(agent, &enrollee.wsc_cmdu(21, &radio_caps(ruid, 4, &[115, 128]))));

    let responses = harness.sent.of_type(MessageType::ApAutoconfigurationWsc);
    assert_eq!(responses.len(), 1);
    let response = &responses[0];
    assert_eq!(response.dst, agent);
    assert_eq!(response.cmdu.require::<ApRadioIdentifierTlv>().unwrap().ruid, ruid);

    // fronthaul M2, backhaul M2 and the M8 for the backhaul station
    let frames = wsc_frames(&response.cmdu);
    assert_eq!(frames.len(), 3);
    let configs: Vec<_> = frames
        .iter()
        .map(|frame| open_registrar_message(&enrollee.keypair, &enrollee.m1, frame).unwrap())
        .collect();

    assert_eq!(configs[0].ssid, "prplMesh");
    assert_eq!(configs[0].network_key, "prplmesh_pass");
    assert_eq!(configs[0].bssid, ruid);
    assert_eq!(configs[0].bss_type, bss_type::FRONTHAUL_BSS);
    assert_eq!(configs[1].ssid, "prplMesh-backhaul");
    assert_ne!(configs[1].bss_type & bss_type::BACKHAUL_BSS, 0);
    assert_eq!(configs[2].ssid, "prplMesh-backhaul");
    assert_eq!(configs[2].bss_type, bss_type::BACKHAUL_STA);
}

#[test]
fn test_wsc_without_matching_bss_gets_single_teardown() {
    let mut config = quiet_config();
    config.bss_info = vec![BssInfoConf {
        operating_classes: vec![81],
        ..BssInfoConf::default()
    }];
    let mut harness = TestController::new(config);
    let agent = agent_mac(1);
    let ruid = radio_mac(1);
    let enrollee = Enrollee::five_ghz(12, ruid);

    harness.deliver(agent, &enrollee.wsc_cmdu(5, &radio_caps(ruid, 4, &[115])));

    let response = harness.sent.of_type(MessageType::ApAutoconfigurationWsc).remove(0);
    let frames = wsc_frames(&response.cmdu);
    assert_eq!(frames.len(), 1);
    let config = open_registrar_message(&enrollee.keypair, &enrollee.m1, &frames[0]).unwrap();
    assert!(config.is_teardown());
    assert_ne!(config.bss_type & bss_type::TEARDOWN, 0);
    assert!(config.ssid.is_empty());
}

#[test]
fn test_wsc_caps_configurations_at_max_bss() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    let ruid = radio_mac(1);
    let enrollee = Enrollee::five_ghz(13, ruid);

    harness.deliver(agent, &enrollee.wsc_cmdu(5, &radio_caps(ruid, 1, &[115])));

    let response = harness.sent.of_type(MessageType::ApAutoconfigurationWsc).remove(0);
    let frames = wsc_frames(&response.cmdu);
    // only the fronthaul fits, so there is no backhaul credential for an M8
    assert_eq!(frames.len(), 1);
    let config = open_registrar_message(&enrollee.keypair, &enrollee.m1, &frames[0]).unwrap();
    assert_eq!(config.bss_type, bss_type::FRONTHAUL_BSS);
}

#[test]
fn test_wsc_daisy_chaining_disabled_drops_backhaul_for_repeaters() {
    let mut config = quiet_config();
    config.settings.daisy_chaining_disabled = true;
    let mut harness = TestController::new(config);
    let agent = agent_mac(1);
    let ruid = radio_mac(1);
    let enrollee = Enrollee::five_ghz(14, ruid);

    harness.deliver(agent, &enrollee.wsc_cmdu(5, &radio_caps(ruid, 4, &[115])));

    let response = harness.sent.of_type(MessageType::ApAutoconfigurationWsc).remove(0);
    let frames = wsc_frames(&response.cmdu);
    assert_eq!(frames.len(), 1);
    let config = open_registrar_message(&enrollee.keypair, &enrollee.m1, &frames[0]).unwrap();
    assert_eq!(config.ssid, "prplMesh");
}

#[test]
fn test_generic_join_hangs_agent_off_gateway() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    let ruid = radio_mac(1);
    let enrollee = Enrollee::five_ghz(15, ruid);

    harness.deliver(agent, &enrollee.wsc_cmdu(5, &radio_caps(ruid, 2, &[115])));

    let db = harness.controller.db();
    assert_eq!(db.gateway(), Some(BRIDGE));
    let joined = db.agent(&agent).unwrap();
    assert_eq!(joined.state, AgentState::Connected);
    assert_eq!(joined.parent, Some(BRIDGE));
    assert!(joined.wired_backhaul);
    let backhaul_sta = agent.derived_backhaul();
    assert_eq!(joined.backhaul_sta, Some(backhaul_sta));
    assert_eq!(db.station(&backhaul_sta).unwrap().parent_agent, Some(BRIDGE));

    let radio = db.radio(&ruid).unwrap();
    assert!(radio.active);
    assert_eq!(radio.band, FreqBand::Band5G);
}

// ----------------------------------------------------------------------------
// Same-vendor Join
// ----------------------------------------------------------------------------

#[test]
fn test_wired_same_vendor_join_is_accepted_and_activated() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    let ruid = radio_mac(1);
    let enrollee = Enrollee::five_ghz(16, ruid);
    let joined = slave_joined(BackhaulParams {
        backhaul_iface_type: BackhaulIfaceType::Ethernet,
        ..BackhaulParams::default()
    });
    let notification =
        VendorMessage::control(ControlMessage::SlaveJoinedNotification(Box::new(joined))).with_radio(ruid);
    let cmdu = enrollee
        .wsc_cmdu(5, &radio_caps(ruid, 2, &[115, 128]))
        .with(&notification.to_tlv());

    assert!(harness.deliver(agent, &cmdu));

    let replies: Vec<u8> = harness
        .vendor_to(agent)
        .iter()
        .filter_map(join_response_of)
        .collect();
    assert_eq!(replies, vec![join_response::OK]);

    {
        let db = harness.controller.db();
        let joined = db.agent(&agent).unwrap();
        assert!(joined.is_prplmesh);
        assert_eq!(joined.parent, Some(BRIDGE));
        assert!(db.bss(&bss_mac(9)).is_some());
        let radio = db.radio(&ruid).unwrap();
        assert!(!radio.acs_enabled);
        assert_eq!(radio.channel.channel, 36);
        assert!(!radio.active);
    }

    // channel selection activates the radio once it sees the join
    harness.run_for(5_000);
    assert!(harness.controller.db().radio(&ruid).unwrap().active);
}

#[test]
fn test_wireless_join_on_unknown_parent_is_rejected() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(2);
    let ruid = radio_mac(2);
    let enrollee = Enrollee::five_ghz(17, ruid);
    let joined = slave_joined(BackhaulParams {
        backhaul_iface_type: BackhaulIfaceType::Wifi,
        backhaul_is_wireless: true,
        backhaul_bssid: bss_mac(0x42),
        backhaul_mac: agent.derived_backhaul(),
        ..BackhaulParams::default()
    });
    let notification =
        VendorMessage::control(ControlMessage::SlaveJoinedNotification(Box::new(joined))).with_radio(ruid);
    let cmdu = enrollee
        .wsc_cmdu(5, &radio_caps(ruid, 2, &[115]))
        .with(&notification.to_tlv());

    harness.deliver(agent, &cmdu);

    let replies: Vec<VendorMessage> = harness
        .vendor_to(agent)
        .into_iter()
        .filter(|message| join_response_of(message).is_some())
        .collect();
    assert_eq!(replies.len(), 1);
    assert_eq!(join_response_of(&replies[0]), Some(join_response::REJECT));
    assert_eq!(replies[0].radio_mac, ruid);

    // the WSC answer still went out, but the agent never became connected
    assert_eq!(harness.sent.of_type(MessageType::ApAutoconfigurationWsc).len(), 1);
    let state = harness.controller.db().agent(&agent).map(|agent| agent.state);
    assert_ne!(state, Some(AgentState::Connected));
    assert!(harness.controller.db().station(&agent.derived_backhaul()).is_none());
}

#[test]
fn test_wireless_join_under_known_bss_records_backhaul_station() {
    let mut harness = TestController::quiet();
    harness.add_radio(BRIDGE, radio_mac(1), 36, Bandwidth::Bw80);
    harness.add_bss(radio_mac(1), bss_mac(1), "prplMesh-backhaul");

    let agent = agent_mac(2);
    let ruid = radio_mac(2);
    let enrollee = Enrollee::five_ghz(18, ruid);
    let backhaul_sta = agent.derived_backhaul();
    let joined = slave_joined(BackhaulParams {
        backhaul_iface_type: BackhaulIfaceType::Wifi,
        backhaul_is_wireless: true,
        backhaul_bssid: bss_mac(1),
        backhaul_mac: backhaul_sta,
        ..BackhaulParams::default()
    });
    let notification =
        VendorMessage::control(ControlMessage::SlaveJoinedNotification(Box::new(joined))).with_radio(ruid);
    let cmdu = enrollee
        .wsc_cmdu(5, &radio_caps(ruid, 2, &[115]))
        .with(&notification.to_tlv());

    harness.deliver(agent, &cmdu);

    let db = harness.controller.db();
    let joined = db.agent(&agent).unwrap();
    assert_eq!(joined.state, AgentState::Connected);
    assert_eq!(joined.parent, Some(BRIDGE));
    assert!(!joined.wired_backhaul);
    let station = db.station(&backhaul_sta).unwrap();
    assert!(station.is_backhaul);
    assert_eq!(station.state, StationState::Connected);
    assert_eq!(station.parent_bssid, Some(bss_mac(1)));
}
