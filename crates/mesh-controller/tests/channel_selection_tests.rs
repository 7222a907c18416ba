//! Channel selection workflow tests
//!
//! The channel selection task is driven end to end through the CONTROL messages an
//! agent would send, with the scheduler stepped on a mock clock.

use mesh_controller::son_actions;
use mesh_controller::tasks::channel_selection::CAC_TIMEOUT_MS;
use mesh_core::protocol::tlv::{ClientAssociationEventTlv, OperatingChannelReportTlv, SteeringRequestTlv};
use mesh_core::protocol::vendor::{switch_reason, ChannelSwitchParams, SupportedChannel};
use mesh_core::protocol::{CliMessage, Cmdu, ControlMessage, MessageType, VendorBody, VendorMessage};
use mesh_core::{Bandwidth, MacAddress};

mod test_utils;
use test_utils::{agent_mac, bss_mac, quiet_config, radio_mac, sta_mac, TestController};

fn channel_switch_requests(harness: &TestController, agent: MacAddress) -> Vec<ChannelSwitchParams> {
    harness
        .vendor_to(agent)
        .into_iter()
        .filter_map(|message| match message.body {
            VendorBody::Control(ControlMessage::ChannelSwitchAcsStart { cs_params }) => Some(cs_params),
            _ => None,
        })
        .collect()
}

fn csa(radio: MacAddress, cs_params: ChannelSwitchParams) -> VendorMessage {
    VendorMessage::control(ControlMessage::CsaNotification { cs_params }).with_radio(radio)
}

fn channel_switch_request(radio: MacAddress, channel: u8) -> VendorMessage {
    VendorMessage::new(
        CliMessage::HostapChannelSwitch {
            mac: radio,
            cs_params: ChannelSwitchParams {
                channel,
                bandwidth: Bandwidth::Bw20,
                ..ChannelSwitchParams::default()
            },
        }
        .into(),
    )
}

fn dfs_channel_available(radio: MacAddress, channel: u8, bandwidth: Bandwidth, vht_center_frequency: u16) -> VendorMessage {
    VendorMessage::control(ControlMessage::DfsChannelAvailable {
        frequency: 5000 + 5 * u16::from(channel),
        channel,
        bandwidth,
        vht_center_frequency,
    })
    .with_radio(radio)
}

fn steering_targets(harness: &TestController) -> Vec<(MacAddress, MacAddress)> {
    harness
        .sent
        .of_type(MessageType::ClientSteeringRequest)
        .iter()
        .map(|sent| {
            let tlv = sent.cmdu.require::<SteeringRequestTlv>().unwrap();
            (tlv.bssid, tlv.targets[0].bssid)
        })
        .collect()
}

/// 2.4 GHz channels 1 to 11 at 20 MHz
fn supported_2g_channels() -> Vec<SupportedChannel> {
    (1u8..=11)
        .map(|channel| SupportedChannel {
            channel,
            bandwidth: Bandwidth::Bw20,
            tx_power: 20,
            is_dfs: false,
            radar_affected: false,
        })
        .collect()
}

/// An ACS-enabled 2.4 GHz radio on agent 1 beside other agents' radios on `neighbours`
fn acs_radio_among(neighbours: &[u8]) -> TestController {
    let mut harness = TestController::quiet();
    harness.add_radio(agent_mac(1), radio_mac(1), 1, Bandwidth::Bw20);
    for (index, channel) in neighbours.iter().enumerate() {
        let index = index as u8 + 2;
        harness.add_radio(agent_mac(index), radio_mac(index), *channel, Bandwidth::Bw20);
    }
    let db = harness.controller.db_mut();
    for index in 1..=neighbours.len() as u8 + 1 {
        db.radio_mut(&radio_mac(index)).unwrap().supported_channels = supported_2g_channels();
    }
    db.radio_mut(&radio_mac(1)).unwrap().acs_enabled = true;
    harness
}

#[test]
fn test_radar_csa_marks_previous_subchannels() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    let radio = radio_mac(1);
    harness.add_radio(agent, radio, 100, Bandwidth::Bw80);

    let moved = ChannelSwitchParams {
        channel: 36,
        bandwidth: Bandwidth::Bw80,
        vht_center_frequency: 5210,
        switch_reason: switch_reason::RADAR,
        ..ChannelSwitchParams::default()
    };
    assert!(harness.deliver_vendor(agent, &csa(radio, moved)));
    harness.run_for(5_000);

    let radio = harness.controller.db().radio(&radio).unwrap();
    assert_eq!(radio.channel.channel, 36);
    for channel in [100, 104, 108, 112] {
        assert!(radio.is_radar_affected(channel), "channel {channel} should be radar affected");
    }
    for channel in [36, 40, 44, 48, 116] {
        assert!(!radio.is_radar_affected(channel), "channel {channel} should be clean");
    }
}

#[test]
fn test_csa_without_radar_only_moves_radio() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    let radio = radio_mac(1);
    harness.add_radio(agent, radio, 100, Bandwidth::Bw80);

    let moved = ChannelSwitchParams {
        channel: 149,
        bandwidth: Bandwidth::Bw80,
        vht_center_frequency: 5775,
        ..ChannelSwitchParams::default()
    };
    harness.deliver_vendor(agent, &csa(radio, moved));
    harness.run_for(5_000);

    let radio = harness.controller.db().radio(&radio).unwrap();
    assert_eq!(radio.channel.channel, 149);
    assert!(radio.supported_channels.iter().all(|entry| !entry.radar_affected));
}

#[test]
fn test_requested_switch_completes_on_csa() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    let radio = radio_mac(1);
    harness.add_radio(agent, radio, 1, Bandwidth::Bw20);

    let target = ChannelSwitchParams {
        channel: 11,
        bandwidth: Bandwidth::Bw20,
        ..ChannelSwitchParams::default()
    };
    let request = VendorMessage::new(
        CliMessage::HostapChannelSwitch {
            mac: radio,
            cs_params: target,
        }
        .into(),
    );
    harness.deliver_vendor(agent_mac(9), &request);
    harness.run_for(2_000);

    let requests = channel_switch_requests(&harness, agent);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].channel, 11);

    harness.deliver_vendor(agent, &csa(radio, target));
    harness.run_for(2_000);

    let db = harness.controller.db();
    let radio = db.radio(&radio).unwrap();
    assert_eq!(radio.channel.channel, 11);
    assert!(radio.active);
}

#[test]
fn test_missing_csa_declares_radio_dead() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    let radio = radio_mac(1);
    harness.add_radio(agent, radio, 1, Bandwidth::Bw20);

    harness.deliver_vendor(agent_mac(9), &channel_switch_request(radio, 6));
    harness.run_for(15_000);

    assert_eq!(channel_switch_requests(&harness, agent).len(), 1);
    let radio = harness.controller.db().radio(&radio).unwrap();
    assert!(!radio.active);
    assert_eq!(radio.channel.channel, 1);
}

#[test]
fn test_events_for_other_radios_wait_their_turn() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    harness.add_radio(agent, radio_mac(1), 1, Bandwidth::Bw20);
    harness.add_radio(agent, radio_mac(2), 6, Bandwidth::Bw20);

    for (radio, channel) in [(radio_mac(1), 11), (radio_mac(2), 1)] {
        harness.deliver_vendor(agent_mac(9), &channel_switch_request(radio, channel));
    }
    harness.run_for(2_000);

    // only the first radio's switch is in flight
    let requests = channel_switch_requests(&harness, agent);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].channel, 11);

    harness.deliver_vendor(
        agent,
        &csa(
            radio_mac(1),
            ChannelSwitchParams {
                channel: 11,
                bandwidth: Bandwidth::Bw20,
                ..ChannelSwitchParams::default()
            },
        ),
    );
    harness.run_for(3_000);

    let requests = channel_switch_requests(&harness, agent);
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].channel, 1);
}

#[test]
fn test_deleted_radio_drops_its_queued_events() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    harness.add_radio(agent, radio_mac(1), 1, Bandwidth::Bw20);
    harness.add_radio(agent, radio_mac(2), 6, Bandwidth::Bw20);
    harness.deliver_vendor(agent_mac(9), &channel_switch_request(radio_mac(1), 11));
    harness.deliver_vendor(agent_mac(9), &channel_switch_request(radio_mac(2), 1));
    harness.run_for(2_000);
    assert_eq!(channel_switch_requests(&harness, agent).len(), 1);

    harness
        .controller
        .with_context(|ctx| son_actions::handle_dead_radio(ctx, radio_mac(2)));
    harness.deliver_vendor(
        agent,
        &csa(
            radio_mac(1),
            ChannelSwitchParams {
                channel: 11,
                bandwidth: Bandwidth::Bw20,
                ..ChannelSwitchParams::default()
            },
        ),
    );
    harness.run_for(5_000);

    let requests = channel_switch_requests(&harness, agent);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].channel, 11);
    let db = harness.controller.db();
    assert!(db.radio(&radio_mac(1)).unwrap().active);
    assert!(!db.radio(&radio_mac(2)).unwrap().active);
}

#[test]
fn test_deleting_radio_in_flight_releases_the_queue() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    harness.add_radio(agent, radio_mac(1), 1, Bandwidth::Bw20);
    harness.add_radio(agent, radio_mac(2), 6, Bandwidth::Bw20);
    harness.deliver_vendor(agent_mac(9), &channel_switch_request(radio_mac(1), 11));
    harness.deliver_vendor(agent_mac(9), &channel_switch_request(radio_mac(2), 1));
    harness.run_for(2_000);

    harness
        .controller
        .with_context(|ctx| son_actions::handle_dead_radio(ctx, radio_mac(1)));
    // well inside the CSA timeout of the abandoned switch
    harness.run_for(2_000);

    let requests = channel_switch_requests(&harness, agent);
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].channel, 1);
}

#[test]
fn test_cac_timeout_falls_back_to_fail_safe_channel() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    let radio = radio_mac(1);
    harness.add_radio(agent, radio, 36, Bandwidth::Bw80);

    let dfs = ChannelSwitchParams {
        channel: 100,
        bandwidth: Bandwidth::Bw80,
        vht_center_frequency: 5530,
        is_dfs_channel: true,
        ..ChannelSwitchParams::default()
    };
    assert!(harness.deliver_vendor(agent, &csa(radio, dfs)));
    harness.run_for(CAC_TIMEOUT_MS - 60_000);
    assert!(channel_switch_requests(&harness, agent).is_empty());
    assert_eq!(harness.controller.db().radio(&radio).unwrap().channel.channel, 100);

    harness.run_for(120_000);

    let requests = channel_switch_requests(&harness, agent);
    assert_eq!(requests.len(), 1);
    let fail_safe = &requests[0];
    assert_eq!(fail_safe.channel, 36);
    assert_eq!(fail_safe.bandwidth, Bandwidth::Bw80);
    assert_eq!(fail_safe.vht_center_frequency, 5210);
    assert!(!harness.controller.db().radio(&radio).unwrap().cac_completed);
}

#[test]
fn test_cac_completed_in_time_keeps_dfs_channel() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    let radio = radio_mac(1);
    harness.add_radio(agent, radio, 36, Bandwidth::Bw80);

    let dfs = ChannelSwitchParams {
        channel: 100,
        bandwidth: Bandwidth::Bw80,
        vht_center_frequency: 5530,
        is_dfs_channel: true,
        ..ChannelSwitchParams::default()
    };
    harness.deliver_vendor(agent, &csa(radio, dfs));
    harness.run_for(60_000);
    let completed = VendorMessage::control(ControlMessage::DfsCacCompleted {
        success: true,
        frequency: 5500,
        channel: 100,
        bandwidth: Bandwidth::Bw80,
    })
    .with_radio(radio);
    assert!(harness.deliver_vendor(agent, &completed));
    harness.run_for(CAC_TIMEOUT_MS);

    assert!(channel_switch_requests(&harness, agent).is_empty());
    let radio = harness.controller.db().radio(&radio).unwrap();
    assert!(radio.cac_completed);
    assert_eq!(radio.channel.channel, 100);
}

#[test]
fn test_dfs_channel_available_clears_radar_marks() {
    let mut config = quiet_config();
    config.settings.dfs_reentry = false;
    let mut harness = TestController::new(config);
    let agent = agent_mac(1);
    let radio = radio_mac(1);
    harness.add_radio(agent, radio, 36, Bandwidth::Bw80);
    harness
        .controller
        .db_mut()
        .radio_mut(&radio)
        .unwrap()
        .set_radar_affected(&[100, 104, 108, 112], true);

    // a 20 MHz clearance frees only its own channel
    assert!(harness.deliver_vendor(agent, &dfs_channel_available(radio, 100, Bandwidth::Bw20, 5500)));
    harness.run_for(2_000);
    {
        let radio = harness.controller.db().radio(&radio).unwrap();
        assert!(!radio.is_radar_affected(100));
        assert!(radio.is_radar_affected(104));
    }

    assert!(harness.deliver_vendor(agent, &dfs_channel_available(radio, 100, Bandwidth::Bw80, 5530)));
    harness.run_for(2_000);

    let db = harness.controller.db();
    let radio = db.radio(&radio).unwrap();
    for channel in [100, 104, 108, 112] {
        assert!(!radio.is_radar_affected(channel), "channel {channel} should be clean");
    }
    assert_eq!(radio.channel.channel, 36);
    assert!(channel_switch_requests(&harness, agent).is_empty());
}

#[test]
fn test_dfs_reentry_steers_clients_away_and_back() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    let (radio_5g, radio_2g) = (radio_mac(1), radio_mac(2));
    let sta = sta_mac(1);
    harness.add_radio(agent, radio_5g, 36, Bandwidth::Bw80);
    harness.add_bss(radio_5g, bss_mac(1), "home");
    harness.add_radio(agent, radio_2g, 1, Bandwidth::Bw20);
    harness.add_bss(radio_2g, bss_mac(2), "home");
    harness.connect_station(sta, bss_mac(1));
    harness
        .controller
        .db_mut()
        .radio_mut(&radio_5g)
        .unwrap()
        .set_radar_affected(&[100, 104, 108, 112], true);

    assert!(harness.deliver_vendor(agent, &dfs_channel_available(radio_5g, 100, Bandwidth::Bw80, 5530)));
    harness.run_for(2_000);

    assert!(!harness.controller.db().radio(&radio_5g).unwrap().is_radar_affected(100));
    assert_eq!(steering_targets(&harness), vec![(bss_mac(1), bss_mac(2))]);
    // the switch waits for the station to leave
    assert!(channel_switch_requests(&harness, agent).is_empty());

    let moved = Cmdu::new(MessageType::TopologyNotification, 40).with(&ClientAssociationEventTlv {
        client_mac: sta,
        bssid: bss_mac(2),
        associated: true,
    });
    assert!(harness.deliver(agent, &moved));
    harness.run_for(3_000);

    let requests = channel_switch_requests(&harness, agent);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].channel, 100);
    assert_eq!(requests[0].bandwidth, Bandwidth::Bw80);

    let switched = ChannelSwitchParams {
        channel: 100,
        bandwidth: Bandwidth::Bw80,
        vht_center_frequency: 5530,
        is_dfs_channel: true,
        ..ChannelSwitchParams::default()
    };
    assert!(harness.deliver_vendor(agent, &csa(radio_5g, switched)));
    harness.run_for(1_000);
    let completed = VendorMessage::control(ControlMessage::DfsCacCompleted {
        success: true,
        frequency: 5500,
        channel: 100,
        bandwidth: Bandwidth::Bw80,
    })
    .with_radio(radio_5g);
    assert!(harness.deliver_vendor(agent, &completed));
    harness.run_for(3_000);

    assert_eq!(harness.controller.db().radio(&radio_5g).unwrap().channel.channel, 100);
    let targets = steering_targets(&harness);
    assert_eq!(targets.len(), 2);
    assert_eq!(targets[1], (bss_mac(2), bss_mac(1)));
}

#[test]
fn test_acs_on_2g_when_a_clean_channel_exists() {
    let mut harness = acs_radio_among(&[6]);
    let agent = agent_mac(1);
    let request = VendorMessage::new(
        CliMessage::HostapChannelSwitch {
            mac: radio_mac(1),
            cs_params: ChannelSwitchParams::default(),
        }
        .into(),
    );
    harness.deliver_vendor(agent_mac(9), &request);
    harness.run_for(2_000);

    // channel 0 asks the agent to run its own ACS
    let requests = channel_switch_requests(&harness, agent);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].channel, 0);

    let acs = VendorMessage::control(ControlMessage::AcsNotification {
        cs_params: ChannelSwitchParams {
            channel: 11,
            bandwidth: Bandwidth::Bw20,
            ..ChannelSwitchParams::default()
        },
        supported_channels: supported_2g_channels(),
    })
    .with_radio(radio_mac(1));
    assert!(harness.deliver_vendor(agent, &acs));
    harness.run_for(2_000);

    let radio = harness.controller.db().radio(&radio_mac(1)).unwrap();
    assert_eq!(radio.channel.channel, 11);
    assert!(radio.active);
}

#[test]
fn test_crowded_2g_switches_to_least_used_channel() {
    let mut harness = acs_radio_among(&[1, 6, 11]);
    let agent = agent_mac(1);
    let request = VendorMessage::new(
        CliMessage::HostapChannelSwitch {
            mac: radio_mac(1),
            cs_params: ChannelSwitchParams::default(),
        }
        .into(),
    );
    harness.deliver_vendor(agent_mac(9), &request);
    harness.run_for(2_000);

    // every channel overlaps a neighbour; 3 has no neighbour primaries next to it
    let requests = channel_switch_requests(&harness, agent);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].channel, 3);
    assert_eq!(requests[0].bandwidth, Bandwidth::Bw20);
}

#[test]
fn test_operating_channel_report_uses_current_class() {
    let mut harness = TestController::quiet();
    let agent = agent_mac(1);
    let radio = radio_mac(1);
    harness.add_radio(agent, radio, 36, Bandwidth::Bw80);

    let narrowed = Cmdu::new(MessageType::OperatingChannelReport, 50).with(&OperatingChannelReportTlv {
        ruid: radio,
        channels: vec![(115, 36), (116, 36)],
        tx_power: 17,
    });
    assert!(harness.deliver(agent, &narrowed));
    {
        let radio = harness.controller.db().radio(&radio).unwrap();
        assert_eq!(radio.operating_class, 116);
        assert_eq!(radio.channel.channel, 36);
        assert_eq!(radio.channel.bandwidth, Bandwidth::Bw40);
        assert_eq!(radio.tx_power, 17);
    }

    // 80 MHz classes carry the center channel, not the primary
    let widened = Cmdu::new(MessageType::OperatingChannelReport, 51).with(&OperatingChannelReportTlv {
        ruid: radio,
        channels: vec![(118, 52), (119, 52), (128, 58)],
        tx_power: 17,
    });
    assert!(harness.deliver(agent, &widened));

    let radio = harness.controller.db().radio(&radio).unwrap();
    assert_eq!(radio.operating_class, 128);
    assert_eq!(radio.channel.channel, 52);
    assert_eq!(radio.channel.bandwidth, Bandwidth::Bw80);
    assert_eq!(harness.sent.of_type(MessageType::Ack).len(), 2);
}
