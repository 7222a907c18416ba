//! Association handling, client locating and network health check tests

use std::net::Ipv4Addr;

use mesh_controller::son_actions;
use mesh_controller::tasks::client_locating::ARP_STATE_REACHABLE;
use mesh_controller::{AgentState, StationState, StationTaskKind};
use mesh_core::protocol::{ControlMessage, VendorBody, VendorMessage};
use mesh_core::{Bandwidth, ControllerConfig, MacAddress};

mod test_utils;
use test_utils::{agent_mac, bss_mac, radio_mac, sta_mac, TestController};

const ARP_STATE_FAILED: u8 = 0x20;

fn mark_same_vendor(harness: &mut TestController, agent: MacAddress) {
    harness.controller.db_mut().agent_mut(&agent).unwrap().is_prplmesh = true;
}

/// Two same-vendor agents; a station on the first one's BSS
fn same_vendor_network() -> (TestController, MacAddress) {
    let mut harness = TestController::quiet();
    harness.add_radio(agent_mac(1), radio_mac(1), 36, Bandwidth::Bw80);
    harness.add_bss(radio_mac(1), bss_mac(1), "home");
    harness.add_radio(agent_mac(2), radio_mac(2), 6, Bandwidth::Bw20);
    harness.add_bss(radio_mac(2), bss_mac(2), "home");
    mark_same_vendor(&mut harness, agent_mac(1));
    mark_same_vendor(&mut harness, agent_mac(2));
    let sta = sta_mac(1);
    harness.connect_station(sta, bss_mac(1));
    (harness, sta)
}

/// Control requests sent to `dst`, with the vendor header they carried
fn control_to(harness: &TestController, dst: MacAddress) -> Vec<(VendorMessage, ControlMessage)> {
    harness
        .vendor_to(dst)
        .into_iter()
        .filter_map(|message| match &message.body {
            VendorBody::Control(control) => {
                let control = control.clone();
                Some((message, control))
            }
            _ => None,
        })
        .collect()
}

fn arp_queries(harness: &TestController, dst: MacAddress, sta: MacAddress) -> Vec<VendorMessage> {
    control_to(harness, dst)
        .into_iter()
        .filter(|(_, control)| matches!(control, ControlMessage::ArpQueryRequest { mac, .. } if *mac == sta))
        .map(|(message, _)| message)
        .collect()
}

fn arp_reply(request: &VendorMessage, sta: MacAddress, state: u8) -> VendorMessage {
    VendorMessage::control(ControlMessage::ArpQueryResponse {
        mac: sta,
        ipv4: Ipv4Addr::new(192, 168, 1, 20),
        state,
        source: 0,
    })
    .with_id(request.id)
}

/// A wired client behind `agent`, not heard from since now
fn add_wired_client(harness: &mut TestController, sta: MacAddress, agent: Option<MacAddress>) {
    let now = harness.controller.now();
    let station = harness.controller.db_mut().add_station(sta, now);
    station.is_wireless = false;
    station.parent_bssid = None;
    station.parent_agent = agent;
    station.state = if agent.is_some() {
        StationState::Connected
    } else {
        StationState::Disconnected
    };
    station.last_seen = now;
}

// ----------------------------------------------------------------------------
// Association Handling
// ----------------------------------------------------------------------------

#[test]
fn test_association_handling_collects_cross_rssi() {
    let (mut harness, sta) = same_vendor_network();
    harness
        .controller
        .db_mut()
        .station_mut(&sta)
        .unwrap()
        .beacon_measurement_supported = true;
    let task = harness
        .controller
        .with_context(|ctx| son_actions::start_association_handling(ctx, sta, bss_mac(1)));
    assert!(task.is_some());

    harness.tick();
    let requests = control_to(&harness, agent_mac(1));
    let (beacon, _) = requests
        .iter()
        .find(|(_, control)| matches!(control, ControlMessage::Beacon11kRequest { .. }))
        .expect("beacon request");
    assert_eq!(beacon.radio_mac, radio_mac(1));
    let report = VendorMessage::control(ControlMessage::Beacon11kResponse {
        sta_mac: sta,
        bssid: bss_mac(1),
        channel: 36,
        op_class: 128,
        rcpi: 120,
        rsni: 40,
        rep_mode: 0,
        duration: 50,
        dialog_token: 1,
    })
    .with_id(beacon.id);
    harness.deliver_vendor(agent_mac(1), &report);
    harness.sent.clear();

    harness.tick();
    let requests = control_to(&harness, agent_mac(1));
    let (monitoring, _) = requests
        .iter()
        .find(|(_, control)| matches!(control, ControlMessage::StartMonitoringRequest { mac, .. } if *mac == sta))
        .expect("start monitoring request");
    let started = VendorMessage::control(ControlMessage::StartMonitoringResponse { success: true })
        .with_id(monitoring.id);
    harness.deliver_vendor(agent_mac(1), &started);
    harness.sent.clear();

    harness.tick();
    assert!(control_to(&harness, agent_mac(1))
        .iter()
        .all(|(_, control)| !matches!(control, ControlMessage::RxRssiMeasurementRequest { .. })));
    let requests = control_to(&harness, agent_mac(2));
    let (rssi, _) = requests
        .iter()
        .find(|(_, control)| {
            matches!(control, ControlMessage::RxRssiMeasurementRequest { mac, cross: true, .. } if *mac == sta)
        })
        .expect("cross RSSI request to the other agent");
    let measured = VendorMessage::control(ControlMessage::RxRssiMeasurementResponse {
        mac: sta,
        rx_rssi: -61,
        rx_packets: 4,
    })
    .with_id(rssi.id)
    .with_radio(radio_mac(2));
    harness.deliver_vendor(agent_mac(2), &measured);

    harness.run_for(1_000);

    let station = harness.controller.db().station(&sta).unwrap();
    assert_eq!(station.cross_rx_rssi.get(&radio_mac(2)), Some(&-61));
    assert!(station.beacon_measurement_supported);
    assert_eq!(
        harness.controller.db().station_task(&sta, StationTaskKind::AssociationHandling),
        None
    );
}

#[test]
fn test_missing_beacon_report_marks_11k_unsupported() {
    let (mut harness, sta) = same_vendor_network();
    harness
        .controller
        .db_mut()
        .station_mut(&sta)
        .unwrap()
        .beacon_measurement_supported = true;
    harness
        .controller
        .with_context(|ctx| son_actions::start_association_handling(ctx, sta, bss_mac(1)));

    harness.run_for(4_000);

    let station = harness.controller.db().station(&sta).unwrap();
    assert!(!station.beacon_measurement_supported);
    let monitoring_requested = control_to(&harness, agent_mac(1))
        .iter()
        .any(|(_, control)| matches!(control, ControlMessage::StartMonitoringRequest { .. }));
    assert!(monitoring_requested);
}

#[test]
fn test_association_handling_skips_other_vendors() {
    let (mut harness, sta) = same_vendor_network();
    harness.controller.db_mut().agent_mut(&agent_mac(1)).unwrap().is_prplmesh = false;
    harness
        .controller
        .with_context(|ctx| son_actions::start_association_handling(ctx, sta, bss_mac(1)));

    harness.run_for(1_000);

    assert!(control_to(&harness, agent_mac(1)).is_empty());
    assert!(control_to(&harness, agent_mac(2)).is_empty());
    assert_eq!(
        harness.controller.db().station_task(&sta, StationTaskKind::AssociationHandling),
        None
    );
}

// ----------------------------------------------------------------------------
// Client Locating
// ----------------------------------------------------------------------------

#[test]
fn test_client_located_behind_answering_agent() {
    let (mut harness, _) = same_vendor_network();
    let wired = sta_mac(9);
    add_wired_client(&mut harness, wired, None);
    // the wired client is a repeater's uplink
    let now = harness.controller.now();
    let repeater = harness.controller.db_mut().add_agent(agent_mac(3), now);
    repeater.backhaul_sta = Some(wired);
    repeater.parent = Some(agent_mac(1));

    harness
        .controller
        .with_context(|ctx| son_actions::start_client_locating(ctx, wired));
    harness.tick();

    let query_1 = arp_queries(&harness, agent_mac(1), wired);
    let query_2 = arp_queries(&harness, agent_mac(2), wired);
    assert_eq!(query_1.len(), 1);
    assert_eq!(query_2.len(), 1);
    assert!(arp_queries(&harness, agent_mac(3), wired).is_empty());

    harness.deliver_vendor(agent_mac(1), &arp_reply(&query_1[0], wired, ARP_STATE_FAILED));
    harness.deliver_vendor(agent_mac(2), &arp_reply(&query_2[0], wired, ARP_STATE_REACHABLE));
    harness.tick();

    let db = harness.controller.db();
    let station = db.station(&wired).unwrap();
    assert_eq!(station.parent_agent, Some(agent_mac(2)));
    assert_eq!(station.state, StationState::Connected);
    assert!(!station.is_wireless);
    let repeater = db.agent(&agent_mac(3)).unwrap();
    assert_eq!(repeater.parent, Some(agent_mac(2)));
    assert!(repeater.wired_backhaul);
    assert_eq!(db.station_task(&wired, StationTaskKind::ClientLocating), None);
}

#[test]
fn test_client_not_located_when_no_agent_reaches_it() {
    let (mut harness, _) = same_vendor_network();
    let wired = sta_mac(9);
    add_wired_client(&mut harness, wired, None);

    harness
        .controller
        .with_context(|ctx| son_actions::start_client_locating(ctx, wired));
    harness.tick();
    let query = arp_queries(&harness, agent_mac(1), wired);
    assert_eq!(query.len(), 1);
    harness.deliver_vendor(agent_mac(1), &arp_reply(&query[0], wired, ARP_STATE_FAILED));

    harness.run_for(2_000);

    let db = harness.controller.db();
    assert_eq!(db.station(&wired).unwrap().parent_agent, None);
    assert_eq!(db.station_task(&wired, StationTaskKind::ClientLocating), None);
}

// ----------------------------------------------------------------------------
// Network Health Check
// ----------------------------------------------------------------------------

fn health_check_config() -> ControllerConfig {
    let mut config = ControllerConfig::testing();
    config.settings.health_check = true;
    config
}

/// Tick until the health check queries `sta` through `agent`
fn wait_for_arp_query(harness: &mut TestController, agent: MacAddress, sta: MacAddress) -> VendorMessage {
    for _ in 0..200 {
        harness.tick();
        if let Some(query) = arp_queries(harness, agent, sta).into_iter().next() {
            return query;
        }
    }
    panic!("no ARP query for {sta}");
}

#[test]
fn test_silent_repeater_is_declared_dead() {
    let mut harness = TestController::new(health_check_config());
    harness.add_radio(agent_mac(1), radio_mac(1), 36, Bandwidth::Bw80);
    harness.add_bss(radio_mac(1), bss_mac(1), "home");
    harness.connect_station(sta_mac(1), bss_mac(1));

    harness.run_for(5_000);
    assert_eq!(
        harness.controller.db().agent(&agent_mac(1)).unwrap().state,
        AgentState::Connected
    );

    harness.run_for(7_000);
    let db = harness.controller.db();
    assert_eq!(db.agent(&agent_mac(1)).unwrap().state, AgentState::Disconnected);
    assert!(!db.radio(&radio_mac(1)).unwrap().active);
    assert!(!db.station(&sta_mac(1)).unwrap().is_connected());
}

#[test]
fn test_reachable_wired_client_is_kept() {
    let mut config = health_check_config();
    config.health_check.ire_last_seen_timeout_ms = 3_600_000;
    let mut harness = TestController::new(config);
    harness.add_radio(agent_mac(1), radio_mac(1), 36, Bandwidth::Bw80);
    let wired = sta_mac(9);
    add_wired_client(&mut harness, wired, Some(agent_mac(1)));

    let query = wait_for_arp_query(&mut harness, agent_mac(1), wired);
    harness.deliver_vendor(agent_mac(1), &arp_reply(&query, wired, ARP_STATE_REACHABLE));
    let answered_at = harness.controller.now();
    harness.run_for(2_000);

    let station = harness.controller.db().station(&wired).unwrap();
    assert!(station.is_connected());
    assert_eq!(station.last_seen, answered_at);
    assert_eq!(station.parent_agent, Some(agent_mac(1)));
}

#[test]
fn test_unreachable_wired_client_is_dropped() {
    let mut config = health_check_config();
    config.health_check.ire_last_seen_timeout_ms = 3_600_000;
    let mut harness = TestController::new(config);
    harness.add_radio(agent_mac(1), radio_mac(1), 36, Bandwidth::Bw80);
    let wired = sta_mac(9);
    add_wired_client(&mut harness, wired, Some(agent_mac(1)));

    wait_for_arp_query(&mut harness, agent_mac(1), wired);
    harness.run_for(2_000);

    let station = harness.controller.db().station(&wired).unwrap();
    assert!(!station.is_connected());
    assert_eq!(station.parent_agent, None);
    assert_eq!(
        harness.controller.db().agent(&agent_mac(1)).unwrap().state,
        AgentState::Connected
    );
}
