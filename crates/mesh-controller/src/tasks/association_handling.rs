//! Association handling
//!
//! Follow-up on a freshly associated client of a same-vendor agent: request 11k beacon
//! measurement support, ask the serving agent to start monitoring the client, then
//! collect cross RSSI readings from the other agents.

use std::net::Ipv4Addr;

use mesh_core::protocol::vendor::{control_op, ControlMessage, VendorBody};
use mesh_core::protocol::VendorMessage;
use mesh_core::{MacAddress, Timestamp};
use tracing::{debug, info};

use super::{PendingKey, Task, TaskBase, TaskContext};
use crate::db::Radio;

pub const BEACON_11K_TIMEOUT_MS: u64 = 3_000;
pub const START_MONITORING_TIMEOUT_MS: u64 = 3_000;
pub const RX_RSSI_TIMEOUT_MS: u64 = 3_000;

/// Measurement mode "active" of an 11k beacon request
const BEACON_MODE_ACTIVE: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssociationState {
    CheckBeaconSupport,
    StartMonitoring,
    RequestRxRssi,
    Finish,
}

pub struct AssociationHandlingTask {
    base: TaskBase,
    state: AssociationState,
    sta_mac: MacAddress,
    bssid: MacAddress,
}

struct Serving {
    agent: MacAddress,
    radio: MacAddress,
    channel: u8,
    operating_class: u8,
    bandwidth: mesh_core::Bandwidth,
    ipv4: Ipv4Addr,
    is_ire: bool,
}

impl AssociationHandlingTask {
    pub fn new(sta_mac: MacAddress, bssid: MacAddress) -> Self {
        Self {
            base: TaskBase::new(),
            state: AssociationState::CheckBeaconSupport,
            sta_mac,
            bssid,
        }
    }

    pub fn sta_mac(&self) -> MacAddress {
        self.sta_mac
    }

    fn serving(&self, ctx: &TaskContext<'_>) -> Option<Serving> {
        let station = ctx.db.station(&self.sta_mac)?;
        if !station.is_connected() || station.parent_bssid != Some(self.bssid) {
            return None;
        }
        let radio: &Radio = ctx.db.radio_of_bss(&self.bssid)?;
        let agent = ctx.db.agent(&radio.agent)?;
        if !agent.is_prplmesh {
            return None;
        }
        Some(Serving {
            agent: agent.al_mac,
            radio: radio.ruid,
            channel: radio.channel.channel,
            operating_class: radio.operating_class,
            bandwidth: radio.channel.bandwidth,
            ipv4: station.ipv4.unwrap_or(Ipv4Addr::UNSPECIFIED),
            is_ire: station.is_backhaul,
        })
    }

    fn request(
        &mut self,
        ctx: &mut TaskContext<'_>,
        dst: MacAddress,
        radio: MacAddress,
        message: ControlMessage,
        response_op: u8,
    ) -> bool {
        let message = VendorMessage::control(message).with_radio(radio);
        if ctx.send_request(dst, message).is_err() {
            return false;
        }
        self.base.add_pending_mac(dst, response_op);
        true
    }

    fn advance(&mut self, now: Timestamp) {
        self.state = match self.state {
            AssociationState::CheckBeaconSupport => AssociationState::StartMonitoring,
            AssociationState::StartMonitoring => AssociationState::RequestRxRssi,
            AssociationState::RequestRxRssi | AssociationState::Finish => AssociationState::Finish,
        };
        self.base.wait_for(now, 0);
    }
}

impl Task for AssociationHandlingTask {
    fn name(&self) -> &'static str {
        "association_handling"
    }

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn work(&mut self, ctx: &mut TaskContext<'_>) {
        if self.state == AssociationState::Finish {
            self.base.finish();
            return;
        }
        let Some(serving) = self.serving(ctx) else {
            debug!(sta = %self.sta_mac, "station left or agent not same-vendor");
            self.base.finish();
            return;
        };

        match self.state {
            AssociationState::CheckBeaconSupport => {
                let supported = ctx
                    .db
                    .station(&self.sta_mac)
                    .map(|sta| sta.beacon_measurement_supported)
                    .unwrap_or(false);
                let request = ControlMessage::Beacon11kRequest {
                    measurement_mode: BEACON_MODE_ACTIVE,
                    channel: serving.channel,
                    op_class: serving.operating_class,
                    rand_ival: 0,
                    duration: 50,
                    sta_mac: self.sta_mac,
                    bssid: self.bssid,
                    expected_reports_count: 1,
                };
                if supported
                    && self.request(ctx, serving.agent, serving.radio, request, control_op::BEACON_11K_RESPONSE)
                {
                    self.base.set_responses_timeout(ctx.now, BEACON_11K_TIMEOUT_MS);
                    self.state = AssociationState::StartMonitoring;
                } else {
                    self.advance(ctx.now);
                }
            }
            AssociationState::StartMonitoring => {
                let request = ControlMessage::StartMonitoringRequest {
                    mac: self.sta_mac,
                    ipv4: serving.ipv4,
                    is_ire: serving.is_ire,
                    bridge_4addr_mac: MacAddress::ZERO,
                };
                if self.request(
                    ctx,
                    serving.agent,
                    serving.radio,
                    request,
                    control_op::START_MONITORING_RESPONSE,
                ) {
                    self.base.set_responses_timeout(ctx.now, START_MONITORING_TIMEOUT_MS);
                    self.state = AssociationState::RequestRxRssi;
                } else {
                    self.advance(ctx.now);
                }
            }
            AssociationState::RequestRxRssi => {
                let others: Vec<MacAddress> = ctx
                    .db
                    .agents()
                    .filter(|agent| agent.is_connected() && agent.is_prplmesh && agent.al_mac != serving.agent)
                    .map(|agent| agent.al_mac)
                    .collect();
                let mut sent = 0;
                for agent in others {
                    let request = ControlMessage::RxRssiMeasurementRequest {
                        mac: self.sta_mac,
                        ipv4: serving.ipv4,
                        channel: serving.channel,
                        bandwidth: serving.bandwidth,
                        cross: true,
                    };
                    if self.request(ctx, agent, MacAddress::ZERO, request, control_op::RX_RSSI_MEASUREMENT_RESPONSE) {
                        sent += 1;
                    }
                }
                if sent > 0 {
                    self.base.set_responses_timeout(ctx.now, RX_RSSI_TIMEOUT_MS);
                }
                self.state = AssociationState::Finish;
            }
            AssociationState::Finish => {}
        }
    }

    fn handle_response(&mut self, ctx: &mut TaskContext<'_>, src: MacAddress, message: &VendorMessage) {
        let VendorBody::Control(control) = &message.body else {
            return;
        };
        match control {
            ControlMessage::Beacon11kResponse { sta_mac, rcpi, .. } => {
                debug!(sta = %sta_mac, rcpi, "beacon measurement supported");
            }
            ControlMessage::StartMonitoringResponse { success } => {
                debug!(sta = %self.sta_mac, agent = %src, success, "monitoring started");
            }
            ControlMessage::RxRssiMeasurementResponse { mac, rx_rssi, .. } if *mac == self.sta_mac => {
                let radio = if message.radio_mac.is_zero() { src } else { message.radio_mac };
                if let Some(station) = ctx.db.station_mut(mac) {
                    station.cross_rx_rssi.insert(radio, *rx_rssi);
                }
            }
            _ => {}
        }
    }

    fn handle_responses_timeout(&mut self, ctx: &mut TaskContext<'_>, pending: &[PendingKey]) {
        let beacon_missing = pending
            .iter()
            .any(|(_, op)| *op == control_op::BEACON_11K_RESPONSE);
        if beacon_missing {
            info!(sta = %self.sta_mac, "no beacon report, marking 11k unsupported");
            if let Some(station) = ctx.db.station_mut(&self.sta_mac) {
                station.beacon_measurement_supported = false;
            }
        }
    }
}
