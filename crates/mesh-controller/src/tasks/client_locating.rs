//! Client locating
//!
//! Finds the agent a wired client (or a repeater's wired backhaul) sits behind by
//! asking every same-vendor agent to ARP-query it. The first agent that reports the
//! neighbour as reachable becomes its parent.

use std::net::Ipv4Addr;

use mesh_core::protocol::vendor::{control_op, ControlMessage, VendorBody};
use mesh_core::protocol::VendorMessage;
use mesh_core::MacAddress;
use tracing::{debug, info};

use super::{PendingKey, Task, TaskBase, TaskContext};
use crate::db::StationState;

/// Neighbour table state reported for a reachable entry
pub const ARP_STATE_REACHABLE: u8 = 2;

pub struct ClientLocatingTask {
    base: TaskBase,
    sta_mac: MacAddress,
    started: bool,
    located: Option<MacAddress>,
}

impl ClientLocatingTask {
    pub fn new(sta_mac: MacAddress) -> Self {
        Self {
            base: TaskBase::new(),
            sta_mac,
            started: false,
            located: None,
        }
    }

    pub fn sta_mac(&self) -> MacAddress {
        self.sta_mac
    }

    pub fn located(&self) -> Option<MacAddress> {
        self.located
    }

    fn reparent(&mut self, ctx: &mut TaskContext<'_>, agent: MacAddress) {
        self.located = Some(agent);
        let now = ctx.now;
        let station = ctx.db.add_station(self.sta_mac, now);
        station.parent_bssid = None;
        station.parent_agent = Some(agent);
        station.is_wireless = false;
        station.state = StationState::Connected;
        station.last_seen = now;

        let owner = ctx.db.agent_by_backhaul_sta(&self.sta_mac).map(|owner| owner.al_mac);
        if let Some(owner) = owner.filter(|owner| *owner != agent) {
            if let Some(repeater) = ctx.db.agent_mut(&owner) {
                repeater.parent = Some(agent);
                repeater.wired_backhaul = true;
            }
        }
        info!(sta = %self.sta_mac, agent = %agent, "wired client located");
    }
}

impl Task for ClientLocatingTask {
    fn name(&self) -> &'static str {
        "client_locating"
    }

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn work(&mut self, ctx: &mut TaskContext<'_>) {
        if self.started {
            self.base.finish();
            return;
        }
        self.started = true;

        let ipv4 = ctx
            .db
            .station(&self.sta_mac)
            .and_then(|sta| sta.ipv4)
            .unwrap_or(Ipv4Addr::UNSPECIFIED);
        let agents: Vec<MacAddress> = ctx
            .db
            .agents()
            .filter(|agent| agent.is_connected() && agent.is_prplmesh)
            .map(|agent| agent.al_mac)
            .collect();

        for agent in agents {
            let request = VendorMessage::control(ControlMessage::ArpQueryRequest {
                mac: self.sta_mac,
                ipv4,
            });
            if ctx.send_request(agent, request).is_ok() {
                self.base.add_pending_mac(agent, control_op::ARP_QUERY_RESPONSE);
            }
        }
        if self.base.has_pending_responses() {
            let timeout = ctx.config.health_check.arp_query_timeout_ms;
            self.base.set_responses_timeout(ctx.now, timeout);
        } else {
            debug!(sta = %self.sta_mac, "no agent to ask");
            self.base.finish();
        }
    }

    fn handle_response(&mut self, ctx: &mut TaskContext<'_>, src: MacAddress, message: &VendorMessage) {
        let VendorBody::Control(ControlMessage::ArpQueryResponse { mac, state, .. }) = &message.body else {
            return;
        };
        if *mac != self.sta_mac || self.located.is_some() {
            return;
        }
        if *state == ARP_STATE_REACHABLE {
            self.reparent(ctx, src);
            self.base.finish();
        }
    }

    fn handle_responses_timeout(&mut self, _ctx: &mut TaskContext<'_>, pending: &[PendingKey]) {
        debug!(sta = %self.sta_mac, unanswered = pending.len(), "client not located");
    }
}
