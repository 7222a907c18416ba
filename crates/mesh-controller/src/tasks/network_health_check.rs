//! Network health check
//!
//! Periodic liveness sweep. Repeaters silent for longer than the IRE timeout are
//! handled as dead; wired clients silent for longer than the client timeout are
//! ARP-queried through their parent agent and dropped if no agent vouches for them.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use mesh_core::protocol::vendor::{control_op, ControlMessage, VendorBody};
use mesh_core::protocol::VendorMessage;
use mesh_core::MacAddress;
use tracing::{debug, info, warn};

use super::client_locating::ARP_STATE_REACHABLE;
use super::{PendingKey, Task, TaskBase, TaskContext};
use crate::son_actions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HealthState {
    Start,
    Check,
    Evaluate,
}

pub struct NetworkHealthCheckTask {
    base: TaskBase,
    state: HealthState,
    suspects: BTreeSet<MacAddress>,
}

impl Default for NetworkHealthCheckTask {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkHealthCheckTask {
    pub fn new() -> Self {
        Self {
            base: TaskBase::new(),
            state: HealthState::Start,
            suspects: BTreeSet::new(),
        }
    }

    pub fn suspects(&self) -> impl Iterator<Item = &MacAddress> {
        self.suspects.iter()
    }

    fn check_agents(ctx: &mut TaskContext<'_>) {
        let timeout = ctx.config.health_check.ire_last_seen_timeout_ms;
        let now = ctx.now;
        let dead: Vec<MacAddress> = ctx
            .db
            .agents()
            .filter(|agent| agent.is_connected() && !agent.is_gateway)
            .filter(|agent| now - agent.last_seen > timeout)
            .map(|agent| agent.al_mac)
            .collect();
        for al_mac in dead {
            warn!(agent = %al_mac, "repeater silent, handling as dead");
            son_actions::handle_dead_agent(ctx, al_mac);
        }
    }

    fn query_clients(&mut self, ctx: &mut TaskContext<'_>) {
        let timeout = ctx.config.health_check.client_last_seen_timeout_ms;
        let now = ctx.now;
        let stale: Vec<(MacAddress, MacAddress, Ipv4Addr)> = ctx
            .db
            .stations()
            .filter(|sta| sta.is_connected() && !sta.is_wireless && !sta.is_backhaul)
            .filter(|sta| now - sta.last_seen > timeout)
            .filter_map(|sta| {
                let agent = sta.parent_agent?;
                Some((sta.mac, agent, sta.ipv4.unwrap_or(Ipv4Addr::UNSPECIFIED)))
            })
            .collect();

        self.suspects.clear();
        for (mac, agent, ipv4) in stale {
            let request = VendorMessage::control(ControlMessage::ArpQueryRequest { mac, ipv4 });
            if ctx.send_request(agent, request).is_ok() {
                self.base.add_pending_mac(agent, control_op::ARP_QUERY_RESPONSE);
                self.suspects.insert(mac);
            }
        }
        if !self.suspects.is_empty() {
            debug!(suspects = self.suspects.len(), "probing silent wired clients");
            let timeout = ctx.config.health_check.arp_query_timeout_ms;
            self.base.set_responses_timeout(ctx.now, timeout);
        }
    }
}

impl Task for NetworkHealthCheckTask {
    fn name(&self) -> &'static str {
        "network_health_check"
    }

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn work(&mut self, ctx: &mut TaskContext<'_>) {
        match self.state {
            HealthState::Start => {
                self.state = HealthState::Check;
                self.base
                    .wait_for(ctx.now, ctx.config.health_check.starting_delay_ms);
            }
            HealthState::Check => {
                Self::check_agents(ctx);
                self.query_clients(ctx);
                if self.suspects.is_empty() {
                    self.base.wait_for(ctx.now, ctx.config.health_check.interval_ms);
                } else {
                    self.state = HealthState::Evaluate;
                }
            }
            HealthState::Evaluate => {
                for mac in core::mem::take(&mut self.suspects) {
                    info!(sta = %mac, "wired client unreachable");
                    son_actions::handle_dead_station(ctx, mac);
                }
                self.state = HealthState::Check;
                self.base.wait_for(ctx.now, ctx.config.health_check.interval_ms);
            }
        }
    }

    fn handle_response(&mut self, ctx: &mut TaskContext<'_>, _src: MacAddress, message: &VendorMessage) {
        if let VendorBody::Control(ControlMessage::ArpQueryResponse { mac, state, .. }) = &message.body {
            if *state == ARP_STATE_REACHABLE && self.suspects.remove(mac) {
                debug!(sta = %mac, "wired client answered");
                ctx.db.update_last_seen(mac, ctx.now);
            }
        }
    }

    fn handle_responses_timeout(&mut self, _ctx: &mut TaskContext<'_>, pending: &[PendingKey]) {
        debug!(unanswered = pending.len(), "ARP queries timed out");
    }
}
