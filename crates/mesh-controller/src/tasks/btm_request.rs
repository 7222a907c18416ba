//! BSS transition management request
//!
//! Sends one 11v-style steering request for a station and waits for its BTM report.
//! Any report, accepting or not, proves the station speaks 11v.

use mesh_core::protocol::tlv::{SteeringRequestTlv, SteeringTarget};
use mesh_core::protocol::MessageType;
use mesh_core::{MacAddress, Timestamp};
use tracing::{debug, info, warn};

use super::{EventKind, Task, TaskBase, TaskContext, TaskEvent};

pub const BTM_REPORT_TIMEOUT_MS: u64 = 5_000;

pub struct BtmRequestTask {
    base: TaskBase,
    sta_mac: MacAddress,
    target_bssid: MacAddress,
    disassoc_imminent: bool,
    sent: bool,
    report_deadline: Timestamp,
}

impl BtmRequestTask {
    pub fn new(sta_mac: MacAddress, target_bssid: MacAddress, disassoc_imminent: bool) -> Self {
        Self {
            base: TaskBase::new(),
            sta_mac,
            target_bssid,
            disassoc_imminent,
            sent: false,
            report_deadline: Timestamp::default(),
        }
    }

    pub fn sta_mac(&self) -> MacAddress {
        self.sta_mac
    }
}

impl Task for BtmRequestTask {
    fn name(&self) -> &'static str {
        "btm_request"
    }

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn work(&mut self, ctx: &mut TaskContext<'_>) {
        if self.sent {
            // report handled or timed out
            self.base.finish();
            return;
        }
        let serving = ctx.db.station(&self.sta_mac).and_then(|sta| sta.parent_bssid);
        let agent = serving.and_then(|bssid| ctx.db.agent_of_bss(&bssid));
        let target = ctx
            .db
            .radio_of_bss(&self.target_bssid)
            .map(|radio| (radio.operating_class, radio.channel.channel));
        let (Some(serving), Some(agent), Some((operating_class, channel))) = (serving, agent, target) else {
            debug!(sta = %self.sta_mac, "station or target not known, no BTM request");
            self.base.finish();
            return;
        };

        let cmdu = ctx
            .new_cmdu(MessageType::ClientSteeringRequest)
            .with(&SteeringRequestTlv {
                bssid: serving,
                request_mode_mandate: true,
                btm_disassociation_imminent: self.disassoc_imminent,
                btm_abridged: false,
                steering_opportunity_window_sec: 0,
                btm_disassociation_timer: 0,
                sta_list: vec![self.sta_mac],
                targets: vec![SteeringTarget {
                    bssid: self.target_bssid,
                    operating_class,
                    channel,
                }],
            });
        if let Err(e) = ctx.send(agent, &cmdu) {
            warn!(sta = %self.sta_mac, agent = %agent, error = %e, "BTM request not sent");
            self.base.finish();
            return;
        }
        self.sent = true;
        self.report_deadline = ctx.now + BTM_REPORT_TIMEOUT_MS;
        self.base
            .wait_for_event(EventKind::BtmReport, ctx.now, BTM_REPORT_TIMEOUT_MS);
    }

    fn handle_event(&mut self, ctx: &mut TaskContext<'_>, event: &TaskEvent) {
        if let TaskEvent::BtmReport { sta, status_code, .. } = event {
            if *sta != self.sta_mac {
                // keep waiting until the original deadline
                let remaining = self.report_deadline - ctx.now;
                self.base.wait_for_event(EventKind::BtmReport, ctx.now, remaining);
                return;
            }
            info!(sta = %sta, status_code, "BTM report received");
            if let Some(station) = ctx.db.station_mut(sta) {
                station.btm_supported = true;
            }
            self.base.finish();
        }
    }

    fn handle_events_timeout(&mut self, _ctx: &mut TaskContext<'_>, _kind: EventKind) {
        debug!(sta = %self.sta_mac, "no BTM report");
        self.base.finish();
    }
}
