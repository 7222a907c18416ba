//! Client steering
//!
//! Moves one station to a target BSS. Regular clients get the target unblocked, every
//! other BSS of the same SSID temporarily blocked and, after a short settle delay, a
//! mandated steering request; a repeater's backhaul station gets a backhaul steering
//! request instead. The outcome lands in the steering statistics and history.

use mesh_core::protocol::tlv::{
    AssociationControl, BackhaulSteeringRequestTlv, ClientAssociationControlRequestTlv,
    SteeringRequestTlv, SteeringTarget,
};
use mesh_core::protocol::MessageType;
use mesh_core::{FreqBand, MacAddress, Timestamp};
use tracing::{debug, info, warn};

use super::{EventKind, Task, TaskBase, TaskContext, TaskEvent};
use crate::db::SteeringHistoryEntry;

/// Time the station gets to show up on the target BSS
pub const STEERING_WAIT_TIME_MS: u64 = 25_000;
/// Delay between blocking the other BSSes and the steering request
pub const STEERING_SETTLE_MS: u64 = 500;
/// Validity of the temporary block on the other BSSes
pub const BLOCK_VALIDITY_SEC: u16 = 30;

/// BTM status code 0 means the station accepted the transition
const BTM_STATUS_ACCEPT: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SteeringState {
    Steer,
    SendSteeringRequest,
    WaitForConnect,
    Finalize,
}

pub struct ClientSteeringTask {
    base: TaskBase,
    state: SteeringState,
    sta_mac: MacAddress,
    target_bssid: MacAddress,
    original_bssid: Option<MacAddress>,
    triggered_by: String,
    disassoc_imminent: bool,
    disassoc_timer_ms: u32,
    btm: bool,
    success: bool,
    disconnected: bool,
    deadline: Timestamp,
}

impl ClientSteeringTask {
    pub fn new(
        sta_mac: MacAddress,
        target_bssid: MacAddress,
        triggered_by: impl Into<String>,
        disassoc_timer_ms: u32,
    ) -> Self {
        Self {
            base: TaskBase::new(),
            state: SteeringState::Steer,
            sta_mac,
            target_bssid,
            original_bssid: None,
            triggered_by: triggered_by.into(),
            disassoc_imminent: disassoc_timer_ms > 0,
            disassoc_timer_ms,
            btm: false,
            success: false,
            disconnected: false,
            deadline: Timestamp::default(),
        }
    }

    pub fn sta_mac(&self) -> MacAddress {
        self.sta_mac
    }

    pub fn target_bssid(&self) -> MacAddress {
        self.target_bssid
    }

    fn association_control(
        ctx: &mut TaskContext<'_>,
        bssid: MacAddress,
        control: AssociationControl,
        validity_period_sec: u16,
        sta_mac: MacAddress,
    ) {
        let Some(agent) = ctx.db.agent_of_bss(&bssid) else {
            debug!(bssid = %bssid, "no agent for association control");
            return;
        };
        let cmdu = ctx
            .new_cmdu(MessageType::ClientAssociationControlRequest)
            .with(&ClientAssociationControlRequestTlv {
                bssid,
                control,
                validity_period_sec,
                sta_list: vec![sta_mac],
            });
        if let Err(e) = ctx.send(agent, &cmdu) {
            warn!(sta = %sta_mac, bssid = %bssid, ?control, error = %e, "association control not sent");
        }
    }

    fn steer(&mut self, ctx: &mut TaskContext<'_>) {
        let Some(station) = ctx.db.station_mut(&self.sta_mac) else {
            warn!(sta = %self.sta_mac, "steering an unknown station");
            self.base.finish();
            return;
        };
        station.handoff = true;
        self.original_bssid = station.parent_bssid;
        self.btm = station.btm_supported;
        let is_backhaul = station.is_backhaul;

        if self.original_bssid == Some(self.target_bssid) {
            info!(sta = %self.sta_mac, bssid = %self.target_bssid, "already on target, nothing to steer");
            self.state = SteeringState::Finalize;
            self.finalize(ctx);
            return;
        }
        let Some((operating_class, channel)) = ctx
            .db
            .radio_of_bss(&self.target_bssid)
            .map(|radio| (radio.operating_class, radio.channel.channel))
        else {
            warn!(bssid = %self.target_bssid, "steering target unknown");
            self.state = SteeringState::Finalize;
            self.finalize(ctx);
            return;
        };

        info!(
            sta = %self.sta_mac,
            from = ?self.original_bssid,
            to = %self.target_bssid,
            btm = self.btm,
            by = %self.triggered_by,
            "steering client"
        );
        Self::association_control(ctx, self.target_bssid, AssociationControl::Unblock, 0, self.sta_mac);

        if is_backhaul {
            let Some(agent) = ctx.db.agent_by_backhaul_sta(&self.sta_mac).map(|agent| agent.al_mac) else {
                warn!(sta = %self.sta_mac, "no agent owns this backhaul station");
                self.state = SteeringState::Finalize;
                return;
            };
            let cmdu = ctx
                .new_cmdu(MessageType::BackhaulSteeringRequest)
                .with(&BackhaulSteeringRequestTlv {
                    backhaul_sta_mac: self.sta_mac,
                    target_bssid: self.target_bssid,
                    operating_class,
                    channel,
                });
            if let Err(e) = ctx.send(agent, &cmdu) {
                warn!(sta = %self.sta_mac, agent = %agent, error = %e, "backhaul steering request not sent");
                self.state = SteeringState::Finalize;
                self.finalize(ctx);
                return;
            }
            self.wait_for_connect(ctx.now);
            return;
        }

        let others: Vec<MacAddress> = ctx
            .db
            .same_ssid_bsses(&self.target_bssid)
            .into_iter()
            .filter(|bssid| !(self.btm && Some(*bssid) == self.original_bssid))
            .collect();
        for bssid in others {
            Self::association_control(
                ctx,
                bssid,
                AssociationControl::TimedBlock,
                BLOCK_VALIDITY_SEC,
                self.sta_mac,
            );
        }
        self.state = SteeringState::SendSteeringRequest;
        self.base.wait_for(ctx.now, STEERING_SETTLE_MS);
    }

    fn send_steering_request(&mut self, ctx: &mut TaskContext<'_>) {
        let original = self.original_bssid;
        let agent = original.and_then(|bssid| ctx.db.agent_of_bss(&bssid));
        let target_radio = ctx
            .db
            .radio_of_bss(&self.target_bssid)
            .map(|radio| (radio.operating_class, radio.channel.channel));
        if let (Some(original), Some(agent), Some((operating_class, channel))) = (original, agent, target_radio) {
            let cmdu = ctx
                .new_cmdu(MessageType::ClientSteeringRequest)
                .with(&SteeringRequestTlv {
                    bssid: original,
                    request_mode_mandate: true,
                    btm_disassociation_imminent: self.disassoc_imminent,
                    btm_abridged: true,
                    steering_opportunity_window_sec: 0,
                    btm_disassociation_timer: (self.disassoc_timer_ms / 100).min(u16::MAX as u32) as u16,
                    sta_list: vec![self.sta_mac],
                    targets: vec![SteeringTarget {
                        bssid: self.target_bssid,
                        operating_class,
                        channel,
                    }],
                });
            if let Err(e) = ctx.send(agent, &cmdu) {
                warn!(sta = %self.sta_mac, agent = %agent, error = %e, "steering request not sent");
                self.state = SteeringState::Finalize;
                self.finalize(ctx);
                return;
            }
        } else {
            // not associated anywhere; the blocks alone steer it
            debug!(sta = %self.sta_mac, "no serving agent, skipping steering request");
        }
        self.wait_for_connect(ctx.now);
    }

    fn wait_for_connect(&mut self, now: Timestamp) {
        self.state = SteeringState::WaitForConnect;
        self.deadline = now + STEERING_WAIT_TIME_MS;
        self.base.wait_for_event(EventKind::StaConnected, now, STEERING_WAIT_TIME_MS);
    }

    fn keep_waiting(&mut self, now: Timestamp) {
        let remaining = self.deadline - now;
        self.base.wait_for_event(EventKind::StaConnected, now, remaining);
    }

    fn finalize(&mut self, ctx: &mut TaskContext<'_>) {
        let stats = &mut ctx.db.steering_stats;
        stats.record_attempt(self.btm);
        stats.record_outcome(self.btm, self.success);
        if self.success {
            let from = self
                .original_bssid
                .and_then(|bssid| ctx.db.radio_of_bss(&bssid))
                .map(|radio| radio.band)
                .unwrap_or(FreqBand::Unknown);
            let to = ctx
                .db
                .radio_of_bss(&self.target_bssid)
                .map(|radio| radio.band)
                .unwrap_or(FreqBand::Unknown);
            ctx.db.steering_stats.record_band_transition(from, to);
        }
        ctx.db.persistent.record_steering(SteeringHistoryEntry {
            timestamp: ctx.now,
            sta_mac: self.sta_mac,
            original_bssid: self.original_bssid,
            target_bssid: self.target_bssid,
            triggered_by: self.triggered_by.clone(),
            btm: self.btm,
            success: self.success,
        });
        if let Some(station) = ctx.db.station_mut(&self.sta_mac) {
            station.handoff = false;
        }
        info!(sta = %self.sta_mac, success = self.success, "steering finished");
        self.base.finish();
    }
}

impl Task for ClientSteeringTask {
    fn name(&self) -> &'static str {
        "client_steering"
    }

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn work(&mut self, ctx: &mut TaskContext<'_>) {
        match self.state {
            SteeringState::Steer => self.steer(ctx),
            SteeringState::SendSteeringRequest => self.send_steering_request(ctx),
            SteeringState::WaitForConnect => self.keep_waiting(ctx.now),
            SteeringState::Finalize => self.finalize(ctx),
        }
    }

    fn handle_event(&mut self, ctx: &mut TaskContext<'_>, event: &TaskEvent) {
        if self.state != SteeringState::WaitForConnect {
            return;
        }
        match event {
            TaskEvent::StaConnected { sta, bssid } if *sta == self.sta_mac => {
                if *bssid == self.target_bssid {
                    self.success = true;
                    self.state = SteeringState::Finalize;
                    self.base.wake();
                } else {
                    debug!(sta = %sta, bssid = %bssid, "connected elsewhere, still waiting");
                    self.keep_waiting(ctx.now);
                }
            }
            TaskEvent::StaDisconnected { sta, .. } if *sta == self.sta_mac => {
                self.disconnected = true;
            }
            TaskEvent::BtmReport { sta, status_code, .. } if *sta == self.sta_mac => {
                if *status_code != BTM_STATUS_ACCEPT && !self.disassoc_imminent {
                    info!(sta = %sta, status_code, "BTM request rejected");
                    self.base.clear_event_wait();
                    self.state = SteeringState::Finalize;
                    self.base.wake();
                }
            }
            _ => {}
        }
    }

    fn handle_events_timeout(&mut self, _ctx: &mut TaskContext<'_>, _kind: EventKind) {
        warn!(
            sta = %self.sta_mac,
            target = %self.target_bssid,
            disconnected = self.disconnected,
            "station did not reach the target"
        );
        self.state = SteeringState::Finalize;
    }

    fn handle_task_end(&mut self, ctx: &mut TaskContext<'_>) {
        ctx.db.clear_task_references(self.id());
        if self.state != SteeringState::Finalize {
            // killed by a newer steering
            if let Some(station) = ctx.db.station_mut(&self.sta_mac) {
                station.handoff = false;
            }
        }
    }
}
