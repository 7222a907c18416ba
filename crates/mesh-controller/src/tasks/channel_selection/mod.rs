//! Channel selection
//!
//! This module contains the controller's channel planning:
//! - `ccl`: the candidate channel list built for one radio at a time
//!
//! [`ChannelSelectionTask`] is a single long-lived task driving one radio's workflow at
//! a time. Channel events for other radios wait in a FIFO until the in-flight radio
//! returns to idle; a `Deleted` event drops everything queued for a dead radio.

pub mod ccl;

use std::collections::VecDeque;

use hashbrown::HashMap;
use mesh_core::channel::{
    calc_5g_20mhz_subband_channels, channel_to_vht_center_freq, freq_to_channel,
    get_5g_20mhz_channels, is_dfs_channel, which_subband, WifiChannel,
};
use mesh_core::protocol::vendor::{switch_reason, ChannelSwitchParams, SupportedChannel};
use mesh_core::protocol::{ControlMessage, VendorMessage};
use mesh_core::{Bandwidth, FreqBand, MacAddress, Timestamp};
use tracing::{debug, info, warn};

use super::{EventKind, Task, TaskBase, TaskContext, TaskEvent};
use crate::son_actions;

// Re-export CCL types
pub use ccl::{CandidateChannelList, CclEntry};

/// Wait for a restricted/fail-safe channel response
pub const RESTRICTED_CHANNEL_RESPONSE_TIMEOUT_MS: u64 = 3_000;
/// Wait for an ACS result or a CSA after a switch request
pub const ACS_CSA_TIMEOUT_MS: u64 = 10_000;
/// Clients get this long to leave a radio before DFS re-entry
pub const DFS_REENTRY_WAIT_MS: u64 = 20_000;
/// Upper bound on a channel availability check
pub const CAC_TIMEOUT_MS: u64 = 11 * 60 * 1_000;
const IDLE_POLL_MS: u64 = 1_000;
const DFS_REENTRY_POLL_MS: u64 = 1_000;

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// Events driving the channel selection workflow, each for one radio
#[derive(Debug, Clone, PartialEq)]
pub enum CsEvent {
    SlaveJoined {
        radio_mac: MacAddress,
    },
    RestrictedChannelResponse {
        radio_mac: MacAddress,
        success: bool,
    },
    AcsResponse {
        radio_mac: MacAddress,
        cs_params: ChannelSwitchParams,
        supported_channels: Vec<SupportedChannel>,
    },
    CsaNotification {
        radio_mac: MacAddress,
        cs_params: ChannelSwitchParams,
    },
    CacCompleted {
        radio_mac: MacAddress,
        success: bool,
        channel: u8,
        bandwidth: Bandwidth,
    },
    DfsChannelAvailable {
        radio_mac: MacAddress,
        channel: u8,
        bandwidth: Bandwidth,
        vht_center_frequency: u16,
    },
    /// Northbound channel switch or channel selection trigger; channel 0 asks for ACS
    HostapChannelRequest {
        radio_mac: MacAddress,
        cs_params: ChannelSwitchParams,
    },
    DfsReentryPending {
        radio_mac: MacAddress,
    },
    /// The restricted channel list changed
    ConfiguredRestricted {
        radio_mac: MacAddress,
    },
    /// The radio is gone; drop its queued events
    Deleted {
        radio_mac: MacAddress,
    },
}

impl CsEvent {
    pub fn radio_mac(&self) -> MacAddress {
        match self {
            CsEvent::SlaveJoined { radio_mac }
            | CsEvent::RestrictedChannelResponse { radio_mac, .. }
            | CsEvent::AcsResponse { radio_mac, .. }
            | CsEvent::CsaNotification { radio_mac, .. }
            | CsEvent::CacCompleted { radio_mac, .. }
            | CsEvent::DfsChannelAvailable { radio_mac, .. }
            | CsEvent::HostapChannelRequest { radio_mac, .. }
            | CsEvent::DfsReentryPending { radio_mac }
            | CsEvent::ConfiguredRestricted { radio_mac }
            | CsEvent::Deleted { radio_mac } => *radio_mac,
        }
    }
}

// ----------------------------------------------------------------------------
// States
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CsState {
    Init,
    Idle,
    OnSlaveJoined,
    OnHostapChannelRequest,
    ComputeIreCandidateChannels,
    SendRestrictedFailSafeChannel,
    SendRestrictedChannelForUsedBands,
    SendClearRestrictedChannel,
    WaitForRestrictedChannelResponse,
    WaitForClearRestrictedChannelResponse,
    OnRestrictedFailSafeChannelResponse,
    SendAcs,
    WaitForAcsResponse,
    OnAcsResponse,
    SendChannelSwitch,
    WaitForCsaNotification,
    OnCsaNotification,
    ActivateSlave,
    OnCacCompletedNotification,
    OnDfsChannelAvailable,
    OnFailSafeChannel,
    SteerStaBeforeDfsReentry,
    OnDfsReentryPending,
    SteerStaBackAfterDfsReentry,
    OnConfiguredRestrictedChannels,
    GotoIdle,
}

impl CsState {
    /// Waiting states and the event that ends each of them
    fn accepts(self, event: &CsEvent) -> Option<CsState> {
        match (self, event) {
            (CsState::WaitForRestrictedChannelResponse, CsEvent::RestrictedChannelResponse { .. }) => {
                Some(CsState::OnRestrictedFailSafeChannelResponse)
            }
            (
                CsState::WaitForClearRestrictedChannelResponse,
                CsEvent::RestrictedChannelResponse { .. },
            ) => Some(CsState::ActivateSlave),
            (CsState::WaitForAcsResponse, CsEvent::AcsResponse { .. }) => Some(CsState::OnAcsResponse),
            (CsState::WaitForCsaNotification, CsEvent::CsaNotification { .. }) => {
                Some(CsState::OnCsaNotification)
            }
            _ => None,
        }
    }

    /// First state of a workflow started by `event` from idle
    fn entry_for(event: &CsEvent) -> CsState {
        match event {
            CsEvent::SlaveJoined { .. } => CsState::OnSlaveJoined,
            CsEvent::HostapChannelRequest { .. } => CsState::OnHostapChannelRequest,
            CsEvent::CsaNotification { .. } => CsState::OnCsaNotification,
            CsEvent::AcsResponse { .. } => CsState::OnAcsResponse,
            CsEvent::CacCompleted { .. } => CsState::OnCacCompletedNotification,
            CsEvent::DfsChannelAvailable { .. } => CsState::OnDfsChannelAvailable,
            CsEvent::DfsReentryPending { .. } => CsState::OnDfsReentryPending,
            CsEvent::ConfiguredRestricted { .. } => CsState::OnConfiguredRestrictedChannels,
            // late responses with nothing waiting for them
            CsEvent::RestrictedChannelResponse { .. } | CsEvent::Deleted { .. } => CsState::GotoIdle,
        }
    }
}

/// Stations moved off a radio ahead of its DFS re-entry
#[derive(Debug, Clone)]
struct DfsReentry {
    radio_mac: MacAddress,
    target: ChannelSwitchParams,
    steered: Vec<(MacAddress, MacAddress)>,
    deadline: Timestamp,
}

// ----------------------------------------------------------------------------
// Channel Selection Task
// ----------------------------------------------------------------------------

pub struct ChannelSelectionTask {
    base: TaskBase,
    state: CsState,
    /// Radio whose workflow is in flight, zero when idle
    radio_mac: MacAddress,
    /// Event that started or last advanced the in-flight workflow
    current: Option<CsEvent>,
    queue: VecDeque<CsEvent>,
    state_deadline: Option<Timestamp>,
    /// The CSA being handled answers our own switch request
    csa_solicited: bool,
    restricted_sent: bool,
    channel_switch_required: bool,
    after_restricted: CsState,
    target: ChannelSwitchParams,
    cac_pending: HashMap<MacAddress, Timestamp>,
    reentry: Option<DfsReentry>,
}

impl Default for ChannelSelectionTask {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelSelectionTask {
    pub fn new() -> Self {
        Self {
            base: TaskBase::new(),
            state: CsState::Init,
            radio_mac: MacAddress::ZERO,
            current: None,
            queue: VecDeque::new(),
            state_deadline: None,
            csa_solicited: false,
            restricted_sent: false,
            channel_switch_required: false,
            after_restricted: CsState::SendAcs,
            target: ChannelSwitchParams::default(),
            cac_pending: HashMap::new(),
            reentry: None,
        }
    }

    pub fn state(&self) -> CsState {
        self.state
    }

    pub fn radio_in_flight(&self) -> Option<MacAddress> {
        (!self.radio_mac.is_zero()).then_some(self.radio_mac)
    }

    pub fn queued_events(&self) -> usize {
        self.queue.len()
    }

    pub fn is_cac_pending(&self, radio_mac: &MacAddress) -> bool {
        self.cac_pending.contains_key(radio_mac)
    }

    fn set_state(&mut self, state: CsState) {
        debug!(from = ?self.state, to = ?state, radio = %self.radio_mac, "channel selection");
        self.state = state;
    }

    /// Enter a waiting state; the deadline survives events for other radios
    fn wait(&mut self, ctx: &TaskContext<'_>, state: CsState, timeout_ms: u64) {
        self.set_state(state);
        let deadline = ctx.now + timeout_ms;
        self.state_deadline = Some(deadline);
        self.base.wait_for_event(EventKind::ChannelSelection, ctx.now, timeout_ms);
    }

    fn rearm_wait(&mut self, now: Timestamp) {
        if let Some(deadline) = self.state_deadline {
            let remaining = if deadline > now { deadline - now } else { 0 };
            self.base.wait_for_event(EventKind::ChannelSelection, now, remaining);
        }
    }

    fn begin(&mut self, event: CsEvent) {
        self.radio_mac = event.radio_mac();
        self.csa_solicited = false;
        self.restricted_sent = false;
        self.channel_switch_required = false;
        self.after_restricted = CsState::SendAcs;
        self.target = ChannelSwitchParams::default();
        self.set_state(CsState::entry_for(&event));
        self.current = Some(event);
        self.base.wake();
    }

    fn purge(&mut self, radio_mac: MacAddress) {
        let before = self.queue.len();
        self.queue.retain(|event| event.radio_mac() != radio_mac);
        self.cac_pending.remove(&radio_mac);
        if self.reentry.as_ref().map(|r| r.radio_mac) == Some(radio_mac) {
            self.reentry = None;
        }
        debug!(radio = %radio_mac, dropped = before - self.queue.len(), "radio deleted");
        if self.radio_mac == radio_mac && self.state != CsState::Idle {
            self.base.clear_event_wait();
            self.state_deadline = None;
            self.set_state(CsState::GotoIdle);
            self.base.wake();
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn send_control(ctx: &mut TaskContext<'_>, radio_mac: MacAddress, message: ControlMessage) -> bool {
        let Some(agent) = ctx.db.radio(&radio_mac).map(|radio| radio.agent) else {
            warn!(radio = %radio_mac, "radio vanished before request");
            return false;
        };
        let message = VendorMessage::control(message).with_radio(radio_mac);
        ctx.send_vendor(agent, message).is_ok()
    }

    /// Cs params of `channel` at the widest bandwidth the radio allows up to 80 MHz
    fn switch_params(channel: u8, max_bandwidth: Bandwidth, band: FreqBand) -> ChannelSwitchParams {
        let bandwidth = match band {
            FreqBand::Band24G => Bandwidth::Bw20,
            _ => max_bandwidth.min(Bandwidth::Bw80),
        };
        ChannelSwitchParams {
            channel,
            bandwidth,
            vht_center_frequency: channel_to_vht_center_freq(channel, bandwidth, true),
            channel_ext_above_primary: 0,
            switch_reason: switch_reason::NONE,
            is_dfs_channel: is_dfs_channel(channel),
            tx_power: 0,
        }
    }

    fn fail_safe_params(ctx: &TaskContext<'_>) -> ChannelSwitchParams {
        let channel = freq_to_channel(ctx.config.channel.fail_safe_5g_frequency);
        ChannelSwitchParams {
            channel,
            bandwidth: ctx.config.channel.fail_safe_5g_bandwidth,
            vht_center_frequency: ctx.config.channel.fail_safe_5g_vht_frequency,
            channel_ext_above_primary: 0,
            switch_reason: switch_reason::NONE,
            is_dfs_channel: is_dfs_channel(channel),
            tx_power: 0,
        }
    }

    /// Record a channel reported by the agent; DFS channels start a CAC
    fn apply_channel(&mut self, ctx: &mut TaskContext<'_>, params: &ChannelSwitchParams) {
        let radio_mac = self.radio_mac;
        let Some(radio) = ctx.db.radio_mut(&radio_mac) else {
            return;
        };
        let ext_above = params.channel_ext_above_primary >= 0;
        let previous = radio.channel;
        radio.channel = WifiChannel::new(
            params.channel,
            params.vht_center_frequency,
            params.bandwidth,
            ext_above,
        );
        if params.tx_power != 0 {
            radio.tx_power = params.tx_power;
        }
        if params.switch_reason == switch_reason::RADAR && previous.band() == FreqBand::Band5G {
            let affected = calc_5g_20mhz_subband_channels(
                previous.bandwidth,
                previous.center_frequency,
                params.bandwidth,
                params.vht_center_frequency,
            );
            info!(radio = %radio_mac, ?affected, "radar detected");
            radio.set_radar_affected(&affected, true);
        }
        if params.is_dfs_channel && !radio.cac_completed {
            self.cac_pending.insert(radio_mac, ctx.now);
        } else if !params.is_dfs_channel {
            self.cac_pending.remove(&radio_mac);
        }
    }

    fn expire_cac(&mut self, ctx: &mut TaskContext<'_>) {
        let now = ctx.now;
        let expired: Vec<MacAddress> = self
            .cac_pending
            .iter()
            .filter(|(_, started)| now - **started >= CAC_TIMEOUT_MS)
            .map(|(radio, _)| *radio)
            .collect();
        for radio_mac in expired {
            warn!(radio = %radio_mac, "CAC timed out");
            self.cac_pending.remove(&radio_mac);
            let channel = ctx.db.radio(&radio_mac).map(|r| r.channel).unwrap_or_default();
            self.queue.push_back(CsEvent::CacCompleted {
                radio_mac,
                success: false,
                channel: channel.channel,
                bandwidth: channel.bandwidth,
            });
        }
    }

    // ------------------------------------------------------------------------
    // State Handlers
    // ------------------------------------------------------------------------

    fn on_slave_joined(&mut self, ctx: &mut TaskContext<'_>) {
        let Some(radio) = ctx.db.radio(&self.radio_mac) else {
            self.set_state(CsState::GotoIdle);
            return;
        };
        let selectable = matches!(radio.band, FreqBand::Band24G | FreqBand::Band5G);
        if radio.acs_enabled && selectable {
            self.set_state(CsState::ComputeIreCandidateChannels);
        } else {
            self.set_state(CsState::ActivateSlave);
        }
    }

    fn on_hostap_channel_request(&mut self, ctx: &mut TaskContext<'_>) {
        let Some(CsEvent::HostapChannelRequest { cs_params, .. }) = self.current.clone() else {
            self.set_state(CsState::GotoIdle);
            return;
        };
        let Some(radio) = ctx.db.radio(&self.radio_mac) else {
            self.set_state(CsState::GotoIdle);
            return;
        };
        if cs_params.channel != 0 {
            self.target = cs_params;
            self.channel_switch_required = true;
            if radio.band == FreqBand::Band5G {
                self.set_state(CsState::SendRestrictedChannelForUsedBands);
            } else {
                self.set_state(CsState::SendChannelSwitch);
            }
        } else if radio.acs_enabled {
            self.set_state(CsState::ComputeIreCandidateChannels);
        } else {
            self.set_state(CsState::ActivateSlave);
        }
    }

    fn compute_ire_candidate_channels(&mut self, ctx: &mut TaskContext<'_>) {
        let Some(mut ccl) = CandidateChannelList::from_database(ctx.db, &self.radio_mac) else {
            self.set_state(CsState::GotoIdle);
            return;
        };
        let Some(radio) = ctx.db.radio(&self.radio_mac) else {
            self.set_state(CsState::GotoIdle);
            return;
        };
        let (band, max_bandwidth, agent) = (radio.band, radio.max_bandwidth, radio.agent);

        match band {
            FreqBand::Band24G => {
                if ccl.has_free_2g() {
                    self.set_state(CsState::SendAcs);
                } else if let Some(channel) = ccl.least_used_channel(None) {
                    self.target = Self::switch_params(channel, max_bandwidth, band);
                    self.channel_switch_required = true;
                    self.set_state(CsState::SendChannelSwitch);
                } else {
                    self.set_state(CsState::SendAcs);
                }
            }
            FreqBand::Band5G => {
                // keep clear of this agent's own 5 GHz backhaul
                let backhaul_subband = ctx
                    .db
                    .agent(&agent)
                    .and_then(|agent| agent.backhaul_sta)
                    .and_then(|sta| ctx.db.station(&sta))
                    .and_then(|sta| sta.parent_bssid)
                    .and_then(|bssid| ctx.db.radio_of_bss(&bssid))
                    .filter(|parent| parent.band == FreqBand::Band5G)
                    .map(|parent| which_subband(parent.channel.channel));
                if let Some(subband) = backhaul_subband {
                    ccl.disallow_subband(subband);
                }
                if ccl.has_free_5g(max_bandwidth) {
                    self.after_restricted = CsState::SendAcs;
                } else {
                    match ccl.least_used_channel(ctx.db.gateway_5g_subband()) {
                        Some(channel) => {
                            self.target = Self::switch_params(channel, max_bandwidth, band);
                            self.channel_switch_required = true;
                            self.after_restricted = CsState::SendChannelSwitch;
                        }
                        None => self.after_restricted = CsState::SendAcs,
                    }
                }
                self.set_state(CsState::SendRestrictedFailSafeChannel);
            }
            _ => self.set_state(CsState::ActivateSlave),
        }
    }

    fn send_restricted(&mut self, ctx: &mut TaskContext<'_>, restricted_channels: Vec<u8>) {
        let fail_safe = Self::fail_safe_params(ctx);
        let message = ControlMessage::RestrictedFailsafeChannelRequest {
            failsafe_channel: fail_safe.channel,
            failsafe_bandwidth: fail_safe.bandwidth,
            vht_center_frequency: fail_safe.vht_center_frequency,
            restricted_channels,
        };
        if Self::send_control(ctx, self.radio_mac, message) {
            self.restricted_sent = true;
            self.wait(ctx, CsState::WaitForRestrictedChannelResponse, RESTRICTED_CHANNEL_RESPONSE_TIMEOUT_MS);
        } else {
            self.set_state(CsState::GotoIdle);
        }
    }

    fn on_restricted_response(&mut self) {
        let success = matches!(
            self.current,
            Some(CsEvent::RestrictedChannelResponse { success: true, .. })
        );
        if !success {
            warn!(radio = %self.radio_mac, "restricted channel request rejected");
            self.set_state(CsState::GotoIdle);
        } else if self.channel_switch_required {
            self.set_state(CsState::SendChannelSwitch);
        } else {
            self.set_state(self.after_restricted);
        }
    }

    fn send_acs(&mut self, ctx: &mut TaskContext<'_>) {
        let message = ControlMessage::ChannelSwitchAcsStart {
            cs_params: ChannelSwitchParams::default(),
        };
        if Self::send_control(ctx, self.radio_mac, message) {
            self.wait(ctx, CsState::WaitForAcsResponse, ACS_CSA_TIMEOUT_MS);
        } else {
            self.set_state(CsState::GotoIdle);
        }
    }

    fn send_channel_switch(&mut self, ctx: &mut TaskContext<'_>) {
        let message = ControlMessage::ChannelSwitchAcsStart { cs_params: self.target };
        info!(radio = %self.radio_mac, channel = self.target.channel, bandwidth = ?self.target.bandwidth, "channel switch");
        if Self::send_control(ctx, self.radio_mac, message) {
            self.wait(ctx, CsState::WaitForCsaNotification, ACS_CSA_TIMEOUT_MS);
        } else {
            self.set_state(CsState::GotoIdle);
        }
    }

    fn on_acs_response(&mut self, ctx: &mut TaskContext<'_>) {
        let Some(CsEvent::AcsResponse { cs_params, supported_channels, .. }) = self.current.clone() else {
            self.set_state(CsState::GotoIdle);
            return;
        };
        if let Some(radio) = ctx.db.radio_mut(&self.radio_mac) {
            radio.update_supported_channels(&supported_channels);
        }
        self.apply_channel(ctx, &cs_params);
        self.after_channel_update();
    }

    fn on_csa_notification(&mut self, ctx: &mut TaskContext<'_>, solicited: bool) {
        let Some(CsEvent::CsaNotification { cs_params, .. }) = self.current.clone() else {
            self.set_state(CsState::GotoIdle);
            return;
        };
        self.apply_channel(ctx, &cs_params);
        if solicited {
            self.after_channel_update();
        } else {
            self.set_state(CsState::GotoIdle);
        }
    }

    fn after_channel_update(&mut self) {
        if self.restricted_sent {
            self.set_state(CsState::SendClearRestrictedChannel);
        } else {
            self.set_state(CsState::ActivateSlave);
        }
    }

    fn activate_slave(&mut self, ctx: &mut TaskContext<'_>) {
        let radio_mac = self.radio_mac;
        if let Some(radio) = ctx.db.radio_mut(&radio_mac) {
            radio.active = true;
            let channel = radio.channel.channel;
            if radio.band == FreqBand::Band5G && is_dfs_channel(channel) && !radio.cac_completed {
                self.cac_pending.entry(radio_mac).or_insert(ctx.now);
            }
            info!(radio = %radio_mac, channel, "radio activated");
        }
        self.set_state(CsState::GotoIdle);
    }

    fn on_cac_completed(&mut self, ctx: &mut TaskContext<'_>) {
        let Some(CsEvent::CacCompleted { success, channel, .. }) = self.current.clone() else {
            self.set_state(CsState::GotoIdle);
            return;
        };
        self.cac_pending.remove(&self.radio_mac);
        if let Some(radio) = ctx.db.radio_mut(&self.radio_mac) {
            radio.cac_completed = success;
        }
        if !success {
            warn!(radio = %self.radio_mac, channel, "CAC failed");
            self.set_state(CsState::OnFailSafeChannel);
        } else if self.reentry.as_ref().map(|r| r.radio_mac) == Some(self.radio_mac) {
            self.set_state(CsState::SteerStaBackAfterDfsReentry);
        } else {
            self.set_state(CsState::GotoIdle);
        }
    }

    fn on_fail_safe_channel(&mut self, ctx: &mut TaskContext<'_>) {
        self.target = Self::fail_safe_params(ctx);
        if self.target.channel == 0 {
            self.set_state(CsState::GotoIdle);
            return;
        }
        self.channel_switch_required = true;
        self.set_state(CsState::SendChannelSwitch);
    }

    fn on_dfs_channel_available(&mut self, ctx: &mut TaskContext<'_>) {
        let Some(CsEvent::DfsChannelAvailable { channel, bandwidth, vht_center_frequency, .. }) =
            self.current.clone()
        else {
            self.set_state(CsState::GotoIdle);
            return;
        };
        let Some(radio) = ctx.db.radio_mut(&self.radio_mac) else {
            self.set_state(CsState::GotoIdle);
            return;
        };
        let freed = get_5g_20mhz_channels(bandwidth, vht_center_frequency);
        radio.set_radar_affected(&freed, false);
        debug!(radio = %self.radio_mac, ?freed, "DFS channels available again");

        let on_target = radio.channel.channel == channel;
        let max_bandwidth = radio.max_bandwidth;
        if ctx.config.settings.dfs_reentry && !on_target && radio.band == FreqBand::Band5G {
            let mut target = Self::switch_params(channel, max_bandwidth, FreqBand::Band5G);
            target.bandwidth = bandwidth.min(target.bandwidth);
            target.vht_center_frequency = channel_to_vht_center_freq(channel, target.bandwidth, true);
            self.target = target;
            self.set_state(CsState::SteerStaBeforeDfsReentry);
        } else {
            self.set_state(CsState::GotoIdle);
        }
    }

    fn steer_sta_before_dfs_reentry(&mut self, ctx: &mut TaskContext<'_>) {
        let radio_mac = self.radio_mac;
        let Some(agent) = ctx.db.radio(&radio_mac).map(|radio| radio.agent) else {
            self.set_state(CsState::GotoIdle);
            return;
        };
        let sibling_bsses: Vec<(MacAddress, String)> = ctx
            .db
            .radios_of_agent(&agent)
            .into_iter()
            .filter(|radio| radio.active && radio.band == FreqBand::Band24G)
            .flat_map(|radio| ctx.db.bsses_of_radio(&radio.ruid))
            .filter(|bss| bss.enabled && bss.fronthaul)
            .map(|bss| (bss.bssid, bss.ssid.clone()))
            .collect();

        let mut steered = Vec::new();
        for sta in ctx.db.stations_of_radio(&radio_mac) {
            let Some(original) = ctx.db.station(&sta).and_then(|s| s.parent_bssid) else {
                continue;
            };
            let ssid = ctx.db.bss(&original).map(|bss| bss.ssid.clone()).unwrap_or_default();
            let Some((target, _)) = sibling_bsses.iter().find(|(_, s)| *s == ssid) else {
                continue;
            };
            if son_actions::steer_client(ctx, sta, *target, "dfs reentry", 0).is_some() {
                steered.push((sta, original));
            }
        }

        if steered.is_empty() {
            self.channel_switch_required = true;
            self.set_state(CsState::SendChannelSwitch);
            return;
        }
        info!(radio = %radio_mac, clients = steered.len(), "steering clients before DFS re-entry");
        self.reentry = Some(DfsReentry {
            radio_mac,
            target: self.target,
            steered,
            deadline: ctx.now + DFS_REENTRY_WAIT_MS,
        });
        self.queue.push_back(CsEvent::DfsReentryPending { radio_mac });
        self.set_state(CsState::GotoIdle);
    }

    fn on_dfs_reentry_pending(&mut self, ctx: &mut TaskContext<'_>) {
        let Some(reentry) = self.reentry.clone() else {
            self.set_state(CsState::GotoIdle);
            return;
        };
        let remaining = ctx.db.stations_of_radio(&reentry.radio_mac);
        let all_left = reentry.steered.iter().all(|(sta, _)| !remaining.contains(sta));
        if all_left || ctx.now >= reentry.deadline {
            self.target = reentry.target;
            self.channel_switch_required = true;
            self.set_state(CsState::SendChannelSwitch);
        } else {
            self.queue.push_back(CsEvent::DfsReentryPending { radio_mac: reentry.radio_mac });
            self.set_state(CsState::GotoIdle);
            self.base.wait_for(ctx.now, DFS_REENTRY_POLL_MS);
        }
    }

    fn steer_sta_back_after_dfs_reentry(&mut self, ctx: &mut TaskContext<'_>) {
        if let Some(reentry) = self.reentry.take() {
            for (sta, original) in reentry.steered {
                let connected_elsewhere = ctx
                    .db
                    .station(&sta)
                    .map(|s| s.is_connected() && s.parent_bssid != Some(original))
                    .unwrap_or(false);
                if connected_elsewhere && ctx.db.bss(&original).is_some() {
                    son_actions::steer_client(ctx, sta, original, "dfs reentry done", 0);
                }
            }
        }
        self.set_state(CsState::GotoIdle);
    }

    fn on_configured_restricted(&mut self, ctx: &mut TaskContext<'_>) {
        let Some(radio) = ctx.db.radio(&self.radio_mac) else {
            self.set_state(CsState::GotoIdle);
            return;
        };
        if radio.band != FreqBand::Band5G || !radio.active {
            self.set_state(CsState::GotoIdle);
            return;
        }
        let restricted = ctx.db.restricted_channels(&self.radio_mac);
        let in_use = split_contains(&radio.channel, &restricted);
        if in_use {
            self.set_state(CsState::ComputeIreCandidateChannels);
        } else {
            self.after_restricted = CsState::GotoIdle;
            self.set_state(CsState::SendRestrictedFailSafeChannel);
        }
    }

    fn goto_idle(&mut self) {
        self.radio_mac = MacAddress::ZERO;
        self.current = None;
        self.state_deadline = None;
        self.restricted_sent = false;
        self.channel_switch_required = false;
        self.set_state(CsState::Idle);
    }

    fn idle(&mut self, ctx: &mut TaskContext<'_>) {
        self.expire_cac(ctx);
        match self.queue.pop_front() {
            Some(event) => self.begin(event),
            None => self.base.wait_for(ctx.now, IDLE_POLL_MS),
        }
    }
}

fn split_contains(channel: &WifiChannel, restricted: &[u8]) -> bool {
    mesh_core::channel::split_channel_to_20mhz(channel)
        .iter()
        .any(|(sub, _)| restricted.contains(sub))
}

impl Task for ChannelSelectionTask {
    fn name(&self) -> &'static str {
        "channel_selection"
    }

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn work(&mut self, ctx: &mut TaskContext<'_>) {
        let state = self.state;
        match state {
            CsState::Init => self.set_state(CsState::Idle),
            CsState::Idle => self.idle(ctx),
            CsState::OnSlaveJoined => self.on_slave_joined(ctx),
            CsState::OnHostapChannelRequest => self.on_hostap_channel_request(ctx),
            CsState::ComputeIreCandidateChannels => self.compute_ire_candidate_channels(ctx),
            CsState::SendRestrictedFailSafeChannel => {
                let restricted = ctx.db.restricted_channels(&self.radio_mac);
                self.send_restricted(ctx, restricted);
            }
            CsState::SendRestrictedChannelForUsedBands => {
                let mut restricted = ctx.db.restricted_channels(&self.radio_mac);
                if let Some(ccl) = CandidateChannelList::from_database(ctx.db, &self.radio_mac) {
                    restricted.extend(ccl.used_channels());
                }
                restricted.retain(|channel| *channel != self.target.channel);
                restricted.sort_unstable();
                restricted.dedup();
                self.send_restricted(ctx, restricted);
            }
            CsState::SendClearRestrictedChannel => {
                let message = ControlMessage::RestrictedFailsafeChannelRequest {
                    failsafe_channel: 0,
                    failsafe_bandwidth: Bandwidth::Bw20,
                    vht_center_frequency: 0,
                    restricted_channels: Vec::new(),
                };
                if Self::send_control(ctx, self.radio_mac, message) {
                    self.wait(
                        ctx,
                        CsState::WaitForClearRestrictedChannelResponse,
                        RESTRICTED_CHANNEL_RESPONSE_TIMEOUT_MS,
                    );
                } else {
                    self.set_state(CsState::ActivateSlave);
                }
            }
            CsState::OnRestrictedFailSafeChannelResponse => self.on_restricted_response(),
            CsState::SendAcs => self.send_acs(ctx),
            CsState::OnAcsResponse => self.on_acs_response(ctx),
            CsState::SendChannelSwitch => self.send_channel_switch(ctx),
            CsState::OnCsaNotification => {
                let solicited = self.csa_solicited;
                self.csa_solicited = false;
                self.on_csa_notification(ctx, solicited);
            }
            CsState::ActivateSlave => self.activate_slave(ctx),
            CsState::OnCacCompletedNotification => self.on_cac_completed(ctx),
            CsState::OnDfsChannelAvailable => self.on_dfs_channel_available(ctx),
            CsState::OnFailSafeChannel => self.on_fail_safe_channel(ctx),
            CsState::SteerStaBeforeDfsReentry => self.steer_sta_before_dfs_reentry(ctx),
            CsState::OnDfsReentryPending => self.on_dfs_reentry_pending(ctx),
            CsState::SteerStaBackAfterDfsReentry => self.steer_sta_back_after_dfs_reentry(ctx),
            CsState::OnConfiguredRestrictedChannels => self.on_configured_restricted(ctx),
            CsState::GotoIdle => self.goto_idle(),
            // woken without the awaited event; keep waiting
            CsState::WaitForRestrictedChannelResponse
            | CsState::WaitForClearRestrictedChannelResponse
            | CsState::WaitForAcsResponse
            | CsState::WaitForCsaNotification => self.rearm_wait(ctx.now),
        }
    }

    fn handle_event(&mut self, ctx: &mut TaskContext<'_>, event: &TaskEvent) {
        let TaskEvent::ChannelSelection(event) = event else {
            return;
        };
        let radio_mac = event.radio_mac();
        if let CsEvent::Deleted { .. } = event {
            self.purge(radio_mac);
            self.rearm_wait(ctx.now);
            return;
        }

        if self.radio_mac == radio_mac {
            if let Some(next) = self.state.accepts(event) {
                self.state_deadline = None;
                self.csa_solicited = next == CsState::OnCsaNotification;
                self.current = Some(event.clone());
                self.set_state(next);
                self.base.wake();
                return;
            }
        }

        if self.state == CsState::Idle && self.queue.is_empty() {
            self.begin(event.clone());
        } else {
            debug!(radio = %radio_mac, queued = self.queue.len() + 1, "channel event queued");
            self.queue.push_back(event.clone());
            if self.state == CsState::Idle {
                self.base.wake();
            }
            self.rearm_wait(ctx.now);
        }
    }

    fn handle_events_timeout(&mut self, ctx: &mut TaskContext<'_>, _kind: EventKind) {
        self.state_deadline = None;
        match self.state {
            CsState::WaitForClearRestrictedChannelResponse => {
                warn!(radio = %self.radio_mac, "no answer to clearing restricted channels");
                self.set_state(CsState::ActivateSlave);
            }
            CsState::WaitForRestrictedChannelResponse
            | CsState::WaitForAcsResponse
            | CsState::WaitForCsaNotification => {
                warn!(radio = %self.radio_mac, state = ?self.state, "channel selection timed out");
                son_actions::handle_dead_radio(ctx, self.radio_mac);
                self.set_state(CsState::GotoIdle);
            }
            _ => {}
        }
    }

    fn handle_task_end(&mut self, ctx: &mut TaskContext<'_>) {
        ctx.db.clear_task_references(self.id());
        if !self.queue.is_empty() {
            warn!(dropped = self.queue.len(), "channel selection ended with queued events");
        }
    }
}
