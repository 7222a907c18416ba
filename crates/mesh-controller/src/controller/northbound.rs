//! Northbound CLI and BML requests
//!
//! Every request gets exactly one answer. CLI requests are answered with
//! `ResponseInt`, BML requests with their paired response or an explicit error.

use mesh_core::channel::channel_band;
use mesh_core::protocol::vendor::{bml_code, Action, ChannelSwitchParams, Feature};
use mesh_core::protocol::{BmlMessage, CliMessage, VendorMessage};
use mesh_core::{FreqBand, MacAddress, Result};
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use super::Controller;
use crate::son_actions;
use crate::tasks::CsEvent;

const CLI_OK: i32 = 0;
const CLI_FAILED: i32 = -1;

impl Controller {
    // ------------------------------------------------------------------------
    // CLI
    // ------------------------------------------------------------------------

    pub(super) fn handle_cli(&mut self, src: MacAddress, header: &VendorMessage, message: CliMessage) -> Result<()> {
        debug!(src = %src, op = message.op(), "CLI request");
        let is_ok = match message {
            CliMessage::ClientDisconnect {
                client_mac,
                kind,
                reason,
            } => self.with_context(|ctx| son_actions::disconnect_client(ctx, client_mac, kind, reason)),
            CliMessage::ClientBssSteer {
                client_mac,
                bssid,
                disassoc_timer_ms,
            } => {
                if self.db.bss(&bssid).is_none() || self.db.station(&client_mac).is_none() {
                    warn!(sta = %client_mac, bssid = %bssid, "steer request for unknown station or BSS");
                    false
                } else {
                    self.with_context(|ctx| {
                        son_actions::steer_client(ctx, client_mac, bssid, "cli", disassoc_timer_ms).is_some()
                    })
                }
            }
            CliMessage::HostapChannelSwitch { mac, cs_params } => {
                if self.db.has_radio(&mac) {
                    info!(radio = %mac, channel = cs_params.channel, "channel switch requested");
                    self.push_cs_event(CsEvent::HostapChannelRequest {
                        radio_mac: mac,
                        cs_params,
                    });
                    true
                } else {
                    false
                }
            }
            CliMessage::ClientAllow {
                client_mac,
                hostap_mac,
            } => {
                let bsses = self.target_bsses(hostap_mac);
                !bsses.is_empty()
                    && self.with_context(|ctx| {
                        bsses
                            .into_iter()
                            .all(|bssid| son_actions::allow_client(ctx, client_mac, bssid))
                    })
            }
            CliMessage::ClientDisallow {
                client_mac,
                hostap_mac,
            } => {
                let bsses = self.target_bsses(hostap_mac);
                !bsses.is_empty()
                    && self.with_context(|ctx| {
                        bsses
                            .into_iter()
                            .all(|bssid| son_actions::disallow_client(ctx, client_mac, bssid))
                    })
            }
            CliMessage::ResponseInt { .. } | CliMessage::Unknown { .. } => {
                debug!(src = %src, op = header.action_op(), "unsupported CLI op");
                false
            }
        };

        let reply = VendorMessage::new(
            CliMessage::ResponseInt {
                is_ok,
                current_value: if is_ok { CLI_OK } else { CLI_FAILED },
            }
            .into(),
        )
        .with_id(header.id)
        .with_radio(header.radio_mac);
        self.outbox.send_vendor(src, &reply)
    }

    /// Negative reply to a CLI or BML request whose body could not be parsed
    pub(super) fn reject_northbound(
        &mut self,
        src: MacAddress,
        action: Action,
        action_op: u8,
        id: u16,
        unknown_op: bool,
    ) -> Result<()> {
        let body = match action {
            Action::Bml => BmlMessage::Error {
                failed_op: action_op,
                code: if unknown_op {
                    bml_code::NOT_SUPPORTED
                } else {
                    bml_code::INVALID_ARGUMENT
                },
            }
            .into(),
            _ => CliMessage::ResponseInt {
                is_ok: false,
                current_value: CLI_FAILED,
            }
            .into(),
        };
        let reply = VendorMessage::new(body).with_id(id);
        self.outbox.send_vendor(src, &reply)
    }

    /// A BSSID names itself; a radio MAC names every BSS of that radio
    fn target_bsses(&self, hostap_mac: MacAddress) -> SmallVec<[MacAddress; 4]> {
        if self.db.bss(&hostap_mac).is_some() {
            return smallvec::smallvec![hostap_mac];
        }
        self.db
            .bsses_of_radio(&hostap_mac)
            .into_iter()
            .map(|bss| bss.bssid)
            .collect()
    }

    // ------------------------------------------------------------------------
    // BML
    // ------------------------------------------------------------------------

    pub(super) fn handle_bml(&mut self, src: MacAddress, header: &VendorMessage, message: BmlMessage) -> Result<()> {
        debug!(src = %src, op = message.op(), "BML request");
        let response = match message {
            BmlMessage::Ping => BmlMessage::PingResponse,
            BmlMessage::SetFeature { feature, enable } => {
                *self.feature_flag(feature) = enable;
                info!(?feature, enable, "feature toggled");
                BmlMessage::SetFeatureResponse {
                    feature,
                    code: bml_code::SUCCESS,
                }
            }
            BmlMessage::GetFeature { feature } => BmlMessage::GetFeatureResponse {
                feature,
                enabled: *self.feature_flag(feature),
            },
            BmlMessage::SetRestrictedChannels { channels } => BmlMessage::SetRestrictedChannelsResponse {
                code: self.set_restricted_channels(channels),
            },
            BmlMessage::GetRestrictedChannels => BmlMessage::GetRestrictedChannelsResponse {
                channels: self.db.global_restricted_channels().to_vec(),
            },
            BmlMessage::TriggerChannelSelection => BmlMessage::TriggerChannelSelectionResponse {
                code: self.trigger_channel_selection(),
            },
            other => BmlMessage::Error {
                failed_op: other.op(),
                code: bml_code::NOT_SUPPORTED,
            },
        };

        let reply = VendorMessage::new(response.into()).with_id(header.id);
        self.outbox.send_vendor(src, &reply)
    }

    fn feature_flag(&mut self, feature: Feature) -> &mut bool {
        let settings = &mut self.config.settings;
        match feature {
            Feature::ClientRoaming => &mut settings.client_optimal_path_roaming,
            Feature::ClientBandSteering => &mut settings.client_band_steering,
            Feature::IreRoaming => &mut settings.ire_roaming,
            Feature::LoadBalancer => &mut settings.load_balancing,
            Feature::DfsReentry => &mut settings.dfs_reentry,
            Feature::CertificationMode => &mut settings.certification_mode,
        }
    }

    fn active_radios(&self) -> Vec<MacAddress> {
        self.db
            .radios()
            .filter(|radio| radio.active)
            .map(|radio| radio.ruid)
            .collect()
    }

    fn set_restricted_channels(&mut self, mut channels: Vec<u8>) -> u8 {
        if channels.iter().any(|channel| channel_band(*channel) == FreqBand::Unknown) {
            warn!(?channels, "invalid restricted channel list");
            return bml_code::INVALID_ARGUMENT;
        }
        channels.sort_unstable();
        channels.dedup();
        info!(?channels, "restricted channels updated");
        self.db.set_global_restricted_channels(channels);
        for radio_mac in self.active_radios() {
            self.push_cs_event(CsEvent::ConfiguredRestricted { radio_mac });
        }
        bml_code::SUCCESS
    }

    fn trigger_channel_selection(&mut self) -> u8 {
        if self.db.channel_selection_task.is_none() {
            return bml_code::FAILURE;
        }
        for radio_mac in self.active_radios() {
            self.push_cs_event(CsEvent::HostapChannelRequest {
                radio_mac,
                cs_params: ChannelSwitchParams::default(),
            });
        }
        bml_code::SUCCESS
    }
}
