//! CONTROL sub-protocol handling

use mesh_core::channel::freq_to_channel;
use mesh_core::protocol::{ControlMessage, VendorMessage};
use mesh_core::{MacAddress, Result};
use tracing::{debug, info, warn};

use super::Controller;
use crate::son_actions;
use crate::tasks::client_locating::ARP_STATE_REACHABLE;
use crate::tasks::{CsEvent, TaskEnv};

impl Controller {
    pub(super) fn handle_control(
        &mut self,
        src: MacAddress,
        header: &VendorMessage,
        message: ControlMessage,
    ) -> Result<()> {
        if header.id != 0 {
            let mut env = TaskEnv {
                db: &mut self.db,
                outbox: &mut self.outbox,
                config: &self.config,
            };
            if self.tasks.response_received(&mut env, src, header) {
                return Ok(());
            }
        }

        let radio_mac = header.radio_mac;
        match message {
            ControlMessage::SlaveHandshakeRequest => {
                let reply = VendorMessage::control(ControlMessage::SlaveHandshakeResponse).with_id(header.id);
                self.outbox.send_vendor(src, &reply)?;
            }
            ControlMessage::RestrictedFailsafeChannelResponse { success } => {
                self.push_cs_event(CsEvent::RestrictedChannelResponse { radio_mac, success });
            }
            ControlMessage::AcsNotification {
                cs_params,
                supported_channels,
            } => {
                self.push_cs_event(CsEvent::AcsResponse {
                    radio_mac,
                    cs_params,
                    supported_channels,
                });
            }
            ControlMessage::CsaNotification { cs_params } => {
                self.push_cs_event(CsEvent::CsaNotification { radio_mac, cs_params });
            }
            ControlMessage::CsaErrorNotification { cs_params } => {
                warn!(radio = %radio_mac, channel = cs_params.channel, "channel switch failed on agent");
                if let Some(radio) = self.db.radio_mut(&radio_mac) {
                    radio.active = false;
                }
            }
            ControlMessage::DfsCacCompleted {
                success,
                frequency,
                channel,
                bandwidth,
            } => {
                let channel = if channel == 0 { freq_to_channel(frequency) } else { channel };
                self.push_cs_event(CsEvent::CacCompleted {
                    radio_mac,
                    success,
                    channel,
                    bandwidth,
                });
            }
            ControlMessage::DfsChannelAvailable {
                frequency,
                channel,
                bandwidth,
                vht_center_frequency,
            } => {
                let channel = if channel == 0 { freq_to_channel(frequency) } else { channel };
                self.push_cs_event(CsEvent::DfsChannelAvailable {
                    radio_mac,
                    channel,
                    bandwidth,
                    vht_center_frequency,
                });
            }
            ControlMessage::ApDisabled { vap_id, bssid } => {
                info!(radio = %radio_mac, bssid = %bssid, vap_id, "BSS disabled");
                let stations = self.db.stations_of_bss(&bssid);
                self.with_context(|ctx| {
                    for sta in stations {
                        son_actions::handle_dead_station(ctx, sta);
                    }
                });
                self.db.remove_bss(&bssid);
            }
            ControlMessage::ApEnabled { vap } => {
                if !self.db.has_radio(&radio_mac) {
                    warn!(radio = %radio_mac, bssid = %vap.bssid, "BSS enabled on unknown radio");
                    return Ok(());
                }
                info!(radio = %radio_mac, bssid = %vap.bssid, ssid = %vap.ssid, "BSS enabled");
                let bss = self.db.add_bss(radio_mac, vap.bssid);
                bss.vap_id = vap.vap_id;
                bss.ssid = vap.ssid;
                bss.fronthaul = vap.fronthaul;
                bss.backhaul = vap.backhaul;
                bss.enabled = true;
            }
            ControlMessage::DhcpComplete { mac, ipv4, name } => {
                let now = self.now();
                let station = self.db.add_station(mac, now);
                station.ipv4 = Some(ipv4);
                if !name.is_empty() {
                    station.name = name;
                }
                station.last_seen = now;
                debug!(sta = %mac, ipv4 = %ipv4, "DHCP complete");
            }
            ControlMessage::ArpQueryResponse { mac, state, .. } => {
                if state == ARP_STATE_REACHABLE {
                    let now = self.now();
                    self.db.update_last_seen(&mac, now);
                }
            }
            other => {
                debug!(src = %src, op = other.op(), "unhandled control message");
            }
        }
        Ok(())
    }
}
