//! Agent joins following a WSC exchange

use std::net::Ipv4Addr;

use mesh_core::channel::WifiChannel;
use mesh_core::config::parse_version;
use mesh_core::protocol::vendor::{join_response, BackhaulIfaceType, SlaveJoined};
use mesh_core::protocol::{ControlMessage, VendorMessage};
use mesh_core::{FreqBand, MacAddress, Result};
use tracing::{debug, info, warn};

use super::Controller;
use crate::db::{AgentState, StationState};
use crate::son_actions;
use crate::tasks::CsEvent;

fn non_zero_ipv4(ipv4: Ipv4Addr) -> Option<Ipv4Addr> {
    (!ipv4.is_unspecified()).then_some(ipv4)
}

impl Controller {
    // ------------------------------------------------------------------------
    // Same-vendor Join
    // ------------------------------------------------------------------------

    pub(super) fn same_vendor_join(&mut self, al_mac: MacAddress, ruid: MacAddress, joined: &SlaveJoined) -> Result<()> {
        let backhaul = &joined.backhaul;
        let is_gateway = backhaul.backhaul_iface_type == BackhaulIfaceType::GwBridge || joined.local_gw;
        let now = self.now();

        match (parse_version(&joined.slave_version), parse_version(&self.config.version)) {
            (Some((agent_major, agent_minor, _)), Some((major, minor, _)))
                if (agent_major, agent_minor) != (major, minor) =>
            {
                warn!(
                    al_mac = %al_mac,
                    agent_version = %joined.slave_version,
                    controller_version = %self.config.version,
                    "agent version mismatch"
                );
            }
            (None, _) => debug!(al_mac = %al_mac, version = %joined.slave_version, "unparsable agent version"),
            _ => {}
        }

        // a wireless repeater can only hang off a BSS we already know
        let parent_bssid = backhaul.backhaul_bssid;
        let wireless = backhaul.backhaul_is_wireless && !is_gateway;
        if wireless {
            let parent_enabled = self.db.bss(&parent_bssid).map(|bss| bss.enabled).unwrap_or(false);
            if !parent_enabled {
                warn!(al_mac = %al_mac, parent_bssid = %parent_bssid, "join rejected, unknown parent BSS");
                let reject = VendorMessage::control(ControlMessage::SlaveJoinedResponse {
                    err_code: join_response::REJECT,
                    master_version: self.config.version.clone(),
                    config: self.config.monitor.clone(),
                })
                .with_radio(ruid);
                return self.outbox.send_vendor(al_mac, &reject);
            }
        }

        let parent_agent = if is_gateway {
            None
        } else if wireless {
            self.db.agent_of_bss(&parent_bssid)
        } else {
            self.db.gateway()
        };
        let backhaul_sta = (!is_gateway && !backhaul.backhaul_mac.is_zero()).then_some(backhaul.backhaul_mac);

        let agent = self.db.add_agent(al_mac, now);
        agent.state = AgentState::Connected;
        agent.is_prplmesh = true;
        agent.version = joined.slave_version.clone();
        agent.ipv4 = non_zero_ipv4(backhaul.bridge_ipv4);
        agent.parent = parent_agent;
        agent.wired_backhaul = !wireless && !is_gateway;
        agent.backhaul_sta = backhaul_sta;
        agent.last_seen = now;
        if is_gateway {
            self.db.set_gateway(al_mac);
        }

        if let Some(sta_mac) = backhaul_sta {
            if wireless {
                self.db.associate_station(sta_mac, parent_bssid, now);
            } else {
                let station = self.db.add_station(sta_mac, now);
                station.is_wireless = false;
                station.parent_bssid = None;
                station.parent_agent = parent_agent;
                station.state = StationState::Connected;
                station.last_seen = now;
            }
            if let Some(station) = self.db.station_mut(&sta_mac) {
                station.is_backhaul = true;
                station.ipv4 = non_zero_ipv4(backhaul.backhaul_ipv4);
            }
        }

        let radio = self.db.add_radio(al_mac, ruid);
        radio.hostap = joined.hostap.clone();
        if joined.hostap.frequency_band != FreqBand::Unknown {
            radio.band = joined.hostap.frequency_band;
        }
        radio.max_bandwidth = joined.hostap.max_bandwidth;
        radio.update_supported_channels(&joined.supported_channels);
        radio.acs_enabled = joined.wlan_channel == 0;
        radio.is_backhaul_manager = backhaul.is_backhaul_manager;
        radio.active = false;
        let cs_params = joined.cs_params;
        if cs_params.channel != 0 {
            radio.channel = WifiChannel::new(
                cs_params.channel,
                cs_params.vht_center_frequency,
                cs_params.bandwidth,
                cs_params.channel_ext_above_primary >= 0,
            );
            radio.tx_power = cs_params.tx_power;
        }

        for vap in &joined.vaps {
            let bss = self.db.add_bss(ruid, vap.bssid);
            bss.vap_id = vap.vap_id;
            bss.ssid = vap.ssid.clone();
            bss.fronthaul = vap.fronthaul;
            bss.backhaul = vap.backhaul;
            bss.enabled = true;
        }

        info!(
            al_mac = %al_mac,
            radio = %ruid,
            gateway = is_gateway,
            wireless,
            channel = cs_params.channel,
            vaps = joined.vaps.len(),
            "same-vendor agent joined"
        );
        let accept = VendorMessage::control(ControlMessage::SlaveJoinedResponse {
            err_code: join_response::OK,
            master_version: self.config.version.clone(),
            config: self.config.monitor.clone(),
        })
        .with_radio(ruid);
        self.outbox.send_vendor(al_mac, &accept)?;

        self.push_cs_event(CsEvent::SlaveJoined { radio_mac: ruid });

        if !is_gateway && !wireless {
            self.relocate_wired_backhauls(backhaul_sta);
        }
        Ok(())
    }

    /// Wired uplinks may have been attached to the wrong parent when repeaters joined out of order
    fn relocate_wired_backhauls(&mut self, joined_backhaul: Option<MacAddress>) {
        let mut targets: Vec<MacAddress> = self
            .db
            .agents()
            .filter(|agent| agent.is_connected() && agent.wired_backhaul && !agent.is_gateway)
            .filter_map(|agent| agent.backhaul_sta)
            .collect();
        if let Some(own) = joined_backhaul {
            if !targets.contains(&own) {
                targets.push(own);
            }
        }
        self.with_context(|ctx| {
            for sta in targets {
                son_actions::start_client_locating(ctx, sta);
            }
        });
    }

    // ------------------------------------------------------------------------
    // Generic Join
    // ------------------------------------------------------------------------

    /// Agents that do not describe their backhaul get a wired placeholder below the gateway
    pub(super) fn generic_join(&mut self, al_mac: MacAddress, ruid: MacAddress) -> Result<()> {
        let now = self.now();
        let gateway = self.db.gateway();
        let is_gateway = gateway == Some(al_mac);

        let agent = self.db.add_agent(al_mac, now);
        agent.state = AgentState::Connected;
        agent.last_seen = now;

        if !is_gateway {
            let backhaul_sta = al_mac.derived_backhaul();
            agent.parent = gateway;
            agent.wired_backhaul = true;
            agent.backhaul_sta = Some(backhaul_sta);

            let station = self.db.add_station(backhaul_sta, now);
            station.is_wireless = false;
            station.is_backhaul = true;
            station.parent_bssid = None;
            station.parent_agent = gateway;
            station.state = StationState::Connected;
            station.last_seen = now;
        }

        if let Some(radio) = self.db.radio_mut(&ruid) {
            radio.active = true;
        }
        info!(al_mac = %al_mac, radio = %ruid, gateway = ?gateway, "generic agent joined");
        Ok(())
    }
}
