//! Autoconfiguration search and WSC registrar

use mesh_core::config::BssInfoConf;
use mesh_core::protocol::tlv::{
    profile, role, service, AlMacAddressTlv, ApCapabilityTlv, ApRadioBasicCapabilitiesTlv,
    ApRadioIdentifierTlv, AutoconfigFreqBandTlv, ControllerCapabilityTlv, MultiApProfileTlv,
    SearchedRoleTlv, SearchedServiceTlv, SupportedFreqBandTlv, SupportedRoleTlv,
    SupportedServiceTlv, WscTlv,
};
use mesh_core::protocol::{Cmdu, ControlMessage, MessageType, VendorBody, VendorMessage};
use mesh_core::wsc::attributes::rf_band;
use mesh_core::wsc::{bss_type, build_registrar_message, ConfigData, RegistrarMessageKind, M1};
use mesh_core::{FreqBand, MacAddress, Result};
use tracing::{debug, info, warn};

use super::Controller;
use crate::db::AgentState;

/// Band of a global operating class (IEEE 802.11 Annex E, table E-4)
pub(crate) fn band_of_operating_class(operating_class: u8) -> FreqBand {
    match operating_class {
        81..=84 => FreqBand::Band24G,
        115..=130 => FreqBand::Band5G,
        131..=137 => FreqBand::Band6G,
        _ => FreqBand::Unknown,
    }
}

fn band_of_rf_bands(rf_bands: u8) -> FreqBand {
    if rf_bands & rf_band::BAND_6GHZ != 0 {
        FreqBand::Band6G
    } else if rf_bands & rf_band::BAND_5GHZ != 0 {
        FreqBand::Band5G
    } else if rf_bands & rf_band::BAND_2_4GHZ != 0 {
        FreqBand::Band24G
    } else {
        FreqBand::Unknown
    }
}

/// Same-vendor CONTROL message riding inside a standard CMDU
fn embedded_control(cmdu: &Cmdu) -> Option<ControlMessage> {
    match VendorMessage::from_cmdu(cmdu) {
        Ok(Some(VendorMessage {
            body: VendorBody::Control(message),
            ..
        })) => Some(message),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "ignoring undecodable embedded vendor TLV");
            None
        }
    }
}

/// One credential set selected for a radio
struct BssSelection {
    config: ConfigData,
    backhaul: bool,
}

impl Controller {
    // ------------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------------

    pub(super) fn handle_autoconfig_search(&mut self, src: MacAddress, cmdu: &Cmdu) -> Result<()> {
        let al_mac = cmdu.require::<AlMacAddressTlv>()?.mac;
        let searched_role = cmdu.require::<SearchedRoleTlv>()?.role;
        let band = cmdu.require::<AutoconfigFreqBandTlv>()?.band;

        if searched_role != role::REGISTRAR {
            debug!(al_mac = %al_mac, searched_role, "search is not for a registrar");
            return Ok(());
        }
        let supported = cmdu.require::<SupportedServiceTlv>()?.services;
        let searched = cmdu.require::<SearchedServiceTlv>()?.services;
        if supported.contains(&service::CONTROLLER) && al_mac != self.bridge_mac {
            warn!(al_mac = %al_mac, "search from another controller, multiple controllers on the network");
        }
        if !supported.contains(&service::AGENT) {
            warn!(al_mac = %al_mac, ?supported, "search does not advertise the agent service");
            return Ok(());
        }
        if !searched.contains(&service::CONTROLLER) {
            debug!(al_mac = %al_mac, ?searched, "search does not ask for a controller");
            return Ok(());
        }

        let agent_profile = cmdu.get::<MultiApProfileTlv>()?.map(|tlv| tlv.profile);
        let handshake = matches!(embedded_control(cmdu), Some(ControlMessage::SlaveHandshakeRequest));

        let now = self.now();
        let agent = self.db.add_agent(al_mac, now);
        if agent.state == AgentState::Disconnected {
            agent.state = AgentState::Connecting;
        }
        if let Some(agent_profile) = agent_profile {
            agent.profile = agent_profile;
        }
        agent.is_prplmesh |= handshake;
        agent.last_seen = now;

        let mut response = Cmdu::new(MessageType::ApAutoconfigurationResponse, cmdu.message_id());
        response
            .add(&SupportedRoleTlv {
                role: role::REGISTRAR,
            })
            .add(&SupportedFreqBandTlv { band })
            .add(&SupportedServiceTlv {
                services: vec![service::CONTROLLER],
            });
        if agent_profile.is_some() {
            response
                .add(&MultiApProfileTlv {
                    profile: profile::PROFILE_2,
                })
                .add(&ApCapabilityTlv::default())
                .add(&ControllerCapabilityTlv {
                    ki_bmi_b_counter: false,
                    early_ap_capability: true,
                });
        }
        if handshake {
            let reply = VendorMessage::control(ControlMessage::SlaveHandshakeResponse);
            response.add(&reply.to_tlv());
        }

        info!(
            src = %src,
            al_mac = %al_mac,
            band,
            profile = agent_profile.unwrap_or(0),
            prplmesh = handshake,
            "autoconfiguration search answered"
        );
        self.outbox.send(al_mac, &response)
    }

    // ------------------------------------------------------------------------
    // WSC
    // ------------------------------------------------------------------------

    pub(super) fn handle_autoconfig_wsc(&mut self, src: MacAddress, cmdu: &Cmdu) -> Result<()> {
        let wsc = cmdu.require::<WscTlv>()?;
        let m1 = M1::parse(&wsc.frame)?;
        let caps = cmdu.require::<ApRadioBasicCapabilitiesTlv>()?;
        let al_mac = src;
        let ruid = caps.ruid;

        let band = caps
            .operating_classes
            .iter()
            .map(|class| band_of_operating_class(class.operating_class))
            .find(|band| *band != FreqBand::Unknown)
            .unwrap_or_else(|| band_of_rf_bands(m1.rf_bands));

        let now = self.now();
        let agent = self.db.add_agent(al_mac, now);
        if agent.manufacturer.is_empty() {
            agent.manufacturer = m1.manufacturer.clone();
        }
        agent.last_seen = now;
        let radio = self.db.add_radio(al_mac, ruid);
        radio.band = band;
        radio.max_bss = caps.max_bss.max(1);
        radio.operating_classes = caps.operating_classes.clone();

        let selections = self.select_bss_configs(al_mac, &m1, &caps);
        let mut tlvs = Vec::with_capacity(selections.len() + 1);
        for selection in &selections {
            tlvs.push(self.build_wsc_tlv(RegistrarMessageKind::M2, &m1, &selection.config)?);
        }
        let backhaul_sta = m1
            .multiap_bss_type
            .map(|bits| bits & bss_type::BACKHAUL_STA != 0)
            .unwrap_or(false);
        if backhaul_sta {
            if let Some(selection) = selections.iter().find(|selection| selection.backhaul) {
                let mut config = selection.config.clone();
                config.bss_type = bss_type::BACKHAUL_STA;
                tlvs.push(self.build_wsc_tlv(RegistrarMessageKind::M8, &m1, &config)?);
            }
        }

        let mut response = Cmdu::new(MessageType::ApAutoconfigurationWsc, self.outbox.next_message_id());
        response.add(&ApRadioIdentifierTlv { ruid });
        for tlv in &tlvs {
            response.add(tlv);
        }
        let teardown = selections.first().map(|selection| selection.config.is_teardown()).unwrap_or(true);
        info!(
            al_mac = %al_mac,
            radio = %ruid,
            ?band,
            m2 = selections.len(),
            teardown,
            "WSC registrar response"
        );
        self.outbox.send(al_mac, &response)?;

        match embedded_control(cmdu) {
            Some(ControlMessage::SlaveJoinedNotification(joined)) => {
                self.same_vendor_join(al_mac, ruid, &joined)
            }
            _ => self.generic_join(al_mac, ruid),
        }
    }

    /// Credential sets for a radio, or a single teardown marker when nothing applies
    fn select_bss_configs(
        &self,
        al_mac: MacAddress,
        m1: &M1,
        caps: &ApRadioBasicCapabilitiesTlv,
    ) -> Vec<BssSelection> {
        let is_gateway = self.db.gateway() == Some(al_mac);
        let daisy_chaining_disabled = self.config.settings.daisy_chaining_disabled;
        let max_bss = usize::from(caps.max_bss.max(1));

        let mut selected = Vec::new();
        for bss in &self.config.bss_info {
            if !bss
                .operating_classes
                .iter()
                .any(|class| caps.supports_operating_class(*class))
            {
                continue;
            }
            if bss.backhaul && !bss.fronthaul && daisy_chaining_disabled && !is_gateway {
                debug!(ssid = %bss.ssid, "backhaul BSS suppressed, daisy chaining disabled");
                continue;
            }
            if selected.len() >= max_bss {
                warn!(al_mac = %al_mac, max_bss, "more BSS configurations than the radio supports");
                break;
            }
            selected.push(BssSelection {
                config: Self::config_data(bss, m1.mac),
                backhaul: bss.backhaul,
            });
        }

        if selected.is_empty() {
            selected.push(BssSelection {
                config: ConfigData::teardown(m1.mac),
                backhaul: false,
            });
        }
        selected
    }

    fn config_data(bss: &BssInfoConf, enrollee_mac: MacAddress) -> ConfigData {
        let mut bits = 0u8;
        if bss.fronthaul {
            bits |= bss_type::FRONTHAUL_BSS;
        }
        if bss.backhaul {
            bits |= bss_type::BACKHAUL_BSS;
            if bss.profile1_backhaul_sta_association_disallowed {
                bits |= bss_type::PROFILE1_BACKHAUL_STA_ASSOC_DISALLOWED;
            }
            if bss.profile2_backhaul_sta_association_disallowed {
                bits |= bss_type::PROFILE2_BACKHAUL_STA_ASSOC_DISALLOWED;
            }
        }
        ConfigData {
            ssid: bss.ssid.clone(),
            authentication_type: bss.authentication_type,
            encryption_type: bss.encryption_type,
            network_key: bss.network_key.clone(),
            bssid: enrollee_mac,
            bss_type: bits,
        }
    }

    fn build_wsc_tlv(&mut self, kind: RegistrarMessageKind, m1: &M1, config: &ConfigData) -> Result<WscTlv> {
        let frame = build_registrar_message(kind, m1, config, &self.registrar, &mut self.rng)
            .map_err(|e| {
                warn!(enrollee = %m1.mac, ?kind, error = %e, "registrar message build failed");
                e
            })?;
        Ok(WscTlv { frame })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_of_operating_class() {
        assert_eq!(band_of_operating_class(81), FreqBand::Band24G);
        assert_eq!(band_of_operating_class(115), FreqBand::Band5G);
        assert_eq!(band_of_operating_class(128), FreqBand::Band5G);
        assert_eq!(band_of_operating_class(131), FreqBand::Band6G);
        assert_eq!(band_of_operating_class(12), FreqBand::Unknown);
    }

    #[test]
    fn test_band_of_rf_bands_prefers_highest() {
        assert_eq!(band_of_rf_bands(rf_band::BAND_2_4GHZ), FreqBand::Band24G);
        assert_eq!(band_of_rf_bands(rf_band::BAND_2_4GHZ | rf_band::BAND_5GHZ), FreqBand::Band5G);
        assert_eq!(band_of_rf_bands(0), FreqBand::Unknown);
    }
}
