//! Standard 1905.1 and Multi-AP message handlers
//!
//! Message types without a handler here are not errors: some are consumed by tasks
//! through the pool's 1905 routing, the rest are simply not relevant to the controller.

use mesh_core::channel::{operating_class_bandwidth, operating_class_uses_center_channel, WifiChannel};
use mesh_core::protocol::tlv::{
    backhaul_steering_result, ApMetricsTlv, ApRadioBasicCapabilitiesTlv,
    AssociatedStaLinkMetricsTlv, BackhaulStaRadioCapabilitiesTlv, BackhaulSteeringResponseTlv,
    BeaconMetricsResponseTlv, ClientAssociationEventTlv, ErrorCodeTlv, HigherLayerDataTlv,
    OperatingChannelReportTlv, StaMacAddressTlv, StatusCodeTlv, SteeringBtmReportTlv,
};
use mesh_core::protocol::{Cmdu, MessageType};
use mesh_core::{FreqBand, MacAddress, Result};
use tracing::{debug, info, warn};

use super::autoconfig::band_of_operating_class;
use super::Controller;
use crate::db::{LinkMetrics, PersistentClient, StationTaskKind};
use crate::son_actions;
use crate::tasks::TaskEvent;

impl Controller {
    pub(super) fn handle_ieee1905(&mut self, src: MacAddress, message_type: MessageType, cmdu: &Cmdu) -> Result<()> {
        match message_type {
            MessageType::ApAutoconfigurationSearch => self.handle_autoconfig_search(src, cmdu),
            MessageType::ApAutoconfigurationWsc => self.handle_autoconfig_wsc(src, cmdu),
            MessageType::Ack => {
                debug!(src = %src, mid = cmdu.message_id(), "ACK received");
                Ok(())
            }
            MessageType::ApCapabilityReport => self.handle_ap_capability_report(src, cmdu),
            MessageType::ApMetricsResponse => self.handle_ap_metrics_response(cmdu),
            MessageType::BeaconMetricsResponse => self.handle_beacon_metrics_response(cmdu),
            MessageType::ChannelScanReport => {
                debug!(src = %src, "channel scan report");
                self.send_ack(src, cmdu)
            }
            MessageType::ClientSteeringBtmReport => self.handle_btm_report(src, cmdu),
            MessageType::SteeringCompleted => {
                debug!(src = %src, "steering completed");
                self.send_ack(src, cmdu)
            }
            MessageType::BackhaulSteeringResponse => self.handle_backhaul_steering_response(src, cmdu),
            MessageType::HigherLayerData => {
                let data = cmdu.require::<HigherLayerDataTlv>()?;
                info!(src = %src, protocol = data.protocol, len = data.payload.len(), "higher layer data");
                self.send_ack(src, cmdu)
            }
            MessageType::OperatingChannelReport => self.handle_operating_channel_report(src, cmdu),
            MessageType::Tunnelled => {
                debug!(src = %src, "tunnelled message");
                self.send_ack(src, cmdu)
            }
            MessageType::BackhaulStaCapabilityReport => self.handle_backhaul_sta_capability_report(cmdu),
            MessageType::BssConfigurationRequest => {
                info!(src = %src, "BSS configuration request");
                Ok(())
            }
            MessageType::FailedConnection => self.handle_failed_connection(src, cmdu),
            MessageType::AssociatedStaLinkMetricsResponse => self.handle_link_metrics_response(cmdu),
            MessageType::EarlyApCapabilityReport => {
                debug!(src = %src, "early AP capability report");
                self.send_ack(src, cmdu)
            }
            MessageType::TopologyNotification => self.handle_topology_notification(src, cmdu),
            other => {
                debug!(src = %src, message_type = ?other, "no controller handler");
                Ok(())
            }
        }
    }

    fn send_ack(&mut self, dst: MacAddress, cmdu: &Cmdu) -> Result<()> {
        self.outbox.send(dst, &Cmdu::new(MessageType::Ack, cmdu.message_id()))
    }

    // ------------------------------------------------------------------------
    // Capabilities
    // ------------------------------------------------------------------------

    fn handle_ap_capability_report(&mut self, src: MacAddress, cmdu: &Cmdu) -> Result<()> {
        for caps in cmdu.get_all::<ApRadioBasicCapabilitiesTlv>()? {
            let Some(radio) = self.db.radio_mut(&caps.ruid) else {
                debug!(src = %src, radio = %caps.ruid, "capabilities of unknown radio");
                continue;
            };
            radio.max_bss = caps.max_bss.max(1);
            radio.operating_classes = caps.operating_classes;
        }
        Ok(())
    }

    fn handle_backhaul_sta_capability_report(&mut self, cmdu: &Cmdu) -> Result<()> {
        for caps in cmdu.get_all::<BackhaulStaRadioCapabilitiesTlv>()? {
            if let Some(radio) = self.db.radio_mut(&caps.ruid) {
                radio.backhaul_sta_mac = caps.backhaul_sta_mac;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Metrics
    // ------------------------------------------------------------------------

    fn handle_ap_metrics_response(&mut self, cmdu: &Cmdu) -> Result<()> {
        for metrics in cmdu.get_all::<ApMetricsTlv>()? {
            let Some(bss) = self.db.bss_mut(&metrics.bssid) else {
                continue;
            };
            bss.utilization = metrics.channel_utilization;
            bss.associated_sta_count = metrics.associated_sta_count;
            let radio = bss.radio;
            if let Some(radio) = self.db.radio_mut(&radio) {
                radio.utilization = metrics.channel_utilization;
            }
        }
        Ok(())
    }

    fn handle_link_metrics_response(&mut self, cmdu: &Cmdu) -> Result<()> {
        for report in cmdu.get_all::<AssociatedStaLinkMetricsTlv>()? {
            let Some(station) = self.db.station_mut(&report.sta_mac) else {
                continue;
            };
            let parent = station.parent_bssid;
            let latest = report
                .metrics
                .iter()
                .find(|metrics| Some(metrics.bssid) == parent)
                .or_else(|| report.metrics.first());
            if let Some(metrics) = latest {
                station.link_metrics = LinkMetrics {
                    downlink_rate_mbps: metrics.downlink_rate_mbps,
                    uplink_rate_mbps: metrics.uplink_rate_mbps,
                    uplink_rcpi: metrics.uplink_rcpi,
                };
            }
        }
        Ok(())
    }

    fn handle_beacon_metrics_response(&mut self, cmdu: &Cmdu) -> Result<()> {
        let response = cmdu.require::<BeaconMetricsResponseTlv>()?;
        if let Some(station) = self.db.station_mut(&response.sta_mac) {
            station.beacon_measurement_supported = true;
        }
        debug!(sta = %response.sta_mac, reports = response.reports.len(), "beacon metrics");
        Ok(())
    }

    fn handle_operating_channel_report(&mut self, src: MacAddress, cmdu: &Cmdu) -> Result<()> {
        let report = cmdu.require::<OperatingChannelReportTlv>()?;
        self.send_ack(src, cmdu)?;
        let Some(radio) = self.db.radio_mut(&report.ruid) else {
            debug!(src = %src, radio = %report.ruid, "operating channel of unknown radio");
            return Ok(());
        };
        // classes come in ascending order up to the current one; only those
        // narrower than 80 MHz carry the primary channel
        let current_class = report.channels.iter().map(|(operating_class, _)| *operating_class).max();
        let primary = report
            .channels
            .iter()
            .find(|(operating_class, _)| !operating_class_uses_center_channel(*operating_class))
            .map(|(_, channel)| *channel);
        if let Some(operating_class) = current_class {
            let bandwidth = operating_class_bandwidth(operating_class).unwrap_or(radio.channel.bandwidth);
            let channel = primary.unwrap_or(radio.channel.channel);
            if radio.channel.channel != channel || radio.channel.bandwidth != bandwidth {
                radio.channel = WifiChannel::from_primary(channel, bandwidth, radio.channel.ext_above);
            }
            radio.operating_class = operating_class;
            let band = band_of_operating_class(operating_class);
            if band != FreqBand::Unknown {
                radio.band = band;
            }
        }
        radio.tx_power = i8::try_from(report.tx_power).unwrap_or(i8::MAX);
        info!(radio = %report.ruid, channel = radio.channel.channel, "operating channel report");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Steering
    // ------------------------------------------------------------------------

    fn handle_btm_report(&mut self, src: MacAddress, cmdu: &Cmdu) -> Result<()> {
        let report = cmdu.require::<SteeringBtmReportTlv>()?;
        self.send_ack(src, cmdu)?;
        info!(
            sta = %report.sta_mac,
            bssid = %report.bssid,
            status_code = report.status_code,
            target = ?report.target_bssid,
            "BTM report"
        );

        if let Some(station) = self.db.station_mut(&report.sta_mac) {
            station.btm_supported = true;
        }
        let targets: Vec<_> = [StationTaskKind::Steering, StationTaskKind::BtmRequest]
            .into_iter()
            .filter_map(|kind| self.db.station_task(&report.sta_mac, kind))
            .collect();
        self.with_context(|ctx| {
            for task in targets {
                if ctx.is_task_alive(task) {
                    ctx.push_event(
                        task,
                        TaskEvent::BtmReport {
                            sta: report.sta_mac,
                            status_code: report.status_code,
                            target_bssid: report.target_bssid,
                        },
                    );
                }
            }
        });
        Ok(())
    }

    fn handle_backhaul_steering_response(&mut self, src: MacAddress, cmdu: &Cmdu) -> Result<()> {
        let response = cmdu.require::<BackhaulSteeringResponseTlv>()?;
        self.send_ack(src, cmdu)?;
        if response.result == backhaul_steering_result::SUCCESS {
            info!(sta = %response.backhaul_sta_mac, target = %response.target_bssid, "backhaul steering succeeded");
            return Ok(());
        }
        let reason = cmdu.get::<ErrorCodeTlv>()?.map(|error| error.reason_code);
        warn!(
            sta = %response.backhaul_sta_mac,
            target = %response.target_bssid,
            reason = ?reason,
            "backhaul steering failed"
        );
        Ok(())
    }

    fn handle_failed_connection(&mut self, src: MacAddress, cmdu: &Cmdu) -> Result<()> {
        let sta = cmdu.require::<StaMacAddressTlv>()?.mac;
        let status = cmdu.get::<StatusCodeTlv>()?.map(|status| status.status_code);
        warn!(src = %src, sta = %sta, status = ?status, "client failed to connect");
        self.send_ack(src, cmdu)
    }

    // ------------------------------------------------------------------------
    // Topology
    // ------------------------------------------------------------------------

    fn handle_topology_notification(&mut self, src: MacAddress, cmdu: &Cmdu) -> Result<()> {
        for event in cmdu.get_all::<ClientAssociationEventTlv>()? {
            if event.associated {
                self.station_associated(src, event.client_mac, event.bssid);
            } else {
                self.station_disassociated(event.client_mac, event.bssid);
            }
        }
        Ok(())
    }

    fn station_associated(&mut self, src: MacAddress, sta: MacAddress, bssid: MacAddress) {
        let Some(agent) = self.db.agent_of_bss(&bssid) else {
            warn!(src = %src, sta = %sta, bssid = %bssid, "association on unknown BSS");
            return;
        };
        let now = self.now();
        self.db.associate_station(sta, bssid, now);
        let is_backhaul = self.db.agent_by_backhaul_sta(&sta).is_some();
        let Some(station) = self.db.station_mut(&sta) else {
            return;
        };
        station.is_backhaul = is_backhaul;
        let (name, btm_supported) = (station.name.clone(), station.btm_supported);
        info!(sta = %sta, bssid = %bssid, agent = %agent, backhaul = is_backhaul, "station connected");

        if self.config.settings.persistent_db && !is_backhaul {
            let max_clients = self.config.persistent_db.max_clients;
            self.db.persistent.upsert(
                PersistentClient {
                    mac: sta,
                    name,
                    last_seen: now,
                    last_bssid: Some(bssid),
                    btm_supported,
                },
                max_clients,
            );
        }

        let same_vendor = self.db.agent(&agent).map(|agent| agent.is_prplmesh).unwrap_or(false);
        let monitor = same_vendor && self.config.settings.monitor_on_vaps && !is_backhaul;
        let steering = self.db.station_task(&sta, StationTaskKind::Steering);
        self.with_context(|ctx| {
            if let Some(steering) = steering {
                if ctx.is_task_alive(steering) {
                    ctx.push_event(steering, TaskEvent::StaConnected { sta, bssid });
                }
            }
            if monitor {
                son_actions::start_association_handling(ctx, sta, bssid);
            }
        });
    }

    fn station_disassociated(&mut self, sta: MacAddress, bssid: MacAddress) {
        let current = self.db.station(&sta).and_then(|station| station.parent_bssid);
        if current != Some(bssid) {
            debug!(sta = %sta, bssid = %bssid, current = ?current, "stale disassociation ignored");
            return;
        }
        self.with_context(|ctx| son_actions::handle_dead_station(ctx, sta));
    }
}
