//! Network-level actions shared by tasks and message handlers
//!
//! Every per-station workflow is started here so that at most one task of each kind
//! references a station: the previous task of that kind is killed before the new one
//! is scheduled and recorded on the station.

use mesh_core::protocol::tlv::{AssociationControl, ClientAssociationControlRequestTlv};
use mesh_core::protocol::vendor::ControlMessage;
use mesh_core::protocol::{MessageType, VendorMessage};
use mesh_core::MacAddress;
use tracing::{debug, info, warn};

use crate::db::{AgentState, StationTaskKind};
use crate::tasks::{
    AssociationHandlingTask, BtmRequestTask, ClientLocatingTask, ClientSteeringTask, CsEvent,
    Task, TaskContext, TaskEvent, TaskId,
};

// ----------------------------------------------------------------------------
// Station Workflows
// ----------------------------------------------------------------------------

fn start_station_task(
    ctx: &mut TaskContext<'_>,
    sta_mac: MacAddress,
    kind: StationTaskKind,
    task: Box<dyn Task>,
) -> Option<TaskId> {
    ctx.db.station(&sta_mac)?;
    if let Some(previous) = ctx.db.station_task(&sta_mac, kind) {
        if ctx.is_task_alive(previous) {
            debug!(sta = %sta_mac, ?kind, task = %previous, "superseding running task");
            ctx.kill_task(previous);
        }
    }
    let id = ctx.add_task(task);
    ctx.db.set_station_task(&sta_mac, kind, Some(id));
    Some(id)
}

/// Steer a station to `target_bssid`
pub fn steer_client(
    ctx: &mut TaskContext<'_>,
    sta_mac: MacAddress,
    target_bssid: MacAddress,
    triggered_by: &str,
    disassoc_timer_ms: u32,
) -> Option<TaskId> {
    let task = ClientSteeringTask::new(sta_mac, target_bssid, triggered_by, disassoc_timer_ms);
    start_station_task(ctx, sta_mac, StationTaskKind::Steering, Box::new(task))
}

pub fn send_btm_request(
    ctx: &mut TaskContext<'_>,
    sta_mac: MacAddress,
    target_bssid: MacAddress,
    disassoc_imminent: bool,
) -> Option<TaskId> {
    let task = BtmRequestTask::new(sta_mac, target_bssid, disassoc_imminent);
    start_station_task(ctx, sta_mac, StationTaskKind::BtmRequest, Box::new(task))
}

pub fn start_association_handling(
    ctx: &mut TaskContext<'_>,
    sta_mac: MacAddress,
    bssid: MacAddress,
) -> Option<TaskId> {
    let task = AssociationHandlingTask::new(sta_mac, bssid);
    start_station_task(ctx, sta_mac, StationTaskKind::AssociationHandling, Box::new(task))
}

pub fn start_client_locating(ctx: &mut TaskContext<'_>, sta_mac: MacAddress) -> Option<TaskId> {
    let task = ClientLocatingTask::new(sta_mac);
    start_station_task(ctx, sta_mac, StationTaskKind::ClientLocating, Box::new(task))
}

/// Kill every workflow on a station; a steering in progress survives its own disconnect
fn kill_station_tasks(ctx: &mut TaskContext<'_>, sta_mac: MacAddress) {
    let Some((tasks, handoff)) = ctx.db.station(&sta_mac).map(|sta| (sta.tasks, sta.handoff)) else {
        return;
    };
    for kind in [
        StationTaskKind::Steering,
        StationTaskKind::BtmRequest,
        StationTaskKind::AssociationHandling,
        StationTaskKind::ClientLocating,
    ] {
        if kind == StationTaskKind::Steering && handoff {
            continue;
        }
        if let Some(id) = tasks.get(kind) {
            ctx.kill_task(id);
        }
    }
}

// ----------------------------------------------------------------------------
// Dead Entities
// ----------------------------------------------------------------------------

/// A station stopped answering or its BSS went away
pub fn handle_dead_station(ctx: &mut TaskContext<'_>, sta_mac: MacAddress) {
    let Some(station) = ctx.db.station(&sta_mac) else {
        return;
    };
    let bssid = station.parent_bssid;
    info!(sta = %sta_mac, handoff = station.handoff, "station disconnected");
    kill_station_tasks(ctx, sta_mac);
    ctx.db.disconnect_station(&sta_mac);
    if let Some(station) = ctx.db.station_mut(&sta_mac) {
        station.parent_agent = None;
    }

    // a repeater's uplink took the repeater with it
    let owner = ctx.db.agent_by_backhaul_sta(&sta_mac).map(|agent| agent.al_mac);
    if let Some(owner) = owner {
        handle_dead_agent(ctx, owner);
    }

    let steering = ctx.db.station_task(&sta_mac, StationTaskKind::Steering);
    if let (Some(bssid), Some(steering)) = (bssid, steering) {
        if ctx.is_task_alive(steering) {
            ctx.push_event(steering, TaskEvent::StaDisconnected { sta: sta_mac, bssid });
        }
    }
}

/// A radio went silent or failed its channel workflow
pub fn handle_dead_radio(ctx: &mut TaskContext<'_>, ruid: MacAddress) {
    let Some(radio) = ctx.db.radio_mut(&ruid) else {
        return;
    };
    warn!(radio = %ruid, "radio down");
    radio.active = false;
    for bssid in ctx.db.bsses_of_radio(&ruid).iter().map(|bss| bss.bssid).collect::<Vec<_>>() {
        if let Some(bss) = ctx.db.bss_mut(&bssid) {
            bss.enabled = false;
        }
    }
    for sta in ctx.db.stations_of_radio(&ruid) {
        handle_dead_station(ctx, sta);
    }
    if let Some(cs_task) = ctx.db.channel_selection_task {
        ctx.push_event(
            cs_task,
            TaskEvent::ChannelSelection(CsEvent::Deleted { radio_mac: ruid }),
        );
    }
}

/// An agent left the network, with everything hanging off it
pub fn handle_dead_agent(ctx: &mut TaskContext<'_>, al_mac: MacAddress) {
    let Some(agent) = ctx.db.agent_mut(&al_mac) else {
        return;
    };
    if agent.state == AgentState::Disconnected {
        return;
    }
    info!(agent = %al_mac, "agent disconnected");
    agent.state = AgentState::Disconnected;

    let radios: Vec<MacAddress> = ctx
        .db
        .radios_of_agent(&al_mac)
        .into_iter()
        .map(|radio| radio.ruid)
        .collect();
    for ruid in radios {
        handle_dead_radio(ctx, ruid);
    }

    let wired: Vec<MacAddress> = ctx
        .db
        .stations()
        .filter(|sta| sta.is_connected() && sta.parent_bssid.is_none() && sta.parent_agent == Some(al_mac))
        .map(|sta| sta.mac)
        .collect();
    for sta in wired {
        handle_dead_station(ctx, sta);
    }

    let children: Vec<MacAddress> = ctx
        .db
        .agents()
        .filter(|agent| agent.parent == Some(al_mac) && agent.state != AgentState::Disconnected)
        .map(|agent| agent.al_mac)
        .collect();
    for child in children {
        handle_dead_agent(ctx, child);
    }
}

// ----------------------------------------------------------------------------
// Client Control
// ----------------------------------------------------------------------------

/// Ask the serving agent to disassociate or deauthenticate a client
pub fn disconnect_client(ctx: &mut TaskContext<'_>, sta_mac: MacAddress, kind: u8, reason: u16) -> bool {
    let Some(bssid) = ctx.db.station(&sta_mac).and_then(|sta| sta.parent_bssid) else {
        debug!(sta = %sta_mac, "disconnect of a station that is not associated");
        return false;
    };
    let Some(bss) = ctx.db.bss(&bssid) else {
        return false;
    };
    let (vap_id, radio) = (bss.vap_id, bss.radio);
    let Some(agent) = ctx.db.agent_of_bss(&bssid) else {
        return false;
    };
    let message = VendorMessage::control(ControlMessage::ClientDisconnectRequest {
        mac: sta_mac,
        vap_id,
        kind,
        reason,
    })
    .with_radio(radio);
    ctx.send_vendor(agent, message).is_ok()
}

fn association_control(
    ctx: &mut TaskContext<'_>,
    sta_mac: MacAddress,
    bssid: MacAddress,
    control: AssociationControl,
) -> bool {
    let Some(agent) = ctx.db.agent_of_bss(&bssid) else {
        warn!(bssid = %bssid, "association control for unknown BSS");
        return false;
    };
    let cmdu = ctx
        .new_cmdu(MessageType::ClientAssociationControlRequest)
        .with(&ClientAssociationControlRequestTlv {
            bssid,
            control,
            validity_period_sec: 0,
            sta_list: vec![sta_mac],
        });
    ctx.send(agent, &cmdu).is_ok()
}

/// Lift a block on `bssid` for one client
pub fn allow_client(ctx: &mut TaskContext<'_>, sta_mac: MacAddress, bssid: MacAddress) -> bool {
    association_control(ctx, sta_mac, bssid, AssociationControl::Unblock)
}

/// Block one client from `bssid` until allowed again
pub fn disallow_client(ctx: &mut TaskContext<'_>, sta_mac: MacAddress, bssid: MacAddress) -> bool {
    association_control(ctx, sta_mac, bssid, AssociationControl::IndefiniteBlock)
}
