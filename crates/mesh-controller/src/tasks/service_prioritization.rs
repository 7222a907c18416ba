//! Service prioritization
//!
//! Keeps every Profile-2 agent provisioned with the controller's prioritization rule
//! and DSCP mapping, and forwards the QoS descriptors of QoS management notifications
//! to all of them.

use std::collections::BTreeSet;

use mesh_core::protocol::tlv::{
    profile, DscpMappingTableTlv, QosManagementDescriptorTlv, ServicePrioritizationRuleTlv,
};
use mesh_core::protocol::{Cmdu, MessageType};
use mesh_core::MacAddress;
use tracing::{debug, info, warn};

use super::{Task, TaskBase, TaskContext};

/// New Profile-2 agents are picked up at this period
pub const PROVISIONING_INTERVAL_MS: u64 = 5_000;

const RULE_ID: u32 = 1;
const RULE_PRECEDENCE: u8 = 0xfe;
/// Rule output: use the DSCP mapping table
const OUTPUT_DSCP_MAPPING: u8 = 0x08;

/// Default mapping: the three class-selector bits of the DSCP become the priority
pub fn default_dscp_table() -> [u8; 64] {
    let mut table = [0u8; 64];
    for (dscp, priority) in table.iter_mut().enumerate() {
        *priority = (dscp >> 3) as u8;
    }
    table
}

pub struct ServicePrioritizationTask {
    base: TaskBase,
    provisioned: BTreeSet<MacAddress>,
}

impl Default for ServicePrioritizationTask {
    fn default() -> Self {
        Self::new()
    }
}

impl ServicePrioritizationTask {
    pub fn new() -> Self {
        Self {
            base: TaskBase::new(),
            provisioned: BTreeSet::new(),
        }
    }

    fn profile2_agents(ctx: &TaskContext<'_>) -> Vec<MacAddress> {
        ctx.db
            .agents()
            .filter(|agent| agent.is_connected() && agent.profile >= profile::PROFILE_2)
            .map(|agent| agent.al_mac)
            .collect()
    }

    fn request(ctx: &mut TaskContext<'_>, descriptors: &[QosManagementDescriptorTlv]) -> Cmdu {
        let mut cmdu = ctx.new_cmdu(MessageType::ServicePrioritizationRequest);
        cmdu.add(&ServicePrioritizationRuleTlv {
            rule_id: RULE_ID,
            add: true,
            precedence: RULE_PRECEDENCE,
            output: OUTPUT_DSCP_MAPPING,
            always_match: true,
        })
        .add(&DscpMappingTableTlv {
            table: default_dscp_table(),
        });
        for descriptor in descriptors {
            cmdu.add(descriptor);
        }
        cmdu
    }
}

impl Task for ServicePrioritizationTask {
    fn name(&self) -> &'static str {
        "service_prioritization"
    }

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn work(&mut self, ctx: &mut TaskContext<'_>) {
        let agents = Self::profile2_agents(ctx);
        self.provisioned.retain(|agent| agents.contains(agent));
        for agent in agents {
            if self.provisioned.contains(&agent) {
                continue;
            }
            let cmdu = Self::request(ctx, &[]);
            if ctx.send(agent, &cmdu).is_ok() {
                debug!(agent = %agent, "service prioritization provisioned");
                self.provisioned.insert(agent);
            }
        }
        self.base.wait_for(ctx.now, PROVISIONING_INTERVAL_MS);
    }

    fn ieee1905_interest(&self) -> &'static [MessageType] {
        &[MessageType::QosManagementNotification]
    }

    fn handle_ieee1905_msg(&mut self, ctx: &mut TaskContext<'_>, src: MacAddress, cmdu: &Cmdu) -> bool {
        let descriptors = match cmdu.get_all::<QosManagementDescriptorTlv>() {
            Ok(descriptors) => descriptors,
            Err(e) => {
                warn!(src = %src, error = %e, "malformed QoS management notification");
                return false;
            }
        };
        info!(src = %src, descriptors = descriptors.len(), "QoS management notification");
        for agent in Self::profile2_agents(ctx) {
            let request = Self::request(ctx, &descriptors);
            if let Err(e) = ctx.send(agent, &request) {
                warn!(agent = %agent, error = %e, "QoS management request not sent");
            }
        }
        true
    }
}
