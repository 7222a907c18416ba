//! Controller
//!
//! This module contains the message-facing half of the controller:
//! - `dispatch`: broker filter and CMDU dispatch
//! - `autoconfig`: autoconfiguration search responses and the WSC registrar
//! - `join`: same-vendor and generic agent joins
//! - `control`: the CONTROL sub-protocol
//! - `ieee1905`: standard 1905.1 / Multi-AP handlers
//! - `northbound`: CLI and BML requests
//!
//! [`Controller`] owns the database, the task pool and the operation pool. It is
//! single-threaded: the binary feeds it broker frames and calls `run_tasks` and
//! `run_operations` from its two timers.

mod autoconfig;
mod control;
mod dispatch;
mod ieee1905;
mod join;
mod northbound;

use std::path::Path;
use std::sync::Arc;

use mesh_core::config::ControllerConfig;
use mesh_core::protocol::Cmdu;
use mesh_core::wsc::RegistrarInfo;
use mesh_core::{MacAddress, MeshError, Result, TimeSource, Timestamp};
use rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::{debug, info, warn};

use crate::db::{AgentState, Database, PersistentStore};
use crate::operations::{DbAging, DbCommit, OperationPool};
use crate::sender::{CmduSender, Outbox};
use crate::tasks::{
    ChannelSelectionTask, CsEvent, NetworkHealthCheckTask, ServicePrioritizationTask, TaskContext,
    TaskEnv, TaskEvent, TaskPool,
};

pub struct Controller {
    config: ControllerConfig,
    bridge_mac: MacAddress,
    db: Database,
    outbox: Outbox,
    tasks: TaskPool,
    operations: OperationPool,
    time: Arc<dyn TimeSource>,
    rng: ChaCha20Rng,
    registrar: RegistrarInfo,
    started: bool,
}

impl Controller {
    /// Create a controller with registrar randomness seeded from the OS
    pub fn new(
        config: ControllerConfig,
        bridge_mac: MacAddress,
        sender: Box<dyn CmduSender>,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        Self::with_rng(config, bridge_mac, sender, time, ChaCha20Rng::from_entropy())
    }

    /// Create a controller with an explicit registrar RNG
    pub fn with_rng(
        config: ControllerConfig,
        bridge_mac: MacAddress,
        sender: Box<dyn CmduSender>,
        time: Arc<dyn TimeSource>,
        rng: ChaCha20Rng,
    ) -> Result<Self> {
        config.validate()?;
        if bridge_mac.is_zero() {
            return Err(MeshError::config_error("bridge MAC address must not be zero"));
        }

        let mut db = Database::new();
        db.set_global_restricted_channels(config.channel.global_restricted_channels.clone());
        if config.settings.persistent_db {
            if let Some(path) = config.persistent_db.path.as_deref().map(Path::new) {
                if path.exists() {
                    match PersistentStore::load(path) {
                        Ok(store) => {
                            info!(clients = store.len(), path = %path.display(), "persistent db loaded");
                            db.persistent = store;
                        }
                        Err(e) => warn!(error = %e, "ignoring unreadable persistent db"),
                    }
                }
            }
        }

        let mut registrar = RegistrarInfo::default();
        registrar.uuid_r[..6].copy_from_slice(bridge_mac.as_bytes());

        Ok(Self {
            tasks: TaskPool::new(time.clone()),
            config,
            bridge_mac,
            db,
            outbox: Outbox::new(sender),
            operations: OperationPool::new(),
            time,
            rng,
            registrar,
            started: false,
        })
    }

    /// Seed the database and schedule the long-lived tasks and operations
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let now = self.now();

        if self.config.controller_only {
            let bridge_mac = self.bridge_mac;
            let agent = self.db.add_agent(bridge_mac, now);
            agent.state = AgentState::Connected;
            agent.eth_switch_mac = Some(bridge_mac.derived_backhaul());
            agent.version = self.config.version.clone();
            self.db.set_gateway(bridge_mac);
        }

        let cs = self.tasks.add_task(Box::new(ChannelSelectionTask::new()));
        self.db.channel_selection_task = Some(cs);
        if self.config.settings.health_check {
            let health = self.tasks.add_task(Box::new(NetworkHealthCheckTask::new()));
            self.db.health_check_task = Some(health);
        }
        let sp = self.tasks.add_task(Box::new(ServicePrioritizationTask::new()));
        self.db.service_prioritization_task = Some(sp);

        if self.config.settings.persistent_db {
            self.operations.add(Box::new(DbAging::new(&self.config)), now);
            self.operations.add(Box::new(DbCommit::new(&self.config)), now);
        }
        info!(bridge_mac = %self.bridge_mac, tasks = self.tasks.len(), "controller started");
    }

    /// Entry point for a frame received from the broker
    ///
    /// Returns `Ok(false)` when the frame is filtered out, `Ok(true)` when it was
    /// dispatched and handled, and an error only if the CMDU itself does not decode.
    pub fn handle_broker_message(&mut self, dst: MacAddress, src: MacAddress, bytes: &[u8]) -> Result<bool> {
        if src.is_zero() || dst.is_zero() {
            debug!(src = %src, dst = %dst, "dropping frame with zero address");
            return Ok(false);
        }
        if dst != MacAddress::MULTICAST_1905 && dst != self.bridge_mac {
            debug!(dst = %dst, "dropping frame not addressed to us");
            return Ok(false);
        }
        let cmdu = Cmdu::decode(bytes)?;
        Ok(self.handle_cmdu(src, &cmdu))
    }

    /// One scheduler tick within the configured time budget
    pub fn run_tasks(&mut self) -> usize {
        let budget = self.config.tasks_time_budget_ms();
        let mut env = TaskEnv {
            db: &mut self.db,
            outbox: &mut self.outbox,
            config: &self.config,
        };
        self.tasks.run_tasks(&mut env, budget)
    }

    /// One periodic operations tick
    pub fn run_operations(&mut self) -> usize {
        let now = self.now();
        self.operations.run_due(&mut self.db, &self.config, now)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn now(&self) -> Timestamp {
        self.time.now()
    }

    pub fn bridge_mac(&self) -> MacAddress {
        self.bridge_mac
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    pub fn tasks(&self) -> &TaskPool {
        &self.tasks
    }

    pub fn operations(&self) -> &OperationPool {
        &self.operations
    }

    /// Run controller code with a task context, as handlers do
    pub fn with_context<R>(&mut self, f: impl FnOnce(&mut TaskContext<'_>) -> R) -> R {
        let mut env = TaskEnv {
            db: &mut self.db,
            outbox: &mut self.outbox,
            config: &self.config,
        };
        self.tasks.with_context(&mut env, f)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn push_cs_event(&mut self, event: CsEvent) {
        let Some(cs) = self.db.channel_selection_task else {
            debug!(radio = %event.radio_mac(), "no channel selection task, event dropped");
            return;
        };
        let mut env = TaskEnv {
            db: &mut self.db,
            outbox: &mut self.outbox,
            config: &self.config,
        };
        self.tasks.push_event(&mut env, cs, TaskEvent::ChannelSelection(event));
    }
}
