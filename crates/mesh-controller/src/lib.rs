//! Multi-AP Controller Engine
//!
//! This crate contains the controller logic built on `mesh-core`, including:
//! - `Controller`: broker filter, CMDU dispatch, WSC registrar and agent joins
//! - `db`: the network database of agents, radios, BSSes and stations
//! - `tasks`: the cooperative task pool and every long-running workflow
//! - `operations`: periodic maintenance of the persistent client database
//! - `son_actions`: network actions shared by tasks and handlers
//!
//! The engine is single-threaded and transport-agnostic: outgoing CMDUs go through a
//! [`CmduSender`], time comes from a [`mesh_core::TimeSource`], and the embedding
//! binary drives `run_tasks` / `run_operations` from its own timers.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod controller;
pub mod db;
pub mod operations;
pub mod sender;
pub mod son_actions;
pub mod tasks;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use controller::Controller;
pub use db::{Agent, AgentState, Bss, Database, Radio, Station, StationState, StationTaskKind};
pub use operations::{DbAging, DbCommit, Operation, OperationPool};
pub use sender::{CmduSender, Outbox, RecordingSender, SentCmdu};
pub use tasks::{Task, TaskBase, TaskContext, TaskEnv, TaskEvent, TaskId, TaskPool};
