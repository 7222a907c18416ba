//! Cooperative tasks
//!
//! This module contains the task abstraction and every task the controller runs:
//! - `pool`: the single-threaded scheduler with event and response routing
//! - `channel_selection`: the per-radio channel selection state machine and its CCL
//! - `client_steering`, `btm_request`: moving stations between BSSes
//! - `association_handling`: follow-up work when a station connects
//! - `network_health_check`: liveness of repeaters and wired clients
//! - `client_locating`: finding the agent a wired client hangs off
//! - `service_prioritization`: pushing QoS rules to Profile-2 agents
//!
//! A task never blocks. `work()` performs one step and returns; waiting is expressed
//! through [`TaskBase`] (a delay, an awaited event kind, or pending responses) and the
//! pool only calls `work()` again once the wait is over.

pub mod association_handling;
pub mod btm_request;
pub mod channel_selection;
pub mod client_locating;
pub mod client_steering;
pub mod network_health_check;
pub mod pool;
pub mod service_prioritization;

use core::fmt;
use std::collections::BTreeMap;

use mesh_core::config::ControllerConfig;
use mesh_core::protocol::{Cmdu, MessageType, VendorMessage};
use mesh_core::{MacAddress, Result, Timestamp};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::sender::Outbox;

// Re-export scheduler types
pub use pool::TaskPool;

// Re-export task types
pub use association_handling::AssociationHandlingTask;
pub use btm_request::BtmRequestTask;
pub use channel_selection::{ChannelSelectionTask, CsEvent};
pub use client_locating::ClientLocatingTask;
pub use client_steering::ClientSteeringTask;
pub use network_health_check::NetworkHealthCheckTask;
pub use service_prioritization::ServicePrioritizationTask;

// ----------------------------------------------------------------------------
// Task Identifier
// ----------------------------------------------------------------------------

/// Process-unique task id, allocated monotonically by the pool
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TaskId(u64);

impl TaskId {
    /// Id of code running outside any task (controller handlers)
    pub const NONE: TaskId = TaskId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// 16-bit id carried in vendor message headers; never zero for a real task
    pub fn wire_id(&self) -> u16 {
        if self.0 == 0 {
            return 0;
        }
        ((self.0 - 1) % 0xffff + 1) as u16
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// Typed payloads pushed to tasks
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    ChannelSelection(CsEvent),
    StaConnected {
        sta: MacAddress,
        bssid: MacAddress,
    },
    StaDisconnected {
        sta: MacAddress,
        bssid: MacAddress,
    },
    BtmReport {
        sta: MacAddress,
        status_code: u8,
        target_bssid: Option<MacAddress>,
    },
}

/// Discriminant of [`TaskEvent`], used for event waits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ChannelSelection,
    StaConnected,
    StaDisconnected,
    BtmReport,
}

impl TaskEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TaskEvent::ChannelSelection(_) => EventKind::ChannelSelection,
            TaskEvent::StaConnected { .. } => EventKind::StaConnected,
            TaskEvent::StaDisconnected { .. } => EventKind::StaDisconnected,
            TaskEvent::BtmReport { .. } => EventKind::BtmReport,
        }
    }
}

// ----------------------------------------------------------------------------
// Task Base
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EventWait {
    kind: EventKind,
    deadline: Timestamp,
}

/// Pending response key: responding MAC and the vendor action op expected from it
pub type PendingKey = (MacAddress, u8);

/// Scheduling state shared by every task
#[derive(Debug, Clone, Default)]
pub struct TaskBase {
    id: TaskId,
    next_run: Timestamp,
    awaited: Option<EventWait>,
    pending: BTreeMap<PendingKey, usize>,
    responses_deadline: Option<Timestamp>,
    finished: bool,
}

impl TaskBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: TaskId) {
        self.id = id;
    }

    /// Resume after `delay_ms`
    pub fn wait_for(&mut self, now: Timestamp, delay_ms: u64) {
        self.next_run = now + delay_ms;
    }

    /// Runnable again right away
    pub fn wake(&mut self) {
        self.next_run = Timestamp::default();
    }

    /// Resume when an event of `kind` arrives or `timeout_ms` elapses
    pub fn wait_for_event(&mut self, kind: EventKind, now: Timestamp, timeout_ms: u64) {
        self.awaited = Some(EventWait {
            kind,
            deadline: now + timeout_ms,
        });
    }

    pub fn awaited_event(&self) -> Option<EventKind> {
        self.awaited.map(|wait| wait.kind)
    }

    pub fn clear_event_wait(&mut self) {
        self.awaited = None;
    }

    /// Expect one more response carrying `action_op` from `mac`
    pub fn add_pending_mac(&mut self, mac: MacAddress, action_op: u8) {
        *self.pending.entry((mac, action_op)).or_insert(0) += 1;
    }

    pub fn is_pending(&self, mac: MacAddress, action_op: u8) -> bool {
        self.pending.contains_key(&(mac, action_op))
    }

    /// Consume one expected response; true if it was pending
    pub fn remove_pending(&mut self, mac: MacAddress, action_op: u8) -> bool {
        let key = (mac, action_op);
        match self.pending.get_mut(&key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.pending.remove(&key);
                if self.pending.is_empty() {
                    self.responses_deadline = None;
                }
                true
            }
            None => false,
        }
    }

    pub fn has_pending_responses(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Give up on the pending responses after `timeout_ms`
    pub fn set_responses_timeout(&mut self, now: Timestamp, timeout_ms: u64) {
        self.responses_deadline = Some(now + timeout_ms);
    }

    pub fn finish(&mut self) {
        self.finished = true;
        self.awaited = None;
        self.pending.clear();
        self.responses_deadline = None;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Ready for `work()` at `now`
    pub fn is_runnable(&self, now: Timestamp) -> bool {
        !self.finished && self.awaited.is_none() && self.pending.is_empty() && now >= self.next_run
    }

    /// Something is due at `now`: work, or a timeout to fire
    pub(crate) fn needs_attention(&self, now: Timestamp) -> bool {
        self.is_runnable(now)
            || self.awaited.map(|wait| now >= wait.deadline).unwrap_or(false)
            || self.responses_deadline.map(|deadline| now >= deadline).unwrap_or(false)
    }

    pub(crate) fn take_expired_event_wait(&mut self, now: Timestamp) -> Option<EventKind> {
        match self.awaited {
            Some(wait) if now >= wait.deadline => {
                self.awaited = None;
                Some(wait.kind)
            }
            _ => None,
        }
    }

    pub(crate) fn take_expired_responses(&mut self, now: Timestamp) -> Option<Vec<PendingKey>> {
        match self.responses_deadline {
            Some(deadline) if now >= deadline => {
                self.responses_deadline = None;
                let pending = core::mem::take(&mut self.pending);
                Some(pending.into_keys().collect())
            }
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Task Trait
// ----------------------------------------------------------------------------

/// A resumable unit of cooperative work
pub trait Task: Send {
    fn name(&self) -> &'static str;

    fn base(&self) -> &TaskBase;

    fn base_mut(&mut self) -> &mut TaskBase;

    fn id(&self) -> TaskId {
        self.base().id()
    }

    /// Perform one step; must not block
    fn work(&mut self, ctx: &mut TaskContext<'_>);

    /// Delivered regardless of the current wait state
    fn handle_event(&mut self, _ctx: &mut TaskContext<'_>, _event: &TaskEvent) {}

    /// A vendor response correlated by task id and pending (mac, action op)
    fn handle_response(&mut self, _ctx: &mut TaskContext<'_>, _src: MacAddress, _message: &VendorMessage) {}

    /// Pending responses did not all arrive in time
    fn handle_responses_timeout(&mut self, _ctx: &mut TaskContext<'_>, _pending: &[PendingKey]) {}

    /// The awaited event did not arrive in time
    fn handle_events_timeout(&mut self, _ctx: &mut TaskContext<'_>, _kind: EventKind) {}

    /// 1905.1 message types this task wants to see
    fn ieee1905_interest(&self) -> &'static [MessageType] {
        &[]
    }

    /// Returns true when the message was consumed
    fn handle_ieee1905_msg(&mut self, _ctx: &mut TaskContext<'_>, _src: MacAddress, _cmdu: &Cmdu) -> bool {
        false
    }

    /// Cleanup when the task finishes or is killed
    fn handle_task_end(&mut self, ctx: &mut TaskContext<'_>) {
        ctx.db.clear_task_references(self.id());
    }
}

// ----------------------------------------------------------------------------
// Task Context
// ----------------------------------------------------------------------------

/// Borrowed controller state handed to the pool
pub struct TaskEnv<'a> {
    pub db: &'a mut Database,
    pub outbox: &'a mut Outbox,
    pub config: &'a ControllerConfig,
}

/// Pool mutations requested while a task runs, applied once it returns
pub(crate) enum PoolRequest {
    Add { id: TaskId, task: Box<dyn Task> },
    Event { target: TaskId, event: TaskEvent },
    Kill { target: TaskId },
}

/// Everything a task may touch during one call
pub struct TaskContext<'a> {
    pub db: &'a mut Database,
    pub outbox: &'a mut Outbox,
    pub config: &'a ControllerConfig,
    pub now: Timestamp,
    current: TaskId,
    live: &'a BTreeMap<TaskId, Box<dyn Task>>,
    next_id: &'a mut u64,
    requests: Vec<PoolRequest>,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(
        env: &'a mut TaskEnv<'_>,
        now: Timestamp,
        current: TaskId,
        live: &'a BTreeMap<TaskId, Box<dyn Task>>,
        next_id: &'a mut u64,
    ) -> Self {
        Self {
            db: &mut *env.db,
            outbox: &mut *env.outbox,
            config: env.config,
            now,
            current,
            live,
            next_id,
            requests: Vec::new(),
        }
    }

    pub(crate) fn into_requests(self) -> Vec<PoolRequest> {
        self.requests
    }

    /// Id of the task being called, [`TaskId::NONE`] from controller handlers
    pub fn current_task(&self) -> TaskId {
        self.current
    }

    /// Schedule a new task; its id is valid immediately
    pub fn add_task(&mut self, mut task: Box<dyn Task>) -> TaskId {
        *self.next_id += 1;
        let id = TaskId(*self.next_id);
        task.base_mut().set_id(id);
        self.requests.push(PoolRequest::Add { id, task });
        id
    }

    pub fn push_event(&mut self, target: TaskId, event: TaskEvent) {
        self.requests.push(PoolRequest::Event { target, event });
    }

    pub fn kill_task(&mut self, target: TaskId) {
        self.requests.push(PoolRequest::Kill { target });
    }

    pub fn is_task_alive(&self, id: TaskId) -> bool {
        let killed = self
            .requests
            .iter()
            .any(|request| matches!(request, PoolRequest::Kill { target } if *target == id));
        if killed || id == TaskId::NONE {
            return false;
        }
        let added = self
            .requests
            .iter()
            .any(|request| matches!(request, PoolRequest::Add { id: added, .. } if *added == id));
        id == self.current
            || added
            || self
                .live
                .get(&id)
                .map(|task| !task.base().is_finished())
                .unwrap_or(false)
    }

    pub fn send(&mut self, dst: MacAddress, cmdu: &Cmdu) -> Result<()> {
        self.outbox.send(dst, cmdu)
    }

    /// Send a same-vendor message as-is
    pub fn send_vendor(&mut self, dst: MacAddress, message: VendorMessage) -> Result<()> {
        self.outbox.send_vendor(dst, &message)
    }

    /// Send a same-vendor request tagged with the current task id
    pub fn send_request(&mut self, dst: MacAddress, message: VendorMessage) -> Result<()> {
        let message = message.with_id(self.current.wire_id());
        self.outbox.send_vendor(dst, &message)
    }

    /// Build a CMDU with a fresh message id
    pub fn new_cmdu(&mut self, message_type: MessageType) -> Cmdu {
        Cmdu::new(message_type, self.outbox.next_message_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_id_never_zero() {
        assert_eq!(TaskId::NONE.wire_id(), 0);
        assert_eq!(TaskId::new(1).wire_id(), 1);
        assert_eq!(TaskId::new(0xffff).wire_id(), 0xffff);
        assert_eq!(TaskId::new(0x10000).wire_id(), 1);
    }

    #[test]
    fn test_base_runnable_states() {
        let now = Timestamp::new(1_000);
        let mut base = TaskBase::new();
        assert!(base.is_runnable(now));

        base.wait_for(now, 500);
        assert!(!base.is_runnable(now));
        assert!(base.is_runnable(now + 500));

        base.wake();
        base.wait_for_event(EventKind::StaConnected, now, 100);
        assert!(!base.is_runnable(now));
        assert!(base.needs_attention(now + 100));
        assert_eq!(base.take_expired_event_wait(now + 100), Some(EventKind::StaConnected));
        assert!(base.is_runnable(now + 100));
    }

    #[test]
    fn test_pending_responses_are_counted() {
        let now = Timestamp::new(0);
        let agent = MacAddress::new([2, 0, 0, 0, 0, 1]);
        let mut base = TaskBase::new();
        base.add_pending_mac(agent, 22);
        base.add_pending_mac(agent, 22);
        base.set_responses_timeout(now, 1_000);

        assert!(base.remove_pending(agent, 22));
        assert!(base.has_pending_responses());
        assert!(base.remove_pending(agent, 22));
        assert!(!base.has_pending_responses());
        assert!(!base.remove_pending(agent, 22));
        assert_eq!(base.take_expired_responses(now + 5_000), None);
    }

    #[test]
    fn test_finish_clears_waits() {
        let now = Timestamp::new(0);
        let mut base = TaskBase::new();
        base.add_pending_mac(MacAddress::ZERO, 1);
        base.wait_for_event(EventKind::BtmReport, now, 10);
        base.finish();

        assert!(base.is_finished());
        assert!(!base.has_pending_responses());
        assert_eq!(base.awaited_event(), None);
        assert!(!base.is_runnable(now));
    }
}
