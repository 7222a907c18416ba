//! Task pool
//!
//! Owns every live task. `run_tasks` is called once per scheduler tick and gives each
//! due task one step, stopping as soon as the tick's time budget is spent; the next
//! tick resumes with the task after the last one served. Responses and events are
//! routed to their task by id, and pool mutations a task requests (new tasks, events,
//! kills) are applied right after that task returns.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use mesh_core::protocol::{Cmdu, VendorMessage};
use mesh_core::{MacAddress, TimeSource, Timestamp};
use tracing::{debug, trace, warn};

use super::{PoolRequest, Task, TaskContext, TaskEnv, TaskEvent, TaskId};

pub struct TaskPool {
    tasks: BTreeMap<TaskId, Box<dyn Task>>,
    next_id: u64,
    time: Arc<dyn TimeSource>,
    /// Last task served by a tick that ran out of budget
    resume_after: Option<TaskId>,
}

impl TaskPool {
    pub fn new(time: Arc<dyn TimeSource>) -> Self {
        Self {
            tasks: BTreeMap::new(),
            next_id: 0,
            time,
            resume_after: None,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.time.now()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn is_task_running(&self, id: TaskId) -> bool {
        self.tasks
            .get(&id)
            .map(|task| !task.base().is_finished())
            .unwrap_or(false)
    }

    pub fn task_name(&self, id: TaskId) -> Option<&'static str> {
        self.tasks.get(&id).map(|task| task.name())
    }

    /// Ids of live tasks with the given name
    pub fn tasks_named(&self, name: &str) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|(_, task)| task.name() == name && !task.base().is_finished())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Schedule a task from outside any context
    pub fn add_task(&mut self, mut task: Box<dyn Task>) -> TaskId {
        self.next_id += 1;
        let id = TaskId::new(self.next_id);
        task.base_mut().set_id(id);
        debug!(task = task.name(), id = %id, "task added");
        self.tasks.insert(id, task);
        id
    }

    /// Run `f` with a context not bound to any task, then apply what it requested
    pub fn with_context<R>(
        &mut self,
        env: &mut TaskEnv<'_>,
        f: impl FnOnce(&mut TaskContext<'_>) -> R,
    ) -> R {
        let now = self.time.now();
        let (result, requests) = {
            let mut ctx = TaskContext::new(env, now, TaskId::NONE, &self.tasks, &mut self.next_id);
            let result = f(&mut ctx);
            (result, ctx.into_requests())
        };
        self.apply_requests(env, requests);
        result
    }

    pub fn push_event(&mut self, env: &mut TaskEnv<'_>, target: TaskId, event: TaskEvent) -> bool {
        if !self.tasks.contains_key(&target) {
            debug!(id = %target, "event for unknown task dropped");
            return false;
        }
        self.apply_requests(env, vec![PoolRequest::Event { target, event }]);
        true
    }

    pub fn kill_task(&mut self, env: &mut TaskEnv<'_>, target: TaskId) -> bool {
        if !self.tasks.contains_key(&target) {
            return false;
        }
        self.apply_requests(env, vec![PoolRequest::Kill { target }]);
        true
    }

    /// One scheduler tick; returns how many tasks were served
    pub fn run_tasks(&mut self, env: &mut TaskEnv<'_>, budget_ms: u64) -> usize {
        let start = self.time.now();
        self.reap_finished(env);

        let mut order: Vec<TaskId> = self.tasks.keys().copied().collect();
        if let Some(last) = self.resume_after.take() {
            let split = order.partition_point(|id| *id <= last);
            order.rotate_left(split);
        }

        let mut served = 0;
        for id in order {
            if self.time.now() - start >= budget_ms {
                debug!(served, budget_ms, "tick budget exhausted");
                return served;
            }
            let now = self.time.now();
            let due = self
                .tasks
                .get(&id)
                .map(|task| task.base().needs_attention(now))
                .unwrap_or(false);
            if !due {
                continue;
            }
            self.call_task(env, id, |task, ctx| {
                let now = ctx.now;
                if let Some(kind) = task.base_mut().take_expired_event_wait(now) {
                    debug!(task = task.name(), id = %task.id(), ?kind, "event wait timed out");
                    task.handle_events_timeout(ctx, kind);
                }
                if let Some(pending) = task.base_mut().take_expired_responses(now) {
                    debug!(task = task.name(), id = %task.id(), missing = pending.len(), "responses timed out");
                    task.handle_responses_timeout(ctx, &pending);
                }
                if task.base().is_runnable(now) {
                    trace!(task = task.name(), id = %task.id(), "work");
                    task.work(ctx);
                }
            });
            self.resume_after = Some(id);
            served += 1;
        }
        self.resume_after = None;
        served
    }

    /// Route a vendor response to the task that is waiting for it
    pub fn response_received(
        &mut self,
        env: &mut TaskEnv<'_>,
        src: MacAddress,
        message: &VendorMessage,
    ) -> bool {
        if message.id == 0 {
            return false;
        }
        let action_op = message.action_op();
        let target = self
            .tasks
            .iter()
            .find(|(id, task)| {
                id.wire_id() == message.id && task.base().is_pending(src, action_op)
            })
            .map(|(id, _)| *id);
        let Some(id) = target else {
            debug!(src = %src, id = message.id, action_op, "no task waiting for response");
            return false;
        };
        self.call_task(env, id, |task, ctx| {
            task.base_mut().remove_pending(src, action_op);
            task.handle_response(ctx, src, message);
        })
    }

    /// Offer a 1905.1 message to every task interested in its type
    pub fn handle_ieee1905_msg(&mut self, env: &mut TaskEnv<'_>, src: MacAddress, cmdu: &Cmdu) -> bool {
        let Some(message_type) = cmdu.message_type() else {
            return false;
        };
        let interested: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|(_, task)| {
                !task.base().is_finished() && task.ieee1905_interest().contains(&message_type)
            })
            .map(|(id, _)| *id)
            .collect();

        let mut handled = false;
        for id in interested {
            self.call_task(env, id, |task, ctx| {
                handled |= task.handle_ieee1905_msg(ctx, src, cmdu);
            });
        }
        handled
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Call into one task with a context, then apply its requests
    fn call_task<F>(&mut self, env: &mut TaskEnv<'_>, id: TaskId, f: F) -> bool
    where
        F: FnOnce(&mut dyn Task, &mut TaskContext<'_>),
    {
        match self.invoke(env, id, f) {
            Some(requests) => {
                self.apply_requests(env, requests);
                true
            }
            None => false,
        }
    }

    /// The task is taken out of the map for the duration of the call
    fn invoke<F>(&mut self, env: &mut TaskEnv<'_>, id: TaskId, f: F) -> Option<Vec<PoolRequest>>
    where
        F: FnOnce(&mut dyn Task, &mut TaskContext<'_>),
    {
        let mut task = self.tasks.remove(&id)?;
        let now = self.time.now();
        let requests = {
            let mut ctx = TaskContext::new(env, now, id, &self.tasks, &mut self.next_id);
            f(task.as_mut(), &mut ctx);
            ctx.into_requests()
        };
        self.tasks.insert(id, task);
        Some(requests)
    }

    fn end_task(&mut self, env: &mut TaskEnv<'_>, id: TaskId) -> Option<Vec<PoolRequest>> {
        let mut task = self.tasks.remove(&id)?;
        debug!(task = task.name(), id = %id, "task ended");
        let now = self.time.now();
        let mut ctx = TaskContext::new(env, now, id, &self.tasks, &mut self.next_id);
        task.handle_task_end(&mut ctx);
        Some(ctx.into_requests())
    }

    fn reap_finished(&mut self, env: &mut TaskEnv<'_>) {
        let finished: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.base().is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in finished {
            if let Some(requests) = self.end_task(env, id) {
                self.apply_requests(env, requests);
            }
        }
    }

    fn apply_requests(&mut self, env: &mut TaskEnv<'_>, requests: Vec<PoolRequest>) {
        let mut queue: VecDeque<PoolRequest> = requests.into();
        while let Some(request) = queue.pop_front() {
            let follow_up = match request {
                PoolRequest::Add { id, task } => {
                    debug!(task = task.name(), id = %id, "task added");
                    self.tasks.insert(id, task);
                    None
                }
                PoolRequest::Event { target, event } => self.invoke(env, target, |task, ctx| {
                    let base = task.base_mut();
                    if base.awaited_event() == Some(event.kind()) {
                        base.clear_event_wait();
                    }
                    task.handle_event(ctx, &event);
                }),
                PoolRequest::Kill { target } => {
                    if target == TaskId::NONE {
                        warn!("kill request without a task id");
                    }
                    self.end_task(env, target)
                }
            };
            if let Some(requests) = follow_up {
                queue.extend(requests);
            }
        }
    }
}
