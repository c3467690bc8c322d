//! Core scheduling state machine.
//!
//! Priority-banded round robin with a fixed quantum. All state
//! transitions happen here; the arch glue in `sched::mod` only performs
//! the actual stack switch for the decisions this module hands out, so
//! the whole policy is testable with a simulated clock.

use alloc::collections::BTreeMap;
use alloc::string::String;

use crate::error::{KernelResult, SchedError};

use super::queue::{ReadyQueues, SleepQueue};
use super::task::{Priority, StackInfo, Task, TaskFlags, TaskId, TaskState, DEFAULT_QUANTUM};

/// A context-switch decision: save `from` (if any), run `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    pub from: Option<TaskId>,
    pub to: TaskId,
}

/// Stacks released when a task is destroyed or reaped; the caller owns
/// returning them to the allocators.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReclaimedStacks {
    pub kernel: Option<StackInfo>,
    pub user: Option<StackInfo>,
}

pub struct Scheduler {
    tasks: BTreeMap<u32, Task>,
    ready: ReadyQueues,
    sleep: SleepQueue,
    current: Option<TaskId>,
    idle: Option<TaskId>,
    next_id: u32,
    /// Advisory flag: when false, ticks still count but no switch happens.
    enabled: bool,
    need_resched: bool,
    quantum: u32,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            ready: ReadyQueues::new(),
            sleep: SleepQueue::new(),
            current: None,
            idle: None,
            next_id: 1,
            enabled: true,
            need_resched: false,
            quantum: DEFAULT_QUANTUM,
        }
    }

    // -- task admission and lookup --------------------------------------

    /// Create a task in Ready state and enqueue it.
    ///
    /// The caller fills in context and stack fields afterwards via
    /// [`Scheduler::task_mut`]; the id is stable for the task's lifetime.
    pub fn create_task(&mut self, name: String, priority: Priority, flags: TaskFlags) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        let task = Task::new(id, name, priority, flags);
        let band = priority.band();
        self.tasks.insert(id.0, task);
        if !flags.contains(TaskFlags::IDLE) {
            self.ready.push(id, band);
        }
        id
    }

    /// Adopt `id` as the currently running task without a switch.
    ///
    /// Used once at boot: the init thread of control becomes the idle
    /// task, so the first real switch has a context to save into.
    pub fn adopt_boot(&mut self, id: TaskId) -> KernelResult<()> {
        let task = self
            .tasks
            .get_mut(&id.0)
            .ok_or(SchedError::TaskNotFound { id: id.0 })?;
        task.state = TaskState::Running;
        self.ready.remove(id);
        self.current = Some(id);
        Ok(())
    }

    /// Designate the idle task. It is never queued; `pick_next` falls
    /// back to it when every other task is waiting.
    pub fn set_idle(&mut self, id: TaskId) -> KernelResult<()> {
        let task = self
            .tasks
            .get_mut(&id.0)
            .ok_or(SchedError::TaskNotFound { id: id.0 })?;
        task.flags |= TaskFlags::IDLE;
        self.ready.remove(id);
        self.idle = Some(id);
        Ok(())
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id.0)
    }

    pub fn task_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id.0)
    }

    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.tasks.get(&id.0).map(|t| t.state)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    // -- the advisory enable flag ----------------------------------------

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn needs_resched(&self) -> bool {
        self.need_resched
    }

    // -- clock -----------------------------------------------------------

    /// Timer tick: wake expired sleepers, account the running quantum.
    pub fn on_tick(&mut self, now: u64) {
        for id in self.sleep.wake_expired(now) {
            if let Some(task) = self.tasks.get_mut(&id.0) {
                task.state = TaskState::Ready;
                self.ready.push(id, task.priority.band());
            }
        }

        match self.current {
            Some(cur) => {
                let is_idle = self
                    .tasks
                    .get(&cur.0)
                    .map(|t| t.is_idle())
                    .unwrap_or(false);
                if is_idle {
                    if !self.ready.is_empty() {
                        self.need_resched = true;
                    }
                } else if let Some(task) = self.tasks.get_mut(&cur.0) {
                    task.quantum_left = task.quantum_left.saturating_sub(1);
                    if task.quantum_left == 0 {
                        self.need_resched = true;
                    }
                }
            }
            None => {
                if !self.ready.is_empty() {
                    self.need_resched = true;
                }
            }
        }
    }

    // -- voluntary transitions -------------------------------------------

    /// Voluntary yield: the current task rotates to the back of its band
    /// at the next scheduling decision.
    pub fn yield_current(&mut self) {
        self.need_resched = true;
    }

    /// Put the current task to sleep until `wake_tick`.
    pub fn sleep_current(&mut self, wake_tick: u64) -> KernelResult<()> {
        let cur = self.current.ok_or(SchedError::InvalidState {
            expected: "a running task",
        })?;
        let task = self
            .tasks
            .get_mut(&cur.0)
            .ok_or(SchedError::TaskNotFound { id: cur.0 })?;
        task.state = TaskState::Sleeping;
        task.wake_tick = wake_tick;
        self.sleep.insert(cur, wake_tick);
        self.need_resched = true;
        Ok(())
    }

    /// Block the current task on a resource.
    pub fn block_current(&mut self) -> KernelResult<TaskId> {
        let cur = self.current.ok_or(SchedError::InvalidState {
            expected: "a running task",
        })?;
        let task = self
            .tasks
            .get_mut(&cur.0)
            .ok_or(SchedError::TaskNotFound { id: cur.0 })?;
        task.state = TaskState::Blocked;
        self.need_resched = true;
        Ok(cur)
    }

    /// Wake a Blocked or Sleeping task (resource signal).
    pub fn wake(&mut self, id: TaskId) -> KernelResult<()> {
        let task = self
            .tasks
            .get_mut(&id.0)
            .ok_or(SchedError::TaskNotFound { id: id.0 })?;
        match task.state {
            TaskState::Blocked | TaskState::Sleeping => {
                task.state = TaskState::Ready;
                let band = task.priority.band();
                self.sleep.remove(id);
                self.ready.push(id, band);
                self.need_resched = true;
                Ok(())
            }
            TaskState::Ready | TaskState::Running => Ok(()),
            TaskState::Zombie => Err(SchedError::InvalidState {
                expected: "a waiting task",
            }
            .into()),
        }
    }

    /// Terminate the current task.
    pub fn exit_current(&mut self, code: i32) -> KernelResult<()> {
        let cur = self.current.ok_or(SchedError::InvalidState {
            expected: "a running task",
        })?;
        let task = self
            .tasks
            .get_mut(&cur.0)
            .ok_or(SchedError::TaskNotFound { id: cur.0 })?;
        task.state = TaskState::Zombie;
        task.exit_code = code;
        self.need_resched = true;
        Ok(())
    }

    /// Destroy another task immediately.
    ///
    /// The currently running task cannot destroy itself this way (use
    /// [`Scheduler::exit_current`]); that is an error per the concurrency
    /// contract. Returns the stacks to reclaim.
    pub fn destroy(&mut self, id: TaskId) -> KernelResult<ReclaimedStacks> {
        if self.current == Some(id) {
            return Err(SchedError::CannotDestroyCurrent.into());
        }
        let task = self
            .tasks
            .get_mut(&id.0)
            .ok_or(SchedError::TaskNotFound { id: id.0 })?;
        task.state = TaskState::Zombie;
        let stacks = ReclaimedStacks {
            kernel: (task.kernel_stack.size > 0).then_some(task.kernel_stack),
            user: task.user_stack.take(),
        };
        task.kernel_stack = StackInfo { base: 0, size: 0 };
        self.ready.remove(id);
        self.sleep.remove(id);
        Ok(stacks)
    }

    /// Remove a Zombie's TCB, returning its exit code and any stacks not
    /// yet reclaimed.
    pub fn reap(&mut self, id: TaskId) -> KernelResult<(i32, ReclaimedStacks)> {
        let task = self
            .tasks
            .get(&id.0)
            .ok_or(SchedError::TaskNotFound { id: id.0 })?;
        if task.state != TaskState::Zombie {
            return Err(SchedError::InvalidState { expected: "Zombie" }.into());
        }
        let task = self.tasks.remove(&id.0).expect("checked above");
        let stacks = ReclaimedStacks {
            kernel: (task.kernel_stack.size > 0).then_some(task.kernel_stack),
            user: task.user_stack,
        };
        Ok((task.exit_code, stacks))
    }

    // -- selection -------------------------------------------------------

    /// Pick the next task and update states.
    ///
    /// Returns `None` when no switch is needed (or switching is disabled):
    /// either the current task keeps its CPU or nothing is runnable at
    /// all. Otherwise the previous task has been re-queued (if still
    /// Ready) and `to` marked Running.
    pub fn schedule(&mut self) -> Option<Switch> {
        if !self.enabled {
            return None;
        }
        self.need_resched = false;

        let cur = self.current;
        let cur_running = cur
            .and_then(|c| self.tasks.get(&c.0))
            .map(|t| t.state == TaskState::Running)
            .unwrap_or(false);
        let cur_is_idle = cur
            .and_then(|c| self.tasks.get(&c.0))
            .map(|t| t.is_idle())
            .unwrap_or(false);

        let next = match self.ready.pop_next() {
            Some(id) => id,
            None => {
                if cur_running {
                    // Nobody else wants the CPU: keep running, recharge.
                    if let Some(task) = cur.and_then(|c| self.tasks.get_mut(&c.0)) {
                        task.quantum_left = self.quantum;
                    }
                    return None;
                }
                // Current task went to sleep/blocked/exited: idle fills in.
                let idle = self.idle?;
                if Some(idle) == cur {
                    return None;
                }
                idle
            }
        };

        // Rotate the outgoing task back into its band. Idle parks as
        // Ready without queueing; only still-Running tasks are runnable.
        if let Some(c) = cur {
            if cur_running {
                if let Some(task) = self.tasks.get_mut(&c.0) {
                    task.state = TaskState::Ready;
                    if !cur_is_idle {
                        let band = task.priority.band();
                        self.ready.push(c, band);
                    }
                }
            }
        }

        if let Some(task) = self.tasks.get_mut(&next.0) {
            task.state = TaskState::Running;
            task.quantum_left = self.quantum;
            task.run_count += 1;
        }
        self.current = Some(next);

        Some(Switch { from: cur, to: next })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
