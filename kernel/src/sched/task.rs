//! Task control blocks.

use alloc::string::String;

use bitflags::bitflags;

use crate::arch::x86::context::CpuContext;
use crate::fs::file::FdTable;

/// Stable task identifier; keys the scheduler's task arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u32);

impl TaskId {
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for TaskId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Runnable, waiting in a ready queue.
    Ready,
    /// Executing on the CPU (at most one task at a time).
    Running,
    /// Waiting for a wakeup tick.
    Sleeping,
    /// Waiting on a resource (keyboard queue, disk, socket).
    Blocked,
    /// Exited; holds only its TCB until reaped.
    Zombie,
}

/// Scheduling priority bands, highest first.
///
/// Selection is strict: a Ready task in a higher band always runs before
/// any lower band; round-robin applies within a band.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    High = 0,
    #[default]
    Normal = 1,
    Low = 2,
    Background = 3,
}

/// Number of priority bands.
pub const PRIORITY_BANDS: usize = 4;

impl Priority {
    pub const fn band(self) -> usize {
        self as usize
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::High),
            1 => Some(Self::Normal),
            2 => Some(Self::Low),
            3 => Some(Self::Background),
            _ => None,
        }
    }
}

bitflags! {
    /// Task attribute flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskFlags: u32 {
        /// Runs in ring 3; first dispatch irets into user mode.
        const USER_MODE = 1 << 0;
        /// The idle task; selected only when nothing else is Ready.
        const IDLE = 1 << 1;
    }
}

/// A stack region owned by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackInfo {
    pub base: u32,
    pub size: u32,
}

impl StackInfo {
    /// Initial stack pointer (stacks grow down from the top).
    pub fn top(&self) -> u32 {
        self.base + self.size
    }
}

/// Default scheduler quantum in ticks.
pub const DEFAULT_QUANTUM: u32 = 5;

/// Kernel stack size per task.
pub const KERNEL_STACK_SIZE: u32 = 16 * 1024;

/// User-mode stack size.
pub const USER_STACK_SIZE: u32 = 16 * 1024;

/// Task control block.
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,
    pub priority: Priority,
    pub flags: TaskFlags,
    /// Saved kernel stack pointer; the register frame lives on the stack.
    pub context: CpuContext,
    pub kernel_stack: StackInfo,
    /// Backing storage for the kernel stack; freed when the TCB is reaped.
    pub stack_mem: Option<alloc::boxed::Box<[u8]>>,
    pub user_stack: Option<StackInfo>,
    /// Per-task file descriptors (slots 0-2 are the terminal).
    pub fd_table: FdTable,
    /// Current working directory (normalized absolute path).
    pub cwd: String,
    /// Tick at which a Sleeping task becomes Ready again.
    pub wake_tick: u64,
    pub exit_code: i32,
    /// Ticks left in the current quantum while Running.
    pub quantum_left: u32,
    /// Number of times this task was selected to run.
    pub run_count: u64,
}

impl Task {
    pub fn new(id: TaskId, name: String, priority: Priority, flags: TaskFlags) -> Self {
        Self {
            id,
            name,
            state: TaskState::Ready,
            priority,
            flags,
            context: CpuContext::default(),
            kernel_stack: StackInfo { base: 0, size: 0 },
            stack_mem: None,
            user_stack: None,
            fd_table: FdTable::new(),
            cwd: String::from("/"),
            wake_tick: 0,
            exit_code: 0,
            quantum_left: DEFAULT_QUANTUM,
            run_count: 0,
        }
    }

    pub fn is_user(&self) -> bool {
        self.flags.contains(TaskFlags::USER_MODE)
    }

    pub fn is_idle(&self) -> bool {
        self.flags.contains(TaskFlags::IDLE)
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_priority_bands_ordered() {
        assert!(Priority::High.band() < Priority::Normal.band());
        assert!(Priority::Normal.band() < Priority::Low.band());
        assert_eq!(Priority::from_u8(2), Some(Priority::Low));
        assert_eq!(Priority::from_u8(9), None);
    }

    #[test]
    fn test_stack_top() {
        let s = StackInfo {
            base: 0x10_0000,
            size: 0x4000,
        };
        assert_eq!(s.top(), 0x10_4000);
    }

    #[test]
    fn test_new_task_defaults() {
        let t = Task::new(
            TaskId(7),
            "worker".to_string(),
            Priority::Normal,
            TaskFlags::empty(),
        );
        assert_eq!(t.state, TaskState::Ready);
        assert_eq!(t.quantum_left, DEFAULT_QUANTUM);
        assert!(!t.is_user());
        assert!(!t.is_idle());
    }
}
