//! Task management and scheduling.
//!
//! [`scheduler::Scheduler`] owns every policy decision; this module wires
//! it to the rest of the kernel: the global instance, stack allocation,
//! user-mode task setup, and the arch glue that performs the switches the
//! policy decides on.

pub mod queue;
pub mod scheduler;
pub mod task;

pub use scheduler::{ReclaimedStacks, Scheduler, Switch};
pub use task::{Priority, StackInfo, Task, TaskFlags, TaskId, TaskState};

use alloc::string::String;
use alloc::vec;

use crate::arch::x86::context::{
    build_initial_stack, build_initial_user_stack, kernel_trampoline_addr, user_trampoline_addr,
    INITIAL_STACK_SLOTS, INITIAL_USER_STACK_SLOTS,
};
use crate::error::{KernelError, KernelResult};
use crate::mm::page_table::PageFlags;
use crate::mm::vmm::{self, FrameSource, GlobalFrames};
use crate::mm::{PhysAddr, VirtAddr, PAGE_SIZE};
use crate::sync::IrqMutex;
use crate::timer;

/// Highest address of the first user stack; each task's stack slot is
/// spaced one guard page below the previous one.
const USER_STACK_TOP: u32 = 0xBF80_0000;

/// Global scheduler instance; mutated only with interrupts masked.
static SCHEDULER: IrqMutex<Option<Scheduler>> = IrqMutex::new(None);

/// Run a closure against the global scheduler.
pub fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> KernelResult<R> {
    let mut guard = SCHEDULER.lock();
    match guard.as_mut() {
        Some(s) => Ok(f(s)),
        None => Err(KernelError::NotInitialized {
            subsystem: "scheduler",
        }),
    }
}

/// Initialize the scheduler and adopt the boot context as the idle task.
///
/// The thread of control that called this keeps running as "idle": when
/// every other task sleeps, the scheduler switches back here, and the
/// boot loop's `hlt` provides the idle behavior.
pub fn init() -> KernelResult<TaskId> {
    let mut guard = SCHEDULER.lock();
    if guard.is_some() {
        return Err(KernelError::AlreadyExists {
            resource: "scheduler",
        });
    }
    let mut s = Scheduler::new();
    let idle = s.create_task(String::from("idle"), Priority::Background, TaskFlags::IDLE);
    s.set_idle(idle)?;
    s.adopt_boot(idle)?;
    *guard = Some(s);
    log::info!("sched: initialized, boot context is {}", idle);
    Ok(idle)
}

/// Tear down the global scheduler (tests only).
#[cfg(test)]
pub fn reset_for_test() {
    *SCHEDULER.lock() = None;
}

/// Create a kernel-mode task.
///
/// Allocates a kernel stack, seeds it so the first dispatch calls
/// `entry(arg)`, and enqueues the task Ready.
pub fn task_create(
    name: &str,
    entry: extern "C" fn(usize),
    arg: usize,
    priority: Priority,
) -> KernelResult<TaskId> {
    let mut stack = vec![0u8; task::KERNEL_STACK_SIZE as usize].into_boxed_slice();

    // Seed the switch frame at the stack top.
    let slot_bytes = INITIAL_STACK_SLOTS * 4;
    let top = stack.len() - slot_bytes;
    {
        let frame = &mut stack[top..];
        let mut slots = [0u32; INITIAL_STACK_SLOTS];
        build_initial_stack(
            &mut slots,
            entry as usize as u32,
            arg as u32,
            kernel_trampoline_addr(),
        );
        for (i, word) in slots.iter().enumerate() {
            frame[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
    }

    let base = stack.as_ptr() as usize as u32;
    let esp = base + top as u32;

    with_scheduler(|s| {
        let id = s.create_task(String::from(name), priority, TaskFlags::empty());
        let t = s.task_mut(id).expect("task just created");
        t.kernel_stack = StackInfo {
            base,
            size: task::KERNEL_STACK_SIZE,
        };
        t.stack_mem = Some(stack);
        t.context.esp = esp;
        id
    })
}

/// Create a user-mode task.
///
/// Allocates a ring-3 stack from the frame allocator, maps it
/// user-accessible below the split, marks the entry page user-readable,
/// and seeds the kernel stack with an iret frame so the first dispatch
/// drops into ring 3 at `entry_virt`.
pub fn task_create_user(
    name: &str,
    entry_virt: u32,
    arg: usize,
    priority: Priority,
) -> KernelResult<TaskId> {
    let mut kstack = vec![0u8; task::KERNEL_STACK_SIZE as usize].into_boxed_slice();

    // Reserve the id first so the stack slot below the split is unique.
    let id = with_scheduler(|s| {
        s.create_task(String::from(name), priority, TaskFlags::USER_MODE)
    })?;

    let stack_span = task::USER_STACK_SIZE + PAGE_SIZE as u32; // plus guard gap
    let stack_top = USER_STACK_TOP - id.as_u32() * stack_span;
    let stack_base = stack_top - task::USER_STACK_SIZE;

    // Map the user stack pages and make the entry page ring-3 readable.
    let access = vmm::phys_access();
    let map_result = vmm::with_kernel_space(|space| -> KernelResult<()> {
        let mut frames = GlobalFrames;
        let mut virt = stack_base;
        while virt < stack_top {
            let phys = frames.alloc_frame().ok_or(KernelError::OutOfMemory)?;
            space.map(
                access,
                &mut frames,
                VirtAddr::new(virt),
                phys,
                PageFlags::user_rw(),
            )?;
            virt += PAGE_SIZE as u32;
        }
        space.set_user(access, VirtAddr::new(entry_virt))?;

        // Seed the top of the ring-3 stack: fake return address plus the
        // task argument, cdecl-style.
        let user_esp = stack_top - 8;
        let words = [0u32, arg as u32];
        for (i, word) in words.iter().enumerate() {
            let virt = VirtAddr::new(user_esp + i as u32 * 4);
            let phys = space
                .virt_to_phys(access, virt)
                .ok_or(KernelError::InvalidAddress {
                    addr: virt.as_u32() as usize,
                })?;
            let ptr = access.frame_ptr(phys.align_down());
            let offset = (phys.as_u32() - phys.align_down().as_u32()) as usize;
            // SAFETY: the stack page was mapped and zeroed just above.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    word.to_le_bytes().as_ptr(),
                    ptr.add(offset),
                    4,
                );
            }
        }
        Ok(())
    })
    .and_then(|inner| inner);

    if let Err(err) = map_result {
        // Undo the admission so no stackless task lingers in the queues.
        let _ = with_scheduler(|s| {
            let _ = s.destroy(id);
            let _ = s.reap(id);
        });
        return Err(err);
    }

    // Seed the kernel stack with the iret frame.
    let slot_bytes = INITIAL_USER_STACK_SLOTS * 4;
    let top = kstack.len() - slot_bytes;
    {
        let frame = &mut kstack[top..];
        let mut slots = [0u32; INITIAL_USER_STACK_SLOTS];
        build_initial_user_stack(&mut slots, entry_virt, stack_top - 8, user_trampoline_addr());
        for (i, word) in slots.iter().enumerate() {
            frame[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
    }

    let base = kstack.as_ptr() as usize as u32;
    let esp = base + top as u32;

    with_scheduler(|s| {
        let t = s.task_mut(id).expect("task just created");
        t.kernel_stack = StackInfo {
            base,
            size: task::KERNEL_STACK_SIZE,
        };
        t.stack_mem = Some(kstack);
        t.user_stack = Some(StackInfo {
            base: stack_base,
            size: task::USER_STACK_SIZE,
        });
        t.context.esp = esp;
    })?;

    log::debug!("sched: user task {} entry {:#x} stack {:#x}", id, entry_virt, stack_top);
    Ok(id)
}

/// Current task id, if the scheduler is up.
pub fn current_task_id() -> Option<TaskId> {
    with_scheduler(|s| s.current()).ok().flatten()
}

/// Timer-tick entry, called from the timer interrupt.
pub fn timer_tick(now: u64) {
    let _ = with_scheduler(|s| s.on_tick(now));
}

/// Preemption point: switch if the policy asked for it.
///
/// Called at IRQ exit (after EOI) and after voluntary transitions.
pub fn preempt_point() {
    let decision = with_scheduler(|s| {
        if s.needs_resched() {
            s.schedule()
        } else {
            None
        }
    })
    .ok()
    .flatten();
    if let Some(sw) = decision {
        perform_switch(sw);
    }
}

/// Voluntary yield.
pub fn yield_now() {
    let decision = with_scheduler(|s| {
        s.yield_current();
        s.schedule()
    })
    .ok()
    .flatten();
    if let Some(sw) = decision {
        perform_switch(sw);
    }
}

/// Sleep the current task for `ms` milliseconds. `sleep(0)` yields.
pub fn task_sleep(ms: u64) {
    if ms == 0 {
        yield_now();
        return;
    }
    let wake = timer::ticks() + timer::ms_to_ticks(ms);
    let decision = with_scheduler(|s| {
        s.sleep_current(wake)?;
        Ok::<_, KernelError>(s.schedule())
    });
    if let Ok(Ok(Some(sw))) = decision {
        perform_switch(sw);
    }
}

/// Terminate the current task with `code`.
///
/// On bare metal control never returns to the zombie; the host build
/// simply records the transition so tests can observe it.
pub fn task_exit(code: i32) {
    let decision = with_scheduler(|s| {
        s.exit_current(code)?;
        Ok::<_, KernelError>(s.schedule())
    });
    if let Ok(Ok(Some(sw))) = decision {
        perform_switch(sw);
    }
}

/// Terminate the current task after an unhandled user-mode exception.
///
/// The exit code encodes the vector so a parent can distinguish faults
/// from normal exits.
pub fn fault_exit(vector: u32) {
    task_exit(128 + vector as i32);
}

/// Destroy a task that is not currently running and reclaim its stacks.
pub fn task_destroy(id: TaskId) -> KernelResult<()> {
    let stacks = with_scheduler(|s| s.destroy(id))??;
    release_user_stack(stacks);
    Ok(())
}

/// Reap a zombie: drop its TCB and free remaining resources.
pub fn task_reap(id: TaskId) -> KernelResult<i32> {
    let (code, stacks) = with_scheduler(|s| s.reap(id))??;
    release_user_stack(stacks);
    Ok(code)
}

/// Unmap and free a reclaimed user stack (the kernel stack frees itself
/// when the TCB drops its `stack_mem`).
fn release_user_stack(stacks: ReclaimedStacks) {
    let Some(user) = stacks.user else {
        return;
    };
    let access = vmm::phys_access();
    let _ = vmm::with_kernel_space(|space| {
        let mut frames = GlobalFrames;
        let mut virt = user.base;
        while virt < user.base + user.size {
            if let Ok(phys) = space.unmap(access, &mut frames, VirtAddr::new(virt)) {
                frames.free_frame(PhysAddr::new(phys.align_down().as_u32()));
            }
            virt += PAGE_SIZE as u32;
        }
    });
}

/// Perform the context switch a scheduling decision asked for.
#[cfg(all(target_arch = "x86", target_os = "none"))]
fn perform_switch(sw: Switch) {
    use crate::arch::x86::{context::context_switch, gdt};

    // Grab the raw switch parameters under the lock, then release it:
    // the switch itself must run lock-free because the incoming task will
    // resume inside a different critical section.
    let mut params = None;
    let _ = with_scheduler(|s| {
        let to = match s.task(sw.to) {
            Some(t) => t,
            None => return,
        };
        let to_esp = to.context.esp;
        let to_kstack_top = to.kernel_stack.top();
        let to_user = to.is_user();
        let from_ptr = sw
            .from
            .and_then(|f| s.task_mut(f))
            .map(|t| &mut t.context.esp as *mut u32);
        params = Some((from_ptr, to_esp, to_kstack_top, to_user));
    });
    let Some((from_ptr, to_esp, to_kstack_top, to_user)) = params else {
        return;
    };

    if to_user {
        gdt::set_kernel_stack(to_kstack_top);
    }

    static mut DISCARD_ESP: u32 = 0;
    let save_slot = match from_ptr {
        Some(p) => p,
        // A vanished `from` task still needs somewhere to spill esp.
        // SAFETY: single CPU; only one switch runs at a time.
        None => unsafe { &raw mut DISCARD_ESP },
    };

    crate::arch::without_interrupts(|| {
        // SAFETY: both stacks were seeded by task creation (or are live
        // kernel stacks); the TCBs outlive the switch because zombies are
        // only reaped from other tasks.
        unsafe { context_switch(save_slot, to_esp) };
    });
}

/// Host builds record decisions without switching stacks.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
fn perform_switch(_sw: Switch) {}
