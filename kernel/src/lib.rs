//! CinderOS Kernel Library
//!
//! Core of a 32-bit x86 kernel: physical and virtual memory management,
//! a preemptive priority scheduler, trap/IRQ plumbing, the `int 0x80`
//! system-call gateway, a virtual filesystem, the block-I/O dispatcher
//! and the driver framework.
//!
//! The crate builds in two shapes:
//! - `target_os = "none"`: the real kernel, `no_std`, using the free-list
//!   heap as the global allocator.
//! - host targets: the same code linked against `std` so the unit and
//!   property test suites run under the standard harness. All instruction
//!   level code (port I/O, descriptor loads, context switches) is gated
//!   out of host builds.

#![no_std]
#![cfg_attr(all(target_arch = "x86", target_os = "none"), feature(alloc_error_handler))]

#[cfg(feature = "alloc")]
extern crate alloc;

// Host target: use the system allocator so unit tests can allocate normally.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

// On bare metal the kernel heap (mm::heap) is the global allocator.
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[global_allocator]
static KERNEL_ALLOCATOR: mm::heap::LockedKernelHeap = mm::heap::LockedKernelHeap::empty();

/// Get a reference to the kernel heap behind the global allocator.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn kernel_heap() -> &'static mm::heap::LockedKernelHeap {
    &KERNEL_ALLOCATOR
}

#[macro_use]
pub mod print;

pub mod arch;
pub mod block;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod irq;
pub mod logger;
pub mod mm;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod timer;

#[cfg(test)]
mod integration_tests;

// Re-exports for the test suites and for the kernel binary.
pub use error::{KernelError, KernelResult};
pub use mm::{PhysAddr, VirtAddr, PAGE_SIZE};
pub use sched::{Priority, TaskId, TaskState};

/// Heap allocation error handler.
///
/// Allocation failure in the kernel is unrecoverable; the
/// alloc_error_handler ABI requires `-> !`.
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("kernel heap exhausted: {:?}", layout);
}
