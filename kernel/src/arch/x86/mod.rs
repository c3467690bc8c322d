//! 32-bit x86 support: segmentation, interrupt plumbing, timers, traps.

pub mod apic;
pub mod backtrace;
pub mod context;
pub mod gdt;
pub mod idt;
pub mod pic;
pub mod pit;

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod serial;

/// Interrupt-enable bit in EFLAGS.
pub const EFLAGS_IF: u32 = 1 << 9;

/// EFLAGS bit 1 is reserved and always reads as set.
pub const EFLAGS_RESERVED: u32 = 1 << 1;

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod instructions {
    use core::arch::asm;

    #[inline]
    pub fn eflags() -> u32 {
        let flags: u32;
        // SAFETY: pushfd/popfd only move the flags register through the stack.
        unsafe {
            asm!("pushfd", "pop {}", out(reg) flags, options(preserves_flags));
        }
        flags
    }

    #[inline]
    pub fn cli() {
        // SAFETY: masking interrupts has no memory effects.
        unsafe { asm!("cli", options(nomem, nostack)) };
    }

    #[inline]
    pub fn sti() {
        // SAFETY: unmasking interrupts has no memory effects.
        unsafe { asm!("sti", options(nomem, nostack)) };
    }

    #[inline]
    pub fn hlt() {
        // SAFETY: hlt idles the CPU until the next interrupt.
        unsafe { asm!("hlt", options(nomem, nostack)) };
    }

    #[inline]
    pub fn invlpg(addr: u32) {
        // SAFETY: invalidating a TLB entry cannot violate memory safety.
        unsafe { asm!("invlpg [{}]", in(reg) addr, options(nostack)) };
    }

    /// Load CR3 with the physical address of a page directory.
    ///
    /// # Safety
    ///
    /// `pd_phys` must point at a valid page directory that keeps the
    /// currently executing code and stack mapped.
    #[inline]
    pub unsafe fn load_cr3(pd_phys: u32) {
        unsafe { asm!("mov cr3, {}", in(reg) pd_phys, options(nostack)) };
    }

    /// Enable paging (set PG in CR0).
    ///
    /// # Safety
    ///
    /// CR3 must already hold a directory that identity-maps the executing
    /// code, otherwise the next instruction fetch faults.
    #[inline]
    pub unsafe fn enable_paging() {
        unsafe {
            asm!(
                "mov eax, cr0",
                "or eax, 0x80000000",
                "mov cr0, eax",
                out("eax") _,
                options(nostack)
            )
        };
    }

    #[inline]
    pub fn read_cr2() -> u32 {
        let addr: u32;
        // SAFETY: CR2 is read-only here; it holds the faulting address.
        unsafe { asm!("mov {}, cr2", out(reg) addr, options(nomem, nostack)) };
        addr
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use instructions::{cli, eflags, enable_paging, hlt, invlpg, load_cr3, read_cr2, sti};
