// Register dumps and frame-pointer backtraces for the panic path

use super::idt::{exception_name, TrapFrame};

/// Upper bound on reported frames; a corrupt chain stops the walk early.
pub const MAX_BACKTRACE_FRAMES: usize = 16;

/// Walk a frame-pointer chain starting at `ebp`.
///
/// `read_word` fetches a 32-bit word from an address, returning `None`
/// when the address is unreadable; the walk stops there. Calls `visit`
/// with each return address. The memory-access seam keeps the walker
/// testable with a synthetic stack.
pub fn walk_frames(
    mut ebp: u32,
    read_word: impl Fn(u32) -> Option<u32>,
    mut visit: impl FnMut(u32),
) {
    for _ in 0..MAX_BACKTRACE_FRAMES {
        if ebp == 0 || ebp & 3 != 0 {
            break;
        }
        let Some(ret) = read_word(ebp.wrapping_add(4)) else {
            break;
        };
        if ret == 0 {
            break;
        }
        visit(ret);
        let Some(next) = read_word(ebp) else {
            break;
        };
        // Stacks grow down, so saved frame pointers must strictly increase.
        if next <= ebp {
            break;
        }
        ebp = next;
    }
}

/// Print the register state captured in a trap frame.
pub fn dump_registers(frame: &TrapFrame) {
    println!(
        "eax={:08x} ebx={:08x} ecx={:08x} edx={:08x}",
        frame.eax, frame.ebx, frame.ecx, frame.edx
    );
    println!(
        "esi={:08x} edi={:08x} ebp={:08x} esp={:08x}",
        frame.esi, frame.edi, frame.ebp, frame.user_esp
    );
    println!(
        "eip={:08x} cs={:04x} ds={:04x} eflags={:08x} err={:08x}",
        frame.eip, frame.cs, frame.ds, frame.eflags, frame.error_code
    );
}

/// Fatal-exception path: render the panic screen and halt.
///
/// Never returns; panics are strictly fatal (recoverable conditions are
/// `Result`s, not exceptions).
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn panic_with_frame(frame: &TrapFrame, fault_addr: Option<u32>) -> ! {
    super::cli();

    println!();
    println!(
        "KERNEL PANIC: {} (vector {})",
        exception_name(frame.vector),
        frame.vector
    );
    if let Some(addr) = fault_addr {
        println!("faulting address: {:#010x}", addr);
    }
    dump_registers(frame);

    println!("backtrace:");
    walk_frames(frame.ebp, read_kernel_word, |ret| {
        println!("  {:#010x}", ret);
    });

    loop {
        super::hlt();
    }
}

/// Best-effort read of a kernel word for the backtrace walker.
///
/// Only addresses inside the mapped kernel region are dereferenced.
#[cfg(all(target_arch = "x86", target_os = "none"))]
fn read_kernel_word(addr: u32) -> Option<u32> {
    if !crate::mm::vmm::kernel_space_is_mapped(crate::mm::VirtAddr::new(addr)) {
        return None;
    }
    // SAFETY: the mapping check above ensures the address is backed.
    Some(unsafe { core::ptr::read_volatile(addr as *const u32) })
}
