// Interrupt Descriptor Table

use lazy_static::lazy_static;
use spin::Mutex;

use super::gdt::KERNEL_CODE_SELECTOR;

/// Number of IDT entries.
pub const IDT_ENTRIES: usize = 256;

/// First vector used for remapped hardware IRQs.
pub const IRQ_BASE: u8 = 0x20;

/// Number of legacy IRQ lines behind the two 8259 PICs.
pub const IRQ_LINES: u8 = 16;

/// Software-interrupt vector for system calls.
pub const SYSCALL_VECTOR: u8 = 0x80;

/// Page-fault vector.
pub const VECTOR_PAGE_FAULT: u32 = 14;

/// Gate flavors used by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    /// Interrupt gate: IF is cleared on entry.
    Interrupt,
    /// Trap gate: IF is left unchanged on entry.
    Trap,
}

/// Encode an 8-byte IDT gate descriptor.
pub const fn encode_gate(offset: u32, selector: u16, kind: GateKind, dpl: u8) -> u64 {
    let type_bits: u64 = match kind {
        GateKind::Interrupt => 0xE,
        GateKind::Trap => 0xF,
    };
    let attr: u64 = (1 << 7) | (((dpl & 3) as u64) << 5) | type_bits;
    let mut desc: u64 = 0;
    desc |= (offset & 0xFFFF) as u64;
    desc |= (selector as u64) << 16;
    desc |= attr << 40;
    desc |= (((offset >> 16) & 0xFFFF) as u64) << 48;
    desc
}

/// Registers captured on every trap entry.
///
/// The stubs push the segment registers and a `pusha` frame on top of what
/// the CPU pushed; `user_esp`/`user_ss` are only valid when the trap came
/// from ring 3 (privilege change).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapFrame {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vector: u32,
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub user_esp: u32,
    pub user_ss: u32,
}

impl TrapFrame {
    /// Whether the trap was taken while executing in ring 3.
    pub fn from_user_mode(&self) -> bool {
        self.cs & 3 == 3
    }

    /// Syscall arguments in ABI order: ebx, ecx, edx, esi, edi.
    pub fn syscall_args(&self) -> [usize; 5] {
        [
            self.ebx as usize,
            self.ecx as usize,
            self.edx as usize,
            self.esi as usize,
            self.edi as usize,
        ]
    }
}

/// Human-readable names for the CPU exception vectors.
pub fn exception_name(vector: u32) -> &'static str {
    match vector {
        0 => "divide error",
        1 => "debug",
        2 => "non-maskable interrupt",
        3 => "breakpoint",
        4 => "overflow",
        5 => "bound range exceeded",
        6 => "invalid opcode",
        7 => "device not available",
        8 => "double fault",
        10 => "invalid TSS",
        11 => "segment not present",
        12 => "stack-segment fault",
        13 => "general protection fault",
        14 => "page fault",
        16 => "x87 floating-point error",
        17 => "alignment check",
        18 => "machine check",
        19 => "SIMD floating-point error",
        _ => "reserved exception",
    }
}

/// Exceptions the kernel can never recover from in ring 0.
pub fn is_fatal_in_kernel(vector: u32) -> bool {
    // Breakpoint and debug traps are reported but survivable.
    !matches!(vector, 1 | 3)
}

lazy_static! {
    static ref IDT: Mutex<[u64; IDT_ENTRIES]> = Mutex::new([0u64; IDT_ENTRIES]);
}

/// Fill an IDT slot. Pure table mutation; `load()` makes it live.
pub fn set_gate(vector: u8, handler: u32, kind: GateKind, dpl: u8) {
    IDT.lock()[vector as usize] = encode_gate(handler, KERNEL_CODE_SELECTOR, kind, dpl);
}

/// Read back a raw IDT slot (diagnostics and tests).
pub fn gate(vector: u8) -> u64 {
    IDT.lock()[vector as usize]
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod stubs {
    // Exception and IRQ entry stubs.
    //
    // Vectors that push a hardware error code get `isr_err`; the rest push a
    // zero placeholder so the frame layout is uniform. Every path funnels
    // through `trap_common`, which completes the TrapFrame, switches to the
    // kernel data segments, and calls into Rust.
    core::arch::global_asm!(
        r#"
        .macro isr_noerr n
        .global isr_stub_\n
        isr_stub_\n:
            push 0
            push \n
            jmp trap_common
        .endm

        .macro isr_err n
        .global isr_stub_\n
        isr_stub_\n:
            push \n
            jmp trap_common
        .endm

        isr_noerr 0
        isr_noerr 1
        isr_noerr 2
        isr_noerr 3
        isr_noerr 4
        isr_noerr 5
        isr_noerr 6
        isr_noerr 7
        isr_err   8
        isr_noerr 9
        isr_err   10
        isr_err   11
        isr_err   12
        isr_err   13
        isr_err   14
        isr_noerr 15
        isr_noerr 16
        isr_err   17
        isr_noerr 18
        isr_noerr 19
        isr_noerr 20
        isr_noerr 21
        isr_noerr 22
        isr_noerr 23
        isr_noerr 24
        isr_noerr 25
        isr_noerr 26
        isr_noerr 27
        isr_noerr 28
        isr_noerr 29
        isr_noerr 30
        isr_noerr 31
        isr_noerr 32
        isr_noerr 33
        isr_noerr 34
        isr_noerr 35
        isr_noerr 36
        isr_noerr 37
        isr_noerr 38
        isr_noerr 39
        isr_noerr 40
        isr_noerr 41
        isr_noerr 42
        isr_noerr 43
        isr_noerr 44
        isr_noerr 45
        isr_noerr 46
        isr_noerr 47
        isr_noerr 128

        trap_common:
            pusha
            push ds
            push es
            push fs
            push gs
            mov ax, 0x10
            mov ds, ax
            mov es, ax
            mov fs, ax
            mov gs, ax
            push esp
            call trap_dispatch
            add esp, 4
            pop gs
            pop fs
            pop es
            pop ds
            popa
            add esp, 8
            iretd

        .section .rodata
        .global ISR_STUB_TABLE
        ISR_STUB_TABLE:
            .long isr_stub_0,  isr_stub_1,  isr_stub_2,  isr_stub_3
            .long isr_stub_4,  isr_stub_5,  isr_stub_6,  isr_stub_7
            .long isr_stub_8,  isr_stub_9,  isr_stub_10, isr_stub_11
            .long isr_stub_12, isr_stub_13, isr_stub_14, isr_stub_15
            .long isr_stub_16, isr_stub_17, isr_stub_18, isr_stub_19
            .long isr_stub_20, isr_stub_21, isr_stub_22, isr_stub_23
            .long isr_stub_24, isr_stub_25, isr_stub_26, isr_stub_27
            .long isr_stub_28, isr_stub_29, isr_stub_30, isr_stub_31
            .long isr_stub_32, isr_stub_33, isr_stub_34, isr_stub_35
            .long isr_stub_36, isr_stub_37, isr_stub_38, isr_stub_39
            .long isr_stub_40, isr_stub_41, isr_stub_42, isr_stub_43
            .long isr_stub_44, isr_stub_45, isr_stub_46, isr_stub_47
            .long isr_stub_128
        .section .text
        "#
    );

    extern "C" {
        pub static ISR_STUB_TABLE: [u32; 49];
    }
}

/// Install the exception, IRQ and syscall gates and load the IDT.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn init() {
    // SAFETY: ISR_STUB_TABLE is defined in the assembly block above with
    // exactly 49 entries.
    let table = unsafe { &stubs::ISR_STUB_TABLE };

    for vector in 0..48u8 {
        set_gate(vector, table[vector as usize], GateKind::Interrupt, 0);
    }
    // Ring-3 callable trap gate for system calls; IF stays enabled so a
    // long syscall can still be preempted.
    set_gate(SYSCALL_VECTOR, table[48], GateKind::Trap, 3);

    load();
    log::info!("idt: {} gates installed, syscall vector {:#x}", 49, SYSCALL_VECTOR);
}

/// Load the IDT register.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn load() {
    let idt = IDT.lock();
    let descriptor = x86::dtables::DescriptorTablePointer {
        limit: (core::mem::size_of::<u64>() * IDT_ENTRIES - 1) as u16,
        base: idt.as_ptr(),
    };
    // SAFETY: the IDT lives in a lazy_static and is never moved; the gates
    // written by `init()` point at the assembly stubs above.
    unsafe { x86::dtables::lidt(&descriptor) };
}

/// Common trap entry called from the assembly stubs.
///
/// Exceptions from ring 3 terminate the offending task; exceptions from
/// ring 0 dump state and panic. Hardware IRQs and the syscall vector are
/// forwarded to their subsystems.
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[no_mangle]
extern "C" fn trap_dispatch(frame: &mut TrapFrame) {
    let vector = frame.vector;

    if vector < 32 {
        handle_exception(frame);
    } else if vector >= IRQ_BASE as u32 && vector < (IRQ_BASE + IRQ_LINES) as u32 {
        crate::irq::dispatch(crate::irq::IrqNumber::new(vector - IRQ_BASE as u32));
        // EOI has been sent; safe to switch away before the iret.
        crate::sched::preempt_point();
    } else if vector == SYSCALL_VECTOR as u32 {
        let ret = crate::syscall::dispatch_from_trap(frame);
        frame.eax = ret as u32;
    } else {
        log::warn!("spurious interrupt on vector {:#x}", vector);
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
fn handle_exception(frame: &mut TrapFrame) {
    let vector = frame.vector;

    if vector == VECTOR_PAGE_FAULT {
        let fault_addr = super::read_cr2();
        if frame.from_user_mode() {
            log::warn!(
                "user task faulted: page fault at {:#x}, eip={:#x}, err={:#x}",
                fault_addr,
                frame.eip,
                frame.error_code
            );
            crate::sched::fault_exit(vector);
            return;
        }
        super::backtrace::panic_with_frame(frame, Some(fault_addr));
    }

    if frame.from_user_mode() {
        log::warn!(
            "user task faulted: {} (vector {}) at eip={:#x}",
            exception_name(vector),
            vector,
            frame.eip
        );
        crate::sched::fault_exit(vector);
        return;
    }

    if is_fatal_in_kernel(vector) {
        super::backtrace::panic_with_frame(frame, None);
    }

    log::warn!("{} in kernel mode at eip={:#x}", exception_name(vector), frame.eip);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_gate_encoding_fields() {
        let g = encode_gate(0x0010_2030, KERNEL_CODE_SELECTOR, GateKind::Interrupt, 0);
        assert_eq!(g & 0xFFFF, 0x2030); // offset low
        assert_eq!((g >> 16) & 0xFFFF, KERNEL_CODE_SELECTOR as u64);
        assert_eq!((g >> 40) & 0xFF, 0x8E); // present, DPL0, 32-bit interrupt gate
        assert_eq!((g >> 48) & 0xFFFF, 0x0010); // offset high
    }

    #[test]
    fn test_syscall_gate_is_ring3_trap() {
        let g = encode_gate(0xDEAD_BEEF, KERNEL_CODE_SELECTOR, GateKind::Trap, 3);
        assert_eq!((g >> 40) & 0xFF, 0xEF); // present, DPL3, 32-bit trap gate
    }

    #[test]
    fn test_set_and_read_gate() {
        set_gate(200, 0x1234, GateKind::Interrupt, 0);
        let g = gate(200);
        assert_eq!(g & 0xFFFF, 0x1234);
    }

    #[test]
    fn test_user_mode_detection() {
        let mut frame = TrapFrame::default();
        frame.cs = KERNEL_CODE_SELECTOR as u32;
        assert!(!frame.from_user_mode());
        frame.cs = super::super::gdt::USER_CODE_SELECTOR as u32;
        assert!(frame.from_user_mode());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(is_fatal_in_kernel(14));
        assert!(is_fatal_in_kernel(13));
        assert!(!is_fatal_in_kernel(3));
        assert!(!is_fatal_in_kernel(1));
    }
}
