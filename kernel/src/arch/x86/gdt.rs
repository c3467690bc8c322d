// Global Descriptor Table and Task State Segment

use lazy_static::lazy_static;
use spin::Mutex;

/// Number of descriptors: null, kernel code/data, user code/data, TSS.
pub const GDT_ENTRIES: usize = 6;

/// Segment selectors (index << 3, user selectors carry RPL 3).
///
/// Layout:
/// - 0x00: Null descriptor
/// - 0x08: Kernel code segment (Ring 0)
/// - 0x10: Kernel data segment (Ring 0)
/// - 0x18: User code segment (Ring 3, selector 0x1B with RPL)
/// - 0x20: User data segment (Ring 3, selector 0x23 with RPL)
/// - 0x28: TSS
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
pub const USER_CODE_SELECTOR: u16 = 0x18 | 3;
pub const USER_DATA_SELECTOR: u16 = 0x20 | 3;
pub const TSS_SELECTOR: u16 = 0x28;

/// Access-byte bits for segment descriptors.
const ACCESS_PRESENT: u8 = 1 << 7;
const ACCESS_RING3: u8 = 3 << 5;
const ACCESS_CODE_DATA: u8 = 1 << 4;
const ACCESS_EXECUTABLE: u8 = 1 << 3;
const ACCESS_RW: u8 = 1 << 1;
/// Access byte for a 32-bit TSS (available).
const ACCESS_TSS_32: u8 = 0x89;

/// Flag nibble: 4 KiB granularity, 32-bit default operand size.
const FLAGS_GRAN_32: u8 = 0b1100;

/// Encode an 8-byte segment descriptor.
///
/// `limit` is in units selected by the granularity flag; the flat segments
/// use limit 0xFFFFF with 4 KiB granularity to cover the whole 4 GiB space.
pub const fn encode_descriptor(base: u32, limit: u32, access: u8, flags: u8) -> u64 {
    let mut desc: u64 = 0;
    desc |= (limit & 0xFFFF) as u64;
    desc |= ((base & 0xFFFF) as u64) << 16;
    desc |= (((base >> 16) & 0xFF) as u64) << 32;
    desc |= (access as u64) << 40;
    desc |= (((limit >> 16) & 0xF) as u64) << 48;
    desc |= ((flags & 0xF) as u64) << 52;
    desc |= (((base >> 24) & 0xFF) as u64) << 56;
    desc
}

const fn kernel_code_descriptor() -> u64 {
    encode_descriptor(
        0,
        0xFFFFF,
        ACCESS_PRESENT | ACCESS_CODE_DATA | ACCESS_EXECUTABLE | ACCESS_RW,
        FLAGS_GRAN_32,
    )
}

const fn kernel_data_descriptor() -> u64 {
    encode_descriptor(
        0,
        0xFFFFF,
        ACCESS_PRESENT | ACCESS_CODE_DATA | ACCESS_RW,
        FLAGS_GRAN_32,
    )
}

const fn user_code_descriptor() -> u64 {
    encode_descriptor(
        0,
        0xFFFFF,
        ACCESS_PRESENT | ACCESS_RING3 | ACCESS_CODE_DATA | ACCESS_EXECUTABLE | ACCESS_RW,
        FLAGS_GRAN_32,
    )
}

const fn user_data_descriptor() -> u64 {
    encode_descriptor(
        0,
        0xFFFFF,
        ACCESS_PRESENT | ACCESS_RING3 | ACCESS_CODE_DATA | ACCESS_RW,
        FLAGS_GRAN_32,
    )
}

/// 32-bit Task State Segment.
///
/// Only `esp0`/`ss0` are consulted by the CPU on ring 3 -> ring 0
/// transitions; the rest exists for hardware task switching, which the
/// kernel does not use.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct TaskStateSegment {
    pub link: u32,
    pub esp0: u32,
    pub ss0: u32,
    pub esp1: u32,
    pub ss1: u32,
    pub esp2: u32,
    pub ss2: u32,
    pub cr3: u32,
    pub eip: u32,
    pub eflags: u32,
    pub eax: u32,
    pub ecx: u32,
    pub edx: u32,
    pub ebx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub es: u32,
    pub cs: u32,
    pub ss: u32,
    pub ds: u32,
    pub fs: u32,
    pub gs: u32,
    pub ldtr: u32,
    pub iopb_offset: u32,
}

impl TaskStateSegment {
    pub const fn new() -> Self {
        Self {
            link: 0,
            esp0: 0,
            ss0: KERNEL_DATA_SELECTOR as u32,
            esp1: 0,
            ss1: 0,
            esp2: 0,
            ss2: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            cs: 0,
            ss: 0,
            ds: 0,
            fs: 0,
            gs: 0,
            ldtr: 0,
            // No I/O permission bitmap: point past the end of the segment.
            iopb_offset: (core::mem::size_of::<TaskStateSegment>() as u32) << 16,
        }
    }
}

impl Default for TaskStateSegment {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    static ref TSS: Mutex<TaskStateSegment> = Mutex::new(TaskStateSegment::new());
    static ref GDT: Mutex<[u64; GDT_ENTRIES]> = {
        let tss_base = {
            let tss = TSS.lock();
            &*tss as *const TaskStateSegment as usize as u32
        };
        let tss_limit = core::mem::size_of::<TaskStateSegment>() as u32 - 1;
        Mutex::new([
            0,
            kernel_code_descriptor(),
            kernel_data_descriptor(),
            user_code_descriptor(),
            user_data_descriptor(),
            encode_descriptor(tss_base, tss_limit, ACCESS_TSS_32, 0),
        ])
    };
}

/// Load the GDT, reload segment registers and load the task register.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn init() {
    use core::arch::asm;

    let gdt = GDT.lock();
    let descriptor = x86::dtables::DescriptorTablePointer {
        limit: (core::mem::size_of::<u64>() * GDT_ENTRIES - 1) as u16,
        base: gdt.as_ptr(),
    };

    // SAFETY: the GDT lives in a lazy_static and is never moved or freed;
    // the selectors below index descriptors we just built. CS is reloaded
    // with a far jump, the data segments directly, then the TSS selector.
    unsafe {
        x86::dtables::lgdt(&descriptor);
        asm!(
            "push {kcode}",
            "lea {tmp}, [2f]",
            "push {tmp}",
            "retf",
            "2:",
            "mov ds, {kdata:x}",
            "mov es, {kdata:x}",
            "mov fs, {kdata:x}",
            "mov gs, {kdata:x}",
            "mov ss, {kdata:x}",
            "ltr {tss:x}",
            kcode = const KERNEL_CODE_SELECTOR as u32,
            kdata = in(reg) KERNEL_DATA_SELECTOR as u32,
            tss = in(reg) TSS_SELECTOR,
            tmp = out(reg) _,
        );
    }

    log::info!("gdt: loaded {} descriptors, tss at esp0=0", GDT_ENTRIES);
}

/// Update the ring-0 stack pointer in the TSS.
///
/// Called by the scheduler on every switch into a user-mode task so that
/// the next ring 3 -> ring 0 transition (interrupt or `int 0x80`) lands on
/// that task's kernel stack. Must be called with interrupts disabled.
pub fn set_kernel_stack(stack_top: u32) {
    TSS.lock().esp0 = stack_top;
}

/// Read the ring-0 stack pointer currently programmed into the TSS.
pub fn kernel_stack() -> u32 {
    TSS.lock().esp0
}
