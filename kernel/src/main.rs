//! CinderOS kernel binary: multiboot entry and boot sequence.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod boot {
    extern crate alloc;

    use cinder_kernel::arch::x86::{gdt, idt, pic, pit, serial};
    use cinder_kernel::block::pata::{ports::PortAtaBus, PataChannel};
    use cinder_kernel::block::TransportKind;
    use cinder_kernel::mm::vmm::{self, GlobalFrames, IdentityAccess};
    use cinder_kernel::mm::MemoryRegion;
    use cinder_kernel::{arch, drivers, fs, irq, logger, mm, sched, timer};

    /// Identity-mapped span covering the kernel image, the heap and the
    /// legacy MMIO windows.
    const IDENTITY_LIMIT: u32 = 64 * 1024 * 1024;

    /// Kernel heap arena (static, identity-mapped with the image).
    const HEAP_SIZE: usize = 8 * 1024 * 1024;
    static mut HEAP_MEMORY: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

    /// At most this many usable RAM regions are taken from the boot map.
    const MAX_REGIONS: usize = 16;

    fn timer_irq(_irq: irq::IrqNumber) {
        timer::on_tick();
    }

    /// Pull usable RAM regions out of the multiboot2 info block.
    fn boot_memory_map(info_addr: u32) -> ([MemoryRegion; MAX_REGIONS], usize) {
        let mut regions = [MemoryRegion::new(0, 0); MAX_REGIONS];
        let mut count = 0;

        // SAFETY: the bootloader hands a valid multiboot2 info block in
        // identity-mapped low memory.
        let parsed = unsafe {
            multiboot2::BootInformation::load(
                info_addr as *const multiboot2::BootInformationHeader,
            )
        };
        if let Ok(info) = parsed {
            if let Some(map) = info.memory_map_tag() {
                for area in map.memory_areas() {
                    if multiboot2::MemoryAreaType::from(area.typ())
                        != multiboot2::MemoryAreaType::Available
                    {
                        continue;
                    }
                    if count == MAX_REGIONS {
                        break;
                    }
                    let start = area.start_address().min(u32::MAX as u64) as u32;
                    let len = area.size().min(u32::MAX as u64) as u32;
                    regions[count] = MemoryRegion::new(start, len);
                    count += 1;
                }
            }
        }

        if count == 0 {
            // No usable map: fall back to the minimum the boot contract
            // guarantees (a continuous region below the split).
            regions[0] = MemoryRegion::new(0, 64 * 1024 * 1024);
            count = 1;
        }
        (regions, count)
    }

    #[no_mangle]
    pub extern "C" fn kernel_main(_multiboot_magic: u32, multiboot_info: u32) -> ! {
        serial::init();
        logger::init();
        log::info!("cinder: booting");

        gdt::init();
        idt::init();

        // Physical memory, then paging over the identity window.
        let (regions, count) = boot_memory_map(multiboot_info);
        mm::frame_allocator::init(&regions[..count]);

        let mut frames = GlobalFrames;
        let space = vmm::build_kernel_space(&mut frames, &IdentityAccess, IDENTITY_LIMIT)
            .expect("kernel address space build failed");
        let directory = space.directory_phys();
        vmm::set_kernel_space(space).expect("kernel address space already set");
        // SAFETY: the directory identity-maps all the memory the kernel
        // is executing from; enabling paging is a no-op address-wise.
        unsafe {
            arch::x86::load_cr3(directory.as_u32());
            arch::x86::enable_paging();
        }
        log::info!("mm: paging enabled, directory at {:#x}", directory.as_u32());

        // Heap after paging: the arena lives inside the identity window.
        // SAFETY: HEAP_MEMORY is a static arena used for nothing else.
        unsafe {
            let heap_start = core::ptr::addr_of_mut!(HEAP_MEMORY) as *mut u8;
            cinder_kernel::kernel_heap().init(heap_start, HEAP_SIZE);
        }

        // Allocation is available from here on.
        fs::init().expect("root filesystem mount failed");
        sched::init().expect("scheduler already initialized");

        drivers::terminal::set_sink(alloc_vga_sink());
        drivers::keyboard::init();
        drivers::keyboard::register_driver().expect("keyboard driver registration failed");

        pic::remap_and_mask(0xFFFF);
        irq::set_controller(irq::ControllerKind::Pic);
        irq::register_handler(irq::IrqNumber::new(0), timer_irq);
        pic::unmask(0);
        pic::unmask(1);
        pit::init(timer::TICK_HZ as u32);

        probe_disks();

        log::info!("cinder: up, entering idle");
        arch::enable_interrupts();

        // This thread of control is the idle task: halt between ticks.
        loop {
            arch::halt();
        }
    }

    fn alloc_vga_sink() -> alloc::boxed::Box<dyn drivers::terminal::TerminalSink> {
        alloc::boxed::Box::new(drivers::terminal::vga::VgaTextSink::new())
    }

    /// Probe the legacy ATA channels and register what answers.
    fn probe_disks() {
        for (base, slave) in [
            (cinder_kernel::block::pata::ports::PRIMARY_BASE, false),
            (cinder_kernel::block::pata::ports::PRIMARY_BASE, true),
            (cinder_kernel::block::pata::ports::SECONDARY_BASE, false),
            (cinder_kernel::block::pata::ports::SECONDARY_BASE, true),
        ] {
            let bus = PortAtaBus::new(base);
            match PataChannel::identify(bus, slave) {
                Ok(channel) => {
                    let sectors = channel.sectors();
                    let lba48 = channel.supports_lba48();
                    let drive = (base == cinder_kernel::block::pata::ports::SECONDARY_BASE) as u8
                        * 2
                        + slave as u8;
                    cinder_kernel::block::with_disks(|disks| {
                        disks.register_disk(
                            drive,
                            TransportKind::PataDisk,
                            sectors,
                            lba48,
                            alloc::boxed::Box::new(channel),
                        )
                    });
                }
                Err(err) => {
                    log::debug!("pata: no drive at {:#x}/{}: {:?}", base, slave as u8, err);
                }
            }
        }
    }

    extern crate alloc;

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        arch::disable_interrupts();
        cinder_kernel::println!("\nKERNEL PANIC: {}", info);
        loop {
            arch::halt();
        }
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("cinder-kernel is a multiboot kernel image; boot it in QEMU or on hardware.");
    eprintln!("The host build exists to run `cargo test`.");
}
