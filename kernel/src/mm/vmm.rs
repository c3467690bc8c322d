//! Virtual memory: address spaces over two-level page tables.
//!
//! Table frames are reached through the [`PhysAccess`] seam: on bare metal
//! the kernel is identity-mapped, so a physical table address *is* its
//! pointer; the test suite substitutes an arena so every mapping operation
//! runs on the host. Frames for intermediate tables come from a
//! [`FrameSource`] (the global PMM in the kernel, the same arena in tests).

use crate::error::{KernelError, KernelResult};
use crate::sync::GlobalState;

use super::frame_allocator::FrameAllocator;
use super::page_table::{PageFlags, PageTable};
use super::{PhysAddr, VirtAddr, PAGE_SIZE};

/// Access to the memory behind a physical frame.
pub trait PhysAccess {
    /// Pointer through which the 4 KiB frame at `frame` can be accessed.
    fn frame_ptr(&self, frame: PhysAddr) -> *mut u8;
}

/// Bare-metal access: the kernel runs identity-mapped, physical addresses
/// below the split are directly dereferencable.
pub struct IdentityAccess;

impl PhysAccess for IdentityAccess {
    fn frame_ptr(&self, frame: PhysAddr) -> *mut u8 {
        frame.as_usize() as *mut u8
    }
}

/// Source of physical frames for page tables and stacks.
pub trait FrameSource {
    fn alloc_frame(&mut self) -> Option<PhysAddr>;
    fn free_frame(&mut self, frame: PhysAddr);
}

impl FrameSource for FrameAllocator {
    fn alloc_frame(&mut self) -> Option<PhysAddr> {
        self.alloc_page()
    }

    fn free_frame(&mut self, frame: PhysAddr) {
        let _ = self.free_page(frame);
    }
}

/// Frame source backed by the global PMM.
pub struct GlobalFrames;

impl FrameSource for GlobalFrames {
    fn alloc_frame(&mut self) -> Option<PhysAddr> {
        super::frame_allocator::alloc_page()
    }

    fn free_frame(&mut self, frame: PhysAddr) {
        let _ = super::frame_allocator::free_page(frame);
    }
}

/// Flush one TLB entry after a live mapping change.
fn flush_tlb(virt: VirtAddr) {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    crate::arch::x86::invlpg(virt.as_u32());
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    let _ = virt;
}

/// An address space: one page directory plus its tables.
///
/// The kernel boots with a single instance; the type itself is
/// instantiable so per-process directories remain possible.
pub struct AddressSpace {
    directory: PhysAddr,
}

impl AddressSpace {
    /// Allocate and zero a fresh page directory.
    pub fn new(frames: &mut dyn FrameSource, access: &dyn PhysAccess) -> KernelResult<Self> {
        let directory = frames.alloc_frame().ok_or(KernelError::OutOfMemory)?;
        let table = access.frame_ptr(directory) as *mut PageTable;
        // SAFETY: the frame was just allocated for us and PhysAccess hands
        // back a pointer to its 4 KiB of backing memory.
        unsafe { (*table).zero() };
        Ok(Self { directory })
    }

    /// Physical address of the page directory (CR3 value).
    pub fn directory_phys(&self) -> PhysAddr {
        self.directory
    }

    fn directory_ptr(&self, access: &dyn PhysAccess) -> *mut PageTable {
        access.frame_ptr(self.directory) as *mut PageTable
    }

    /// Pointer to the page table covering `virt`, if its PDE is present.
    fn table_ptr(&self, access: &dyn PhysAccess, virt: VirtAddr) -> Option<*mut PageTable> {
        let dir = self.directory_ptr(access);
        // SAFETY: the directory frame is owned by this AddressSpace.
        let pde = unsafe { (&(*dir))[virt.pd_index()] };
        pde.frame().map(|f| access.frame_ptr(f) as *mut PageTable)
    }

    /// Map the page containing `virt` to the frame at `phys`.
    ///
    /// Remapping an existing page is allowed and flushes the TLB entry.
    /// Intermediate tables are allocated on demand; their directory
    /// entries carry USER whenever the page does so the CPU's combined
    /// permission check passes.
    pub fn map(
        &mut self,
        access: &dyn PhysAccess,
        frames: &mut dyn FrameSource,
        virt: VirtAddr,
        phys: PhysAddr,
        flags: PageFlags,
    ) -> KernelResult<()> {
        if virt.page_offset() != 0 || !phys.is_page_aligned() {
            return Err(KernelError::InvalidArgument { name: "addr" });
        }
        if !flags.contains(PageFlags::PRESENT) {
            return Err(KernelError::InvalidArgument { name: "flags" });
        }

        let dir = self.directory_ptr(access);
        let pd_index = virt.pd_index();
        // SAFETY: directory frame owned by this space; index < 1024.
        let pde = unsafe { &mut (&mut (*dir))[pd_index] };

        let table = match pde.frame() {
            Some(frame) => access.frame_ptr(frame) as *mut PageTable,
            None => {
                let frame = frames.alloc_frame().ok_or(KernelError::OutOfMemory)?;
                let table = access.frame_ptr(frame) as *mut PageTable;
                // SAFETY: fresh frame for this table.
                unsafe { (*table).zero() };
                pde.set(frame, PageFlags::PRESENT | PageFlags::WRITABLE);
                table
            }
        };

        // Directory-level USER must be set for any user page beneath it.
        if flags.contains(PageFlags::USER) && !pde.flags().contains(PageFlags::USER) {
            let pde_frame = pde.frame().ok_or(KernelError::InvalidAddress {
                addr: virt.as_u32() as usize,
            })?;
            pde.set(pde_frame, pde.flags() | PageFlags::USER);
        }

        // SAFETY: `table` points at a live page table of this space.
        unsafe { (&mut (*table))[virt.pt_index()].set(phys, flags) };
        flush_tlb(virt);
        Ok(())
    }

    /// Remove the mapping for the page containing `virt`.
    ///
    /// Returns the frame that was mapped. The page table itself is
    /// released back to the frame source once it becomes empty.
    pub fn unmap(
        &mut self,
        access: &dyn PhysAccess,
        frames: &mut dyn FrameSource,
        virt: VirtAddr,
    ) -> KernelResult<PhysAddr> {
        let table = self
            .table_ptr(access, virt)
            .ok_or(KernelError::InvalidAddress {
                addr: virt.as_u32() as usize,
            })?;
        // SAFETY: live table of this space.
        let entry = unsafe { &mut (&mut (*table))[virt.pt_index()] };
        let frame = entry.frame().ok_or(KernelError::InvalidAddress {
            addr: virt.as_u32() as usize,
        })?;
        entry.clear();
        flush_tlb(virt);

        // SAFETY: still the same live table.
        if unsafe { (*table).is_empty() } {
            let dir = self.directory_ptr(access);
            // SAFETY: directory frame owned by this space.
            let pde = unsafe { &mut (&mut (*dir))[virt.pd_index()] };
            if let Some(table_frame) = pde.frame() {
                pde.clear();
                frames.free_frame(table_frame);
            }
        }
        Ok(frame)
    }

    /// Whether the page containing `virt` is present.
    pub fn is_mapped(&self, access: &dyn PhysAccess, virt: VirtAddr) -> bool {
        self.page_flags(access, virt)
            .map(|f| f.contains(PageFlags::PRESENT))
            .unwrap_or(false)
    }

    /// Translate a virtual address to its physical address (with offset).
    pub fn virt_to_phys(&self, access: &dyn PhysAccess, virt: VirtAddr) -> Option<PhysAddr> {
        let table = self.table_ptr(access, virt)?;
        // SAFETY: live table of this space.
        let entry = unsafe { (&(*table))[virt.pt_index()] };
        entry
            .frame()
            .map(|f| PhysAddr::new(f.as_u32() + virt.page_offset()))
    }

    /// Attribute bits of the page containing `virt`.
    pub fn page_flags(&self, access: &dyn PhysAccess, virt: VirtAddr) -> Option<PageFlags> {
        let table = self.table_ptr(access, virt)?;
        // SAFETY: live table of this space.
        let entry = unsafe { (&(*table))[virt.pt_index()] };
        if entry.is_present() {
            Some(entry.flags())
        } else {
            None
        }
    }

    /// Mark an existing mapping user-accessible (entry page of a user
    /// task, user stack pages).
    pub fn set_user(&mut self, access: &dyn PhysAccess, virt: VirtAddr) -> KernelResult<()> {
        let table = self
            .table_ptr(access, virt)
            .ok_or(KernelError::InvalidAddress {
                addr: virt.as_u32() as usize,
            })?;
        // SAFETY: live table of this space.
        let entry = unsafe { &mut (&mut (*table))[virt.pt_index()] };
        if !entry.is_present() {
            return Err(KernelError::InvalidAddress {
                addr: virt.as_u32() as usize,
            });
        }
        entry.set_flags(entry.flags() | PageFlags::USER);

        let dir = self.directory_ptr(access);
        // SAFETY: directory frame owned by this space.
        let pde = unsafe { &mut (&mut (*dir))[virt.pd_index()] };
        if let Some(frame) = pde.frame() {
            pde.set(frame, pde.flags() | PageFlags::USER);
        }
        flush_tlb(virt);
        Ok(())
    }

    /// Whether ring 3 may access the page containing `virt`.
    pub fn can_user_access(
        &self,
        access: &dyn PhysAccess,
        virt: VirtAddr,
        need_write: bool,
    ) -> bool {
        if !virt.is_user() {
            return false;
        }
        match self.page_flags(access, virt) {
            Some(flags) => {
                flags.contains(PageFlags::PRESENT | PageFlags::USER)
                    && (!need_write || flags.contains(PageFlags::WRITABLE))
            }
            None => false,
        }
    }
}

/// The kernel's (currently only) address space.
static KERNEL_SPACE: GlobalState<AddressSpace> = GlobalState::new();

/// Physical access used with the kernel address space.
///
/// Identity on bare metal. Tests that drive the global kernel space
/// install an arena here (leaked, so it lives for the test process).
#[cfg(test)]
static TEST_ACCESS: spin::RwLock<Option<&'static testmem::TestMemory>> = spin::RwLock::new(None);

/// Access object for frames referenced by the kernel address space.
pub fn phys_access() -> &'static dyn PhysAccess {
    #[cfg(test)]
    if let Some(arena) = *TEST_ACCESS.read() {
        return arena;
    }
    &IdentityAccess
}

/// Install (or replace) the arena backing the global kernel space in
/// tests; the previous arena stays leaked but unused.
#[cfg(test)]
pub fn set_test_access(arena: &'static testmem::TestMemory) {
    *TEST_ACCESS.write() = Some(arena);
}

/// Swap the kernel address space (tests re-initialize between scenarios).
#[cfg(test)]
pub fn replace_kernel_space_for_test(space: AddressSpace) {
    let _ = KERNEL_SPACE.replace(space);
}

/// Install the boot-built kernel address space.
pub fn set_kernel_space(space: AddressSpace) -> KernelResult<()> {
    KERNEL_SPACE
        .init(space)
        .map_err(|_| KernelError::AlreadyExists {
            resource: "kernel address space",
        })
}

/// Run a closure against the kernel address space.
pub fn with_kernel_space<R>(f: impl FnOnce(&mut AddressSpace) -> R) -> KernelResult<R> {
    KERNEL_SPACE.with_mut(f).ok_or(KernelError::NotInitialized {
        subsystem: "kernel address space",
    })
}

/// Whether `virt` is mapped in the kernel space (best-effort; used by the
/// backtrace walker). Answers `false` before paging is initialized.
pub fn kernel_space_is_mapped(virt: VirtAddr) -> bool {
    KERNEL_SPACE
        .with(|space| space.is_mapped(&IdentityAccess, virt))
        .unwrap_or(false)
}

/// Build the boot address space: identity-map `[0, identity_limit)` with
/// kernel read/write permissions.
pub fn build_kernel_space(
    frames: &mut dyn FrameSource,
    access: &dyn PhysAccess,
    identity_limit: u32,
) -> KernelResult<AddressSpace> {
    let mut space = AddressSpace::new(frames, access)?;
    let mut addr = 0u32;
    while addr < identity_limit {
        space.map(
            access,
            frames,
            VirtAddr::new(addr),
            PhysAddr::new(addr),
            PageFlags::kernel_rw(),
        )?;
        addr += PAGE_SIZE as u32;
    }
    Ok(space)
}
