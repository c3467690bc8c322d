//! User-pointer validation and safe copies.
//!
//! Every syscall argument that names user memory goes through here. The
//! helpers walk the page tables *before* touching a single byte: a range
//! is only copied once every page in it is present and user-accessible
//! (and writable, for copies into user space). With no demand paging and
//! a single CPU the mapping cannot change underneath the copy, so these
//! functions return errors instead of ever faulting.

use crate::error::{KernelError, KernelResult};

use super::vmm::{AddressSpace, PhysAccess};
use super::{VirtAddr, KERNEL_SPLIT, PAGE_SIZE};

/// Check that `[addr, addr + len)` is a valid user range.
///
/// Rejects null pointers, empty following overflowing ranges, anything
/// touching the kernel half, and any page lacking PRESENT+USER (or
/// WRITABLE when `write` is requested).
pub fn validate_user(
    space: &AddressSpace,
    access: &dyn PhysAccess,
    addr: u32,
    len: usize,
    write: bool,
) -> bool {
    if addr == 0 {
        return false;
    }
    if len == 0 {
        return addr < KERNEL_SPLIT;
    }
    let Some(last) = addr.checked_add(len as u32 - 1) else {
        return false;
    };
    if addr >= KERNEL_SPLIT || last >= KERNEL_SPLIT {
        return false;
    }

    let mut page = VirtAddr::new(addr).align_down();
    let last_page = VirtAddr::new(last).align_down();
    loop {
        if !space.can_user_access(access, page, write) {
            return false;
        }
        if page == last_page {
            break;
        }
        page = VirtAddr::new(page.as_u32() + PAGE_SIZE as u32);
    }
    true
}

/// Copy `dst.len()` bytes from user memory into a kernel buffer.
///
/// Returns the number of bytes copied (always `dst.len()` on success).
pub fn copy_from_user(
    space: &AddressSpace,
    access: &dyn PhysAccess,
    dst: &mut [u8],
    usrc: u32,
) -> KernelResult<usize> {
    if !validate_user(space, access, usrc, dst.len(), false) {
        return Err(KernelError::BadUserPointer {
            addr: usrc as usize,
            len: dst.len(),
        });
    }
    for (chunk_virt, chunk) in page_chunks(usrc, dst) {
        let phys = space
            .virt_to_phys(access, VirtAddr::new(chunk_virt))
            .ok_or(KernelError::BadUserPointer {
                addr: chunk_virt as usize,
                len: chunk.len(),
            })?;
        let frame = phys.align_down();
        let offset = (phys.as_u32() - frame.as_u32()) as usize;
        let src_ptr = access.frame_ptr(frame);
        // SAFETY: validation proved the page present; PhysAccess hands out
        // the frame's backing memory and the chunk never crosses the page.
        unsafe {
            core::ptr::copy_nonoverlapping(src_ptr.add(offset), chunk.as_mut_ptr(), chunk.len());
        }
    }
    Ok(dst.len())
}

/// Copy a kernel buffer into user memory.
pub fn copy_to_user(
    space: &AddressSpace,
    access: &dyn PhysAccess,
    udst: u32,
    src: &[u8],
) -> KernelResult<usize> {
    if !validate_user(space, access, udst, src.len(), true) {
        return Err(KernelError::BadUserPointer {
            addr: udst as usize,
            len: src.len(),
        });
    }
    // Work over a mutable shadow so the chunking helper can be shared;
    // the chunks borrow disjoint parts of `src` by offset.
    let mut offset_in_src = 0usize;
    let mut virt = udst;
    let mut remaining = src.len();
    while remaining > 0 {
        let page_room = PAGE_SIZE - (virt as usize % PAGE_SIZE);
        let step = remaining.min(page_room);
        let phys = space
            .virt_to_phys(access, VirtAddr::new(virt))
            .ok_or(KernelError::BadUserPointer {
                addr: virt as usize,
                len: step,
            })?;
        let frame = phys.align_down();
        let page_offset = (phys.as_u32() - frame.as_u32()) as usize;
        let dst_ptr = access.frame_ptr(frame);
        // SAFETY: validated writable user page; chunk stays inside it.
        unsafe {
            core::ptr::copy_nonoverlapping(
                src[offset_in_src..].as_ptr(),
                dst_ptr.add(page_offset),
                step,
            );
        }
        offset_in_src += step;
        virt += step as u32;
        remaining -= step;
    }
    Ok(src.len())
}

/// Copy a NUL-terminated string out of user memory, up to `max` bytes
/// of content. The scan validates each page before reading it.
pub fn copy_string_from_user(
    space: &AddressSpace,
    access: &dyn PhysAccess,
    usrc: u32,
    max: usize,
) -> KernelResult<alloc::string::String> {
    use alloc::vec::Vec;

    let mut bytes: Vec<u8> = Vec::new();
    let mut virt = usrc;
    'scan: while bytes.len() < max {
        let page_room = PAGE_SIZE - (virt as usize % PAGE_SIZE);
        let step = (max - bytes.len()).min(page_room);
        if !validate_user(space, access, virt, step, false) {
            return Err(KernelError::BadUserPointer {
                addr: virt as usize,
                len: step,
            });
        }
        let phys = space
            .virt_to_phys(access, VirtAddr::new(virt))
            .ok_or(KernelError::BadUserPointer {
                addr: virt as usize,
                len: step,
            })?;
        let frame = phys.align_down();
        let offset = (phys.as_u32() - frame.as_u32()) as usize;
        let src_ptr = access.frame_ptr(frame);
        for i in 0..step {
            // SAFETY: in-bounds read of a validated present page.
            let byte = unsafe { *src_ptr.add(offset + i) };
            if byte == 0 {
                break 'scan;
            }
            bytes.push(byte);
        }
        virt += step as u32;
    }

    alloc::string::String::from_utf8(bytes).map_err(|_| KernelError::InvalidArgument {
        name: "string encoding",
    })
}

/// Split a kernel buffer into per-page chunks of the user range starting
/// at `base`.
fn page_chunks<'a>(base: u32, buf: &'a mut [u8]) -> impl Iterator<Item = (u32, &'a mut [u8])> {
    let mut rest = Some(buf);
    let mut virt = base;
    core::iter::from_fn(move || {
        let current = rest.take()?;
        if current.is_empty() {
            return None;
        }
        let page_room = PAGE_SIZE - (virt as usize % PAGE_SIZE);
        let step = current.len().min(page_room);
        let (chunk, tail) = current.split_at_mut(step);
        let chunk_virt = virt;
        virt += step as u32;
        rest = Some(tail);
        Some((chunk_virt, chunk))
    })
}
