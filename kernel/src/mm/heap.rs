//! Kernel heap: an intrusive free-list allocator.
//!
//! Every allocation carries a one-word header recording its size, so
//! `kfree` needs only the pointer. Free blocks form an address-ordered
//! singly linked list; freeing coalesces with both neighbours when they
//! are adjacent. The lock masks interrupts, so allocation from IRQ
//! context cannot deadlock against an interrupted allocation.

use core::alloc::{GlobalAlloc, Layout};
use core::mem;

use crate::sync::IrqMutex;

/// Minimum alignment and size granule: one machine word.
const WORD: usize = mem::size_of::<usize>();

/// Smallest split remainder worth tracking as its own free block.
const MIN_BLOCK: usize = mem::size_of::<FreeBlock>() + WORD;

/// Heap usage snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Bytes handed out to callers (payloads, not headers).
    pub used: usize,
    /// Bytes available in the free list.
    pub free: usize,
}

/// Header preceding every live allocation.
#[repr(C)]
struct AllocHeader {
    /// Payload size in bytes (already aligned up).
    size: usize,
}

/// A node in the address-ordered free list. Lives inside the free range
/// it describes.
#[repr(C)]
struct FreeBlock {
    /// Total bytes in this free range, including this node.
    size: usize,
    next: *mut FreeBlock,
}

/// Free-list heap over one contiguous virtual range.
pub struct KernelHeap {
    head: *mut FreeBlock,
    start: usize,
    size: usize,
    used: usize,
}

// SAFETY: the raw pointers all point inside the heap region handed to
// `init`; access is serialized by the IrqMutex wrapping every instance.
unsafe impl Send for KernelHeap {}

impl KernelHeap {
    pub const fn empty() -> Self {
        Self {
            head: core::ptr::null_mut(),
            start: 0,
            size: 0,
            used: 0,
        }
    }

    /// Adopt `[start, start + size)` as the heap arena.
    ///
    /// # Safety
    ///
    /// The region must be mapped, writable, unused by anything else, and
    /// remain valid for the lifetime of the heap. Must be called once.
    pub unsafe fn init(&mut self, start: *mut u8, size: usize) {
        let aligned_start = (start as usize + WORD - 1) & !(WORD - 1);
        let aligned_size = (size - (aligned_start - start as usize)) & !(WORD - 1);

        let block = aligned_start as *mut FreeBlock;
        // SAFETY: caller guarantees the region is writable; the node fits
        // because callers never hand over regions smaller than MIN_BLOCK.
        unsafe {
            (*block).size = aligned_size;
            (*block).next = core::ptr::null_mut();
        }
        self.head = block;
        self.start = aligned_start;
        self.size = aligned_size;
        self.used = 0;
    }

    /// Allocate `size` bytes with at most word alignment handled
    /// implicitly; larger alignments get over-allocation via `alloc_layout`.
    pub fn alloc(&mut self, size: usize) -> *mut u8 {
        if size == 0 || self.size == 0 {
            return core::ptr::null_mut();
        }
        let payload = (size + WORD - 1) & !(WORD - 1);
        let needed = payload + mem::size_of::<AllocHeader>();

        // First fit: walk the free list for a block with enough room.
        let mut prev: *mut FreeBlock = core::ptr::null_mut();
        let mut cur = self.head;
        while !cur.is_null() {
            // SAFETY: cur is a live free-list node inside the arena.
            let cur_size = unsafe { (*cur).size };
            if cur_size >= needed {
                let remainder = cur_size - needed;
                let alloc_at = cur as usize;
                // SAFETY: all pointer writes stay inside the block we are
                // carving, whose bounds were recorded in its size field.
                unsafe {
                    let next = (*cur).next;
                    let replacement = if remainder >= MIN_BLOCK {
                        // Split: the tail of this block stays free.
                        let tail = (alloc_at + needed) as *mut FreeBlock;
                        (*tail).size = remainder;
                        (*tail).next = next;
                        tail
                    } else {
                        next
                    };
                    if prev.is_null() {
                        self.head = replacement;
                    } else {
                        (*prev).next = replacement;
                    }
                    let taken = if remainder >= MIN_BLOCK { needed } else { cur_size };
                    let header = alloc_at as *mut AllocHeader;
                    (*header).size = taken - mem::size_of::<AllocHeader>();
                    self.used += (*header).size;
                    return (alloc_at + mem::size_of::<AllocHeader>()) as *mut u8;
                }
            }
            prev = cur;
            // SAFETY: see above.
            cur = unsafe { (*cur).next };
        }
        core::ptr::null_mut()
    }

    /// Return an allocation to the free list, coalescing with adjacent
    /// free neighbours.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `alloc` on this heap and not be freed twice.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        // SAFETY: per contract, a header precedes the payload.
        let header = unsafe { (ptr as *mut AllocHeader).sub(1) };
        let payload = unsafe { (*header).size };
        let block_start = header as usize;
        let block_size = payload + mem::size_of::<AllocHeader>();
        self.used -= payload;

        // Find the insertion point keeping the list address-ordered.
        let mut prev: *mut FreeBlock = core::ptr::null_mut();
        let mut cur = self.head;
        while !cur.is_null() && (cur as usize) < block_start {
            prev = cur;
            // SAFETY: live free-list node.
            cur = unsafe { (*cur).next };
        }

        let node = block_start as *mut FreeBlock;
        // SAFETY: the freed range is exclusively ours again; we may write
        // a free node into it and stitch the list.
        unsafe {
            (*node).size = block_size;
            (*node).next = cur;
            if prev.is_null() {
                self.head = node;
            } else {
                (*prev).next = node;
            }

            // Coalesce forward: node + next adjacent?
            if !cur.is_null() && block_start + (*node).size == cur as usize {
                (*node).size += (*cur).size;
                (*node).next = (*cur).next;
            }
            // Coalesce backward: prev + node adjacent?
            if !prev.is_null() && prev as usize + (*prev).size == node as usize {
                (*prev).size += (*node).size;
                (*prev).next = (*node).next;
            }
        }
    }

    pub fn stats(&self) -> HeapStats {
        let mut free = 0;
        let mut cur = self.head;
        while !cur.is_null() {
            // SAFETY: live free-list node.
            unsafe {
                free += (*cur).size;
                cur = (*cur).next;
            }
        }
        HeapStats {
            used: self.used,
            free,
        }
    }
}

/// Interrupt-safe heap usable as the global allocator.
pub struct LockedKernelHeap {
    inner: IrqMutex<KernelHeap>,
}

impl LockedKernelHeap {
    pub const fn empty() -> Self {
        Self {
            inner: IrqMutex::new(KernelHeap::empty()),
        }
    }

    /// See [`KernelHeap::init`].
    ///
    /// # Safety
    ///
    /// Same contract as [`KernelHeap::init`].
    pub unsafe fn init(&self, start: *mut u8, size: usize) {
        // SAFETY: forwarded contract.
        unsafe { self.inner.lock().init(start, size) };
    }

    pub fn stats(&self) -> HeapStats {
        self.inner.lock().stats()
    }

    /// Allocate raw bytes (word aligned).
    pub fn kmalloc(&self, size: usize) -> *mut u8 {
        self.inner.lock().alloc(size)
    }

    /// Free a `kmalloc` allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `kmalloc` on this heap and not be freed twice.
    pub unsafe fn kfree(&self, ptr: *mut u8) {
        // SAFETY: forwarded contract.
        unsafe { self.inner.lock().free(ptr) };
    }
}

// SAFETY: alloc/dealloc pair up with the heap's own header bookkeeping;
// alignment above one word is produced by over-aligning the request.
unsafe impl GlobalAlloc for LockedKernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let mut heap = self.inner.lock();
        if layout.align() <= WORD {
            heap.alloc(layout.size())
        } else {
            // Over-allocate so an aligned payload exists inside, then
            // return the aligned pointer. The header trick does not
            // survive interior pointers, so stash the real pointer just
            // below the aligned address.
            let total = layout.size() + layout.align() + mem::size_of::<usize>();
            let raw = heap.alloc(total);
            if raw.is_null() {
                return raw;
            }
            let addr = raw as usize + mem::size_of::<usize>();
            let aligned = (addr + layout.align() - 1) & !(layout.align() - 1);
            // SAFETY: aligned - WORD is inside the over-allocated block.
            unsafe { *((aligned - mem::size_of::<usize>()) as *mut usize) = raw as usize };
            aligned as *mut u8
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let mut heap = self.inner.lock();
        if layout.align() <= WORD {
            // SAFETY: ptr originates from alloc above.
            unsafe { heap.free(ptr) };
        } else {
            // SAFETY: the original pointer was stashed below the aligned
            // payload by `alloc`.
            unsafe {
                let raw = *((ptr as usize - mem::size_of::<usize>()) as *const usize);
                heap.free(raw as *mut u8);
            }
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use std::vec;
    use std::vec::Vec;

    const ARENA: usize = 64 * 1024;

    fn new_heap() -> (KernelHeap, Vec<u8>) {
        let mut arena = vec![0u8; ARENA];
        let mut heap = KernelHeap::empty();
        // SAFETY: the arena vector outlives the heap in every test.
        unsafe { heap.init(arena.as_mut_ptr(), ARENA) };
        (heap, arena)
    }

    #[test]
    fn test_alloc_and_free_roundtrip() {
        let (mut heap, _arena) = new_heap();
        let before = heap.stats();

        let p = heap.alloc(100);
        assert!(!p.is_null());
        let mid = heap.stats();
        assert_eq!(mid.used, 104); // rounded to word multiple
        assert!(mid.free < before.free);

        // SAFETY: p came from this heap.
        unsafe { heap.free(p) };
        let after = heap.stats();
        assert_eq!(after.used, 0);
        assert_eq!(after.free, before.free);
    }

    #[test]
    fn test_zero_size_returns_null() {
        let (mut heap, _arena) = new_heap();
        assert!(heap.alloc(0).is_null());
    }

    #[test]
    fn test_exhaustion_returns_null_not_panic() {
        let (mut heap, _arena) = new_heap();
        assert!(heap.alloc(ARENA * 2).is_null());
    }

    #[test]
    fn test_writes_do_not_overlap() {
        let (mut heap, _arena) = new_heap();
        let a = heap.alloc(64);
        let b = heap.alloc(64);
        assert!(!a.is_null() && !b.is_null());
        // SAFETY: both blocks are live and 64 bytes long.
        unsafe {
            core::ptr::write_bytes(a, 0xAA, 64);
            core::ptr::write_bytes(b, 0x55, 64);
            assert_eq!(*a, 0xAA);
            assert_eq!(*b, 0x55);
        }
    }

    #[test]
    fn test_coalescing_restores_large_block() {
        let (mut heap, _arena) = new_heap();
        // Fragment the arena, then free everything in an order that
        // exercises both forward and backward merges.
        let blocks: Vec<*mut u8> = (0..8).map(|_| heap.alloc(1000)).collect();
        assert!(blocks.iter().all(|p| !p.is_null()));
        // SAFETY: all blocks are live allocations from this heap.
        unsafe {
            for &p in blocks.iter().step_by(2) {
                heap.free(p);
            }
            for &p in blocks.iter().skip(1).step_by(2) {
                heap.free(p);
            }
        }
        // After full coalescing a block nearly the size of the arena must
        // be allocatable again.
        let big = heap.alloc(ARENA - 64);
        assert!(!big.is_null());
    }

    #[test]
    fn test_first_fit_reuses_freed_block() {
        let (mut heap, _arena) = new_heap();
        let a = heap.alloc(256);
        let _b = heap.alloc(256);
        // SAFETY: a is live.
        unsafe { heap.free(a) };
        let c = heap.alloc(200);
        // The hole left by `a` is first in address order and big enough.
        assert_eq!(c, a);
    }

    #[test]
    fn test_stats_track_many_allocations() {
        let (mut heap, _arena) = new_heap();
        let mut held = Vec::new();
        for i in 1..32 {
            let p = heap.alloc(i * 8);
            assert!(!p.is_null());
            held.push(p);
        }
        let used: usize = (1..32).map(|i| i * 8).sum();
        assert_eq!(heap.stats().used, used);
        // SAFETY: every pointer in `held` is a live allocation.
        unsafe {
            for p in held {
                heap.free(p);
            }
        }
        assert_eq!(heap.stats().used, 0);
    }
}
