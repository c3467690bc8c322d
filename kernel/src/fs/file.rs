//! Open files and per-task descriptor tables.

use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use bitflags::bitflags;

use crate::error::{FsError, KernelError, KernelResult};

use super::{Superblock, Vnode, VnodeKind};

/// Slots per task descriptor table.
pub const VFS_MAX_FDS: usize = 16;

/// Reserved descriptors.
pub const FD_STDIN: usize = 0;
pub const FD_STDOUT: usize = 1;
pub const FD_STDERR: usize = 2;

bitflags! {
    /// Open flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const CREATE = 1 << 2;
        const TRUNCATE = 1 << 3;
        const APPEND = 1 << 4;
        const EXCLUSIVE = 1 << 5;
    }
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self::READ
    }

    /// Decode the classic O_* encoding used at the syscall boundary.
    ///
    /// These values are the ABI contract with user space.
    pub fn from_posix(bits: u32) -> Self {
        const O_WRONLY: u32 = 0x0001;
        const O_RDWR: u32 = 0x0002;
        const O_CREAT: u32 = 0x0040;
        const O_EXCL: u32 = 0x0080;
        const O_TRUNC: u32 = 0x0200;
        const O_APPEND: u32 = 0x0400;

        let mut flags = Self::empty();
        match bits & 0x3 {
            O_WRONLY => flags |= Self::WRITE,
            O_RDWR => flags |= Self::READ | Self::WRITE,
            _ => flags |= Self::READ, // O_RDONLY = 0
        }
        if bits & O_CREAT != 0 {
            flags |= Self::CREATE;
        }
        if bits & O_EXCL != 0 {
            flags |= Self::EXCLUSIVE;
        }
        if bits & O_TRUNC != 0 {
            flags |= Self::TRUNCATE;
        }
        if bits & O_APPEND != 0 {
            flags |= Self::APPEND;
        }
        flags
    }
}

/// Seek origins.
#[derive(Debug, Clone, Copy)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}

/// What a descriptor points at.
#[derive(Debug)]
pub enum FdTarget {
    /// The terminal/keyboard pair behind fds 0-2; actual I/O is handled
    /// by the syscall layer, not the VFS.
    Tty,
    /// A vnode within a mounted filesystem.
    Node {
        vnode: Arc<dyn Vnode>,
        sb: Arc<Superblock>,
    },
}

/// An open file: target, flags, byte offset.
#[derive(Debug)]
pub struct OpenFile {
    pub target: FdTarget,
    pub flags: OpenFlags,
    pub offset: u64,
}

impl OpenFile {
    /// Terminal-backed descriptor (fds 0-2).
    pub fn new_tty(flags: OpenFlags) -> Self {
        Self {
            target: FdTarget::Tty,
            flags,
            offset: 0,
        }
    }

    /// Vnode-backed descriptor; counts against the superblock for the
    /// unmount busy check.
    pub fn new_node(vnode: Arc<dyn Vnode>, sb: Arc<Superblock>, flags: OpenFlags) -> Self {
        sb.open_files.fetch_add(1, Ordering::AcqRel);
        Self {
            target: FdTarget::Node { vnode, sb },
            flags,
            offset: 0,
        }
    }

    pub fn is_tty(&self) -> bool {
        matches!(self.target, FdTarget::Tty)
    }

    /// Read at the current offset, advancing it.
    pub fn read(&mut self, buf: &mut [u8]) -> KernelResult<usize> {
        if !self.flags.contains(OpenFlags::READ) {
            return Err(FsError::AccessDenied.into());
        }
        match &self.target {
            FdTarget::Tty => Err(FsError::NotSupported.into()),
            FdTarget::Node { vnode, .. } => {
                let n = vnode.read(self.offset as usize, buf)?;
                self.offset += n as u64;
                Ok(n)
            }
        }
    }

    /// Write at the current offset (or the end in append mode).
    pub fn write(&mut self, data: &[u8]) -> KernelResult<usize> {
        if !self.flags.contains(OpenFlags::WRITE) {
            return Err(FsError::AccessDenied.into());
        }
        match &self.target {
            FdTarget::Tty => Err(FsError::NotSupported.into()),
            FdTarget::Node { vnode, .. } => {
                if self.flags.contains(OpenFlags::APPEND) {
                    self.offset = vnode.getattr().size as u64;
                }
                let n = vnode.write(self.offset as usize, data)?;
                self.offset += n as u64;
                Ok(n)
            }
        }
    }

    /// Move the file offset.
    pub fn seek(&mut self, from: SeekFrom) -> KernelResult<u64> {
        let size = match &self.target {
            FdTarget::Tty => return Err(FsError::NotSupported.into()),
            FdTarget::Node { vnode, .. } => vnode.getattr().size as u64,
        };
        let new_offset = match from {
            SeekFrom::Start(o) => Some(o),
            SeekFrom::Current(d) => self.offset.checked_add_signed(d),
            SeekFrom::End(d) => size.checked_add_signed(d),
        };
        match new_offset {
            Some(o) => {
                self.offset = o;
                Ok(o)
            }
            None => Err(KernelError::InvalidArgument { name: "offset" }),
        }
    }

    /// Current offset.
    pub fn tell(&self) -> u64 {
        self.offset
    }

    pub fn vnode(&self) -> Option<&Arc<dyn Vnode>> {
        match &self.target {
            FdTarget::Tty => None,
            FdTarget::Node { vnode, .. } => Some(vnode),
        }
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        if let FdTarget::Node { vnode, sb } = &self.target {
            sb.open_files.fetch_sub(1, Ordering::AcqRel);
            // The filesystem's release hook observes the drop; the Arc
            // itself frees the node when this was the last reference.
            vnode.release();
        }
    }
}

/// Per-task descriptor table. Slots 0-2 are the terminal and are never
/// closable.
pub struct FdTable {
    slots: [Option<OpenFile>; VFS_MAX_FDS],
}

impl FdTable {
    pub fn new() -> Self {
        let mut slots: [Option<OpenFile>; VFS_MAX_FDS] = [const { None }; VFS_MAX_FDS];
        slots[FD_STDIN] = Some(OpenFile::new_tty(OpenFlags::READ));
        slots[FD_STDOUT] = Some(OpenFile::new_tty(OpenFlags::WRITE));
        slots[FD_STDERR] = Some(OpenFile::new_tty(OpenFlags::WRITE));
        Self { slots }
    }

    /// Install an open file in the lowest free slot (>= 3).
    pub fn insert(&mut self, file: OpenFile) -> KernelResult<usize> {
        for (fd, slot) in self.slots.iter_mut().enumerate().skip(3) {
            if slot.is_none() {
                *slot = Some(file);
                return Ok(fd);
            }
        }
        Err(FsError::TooManyOpenFiles.into())
    }

    pub fn get(&self, fd: usize) -> KernelResult<&OpenFile> {
        self.slots
            .get(fd)
            .and_then(|s| s.as_ref())
            .ok_or(FsError::BadFileDescriptor.into())
    }

    pub fn get_mut(&mut self, fd: usize) -> KernelResult<&mut OpenFile> {
        self.slots
            .get_mut(fd)
            .and_then(|s| s.as_mut())
            .ok_or(FsError::BadFileDescriptor.into())
    }

    /// Close a descriptor. The reserved stdio slots may never be closed.
    pub fn close(&mut self, fd: usize) -> KernelResult<()> {
        if fd <= FD_STDERR {
            return Err(KernelError::PermissionDenied {
                operation: "close reserved descriptor",
            });
        }
        match self.slots.get_mut(fd).and_then(|s| s.take()) {
            Some(file) => {
                drop(file);
                Ok(())
            }
            None => Err(FsError::BadFileDescriptor.into()),
        }
    }

    /// Number of live descriptors, stdio included.
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
