//! Virtual Filesystem layer.
//!
//! Filesystem modules register a `{name, mount, unmount}` triple; the
//! mount table maps normalized mountpoint paths to superblocks with
//! longest-prefix matching on component boundaries. Path resolution
//! walks vnodes through their operation trait, following symlinks up to
//! a fixed depth bound.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use bitflags::bitflags;

use crate::error::{FsError, KernelError, KernelResult};
use crate::sync::GlobalState;

pub mod file;
pub mod path;
pub mod ramfs;

pub use file::{FdTable, FdTarget, OpenFile, OpenFlags, SeekFrom, VFS_MAX_FDS};
pub use path::{normalize_path, MAX_NAME, MAX_PATH};

/// Bound on symlink traversal during one resolution.
pub const SYMLINK_DEPTH_MAX: usize = 8;

/// Vnode kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnodeKind {
    Dir,
    File,
    Symlink,
    CharDev,
    BlockDev,
}

/// Attributes returned by `getattr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub kind: VnodeKind,
    pub size: usize,
}

/// One `readdir` record.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub kind: VnodeKind,
    pub size: usize,
    pub link_target: Option<String>,
}

/// Filesystem object operations.
///
/// Non-directory nodes keep the directory defaults, which report the
/// type mismatch; filesystems override what their node kinds support.
pub trait Vnode: Send + Sync {
    fn kind(&self) -> VnodeKind;

    fn getattr(&self) -> FileStat;

    fn lookup(&self, _name: &str) -> Result<Arc<dyn Vnode>, FsError> {
        Err(FsError::NotADirectory)
    }

    fn create(&self, _name: &str) -> Result<Arc<dyn Vnode>, FsError> {
        Err(FsError::NotSupported)
    }

    fn mkdir(&self, _name: &str) -> Result<Arc<dyn Vnode>, FsError> {
        Err(FsError::NotSupported)
    }

    fn read(&self, _offset: usize, _buf: &mut [u8]) -> Result<usize, FsError> {
        Err(FsError::NotSupported)
    }

    fn write(&self, _offset: usize, _data: &[u8]) -> Result<usize, FsError> {
        Err(FsError::NotSupported)
    }

    fn readdir(&self) -> Result<Vec<DirEntry>, FsError> {
        Err(FsError::NotADirectory)
    }

    fn unlink(&self, _name: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    fn symlink(&self, _name: &str, _target: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    fn readlink(&self) -> Result<String, FsError> {
        Err(FsError::NotASymlink)
    }

    fn truncate(&self, _size: usize) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    /// Hook invoked by the filesystem when the node's last reference is
    /// dropped; most filesystems need no action beyond the Arc itself.
    fn release(&self) {}
}

impl core::fmt::Debug for dyn Vnode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Vnode").field("kind", &self.kind()).finish()
    }
}

bitflags! {
    /// Mount flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MountFlags: u32 {
        const READ_ONLY = 1 << 0;
        const BIND = 1 << 1;
    }
}

bitflags! {
    /// Unmount flags. Only FORCE is meaningful; other bits are accepted
    /// and ignored.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UmountFlags: u32 {
        const FORCE = 1 << 0;
    }
}

bitflags! {
    /// Path-resolution flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResolveFlags: u32 {
        /// Do not follow a symlink in the final component.
        const NOFOLLOW = 1 << 0;
        /// Forbid escaping the starting filesystem root (`..` climbing
        /// out or absolute symlink targets).
        const BENEATH = 1 << 1;
    }
}

/// Per-mounted-filesystem record.
#[derive(Debug)]
pub struct Superblock {
    pub fs_type: String,
    /// Backing block device, if any.
    pub device: Option<crate::block::DiskId>,
    pub root: Arc<dyn Vnode>,
    pub flags: MountFlags,
    /// Open files referencing this superblock (unmount EBUSY guard).
    pub open_files: AtomicUsize,
}

impl Superblock {
    pub fn new(
        fs_type: &str,
        device: Option<crate::block::DiskId>,
        root: Arc<dyn Vnode>,
        flags: MountFlags,
    ) -> Self {
        Self {
            fs_type: fs_type.to_string(),
            device,
            root,
            flags,
            open_files: AtomicUsize::new(0),
        }
    }
}

/// A registered filesystem implementation.
#[derive(Clone)]
pub struct FilesystemType {
    pub name: &'static str,
    pub mount: fn(Option<crate::block::DiskId>, MountFlags) -> Result<Arc<Superblock>, FsError>,
    pub unmount: fn(&Superblock) -> Result<(), FsError>,
}

/// One mount-table row.
struct MountEntry {
    /// Normalized mountpoint path.
    mountpoint: String,
    sb: Arc<Superblock>,
    /// For bind mounts: path inside `sb` that backs the mountpoint
    /// (empty for regular mounts).
    source_rel: String,
    /// Human-readable source (device name or bind source path).
    source: String,
    fs_type: String,
    flags: MountFlags,
}

/// Result of resolving a path: the vnode plus its mount context.
#[derive(Debug)]
pub struct Resolved {
    pub vnode: Arc<dyn Vnode>,
    pub sb: Arc<Superblock>,
    /// Effective flags: superblock flags plus the mount entry's (a bind
    /// mount may add READ_ONLY on top of a writable source).
    pub flags: MountFlags,
}

/// The VFS: filesystem registry plus mount table.
///
/// Instantiable for tests; the kernel goes through [`with_vfs`].
pub struct Vfs {
    registry: Vec<FilesystemType>,
    mounts: Vec<MountEntry>,
}

impl Vfs {
    pub fn new() -> Self {
        Self {
            registry: Vec::new(),
            mounts: Vec::new(),
        }
    }

    // -- filesystem types ------------------------------------------------

    pub fn register_filesystem(&mut self, fs: FilesystemType) -> KernelResult<()> {
        if self.registry.iter().any(|f| f.name == fs.name) {
            return Err(KernelError::AlreadyExists {
                resource: "filesystem type",
            });
        }
        log::info!("vfs: registered filesystem type '{}'", fs.name);
        self.registry.push(fs);
        Ok(())
    }

    fn fs_type(&self, name: &str) -> Option<&FilesystemType> {
        self.registry.iter().find(|f| f.name == name)
    }

    // -- mount table -----------------------------------------------------

    /// Mount a filesystem of registered type `fs_name` at `mountpoint`.
    ///
    /// The first mount must be the root; later mountpoints must resolve
    /// to existing directories.
    pub fn mount(
        &mut self,
        mountpoint: &str,
        fs_name: &str,
        device: Option<crate::block::DiskId>,
        flags: MountFlags,
    ) -> KernelResult<()> {
        let mp = normalize_path(mountpoint)?;
        let fs = self
            .fs_type(fs_name)
            .ok_or(FsError::UnknownFsType)?
            .clone();

        if self.mounts.is_empty() {
            if mp != "/" {
                return Err(FsError::NotMounted.into());
            }
        } else {
            if self.mounts.iter().any(|m| m.mountpoint == mp) {
                return Err(FsError::AlreadyMounted.into());
            }
            let target = self.resolve(&mp, ResolveFlags::empty())?;
            if target.vnode.kind() != VnodeKind::Dir {
                return Err(FsError::NotADirectory.into());
            }
        }

        let sb = (fs.mount)(device, flags)?;
        let source = match device {
            Some(id) => alloc::format!("disk{}", id.as_u32()),
            None => String::from("none"),
        };
        log::info!("vfs: mounted {} at {} ({})", fs_name, mp, source);
        self.mounts.push(MountEntry {
            mountpoint: mp,
            sb,
            source_rel: String::new(),
            source,
            fs_type: fs_name.to_string(),
            flags,
        });
        Ok(())
    }

    /// Bind `source_path` at `mountpoint`; resolution under the new
    /// mountpoint redirects into the source superblock. Binds may be
    /// recursive (a bind of a bind).
    pub fn bind_mount(
        &mut self,
        source_path: &str,
        mountpoint: &str,
        flags: MountFlags,
    ) -> KernelResult<()> {
        let src = normalize_path(source_path)?;
        let mp = normalize_path(mountpoint)?;
        if self.mounts.iter().any(|m| m.mountpoint == mp) {
            return Err(FsError::AlreadyMounted.into());
        }

        let source_dir = self.resolve(&src, ResolveFlags::empty())?;
        if source_dir.vnode.kind() != VnodeKind::Dir {
            return Err(FsError::NotADirectory.into());
        }
        let target = self.resolve(&mp, ResolveFlags::empty())?;
        if target.vnode.kind() != VnodeKind::Dir {
            return Err(FsError::NotADirectory.into());
        }

        // Resolve the bind source down to its backing mount so recursive
        // binds chain through to the real superblock.
        let (entry_index, residual) = self
            .find_mount_for_path(&src)
            .ok_or(FsError::NotMounted)?;
        let entry = &self.mounts[entry_index];
        let sb = Arc::clone(&entry.sb);
        let fs_type = entry.fs_type.clone();
        let inherited = entry.flags;

        self.mounts.push(MountEntry {
            mountpoint: mp,
            sb,
            source_rel: residual,
            source: src,
            fs_type,
            flags: inherited | flags | MountFlags::BIND,
        });
        Ok(())
    }

    /// Unmount the filesystem at `mountpoint`.
    ///
    /// Fails with Busy while open files reference the superblock unless
    /// FORCE is given. The root mount can never be unmounted.
    pub fn unmount(&mut self, mountpoint: &str, flags: UmountFlags) -> KernelResult<()> {
        let mp = normalize_path(mountpoint)?;
        if mp == "/" {
            return Err(FsError::Busy.into());
        }
        let index = self
            .mounts
            .iter()
            .position(|m| m.mountpoint == mp)
            .ok_or(FsError::NotMounted)?;

        let entry = &self.mounts[index];
        if entry.sb.open_files.load(Ordering::Acquire) > 0 && !flags.contains(UmountFlags::FORCE) {
            return Err(FsError::Busy.into());
        }

        let is_bind = entry.flags.contains(MountFlags::BIND);
        let shared = self
            .mounts
            .iter()
            .enumerate()
            .any(|(i, m)| i != index && Arc::ptr_eq(&m.sb, &entry.sb));

        if !is_bind && !shared {
            if let Some(fs) = self.fs_type(&entry.fs_type.clone()) {
                (fs.unmount)(&entry.sb)?;
            }
        }
        let entry = self.mounts.remove(index);
        log::info!("vfs: unmounted {}", entry.mountpoint);
        Ok(())
    }

    /// Longest component-boundary prefix match over the mount table.
    ///
    /// Returns the entry index and the residual path *inside* the mount's
    /// superblock (bind redirection applied).
    fn find_mount_for_path(&self, normalized: &str) -> Option<(usize, String)> {
        let mut best: Option<usize> = None;
        for (i, entry) in self.mounts.iter().enumerate() {
            if path::is_component_prefix(&entry.mountpoint, normalized) {
                let better = match best {
                    Some(b) => entry.mountpoint.len() > self.mounts[b].mountpoint.len(),
                    None => true,
                };
                if better {
                    best = Some(i);
                }
            }
        }
        let index = best?;
        let entry = &self.mounts[index];
        let below = path::strip_mountpoint(&entry.mountpoint, normalized);
        let residual = if entry.source_rel.is_empty() {
            below.to_string()
        } else if below.is_empty() {
            entry.source_rel.clone()
        } else {
            alloc::format!("{}/{}", entry.source_rel, below)
        };
        Some((index, residual))
    }

    /// Mountpoint and residual for a path (diagnostics and tests).
    pub fn mount_for_path(&self, p: &str) -> KernelResult<(String, String)> {
        let normalized = normalize_path(p)?;
        let (index, residual) = self
            .find_mount_for_path(&normalized)
            .ok_or(FsError::NotMounted)?;
        Ok((self.mounts[index].mountpoint.clone(), residual))
    }

    pub fn mount_count(&self) -> usize {
        self.mounts.len()
    }

    // -- resolution ------------------------------------------------------

    /// Resolve an absolute path to a vnode plus its mount context.
    pub fn resolve(&self, p: &str, flags: ResolveFlags) -> KernelResult<Resolved> {
        let normalized = normalize_path(p)?;
        let (index, residual) = self
            .find_mount_for_path(&normalized)
            .ok_or(FsError::NotMounted)?;
        let entry = &self.mounts[index];
        let vnode = resolve_path_to_vnode(&entry.sb.root, &residual, flags)?;
        Ok(Resolved {
            vnode,
            sb: Arc::clone(&entry.sb),
            flags: entry.flags | entry.sb.flags,
        })
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk `relpath` (no leading slash, already normalized) from `root`.
///
/// Symlinks are followed up to [`SYMLINK_DEPTH_MAX`] expansions.
/// `..` components can only appear via symlink targets; they pop the
/// walk stack and, under BENEATH, error instead of climbing out of the
/// starting root.
pub fn resolve_path_to_vnode(
    root: &Arc<dyn Vnode>,
    relpath: &str,
    flags: ResolveFlags,
) -> KernelResult<Arc<dyn Vnode>> {
    use alloc::collections::VecDeque;

    let mut queue: VecDeque<String> = relpath
        .split('/')
        .filter(|c| !c.is_empty())
        .map(|c| c.to_string())
        .collect();

    // Stack of visited nodes for `..` handling; index 0 is the root.
    let mut stack: Vec<Arc<dyn Vnode>> = Vec::new();
    stack.push(Arc::clone(root));
    let mut link_budget = SYMLINK_DEPTH_MAX;

    while let Some(component) = queue.pop_front() {
        if component == "." {
            continue;
        }
        if component == ".." {
            if stack.len() > 1 {
                stack.pop();
            } else if flags.contains(ResolveFlags::BENEATH) {
                return Err(FsError::AccessDenied.into());
            }
            continue;
        }

        let current = stack.last().expect("stack never empties");
        if current.kind() != VnodeKind::Dir {
            return Err(FsError::NotADirectory.into());
        }
        let next = current.lookup(&component)?;

        if next.kind() == VnodeKind::Symlink {
            let is_last = queue.is_empty();
            if is_last && flags.contains(ResolveFlags::NOFOLLOW) {
                return Ok(next);
            }
            if link_budget == 0 {
                return Err(FsError::SymlinkLoop.into());
            }
            link_budget -= 1;

            let target = next.readlink()?;
            if target.starts_with('/') {
                if flags.contains(ResolveFlags::BENEATH) {
                    return Err(FsError::AccessDenied.into());
                }
                // Absolute target: restart from the filesystem root.
                stack.truncate(1);
            }
            for t in target.split('/').filter(|c| !c.is_empty()).rev() {
                queue.push_front(t.to_string());
            }
            continue;
        }

        stack.push(next);
    }

    Ok(stack.pop().expect("stack never empties"))
}

// ---------------------------------------------------------------------------
// Global instance and the public surface
// ---------------------------------------------------------------------------

static VFS: GlobalState<Vfs> = GlobalState::new();

/// Initialize the global VFS: register ramfs and mount it as root.
pub fn init() -> KernelResult<()> {
    let mut vfs = Vfs::new();
    vfs.register_filesystem(ramfs::filesystem_type())?;
    vfs.mount("/", "ramfs", None, MountFlags::empty())?;
    VFS.init(vfs).map_err(|_| KernelError::AlreadyExists {
        resource: "vfs",
    })?;
    Ok(())
}

/// Run a closure against the global VFS.
pub fn with_vfs<R>(f: impl FnOnce(&mut Vfs) -> R) -> KernelResult<R> {
    VFS.with_mut(f).ok_or(KernelError::NotInitialized { subsystem: "vfs" })
}

/// Replace the global VFS (tests re-initialize between scenarios).
#[cfg(test)]
pub fn reset_for_test(vfs: Vfs) {
    let _ = VFS.replace(vfs);
}

fn require_writable(resolved: &Resolved) -> KernelResult<()> {
    if resolved.flags.contains(MountFlags::READ_ONLY) {
        Err(FsError::AccessDenied.into())
    } else {
        Ok(())
    }
}

/// Open a path into an [`OpenFile`].
pub fn vfs_open(p: &str, flags: OpenFlags) -> KernelResult<OpenFile> {
    with_vfs(|vfs| -> KernelResult<OpenFile> {
        let resolve_flags = ResolveFlags::empty();
        let resolved = match vfs.resolve(p, resolve_flags) {
            Ok(r) => {
                if flags.contains(OpenFlags::CREATE) && flags.contains(OpenFlags::EXCLUSIVE) {
                    return Err(FsError::AlreadyExists.into());
                }
                r
            }
            Err(KernelError::FsError(FsError::NotFound)) if flags.contains(OpenFlags::CREATE) => {
                let normalized = normalize_path(p)?;
                let (parent, name) = path::split_parent(&normalized)?;
                let parent_resolved = vfs.resolve(parent, resolve_flags)?;
                require_writable(&parent_resolved)?;
                let vnode = parent_resolved.vnode.create(name)?;
                Resolved {
                    vnode,
                    sb: parent_resolved.sb,
                    flags: parent_resolved.flags,
                }
            }
            Err(e) => return Err(e),
        };

        if resolved.vnode.kind() == VnodeKind::Dir && flags.contains(OpenFlags::WRITE) {
            return Err(FsError::IsADirectory.into());
        }
        if flags.contains(OpenFlags::WRITE) {
            require_writable(&resolved)?;
        }
        if flags.contains(OpenFlags::TRUNCATE) {
            resolved.vnode.truncate(0)?;
        }

        Ok(OpenFile::new_node(resolved.vnode, resolved.sb, flags))
    })?
}

/// Read from an open file at its current offset.
pub fn vfs_read(file: &mut OpenFile, buf: &mut [u8]) -> KernelResult<usize> {
    file.read(buf)
}

/// Write to an open file at its current offset.
pub fn vfs_write(file: &mut OpenFile, data: &[u8]) -> KernelResult<usize> {
    file.write(data)
}

/// Close an open file, releasing its vnode reference.
pub fn vfs_close(file: OpenFile) {
    drop(file);
}

/// Create a directory.
pub fn vfs_mkdir(p: &str) -> KernelResult<()> {
    with_vfs(|vfs| -> KernelResult<()> {
        let normalized = normalize_path(p)?;
        let (parent, name) = path::split_parent(&normalized)?;
        let parent_resolved = vfs.resolve(parent, ResolveFlags::empty())?;
        require_writable(&parent_resolved)?;
        parent_resolved.vnode.mkdir(name)?;
        Ok(())
    })?
}

/// Remove a file or empty directory.
pub fn vfs_unlink(p: &str) -> KernelResult<()> {
    with_vfs(|vfs| -> KernelResult<()> {
        let normalized = normalize_path(p)?;
        let (parent, name) = path::split_parent(&normalized)?;
        let parent_resolved = vfs.resolve(parent, ResolveFlags::empty())?;
        require_writable(&parent_resolved)?;
        parent_resolved.vnode.unlink(name)?;
        Ok(())
    })?
}

/// Stat a path (follows symlinks).
pub fn vfs_stat(p: &str) -> KernelResult<FileStat> {
    with_vfs(|vfs| -> KernelResult<FileStat> {
        let resolved = vfs.resolve(p, ResolveFlags::empty())?;
        Ok(resolved.vnode.getattr())
    })?
}

/// Create a symlink at `linkpath` pointing to `target`.
pub fn vfs_symlink(target: &str, linkpath: &str) -> KernelResult<()> {
    with_vfs(|vfs| -> KernelResult<()> {
        let normalized = normalize_path(linkpath)?;
        let (parent, name) = path::split_parent(&normalized)?;
        let parent_resolved = vfs.resolve(parent, ResolveFlags::empty())?;
        require_writable(&parent_resolved)?;
        parent_resolved.vnode.symlink(name, target)?;
        Ok(())
    })?
}

/// Read a symlink's target without following it.
pub fn vfs_readlink(p: &str) -> KernelResult<String> {
    with_vfs(|vfs| -> KernelResult<String> {
        let resolved = vfs.resolve(p, ResolveFlags::NOFOLLOW)?;
        Ok(resolved.vnode.readlink()?)
    })?
}

/// List a directory.
pub fn vfs_readdir(p: &str) -> KernelResult<Vec<DirEntry>> {
    with_vfs(|vfs| -> KernelResult<Vec<DirEntry>> {
        let resolved = vfs.resolve(p, ResolveFlags::empty())?;
        Ok(resolved.vnode.readdir()?)
    })?
}

/// Truncate a file to `size`.
pub fn vfs_truncate(p: &str, size: usize) -> KernelResult<()> {
    with_vfs(|vfs| -> KernelResult<()> {
        let resolved = vfs.resolve(p, ResolveFlags::empty())?;
        require_writable(&resolved)?;
        Ok(resolved.vnode.truncate(size)?)
    })?
}

/// Mount a registered filesystem type.
pub fn vfs_mount(
    mountpoint: &str,
    fs_name: &str,
    device: Option<crate::block::DiskId>,
    flags: MountFlags,
) -> KernelResult<()> {
    with_vfs(|vfs| vfs.mount(mountpoint, fs_name, device, flags))?
}

/// Unmount a mountpoint.
pub fn vfs_unmount(mountpoint: &str, flags: UmountFlags) -> KernelResult<()> {
    with_vfs(|vfs| vfs.unmount(mountpoint, flags))?
}

/// Bind-mount `source` at `mountpoint`.
pub fn vfs_bind_mount(source: &str, mountpoint: &str, flags: MountFlags) -> KernelResult<()> {
    with_vfs(|vfs| vfs.bind_mount(source, mountpoint, flags))?
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn vfs_with_root() -> Vfs {
        let mut vfs = Vfs::new();
        vfs.register_filesystem(ramfs::filesystem_type()).unwrap();
        vfs.mount("/", "ramfs", None, MountFlags::empty()).unwrap();
        vfs
    }

    #[test]
    fn test_first_mount_must_be_root() {
        let mut vfs = Vfs::new();
        vfs.register_filesystem(ramfs::filesystem_type()).unwrap();
        assert!(vfs.mount("/mnt", "ramfs", None, MountFlags::empty()).is_err());
        assert!(vfs.mount("/", "ramfs", None, MountFlags::empty()).is_ok());
    }

    #[test]
    fn test_unknown_fs_type_rejected() {
        let mut vfs = Vfs::new();
        vfs.register_filesystem(ramfs::filesystem_type()).unwrap();
        let err = vfs.mount("/", "fat32", None, MountFlags::empty()).unwrap_err();
        assert_eq!(err, KernelError::FsError(FsError::UnknownFsType));
    }

    #[test]
    fn test_mountpoint_must_exist_and_be_dir() {
        let mut vfs = vfs_with_root();
        assert_eq!(
            vfs.mount("/mnt", "ramfs", None, MountFlags::empty()).unwrap_err(),
            KernelError::FsError(FsError::NotFound)
        );

        let root = vfs.resolve("/", ResolveFlags::empty()).unwrap();
        root.vnode.create("file").unwrap();
        assert_eq!(
            vfs.mount("/file", "ramfs", None, MountFlags::empty()).unwrap_err(),
            KernelError::FsError(FsError::NotADirectory)
        );
    }

    #[test]
    fn test_longest_prefix_on_component_boundaries() {
        let mut vfs = vfs_with_root();
        let root = vfs.resolve("/", ResolveFlags::empty()).unwrap();
        let mnt = root.vnode.mkdir("mnt").unwrap();
        mnt.mkdir("x").unwrap();
        root.vnode.mkdir("mntx").unwrap();
        vfs.mount("/mnt/x", "ramfs", None, MountFlags::empty()).unwrap();

        let (mp, residual) = vfs.mount_for_path("/mnt/x/foo").unwrap();
        assert_eq!(mp, "/mnt/x");
        assert_eq!(residual, "foo");

        // /mntx must stay on the root mount despite the shared prefix.
        let (mp, residual) = vfs.mount_for_path("/mntx/a").unwrap();
        assert_eq!(mp, "/");
        assert_eq!(residual, "mntx/a");
    }

    #[test]
    fn test_resolution_walks_into_mounted_fs() {
        let mut vfs = vfs_with_root();
        let root = vfs.resolve("/", ResolveFlags::empty()).unwrap();
        root.vnode.mkdir("data").unwrap();
        vfs.mount("/data", "ramfs", None, MountFlags::empty()).unwrap();

        // A file created through the mount is invisible on the shadowed
        // root directory.
        let mounted = vfs.resolve("/data", ResolveFlags::empty()).unwrap();
        mounted.vnode.create("inside").unwrap();
        assert!(vfs.resolve("/data/inside", ResolveFlags::empty()).is_ok());

        let shadowed = root.vnode.lookup("data").unwrap();
        assert_eq!(shadowed.lookup("inside").unwrap_err(), FsError::NotFound);
    }

    #[test]
    fn test_recursive_bind_chains_to_backing_mount() {
        let mut vfs = vfs_with_root();
        let root = vfs.resolve("/", ResolveFlags::empty()).unwrap();
        root.vnode.mkdir("a").unwrap();
        root.vnode.mkdir("b").unwrap();
        root.vnode.mkdir("c").unwrap();

        let a = vfs.resolve("/a", ResolveFlags::empty()).unwrap();
        a.vnode.mkdir("deep").unwrap();

        vfs.bind_mount("/a", "/b", MountFlags::empty()).unwrap();
        vfs.bind_mount("/b/deep", "/c", MountFlags::empty()).unwrap();

        // /c resolves through /b (a bind) back to /a/deep.
        let (mp, residual) = vfs.mount_for_path("/c/x").unwrap();
        assert_eq!(mp, "/c");
        assert_eq!(residual, "a/deep/x");
    }

    #[test]
    fn test_beneath_rejects_absolute_symlink_targets() {
        let vfs = vfs_with_root();
        let root = vfs.resolve("/", ResolveFlags::empty()).unwrap();
        root.vnode.mkdir("safe").unwrap();
        root.vnode.symlink("abs", "/safe").unwrap();

        assert!(vfs.resolve("/abs", ResolveFlags::empty()).is_ok());
        let err = vfs.resolve("/abs", ResolveFlags::BENEATH).unwrap_err();
        assert_eq!(err, KernelError::FsError(FsError::AccessDenied));
    }

    #[test]
    fn test_beneath_rejects_escaping_dotdot() {
        let vfs = vfs_with_root();
        let root = vfs.resolve("/", ResolveFlags::empty()).unwrap();
        root.vnode.mkdir("dir").unwrap();
        // Relative target climbing above the root.
        root.vnode.symlink("up", "../../etc").unwrap();

        let err = vfs.resolve("/up", ResolveFlags::BENEATH).unwrap_err();
        assert_eq!(err, KernelError::FsError(FsError::AccessDenied));
    }

    #[test]
    fn test_relative_symlink_resolves_from_link_directory() {
        let vfs = vfs_with_root();
        let root = vfs.resolve("/", ResolveFlags::empty()).unwrap();
        let dir = root.vnode.mkdir("dir").unwrap();
        dir.create("target").unwrap();
        dir.symlink("rel", "target").unwrap();

        let resolved = vfs.resolve("/dir/rel", ResolveFlags::empty()).unwrap();
        assert_eq!(resolved.vnode.kind(), VnodeKind::File);
    }

    #[test]
    fn test_nofollow_returns_the_link_itself() {
        let vfs = vfs_with_root();
        let root = vfs.resolve("/", ResolveFlags::empty()).unwrap();
        root.vnode.create("real").unwrap();
        root.vnode.symlink("ln", "/real").unwrap();

        let followed = vfs.resolve("/ln", ResolveFlags::empty()).unwrap();
        assert_eq!(followed.vnode.kind(), VnodeKind::File);
        let bare = vfs.resolve("/ln", ResolveFlags::NOFOLLOW).unwrap();
        assert_eq!(bare.vnode.kind(), VnodeKind::Symlink);
    }

    #[test]
    fn test_symlink_chain_within_budget_resolves() {
        let vfs = vfs_with_root();
        let root = vfs.resolve("/", ResolveFlags::empty()).unwrap();
        root.vnode.create("end").unwrap();
        // A chain of SYMLINK_DEPTH_MAX links resolves; one more loops.
        root.vnode.symlink("l0", "/end").unwrap();
        for i in 1..SYMLINK_DEPTH_MAX {
            let target = alloc::format!("/l{}", i - 1);
            let name = alloc::format!("l{}", i);
            root.vnode.symlink(&name, &target).unwrap();
        }

        let last = alloc::format!("/l{}", SYMLINK_DEPTH_MAX - 1);
        assert!(vfs.resolve(&last, ResolveFlags::empty()).is_ok());
    }

    #[test]
    fn test_exact_mountpoint_unmount_only() {
        let mut vfs = vfs_with_root();
        let root = vfs.resolve("/", ResolveFlags::empty()).unwrap();
        root.vnode.mkdir("m").unwrap();
        vfs.mount("/m", "ramfs", None, MountFlags::empty()).unwrap();

        assert_eq!(
            vfs.unmount("/m/sub", UmountFlags::empty()).unwrap_err(),
            KernelError::FsError(FsError::NotMounted)
        );
        vfs.unmount("/m", UmountFlags::empty()).unwrap();
        assert_eq!(vfs.mount_count(), 1);
    }
}
