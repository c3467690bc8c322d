//! In-memory filesystem.
//!
//! Backs the root mount during early boot and gives the VFS test suite a
//! concrete filesystem. Everything lives in kernel heap; nothing
//! persists. Disk-backed filesystems register through the same
//! [`FilesystemType`] hook.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::RwLock;

use crate::error::FsError;

use super::{
    DirEntry, FileStat, FilesystemType, MountFlags, Superblock, Vnode, VnodeKind,
};

/// One ramfs node; directories hold children, files hold bytes,
/// symlinks hold their target string.
pub struct RamNode {
    kind: VnodeKind,
    data: RwLock<Vec<u8>>,
    children: RwLock<BTreeMap<String, Arc<RamNode>>>,
    link_target: RwLock<String>,
}

impl RamNode {
    fn new(kind: VnodeKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            data: RwLock::new(Vec::new()),
            children: RwLock::new(BTreeMap::new()),
            link_target: RwLock::new(String::new()),
        })
    }
}

impl Vnode for RamNode {
    fn kind(&self) -> VnodeKind {
        self.kind
    }

    fn getattr(&self) -> FileStat {
        let size = match self.kind {
            VnodeKind::File => self.data.read().len(),
            VnodeKind::Symlink => self.link_target.read().len(),
            _ => 0,
        };
        FileStat {
            kind: self.kind,
            size,
        }
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn Vnode>, FsError> {
        if self.kind != VnodeKind::Dir {
            return Err(FsError::NotADirectory);
        }
        self.children
            .read()
            .get(name)
            .map(|n| Arc::clone(n) as Arc<dyn Vnode>)
            .ok_or(FsError::NotFound)
    }

    fn create(&self, name: &str) -> Result<Arc<dyn Vnode>, FsError> {
        let node = self.add_child(name, VnodeKind::File)?;
        Ok(node)
    }

    fn mkdir(&self, name: &str) -> Result<Arc<dyn Vnode>, FsError> {
        let node = self.add_child(name, VnodeKind::Dir)?;
        Ok(node)
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<usize, FsError> {
        if self.kind == VnodeKind::Dir {
            return Err(FsError::IsADirectory);
        }
        let data = self.data.read();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, offset: usize, incoming: &[u8]) -> Result<usize, FsError> {
        if self.kind == VnodeKind::Dir {
            return Err(FsError::IsADirectory);
        }
        let mut data = self.data.write();
        let end = offset + incoming.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(incoming);
        Ok(incoming.len())
    }

    fn readdir(&self) -> Result<Vec<DirEntry>, FsError> {
        if self.kind != VnodeKind::Dir {
            return Err(FsError::NotADirectory);
        }
        Ok(self
            .children
            .read()
            .iter()
            .map(|(name, node)| DirEntry {
                name: name.clone(),
                kind: node.kind,
                size: node.getattr().size,
                link_target: match node.kind {
                    VnodeKind::Symlink => Some(node.link_target.read().clone()),
                    _ => None,
                },
            })
            .collect())
    }

    fn unlink(&self, name: &str) -> Result<(), FsError> {
        if self.kind != VnodeKind::Dir {
            return Err(FsError::NotADirectory);
        }
        let mut children = self.children.write();
        let node = children.get(name).ok_or(FsError::NotFound)?;
        if node.kind == VnodeKind::Dir && !node.children.read().is_empty() {
            return Err(FsError::DirectoryNotEmpty);
        }
        let node = children.remove(name).expect("checked above");
        node.release();
        Ok(())
    }

    fn symlink(&self, name: &str, target: &str) -> Result<(), FsError> {
        let node = self.add_child(name, VnodeKind::Symlink)?;
        *node.link_target.write() = target.to_string();
        Ok(())
    }

    fn readlink(&self) -> Result<String, FsError> {
        if self.kind != VnodeKind::Symlink {
            return Err(FsError::NotASymlink);
        }
        Ok(self.link_target.read().clone())
    }

    fn truncate(&self, size: usize) -> Result<(), FsError> {
        if self.kind != VnodeKind::File {
            return Err(FsError::NotSupported);
        }
        self.data.write().resize(size, 0);
        Ok(())
    }
}

impl RamNode {
    fn add_child(&self, name: &str, kind: VnodeKind) -> Result<Arc<RamNode>, FsError> {
        if self.kind != VnodeKind::Dir {
            return Err(FsError::NotADirectory);
        }
        if name.is_empty() || name.len() > super::MAX_NAME {
            return Err(FsError::NameTooLong);
        }
        let mut children = self.children.write();
        if children.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }
        let node = RamNode::new(kind);
        children.insert(name.to_string(), Arc::clone(&node));
        Ok(node)
    }
}

/// Fresh root directory (tests build trees directly on it).
pub fn new_root() -> Arc<dyn Vnode> {
    RamNode::new(VnodeKind::Dir)
}

fn mount(
    _device: Option<crate::block::DiskId>,
    flags: MountFlags,
) -> Result<Arc<Superblock>, FsError> {
    Ok(Arc::new(Superblock::new("ramfs", None, new_root(), flags)))
}

fn unmount(_sb: &Superblock) -> Result<(), FsError> {
    // Nothing persists; dropping the superblock frees the tree.
    Ok(())
}

/// Registration triple for the VFS.
pub fn filesystem_type() -> FilesystemType {
    FilesystemType {
        name: "ramfs",
        mount,
        unmount,
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_create_write_read() {
        let root = new_root();
        let f = root.create("hello.txt").unwrap();
        assert_eq!(f.write(0, b"hi there").unwrap(), 8);
        let mut buf = [0u8; 8];
        assert_eq!(f.read(0, &mut buf).unwrap(), 8);
        assert_eq!(&buf, b"hi there");
        // Reads past the end return 0 bytes.
        assert_eq!(f.read(100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_sparse_write_zero_fills() {
        let root = new_root();
        let f = root.create("sparse").unwrap();
        f.write(4, b"data").unwrap();
        let mut buf = [0xFFu8; 8];
        f.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"\0\0\0\0data");
    }

    #[test]
    fn test_mkdir_lookup_nesting() {
        let root = new_root();
        let dir = root.mkdir("etc").unwrap();
        dir.create("config").unwrap();

        let found = root.lookup("etc").unwrap();
        assert_eq!(found.kind(), VnodeKind::Dir);
        assert!(found.lookup("config").is_ok());
        assert_eq!(root.lookup("missing").unwrap_err(), FsError::NotFound);
    }

    #[test]
    fn test_duplicate_create_rejected() {
        let root = new_root();
        root.create("x").unwrap();
        assert_eq!(root.create("x").unwrap_err(), FsError::AlreadyExists);
        assert_eq!(root.mkdir("x").unwrap_err(), FsError::AlreadyExists);
    }

    #[test]
    fn test_unlink_refuses_nonempty_dir() {
        let root = new_root();
        let dir = root.mkdir("d").unwrap();
        dir.create("inner").unwrap();
        assert_eq!(root.unlink("d").unwrap_err(), FsError::DirectoryNotEmpty);

        dir.unlink("inner").unwrap();
        root.unlink("d").unwrap();
        assert_eq!(root.lookup("d").unwrap_err(), FsError::NotFound);
    }

    #[test]
    fn test_symlink_roundtrip() {
        let root = new_root();
        root.symlink("link", "/etc/config").unwrap();
        let l = root.lookup("link").unwrap();
        assert_eq!(l.kind(), VnodeKind::Symlink);
        assert_eq!(l.readlink().unwrap(), "/etc/config");
        // readlink on a non-symlink is an error.
        root.create("plain").unwrap();
        assert_eq!(
            root.lookup("plain").unwrap().readlink().unwrap_err(),
            FsError::NotASymlink
        );
    }

    #[test]
    fn test_readdir_lists_kinds() {
        let root = new_root();
        root.create("file").unwrap();
        root.mkdir("dir").unwrap();
        root.symlink("link", "target").unwrap();

        let entries = root.readdir().unwrap();
        assert_eq!(entries.len(), 3);
        let link = entries.iter().find(|e| e.name == "link").unwrap();
        assert_eq!(link.kind, VnodeKind::Symlink);
        assert_eq!(link.link_target.as_deref(), Some("target"));
    }

    #[test]
    fn test_truncate_grows_and_shrinks() {
        let root = new_root();
        let f = root.create("t").unwrap();
        f.write(0, b"abcdef").unwrap();
        f.truncate(3).unwrap();
        assert_eq!(f.getattr().size, 3);
        f.truncate(5).unwrap();
        let mut buf = [0xAA; 5];
        f.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"abc\0\0");
    }
}
