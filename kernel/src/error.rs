//! Kernel error types and the errno translation layer.
//!
//! Internal code reports failures through [`KernelError`] (or a subsystem
//! enum convertible into it). The system-call layer is the only place that
//! translates these into the negative errno integers user space sees.

use core::fmt;

use crate::block::DiskError;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Memory-related errors
    OutOfMemory,
    InvalidAddress {
        addr: usize,
    },
    /// A user pointer failed validation (unmapped, kernel range, overflow).
    BadUserPointer {
        addr: usize,
        len: usize,
    },

    /// Scheduler-related errors
    SchedulerError(SchedError),

    /// Filesystem-related errors
    FsError(FsError),

    /// Block-device errors
    DiskError(DiskError),

    /// Driver-framework errors
    DriverError(DriverError),

    /// Generic errors
    InvalidArgument {
        name: &'static str,
    },
    NotFound {
        resource: &'static str,
    },
    AlreadyExists {
        resource: &'static str,
    },
    ResourceExhausted {
        resource: &'static str,
    },
    PermissionDenied {
        operation: &'static str,
    },
    Busy {
        resource: &'static str,
    },
    NotInitialized {
        subsystem: &'static str,
    },
    NotImplemented {
        feature: &'static str,
    },
    WouldBlock,
}

/// Scheduler-specific errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    TaskNotFound { id: u32 },
    InvalidPriority { priority: u8 },
    /// The currently running task cannot be destroyed from within itself.
    CannotDestroyCurrent,
    InvalidState { expected: &'static str },
    NoKernelStack,
}

/// Filesystem-specific errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// File or directory not found
    NotFound,
    /// Path already exists
    AlreadyExists,
    /// Permission denied (read-only mount, mode violation)
    AccessDenied,
    /// Target is not a directory
    NotADirectory,
    /// Target is a directory (when a file was expected)
    IsADirectory,
    /// Directory is not empty
    DirectoryNotEmpty,
    /// Invalid path (empty component, embedded NUL, escapes root)
    InvalidPath,
    /// Path component or total path exceeds the grammar limits
    NameTooLong,
    /// Too many levels of symbolic links
    SymlinkLoop,
    /// Unknown filesystem type name
    UnknownFsType,
    /// Path already has a mount on it
    AlreadyMounted,
    /// Path is not a mount point
    NotMounted,
    /// Mount is busy (open file descriptors reference it)
    Busy,
    /// Invalid or unopened file descriptor
    BadFileDescriptor,
    /// The per-task descriptor table is full
    TooManyOpenFiles,
    /// Operation not supported by this node type
    NotSupported,
    /// Target is not a symbolic link
    NotASymlink,
    /// Underlying device I/O failed
    IoError,
}

/// Driver-framework errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    UnknownType,
    DuplicateName,
    InstanceNotFound,
    /// Operation not legal in the instance's current lifecycle state.
    InvalidState,
    /// `load_data` payload rejected by the type's validator.
    ValidationFailed,
    OperationFailed,
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::InvalidAddress { addr } => write!(f, "invalid address {:#x}", addr),
            Self::BadUserPointer { addr, len } => {
                write!(f, "bad user pointer {:#x} (len {})", addr, len)
            }
            Self::SchedulerError(e) => write!(f, "scheduler error: {:?}", e),
            Self::FsError(e) => write!(f, "filesystem error: {:?}", e),
            Self::DiskError(e) => write!(f, "disk error: {:?}", e),
            Self::DriverError(e) => write!(f, "driver error: {:?}", e),
            Self::InvalidArgument { name } => write!(f, "invalid argument '{}'", name),
            Self::NotFound { resource } => write!(f, "{} not found", resource),
            Self::AlreadyExists { resource } => write!(f, "{} already exists", resource),
            Self::ResourceExhausted { resource } => write!(f, "resource exhausted: {}", resource),
            Self::PermissionDenied { operation } => write!(f, "permission denied: {}", operation),
            Self::Busy { resource } => write!(f, "{} busy", resource),
            Self::NotInitialized { subsystem } => write!(f, "{} not initialized", subsystem),
            Self::NotImplemented { feature } => write!(f, "not implemented: {}", feature),
            Self::WouldBlock => write!(f, "operation would block"),
        }
    }
}

impl From<SchedError> for KernelError {
    fn from(err: SchedError) -> Self {
        Self::SchedulerError(err)
    }
}

impl From<FsError> for KernelError {
    fn from(err: FsError) -> Self {
        Self::FsError(err)
    }
}

impl From<DiskError> for KernelError {
    fn from(err: DiskError) -> Self {
        Self::DiskError(err)
    }
}

impl From<DriverError> for KernelError {
    fn from(err: DriverError) -> Self {
        Self::DriverError(err)
    }
}

/// Classic Unix errno values, as surfaced (negated) by the syscall layer.
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const EINTR: i32 = 4;
    pub const EIO: i32 = 5;
    pub const ENXIO: i32 = 6;
    pub const EBADF: i32 = 9;
    pub const EAGAIN: i32 = 11;
    pub const ENOMEM: i32 = 12;
    pub const EACCES: i32 = 13;
    pub const EFAULT: i32 = 14;
    pub const EBUSY: i32 = 16;
    pub const EEXIST: i32 = 17;
    pub const ENODEV: i32 = 19;
    pub const ENOTDIR: i32 = 20;
    pub const EISDIR: i32 = 21;
    pub const EINVAL: i32 = 22;
    pub const ENFILE: i32 = 23;
    pub const EMFILE: i32 = 24;
    pub const ENOTTY: i32 = 25;
    pub const ESPIPE: i32 = 29;
    pub const EROFS: i32 = 30;
    pub const ENAMETOOLONG: i32 = 36;
    pub const ENOSYS: i32 = 38;
    pub const ENOTEMPTY: i32 = 39;
    pub const ELOOP: i32 = 40;
}

impl KernelError {
    /// Translate this error into the errno value user space receives.
    ///
    /// Each layer keeps its own taxonomy internally; this is the single
    /// point where the external encoding is decided.
    pub fn to_errno(&self) -> i32 {
        use errno::*;
        match self {
            Self::OutOfMemory => ENOMEM,
            Self::InvalidAddress { .. } => EFAULT,
            Self::BadUserPointer { .. } => EFAULT,
            Self::SchedulerError(e) => match e {
                SchedError::TaskNotFound { .. } => ENOENT,
                SchedError::InvalidPriority { .. } => EINVAL,
                SchedError::CannotDestroyCurrent => EBUSY,
                SchedError::InvalidState { .. } => EINVAL,
                SchedError::NoKernelStack => ENOMEM,
            },
            Self::FsError(e) => match e {
                FsError::NotFound => ENOENT,
                FsError::AlreadyExists => EEXIST,
                FsError::AccessDenied => EACCES,
                FsError::NotADirectory => ENOTDIR,
                FsError::IsADirectory => EISDIR,
                FsError::DirectoryNotEmpty => ENOTEMPTY,
                FsError::InvalidPath => EINVAL,
                FsError::NameTooLong => ENAMETOOLONG,
                FsError::SymlinkLoop => ELOOP,
                FsError::UnknownFsType => ENODEV,
                FsError::AlreadyMounted => EBUSY,
                FsError::NotMounted => EINVAL,
                FsError::Busy => EBUSY,
                FsError::BadFileDescriptor => EBADF,
                FsError::TooManyOpenFiles => EMFILE,
                FsError::NotSupported => ENOSYS,
                FsError::NotASymlink => EINVAL,
                FsError::IoError => EIO,
            },
            Self::DiskError(e) => match e {
                DiskError::InvalidParam => EINVAL,
                DiskError::NotInitialized => ENODEV,
                DiskError::DeviceNotPresent => ENODEV,
                DiskError::LbaOutOfRange => EINVAL,
                DiskError::Timeout => EIO,
                DiskError::Ata => EIO,
                DiskError::Atapi => EIO,
                DiskError::Bus => EIO,
            },
            Self::DriverError(e) => match e {
                DriverError::UnknownType => ENODEV,
                DriverError::DuplicateName => EEXIST,
                DriverError::InstanceNotFound => ENODEV,
                DriverError::InvalidState => EBUSY,
                DriverError::ValidationFailed => EINVAL,
                DriverError::OperationFailed => EIO,
            },
            Self::InvalidArgument { .. } => EINVAL,
            Self::NotFound { .. } => ENOENT,
            Self::AlreadyExists { .. } => EEXIST,
            Self::ResourceExhausted { .. } => ENOMEM,
            Self::PermissionDenied { .. } => EPERM,
            Self::Busy { .. } => EBUSY,
            Self::NotInitialized { .. } => ENODEV,
            Self::NotImplemented { .. } => ENOSYS,
            Self::WouldBlock => EAGAIN,
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_fs_errors_map_to_classic_errno() {
        assert_eq!(KernelError::FsError(FsError::NotFound).to_errno(), errno::ENOENT);
        assert_eq!(
            KernelError::FsError(FsError::BadFileDescriptor).to_errno(),
            errno::EBADF
        );
        assert_eq!(KernelError::FsError(FsError::Busy).to_errno(), errno::EBUSY);
    }

    #[test]
    fn test_pointer_errors_are_efault() {
        let err = KernelError::BadUserPointer {
            addr: 0xC000_1000,
            len: 16,
        };
        assert_eq!(err.to_errno(), errno::EFAULT);
    }

    #[test]
    fn test_disk_timeout_is_eio() {
        assert_eq!(KernelError::DiskError(DiskError::Timeout).to_errno(), errno::EIO);
    }
}
