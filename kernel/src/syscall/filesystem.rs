//! I/O and filesystem-namespace system calls.

use alloc::vec;

use crate::drivers::terminal;
use crate::error::{FsError, KernelError, KernelResult};
use crate::fs::{self, OpenFlags, SeekFrom};
use crate::mm::user_validation::{copy_from_user, copy_to_user};
use crate::sched;

use super::{absolutize, user_path, with_user_space};

/// Largest single read/write the kernel stages through its own buffer.
const IO_MAX: usize = 64 * 1024;

/// Run a closure on the calling task's descriptor table.
fn with_fd_table<R>(
    f: impl FnOnce(&mut fs::FdTable) -> KernelResult<R>,
) -> KernelResult<R> {
    sched::with_scheduler(|s| {
        let current = s.current().ok_or(KernelError::NotInitialized {
            subsystem: "scheduler",
        })?;
        let task = s
            .task_mut(current)
            .ok_or(KernelError::NotInitialized {
                subsystem: "scheduler",
            })?;
        f(&mut task.fd_table)
    })?
}

pub fn sys_open(path_ptr: u32, posix_flags: u32) -> KernelResult<isize> {
    let path = absolutize(&user_path(path_ptr)?)?;
    let flags = OpenFlags::from_posix(posix_flags);
    let file = fs::vfs_open(&path, flags)?;
    let fd = with_fd_table(|table| table.insert(file))?;
    Ok(fd as isize)
}

pub fn sys_close(fd: usize) -> KernelResult<isize> {
    with_fd_table(|table| table.close(fd))?;
    Ok(0)
}

pub fn sys_read(fd: usize, buf_ptr: u32, len: usize) -> KernelResult<isize> {
    let len = len.min(IO_MAX);
    if len == 0 {
        return Ok(0);
    }

    // fd 0 is the keyboard stream; 1 and 2 are write-only.
    if fd == fs::file::FD_STDIN {
        return read_stdin(buf_ptr, len);
    }
    if fd == fs::file::FD_STDOUT || fd == fs::file::FD_STDERR {
        return Err(FsError::AccessDenied.into());
    }

    let mut staging = vec![0u8; len];
    let n = with_fd_table(|table| table.get_mut(fd)?.read(&mut staging))?;
    with_user_space(|space, access| copy_to_user(space, access, buf_ptr, &staging[..n]))?;
    Ok(n as isize)
}

/// Blocking keyboard read: waits (yielding) for the first byte, then
/// drains whatever else is pending, delivering ASCII code points only.
fn read_stdin(buf_ptr: u32, len: usize) -> KernelResult<isize> {
    use crate::drivers::keyboard;

    let mut staging = vec![0u8; len];
    let mut filled = 0usize;

    while filled == 0 {
        while let Some(code) = keyboard::pop_key() {
            if (0..=0x7F).contains(&code) {
                staging[filled] = code as u8;
                filled += 1;
                if filled == len {
                    break;
                }
            }
        }
        if filled == 0 {
            // Nothing buffered: give the CPU away until a key arrives.
            sched::yield_now();
        }
    }

    with_user_space(|space, access| copy_to_user(space, access, buf_ptr, &staging[..filled]))?;
    Ok(filled as isize)
}

pub fn sys_write(fd: usize, buf_ptr: u32, len: usize) -> KernelResult<isize> {
    let len = len.min(IO_MAX);
    if len == 0 {
        return Ok(0);
    }

    let mut staging = vec![0u8; len];
    with_user_space(|space, access| copy_from_user(space, access, &mut staging, buf_ptr))?;

    if fd == fs::file::FD_STDOUT || fd == fs::file::FD_STDERR {
        terminal::write(&staging);
        return Ok(len as isize);
    }
    if fd == fs::file::FD_STDIN {
        return Err(FsError::AccessDenied.into());
    }

    let n = with_fd_table(|table| table.get_mut(fd)?.write(&staging))?;
    Ok(n as isize)
}

pub fn sys_seek(fd: usize, offset: i64, whence: usize) -> KernelResult<isize> {
    let from = match whence {
        0 => SeekFrom::Start(offset as u64),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return Err(KernelError::InvalidArgument { name: "whence" }),
    };
    let pos = with_fd_table(|table| table.get_mut(fd)?.seek(from))?;
    Ok(pos as isize)
}

pub fn sys_tell(fd: usize) -> KernelResult<isize> {
    let pos = with_fd_table(|table| Ok(table.get(fd)?.tell()))?;
    Ok(pos as isize)
}

pub fn sys_getcwd(buf_ptr: u32, size: usize) -> KernelResult<isize> {
    let cwd = super::process::current_cwd();
    let needed = cwd.len() + 1;
    if size < needed {
        return Err(KernelError::InvalidArgument { name: "size" });
    }
    with_user_space(|space, access| {
        copy_to_user(space, access, buf_ptr, cwd.as_bytes())?;
        copy_to_user(space, access, buf_ptr + cwd.len() as u32, &[0u8])
    })?;
    Ok(cwd.len() as isize)
}

pub fn sys_chdir(path_ptr: u32) -> KernelResult<isize> {
    let path = absolutize(&user_path(path_ptr)?)?;
    let stat = fs::vfs_stat(&path)?;
    if stat.kind != fs::VnodeKind::Dir {
        return Err(FsError::NotADirectory.into());
    }
    super::process::set_current_cwd(path)?;
    Ok(0)
}

pub fn sys_mkdir(path_ptr: u32) -> KernelResult<isize> {
    let path = absolutize(&user_path(path_ptr)?)?;
    fs::vfs_mkdir(&path)?;
    Ok(0)
}

pub fn sys_unlink(path_ptr: u32) -> KernelResult<isize> {
    let path = absolutize(&user_path(path_ptr)?)?;
    fs::vfs_unlink(&path)?;
    Ok(0)
}
