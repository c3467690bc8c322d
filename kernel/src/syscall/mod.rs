//! System call gateway.
//!
//! `int 0x80` enters through a ring-3-callable trap gate. The ABI:
//! syscall number in eax; up to five arguments in ebx, ecx, edx, esi,
//! edi; result in eax. Non-negative results are success values, negative
//! results are errno codes. Every user pointer goes through the
//! validated-copy helpers in `mm::user_validation` before a byte moves.

use crate::error::{errno, KernelError, KernelResult};

mod device;
mod filesystem;
mod process;
mod tty;

pub use process::UtsName;

/// System call numbers: stable small integers, grouped by family.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    // Process
    Exit = 1,
    Getpid = 2,
    Yield = 3,
    Sleep = 4,
    Gettime = 5,
    Uname = 6,

    // I/O
    Open = 10,
    Close = 11,
    Read = 12,
    Write = 13,
    Seek = 14,
    Tell = 15,

    // Filesystem namespace
    Getcwd = 20,
    Chdir = 21,
    Mkdir = 22,
    Unlink = 23,

    // TTY
    Readkey = 30,
    KeyAvailable = 31,
    Getc = 32,
    Gets = 33,
    Kbhit = 34,
    Kbflush = 35,

    // Device control
    Ioctl = 40,

    // Network (served by the external network stack; stubbed here)
    DnsResolve = 50,
    Connect = 51,
    Send = 52,
    Recv = 53,

    // Unimplemented process-model calls
    Fork = 60,
    Execve = 61,
    Pipe = 62,
    Dup = 63,
    Mmap = 64,
    Stat = 65,
}

impl TryFrom<usize> for Syscall {
    type Error = ();

    fn try_from(value: usize) -> Result<Self, ()> {
        match value {
            1 => Ok(Self::Exit),
            2 => Ok(Self::Getpid),
            3 => Ok(Self::Yield),
            4 => Ok(Self::Sleep),
            5 => Ok(Self::Gettime),
            6 => Ok(Self::Uname),
            10 => Ok(Self::Open),
            11 => Ok(Self::Close),
            12 => Ok(Self::Read),
            13 => Ok(Self::Write),
            14 => Ok(Self::Seek),
            15 => Ok(Self::Tell),
            20 => Ok(Self::Getcwd),
            21 => Ok(Self::Chdir),
            22 => Ok(Self::Mkdir),
            23 => Ok(Self::Unlink),
            30 => Ok(Self::Readkey),
            31 => Ok(Self::KeyAvailable),
            32 => Ok(Self::Getc),
            33 => Ok(Self::Gets),
            34 => Ok(Self::Kbhit),
            35 => Ok(Self::Kbflush),
            40 => Ok(Self::Ioctl),
            50 => Ok(Self::DnsResolve),
            51 => Ok(Self::Connect),
            52 => Ok(Self::Send),
            53 => Ok(Self::Recv),
            60 => Ok(Self::Fork),
            61 => Ok(Self::Execve),
            62 => Ok(Self::Pipe),
            63 => Ok(Self::Dup),
            64 => Ok(Self::Mmap),
            65 => Ok(Self::Stat),
            _ => Err(()),
        }
    }
}

/// Dispatch a system call.
///
/// Negative returns are errno codes; everything else is the call's
/// result value.
pub fn dispatch(nr: usize, args: [usize; 5]) -> isize {
    let result: KernelResult<isize> = match Syscall::try_from(nr) {
        Ok(call) => handle(call, args),
        Err(()) => Err(KernelError::NotImplemented {
            feature: "unknown syscall",
        }),
    };

    match result {
        Ok(value) => value,
        Err(err) => -(err.to_errno() as isize),
    }
}

fn handle(call: Syscall, args: [usize; 5]) -> KernelResult<isize> {
    match call {
        Syscall::Exit => process::sys_exit(args[0] as i32),
        Syscall::Getpid => process::sys_getpid(),
        Syscall::Yield => process::sys_yield(),
        Syscall::Sleep => process::sys_sleep(args[0] as u64),
        Syscall::Gettime => process::sys_gettime(),
        Syscall::Uname => process::sys_uname(args[0] as u32),

        Syscall::Open => filesystem::sys_open(args[0] as u32, args[1] as u32),
        Syscall::Close => filesystem::sys_close(args[0]),
        Syscall::Read => filesystem::sys_read(args[0], args[1] as u32, args[2]),
        Syscall::Write => filesystem::sys_write(args[0], args[1] as u32, args[2]),
        // The offset is signed in the ABI; sign-extend from register width.
        Syscall::Seek => filesystem::sys_seek(args[0], args[1] as isize as i64, args[2]),
        Syscall::Tell => filesystem::sys_tell(args[0]),

        Syscall::Getcwd => filesystem::sys_getcwd(args[0] as u32, args[1]),
        Syscall::Chdir => filesystem::sys_chdir(args[0] as u32),
        Syscall::Mkdir => filesystem::sys_mkdir(args[0] as u32),
        Syscall::Unlink => filesystem::sys_unlink(args[0] as u32),

        Syscall::Readkey => tty::sys_readkey(),
        Syscall::KeyAvailable => tty::sys_key_available(),
        Syscall::Getc => tty::sys_getc(),
        Syscall::Gets => tty::sys_gets(args[0] as u32, args[1]),
        Syscall::Kbhit => tty::sys_kbhit(),
        Syscall::Kbflush => tty::sys_kbflush(),

        Syscall::Ioctl => device::sys_ioctl(args[0] as u32, args[1] as u32, args[2]),

        // The network stack is an external module; until it registers,
        // the calls exist but are not implemented.
        Syscall::DnsResolve
        | Syscall::Connect
        | Syscall::Send
        | Syscall::Recv
        | Syscall::Fork
        | Syscall::Execve
        | Syscall::Pipe
        | Syscall::Dup
        | Syscall::Mmap
        | Syscall::Stat => Err(KernelError::NotImplemented { feature: "syscall" }),
    }
}

/// Entry from the trap layer: unpack the frame per the register ABI.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn dispatch_from_trap(frame: &mut crate::arch::x86::idt::TrapFrame) -> isize {
    dispatch(frame.eax as usize, frame.syscall_args())
}

/// Run a closure with the current address space and its phys access
/// (every user-pointer operation funnels through this).
pub(crate) fn with_user_space<R>(
    f: impl FnOnce(&mut crate::mm::vmm::AddressSpace, &dyn crate::mm::vmm::PhysAccess) -> KernelResult<R>,
) -> KernelResult<R> {
    let access = crate::mm::vmm::phys_access();
    crate::mm::vmm::with_kernel_space(|space| f(space, access))?
}

/// Copy a NUL-terminated path argument out of user space.
pub(crate) fn user_path(ptr: u32) -> KernelResult<alloc::string::String> {
    with_user_space(|space, access| {
        crate::mm::user_validation::copy_string_from_user(space, access, ptr, crate::fs::MAX_PATH)
    })
}

/// Make a user-supplied path absolute against the caller's cwd.
pub(crate) fn absolutize(path: &str) -> KernelResult<alloc::string::String> {
    use alloc::format;
    let joined = if path.starts_with('/') {
        alloc::string::String::from(path)
    } else {
        let cwd = process::current_cwd();
        if cwd == "/" {
            format!("/{}", path)
        } else {
            format!("{}/{}", cwd, path)
        }
    };
    Ok(crate::fs::normalize_path(&joined)?)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_syscall_is_enosys() {
        assert_eq!(dispatch(9999, [0; 5]), -(errno::ENOSYS as isize));
    }

    #[test]
    fn test_stub_family_is_enosys() {
        for nr in [60, 61, 62, 63, 64, 65, 50, 51, 52, 53] {
            assert_eq!(dispatch(nr, [0; 5]), -(errno::ENOSYS as isize));
        }
    }

    #[test]
    fn test_syscall_numbers_are_stable() {
        // The numbers are ABI; moving one breaks every user binary.
        assert_eq!(Syscall::Exit as usize, 1);
        assert_eq!(Syscall::Write as usize, 13);
        assert_eq!(Syscall::Ioctl as usize, 40);
        assert_eq!(Syscall::try_from(13), Ok(Syscall::Write));
        assert_eq!(Syscall::try_from(0), Err(()));
    }
}
