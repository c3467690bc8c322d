//! Process-family system calls.

use alloc::string::String;

use crate::error::KernelResult;
use crate::mm::user_validation::copy_to_user;
use crate::sched;
use crate::timer;

use super::with_user_space;

/// Field width of each `uname` string, NUL included.
pub const UTS_FIELD_LEN: usize = 65;

/// The structure `uname` fills in user space: six NUL-terminated fields.
#[repr(C)]
pub struct UtsName {
    pub sysname: [u8; UTS_FIELD_LEN],
    pub nodename: [u8; UTS_FIELD_LEN],
    pub release: [u8; UTS_FIELD_LEN],
    pub version: [u8; UTS_FIELD_LEN],
    pub machine: [u8; UTS_FIELD_LEN],
    pub domainname: [u8; UTS_FIELD_LEN],
}

impl UtsName {
    pub fn for_this_kernel() -> Self {
        let mut uts = Self {
            sysname: [0; UTS_FIELD_LEN],
            nodename: [0; UTS_FIELD_LEN],
            release: [0; UTS_FIELD_LEN],
            version: [0; UTS_FIELD_LEN],
            machine: [0; UTS_FIELD_LEN],
            domainname: [0; UTS_FIELD_LEN],
        };
        fill(&mut uts.sysname, b"CinderOS");
        fill(&mut uts.nodename, b"cinder");
        fill(&mut uts.release, env!("CARGO_PKG_VERSION").as_bytes());
        fill(&mut uts.version, b"cinder-kernel");
        fill(&mut uts.machine, b"i686");
        fill(&mut uts.domainname, b"(none)");
        uts
    }

    fn as_bytes(&self) -> &[u8] {
        // SAFETY: UtsName is repr(C), contains only byte arrays, and the
        // slice covers exactly the struct.
        unsafe {
            core::slice::from_raw_parts(
                self as *const UtsName as *const u8,
                core::mem::size_of::<UtsName>(),
            )
        }
    }
}

fn fill(field: &mut [u8; UTS_FIELD_LEN], value: &[u8]) {
    let n = value.len().min(UTS_FIELD_LEN - 1);
    field[..n].copy_from_slice(&value[..n]);
}

pub fn sys_exit(code: i32) -> KernelResult<isize> {
    sched::task_exit(code);
    // Unreachable on bare metal; the host build observes the zombie.
    Ok(0)
}

pub fn sys_getpid() -> KernelResult<isize> {
    let id = sched::current_task_id().map(|t| t.as_u32()).unwrap_or(0);
    Ok(id as isize)
}

pub fn sys_yield() -> KernelResult<isize> {
    sched::yield_now();
    Ok(0)
}

pub fn sys_sleep(ms: u64) -> KernelResult<isize> {
    sched::task_sleep(ms);
    Ok(0)
}

/// Milliseconds of uptime, truncated to the register width.
pub fn sys_gettime() -> KernelResult<isize> {
    Ok(timer::uptime_ms() as isize)
}

pub fn sys_uname(user_ptr: u32) -> KernelResult<isize> {
    let uts = UtsName::for_this_kernel();
    with_user_space(|space, access| {
        copy_to_user(space, access, user_ptr, uts.as_bytes())?;
        Ok(0)
    })
}

/// The calling task's working directory ("/" before the scheduler is up).
pub(crate) fn current_cwd() -> String {
    sched::with_scheduler(|s| {
        s.current()
            .and_then(|id| s.task(id))
            .map(|t| t.cwd.clone())
    })
    .ok()
    .flatten()
    .unwrap_or_else(|| String::from("/"))
}

/// Update the calling task's working directory.
pub(crate) fn set_current_cwd(cwd: String) -> KernelResult<()> {
    sched::with_scheduler(|s| {
        if let Some(task) = s.current().and_then(|id| s.task_mut(id)) {
            task.cwd = cwd;
        }
    })
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_uname_fields_are_nul_terminated() {
        let uts = UtsName::for_this_kernel();
        assert_eq!(core::mem::size_of::<UtsName>(), 6 * UTS_FIELD_LEN);
        for field in [
            &uts.sysname,
            &uts.nodename,
            &uts.release,
            &uts.version,
            &uts.machine,
            &uts.domainname,
        ] {
            assert_eq!(field[UTS_FIELD_LEN - 1], 0);
            assert!(field.contains(&0));
        }
        assert!(uts.sysname.starts_with(b"CinderOS"));
    }

    #[test]
    fn test_gettime_reflects_ticks() {
        let before = sys_gettime().unwrap();
        assert!(before >= 0);
    }
}
