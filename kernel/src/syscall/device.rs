//! Device-control system call.

use crate::drivers::framework;
use crate::error::KernelResult;

use super::user_path;

/// `ioctl(driver_name, cmd, arg)`: drivers are addressed by their unique
/// registry name, not by device node.
pub fn sys_ioctl(name_ptr: u32, cmd: u32, arg: usize) -> KernelResult<isize> {
    let name = user_path(name_ptr)?;
    let value = framework::ioctl_by_name(&name, cmd, arg)?;
    Ok(value as isize)
}
