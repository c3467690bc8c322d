//! Terminal/keyboard system calls.
//!
//! These mirror the classic console API: `readkey` delivers raw key
//! codes (including the negative navigation sentinels), `getc` delivers
//! the next printable character, `gets` reads a line. Blocking variants
//! block-with-yield on the keyboard queue.

use alloc::vec::Vec;

use crate::drivers::keyboard;
use crate::error::KernelResult;
use crate::mm::user_validation::copy_to_user;
use crate::sched;

use super::with_user_space;

/// Pop a key, yielding until one arrives.
fn wait_key() -> i32 {
    loop {
        if let Some(code) = keyboard::pop_key() {
            return code;
        }
        sched::yield_now();
    }
}

/// Blocking read of the next key code (sentinels included).
///
/// The return value is a key code, not an errno: negative values here
/// are the navigation sentinels (-1 through -10).
pub fn sys_readkey() -> KernelResult<isize> {
    Ok(wait_key() as isize)
}

/// 1 when a key is buffered, 0 otherwise.
pub fn sys_key_available() -> KernelResult<isize> {
    Ok(keyboard::key_available() as isize)
}

/// Blocking read of the next printable (ASCII) character; navigation
/// keys are skipped.
pub fn sys_getc() -> KernelResult<isize> {
    loop {
        let code = wait_key();
        if (0..=0x7F).contains(&code) {
            return Ok(code as isize);
        }
    }
}

/// Read a line into a user buffer: up to `max - 1` bytes, stopping at
/// newline (stored), always NUL-terminated. Returns bytes stored before
/// the NUL.
pub fn sys_gets(buf_ptr: u32, max: usize) -> KernelResult<isize> {
    if max == 0 {
        return Ok(0);
    }
    let mut line: Vec<u8> = Vec::new();
    while line.len() < max - 1 {
        let code = wait_key();
        if !(0..=0x7F).contains(&code) {
            continue;
        }
        let byte = code as u8;
        if byte == b'\x08' {
            // Backspace edits the pending line.
            line.pop();
            continue;
        }
        line.push(byte);
        if byte == b'\n' {
            break;
        }
    }
    line.push(0);

    with_user_space(|space, access| copy_to_user(space, access, buf_ptr, &line))?;
    Ok((line.len() - 1) as isize)
}

/// Alias of `key_available` kept for the classic console API.
pub fn sys_kbhit() -> KernelResult<isize> {
    sys_key_available()
}

/// Discard buffered input.
pub fn sys_kbflush() -> KernelResult<isize> {
    keyboard::flush_keys();
    Ok(0)
}
