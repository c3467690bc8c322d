//! Keyboard input queue.
//!
//! The IRQ1 handler decodes set-1 scancodes and pushes key codes into a
//! fixed ring buffer. Printable keys are their ASCII/Unicode code
//! points; non-printable navigation keys use negative sentinels, which
//! is the contract fd 0 exposes to user space.

use pc_keyboard::{layouts, DecodedKey, HandleControl, KeyCode, Keyboard, ScancodeSet1};
use spin::Mutex;

use crate::sync::IrqMutex;

/// Negative sentinels for non-printable keys.
pub const KEY_UP: i32 = -1;
pub const KEY_DOWN: i32 = -2;
pub const KEY_LEFT: i32 = -3;
pub const KEY_RIGHT: i32 = -4;
pub const KEY_HOME: i32 = -5;
pub const KEY_END: i32 = -6;
pub const KEY_PGUP: i32 = -7;
pub const KEY_PGDOWN: i32 = -8;
pub const KEY_INSERT: i32 = -9;
pub const KEY_DELETE: i32 = -10;

/// Ring capacity; excess keystrokes are dropped, not blocked on.
const QUEUE_CAPACITY: usize = 64;

/// Fixed-size ring buffer of key codes.
pub struct KeyQueue {
    buf: [i32; QUEUE_CAPACITY],
    head: usize,
    len: usize,
    /// Keys dropped because the ring was full.
    pub overruns: u32,
}

impl KeyQueue {
    pub const fn new() -> Self {
        Self {
            buf: [0; QUEUE_CAPACITY],
            head: 0,
            len: 0,
            overruns: 0,
        }
    }

    pub fn push(&mut self, key: i32) {
        if self.len == QUEUE_CAPACITY {
            self.overruns = self.overruns.wrapping_add(1);
            return;
        }
        let tail = (self.head + self.len) % QUEUE_CAPACITY;
        self.buf[tail] = key;
        self.len += 1;
    }

    pub fn pop(&mut self) -> Option<i32> {
        if self.len == 0 {
            return None;
        }
        let key = self.buf[self.head];
        self.head = (self.head + 1) % QUEUE_CAPACITY;
        self.len -= 1;
        Some(key)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

impl Default for KeyQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Global key queue, shared between the IRQ handler and syscalls.
static KEY_QUEUE: IrqMutex<KeyQueue> = IrqMutex::new(KeyQueue::new());

/// Scancode decoder state (modifiers, E0 prefixes).
static DECODER: Mutex<Option<Keyboard<layouts::Us104Key, ScancodeSet1>>> = Mutex::new(None);

/// Map a decoded key event to the queue encoding.
pub fn key_to_code(key: DecodedKey) -> Option<i32> {
    match key {
        DecodedKey::Unicode(c) => Some(c as i32),
        DecodedKey::RawKey(code) => match code {
            KeyCode::ArrowUp => Some(KEY_UP),
            KeyCode::ArrowDown => Some(KEY_DOWN),
            KeyCode::ArrowLeft => Some(KEY_LEFT),
            KeyCode::ArrowRight => Some(KEY_RIGHT),
            KeyCode::Home => Some(KEY_HOME),
            KeyCode::End => Some(KEY_END),
            KeyCode::PageUp => Some(KEY_PGUP),
            KeyCode::PageDown => Some(KEY_PGDOWN),
            KeyCode::Insert => Some(KEY_INSERT),
            KeyCode::Delete => Some(KEY_DELETE),
            _ => None,
        },
    }
}

/// Run one scancode byte through a decoder, yielding a key code when a
/// complete keystroke materializes.
pub fn decode_scancode(
    decoder: &mut Keyboard<layouts::Us104Key, ScancodeSet1>,
    scancode: u8,
) -> Option<i32> {
    let event = decoder.add_byte(scancode).ok().flatten()?;
    let key = decoder.process_keyevent(event)?;
    key_to_code(key)
}

/// Feed one raw scancode byte through the global decoder into the queue.
pub fn handle_scancode(scancode: u8) {
    let mut decoder = DECODER.lock();
    let keyboard = decoder.get_or_insert_with(|| {
        Keyboard::new(
            ScancodeSet1::new(),
            layouts::Us104Key,
            HandleControl::Ignore,
        )
    });
    if let Some(code) = decode_scancode(keyboard, scancode) {
        drop(decoder);
        push_key(code);
    }
}

/// Push a key code directly (used by tests and virtual terminals).
pub fn push_key(code: i32) {
    KEY_QUEUE.lock().push(code);
}

/// Non-blocking pop.
pub fn pop_key() -> Option<i32> {
    KEY_QUEUE.lock().pop()
}

/// Whether a key is waiting.
pub fn key_available() -> bool {
    !KEY_QUEUE.lock().is_empty()
}

/// Discard all pending input.
pub fn flush_keys() {
    KEY_QUEUE.lock().clear();
}

// ---------------------------------------------------------------------------
// Driver-framework integration
// ---------------------------------------------------------------------------

/// Driver-type tag for the keyboard.
pub const KEYBOARD_TYPE_TAG: u32 = 0x4B42_4431; // "KBD1"

/// Magic preamble expected at the head of a layout blob.
pub const LAYOUT_MAGIC: u32 = 0x4C59_4F31; // "LYO1"

/// ioctl: number of keys dropped to ring overruns.
pub const KBD_IOCTL_OVERRUNS: u32 = 1;
/// ioctl: queue depth right now.
pub const KBD_IOCTL_QUEUED: u32 = 2;

struct KeyboardDriverOps;

impl crate::drivers::framework::DriverOps for KeyboardDriverOps {
    fn ioctl(
        &self,
        _data: &mut [u8],
        cmd: u32,
        _arg: usize,
    ) -> Result<usize, crate::error::DriverError> {
        match cmd {
            KBD_IOCTL_OVERRUNS => Ok(KEY_QUEUE.lock().overruns as usize),
            KBD_IOCTL_QUEUED => Ok(KEY_QUEUE.lock().len()),
            _ => Err(crate::error::DriverError::OperationFailed),
        }
    }

    fn load_data(
        &self,
        _data: &mut [u8],
        bytes: &[u8],
    ) -> Result<(), crate::error::DriverError> {
        // The blob past the magic is a layout table; decoding stays with
        // the layout module, the framework only vets and hands it over.
        log::info!("keyboard: layout blob accepted ({} bytes)", bytes.len() - 4);
        Ok(())
    }
}

fn validate_layout(bytes: &[u8]) -> bool {
    bytes.len() >= 4
        && u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) == LAYOUT_MAGIC
}

/// Register the keyboard driver type and its instance.
pub fn register_driver() -> crate::error::KernelResult<crate::drivers::framework::DriverId> {
    use alloc::sync::Arc;

    crate::drivers::framework::with_drivers(|reg| {
        reg.register_type(crate::drivers::framework::DriverTypeInfo {
            tag: KEYBOARD_TYPE_TAG,
            name: "keyboard",
            ops: Arc::new(KeyboardDriverOps),
            private_size: 0,
            validate_data: Some(validate_layout),
        })?;
        let id = reg.create(KEYBOARD_TYPE_TAG, "kbd0", "1.0")?;
        reg.init(id, "")?;
        reg.start(id)?;
        Ok(id)
    })
}

/// IRQ1 handler: read the scancode port and decode.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn keyboard_irq(_irq: crate::irq::IrqNumber) {
    // SAFETY: port 0x60 is the 8042 output buffer; reading it also
    // acknowledges the byte to the controller.
    let scancode = unsafe { x86::io::inb(0x60) };
    handle_scancode(scancode);
}

/// Register the IRQ1 handler.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn init() {
    crate::irq::register_handler(crate::irq::IrqNumber::new(1), keyboard_irq);
    crate::arch::x86::pic::unmask(1);
    log::info!("keyboard: irq1 handler installed");
}
