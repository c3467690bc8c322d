//! Terminal output sink.
//!
//! fd 1 and fd 2 write here. The sink is pluggable: the VGA text writer
//! on bare metal, a capturing sink in tests. Writes are line buffered;
//! a newline (or an explicit flush) pushes the pending line out.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::sync::IrqMutex;

/// Where terminal bytes ultimately go.
pub trait TerminalSink: Send {
    fn write_bytes(&mut self, bytes: &[u8]);
}

/// Line-buffering front end over the active sink.
struct Terminal {
    sink: Option<Box<dyn TerminalSink>>,
    pending: Vec<u8>,
}

impl Terminal {
    const fn new() -> Self {
        Self {
            sink: None,
            pending: Vec::new(),
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        // Emit complete lines; keep the unfinished tail buffered.
        if let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') {
            let rest = self.pending.split_off(last_newline + 1);
            let line = core::mem::replace(&mut self.pending, rest);
            if let Some(sink) = self.sink.as_mut() {
                sink.write_bytes(&line);
            }
        }
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let line = core::mem::take(&mut self.pending);
        if let Some(sink) = self.sink.as_mut() {
            sink.write_bytes(&line);
        }
    }
}

static TERMINAL: IrqMutex<Terminal> = IrqMutex::new(Terminal::new());

/// Install the output sink, flushing anything buffered for a previous
/// one. Returns the old sink.
pub fn set_sink(sink: Box<dyn TerminalSink>) -> Option<Box<dyn TerminalSink>> {
    let mut term = TERMINAL.lock();
    term.flush();
    term.sink.replace(sink)
}

/// Write bytes to the terminal (fd 1/2 sink).
pub fn write(bytes: &[u8]) {
    TERMINAL.lock().write(bytes);
}

/// Flush any buffered partial line.
pub fn flush() {
    TERMINAL.lock().flush();
}

/// Capturing sink for tests: shares its buffer with the test body.
pub struct CaptureSink {
    buffer: alloc::sync::Arc<spin::Mutex<Vec<u8>>>,
}

impl CaptureSink {
    /// Returns the sink and the shared capture buffer.
    pub fn new() -> (Self, alloc::sync::Arc<spin::Mutex<Vec<u8>>>) {
        let buffer = alloc::sync::Arc::new(spin::Mutex::new(Vec::new()));
        (
            Self {
                buffer: alloc::sync::Arc::clone(&buffer),
            },
            buffer,
        )
    }
}

impl TerminalSink for CaptureSink {
    fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.lock().extend_from_slice(bytes);
    }
}

/// VGA text-mode sink (80x25, light grey on black).
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod vga {
    use super::TerminalSink;

    const VGA_BUFFER: usize = 0xB8000;
    const WIDTH: usize = 80;
    const HEIGHT: usize = 25;
    const ATTR: u8 = 0x07;

    pub struct VgaTextSink {
        row: usize,
        col: usize,
    }

    impl VgaTextSink {
        pub const fn new() -> Self {
            Self { row: 0, col: 0 }
        }

        fn cell(&self, row: usize, col: usize) -> *mut u16 {
            (VGA_BUFFER + (row * WIDTH + col) * 2) as *mut u16
        }

        fn put(&mut self, byte: u8) {
            match byte {
                b'\n' => {
                    self.col = 0;
                    self.row += 1;
                }
                b'\r' => self.col = 0,
                _ => {
                    // SAFETY: row/col stay inside the 80x25 text buffer,
                    // which is identity-mapped during mm init.
                    unsafe {
                        *self.cell(self.row, self.col) = u16::from(byte) | (u16::from(ATTR) << 8)
                    };
                    self.col += 1;
                    if self.col == WIDTH {
                        self.col = 0;
                        self.row += 1;
                    }
                }
            }
            if self.row == HEIGHT {
                self.scroll();
            }
        }

        fn scroll(&mut self) {
            for row in 1..HEIGHT {
                for col in 0..WIDTH {
                    // SAFETY: both cells are inside the text buffer.
                    unsafe { *self.cell(row - 1, col) = *self.cell(row, col) };
                }
            }
            for col in 0..WIDTH {
                // SAFETY: last row of the text buffer.
                unsafe { *self.cell(HEIGHT - 1, col) = u16::from(b' ') | (u16::from(ATTR) << 8) };
            }
            self.row = HEIGHT - 1;
        }
    }

    impl TerminalSink for VgaTextSink {
        fn write_bytes(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.put(b);
            }
        }
    }
}
