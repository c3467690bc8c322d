// COM1 serial output for kernel logging

use core::fmt::{self, Write};

use spin::Mutex;
use x86::io::{inb, outb};

const COM1: u16 = 0x3F8;

/// Line-status bit: transmit holding register empty.
const LSR_THRE: u8 = 0x20;

pub struct SerialPort {
    base: u16,
}

impl SerialPort {
    pub const fn new(base: u16) -> Self {
        Self { base }
    }

    /// Program 115200 8N1 with FIFOs enabled.
    pub fn init(&mut self) {
        // SAFETY: standard 16550 init sequence on the COM1 register block.
        unsafe {
            outb(self.base + 1, 0x00); // disable interrupts
            outb(self.base + 3, 0x80); // DLAB on
            outb(self.base, 0x01); // divisor 1 = 115200 baud
            outb(self.base + 1, 0x00);
            outb(self.base + 3, 0x03); // 8N1, DLAB off
            outb(self.base + 2, 0xC7); // FIFO on, clear, 14-byte threshold
            outb(self.base + 4, 0x0B); // DTR | RTS | OUT2
        }
    }

    fn write_byte(&mut self, byte: u8) {
        // SAFETY: polling LSR then writing THR on the configured UART.
        unsafe {
            while inb(self.base + 5) & LSR_THRE == 0 {
                core::hint::spin_loop();
            }
            outb(self.base, byte);
        }
    }
}

impl Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

static SERIAL1: Mutex<SerialPort> = Mutex::new(SerialPort::new(COM1));

/// Initialize the boot console.
pub fn init() {
    SERIAL1.lock().init();
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    crate::arch::without_interrupts(|| {
        let _ = SERIAL1.lock().write_fmt(args);
    });
}
