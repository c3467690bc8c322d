// 8253/8254 programmable interval timer

/// Base oscillator frequency of the PIT in Hz.
pub const PIT_BASE_HZ: u32 = 1_193_182;

/// Channel 0 data port and mode/command port.
const PIT_CH0_DATA: u16 = 0x40;
const PIT_MODE_CMD: u16 = 0x43;

/// Mode/command byte: channel 0, lobyte/hibyte access, mode 3
/// (square wave), binary counting.
const PIT_CH0_SQUARE_WAVE: u8 = 0x36;

/// Compute the 16-bit divisor for a requested tick rate.
///
/// The hardware reloads on a 16-bit counter, so rates below ~19 Hz clamp
/// to the maximum divisor and very high rates clamp to 1.
pub fn divisor_for_hz(hz: u32) -> u16 {
    if hz == 0 {
        return u16::MAX;
    }
    let divisor = PIT_BASE_HZ / hz;
    if divisor > u16::MAX as u32 {
        u16::MAX
    } else if divisor == 0 {
        1
    } else {
        divisor as u16
    }
}

/// The actual rate produced by a divisor (for drift accounting).
pub fn actual_hz(divisor: u16) -> u32 {
    PIT_BASE_HZ / divisor as u32
}

/// Program channel 0 to fire IRQ0 at (approximately) `hz`.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn init(hz: u32) {
    use x86::io::outb;

    let divisor = divisor_for_hz(hz);
    // SAFETY: command + lobyte/hibyte reload sequence on the PIT ports.
    unsafe {
        outb(PIT_MODE_CMD, PIT_CH0_SQUARE_WAVE);
        outb(PIT_CH0_DATA, (divisor & 0xFF) as u8);
        outb(PIT_CH0_DATA, (divisor >> 8) as u8);
    }
    log::info!("pit: {} Hz requested, divisor {} ({} Hz actual)", hz, divisor, actual_hz(divisor));
}
