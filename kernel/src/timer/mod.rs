//! System tick accounting.
//!
//! The periodic timer (PIT, or the LAPIC timer when the APIC path is
//! active) calls [`on_tick`] once per interval. The tick counter is the
//! kernel's monotonic clock: sleep durations, I/O timeouts and the
//! scheduler quantum are all expressed in ticks.

use core::sync::atomic::{AtomicU64, Ordering};

/// Timer interrupt rate. Fixed at init; 100 Hz gives 10 ms ticks.
pub const TICK_HZ: u64 = 100;

/// Milliseconds per tick at [`TICK_HZ`].
pub const MS_PER_TICK: u64 = 1000 / TICK_HZ;

/// Monotonically non-decreasing global tick counter.
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Current tick count.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Uptime in milliseconds.
pub fn uptime_ms() -> u64 {
    ticks() * MS_PER_TICK
}

/// Convert a millisecond duration to ticks, rounding up so a sleep never
/// wakes early.
pub fn ms_to_ticks(ms: u64) -> u64 {
    ms.div_ceil(MS_PER_TICK)
}

/// Convert ticks to milliseconds.
pub fn ticks_to_ms(t: u64) -> u64 {
    t * MS_PER_TICK
}

/// Timer interrupt body: advance the clock, wake sleepers, preempt.
///
/// Called from the IRQ0 handler with interrupts masked; must stay short.
pub fn on_tick() {
    let now = TICKS.fetch_add(1, Ordering::Relaxed) + 1;
    crate::sched::timer_tick(now);
}

/// Reset the clock (tests only; the kernel never rewinds time).
#[cfg(test)]
pub fn reset_for_test() {
    TICKS.store(0, Ordering::Relaxed);
}

/// Advance the clock without a hardware timer (tests only).
#[cfg(test)]
pub fn advance_for_test(n: u64) {
    for _ in 0..n {
        on_tick();
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_ms_tick_conversions() {
        assert_eq!(ms_to_ticks(50), 5);
        assert_eq!(ms_to_ticks(0), 0);
        // Partial ticks round up.
        assert_eq!(ms_to_ticks(1), 1);
        assert_eq!(ms_to_ticks(15), 2);
        assert_eq!(ticks_to_ms(5), 50);
    }
}
