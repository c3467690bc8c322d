//! Hardware IRQ dispatch.
//!
//! Device drivers register a handler per IRQ line; the trap layer calls
//! [`dispatch`] which runs the handler and acknowledges the interrupt on
//! whichever controller (legacy PIC pair or APIC) is active. Handlers run
//! in interrupt context: they must never block, only enqueue work.

use spin::Mutex;

/// Architecture-independent IRQ line number (0-15 on the legacy PIC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IrqNumber(pub u32);

impl IrqNumber {
    pub const fn new(irq: u32) -> Self {
        Self(irq)
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for IrqNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "IRQ#{}", self.0)
    }
}

/// IRQ handler: invoked with the line that fired.
pub type IrqHandler = fn(IrqNumber);

/// Number of dispatchable lines.
pub const IRQ_COUNT: usize = 16;

/// Which interrupt controller acknowledges IRQs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    Pic,
    Apic,
}

struct IrqTable {
    handlers: [Option<IrqHandler>; IRQ_COUNT],
    controller: ControllerKind,
    /// Count of spurious (unhandled) interrupts per line.
    spurious: [u32; IRQ_COUNT],
}

static IRQ_TABLE: Mutex<IrqTable> = Mutex::new(IrqTable {
    handlers: [None; IRQ_COUNT],
    controller: ControllerKind::Pic,
    spurious: [0; IRQ_COUNT],
});

/// Register a handler for an IRQ line.
///
/// Returns the previous handler if one was installed.
pub fn register_handler(irq: IrqNumber, handler: IrqHandler) -> Option<IrqHandler> {
    let mut table = IRQ_TABLE.lock();
    let slot = &mut table.handlers[irq.as_u32() as usize % IRQ_COUNT];
    slot.replace(handler)
}

/// Remove the handler for an IRQ line.
pub fn unregister_handler(irq: IrqNumber) -> Option<IrqHandler> {
    IRQ_TABLE.lock().handlers[irq.as_u32() as usize % IRQ_COUNT].take()
}

/// Record which controller is live so EOIs go to the right place.
pub fn set_controller(kind: ControllerKind) {
    IRQ_TABLE.lock().controller = kind;
}

/// Dispatch an IRQ from the trap layer.
///
/// The handler runs before the EOI; the controller is acknowledged even
/// when no handler is registered, otherwise the line would wedge.
pub fn dispatch(irq: IrqNumber) {
    let index = irq.as_u32() as usize;
    if index >= IRQ_COUNT {
        return;
    }

    let (handler, controller) = {
        let mut table = IRQ_TABLE.lock();
        let handler = table.handlers[index];
        if handler.is_none() {
            table.spurious[index] = table.spurious[index].wrapping_add(1);
        }
        (handler, table.controller)
    };

    if let Some(handler) = handler {
        handler(irq);
    }

    acknowledge(irq, controller);
}

/// Spurious-interrupt count for one line (diagnostics).
pub fn spurious_count(irq: IrqNumber) -> u32 {
    IRQ_TABLE.lock().spurious[irq.as_u32() as usize % IRQ_COUNT]
}

fn acknowledge(irq: IrqNumber, controller: ControllerKind) {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    match controller {
        ControllerKind::Pic => crate::arch::x86::pic::end_of_interrupt(irq.as_u32() as u8),
        ControllerKind::Apic => crate::arch::x86::apic::end_of_interrupt(),
    }
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    let _ = (irq, controller);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    static FIRED: AtomicU32 = AtomicU32::new(0);

    fn count_handler(_irq: IrqNumber) {
        FIRED.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn test_register_dispatch_unregister() {
        FIRED.store(0, Ordering::Relaxed);
        let line = IrqNumber::new(5);
        assert!(register_handler(line, count_handler).is_none());

        dispatch(line);
        dispatch(line);
        assert_eq!(FIRED.load(Ordering::Relaxed), 2);

        assert!(unregister_handler(line).is_some());
        let spurious_before = spurious_count(line);
        dispatch(line);
        assert_eq!(FIRED.load(Ordering::Relaxed), 2);
        assert_eq!(spurious_count(line), spurious_before + 1);
    }

    #[test]
    fn test_out_of_range_dispatch_is_ignored() {
        // Must not panic or wrap into a valid slot.
        dispatch(IrqNumber::new(99));
    }

    #[test]
    fn test_replacing_handler_returns_previous() {
        let line = IrqNumber::new(7);
        register_handler(line, count_handler);
        let prev = register_handler(line, count_handler);
        assert!(prev.is_some());
        unregister_handler(line);
    }
}
