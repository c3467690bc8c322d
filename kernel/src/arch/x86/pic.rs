// Legacy 8259A programmable interrupt controller pair

use super::idt::IRQ_BASE;

/// Master PIC command/data ports.
const PIC1_CMD: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
/// Slave PIC command/data ports.
const PIC2_CMD: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

/// ICW1: initialization required, expect ICW4.
const ICW1_INIT: u8 = 0x11;
/// ICW4: 8086 mode.
const ICW4_8086: u8 = 0x01;
/// End-of-interrupt command.
const CMD_EOI: u8 = 0x20;

/// IRQ line the slave PIC cascades through on the master.
pub const CASCADE_IRQ: u8 = 2;

/// Vector the given legacy IRQ line is remapped to.
pub const fn vector_for_irq(irq: u8) -> u8 {
    IRQ_BASE + irq
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod hw {
    use super::*;
    use x86::io::{inb, outb};

    /// Small delay between PIC writes; port 0x80 is the POST diagnostic
    /// port and writing to it takes roughly one ISA bus cycle.
    fn io_wait() {
        // SAFETY: port 0x80 is write-only scratch on PC hardware.
        unsafe { outb(0x80, 0) };
    }

    /// Remap the PIC pair so IRQs 0-15 land on vectors 0x20-0x2F instead of
    /// colliding with the CPU exception range, then apply `mask`.
    ///
    /// Bit N of `mask` set = IRQ N masked. The cascade line is always left
    /// unmasked so slave IRQs can be delivered.
    pub fn remap_and_mask(mut mask: u16) {
        mask &= !(1 << CASCADE_IRQ as u16);

        // SAFETY: the ICW sequence below is the documented 8259 init
        // handshake; all ports belong to the PICs.
        unsafe {
            let saved1 = inb(PIC1_DATA);
            let saved2 = inb(PIC2_DATA);
            let _ = (saved1, saved2);

            outb(PIC1_CMD, ICW1_INIT);
            io_wait();
            outb(PIC2_CMD, ICW1_INIT);
            io_wait();
            outb(PIC1_DATA, IRQ_BASE); // ICW2: master vector offset
            io_wait();
            outb(PIC2_DATA, IRQ_BASE + 8); // ICW2: slave vector offset
            io_wait();
            outb(PIC1_DATA, 1 << CASCADE_IRQ); // ICW3: slave on IRQ2
            io_wait();
            outb(PIC2_DATA, CASCADE_IRQ); // ICW3: cascade identity
            io_wait();
            outb(PIC1_DATA, ICW4_8086);
            io_wait();
            outb(PIC2_DATA, ICW4_8086);
            io_wait();

            outb(PIC1_DATA, (mask & 0xFF) as u8);
            outb(PIC2_DATA, (mask >> 8) as u8);
        }

        log::debug!("pic: remapped to {:#x}..{:#x}, mask {:#06x}", IRQ_BASE, IRQ_BASE + 15, mask);
    }

    /// Acknowledge an IRQ. Slave IRQs need an EOI on both chips.
    pub fn end_of_interrupt(irq: u8) {
        // SAFETY: writing the EOI command to the PIC command ports.
        unsafe {
            if irq >= 8 {
                outb(PIC2_CMD, CMD_EOI);
            }
            outb(PIC1_CMD, CMD_EOI);
        }
    }

    /// Mask every line on both PICs (used when the APIC takes over).
    pub fn mask_all() {
        // SAFETY: writing all-ones masks to the PIC data ports.
        unsafe {
            outb(PIC1_DATA, 0xFF);
            outb(PIC2_DATA, 0xFF);
        }
    }

    /// Unmask a single IRQ line.
    pub fn unmask(irq: u8) {
        // SAFETY: read-modify-write of the PIC mask registers.
        unsafe {
            if irq < 8 {
                let mask = inb(PIC1_DATA);
                outb(PIC1_DATA, mask & !(1 << irq));
            } else {
                let mask = inb(PIC2_DATA);
                outb(PIC2_DATA, mask & !(1 << (irq - 8)));
            }
        }
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use hw::{end_of_interrupt, mask_all, remap_and_mask, unmask};

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_irq_vector_remapping() {
        assert_eq!(vector_for_irq(0), 0x20);
        assert_eq!(vector_for_irq(1), 0x21);
        assert_eq!(vector_for_irq(15), 0x2F);
    }
}
