// Local APIC + IO-APIC support
//
// The ACPI tables themselves are parsed by an external collaborator; the
// kernel receives a ready-made `MadtInfo` and only programs the hardware.

use super::idt::IRQ_BASE;

/// Interrupt source override from the MADT.
///
/// Maps a legacy ISA IRQ onto a global system interrupt with explicit
/// polarity/trigger settings (the classic example: IRQ0 -> GSI2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceOverride {
    pub isa_irq: u8,
    pub gsi: u32,
    pub active_low: bool,
    pub level_triggered: bool,
}

/// Digest of the MADT handed over by the ACPI collaborator.
#[derive(Debug, Clone)]
pub struct MadtInfo {
    /// Physical MMIO base of the local APIC.
    pub lapic_base: u32,
    /// Physical MMIO base of the (first) IO-APIC.
    pub ioapic_base: u32,
    /// GSI number the IO-APIC's first input corresponds to.
    pub ioapic_gsi_base: u32,
    /// Interrupt source overrides, at most one per ISA IRQ.
    pub overrides: [Option<SourceOverride>; 16],
}

impl MadtInfo {
    /// Resolve a legacy IRQ to its global system interrupt, honoring
    /// source-override entries.
    pub fn gsi_for_irq(&self, irq: u8) -> u32 {
        for ovr in self.overrides.iter().flatten() {
            if ovr.isa_irq == irq {
                return ovr.gsi;
            }
        }
        irq as u32
    }

    /// Polarity/trigger for a legacy IRQ (ISA default: active high, edge).
    pub fn flags_for_irq(&self, irq: u8) -> (bool, bool) {
        for ovr in self.overrides.iter().flatten() {
            if ovr.isa_irq == irq {
                return (ovr.active_low, ovr.level_triggered);
            }
        }
        (false, false)
    }
}

/// Encode the low 32 bits of an IO-APIC redirection entry.
///
/// Fixed delivery, physical destination mode, unmasked unless requested.
pub fn redirection_entry_low(vector: u8, active_low: bool, level_triggered: bool, masked: bool) -> u32 {
    let mut entry = vector as u32;
    if active_low {
        entry |= 1 << 13;
    }
    if level_triggered {
        entry |= 1 << 15;
    }
    if masked {
        entry |= 1 << 16;
    }
    entry
}

/// Local APIC register offsets (from the MMIO base).
const LAPIC_REG_ID: u32 = 0x020;
const LAPIC_REG_EOI: u32 = 0x0B0;
const LAPIC_REG_SPURIOUS: u32 = 0x0F0;

/// Spurious-vector register: APIC software enable plus vector 0xFF.
const LAPIC_SW_ENABLE: u32 = 0x100;
const SPURIOUS_VECTOR: u32 = 0xFF;

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod hw {
    use super::*;
    use crate::sync::OnceLock;

    /// The active APIC configuration, set once during `init`.
    static APIC_CONFIG: OnceLock<MadtInfo> = OnceLock::new();

    /// Whether this CPU advertises a local APIC (CPUID.01h:EDX bit 9).
    pub fn cpu_has_apic() -> bool {
        let result = x86::cpuid::CpuId::new();
        result
            .get_feature_info()
            .map(|f| f.has_apic())
            .unwrap_or(false)
    }

    fn lapic_write(base: u32, reg: u32, value: u32) {
        // SAFETY: caller-provided MMIO base from the MADT; APIC registers
        // are 32-bit, 16-byte aligned and identity-mapped with caching
        // disabled by the MMU setup.
        unsafe { core::ptr::write_volatile((base + reg) as *mut u32, value) };
    }

    fn lapic_read(base: u32, reg: u32) -> u32 {
        // SAFETY: see `lapic_write`.
        unsafe { core::ptr::read_volatile((base + reg) as *const u32) }
    }

    fn ioapic_write(base: u32, reg: u32, value: u32) {
        // SAFETY: IO-APIC uses an index/data register pair at base/base+0x10.
        unsafe {
            core::ptr::write_volatile(base as *mut u32, reg);
            core::ptr::write_volatile((base + 0x10) as *mut u32, value);
        }
    }

    /// Switch interrupt delivery from the 8259 pair to the APIC.
    ///
    /// Masks the legacy PICs, software-enables the local APIC, and programs
    /// one redirection entry per legacy IRQ line, honoring MADT source
    /// overrides for the IRQ -> GSI mapping.
    pub fn init(madt: MadtInfo) -> Result<(), crate::KernelError> {
        if !cpu_has_apic() {
            return Err(crate::KernelError::NotFound { resource: "local APIC" });
        }

        super::super::pic::mask_all();

        lapic_write(
            madt.lapic_base,
            LAPIC_REG_SPURIOUS,
            LAPIC_SW_ENABLE | SPURIOUS_VECTOR,
        );
        let lapic_id = lapic_read(madt.lapic_base, LAPIC_REG_ID) >> 24;

        for irq in 0..16u8 {
            let gsi = madt.gsi_for_irq(irq);
            let (active_low, level) = madt.flags_for_irq(irq);
            let Some(pin) = gsi.checked_sub(madt.ioapic_gsi_base) else {
                continue;
            };
            let low = redirection_entry_low(IRQ_BASE + irq, active_low, level, false);
            ioapic_write(madt.ioapic_base, 0x10 + pin * 2, low);
            ioapic_write(madt.ioapic_base, 0x10 + pin * 2 + 1, lapic_id << 24);
        }

        let lapic_base = madt.lapic_base;
        APIC_CONFIG
            .set(madt)
            .map_err(|_| crate::KernelError::AlreadyExists { resource: "APIC config" })?;

        log::info!("apic: enabled, lapic {:#x} id {}, pic masked", lapic_base, lapic_id);
        Ok(())
    }

    /// Signal end-of-interrupt to the local APIC.
    pub fn end_of_interrupt() {
        if let Some(cfg) = APIC_CONFIG.get() {
            lapic_write(cfg.lapic_base, LAPIC_REG_EOI, 0);
        }
    }

    /// Whether the APIC path was brought up.
    pub fn is_active() -> bool {
        APIC_CONFIG.get().is_some()
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use hw::{cpu_has_apic, end_of_interrupt, init, is_active};

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn madt_with_timer_override() -> MadtInfo {
        let mut overrides = [None; 16];
        overrides[0] = Some(SourceOverride {
            isa_irq: 0,
            gsi: 2,
            active_low: false,
            level_triggered: false,
        });
        MadtInfo {
            lapic_base: 0xFEE0_0000,
            ioapic_base: 0xFEC0_0000,
            ioapic_gsi_base: 0,
            overrides,
        }
    }

    #[test]
    fn test_source_override_applies() {
        let madt = madt_with_timer_override();
        assert_eq!(madt.gsi_for_irq(0), 2);
        // IRQ1 has no override: identity mapping.
        assert_eq!(madt.gsi_for_irq(1), 1);
    }

    #[test]
    fn test_redirection_entry_encoding() {
        let low = redirection_entry_low(0x21, false, false, false);
        assert_eq!(low, 0x21);

        let low = redirection_entry_low(0x29, true, true, true);
        assert_eq!(low & 0xFF, 0x29);
        assert_ne!(low & (1 << 13), 0); // active low
        assert_ne!(low & (1 << 15), 0); // level triggered
        assert_ne!(low & (1 << 16), 0); // masked
    }
}
