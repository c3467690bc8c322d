//! AHCI (SATA) transport.
//!
//! The command structures (command list, command table, FIS, PRDT) are
//! plain memory layouts built by pure functions; only the port MMIO and
//! the DMA buffer plumbing are bare-metal. One command slot is used per
//! request, polled to completion.

use super::{DiskError, SECTOR_SIZE};

/// Host-to-device register FIS type byte.
pub const FIS_TYPE_REG_H2D: u8 = 0x27;

/// READ DMA EXT / WRITE DMA EXT.
pub const ATA_CMD_READ_DMA_EXT: u8 = 0x25;
pub const ATA_CMD_WRITE_DMA_EXT: u8 = 0x35;

/// Port registers (offsets from the port's register block).
pub const PORT_CLB: u32 = 0x00; // command list base
pub const PORT_FB: u32 = 0x08; // FIS base
pub const PORT_IS: u32 = 0x10; // interrupt status
pub const PORT_CMD: u32 = 0x18; // command and status
pub const PORT_TFD: u32 = 0x20; // task file data
pub const PORT_SIG: u32 = 0x24; // device signature
pub const PORT_SSTS: u32 = 0x28; // SATA status
pub const PORT_CI: u32 = 0x38; // command issue

/// PORT_CMD bits.
pub const CMD_ST: u32 = 1 << 0; // start processing
pub const CMD_FRE: u32 = 1 << 4; // FIS receive enable
pub const CMD_FR: u32 = 1 << 14; // FIS receive running
pub const CMD_CR: u32 = 1 << 15; // command list running

/// PORT_TFD bits (mirrors the ATA status register).
pub const TFD_ERR: u32 = 1 << 0;
pub const TFD_BSY: u32 = 1 << 7;

/// Device signatures.
pub const SIG_SATA_DISK: u32 = 0x0000_0101;
pub const SIG_SATAPI: u32 = 0xEB14_0101;

/// Size of one command table in the per-port DMA area.
pub const COMMAND_TABLE_SIZE: usize = 0x100;

/// Maximum bytes one PRDT entry may describe (4 MiB, encoded as len-1).
pub const PRDT_MAX_BYTES: usize = 4 * 1024 * 1024;

/// A 32-byte command header (entry in the command list).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandHeader {
    /// Flags word: FIS length in dwords (bits 0-4), write (bit 6),
    /// PRDT length in the high 16 bits.
    pub flags: u16,
    pub prdt_length: u16,
    /// Bytes transferred, updated by the HBA.
    pub prd_byte_count: u32,
    pub command_table_base: u32,
    pub command_table_base_high: u32,
    pub reserved: [u32; 4],
}

impl CommandHeader {
    /// Build a header for one command table with `prdt_entries` entries.
    pub fn new(table_phys: u32, prdt_entries: u16, write: bool) -> Self {
        // The register H2D FIS is 5 dwords.
        let mut flags: u16 = 5;
        if write {
            flags |= 1 << 6;
        }
        Self {
            flags,
            prdt_length: prdt_entries,
            prd_byte_count: 0,
            command_table_base: table_phys,
            command_table_base_high: 0,
            reserved: [0; 4],
        }
    }
}

/// A physical region descriptor (PRDT entry).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PrdtEntry {
    pub data_base: u32,
    pub data_base_high: u32,
    pub reserved: u32,
    /// Byte count minus one, interrupt-on-completion in bit 31.
    pub byte_count: u32,
}

impl PrdtEntry {
    pub fn new(phys: u32, bytes: usize, interrupt: bool) -> Self {
        debug_assert!(bytes > 0 && bytes <= PRDT_MAX_BYTES);
        let mut byte_count = (bytes - 1) as u32;
        if interrupt {
            byte_count |= 1 << 31;
        }
        Self {
            data_base: phys,
            data_base_high: 0,
            reserved: 0,
            byte_count,
        }
    }
}

/// Serialize a register host-to-device FIS for a 48-bit LBA command.
///
/// Returns the 20-byte FIS image placed at the head of a command table.
pub fn build_h2d_fis(command: u8, lba: u64, count: u16) -> [u8; 20] {
    let mut fis = [0u8; 20];
    fis[0] = FIS_TYPE_REG_H2D;
    fis[1] = 1 << 7; // command (not control) update
    fis[2] = command;
    fis[3] = 0; // features
    fis[4] = lba as u8;
    fis[5] = (lba >> 8) as u8;
    fis[6] = (lba >> 16) as u8;
    fis[7] = 0x40; // LBA mode
    fis[8] = (lba >> 24) as u8;
    fis[9] = (lba >> 32) as u8;
    fis[10] = (lba >> 40) as u8;
    fis[12] = count as u8;
    fis[13] = (count >> 8) as u8;
    fis
}

/// Decode an AHCI port signature into a transport kind.
pub fn classify_signature(sig: u32) -> Option<super::TransportKind> {
    match sig {
        SIG_SATA_DISK => Some(super::TransportKind::SataDisk),
        SIG_SATAPI => Some(super::TransportKind::SatapiCdrom),
        _ => None,
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod hw {
    use super::*;
    use crate::block::SectorIo;
    use crate::mm::PhysAddr;
    use crate::timer;

    /// Iteration cap for polls, mirroring the PATA wait contract.
    const POLL_SPIN_CAP: u32 = 1_000_000;
    const POLL_TIMEOUT_MS: u64 = 1000;

    /// One brought-up AHCI port with its DMA area.
    ///
    /// The DMA area layout (one page is enough for a single slot):
    /// command list at +0x000, received FIS at +0x400, command table at
    /// +0x500. The bounce buffer holds one request's data.
    pub struct AhciPort {
        /// MMIO base of this port's register block.
        port_base: u32,
        /// Physical/virtual address of the DMA area (identity mapped).
        dma_base: u32,
        /// Bounce buffer for transfers.
        bounce: PhysAddr,
        bounce_bytes: usize,
        sectors: u64,
    }

    impl AhciPort {
        /// Adopt a port that the init path has already put in a running
        /// state (FRE+ST set, bases programmed).
        ///
        /// # Safety
        ///
        /// `port_base` must be the MMIO block of a started AHCI port and
        /// `dma_base`/`bounce` identity-mapped, cache-coherent memory
        /// owned by this port.
        pub unsafe fn adopt(
            port_base: u32,
            dma_base: u32,
            bounce: PhysAddr,
            bounce_bytes: usize,
            sectors: u64,
        ) -> Self {
            Self {
                port_base,
                dma_base,
                bounce,
                bounce_bytes,
                sectors,
            }
        }

        fn reg_read(&self, offset: u32) -> u32 {
            // SAFETY: offset stays within the port register block whose
            // MMIO mapping the constructor contract guarantees.
            unsafe { core::ptr::read_volatile((self.port_base + offset) as *const u32) }
        }

        fn reg_write(&self, offset: u32, value: u32) {
            // SAFETY: see `reg_read`.
            unsafe { core::ptr::write_volatile((self.port_base + offset) as *mut u32, value) }
        }

        /// Build slot 0 and issue it, polling for completion.
        fn run_command(&mut self, command: u8, lba: u64, count: u16, bytes: usize, write: bool) -> Result<(), DiskError> {
            let table_phys = self.dma_base + 0x500;

            // Command table: FIS image then the PRDT at +0x80.
            let fis = build_h2d_fis(command, lba, count);
            // SAFETY: the DMA area belongs to this port (adopt contract).
            unsafe {
                core::ptr::copy_nonoverlapping(fis.as_ptr(), table_phys as *mut u8, fis.len());
                let prdt = (table_phys + 0x80) as *mut PrdtEntry;
                *prdt = PrdtEntry::new(self.bounce.as_u32(), bytes, false);
                let header = self.dma_base as *mut CommandHeader;
                *header = CommandHeader::new(table_phys, 1, write);
            }

            // Clear stale interrupt status, fire slot 0.
            self.reg_write(PORT_IS, u32::MAX);
            self.reg_write(PORT_CI, 1);

            let deadline = timer::ticks() + timer::ms_to_ticks(POLL_TIMEOUT_MS);
            for _ in 0..POLL_SPIN_CAP {
                if self.reg_read(PORT_CI) & 1 == 0 {
                    break;
                }
                if self.reg_read(PORT_TFD) & TFD_ERR != 0 {
                    return Err(DiskError::Ata);
                }
                if timer::ticks() >= deadline {
                    return Err(DiskError::Timeout);
                }
                core::hint::spin_loop();
            }
            if self.reg_read(PORT_CI) & 1 != 0 {
                return Err(DiskError::Timeout);
            }
            if self.reg_read(PORT_TFD) & TFD_ERR != 0 {
                return Err(DiskError::Ata);
            }
            Ok(())
        }
    }

    impl SectorIo for AhciPort {
        fn read_sectors(&mut self, mut lba: u64, count: u32, buf: &mut [u8]) -> Result<(), DiskError> {
            if lba + count as u64 > self.sectors {
                return Err(DiskError::LbaOutOfRange);
            }
            let max_chunk = (self.bounce_bytes / SECTOR_SIZE) as u32;
            let mut remaining = count;
            let mut offset = 0usize;
            while remaining > 0 {
                let chunk = remaining.min(max_chunk);
                let bytes = chunk as usize * SECTOR_SIZE;
                self.run_command(ATA_CMD_READ_DMA_EXT, lba, chunk as u16, bytes, false)?;
                // SAFETY: the bounce buffer is identity-mapped and was
                // just filled by the HBA.
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        self.bounce.as_usize() as *const u8,
                        buf[offset..].as_mut_ptr(),
                        bytes,
                    );
                }
                lba += chunk as u64;
                remaining -= chunk;
                offset += bytes;
            }
            Ok(())
        }

        fn write_sectors(&mut self, mut lba: u64, count: u32, data: &[u8]) -> Result<(), DiskError> {
            if lba + count as u64 > self.sectors {
                return Err(DiskError::LbaOutOfRange);
            }
            let max_chunk = (self.bounce_bytes / SECTOR_SIZE) as u32;
            let mut remaining = count;
            let mut offset = 0usize;
            while remaining > 0 {
                let chunk = remaining.min(max_chunk);
                let bytes = chunk as usize * SECTOR_SIZE;
                // SAFETY: bounce buffer owned by this port.
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        data[offset..].as_ptr(),
                        self.bounce.as_usize() as *mut u8,
                        bytes,
                    );
                }
                self.run_command(ATA_CMD_WRITE_DMA_EXT, lba, chunk as u16, bytes, true)?;
                lba += chunk as u64;
                remaining -= chunk;
                offset += bytes;
            }
            Ok(())
        }

        fn flush(&mut self) -> Result<(), DiskError> {
            // FLUSH CACHE EXT through the same slot machinery.
            self.run_command(0xEA, 0, 0, SECTOR_SIZE, false)
        }
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use hw::AhciPort;

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_h2d_fis_layout() {
        let fis = build_h2d_fis(ATA_CMD_READ_DMA_EXT, 0x0000_0123_4567_89AB, 16);
        assert_eq!(fis[0], FIS_TYPE_REG_H2D);
        assert_eq!(fis[1], 0x80); // command update
        assert_eq!(fis[2], ATA_CMD_READ_DMA_EXT);
        // LBA bytes little-end first across the split fields.
        assert_eq!(fis[4], 0xAB);
        assert_eq!(fis[5], 0x89);
        assert_eq!(fis[6], 0x67);
        assert_eq!(fis[7], 0x40); // LBA mode
        assert_eq!(fis[8], 0x45);
        assert_eq!(fis[9], 0x23);
        assert_eq!(fis[10], 0x01);
        assert_eq!(fis[12], 16);
        assert_eq!(fis[13], 0);
    }

    #[test]
    fn test_command_header_encoding() {
        let h = CommandHeader::new(0x8040_0000, 2, true);
        assert_eq!(h.flags & 0x1F, 5); // FIS dwords
        assert_ne!(h.flags & (1 << 6), 0); // write
        assert_eq!(h.prdt_length, 2);
        assert_eq!(h.command_table_base, 0x8040_0000);

        let h = CommandHeader::new(0x1000, 1, false);
        assert_eq!(h.flags & (1 << 6), 0);
    }

    #[test]
    fn test_prdt_entry_encodes_len_minus_one() {
        let e = PrdtEntry::new(0x10_0000, 4096, false);
        assert_eq!(e.byte_count, 4095);
        let e = PrdtEntry::new(0x10_0000, 512, true);
        assert_eq!(e.byte_count & 0x3F_FFFF, 511);
        assert_ne!(e.byte_count & (1 << 31), 0);
    }

    #[test]
    fn test_signature_classification() {
        assert_eq!(
            classify_signature(SIG_SATA_DISK),
            Some(crate::block::TransportKind::SataDisk)
        );
        assert_eq!(
            classify_signature(SIG_SATAPI),
            Some(crate::block::TransportKind::SatapiCdrom)
        );
        assert_eq!(classify_signature(0xFFFF_FFFF), None);
    }

    #[test]
    fn test_struct_sizes_match_spec() {
        assert_eq!(core::mem::size_of::<CommandHeader>(), 32);
        assert_eq!(core::mem::size_of::<PrdtEntry>(), 16);
    }
}
