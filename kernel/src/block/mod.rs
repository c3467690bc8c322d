//! Block I/O dispatch.
//!
//! A uniform 512-byte-sector read/write/flush surface over every storage
//! transport. Each registered disk gets a [`DiskId`]; partitions are
//! registered as wrapper disks that carry an LBA offset into their
//! parent. The dispatcher owns the routing rules: partition bounds
//! checks, the ATAPI 2048-byte translation, and forwarding to the
//! transport backends.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use crate::sync::IrqMutex;

pub mod ahci;
pub mod atapi;
pub mod pata;
pub mod usb_msc;

/// Sector size at the dispatcher boundary, regardless of the media.
pub const SECTOR_SIZE: usize = 512;

/// ATAPI (CD/DVD) media sector size.
pub const ATAPI_SECTOR_SIZE: usize = 2048;

/// Most sectors a single request may cover.
pub const MAX_SECTORS_PER_REQUEST: u32 = 65_536;

/// Stable disk identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DiskId(pub u32);

impl DiskId {
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// Transport class of a disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    PataDisk,
    PatapiCdrom,
    SataDisk,
    SatapiCdrom,
    UsbDisk,
}

impl TransportKind {
    /// Whether this transport speaks ATAPI (2048-byte packet device).
    pub fn is_atapi(self) -> bool {
        matches!(self, Self::PatapiCdrom | Self::SatapiCdrom)
    }
}

/// Block-layer error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    InvalidParam,
    NotInitialized,
    DeviceNotPresent,
    LbaOutOfRange,
    Timeout,
    /// ATA command completed with the error bit set.
    Ata,
    /// ATAPI packet failure, or an unsupported operation (writes).
    Atapi,
    /// Transport/controller level failure.
    Bus,
}

/// Partition wrapper data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionInfo {
    pub parent: DiskId,
    pub start_lba: u64,
}

/// Descriptor for one registered disk or partition.
#[derive(Debug, Clone)]
pub struct DiskInfo {
    pub id: DiskId,
    /// Drive number within its transport class.
    pub drive: u8,
    pub kind: TransportKind,
    /// Sector count in dispatcher (512-byte) sectors.
    pub sectors: u64,
    pub lba48: bool,
    pub present: bool,
    pub initialized: bool,
    pub partition: Option<PartitionInfo>,
}

/// Raw sector transport.
///
/// ATAPI backends operate in 2048-byte media sectors; everything else in
/// 512-byte sectors. The dispatcher performs the translation.
pub trait SectorIo: Send {
    fn read_sectors(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<(), DiskError>;
    fn write_sectors(&mut self, lba: u64, count: u32, data: &[u8]) -> Result<(), DiskError>;
    fn flush(&mut self) -> Result<(), DiskError>;
}

struct DiskSlot {
    info: DiskInfo,
    /// Transport backend; `None` for partitions (they forward to their
    /// parent's backend).
    io: Option<Box<dyn SectorIo>>,
}

/// The disk table plus dispatch logic.
pub struct DiskTable {
    disks: Vec<DiskSlot>,
}

impl DiskTable {
    pub const fn new() -> Self {
        Self { disks: Vec::new() }
    }

    /// Register a physical disk with its transport backend.
    pub fn register_disk(
        &mut self,
        drive: u8,
        kind: TransportKind,
        sectors: u64,
        lba48: bool,
        io: Box<dyn SectorIo>,
    ) -> DiskId {
        let id = DiskId(self.disks.len() as u32);
        log::info!(
            "block: disk{} registered ({:?} drive {}, {} sectors, lba48={})",
            id.as_u32(),
            kind,
            drive,
            sectors,
            lba48
        );
        self.disks.push(DiskSlot {
            info: DiskInfo {
                id,
                drive,
                kind,
                sectors,
                lba48,
                present: true,
                initialized: true,
                partition: None,
            },
            io: Some(io),
        });
        id
    }

    /// Register a partition of `parent` starting at `start_lba`.
    ///
    /// The partition must lie entirely inside the parent, and partitions
    /// of partitions are rejected.
    pub fn register_partition(
        &mut self,
        parent: DiskId,
        start_lba: u64,
        sectors: u64,
    ) -> Result<DiskId, DiskError> {
        let parent_info = self
            .disks
            .get(parent.as_u32() as usize)
            .map(|s| s.info.clone())
            .ok_or(DiskError::DeviceNotPresent)?;
        if parent_info.partition.is_some() {
            return Err(DiskError::InvalidParam);
        }
        let end = start_lba.checked_add(sectors).ok_or(DiskError::InvalidParam)?;
        if sectors == 0 || end > parent_info.sectors {
            return Err(DiskError::LbaOutOfRange);
        }

        let id = DiskId(self.disks.len() as u32);
        log::info!(
            "block: disk{} registered (partition of disk{} at lba {}, {} sectors)",
            id.as_u32(),
            parent.as_u32(),
            start_lba,
            sectors
        );
        self.disks.push(DiskSlot {
            info: DiskInfo {
                id,
                drive: parent_info.drive,
                kind: parent_info.kind,
                sectors,
                lba48: parent_info.lba48,
                present: true,
                initialized: true,
                partition: Some(PartitionInfo { parent, start_lba }),
            },
            io: None,
        });
        Ok(id)
    }

    pub fn info(&self, id: DiskId) -> Option<DiskInfo> {
        self.disks.get(id.as_u32() as usize).map(|s| s.info.clone())
    }

    pub fn disk_count(&self) -> usize {
        self.disks.len()
    }

    /// Resolve a request to (physical slot index, physical LBA), applying
    /// the partition offset and both bounds checks.
    fn resolve_request(&self, id: DiskId, lba: u64, count: u32) -> Result<(usize, u64), DiskError> {
        if count == 0 || count > MAX_SECTORS_PER_REQUEST {
            return Err(DiskError::InvalidParam);
        }
        let slot = self
            .disks
            .get(id.as_u32() as usize)
            .ok_or(DiskError::DeviceNotPresent)?;
        if !slot.info.present {
            return Err(DiskError::DeviceNotPresent);
        }
        if !slot.info.initialized {
            return Err(DiskError::NotInitialized);
        }

        let end = lba.checked_add(count as u64).ok_or(DiskError::LbaOutOfRange)?;
        if end > slot.info.sectors {
            return Err(DiskError::LbaOutOfRange);
        }

        match slot.info.partition {
            Some(part) => {
                // Re-validate against the physical disk after offsetting;
                // a partition table wider than the disk must not let a
                // request escape.
                let phys_lba = part.start_lba.checked_add(lba).ok_or(DiskError::LbaOutOfRange)?;
                let parent = self
                    .disks
                    .get(part.parent.as_u32() as usize)
                    .ok_or(DiskError::DeviceNotPresent)?;
                if !parent.info.present {
                    return Err(DiskError::DeviceNotPresent);
                }
                let phys_end = phys_lba
                    .checked_add(count as u64)
                    .ok_or(DiskError::LbaOutOfRange)?;
                if phys_end > parent.info.sectors {
                    return Err(DiskError::LbaOutOfRange);
                }
                Ok((part.parent.as_u32() as usize, phys_lba))
            }
            None => Ok((id.as_u32() as usize, lba)),
        }
    }

    /// Read `count` 512-byte sectors starting at `lba`.
    pub fn read(&mut self, id: DiskId, lba: u64, count: u32, buf: &mut [u8]) -> Result<(), DiskError> {
        if buf.len() < count as usize * SECTOR_SIZE {
            return Err(DiskError::InvalidParam);
        }
        let (slot_index, phys_lba) = self.resolve_request(id, lba, count)?;
        let slot = &mut self.disks[slot_index];
        let kind = slot.info.kind;
        let io = slot.io.as_mut().ok_or(DiskError::NotInitialized)?;

        if kind.is_atapi() {
            atapi::read_translated(io.as_mut(), phys_lba, count, buf)
        } else {
            io.read_sectors(phys_lba, count, &mut buf[..count as usize * SECTOR_SIZE])
        }
    }

    /// Write `count` 512-byte sectors starting at `lba`.
    pub fn write(&mut self, id: DiskId, lba: u64, count: u32, data: &[u8]) -> Result<(), DiskError> {
        if data.len() < count as usize * SECTOR_SIZE {
            return Err(DiskError::InvalidParam);
        }
        let (slot_index, phys_lba) = self.resolve_request(id, lba, count)?;
        let slot = &mut self.disks[slot_index];
        let kind = slot.info.kind;

        // Optical media is read-only through this kernel.
        if kind.is_atapi() {
            return Err(DiskError::Atapi);
        }

        let io = slot.io.as_mut().ok_or(DiskError::NotInitialized)?;
        io.write_sectors(phys_lba, count, &data[..count as usize * SECTOR_SIZE])
    }

    /// Flush the write cache of the disk backing `id`.
    pub fn flush(&mut self, id: DiskId) -> Result<(), DiskError> {
        let slot = self
            .disks
            .get(id.as_u32() as usize)
            .ok_or(DiskError::DeviceNotPresent)?;
        let target = match slot.info.partition {
            Some(part) => part.parent.as_u32() as usize,
            None => id.as_u32() as usize,
        };
        let slot = self.disks.get_mut(target).ok_or(DiskError::DeviceNotPresent)?;
        if slot.info.kind.is_atapi() {
            return Ok(());
        }
        let io = slot.io.as_mut().ok_or(DiskError::NotInitialized)?;
        io.flush()
    }
}

impl Default for DiskTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Global disk table; the channel registers are serialized by taking
/// this interrupts-off lock around every operation.
static DISKS: IrqMutex<DiskTable> = IrqMutex::new(DiskTable::new());

/// Run a closure against the global disk table.
pub fn with_disks<R>(f: impl FnOnce(&mut DiskTable) -> R) -> R {
    f(&mut DISKS.lock())
}

/// Dispatch a read to whichever transport backs `id`.
pub fn disk_read_dispatch(id: DiskId, lba: u64, count: u32, buf: &mut [u8]) -> Result<(), DiskError> {
    with_disks(|d| d.read(id, lba, count, buf))
}

/// Dispatch a write to whichever transport backs `id`.
pub fn disk_write_dispatch(id: DiskId, lba: u64, count: u32, data: &[u8]) -> Result<(), DiskError> {
    with_disks(|d| d.write(id, lba, count, data))
}

/// Flush the device cache behind `id`.
pub fn disk_flush_dispatch(id: DiskId) -> Result<(), DiskError> {
    with_disks(|d| d.flush(id))
}

/// In-memory disk backend used by the test suites (and as scratch media
/// for host-side tooling).
pub struct MemDisk {
    sectors: u64,
    sector_size: usize,
    data: Vec<u8>,
    pub reads: u32,
    pub writes: u32,
    pub flushes: u32,
    /// LBA of the most recent transport-level request (test observability).
    pub last_lba: u64,
    pub last_count: u32,
}

impl MemDisk {
    pub fn new(sectors: u64, sector_size: usize) -> Self {
        Self {
            sectors,
            sector_size,
            data: vec![0; sectors as usize * sector_size],
            reads: 0,
            writes: 0,
            flushes: 0,
            last_lba: 0,
            last_count: 0,
        }
    }

    pub fn fill_sector(&mut self, lba: u64, byte: u8) {
        let start = lba as usize * self.sector_size;
        self.data[start..start + self.sector_size].fill(byte);
    }
}

impl SectorIo for MemDisk {
    fn read_sectors(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<(), DiskError> {
        let end = lba + count as u64;
        if end > self.sectors {
            return Err(DiskError::LbaOutOfRange);
        }
        self.reads += 1;
        self.last_lba = lba;
        self.last_count = count;
        let start = lba as usize * self.sector_size;
        let len = count as usize * self.sector_size;
        buf[..len].copy_from_slice(&self.data[start..start + len]);
        Ok(())
    }

    fn write_sectors(&mut self, lba: u64, count: u32, data: &[u8]) -> Result<(), DiskError> {
        let end = lba + count as u64;
        if end > self.sectors {
            return Err(DiskError::LbaOutOfRange);
        }
        self.writes += 1;
        self.last_lba = lba;
        self.last_count = count;
        let start = lba as usize * self.sector_size;
        let len = count as usize * self.sector_size;
        self.data[start..start + len].copy_from_slice(&data[..len]);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DiskError> {
        self.flushes += 1;
        Ok(())
    }
}
