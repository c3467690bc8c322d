//! USB mass-storage forwarding.
//!
//! The USB host-controller stack and the MSC class driver live outside
//! the core; they register a set of forwarding hooks here. The
//! dispatcher routes `UsbDisk` requests through [`UsbMscIo`], which
//! forwards to whatever is registered (or reports the device missing).

use spin::RwLock;

use super::{DiskError, SectorIo};

/// Hooks the external USB-MSC driver installs.
#[derive(Clone, Copy)]
pub struct UsbMscOps {
    pub read: fn(drive: u8, lba: u64, count: u32, buf: &mut [u8]) -> Result<(), DiskError>,
    pub write: fn(drive: u8, lba: u64, count: u32, data: &[u8]) -> Result<(), DiskError>,
    pub flush: fn(drive: u8) -> Result<(), DiskError>,
}

static USB_MSC_OPS: RwLock<Option<UsbMscOps>> = RwLock::new(None);

/// Install (or replace) the forwarding hooks.
pub fn register_ops(ops: UsbMscOps) {
    *USB_MSC_OPS.write() = Some(ops);
    log::info!("block: usb-msc forwarding hooks registered");
}

/// Remove the hooks (driver teardown).
pub fn unregister_ops() {
    *USB_MSC_OPS.write() = None;
}

/// Transport backend for one USB mass-storage drive.
pub struct UsbMscIo {
    drive: u8,
}

impl UsbMscIo {
    pub const fn new(drive: u8) -> Self {
        Self { drive }
    }
}

fn current_ops() -> Result<UsbMscOps, DiskError> {
    USB_MSC_OPS
        .read()
        .as_ref()
        .copied()
        .ok_or(DiskError::DeviceNotPresent)
}

impl SectorIo for UsbMscIo {
    fn read_sectors(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<(), DiskError> {
        let ops = current_ops()?;
        (ops.read)(self.drive, lba, count, buf)
    }

    fn write_sectors(&mut self, lba: u64, count: u32, data: &[u8]) -> Result<(), DiskError> {
        let ops = current_ops()?;
        (ops.write)(self.drive, lba, count, data)
    }

    fn flush(&mut self) -> Result<(), DiskError> {
        let ops = current_ops()?;
        (ops.flush)(self.drive)
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::block::SECTOR_SIZE;
    use std::vec;

    fn stub_read(drive: u8, _lba: u64, count: u32, buf: &mut [u8]) -> Result<(), DiskError> {
        buf[..count as usize * SECTOR_SIZE].fill(drive);
        Ok(())
    }

    fn stub_write(_drive: u8, _lba: u64, _count: u32, _data: &[u8]) -> Result<(), DiskError> {
        Ok(())
    }

    fn stub_flush(_drive: u8) -> Result<(), DiskError> {
        Ok(())
    }

    #[test]
    fn test_forwarding_and_unregistered_error() {
        let mut io = UsbMscIo::new(3);
        let mut buf = vec![0u8; SECTOR_SIZE];

        unregister_ops();
        assert_eq!(
            io.read_sectors(0, 1, &mut buf),
            Err(DiskError::DeviceNotPresent)
        );

        register_ops(UsbMscOps {
            read: stub_read,
            write: stub_write,
            flush: stub_flush,
        });
        io.read_sectors(0, 1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 3));
        io.flush().unwrap();
        unregister_ops();
    }
}
