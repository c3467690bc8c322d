//! ATAPI (packet device) sector translation.
//!
//! CD/DVD media use 2048-byte sectors while the dispatcher boundary is
//! fixed at 512 bytes. Reads are translated: the covering 2048-byte
//! range is fetched into an intermediate buffer and the requested slice
//! copied out. Writes to packet devices are rejected by the dispatcher.

use alloc::vec;

use super::{DiskError, SectorIo, ATAPI_SECTOR_SIZE, SECTOR_SIZE};

/// 512-byte sectors per media sector.
const RATIO: u64 = (ATAPI_SECTOR_SIZE / SECTOR_SIZE) as u64;

/// Compute the 2048-byte-sector window covering a 512-byte request.
///
/// Returns (media LBA, media count, byte offset of the requested data
/// within the window).
pub fn translate_request(lba: u64, count: u32) -> (u64, u32, usize) {
    let media_lba = lba / RATIO;
    let first_byte = (lba % RATIO) as usize * SECTOR_SIZE;
    let total_bytes = first_byte + count as usize * SECTOR_SIZE;
    let media_count = total_bytes.div_ceil(ATAPI_SECTOR_SIZE) as u32;
    (media_lba, media_count, first_byte)
}

/// Read 512-byte sectors from a 2048-byte-sector backend.
pub fn read_translated(
    io: &mut dyn SectorIo,
    lba: u64,
    count: u32,
    buf: &mut [u8],
) -> Result<(), DiskError> {
    let (media_lba, media_count, offset) = translate_request(lba, count);

    let mut staging = vec![0u8; media_count as usize * ATAPI_SECTOR_SIZE];
    io.read_sectors(media_lba, media_count, &mut staging)?;

    let wanted = count as usize * SECTOR_SIZE;
    buf[..wanted].copy_from_slice(&staging[offset..offset + wanted]);
    Ok(())
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::super::MemDisk;
    use super::*;

    #[test]
    fn test_translate_aligned() {
        // 512-LBA 0..4 is exactly media sector 0.
        assert_eq!(translate_request(0, 4), (0, 1, 0));
        // 512-LBA 4..8 is media sector 1.
        assert_eq!(translate_request(4, 4), (1, 1, 0));
    }

    #[test]
    fn test_translate_unaligned() {
        // 512-LBA 3, one sector: media sector 0, data at byte 1536.
        assert_eq!(translate_request(3, 1), (0, 1, 1536));
        // 512-LBA 3..9 straddles media sectors 0-2.
        assert_eq!(translate_request(3, 6), (0, 2, 1536));
    }

    #[test]
    fn test_read_translated_slices_correctly() {
        let mut media = MemDisk::new(16, ATAPI_SECTOR_SIZE);
        // Distinct fill per media sector so slicing errors show up.
        for s in 0..16 {
            media.fill_sector(s, s as u8 + 1);
        }

        // Read 512-sectors 6..10: media sector 1 (bytes 1024..2048) and
        // media sector 2 (bytes 0..1024).
        let mut buf = vec![0u8; 4 * SECTOR_SIZE];
        read_translated(&mut media, 6, 4, &mut buf).unwrap();
        assert!(buf[..2 * SECTOR_SIZE].iter().all(|&b| b == 2));
        assert!(buf[2 * SECTOR_SIZE..].iter().all(|&b| b == 3));

        // The backend saw a single media-sector request pair.
        assert_eq!(media.last_lba, 1);
        assert_eq!(media.last_count, 2);
    }

    #[test]
    fn test_read_translated_propagates_backend_errors() {
        let mut media = MemDisk::new(2, ATAPI_SECTOR_SIZE);
        let mut buf = vec![0u8; SECTOR_SIZE];
        // 512-LBA 100 is far past the 2-media-sector device.
        assert_eq!(
            read_translated(&mut media, 100, 1, &mut buf),
            Err(DiskError::LbaOutOfRange)
        );
    }
}
