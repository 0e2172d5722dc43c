//! Block Scanner
//!
//! Walks an area from its first byte, recognising block headers and skipping
//! empty space, to rebuild the address-ordered block list.
//!
//! ## Alignment Rules
//! - empty at an erase-block boundary: the whole erase block is empty
//!   (the write path only ever leaves empty space at the start of a fully
//!   erased erase block), skip to the next erase-block boundary
//! - empty elsewhere: skip one write page
//! - variable-length block: next header starts at the next 4-byte boundary
//!   past the payload
//! - fixed-length block: next header starts at the next write page
//!
//! Any header with the magic but an unknown version or a bad checksum stops
//! the scan. Offsets of everything after it cannot be trusted.

use tracing::debug;

use crate::device::{Area, FlashDevice, Geometry, Region};
use crate::error::{CalError, Result, ScanError};

use super::{align_up, Block, BlockHeader, BlockList, HEADER_SIZE, HEADER_VERSION};

/// Alignment of packed variable-length blocks
const WORD_ALIGN: u64 = 4;

/// Scan every region of an area, concatenating the results in region order
pub fn scan_area<D: FlashDevice + ?Sized>(
    device: &mut D,
    area: Area,
    regions: &[Region],
    geometry: &Geometry,
) -> Result<BlockList> {
    let mut list = BlockList::new();
    for region in regions {
        scan_region(device, area, *region, geometry, &mut list)?;
    }
    debug!(%area, blocks = list.len(), "area scanned");
    Ok(list)
}

/// Scan one contiguous region, appending discovered blocks to `list`
pub fn scan_region<D: FlashDevice + ?Sized>(
    device: &mut D,
    area: Area,
    region: Region,
    geometry: &Geometry,
    list: &mut BlockList,
) -> Result<()> {
    let erase_size = u64::from(geometry.erase_size);
    let write_size = u64::from(geometry.write_size);
    let end = region.end();
    let mut offset = region.start;
    let mut raw = [0u8; HEADER_SIZE];

    while offset < end {
        // A tail too short for a header can only be empty space.
        if end - offset < HEADER_SIZE as u64 {
            break;
        }

        device
            .select_area(area)
            .map_err(|e| CalError::Device(format!("area select failed: {}", e)))?;
        device.read_at(offset, &mut raw)?;

        if !BlockHeader::has_magic(&raw) {
            offset = if offset % erase_size == 0 {
                offset + erase_size
            } else {
                align_up(offset + 1, write_size)
            };
            continue;
        }

        let header = BlockHeader::decode(&raw);
        if header.hdr_version != HEADER_VERSION {
            return Err(ScanError::UnsupportedVersion {
                addr: offset,
                version: header.hdr_version,
            }
            .into());
        }
        if !header.crc_matches() {
            return Err(ScanError::CorruptHeader {
                addr: offset,
                reason: format!(
                    "header crc {:#010x} != computed {:#010x}",
                    header.hdr_crc,
                    header.compute_crc()
                ),
            }
            .into());
        }
        if offset + header.total_len() > end {
            return Err(ScanError::CorruptHeader {
                addr: offset,
                reason: format!("payload of {} bytes runs past area end {:#x}", header.len, end),
            }
            .into());
        }

        debug!(
            %area,
            addr = offset,
            name = %header.name,
            version = header.block_version,
            len = header.len,
            "found block"
        );
        list.push(Block::new(offset, header));

        offset = if header.is_variable_length() {
            align_up(offset + header.total_len(), WORD_ALIGN)
        } else {
            align_up(offset + 1, write_size)
        };
    }

    Ok(())
}
