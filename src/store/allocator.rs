//! Write Allocator
//!
//! Appends a new block version into previously scanned empty space.
//!
//! ## Placement
//! First fit, ascending address, over the normal area: the gap before the
//! first block, between consecutive blocks, or after the last block. A gap
//! starts at the end of the preceding block rounded up to a write page and
//! must hold at least one full write page.
//!
//! Existing blocks are never overwritten or erased here.

use tracing::{debug, info, warn};

use crate::block::{align_up, Block, BlockHeader, BlockList, BlockName, HEADER_SIZE};
use crate::device::{Area, FlashDevice, Geometry, ERASED_BYTE};
use crate::error::{CalError, Result, ScanError, WriteError};

use super::{compaction, CalStore};

/// First page-aligned offset with at least one free write page
pub fn find_gap(list: &BlockList, area_end: u64, geometry: &Geometry) -> Option<u64> {
    let page = u64::from(geometry.write_size);
    let mut cursor = 0;

    for block in list {
        if block.addr >= cursor && block.addr - cursor >= page {
            return Some(cursor);
        }
        cursor = cursor.max(align_up(block.end(), page));
    }

    (area_end >= cursor && area_end - cursor >= page).then_some(cursor)
}

/// One write page: header, payload, then erased filler
pub fn build_page(header: &BlockHeader, data: &[u8], write_size: u32) -> Vec<u8> {
    let mut page = Vec::with_capacity(write_size as usize);
    page.extend_from_slice(&header.encode());
    page.extend_from_slice(data);
    page.resize(write_size as usize, ERASED_BYTE);
    page
}

impl<D: FlashDevice> CalStore<D> {
    /// Write `data` as the new active version of `name`
    ///
    /// Steps:
    /// 1. Validate name and size
    /// 2. Refuse names owned by the restricted area
    /// 3. Skip identical rewrites of the active block
    /// 4. Find a free page, program it, splice the block into the index
    pub fn write(&mut self, name: impl AsRef<[u8]>, data: &[u8]) -> Result<()> {
        let raw = name.as_ref();
        if self.device.is_none() {
            return Err(CalError::Closed);
        }
        let key = BlockName::new(raw)
            .ok_or_else(|| WriteError::InvalidName(String::from_utf8_lossy(raw).into_owned()))?;

        let max = self.geometry.max_payload().unwrap_or(0);
        if self.geometry.max_payload().is_none() || data.len() > max {
            return Err(WriteError::TooLarge {
                len: data.len(),
                max,
            }
            .into());
        }

        if self.restricted.find_active(&key).is_some() {
            return Err(WriteError::RestrictedAreaConflict(key.to_string()).into());
        }

        let previous = self.normal.find_active(&key);
        if let Some(idx) = previous {
            if self.active_payload_matches(idx, data)? {
                debug!(name = %key, "payload unchanged, skipping write");
                return Ok(());
            }
        }

        let (block_version, flags) = match previous.and_then(|idx| self.normal.get(idx)) {
            Some(prev) => (
                prev.header
                    .block_version
                    .checked_add(1)
                    .ok_or_else(|| WriteError::VersionOverflow(key.to_string()))?,
                prev.header.flags,
            ),
            None => (0, 0),
        };

        let header = BlockHeader::new(key, block_version, flags, data);
        let addr = self.allocate(&key)?;
        let page = build_page(&header, data, self.geometry.write_size);

        let device = self.device.as_mut().ok_or(CalError::Closed)?;
        device
            .select_area(Area::Normal)
            .and_then(|()| device.write_at(addr, &page))
            .map_err(WriteError::Io)?;

        self.normal
            .insert_sorted(Block::with_data(addr, header, data.to_vec()));
        info!(name = %key, version = block_version, addr, len = data.len(), "block written");
        Ok(())
    }

    /// Whether the active normal block at `idx` already holds `data`
    fn active_payload_matches(&mut self, idx: usize, data: &[u8]) -> Result<bool> {
        let device = self.device.as_mut().ok_or(CalError::Closed)?;
        let Some(block) = self.normal.get_mut(idx) else {
            return Ok(false);
        };
        if block.header.len as usize != data.len() {
            return Ok(false);
        }

        match block.load(device, Area::Normal) {
            Ok(existing) => Ok(existing == data),
            // A new version supersedes the damaged one.
            Err(CalError::Scan(e @ ScanError::CorruptPayload { .. })) => {
                warn!(error = %e, "active block is corrupt, writing a new version");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Pick the write offset, compacting once if allowed and needed
    fn allocate(&mut self, key: &BlockName) -> Result<u64> {
        if let Some(addr) = find_gap(&self.normal, self.geometry.size, &self.geometry) {
            debug!(name = %key, addr, "allocated write page");
            return Ok(addr);
        }

        let reclaimable = compaction::select_victim(&self.normal, &self.geometry).is_some();
        if self.config.compact_on_full && reclaimable {
            info!(name = %key, "normal area full, compacting");
            self.compact()?;
            if let Some(addr) = find_gap(&self.normal, self.geometry.size, &self.geometry) {
                return Ok(addr);
            }
        }

        Err(WriteError::NoSpace(key.to_string()).into())
    }
}
