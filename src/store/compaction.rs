//! Eraseblock Compaction
//!
//! Reclaims space held by superseded block versions in the normal area.
//!
//! ## Algorithm
//! 1. Victim = erase block with the most bytes in non-active blocks
//! 2. Load and verify every active block in the victim (nothing erased yet)
//! 3. Lay the retained blocks out in an erase-block image, byte-for-byte
//!    identical headers, packed from the erase-block start
//! 4. Erase, then program the image page by page
//! 5. Swap in the relocated index only after every page is written
//!
//! If programming fails after the erase, the normal area is re-scanned from
//! the device so the index never points at erased addresses. If even that
//! fails the handle is closed.

use std::collections::BTreeMap;

use tracing::{error, info, warn};

use crate::block::{align_up, scan_area, Block, BlockList, HEADER_SIZE};
use crate::device::{Area, FlashDevice, Geometry, Region, ERASED_BYTE};
use crate::error::{CalError, Result, WriteError};

use super::CalStore;

/// Alignment of packed variable-length blocks
const WORD_ALIGN: u64 = 4;

/// Outcome of one compaction pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    /// Start offset of the compacted erase block
    pub erase_block: u64,
    /// Active blocks rewritten in place
    pub retained: usize,
    /// Superseded blocks discarded
    pub dropped: usize,
    /// Free bytes at the tail of the erase block afterwards
    pub free_bytes: u64,
}

fn failed(reason: impl Into<String>) -> CalError {
    CalError::Write(WriteError::CompactionFailed(reason.into()))
}

/// Erase block holding the most bytes of superseded blocks, if any
pub(super) fn select_victim(list: &BlockList, geometry: &Geometry) -> Option<u64> {
    let erase = u64::from(geometry.erase_size);
    let page = u64::from(geometry.write_size);
    let mask = list.active_mask();

    let mut stale: BTreeMap<u64, u64> = BTreeMap::new();
    for (block, active) in list.iter().zip(mask) {
        if !active {
            *stale.entry(block.addr / erase * erase).or_default() +=
                align_up(block.header.total_len(), page);
        }
    }

    let mut victim: Option<(u64, u64)> = None;
    for (start, bytes) in stale {
        if victim.map_or(true, |(_, best)| bytes > best) {
            victim = Some((start, bytes));
        }
    }
    victim.map(|(start, _)| start)
}

impl<D: FlashDevice> CalStore<D> {
    /// Reclaim the most space-inefficient erase block of the normal area
    pub fn compact(&mut self) -> Result<CompactionReport> {
        let geometry = self.geometry;
        let erase = u64::from(geometry.erase_size);
        let page = u64::from(geometry.write_size);

        let device = self.device.as_mut().ok_or(CalError::Closed)?;
        let start = select_victim(&self.normal, &geometry)
            .ok_or_else(|| failed("no superseded blocks to reclaim"))?;
        let end = start + erase;

        // Step 1: collect survivors, verifying payloads before touching flash
        let mask = self.normal.active_mask();
        let mut retained: Vec<Block> = Vec::new();
        let mut dropped = 0;
        for (idx, active) in mask.into_iter().enumerate() {
            let Some(block) = self.normal.get_mut(idx) else {
                continue;
            };
            let crosses_start = block.addr < start && block.end() > start;
            let inside = block.addr >= start && block.addr < end;
            if crosses_start || (inside && block.end() > end) {
                return Err(failed(format!(
                    "block '{}' at {:#x} straddles erase block {:#x}",
                    block.name(),
                    block.addr,
                    start
                )));
            }
            if !inside {
                continue;
            }
            if !active {
                dropped += 1;
                continue;
            }
            if let Err(e) = block.load(device, Area::Normal) {
                return Err(failed(format!("cannot relocate '{}': {}", block.name(), e)));
            }
            retained.push(block.clone());
        }

        // Step 2: lay out the new erase-block image
        let mut image = vec![ERASED_BYTE; erase as usize];
        let mut cursor = start;
        let mut relocated = Vec::with_capacity(retained.len());
        for mut block in retained {
            let at = if block.header.is_variable_length() {
                cursor
            } else {
                align_up(cursor, page)
            };
            let block_end = at + block.header.total_len();
            if block_end > end {
                return Err(failed(format!("retained blocks do not fit erase block {:#x}", start)));
            }

            let offset = (at - start) as usize;
            image[offset..offset + HEADER_SIZE].copy_from_slice(&block.header.encode());
            let payload = block.load(device, Area::Normal)?;
            image[offset + HEADER_SIZE..offset + HEADER_SIZE + payload.len()].copy_from_slice(payload);

            cursor = if block.header.is_variable_length() {
                align_up(block_end, WORD_ALIGN)
            } else {
                align_up(block_end, page)
            };
            block.addr = at;
            relocated.push(block);
        }
        let used = align_up(cursor - start, page);
        let retained_count = relocated.len();

        let rebuilt: BlockList = self
            .normal
            .iter()
            .filter(|b| b.addr < start || b.addr >= end)
            .cloned()
            .chain(relocated)
            .collect();

        // Step 3: erase and reprogram
        device
            .erase(start, erase)
            .map_err(|e| failed(format!("erase of {:#x} failed: {}", start, e)))?;

        let programmed = device.select_area(Area::Normal).and_then(|()| {
            image[..used as usize]
                .chunks(page as usize)
                .enumerate()
                .filter(|(_, chunk)| chunk.iter().any(|&b| b != ERASED_BYTE))
                .try_for_each(|(i, chunk)| device.write_at(start + i as u64 * page, chunk))
        });

        if let Err(e) = programmed {
            warn!(erase_block = start, error = %e, "rewrite failed after erase, rescanning");
            let region = [Region::new(0, geometry.size)];
            match scan_area(device, Area::Normal, &region, &geometry) {
                Ok(list) => self.normal = list,
                Err(scan_err) => {
                    error!(error = %scan_err, "rescan after failed compaction failed, closing store");
                    self.close();
                }
            }
            return Err(failed(format!("rewrite of {:#x} failed: {}", start, e)));
        }

        // Step 4: publish the relocated index
        self.normal = rebuilt;
        let report = CompactionReport {
            erase_block: start,
            retained: retained_count,
            dropped,
            free_bytes: end - start - used,
        };
        info!(?report, "compaction finished");
        Ok(report)
    }
}
