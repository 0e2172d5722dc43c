//! Block Index
//!
//! Address-ordered list of blocks for one area, with highest-version-wins
//! lookup and lazily loaded, checksum-verified payloads.

use std::collections::HashMap;

use crate::checksum::crc32;
use crate::device::{Area, FlashDevice};
use crate::error::{CalError, Result, ScanError};

use super::{BlockHeader, BlockName, HEADER_SIZE};

/// One block discovered on (or written to) the device
#[derive(Debug, Clone)]
pub struct Block {
    /// Byte offset of the header within its area
    pub addr: u64,
    pub header: BlockHeader,
    /// Payload, populated on first access
    data: Option<Vec<u8>>,
}

impl Block {
    /// A scanned block whose payload has not been read yet
    pub fn new(addr: u64, header: BlockHeader) -> Self {
        Self {
            addr,
            header,
            data: None,
        }
    }

    /// A freshly written block whose payload is already known
    pub fn with_data(addr: u64, header: BlockHeader, data: Vec<u8>) -> Self {
        Self {
            addr,
            header,
            data: Some(data),
        }
    }

    pub fn name(&self) -> &BlockName {
        &self.header.name
    }

    /// First byte past the payload
    pub fn end(&self) -> u64 {
        self.addr + self.header.total_len()
    }

    pub fn is_loaded(&self) -> bool {
        self.data.is_some()
    }

    /// Return the payload, reading and verifying it on first access.
    ///
    /// The header was validated at scan time; only the payload checksum is
    /// checked here. A mismatch is reported and nothing is cached.
    pub fn load<D: FlashDevice + ?Sized>(&mut self, device: &mut D, area: Area) -> Result<&[u8]> {
        let data = match self.data.take() {
            Some(data) => data,
            None => self.fetch(device, area)?,
        };
        let data: &[u8] = self.data.insert(data);
        Ok(data)
    }

    fn fetch<D: FlashDevice + ?Sized>(&self, device: &mut D, area: Area) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.header.len as usize];
        device.select_area(area)?;
        device.read_at(self.addr + HEADER_SIZE as u64, &mut buf)?;

        if crc32(0, &buf) != self.header.data_crc {
            return Err(CalError::Scan(ScanError::CorruptPayload {
                name: self.header.name.to_string(),
                addr: self.addr,
            }));
        }
        Ok(buf)
    }
}

/// Blocks of one area in ascending address order
#[derive(Debug, Clone, Default)]
pub struct BlockList {
    blocks: Vec<Block>,
}

impl BlockList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail; the scanner visits addresses in ascending order
    pub fn push(&mut self, block: Block) {
        debug_assert!(self.blocks.last().map_or(true, |last| last.addr < block.addr));
        self.blocks.push(block);
    }

    /// Splice a block in at its address-ordered position
    pub fn insert_sorted(&mut self, block: Block) {
        let pos = self.blocks.partition_point(|b| b.addr < block.addr);
        self.blocks.insert(pos, block);
    }

    /// Index of the active block for `name`: the strictly highest version
    pub fn find_active(&self, name: &BlockName) -> Option<usize> {
        let mut best: Option<(usize, u8)> = None;
        for (idx, block) in self.blocks.iter().enumerate() {
            if block.name() != name {
                continue;
            }
            let version = block.header.block_version;
            if best.map_or(true, |(_, v)| version > v) {
                best = Some((idx, version));
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// The active block for `name`, if any
    pub fn active(&self, name: &BlockName) -> Option<&Block> {
        self.find_active(name).map(|idx| &self.blocks[idx])
    }

    /// One flag per block, set for the active block of each name
    pub fn active_mask(&self) -> Vec<bool> {
        let mut best: HashMap<BlockName, usize> = HashMap::new();
        for (idx, block) in self.blocks.iter().enumerate() {
            best.entry(*block.name())
                .and_modify(|cur| {
                    if block.header.block_version > self.blocks[*cur].header.block_version {
                        *cur = idx;
                    }
                })
                .or_insert(idx);
        }

        let mut mask = vec![false; self.blocks.len()];
        for idx in best.into_values() {
            mask[idx] = true;
        }
        mask
    }

    pub fn get(&self, idx: usize) -> Option<&Block> {
        self.blocks.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Block> {
        self.blocks.get_mut(idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Block> {
        self.blocks.iter()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Drop every block and cached payload
    pub fn clear(&mut self) {
        self.blocks.clear();
    }
}

impl<'a> IntoIterator for &'a BlockList {
    type Item = &'a Block;
    type IntoIter = std::slice::Iter<'a, Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.iter()
    }
}

impl FromIterator<Block> for BlockList {
    fn from_iter<I: IntoIterator<Item = Block>>(iter: I) -> Self {
        let mut blocks: Vec<Block> = iter.into_iter().collect();
        blocks.sort_by_key(|b| b.addr);
        Self { blocks }
    }
}
