//! Block header encoding and validation

use std::fmt;

use bytes::{Buf, BufMut};

use crate::checksum::crc32;

// =============================================================================
// Format Constants
// =============================================================================

/// Magic bytes marking the start of a block
pub const MAGIC: &[u8; 4] = b"ConF";

/// The only header layout this crate understands
pub const HEADER_VERSION: u8 = 2;

/// Width of the name field
pub const NAME_LEN: usize = 16;

/// Header size: Magic (4) + HdrVer (1) + BlkVer (1) + Flags (2) + Name (16)
/// + Len (4) + DataCRC (4) + HdrCRC (4) = 36 bytes
pub const HEADER_SIZE: usize = 36;

/// Bytes covered by the header checksum (everything before `hdr_crc`)
const HEADER_CRC_SPAN: usize = HEADER_SIZE - 4;

/// Flag bit 0: block is packed at word alignment instead of page alignment
pub const FLAG_VARIABLE_LENGTH: u16 = 1 << 0;

// =============================================================================
// Block Name
// =============================================================================

/// Fixed-width block identifier
///
/// Stored exactly as on the device: not necessarily NUL-terminated and not
/// necessarily zero-padded. Lookups compare all 16 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockName([u8; NAME_LEN]);

impl BlockName {
    /// Build a zero-padded name; `None` if empty or wider than the field
    pub fn new(name: &[u8]) -> Option<Self> {
        if name.is_empty() || name.len() > NAME_LEN {
            return None;
        }
        let mut raw = [0u8; NAME_LEN];
        raw[..name.len()].copy_from_slice(name);
        Some(Self(raw))
    }

    pub fn from_raw(raw: [u8; NAME_LEN]) -> Self {
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; NAME_LEN] {
        &self.0
    }

    /// Bytes up to the first NUL (or the whole field)
    pub fn trimmed(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        &self.0[..end]
    }
}

impl fmt::Display for BlockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.trimmed()))
    }
}

impl fmt::Debug for BlockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockName({:?})", self.to_string())
    }
}

// =============================================================================
// Header
// =============================================================================

/// Parsed block header (magic implied)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub hdr_version: u8,
    /// Higher version wins among blocks with the same name
    pub block_version: u8,
    pub flags: u16,
    pub name: BlockName,
    /// Payload length in bytes
    pub len: u32,
    pub data_crc: u32,
    pub hdr_crc: u32,
}

impl BlockHeader {
    /// Build a fresh header for `data`, computing both checksums
    pub fn new(name: BlockName, block_version: u8, flags: u16, data: &[u8]) -> Self {
        let mut header = Self {
            hdr_version: HEADER_VERSION,
            block_version,
            flags,
            name,
            len: data.len() as u32,
            data_crc: crc32(0, data),
            hdr_crc: 0,
        };
        header.hdr_crc = header.compute_crc();
        header
    }

    /// Whether `raw` starts with the block magic
    pub fn has_magic(raw: &[u8]) -> bool {
        raw.len() >= MAGIC.len() && &raw[..MAGIC.len()] == MAGIC
    }

    /// Parse the fields after the magic; performs no validation
    pub fn decode(raw: &[u8; HEADER_SIZE]) -> Self {
        let mut buf = &raw[MAGIC.len()..];
        let hdr_version = buf.get_u8();
        let block_version = buf.get_u8();
        let flags = buf.get_u16_ne();
        let mut name = [0u8; NAME_LEN];
        buf.copy_to_slice(&mut name);
        let len = buf.get_u32_ne();
        let data_crc = buf.get_u32_ne();
        let hdr_crc = buf.get_u32_ne();

        Self {
            hdr_version,
            block_version,
            flags,
            name: BlockName::from_raw(name),
            len,
            data_crc,
            hdr_crc,
        }
    }

    /// Serialize to the exact on-device layout
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut raw = [0u8; HEADER_SIZE];
        let mut buf = &mut raw[..];
        buf.put_slice(MAGIC);
        buf.put_u8(self.hdr_version);
        buf.put_u8(self.block_version);
        buf.put_u16_ne(self.flags);
        buf.put_slice(self.name.as_bytes());
        buf.put_u32_ne(self.len);
        buf.put_u32_ne(self.data_crc);
        buf.put_u32_ne(self.hdr_crc);
        raw
    }

    /// Checksum of every header byte before `hdr_crc`
    pub fn compute_crc(&self) -> u32 {
        crc32(0, &self.encode()[..HEADER_CRC_SPAN])
    }

    pub fn crc_matches(&self) -> bool {
        self.compute_crc() == self.hdr_crc
    }

    pub fn is_variable_length(&self) -> bool {
        self.flags & FLAG_VARIABLE_LENGTH != 0
    }

    /// Header plus payload
    pub fn total_len(&self) -> u64 {
        HEADER_SIZE as u64 + u64::from(self.len)
    }
}
