//! Device Module
//!
//! Raw flash access and geometry probing.
//!
//! ## Responsibilities
//! - Report erase-block size, write-page size and total size
//! - Enumerate the restricted (OTP) regions
//! - Select which physical area subsequent reads/writes target
//! - Positioned reads, page writes and erase-block erases
//!
//! Every call blocks until the device answers. Area selection is a separate
//! control request and callers reissue it before each raw access.

mod memory;
#[cfg(unix)]
mod mtd;

use std::io;

use crate::error::{CalError, Result};

pub use memory::MemDevice;
#[cfg(unix)]
pub use mtd::MtdDevice;

/// Erased flash reads back as all ones
pub const ERASED_BYTE: u8 = 0xFF;

/// One of the two independently scanned address ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Area {
    /// The writable area: the whole device
    Normal,
    /// The write-protected, factory-provisioned OTP area
    Restricted,
}

impl std::fmt::Display for Area {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Area::Normal => f.write_str("normal"),
            Area::Restricted => f.write_str("restricted"),
        }
    }
}

/// Flash geometry as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Total size of the normal area in bytes
    pub size: u64,
    /// Minimum erase granularity
    pub erase_size: u32,
    /// Minimum write granularity
    pub write_size: u32,
}

impl Geometry {
    /// Largest payload a single write page can hold after the block header
    pub fn max_payload(&self) -> Option<usize> {
        (self.write_size as usize).checked_sub(crate::block::HEADER_SIZE)
    }

    /// Number of erase blocks in the normal area
    pub fn erase_block_count(&self) -> u64 {
        self.size / u64::from(self.erase_size)
    }
}

/// A contiguous address range `[start, start + len)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: u64,
    pub len: u64,
}

impl Region {
    pub fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    pub fn end(&self) -> u64 {
        self.start + self.len
    }
}

/// Raw access to an MTD-class flash device
pub trait FlashDevice {
    /// Query total size, erase size and write size
    fn geometry(&mut self) -> io::Result<Geometry>;

    /// Enumerate restricted-area regions; empty when the device has none
    fn restricted_regions(&mut self) -> io::Result<Vec<Region>>;

    /// Point subsequent reads and writes at `area`
    fn select_area(&mut self, area: Area) -> io::Result<()>;

    /// Fill `buf` from `offset` in the selected area
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Program `buf` at `offset` in the selected area
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Erase `len` bytes of the normal area starting at `offset`
    fn erase(&mut self, offset: u64, len: u64) -> io::Result<()>;
}

/// Probe and validate the device geometry
pub fn probe<D: FlashDevice + ?Sized>(device: &mut D) -> Result<Geometry> {
    let geometry = device
        .geometry()
        .map_err(|e| CalError::Device(format!("geometry probe failed: {}", e)))?;

    if geometry.size == 0 || geometry.erase_size == 0 || geometry.write_size == 0 {
        return Err(CalError::Device(format!(
            "unusable geometry: {:?}",
            geometry
        )));
    }
    if geometry.erase_size % geometry.write_size != 0 {
        return Err(CalError::Device(format!(
            "erase size {} is not a multiple of write size {}",
            geometry.erase_size, geometry.write_size
        )));
    }

    Ok(geometry)
}

/// Enumerate the restricted regions in ascending address order
pub fn restricted_region_bounds<D: FlashDevice + ?Sized>(device: &mut D) -> Result<Vec<Region>> {
    let mut regions = device
        .restricted_regions()
        .map_err(|e| CalError::Device(format!("restricted region query failed: {}", e)))?;
    regions.retain(|r| r.len > 0);
    regions.sort_by_key(|r| r.start);
    Ok(regions)
}
