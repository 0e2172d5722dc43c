//! In-memory flash device
//!
//! Simulates an MTD device with a normal area and an optional OTP area.
//! Clones share the same state, so a test can keep a handle for inspection
//! and fault injection while the store owns another.
//!
//! Flash rules enforced:
//! - programming a byte that is not erased fails
//! - the restricted area is read-only
//! - erase is erase-block granular and resets bytes to `0xFF`

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Area, FlashDevice, Geometry, Region, ERASED_BYTE};

/// Shared-state simulated flash
#[derive(Debug, Clone)]
pub struct MemDevice {
    inner: Arc<Mutex<MemState>>,
}

#[derive(Debug)]
struct MemState {
    geometry: Geometry,
    normal: Vec<u8>,
    restricted: Vec<u8>,
    regions: Vec<Region>,
    selected: Area,
    fail_writes: bool,
    fail_erases: bool,
    writes: u64,
    erases: u64,
    selects: u64,
}

impl MemDevice {
    /// Create a fully erased device with no restricted area
    pub fn new(geometry: Geometry) -> Self {
        Self::with_restricted(geometry, 0, Vec::new())
    }

    /// Create a fully erased device with `restricted_size` bytes of OTP
    /// exposed through `regions`
    pub fn with_restricted(geometry: Geometry, restricted_size: usize, regions: Vec<Region>) -> Self {
        let state = MemState {
            geometry,
            normal: vec![ERASED_BYTE; geometry.size as usize],
            restricted: vec![ERASED_BYTE; restricted_size],
            regions,
            selected: Area::Normal,
            fail_writes: false,
            fail_erases: false,
            writes: 0,
            erases: 0,
            selects: 0,
        };
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    // =========================================================================
    // Fixture Helpers
    // =========================================================================

    /// Place raw bytes without flash rules (factory provisioning, corruption)
    pub fn raw_write(&self, area: Area, offset: u64, bytes: &[u8]) {
        let mut state = self.inner.lock();
        let buf = state.buffer_mut(area);
        let start = offset as usize;
        buf[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Copy of the raw contents of an area
    pub fn snapshot(&self, area: Area) -> Vec<u8> {
        let state = self.inner.lock();
        match area {
            Area::Normal => state.normal.clone(),
            Area::Restricted => state.restricted.clone(),
        }
    }

    /// Make every subsequent `write_at` fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    /// Make every subsequent `erase` fail
    pub fn set_fail_erases(&self, fail: bool) {
        self.inner.lock().fail_erases = fail;
    }

    /// Number of successful page writes
    pub fn write_count(&self) -> u64 {
        self.inner.lock().writes
    }

    /// Number of successful erases
    pub fn erase_count(&self) -> u64 {
        self.inner.lock().erases
    }

    /// Number of area-select requests
    pub fn select_count(&self) -> u64 {
        self.inner.lock().selects
    }
}

impl MemState {
    fn buffer_mut(&mut self, area: Area) -> &mut Vec<u8> {
        match area {
            Area::Normal => &mut self.normal,
            Area::Restricted => &mut self.restricted,
        }
    }

    fn check_range(len: usize, offset: u64, count: usize) -> io::Result<usize> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
        match start.checked_add(count) {
            Some(end) if end <= len => Ok(start),
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("access {}+{} beyond end {}", offset, count, len),
            )),
        }
    }
}

impl FlashDevice for MemDevice {
    fn geometry(&mut self) -> io::Result<Geometry> {
        Ok(self.inner.lock().geometry)
    }

    fn restricted_regions(&mut self) -> io::Result<Vec<Region>> {
        Ok(self.inner.lock().regions.clone())
    }

    fn select_area(&mut self, area: Area) -> io::Result<()> {
        let mut state = self.inner.lock();
        state.selected = area;
        state.selects += 1;
        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut state = self.inner.lock();
        let area = state.selected;
        let src = state.buffer_mut(area);
        let start = MemState::check_range(src.len(), offset, buf.len())?;
        buf.copy_from_slice(&src[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut state = self.inner.lock();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        if state.selected == Area::Restricted {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "restricted area is read-only",
            ));
        }

        let write_size = state.geometry.write_size as u64;
        if offset % write_size != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("write at {:#x} is not page aligned", offset),
            ));
        }

        let dst = &mut state.normal;
        let start = MemState::check_range(dst.len(), offset, buf.len())?;
        let target = &mut dst[start..start + buf.len()];
        if target.iter().any(|&b| b != ERASED_BYTE) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("programming non-erased flash at {:#x}", offset),
            ));
        }
        target.copy_from_slice(buf);
        state.writes += 1;
        Ok(())
    }

    fn erase(&mut self, offset: u64, len: u64) -> io::Result<()> {
        let mut state = self.inner.lock();
        if state.fail_erases {
            return Err(io::Error::new(io::ErrorKind::Other, "injected erase failure"));
        }

        let erase_size = state.geometry.erase_size as u64;
        if offset % erase_size != 0 || len % erase_size != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("erase {:#x}+{:#x} is not erase-block aligned", offset, len),
            ));
        }

        let dst = &mut state.normal;
        let start = MemState::check_range(dst.len(), offset, len as usize)?;
        dst[start..start + len as usize].fill(ERASED_BYTE);
        state.erases += 1;
        Ok(())
    }
}
