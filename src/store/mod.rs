//! Store Module
//!
//! The storage handle: ties geometry, lock and both block lists together.
//!
//! ## Lifecycle
//! ```text
//!   Closed ──open──▶ Opening ──scan ok──▶ Open ──close──▶ Closed
//!                       │
//!                       └── lock / probe / scan failure: lock released,
//!                           partial state dropped, error returned
//! ```
//!
//! ## Read Order
//! 1. Restricted area (authoritative factory data)
//! 2. Normal area
//!
//! A restricted block shadows a normal one of the same name regardless of
//! version; the reverse never happens.

mod allocator;
mod compaction;

use std::path::Path;

use tracing::{debug, info, warn};

use crate::block::{scan_area, BlockList, BlockName};
use crate::config::Config;
use crate::device::{self, Area, FlashDevice, Geometry, Region};
use crate::error::{CalError, Result};
use crate::lock::{LockGuard, LockManager};

#[cfg(unix)]
use crate::device::MtdDevice;

pub use allocator::{build_page, find_gap};
pub use compaction::CompactionReport;

/// Summary of one indexed block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub area: Area,
    pub addr: u64,
    pub name: BlockName,
    pub block_version: u8,
    pub flags: u16,
    pub len: u32,
    /// Highest version for its name within its area
    pub active: bool,
}

/// An open CAL store
///
/// Single-threaded: one handle per device per process. Cross-process
/// exclusion comes from the lock file held for the handle's lifetime.
pub struct CalStore<D: FlashDevice> {
    config: Config,

    /// `None` once closed
    device: Option<D>,

    /// `None` once closed
    lock: Option<LockGuard>,

    geometry: Geometry,

    /// Normal (writable) area blocks, ascending address
    normal: BlockList,

    /// Restricted (OTP) area blocks, ascending address
    restricted: BlockList,
}

#[cfg(unix)]
impl CalStore<MtdDevice> {
    /// Lock, open and index the MTD device named in `config`
    pub fn open(config: Config) -> Result<Self> {
        let lock = LockManager::new(&config.lock_dir).acquire(&config.device_path)?;
        let device = MtdDevice::open(&config.device_path, config.restricted_mode).map_err(|e| {
            CalError::Device(format!("cannot open {}: {}", config.device_path.display(), e))
        })?;
        Self::open_locked(config, device, lock)
    }

    /// Open with a device path (convenience method)
    ///
    /// Uses default config with the specified device
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().device_path(path).build();
        Self::open(config)
    }
}

impl<D: FlashDevice> CalStore<D> {
    /// Lock `config.device_path` and index an already opened device
    pub fn open_with_device(config: Config, device: D) -> Result<Self> {
        let lock = LockManager::new(&config.lock_dir).acquire(&config.device_path)?;
        Self::open_locked(config, device, lock)
    }

    fn open_locked(config: Config, mut device: D, lock: LockGuard) -> Result<Self> {
        match Self::index_device(&mut device) {
            Ok((geometry, normal, restricted)) => {
                info!(
                    device = %config.device_path.display(),
                    size = geometry.size,
                    erase_size = geometry.erase_size,
                    write_size = geometry.write_size,
                    normal_blocks = normal.len(),
                    restricted_blocks = restricted.len(),
                    "CAL store opened"
                );
                Ok(Self {
                    config,
                    device: Some(device),
                    lock: Some(lock),
                    geometry,
                    normal,
                    restricted,
                })
            }
            Err(e) => {
                if let Err(release_err) = lock.release() {
                    warn!(error = %release_err, "failed to release lock after open error");
                }
                Err(e)
            }
        }
    }

    /// Probe geometry and scan both areas
    fn index_device(device: &mut D) -> Result<(Geometry, BlockList, BlockList)> {
        let geometry = device::probe(device)?;
        let restricted_regions = device::restricted_region_bounds(device)?;
        debug!(regions = restricted_regions.len(), "restricted regions");

        let normal = scan_area(device, Area::Normal, &[Region::new(0, geometry.size)], &geometry)?;
        let restricted = scan_area(device, Area::Restricted, &restricted_regions, &geometry)?;
        Ok((geometry, normal, restricted))
    }

    /// Read the active payload for `name`
    ///
    /// The restricted area is consulted first. The payload is loaded and
    /// checksummed on first access and cached for the handle's lifetime.
    pub fn read(&mut self, name: impl AsRef<[u8]>) -> Result<&[u8]> {
        let raw = name.as_ref();
        let device = self.device.as_mut().ok_or(CalError::Closed)?;
        let not_found = || CalError::NotFound(String::from_utf8_lossy(raw).into_owned());
        let key = BlockName::new(raw).ok_or_else(not_found)?;

        let (area, list) = if self.restricted.find_active(&key).is_some() {
            (Area::Restricted, &mut self.restricted)
        } else {
            (Area::Normal, &mut self.normal)
        };
        let idx = list.find_active(&key).ok_or_else(not_found)?;
        let block = list.get_mut(idx).ok_or_else(not_found)?;
        block.load(device, area)
    }

    /// Every indexed block, restricted area first
    pub fn blocks(&self) -> Vec<BlockInfo> {
        [(Area::Restricted, &self.restricted), (Area::Normal, &self.normal)]
            .into_iter()
            .flat_map(|(area, list)| {
                let mask = list.active_mask();
                list.iter().zip(mask).map(move |(block, active)| BlockInfo {
                    area,
                    addr: block.addr,
                    name: *block.name(),
                    block_version: block.header.block_version,
                    flags: block.header.flags,
                    len: block.header.len,
                    active,
                })
            })
            .collect()
    }

    /// Free the index, close the device and release the lock.
    ///
    /// Safe to call more than once. A lock file that cannot be removed is
    /// logged; teardown still completes.
    pub fn close(&mut self) {
        if self.device.is_none() && self.lock.is_none() {
            return;
        }

        self.normal.clear();
        self.restricted.clear();
        self.device = None;

        if let Some(lock) = self.lock.take() {
            if let Err(e) = lock.release() {
                warn!(error = %e, "failed to remove lock file");
            }
        }
        info!(device = %self.config.device_path.display(), "CAL store closed");
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Normal-area index
    pub fn normal_blocks(&self) -> &BlockList {
        &self.normal
    }

    /// Restricted-area index
    pub fn restricted_blocks(&self) -> &BlockList {
        &self.restricted
    }
}

impl<D: FlashDevice> Drop for CalStore<D> {
    fn drop(&mut self) {
        self.close();
    }
}
