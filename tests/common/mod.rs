//! Shared fixtures for calstore integration tests
#![allow(dead_code)]

use calstore::block::{BlockHeader, BlockName};
use calstore::{Area, CalStore, Config, Geometry, MemDevice, Region};
use tempfile::TempDir;

// =============================================================================
// Geometries
// =============================================================================

pub const KIB: u64 = 1024;

/// 256 KiB device, 128 KiB erase blocks, 2 KiB pages
pub fn large_geometry() -> Geometry {
    Geometry {
        size: 256 * KIB,
        erase_size: 128 * 1024,
        write_size: 2048,
    }
}

/// 8 KiB device: two 4 KiB erase blocks of two 2 KiB pages each
pub fn small_geometry() -> Geometry {
    Geometry {
        size: 8 * KIB,
        erase_size: 4096,
        write_size: 2048,
    }
}

// =============================================================================
// Stores
// =============================================================================

pub const DEVICE_PATH: &str = "/dev/mtd-test";

pub fn test_config(lock_dir: &TempDir) -> Config {
    Config::builder()
        .device_path(DEVICE_PATH)
        .lock_dir(lock_dir.path())
        .build()
}

pub fn lock_file(lock_dir: &TempDir) -> std::path::PathBuf {
    lock_dir.path().join("cal.mtd-test.lock")
}

pub fn open_store(device: &MemDevice, lock_dir: &TempDir) -> CalStore<MemDevice> {
    CalStore::open_with_device(test_config(lock_dir), device.clone()).unwrap()
}

/// Device with 4 KiB of restricted storage exposed as one region
pub fn device_with_restricted(geometry: Geometry) -> MemDevice {
    MemDevice::with_restricted(geometry, 4096, vec![Region::new(0, 4096)])
}

// =============================================================================
// Raw Blocks
// =============================================================================

pub fn name(s: &str) -> BlockName {
    BlockName::new(s.as_bytes()).unwrap()
}

pub fn header(block_name: &str, version: u8, flags: u16, data: &[u8]) -> BlockHeader {
    BlockHeader::new(name(block_name), version, flags, data)
}

/// Header bytes followed by payload, as found on flash
pub fn encode_block(header: &BlockHeader, data: &[u8]) -> Vec<u8> {
    let mut raw = header.encode().to_vec();
    raw.extend_from_slice(data);
    raw
}

/// Place a well-formed block directly on the device
pub fn place_block(
    device: &MemDevice,
    area: Area,
    offset: u64,
    block_name: &str,
    version: u8,
    data: &[u8],
) -> BlockHeader {
    let hdr = header(block_name, version, 0, data);
    device.raw_write(area, offset, &encode_block(&hdr, data));
    hdr
}
