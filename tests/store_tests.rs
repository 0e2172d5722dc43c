//! Tests for the storage handle
//!
//! These tests verify:
//! - Open/close lifecycle and the lock file
//! - Read/write round trips and version arbitration
//! - Restricted-area precedence and write refusal
//! - Idempotent writes, space exhaustion, I/O failure handling
//! - Persistence across reopen

mod common;

use calstore::block::{BlockHeader, HEADER_SIZE};
use calstore::{Area, CalError, CalStore, Geometry, LockError, MemDevice, ScanError, WriteError};
use common::*;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup(geometry: Geometry) -> (TempDir, MemDevice) {
    (TempDir::new().unwrap(), MemDevice::new(geometry))
}

fn header_at(device: &MemDevice, addr: u64) -> BlockHeader {
    let raw = device.snapshot(Area::Normal);
    let bytes: [u8; HEADER_SIZE] = raw[addr as usize..addr as usize + HEADER_SIZE]
        .try_into()
        .unwrap();
    BlockHeader::decode(&bytes)
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_open_empty_device() {
    let (dir, dev) = setup(large_geometry());

    let store = open_store(&dev, &dir);

    assert!(store.is_open());
    assert!(store.normal_blocks().is_empty());
    assert!(store.restricted_blocks().is_empty());
    assert_eq!(store.geometry(), &large_geometry());
    assert!(lock_file(&dir).exists());
}

#[test]
fn test_second_open_is_locked_out() {
    let (dir, dev) = setup(small_geometry());
    let _first = open_store(&dev, &dir);

    let second = CalStore::open_with_device(test_config(&dir), dev.clone());

    assert!(matches!(second, Err(CalError::Lock(LockError::AlreadyLocked(_)))));
}

#[test]
fn test_close_releases_lock_and_is_idempotent() {
    let (dir, dev) = setup(small_geometry());
    let mut store = open_store(&dev, &dir);

    store.close();
    assert!(!store.is_open());
    assert!(!lock_file(&dir).exists());

    store.close();
    assert!(!store.is_open());

    let reopened = CalStore::open_with_device(test_config(&dir), dev.clone());
    assert!(reopened.is_ok());
}

#[test]
fn test_drop_releases_lock() {
    let (dir, dev) = setup(small_geometry());
    {
        let _store = open_store(&dev, &dir);
        assert!(lock_file(&dir).exists());
    }
    assert!(!lock_file(&dir).exists());
}

#[test]
fn test_operations_after_close_fail() {
    let (dir, dev) = setup(small_geometry());
    let mut store = open_store(&dev, &dir);
    store.write("cfg", b"v").unwrap();
    store.close();

    assert!(matches!(store.read("cfg"), Err(CalError::Closed)));
    assert!(matches!(store.write("cfg", b"w"), Err(CalError::Closed)));
    assert!(matches!(store.compact(), Err(CalError::Closed)));
}

#[test]
fn test_corrupt_header_fails_open_and_releases_lock() {
    let (dir, dev) = setup(small_geometry());
    let mut hdr = header("cfg", 0, 0, b"abc");
    hdr.hdr_crc = hdr.hdr_crc.wrapping_add(1);
    dev.raw_write(Area::Normal, 0, &encode_block(&hdr, b"abc"));

    let result = CalStore::open_with_device(test_config(&dir), dev.clone());

    assert!(matches!(
        result,
        Err(CalError::Scan(ScanError::CorruptHeader { addr: 0, .. }))
    ));
    assert!(!lock_file(&dir).exists());
}

#[test]
fn test_bad_geometry_fails_open() {
    let dir = TempDir::new().unwrap();
    let dev = MemDevice::new(Geometry {
        size: 8192,
        erase_size: 3000,
        write_size: 2048,
    });

    let result = CalStore::open_with_device(test_config(&dir), dev);

    assert!(matches!(result, Err(CalError::Device(_))));
    assert!(!lock_file(&dir).exists());
}

// =============================================================================
// Read Tests
// =============================================================================

#[test]
fn test_read_missing_block() {
    let (dir, dev) = setup(small_geometry());
    let mut store = open_store(&dev, &dir);

    assert!(matches!(store.read("nothing"), Err(CalError::NotFound(_))));
    assert!(matches!(store.read(""), Err(CalError::NotFound(_))));
}

#[test]
fn test_read_highest_version_wins() {
    let (dir, dev) = setup(small_geometry());
    place_block(&dev, Area::Normal, 0, "N", 0, b"a");
    place_block(&dev, Area::Normal, 2048, "N", 1, b"b");
    place_block(&dev, Area::Normal, 4096, "M", 0, b"c");
    let mut store = open_store(&dev, &dir);

    assert_eq!(store.read("N").unwrap(), b"b");
    assert_eq!(store.read("M").unwrap(), b"c");
}

#[test]
fn test_read_higher_version_at_lower_address() {
    let (dir, dev) = setup(small_geometry());
    place_block(&dev, Area::Normal, 0, "N", 4, b"newer");
    place_block(&dev, Area::Normal, 2048, "N", 3, b"older");
    let mut store = open_store(&dev, &dir);

    assert_eq!(store.read("N").unwrap(), b"newer");
}

#[test]
fn test_restricted_area_takes_precedence() {
    let dir = TempDir::new().unwrap();
    let dev = device_with_restricted(small_geometry());
    place_block(&dev, Area::Restricted, 0, "wlan-mac", 0, b"factory");
    place_block(&dev, Area::Normal, 0, "wlan-mac", 5, b"user");
    let mut store = open_store(&dev, &dir);

    assert_eq!(store.restricted_blocks().len(), 1);
    assert_eq!(store.read("wlan-mac").unwrap(), b"factory");
}

#[test]
fn test_corrupt_payload_is_reported_not_cached() {
    let (dir, dev) = setup(small_geometry());
    let mut hdr = header("cfg", 0, 0, b"payload");
    hdr.data_crc ^= 0xFF;
    hdr.hdr_crc = hdr.compute_crc();
    dev.raw_write(Area::Normal, 0, &encode_block(&hdr, b"payload"));
    let mut store = open_store(&dev, &dir);

    for _ in 0..2 {
        assert!(matches!(
            store.read("cfg"),
            Err(CalError::Scan(ScanError::CorruptPayload { .. }))
        ));
    }
    assert!(store.is_open());
}

// =============================================================================
// Write Tests
// =============================================================================

#[test]
fn test_write_read_round_trip() {
    let (dir, dev) = setup(small_geometry());
    let mut store = open_store(&dev, &dir);
    let payload: Vec<u8> = (0..200u8).collect();

    store.write("round-trip", &payload).unwrap();

    assert_eq!(store.read("round-trip").unwrap(), payload.as_slice());
}

#[test]
fn test_write_scenario_on_empty_device() {
    let (dir, dev) = setup(large_geometry());
    let mut store = open_store(&dev, &dir);

    store.write("cfg", b"first").unwrap();
    let first = store.normal_blocks().get(0).unwrap();
    assert_eq!(first.addr, 0);
    assert_eq!(first.header.block_version, 0);

    store.write("cfg", b"second").unwrap();
    let second = store.normal_blocks().get(1).unwrap();
    assert_eq!(second.addr, 2048);
    assert_eq!(second.header.block_version, 1);

    assert_eq!(store.read("cfg").unwrap(), b"second");
}

#[test]
fn test_write_page_layout_on_device() {
    let (dir, dev) = setup(small_geometry());
    let mut store = open_store(&dev, &dir);

    store.write("r&d_mode", b"\x01").unwrap();

    let raw = dev.snapshot(Area::Normal);
    let hdr = header_at(&dev, 0);
    assert!(hdr.crc_matches());
    assert_eq!(hdr.name.to_string(), "r&d_mode");
    assert_eq!(&hdr.name.as_bytes()[8..], &[0u8; 8]);
    assert_eq!(raw[HEADER_SIZE], 0x01);
    assert!(raw[HEADER_SIZE + 1..2048].iter().all(|&b| b == 0xFF));
    assert_eq!(dev.write_count(), 1);
}

#[test]
fn test_write_max_payload_and_too_large() {
    let (dir, dev) = setup(small_geometry());
    let mut store = open_store(&dev, &dir);
    let max = 2048 - HEADER_SIZE;

    store.write("full", &vec![7u8; max]).unwrap();
    let err = store.write("over", &vec![7u8; max + 1]).unwrap_err();

    assert!(matches!(err, CalError::Write(WriteError::TooLarge { len, max: m }) if len == max + 1 && m == max));
    assert_eq!(store.read("full").unwrap().len(), max);
}

#[test]
fn test_write_invalid_names() {
    let (dir, dev) = setup(small_geometry());
    let mut store = open_store(&dev, &dir);

    assert!(matches!(
        store.write("", b"x"),
        Err(CalError::Write(WriteError::InvalidName(_)))
    ));
    assert!(matches!(
        store.write("a-name-that-is-too-long", b"x"),
        Err(CalError::Write(WriteError::InvalidName(_)))
    ));
    assert!(store.normal_blocks().is_empty());
}

#[test]
fn test_write_identical_payload_is_noop() {
    let (dir, dev) = setup(small_geometry());
    let mut store = open_store(&dev, &dir);

    store.write("usb_host_mode", b"\x00").unwrap();
    store.write("usb_host_mode", b"\x00").unwrap();

    assert_eq!(store.normal_blocks().len(), 1);
    assert_eq!(dev.write_count(), 1);
}

#[test]
fn test_write_identical_to_scanned_block_is_noop() {
    let (dir, dev) = setup(small_geometry());
    place_block(&dev, Area::Normal, 0, "root_device", 2, b"mmc");
    let mut store = open_store(&dev, &dir);

    store.write("root_device", b"mmc").unwrap();

    assert_eq!(store.normal_blocks().len(), 1);
    assert_eq!(dev.write_count(), 0);
}

#[test]
fn test_write_refused_for_restricted_name() {
    let dir = TempDir::new().unwrap();
    let dev = device_with_restricted(small_geometry());
    place_block(&dev, Area::Restricted, 0, "wlan-mac", 0, b"factory");
    let mut store = open_store(&dev, &dir);

    let err = store.write("wlan-mac", b"spoofed").unwrap_err();

    assert!(matches!(err, CalError::Write(WriteError::RestrictedAreaConflict(_))));
    assert!(store.normal_blocks().is_empty());
    assert_eq!(store.read("wlan-mac").unwrap(), b"factory");
}

#[test]
fn test_write_fills_first_gap() {
    let (dir, dev) = setup(small_geometry());
    place_block(&dev, Area::Normal, 0, "a", 0, b"a");
    place_block(&dev, Area::Normal, 4096, "b", 0, b"b");
    let mut store = open_store(&dev, &dir);

    store.write("c", b"c").unwrap();

    let addrs: Vec<u64> = store.normal_blocks().iter().map(|b| b.addr).collect();
    assert_eq!(addrs, vec![0, 2048, 4096]);
}

#[test]
fn test_write_inherits_flags_and_bumps_version() {
    let (dir, dev) = setup(small_geometry());
    let hdr = header("pp_data", 6, 0x0004, b"old");
    dev.raw_write(Area::Normal, 0, &encode_block(&hdr, b"old"));
    let mut store = open_store(&dev, &dir);

    store.write("pp_data", b"new").unwrap();

    let written = header_at(&dev, 2048);
    assert_eq!(written.block_version, 7);
    assert_eq!(written.flags, 0x0004);
}

#[test]
fn test_write_version_overflow() {
    let (dir, dev) = setup(small_geometry());
    place_block(&dev, Area::Normal, 0, "old", 255, b"max");
    let mut store = open_store(&dev, &dir);

    let err = store.write("old", b"next").unwrap_err();

    assert!(matches!(err, CalError::Write(WriteError::VersionOverflow(_))));
}

#[test]
fn test_write_over_corrupt_active_block() {
    let (dir, dev) = setup(small_geometry());
    let mut hdr = header("cfg", 0, 0, b"same");
    hdr.data_crc ^= 1;
    hdr.hdr_crc = hdr.compute_crc();
    dev.raw_write(Area::Normal, 0, &encode_block(&hdr, b"same"));
    let mut store = open_store(&dev, &dir);

    store.write("cfg", b"same").unwrap();

    assert_eq!(store.read("cfg").unwrap(), b"same");
    assert_eq!(store.normal_blocks().len(), 2);
}

#[test]
fn test_write_no_space_leaves_index_unchanged() {
    let (dir, dev) = setup(small_geometry());
    let mut store = open_store(&dev, &dir);
    for n in ["a", "b", "c", "d"] {
        store.write(n, n.as_bytes()).unwrap();
    }

    let err = store.write("e", b"e").unwrap_err();

    assert!(matches!(err, CalError::Write(WriteError::NoSpace(_))));
    assert_eq!(store.normal_blocks().len(), 4);
    assert_eq!(dev.write_count(), 4);
    assert!(matches!(store.read("e"), Err(CalError::NotFound(_))));
}

#[test]
fn test_write_io_error_leaves_index_unchanged() {
    let (dir, dev) = setup(small_geometry());
    let mut store = open_store(&dev, &dir);
    store.write("cfg", b"v0").unwrap();

    dev.set_fail_writes(true);
    let err = store.write("cfg", b"v1").unwrap_err();

    assert!(matches!(err, CalError::Write(WriteError::Io(_))));
    assert_eq!(store.normal_blocks().len(), 1);
    assert_eq!(store.read("cfg").unwrap(), b"v0");

    dev.set_fail_writes(false);
    store.write("cfg", b"v1").unwrap();
    assert_eq!(store.read("cfg").unwrap(), b"v1");
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_reopen_sees_written_blocks() {
    let (dir, dev) = setup(large_geometry());
    {
        let mut store = open_store(&dev, &dir);
        store.write("a", b"alpha").unwrap();
        store.write("b", b"beta").unwrap();
        store.write("a", b"alpha-2").unwrap();
        store.close();
    }

    let mut store = open_store(&dev, &dir);

    assert_eq!(store.normal_blocks().len(), 3);
    assert_eq!(store.read("a").unwrap(), b"alpha-2");
    assert_eq!(store.read("b").unwrap(), b"beta");
    assert_eq!(store.normal_blocks().active(&name("a")).unwrap().header.block_version, 1);
}

#[test]
fn test_blocks_listing() {
    let dir = TempDir::new().unwrap();
    let dev = device_with_restricted(small_geometry());
    place_block(&dev, Area::Restricted, 0, "otp", 0, b"o");
    let mut store = open_store(&dev, &dir);
    store.write("cfg", b"1").unwrap();
    store.write("cfg", b"2").unwrap();

    let blocks = store.blocks();

    assert_eq!(blocks.len(), 3);
    assert_eq!(blocks[0].area, Area::Restricted);
    assert!(blocks[0].active);
    assert_eq!((blocks[1].addr, blocks[1].active), (0, false));
    assert_eq!((blocks[2].addr, blocks[2].active), (2048, true));
    assert_eq!(blocks[2].name, name("cfg"));
}
