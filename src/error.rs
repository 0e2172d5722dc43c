//! Error types for calstore
//!
//! Provides a unified error type for all operations, with nested enums for
//! the lock, scan and write failure classes so callers can match on them.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using CalError
pub type Result<T> = std::result::Result<T, CalError>;

/// Unified error type for calstore operations
#[derive(Debug, Error)]
pub enum CalError {
    // -------------------------------------------------------------------------
    // Device Errors
    // -------------------------------------------------------------------------
    /// Control request or geometry probe failed (fatal to open)
    #[error("Device error: {0}")]
    Device(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Lock / Scan / Write Errors
    // -------------------------------------------------------------------------
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Write(#[from] WriteError),

    // -------------------------------------------------------------------------
    // Lookup / Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Block not found: {0}")]
    NotFound(String),

    #[error("Storage handle is closed")]
    Closed,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failures of the cooperative lock-file protocol
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process holds the store open
    #[error("Device already locked: {} exists", .0.display())]
    AlreadyLocked(PathBuf),

    #[error("Cannot derive lock file name from device path {}", .0.display())]
    InvalidDevicePath(PathBuf),

    #[error("Lock file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Data found on the device that cannot be safely interpreted
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Unsupported header version {version} at {addr:#x}")]
    UnsupportedVersion { addr: u64, version: u8 },

    #[error("Corrupt block header at {addr:#x}: {reason}")]
    CorruptHeader { addr: u64, reason: String },

    #[error("Corrupt payload for block '{name}' at {addr:#x}")]
    CorruptPayload { name: String, addr: u64 },
}

/// Failures local to one write attempt; the handle stays usable
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Invalid block name: {0:?}")]
    InvalidName(String),

    #[error("Payload too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },

    #[error("Block '{0}' lives in the restricted area and cannot be shadowed")]
    RestrictedAreaConflict(String),

    #[error("No free write page for block '{0}'")]
    NoSpace(String),

    #[error("Block '{0}' has reached the maximum block version")]
    VersionOverflow(String),

    #[error("Write failed: {0}")]
    Io(#[source] std::io::Error),

    #[error("Compaction failed: {0}")]
    CompactionFailed(String),
}
