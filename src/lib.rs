//! # calstore
//!
//! A log-structured configuration store living inside a raw MTD flash
//! partition:
//! - Named, versioned, CRC-checked records ("CAL blocks")
//! - Index rebuilt on open by linear scan of the normal and restricted areas
//! - Highest-version-wins lookup, restricted area shadows normal area
//! - Append-only writes into scanned empty space, never overwriting data
//! - Cooperative single-writer lock file per device
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        CalStore                             │
//! │             open → read / write / compact → close           │
//! └──────┬──────────────────────┬───────────────────────┬───────┘
//!        │                      │                       │
//!        ▼                      ▼                       ▼
//! ┌─────────────┐      ┌─────────────────┐     ┌─────────────────┐
//! │ LockManager │      │   Block Index   │     │ Write Allocator │
//! │ (lock file) │      │ normal │ restr. │     │  (first fit)    │
//! └─────────────┘      └────────┬────────┘     └────────┬────────┘
//!                               │ scan                  │ program
//!                               ▼                       ▼
//!                      ┌─────────────────────────────────────────┐
//!                      │         FlashDevice (MTD / memory)      │
//!                      │  geometry · OTP regions · area select   │
//!                      └─────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod checksum;
pub mod device;
pub mod lock;
pub mod block;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CalError, LockError, Result, ScanError, WriteError};
pub use config::{Config, RestrictedMode};
pub use device::{Area, FlashDevice, Geometry, MemDevice, Region};
pub use store::{BlockInfo, CalStore, CompactionReport};

#[cfg(unix)]
pub use device::MtdDevice;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of calstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
