//! Configuration for calstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// Main configuration for a calstore handle
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Device Configuration
    // -------------------------------------------------------------------------
    /// Path to the MTD character device holding the CAL partition
    pub device_path: PathBuf,

    /// OTP selector used to address the restricted area
    pub restricted_mode: RestrictedMode,

    // -------------------------------------------------------------------------
    // Lock Configuration
    // -------------------------------------------------------------------------
    /// Directory for the advisory lock file.
    /// Lock file layout:
    ///   {lock_dir}/cal.{device basename}.lock
    pub lock_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Write Configuration
    // -------------------------------------------------------------------------
    /// Run one compaction pass when a write finds no free page
    pub compact_on_full: bool,
}

/// Which one-time-programmable region set backs the restricted area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictedMode {
    /// Factory-programmed OTP (MTD_OTP_FACTORY)
    Factory,

    /// User-programmable OTP (MTD_OTP_USER)
    User,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from("/dev/mtd1"),
            restricted_mode: RestrictedMode::User,
            lock_dir: PathBuf::from("/tmp"),
            compact_on_full: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the MTD device path
    pub fn device_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.device_path = path.into();
        self
    }

    /// Set the OTP selector for the restricted area
    pub fn restricted_mode(mut self, mode: RestrictedMode) -> Self {
        self.config.restricted_mode = mode;
        self
    }

    /// Set the directory holding the lock file
    pub fn lock_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.lock_dir = path.into();
        self
    }

    /// Enable or disable compaction when the normal area is full
    pub fn compact_on_full(mut self, enabled: bool) -> Self {
        self.config.compact_on_full = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
