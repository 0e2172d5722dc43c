//! Block Module
//!
//! On-device CAL block format, the per-area block index and the scanner that
//! rebuilds it from raw flash.
//!
//! ## Header Format (36 bytes, packed, native byte order)
//! ```text
//! ┌───────────┬────────┬─────────┬───────┬───────────┬─────────┬──────────┬─────────┐
//! │ Magic (4) │ HdrVer │ BlkVer  │ Flags │ Name (16) │ Len (4) │ DataCRC  │ HdrCRC  │
//! │  "ConF"   │  (1)   │  (1)    │  (2)  │           │         │   (4)    │  (4)    │
//! └───────────┴────────┴─────────┴───────┴───────────┴─────────┴──────────┴─────────┘
//! ```
//! `HdrCRC` covers the first 32 bytes; `DataCRC` covers the payload that
//! immediately follows the header.

mod header;
mod index;
mod scanner;

pub use header::{BlockHeader, BlockName, FLAG_VARIABLE_LENGTH, HEADER_SIZE, HEADER_VERSION, MAGIC, NAME_LEN};
pub use index::{Block, BlockList};
pub use scanner::{scan_area, scan_region};

/// Round `value` up to the next multiple of `align`
pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}
