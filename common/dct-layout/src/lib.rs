// Licensed under the Apache-2.0 license
#![cfg_attr(target_arch = "riscv32", no_std)]

//! Bit-exact on-flash structures of the Device Configuration Table (DCT)
//! and its App LUT.
//!
//! All structures are little-endian and packed; their sizes are asserted at
//! compile time because the bootloader reading them is never upgraded.

pub mod app;
pub mod header;
pub mod location;
pub mod schema;
pub mod sections;

/// Number of app slots whose location is recorded in the DCT header.
pub const DCT_MAX_APP_COUNT: usize = 8;

pub use app::{AppHeader, AppLutLayout, AppSlot, SectorRun, MAX_SECTOR_RUNS};
pub use header::{BootDetail, CrcInHeaderDctHeader, DctHeader, LoadDetails, DCT_HEADER_SIZE};
pub use location::{FixedLocation, ImageLocation, RawImageLocation};
pub use schema::{DctSection, OptionalSections, SchemaId, SchemaLayout, CURRENT_LAYOUT};
pub use sections::{DctVersionStamp, UsageFlags};
