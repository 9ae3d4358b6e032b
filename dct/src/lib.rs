// Licensed under the Apache-2.0 license

//! Device Configuration Table store.
//!
//! Configuration lives in two flash banks. Every change is written to the
//! bank that is not current and committed by clearing a single byte, so a
//! power loss at any point leaves one complete bank behind. Banks written
//! by older bootloaders are migrated to the current schema on first use.

mod apps;
mod boot;
mod crc;
mod engine;
pub mod error;
pub mod lock;
mod migrate;
mod store;

pub use apps::{get_physical_address, EraseTracker};
pub use boot::{AppHandle, LoadTarget};
pub use crc::crc32;
pub use engine::Bank;
pub use error::{DctError, DctResult, DctStatus};
pub use lock::{DefaultLock, NoLock, StdMutex, StoreLock};
pub use store::{DctStore, Lifecycle, StoreState};

pub use dct_config;
pub use dct_flash;
pub use dct_layout;
