// Licensed under the Apache-2.0 license
#![cfg_attr(target_arch = "riscv32", no_std)]

//! Flash access for the DCT store: the driver interface it consumes, the
//! per-operation session guard and the plain/secure access strategies.

pub mod hil;
pub mod session;
#[cfg(feature = "sim")]
pub mod sim;

pub use hil::{FlashDevice, FlashDrvError, WriteMode};
pub use session::{FlashAccess, FlashSession, MetadataInterleavedMap, SecureAddressMap};
