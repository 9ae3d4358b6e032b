// Licensed under the Apache-2.0 license

#![cfg_attr(target_arch = "riscv32", no_std)]

//! Platform description consumed by the DCT store: where the banks and the
//! App LUT live, which schema the bootloader was built with, and how images
//! are loaded at boot.

pub mod boot;
pub mod flash;

pub use boot::{AddressRange, FactoryBoot, LoadPolicy};
pub use flash::{
    ConfigError, DctPlatform, FlashRegion, LegacyBootloader, SecureDct, INTERNAL_FLASH_PLATFORM,
    SFLASH_PLATFORM,
};
