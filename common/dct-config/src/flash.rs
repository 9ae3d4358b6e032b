// Licensed under the Apache-2.0 license

use dct_layout::{
    AppLutLayout, ImageLocation, OptionalSections, SchemaId, UsageFlags,
    CURRENT_LAYOUT, DCT_MAX_APP_COUNT,
};

use crate::boot::{AddressRange, FactoryBoot, LoadPolicy};

pub const SFLASH_SECTOR_SIZE: u32 = 4096;
pub const INTERNAL_SECTOR_SIZE: u32 = 2048;

/// A named region of the flash device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashRegion {
    pub name: &'static str, // name of the region
    pub offset: u32,        // absolute flash offset in bytes
    pub size: u32,          // size in bytes
}

impl FlashRegion {
    pub const fn end(&self) -> u32 {
        self.offset + self.size
    }

    pub fn overlaps(&self, other: &FlashRegion) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// Schema written by the bootloader the device shipped with. A bank carrying
/// no version stamp is interpreted with this layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyBootloader {
    pub schema: SchemaId,
    /// Optional sections the shipped application compiled into its DCT.
    pub optional: OptionalSections,
}

/// Secure flash keeps per-sector metadata next to the payload, shrinking
/// the usable part of every DCT bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecureDct {
    pub metadata_size: u32, // bytes of metadata per sector
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    Misaligned(&'static str),
    BankSizeMismatch,
    Overlap(&'static str, &'static str),
    BankTooSmall { needed: u32, available: u32 },
    LutTooSmall,
    AppsAreaOverlaps(&'static str),
    CapacityExceeded(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DctPlatform {
    pub name: &'static str,
    pub peripheral_id: u32,
    pub sector_size: u32,
    pub dct_banks: [FlashRegion; 2],
    /// One sector holding the headers of all app slots back to back.
    pub apps_lut: FlashRegion,
    /// First sector the app allocator may hand out.
    pub apps_first_sector: u32,
    pub bootloader: LegacyBootloader,
    pub usage_flags: UsageFlags,
    pub factory_boot: FactoryBoot,
    pub secure_dct: Option<SecureDct>,
    pub load_policy: LoadPolicy,
}

impl DctPlatform {
    /// Checks region alignment, sizes and overlap. `capacity` is the size of
    /// the flash device when known.
    pub fn validate(&self, capacity: Option<u32>) -> Result<(), ConfigError> {
        let sector = self.sector_size;
        let [bank_a, bank_b] = &self.dct_banks;
        for region in [bank_a, bank_b, &self.apps_lut] {
            if sector == 0 || region.offset % sector != 0 || region.size % sector != 0 {
                return Err(ConfigError::Misaligned(region.name));
            }
            if let Some(capacity) = capacity {
                if region.end() > capacity {
                    return Err(ConfigError::CapacityExceeded(region.name));
                }
            }
        }
        if bank_a.size != bank_b.size {
            return Err(ConfigError::BankSizeMismatch);
        }
        let pairs = [
            (bank_a, bank_b),
            (bank_a, &self.apps_lut),
            (bank_b, &self.apps_lut),
        ];
        for (first, second) in pairs {
            if first.overlaps(second) {
                return Err(ConfigError::Overlap(first.name, second.name));
            }
        }
        let needed = CURRENT_LAYOUT.data_size() as u32;
        let available = self.bank_usable_size();
        if available < needed {
            return Err(ConfigError::BankTooSmall { needed, available });
        }
        let lut_needed = self.app_lut_layout().header_size() as u32 * DCT_MAX_APP_COUNT as u32;
        if self.apps_lut.size < lut_needed {
            return Err(ConfigError::LutTooSmall);
        }
        // The allocator hands out every sector from `apps_first_sector` on.
        let apps_start = self.apps_first_sector * sector;
        for region in [bank_a, bank_b, &self.apps_lut] {
            if apps_start < region.end() {
                return Err(ConfigError::AppsAreaOverlaps(region.name));
            }
        }
        Ok(())
    }

    pub fn bank_size(&self) -> u32 {
        self.dct_banks[0].size
    }

    /// Bytes of a bank addressable by the store.
    pub fn bank_usable_size(&self) -> u32 {
        match self.secure_dct {
            Some(secure) => {
                let sectors = self.bank_size() / self.sector_size;
                self.bank_size() - sectors * secure.metadata_size
            }
            None => self.bank_size(),
        }
    }

    pub fn app_lut_layout(&self) -> AppLutLayout {
        if self.bootloader.schema.app_lut_has_secure_flag() {
            AppLutLayout::WithSecureFlag
        } else {
            AppLutLayout::WithoutSecureFlag
        }
    }

    /// Address of the LUT header of an app slot.
    pub fn app_header_address(&self, index: usize) -> u32 {
        self.apps_lut.offset + (index * self.app_lut_layout().header_size()) as u32
    }

    /// Location a freshly synthesized DCT records for an app slot.
    pub fn default_app_location(&self, index: usize) -> ImageLocation {
        ImageLocation::external_fixed(
            self.app_header_address(index),
            self.app_lut_layout().header_size() as u32,
        )
    }
}

const SFLASH_XIP: [AddressRange; 1] = [AddressRange::new(0x1400_0000, 0x1800_0000)];
const SFLASH_ALWAYS_ON: [AddressRange; 1] = [AddressRange::new(0x0074_0000, 0x0074_8000)];

/// Serial flash platform: App LUT in sector 0, two 16 KiB DCT banks behind
/// it, application images from sector 9 onwards.
pub const SFLASH_PLATFORM: DctPlatform = DctPlatform {
    name: "sflash",
    peripheral_id: 0,
    sector_size: SFLASH_SECTOR_SIZE,
    dct_banks: [
        FlashRegion {
            name: "dct_bank_a",
            offset: 0x1000,
            size: 0x4000,
        },
        FlashRegion {
            name: "dct_bank_b",
            offset: 0x5000,
            size: 0x4000,
        },
    ],
    apps_lut: FlashRegion {
        name: "apps_lut",
        offset: 0x0000,
        size: SFLASH_SECTOR_SIZE,
    },
    apps_first_sector: 9,
    bootloader: LegacyBootloader {
        schema: SchemaId::CURRENT,
        optional: OptionalSections::ALL,
    },
    usage_flags: UsageFlags::all(),
    factory_boot: FactoryBoot::Unset,
    secure_dct: None,
    load_policy: LoadPolicy {
        execute_in_place: &SFLASH_XIP,
        always_on: &SFLASH_ALWAYS_ON,
    },
};

/// Internal flash platform with 2 KiB sectors and the bootloader in the
/// first 16 KiB.
pub const INTERNAL_FLASH_PLATFORM: DctPlatform = DctPlatform {
    name: "internal",
    peripheral_id: 1,
    sector_size: INTERNAL_SECTOR_SIZE,
    dct_banks: [
        FlashRegion {
            name: "dct_bank_a",
            offset: 0x4000,
            size: 0x4000,
        },
        FlashRegion {
            name: "dct_bank_b",
            offset: 0x8000,
            size: 0x4000,
        },
    ],
    apps_lut: FlashRegion {
        name: "apps_lut",
        offset: 0x3800,
        size: INTERNAL_SECTOR_SIZE,
    },
    apps_first_sector: 24,
    bootloader: LegacyBootloader {
        schema: SchemaId::CURRENT,
        optional: OptionalSections::ALL,
    },
    usage_flags: UsageFlags::all(),
    factory_boot: FactoryBoot::Unset,
    secure_dct: None,
    load_policy: LoadPolicy::LOAD_ALL,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_platforms_are_valid() {
        assert_eq!(SFLASH_PLATFORM.validate(Some(1 << 20)), Ok(()));
        assert_eq!(INTERNAL_FLASH_PLATFORM.validate(None), Ok(()));
    }

    #[test]
    fn test_validate_rejects_bad_regions() {
        let mut platform = SFLASH_PLATFORM;
        platform.dct_banks[1].offset = 0x3000;
        assert_eq!(
            platform.validate(None),
            Err(ConfigError::Overlap("dct_bank_a", "dct_bank_b"))
        );

        let mut platform = SFLASH_PLATFORM;
        platform.dct_banks[0].offset = 0x1800;
        assert_eq!(platform.validate(None), Err(ConfigError::Misaligned("dct_bank_a")));

        let mut platform = SFLASH_PLATFORM;
        platform.dct_banks[0].size = 0x2000;
        platform.dct_banks[1].size = 0x2000;
        assert!(matches!(
            platform.validate(None),
            Err(ConfigError::BankTooSmall { .. })
        ));

        assert_eq!(
            SFLASH_PLATFORM.validate(Some(0x8000)),
            Err(ConfigError::CapacityExceeded("dct_bank_b"))
        );
    }

    #[test]
    fn test_apps_area_must_follow_reserved_regions() {
        let mut platform = INTERNAL_FLASH_PLATFORM;
        platform.apps_first_sector = 0;
        assert_eq!(
            platform.validate(None),
            Err(ConfigError::AppsAreaOverlaps("dct_bank_a"))
        );

        // Sector 20 sits between bank A and bank B.
        platform.apps_first_sector = 20;
        assert_eq!(
            platform.validate(None),
            Err(ConfigError::AppsAreaOverlaps("dct_bank_b"))
        );

        let mut platform = SFLASH_PLATFORM;
        platform.apps_first_sector = 8;
        assert_eq!(
            platform.validate(None),
            Err(ConfigError::AppsAreaOverlaps("dct_bank_b"))
        );
        platform.apps_first_sector = 9;
        assert_eq!(platform.validate(None), Ok(()));
    }

    #[test]
    fn test_secure_dct_shrinks_bank() {
        let mut platform = SFLASH_PLATFORM;
        platform.secure_dct = Some(SecureDct { metadata_size: 64 });
        assert_eq!(platform.bank_usable_size(), 0x4000 - 4 * 64);
        assert_eq!(platform.validate(None), Ok(()));
    }

    #[test]
    fn test_app_header_addresses() {
        assert_eq!(SFLASH_PLATFORM.app_header_address(0), 0);
        assert_eq!(SFLASH_PLATFORM.app_header_address(5), 5 * 34);

        let mut platform = SFLASH_PLATFORM;
        platform.bootloader.schema = SchemaId::V3_3_1;
        assert_eq!(platform.app_header_address(5), 5 * 33);
        assert_eq!(
            platform.default_app_location(1),
            ImageLocation::external_fixed(33, 33)
        );
    }
}
