// Licensed under the Apache-2.0 license

use core::mem::offset_of;

use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::location::{ImageLocation, RawImageLocation};
use crate::DCT_MAX_APP_COUNT;

/// Magic number stamped into every DCT header.
pub const DCT_HEADER_MAGIC: u32 = 0x4d43_5242;

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RawLoadDetails {
    pub source: RawImageLocation,
    pub destination: RawImageLocation,
    pub load_once: u8,
    pub valid: u8,
    pub padding: [u8; 2],
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RawBootDetail {
    pub load_details: RawLoadDetails,
    pub entry_point: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadDetails {
    pub source: ImageLocation,
    pub destination: ImageLocation,
    pub load_once: bool,
    pub valid: bool,
}

/// What the bootloader loads at startup and where it jumps afterwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BootDetail {
    pub load_details: LoadDetails,
    pub entry_point: u32,
}

impl From<&RawBootDetail> for BootDetail {
    fn from(raw: &RawBootDetail) -> Self {
        let load = raw.load_details;
        BootDetail {
            load_details: LoadDetails {
                source: ImageLocation::from(load.source),
                destination: ImageLocation::from(load.destination),
                load_once: load.load_once != 0,
                valid: load.valid != 0,
            },
            entry_point: raw.entry_point,
        }
    }
}

impl From<&BootDetail> for RawBootDetail {
    fn from(detail: &BootDetail) -> Self {
        let mut raw = RawBootDetail::new_zeroed();
        raw.load_details.source = detail.load_details.source.into();
        raw.load_details.destination = detail.load_details.destination.into();
        raw.load_details.load_once = detail.load_details.load_once as u8;
        raw.load_details.valid = detail.load_details.valid as u8;
        raw.entry_point = detail.entry_point;
        raw
    }
}

/// Header at the start of every DCT bank.
///
/// The layout is frozen: the bootloader reads it directly and cannot be
/// upgraded, so fields may never be added, removed or moved.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct DctHeader {
    pub full_size: u32,
    pub used_size: u32,
    pub write_incomplete: u8,
    pub is_current_dct: u8,
    pub app_valid: u8,
    pub mfg_info_programmed: u8,
    pub magic_number: u32,
    pub boot_detail: RawBootDetail,
    pub apps_locations: [RawImageLocation; DCT_MAX_APP_COUNT],
    pub load_app_func: u32,
    pub reserved: [u8; 4],
}

pub const DCT_HEADER_SIZE: usize = core::mem::size_of::<DctHeader>();
pub const WRITE_INCOMPLETE_OFFSET: usize = offset_of!(DctHeader, write_incomplete);
pub const IS_CURRENT_DCT_OFFSET: usize = offset_of!(DctHeader, is_current_dct);
pub const APPS_LOCATIONS_OFFSET: usize = offset_of!(DctHeader, apps_locations);
pub const BOOT_DETAIL_OFFSET: usize = offset_of!(DctHeader, boot_detail);

impl DctHeader {
    /// Minimal sanity check of a header: magic present, sizes consistent and
    /// no commit left half done.
    pub fn verify(&self) -> bool {
        let (magic, used_size, full_size) = (self.magic_number, self.used_size, self.full_size);
        magic == DCT_HEADER_MAGIC && used_size <= full_size && self.write_incomplete == 0
    }

    pub fn app_location(&self, index: usize) -> Option<ImageLocation> {
        self.apps_locations.get(index).map(ImageLocation::from)
    }

    pub fn boot_detail(&self) -> BootDetail {
        BootDetail::from(&self.boot_detail)
    }
}

/// Header of the schemas that kept the bank CRC and sequence number in the
/// header rather than in a version stamp. Same size as [`DctHeader`]; the
/// `is_current_dct` byte holds `initial_write` and the trailing word holds
/// the CRC.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct CrcInHeaderDctHeader {
    pub full_size: u32,
    pub used_size: u32,
    pub write_incomplete: u8,
    pub initial_write: u8,
    pub app_valid: u8,
    pub mfg_info_programmed: u8,
    pub magic_number: u32,
    pub boot_detail: RawBootDetail,
    pub apps_locations: [RawImageLocation; DCT_MAX_APP_COUNT],
    pub crc32: u32,
    pub sequence: u8,
    pub padding: [u8; 3],
}

const _: () = assert!(core::mem::size_of::<RawBootDetail>() == 80);
const _: () = assert!(DCT_HEADER_SIZE == 392);
const _: () = assert!(core::mem::size_of::<CrcInHeaderDctHeader>() == DCT_HEADER_SIZE);
