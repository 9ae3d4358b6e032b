// Licensed under the Apache-2.0 license

//! Image location descriptors.
//!
//! The raw form is part of the over-the-air compatibility contract and is
//! laid out exactly as the bootloader expects it: a 32-bit id followed by a
//! 32-byte detail area that holds either a fixed flash location or a file
//! name.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

/// Size of the detail area of a raw image location, and the longest file name
/// (including its terminator) a filesystem location can carry.
pub const FILENAME_SIZE: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum ImageLocationId {
    None = 0,
    Internal = 1,
    ExternalFixed = 2,
    FilesystemFile = 3,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RawImageLocation {
    pub id: u32,
    pub detail: [u8; FILENAME_SIZE],
}

/// A fixed byte range in flash.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FixedLocation {
    pub location: u32,
    pub size: u32,
}

/// Where a binary image lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImageLocation {
    #[default]
    None,
    Internal(FixedLocation),
    ExternalFixed(FixedLocation),
    FilesystemFile([u8; FILENAME_SIZE]),
}

impl ImageLocation {
    pub const fn external_fixed(location: u32, size: u32) -> Self {
        ImageLocation::ExternalFixed(FixedLocation { location, size })
    }

    /// Builds a filesystem location. Names longer than 31 bytes are truncated
    /// so the stored name is always NUL terminated.
    pub fn filesystem_file(name: &str) -> Self {
        let mut file = [0u8; FILENAME_SIZE];
        let len = name.len().min(FILENAME_SIZE - 1);
        file[..len].copy_from_slice(&name.as_bytes()[..len]);
        ImageLocation::FilesystemFile(file)
    }

    pub fn id(&self) -> ImageLocationId {
        match self {
            ImageLocation::None => ImageLocationId::None,
            ImageLocation::Internal(_) => ImageLocationId::Internal,
            ImageLocation::ExternalFixed(_) => ImageLocationId::ExternalFixed,
            ImageLocation::FilesystemFile(_) => ImageLocationId::FilesystemFile,
        }
    }

    /// Returns the flash address for external fixed locations.
    pub fn external_address(&self) -> Option<u32> {
        match self {
            ImageLocation::ExternalFixed(fixed) => Some(fixed.location),
            _ => None,
        }
    }
}

impl From<&RawImageLocation> for ImageLocation {
    fn from(raw: &RawImageLocation) -> Self {
        let fixed = || {
            let detail = raw.detail;
            FixedLocation {
                location: u32::from_le_bytes([detail[0], detail[1], detail[2], detail[3]]),
                size: u32::from_le_bytes([detail[4], detail[5], detail[6], detail[7]]),
            }
        };
        match ImageLocationId::try_from(raw.id) {
            Ok(ImageLocationId::Internal) => ImageLocation::Internal(fixed()),
            Ok(ImageLocationId::ExternalFixed) => ImageLocation::ExternalFixed(fixed()),
            Ok(ImageLocationId::FilesystemFile) => ImageLocation::FilesystemFile(raw.detail),
            // Erased or unknown ids carry no usable location.
            Ok(ImageLocationId::None) | Err(_) => ImageLocation::None,
        }
    }
}

impl From<RawImageLocation> for ImageLocation {
    fn from(raw: RawImageLocation) -> Self {
        ImageLocation::from(&raw)
    }
}

impl From<&ImageLocation> for RawImageLocation {
    fn from(location: &ImageLocation) -> Self {
        let mut raw = RawImageLocation::new_zeroed();
        raw.id = location.id().into();
        match location {
            ImageLocation::None => {}
            ImageLocation::Internal(fixed) | ImageLocation::ExternalFixed(fixed) => {
                let mut detail = [0u8; FILENAME_SIZE];
                detail[..4].copy_from_slice(&fixed.location.to_le_bytes());
                detail[4..8].copy_from_slice(&fixed.size.to_le_bytes());
                raw.detail = detail;
            }
            ImageLocation::FilesystemFile(name) => raw.detail = *name,
        }
        raw
    }
}

impl From<ImageLocation> for RawImageLocation {
    fn from(location: ImageLocation) -> Self {
        RawImageLocation::from(&location)
    }
}
