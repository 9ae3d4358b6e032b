// Licensed under the Apache-2.0 license

//! App LUT headers: one per app slot, each listing the sector runs that make
//! up the slot's image.

use arrayvec::ArrayVec;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

/// Maximum number of sector runs an app header can describe.
pub const MAX_SECTOR_RUNS: usize = 8;

/// App slots with a location recorded in the DCT header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum AppSlot {
    FactoryReset = 0,
    DctImage = 1,
    OtaApp = 2,
    FilesystemImage = 3,
    WifiFirmware = 4,
    App0 = 5,
    App1 = 6,
    App2 = 7,
}

impl AppSlot {
    pub const fn index(self) -> usize {
        self as usize
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RawSectorRun {
    pub start: u16,
    pub count: u16,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RawAppHeader {
    pub count: u8,
    pub secure: u8,
    pub sectors: [RawSectorRun; MAX_SECTOR_RUNS],
}

/// App header of LUTs written before the secure flag existed.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct InsecureAppHeader {
    pub count: u8,
    pub sectors: [RawSectorRun; MAX_SECTOR_RUNS],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppLutLayout {
    WithSecureFlag,
    WithoutSecureFlag,
}

impl AppLutLayout {
    pub const fn header_size(self) -> usize {
        match self {
            AppLutLayout::WithSecureFlag => core::mem::size_of::<RawAppHeader>(),
            AppLutLayout::WithoutSecureFlag => core::mem::size_of::<InsecureAppHeader>(),
        }
    }
}

/// A contiguous range of flash sectors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectorRun {
    pub start: u16,
    pub count: u16,
}

impl SectorRun {
    /// First sector after the run.
    pub fn end(&self) -> u32 {
        self.start as u32 + self.count as u32
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppHeader {
    pub secure: bool,
    pub runs: ArrayVec<SectorRun, MAX_SECTOR_RUNS>,
}

impl AppHeader {
    /// Decodes a header. An erased header reads as an empty one; a run
    /// count beyond [`MAX_SECTOR_RUNS`] is rejected.
    pub fn decode(bytes: &[u8], layout: AppLutLayout) -> Option<AppHeader> {
        let (count, secure, sectors) = match layout {
            AppLutLayout::WithSecureFlag => {
                let (raw, _) = RawAppHeader::read_from_prefix(bytes).ok()?;
                (raw.count, raw.secure, raw.sectors)
            }
            AppLutLayout::WithoutSecureFlag => {
                let (raw, _) = InsecureAppHeader::read_from_prefix(bytes).ok()?;
                (raw.count, 0, raw.sectors)
            }
        };
        if count == 0xFF {
            return Some(AppHeader::default());
        }
        if count as usize > MAX_SECTOR_RUNS {
            return None;
        }
        let runs = sectors[..count as usize]
            .iter()
            .map(|run| SectorRun {
                start: run.start,
                count: run.count,
            })
            .collect();
        Some(AppHeader {
            secure: secure == 1,
            runs,
        })
    }

    /// Serializes the header into the first `layout.header_size()` bytes of
    /// `out`. Unused run slots are zeroed.
    pub fn encode(&self, layout: AppLutLayout, out: &mut [u8]) -> Option<()> {
        let mut sectors = [RawSectorRun::new_zeroed(); MAX_SECTOR_RUNS];
        for (raw, run) in sectors.iter_mut().zip(self.runs.iter()) {
            raw.start = run.start;
            raw.count = run.count;
        }
        let count = self.runs.len() as u8;
        match layout {
            AppLutLayout::WithSecureFlag => RawAppHeader {
                count,
                secure: self.secure as u8,
                sectors,
            }
            .write_to_prefix(out)
            .ok(),
            AppLutLayout::WithoutSecureFlag => InsecureAppHeader { count, sectors }
                .write_to_prefix(out)
                .ok(),
        }
    }

    pub fn sector_count(&self) -> u32 {
        self.runs.iter().map(|run| run.count as u32).sum()
    }

    /// First sector after the highest run of this header.
    pub fn end_sector(&self) -> u32 {
        self.runs.iter().map(SectorRun::end).max().unwrap_or(0)
    }
}

const _: () = assert!(AppLutLayout::WithSecureFlag.header_size() == 34);
const _: () = assert!(AppLutLayout::WithoutSecureFlag.header_size() == 33);
