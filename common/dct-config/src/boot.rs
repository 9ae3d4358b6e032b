// Licensed under the Apache-2.0 license

use dct_layout::AppSlot;

/// Half-open physical address range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressRange {
    pub start: u32,
    pub end: u32,
}

impl AddressRange {
    pub const fn new(start: u32, end: u32) -> Self {
        AddressRange { start, end }
    }

    pub fn contains(&self, address: u32) -> bool {
        (self.start..self.end).contains(&address)
    }
}

/// Which loadable segments the boot loader leaves in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadPolicy {
    /// Segments linked to run directly from flash.
    pub execute_in_place: &'static [AddressRange],
    /// Memory that keeps its contents across deep sleep and is restored by
    /// the application itself.
    pub always_on: &'static [AddressRange],
}

impl LoadPolicy {
    pub const LOAD_ALL: LoadPolicy = LoadPolicy {
        execute_in_place: &[],
        always_on: &[],
    };

    /// Returns true when a segment with the given physical address must not
    /// be copied.
    pub fn skips(&self, physical_address: u32) -> bool {
        self.execute_in_place
            .iter()
            .chain(self.always_on.iter())
            .any(|range| range.contains(physical_address))
    }
}

/// Boot detail written into a freshly synthesized DCT.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FactoryBoot {
    /// Nothing marked loadable; the bootloader falls back to its own default.
    Unset,
    /// Load the image of an app slot into internal memory.
    Slot(AppSlot),
}
