// Licensed under the Apache-2.0 license

use dct_config::{DctPlatform, FlashRegion};
use dct_flash::{FlashDevice, FlashSession, SecureAddressMap, WriteMode};
use dct_layout::{BootDetail, DctHeader, DctSection, DctVersionStamp, ImageLocation};
use log::{debug, info};
use zerocopy::{FromBytes, IntoBytes};

use crate::engine::{Bank, Engine};
use crate::error::{DctError, DctResult};
use crate::lock::{DefaultLock, StoreLock};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Uninit,
    Ready,
    ShutDown,
}

/// State shared by every operation on a store.
pub struct StoreState {
    lifecycle: Lifecycle,
    current: Option<Bank>,
}

impl StoreState {
    fn new() -> Self {
        StoreState {
            lifecycle: Lifecycle::Uninit,
            current: None,
        }
    }
}

/// The Device Configuration Table of one platform.
///
/// Every public operation takes the lock once, opens a flash session, runs
/// to completion and releases both. Operations never call each other
/// through the public surface.
pub struct DctStore<'a, F: FlashDevice, L: StoreLock<StoreState> = DefaultLock<StoreState>> {
    flash: &'a F,
    platform: DctPlatform,
    secure_map: Option<&'a dyn SecureAddressMap>,
    state: L,
}

impl<'a, F: FlashDevice, L: StoreLock<StoreState>> DctStore<'a, F, L> {
    /// Creates a store over `flash` after checking the platform layout.
    ///
    /// # Arguments
    ///
    /// * `flash` - Driver of the device holding the DCT banks and app LUT.
    /// * `platform` - Where the banks, LUT and app area live.
    ///
    /// # Returns
    ///
    /// Returns `Ok(DctStore)` in the `Uninit` state, or
    /// `DctError::Config` when the layout is inconsistent.
    pub fn new(flash: &'a F, platform: DctPlatform) -> DctResult<Self> {
        platform.validate(None)?;
        Ok(DctStore {
            flash,
            platform,
            secure_map: None,
            state: L::new(StoreState::new()),
        })
    }

    /// Address translation for secure DCT banks and secure apps.
    pub fn with_secure_map(mut self, map: &'a dyn SecureAddressMap) -> Self {
        self.secure_map = Some(map);
        self
    }

    pub fn platform(&self) -> &DctPlatform {
        &self.platform
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.with(|state| state.lifecycle)
    }

    /// Moves the store to `Ready`. Idempotent; a shut down store stays shut
    /// down.
    pub fn init(&self) -> DctResult<()> {
        self.state.with(|state| match state.lifecycle {
            Lifecycle::Ready => Ok(()),
            Lifecycle::ShutDown => Err(DctError::NotReady),
            Lifecycle::Uninit => {
                if self.platform.secure_dct.is_some() && self.secure_map.is_none() {
                    return Err(DctError::BadArgument("secure DCT without address map"));
                }
                let session = FlashSession::open(
                    self.flash,
                    self.platform.peripheral_id,
                    WriteMode::ReadOnly,
                )?;
                self.platform.validate(Some(session.capacity()))?;
                state.lifecycle = Lifecycle::Ready;
                info!("DCT store ready on {}", self.platform.name);
                Ok(())
            }
        })
    }

    pub fn shutdown(&self) {
        self.state.with(|state| {
            state.lifecycle = Lifecycle::ShutDown;
            state.current = None;
        });
        debug!("DCT store shut down");
    }

    /// Runs one operation under the lock inside a fresh flash session.
    pub(crate) fn run<R>(
        &self,
        mode: WriteMode,
        op: impl FnOnce(&mut Engine<'_>) -> DctResult<R>,
    ) -> DctResult<R> {
        self.state.with(|state| {
            if state.lifecycle != Lifecycle::Ready {
                return Err(DctError::NotReady);
            }
            let session = FlashSession::open(self.flash, self.platform.peripheral_id, mode)?;
            let mut engine =
                Engine::new(session, &self.platform, self.secure_map, &mut state.current);
            op(&mut engine)
        })
    }

    /// Absolute flash address of `section` in the current bank.
    pub fn get_current_address(&self, section: DctSection) -> DctResult<u32> {
        self.run(WriteMode::ReadWrite, |engine| {
            let range = engine.section_range(section, 0, 0)?;
            let current = engine.current_bank()?;
            Ok(engine.bank_address(current, range.start))
        })
    }

    /// Copies `buffer.len()` bytes at `offset` within `section` of the
    /// current bank.
    pub fn read_with_copy(
        &self,
        section: DctSection,
        offset: usize,
        buffer: &mut [u8],
    ) -> DctResult<()> {
        self.run(WriteMode::ReadWrite, |engine| {
            engine.read_section(section, offset, buffer)
        })
    }

    /// Reads a whole platform section as its typed structure.
    pub fn read_section<T: FromBytes + IntoBytes>(&self, section: DctSection) -> DctResult<T> {
        let mut value = T::new_zeroed();
        self.read_with_copy(section, 0, value.as_mut_bytes())?;
        Ok(value)
    }

    pub fn read_header(&self) -> DctResult<DctHeader> {
        self.read_section(DctSection::Internal)
    }

    pub fn read_version_stamp(&self) -> DctResult<DctVersionStamp> {
        self.read_section(DctSection::Version)
    }

    /// Reads flash at an absolute address, bypassing bank selection.
    pub fn read_raw(&self, address: u32, buffer: &mut [u8]) -> DctResult<()> {
        self.run(WriteMode::ReadOnly, |engine| {
            Ok(engine.session.read(buffer, address)?)
        })
    }

    /// Writes `data` at `offset` within `section`, committing a new bank.
    ///
    /// # Arguments
    ///
    /// * `section` - Any section except `Internal` and `Version`.
    /// * `offset` - Byte offset from the start of the section.
    /// * `data` - Bytes to store. Must stay inside the bank and clear of
    ///   the header and version stamp.
    ///
    /// # Returns
    ///
    /// Returns `Ok(())` once the new bank is committed or when the stored
    /// bytes already match `data`.
    pub fn write(&self, section: DctSection, offset: usize, data: &[u8]) -> DctResult<()> {
        self.run(WriteMode::ReadWrite, |engine| {
            engine.write_section(section, offset, data)
        })
    }

    pub fn write_boot_details(&self, detail: &BootDetail) -> DctResult<()> {
        self.run(WriteMode::ReadWrite, |engine| engine.write_boot_details(detail))
    }

    pub fn write_app_location(&self, location: &ImageLocation, index: usize) -> DctResult<()> {
        self.run(WriteMode::ReadWrite, |engine| {
            engine.write_app_location(location, index)
        })
    }

    /// Saves the current bank into `region` for the OTA2 updater.
    pub fn snapshot_to(&self, region: &FlashRegion) -> DctResult<()> {
        self.run(WriteMode::ReadWrite, |engine| engine.snapshot_to(region))
    }
}
