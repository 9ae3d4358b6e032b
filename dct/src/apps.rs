// Licensed under the Apache-2.0 license

//! App LUT: per-slot headers listing the sector runs of each app image, and
//! reads and writes through those runs.

use dct_flash::{FlashAccess, FlashDevice, FlashSession, WriteMode};
use dct_layout::{AppHeader, ImageLocation, SectorRun, DCT_MAX_APP_COUNT};
use log::{debug, info, warn};

use crate::engine::Engine;
use crate::error::{DctError, DctResult};
use crate::lock::StoreLock;
use crate::store::{DctStore, StoreState};

/// Remembers the last sector erased while streaming an image so each sector
/// is erased once, just before its first byte is written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EraseTracker {
    last_erased_sector: Option<u32>,
}

impl EraseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_erased_sector(&self) -> Option<u32> {
        self.last_erased_sector
    }

    /// Returns true when `sector` still needs erasing and records it.
    fn claim(&mut self, sector: u32) -> bool {
        match self.last_erased_sector {
            Some(last) if sector <= last => false,
            _ => {
                self.last_erased_sector = Some(sector);
                true
            }
        }
    }
}

/// Physical address of logical `offset` within an app image, and how many
/// bytes from there stay inside the same run.
pub fn get_physical_address(
    header: &AppHeader,
    offset: u32,
    sector_size: u32,
    access: &FlashAccess,
) -> DctResult<(u32, u32)> {
    let mut run_offset = 0u32;
    for run in &header.runs {
        let run_size = run.count as u32 * sector_size;
        if offset < run_offset + run_size {
            let within = offset - run_offset;
            let base = run.start as u32 * sector_size;
            let remaining = (run_size - within).min(access.contiguous_len(within));
            return Ok((access.physical_address(base, within), remaining));
        }
        run_offset += run_size;
    }
    Err(DctError::BadArgument("offset beyond app image"))
}

/// LUT address of the header an app location points at.
fn header_address(location: &ImageLocation) -> DctResult<u32> {
    location
        .external_address()
        .ok_or(DctError::BadArgument("app location is not external fixed"))
}

/// One app image opened for the duration of a store operation.
pub(crate) struct AppImage<'e> {
    session: &'e FlashSession<'e>,
    header: AppHeader,
    access: FlashAccess<'e>,
    sector_size: u32,
}

impl AppImage<'_> {
    pub fn size(&self) -> u32 {
        self.header.sector_count() * self.sector_size
    }

    pub fn read(&self, offset: u32, buffer: &mut [u8]) -> DctResult<()> {
        let mut done = 0usize;
        while done < buffer.len() {
            let (address, remaining) = get_physical_address(
                &self.header,
                offset + done as u32,
                self.sector_size,
                &self.access,
            )?;
            let len = (buffer.len() - done).min(remaining as usize);
            let chunk = &mut buffer[done..done + len];
            match self.access {
                FlashAccess::Plain => self.session.read(chunk, address)?,
                FlashAccess::Secure(_) => self.session.read_secure(chunk, address)?,
            }
            done += len;
        }
        Ok(())
    }

    /// Writes `data` at `offset`. With a tracker, every sector touched is
    /// erased first unless the tracker saw it already.
    pub fn write(
        &self,
        offset: u32,
        data: &[u8],
        mut tracker: Option<&mut EraseTracker>,
    ) -> DctResult<()> {
        let mut done = 0usize;
        while done < data.len() {
            let (address, remaining) = get_physical_address(
                &self.header,
                offset + done as u32,
                self.sector_size,
                &self.access,
            )?;
            let len = (data.len() - done).min(remaining as usize);
            if let Some(tracker) = tracker.as_deref_mut() {
                let first = address / self.sector_size;
                let last = (address + len as u32 - 1) / self.sector_size;
                for sector in first..=last {
                    if tracker.claim(sector) {
                        self.session.erase_sector(sector * self.sector_size)?;
                    }
                }
            }
            let chunk = &data[done..done + len];
            match self.access {
                FlashAccess::Plain => self.session.write(chunk, address)?,
                FlashAccess::Secure(_) => self.session.write_secure(chunk, address)?,
            }
            done += len;
        }
        Ok(())
    }

    pub fn erase(&self) -> DctResult<()> {
        for run in &self.header.runs {
            self.session.erase_range(
                run.start as u32 * self.sector_size,
                run.count as u32 * self.sector_size,
                self.sector_size,
            )?;
        }
        Ok(())
    }
}

impl<'s> Engine<'s> {
    pub fn read_app_header(&self, address: u32) -> DctResult<AppHeader> {
        let layout = self.platform.app_lut_layout();
        let mut bytes = [0u8; 64];
        let bytes = &mut bytes[..layout.header_size()];
        self.session.read(bytes, address)?;
        AppHeader::decode(bytes, layout).ok_or(DctError::Integrity("app header run count"))
    }

    /// Rewrites the LUT sector holding the header at `address`.
    fn write_app_header(&self, address: u32, header: &AppHeader) -> DctResult<()> {
        let sector_size = self.platform.sector_size;
        let sector_base = address - address % sector_size;
        let mut sector = vec![0u8; sector_size as usize];
        self.session.read(&mut sector, sector_base)?;
        header
            .encode(
                self.platform.app_lut_layout(),
                &mut sector[(address - sector_base) as usize..],
            )
            .ok_or(DctError::BadArgument("app header crosses sector"))?;
        self.session.erase_sector(sector_base)?;
        self.session.write(&sector, sector_base)?;
        Ok(())
    }

    pub fn app_access(&self, header: &AppHeader) -> DctResult<FlashAccess<'s>> {
        match (header.secure, self.secure_map) {
            (false, _) => Ok(FlashAccess::Plain),
            (true, Some(map)) => Ok(FlashAccess::Secure(map)),
            (true, None) => Err(DctError::BadArgument("secure app without address map")),
        }
    }

    pub(crate) fn open_app_image(&self, location: &ImageLocation) -> DctResult<AppImage<'_>> {
        let header = self.read_app_header(header_address(location)?)?;
        let access = self.app_access(&header)?;
        Ok(AppImage {
            session: &self.session,
            header,
            access,
            sector_size: self.platform.sector_size,
        })
    }

    /// First sector no app in the current DCT occupies.
    fn first_free_sector(&mut self, growing: &AppHeader) -> DctResult<u32> {
        let current = self.current_bank()?;
        let dct = self.read_header(current)?;
        let mut first_free = self.platform.apps_first_sector.max(growing.end_sector());
        for index in 0..DCT_MAX_APP_COUNT {
            let Some(address) = dct
                .app_location(index)
                .and_then(|location| location.external_address())
            else {
                continue;
            };
            match self.read_app_header(address) {
                Ok(header) => first_free = first_free.max(header.end_sector()),
                Err(DctError::Integrity(_)) => {
                    warn!("app {}: unreadable header at 0x{:x}", index, address)
                }
                Err(err) => return Err(err),
            }
        }
        Ok(first_free)
    }

    /// Grows an app to hold at least `size` bytes by appending one run of
    /// sectors after every allocated app. Never shrinks.
    pub fn app_set_size(&mut self, location: &ImageLocation, size: u32) -> DctResult<()> {
        let address = header_address(location)?;
        let mut header = self.read_app_header(address)?;
        let sector_size = self.platform.sector_size;
        let capacity = header.sector_count() * sector_size;
        if capacity >= size {
            debug!("app at 0x{:x} already holds {} bytes", address, capacity);
            return Ok(());
        }

        let needed = (size - capacity).div_ceil(sector_size);
        let first_free = self.first_free_sector(&header)?;
        let available = (self.session.capacity() / sector_size).saturating_sub(first_free);
        if needed > available || header.runs.is_full() || first_free + needed > u16::MAX as u32 {
            warn!(
                "cannot grow app at 0x{:x}: {} sectors needed, {} available, {} runs used",
                address,
                needed,
                available,
                header.runs.len()
            );
            return Err(DctError::Capacity { needed, available });
        }

        header.runs.push(SectorRun {
            start: first_free as u16,
            count: needed as u16,
        });
        self.write_app_header(address, &header)?;
        info!(
            "app at 0x{:x}: added sectors {}..{}",
            address,
            first_free,
            first_free + needed
        );
        Ok(())
    }

    pub fn app_size(&self, location: &ImageLocation) -> DctResult<u32> {
        Ok(self.open_app_image(location)?.size())
    }

    pub fn app_erase(&self, location: &ImageLocation) -> DctResult<()> {
        self.open_app_image(location)?.erase()
    }

    pub fn app_read(
        &self,
        location: &ImageLocation,
        offset: u32,
        buffer: &mut [u8],
    ) -> DctResult<()> {
        self.open_app_image(location)?.read(offset, buffer)
    }

    pub fn app_write(
        &self,
        location: &ImageLocation,
        offset: u32,
        data: &[u8],
        tracker: Option<&mut EraseTracker>,
    ) -> DctResult<()> {
        self.open_app_image(location)?.write(offset, data, tracker)
    }
}

/// App LUT operations addressed by image location rather than slot.
impl<F: FlashDevice, L: StoreLock<StoreState>> DctStore<'_, F, L> {
    pub fn lut_header(&self, location: &ImageLocation) -> DctResult<AppHeader> {
        self.run(WriteMode::ReadOnly, |engine| {
            engine.read_app_header(header_address(location)?)
        })
    }

    pub fn lut_get_size(&self, location: &ImageLocation) -> DctResult<u32> {
        self.run(WriteMode::ReadOnly, |engine| engine.app_size(location))
    }

    /// Grows the image at `location` to at least `size` bytes. The DCT is
    /// not touched; see [`DctStore::app_set_size`] for the slot variant.
    pub fn lut_set_size(&self, location: &ImageLocation, size: u32) -> DctResult<()> {
        self.run(WriteMode::ReadWrite, |engine| engine.app_set_size(location, size))
    }

    pub fn lut_erase(&self, location: &ImageLocation) -> DctResult<()> {
        self.run(WriteMode::ReadWrite, |engine| engine.app_erase(location))
    }

    /// Physical address of `offset` in the image and the bytes left in its
    /// run.
    pub fn lut_physical_address(
        &self,
        location: &ImageLocation,
        offset: u32,
    ) -> DctResult<(u32, u32)> {
        self.run(WriteMode::ReadOnly, |engine| {
            let header = engine.read_app_header(header_address(location)?)?;
            let access = engine.app_access(&header)?;
            get_physical_address(&header, offset, engine.platform.sector_size, &access)
        })
    }

    pub fn lut_read(
        &self,
        location: &ImageLocation,
        offset: u32,
        buffer: &mut [u8],
    ) -> DctResult<()> {
        self.run(WriteMode::ReadOnly, |engine| engine.app_read(location, offset, buffer))
    }

    pub fn lut_write(
        &self,
        location: &ImageLocation,
        offset: u32,
        data: &[u8],
        tracker: Option<&mut EraseTracker>,
    ) -> DctResult<()> {
        self.run(WriteMode::ReadWrite, |engine| {
            engine.app_write(location, offset, data, tracker)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dct_flash::MetadataInterleavedMap;

    fn header(runs: &[(u16, u16)]) -> AppHeader {
        AppHeader {
            secure: false,
            runs: runs
                .iter()
                .map(|&(start, count)| SectorRun { start, count })
                .collect(),
        }
    }

    #[test]
    fn test_physical_address_walks_runs() {
        let header = header(&[(100, 4), (105, 5)]);
        let plain = FlashAccess::Plain;
        assert_eq!(
            get_physical_address(&header, 0, 4096, &plain).unwrap(),
            (100 * 4096, 4 * 4096)
        );
        assert_eq!(
            get_physical_address(&header, 4 * 4096 + 10, 4096, &plain).unwrap(),
            (105 * 4096 + 10, 5 * 4096 - 10)
        );
        assert!(get_physical_address(&header, 9 * 4096, 4096, &plain).is_err());
    }

    #[test]
    fn test_secure_address_clamped() {
        let header = header(&[(10, 2)]);
        let map = MetadataInterleavedMap {
            sector_size: 4096,
            metadata_size: 96,
        };
        let secure = FlashAccess::Secure(&map);
        let (address, remaining) = get_physical_address(&header, 4000, 4096, &secure).unwrap();
        assert_eq!(address, 11 * 4096);
        assert_eq!(remaining, 4000);

        let (address, remaining) = get_physical_address(&header, 3990, 4096, &secure).unwrap();
        assert_eq!(address, 10 * 4096 + 3990);
        assert_eq!(remaining, 10);
    }

    #[test]
    fn test_erase_tracker() {
        let mut tracker = EraseTracker::new();
        assert!(tracker.claim(5));
        assert!(!tracker.claim(5));
        assert!(!tracker.claim(4));
        assert!(tracker.claim(6));
        assert_eq!(tracker.last_erased_sector(), Some(6));
    }
}
