// Licensed under the Apache-2.0 license

//! Boot-time glue: app handles addressed by slot, ELF loading out of the
//! App LUT, and factory reset of the DCT from its stored image.

use std::io::{self, Read, Seek, SeekFrom};

use dct_config::LoadPolicy;
use dct_flash::{FlashDevice, WriteMode};
use dct_layout::{AppSlot, ImageLocation};
use elf::abi::PT_LOAD;
use elf::endian::AnyEndian;
use elf::segment::ProgramHeader;
use elf::ElfStream;
use log::{debug, info, warn};

use crate::apps::{AppImage, EraseTracker};
use crate::engine::{Bank, Engine};
use crate::error::{DctError, DctResult};
use crate::lock::StoreLock;
use crate::store::{DctStore, StoreState};

/// Chunk size used when copying the DCT image into a bank.
const DCT_IMAGE_CHUNK: usize = 64;
/// Chunk size used when copying loadable segments.
const LOAD_CHUNK: usize = 512;

/// Destination of loadable ELF segments.
pub trait LoadTarget {
    fn load(&mut self, address: u32, data: &[u8]) -> DctResult<()>;
}

/// An open app slot. Sequential writes continue where the previous one
/// stopped, erasing sectors as they are reached.
#[derive(Debug)]
pub struct AppHandle {
    app_id: AppSlot,
    offset: u32,
    erase: EraseTracker,
    location: ImageLocation,
}

impl AppHandle {
    pub fn app_id(&self) -> AppSlot {
        self.app_id
    }

    pub fn location(&self) -> &ImageLocation {
        &self.location
    }

    /// Offset the next sequential write lands at.
    pub fn offset(&self) -> u32 {
        self.offset
    }
}

/// `Read + Seek` view of an app image for the ELF parser.
struct LutReader<'r, 'e> {
    image: &'r AppImage<'e>,
    position: u64,
}

impl<'r, 'e> LutReader<'r, 'e> {
    fn new(image: &'r AppImage<'e>) -> Self {
        LutReader { image, position: 0 }
    }
}

impl Read for LutReader<'_, '_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = self.image.size() as u64;
        if self.position >= size {
            return Ok(0);
        }
        let len = (buf.len() as u64).min(size - self.position) as usize;
        self.image
            .read(self.position as u32, &mut buf[..len])
            .map_err(io::Error::other)?;
        self.position += len as u64;
        Ok(len)
    }
}

impl Seek for LutReader<'_, '_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => (self.image.size() as u64).checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of image",
            )),
        }
    }
}

/// Entry point and program headers of the ELF image stored in `image`.
fn parse_elf(image: &AppImage) -> DctResult<(u32, Vec<ProgramHeader>)> {
    let mut reader = LutReader::new(image);
    let elf = ElfStream::<AnyEndian, _>::open_stream(&mut reader).map_err(|e| {
        warn!("failed to parse ELF image: {:?}", e);
        DctError::InvalidImage("unparsable ELF")
    })?;
    Ok((elf.ehdr.e_entry as u32, elf.segments().to_vec()))
}

fn load_elf(image: &AppImage, policy: &LoadPolicy, target: &mut dyn LoadTarget) -> DctResult<u32> {
    let (entry_point, segments) = parse_elf(image)?;
    let mut buffer = [0u8; LOAD_CHUNK];
    for segment in segments
        .iter()
        .filter(|segment| segment.p_type == PT_LOAD && segment.p_filesz > 0)
    {
        let address = segment.p_paddr as u32;
        if policy.skips(address) {
            debug!("leaving segment at 0x{:08x} in place", address);
            continue;
        }
        let length = segment.p_filesz as u32;
        let mut done = 0u32;
        while done < length {
            let chunk = &mut buffer[..((length - done) as usize).min(LOAD_CHUNK)];
            image.read(segment.p_offset as u32 + done, chunk)?;
            target.load(address + done, chunk)?;
            done += chunk.len() as u32;
        }
        debug!("loaded {} bytes at 0x{:08x}", length, address);
    }
    Ok(entry_point)
}

impl Engine<'_> {
    /// Replaces bank A with the single segment of the DCT image app.
    fn load_dct_image(&self, location: &ImageLocation) -> DctResult<()> {
        let image = self.open_app_image(location)?;
        let (_, segments) = parse_elf(&image)?;
        let [segment] = segments.as_slice() else {
            return Err(DctError::InvalidImage("DCT image must have one segment"));
        };
        let length = segment.p_filesz as usize;
        if length > self.bank_size() {
            return Err(DctError::InvalidImage("DCT image larger than a bank"));
        }

        self.erase_bank(Bank::A)?;
        let mut chunk = [0u8; DCT_IMAGE_CHUNK];
        for offset in (0..length).step_by(DCT_IMAGE_CHUNK) {
            let chunk = &mut chunk[..(length - offset).min(DCT_IMAGE_CHUNK)];
            image.read(segment.p_offset as u32 + offset as u32, chunk)?;
            self.write_bank(Bank::A, offset, chunk)?;
        }
        Ok(())
    }

    pub fn restore_factory_reset(&mut self) -> DctResult<()> {
        let current = self.current_bank()?;
        let header = self.read_header(current)?;
        let [factory_reset, dct_image] = [AppSlot::FactoryReset, AppSlot::DctImage].map(|slot| {
            let expected = self.platform.default_app_location(slot.index());
            let found = header.app_location(slot.index()).unwrap_or_default();
            match (found, expected) {
                (ImageLocation::ExternalFixed(f), ImageLocation::ExternalFixed(e))
                    if f.location == e.location =>
                {
                    found
                }
                _ => {
                    warn!("{:?} location {:?} replaced by default", slot, found);
                    expected
                }
            }
        });

        self.load_dct_image(&dct_image)?;
        self.clear_cache();
        self.write_app_location(&factory_reset, AppSlot::FactoryReset.index())?;
        self.write_app_location(&dct_image, AppSlot::DctImage.index())?;
        info!("DCT restored from factory image");
        Ok(())
    }
}

impl<F: FlashDevice, L: StoreLock<StoreState>> DctStore<'_, F, L> {
    /// Reloads the DCT from the DCT image app and restores the factory
    /// reset and DCT image locations.
    pub fn restore_factory_reset(&self) -> DctResult<()> {
        self.run(WriteMode::ReadWrite, |engine| engine.restore_factory_reset())
    }

    /// Opens the app slot `app_id` at the location the current DCT records.
    pub fn app_open(&self, app_id: u8) -> DctResult<AppHandle> {
        let app_id = AppSlot::try_from(app_id).map_err(|_| DctError::BadArgument("app id"))?;
        let location = self.run(WriteMode::ReadWrite, |engine| {
            let current = engine.current_bank()?;
            Ok(engine
                .read_header(current)?
                .app_location(app_id.index())
                .unwrap_or_default())
        })?;
        debug!("opened {:?} at {:?}", app_id, location);
        Ok(AppHandle {
            app_id,
            offset: 0,
            erase: EraseTracker::new(),
            location,
        })
    }

    pub fn app_close(&self, handle: AppHandle) {
        debug!("closed {:?}", handle.app_id);
    }

    pub fn app_get_size(&self, handle: &AppHandle) -> DctResult<u32> {
        self.run(WriteMode::ReadOnly, |engine| engine.app_size(&handle.location))
    }

    /// Grows the app and records its location in the DCT, under one lock.
    pub fn app_set_size(&self, handle: &AppHandle, size: u32) -> DctResult<()> {
        self.run(WriteMode::ReadWrite, |engine| {
            engine.app_set_size(&handle.location, size)?;
            engine.write_app_location(&handle.location, handle.app_id.index())
        })
    }

    pub fn app_erase(&self, handle: &mut AppHandle) -> DctResult<()> {
        self.run(WriteMode::ReadWrite, |engine| engine.app_erase(&handle.location))?;
        handle.offset = 0;
        handle.erase = EraseTracker::new();
        Ok(())
    }

    /// Writes `data` at the handle's running offset, erasing each sector
    /// the first time it is reached.
    pub fn app_write_chunk(&self, handle: &mut AppHandle, data: &[u8]) -> DctResult<()> {
        let AppHandle {
            offset,
            erase,
            location,
            ..
        } = handle;
        self.run(WriteMode::ReadWrite, |engine| {
            engine.app_write(location, *offset, data, Some(erase))
        })?;
        *offset += data.len() as u32;
        Ok(())
    }

    /// Writes `data` at `offset` without erasing.
    pub fn app_write(&self, handle: &AppHandle, offset: u32, data: &[u8]) -> DctResult<()> {
        self.run(WriteMode::ReadWrite, |engine| {
            engine.app_write(&handle.location, offset, data, None)
        })
    }

    pub fn app_read_chunk(
        &self,
        handle: &AppHandle,
        offset: u32,
        buffer: &mut [u8],
    ) -> DctResult<()> {
        self.run(WriteMode::ReadOnly, |engine| {
            engine.app_read(&handle.location, offset, buffer)
        })
    }

    /// Copies the loadable segments of the app's ELF image into `target`,
    /// skipping those the platform runs in place or keeps powered.
    ///
    /// # Returns
    ///
    /// Returns the ELF entry point.
    pub fn app_load(&self, handle: &AppHandle, target: &mut dyn LoadTarget) -> DctResult<u32> {
        let policy = self.platform().load_policy;
        self.run(WriteMode::ReadOnly, |engine| {
            let image = engine.open_app_image(&handle.location)?;
            load_elf(&image, &policy, target)
        })
    }
}
