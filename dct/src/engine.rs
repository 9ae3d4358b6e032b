// Licensed under the Apache-2.0 license

//! Dual-bank engine: bank validation, current-bank resolution and the
//! copy-on-write commit protocol. An [`Engine`] lives for exactly one store
//! operation, under the store lock and inside one flash session.

use core::ops::Range;

use dct_config::{DctPlatform, FactoryBoot, FlashRegion};
use dct_flash::{FlashAccess, FlashSession, SecureAddressMap};
use dct_layout::header::{
    RawBootDetail, DCT_HEADER_MAGIC, IS_CURRENT_DCT_OFFSET, WRITE_INCOMPLETE_OFFSET,
};
use dct_layout::sections::{DCT_VERSION_MAGIC, INITIAL_WRITE_OFFSET};
use dct_layout::{
    BootDetail, CrcInHeaderDctHeader, DctHeader, DctSection, DctVersionStamp, ImageLocation,
    LoadDetails, RawImageLocation, SchemaId, CURRENT_LAYOUT, DCT_HEADER_SIZE, DCT_MAX_APP_COUNT,
};
use log::{debug, info, warn};
use zerocopy::{FromZeros, IntoBytes};

use crate::crc::BankCrc;
use crate::error::{DctError, DctResult};
use crate::migrate::lifecycle::{BankContext, Events, StateMachine, States};

/// Bytes moved per driver call when copying between banks.
const COPY_CHUNK: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bank {
    A,
    B,
}

impl Bank {
    pub fn other(self) -> Bank {
        match self {
            Bank::A => Bank::B,
            Bank::B => Bank::A,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Bank::A => 0,
            Bank::B => 1,
        }
    }
}

/// What validation learned about a bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BankInfo {
    pub schema: SchemaId,
    pub initial_write: u8,
    pub sequence: u8,
}

impl BankInfo {
    /// A factory image that has never been committed over.
    fn initial_write_set(&self) -> bool {
        self.initial_write != 0 && self.initial_write != 0xFF
    }
}

/// True when sequence `a` was written after `b`, allowing for wrap-around.
pub(crate) fn sequence_newer(a: u8, b: u8) -> bool {
    (a.wrapping_sub(b) as i8) > 0
}

/// A CRC-in-header bank written by the factory programmer, accepted without
/// a CRC check.
fn trusted_legacy(header: &CrcInHeaderDctHeader) -> bool {
    header.initial_write == 1 && { header.crc32 } == 0
}

/// Chooses between two valid banks.
fn pick(a: &BankInfo, b: &BankInfo) -> Bank {
    if a.schema != b.schema {
        return if a.schema > b.schema { Bank::A } else { Bank::B };
    }
    if b.initial_write_set() {
        return Bank::B;
    }
    if a.initial_write_set() {
        return Bank::A;
    }
    if sequence_newer(b.sequence, a.sequence) {
        Bank::B
    } else {
        Bank::A
    }
}

/// Removes `skip` from `span`, leaving at most two pieces.
fn subtract(span: Range<usize>, skip: &Option<Range<usize>>) -> [Range<usize>; 2] {
    match skip {
        Some(skip) if skip.start < span.end && span.start < skip.end => [
            span.start..skip.start.max(span.start),
            skip.end.min(span.end)..span.end,
        ],
        _ => [span, 0..0],
    }
}

fn version_range() -> Range<usize> {
    let start = CURRENT_LAYOUT
        .section_offset(DctSection::Version)
        .unwrap_or(DCT_HEADER_SIZE);
    start..start + core::mem::size_of::<DctVersionStamp>()
}

pub(crate) struct Engine<'s> {
    pub session: FlashSession<'s>,
    pub platform: &'s DctPlatform,
    pub secure_map: Option<&'s dyn SecureAddressMap>,
    bank_access: FlashAccess<'s>,
    cache: &'s mut Option<Bank>,
}

impl<'s> Engine<'s> {
    pub fn new(
        session: FlashSession<'s>,
        platform: &'s DctPlatform,
        secure_map: Option<&'s dyn SecureAddressMap>,
        cache: &'s mut Option<Bank>,
    ) -> Self {
        let bank_access = match (platform.secure_dct, secure_map) {
            (Some(_), Some(map)) => FlashAccess::Secure(map),
            _ => FlashAccess::Plain,
        };
        Engine {
            session,
            platform,
            secure_map,
            bank_access,
            cache,
        }
    }

    pub fn bank_size(&self) -> usize {
        self.platform.bank_usable_size() as usize
    }

    fn bank_region(&self, bank: Bank) -> &FlashRegion {
        &self.platform.dct_banks[bank.index()]
    }

    /// Physical address of byte `offset` of a bank.
    pub fn bank_address(&self, bank: Bank, offset: usize) -> u32 {
        self.bank_access
            .physical_address(self.bank_region(bank).offset, offset as u32)
    }

    pub fn read_bank(&self, bank: Bank, offset: usize, buffer: &mut [u8]) -> DctResult<()> {
        if offset + buffer.len() > self.bank_size() {
            return Err(DctError::BadArgument("read beyond bank"));
        }
        let base = self.bank_region(bank).offset;
        Ok(self
            .bank_access
            .read(&self.session, base, offset as u32, buffer)?)
    }

    pub fn write_bank(&self, bank: Bank, offset: usize, data: &[u8]) -> DctResult<()> {
        if offset + data.len() > self.bank_size() {
            return Err(DctError::BadArgument("write beyond bank"));
        }
        let base = self.bank_region(bank).offset;
        Ok(self
            .bank_access
            .write(&self.session, base, offset as u32, data)?)
    }

    pub fn erase_bank(&self, bank: Bank) -> DctResult<()> {
        let region = self.bank_region(bank);
        debug!("erasing {:?} at 0x{:x}", bank, region.offset);
        Ok(self
            .session
            .erase_range(region.offset, region.size, self.platform.sector_size)?)
    }

    pub fn read_header(&self, bank: Bank) -> DctResult<DctHeader> {
        let mut header = DctHeader::new_zeroed();
        self.read_bank(bank, 0, header.as_mut_bytes())?;
        Ok(header)
    }

    pub fn read_stamp(&self, bank: Bank) -> DctResult<DctVersionStamp> {
        let mut stamp = DctVersionStamp::new_zeroed();
        self.read_bank(bank, version_range().start, stamp.as_mut_bytes())?;
        Ok(stamp)
    }

    pub fn copy_between(
        &self,
        from: Bank,
        from_offset: usize,
        to: Bank,
        to_offset: usize,
        length: usize,
    ) -> DctResult<()> {
        let mut buffer = [0u8; COPY_CHUNK];
        let mut done = 0;
        while done < length {
            let chunk = &mut buffer[..(length - done).min(COPY_CHUNK)];
            self.read_bank(from, from_offset + done, chunk)?;
            self.write_bank(to, to_offset + done, chunk)?;
            done += chunk.len();
        }
        Ok(())
    }

    fn digest_range(&self, bank: Bank, range: Range<usize>, crc: &mut BankCrc) -> DctResult<()> {
        let mut buffer = [0u8; COPY_CHUNK];
        let mut offset = range.start;
        while offset < range.end {
            let chunk = &mut buffer[..(range.end - offset).min(COPY_CHUNK)];
            self.read_bank(bank, offset, chunk)?;
            crc.update(chunk);
            offset += chunk.len();
        }
        Ok(())
    }

    /// CRC of a bank as stamped by a commit: the header and stamp supplied
    /// by the caller, every other byte as found in flash.
    pub fn bank_crc(
        &self,
        bank: Bank,
        header: &DctHeader,
        stamp: &DctVersionStamp,
    ) -> DctResult<u32> {
        let version = version_range();
        let mut stamp = *stamp;
        stamp.crc32 = 0;
        stamp.initial_write = 0;

        let mut crc = BankCrc::new();
        crc.update(header.as_bytes());
        self.digest_range(bank, DCT_HEADER_SIZE..version.start, &mut crc)?;
        crc.update(stamp.as_bytes());
        self.digest_range(bank, version.end..self.bank_size(), &mut crc)?;
        Ok(crc.finalize())
    }

    /// CRC of a bank whose schema kept the CRC in its header.
    fn legacy_bank_crc(&self, bank: Bank, header: &CrcInHeaderDctHeader) -> DctResult<u32> {
        let mut header = *header;
        header.write_incomplete = 0;
        header.crc32 = 0;
        header.initial_write = 0;

        let mut crc = BankCrc::new();
        crc.update(header.as_bytes());
        self.digest_range(bank, DCT_HEADER_SIZE..self.bank_size(), &mut crc)?;
        Ok(crc.finalize())
    }

    /// Checks the header, then the stamp and CRC, of a bank. `None` means
    /// the bank must not be used.
    pub fn validate(&self, bank: Bank) -> DctResult<Option<BankInfo>> {
        let header = self.read_header(bank)?;
        if !header.verify() {
            debug!("{:?}: header invalid", bank);
            return Ok(None);
        }

        let legacy = self.platform.bootloader.schema;
        let stamp = self.read_stamp(bank)?;
        let schema = if stamp.has_magic() {
            let code = stamp.version;
            match SchemaId::from_code(code).filter(|s| s.has_version_stamp()) {
                Some(schema) => schema,
                None => {
                    warn!("{:?}: unknown DCT version 0x{:04x}", bank, code);
                    return Ok(None);
                }
            }
        } else if legacy.has_version_stamp() {
            debug!("{:?}: version stamp missing", bank);
            return Ok(None);
        } else {
            legacy
        };

        if legacy.crc_in_header() {
            let legacy_header: CrcInHeaderDctHeader = zerocopy::transmute!(header);
            if !trusted_legacy(&legacy_header) {
                let stored = legacy_header.crc32;
                if self.legacy_bank_crc(bank, &legacy_header)? != stored {
                    warn!("{:?}: legacy header CRC mismatch", bank);
                    return Ok(None);
                }
            }
            return Ok(Some(BankInfo {
                schema,
                initial_write: legacy_header.initial_write,
                sequence: legacy_header.sequence,
            }));
        }

        if !stamp.has_magic() {
            // Oldest schemas carry no checksum at all.
            return Ok(Some(BankInfo {
                schema,
                initial_write: 0,
                sequence: 0,
            }));
        }
        if !stamp.is_initial_write() {
            let stored = stamp.crc32;
            let computed = self.bank_crc(bank, &header, &stamp)?;
            if stored != computed {
                warn!(
                    "{:?}: CRC mismatch, stored 0x{:08x} computed 0x{:08x}",
                    bank, stored, computed
                );
                return Ok(None);
            }
        }
        Ok(Some(BankInfo {
            schema,
            initial_write: stamp.initial_write,
            sequence: stamp.sequence,
        }))
    }

    /// A bank still trusted on its factory marker rather than a CRC.
    fn initial_write_pending(&self, bank: Bank) -> DctResult<bool> {
        if self.platform.bootloader.schema.crc_in_header() {
            let header: CrcInHeaderDctHeader = zerocopy::transmute!(self.read_header(bank)?);
            return Ok(trusted_legacy(&header));
        }
        let stamp = self.read_stamp(bank)?;
        Ok(stamp.has_magic() && stamp.is_initial_write())
    }

    /// Returns the authoritative bank, validating, migrating or bootstrapping
    /// as needed.
    pub fn current_bank(&mut self) -> DctResult<Bank> {
        if let Some(bank) = *self.cache {
            if !self.initial_write_pending(Bank::A)? && !self.initial_write_pending(Bank::B)? {
                return Ok(bank);
            }
        }

        let (bank, info) = match (self.validate(Bank::A)?, self.validate(Bank::B)?) {
            (Some(a), Some(b)) => match pick(&a, &b) {
                Bank::A => (Bank::A, a),
                Bank::B => (Bank::B, b),
            },
            (Some(a), None) => (Bank::A, a),
            (None, Some(b)) => (Bank::B, b),
            (None, None) => {
                warn!("no valid DCT bank, writing factory defaults");
                return self.bootstrap_factory();
            }
        };
        debug!("{:?} is current: {:?}", bank, info);

        let mut lifecycle = StateMachine::new(BankContext);
        lifecycle
            .process_event(Events::Validated(info.schema))
            .map_err(|_| DctError::Migration("bank lifecycle"))?;
        let bank = match *lifecycle.state() {
            States::ValidOldSchema => self.migrate(bank, &info, &mut lifecycle)?,
            _ => bank,
        };
        *self.cache = Some(bank);
        Ok(bank)
    }

    pub fn clear_cache(&mut self) {
        *self.cache = None;
    }

    /// Synthesizes a factory bank A when neither bank is usable.
    fn bootstrap_factory(&mut self) -> DctResult<Bank> {
        let platform = self.platform;
        self.erase_bank(Bank::A)?;

        let mut header = DctHeader::new_zeroed();
        header.magic_number = DCT_HEADER_MAGIC;
        header.write_incomplete = 1;
        header.is_current_dct = 1;
        header.full_size = self.bank_size() as u32;
        header.used_size = CURRENT_LAYOUT.data_size() as u32;
        for index in 0..DCT_MAX_APP_COUNT {
            header.apps_locations[index] =
                RawImageLocation::from(platform.default_app_location(index));
        }
        let boot = match platform.factory_boot {
            FactoryBoot::Unset => BootDetail {
                load_details: LoadDetails {
                    destination: ImageLocation::Internal(Default::default()),
                    ..Default::default()
                },
                entry_point: 0,
            },
            FactoryBoot::Slot(slot) => BootDetail {
                load_details: LoadDetails {
                    source: platform.default_app_location(slot.index()),
                    destination: ImageLocation::Internal(Default::default()),
                    load_once: false,
                    valid: true,
                },
                entry_point: 0,
            },
        };
        header.boot_detail = RawBootDetail::from(&boot);

        let mut stamp = DctVersionStamp::new_zeroed();
        stamp.magic_number = DCT_VERSION_MAGIC;
        stamp.usage_flags = platform.usage_flags.bits();
        stamp.version = SchemaId::CURRENT.code();
        stamp.sequence = 1;
        stamp.initial_write = 1;

        self.write_bank(Bank::A, 0, header.as_bytes())?;
        self.write_bank(Bank::A, version_range().start, stamp.as_bytes())?;
        self.write_bank(Bank::A, WRITE_INCOMPLETE_OFFSET, &[0])?;
        self.erase_bank(Bank::B)?;

        info!("factory DCT written to bank A");
        *self.cache = Some(Bank::A);
        Ok(Bank::A)
    }

    /// Erases the bank opposite `current` and returns it together with the
    /// header and stamp the new bank starts from.
    pub fn start_new(&self, current: Bank) -> DctResult<(Bank, DctHeader, DctVersionStamp)> {
        let new = current.other();
        self.erase_bank(new)?;
        let header = self.read_header(current)?;
        let mut stamp = self.read_stamp(current)?;
        if !stamp.has_magic() {
            stamp = DctVersionStamp::new_zeroed();
        }
        Ok((new, header, stamp))
    }

    /// Copies everything but the header, the stamp and `skip` from one bank
    /// to the other.
    pub fn copy_body(&self, from: Bank, to: Bank, skip: Option<Range<usize>>) -> DctResult<()> {
        let version = version_range();
        for span in [DCT_HEADER_SIZE..version.start, version.end..self.bank_size()] {
            for piece in subtract(span, &skip) {
                if !piece.is_empty() {
                    self.copy_between(from, piece.start, to, piece.start, piece.len())?;
                }
            }
        }
        Ok(())
    }

    /// Finishes a new bank whose body is already in place and retires the
    /// old one. The new bank becomes authoritative when its
    /// `write_incomplete` byte is cleared.
    pub fn commit(
        &mut self,
        old: Bank,
        new: Bank,
        mut header: DctHeader,
        mut stamp: DctVersionStamp,
    ) -> DctResult<()> {
        header.write_incomplete = 0;

        stamp.crc32 = 0;
        stamp.initial_write = 0;
        stamp.magic_number = DCT_VERSION_MAGIC;
        stamp.usage_flags = self.platform.usage_flags.bits();
        stamp.version = SchemaId::CURRENT.code();
        stamp.sequence = stamp.sequence.wrapping_add(1);

        if self.platform.bootloader.schema.crc_in_header() {
            header = self.seal_legacy_header(new, header, &stamp)?;
        } else {
            header.is_current_dct = 1;
            stamp.crc32 = self.bank_crc(new, &header, &stamp)?;
        }
        header.write_incomplete = 1;
        self.write_bank(new, 0, header.as_bytes())?;
        self.write_bank(new, version_range().start, stamp.as_bytes())?;
        self.write_bank(new, WRITE_INCOMPLETE_OFFSET, &[0])?;
        *self.cache = Some(new);
        debug!("committed {:?}, sequence {}", new, stamp.sequence);

        // With the CRC in the header this byte is the legacy initial_write.
        let stamp_initial_write = version_range().start + INITIAL_WRITE_OFFSET;
        let retired = self
            .write_bank(old, IS_CURRENT_DCT_OFFSET, &[0])
            .and_then(|_| self.write_bank(old, stamp_initial_write, &[0]));
        if let Err(err) = retired {
            warn!("failed to retire {:?}: {}", old, err);
        }
        Ok(())
    }

    /// Stores the bank CRC and sequence in the header view a CRC-in-header
    /// bootloader reads. The stamp keeps a zero CRC; the two sequence
    /// numbers move in lockstep.
    fn seal_legacy_header(
        &self,
        bank: Bank,
        header: DctHeader,
        stamp: &DctVersionStamp,
    ) -> DctResult<DctHeader> {
        let mut legacy: CrcInHeaderDctHeader = zerocopy::transmute!(header);
        legacy.initial_write = 0;
        legacy.crc32 = 0;
        legacy.sequence = stamp.sequence;
        let unsealed: DctHeader = zerocopy::transmute!(legacy);
        legacy.crc32 = self.bank_crc(bank, &unsealed, stamp)?;
        let sealed: DctHeader = zerocopy::transmute!(legacy);
        Ok(sealed)
    }

    /// Checks a section write against the bank layout without touching
    /// flash.
    pub fn write_range(
        &self,
        section: DctSection,
        offset: usize,
        length: usize,
    ) -> DctResult<Range<usize>> {
        if matches!(section, DctSection::Internal | DctSection::Version) {
            return Err(DctError::BadArgument("section is not writable"));
        }
        let range = self.section_range(section, offset, length)?;
        let version = version_range();
        if range.start < DCT_HEADER_SIZE {
            return Err(DctError::BadArgument("write into header"));
        }
        if range.start < version.end && version.start < range.end {
            return Err(DctError::BadArgument("write into version stamp"));
        }
        Ok(range)
    }

    pub fn section_range(
        &self,
        section: DctSection,
        offset: usize,
        length: usize,
    ) -> DctResult<Range<usize>> {
        let base = CURRENT_LAYOUT
            .section_offset(section)
            .ok_or(DctError::BadArgument("unknown section"))?;
        let start = base
            .checked_add(offset)
            .ok_or(DctError::BadArgument("offset overflow"))?;
        let end = start
            .checked_add(length)
            .ok_or(DctError::BadArgument("length overflow"))?;
        if end > self.bank_size() {
            return Err(DctError::BadArgument("range exceeds bank"));
        }
        Ok(start..end)
    }

    pub fn read_section(
        &mut self,
        section: DctSection,
        offset: usize,
        buffer: &mut [u8],
    ) -> DctResult<()> {
        let range = self.section_range(section, offset, buffer.len())?;
        let current = self.current_bank()?;
        self.read_bank(current, range.start, buffer)
    }

    pub fn write_section(
        &mut self,
        section: DctSection,
        offset: usize,
        data: &[u8],
    ) -> DctResult<()> {
        let range = self.write_range(section, offset, data.len())?;
        let current = self.current_bank()?;

        let mut existing = vec![0u8; data.len()];
        self.read_bank(current, range.start, &mut existing)?;
        if existing == data {
            debug!("{:?} unchanged, skipping write", section);
            return Ok(());
        }

        let (new, mut header, stamp) = self.start_new(current)?;
        self.copy_body(current, new, Some(range.clone()))?;
        self.write_bank(new, range.start, data)?;
        header.app_valid = 1;
        self.commit(current, new, header, stamp)?;
        info!("{:?} written, {} bytes at offset {}", section, data.len(), offset);
        Ok(())
    }

    /// Rewrites the current header through `mutate`. Nothing is written when
    /// `mutate` reports no change.
    pub fn update_header(&mut self, mutate: impl FnOnce(&mut DctHeader) -> bool) -> DctResult<()> {
        let current = self.current_bank()?;
        let mut header = self.read_header(current)?;
        if !mutate(&mut header) {
            debug!("header unchanged");
            return Ok(());
        }
        let (new, _, stamp) = self.start_new(current)?;
        self.copy_body(current, new, None)?;
        self.commit(current, new, header, stamp)
    }

    pub fn write_boot_details(&mut self, detail: &BootDetail) -> DctResult<()> {
        let raw = RawBootDetail::from(detail);
        self.update_header(|header| {
            if header.boot_detail == raw {
                return false;
            }
            header.boot_detail = raw;
            true
        })
    }

    pub fn write_app_location(&mut self, location: &ImageLocation, index: usize) -> DctResult<()> {
        if index >= DCT_MAX_APP_COUNT {
            return Err(DctError::BadArgument("app index"));
        }
        let raw = RawImageLocation::from(location);
        self.update_header(|header| {
            if header.apps_locations[index] == raw {
                return false;
            }
            header.apps_locations[index] = raw;
            true
        })
    }

    /// Copies the current bank verbatim into `region`, the OTA2 save area.
    pub fn snapshot_to(&mut self, region: &FlashRegion) -> DctResult<()> {
        let length = self.bank_size();
        if (region.size as usize) < length {
            return Err(DctError::BadArgument("snapshot region too small"));
        }
        let sector = self.platform.sector_size;
        if region.offset % sector != 0 || region.size % sector != 0 {
            return Err(DctError::BadArgument("snapshot region not sector aligned"));
        }
        let [bank_a, bank_b] = &self.platform.dct_banks;
        if [bank_a, bank_b, &self.platform.apps_lut]
            .iter()
            .any(|reserved| reserved.overlaps(region))
        {
            return Err(DctError::BadArgument("snapshot region overlaps the DCT"));
        }
        let current = self.current_bank()?;
        self.session
            .erase_range(region.offset, region.size, self.platform.sector_size)?;
        let mut buffer = [0u8; COPY_CHUNK];
        let mut done = 0;
        while done < length {
            let chunk = &mut buffer[..(length - done).min(COPY_CHUNK)];
            self.read_bank(current, done, chunk)?;
            self.session.write(chunk, region.offset + done as u32)?;
            done += chunk.len();
        }
        info!("{:?} saved to {}", current, region.name);
        Ok(())
    }
}
