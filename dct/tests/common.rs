// Licensed under the Apache-2.0 license
#![allow(dead_code)]

use std::collections::BTreeMap;

use dct_store::dct_config::{DctPlatform, SFLASH_PLATFORM};
use dct_store::dct_flash::sim::SimFlash;
use dct_store::dct_layout::header::DCT_HEADER_MAGIC;
use dct_store::dct_layout::{
    AppHeader, AppSlot, DctHeader, DctSection, DctVersionStamp, SchemaLayout, SectorRun,
    DCT_HEADER_SIZE,
};
use dct_store::{DctResult, DctStore, LoadTarget};
use log::LevelFilter;
use simple_logger::SimpleLogger;
use zerocopy::{FromBytes, FromZeros, IntoBytes};

pub const FLASH_SIZE: u32 = 1 << 20;
pub const VERSION_OFFSET: usize = 8480;

/// Logger plus an erased 1 MiB serial flash.
pub fn setup() -> SimFlash {
    let _ = SimpleLogger::new().with_level(LevelFilter::Debug).init();
    SimFlash::new(FLASH_SIZE, SFLASH_PLATFORM.sector_size)
}

pub fn ready_store(flash: &SimFlash, platform: DctPlatform) -> DctStore<'_, SimFlash> {
    let store = DctStore::new(flash, platform).unwrap();
    store.init().unwrap();
    store
}

pub fn bank_offset(platform: &DctPlatform, bank: usize) -> u32 {
    platform.dct_banks[bank].offset
}

pub fn bank_bytes(flash: &SimFlash, platform: &DctPlatform, bank: usize) -> Vec<u8> {
    flash.dump(bank_offset(platform, bank), platform.bank_usable_size() as usize)
}

pub fn header_of(flash: &SimFlash, platform: &DctPlatform, bank: usize) -> DctHeader {
    DctHeader::read_from_bytes(&flash.dump(bank_offset(platform, bank), DCT_HEADER_SIZE)).unwrap()
}

pub fn stamp_of(flash: &SimFlash, platform: &DctPlatform, bank: usize) -> DctVersionStamp {
    let address = bank_offset(platform, bank) + VERSION_OFFSET as u32;
    DctVersionStamp::read_from_bytes(&flash.dump(address, 16)).unwrap()
}

/// Index of the bank the store currently serves.
pub fn current_bank(store: &DctStore<'_, SimFlash>) -> usize {
    let address = store.get_current_address(DctSection::Internal).unwrap();
    let platform = store.platform();
    platform
        .dct_banks
        .iter()
        .position(|bank| bank.offset == address)
        .unwrap()
}

/// Deterministic filler so copied regions can be told apart.
pub fn pattern(seed: u8, length: usize) -> Vec<u8> {
    (0..length)
        .map(|i| seed.wrapping_add((i % 251) as u8))
        .collect()
}

/// Builds a bank image laid out with `layout`: a sane header, the given
/// sections and application data after the configuration area. Bytes not
/// supplied stay erased.
pub fn legacy_bank(
    platform: &DctPlatform,
    layout: SchemaLayout,
    header: Option<&[u8]>,
    sections: &[(DctSection, Vec<u8>)],
    app: &[u8],
) -> Vec<u8> {
    let mut bank = vec![0xFFu8; platform.bank_usable_size() as usize];
    match header {
        Some(raw) => bank[..DCT_HEADER_SIZE].copy_from_slice(raw),
        None => {
            let mut header = DctHeader::new_zeroed();
            header.magic_number = DCT_HEADER_MAGIC;
            header.full_size = platform.bank_size();
            header.used_size = layout.data_size() as u32;
            header.is_current_dct = 1;
            bank[..DCT_HEADER_SIZE].copy_from_slice(header.as_bytes());
        }
    }
    for (section, bytes) in sections {
        let offset = layout.section_offset(*section).unwrap();
        bank[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
    let app_start = layout.data_size();
    bank[app_start..app_start + app.len()].copy_from_slice(app);
    bank
}

/// Minimal little-endian ELF32 executable with one program header per
/// `(p_type, physical address, data)` entry.
pub fn elf32(entry: u32, segments: &[(u32, u32, Vec<u8>)]) -> Vec<u8> {
    const EHDR_SIZE: usize = 52;
    const PHDR_SIZE: usize = 32;
    let mut elf = Vec::new();
    elf.extend_from_slice(&[0x7F, b'E', b'L', b'F', 1, 1, 1, 0]);
    elf.extend_from_slice(&[0; 8]);
    elf.extend_from_slice(&2u16.to_le_bytes()); // e_type: EXEC
    elf.extend_from_slice(&40u16.to_le_bytes()); // e_machine: ARM
    elf.extend_from_slice(&1u32.to_le_bytes()); // e_version
    elf.extend_from_slice(&entry.to_le_bytes());
    elf.extend_from_slice(&(EHDR_SIZE as u32).to_le_bytes()); // e_phoff
    elf.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
    elf.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    elf.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    elf.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    elf.extend_from_slice(&(segments.len() as u16).to_le_bytes());
    elf.extend_from_slice(&40u16.to_le_bytes()); // e_shentsize
    elf.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    elf.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
    assert_eq!(elf.len(), EHDR_SIZE);

    let mut data_offset = EHDR_SIZE + PHDR_SIZE * segments.len();
    for (p_type, address, data) in segments {
        for word in [
            *p_type,
            data_offset as u32,
            *address,
            *address,
            data.len() as u32,
            data.len() as u32,
            5,
            4,
        ] {
            elf.extend_from_slice(&word.to_le_bytes());
        }
        data_offset += data.len();
    }
    for (_, _, data) in segments {
        elf.extend_from_slice(data);
    }
    elf
}

/// Writes an app header straight into the LUT sector, as the factory
/// programmer would.
pub fn program_app_header(
    flash: &SimFlash,
    platform: &DctPlatform,
    slot: AppSlot,
    runs: &[(u16, u16)],
) {
    let header = AppHeader {
        secure: false,
        runs: runs
            .iter()
            .map(|&(start, count)| SectorRun { start, count })
            .collect(),
    };
    let layout = platform.app_lut_layout();
    let mut bytes = vec![0u8; layout.header_size()];
    header.encode(layout, &mut bytes).unwrap();
    flash.load(platform.app_header_address(slot.index()), &bytes);
}

/// Stores `image` in an app slot through the boot glue.
pub fn install_app(store: &DctStore<'_, SimFlash>, slot: AppSlot, image: &[u8]) {
    let mut handle = store.app_open(slot as u8).unwrap();
    store.app_set_size(&handle, image.len() as u32).unwrap();
    for chunk in image.chunks(1000) {
        store.app_write_chunk(&mut handle, chunk).unwrap();
    }
    store.app_close(handle);
}

/// Load target recording every chunk it receives.
#[derive(Default)]
pub struct MemoryTarget {
    pub memory: BTreeMap<u32, u8>,
}

impl MemoryTarget {
    pub fn bytes(&self, address: u32, length: usize) -> Vec<u8> {
        (address..address + length as u32)
            .map(|a| *self.memory.get(&a).unwrap_or(&0))
            .collect()
    }
}

impl LoadTarget for MemoryTarget {
    fn load(&mut self, address: u32, data: &[u8]) -> DctResult<()> {
        for (i, byte) in data.iter().enumerate() {
            self.memory.insert(address + i as u32, *byte);
        }
        Ok(())
    }
}
