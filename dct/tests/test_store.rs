// Licensed under the Apache-2.0 license

mod common;

use common::{
    bank_bytes, current_bank, header_of, pattern, ready_store, setup, stamp_of, VERSION_OFFSET,
};
use dct_store::dct_config::{DctPlatform, FlashRegion, SecureDct, SFLASH_PLATFORM};
use dct_store::dct_flash::sim::SimFlash;
use dct_store::dct_flash::{FlashDrvError, MetadataInterleavedMap};
use dct_store::dct_layout::{
    BootDetail, DctSection, ImageLocation, LoadDetails, SchemaId, CURRENT_LAYOUT,
    DCT_HEADER_SIZE,
};
use dct_store::dct_layout::sections::WifiConfig;
use dct_store::{DctError, DctStatus, DctStore, Lifecycle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use zerocopy::IntoBytes;

const APP_OFFSET: usize = 8504;

/// Factory bank plus one committed write: bank B current, sequence 2.
fn prepared() -> SimFlash {
    let flash = setup();
    ready_store(&flash, SFLASH_PLATFORM)
        .write(DctSection::App, 0, b"first")
        .unwrap();
    flash
}

#[test]
fn test_factory_bootstrap() {
    let flash = setup();
    let store = ready_store(&flash, SFLASH_PLATFORM);

    assert_eq!(
        store.get_current_address(DctSection::Internal).unwrap(),
        SFLASH_PLATFORM.dct_banks[0].offset
    );
    assert_eq!(
        store.get_current_address(DctSection::App).unwrap(),
        SFLASH_PLATFORM.dct_banks[0].offset + APP_OFFSET as u32
    );

    let stamp = store.read_version_stamp().unwrap();
    assert!(stamp.has_magic());
    assert!(stamp.is_initial_write());
    assert_eq!({ stamp.version }, SchemaId::CURRENT.code());
    assert_eq!(stamp.sequence, 1);

    let header = store.read_header().unwrap();
    assert!(header.verify());
    for index in 0..8 {
        assert_eq!(
            header.app_location(index),
            Some(SFLASH_PLATFORM.default_app_location(index))
        );
    }
    assert_eq!(
        header.boot_detail().load_details.destination,
        ImageLocation::Internal(Default::default())
    );
    assert!(bank_bytes(&flash, &SFLASH_PLATFORM, 1).iter().all(|b| *b == 0xFF));
    assert_eq!(flash.open_sessions(), 0);
}

#[test]
fn test_wifi_write_flips_bank() {
    let flash = setup();
    let store = ready_store(&flash, SFLASH_PLATFORM);
    store.write(DctSection::App, 0, b"one").unwrap();
    store.write(DctSection::App, 0, b"two").unwrap();
    assert_eq!(current_bank(&store), 0);
    assert_eq!(store.read_version_stamp().unwrap().sequence, 3);

    let mut wifi: WifiConfig = store.read_section(DctSection::WifiConfig).unwrap();
    wifi.device_configured = 1;
    wifi.country_code = u32::from_le_bytes(*b"US\0\0");
    let before = bank_bytes(&flash, &SFLASH_PLATFORM, 0);

    store
        .write(DctSection::WifiConfig, 0, wifi.as_bytes())
        .unwrap();

    assert_eq!(current_bank(&store), 1);
    assert_eq!(stamp_of(&flash, &SFLASH_PLATFORM, 1).sequence, 4);
    assert_eq!(header_of(&flash, &SFLASH_PLATFORM, 0).is_current_dct, 0);
    assert_eq!(header_of(&flash, &SFLASH_PLATFORM, 1).is_current_dct, 1);

    let after = bank_bytes(&flash, &SFLASH_PLATFORM, 1);
    let wifi_range = {
        let start = CURRENT_LAYOUT.section_offset(DctSection::WifiConfig).unwrap();
        start..start + DctSection::WifiConfig.size().unwrap()
    };
    for section in [
        DctSection::MfgInfo,
        DctSection::Security,
        DctSection::BtConfig,
        DctSection::Ota2Config,
    ] {
        let start = CURRENT_LAYOUT.section_offset(section).unwrap();
        let end = start + section.size().unwrap();
        assert_eq!(after[start..end], before[start..end], "{:?}", section);
    }
    assert_eq!(after[APP_OFFSET..], before[APP_OFFSET..]);
    assert_eq!(&after[wifi_range], wifi.as_bytes());

    let read_back: WifiConfig = store.read_section(DctSection::WifiConfig).unwrap();
    assert_eq!(read_back, wifi);
}

#[test]
fn test_identical_write_is_skipped() {
    let flash = prepared();
    let store = ready_store(&flash, SFLASH_PLATFORM);
    let ops = flash.program_ops();

    store.write(DctSection::App, 0, b"first").unwrap();

    assert_eq!(flash.program_ops(), ops);
    assert_eq!(store.read_version_stamp().unwrap().sequence, 2);
}

#[test]
fn test_random_writes_round_trip() {
    let flash = setup();
    let store = ready_store(&flash, SFLASH_PLATFORM);
    let mut rng = StdRng::seed_from_u64(0x0DC7);
    let writable = [
        DctSection::MfgInfo,
        DctSection::Security,
        DctSection::WifiConfig,
        DctSection::NetworkConfig,
        DctSection::BtConfig,
        DctSection::MiscConfig,
        DctSection::App,
    ];

    let mut sequence = store.read_version_stamp().unwrap().sequence;
    for _ in 0..16 {
        let section = writable[rng.gen_range(0..writable.len())];
        let size = section
            .size()
            .unwrap_or(SFLASH_PLATFORM.bank_size() as usize - APP_OFFSET);
        let offset = rng.gen_range(0..size);
        let length = rng.gen_range(1..=(size - offset).min(600));
        let mut data = vec![0u8; length];
        rng.fill(&mut data[..]);

        let mut existing = vec![0u8; length];
        store.read_with_copy(section, offset, &mut existing).unwrap();
        store.write(section, offset, &data).unwrap();
        if existing != data {
            sequence = sequence.wrapping_add(1);
        }

        let mut back = vec![0u8; length];
        store.read_with_copy(section, offset, &mut back).unwrap();
        assert_eq!(back, data, "{:?} at {}", section, offset);
        assert_eq!(store.read_version_stamp().unwrap().sequence, sequence);
    }
}

#[test]
fn test_power_loss_before_commit_keeps_old_bank() {
    let counting = prepared();
    let store = ready_store(&counting, SFLASH_PLATFORM);
    let ops = counting.program_ops();
    store.write(DctSection::App, 0, b"second").unwrap();
    let write_ops = counting.program_ops() - ops;

    // Everything up to the stamp lands; clearing write_incomplete does not.
    let flash = prepared();
    flash.power_loss_after(write_ops - 3);
    let store = ready_store(&flash, SFLASH_PLATFORM);
    assert_eq!(
        store.write(DctSection::App, 0, b"second"),
        Err(DctError::Flash(FlashDrvError::OFF))
    );
    flash.restore_power();

    let store = ready_store(&flash, SFLASH_PLATFORM);
    assert_eq!(current_bank(&store), 1);
    let mut back = [0u8; 5];
    store.read_with_copy(DctSection::App, 0, &mut back).unwrap();
    assert_eq!(&back, b"first");
    assert_eq!(store.read_version_stamp().unwrap().sequence, 2);
}

#[test]
fn test_power_loss_after_commit_keeps_new_bank() {
    let counting = prepared();
    let store = ready_store(&counting, SFLASH_PLATFORM);
    let ops = counting.program_ops();
    store.write(DctSection::App, 0, b"second").unwrap();
    let write_ops = counting.program_ops() - ops;

    // Committed, but retiring the old bank fails.
    let flash = prepared();
    flash.power_loss_after(write_ops - 2);
    let store = ready_store(&flash, SFLASH_PLATFORM);
    store.write(DctSection::App, 0, b"second").unwrap();
    flash.restore_power();
    assert_eq!(header_of(&flash, &SFLASH_PLATFORM, 1).is_current_dct, 1);

    let store = ready_store(&flash, SFLASH_PLATFORM);
    assert_eq!(current_bank(&store), 0);
    let mut back = [0u8; 6];
    store.read_with_copy(DctSection::App, 0, &mut back).unwrap();
    assert_eq!(&back, b"second");
    assert_eq!(store.read_version_stamp().unwrap().sequence, 3);
}

#[test]
fn test_corrupted_bank_falls_back_to_factory() {
    let flash = prepared();
    let offset = SFLASH_PLATFORM.dct_banks[1].offset + APP_OFFSET as u32 + 100;
    flash.load(offset, &[0x00]);

    let store = ready_store(&flash, SFLASH_PLATFORM);
    assert_eq!(current_bank(&store), 0);
    let stamp = store.read_version_stamp().unwrap();
    assert!(stamp.is_initial_write());
    assert_eq!(stamp.sequence, 1);
}

#[test]
fn test_bad_arguments_leave_flash_untouched() {
    let flash = prepared();
    let store = ready_store(&flash, SFLASH_PLATFORM);
    let ops = flash.program_ops();
    let bank = SFLASH_PLATFORM.bank_size() as usize;
    let ota2 = CURRENT_LAYOUT.section_offset(DctSection::Ota2Config).unwrap();

    let rejected = [
        store.write(DctSection::Internal, DCT_HEADER_SIZE, &[0]),
        store.write(DctSection::Version, 0, &[0]),
        store.write(DctSection::App, bank - APP_OFFSET - 2, &[0; 4]),
        store.write(DctSection::Ota2Config, VERSION_OFFSET - ota2 - 2, &[0; 4]),
        store.write_app_location(&ImageLocation::None, 8),
    ];
    for result in rejected {
        assert!(matches!(result, Err(DctError::BadArgument(_))), "{:?}", result);
        assert_eq!(DctStatus::from_result(&result), DctStatus::BadArgument);
    }
    let mut buffer = [0u8; 8];
    assert!(matches!(
        store.read_with_copy(DctSection::App, bank, &mut buffer),
        Err(DctError::BadArgument(_))
    ));
    assert_eq!(flash.program_ops(), ops);
}

#[test]
fn test_lifecycle() {
    let flash = setup();
    let store: DctStore<'_, SimFlash> = DctStore::new(&flash, SFLASH_PLATFORM).unwrap();
    assert_eq!(store.lifecycle(), Lifecycle::Uninit);
    assert_eq!(
        store.get_current_address(DctSection::App),
        Err(DctError::NotReady)
    );

    store.init().unwrap();
    store.init().unwrap();
    assert_eq!(store.lifecycle(), Lifecycle::Ready);
    store.get_current_address(DctSection::App).unwrap();

    store.shutdown();
    assert_eq!(store.lifecycle(), Lifecycle::ShutDown);
    assert_eq!(store.write(DctSection::App, 0, &[1]), Err(DctError::NotReady));
    assert_eq!(store.init(), Err(DctError::NotReady));
    assert_eq!(flash.open_sessions(), 0);
}

#[test]
fn test_init_rejects_small_device() {
    let _ = setup();
    let flash = SimFlash::new(0x8000, SFLASH_PLATFORM.sector_size);
    let store: DctStore<'_, SimFlash> = DctStore::new(&flash, SFLASH_PLATFORM).unwrap();
    let result = store.init();
    assert!(matches!(result, Err(DctError::Config(_))));
    assert_eq!(store.lifecycle(), Lifecycle::Uninit);
}

#[test]
fn test_header_updates() {
    let flash = prepared();
    let store = ready_store(&flash, SFLASH_PLATFORM);

    let detail = BootDetail {
        load_details: LoadDetails {
            source: ImageLocation::external_fixed(0x9000, 0x2000),
            destination: ImageLocation::Internal(Default::default()),
            load_once: true,
            valid: true,
        },
        entry_point: 0x0040_0101,
    };
    store.write_boot_details(&detail).unwrap();
    assert_eq!(store.read_header().unwrap().boot_detail(), detail);
    assert_eq!(store.read_version_stamp().unwrap().sequence, 3);

    let location = ImageLocation::filesystem_file("app0.elf");
    store.write_app_location(&location, 5).unwrap();
    assert_eq!(store.read_header().unwrap().app_location(5), Some(location));
    assert_eq!(store.read_version_stamp().unwrap().sequence, 4);

    let ops = flash.program_ops();
    store.write_app_location(&location, 5).unwrap();
    store.write_boot_details(&detail).unwrap();
    assert_eq!(flash.program_ops(), ops);
}

#[test]
fn test_snapshot_and_raw_read() {
    let flash = prepared();
    let store = ready_store(&flash, SFLASH_PLATFORM);
    let region = FlashRegion {
        name: "ota2_dct_save",
        offset: 0x20000,
        size: 0x4000,
    };

    store.snapshot_to(&region).unwrap();
    let saved = flash.dump(region.offset, region.size as usize);
    assert_eq!(saved, bank_bytes(&flash, &SFLASH_PLATFORM, 1));

    let mut raw = vec![0u8; 64];
    store.read_raw(region.offset, &mut raw).unwrap();
    assert_eq!(raw, saved[..64]);

    let small = FlashRegion {
        size: 0x1000,
        ..region
    };
    assert!(matches!(
        store.snapshot_to(&small),
        Err(DctError::BadArgument(_))
    ));
}

#[test]
fn test_snapshot_rejects_dct_regions() {
    let flash = prepared();
    let store = ready_store(&flash, SFLASH_PLATFORM);
    let before = bank_bytes(&flash, &SFLASH_PLATFORM, 1);
    let ops = flash.program_ops();

    let [bank_a, bank_b] = SFLASH_PLATFORM.dct_banks;
    let lut_and_bank_a = FlashRegion {
        name: "ota2_dct_save",
        offset: SFLASH_PLATFORM.apps_lut.offset,
        size: 0x5000,
    };
    let misaligned = FlashRegion {
        name: "ota2_dct_save",
        offset: 0x20100,
        size: 0x4000,
    };
    for region in [bank_b, bank_a, lut_and_bank_a, misaligned] {
        assert!(matches!(
            store.snapshot_to(&region),
            Err(DctError::BadArgument(_))
        ));
    }

    assert_eq!(flash.program_ops(), ops);
    assert_eq!(bank_bytes(&flash, &SFLASH_PLATFORM, 1), before);
    let mut back = [0u8; 5];
    store.read_with_copy(DctSection::App, 0, &mut back).unwrap();
    assert_eq!(&back, b"first");
}

fn open_secure<'a>(
    flash: &'a SimFlash,
    platform: DctPlatform,
    map: &'a MetadataInterleavedMap,
) -> DctStore<'a, SimFlash> {
    let store: DctStore<'a, SimFlash> = DctStore::new(flash, platform)
        .unwrap()
        .with_secure_map(map);
    store.init().unwrap();
    store
}

#[test]
fn test_secure_dct_round_trip() {
    let flash = setup();
    let mut platform = SFLASH_PLATFORM;
    platform.secure_dct = Some(SecureDct { metadata_size: 64 });
    let map = MetadataInterleavedMap {
        sector_size: SFLASH_PLATFORM.sector_size,
        metadata_size: 64,
    };
    let store = open_secure(&flash, platform, &map);
    assert!(store.read_version_stamp().unwrap().is_initial_write());
    for value in 1..=3u8 {
        store.write(DctSection::App, 0, &[value; 2]).unwrap();
    }
    assert_eq!(current_bank(&store), 1);
    assert_eq!(store.read_version_stamp().unwrap().sequence, 4);
    assert!(flash.secure_ops() > 0);

    // Per-sector metadata stays untouched.
    let bank_b = platform.dct_banks[1].offset;
    let sector = platform.sector_size;
    assert!(flash
        .dump(bank_b + sector - 64, 64)
        .iter()
        .all(|byte| *byte == 0xFF));

    let secure_ops = flash.secure_ops();
    let store = open_secure(&flash, platform, &map);
    let mut back = [0u8; 2];
    store.read_with_copy(DctSection::App, 0, &mut back).unwrap();
    assert_eq!(back, [3, 3]);
    assert_eq!(current_bank(&store), 1);
    assert_eq!(store.read_version_stamp().unwrap().sequence, 4);
    assert!(flash.secure_ops() > secure_ops);
}

#[test]
fn test_concurrent_writers() {
    let flash = setup();
    let store = ready_store(&flash, SFLASH_PLATFORM);
    store.get_current_address(DctSection::App).unwrap();

    std::thread::scope(|scope| {
        for worker in 0..4u8 {
            let store = &store;
            scope.spawn(move || {
                for round in 0..3usize {
                    let offset = (worker as usize * 3 + round) * 64;
                    let data = pattern(worker * 16 + round as u8, 64);
                    store.write(DctSection::App, offset, &data).unwrap();
                }
            });
        }
    });

    for worker in 0..4u8 {
        for round in 0..3usize {
            let mut back = vec![0u8; 64];
            let offset = (worker as usize * 3 + round) * 64;
            store.read_with_copy(DctSection::App, offset, &mut back).unwrap();
            assert_eq!(back, pattern(worker * 16 + round as u8, 64));
        }
    }
    assert_eq!(store.read_version_stamp().unwrap().sequence, 13);
    assert_eq!(flash.open_sessions(), 0);
}
