// Licensed under the Apache-2.0 license

//! Upgrade of a bank written with an older schema into the other bank,
//! section by section, followed by a normal commit.

mod convert;
pub(crate) mod lifecycle;

use dct_layout::{DctSection, SchemaLayout, CURRENT_LAYOUT, DCT_HEADER_SIZE};
use log::{info, warn};
use zerocopy::IntoBytes;

use crate::engine::{Bank, BankInfo, Engine};
use crate::error::{DctError, DctResult};
use lifecycle::{BankContext, Events, StateMachine};

/// Platform sections rebuilt by a migration. The version stamp is produced
/// by the commit.
const MIGRATED_SECTIONS: [DctSection; 9] = [
    DctSection::MfgInfo,
    DctSection::Security,
    DctSection::WifiConfig,
    DctSection::EthernetConfig,
    DctSection::NetworkConfig,
    DctSection::BtConfig,
    DctSection::P2pConfig,
    DctSection::Ota2Config,
    DctSection::MiscConfig,
];

impl Engine<'_> {
    /// Migrates `source` into the other bank and erases `source` once the
    /// copy is committed. Returns the bank now holding the current schema.
    pub(crate) fn migrate(
        &mut self,
        source: Bank,
        info: &BankInfo,
        lifecycle: &mut StateMachine<BankContext>,
    ) -> DctResult<Bank> {
        let target = source.other();
        info!(
            "migrating {:?} from schema {:?} to {:?}",
            source,
            info.schema,
            CURRENT_LAYOUT.schema
        );
        lifecycle
            .process_event(Events::BeginMigration)
            .map_err(|_| DctError::Migration("bank lifecycle"))?;

        match self.migrate_into(source, target, info) {
            Ok(()) => {
                lifecycle
                    .process_event(Events::Committed)
                    .map_err(|_| DctError::Migration("bank lifecycle"))?;
            }
            Err(err) => {
                warn!("migration of {:?} aborted: {}", source, err);
                let _ = lifecycle.process_event(Events::Aborted);
                return Err(err);
            }
        }

        if let Err(err) = self.erase_bank(source) {
            // The source is already retired by the commit.
            warn!("failed to erase migrated {:?}: {}", source, err);
        }
        Ok(target)
    }

    fn migrate_into(&mut self, source: Bank, target: Bank, info: &BankInfo) -> DctResult<()> {
        let schema = info.schema;
        let optional = if schema.has_version_stamp() {
            dct_layout::OptionalSections::ALL
        } else {
            self.platform.bootloader.optional
        };
        let legacy = SchemaLayout::new(schema, optional);
        let bank_size = self.bank_size();
        let legacy_data = legacy.data_size();
        let current_data = CURRENT_LAYOUT.data_size();
        if legacy_data > bank_size {
            return Err(DctError::Migration("legacy layout exceeds bank"));
        }

        self.erase_bank(target)?;
        let app_length = bank_size - legacy_data.max(current_data);
        self.copy_between(source, legacy_data, target, current_data, app_length)?;

        for section in MIGRATED_SECTIONS {
            let bytes = match legacy.section_offset(section) {
                Some(offset) => {
                    let mut bytes = vec![0u8; section.size().unwrap_or(0)];
                    self.read_bank(source, offset, &mut bytes)?;
                    Some(bytes)
                }
                None => None,
            };
            let bytes = bytes.as_deref();
            let converted = match section {
                DctSection::MfgInfo => convert::update_mfg_info_to_current(bytes)?
                    .as_bytes()
                    .to_vec(),
                DctSection::Security => convert::update_security_to_current(bytes)?
                    .as_bytes()
                    .to_vec(),
                DctSection::WifiConfig => convert::update_wifi_config_to_current(bytes)?
                    .as_bytes()
                    .to_vec(),
                DctSection::EthernetConfig => convert::update_ethernet_config_to_current(bytes)?
                    .as_bytes()
                    .to_vec(),
                DctSection::NetworkConfig => {
                    convert::update_network_config_to_current(bytes, schema.network_layout())?
                        .as_bytes()
                        .to_vec()
                }
                DctSection::BtConfig => {
                    convert::update_bt_config_to_current(bytes, schema.bt_layout())?
                        .as_bytes()
                        .to_vec()
                }
                DctSection::P2pConfig => convert::update_p2p_config_to_current(bytes)?
                    .as_bytes()
                    .to_vec(),
                DctSection::Ota2Config => {
                    convert::update_ota2_config_to_current(bytes, schema.ota2_layout())?
                        .as_bytes()
                        .to_vec()
                }
                DctSection::MiscConfig => {
                    convert::update_misc_config_to_current(bytes, schema.misc_layout())?
                        .as_bytes()
                        .to_vec()
                }
                _ => continue,
            };
            let offset = CURRENT_LAYOUT
                .section_offset(section)
                .ok_or(DctError::Migration("section missing from current layout"))?;
            self.write_bank(target, offset, &converted)?;
        }

        let mut raw_header = [0u8; DCT_HEADER_SIZE];
        self.read_bank(source, 0, &mut raw_header)?;
        let (header, legacy_sequence) = convert::update_header_to_current(&raw_header, schema)?;
        let stamp = if schema.has_version_stamp() {
            Some(self.read_stamp(source)?)
        } else {
            None
        };
        let stamp = convert::update_version_to_current(stamp, legacy_sequence);
        self.commit(source, target, header, stamp)
    }
}
