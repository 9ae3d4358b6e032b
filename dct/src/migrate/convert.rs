// Licensed under the Apache-2.0 license

//! Per-section conversion from a legacy schema to the current one. Each
//! converter takes the legacy bytes, or `None` when the legacy schema had no
//! such section, and returns the current structure.

use dct_layout::header::DCT_HEADER_MAGIC;
use dct_layout::schema::{BtLayout, MiscLayout, NetworkLayout, Ota2Layout};
use dct_layout::sections::{
    AggregateCodeMiscConfig, BtConfig, ClasslessBtConfig, EthernetConfig, MfgInfo, MiscConfig,
    NetworkConfig, Ota2Config, P2pConfig, PaddedOta2Config, RawHostnameNetworkConfig,
    SecurityCreds, WifiConfig, HOSTNAME_SIZE, NETWORK_INTERFACE_COUNT,
};
use dct_layout::{CrcInHeaderDctHeader, DctHeader, DctVersionStamp, SchemaId};
use log::warn;
use zerocopy::{FromBytes, FromZeros};

use crate::error::{DctError, DctResult};

fn parse<T: FromBytes>(source: &[u8], what: &'static str) -> DctResult<T> {
    T::read_from_bytes(source).map_err(|_| DctError::Migration(what))
}

/// Sections whose layout never changed are copied as is.
fn carry<T: FromBytes>(source: Option<&[u8]>, what: &'static str) -> DctResult<T> {
    match source {
        Some(bytes) => parse(bytes, what),
        None => Ok(T::new_zeroed()),
    }
}

pub(crate) fn update_mfg_info_to_current(source: Option<&[u8]>) -> DctResult<MfgInfo> {
    carry(source, "manufacturing info")
}

pub(crate) fn update_security_to_current(source: Option<&[u8]>) -> DctResult<SecurityCreds> {
    carry(source, "security credentials")
}

pub(crate) fn update_wifi_config_to_current(source: Option<&[u8]>) -> DctResult<WifiConfig> {
    carry(source, "wifi config")
}

pub(crate) fn update_ethernet_config_to_current(
    source: Option<&[u8]>,
) -> DctResult<EthernetConfig> {
    carry(source, "ethernet config")
}

pub(crate) fn update_network_config_to_current(
    source: Option<&[u8]>,
    layout: NetworkLayout,
) -> DctResult<NetworkConfig> {
    let Some(bytes) = source else {
        return Ok(NetworkConfig::new_zeroed());
    };
    let mut config: NetworkConfig = match layout {
        NetworkLayout::Current => parse(bytes, "network config")?,
        NetworkLayout::RawHostname => {
            let legacy: RawHostnameNetworkConfig = parse(bytes, "network config")?;
            let mut config = NetworkConfig::new_zeroed();
            config.interface = legacy.interface;
            config.hostname = legacy.hostname;
            config.hostname[HOSTNAME_SIZE] = 0;
            config
        }
    };
    let interface = config.interface;
    if interface >= NETWORK_INTERFACE_COUNT {
        warn!("unknown network interface {}, using 0", interface);
        config.interface = 0;
    }
    Ok(config)
}

pub(crate) fn update_bt_config_to_current(
    source: Option<&[u8]>,
    layout: BtLayout,
) -> DctResult<BtConfig> {
    let Some(bytes) = source else {
        return Ok(BtConfig::new_zeroed());
    };
    match layout {
        BtLayout::Current => parse(bytes, "bluetooth config"),
        BtLayout::Classless => {
            let legacy: ClasslessBtConfig = parse(bytes, "bluetooth config")?;
            let mut config = BtConfig::new_zeroed();
            config.device_address = legacy.device_address;
            config.device_name = legacy.device_name;
            config.device_class = [0; 3];
            config.ssp_debug_mode = legacy.ssp_debug_mode;
            Ok(config)
        }
    }
}

pub(crate) fn update_p2p_config_to_current(source: Option<&[u8]>) -> DctResult<P2pConfig> {
    carry(source, "p2p config")
}

pub(crate) fn update_ota2_config_to_current(
    source: Option<&[u8]>,
    layout: Ota2Layout,
) -> DctResult<Ota2Config> {
    let Some(bytes) = source else {
        return Ok(Ota2Config::new_zeroed());
    };
    match layout {
        Ota2Layout::Current => parse(bytes, "ota2 config"),
        Ota2Layout::Padded => {
            let legacy: PaddedOta2Config = parse(bytes, "ota2 config")?;
            Ok(Ota2Config {
                update_count: legacy.update_count,
                boot_type: legacy.boot_type,
                force_factory_reset: 0,
            })
        }
    }
}

pub(crate) fn update_misc_config_to_current(
    source: Option<&[u8]>,
    layout: MiscLayout,
) -> DctResult<MiscConfig> {
    let Some(bytes) = source else {
        return Ok(MiscConfig::new_zeroed());
    };
    match layout {
        MiscLayout::Current => parse(bytes, "misc config"),
        MiscLayout::AggregateCode => {
            // The aggregation code has no counterpart in the current layout.
            let _: AggregateCodeMiscConfig = parse(bytes, "misc config")?;
            Ok(MiscConfig { wifi_flags: 0 })
        }
    }
}

/// Converts a legacy header. Returns the sequence number the legacy header
/// carried, if its schema kept one.
pub(crate) fn update_header_to_current(
    source: &[u8],
    schema: SchemaId,
) -> DctResult<(DctHeader, Option<u8>)> {
    if !schema.crc_in_header() {
        return Ok((parse(source, "header")?, None));
    }
    let legacy: CrcInHeaderDctHeader = parse(source, "header")?;
    let mut header = DctHeader::new_zeroed();
    header.full_size = legacy.full_size;
    header.used_size = legacy.used_size;
    header.write_incomplete = legacy.write_incomplete;
    header.app_valid = legacy.app_valid;
    header.mfg_info_programmed = legacy.mfg_info_programmed;
    header.magic_number = DCT_HEADER_MAGIC;
    header.boot_detail = legacy.boot_detail;
    header.apps_locations = legacy.apps_locations;
    Ok((header, Some(legacy.sequence)))
}

/// Version stamp to commit a migrated bank with. The commit stamps magic,
/// version and CRC; only the sequence is carried over.
pub(crate) fn update_version_to_current(
    stamp: Option<DctVersionStamp>,
    legacy_sequence: Option<u8>,
) -> DctVersionStamp {
    let mut current = DctVersionStamp::new_zeroed();
    current.sequence = match (stamp, legacy_sequence) {
        (Some(stamp), _) if stamp.has_magic() => stamp.sequence,
        (_, Some(sequence)) => sequence,
        _ => 0,
    };
    current
}
