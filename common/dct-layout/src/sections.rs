// Licensed under the Apache-2.0 license

//! Configuration sections that follow the header in a DCT bank.
//!
//! Every section keeps its serialized size across schema revisions. Where a
//! revision reinterpreted bytes inside a section, the older interpretation is
//! kept as its own type next to the current one.

use bitflags::bitflags;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const PRIVATE_KEY_SIZE: usize = 2048;
pub const CERTIFICATE_SIZE: usize = 4096;
pub const COOEE_KEY_SIZE: usize = 16;
pub const CONFIG_AP_LIST_SIZE: usize = 5;
pub const SECURITY_KEY_SIZE: usize = 128;
pub const SSID_SIZE: usize = 32;
pub const HOSTNAME_SIZE: usize = 32;
pub const BT_NAME_SIZE: usize = 249;

/// Magic number of a version stamp.
pub const DCT_VERSION_MAGIC: u32 = 0xDC02_00CD;

/// Value of `details_valid` once a soft AP configuration has been written.
pub const CONFIG_VALIDITY_VALUE: u32 = 0xCA1B_DF58;

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MfgInfo {
    pub manufacturer: [u8; 32],
    pub product_name: [u8; 32],
    pub bom_name: [u8; 24],
    pub bom_rev: [u8; 8],
    pub serial_number: [u8; 20],
    pub manufacture_date_time: [u8; 20],
    pub manufacture_location: [u8; 12],
    pub bootloader_version: [u8; 8],
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SecurityCreds {
    pub private_key: [u8; PRIVATE_KEY_SIZE],
    pub certificate: [u8; CERTIFICATE_SIZE],
    pub cooee_key: [u8; COOEE_KEY_SIZE],
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct Ssid {
    pub length: u8,
    pub value: [u8; SSID_SIZE],
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ApInfo {
    pub ssid: Ssid,
    pub bssid: [u8; 6],
    pub band: u8,
    pub security: u32,
    pub channel: u32,
    pub max_data_rate: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct StoredAp {
    pub details: ApInfo,
    pub security_key_length: u8,
    pub security_key: [u8; SECURITY_KEY_SIZE],
    pub padding: [u8; 3],
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SoftApSettings {
    pub ssid: Ssid,
    pub channel: u8,
    pub security_key_length: u8,
    pub padding: u8,
    pub security: u32,
    pub security_key: [u8; SECURITY_KEY_SIZE],
    pub details_valid: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct WifiConfig {
    pub device_configured: u32,
    pub stored_ap_list: [StoredAp; CONFIG_AP_LIST_SIZE],
    pub soft_ap_settings: SoftApSettings,
    pub config_ap_settings: SoftApSettings,
    pub country_code: u32,
    pub mac_address: [u8; 6],
    pub padding: [u8; 2],
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct EthernetConfig {
    pub mac_address: [u8; 6],
    pub padding: [u8; 2],
}

/// Interfaces a network configuration may select.
pub const NETWORK_INTERFACE_COUNT: u32 = 4;

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NetworkConfig {
    pub interface: u32,
    /// NUL terminated host name.
    pub hostname: [u8; HOSTNAME_SIZE + 1],
    pub padding: [u8; 3],
}

/// Network configuration as first introduced: the host name was a raw
/// character buffer with no guaranteed terminator.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RawHostnameNetworkConfig {
    pub interface: u32,
    pub hostname: [u8; HOSTNAME_SIZE + 1],
    pub padding: [u8; 3],
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct BtConfig {
    pub device_address: [u8; 6],
    pub device_name: [u8; BT_NAME_SIZE],
    pub device_class: [u8; 3],
    pub ssp_debug_mode: u32,
    pub padding: [u8; 2],
}

/// Bluetooth configuration before the device class was stored; those bytes
/// were padding.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ClasslessBtConfig {
    pub device_address: [u8; 6],
    pub device_name: [u8; BT_NAME_SIZE],
    pub unused: [u8; 3],
    pub ssp_debug_mode: u32,
    pub padding: [u8; 2],
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct P2pConfig {
    pub group_owner_settings: SoftApSettings,
    pub padding: [u8; 4],
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct Ota2Config {
    pub update_count: u16,
    pub boot_type: u8,
    pub force_factory_reset: u8,
}

/// OTA2 configuration before the factory reset request was added.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct PaddedOta2Config {
    pub update_count: u16,
    pub boot_type: u8,
    pub padding: u8,
}

bitflags! {
    /// Optional sections an application declared as in use.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct UsageFlags: u16 {
        const BT = 1 << 0;
        const P2P = 1 << 1;
        const OTA2 = 1 << 2;
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct DctVersionStamp {
    pub magic_number: u32,
    pub usage_flags: u16,
    pub version: u16,
    pub crc32: u32,
    pub initial_write: u8,
    pub sequence: u8,
    pub padding: [u8; 2],
}

pub const INITIAL_WRITE_OFFSET: usize = core::mem::offset_of!(DctVersionStamp, initial_write);

impl DctVersionStamp {
    pub fn has_magic(&self) -> bool {
        let magic = self.magic_number;
        magic == DCT_VERSION_MAGIC
    }

    /// A freshly provisioned bank carries no CRC; `initial_write` marks it
    /// as trusted until its first commit.
    pub fn is_initial_write(&self) -> bool {
        self.initial_write == 1 && { self.crc32 } == 0
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MiscConfig {
    pub wifi_flags: u32,
}

/// Miscellaneous configuration when it only carried an aggregation code.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct AggregateCodeMiscConfig {
    pub aggregate_code: u32,
}

const _: () = assert!(core::mem::size_of::<MfgInfo>() == 156);
const _: () = assert!(core::mem::size_of::<SecurityCreds>() == 6160);
const _: () = assert!(core::mem::size_of::<StoredAp>() == 184);
const _: () = assert!(core::mem::size_of::<SoftApSettings>() == 172);
const _: () = assert!(core::mem::size_of::<WifiConfig>() == 1280);
const _: () = assert!(core::mem::size_of::<NetworkConfig>() == 40);
const _: () = assert!(
    core::mem::size_of::<RawHostnameNetworkConfig>() == core::mem::size_of::<NetworkConfig>()
);
const _: () = assert!(core::mem::size_of::<BtConfig>() == 264);
const _: () =
    assert!(core::mem::size_of::<ClasslessBtConfig>() == core::mem::size_of::<BtConfig>());
const _: () = assert!(core::mem::size_of::<P2pConfig>() == 176);
const _: () =
    assert!(core::mem::size_of::<PaddedOta2Config>() == core::mem::size_of::<Ota2Config>());
const _: () = assert!(core::mem::size_of::<DctVersionStamp>() == 16);
const _: () = assert!(
    core::mem::size_of::<AggregateCodeMiscConfig>() == core::mem::size_of::<MiscConfig>()
);
