// Licensed under the Apache-2.0 license

//! Schema revisions of the DCT and where each section lives in them.

use core::mem::size_of;

use crate::header::DCT_HEADER_SIZE;
use crate::sections::*;

/// On-flash schema revisions, identified by the version code recorded in the
/// version stamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum SchemaId {
    V3_1_2 = 0x0312,
    V3_3_0 = 0x0330,
    V3_3_1 = 0x0331,
    V3_4_0 = 0x0340,
    V3_5_1 = 0x0351,
    V3_5_2 = 0x0352,
    V3_6_0 = 0x0360,
    V3_6_1 = 0x0361,
    V3_6_2 = 0x0362,
    V3_6_3 = 0x0363,
    V3_7_0 = 0x0370,
    V4_0_1 = 0x0401,
    V5_0_1 = 0x0501,
    V5_1_0 = 0x0510,
}

impl SchemaId {
    pub const CURRENT: SchemaId = SchemaId::V5_1_0;

    pub const ALL: [SchemaId; 14] = [
        SchemaId::V3_1_2,
        SchemaId::V3_3_0,
        SchemaId::V3_3_1,
        SchemaId::V3_4_0,
        SchemaId::V3_5_1,
        SchemaId::V3_5_2,
        SchemaId::V3_6_0,
        SchemaId::V3_6_1,
        SchemaId::V3_6_2,
        SchemaId::V3_6_3,
        SchemaId::V3_7_0,
        SchemaId::V4_0_1,
        SchemaId::V5_0_1,
        SchemaId::V5_1_0,
    ];

    pub fn from_code(code: u16) -> Option<SchemaId> {
        Self::ALL.into_iter().find(|schema| schema.code() == code)
    }

    pub const fn code(self) -> u16 {
        self as u16
    }

    pub fn is_current(self) -> bool {
        self == Self::CURRENT
    }

    /// The bank CRC and sequence live in a version stamp.
    pub fn has_version_stamp(self) -> bool {
        self >= SchemaId::V3_7_0
    }

    /// The bank CRC and sequence live in the header.
    pub fn crc_in_header(self) -> bool {
        (SchemaId::V3_5_2..=SchemaId::V3_6_3).contains(&self)
    }

    pub fn has_network_config(self) -> bool {
        self >= SchemaId::V3_3_0
    }

    pub fn has_misc_config(self) -> bool {
        self >= SchemaId::V4_0_1
    }

    /// Whether the configuration area is rounded up to a multiple of 8 bytes
    /// before the application data starts.
    pub fn pads_to_8_bytes(self) -> bool {
        self >= SchemaId::V5_1_0
    }

    /// Whether App LUT headers carry a secure flag after the run count.
    pub fn app_lut_has_secure_flag(self) -> bool {
        self >= SchemaId::V3_4_0
    }

    pub fn bt_layout(self) -> BtLayout {
        if self < SchemaId::V3_4_0 {
            BtLayout::Classless
        } else {
            BtLayout::Current
        }
    }

    pub fn network_layout(self) -> NetworkLayout {
        if self == SchemaId::V3_3_0 {
            NetworkLayout::RawHostname
        } else {
            NetworkLayout::Current
        }
    }

    pub fn ota2_layout(self) -> Ota2Layout {
        if self == SchemaId::V3_5_2 {
            Ota2Layout::Padded
        } else {
            Ota2Layout::Current
        }
    }

    pub fn misc_layout(self) -> MiscLayout {
        if self == SchemaId::V4_0_1 {
            MiscLayout::AggregateCode
        } else {
            MiscLayout::Current
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BtLayout {
    Classless,
    Current,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkLayout {
    RawHostname,
    Current,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ota2Layout {
    Padded,
    Current,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MiscLayout {
    AggregateCode,
    Current,
}

/// Addressable parts of a DCT bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DctSection {
    /// Application specific data after the platform sections.
    App,
    /// Housekeeping data; shares its offset with [`DctSection::App`].
    HkInfo,
    Security,
    MfgInfo,
    WifiConfig,
    EthernetConfig,
    NetworkConfig,
    BtConfig,
    P2pConfig,
    Ota2Config,
    Version,
    MiscConfig,
    /// The bank itself, starting with the header.
    Internal,
}

impl DctSection {
    /// Serialized size of a platform section. `App`, `HkInfo` and `Internal`
    /// have no fixed size.
    pub const fn size(self) -> Option<usize> {
        match self {
            DctSection::MfgInfo => Some(size_of::<MfgInfo>()),
            DctSection::Security => Some(size_of::<SecurityCreds>()),
            DctSection::WifiConfig => Some(size_of::<WifiConfig>()),
            DctSection::EthernetConfig => Some(size_of::<EthernetConfig>()),
            DctSection::NetworkConfig => Some(size_of::<NetworkConfig>()),
            DctSection::BtConfig => Some(size_of::<BtConfig>()),
            DctSection::P2pConfig => Some(size_of::<P2pConfig>()),
            DctSection::Ota2Config => Some(size_of::<Ota2Config>()),
            DctSection::Version => Some(size_of::<DctVersionStamp>()),
            DctSection::MiscConfig => Some(size_of::<MiscConfig>()),
            DctSection::App | DctSection::HkInfo | DctSection::Internal => None,
        }
    }
}

/// Platform sections in bank order.
pub const BANK_ORDER: [DctSection; 10] = [
    DctSection::MfgInfo,
    DctSection::Security,
    DctSection::WifiConfig,
    DctSection::EthernetConfig,
    DctSection::NetworkConfig,
    DctSection::BtConfig,
    DctSection::P2pConfig,
    DctSection::Ota2Config,
    DctSection::Version,
    DctSection::MiscConfig,
];

/// Sections an application could leave out of its DCT before the version
/// stamp made every section mandatory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OptionalSections {
    pub bt: bool,
    pub p2p: bool,
    pub ota2: bool,
}

impl OptionalSections {
    pub const ALL: OptionalSections = OptionalSections {
        bt: true,
        p2p: true,
        ota2: true,
    };

    pub const NONE: OptionalSections = OptionalSections {
        bt: false,
        p2p: false,
        ota2: false,
    };

    pub fn usage_flags(&self) -> UsageFlags {
        let mut flags = UsageFlags::empty();
        flags.set(UsageFlags::BT, self.bt);
        flags.set(UsageFlags::P2P, self.p2p);
        flags.set(UsageFlags::OTA2, self.ota2);
        flags
    }
}

/// Byte layout of a bank written with a given schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchemaLayout {
    pub schema: SchemaId,
    pub optional: OptionalSections,
}

impl SchemaLayout {
    pub const fn current() -> Self {
        SchemaLayout {
            schema: SchemaId::CURRENT,
            optional: OptionalSections::ALL,
        }
    }

    pub const fn new(schema: SchemaId, optional: OptionalSections) -> Self {
        SchemaLayout { schema, optional }
    }

    pub fn section_present(&self, section: DctSection) -> bool {
        let schema = self.schema;
        let stamped = schema.has_version_stamp();
        match section {
            DctSection::EthernetConfig | DctSection::NetworkConfig => schema.has_network_config(),
            DctSection::BtConfig => stamped || self.optional.bt,
            DctSection::P2pConfig => {
                stamped || (schema >= SchemaId::V3_5_1 && self.optional.p2p)
            }
            DctSection::Ota2Config => {
                stamped || (schema >= SchemaId::V3_5_2 && self.optional.ota2)
            }
            DctSection::Version => stamped,
            DctSection::MiscConfig => schema.has_misc_config(),
            _ => true,
        }
    }

    /// Offset of a section from the start of the bank, or `None` when the
    /// schema has no such section.
    pub fn section_offset(&self, section: DctSection) -> Option<usize> {
        match section {
            DctSection::Internal => Some(0),
            DctSection::App | DctSection::HkInfo => Some(self.data_size()),
            _ => {
                if !self.section_present(section) {
                    return None;
                }
                let mut offset = DCT_HEADER_SIZE;
                for candidate in BANK_ORDER {
                    if candidate == section {
                        return Some(offset);
                    }
                    if self.section_present(candidate) {
                        offset += candidate.size().unwrap_or(0);
                    }
                }
                None
            }
        }
    }

    /// Size of the header plus every platform section, i.e. where the
    /// application data starts.
    pub fn data_size(&self) -> usize {
        let end = DCT_HEADER_SIZE
            + BANK_ORDER
                .iter()
                .filter(|section| self.section_present(**section))
                .filter_map(|section| section.size())
                .sum::<usize>();
        if self.schema.pads_to_8_bytes() {
            end.next_multiple_of(8)
        } else {
            end
        }
    }
}

pub const CURRENT_LAYOUT: SchemaLayout = SchemaLayout::current();
