// Licensed under the Apache-2.0 license

//! Bank checksum: reflected CRC-32, seed `0xFFFFFFFF`, no final xor. Must
//! stay bit-exact with what older bootloaders computed.

use crc::{Crc, Digest, CRC_32_JAMCRC};

static DCT_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_JAMCRC);

/// Running checksum over a bank assembled from several pieces.
pub(crate) struct BankCrc(Digest<'static, u32>);

impl BankCrc {
    pub fn new() -> Self {
        BankCrc(DCT_CRC.digest())
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    pub fn finalize(self) -> u32 {
        self.0.finalize()
    }
}

/// One-shot checksum of `bytes`.
pub fn crc32(bytes: &[u8]) -> u32 {
    DCT_CRC.checksum(bytes)
}
