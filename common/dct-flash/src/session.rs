// Licensed under the Apache-2.0 license

use log::debug;

use crate::hil::{FlashDevice, FlashDrvError, WriteMode};

/// A claimed flash device, released when the session is dropped.
///
/// Sessions live for a single store operation so an early return on error
/// can never leave the device claimed.
pub struct FlashSession<'a> {
    device: &'a dyn FlashDevice,
    mode: WriteMode,
}

impl<'a> FlashSession<'a> {
    /// Claims `device` for the duration of the returned session.
    ///
    /// # Arguments
    ///
    /// * `device` - Flash driver to claim.
    /// * `peripheral_id` - Platform identifier of the flash peripheral.
    /// * `mode` - Whether the session may write or erase.
    ///
    /// # Returns
    ///
    /// Returns `Ok(FlashSession)` once the driver is initialized, or the
    /// driver's error if initialization fails.
    pub fn open(
        device: &'a dyn FlashDevice,
        peripheral_id: u32,
        mode: WriteMode,
    ) -> Result<Self, FlashDrvError> {
        device.init(peripheral_id, mode)?;
        Ok(FlashSession { device, mode })
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    pub fn capacity(&self) -> u32 {
        self.device.capacity()
    }

    pub fn read(&self, buffer: &mut [u8], address: u32) -> Result<(), FlashDrvError> {
        self.device.read(buffer, address)
    }

    pub fn read_secure(&self, buffer: &mut [u8], address: u32) -> Result<(), FlashDrvError> {
        self.device.read_secure(buffer, address)
    }

    pub fn write(&self, buffer: &[u8], address: u32) -> Result<(), FlashDrvError> {
        self.check_writable()?;
        self.device.write(buffer, address)
    }

    pub fn write_secure(&self, buffer: &[u8], address: u32) -> Result<(), FlashDrvError> {
        self.check_writable()?;
        self.device.write_secure(buffer, address)
    }

    pub fn erase_sector(&self, address: u32) -> Result<(), FlashDrvError> {
        self.check_writable()?;
        self.device.sector_erase(address)
    }

    /// Erases every sector overlapping `[address, address + length)`.
    pub fn erase_range(
        &self,
        address: u32,
        length: u32,
        sector_size: u32,
    ) -> Result<(), FlashDrvError> {
        if length == 0 {
            return Ok(());
        }
        if sector_size == 0 {
            return Err(FlashDrvError::INVAL);
        }
        let first = address / sector_size;
        let last = (address + length - 1) / sector_size;
        for sector in first..=last {
            self.erase_sector(sector * sector_size)?;
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), FlashDrvError> {
        match self.mode {
            WriteMode::ReadWrite => Ok(()),
            WriteMode::ReadOnly => Err(FlashDrvError::NOSUPPORT),
        }
    }
}

impl Drop for FlashSession<'_> {
    fn drop(&mut self) {
        self.device.deinit();
    }
}

/// Translation from a logical offset inside a secure region to the physical
/// address holding it. The secure flash layout is owned by the platform.
pub trait SecureAddressMap: Sync {
    /// Physical address of byte `offset` of the secure region starting at
    /// `base`.
    fn map(&self, base: u32, offset: u32) -> u32;

    /// Number of logical bytes from `offset` that stay physically contiguous.
    fn contiguous_len(&self, offset: u32) -> u32;
}

/// Secure layout that reserves `metadata_size` bytes at the end of every
/// sector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetadataInterleavedMap {
    pub sector_size: u32,
    pub metadata_size: u32,
}

impl MetadataInterleavedMap {
    fn payload_size(&self) -> u32 {
        self.sector_size - self.metadata_size
    }
}

impl SecureAddressMap for MetadataInterleavedMap {
    fn map(&self, base: u32, offset: u32) -> u32 {
        let payload = self.payload_size();
        base + (offset / payload) * self.sector_size + offset % payload
    }

    fn contiguous_len(&self, offset: u32) -> u32 {
        let payload = self.payload_size();
        payload - offset % payload
    }
}

/// How one operation reaches a region: plainly, or through the secure path
/// and its address map. Chosen once per operation.
#[derive(Clone, Copy)]
pub enum FlashAccess<'a> {
    Plain,
    Secure(&'a dyn SecureAddressMap),
}

impl FlashAccess<'_> {
    pub fn is_secure(&self) -> bool {
        matches!(self, FlashAccess::Secure(_))
    }

    pub fn physical_address(&self, base: u32, offset: u32) -> u32 {
        match self {
            FlashAccess::Plain => base + offset,
            FlashAccess::Secure(map) => map.map(base, offset),
        }
    }

    /// Logical bytes from `offset` that can be moved with one driver call.
    pub fn contiguous_len(&self, offset: u32) -> u32 {
        match self {
            FlashAccess::Plain => u32::MAX,
            FlashAccess::Secure(map) => map.contiguous_len(offset),
        }
    }

    /// Reads `buffer.len()` logical bytes at `offset` of the region at `base`.
    pub fn read(
        &self,
        session: &FlashSession,
        base: u32,
        offset: u32,
        buffer: &mut [u8],
    ) -> Result<(), FlashDrvError> {
        let mut done = 0usize;
        while done < buffer.len() {
            let offset = offset + done as u32;
            let len = (buffer.len() - done).min(self.contiguous_len(offset) as usize);
            let address = self.physical_address(base, offset);
            let chunk = &mut buffer[done..done + len];
            match self {
                FlashAccess::Plain => session.read(chunk, address)?,
                FlashAccess::Secure(_) => session.read_secure(chunk, address)?,
            }
            done += len;
        }
        Ok(())
    }

    /// Writes `data` at logical `offset` of the region at `base`.
    pub fn write(
        &self,
        session: &FlashSession,
        base: u32,
        offset: u32,
        data: &[u8],
    ) -> Result<(), FlashDrvError> {
        let mut done = 0usize;
        while done < data.len() {
            let offset = offset + done as u32;
            let len = (data.len() - done).min(self.contiguous_len(offset) as usize);
            let address = self.physical_address(base, offset);
            let chunk = &data[done..done + len];
            match self {
                FlashAccess::Plain => session.write(chunk, address)?,
                FlashAccess::Secure(_) => {
                    debug!("secure write of {} bytes at 0x{:x}", len, address);
                    session.write_secure(chunk, address)?
                }
            }
            done += len;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    struct CountingDevice {
        open: Cell<i32>,
        memory: RefCell<Vec<u8>>,
        erased: RefCell<Vec<u32>>,
    }

    impl CountingDevice {
        fn new() -> Self {
            CountingDevice {
                open: Cell::new(0),
                memory: RefCell::new(vec![0xFF; 0x4000]),
                erased: RefCell::new(Vec::new()),
            }
        }
    }

    impl FlashDevice for CountingDevice {
        fn init(&self, _peripheral_id: u32, _mode: WriteMode) -> Result<(), FlashDrvError> {
            self.open.set(self.open.get() + 1);
            Ok(())
        }

        fn deinit(&self) {
            self.open.set(self.open.get() - 1);
        }

        fn read(&self, buffer: &mut [u8], address: u32) -> Result<(), FlashDrvError> {
            let start = address as usize;
            buffer.copy_from_slice(&self.memory.borrow()[start..start + buffer.len()]);
            Ok(())
        }

        fn write(&self, buffer: &[u8], address: u32) -> Result<(), FlashDrvError> {
            let start = address as usize;
            self.memory.borrow_mut()[start..start + buffer.len()].copy_from_slice(buffer);
            Ok(())
        }

        fn sector_erase(&self, address: u32) -> Result<(), FlashDrvError> {
            self.erased.borrow_mut().push(address);
            Ok(())
        }

        fn capacity(&self) -> u32 {
            0x4000
        }
    }

    #[test]
    fn test_session_released_on_drop() {
        let device = CountingDevice::new();
        {
            let session = FlashSession::open(&device, 0, WriteMode::ReadWrite).unwrap();
            assert_eq!(device.open.get(), 1);
            session.write(&[1, 2, 3], 0x10).unwrap();
        }
        assert_eq!(device.open.get(), 0);

        let failing = || -> Result<(), FlashDrvError> {
            let session = FlashSession::open(&device, 0, WriteMode::ReadOnly)?;
            session.write(&[0], 0)?;
            Ok(())
        };
        assert_eq!(failing(), Err(FlashDrvError::NOSUPPORT));
        assert_eq!(device.open.get(), 0);
    }

    #[test]
    fn test_erase_range_covers_partial_sectors() {
        let device = CountingDevice::new();
        let session = FlashSession::open(&device, 0, WriteMode::ReadWrite).unwrap();
        session.erase_range(0x0FFF, 0x1002, 0x1000).unwrap();
        assert_eq!(*device.erased.borrow(), vec![0x0000, 0x1000, 0x2000]);
        session.erase_range(0x3000, 0, 0x1000).unwrap();
        assert_eq!(device.erased.borrow().len(), 3);
    }

    #[test]
    fn test_secure_access_splits_at_metadata() {
        let device = CountingDevice::new();
        let session = FlashSession::open(&device, 0, WriteMode::ReadWrite).unwrap();
        let map = MetadataInterleavedMap {
            sector_size: 0x100,
            metadata_size: 0x10,
        };
        let access = FlashAccess::Secure(&map);
        assert_eq!(access.physical_address(0x1000, 0xF0), 0x1100);
        assert_eq!(access.contiguous_len(0xEE), 2);

        let data: Vec<u8> = (0..8).collect();
        access.write(&session, 0x1000, 0xEC, &data).unwrap();
        let memory = device.memory.borrow();
        assert_eq!(&memory[0x10EC..0x10F0], &[0, 1, 2, 3]);
        assert_eq!(&memory[0x10F0..0x1100], &[0xFF; 16]);
        assert_eq!(&memory[0x1100..0x1104], &[4, 5, 6, 7]);
        drop(memory);

        let mut back = [0u8; 8];
        access.read(&session, 0x1000, 0xEC, &mut back).unwrap();
        assert_eq!(&back[..], &data[..]);
    }
}
