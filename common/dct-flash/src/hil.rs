// Licensed under the Apache-2.0 license

//! Generic interface for the flash device holding the DCT banks and app
//! images.

use core::result::Result;

/// Whether a session may modify the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    ReadOnly,
    ReadWrite,
}

/// Raw flash driver. Addresses are absolute device offsets.
///
/// Writes may only clear bits; a sector must be erased before bytes in it can
/// be set again. Drivers use interior mutability, every method takes `&self`.
pub trait FlashDevice {
    /// Power up and claim the device for one operation.
    fn init(&self, peripheral_id: u32, mode: WriteMode) -> Result<(), FlashDrvError>;

    /// Release the device claimed by [`FlashDevice::init`].
    fn deinit(&self);

    /// Read from the flash storage, filling the provided buffer with data
    fn read(&self, buffer: &mut [u8], address: u32) -> Result<(), FlashDrvError>;

    /// Write to the flash storage with the full contents of the buffer, starting at the specified
    /// address
    fn write(&self, buffer: &[u8], address: u32) -> Result<(), FlashDrvError>;

    /// Erase the sector containing `address`.
    fn sector_erase(&self, address: u32) -> Result<(), FlashDrvError>;

    /// Returns the size of the flash storage in bytes.
    fn capacity(&self) -> u32;

    /// Read through the device's secure (authenticated/encrypted) path.
    fn read_secure(&self, buffer: &mut [u8], address: u32) -> Result<(), FlashDrvError> {
        self.read(buffer, address)
    }

    /// Write through the device's secure (authenticated/encrypted) path.
    fn write_secure(&self, buffer: &[u8], address: u32) -> Result<(), FlashDrvError> {
        self.write(buffer, address)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum FlashDrvError {
    // Reserved value, for when "no error" / "success" should be
    // encoded in the same numeric representation as FlashDrvError
    //
    // Ok(()) = 0,
    /// Generic failure condition
    FAIL = 1,
    /// Underlying system is busy; retry
    BUSY = 2,
    /// The component is powered down
    OFF = 4,
    /// An invalid parameter was passed
    INVAL = 6,
    /// Parameter passed was too large
    SIZE = 7,
    /// Operation is not supported
    NOSUPPORT = 10,
    /// Device is not available
    NODEVICE = 11,
}

impl From<FlashDrvError> for usize {
    fn from(err: FlashDrvError) -> usize {
        err as usize
    }
}
