// Licensed under the Apache-2.0 license

//! In-memory NOR flash used to exercise the store on the host.
//!
//! Programming can only clear bits and erasing sets a whole sector to `0xFF`,
//! so a missing erase shows up as corrupted data just as it would on the
//! part. A power loss can be scheduled after a number of program/erase
//! operations; every later program, erase or read then fails until power is
//! restored.

use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Mutex;

use log::debug;

use crate::hil::{FlashDevice, FlashDrvError, WriteMode};

pub struct SimFlash {
    memory: Mutex<Vec<u8>>,
    sector_size: u32,
    open_sessions: AtomicIsize,
    program_ops: AtomicUsize,
    secure_ops: AtomicUsize,
    remaining_ops: Mutex<Option<usize>>,
}

impl SimFlash {
    pub fn new(capacity: u32, sector_size: u32) -> Self {
        SimFlash {
            memory: Mutex::new(vec![0xFF; capacity as usize]),
            sector_size,
            open_sessions: AtomicIsize::new(0),
            program_ops: AtomicUsize::new(0),
            secure_ops: AtomicUsize::new(0),
            remaining_ops: Mutex::new(None),
        }
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    /// Lets `ops` more program/erase operations succeed, then cuts power.
    pub fn power_loss_after(&self, ops: usize) {
        *self.lock_budget() = Some(ops);
    }

    pub fn restore_power(&self) {
        *self.lock_budget() = None;
    }

    /// Program and erase operations performed so far.
    pub fn program_ops(&self) -> usize {
        self.program_ops.load(Ordering::SeqCst)
    }

    /// Operations that went through the secure read/write path.
    pub fn secure_ops(&self) -> usize {
        self.secure_ops.load(Ordering::SeqCst)
    }

    /// Sessions currently holding the device.
    pub fn open_sessions(&self) -> isize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    pub fn dump(&self, address: u32, length: usize) -> Vec<u8> {
        let memory = self.lock_memory();
        memory[address as usize..address as usize + length].to_vec()
    }

    /// Overwrites flash contents directly, as a programmer would at the
    /// factory. Bypasses NOR semantics and the power budget.
    pub fn load(&self, address: u32, data: &[u8]) {
        let mut memory = self.lock_memory();
        memory[address as usize..address as usize + data.len()].copy_from_slice(data);
    }

    fn lock_memory(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.memory.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_budget(&self) -> std::sync::MutexGuard<'_, Option<usize>> {
        self.remaining_ops.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn powered(&self) -> Result<(), FlashDrvError> {
        match *self.lock_budget() {
            Some(0) => Err(FlashDrvError::OFF),
            _ => Ok(()),
        }
    }

    fn consume_op(&self) -> Result<(), FlashDrvError> {
        let mut budget = self.lock_budget();
        match budget.as_mut() {
            Some(0) => {
                debug!("sim flash: power lost");
                return Err(FlashDrvError::OFF);
            }
            Some(remaining) => *remaining -= 1,
            None => {}
        }
        self.program_ops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn check_range(&self, address: u32, length: usize) -> Result<(), FlashDrvError> {
        if address as usize + length > self.lock_memory().len() {
            return Err(FlashDrvError::SIZE);
        }
        Ok(())
    }
}

impl FlashDevice for SimFlash {
    fn init(&self, _peripheral_id: u32, _mode: WriteMode) -> Result<(), FlashDrvError> {
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn deinit(&self) {
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }

    fn read(&self, buffer: &mut [u8], address: u32) -> Result<(), FlashDrvError> {
        self.powered()?;
        self.check_range(address, buffer.len())?;
        let memory = self.lock_memory();
        let start = address as usize;
        buffer.copy_from_slice(&memory[start..start + buffer.len()]);
        Ok(())
    }

    fn write(&self, buffer: &[u8], address: u32) -> Result<(), FlashDrvError> {
        self.check_range(address, buffer.len())?;
        self.consume_op()?;
        let mut memory = self.lock_memory();
        let start = address as usize;
        for (cell, byte) in memory[start..start + buffer.len()].iter_mut().zip(buffer) {
            *cell &= *byte;
        }
        Ok(())
    }

    fn sector_erase(&self, address: u32) -> Result<(), FlashDrvError> {
        self.check_range(address, 1)?;
        self.consume_op()?;
        let start = (address - address % self.sector_size) as usize;
        let mut memory = self.lock_memory();
        let end = (start + self.sector_size as usize).min(memory.len());
        memory[start..end].fill(0xFF);
        Ok(())
    }

    fn capacity(&self) -> u32 {
        self.lock_memory().len() as u32
    }

    fn read_secure(&self, buffer: &mut [u8], address: u32) -> Result<(), FlashDrvError> {
        self.secure_ops.fetch_add(1, Ordering::SeqCst);
        self.read(buffer, address)
    }

    fn write_secure(&self, buffer: &[u8], address: u32) -> Result<(), FlashDrvError> {
        self.secure_ops.fetch_add(1, Ordering::SeqCst);
        self.write(buffer, address)
    }
}
