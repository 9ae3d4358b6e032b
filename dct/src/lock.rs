// Licensed under the Apache-2.0 license

//! The lock guarding the store's mutable state. Threaded hosts use a real
//! mutex; the bootloader is single threaded and only needs a `RefCell`.

use std::cell::RefCell;
use std::sync::Mutex;

/// Exclusive access to a value for the duration of one closure call.
pub trait StoreLock<T> {
    fn new(value: T) -> Self;

    /// Runs `f` with exclusive access. Must not be re-entered from `f`.
    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R;
}

pub struct StdMutex<T>(Mutex<T>);

impl<T> StoreLock<T> for StdMutex<T> {
    fn new(value: T) -> Self {
        StdMutex(Mutex::new(value))
    }

    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        // Poisoning is ignored: the state is only the lifecycle and the
        // cached bank.
        let mut guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

/// No-op lock for single threaded builds.
pub struct NoLock<T>(RefCell<T>);

impl<T> StoreLock<T> for NoLock<T> {
    fn new(value: T) -> Self {
        NoLock(RefCell::new(value))
    }

    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }
}

#[cfg(feature = "bootloader")]
pub type DefaultLock<T> = NoLock<T>;
#[cfg(not(feature = "bootloader"))]
pub type DefaultLock<T> = StdMutex<T>;
