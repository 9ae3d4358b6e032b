// Licensed under the Apache-2.0 license

use dct_config::ConfigError;
use dct_flash::FlashDrvError;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DctError {
    #[error("Bad argument: {0}")]
    BadArgument(&'static str),
    #[error("Flash driver error: {0:?}")]
    Flash(FlashDrvError),
    #[error("Integrity check failed: {0}")]
    Integrity(&'static str),
    #[error("Not enough free sectors: {needed} needed, {available} available")]
    Capacity { needed: u32, available: u32 },
    #[error("Schema migration failed: {0}")]
    Migration(&'static str),
    #[error("Invalid image: {0}")]
    InvalidImage(&'static str),
    #[error("Invalid platform configuration: {0:?}")]
    Config(ConfigError),
    #[error("Store is not ready")]
    NotReady,
}

impl From<FlashDrvError> for DctError {
    fn from(err: FlashDrvError) -> Self {
        DctError::Flash(err)
    }
}

impl From<ConfigError> for DctError {
    fn from(err: ConfigError) -> Self {
        DctError::Config(err)
    }
}

pub type DctResult<T> = Result<T, DctError>;

/// Status reported across the operation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DctStatus {
    Success,
    RecoverableError,
    BadArgument,
}

impl DctError {
    pub fn status(&self) -> DctStatus {
        match self {
            DctError::BadArgument(_) | DctError::Config(_) => DctStatus::BadArgument,
            _ => DctStatus::RecoverableError,
        }
    }
}

impl DctStatus {
    pub fn from_result<T>(result: &DctResult<T>) -> DctStatus {
        match result {
            Ok(_) => DctStatus::Success,
            Err(err) => err.status(),
        }
    }
}
