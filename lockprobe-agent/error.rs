use std::io;
use thiserror::Error;

use lockprobe_raw::{DefinitionError, DevError};

#[derive(Error, Debug)]
pub enum LockprobeError {
    #[error("Register {0} is not defined for this platform")]
    UndefinedRegister(String),

    #[error("Register {register} has no field {field}")]
    UndefinedField { register: String, field: String },

    #[error("Register {0} is not located through a base address")]
    NoBaseAddress(String),

    #[error("{size} is not a valid {access} size")]
    InvalidSize { access: &'static str, size: u64 },

    #[error("{length} bytes at 0x{address:X} run past the end of the address space")]
    AddressOverflow { address: u64, length: usize },

    #[error("CR{0} is not supported")]
    UnsupportedControlRegister(u32),

    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),

    #[error("Unknown chipset: {0}")]
    UnknownChipset(String),

    #[error("Invalid register definitions: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Device access failed: {0}")]
    Device(#[from] DevError),

    #[error("Affinity operation failed: {0}")]
    AffinityError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Nix error: {0}")]
    NixError(#[from] nix::Error),

    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, LockprobeError>;
