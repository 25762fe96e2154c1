//! # lockprobe-raw
//!
//! Register definitions for Intel platform lockdown inspection.
//!
//! This crate holds the pure-data half of lockprobe: the schema that maps a
//! symbolic register name to its physical location and bit fields, the
//! validated per-chipset [`DefinitionStore`], the built-in chipset profiles,
//! and the low-level device node primitives used by the native backend.
//!
//! ## Features
//!
//! Select the compiled-in chipset profiles via feature flags:
//! - `avn` (default) - Avoton SoC
//! - `cfl` (default) - Coffee Lake with 300-series PCH
//!
//! ## Usage
//!
//! ```ignore
//! use lockprobe_raw::chipset;
//!
//! let profile = chipset::find_by_code("cfl").unwrap();
//! let store = profile.store()?;
//!
//! let etr3 = store.get("ETR3").unwrap();
//! let cf9lock = etr3.get_field("CF9LOCK").unwrap();
//! assert_eq!(cf9lock.extract(0x8000_0000), 1);
//! ```

pub mod chipset;
pub mod definition;
pub mod devnode;
pub mod register;
pub mod store;

// Re-export for convenience
pub use definition::{BaseAddress, RegisterClass, RegisterDefinition};
pub use devnode::{DevError, DevNode};
pub use register::{
    join_address, AccessWidth, ConfigAddress, FieldDefinition, InvalidWidth, RegisterLayout,
};
pub use store::{DefinitionError, DefinitionStore};
