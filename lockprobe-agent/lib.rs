// Macros (must be first for visibility)
#[macro_use]
pub mod macros;

pub mod backend;
pub mod checks;
pub mod common;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod prom;

pub use backend::{HardwareBackend, NativeBackend, SimulatedPlatform};
pub use checks::{CheckModule, ModuleResult};
pub use config::{BackendKind, ScanConfig};
pub use engine::RegisterEngine;
pub use error::{LockprobeError, Result};
pub use orchestrator::{ModuleReport, ScanReport, Scanner};
pub use prom::ScanMetricExporter;
