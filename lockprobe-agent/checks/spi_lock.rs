//! SPI controller configuration lockdown
//!
//! HSFS.FLOCKDN freezes the flash protected range and access permission
//! registers of the SPI controller until the next reset.

use super::{has_fields, CheckModule, ModuleResult};
use crate::engine::RegisterEngine;
use crate::error::Result;

pub struct SpiLock;

impl CheckModule for SpiLock {
    fn name(&self) -> &'static str {
        "spi_lock"
    }

    fn description(&self) -> &'static str {
        "SPI Flash Controller Configuration Locks"
    }

    fn is_supported(&self, engine: &RegisterEngine) -> bool {
        has_fields(engine, "HSFS", &["FLOCKDN"])
    }

    fn run(&self, engine: &RegisterEngine) -> Result<ModuleResult> {
        let base = engine.register_base_address("HSFS")?;
        tracing::info!("SPI BAR = 0x{:X}", base);

        let hsfs = engine.read_register("HSFS")?;
        engine.print_register("HSFS", hsfs)?;

        if engine.get_register_field("HSFS", hsfs, "FLOCKDN", false)? == 1 {
            tracing::info!("SPI Flash Controller configuration is locked");
            Ok(ModuleResult::Passed)
        } else {
            tracing::warn!("SPI Flash Controller configuration is not locked");
            Ok(ModuleResult::Failed)
        }
    }
}
