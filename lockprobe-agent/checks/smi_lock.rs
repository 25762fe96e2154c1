//! SMI configuration lock
//!
//! GEN_PMCON_1.SMI_LOCK makes the global SMI enable bits read-only, so an OS
//! cannot switch SMIs off to bypass SMM based protections.

use super::{has_fields, CheckModule, ModuleResult};
use crate::engine::RegisterEngine;
use crate::error::Result;

pub struct SmiLock;

impl CheckModule for SmiLock {
    fn name(&self) -> &'static str {
        "smi_lock"
    }

    fn description(&self) -> &'static str {
        "SMI Events Configuration Lock"
    }

    fn is_supported(&self, engine: &RegisterEngine) -> bool {
        has_fields(engine, "GEN_PMCON_1", &["SMI_LOCK"])
    }

    fn run(&self, engine: &RegisterEngine) -> Result<ModuleResult> {
        let pmcon = engine.read_register("GEN_PMCON_1")?;
        engine.print_register("GEN_PMCON_1", pmcon)?;

        if engine.get_register_field("GEN_PMCON_1", pmcon, "SMI_LOCK", false)? == 1 {
            tracing::info!("SMI events global configuration is locked");
            Ok(ModuleResult::Passed)
        } else {
            tracing::warn!("SMI events global configuration is not locked");
            Ok(ModuleResult::Failed)
        }
    }
}
