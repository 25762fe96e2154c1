//! CF9h reset register lockdown
//!
//! ETR3.CF9LOCK prevents software from reprogramming how writes to port CF9h
//! reset the platform.

use super::{has_fields, CheckModule, ModuleResult};
use crate::engine::RegisterEngine;
use crate::error::Result;

pub struct Cf9Lock;

impl CheckModule for Cf9Lock {
    fn name(&self) -> &'static str {
        "cf9_lock"
    }

    fn description(&self) -> &'static str {
        "Checking that CF9LOCK bit is set"
    }

    fn is_supported(&self, engine: &RegisterEngine) -> bool {
        has_fields(engine, "ETR3", &["CF9LOCK"])
    }

    fn run(&self, engine: &RegisterEngine) -> Result<ModuleResult> {
        let etr3 = engine.read_register("ETR3")?;
        engine.print_register("ETR3", etr3)?;

        if engine.get_register_field("ETR3", etr3, "CF9LOCK", false)? == 0 {
            tracing::warn!("CF9 Lockdown bit not set");
            Ok(ModuleResult::Failed)
        } else {
            tracing::info!("CF9 Lockdown bit is set");
            Ok(ModuleResult::Passed)
        }
    }
}

#[cfg(all(test, feature = "cfl"))]
mod tests {
    use super::*;
    use crate::checks::tests_support::reference_engine;

    #[test]
    fn test_locked_platform_passes() {
        let (engine, _) = reference_engine();
        assert!(Cf9Lock.is_supported(&engine));
        assert_eq!(Cf9Lock.run(&engine).unwrap(), ModuleResult::Passed);
    }

    #[test]
    fn test_unlocked_platform_fails() {
        let (engine, sim) = reference_engine();
        sim.set_pci_dword(0, 31, 2, 0xAC, 0x0010_0000);
        assert_eq!(Cf9Lock.run(&engine).unwrap(), ModuleResult::Failed);
    }
}
