//! Lockdown check modules
//!
//! Each module inspects one security-relevant configuration through the
//! [`RegisterEngine`] and reports a [`ModuleResult`]. Modules only consume the
//! engine contract: they check support with `is_register_defined` /
//! `register_has_field`, read, and decode fields.

pub mod bios_wp;
pub mod cf9_lock;
pub mod ia32_feature_control;
pub mod igd_force_wake;
pub mod smi_lock;
pub mod spi_lock;

use crate::common::PollPolicy;
use crate::engine::RegisterEngine;
use crate::error::Result;

enum_with_data! {
    /// Outcome of one check module
    pub enum ModuleResult: u8 {
        Passed => ("PASSED", 0),
        NotApplicable => ("NOT APPLICABLE", 0),
        Skipped => ("SKIPPED", 0),
        Warning => ("WARNING", 1),
        Error => ("ERROR", 2),
        Failed => ("FAILED", 3),
    }
    impl severity -> u8
}

impl std::fmt::Display for ModuleResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub trait CheckModule: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Whether the registers this module needs exist on the platform
    fn is_supported(&self, engine: &RegisterEngine) -> bool;

    fn run(&self, engine: &RegisterEngine) -> Result<ModuleResult>;
}

/// Every bundled module, in scan order
pub fn all_modules(poll: PollPolicy) -> Vec<Box<dyn CheckModule>> {
    vec![
        Box::new(cf9_lock::Cf9Lock),
        Box::new(bios_wp::BiosWriteProtect),
        Box::new(spi_lock::SpiLock),
        Box::new(smi_lock::SmiLock),
        Box::new(ia32_feature_control::FeatureControlLock),
        Box::new(igd_force_wake::IgdForceWake::new(poll)),
    ]
}

/// `true` when `register` exists and carries all of `fields`
pub(crate) fn has_fields(engine: &RegisterEngine, register: &str, fields: &[&str]) -> bool {
    engine.is_register_defined(register)
        && fields
            .iter()
            .all(|field| engine.register_has_field(register, field))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_names_unique() {
        let modules = all_modules(PollPolicy::default());
        let mut names: Vec<&str> = modules.iter().map(|m| m.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), modules.len());
    }

    #[test]
    fn test_result_severity_order() {
        assert!(ModuleResult::Failed.severity() > ModuleResult::Error.severity());
        assert!(ModuleResult::Error.severity() > ModuleResult::Warning.severity());
        assert!(ModuleResult::Warning.severity() > ModuleResult::Passed.severity());
        assert_eq!(ModuleResult::NotApplicable.to_string(), "NOT APPLICABLE");
        assert_eq!(ModuleResult::all().len(), 6);
    }
}

#[cfg(all(test, feature = "cfl"))]
pub(crate) mod tests_support {
    use std::sync::Arc;

    use lockprobe_raw::chipset::cfl;
    use lockprobe_raw::DefinitionStore;

    use crate::backend::SimulatedPlatform;
    use crate::engine::RegisterEngine;

    pub fn cfl_store() -> DefinitionStore {
        cfl::PROFILE.store().unwrap()
    }

    /// Engine over the locked-down reference platform
    pub fn reference_engine() -> (RegisterEngine, Arc<SimulatedPlatform>) {
        let sim = Arc::new(SimulatedPlatform::reference());
        let engine = RegisterEngine::new(Arc::new(cfl_store()), sim.clone());
        (engine, sim)
    }
}
