//! IA32_FEATURE_CONTROL lock
//!
//! Until the LOCK bit is set, VMX and SMX enables can be changed by any ring 0
//! code. The MSR is per thread, so every logical thread is checked.

use super::{has_fields, CheckModule, ModuleResult};
use crate::engine::RegisterEngine;
use crate::error::Result;

pub struct FeatureControlLock;

const REGISTER: &str = "IA32_FEATURE_CONTROL";

impl CheckModule for FeatureControlLock {
    fn name(&self) -> &'static str {
        "ia32_feature_control"
    }

    fn description(&self) -> &'static str {
        "IA32 Feature Control Lock"
    }

    fn is_supported(&self, engine: &RegisterEngine) -> bool {
        has_fields(engine, REGISTER, &["LOCK"])
    }

    fn run(&self, engine: &RegisterEngine) -> Result<ModuleResult> {
        let values = engine.read_register_all_threads(REGISTER)?;
        let mut unlocked = Vec::new();
        let mut checked = 0;
        for (thread, value) in (0u32..).zip(values) {
            // slots of offline threads hold another thread's value
            if !engine.backend().is_thread_enabled(thread) {
                tracing::info!("cpu{}: offline, skipped", thread);
                continue;
            }
            let lock = engine.get_register_field(REGISTER, value, "LOCK", false)?;
            tracing::info!("cpu{}: {} Lock = {}", thread, REGISTER, lock);
            checked += 1;
            if lock == 0 {
                unlocked.push(thread);
            }
        }

        if checked == 0 {
            tracing::warn!("No online logical CPU to check {} on", REGISTER);
            Ok(ModuleResult::Warning)
        } else if unlocked.is_empty() {
            tracing::info!("{} is locked on all logical CPUs", REGISTER);
            Ok(ModuleResult::Passed)
        } else {
            tracing::warn!("{} is not locked on threads {:?}", REGISTER, unlocked);
            Ok(ModuleResult::Failed)
        }
    }
}

#[cfg(all(test, feature = "cfl"))]
mod tests {
    use super::*;
    use crate::checks::tests_support::reference_engine;

    #[test]
    fn test_locked_on_every_thread() {
        let (engine, _) = reference_engine();
        assert_eq!(FeatureControlLock.run(&engine).unwrap(), ModuleResult::Passed);
    }

    #[test]
    fn test_one_unlocked_thread_fails() {
        let (engine, sim) = reference_engine();
        sim.set_msr(3, 0x3A, 0x4);
        assert_eq!(FeatureControlLock.run(&engine).unwrap(), ModuleResult::Failed);
    }

    #[test]
    fn test_offline_thread_not_judged() {
        let (engine, sim) = reference_engine();
        sim.set_msr(3, 0x3A, 0x4);
        sim.set_thread_enabled(3, false);
        assert_eq!(FeatureControlLock.run(&engine).unwrap(), ModuleResult::Passed);
    }

    #[test]
    fn test_no_online_thread_warns() {
        let (engine, sim) = reference_engine();
        for thread in 0..4 {
            sim.set_thread_enabled(thread, false);
        }
        assert_eq!(FeatureControlLock.run(&engine).unwrap(), ModuleResult::Warning);
    }
}
