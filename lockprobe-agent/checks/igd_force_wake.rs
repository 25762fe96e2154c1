//! GT force-wake handshake
//!
//! Graphics MMIO behind the GT power well is only decoded while the GT is
//! awake. The module requests a wake through GT_FORCE_WAKE, waits a bounded
//! time for the acknowledge in GTSP1, and releases the request again. A GT
//! that never acknowledges leaves its register state uninspectable.

use super::{has_fields, CheckModule, ModuleResult};
use crate::common::{PollOutcome, PollPolicy};
use crate::engine::RegisterEngine;
use crate::error::Result;

const SUPPORTED_CHIPSETS: &[&str] = &["cfl"];

/// Highest request bit, tried first
const FIRST_WAKE_BIT: u64 = 0x8000;

pub struct IgdForceWake {
    poll: PollPolicy,
}

impl IgdForceWake {
    pub fn new(poll: PollPolicy) -> Self {
        Self { poll }
    }

    fn write_request(&self, engine: &RegisterEngine, mask: u64, request: u64) -> Result<()> {
        let value = engine.set_register_field("GT_FORCE_WAKE", 0, "WAKE_MASK", mask)?;
        let value = engine.set_register_field("GT_FORCE_WAKE", value, "WAKE_REQUEST", request)?;
        engine.write_register("GT_FORCE_WAKE", value)?;
        Ok(())
    }
}

fn igd_present(engine: &RegisterEngine) -> bool {
    match engine.backend().read_pci_reg(0, 2, 0, 0x00, 2) {
        Ok(vid) => vid != 0xFFFF,
        Err(_) => false,
    }
}

/// First request bit, from the top, that is not already acknowledged
fn free_wake_bit(state: u64) -> Option<u64> {
    let mut mask = FIRST_WAKE_BIT;
    while mask != 0 && state & mask != 0 {
        mask >>= 1;
    }
    (mask != 0).then_some(mask)
}

impl CheckModule for IgdForceWake {
    fn name(&self) -> &'static str {
        "igd_force_wake"
    }

    fn description(&self) -> &'static str {
        "GT Force Wake"
    }

    fn is_supported(&self, engine: &RegisterEngine) -> bool {
        if !SUPPORTED_CHIPSETS.contains(&engine.chipset_code()) {
            return false;
        }
        if !has_fields(engine, "GT_FORCE_WAKE", &["WAKE_REQUEST", "WAKE_MASK"])
            || !has_fields(engine, "GTSP1", &["WAKE_REQUEST"])
        {
            tracing::warn!("Missing register definitions to enable Force Wake support");
            return false;
        }
        if !igd_present(engine) {
            tracing::info!("IGD is disabled");
            return false;
        }
        true
    }

    fn run(&self, engine: &RegisterEngine) -> Result<ModuleResult> {
        let state = engine.read_register_field("GTSP1", "WAKE_REQUEST", false)?;
        tracing::info!("Force Wake initial state: 0x{:08X}", state);

        let Some(mask) = free_wake_bit(state) else {
            tracing::warn!("No free force wake request bit");
            return Ok(ModuleResult::Warning);
        };

        self.write_request(engine, mask, mask)?;
        let outcome =
            engine.poll_register_field("GTSP1", "WAKE_REQUEST", &self.poll, |v| v & mask == mask)?;

        match outcome {
            PollOutcome::Ready(state) => {
                tracing::info!("Force Wake new state: 0x{:08X}", state);
                self.write_request(engine, mask, 0)?;
                tracing::info!("GT Force Wake complete");
                Ok(ModuleResult::Passed)
            }
            PollOutcome::NotReady { last, attempts } => {
                tracing::warn!(
                    "GT Force Wake failed after {} attempts, state 0x{:08X}",
                    attempts,
                    last
                );
                Ok(ModuleResult::Warning)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_wake_bit() {
        assert_eq!(free_wake_bit(0), Some(0x8000));
        assert_eq!(free_wake_bit(0xC000), Some(0x2000));
        assert_eq!(free_wake_bit(0xFFFF), None);
    }

    #[cfg(feature = "cfl")]
    mod platform {
        use std::sync::Arc;
        use std::time::Duration;

        use super::*;
        use crate::backend::SimulatedPlatform;
        use crate::checks::tests_support::{cfl_store, reference_engine};

        fn module() -> IgdForceWake {
            IgdForceWake::new(PollPolicy::new(3, Duration::from_millis(1)))
        }

        #[test]
        fn test_handshake_completes_and_releases() {
            let (engine, sim) = reference_engine();
            assert!(module().is_supported(&engine));
            assert_eq!(module().run(&engine).unwrap(), ModuleResult::Passed);
            // request released, acknowledge cleared
            assert_eq!(sim.dump_memory(0xDE0D_0084, 4), [0, 0, 0, 0]);
        }

        #[test]
        fn test_unacknowledged_request_warns() {
            // GT present but nothing answers the wake request
            let bare = Arc::new(SimulatedPlatform::new(1));
            bare.set_pci_dword(0, 2, 0, 0x00, 0x3E92_8086);
            bare.set_pci_dword(0, 2, 0, 0x10, 0xDE00_0004);
            bare.set_pci_dword(0, 2, 0, 0x14, 0);
            bare.load_memory(0xDE0D_0084, &[0; 4]);
            let engine = RegisterEngine::new(Arc::new(cfl_store()), bare);
            assert_eq!(module().run(&engine).unwrap(), ModuleResult::Warning);
        }

        #[test]
        fn test_absent_igd_not_supported() {
            let (engine, sim) = reference_engine();
            sim.set_pci_dword(0, 2, 0, 0x00, 0xFFFF_FFFF);
            assert!(!module().is_supported(&engine));
        }
    }
}
