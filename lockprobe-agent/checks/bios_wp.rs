//! BIOS region write protection
//!
//! The BIOS region is protected from non-SMM writes when BIOS Lock Enable
//! (BLE) and SMM BIOS Write Protection (SMM_BWP) are both set. With BLE
//! alone, any SMI handler that clears BIOSWE re-opens the region.

use super::{has_fields, CheckModule, ModuleResult};
use crate::engine::RegisterEngine;
use crate::error::Result;

pub struct BiosWriteProtect;

impl CheckModule for BiosWriteProtect {
    fn name(&self) -> &'static str {
        "bios_wp"
    }

    fn description(&self) -> &'static str {
        "BIOS Region Write Protection"
    }

    fn is_supported(&self, engine: &RegisterEngine) -> bool {
        has_fields(engine, "BC", &["BIOSWE", "BLE", "SMM_BWP"])
    }

    fn run(&self, engine: &RegisterEngine) -> Result<ModuleResult> {
        let bc = engine.read_register("BC")?;
        engine.print_register("BC", bc)?;

        let bioswe = engine.get_register_field("BC", bc, "BIOSWE", false)?;
        let ble = engine.get_register_field("BC", bc, "BLE", false)?;
        let smm_bwp = engine.get_register_field("BC", bc, "SMM_BWP", false)?;

        if ble == 1 && smm_bwp == 1 {
            tracing::info!("BIOS region write protection is enabled (writes restricted to SMM)");
            return Ok(ModuleResult::Passed);
        }

        if bioswe == 1 && ble == 0 {
            tracing::warn!("BIOS region is writable: BIOSWE is set and BLE is clear");
        } else if ble == 0 {
            tracing::warn!("BIOS Lock Enable (BLE) is not set");
        }
        if smm_bwp == 0 {
            tracing::warn!("SMM BIOS region write protection (SMM_BWP) is not enabled");
        }
        Ok(ModuleResult::Failed)
    }
}
