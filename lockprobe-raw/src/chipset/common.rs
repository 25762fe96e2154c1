//! Registers shared by all supported Intel platforms
//!
//! Architectural MSRs, the host bridge identification registers, and the
//! legacy SMI command port. Chipset profiles override any of these by name.
//!
//! ## References
//!
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 4
//! - Intel® PCH datasheets, LPC/eSPI and PMC chapters

use crate::definition::RegisterDefinition;
use crate::register::AccessWidth;

/// Host bridge, bus 0 device 0 function 0
pub const HOST_BRIDGE: (u32, u32, u32) = (0, 0, 0);

/// LPC/eSPI bridge, bus 0 device 31 function 0
pub const LPC: (u32, u32, u32) = (0, 31, 0);

/// MSR addresses referenced by the common profile
pub mod msr {
    pub const IA32_FEATURE_CONTROL: u32 = 0x3A;
    pub const IA32_SMRR_PHYSBASE: u32 = 0x1F2;
    pub const IA32_SMRR_PHYSMASK: u32 = 0x1F3;
    pub const MSR_BIOS_DONE: u32 = 0x151;
    pub const IA32_SPEC_CTRL: u32 = 0x48;
}

pub fn definitions() -> Vec<RegisterDefinition> {
    vec![
        RegisterDefinition::pci(
            "PCI0.0.0_VID_DID",
            HOST_BRIDGE,
            0x00,
            AccessWidth::Dword,
            "Host Bridge Vendor/Device ID",
        )
        .field("VID", 0, 16, "Vendor ID")
        .field("DID", 16, 16, "Device ID"),
        RegisterDefinition::pci(
            "PCI0.0.0_TSEGMB",
            HOST_BRIDGE,
            0xB8,
            AccessWidth::Dword,
            "TSEG Memory Base",
        )
        .field("LOCK", 0, 1, "Lock")
        .field("TSEGMB", 20, 12, "TSEG Memory Base"),
        RegisterDefinition::pci("BC", LPC, 0xDC, AccessWidth::Byte, "BIOS Control")
            .field("BIOSWE", 0, 1, "BIOS Write Enable")
            .field("BLE", 1, 1, "BIOS Lock Enable")
            .field("SRC", 2, 2, "SPI Read Configuration")
            .field("TSS", 4, 1, "Top Swap Status")
            .field("SMM_BWP", 5, 1, "SMM BIOS Write Protection"),
        RegisterDefinition::pci(
            "GEN_PMCON_1",
            LPC,
            0xA0,
            AccessWidth::Word,
            "General PM Configuration 1",
        )
        .field("SMI_LOCK", 4, 1, "SMI Lock"),
        RegisterDefinition::io("APMC", 0xB2, AccessWidth::Byte, "Advanced Power Management Control"),
        RegisterDefinition::msr(
            "IA32_FEATURE_CONTROL",
            msr::IA32_FEATURE_CONTROL,
            "Processor Feature Control",
        )
        .field("LOCK", 0, 1, "Lock")
        .field("EN_VMX_INSIDE_SMX", 1, 1, "Enable VMX inside SMX operation")
        .field("EN_VMX_OUTSIDE_SMX", 2, 1, "Enable VMX outside SMX operation")
        .field("SENTER_FUNCTIONS", 8, 7, "SENTER Local Function Enables")
        .field("SENTER_GLOBAL_EN", 15, 1, "SENTER Global Enable"),
        RegisterDefinition::msr(
            "IA32_SMRR_PHYSBASE",
            msr::IA32_SMRR_PHYSBASE,
            "SMRR Base Address",
        )
        .field("Type", 0, 8, "SMRR memory type")
        .field("PhysBase", 12, 20, "SMRR physical base address"),
        RegisterDefinition::msr(
            "IA32_SMRR_PHYSMASK",
            msr::IA32_SMRR_PHYSMASK,
            "SMRR Range Mask",
        )
        .field("Valid", 11, 1, "SMRR valid")
        .field("PhysMask", 12, 20, "SMRR address range mask"),
        RegisterDefinition::msr("IA32_SPEC_CTRL", msr::IA32_SPEC_CTRL, "Speculation Control")
            .field("IBRS", 0, 1, "Indirect Branch Restricted Speculation")
            .field("STIBP", 1, 1, "Single Thread Indirect Branch Predictors")
            .field("SSBD", 2, 1, "Speculative Store Bypass Disable"),
    ]
}
