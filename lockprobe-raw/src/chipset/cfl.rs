//! Coffee Lake (8th/9th gen Core, 300-series PCH) register definitions
//!
//! SPI and PMC moved to their own PCI functions on this generation, and the
//! memory controller registers sit behind a 39-bit MCHBAR split over two
//! config dwords.
//!
//! ## References
//!
//! - 8th and 9th Generation Intel® Core™ Processor Family Datasheet, Volume 2
//! - Intel® 300 Series Chipset Family PCH Datasheet, Volume 2

use super::ChipsetProfile;
use crate::definition::{BaseAddress, RegisterDefinition};
use crate::register::AccessWidth;

pub static PROFILE: ChipsetProfile = ChipsetProfile {
    code: "cfl",
    name: "Coffee Lake",
    host_bridge_ids: &[
        0x3E0F, 0x3E10, 0x3E18, 0x3E1F, 0x3E30, 0x3E31, 0x3E32, 0x3E33, 0x3EC2, 0x3EC4, 0x3EC6,
        0x3ECA, 0x3ECC, 0x3ED0,
    ],
    definitions,
};

pub const HOST_BRIDGE: (u32, u32, u32) = (0, 0, 0);
pub const IGD: (u32, u32, u32) = (0, 2, 0);
pub const PMC: (u32, u32, u32) = (0, 31, 2);
pub const SPI: (u32, u32, u32) = (0, 31, 5);

pub fn definitions() -> Vec<RegisterDefinition> {
    vec![
        RegisterDefinition::pci("MCHBAR", HOST_BRIDGE, 0x48, AccessWidth::Dword, "MCH Base Address")
            .field("EN", 0, 1, "Enable")
            .field("BA", 15, 17, "Base Address [31:15]"),
        RegisterDefinition::pci(
            "MCHBAR_HI",
            HOST_BRIDGE,
            0x4C,
            AccessWidth::Dword,
            "MCH Base Address, upper dword",
        )
        .field("BA", 0, 7, "Base Address [38:32]"),
        RegisterDefinition::mmio(
            "REMAPBASE",
            BaseAddress::register("MCHBAR").field("BA").upper("MCHBAR_HI"),
            0x5090,
            AccessWidth::Qword,
            "Memory Remap Base",
        )
        .field("LOCK", 0, 1, "Lock")
        .field("REMAPBASE", 20, 19, "Remap Base Address"),
        RegisterDefinition::pci("ETR3", PMC, 0xAC, AccessWidth::Dword, "Extended Test Mode Register 3")
            .field("CF9GR", 20, 1, "CF9h Global Reset")
            .field("CF9LOCK", 31, 1, "CF9h Lockdown"),
        RegisterDefinition::pci(
            "GEN_PMCON_1",
            PMC,
            0xA0,
            AccessWidth::Dword,
            "General PM Configuration A",
        )
        .field("SMI_LOCK", 4, 1, "SMI Lock"),
        RegisterDefinition::pci("BC", SPI, 0xDC, AccessWidth::Dword, "BIOS Control")
            .field("BIOSWE", 0, 1, "BIOS Write Enable")
            .field("BLE", 1, 1, "BIOS Lock Enable")
            .field("SRC", 2, 2, "SPI Read Configuration")
            .field("TSS", 4, 1, "Top Swap Status")
            .field("SMM_BWP", 5, 1, "SMM BIOS Write Protection")
            .field("BILD", 7, 1, "BIOS Interface Lock-Down"),
        RegisterDefinition::pci("SPIBAR", SPI, 0x10, AccessWidth::Dword, "SPI BAR0")
            .field("MEMSPACE", 0, 1, "Memory Space Indicator")
            .field("BA", 12, 20, "Base Address"),
        RegisterDefinition::mmio(
            "HSFS",
            BaseAddress::register("SPIBAR").field("BA"),
            0x04,
            AccessWidth::Dword,
            "Hardware Sequencing Flash Status and Control",
        )
        .field("FDONE", 0, 1, "Flash Cycle Done")
        .field("FCERR", 1, 1, "Flash Cycle Error")
        .field("AEL", 2, 1, "Access Error Log")
        .field("SCIP", 5, 1, "SPI Cycle In Progress")
        .field("WRSDIS", 11, 1, "Write Status Disable")
        .field("PRR34_LOCKDN", 12, 1, "PRR3 PRR4 Lock-Down")
        .field("FDOPSS", 13, 1, "Flash Descriptor Override Pin-Strap Status")
        .field("FDV", 14, 1, "Flash Descriptor Valid")
        .field("FLOCKDN", 15, 1, "Flash Configuration Lock-Down"),
        RegisterDefinition::pci(
            "GTTMMADR",
            IGD,
            0x10,
            AccessWidth::Qword,
            "Graphics Translation Table Memory Mapped Range Address",
        )
        .field("MEMTYP", 1, 2, "Memory Type")
        .field("BA", 24, 15, "Base Address [38:24]"),
        RegisterDefinition::mmio(
            "GT_FORCE_WAKE",
            BaseAddress::register("GTTMMADR").field("BA"),
            0xA188,
            AccessWidth::Dword,
            "GT Force Wake request",
        )
        .field("WAKE_REQUEST", 0, 16, "Force wake request bits")
        .field("WAKE_MASK", 16, 16, "Write mask for request bits"),
        RegisterDefinition::mmio(
            "GTSP1",
            BaseAddress::register("GTTMMADR").field("BA"),
            0x0D_0084,
            AccessWidth::Dword,
            "GT force wake acknowledge",
        )
        .field("WAKE_REQUEST", 0, 16, "Force wake acknowledge bits"),
        RegisterDefinition::msr("MSR_BIOS_DONE", super::common::msr::MSR_BIOS_DONE, "BIOS Done")
            .field("IA_UNTRUSTED", 0, 1, "IA Untrusted Mode")
            .field("SOC_BIOS_DONE", 1, 1, "SoC BIOS Done"),
    ]
}
