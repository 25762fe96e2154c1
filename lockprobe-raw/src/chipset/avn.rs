//! Avoton (Intel Atom C2000) register definitions
//!
//! On Avoton the LPC bridge keeps BIOS Control at 0xFC, and both the RCBA
//! and SPI base registers live in LPC config space.
//!
//! ## References
//!
//! - Intel® Atom™ Processor C2000 Product Family for Microserver Datasheet

use super::common::LPC;
use super::ChipsetProfile;
use crate::definition::{BaseAddress, RegisterDefinition};
use crate::register::AccessWidth;

pub static PROFILE: ChipsetProfile = ChipsetProfile {
    code: "avn",
    name: "Avoton",
    host_bridge_ids: &[
        0x1F00, 0x1F01, 0x1F02, 0x1F03, 0x1F04, 0x1F05, 0x1F06, 0x1F07, 0x1F08, 0x1F09, 0x1F0A,
        0x1F0B, 0x1F0C, 0x1F0D, 0x1F0E, 0x1F0F,
    ],
    definitions,
};

/// LPC config space offsets
pub mod pci {
    pub const LPC_BC: u32 = 0xFC;
    pub const LPC_SPI_BASE: u32 = 0x54;
    pub const LPC_RCBA: u32 = 0xF0;
}

pub fn definitions() -> Vec<RegisterDefinition> {
    vec![
        RegisterDefinition::pci("BC", LPC, pci::LPC_BC, AccessWidth::Byte, "BIOS Control")
            .field("BIOSWE", 0, 1, "BIOS Write Enable")
            .field("BLE", 1, 1, "BIOS Lock Enable")
            .field("SMM_BWP", 5, 1, "SMM BIOS Write Protection"),
        RegisterDefinition::pci(
            "RCBA",
            LPC,
            pci::LPC_RCBA,
            AccessWidth::Dword,
            "Root Complex Base Address",
        )
        .field("EN", 0, 1, "Enable")
        .field("BA", 10, 22, "Base Address"),
        RegisterDefinition::mmio(
            "RCBA_GCS",
            BaseAddress::register("RCBA").field("BA"),
            0x0,
            AccessWidth::Dword,
            "General Control and Status",
        )
        .field("BILD", 0, 1, "BIOS Interface Lock-Down"),
        RegisterDefinition::pci(
            "SBASE",
            LPC,
            pci::LPC_SPI_BASE,
            AccessWidth::Dword,
            "SPI Base Address",
        )
        .field("EN", 1, 1, "Enable")
        .field("BA", 9, 23, "Base Address"),
        RegisterDefinition::mmio(
            "HSFS",
            BaseAddress::register("SBASE").field("BA"),
            0x04,
            AccessWidth::Word,
            "Hardware Sequencing Flash Status",
        )
        .field("FDONE", 0, 1, "Flash Cycle Done")
        .field("FCERR", 1, 1, "Flash Cycle Error")
        .field("AEL", 2, 1, "Access Error Log")
        .field("SCIP", 5, 1, "SPI Cycle In Progress")
        .field("FDV", 14, 1, "Flash Descriptor Valid")
        .field("FLOCKDN", 15, 1, "Flash Configuration Lock-Down"),
    ]
}
