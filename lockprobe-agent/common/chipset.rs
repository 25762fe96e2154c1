// Platform identification and chipset profile selection

use lockprobe_raw::chipset::{self, ChipsetProfile};
use lockprobe_raw::{DefinitionStore, RegisterDefinition};

use crate::backend::HardwareBackend;
use crate::common::cpuid::{vendor_string, CpuSignature};
use crate::error::{LockprobeError, Result};

/// Selected chipset profile plus what was observed on the platform
#[derive(Debug, Clone)]
pub struct Chipset {
    profile: &'static ChipsetProfile,
    pub vendor_id: u16,
    pub device_id: u16,
    pub cpu: Option<CpuSignature>,
}

impl Chipset {
    pub fn code(&self) -> &'static str {
        self.profile.code
    }

    pub fn name(&self) -> &'static str {
        self.profile.name
    }

    /// Validated register definitions for this chipset
    pub fn store(&self) -> Result<DefinitionStore> {
        self.store_with(Vec::new())
    }

    /// Chipset definitions with site `overlay` definitions layered on top
    pub fn store_with(&self, overlay: Vec<RegisterDefinition>) -> Result<DefinitionStore> {
        let extra = overlay.len();
        let store = self.profile.store_with(overlay)?;
        tracing::info!(
            "Loaded {} register definitions for {} ({} from overlay)",
            store.len(),
            self.profile.name,
            extra
        );
        Ok(store)
    }
}

fn host_bridge_ids(backend: &dyn HardwareBackend) -> Result<(u16, u16)> {
    let vid_did = backend.read_pci_reg(0, 0, 0, 0x00, 4)?;
    Ok((vid_did as u16, (vid_did >> 16) as u16))
}

fn cpu_signature(backend: &dyn HardwareBackend) -> Option<CpuSignature> {
    let (_max_leaf, ebx, ecx, edx) = backend.cpuid(0, 0).ok()?;
    let vendor = vendor_string(ebx, ecx, edx);
    let (eax, ..) = backend.cpuid(1, 0).ok()?;
    let sig = CpuSignature::from_leaf1(eax);
    tracing::info!(
        "CPU: {} Family {:X}, Model {:X}, Stepping {:X}",
        vendor.trim_matches(char::from(0)),
        sig.family,
        sig.model,
        sig.stepping
    );
    Some(sig)
}

/// Identify the platform from the host bridge at 00:00.0
pub fn detect(backend: &dyn HardwareBackend) -> Result<Chipset> {
    let (vendor_id, device_id) = host_bridge_ids(backend)?;
    tracing::info!("Host bridge: VID {:04X} DID {:04X}", vendor_id, device_id);

    let profile = chipset::find_by_device_id(vendor_id, device_id).ok_or_else(|| {
        LockprobeError::UnknownChipset(format!("VID {vendor_id:04X} DID {device_id:04X}"))
    })?;
    tracing::info!("Detected chipset: {} ({})", profile.name, profile.code);

    Ok(Chipset {
        profile,
        vendor_id,
        device_id,
        cpu: cpu_signature(backend),
    })
}

/// Use the profile named `code` regardless of what the host bridge reports
pub fn force(backend: &dyn HardwareBackend, code: &str) -> Result<Chipset> {
    let profile = chipset::find_by_code(code)
        .ok_or_else(|| LockprobeError::UnknownChipset(code.to_string()))?;
    let (vendor_id, device_id) = host_bridge_ids(backend)?;
    if !profile.matches_device(device_id) {
        tracing::warn!(
            "Forcing chipset {} on host bridge DID {:04X}",
            profile.code,
            device_id
        );
    }
    Ok(Chipset {
        profile,
        vendor_id,
        device_id,
        cpu: cpu_signature(backend),
    })
}
