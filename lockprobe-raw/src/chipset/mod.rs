//! Built-in chipset profiles
//!
//! Every profile is the [`common`] register set overlaid with the
//! chipset-specific definitions. Profiles are selected at runtime from the
//! host bridge device ID and compiled in per cargo feature.
//!
//! ## Supported Chipsets
//!
//! - **Avoton** (`avn` feature) - Intel Atom C2000 SoC
//! - **Coffee Lake** (`cfl` feature) - 8th/9th gen Core with 300-series PCH

pub mod common;

#[cfg(feature = "avn")]
pub mod avn;

#[cfg(feature = "cfl")]
pub mod cfl;

use crate::definition::RegisterDefinition;
use crate::store::{DefinitionStore, Result};

pub const INTEL_VENDOR_ID: u16 = 0x8086;

/// A chipset generation and the register set that applies to it
#[derive(Debug)]
pub struct ChipsetProfile {
    /// Short code used on the command line
    pub code: &'static str,
    pub name: &'static str,
    /// Device IDs of the host bridge at 0:0.0
    pub host_bridge_ids: &'static [u16],
    pub definitions: fn() -> Vec<RegisterDefinition>,
}

impl ChipsetProfile {
    /// Build the validated store: common layer, then this profile's layer
    pub fn store(&self) -> Result<DefinitionStore> {
        self.store_with(Vec::new())
    }

    /// Like [`store`](Self::store) with `overlay` applied last, so site
    /// definitions can add registers or replace built-in ones by name
    pub fn store_with(&self, overlay: Vec<RegisterDefinition>) -> Result<DefinitionStore> {
        DefinitionStore::builder(self.code)
            .layer(common::definitions())
            .layer((self.definitions)())
            .layer(overlay)
            .build()
    }

    pub fn matches_device(&self, device_id: u16) -> bool {
        self.host_bridge_ids.contains(&device_id)
    }
}

/// All profiles compiled into this build
#[allow(unused_mut)]
pub fn profiles() -> Vec<&'static ChipsetProfile> {
    let mut profiles: Vec<&'static ChipsetProfile> = Vec::new();
    #[cfg(feature = "avn")]
    profiles.push(&avn::PROFILE);
    #[cfg(feature = "cfl")]
    profiles.push(&cfl::PROFILE);
    profiles
}

pub fn find_by_code(code: &str) -> Option<&'static ChipsetProfile> {
    profiles()
        .into_iter()
        .find(|profile| profile.code.eq_ignore_ascii_case(code))
}

pub fn find_by_device_id(vendor_id: u16, device_id: u16) -> Option<&'static ChipsetProfile> {
    if vendor_id != INTEL_VENDOR_ID {
        return None;
    }
    profiles()
        .into_iter()
        .find(|profile| profile.matches_device(device_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_profile_builds() {
        for profile in profiles() {
            let store = profile.store();
            assert!(store.is_ok(), "{}: {:?}", profile.code, store.err());
        }
    }

    #[test]
    fn test_common_layer_builds_alone() {
        assert!(DefinitionStore::new("common", common::definitions()).is_ok());
    }

    #[test]
    fn test_non_intel_vendor_never_matches() {
        for profile in profiles() {
            for &did in profile.host_bridge_ids {
                assert!(find_by_device_id(0x1022, did).is_none());
            }
        }
    }

    #[cfg(feature = "avn")]
    #[test]
    fn test_lookup_avoton() {
        let profile = find_by_device_id(INTEL_VENDOR_ID, 0x1F0C).unwrap();
        assert_eq!(profile.code, "avn");
        assert!(find_by_code("AVN").is_some());
    }

    #[cfg(feature = "cfl")]
    #[test]
    fn test_overlay_replaces_and_extends() {
        use crate::register::AccessWidth;

        let overlay = vec![
            RegisterDefinition::pci("ETR3", cfl::PMC, 0xAC, AccessWidth::Dword, "site ETR3")
                .field("CF9LOCK", 2, 1, "CF9h Lockdown"),
            RegisterDefinition::io("POST_CODE", 0x80, AccessWidth::Byte, "POST code"),
        ];
        let store = cfl::PROFILE.store_with(overlay).unwrap();
        assert_eq!(store.field("ETR3", "CF9LOCK").map(|f| f.bit), Some(2));
        assert!(!store.has_field("ETR3", "CF9GR"));
        assert!(store.contains("POST_CODE"));
        assert!(store.contains("IA32_FEATURE_CONTROL"));
    }

    #[cfg(feature = "cfl")]
    #[test]
    fn test_invalid_overlay_rejected() {
        use crate::register::AccessWidth;
        use crate::store::DefinitionError;

        let overlay = vec![
            RegisterDefinition::io("POST_CODE", 0x80, AccessWidth::Byte, "")
                .field("CODE", 4, 8, ""),
        ];
        assert!(matches!(
            cfl::PROFILE.store_with(overlay),
            Err(DefinitionError::FieldOutOfRange { .. })
        ));
    }
}
