//! Declarative register definitions
//!
//! A [`RegisterDefinition`] names a register, says how to reach it
//! ([`RegisterClass`]), how wide it is, and which bit fields it carries.
//! Definitions are pure data; resolution to bus transactions happens in the
//! access engine of `lockprobe-agent`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::register::{AccessWidth, FieldDefinition};

/// Physical base of an MMIO register block, read from another register
///
/// The base is the value of `register`, or of `field` inside it kept at its
/// original bit position. When `upper` is set, that register supplies bits
/// 63:32 of the address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseAddress {
    pub register: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub upper: Option<String>,
}

impl BaseAddress {
    pub fn register(name: impl Into<String>) -> Self {
        Self {
            register: name.into(),
            field: None,
            upper: None,
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn upper(mut self, register: impl Into<String>) -> Self {
        self.upper = Some(register.into());
        self
    }
}

/// How a register is reached on the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegisterClass {
    /// PCI configuration space register
    Pci {
        bus: u32,
        device: u32,
        function: u32,
        offset: u32,
    },
    /// Register at an offset from a base held in another register
    Mmio { base: BaseAddress, offset: u64 },
    /// Register at a fixed physical address
    MemoryMapped { address: u64 },
    /// Model-specific register, read per logical thread
    Msr { address: u32 },
    /// I/O port
    Io { port: u16 },
    /// Uncore CSR behind the PCI pseudo-device on bus 0xFF
    Csr { address: u32 },
}

impl RegisterClass {
    pub fn kind(&self) -> &'static str {
        match self {
            RegisterClass::Pci { .. } => "pci",
            RegisterClass::Mmio { .. } => "mmio",
            RegisterClass::MemoryMapped { .. } => "memory",
            RegisterClass::Msr { .. } => "msr",
            RegisterClass::Io { .. } => "io",
            RegisterClass::Csr { .. } => "csr",
        }
    }
}

impl fmt::Display for RegisterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterClass::Pci {
                bus,
                device,
                function,
                offset,
            } => write!(f, "b:d.f {bus:02X}:{device:02X}.{function:X} + 0x{offset:X}"),
            RegisterClass::Mmio { base, offset } => match &base.field {
                Some(field) => write!(f, "{}.{} + 0x{offset:X}", base.register, field),
                None => write!(f, "{} + 0x{offset:X}", base.register),
            },
            RegisterClass::MemoryMapped { address } => write!(f, "mem 0x{address:X}"),
            RegisterClass::Msr { address } => write!(f, "MSR 0x{address:X}"),
            RegisterClass::Io { port } => write!(f, "I/O port 0x{port:X}"),
            RegisterClass::Csr { address } => write!(f, "CSR 0x{address:X}"),
        }
    }
}

/// A named register of one chipset profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDefinition {
    pub name: String,
    pub class: RegisterClass,
    pub width: AccessWidth,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldDefinition>,
}

impl RegisterDefinition {
    pub fn new(
        name: impl Into<String>,
        class: RegisterClass,
        width: AccessWidth,
        desc: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            class,
            width,
            desc: desc.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn pci(
        name: impl Into<String>,
        (bus, device, function): (u32, u32, u32),
        offset: u32,
        width: AccessWidth,
        desc: impl Into<String>,
    ) -> Self {
        let class = RegisterClass::Pci {
            bus,
            device,
            function,
            offset,
        };
        Self::new(name, class, width, desc)
    }

    pub fn mmio(
        name: impl Into<String>,
        base: BaseAddress,
        offset: u64,
        width: AccessWidth,
        desc: impl Into<String>,
    ) -> Self {
        Self::new(name, RegisterClass::Mmio { base, offset }, width, desc)
    }

    pub fn memory(
        name: impl Into<String>,
        address: u64,
        width: AccessWidth,
        desc: impl Into<String>,
    ) -> Self {
        Self::new(name, RegisterClass::MemoryMapped { address }, width, desc)
    }

    pub fn msr(name: impl Into<String>, address: u32, desc: impl Into<String>) -> Self {
        Self::new(name, RegisterClass::Msr { address }, AccessWidth::Qword, desc)
    }

    pub fn io(
        name: impl Into<String>,
        port: u16,
        width: AccessWidth,
        desc: impl Into<String>,
    ) -> Self {
        Self::new(name, RegisterClass::Io { port }, width, desc)
    }

    pub fn csr(name: impl Into<String>, address: u32, desc: impl Into<String>) -> Self {
        Self::new(name, RegisterClass::Csr { address }, AccessWidth::Dword, desc)
    }

    /// Add a bit field; validation happens when the profile is built
    pub fn field(mut self, name: impl Into<String>, bit: u32, size: u32, desc: &str) -> Self {
        self.fields
            .insert(name.into(), FieldDefinition::new(bit, size, desc));
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.get(name)
    }

    /// Fields ordered by their lowest bit
    pub fn fields_by_bit(&self) -> Vec<(&str, &FieldDefinition)> {
        let mut fields: Vec<_> = self
            .fields
            .iter()
            .map(|(name, field)| (name.as_str(), field))
            .collect();
        fields.sort_by_key(|(_, field)| field.bit);
        fields
    }

    /// Registers that must be read to locate this one
    pub fn base_dependencies(&self) -> Vec<&str> {
        match &self.class {
            RegisterClass::Mmio { base, .. } => {
                let mut deps = vec![base.register.as_str()];
                if let Some(upper) = &base.upper {
                    deps.push(upper.as_str());
                }
                deps
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_fields() {
        let reg = RegisterDefinition::pci("BC", (0, 31, 0), 0xDC, AccessWidth::Byte, "BIOS Control")
            .field("SMM_BWP", 5, 1, "SMM BIOS Write Protection")
            .field("BIOSWE", 0, 1, "BIOS Write Enable")
            .field("BLE", 1, 1, "BIOS Lock Enable");

        let order: Vec<&str> = reg.fields_by_bit().iter().map(|(n, _)| *n).collect();
        assert_eq!(order, vec!["BIOSWE", "BLE", "SMM_BWP"]);
        assert_eq!(reg.get_field("BLE").map(|f| f.bit), Some(1));
        assert!(reg.get_field("TSS").is_none());
    }

    #[test]
    fn test_mmio_dependencies() {
        let base = BaseAddress::register("MCHBAR").field("BA").upper("MCHBAR_HI");
        let reg = RegisterDefinition::mmio("REMAPBASE", base, 0x5090, AccessWidth::Qword, "");
        assert_eq!(reg.base_dependencies(), vec!["MCHBAR", "MCHBAR_HI"]);

        let msr = RegisterDefinition::msr("IA32_FEATURE_CONTROL", 0x3A, "");
        assert!(msr.base_dependencies().is_empty());
    }

    #[test]
    fn test_class_display() {
        let class = RegisterClass::Pci {
            bus: 0,
            device: 31,
            function: 0,
            offset: 0xDC,
        };
        assert_eq!(class.to_string(), "b:d.f 00:1F.0 + 0xDC");
        assert_eq!(RegisterClass::Msr { address: 0x3A }.to_string(), "MSR 0x3A");
    }

    #[test]
    fn test_class_is_tagged_by_type() {
        let json = serde_json::to_value(RegisterClass::Io { port: 0xB2 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "io", "port": 0xB2}));

        let class: RegisterClass =
            serde_json::from_str(r#"{"type": "memory_mapped", "address": 4275044352}"#).unwrap();
        assert_eq!(class, RegisterClass::MemoryMapped { address: 0xFED0_0000 });
        assert!(serde_json::from_str::<RegisterClass>(r#"{"type": "smbus", "port": 1}"#).is_err());
    }

    #[test]
    fn test_definition_from_json() {
        let reg: RegisterDefinition = serde_json::from_str(
            r#"{
                "name": "HSFS",
                "class": {
                    "type": "mmio",
                    "base": {"register": "SPIBAR", "field": "BA"},
                    "offset": 4
                },
                "width": 4,
                "fields": {"FLOCKDN": {"bit": 15, "size": 1, "desc": "Flash Configuration Lock-Down"}}
            }"#,
        )
        .unwrap();
        assert_eq!(reg.base_dependencies(), vec!["SPIBAR"]);
        assert_eq!(reg.width, AccessWidth::Dword);
        assert_eq!(reg.get_field("FLOCKDN").map(|f| f.bit), Some(15));
        assert!(reg.desc.is_empty());

        let bad_width = r#"{"name": "X", "class": {"type": "msr", "address": 58}, "width": 3}"#;
        assert!(serde_json::from_str::<RegisterDefinition>(bad_width).is_err());
    }
}
