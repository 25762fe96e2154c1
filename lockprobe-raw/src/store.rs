//! Register Definition Store
//!
//! The store is the per-chipset lookup table from symbolic register names to
//! [`RegisterDefinition`]s. It is assembled from one or more layers (common
//! definitions first, chipset-specific overrides after), validated once, and
//! never mutated afterwards.

use std::collections::{HashMap, HashSet};

use crate::definition::{RegisterClass, RegisterDefinition};
use crate::register::FieldDefinition;

/// Errors detected while building a definition store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("Register {name} defined twice in the same layer of profile {chipset}")]
    DuplicateRegister { chipset: String, name: String },

    #[error(
        "Field {register}.{field} (bit {bit}, size {size}) does not fit a {width_bits}-bit register"
    )]
    FieldOutOfRange {
        register: String,
        field: String,
        bit: u32,
        size: u32,
        width_bits: u32,
    },

    #[error("Fields {register}.{first} and {register}.{second} overlap")]
    OverlappingFields {
        register: String,
        first: String,
        second: String,
    },

    #[error("Register {register} uses undefined base register {base}")]
    UnknownBaseRegister { register: String, base: String },

    #[error("Register {register} uses undefined base field {base}.{field}")]
    UnknownBaseField {
        register: String,
        base: String,
        field: String,
    },

    #[error("Cyclic base register chain: {}", chain.join(" -> "))]
    CyclicBaseRegister { chain: Vec<String> },
}

pub type Result<T> = std::result::Result<T, DefinitionError>;

/// Immutable, validated register table of one chipset profile
#[derive(Debug, Clone)]
pub struct DefinitionStore {
    chipset: String,
    registers: HashMap<String, RegisterDefinition>,
}

/// Layered builder for [`DefinitionStore`]
#[derive(Debug)]
pub struct StoreBuilder {
    chipset: String,
    layers: Vec<Vec<RegisterDefinition>>,
}

impl StoreBuilder {
    /// Add a layer; its registers replace same-named registers of earlier layers
    pub fn layer(mut self, definitions: impl IntoIterator<Item = RegisterDefinition>) -> Self {
        self.layers.push(definitions.into_iter().collect());
        self
    }

    pub fn build(self) -> Result<DefinitionStore> {
        let mut registers: HashMap<String, RegisterDefinition> = HashMap::new();

        for layer in self.layers {
            let mut seen = HashSet::new();
            for def in layer {
                if !seen.insert(def.name.clone()) {
                    return Err(DefinitionError::DuplicateRegister {
                        chipset: self.chipset,
                        name: def.name,
                    });
                }
                registers.insert(def.name.clone(), def);
            }
        }

        for def in registers.values() {
            validate_fields(def)?;
            validate_base(def, &registers)?;
        }
        check_base_cycles(&registers)?;

        Ok(DefinitionStore {
            chipset: self.chipset,
            registers,
        })
    }
}

impl DefinitionStore {
    pub fn builder(chipset: impl Into<String>) -> StoreBuilder {
        StoreBuilder {
            chipset: chipset.into(),
            layers: Vec::new(),
        }
    }

    /// Single-layer store
    pub fn new(
        chipset: impl Into<String>,
        definitions: impl IntoIterator<Item = RegisterDefinition>,
    ) -> Result<Self> {
        Self::builder(chipset).layer(definitions).build()
    }

    pub fn chipset(&self) -> &str {
        &self.chipset
    }

    pub fn get(&self, name: &str) -> Option<&RegisterDefinition> {
        self.registers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registers.contains_key(name)
    }

    pub fn has_field(&self, name: &str, field: &str) -> bool {
        self.field(name, field).is_some()
    }

    pub fn field(&self, name: &str, field: &str) -> Option<&FieldDefinition> {
        self.registers.get(name).and_then(|def| def.get_field(field))
    }

    /// Register names in lexical order
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.registers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterDefinition> {
        self.registers.values()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

fn validate_fields(def: &RegisterDefinition) -> Result<()> {
    let width_bits = def.width.bits();

    for (name, field) in &def.fields {
        if field.size == 0 || field.end() > width_bits {
            return Err(DefinitionError::FieldOutOfRange {
                register: def.name.clone(),
                field: name.clone(),
                bit: field.bit,
                size: field.size,
                width_bits,
            });
        }
    }

    let ordered = def.fields_by_bit();
    for pair in ordered.windows(2) {
        let (first, a) = pair[0];
        let (second, b) = pair[1];
        if a.overlaps(b) {
            return Err(DefinitionError::OverlappingFields {
                register: def.name.clone(),
                first: first.to_string(),
                second: second.to_string(),
            });
        }
    }

    Ok(())
}

fn validate_base(
    def: &RegisterDefinition,
    registers: &HashMap<String, RegisterDefinition>,
) -> Result<()> {
    let RegisterClass::Mmio { base, .. } = &def.class else {
        return Ok(());
    };

    let Some(base_def) = registers.get(&base.register) else {
        return Err(DefinitionError::UnknownBaseRegister {
            register: def.name.clone(),
            base: base.register.clone(),
        });
    };

    if let Some(field) = &base.field {
        if base_def.get_field(field).is_none() {
            return Err(DefinitionError::UnknownBaseField {
                register: def.name.clone(),
                base: base.register.clone(),
                field: field.clone(),
            });
        }
    }

    if let Some(upper) = &base.upper {
        if !registers.contains_key(upper) {
            return Err(DefinitionError::UnknownBaseRegister {
                register: def.name.clone(),
                base: upper.clone(),
            });
        }
    }

    Ok(())
}

fn check_base_cycles(registers: &HashMap<String, RegisterDefinition>) -> Result<()> {
    let mut done = HashSet::new();
    let mut names: Vec<&str> = registers.keys().map(String::as_str).collect();
    names.sort_unstable();

    for name in names {
        let mut path = Vec::new();
        visit_base_chain(name, registers, &mut path, &mut done)?;
    }
    Ok(())
}

fn visit_base_chain<'a>(
    name: &'a str,
    registers: &'a HashMap<String, RegisterDefinition>,
    path: &mut Vec<&'a str>,
    done: &mut HashSet<&'a str>,
) -> Result<()> {
    if done.contains(name) {
        return Ok(());
    }

    if let Some(start) = path.iter().position(|visited| *visited == name) {
        let mut chain: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
        chain.push(name.to_string());
        return Err(DefinitionError::CyclicBaseRegister { chain });
    }

    path.push(name);
    if let Some(def) = registers.get(name) {
        for dep in def.base_dependencies() {
            visit_base_chain(dep, registers, path, done)?;
        }
    }
    path.pop();
    done.insert(name);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::BaseAddress;
    use crate::register::AccessWidth;

    fn etr3() -> RegisterDefinition {
        RegisterDefinition::pci("ETR3", (0, 31, 2), 0xAC, AccessWidth::Dword, "ETR3")
            .field("CF9LOCK", 2, 1, "CF9h Lockdown")
    }

    #[test]
    fn test_lookup() {
        let store = DefinitionStore::new("test", vec![etr3()]).unwrap();
        assert!(store.contains("ETR3"));
        assert!(!store.contains("ETR4"));
        assert!(store.has_field("ETR3", "CF9LOCK"));
        assert!(!store.has_field("ETR3", "CF9GR"));
        assert!(!store.has_field("ETR4", "CF9LOCK"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.chipset(), "test");
    }

    #[test]
    fn test_field_must_fit_width() {
        let reg = RegisterDefinition::pci("BC", (0, 31, 0), 0xDC, AccessWidth::Byte, "")
            .field("WIDE", 6, 4, "");
        let err = DefinitionStore::new("test", vec![reg]).unwrap_err();
        assert!(matches!(err, DefinitionError::FieldOutOfRange { width_bits: 8, .. }));
    }

    #[test]
    fn test_zero_sized_field_rejected() {
        let reg = RegisterDefinition::io("APMC", 0xB2, AccessWidth::Byte, "").field("NONE", 0, 0, "");
        assert!(DefinitionStore::new("test", vec![reg]).is_err());
    }

    #[test]
    fn test_overlapping_fields_rejected() {
        let reg = RegisterDefinition::msr("MSR_X", 0x10, "")
            .field("A", 0, 8, "")
            .field("B", 4, 8, "");
        let err = DefinitionStore::new("test", vec![reg]).unwrap_err();
        assert_eq!(
            err,
            DefinitionError::OverlappingFields {
                register: "MSR_X".to_string(),
                first: "A".to_string(),
                second: "B".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_base_rejected() {
        let reg = RegisterDefinition::mmio(
            "HSFS",
            BaseAddress::register("SPIBAR"),
            0x4,
            AccessWidth::Word,
            "",
        );
        let err = DefinitionStore::new("test", vec![reg]).unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownBaseRegister { .. }));
    }

    #[test]
    fn test_unknown_base_field_rejected() {
        let bar = RegisterDefinition::pci("SPIBAR", (0, 31, 5), 0x10, AccessWidth::Dword, "");
        let reg = RegisterDefinition::mmio(
            "HSFS",
            BaseAddress::register("SPIBAR").field("BA"),
            0x4,
            AccessWidth::Word,
            "",
        );
        let err = DefinitionStore::new("test", vec![bar, reg]).unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownBaseField { .. }));
    }

    #[test]
    fn test_self_referencing_base_is_cycle() {
        let reg = RegisterDefinition::mmio(
            "LOOP",
            BaseAddress::register("LOOP"),
            0x0,
            AccessWidth::Dword,
            "",
        );
        let err = DefinitionStore::new("test", vec![reg]).unwrap_err();
        assert_eq!(
            err,
            DefinitionError::CyclicBaseRegister {
                chain: vec!["LOOP".to_string(), "LOOP".to_string()],
            }
        );
    }

    #[test]
    fn test_indirect_cycle_detected() {
        let a = RegisterDefinition::mmio("A", BaseAddress::register("B"), 0, AccessWidth::Dword, "");
        let b = RegisterDefinition::mmio("B", BaseAddress::register("A"), 0, AccessWidth::Dword, "");
        let err = DefinitionStore::new("test", vec![a, b]).unwrap_err();
        assert!(err.to_string().contains("A -> B -> A"));
    }

    #[test]
    fn test_shared_base_is_not_a_cycle() {
        let bar = RegisterDefinition::pci("BAR", (0, 0, 0), 0x48, AccessWidth::Dword, "");
        let hi = RegisterDefinition::pci("BAR_HI", (0, 0, 0), 0x4C, AccessWidth::Dword, "");
        let a = RegisterDefinition::mmio(
            "A",
            BaseAddress::register("BAR").upper("BAR_HI"),
            0,
            AccessWidth::Dword,
            "",
        );
        let b = RegisterDefinition::mmio("B", BaseAddress::register("BAR"), 4, AccessWidth::Dword, "");
        assert!(DefinitionStore::new("test", vec![bar, hi, a, b]).is_ok());
    }

    #[test]
    fn test_later_layer_overrides() {
        let common = RegisterDefinition::pci("BC", (0, 31, 0), 0xDC, AccessWidth::Byte, "");
        let avn = RegisterDefinition::pci("BC", (0, 31, 0), 0xFC, AccessWidth::Byte, "");
        let store = DefinitionStore::builder("avn")
            .layer(vec![common, etr3()])
            .layer(vec![avn])
            .build()
            .unwrap();

        assert_eq!(store.len(), 2);
        let bc = store.get("BC").unwrap();
        assert!(matches!(bc.class, RegisterClass::Pci { offset: 0xFC, .. }));
    }

    #[test]
    fn test_duplicate_in_layer_rejected() {
        let err = DefinitionStore::new("test", vec![etr3(), etr3()]).unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateRegister { .. }));
    }
}
