//! Register access engine
//!
//! Resolves symbolic register names from a [`DefinitionStore`] to backend
//! transactions. The engine owns no hardware state: it is a store, a backend
//! handle and the logical thread used for MSR access.
//!
//! ```ignore
//! let engine = RegisterEngine::new(Arc::new(store), backend);
//! if engine.is_register_defined("ETR3") {
//!     let etr3 = engine.read_register("ETR3")?;
//!     let locked = engine.get_register_field("ETR3", etr3, "CF9LOCK", false)? == 1;
//! }
//! ```

use std::fmt::Write as _;
use std::sync::Arc;

use lockprobe_raw::{
    join_address, AccessWidth, BaseAddress, DefinitionStore, FieldDefinition, RegisterClass,
    RegisterDefinition,
};

use crate::backend::HardwareBackend;
use crate::common::poll::{poll_until, PollOutcome, PollPolicy};
use crate::error::{LockprobeError, Result};

/// Bus of the uncore CSR pseudo-device
pub const CSR_BUS: u32 = 0xFF;

/// PCI location `(bus, device, function, offset)` of an uncore CSR
pub fn csr_location(address: u32) -> (u32, u32, u32, u32) {
    (CSR_BUS, 0, (address & 0xFF00) >> 12, address & 0xFF)
}

pub struct RegisterEngine {
    store: Arc<DefinitionStore>,
    backend: Arc<dyn HardwareBackend>,
    thread: u32,
}

impl RegisterEngine {
    pub fn new(store: Arc<DefinitionStore>, backend: Arc<dyn HardwareBackend>) -> Self {
        Self {
            store,
            backend,
            thread: 0,
        }
    }

    /// Logical thread used for MSR registers
    pub fn with_thread(mut self, thread: u32) -> Self {
        self.thread = thread;
        self
    }

    pub fn thread(&self) -> u32 {
        self.thread
    }

    pub fn store(&self) -> &DefinitionStore {
        &self.store
    }

    pub fn backend(&self) -> &dyn HardwareBackend {
        self.backend.as_ref()
    }

    pub fn chipset_code(&self) -> &str {
        self.store.chipset()
    }

    fn definition(&self, name: &str) -> Result<&RegisterDefinition> {
        self.store
            .get(name)
            .ok_or_else(|| LockprobeError::UndefinedRegister(name.to_string()))
    }

    fn field_definition(&self, name: &str, field: &str) -> Result<&FieldDefinition> {
        self.definition(name)?
            .get_field(field)
            .ok_or_else(|| LockprobeError::UndefinedField {
                register: name.to_string(),
                field: field.to_string(),
            })
    }

    pub fn is_register_defined(&self, name: &str) -> bool {
        self.store.contains(name)
    }

    pub fn register_has_field(&self, name: &str, field: &str) -> bool {
        self.store.has_field(name, field)
    }

    pub fn read_register(&self, name: &str) -> Result<u64> {
        let def = self.definition(name)?;
        self.read_definition(def, self.thread)
    }

    fn read_definition(&self, def: &RegisterDefinition, thread: u32) -> Result<u64> {
        let size = def.width.bytes() as u32;
        let backend = self.backend();
        let value = match &def.class {
            RegisterClass::Pci {
                bus,
                device,
                function,
                offset,
            } => {
                if def.width == AccessWidth::Qword {
                    let low = backend.read_pci_reg(*bus, *device, *function, *offset, 4)?;
                    let high = backend.read_pci_reg(*bus, *device, *function, offset + 4, 4)?;
                    join_address(high, low)
                } else {
                    backend.read_pci_reg(*bus, *device, *function, *offset, size)? as u64
                }
            }
            RegisterClass::Mmio { base, offset } => {
                let base = self.resolve_base(base)?;
                backend.read_mmio_reg(base.wrapping_add(*offset), size as u64)?
            }
            RegisterClass::MemoryMapped { address } => {
                backend.read_mmio_reg(*address, size as u64)?
            }
            RegisterClass::Msr { address } => {
                let (low, high) = backend.read_msr(thread, *address)?;
                join_address(high, low) & def.width.mask()
            }
            RegisterClass::Io { port } => backend.read_io_port(*port, size)? as u64,
            RegisterClass::Csr { address } => {
                let (bus, device, function, offset) = csr_location(*address);
                backend.read_pci_reg(bus, device, function, offset, 4)? as u64
            }
        };
        tracing::debug!("{} ({}) = 0x{:X}", def.name, def.class, value);
        Ok(value)
    }

    /// Write the raw value of a register
    ///
    /// Returns the previous value for PCI and CSR registers, whose writes go
    /// through a read-modify-write of the config dword, and `None` otherwise.
    pub fn write_register(&self, name: &str, value: u64) -> Result<Option<u64>> {
        let def = self.definition(name)?;
        let size = def.width.bytes() as u32;
        let backend = self.backend();
        tracing::debug!("{} ({}) <- 0x{:X}", def.name, def.class, value);
        match &def.class {
            RegisterClass::Pci {
                bus,
                device,
                function,
                offset,
            } => {
                if def.width == AccessWidth::Qword {
                    let low = backend.write_pci_reg(
                        *bus,
                        *device,
                        *function,
                        *offset,
                        value as u32,
                        4,
                    )?;
                    let high = backend.write_pci_reg(
                        *bus,
                        *device,
                        *function,
                        offset + 4,
                        (value >> 32) as u32,
                        4,
                    )?;
                    Ok(Some(join_address(high, low)))
                } else {
                    let old =
                        backend.write_pci_reg(*bus, *device, *function, *offset, value as u32, size)?;
                    Ok(Some(old as u64))
                }
            }
            RegisterClass::Mmio { base, offset } => {
                let base = self.resolve_base(base)?;
                backend.write_mmio_reg(base.wrapping_add(*offset), size as u64, value)?;
                Ok(None)
            }
            RegisterClass::MemoryMapped { address } => {
                backend.write_mmio_reg(*address, size as u64, value)?;
                Ok(None)
            }
            RegisterClass::Msr { address } => {
                backend.write_msr(self.thread, *address, value as u32, (value >> 32) as u32)?;
                Ok(None)
            }
            RegisterClass::Io { port } => {
                backend.write_io_port(*port, value as u32, size)?;
                Ok(None)
            }
            RegisterClass::Csr { address } => {
                let (bus, device, function, offset) = csr_location(*address);
                let old = backend.write_pci_reg(bus, device, function, offset, value as u32, 4)?;
                Ok(Some(old as u64))
            }
        }
    }

    fn resolve_base(&self, base: &BaseAddress) -> Result<u64> {
        let raw = self.read_register(&base.register)?;
        let low = match &base.field {
            Some(field) => self.get_register_field(&base.register, raw, field, true)?,
            None => raw,
        };
        match &base.upper {
            Some(upper) => {
                let high = self.read_register(upper)?;
                Ok(join_address(high as u32, low as u32))
            }
            None => Ok(low),
        }
    }

    /// Physical base address an MMIO register is located from
    pub fn register_base_address(&self, name: &str) -> Result<u64> {
        match &self.definition(name)?.class {
            RegisterClass::Mmio { base, .. } => self.resolve_base(base),
            _ => Err(LockprobeError::NoBaseAddress(name.to_string())),
        }
    }

    /// Extract `field` from `reg_value`
    ///
    /// With `preserve_original` the field bits stay at their position in the
    /// register, which is how address fields with implied low zero bits are
    /// consumed.
    pub fn get_register_field(
        &self,
        name: &str,
        reg_value: u64,
        field: &str,
        preserve_original: bool,
    ) -> Result<u64> {
        let field = self.field_definition(name, field)?;
        Ok(if preserve_original {
            field.extract_in_place(reg_value)
        } else {
            field.extract(reg_value)
        })
    }

    /// `reg_value` with `field` replaced by `field_value`
    pub fn set_register_field(
        &self,
        name: &str,
        reg_value: u64,
        field: &str,
        field_value: u64,
    ) -> Result<u64> {
        let field = self.field_definition(name, field)?;
        Ok(field.insert(reg_value, field_value))
    }

    pub fn read_register_field(
        &self,
        name: &str,
        field: &str,
        preserve_original: bool,
    ) -> Result<u64> {
        self.field_definition(name, field)?;
        let value = self.read_register(name)?;
        self.get_register_field(name, value, field, preserve_original)
    }

    /// Read-modify-write of one field
    ///
    /// The read and the write are separate bus operations; a concurrent
    /// writer to the same register between them is lost.
    pub fn write_register_field(
        &self,
        name: &str,
        field: &str,
        field_value: u64,
    ) -> Result<Option<u64>> {
        self.field_definition(name, field)?;
        let value = self.read_register(name)?;
        let updated = self.set_register_field(name, value, field, field_value)?;
        self.write_register(name, updated)
    }

    /// Re-read `field` until `ready` accepts it or `policy` runs out
    pub fn poll_register_field<P>(
        &self,
        name: &str,
        field: &str,
        policy: &PollPolicy,
        ready: P,
    ) -> Result<PollOutcome>
    where
        P: Fn(u64) -> bool,
    {
        self.field_definition(name, field)?;
        poll_until(
            policy,
            || self.read_register_field(name, field, false),
            ready,
        )
    }

    /// Value of an MSR register on every logical thread, indexed by thread
    ///
    /// Registers of other classes are thread independent and yield a single
    /// value. The slot of a disabled thread holds the value read on the
    /// thread substituted for it.
    pub fn read_register_all_threads(&self, name: &str) -> Result<Vec<u64>> {
        let def = self.definition(name)?;
        match def.class {
            RegisterClass::Msr { .. } => (0..self.backend.thread_count())
                .map(|thread| self.read_definition(def, thread))
                .collect(),
            _ => Ok(vec![self.read_definition(def, self.thread)?]),
        }
    }

    /// Human readable decode of `value` with one line per field
    ///
    /// Diagnostic only; the rendering is also logged at info level.
    pub fn print_register(&self, name: &str, value: u64) -> Result<String> {
        let def = self.definition(name)?;
        let digits = def.width.bytes() * 2;
        let mut out = format!(
            "[*] {} = 0x{:0digits$X} << {} ({})",
            def.name,
            value,
            def.desc,
            def.class,
            digits = digits
        );
        for (field_name, field) in def.fields_by_bit() {
            let _ = write!(
                out,
                "\n    [{:02}] {:<16} = {:X} << {}",
                field.bit,
                field_name,
                field.extract(value),
                field.desc
            );
        }
        for line in out.lines() {
            tracing::info!("{}", line);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedPlatform;
    use crate::backend::sim::TransactionKind;

    const LPC: (u32, u32, u32) = (0, 31, 0);
    const PMC: (u32, u32, u32) = (0, 31, 2);

    fn store() -> DefinitionStore {
        DefinitionStore::new(
            "test",
            vec![
                RegisterDefinition::pci("ETR3", PMC, 0xAC, AccessWidth::Dword, "ETR3")
                    .field("CF9LOCK", 2, 1, "CF9h Lockdown"),
                RegisterDefinition::pci("BC", LPC, 0xFC, AccessWidth::Byte, "BIOS Control")
                    .field("BIOSWE", 0, 1, "BIOS Write Enable")
                    .field("BLE", 1, 1, "BIOS Lock Enable"),
                RegisterDefinition::pci("BC_HI", LPC, 0xFF, AccessWidth::Byte, ""),
                RegisterDefinition::pci("BAR64", (0, 2, 0), 0x10, AccessWidth::Qword, "")
                    .field("BA", 24, 15, "Base Address"),
                RegisterDefinition::pci("MCHBAR", (0, 0, 0), 0x48, AccessWidth::Dword, "")
                    .field("BA", 15, 17, ""),
                RegisterDefinition::pci("MCHBAR_HI", (0, 0, 0), 0x4C, AccessWidth::Dword, ""),
                RegisterDefinition::mmio(
                    "REMAP",
                    BaseAddress::register("MCHBAR").field("BA").upper("MCHBAR_HI"),
                    0x5090,
                    AccessWidth::Qword,
                    "",
                ),
                RegisterDefinition::mmio(
                    "GT_REG",
                    BaseAddress::register("BAR64").field("BA"),
                    0xA188,
                    AccessWidth::Dword,
                    "",
                )
                .field("WAKE_REQUEST", 0, 16, ""),
                RegisterDefinition::memory("HPET_ID", 0xFED0_0000, AccessWidth::Dword, ""),
                RegisterDefinition::msr("FEATURE_CONTROL", 0x3A, "")
                    .field("LOCK", 0, 1, "Lock"),
                RegisterDefinition::io("APMC", 0xB2, AccessWidth::Byte, ""),
                RegisterDefinition::io("WIDE_PORT", 0xB4, AccessWidth::Qword, ""),
                RegisterDefinition::csr("UNCORE_CSR", 0x1284, "")
                    .field("LOCK", 0, 1, ""),
            ],
        )
        .unwrap()
    }

    fn engine() -> (RegisterEngine, Arc<SimulatedPlatform>) {
        let sim = Arc::new(SimulatedPlatform::new(2));
        let engine = RegisterEngine::new(Arc::new(store()), sim.clone());
        (engine, sim)
    }

    #[test]
    fn test_cf9lock_field_decode() {
        let (engine, _) = engine();
        assert_eq!(engine.get_register_field("ETR3", 0x4, "CF9LOCK", false).unwrap(), 1);
        assert_eq!(engine.get_register_field("ETR3", 0x0, "CF9LOCK", false).unwrap(), 0);
        assert_eq!(engine.get_register_field("ETR3", 0x4, "CF9LOCK", true).unwrap(), 0x4);
    }

    #[test]
    fn test_definition_queries_never_fail() {
        let (engine, _) = engine();
        assert!(engine.is_register_defined("ETR3"));
        assert!(!engine.is_register_defined("NOPE"));
        assert!(engine.register_has_field("BC", "BLE"));
        assert!(!engine.register_has_field("BC", "NOPE"));
        assert!(!engine.register_has_field("NOPE", "BLE"));
    }

    #[test]
    fn test_undefined_register_and_field() {
        let (engine, sim) = engine();
        assert!(matches!(
            engine.read_register("NOPE"),
            Err(LockprobeError::UndefinedRegister(name)) if name == "NOPE"
        ));
        assert!(matches!(
            engine.read_register_field("ETR3", "NOPE", false),
            Err(LockprobeError::UndefinedField { .. })
        ));
        assert!(sim.transactions().is_empty());
    }

    #[test]
    fn test_pci_register_reads() {
        let (engine, sim) = engine();
        sim.set_pci_dword(0, 31, 0, 0xFC, 0x1234_5678);
        assert_eq!(engine.read_register("BC").unwrap(), 0x78);
        assert_eq!(engine.read_register("BC_HI").unwrap(), 0x12);
        assert_eq!(engine.read_register_field("BC", "BLE", false).unwrap(), 0);
        assert_eq!(engine.read_register_field("BC", "BIOSWE", false).unwrap(), 0);
    }

    #[test]
    fn test_qword_pci_is_two_dword_reads() {
        let (engine, sim) = engine();
        sim.set_pci_dword(0, 2, 0, 0x10, 0xDE00_0004);
        sim.set_pci_dword(0, 2, 0, 0x14, 0x0000_0001);
        sim.clear_transactions();

        assert_eq!(engine.read_register("BAR64").unwrap(), 0x1_DE00_0004);
        let data_reads = sim
            .transactions()
            .iter()
            .filter(|t| t.kind == TransactionKind::PortRead && t.address == 0xCFC)
            .count();
        assert_eq!(data_reads, 2);
    }

    #[test]
    fn test_pci_write_returns_previous_value() {
        let (engine, sim) = engine();
        sim.set_pci_dword(0, 31, 2, 0xAC, 0);
        assert_eq!(engine.write_register("ETR3", 0x4).unwrap(), Some(0));
        assert_eq!(engine.read_register("ETR3").unwrap(), 0x4);
        assert_eq!(engine.write_register("ETR3", 0x0).unwrap(), Some(0x4));
    }

    #[test]
    fn test_field_write_preserves_other_bits() {
        let (engine, sim) = engine();
        sim.set_pci_dword(0, 31, 2, 0xAC, 0xF0F0_F0F0);
        engine.write_register_field("ETR3", "CF9LOCK", 1).unwrap();
        assert_eq!(engine.read_register("ETR3").unwrap(), 0xF0F0_F0F4);
    }

    #[test]
    fn test_mmio_base_with_upper_half() {
        let (engine, sim) = engine();
        sim.set_pci_dword(0, 0, 0, 0x48, 0xFED1_0001);
        sim.set_pci_dword(0, 0, 0, 0x4C, 0x0000_0002);
        sim.load_memory(0x2_FED1_5090, &0x1122_3344_5566_7788u64.to_ne_bytes());

        assert_eq!(engine.register_base_address("REMAP").unwrap(), 0x2_FED1_0000);
        assert_eq!(engine.read_register("REMAP").unwrap(), 0x1122_3344_5566_7788);
        assert!(matches!(
            engine.register_base_address("ETR3"),
            Err(LockprobeError::NoBaseAddress(_))
        ));
    }

    #[test]
    fn test_mmio_read_after_write() {
        let (engine, sim) = engine();
        sim.set_pci_dword(0, 2, 0, 0x10, 0xDE00_0004);
        sim.set_pci_dword(0, 2, 0, 0x14, 0);

        assert_eq!(engine.register_base_address("GT_REG").unwrap(), 0xDE00_0000);
        assert_eq!(engine.write_register("GT_REG", 0x0001_0001).unwrap(), None);
        assert_eq!(engine.read_register("GT_REG").unwrap(), 0x0001_0001);
        assert_eq!(sim.dump_memory(0xDE00_A188, 4), 0x0001_0001u32.to_ne_bytes());

        engine.write_register("HPET_ID", 0x8086_A201).unwrap();
        assert_eq!(engine.read_register("HPET_ID").unwrap(), 0x8086_A201);
    }

    #[test]
    fn test_msr_register_on_selected_thread() {
        let sim = Arc::new(SimulatedPlatform::new(2));
        sim.set_msr(1, 0x3A, 0x5);
        let engine = RegisterEngine::new(Arc::new(store()), sim.clone()).with_thread(1);

        assert_eq!(engine.read_register_field("FEATURE_CONTROL", "LOCK", false).unwrap(), 1);
        engine.write_register("FEATURE_CONTROL", 0x1_0000_0000).unwrap();
        assert_eq!(engine.read_register("FEATURE_CONTROL").unwrap(), 0x1_0000_0000);
        assert_eq!(engine.read_register_all_threads("FEATURE_CONTROL").unwrap(), vec![0, 0x1_0000_0000]);
    }

    #[test]
    fn test_all_threads_with_disabled_thread() {
        let sim = Arc::new(SimulatedPlatform::new(3));
        sim.set_msr(0, 0x3A, 0x5);
        sim.set_msr(1, 0x3A, 0x4);
        sim.set_msr(2, 0x3A, 0x1);
        sim.set_thread_enabled(1, false);
        let engine = RegisterEngine::new(Arc::new(store()), sim.clone());

        let values = engine.read_register_all_threads("FEATURE_CONTROL").unwrap();
        assert_eq!(values, vec![0x5, 0x5, 0x1]);
        let msr_reads = sim
            .transactions()
            .iter()
            .filter(|t| t.kind == TransactionKind::MsrRead)
            .count();
        assert_eq!(msr_reads, 3);
    }

    #[test]
    fn test_io_register_widths() {
        let (engine, _) = engine();
        engine.write_register("APMC", 0xB2).unwrap();
        assert_eq!(engine.read_register("APMC").unwrap(), 0xB2);
        assert!(matches!(
            engine.read_register("WIDE_PORT"),
            Err(LockprobeError::InvalidSize { size: 8, .. })
        ));
    }

    #[test]
    fn test_csr_decomposition() {
        assert_eq!(csr_location(0x1284), (0xFF, 0, 0x1, 0x84));
        assert_eq!(csr_location(0xF0FC), (0xFF, 0, 0xF, 0xFC));

        let (engine, sim) = engine();
        sim.set_pci_dword(0xFF, 0, 1, 0x84, 0x0000_0001);
        assert_eq!(engine.read_register_field("UNCORE_CSR", "LOCK", false).unwrap(), 1);
        assert_eq!(engine.write_register("UNCORE_CSR", 0).unwrap(), Some(1));
        assert_eq!(engine.read_register("UNCORE_CSR").unwrap(), 0);
    }

    #[test]
    fn test_poll_register_field() {
        let (engine, sim) = engine();
        sim.set_pci_dword(0, 31, 2, 0xAC, 0x4);
        let policy = PollPolicy::new(3, std::time::Duration::from_millis(1));

        let ready = engine
            .poll_register_field("ETR3", "CF9LOCK", &policy, |v| v == 1)
            .unwrap();
        assert_eq!(ready, PollOutcome::Ready(1));

        let stuck = engine
            .poll_register_field("ETR3", "CF9LOCK", &policy, |v| v == 0)
            .unwrap();
        assert_eq!(stuck, PollOutcome::NotReady { last: 1, attempts: 3 });
    }

    #[test]
    fn test_print_register() {
        let (engine, _) = engine();
        let text = engine.print_register("BC", 0x2).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "[*] BC = 0x02 << BIOS Control (b:d.f 00:1F.0 + 0xFC)");
        assert!(lines[1].contains("BIOSWE") && lines[1].ends_with("= 0 << BIOS Write Enable"));
        assert!(lines[2].contains("BLE") && lines[2].ends_with("= 1 << BIOS Lock Enable"));
    }
}
