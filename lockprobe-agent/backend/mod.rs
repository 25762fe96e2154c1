//! Hardware access backends
//!
//! A backend performs single bus transactions for one execution environment
//! (simulator, native Linux driver nodes, ...). Implementations provide the
//! raw primitives; the access policies shared by every environment live in
//! the provided methods of [`HardwareBackend`]:
//!
//! - PCI config reads/writes go through an aligned dword and are narrowed or
//!   merged according to the requested size and offset
//! - bulk memory transfers follow the [`chunk`] plan
//! - I/O port and MMIO sizes are checked before any bus access
//! - MSR, control register and CPUID requests are redirected to an enabled
//!   thread when the requested one is disabled
//! - optional capabilities return `None` when the environment lacks them

pub mod chunk;
pub mod native;
pub mod sim;

pub use native::NativeBackend;
pub use sim::SimulatedPlatform;

use lockprobe_raw::{join_address, AccessWidth};

use crate::error::{LockprobeError, Result};
use chunk::{chunk_plan, pack_ne, unpack_ne};

/// Control registers reachable through [`HardwareBackend::read_cr`]
pub const SUPPORTED_CONTROL_REGISTERS: [u32; 5] = [0, 2, 3, 4, 8];

/// General purpose register image passed to and returned from a software SMI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmiRegisters {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorTable {
    Gdtr,
    Idtr,
    Ldtr,
}

fn unsupported(api: &str) {
    tracing::error!("[backend] API {}() is not supported", api);
}

/// Bus-level transaction layer for one execution environment
pub trait HardwareBackend: Send + Sync {
    /// Human readable environment name
    fn name(&self) -> &str;

    // ------------------------------------------------------------------
    // Primitives
    // ------------------------------------------------------------------

    /// Read the config dword containing `offset`
    fn pci_read_dword(&self, bus: u32, device: u32, function: u32, offset: u32) -> Result<u32>;

    /// Write the config dword containing `offset`
    fn pci_write_dword(
        &self,
        bus: u32,
        device: u32,
        function: u32,
        offset: u32,
        value: u32,
    ) -> Result<()>;

    /// One physical memory transaction of `width`
    fn mem_read(&self, address: u64, width: AccessWidth) -> Result<u64>;

    fn mem_write(&self, address: u64, width: AccessWidth, value: u64) -> Result<()>;

    /// One I/O port transaction; `width` is never `Qword`
    fn port_read(&self, port: u16, width: AccessWidth) -> Result<u32>;

    fn port_write(&self, port: u16, width: AccessWidth, value: u32) -> Result<()>;

    /// MSR access on an already validated, enabled thread
    fn msr_read(&self, thread: u32, address: u32) -> Result<u64>;

    fn msr_write(&self, thread: u32, address: u32, value: u64) -> Result<()>;

    /// Control register access on an enabled thread, `cr` already validated
    fn cr_read(&self, thread: u32, cr: u32) -> Result<u64>;

    fn cr_write(&self, thread: u32, cr: u32, value: u64) -> Result<()>;

    fn cpuid_on(&self, thread: u32, eax: u32, ecx: u32) -> Result<(u32, u32, u32, u32)>;

    fn thread_count(&self) -> u32;

    fn is_thread_enabled(&self, thread: u32) -> bool;

    // ------------------------------------------------------------------
    // Threads
    // ------------------------------------------------------------------

    fn first_enabled_thread(&self) -> Option<u32> {
        (0..self.thread_count()).find(|&t| self.is_thread_enabled(t))
    }

    /// First enabled logical thread, 0 when every thread is disabled
    fn find_enabled_thread(&self) -> u32 {
        self.first_enabled_thread().unwrap_or_else(|| {
            tracing::warn!("No enabled threads found");
            0
        })
    }

    /// `requested` if enabled, otherwise the first enabled thread
    ///
    /// A substitution logs exactly one warning.
    fn select_thread(&self, requested: u32) -> u32 {
        if self.is_thread_enabled(requested) {
            return requested;
        }
        match self.first_enabled_thread() {
            Some(substitute) => {
                tracing::warn!(
                    "Selected thread [{}] was disabled, using [{}]",
                    requested,
                    substitute
                );
                substitute
            }
            None => {
                tracing::warn!(
                    "Selected thread [{}] was disabled and no enabled threads found, using [0]",
                    requested
                );
                0
            }
        }
    }

    // ------------------------------------------------------------------
    // PCI configuration space
    // ------------------------------------------------------------------

    /// Read `size` bytes of config space
    ///
    /// Sizes 1 and 2 are shifted out of the containing dword by
    /// `(offset % 4) * 8` bits and masked; any other size returns the dword.
    /// A dword read at an unaligned offset is therefore truncated.
    fn read_pci_reg(
        &self,
        bus: u32,
        device: u32,
        function: u32,
        offset: u32,
        size: u32,
    ) -> Result<u32> {
        warn_if_out_of_range(bus, device, function, offset);
        let dword = self.pci_read_dword(bus, device, function, offset)?;
        let value = narrow_config_read(dword, offset, size);
        tracing::debug!(
            "PCI read: {:02X}:{:02X}.{:X} + 0x{:02X} [{}] = 0x{:X}",
            bus,
            device,
            function,
            offset,
            size,
            value
        );
        Ok(value)
    }

    /// Write `size` bytes of config space, returning their previous value
    fn write_pci_reg(
        &self,
        bus: u32,
        device: u32,
        function: u32,
        offset: u32,
        value: u32,
        size: u32,
    ) -> Result<u32> {
        warn_if_out_of_range(bus, device, function, offset);
        let old_dword = self.pci_read_dword(bus, device, function, offset)?;
        let new_dword = merge_config_write(old_dword, offset, size, value);
        self.pci_write_dword(bus, device, function, offset, new_dword)?;
        tracing::debug!(
            "PCI write: {:02X}:{:02X}.{:X} + 0x{:02X} [{}] <- 0x{:X}",
            bus,
            device,
            function,
            offset,
            size,
            value
        );
        Ok(narrow_config_read(old_dword, offset, size))
    }

    // ------------------------------------------------------------------
    // Physical memory and MMIO
    // ------------------------------------------------------------------

    /// Read exactly `length` bytes in the largest transactions possible
    ///
    /// A range running past the top of the address space is rejected before
    /// any transaction.
    fn read_physical_mem(&self, address: u64, length: usize) -> Result<Vec<u8>> {
        check_span(address, length)?;
        let mut buffer = vec![0u8; length];
        for chunk in chunk_plan(length) {
            let source = chunk_address(address, chunk.offset, length)?;
            let value = self.mem_read(source, chunk.width)?;
            pack_ne(value, chunk.width, &mut buffer[chunk.offset..]);
        }
        Ok(buffer)
    }

    /// Write all of `data` in the largest transactions possible
    fn write_physical_mem(&self, address: u64, data: &[u8]) -> Result<()> {
        check_span(address, data.len())?;
        for chunk in chunk_plan(data.len()) {
            let value = unpack_ne(&data[chunk.offset..], chunk.width);
            let target = chunk_address(address, chunk.offset, data.len())?;
            self.mem_write(target, chunk.width, value)?;
        }
        Ok(())
    }

    fn read_phys_mem(&self, address_hi: u32, address_lo: u32, length: usize) -> Result<Vec<u8>> {
        self.read_physical_mem(join_address(address_hi, address_lo), length)
    }

    fn write_phys_mem(&self, address_hi: u32, address_lo: u32, data: &[u8]) -> Result<()> {
        self.write_physical_mem(join_address(address_hi, address_lo), data)
    }

    fn read_mmio_reg(&self, address: u64, size: u64) -> Result<u64> {
        let width = mmio_width(size)?;
        let bytes = self.read_physical_mem(address, width.bytes())?;
        let value = unpack_ne(&bytes, width);
        tracing::debug!("MMIO read: 0x{:X} [{}] = 0x{:X}", address, size, value);
        Ok(value)
    }

    fn write_mmio_reg(&self, address: u64, size: u64, value: u64) -> Result<()> {
        let width = mmio_width(size)?;
        let mut bytes = [0u8; 8];
        pack_ne(value & width.mask(), width, &mut bytes);
        tracing::debug!("MMIO write: 0x{:X} [{}] <- 0x{:X}", address, size, value);
        self.write_physical_mem(address, &bytes[..width.bytes()])
    }

    // ------------------------------------------------------------------
    // I/O ports
    // ------------------------------------------------------------------

    fn read_io_port(&self, port: u16, size: u32) -> Result<u32> {
        let width = port_width(size)?;
        let value = self.port_read(port, width)?;
        tracing::debug!("I/O read: 0x{:X} [{}] = 0x{:X}", port, size, value);
        Ok(value)
    }

    fn write_io_port(&self, port: u16, value: u32, size: u32) -> Result<()> {
        let width = port_width(size)?;
        tracing::debug!("I/O write: 0x{:X} [{}] <- 0x{:X}", port, size, value);
        self.port_write(port, width, value & width.mask() as u32)
    }

    // ------------------------------------------------------------------
    // CPU
    // ------------------------------------------------------------------

    /// Read an MSR as `(eax, edx)`
    fn read_msr(&self, thread: u32, address: u32) -> Result<(u32, u32)> {
        let thread = self.select_thread(thread);
        let value = self.msr_read(thread, address)?;
        tracing::debug!(
            "MSR read: thread {} MSR 0x{:08X} = 0x{:016X}",
            thread,
            address,
            value
        );
        Ok((value as u32, (value >> 32) as u32))
    }

    fn write_msr(&self, thread: u32, address: u32, eax: u32, edx: u32) -> Result<()> {
        let thread = self.select_thread(thread);
        let value = join_address(edx, eax);
        tracing::debug!(
            "MSR write: thread {} MSR 0x{:08X} <- 0x{:016X}",
            thread,
            address,
            value
        );
        self.msr_write(thread, address, value)
    }

    fn read_cr(&self, thread: u32, cr: u32) -> Result<u64> {
        check_control_register(cr)?;
        let thread = self.select_thread(thread);
        self.cr_read(thread, cr)
    }

    fn write_cr(&self, thread: u32, cr: u32, value: u64) -> Result<()> {
        check_control_register(cr)?;
        let thread = self.select_thread(thread);
        self.cr_write(thread, cr, value)
    }

    /// CPUID on one enabled thread
    ///
    /// On asymmetric configurations other threads may report different values.
    fn cpuid(&self, eax: u32, ecx: u32) -> Result<(u32, u32, u32, u32)> {
        let thread = self.find_enabled_thread();
        self.cpuid_on(thread, eax, ecx)
    }

    // ------------------------------------------------------------------
    // Optional capabilities
    // ------------------------------------------------------------------

    /// Physically contiguous allocation below `max_pa`, returns its address
    fn alloc_phys_mem(&self, _length: usize, _max_pa: u64) -> Option<u64> {
        unsupported("alloc_phys_mem");
        None
    }

    fn send_sw_smi(
        &self,
        _thread: u32,
        _code: u8,
        _data: u8,
        _regs: SmiRegisters,
    ) -> Option<SmiRegisters> {
        unsupported("send_sw_smi");
        None
    }

    fn efi_supported(&self) -> bool {
        false
    }

    fn get_efi_variable(&self, _name: &str, _guid: &str) -> Option<Vec<u8>> {
        unsupported("get_efi_variable");
        None
    }

    fn get_acpi_table(&self, _signature: &str) -> Option<Vec<u8>> {
        unsupported("get_acpi_table");
        None
    }

    fn msgbus_read(&self, _port: u8, _register: u32) -> Option<u32> {
        unsupported("msgbus_read");
        None
    }

    fn msgbus_write(&self, _port: u8, _register: u32, _value: u32) -> Option<()> {
        unsupported("msgbus_write");
        None
    }

    fn load_ucode_update(&self, _thread: u32, _image: &[u8]) -> Option<()> {
        unsupported("load_ucode_update");
        None
    }

    /// `(limit, base)` of a descriptor table register
    fn get_descriptor_table(&self, _thread: u32, _table: DescriptorTable) -> Option<(u16, u64)> {
        unsupported("get_descriptor_table");
        None
    }
}

pub fn warn_if_out_of_range(bus: u32, device: u32, function: u32, offset: u32) {
    if bus >= 256 || device >= 32 || function >= 8 || offset >= 256 {
        tracing::warn!(
            "PCI access {:X}:{:X}.{:X} + 0x{:X} out of range; use MMIO to reach extended config space",
            bus,
            device,
            function,
            offset
        );
    }
}

/// Bytes of `dword` addressed by `offset` and `size`
pub fn narrow_config_read(dword: u32, offset: u32, size: u32) -> u32 {
    let value = dword >> ((offset % 4) * 8);
    match size {
        1 => value & 0xFF,
        2 => value & 0xFFFF,
        _ => value,
    }
}

/// `old_dword` with the bytes addressed by `offset` and `size` replaced
pub fn merge_config_write(old_dword: u32, offset: u32, size: u32, value: u32) -> u32 {
    let field_mask: u32 = match size {
        1 => 0xFF,
        2 => 0xFFFF,
        _ => return value,
    };
    let shift = (offset % 4) * 8;
    let mask = field_mask << shift;
    (old_dword & !mask) | ((value << shift) & mask)
}

fn check_span(address: u64, length: usize) -> Result<()> {
    match length {
        0 => Ok(()),
        _ => chunk_address(address, length - 1, length).map(|_| ()),
    }
}

fn chunk_address(address: u64, offset: usize, length: usize) -> Result<u64> {
    address
        .checked_add(offset as u64)
        .ok_or(LockprobeError::AddressOverflow { address, length })
}

fn port_width(size: u32) -> Result<AccessWidth> {
    match size {
        1 => Ok(AccessWidth::Byte),
        2 => Ok(AccessWidth::Word),
        4 => Ok(AccessWidth::Dword),
        other => Err(LockprobeError::InvalidSize {
            access: "I/O port",
            size: other as u64,
        }),
    }
}

fn mmio_width(size: u64) -> Result<AccessWidth> {
    AccessWidth::from_bytes(size).map_err(|_| LockprobeError::InvalidSize {
        access: "MMIO",
        size,
    })
}

fn check_control_register(cr: u32) -> Result<()> {
    if SUPPORTED_CONTROL_REGISTERS.contains(&cr) {
        Ok(())
    } else {
        tracing::error!("Selected CR{} is not supported", cr);
        Err(LockprobeError::UnsupportedControlRegister(cr))
    }
}
