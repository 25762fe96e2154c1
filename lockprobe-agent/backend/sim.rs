//! In-memory platform model
//!
//! `SimulatedPlatform` answers every primitive of [`HardwareBackend`] from
//! sparse state: PCI config space reached through the 0xCF8/0xCFC I/O port
//! mechanism, byte-addressed physical memory, an I/O port space and per
//! thread MSRs, control registers and CPUID leaves. Unpopulated config space
//! and memory read as all-ones, like an unclaimed bus cycle.
//!
//! Every primitive transaction is appended to a log so callers can observe
//! the exact access pattern a higher-level operation produced.

use std::collections::HashMap;

use parking_lot::Mutex;

use lockprobe_raw::{AccessWidth, ConfigAddress, RegisterLayout};

use super::HardwareBackend;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    MemRead,
    MemWrite,
    PortRead,
    PortWrite,
    MsrRead,
    MsrWrite,
    CrRead,
    CrWrite,
    Cpuid,
}

/// One primitive bus transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub kind: TransactionKind,
    /// Physical address, port, MSR index, CR number or CPUID leaf
    pub address: u64,
    pub width: AccessWidth,
}

#[derive(Debug, Clone, Default)]
struct SimThread {
    enabled: bool,
    msrs: HashMap<u32, u64>,
    control: [u64; 9],
}

/// Write handshake between two dword MMIO registers
///
/// The high half of a dword written at `request` masks its low half; the
/// masked bits are copied into the low half of `ack`.
#[derive(Debug, Clone, Copy)]
struct MaskedAck {
    request: u64,
    ack: u64,
}

#[derive(Debug, Default)]
struct SimState {
    threads: Vec<SimThread>,
    cpuid: HashMap<(u32, u32), (u32, u32, u32, u32)>,
    config_latch: u32,
    /// Config dwords keyed by (bus, device, function, dword offset)
    config: HashMap<(u32, u32, u32, u32), u32>,
    ports: HashMap<u16, u8>,
    memory: HashMap<u64, u8>,
    acks: Vec<MaskedAck>,
    log: Vec<Transaction>,
}

impl SimState {
    fn record(&mut self, kind: TransactionKind, address: u64, width: AccessWidth) {
        self.log.push(Transaction {
            kind,
            address,
            width,
        });
    }

    fn latched_config(&self) -> Option<(u32, u32, u32, u32)> {
        let latch = ConfigAddress::from_raw(self.config_latch as u64);
        latch
            .enable
            .then(|| (latch.bus, latch.device, latch.function, latch.dword_offset()))
    }

    fn port_in(&mut self, port: u16, width: AccessWidth) -> u32 {
        self.record(TransactionKind::PortRead, port as u64, width);
        let value = match port {
            ConfigAddress::PORT if width == AccessWidth::Dword => self.config_latch,
            0xCFC..=0xCFF => {
                let dword = self
                    .latched_config()
                    .and_then(|key| self.config.get(&key).copied())
                    .unwrap_or(u32::MAX);
                dword >> ((port - ConfigAddress::DATA_PORT) * 8)
            }
            _ => (0..width.bytes() as u16).fold(0u32, |acc, i| {
                let byte = self.ports.get(&port.wrapping_add(i)).copied().unwrap_or(0xFF);
                acc | ((byte as u32) << (i * 8))
            }),
        };
        value & width.mask() as u32
    }

    fn port_out(&mut self, port: u16, width: AccessWidth, value: u32) {
        self.record(TransactionKind::PortWrite, port as u64, width);
        match port {
            ConfigAddress::PORT if width == AccessWidth::Dword => self.config_latch = value,
            0xCFC..=0xCFF => {
                if let Some(key) = self.latched_config() {
                    let shift = (port - ConfigAddress::DATA_PORT) as u32 * 8;
                    let mask = (width.mask() as u32).checked_shl(shift).unwrap_or(0);
                    let old = self.config.get(&key).copied().unwrap_or(u32::MAX);
                    let new = (old & !mask) | ((value << shift) & mask);
                    self.config.insert(key, new);
                }
            }
            _ => {
                for i in 0..width.bytes() as u16 {
                    self.ports
                        .insert(port.wrapping_add(i), (value >> (i * 8)) as u8);
                }
            }
        }
    }

    fn select_config(&mut self, bus: u32, device: u32, function: u32, offset: u32) {
        let previous = self.port_in(ConfigAddress::PORT, AccessWidth::Dword);
        let latch = ConfigAddress::for_cycle(previous, bus, device, function, offset);
        self.port_out(ConfigAddress::PORT, AccessWidth::Dword, latch.to_u32());
    }

    fn peek_memory(&self, address: u64, width: AccessWidth) -> u64 {
        let mut bytes = [0u8; 8];
        for (i, byte) in bytes.iter_mut().take(width.bytes()).enumerate() {
            *byte = self
                .memory
                .get(&address.wrapping_add(i as u64))
                .copied()
                .unwrap_or(0xFF);
        }
        u64::from_ne_bytes(bytes) & width.mask()
    }

    fn poke_memory(&mut self, address: u64, width: AccessWidth, value: u64) {
        let bytes = value.to_ne_bytes();
        for (i, byte) in bytes.iter().take(width.bytes()).enumerate() {
            self.memory.insert(address.wrapping_add(i as u64), *byte);
        }
    }

    fn thread(&self, thread: u32) -> Option<&SimThread> {
        self.threads.get(thread as usize)
    }

    fn thread_mut(&mut self, thread: u32) -> Option<&mut SimThread> {
        self.threads.get_mut(thread as usize)
    }
}

/// Simulated Intel platform
#[derive(Debug, Default)]
pub struct SimulatedPlatform {
    state: Mutex<SimState>,
}

impl SimulatedPlatform {
    /// Platform with `threads` enabled logical threads and nothing populated
    pub fn new(threads: u32) -> Self {
        let state = SimState {
            threads: (0..threads)
                .map(|_| SimThread {
                    enabled: true,
                    ..SimThread::default()
                })
                .collect(),
            ..SimState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// A locked-down Coffee Lake desktop with four threads
    ///
    /// Every lock bit the bundled check modules inspect is set, the GT
    /// force-wake handshake is wired, and the SPI and GT BARs point at
    /// populated MMIO.
    pub fn reference() -> Self {
        const SPIBAR: u64 = 0xFE01_0000;
        const GTTMMADR: u64 = 0xDE00_0000;

        let platform = Self::new(4);
        // Host bridge: Intel 8th gen quad core, MCHBAR at 0xFED10000
        platform.set_pci_dword(0, 0, 0, 0x00, 0x3E1F_8086);
        platform.set_pci_dword(0, 0, 0, 0x48, 0xFED1_0001);
        platform.set_pci_dword(0, 0, 0, 0x4C, 0x0000_0000);
        platform.set_pci_dword(0, 0, 0, 0xB8, 0x8B80_0001);
        // IGD
        platform.set_pci_dword(0, 2, 0, 0x00, 0x3E92_8086);
        platform.set_pci_dword(0, 2, 0, 0x10, GTTMMADR as u32 | 0x4);
        platform.set_pci_dword(0, 2, 0, 0x14, 0);
        // PMC: CF9LOCK, SMI_LOCK
        platform.set_pci_dword(0, 31, 2, 0x00, 0xA321_8086);
        platform.set_pci_dword(0, 31, 2, 0xAC, 0x8000_0000);
        platform.set_pci_dword(0, 31, 2, 0xA0, 0x0000_0010);
        // SPI: BLE, SMM_BWP, BILD
        platform.set_pci_dword(0, 31, 5, 0x00, 0xA324_8086);
        platform.set_pci_dword(0, 31, 5, 0x10, SPIBAR as u32);
        platform.set_pci_dword(0, 31, 5, 0xDC, 0x0000_00A2);
        // HSFS: FDV, FLOCKDN
        platform.load_memory(SPIBAR + 0x04, &0x0000_C000u32.to_le_bytes());
        platform.load_memory(GTTMMADR + 0xA188, &0u32.to_le_bytes());
        platform.load_memory(GTTMMADR + 0x0D_0084, &0u32.to_le_bytes());
        platform.add_masked_ack(GTTMMADR + 0xA188, GTTMMADR + 0x0D_0084);
        for thread in 0..4 {
            // IA32_FEATURE_CONTROL: LOCK, VMX outside SMX
            platform.set_msr(thread, 0x3A, 0x5);
            platform.set_msr(thread, 0x151, 0x3);
        }
        platform
    }

    /// Set one config dword; `offset` is rounded down to dword alignment
    pub fn set_pci_dword(&self, bus: u32, device: u32, function: u32, offset: u32, value: u32) {
        self.state
            .lock()
            .config
            .insert((bus, device, function, offset & 0xFC), value);
    }

    /// Copy `data` into physical memory at `address`
    pub fn load_memory(&self, address: u64, data: &[u8]) {
        let mut state = self.state.lock();
        for (i, byte) in data.iter().enumerate() {
            state.memory.insert(address.wrapping_add(i as u64), *byte);
        }
    }

    /// Physical memory contents without logging a transaction
    pub fn dump_memory(&self, address: u64, length: usize) -> Vec<u8> {
        let state = self.state.lock();
        (0..length as u64)
            .map(|i| {
                state
                    .memory
                    .get(&address.wrapping_add(i))
                    .copied()
                    .unwrap_or(0xFF)
            })
            .collect()
    }

    pub fn set_port(&self, port: u16, value: u8) {
        self.state.lock().ports.insert(port, value);
    }

    pub fn set_msr(&self, thread: u32, address: u32, value: u64) {
        if let Some(t) = self.state.lock().thread_mut(thread) {
            t.msrs.insert(address, value);
        }
    }

    pub fn set_thread_enabled(&self, thread: u32, enabled: bool) {
        if let Some(t) = self.state.lock().thread_mut(thread) {
            t.enabled = enabled;
        }
    }

    pub fn set_cpuid(&self, eax: u32, ecx: u32, regs: (u32, u32, u32, u32)) {
        self.state.lock().cpuid.insert((eax, ecx), regs);
    }

    pub fn set_control_register(&self, thread: u32, cr: u32, value: u64) {
        if let Some(t) = self.state.lock().thread_mut(thread) {
            if let Some(slot) = t.control.get_mut(cr as usize) {
                *slot = value;
            }
        }
    }

    /// Wire a force-wake style handshake between two MMIO dwords
    pub fn add_masked_ack(&self, request: u64, ack: u64) {
        self.state.lock().acks.push(MaskedAck { request, ack });
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.state.lock().log.clone()
    }

    pub fn clear_transactions(&self) {
        self.state.lock().log.clear();
    }
}

impl HardwareBackend for SimulatedPlatform {
    fn name(&self) -> &str {
        "simulator"
    }

    fn pci_read_dword(&self, bus: u32, device: u32, function: u32, offset: u32) -> Result<u32> {
        let mut state = self.state.lock();
        state.select_config(bus, device, function, offset);
        Ok(state.port_in(ConfigAddress::DATA_PORT, AccessWidth::Dword))
    }

    fn pci_write_dword(
        &self,
        bus: u32,
        device: u32,
        function: u32,
        offset: u32,
        value: u32,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.select_config(bus, device, function, offset);
        state.port_out(ConfigAddress::DATA_PORT, AccessWidth::Dword, value);
        Ok(())
    }

    fn mem_read(&self, address: u64, width: AccessWidth) -> Result<u64> {
        let mut state = self.state.lock();
        state.record(TransactionKind::MemRead, address, width);
        Ok(state.peek_memory(address, width))
    }

    fn mem_write(&self, address: u64, width: AccessWidth, value: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.record(TransactionKind::MemWrite, address, width);
        state.poke_memory(address, width, value);

        let acks: Vec<u64> = state
            .acks
            .iter()
            .filter(|hook| hook.request == address && width == AccessWidth::Dword)
            .map(|hook| hook.ack)
            .collect();
        for ack in acks {
            let mask = (value >> 16) & 0xFFFF;
            let current = state.peek_memory(ack, AccessWidth::Dword);
            let updated = (current & !mask) | (value & mask);
            state.poke_memory(ack, AccessWidth::Dword, updated);
        }
        Ok(())
    }

    fn port_read(&self, port: u16, width: AccessWidth) -> Result<u32> {
        Ok(self.state.lock().port_in(port, width))
    }

    fn port_write(&self, port: u16, width: AccessWidth, value: u32) -> Result<()> {
        self.state.lock().port_out(port, width, value);
        Ok(())
    }

    fn msr_read(&self, thread: u32, address: u32) -> Result<u64> {
        let mut state = self.state.lock();
        state.record(TransactionKind::MsrRead, address as u64, AccessWidth::Qword);
        Ok(state
            .thread(thread)
            .and_then(|t| t.msrs.get(&address).copied())
            .unwrap_or(0))
    }

    fn msr_write(&self, thread: u32, address: u32, value: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.record(TransactionKind::MsrWrite, address as u64, AccessWidth::Qword);
        if let Some(t) = state.thread_mut(thread) {
            t.msrs.insert(address, value);
        }
        Ok(())
    }

    fn cr_read(&self, thread: u32, cr: u32) -> Result<u64> {
        let mut state = self.state.lock();
        state.record(TransactionKind::CrRead, cr as u64, AccessWidth::Qword);
        Ok(state
            .thread(thread)
            .and_then(|t| t.control.get(cr as usize).copied())
            .unwrap_or(0))
    }

    fn cr_write(&self, thread: u32, cr: u32, value: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.record(TransactionKind::CrWrite, cr as u64, AccessWidth::Qword);
        if let Some(slot) = state
            .thread_mut(thread)
            .and_then(|t| t.control.get_mut(cr as usize))
        {
            *slot = value;
        }
        Ok(())
    }

    fn cpuid_on(&self, _thread: u32, eax: u32, ecx: u32) -> Result<(u32, u32, u32, u32)> {
        let mut state = self.state.lock();
        state.record(TransactionKind::Cpuid, eax as u64, AccessWidth::Dword);
        Ok(state.cpuid.get(&(eax, ecx)).copied().unwrap_or_default())
    }

    fn thread_count(&self) -> u32 {
        self.state.lock().threads.len() as u32
    }

    fn is_thread_enabled(&self, thread: u32) -> bool {
        self.state
            .lock()
            .thread(thread)
            .map(|t| t.enabled)
            .unwrap_or(false)
    }
}
