//! Linux user-space backend
//!
//! Hardware is reached through the kernel's device nodes:
//!
//! | Resource       | Node                          |
//! |----------------|-------------------------------|
//! | MSR            | `/dev/cpu/N/msr`              |
//! | PCI config     | `/proc/bus/pci/BB/DD.F`       |
//! | Physical mem   | `/dev/mem`                    |
//! | I/O ports      | `/dev/port`                   |
//! | ACPI tables    | `/sys/firmware/acpi/tables/*` |
//!
//! All paths are resolved below a configurable root so a containerised agent
//! can see the host's nodes under a bind mount.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};

use lockprobe_raw::devnode::{mem_path, msr_path, pci_config_path, port_path};
use lockprobe_raw::{AccessWidth, DevError, DevNode};

use super::HardwareBackend;
use crate::common::affinity::AffinityGuard;
use crate::common::cpuid;
use crate::error::{LockprobeError, Result};

type SharedNode = Arc<Mutex<DevNode>>;

pub struct NativeBackend {
    root: PathBuf,
    online: Vec<u32>,
    possible: u32,
    msr_nodes: RwLock<HashMap<u32, SharedNode>>,
    pci_nodes: RwLock<HashMap<(u32, u32, u32), SharedNode>>,
    mem_node: OnceCell<Mutex<DevNode>>,
    port_node: OnceCell<Mutex<DevNode>>,
}

impl NativeBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let online = read_cpu_list(&root, "online").unwrap_or_else(|| {
            tracing::warn!("Failed to detect online CPUs, assuming CPU 0 only");
            vec![0]
        });
        let possible = read_cpu_list(&root, "possible")
            .and_then(|cpus| cpus.iter().max().map(|max| max + 1))
            .unwrap_or_else(|| online.iter().max().map_or(1, |max| max + 1));

        tracing::info!(
            "Native backend rooted at {}: {} of {} threads online",
            root.display(),
            online.len(),
            possible
        );

        Self {
            root,
            online,
            possible,
            msr_nodes: RwLock::new(HashMap::new()),
            pci_nodes: RwLock::new(HashMap::new()),
            mem_node: OnceCell::new(),
            port_node: OnceCell::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cached_node<K>(
        nodes: &RwLock<HashMap<K, SharedNode>>,
        key: K,
        path: impl FnOnce() -> PathBuf,
    ) -> Result<SharedNode>
    where
        K: std::hash::Hash + Eq + Copy,
    {
        if let Some(node) = nodes.read().get(&key) {
            return Ok(Arc::clone(node));
        }

        let mut nodes = nodes.write();
        if let Some(node) = nodes.get(&key) {
            return Ok(Arc::clone(node));
        }

        let node = Arc::new(Mutex::new(DevNode::open(path())?));
        tracing::debug!("Opened {}", node.lock().path().display());
        nodes.insert(key, Arc::clone(&node));
        Ok(node)
    }

    fn msr_node(&self, thread: u32) -> Result<SharedNode> {
        Self::cached_node(&self.msr_nodes, thread, || msr_path(&self.root, thread))
    }

    /// `None` when the device does not exist
    fn pci_node(&self, bus: u32, device: u32, function: u32) -> Result<Option<SharedNode>> {
        let key = (bus & 0xFF, device & 0x1F, function & 0x7);
        let result = Self::cached_node(&self.pci_nodes, key, || {
            pci_config_path(&self.root, bus, device, function)
        });
        match result {
            Ok(node) => Ok(Some(node)),
            Err(LockprobeError::Device(DevError::OpenFailed { source, .. }))
                if source.kind() == ErrorKind::NotFound =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn mem(&self) -> Result<&Mutex<DevNode>> {
        self.mem_node
            .get_or_try_init(|| DevNode::open(mem_path(&self.root)).map(Mutex::new))
            .map_err(LockprobeError::from)
    }

    fn port(&self) -> Result<&Mutex<DevNode>> {
        self.port_node
            .get_or_try_init(|| DevNode::open(port_path(&self.root)).map(Mutex::new))
            .map_err(LockprobeError::from)
    }
}

impl HardwareBackend for NativeBackend {
    fn name(&self) -> &str {
        "native"
    }

    fn pci_read_dword(&self, bus: u32, device: u32, function: u32, offset: u32) -> Result<u32> {
        match self.pci_node(bus, device, function)? {
            Some(node) => {
                let value = node
                    .lock()
                    .read_uint((offset & 0xFC) as u64, AccessWidth::Dword)?;
                Ok(value as u32)
            }
            None => Ok(u32::MAX),
        }
    }

    fn pci_write_dword(
        &self,
        bus: u32,
        device: u32,
        function: u32,
        offset: u32,
        value: u32,
    ) -> Result<()> {
        match self.pci_node(bus, device, function)? {
            Some(node) => {
                node.lock()
                    .write_uint((offset & 0xFC) as u64, AccessWidth::Dword, value as u64)?;
            }
            None => tracing::warn!(
                "PCI write to absent device {:02X}:{:02X}.{:X} dropped",
                bus,
                device,
                function
            ),
        }
        Ok(())
    }

    fn mem_read(&self, address: u64, width: AccessWidth) -> Result<u64> {
        let mut bytes = [0u8; 8];
        self.mem()?
            .lock()
            .read_at(address, &mut bytes[..width.bytes()])?;
        Ok(u64::from_ne_bytes(bytes))
    }

    fn mem_write(&self, address: u64, width: AccessWidth, value: u64) -> Result<()> {
        let bytes = value.to_ne_bytes();
        self.mem()?.lock().write_at(address, &bytes[..width.bytes()])?;
        Ok(())
    }

    fn port_read(&self, port: u16, width: AccessWidth) -> Result<u32> {
        let value = self.port()?.lock().read_uint(port as u64, width)?;
        Ok(value as u32)
    }

    fn port_write(&self, port: u16, width: AccessWidth, value: u32) -> Result<()> {
        self.port()?
            .lock()
            .write_uint(port as u64, width, value as u64)?;
        Ok(())
    }

    fn msr_read(&self, thread: u32, address: u32) -> Result<u64> {
        let node = self.msr_node(thread)?;
        let mut bytes = [0u8; 8];
        node.lock().read_at(address as u64, &mut bytes)?;
        Ok(u64::from_ne_bytes(bytes))
    }

    fn msr_write(&self, thread: u32, address: u32, value: u64) -> Result<()> {
        let node = self.msr_node(thread)?;
        node.lock().write_at(address as u64, &value.to_ne_bytes())?;
        Ok(())
    }

    fn cr_read(&self, _thread: u32, _cr: u32) -> Result<u64> {
        Err(LockprobeError::Unsupported("control register access"))
    }

    fn cr_write(&self, _thread: u32, _cr: u32, _value: u64) -> Result<()> {
        Err(LockprobeError::Unsupported("control register access"))
    }

    fn cpuid_on(&self, thread: u32, eax: u32, ecx: u32) -> Result<(u32, u32, u32, u32)> {
        let _affinity = AffinityGuard::new(thread)?;
        Ok(cpuid::cpuid(eax, ecx))
    }

    fn thread_count(&self) -> u32 {
        self.possible
    }

    fn is_thread_enabled(&self, thread: u32) -> bool {
        self.online.contains(&thread)
    }

    fn efi_supported(&self) -> bool {
        self.root.join("sys/firmware/efi").is_dir()
    }

    fn get_acpi_table(&self, signature: &str) -> Option<Vec<u8>> {
        let path = self.root.join("sys/firmware/acpi/tables").join(signature);
        match std::fs::read(&path) {
            Ok(table) => Some(table),
            Err(e) => {
                tracing::error!("Failed to read ACPI table {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn read_cpu_list(root: &Path, name: &str) -> Option<Vec<u32>> {
    let path = root.join("sys/devices/system/cpu").join(name);
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| parse_cpu_list(&s))
}

/// Parse a kernel CPU list like "0-3,8-11"
pub fn parse_cpu_list(s: &str) -> Option<Vec<u32>> {
    let mut cpus = Vec::new();
    for part in s.trim().split(',') {
        if let Some((start, end)) = part.split_once('-') {
            let start: u32 = start.parse().ok()?;
            let end: u32 = end.parse().ok()?;
            cpus.extend(start..=end);
        } else {
            cpus.push(part.parse().ok()?);
        }
    }
    Some(cpus)
}
