//! Positional read/write primitives over Linux device nodes
//!
//! The native backend reaches hardware through character devices that map a
//! file offset onto a bus address: `/dev/cpu/N/msr` (offset = MSR index),
//! `/dev/mem` (offset = physical address), `/dev/port` (offset = I/O port)
//! and `/proc/bus/pci/BB/DD.F` (offset = config space offset). Handle caching
//! and locking live in `lockprobe-agent`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::register::AccessWidth;

pub type Result<T> = std::result::Result<T, DevError>;

/// Errors that can occur while accessing a device node
#[derive(Debug, thiserror::Error)]
pub enum DevError {
    #[error("Failed to open {}: {source}", path.display())]
    OpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to seek to 0x{offset:X} in {}: {source}", path.display())]
    SeekFailed {
        path: PathBuf,
        offset: u64,
        source: std::io::Error,
    },

    #[error("Failed to read {len} bytes at 0x{offset:X} from {}: {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        offset: u64,
        len: usize,
        source: std::io::Error,
    },

    #[error("Failed to write {len} bytes at 0x{offset:X} to {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        offset: u64,
        len: usize,
        source: std::io::Error,
    },
}

/// An open device node addressed by file offset
#[derive(Debug)]
pub struct DevNode {
    path: PathBuf,
    file: File,
}

impl DevNode {
    /// Open for reading and synchronous writing
    ///
    /// Requires root or CAP_SYS_RAWIO for the hardware nodes.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&path)
            .map_err(|source| DevError::OpenFailed {
                path: path.clone(),
                source,
            })?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|source| DevError::SeekFailed {
                path: self.path.clone(),
                offset,
                source,
            })?;
        Ok(())
    }

    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.seek(offset)?;
        let len = buf.len();
        self.file
            .read_exact(buf)
            .map_err(|source| DevError::ReadFailed {
                path: self.path.clone(),
                offset,
                len,
                source,
            })
    }

    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.seek(offset)?;
        self.file
            .write_all(data)
            .map_err(|source| DevError::WriteFailed {
                path: self.path.clone(),
                offset,
                len: data.len(),
                source,
            })
    }

    /// Read one little-endian unsigned value of `width` bytes
    pub fn read_uint(&mut self, offset: u64, width: AccessWidth) -> Result<u64> {
        let mut buffer = [0u8; 8];
        self.read_at(offset, &mut buffer[..width.bytes()])?;
        Ok(u64::from_le_bytes(buffer))
    }

    /// Write the low `width` bytes of `value`, little-endian
    pub fn write_uint(&mut self, offset: u64, width: AccessWidth, value: u64) -> Result<()> {
        let bytes = value.to_le_bytes();
        self.write_at(offset, &bytes[..width.bytes()])
    }
}

/// `/dev/cpu/N/msr` below `root`
pub fn msr_path(root: &Path, cpu: u32) -> PathBuf {
    root.join(format!("dev/cpu/{cpu}/msr"))
}

/// `/proc/bus/pci/BB/DD.F` below `root`
pub fn pci_config_path(root: &Path, bus: u32, device: u32, function: u32) -> PathBuf {
    root.join(format!(
        "proc/bus/pci/{:02x}/{:02x}.{}",
        bus & 0xFF,
        device & 0x1F,
        function & 0x7
    ))
}

pub fn mem_path(root: &Path) -> PathBuf {
    root.join("dev/mem")
}

pub fn port_path(root: &Path) -> PathBuf {
    root.join("dev/port")
}
