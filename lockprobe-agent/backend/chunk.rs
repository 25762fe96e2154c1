//! Access width chunking for bulk physical memory transfers
//!
//! Transfers are split greedily: 8-byte transactions while at least 8 bytes
//! remain, then 4, 2 and 1. The chunks cover the buffer exactly and never
//! touch memory past `address + length`.

use lockprobe_raw::AccessWidth;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub offset: usize,
    pub width: AccessWidth,
}

pub fn chunk_plan(length: usize) -> Vec<Chunk> {
    chunk_plan_with(length, AccessWidth::Qword)
}

/// Plan with no transaction wider than `max_width`
pub fn chunk_plan_with(length: usize, max_width: AccessWidth) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut offset = 0;

    for width in AccessWidth::DESCENDING {
        if width > max_width {
            continue;
        }
        while length - offset >= width.bytes() {
            chunks.push(Chunk { offset, width });
            offset += width.bytes();
        }
    }

    chunks
}

/// Native-endian encoding of the low `width` bytes of `value` into `out`
pub fn pack_ne(value: u64, width: AccessWidth, out: &mut [u8]) {
    match width {
        AccessWidth::Byte => out[..1].copy_from_slice(&(value as u8).to_ne_bytes()),
        AccessWidth::Word => out[..2].copy_from_slice(&(value as u16).to_ne_bytes()),
        AccessWidth::Dword => out[..4].copy_from_slice(&(value as u32).to_ne_bytes()),
        AccessWidth::Qword => out[..8].copy_from_slice(&value.to_ne_bytes()),
    }
}

/// Native-endian decoding of `width` bytes from the front of `bytes`
pub fn unpack_ne(bytes: &[u8], width: AccessWidth) -> u64 {
    match width {
        AccessWidth::Byte => bytes[0] as u64,
        AccessWidth::Word => u16::from_ne_bytes([bytes[0], bytes[1]]) as u64,
        AccessWidth::Dword => {
            u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64
        }
        AccessWidth::Qword => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[..8]);
            u64::from_ne_bytes(buf)
        }
    }
}
