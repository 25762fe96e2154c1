//! Bit-level register primitives shared by every access class
//!
//! [`FieldDefinition`] carries the field math used by the access engine,
//! [`AccessWidth`] the set of legal transaction widths, and
//! [`RegisterLayout`] a typed view over raw values for the few registers the
//! backends themselves have to program (e.g. the 0xCF8 config latch).

use serde::{Deserialize, Serialize};

/// Width of a single bus transaction or register, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AccessWidth {
    Byte = 1,
    Word = 2,
    Dword = 4,
    Qword = 8,
}

/// Error returned when a byte count is not one of 1, 2, 4 or 8
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid access width: {0} bytes")]
pub struct InvalidWidth(pub u64);

impl AccessWidth {
    /// Widths from largest to smallest, in the order chunked transfers try them
    pub const DESCENDING: [AccessWidth; 4] = [
        AccessWidth::Qword,
        AccessWidth::Dword,
        AccessWidth::Word,
        AccessWidth::Byte,
    ];

    pub const fn bytes(self) -> usize {
        self as usize
    }

    pub const fn bits(self) -> u32 {
        (self as u32) * 8
    }

    /// All-ones value of this width
    pub const fn mask(self) -> u64 {
        match self {
            AccessWidth::Qword => u64::MAX,
            _ => (1u64 << self.bits()) - 1,
        }
    }

    pub fn from_bytes(bytes: u64) -> Result<Self, InvalidWidth> {
        match bytes {
            1 => Ok(AccessWidth::Byte),
            2 => Ok(AccessWidth::Word),
            4 => Ok(AccessWidth::Dword),
            8 => Ok(AccessWidth::Qword),
            other => Err(InvalidWidth(other)),
        }
    }
}

impl TryFrom<u8> for AccessWidth {
    type Error = InvalidWidth;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_bytes(value as u64)
    }
}

impl From<AccessWidth> for u8 {
    fn from(width: AccessWidth) -> u8 {
        width as u8
    }
}

/// Location of a named bit field inside a register
///
/// | Operation           | Result                                        |
/// |---------------------|-----------------------------------------------|
/// | `extract(v)`        | `(v >> bit) & ((1 << size) - 1)`              |
/// | `extract_in_place`  | same bits, left at their original position    |
/// | `insert(v, n)`      | `(v & !mask) \| ((n << bit) & mask)`          |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub bit: u32,
    pub size: u32,
    #[serde(default)]
    pub desc: String,
}

impl FieldDefinition {
    pub fn new(bit: u32, size: u32, desc: impl Into<String>) -> Self {
        Self {
            bit,
            size,
            desc: desc.into(),
        }
    }

    /// One past the highest bit covered by this field
    pub fn end(&self) -> u32 {
        self.bit + self.size
    }

    /// Mask of `size` ones, not shifted
    pub fn value_mask(&self) -> u64 {
        if self.size >= 64 {
            u64::MAX
        } else {
            (1u64 << self.size) - 1
        }
    }

    /// Mask covering the field at its position in the register
    pub fn register_mask(&self) -> u64 {
        self.value_mask().checked_shl(self.bit).unwrap_or(0)
    }

    pub fn extract(&self, register_value: u64) -> u64 {
        register_value.checked_shr(self.bit).unwrap_or(0) & self.value_mask()
    }

    /// Field bits without shifting them down, for address-type fields whose
    /// low bits are implicitly zero
    pub fn extract_in_place(&self, register_value: u64) -> u64 {
        register_value & self.register_mask()
    }

    pub fn insert(&self, register_value: u64, field_value: u64) -> u64 {
        let mask = self.register_mask();
        let shifted = field_value.checked_shl(self.bit).unwrap_or(0);
        (register_value & !mask) | (shifted & mask)
    }

    pub fn overlaps(&self, other: &FieldDefinition) -> bool {
        self.bit < other.end() && other.bit < self.end()
    }
}

/// Assemble a 64-bit physical address from its 32-bit halves
pub const fn join_address(high: u32, low: u32) -> u64 {
    ((high as u64) << 32) | low as u64
}

/// Trait for register layouts that can be converted to/from raw values
///
/// # Example
///
/// ```ignore
/// use lockprobe_raw::register::RegisterLayout;
///
/// #[derive(Debug, Default)]
/// struct SmiControl {
///     global_enable: bool,
///     apmc_enable: bool,
/// }
///
/// impl RegisterLayout for SmiControl {
///     fn to_raw(&self) -> u64 {
///         (self.global_enable as u64) | ((self.apmc_enable as u64) << 5)
///     }
///
///     fn from_raw(value: u64) -> Self {
///         Self {
///             global_enable: value & 1 != 0,
///             apmc_enable: value & (1 << 5) != 0,
///         }
///     }
/// }
/// ```
pub trait RegisterLayout: Sized {
    /// Convert this layout to the raw register value
    fn to_raw(&self) -> u64;

    /// Parse a raw register value into this layout
    fn from_raw(value: u64) -> Self;

    /// Validate that the field values are within their encodable ranges
    fn validate(&self) -> Result<(), &'static str> {
        Ok(())
    }
}

/// Legacy PCI configuration address latch (I/O port 0xCF8)
///
/// ## Register Format
///
/// | Bits   | Field     |
/// |--------|-----------|
/// | 0-1    | reserved  |
/// | 2-7    | offset    |
/// | 8-10   | function  |
/// | 11-15  | device    |
/// | 16-23  | bus       |
/// | 24-30  | reserved  |
/// | 31     | enable    |
///
/// Out-of-range inputs are truncated to their field width, the same way the
/// hardware decodes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigAddress {
    pub enable: bool,
    pub bus: u32,
    pub device: u32,
    pub function: u32,
    pub offset: u32,
    /// Bits 24-30 and 0-1 carried over from the previous latch value
    pub reserved: u32,
}

impl ConfigAddress {
    pub const PORT: u16 = 0xCF8;
    pub const DATA_PORT: u16 = 0xCFC;
    pub const RESERVED_MASK: u32 = 0x7F00_0003;

    /// Build the latch value for a config cycle, preserving the reserved bits
    /// of `previous`
    pub fn for_cycle(previous: u32, bus: u32, device: u32, function: u32, offset: u32) -> Self {
        Self {
            enable: true,
            bus,
            device,
            function,
            offset,
            reserved: previous & Self::RESERVED_MASK,
        }
    }

    pub fn to_u32(&self) -> u32 {
        self.to_raw() as u32
    }

    /// Dword-aligned register offset this latch selects
    pub fn dword_offset(&self) -> u32 {
        self.offset & 0xFC
    }
}

impl RegisterLayout for ConfigAddress {
    fn to_raw(&self) -> u64 {
        let mut value = self.reserved & Self::RESERVED_MASK;
        if self.enable {
            value |= 1 << 31;
        }
        value |= (self.bus & 0xFF) << 16;
        value |= (self.device & 0x1F) << 11;
        value |= (self.function & 0x07) << 8;
        value |= self.offset & 0xFF;
        value as u64
    }

    fn from_raw(value: u64) -> Self {
        let value = value as u32;
        Self {
            enable: value & (1 << 31) != 0,
            bus: (value >> 16) & 0xFF,
            device: (value >> 11) & 0x1F,
            function: (value >> 8) & 0x07,
            offset: value & 0xFC,
            reserved: value & Self::RESERVED_MASK,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.bus > 0xFF {
            return Err("bus must be 0-255");
        }
        if self.device > 0x1F {
            return Err("device must be 0-31");
        }
        if self.function > 0x07 {
            return Err("function must be 0-7");
        }
        if self.offset > 0xFF {
            return Err("offset must be 0-255");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_extract_and_insert() {
        let field = FieldDefinition::new(2, 1, "CF9 lock");
        assert_eq!(field.extract(0x4), 1);
        assert_eq!(field.extract(0x0), 0);
        assert_eq!(field.insert(0, 1), 0x4);
    }

    #[test]
    fn test_insert_leaves_other_bits_alone() {
        let field = FieldDefinition::new(8, 4, "");
        let value = field.insert(u64::MAX, 0);
        assert_eq!(value, !0xF00);
        assert_eq!(field.insert(0, 0xFF), 0xF00);
    }

    #[test]
    fn test_field_round_trip_is_identity() {
        let field = FieldDefinition::new(20, 12, "");
        for value in [0u64, 0xFFFF_FFFF, 0x1234_5678_9ABC_DEF0, u64::MAX] {
            assert_eq!(field.insert(value, field.extract(value)), value);
        }
    }

    #[test]
    fn test_full_width_field() {
        let field = FieldDefinition::new(0, 64, "");
        assert_eq!(field.value_mask(), u64::MAX);
        assert_eq!(field.extract(0xDEAD_BEEF_0000_0001), 0xDEAD_BEEF_0000_0001);
    }

    #[test]
    fn test_extract_in_place_keeps_address_bits() {
        let field = FieldDefinition::new(20, 12, "TSEG base");
        assert_eq!(field.extract(0x8B80_0001), 0x8B8);
        assert_eq!(field.extract_in_place(0x8B80_0001), 0x8B80_0000);
    }

    #[test]
    fn test_overlap_detection() {
        let a = FieldDefinition::new(0, 4, "");
        let b = FieldDefinition::new(3, 2, "");
        let c = FieldDefinition::new(4, 4, "");
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_access_width_conversion() {
        assert_eq!(AccessWidth::from_bytes(4), Ok(AccessWidth::Dword));
        assert_eq!(AccessWidth::from_bytes(3), Err(InvalidWidth(3)));
        assert_eq!(AccessWidth::Word.mask(), 0xFFFF);
        assert_eq!(AccessWidth::Qword.mask(), u64::MAX);
    }

    #[test]
    fn test_config_address_encoding() {
        let addr = ConfigAddress::for_cycle(0xFFFF_FFFF, 0, 31, 0, 0xFC);
        assert_eq!(addr.to_u32(), 0xFF00_F8FF);
        assert_eq!(addr.dword_offset(), 0xFC);

        let decoded = ConfigAddress::from_raw(addr.to_raw());
        assert_eq!(decoded.device, 31);
        assert_eq!(decoded.offset, 0xFC);
        assert!(decoded.enable);
    }

    #[test]
    fn test_config_address_truncates_out_of_range() {
        let addr = ConfigAddress::for_cycle(0, 0x100, 32, 8, 0x100);
        assert!(addr.validate().is_err());
        assert_eq!(addr.to_u32(), 0x8000_0000);
    }

    #[test]
    fn test_join_address() {
        assert_eq!(join_address(0x1, 0xFED0_0000), 0x1_FED0_0000);
    }

    #[test]
    fn test_width_serializes_as_byte_count() {
        assert_eq!(serde_json::to_string(&AccessWidth::Dword).unwrap(), "4");
        let width: AccessWidth = serde_json::from_str("8").unwrap();
        assert_eq!(width, AccessWidth::Qword);
        for bad in ["0", "3", "16"] {
            assert!(serde_json::from_str::<AccessWidth>(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_field_desc_defaults_to_empty() {
        let field: FieldDefinition = serde_json::from_str(r#"{"bit": 31, "size": 1}"#).unwrap();
        assert_eq!(field, FieldDefinition::new(31, 1, ""));
    }
}
