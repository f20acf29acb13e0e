use bitflags::bitflags;

use crate::error::ErrorKind;

bitflags! {
    /// Flag bits of the one-byte operand descriptor.
    ///
    /// The low nibble of a descriptor holds the operand width in bytes
    /// (0, 1, 2, 4 or 8; zero only for the void return shape). `ADDRESS`
    /// marks an 8-byte stack-relative address that the VM dereferences to
    /// a value of the described width and signedness.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DescFlags: u8 {
        const SIGNED = 0x10;
        const ADDRESS = 0x20;
    }
}

/// Mask selecting the width and signedness of a descriptor, the part that
/// must agree between the operands of a binary instruction.
pub const DESC_TYPE_MASK: u8 = 0x1f;

/// Mask selecting the width nibble of a descriptor.
pub const DESC_WIDTH_MASK: u8 = 0x0f;

/// One of the eight sized integer types of the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntType {
    pub signed: bool,
    /// Width in bytes: 1, 2, 4 or 8.
    pub width: u8,
}

impl IntType {
    pub const U8: Self = Self { signed: false, width: 1 };
    pub const U64: Self = Self { signed: false, width: 8 };

    /// Parse a type name. Exactly `i8 i16 i32 i64 u8 u16 u32 u64` are
    /// recognized.
    pub fn from_name(name: &str) -> Result<Self, ErrorKind> {
        let signed = match name.as_bytes().first() {
            Some(b'i') => true,
            Some(b'u') => false,
            _ => return Err(ErrorKind::InvalidType),
        };
        let width = match &name[1..] {
            "8" => 1,
            "16" => 2,
            "32" => 4,
            "64" => 8,
            _ => return Err(ErrorKind::InvalidType),
        };
        Ok(Self { signed, width })
    }

    /// The operand descriptor byte for a value (or, with `address` set, an
    /// address pointing at a value) of this type.
    #[must_use]
    pub fn descriptor(&self, address: bool) -> u8 {
        let mut flags = DescFlags::empty();
        flags.set(DescFlags::SIGNED, self.signed);
        flags.set(DescFlags::ADDRESS, address);
        self.width | flags.bits()
    }

    /// Whether `value` is representable in this type read as unsigned.
    #[must_use]
    pub fn fits_unsigned(&self, value: u64) -> bool {
        self.width == 8 || value < 1u64 << (u32::from(self.width) * 8)
    }

    /// Whether a negated literal of magnitude `magnitude` is representable,
    /// i.e. `magnitude <= 2^(bits-1)`.
    #[must_use]
    pub fn fits_negative(&self, magnitude: u64) -> bool {
        magnitude <= 1u64 << (u32::from(self.width) * 8 - 1)
    }
}

#[test]
fn test_type_names() {
    for (name, signed, width) in [
        ("i8", true, 1),
        ("i16", true, 2),
        ("i32", true, 4),
        ("i64", true, 8),
        ("u8", false, 1),
        ("u16", false, 2),
        ("u32", false, 4),
        ("u64", false, 8),
    ] {
        assert_eq!(IntType::from_name(name), Ok(IntType { signed, width }));
    }
    for name in ["", "i", "u", "i7", "u128", "int", "x8", "i88"] {
        assert_eq!(IntType::from_name(name), Err(ErrorKind::InvalidType));
    }
}

#[test]
fn test_descriptors() {
    assert_eq!(IntType::U8.descriptor(false), 0x01);
    assert_eq!(IntType::U64.descriptor(false), 0x08);
    assert_eq!(IntType { signed: true, width: 4 }.descriptor(false), 0x14);
    assert_eq!(IntType { signed: true, width: 2 }.descriptor(true), 0x32);
    assert_eq!(IntType::U64.descriptor(true), 0x28);
}

#[test]
fn test_literal_ranges() {
    let u8t = IntType::U8;
    assert!(u8t.fits_unsigned(255));
    assert!(!u8t.fits_unsigned(256));
    assert!(IntType::U64.fits_unsigned(u64::MAX));

    let i8t = IntType { signed: true, width: 1 };
    assert!(i8t.fits_negative(128));
    assert!(!i8t.fits_negative(129));
    let i64t = IntType { signed: true, width: 8 };
    assert!(i64t.fits_negative(1u64 << 63));
}
