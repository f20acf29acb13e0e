use std::{error, fmt};

use crate::emit::Opcode;
use crate::ty::{DESC_WIDTH_MASK, DescFlags};

/// Decoding errors. A well-formed image produced by the generator never
/// triggers any of these; they exist so corruption is loud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Truncated,
    UnknownOpcode(u8),
    BadDescriptor(u8),
    UnterminatedString,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => f.write_str("instruction truncated"),
            Self::UnknownOpcode(byte) => write!(f, "unknown opcode 0x{byte:02x}"),
            Self::BadDescriptor(byte) => write!(f, "bad operand descriptor 0x{byte:02x}"),
            Self::UnterminatedString => f.write_str("string payload missing its terminator"),
        }
    }
}

impl error::Error for Error {}

/// A decoded operand descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub width: u8,
    pub signed: bool,
    pub address: bool,
}

impl Descriptor {
    pub fn parse(byte: u8) -> Result<Self, Error> {
        let width = byte & DESC_WIDTH_MASK;
        if !matches!(width, 0 | 1 | 2 | 4 | 8) {
            return Err(Error::BadDescriptor(byte));
        }
        let flags =
            DescFlags::from_bits(byte & !DESC_WIDTH_MASK).ok_or(Error::BadDescriptor(byte))?;
        Ok(Self {
            width,
            signed: flags.contains(DescFlags::SIGNED),
            address: flags.contains(DescFlags::ADDRESS),
        })
    }
}

/// One decoded instruction. String payloads borrow from the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inst<'a> {
    Halt,
    Ecall,
    Call,
    Return(Descriptor),
    Jump,
    Branch(Descriptor),
    Push { operand: Descriptor, imm: u64 },
    Pop(Descriptor),
    Assign { lhs: Descriptor, rhs: Descriptor },
    Load(Descriptor),
    Store(Descriptor),
    StoreString(&'a [u8]),
    Binary { op: Opcode, lhs: Descriptor, rhs: Descriptor },
    Convert { src: Descriptor, dst: Descriptor },
}

/// Sequential instruction reader over a bytecode image.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn byte(&mut self) -> Result<u8, Error> {
        let byte = *self.buf.get(self.offset).ok_or(Error::Truncated)?;
        self.offset += 1;
        Ok(byte)
    }

    fn descriptor(&mut self) -> Result<Descriptor, Error> {
        Descriptor::parse(self.byte()?)
    }

    /// Little-endian immediate of the given width.
    fn imm(&mut self, width: u8) -> Result<u64, Error> {
        let end = self.offset + usize::from(width);
        let bytes = self.buf.get(self.offset..end).ok_or(Error::Truncated)?;
        self.offset = end;
        let mut value = 0u64;
        for (i, &b) in bytes.iter().enumerate() {
            value |= u64::from(b) << (i * 8);
        }
        Ok(value)
    }

    /// Decode the next instruction, with the offset it starts at.
    pub fn next(&mut self) -> Result<Option<(usize, Inst<'a>)>, Error> {
        if self.offset >= self.buf.len() {
            return Ok(None);
        }
        let at = self.offset;
        let opcode = self.byte()?;
        let opcode = Opcode::try_from(opcode).map_err(|_| Error::UnknownOpcode(opcode))?;

        let inst = match opcode {
            Opcode::Halt => Inst::Halt,
            Opcode::Ecall => Inst::Ecall,
            Opcode::Call => Inst::Call,
            Opcode::Jump => Inst::Jump,
            Opcode::Return => Inst::Return(self.descriptor()?),
            Opcode::Branch => Inst::Branch(self.descriptor()?),
            Opcode::Pop => Inst::Pop(self.descriptor()?),
            Opcode::Load => Inst::Load(self.descriptor()?),
            Opcode::Store => Inst::Store(self.descriptor()?),
            Opcode::Push => {
                let operand = self.descriptor()?;
                let imm = self.imm(operand.width)?;
                Inst::Push { operand, imm }
            }
            Opcode::Assign => Inst::Assign {
                lhs: self.descriptor()?,
                rhs: self.descriptor()?,
            },
            Opcode::Convert => Inst::Convert {
                src: self.descriptor()?,
                dst: self.descriptor()?,
            },
            Opcode::StoreString => {
                let start = self.offset;
                let len = self.buf[start..]
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or(Error::UnterminatedString)?;
                self.offset = start + len + 1;
                Inst::StoreString(&self.buf[start..start + len])
            }
            op if op.is_binary() => Inst::Binary {
                op,
                lhs: self.descriptor()?,
                rhs: self.descriptor()?,
            },
            // is_binary covers every remaining opcode value.
            _ => return Err(Error::UnknownOpcode(opcode.into())),
        };
        Ok(Some((at, inst)))
    }
}

/// Decode a whole image into `(offset, instruction)` pairs.
pub fn decode_all(buf: &[u8]) -> Result<Vec<(usize, Inst<'_>)>, Error> {
    let mut decoder = Decoder::new(buf);
    let mut out = Vec::new();
    while let Some(entry) = decoder.next()? {
        out.push(entry);
    }
    Ok(out)
}

#[test]
fn test_decode_roundtrip() {
    use crate::emit::{Emitter, Shape};
    use crate::ty::IntType;

    const I16: IntType = IntType { signed: true, width: 2 };

    let mut e = Emitter::new();
    e.push_imm(I16, 0x1234);
    e.pop(Shape::Value(I16));
    e.binary(Opcode::Xor, Shape::Address(I16), Shape::Value(I16))
        .unwrap();
    e.store_string(Shape::Address(IntType::U8), b"ok").unwrap();
    e.ret(Shape::Void);

    let insts: Vec<_> = decode_all(e.bytes())
        .unwrap()
        .into_iter()
        .map(|(_, inst)| inst)
        .collect();
    let i16_value = Descriptor { width: 2, signed: true, address: false };
    let i16_addr = Descriptor { width: 2, signed: true, address: true };
    assert_eq!(
        insts,
        vec![
            Inst::Push { operand: i16_value, imm: 0x1234 },
            Inst::Pop(i16_value),
            Inst::Binary { op: Opcode::Xor, lhs: i16_addr, rhs: i16_value },
            Inst::StoreString(b"ok"),
            Inst::Return(Descriptor { width: 0, signed: false, address: false }),
        ]
    );
}

#[test]
fn test_decode_offsets() {
    use crate::emit::Emitter;
    use crate::ty::IntType;

    let mut e = Emitter::new();
    let blank = e.blank_push();
    e.op(Opcode::Call);
    e.op(Opcode::Halt);
    e.push_imm(IntType::U8, 7);
    assert_eq!(blank, 0);

    let offsets: Vec<_> = decode_all(e.bytes())
        .unwrap()
        .into_iter()
        .map(|(at, _)| at)
        .collect();
    assert_eq!(offsets, vec![0, 10, 11, 12]);
}

#[test]
fn test_decode_errors() {
    assert_eq!(decode_all(&[0x03]), Err(Error::UnknownOpcode(0x03)));
    // PUSH claiming 8 bytes with only 2 behind it.
    assert_eq!(decode_all(&[0x0c, 0x08, 0xaa, 0xbb]), Err(Error::Truncated));
    // Width 3 does not exist.
    assert_eq!(decode_all(&[0x0d, 0x03]), Err(Error::BadDescriptor(0x03)));
    // Stray flag bit.
    assert_eq!(decode_all(&[0x0d, 0x48]), Err(Error::BadDescriptor(0x48)));
    assert_eq!(decode_all(&[0x22, b'x']), Err(Error::UnterminatedString));
}
