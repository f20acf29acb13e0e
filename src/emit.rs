use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::ErrorKind;
use crate::ty::{DESC_TYPE_MASK, IntType};

/// Instruction opcodes of the companion VM.
///
/// `Ecall`, `Load` and `Store` are allocated for the VM's sake and are
/// understood by the decoder, but the generator never emits them: loads
/// happen through the address-plus-zero `Add` form and stores through
/// `Assign`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    Halt = 0x01,
    Ecall = 0x02,

    Call = 0x04,
    Return = 0x05,

    Jump = 0x08,
    Branch = 0x09,

    Push = 0x0c,
    Pop = 0x0d,
    Assign = 0x0e,

    Load = 0x20,
    Store = 0x21,
    StoreString = 0x22,

    Add = 0x40,
    Sub = 0x41,
    Mul = 0x42,
    Quo = 0x43,
    Rem = 0x44,
    And = 0x45,
    Or = 0x46,
    Xor = 0x47,
    Shl = 0x48,
    Shr = 0x49,

    Eql = 0x50,
    Neq = 0x51,
    Lss = 0x52,
    Gtr = 0x53,
    Leq = 0x54,
    Geq = 0x55,

    Convert = 0x58,
}

impl Opcode {
    /// Shifts are the one binary family whose right operand may have any
    /// width and signedness.
    #[must_use]
    pub fn is_shift(self) -> bool {
        matches!(self, Self::Shl | Self::Shr)
    }

    #[must_use]
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            Self::Eql | Self::Neq | Self::Lss | Self::Gtr | Self::Leq | Self::Geq
        )
    }

    /// Whether this opcode is followed by two operand descriptors.
    #[must_use]
    pub fn is_binary(self) -> bool {
        matches!(u8::from(self), 0x40..=0x49 | 0x50..=0x55)
    }
}

/// The shape an expression result presents to an instruction: a typed
/// value, an 8-byte address of a typed slot, or nothing at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Value(IntType),
    Address(IntType),
    Void,
}

impl Shape {
    /// The one-byte operand descriptor. Void is the width-0 unsigned
    /// descriptor, legal only on `RETURN`.
    #[must_use]
    pub fn descriptor(self) -> u8 {
        match self {
            Self::Value(ty) => ty.descriptor(false),
            Self::Address(ty) => ty.descriptor(true),
            Self::Void => 0,
        }
    }

    /// The integer type an instruction sees after any implicit
    /// dereference.
    #[must_use]
    pub fn value_type(self) -> Option<IntType> {
        match self {
            Self::Value(ty) | Self::Address(ty) => Some(ty),
            Self::Void => None,
        }
    }
}

/// Every control transfer pops its 8-byte distance from a `PUSH` of this
/// exact length; all backpatch arithmetic leans on it.
pub const BLANK_PUSH_LEN: usize = 10;

/// Append-only bytecode buffer.
///
/// Jump and call targets are reserved with [`Emitter::blank_push`] and
/// resolved later with [`Emitter::patch_to`]; a patch only ever rewrites
/// the eight immediate bytes of a blank push, never opcodes or
/// descriptors.
#[derive(Debug, Default)]
pub struct Emitter {
    buf: Vec<u8>,
}

impl Emitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte offset the next instruction will land on.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.buf.len()
    }

    pub fn op(&mut self, op: Opcode) {
        self.buf.push(op.into());
    }

    /// `PUSH` of an immediate: opcode, value descriptor, then the low
    /// `width` bytes of the immediate, little endian.
    pub fn push_imm(&mut self, ty: IntType, imm: u64) {
        self.op(Opcode::Push);
        self.buf.push(ty.descriptor(false));
        self.buf
            .extend_from_slice(&imm.to_le_bytes()[..usize::from(ty.width)]);
    }

    /// Push a control-transfer distance aimed at an already-known
    /// (backward) target. The distance is measured from the end of this
    /// push.
    pub fn push_distance(&mut self, target: usize) {
        let from = self.offset() + BLANK_PUSH_LEN;
        self.push_imm(IntType::U64, (target as u64).wrapping_sub(from as u64));
    }

    /// Reserve a distance slot for a target that is not known yet.
    /// Returns the offset of the reservation for `patch_to`.
    pub fn blank_push(&mut self) -> usize {
        let at = self.offset();
        self.push_imm(IntType::U64, 0);
        at
    }

    /// Resolve a reservation: store `target − (blank + 10)` as a wrapping
    /// unsigned 64-bit little-endian immediate.
    pub fn patch_to(&mut self, blank: usize, target: usize) {
        let distance = (target as u64).wrapping_sub((blank + BLANK_PUSH_LEN) as u64);
        self.buf[blank + 2..blank + BLANK_PUSH_LEN].copy_from_slice(&distance.to_le_bytes());
    }

    /// Resolve a reservation to the current offset.
    pub fn patch_here(&mut self, blank: usize) {
        let target = self.offset();
        self.patch_to(blank, target);
    }

    pub fn pop(&mut self, shape: Shape) {
        self.op(Opcode::Pop);
        self.buf.push(shape.descriptor());
    }

    /// A binary instruction with its two operand descriptors. Both
    /// operands must agree on width and signedness unless the opcode is a
    /// shift. Relationals produce `u8`; everything else produces the left
    /// operand's value type.
    pub fn binary(&mut self, op: Opcode, lhs: Shape, rhs: Shape) -> Result<IntType, ErrorKind> {
        let lhs_ty = lhs.value_type().ok_or(ErrorKind::TypeMismatch)?;
        rhs.value_type().ok_or(ErrorKind::TypeMismatch)?;
        let (ld, rd) = (lhs.descriptor(), rhs.descriptor());
        if !op.is_shift() && (ld & DESC_TYPE_MASK) != (rd & DESC_TYPE_MASK) {
            return Err(ErrorKind::TypeMismatch);
        }
        self.op(op);
        self.buf.push(ld);
        self.buf.push(rd);
        Ok(if op.is_relational() { IntType::U8 } else { lhs_ty })
    }

    /// `ASSIGN`: the left operand must be an address, the right a value or
    /// address of the same width and signedness.
    pub fn assign(&mut self, lhs: Shape, rhs: Shape) -> Result<(), ErrorKind> {
        let Shape::Address(_) = lhs else {
            return Err(ErrorKind::TypeMismatch);
        };
        rhs.value_type().ok_or(ErrorKind::TypeMismatch)?;
        let (ld, rd) = (lhs.descriptor(), rhs.descriptor());
        if (ld & DESC_TYPE_MASK) != (rd & DESC_TYPE_MASK) {
            return Err(ErrorKind::TypeMismatch);
        }
        self.op(Opcode::Assign);
        self.buf.push(ld);
        self.buf.push(rd);
        Ok(())
    }

    /// `BRANCH`: pops a distance, then a value of the described shape, and
    /// takes the jump when the value is zero.
    pub fn branch(&mut self, condition: Shape) -> Result<(), ErrorKind> {
        condition.value_type().ok_or(ErrorKind::TypeMismatch)?;
        self.op(Opcode::Branch);
        self.buf.push(condition.descriptor());
        Ok(())
    }

    /// `RETURN` with the shape of the returned operand (void included).
    pub fn ret(&mut self, shape: Shape) {
        self.op(Opcode::Return);
        self.buf.push(shape.descriptor());
    }

    /// `CONVERT` from the source operand's shape to a value of `dst`.
    pub fn convert(&mut self, src: Shape, dst: IntType) -> Result<(), ErrorKind> {
        src.value_type().ok_or(ErrorKind::TypeMismatch)?;
        self.op(Opcode::Convert);
        self.buf.push(src.descriptor());
        self.buf.push(dst.descriptor(false));
        Ok(())
    }

    /// `STORE_STRING`: the operand on the stack must be an address; the
    /// unescaped bytes follow the opcode inline, zero-terminated.
    pub fn store_string(&mut self, addr: Shape, bytes: &[u8]) -> Result<(), ErrorKind> {
        let Shape::Address(_) = addr else {
            return Err(ErrorKind::TypeMismatch);
        };
        self.op(Opcode::StoreString);
        self.buf.extend_from_slice(bytes);
        self.buf.push(0);
        Ok(())
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
const I32: IntType = IntType { signed: true, width: 4 };

#[test]
fn test_push_encoding() {
    let mut e = Emitter::new();
    e.push_imm(IntType::U8, 0x7f);
    assert_eq!(e.bytes(), [0x0c, 0x01, 0x7f]);

    let mut e = Emitter::new();
    e.push_imm(I32, 0x0102_0304);
    assert_eq!(e.bytes(), [0x0c, 0x14, 0x04, 0x03, 0x02, 0x01]);
}

#[test]
fn test_blank_push_and_patch() {
    let mut e = Emitter::new();
    e.op(Opcode::Halt);
    let blank = e.blank_push();
    assert_eq!(e.offset() - blank, BLANK_PUSH_LEN);
    e.op(Opcode::Jump);

    e.patch_to(blank, 100);
    // distance = 100 - (1 + 10)
    let mut expected = vec![0x01, 0x0c, 0x08];
    expected.extend_from_slice(&89u64.to_le_bytes());
    expected.push(0x08);
    assert_eq!(e.bytes(), expected);

    // Backward target wraps.
    e.patch_to(blank, 0);
    assert_eq!(&e.bytes()[blank + 2..blank + 10], &(-11i64).to_le_bytes());
}

#[test]
fn test_binary_type_rules() {
    let mut e = Emitter::new();
    let ty = e
        .binary(Opcode::Add, Shape::Address(I32), Shape::Value(I32))
        .unwrap();
    assert_eq!(ty, I32);
    assert_eq!(e.bytes(), [0x40, 0x34, 0x14]);

    assert_eq!(
        Emitter::new().binary(Opcode::Add, Shape::Value(I32), Shape::Value(IntType::U8)),
        Err(ErrorKind::TypeMismatch)
    );
    assert_eq!(
        Emitter::new().binary(Opcode::Sub, Shape::Value(I32), Shape::Void),
        Err(ErrorKind::TypeMismatch)
    );

    // Shifts take any right operand.
    let ty = Emitter::new()
        .binary(Opcode::Shl, Shape::Value(I32), Shape::Value(IntType::U8))
        .unwrap();
    assert_eq!(ty, I32);

    // Relationals produce a one-byte unsigned flag.
    let ty = Emitter::new()
        .binary(Opcode::Lss, Shape::Value(I32), Shape::Address(I32))
        .unwrap();
    assert_eq!(ty, IntType::U8);
}

#[test]
fn test_assign_rules() {
    let mut e = Emitter::new();
    e.assign(Shape::Address(I32), Shape::Value(I32)).unwrap();
    assert_eq!(e.bytes(), [0x0e, 0x34, 0x14]);

    assert_eq!(
        Emitter::new().assign(Shape::Value(I32), Shape::Value(I32)),
        Err(ErrorKind::TypeMismatch)
    );
    assert_eq!(
        Emitter::new().assign(Shape::Address(IntType::U8), Shape::Value(I32)),
        Err(ErrorKind::TypeMismatch)
    );
}

#[test]
fn test_store_string_encoding() {
    let mut e = Emitter::new();
    e.store_string(Shape::Address(IntType::U8), b"hi").unwrap();
    assert_eq!(e.bytes(), [0x22, b'h', b'i', 0x00]);

    assert_eq!(
        Emitter::new().store_string(Shape::Value(IntType::U8), b"hi"),
        Err(ErrorKind::TypeMismatch)
    );
}

#[test]
fn test_void_descriptor() {
    let mut e = Emitter::new();
    e.ret(Shape::Void);
    assert_eq!(e.bytes(), [0x05, 0x00]);
}
