use crate::emit::Shape;
use crate::error::ErrorKind;
use crate::ty::IntType;

/// Parameters and function-entry metadata live at this block level; the
/// function body is one level deeper.
pub const START_BLOCK_LEVEL: u32 = 1;

/// One slot of the compile-time stack mirror.
///
/// The sequence of entries matches, byte for byte, what the VM's operand
/// stack holds at the current program point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEntry {
    /// An anonymous temporary of the given type.
    Value(IntType),
    /// A named local variable storage slot.
    Local {
        name: String,
        ty: IntType,
        block_level: u32,
    },
    /// An 8-byte stack-relative address pointing at a slot of the given
    /// target type.
    Address(IntType),
    /// Saved caller frame pointer.
    SavedFp,
    /// Return address.
    ReturnAddr,
    /// Zero-width marker for the result of a void call.
    Void,
}

impl FrameEntry {
    #[must_use]
    pub fn byte_width(&self) -> i64 {
        match self {
            Self::Value(ty) | Self::Local { ty, .. } => i64::from(ty.width),
            Self::Address(_) | Self::SavedFp | Self::ReturnAddr => 8,
            Self::Void => 0,
        }
    }

    /// The operand shape this entry presents to an instruction, if it is
    /// an expression result at all.
    #[must_use]
    pub fn shape(&self) -> Option<Shape> {
        match self {
            Self::Value(ty) => Some(Shape::Value(*ty)),
            Self::Address(ty) => Some(Shape::Address(*ty)),
            Self::Void => Some(Shape::Void),
            Self::Local { .. } | Self::SavedFp | Self::ReturnAddr => None,
        }
    }
}

/// Compile-time model of one function's stack frame.
///
/// Reset at the start of every function body. The frame pointer is the
/// total byte width at the moment the metadata pair is pushed, so locals
/// declared in the body get offsets starting at zero and parameters get
/// negative offsets.
#[derive(Debug)]
pub struct Frame {
    entries: Vec<FrameEntry>,
    frame_pointer: i64,
    block_level: u32,
}

impl Frame {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            frame_pointer: 0,
            block_level: START_BLOCK_LEVEL,
        }
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.frame_pointer = 0;
        self.block_level = START_BLOCK_LEVEL;
    }

    /// Push the saved-FP / return-address pair and fix the frame pointer.
    /// Called exactly once per function, after its parameters.
    pub fn init_frame(&mut self) {
        self.entries.push(FrameEntry::SavedFp);
        self.entries.push(FrameEntry::ReturnAddr);
        self.frame_pointer = self.total_width();
    }

    #[must_use]
    pub fn frame_pointer(&self) -> i64 {
        self.frame_pointer
    }

    #[must_use]
    pub fn block_level(&self) -> u32 {
        self.block_level
    }

    #[must_use]
    pub fn total_width(&self) -> i64 {
        self.entries.iter().map(FrameEntry::byte_width).sum()
    }

    pub fn push(&mut self, entry: FrameEntry) {
        self.entries.push(entry);
    }

    pub fn pop(&mut self) -> Option<FrameEntry> {
        self.entries.pop()
    }

    #[must_use]
    pub fn top(&self) -> Option<&FrameEntry> {
        self.entries.last()
    }

    /// Declare a local at the current block level.
    ///
    /// Redeclaring a name visible at the same level is rejected, as is
    /// shadowing a parameter from the function body's outermost level;
    /// deeper blocks may shadow freely.
    pub fn declare(&mut self, name: &str, ty: IntType) -> Result<(), ErrorKind> {
        if let Some((_, level)) = self.find_local(name) {
            if level == self.block_level
                || (level == START_BLOCK_LEVEL && self.block_level == START_BLOCK_LEVEL + 1)
            {
                return Err(ErrorKind::Redeclaration);
            }
        }
        self.entries.push(FrameEntry::Local {
            name: name.to_owned(),
            ty,
            block_level: self.block_level,
        });
        Ok(())
    }

    /// Most recent local with this name, with the level it was declared at.
    #[must_use]
    pub fn find_local(&self, name: &str) -> Option<(IntType, u32)> {
        self.entries.iter().rev().find_map(|entry| match entry {
            FrameEntry::Local {
                name: n,
                ty,
                block_level,
            } if n == name => Some((*ty, *block_level)),
            _ => None,
        })
    }

    /// Frame-pointer-relative byte offset of the named local's slot:
    /// the total width of everything pushed before it, minus the frame
    /// pointer. Negative for parameters.
    #[must_use]
    pub fn address_of(&self, name: &str) -> Option<i64> {
        let mut below = 0i64;
        let mut found = None;
        for entry in &self.entries {
            if let FrameEntry::Local { name: n, .. } = entry {
                if n == name {
                    found = Some(below);
                }
            }
            below += entry.byte_width();
        }
        found.map(|below| below - self.frame_pointer)
    }

    pub fn enter_block(&mut self) {
        self.block_level += 1;
    }

    /// Leave the current block: drop every local declared inside it and
    /// return their types, top first, so the caller can emit the matching
    /// runtime pops.
    pub fn exit_block(&mut self) -> Vec<IntType> {
        self.block_level -= 1;
        let mut dropped = Vec::new();
        while let Some(FrameEntry::Local { block_level, ty, .. }) = self.entries.last() {
            if *block_level <= self.block_level {
                break;
            }
            dropped.push(*ty);
            self.entries.pop();
        }
        dropped
    }

    /// Types of the locals sitting above the given block level, top first,
    /// without removing them. `break` and `continue` pop these at runtime
    /// while the compile-time view stays intact for the rest of the block.
    #[must_use]
    pub fn locals_above(&self, level: u32) -> Vec<IntType> {
        let mut types = Vec::new();
        for entry in self.entries.iter().rev() {
            match entry {
                FrameEntry::Local { block_level, ty, .. } if *block_level > level => {
                    types.push(*ty);
                }
                _ => break,
            }
        }
        types
    }

    /// After a function body is fully compiled only parameters and the
    /// metadata pair may remain; anything else means an unbalanced
    /// statement handler.
    #[must_use]
    pub fn balanced(&self) -> bool {
        self.entries.iter().all(|entry| match entry {
            FrameEntry::Local { block_level, .. } => *block_level == START_BLOCK_LEVEL,
            FrameEntry::SavedFp | FrameEntry::ReturnAddr => true,
            FrameEntry::Value(_) | FrameEntry::Address(_) | FrameEntry::Void => false,
        })
    }
}

#[cfg(test)]
use crate::ty::IntType as T;

#[cfg(test)]
const I32: T = T { signed: true, width: 4 };

#[test]
fn test_frame_pointer_and_addresses() {
    let mut frame = Frame::new();
    frame.declare("p", T::U8).unwrap();
    frame.init_frame();
    assert_eq!(frame.frame_pointer(), 17);
    assert_eq!(frame.address_of("p"), Some(-17));

    frame.enter_block();
    frame.declare("a", I32).unwrap();
    frame.declare("b", I32).unwrap();
    assert_eq!(frame.address_of("a"), Some(0));
    assert_eq!(frame.address_of("b"), Some(4));

    // Temporaries above a local do not move its slot.
    frame.push(FrameEntry::Value(T::U64));
    assert_eq!(frame.address_of("a"), Some(0));
}

#[test]
fn test_shadowing_and_redeclaration() {
    let mut frame = Frame::new();
    frame.declare("x", T::U8).unwrap();
    frame.init_frame();

    frame.enter_block();
    // Body level may not shadow a parameter.
    assert_eq!(frame.declare("x", I32), Err(ErrorKind::Redeclaration));
    frame.declare("y", I32).unwrap();
    assert_eq!(frame.declare("y", I32), Err(ErrorKind::Redeclaration));

    // A deeper block shadows both.
    frame.enter_block();
    frame.declare("x", I32).unwrap();
    frame.declare("y", T::U8).unwrap();
    assert_eq!(frame.find_local("x"), Some((I32, 3)));
    assert_eq!(frame.find_local("y"), Some((T::U8, 3)));

    let dropped = frame.exit_block();
    assert_eq!(dropped, vec![T::U8, I32]);
    assert_eq!(frame.find_local("x"), Some((T::U8, 1)));
    assert_eq!(frame.find_local("y"), Some((I32, 2)));
}

#[test]
fn test_locals_above_for_break() {
    let mut frame = Frame::new();
    frame.init_frame();
    frame.enter_block();
    frame.declare("outer", I32).unwrap();
    frame.enter_block();
    frame.declare("a", T::U8).unwrap();
    frame.declare("b", T::U64).unwrap();

    assert_eq!(frame.locals_above(2), vec![T::U64, T::U8]);
    // The compile-time view is untouched.
    assert_eq!(frame.find_local("a"), Some((T::U8, 3)));
    assert_eq!(frame.locals_above(3), Vec::new());
}

#[test]
fn test_balanced() {
    let mut frame = Frame::new();
    frame.declare("p", T::U8).unwrap();
    frame.init_frame();
    assert!(frame.balanced());

    frame.push(FrameEntry::Value(T::U8));
    assert!(!frame.balanced());
    frame.pop();
    assert!(frame.balanced());
}
