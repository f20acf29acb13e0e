use littlec::decode::{Descriptor, Inst, decode_all};
use littlec::{ErrorKind, Opcode, compile};

fn image(source: &str) -> Vec<u8> {
    compile(source.as_bytes()).unwrap()
}

fn insts(image: &[u8]) -> Vec<(usize, Inst<'_>)> {
    decode_all(image).unwrap()
}

fn err(source: &str) -> (ErrorKind, Option<u32>) {
    let error = compile(source.as_bytes()).unwrap_err();
    (error.kind(), error.line())
}

const fn val(width: u8, signed: bool) -> Descriptor {
    Descriptor {
        width,
        signed,
        address: false,
    }
}

const fn addr(width: u8, signed: bool) -> Descriptor {
    Descriptor {
        width,
        signed,
        address: true,
    }
}

const VOID: Descriptor = val(0, false);
const U8: Descriptor = val(1, false);
const U64: Descriptor = val(8, false);
const I32: Descriptor = val(4, true);

fn push(operand: Descriptor, imm: u64) -> Inst<'static> {
    Inst::Push { operand, imm }
}

#[test]
fn test_empty_main() {
    let image = image("func main()\nend\n");
    // Prologue calls main, halts; main is one synthesized void return.
    assert_eq!(
        insts(&image),
        vec![
            (0, push(U64, 2)),
            (10, Inst::Call),
            (11, Inst::Halt),
            (12, push(U64, 0)),
            (22, Inst::Return(VOID)),
        ]
    );
    // The call distance is main's offset minus the end of the blank push.
    assert_eq!(u64::from_le_bytes(image[2..10].try_into().unwrap()), 2);
}

#[test]
fn test_single_local() {
    let image = image("func main()\n  let x u8\nend\n");
    assert_eq!(
        insts(&image)[3..],
        vec![
            (12, push(U8, 0)),
            (15, Inst::Pop(U8)),
            (17, push(U64, 0)),
            (27, Inst::Return(VOID)),
        ]
    );
}

#[test]
fn test_arithmetic_on_locals() {
    let image = image("func main()\n  let a i32\n  let b i32\n  a = a + b\nend\n");
    assert_eq!(
        insts(&image)[3..],
        vec![
            (12, push(I32, 0)),
            (18, push(I32, 0)),
            // Assignment target address, then both operand addresses.
            (24, push(U64, 0)),
            (34, push(U64, 0)),
            (44, push(U64, 4)),
            (54, Inst::Binary { op: Opcode::Add, lhs: addr(4, true), rhs: addr(4, true) }),
            (57, Inst::Assign { lhs: addr(4, true), rhs: I32 }),
            (60, Inst::Pop(I32)),
            (62, Inst::Pop(I32)),
            (64, push(U64, 0)),
            (74, Inst::Return(VOID)),
        ]
    );
}

#[test]
fn test_while_and_break() {
    let image = image("func main()\n  while u8(1)\n    break\n  end\nend\n");
    assert_eq!(
        insts(&image)[3..],
        vec![
            (12, push(U8, 1)),
            // Loop exit: 49 - (15 + 10).
            (15, push(U64, 24)),
            (25, Inst::Branch(U8)),
            // break lands on the same exit: 49 - (27 + 10).
            (27, push(U64, 12)),
            (37, Inst::Jump),
            // Loop back to the condition: 12 - (38 + 10).
            (38, push(U64, (-36i64) as u64)),
            (48, Inst::Jump),
            (49, push(U64, 0)),
            (59, Inst::Return(VOID)),
        ]
    );
}

#[test]
fn test_continue_targets_loop_start() {
    let image = image("func main()\n  while u8(1)\n    continue\n  end\nend\n");
    // Same layout as the break case, except the reservation resolves
    // backward to the condition: 12 - (27 + 10).
    assert_eq!(insts(&image)[6], (27, push(U64, (-25i64) as u64)));
}

#[test]
fn test_function_call() {
    let image = image(
        "func add(a i32, b i32) i32\n  return a + b\nend\nfunc main()\n  add(i32(1), i32(2))\nend\n",
    );
    assert_eq!(
        insts(&image),
        vec![
            // Prologue; main sits after add: 65 - (0 + 10).
            (0, push(U64, 55)),
            (10, Inst::Call),
            (11, Inst::Halt),
            // add: parameters live below the frame pointer.
            (12, push(U64, (-16i64) as u64)),
            (22, push(U64, (-12i64) as u64)),
            (32, Inst::Binary { op: Opcode::Add, lhs: addr(4, true), rhs: addr(4, true) }),
            // Unwind distance, then the value return.
            (35, push(U64, (-16i64) as u64)),
            (45, Inst::Return(I32)),
            // Synthesized fall-off return of add.
            (47, push(I32, 0)),
            (53, push(U64, (-16i64) as u64)),
            (63, Inst::Return(I32)),
            // main: two literal arguments, call to add: 12 - (77 + 10).
            (65, push(I32, 1)),
            (71, push(I32, 2)),
            (77, push(U64, (-75i64) as u64)),
            (87, Inst::Call),
            // The discarded i32 result.
            (88, Inst::Pop(I32)),
            (90, push(U64, 0)),
            (100, Inst::Return(VOID)),
        ]
    );
}

#[test]
fn test_assignment_type_mismatch() {
    let source = "func main()\n  let x u8\n  x = u16(1)\nend\n";
    assert_eq!(err(source), (ErrorKind::TypeMismatch, Some(3)));
}

#[test]
fn test_argument_loaded_from_address() {
    let image = image(
        "func f(a i32) i32\n  return a\nend\nfunc main()\n  let x i32\n  f(x)\nend\n",
    );
    // f: push the parameter's address, unwind, return it as an address.
    assert_eq!(
        insts(&image)[3..8],
        vec![
            (12, push(U64, (-12i64) as u64)),
            (22, push(U64, (-12i64) as u64)),
            (32, Inst::Return(addr(4, true))),
            // Synthesized fall-off return.
            (34, push(I32, 0)),
            (40, push(U64, (-12i64) as u64)),
        ]
    );
    // main: `x` is an address, so the argument is dereferenced through
    // the zero-add before the call.
    assert_eq!(
        insts(&image)[9..],
        vec![
            (52, push(I32, 0)),
            (58, push(U64, 0)),
            (68, push(I32, 0)),
            (74, Inst::Binary { op: Opcode::Add, lhs: addr(4, true), rhs: I32 }),
            // Call distance: 12 - (77 + 10).
            (77, push(U64, (-75i64) as u64)),
            (87, Inst::Call),
            (88, Inst::Pop(I32)),
            (90, Inst::Pop(I32)),
            (92, push(U64, 0)),
            (102, Inst::Return(VOID)),
        ]
    );
}

#[test]
fn test_if_else_backpatching() {
    let image = image("func main()\n  if u8(1)\n  else\n    let x u8\n  end\nend\n");
    assert_eq!(
        insts(&image)[3..],
        vec![
            (12, push(U8, 1)),
            // Zero branches to the else arm: 38 - (15 + 10).
            (15, push(U64, 13)),
            (25, Inst::Branch(U8)),
            // Then arm jumps past the else: 43 - (27 + 10).
            (27, push(U64, 6)),
            (37, Inst::Jump),
            (38, push(U8, 0)),
            (41, Inst::Pop(U8)),
            (43, push(U64, 0)),
            (53, Inst::Return(VOID)),
        ]
    );
}

#[test]
fn test_logical_and_lowering() {
    let image = image("func main()\n  if u8(1) && u8(0)\n  end\nend\n");
    let insts = insts(&image);
    assert_eq!(
        insts[3..12],
        vec![
            (12, push(U8, 1)),
            // Left zero: 56 - (15 + 10).
            (15, push(U64, 31)),
            (25, Inst::Branch(U8)),
            (27, push(U8, 0)),
            // Right zero: 56 - (30 + 10).
            (30, push(U64, 16)),
            (40, Inst::Branch(U8)),
            (42, push(U8, 1)),
            // Skip the zero push: 59 - (45 + 10).
            (45, push(U64, 4)),
            (55, Inst::Jump),
        ]
    );
    assert_eq!(insts[12], (56, push(U8, 0)));
    // The merged u8 flag feeds the if's branch.
    assert_eq!(insts[14], (69, Inst::Branch(U8)));
}

#[test]
fn test_logical_or_lowering() {
    let image = image("func main()\n  if u8(0) || u8(1)\n  end\nend\n");
    assert_eq!(
        insts(&image)[3..14],
        vec![
            (12, push(U8, 0)),
            // Left zero tries the right operand: 41 - (15 + 10).
            (15, push(U64, 16)),
            (25, Inst::Branch(U8)),
            (27, push(U8, 1)),
            // Over the rest: 70 - (30 + 10).
            (30, push(U64, 30)),
            (40, Inst::Jump),
            (41, push(U8, 1)),
            // Right zero: 67 - (44 + 10).
            (44, push(U64, 13)),
            (54, Inst::Branch(U8)),
            // Nonzero right reuses the one-push: 27 - (56 + 10).
            (56, push(U64, (-39i64) as u64)),
            (66, Inst::Jump),
        ]
    );
}

#[test]
fn test_store_string() {
    let image = image("func main()\n  let s u8\n  s <- \"a\\\"b\\\\c\"\nend\n");
    assert_eq!(
        insts(&image)[3..6],
        vec![
            (12, push(U8, 0)),
            (15, push(U64, 0)),
            (25, Inst::StoreString(br#"a"b\c"#)),
        ]
    );
}

#[test]
fn test_negative_literal_encoding() {
    let image1 = image("func main()\n  let x i8\n  x = i8(-5)\nend\n");
    // Two's complement in one byte.
    assert_eq!(insts(&image1)[5], (25, push(val(1, true), 251)));

    let image2 = image("func main()\n  let x i16\n  x = i16(-1)\nend\n");
    assert_eq!(insts(&image2)[5], (25, push(val(2, true), 0xffff)));
}

#[test]
fn test_char_literal() {
    let image = image("func main()\n  let c u8\n  c = u8('\\'')\nend\n");
    assert_eq!(insts(&image)[5], (25, push(U8, u64::from(b'\''))));
}

#[test]
fn test_convert_from_address() {
    let image = image("func main()\n  let x u8\n  let y u16\n  y = u16(x)\nend\n");
    // x compiles to an address; CONVERT widens it to a u16 value.
    assert_eq!(
        insts(&image)[7],
        (39, Inst::Convert { src: addr(1, false), dst: val(2, false) })
    );
}

#[test]
fn test_shift_takes_any_right_width() {
    let image = image("func main()\n  let x i32\n  x = x << u8(1)\nend\n");
    assert_eq!(
        insts(&image)[7],
        (41, Inst::Binary { op: Opcode::Shl, lhs: addr(4, true), rhs: U8 })
    );
}

#[test]
fn test_relational_produces_u8() {
    // The comparison result feeds a branch as a one-byte unsigned flag.
    let image = image("func main()\n  let a i32\n  if a == a\n  end\nend\n");
    assert_eq!(
        insts(&image)[6],
        (38, Inst::Binary { op: Opcode::Eql, lhs: addr(4, true), rhs: addr(4, true) })
    );
    assert_eq!(insts(&image)[8], (51, Inst::Branch(U8)));
}

#[test]
fn test_no_unresolved_call_placeholder() {
    let image = image(
        "func main()\n  helper()\nend\nfunc helper()\nend\n",
    );
    // Forward call: the prologue push and the call-site push are both
    // patched to nonzero distances.
    let decoded = insts(&image);
    let (_, Inst::Push { imm: to_main, .. }) = &decoded[0] else {
        panic!("prologue must start with a push");
    };
    let (_, Inst::Push { imm: to_helper, .. }) = &decoded[3] else {
        panic!("call site must start with a push");
    };
    assert_ne!(*to_main, 0);
    assert_ne!(*to_helper, 0);
}

#[test]
fn test_shadowing_in_nested_block() {
    // A loop-body block may shadow a parameter; the body local is popped
    // on exit while the parameter survives.
    let source = "func f(x u8)\n  while u8(1)\n    let x u16\n    break\n  end\nend\nfunc main()\nend\n";
    compile(source.as_bytes()).unwrap();
}

#[test]
fn test_break_pops_loop_locals() {
    let image = image(
        "func main()\n  while u8(1)\n    let a u16\n    break\n  end\nend\n",
    );
    // Between declaring `a` and the break's jump there is exactly one
    // u16 pop for the loop-body local.
    let decoded = insts(&image);
    assert_eq!(decoded[6], (27, push(val(2, false), 0)));
    assert_eq!(decoded[7], (31, Inst::Pop(val(2, false))));
    let (_, Inst::Jump) = &decoded[9] else {
        panic!("break must jump after the pops");
    };
    // The compile-time entry survives: the block exit pops it again.
    assert_eq!(decoded[10], (44, Inst::Pop(val(2, false))));
}

#[test]
fn test_signature_errors() {
    assert_eq!(err("func f()\nend\n"), (ErrorKind::NoMain, None));
    assert_eq!(
        err("func main(a u8)\nend\n"),
        (ErrorKind::BadMainSignature, Some(1))
    );
    assert_eq!(
        err("func main() u8\n  return u8(0)\nend\n"),
        (ErrorKind::BadMainSignature, Some(1))
    );
    assert_eq!(
        err("func f()\nend\nfunc f()\nend\nfunc main()\nend\n"),
        (ErrorKind::DuplicateFunction, Some(3))
    );
    assert_eq!(
        err("func f(a u7)\nend\nfunc main()\nend\n"),
        (ErrorKind::InvalidType, Some(1))
    );
}

#[test]
fn test_scope_errors() {
    assert_eq!(
        err("func main()\n  let x u8\n  let x u8\nend\n"),
        (ErrorKind::Redeclaration, Some(3))
    );
    assert_eq!(
        err("func f(x u8)\n  let x u16\nend\nfunc main()\nend\n"),
        (ErrorKind::Redeclaration, Some(2))
    );
    assert_eq!(
        err("func main()\n  x = u8(1)\nend\n"),
        (ErrorKind::UndefinedName, Some(2))
    );
}

#[test]
fn test_call_errors() {
    assert_eq!(
        err("func main()\n  g()\nend\n"),
        (ErrorKind::UnknownFunction, Some(2))
    );
    assert_eq!(
        err("func f(a u8)\nend\nfunc main()\n  f()\nend\n"),
        (ErrorKind::ArgumentCount, Some(4))
    );
    assert_eq!(
        err("func f(a u8)\nend\nfunc main()\n  f(u16(1))\nend\n"),
        (ErrorKind::TypeMismatch, Some(4))
    );
    // A bare literal argument has no type to adopt.
    assert_eq!(
        err("func f(a u8)\nend\nfunc main()\n  f(1)\nend\n"),
        (ErrorKind::TypeMismatch, Some(4))
    );
}

#[test]
fn test_literal_errors() {
    assert_eq!(
        err("func main()\n  let x u8\n  x = u8(256)\nend\n"),
        (ErrorKind::LiteralOutOfRange, Some(3))
    );
    assert_eq!(
        err("func main()\n  let x u8\n  x = u8(12abc)\nend\n"),
        (ErrorKind::LiteralOutOfRange, Some(3))
    );
    assert_eq!(
        err("func main()\n  let x i8\n  x = i8(-129)\nend\n"),
        (ErrorKind::LiteralOutOfRange, Some(3))
    );
    // Char literals only construct u8.
    assert_eq!(
        err("func main()\n  let x u16\n  x = u16('a')\nend\n"),
        (ErrorKind::TypeMismatch, Some(3))
    );
    assert_eq!(
        err("func main()\n  let x u8\n  x = u8('ab')\nend\n"),
        (ErrorKind::InvalidChar, Some(3))
    );
    assert_eq!(
        err("func main()\n  let s u8\n  s <- \"a\\nb\"\nend\n"),
        (ErrorKind::InvalidString, Some(3))
    );
}

#[test]
fn test_return_errors() {
    assert_eq!(
        err("func main()\n  return u8(1)\nend\n"),
        (ErrorKind::TypeMismatch, Some(2))
    );
    assert_eq!(
        err("func f() u8\n  return u16(1)\nend\nfunc main()\nend\n"),
        (ErrorKind::TypeMismatch, Some(2))
    );
}

#[test]
fn test_loop_statement_outside_loop() {
    assert_eq!(
        err("func main()\n  break\nend\n"),
        (ErrorKind::LoopStatementOutsideLoop, Some(2))
    );
    assert_eq!(
        err("func main()\n  if u8(1)\n    continue\n  end\nend\n"),
        (ErrorKind::LoopStatementOutsideLoop, Some(3))
    );
}
