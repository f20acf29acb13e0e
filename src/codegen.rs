use std::collections::HashMap;

use crate::ast::{Node, NodeKind};
use crate::emit::{Emitter, Opcode, Shape};
use crate::error::{CompileError, ErrorKind};
use crate::frame::{Frame, FrameEntry};
use crate::lex::TokenKind;
use crate::ty::IntType;

/// Compile the syntax tree into an executable bytecode image.
///
/// The image starts with the program prologue (a call to `main` followed
/// by `HALT`), then every function's code in source order. Call targets
/// are resolved after all bodies are emitted, so functions may call
/// forward freely.
pub fn generate(root: &Node) -> Result<Vec<u8>, CompileError> {
    let mut compiler = Compiler::new();
    compiler.collect_signatures(root)?;

    let blank = compiler.emit.blank_push();
    compiler.pending_calls.push(("main".to_owned(), blank));
    compiler.emit.op(Opcode::Call);
    compiler.emit.op(Opcode::Halt);

    for list in &root.children {
        for func in &list.children {
            compiler.func(func)?;
        }
    }
    compiler.resolve_calls()?;
    Ok(compiler.emit.into_bytes())
}

struct FuncSig {
    params: Vec<IntType>,
    /// `None` is a void function.
    ret: Option<IntType>,
}

/// Jump reservations of one enclosing `while`. `break` and `continue`
/// always target the innermost loop.
struct Loop {
    start: usize,
    /// Block level of the statement list the `while` itself sits in;
    /// locals declared deeper belong to the loop body and are popped
    /// before jumping out.
    block_level: u32,
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

struct Compiler {
    emit: Emitter,
    frame: Frame,
    signatures: HashMap<String, FuncSig>,
    func_offsets: HashMap<String, usize>,
    pending_calls: Vec<(String, usize)>,
    loops: Vec<Loop>,
    return_type: Option<IntType>,
}

impl Compiler {
    fn new() -> Self {
        Self {
            emit: Emitter::new(),
            frame: Frame::new(),
            signatures: HashMap::new(),
            func_offsets: HashMap::new(),
            pending_calls: Vec::new(),
            loops: Vec::new(),
            return_type: None,
        }
    }

    /// Pre-pass: register every function's signature before compiling any
    /// body, then verify `main` exists and takes nothing, returns nothing.
    fn collect_signatures(&mut self, root: &Node) -> Result<(), CompileError> {
        let mut main_line = None;
        for list in &root.children {
            for func in &list.children {
                let ident = &func.children[0];
                let sig = &func.children[1];

                let mut params = Vec::new();
                for param in &sig.children[0].children {
                    let ty_tok = &param.children[1].token;
                    params.push(IntType::from_name(&ty_tok.text).map_err(|k| k.at(ty_tok.line))?);
                }
                let ret = match sig.children.get(1) {
                    Some(node) => {
                        Some(IntType::from_name(&node.token.text).map_err(|k| k.at(node.line()))?)
                    }
                    None => None,
                };

                let name = ident.token.text.clone();
                if name == "main" {
                    main_line = Some(ident.line());
                }
                if self
                    .signatures
                    .insert(name, FuncSig { params, ret })
                    .is_some()
                {
                    return Err(ErrorKind::DuplicateFunction.at(ident.line()));
                }
            }
        }

        let Some(main) = self.signatures.get("main") else {
            return Err(ErrorKind::NoMain.into());
        };
        if !main.params.is_empty() || main.ret.is_some() {
            return Err(match main_line {
                Some(line) => ErrorKind::BadMainSignature.at(line),
                None => ErrorKind::BadMainSignature.into(),
            });
        }
        Ok(())
    }

    fn func(&mut self, node: &Node) -> Result<(), CompileError> {
        let ident = &node.children[0];
        let sig = &node.children[1];
        let body = &node.children[2];

        self.frame.reset();
        self.return_type = None;
        self.func_offsets
            .insert(ident.token.text.clone(), self.emit.offset());

        for param in &sig.children[0].children {
            let name_tok = &param.children[0].token;
            let ty_tok = &param.children[1].token;
            let ty = IntType::from_name(&ty_tok.text).map_err(|k| k.at(ty_tok.line))?;
            self.frame
                .declare(&name_tok.text, ty)
                .map_err(|k| k.at(name_tok.line))?;
        }
        if let Some(ret) = sig.children.get(1) {
            self.return_type = Some(IntType::from_name(&ret.token.text).map_err(|k| k.at(ret.line()))?);
        }
        self.frame.init_frame();

        self.stmt_list(body)?;
        // Falling off the end returns a zero of the declared shape.
        self.empty_return();

        if !self.frame.balanced() {
            return Err(ErrorKind::InternalInvariant.into());
        }
        Ok(())
    }

    fn stmt_list(&mut self, node: &Node) -> Result<(), CompileError> {
        self.frame.enter_block();
        for stmt in &node.children {
            self.stmt(stmt)?;
        }
        for ty in self.frame.exit_block() {
            self.emit.pop(Shape::Value(ty));
        }
        Ok(())
    }

    fn stmt(&mut self, node: &Node) -> Result<(), CompileError> {
        match node.kind {
            NodeKind::StmtDecl => self.decl(node),
            NodeKind::StmtExpr => {
                self.expr(&node.children[0])?;
                self.discard_top()
            }
            NodeKind::StmtAssign => self.assign(node),
            NodeKind::StmtStoreString => self.store_string(node),
            NodeKind::StmtWhile => self.while_stmt(node),
            NodeKind::StmtIf => self.if_stmt(node),
            NodeKind::StmtReturn => self.return_stmt(node),
            NodeKind::StmtBreak => self.loop_jump(node, true),
            NodeKind::StmtContinue => self.loop_jump(node, false),

            NodeKind::Root
            | NodeKind::FuncList
            | NodeKind::Func
            | NodeKind::FuncIdent
            | NodeKind::FuncSig
            | NodeKind::FuncParamList
            | NodeKind::FuncParam
            | NodeKind::FuncReturnType
            | NodeKind::Ident
            | NodeKind::TypeName
            | NodeKind::StmtList
            | NodeKind::StmtString
            | NodeKind::StmtElse
            | NodeKind::Expr
            | NodeKind::ExprIdent
            | NodeKind::ExprCall
            | NodeKind::ExprCallArgList
            | NodeKind::ExprCallArg
            | NodeKind::ExprIntLit
            | NodeKind::ExprNegIntLit
            | NodeKind::ExprChar
            | NodeKind::ExprBinary => Err(ErrorKind::InternalInvariant.at(node.line())),
        }
    }

    fn decl(&mut self, node: &Node) -> Result<(), CompileError> {
        let name_tok = &node.children[0].token;
        let ty_tok = &node.children[1].token;
        let ty = IntType::from_name(&ty_tok.text).map_err(|k| k.at(ty_tok.line))?;
        self.emit.push_imm(ty, 0);
        self.frame
            .declare(&name_tok.text, ty)
            .map_err(|k| k.at(name_tok.line))
    }

    /// Drop the result of an expression statement: a value is popped at
    /// its own width, an address at the 8-byte address width, a void
    /// result left nothing on the stack.
    fn discard_top(&mut self) -> Result<(), CompileError> {
        match self.pop_shape()? {
            Shape::Value(ty) => self.emit.pop(Shape::Value(ty)),
            Shape::Address(_) => self.emit.pop(Shape::Value(IntType::U64)),
            Shape::Void => {}
        }
        Ok(())
    }

    fn assign(&mut self, node: &Node) -> Result<(), CompileError> {
        self.expr(&node.children[0])?;
        self.expr(&node.children[1])?;
        let rhs = self.pop_shape()?;
        let lhs = self.pop_shape()?;
        self.emit.assign(lhs, rhs).map_err(|k| k.at(node.line()))
    }

    fn store_string(&mut self, node: &Node) -> Result<(), CompileError> {
        self.expr(&node.children[0])?;
        let lit = &node.children[1].token;
        let bytes = unescape_string(&lit.text).map_err(|k| k.at(lit.line))?;
        let addr = self.pop_shape()?;
        self.emit
            .store_string(addr, &bytes)
            .map_err(|k| k.at(node.line()))
    }

    fn if_stmt(&mut self, node: &Node) -> Result<(), CompileError> {
        self.expr(&node.children[0])?;
        let cond = self.pop_shape()?;
        let skip = self.emit.blank_push();
        self.emit.branch(cond).map_err(|k| k.at(node.line()))?;

        self.stmt_list(&node.children[1])?;

        if let Some(else_node) = node.children.get(2) {
            let past_else = self.emit.blank_push();
            self.emit.op(Opcode::Jump);
            self.emit.patch_here(skip);
            let inner = &else_node.children[0];
            match inner.kind {
                NodeKind::StmtList => self.stmt_list(inner)?,
                _ => self.stmt(inner)?,
            }
            self.emit.patch_here(past_else);
        } else {
            self.emit.patch_here(skip);
        }
        Ok(())
    }

    fn while_stmt(&mut self, node: &Node) -> Result<(), CompileError> {
        let start = self.emit.offset();
        self.loops.push(Loop {
            start,
            block_level: self.frame.block_level(),
            breaks: Vec::new(),
            continues: Vec::new(),
        });

        self.expr(&node.children[0])?;
        let cond = self.pop_shape()?;
        let exit = self.emit.blank_push();
        self.emit.branch(cond).map_err(|k| k.at(node.line()))?;

        self.stmt_list(&node.children[1])?;

        self.emit.push_distance(start);
        self.emit.op(Opcode::Jump);

        let end = self.emit.offset();
        self.emit.patch_to(exit, end);
        let sealed = self
            .loops
            .pop()
            .ok_or_else(|| CompileError::from(ErrorKind::InternalInvariant))?;
        for blank in sealed.breaks {
            self.emit.patch_to(blank, end);
        }
        for blank in sealed.continues {
            self.emit.patch_to(blank, sealed.start);
        }
        Ok(())
    }

    /// `break` / `continue`: pop the loop body's locals at runtime (the
    /// compile-time entries stay, the rest of the body still sees them),
    /// then jump to a target the enclosing `while` will resolve.
    fn loop_jump(&mut self, node: &Node, is_break: bool) -> Result<(), CompileError> {
        let Some(level) = self.loops.last().map(|l| l.block_level) else {
            return Err(ErrorKind::LoopStatementOutsideLoop.at(node.line()));
        };
        for ty in self.frame.locals_above(level) {
            self.emit.pop(Shape::Value(ty));
        }
        let blank = self.emit.blank_push();
        self.emit.op(Opcode::Jump);

        let current = self
            .loops
            .last_mut()
            .ok_or_else(|| CompileError::from(ErrorKind::InternalInvariant))?;
        if is_break {
            current.breaks.push(blank);
        } else {
            current.continues.push(blank);
        }
        Ok(())
    }

    fn return_stmt(&mut self, node: &Node) -> Result<(), CompileError> {
        let Some(expr_node) = node.children.first() else {
            self.empty_return();
            return Ok(());
        };
        self.expr(expr_node)?;
        let shape = self.pop_shape()?;
        if shape.value_type() != self.return_type {
            return Err(ErrorKind::TypeMismatch.at(node.line()));
        }
        match shape {
            Shape::Void => {
                self.emit.push_imm(IntType::U64, 0);
                self.emit.ret(Shape::Void);
            }
            _ => {
                self.push_unwind_distance();
                self.emit.ret(shape);
            }
        }
        Ok(())
    }

    /// The lowering of a `return` with no expression, also appended at
    /// the end of every body: void functions push a zero distance, value
    /// functions synthesize a zero return value first.
    fn empty_return(&mut self) {
        match self.return_type {
            None => {
                self.emit.push_imm(IntType::U64, 0);
                self.emit.ret(Shape::Void);
            }
            Some(ty) => {
                self.emit.push_imm(ty, 0);
                self.push_unwind_distance();
                self.emit.ret(Shape::Value(ty));
            }
        }
    }

    /// The VM unwinds a frame by the negated frame pointer: everything
    /// from the parameters up is discarded before the return value is put
    /// back.
    fn push_unwind_distance(&mut self) {
        let distance = (self.frame.frame_pointer() as u64).wrapping_neg();
        self.emit.push_imm(IntType::U64, distance);
    }

    fn expr(&mut self, node: &Node) -> Result<(), CompileError> {
        match node.kind {
            NodeKind::Expr => self.expr(&node.children[0]),
            NodeKind::ExprIdent => self.var_ref(node),
            NodeKind::ExprCall => self.call(node),
            NodeKind::ExprBinary => self.binary(node),

            NodeKind::Root
            | NodeKind::FuncList
            | NodeKind::Func
            | NodeKind::FuncIdent
            | NodeKind::FuncSig
            | NodeKind::FuncParamList
            | NodeKind::FuncParam
            | NodeKind::FuncReturnType
            | NodeKind::Ident
            | NodeKind::TypeName
            | NodeKind::StmtList
            | NodeKind::StmtDecl
            | NodeKind::StmtExpr
            | NodeKind::StmtAssign
            | NodeKind::StmtStoreString
            | NodeKind::StmtString
            | NodeKind::StmtWhile
            | NodeKind::StmtIf
            | NodeKind::StmtElse
            | NodeKind::StmtReturn
            | NodeKind::StmtBreak
            | NodeKind::StmtContinue
            | NodeKind::ExprCallArgList
            | NodeKind::ExprCallArg
            | NodeKind::ExprIntLit
            | NodeKind::ExprNegIntLit
            | NodeKind::ExprChar => Err(ErrorKind::InternalInvariant.at(node.line())),
        }
    }

    /// A variable reference pushes the local's frame-relative address; the
    /// instructions that consume it dereference through the descriptor's
    /// address flag.
    fn var_ref(&mut self, node: &Node) -> Result<(), CompileError> {
        let name = &node.token.text;
        let Some((ty, _)) = self.frame.find_local(name) else {
            return Err(ErrorKind::UndefinedName.at(node.line()));
        };
        let Some(offset) = self.frame.address_of(name) else {
            return Err(ErrorKind::InternalInvariant.at(node.line()));
        };
        self.emit.push_imm(IntType::U64, offset as u64);
        self.frame.push(FrameEntry::Address(ty));
        Ok(())
    }

    /// A call-shaped expression is a cast or literal constructor when the
    /// callee names an integer type, a user call otherwise.
    fn call(&mut self, node: &Node) -> Result<(), CompileError> {
        match IntType::from_name(&node.token.text) {
            Ok(target) => self.cast(node, target),
            Err(_) => self.user_call(node),
        }
    }

    fn cast(&mut self, node: &Node, target: IntType) -> Result<(), CompileError> {
        let args = &node.children[0].children;
        let [arg] = args.as_slice() else {
            return Err(ErrorKind::ArgumentCount.at(node.line()));
        };
        let child = &arg.children[0];
        let line = child.line();
        match child.kind {
            NodeKind::ExprChar => {
                let value = unescape_char(&child.token.text).map_err(|k| k.at(line))?;
                if target != IntType::U8 {
                    return Err(ErrorKind::TypeMismatch.at(line));
                }
                self.emit.push_imm(target, u64::from(value));
            }
            NodeKind::ExprIntLit => {
                let value: u64 = child
                    .token
                    .text
                    .parse()
                    .map_err(|_| ErrorKind::LiteralOutOfRange.at(line))?;
                if !target.fits_unsigned(value) {
                    return Err(ErrorKind::LiteralOutOfRange.at(line));
                }
                self.emit.push_imm(target, value);
            }
            NodeKind::ExprNegIntLit => {
                let magnitude: u64 = child
                    .token
                    .text
                    .parse()
                    .map_err(|_| ErrorKind::LiteralOutOfRange.at(line))?;
                if !target.fits_negative(magnitude) {
                    return Err(ErrorKind::LiteralOutOfRange.at(line));
                }
                self.emit.push_imm(target, magnitude.wrapping_neg());
            }
            _ => {
                // A general expression converts at runtime.
                self.expr(child)?;
                let src = self.pop_shape()?;
                self.emit.convert(src, target).map_err(|k| k.at(line))?;
            }
        }
        self.frame.push(FrameEntry::Value(target));
        Ok(())
    }

    fn user_call(&mut self, node: &Node) -> Result<(), CompileError> {
        let name = &node.token.text;
        let Some(sig) = self.signatures.get(name) else {
            return Err(ErrorKind::UnknownFunction.at(node.line()));
        };
        let params = sig.params.clone();
        let ret = sig.ret;

        let args = &node.children[0].children;
        if args.len() != params.len() {
            return Err(ErrorKind::ArgumentCount.at(node.line()));
        }
        for (arg, &param_ty) in args.iter().zip(&params) {
            let child = &arg.children[0];
            if child.kind != NodeKind::Expr {
                // A bare literal has no type of its own to offer.
                return Err(ErrorKind::TypeMismatch.at(child.line()));
            }
            self.expr(child)?;
            self.load_top()?;
            let passed = self.top_shape()?;
            if passed.value_type() != Some(param_ty) {
                return Err(ErrorKind::TypeMismatch.at(child.line()));
            }
        }

        let blank = self.emit.blank_push();
        self.pending_calls.push((name.clone(), blank));
        self.emit.op(Opcode::Call);

        for _ in 0..params.len() {
            self.pop_shape()?;
        }
        self.frame.push(match ret {
            Some(ty) => FrameEntry::Value(ty),
            None => FrameEntry::Void,
        });
        Ok(())
    }

    /// Arguments are passed by value. An address result is loaded through
    /// the VM's address-plus-zero addition, which dereferences and leaves
    /// the slot's value.
    fn load_top(&mut self) -> Result<(), CompileError> {
        let shape = self.pop_shape()?;
        match shape {
            Shape::Address(ty) => {
                self.emit.push_imm(ty, 0);
                self.emit
                    .binary(Opcode::Add, Shape::Address(ty), Shape::Value(ty))
                    .map_err(CompileError::from)?;
                self.frame.push(FrameEntry::Value(ty));
            }
            Shape::Value(ty) => self.frame.push(FrameEntry::Value(ty)),
            Shape::Void => self.frame.push(FrameEntry::Void),
        }
        Ok(())
    }

    fn binary(&mut self, node: &Node) -> Result<(), CompileError> {
        match node.token.kind {
            TokenKind::LogicalAnd => self.logical_and(node),
            TokenKind::LogicalOr => self.logical_or(node),
            _ => {
                let Some(op) = binop_opcode(node.token.kind) else {
                    return Err(ErrorKind::InternalInvariant.at(node.line()));
                };
                self.expr(&node.children[0])?;
                self.expr(&node.children[1])?;
                let rhs = self.pop_shape()?;
                let lhs = self.pop_shape()?;
                let result = self
                    .emit
                    .binary(op, lhs, rhs)
                    .map_err(|k| k.at(node.line()))?;
                self.frame.push(FrameEntry::Value(result));
                Ok(())
            }
        }
    }

    /// `&&` never evaluates the right operand once the left is zero.
    /// Both operands branch to the shared zero-push; the one-push falls
    /// through and jumps over it.
    fn logical_and(&mut self, node: &Node) -> Result<(), CompileError> {
        self.expr(&node.children[0])?;
        let left = self.pop_shape()?;
        let left_zero = self.emit.blank_push();
        self.emit.branch(left).map_err(|k| k.at(node.line()))?;

        self.expr(&node.children[1])?;
        let right = self.pop_shape()?;
        let right_zero = self.emit.blank_push();
        self.emit.branch(right).map_err(|k| k.at(node.line()))?;

        self.emit.push_imm(IntType::U8, 1);
        let over_zero = self.emit.blank_push();
        self.emit.op(Opcode::Jump);

        self.emit.patch_here(left_zero);
        self.emit.patch_here(right_zero);
        self.emit.push_imm(IntType::U8, 0);
        self.emit.patch_here(over_zero);

        self.frame.push(FrameEntry::Value(IntType::U8));
        Ok(())
    }

    /// `||` jumps straight to the shared one-push when the left operand is
    /// nonzero; a nonzero right operand jumps back to reuse it.
    fn logical_or(&mut self, node: &Node) -> Result<(), CompileError> {
        self.expr(&node.children[0])?;
        let left = self.pop_shape()?;
        let try_right = self.emit.blank_push();
        self.emit.branch(left).map_err(|k| k.at(node.line()))?;

        let one_offset = self.emit.offset();
        self.emit.push_imm(IntType::U8, 1);
        let over_rest = self.emit.blank_push();
        self.emit.op(Opcode::Jump);

        self.emit.patch_here(try_right);
        self.expr(&node.children[1])?;
        let right = self.pop_shape()?;
        let right_zero = self.emit.blank_push();
        self.emit.branch(right).map_err(|k| k.at(node.line()))?;

        self.emit.push_distance(one_offset);
        self.emit.op(Opcode::Jump);

        self.emit.patch_here(right_zero);
        self.emit.push_imm(IntType::U8, 0);
        self.emit.patch_here(over_rest);

        self.frame.push(FrameEntry::Value(IntType::U8));
        Ok(())
    }

    /// Pop the expression result off the compile-time stack mirror.
    fn pop_shape(&mut self) -> Result<Shape, CompileError> {
        self.frame
            .pop()
            .and_then(|entry| entry.shape())
            .ok_or_else(|| ErrorKind::InternalInvariant.into())
    }

    fn top_shape(&self) -> Result<Shape, CompileError> {
        self.frame
            .top()
            .and_then(FrameEntry::shape)
            .ok_or_else(|| ErrorKind::InternalInvariant.into())
    }

    /// Resolve every recorded call site now that all function offsets are
    /// known.
    fn resolve_calls(&mut self) -> Result<(), CompileError> {
        for (name, blank) in std::mem::take(&mut self.pending_calls) {
            let Some(&target) = self.func_offsets.get(&name) else {
                return Err(ErrorKind::UnknownFunction.into());
            };
            self.emit.patch_to(blank, target);
        }
        Ok(())
    }
}

fn binop_opcode(kind: TokenKind) -> Option<Opcode> {
    Some(match kind {
        TokenKind::Add => Opcode::Add,
        TokenKind::Sub => Opcode::Sub,
        TokenKind::Mul => Opcode::Mul,
        TokenKind::Quo => Opcode::Quo,
        TokenKind::Rem => Opcode::Rem,
        TokenKind::And => Opcode::And,
        TokenKind::Or => Opcode::Or,
        TokenKind::Xor => Opcode::Xor,
        TokenKind::Shl => Opcode::Shl,
        TokenKind::Shr => Opcode::Shr,
        TokenKind::Eql => Opcode::Eql,
        TokenKind::Neq => Opcode::Neq,
        TokenKind::Lss => Opcode::Lss,
        TokenKind::Gtr => Opcode::Gtr,
        TokenKind::Leq => Opcode::Leq,
        TokenKind::Geq => Opcode::Geq,
        _ => return None,
    })
}

/// Undo `\\` and `\"` escapes; anything else after a backslash is
/// malformed.
fn unescape_string(raw: &str) -> Result<Vec<u8>, ErrorKind> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            match bytes.get(i + 1) {
                Some(&escaped) if escaped == b'\\' || escaped == b'"' => {
                    out.push(escaped);
                    i += 2;
                }
                _ => return Err(ErrorKind::InvalidString),
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// A char literal is exactly one byte after undoing `\\` / `\'`.
fn unescape_char(raw: &str) -> Result<u8, ErrorKind> {
    match raw.as_bytes() {
        [c] if *c != b'\\' => Ok(*c),
        [b'\\', escaped] if *escaped == b'\\' || *escaped == b'\'' => Ok(*escaped),
        _ => Err(ErrorKind::InvalidChar),
    }
}

#[test]
fn test_unescape_string() {
    assert_eq!(unescape_string("abc").unwrap(), b"abc");
    assert_eq!(unescape_string(r#"a\\b\"c"#).unwrap(), br#"a\b"c"#);
    assert_eq!(unescape_string(r"a\n"), Err(ErrorKind::InvalidString));
    assert_eq!(unescape_string("trailing\\"), Err(ErrorKind::InvalidString));
}

#[test]
fn test_unescape_char() {
    assert_eq!(unescape_char("a"), Ok(b'a'));
    assert_eq!(unescape_char(r"\\"), Ok(b'\\'));
    assert_eq!(unescape_char(r"\'"), Ok(b'\''));
    assert_eq!(unescape_char(""), Err(ErrorKind::InvalidChar));
    assert_eq!(unescape_char("ab"), Err(ErrorKind::InvalidChar));
    assert_eq!(unescape_char(r"\n"), Err(ErrorKind::InvalidChar));
}
