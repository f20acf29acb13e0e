use crate::ast::{Node, NodeKind};
use crate::error::{CompileError, ErrorKind};
use crate::lex::{Token, TokenKind};

/// Parse a token stream into the syntax tree rooted at `Root`.
pub fn parse(tokens: Vec<Token>) -> Result<Node, CompileError> {
    let mut parser = Parser { tokens, pos: 0 };
    parser.root()
}

/// Binding power of a binary operator, or `None` for anything that cannot
/// continue an expression. Higher binds tighter.
fn binding_power(kind: TokenKind) -> Option<u8> {
    use TokenKind::*;
    Some(match kind {
        LogicalOr => 1,
        LogicalAnd => 2,
        Or => 3,
        Xor => 4,
        And => 5,
        Eql | Neq => 6,
        Lss | Gtr | Leq | Geq => 7,
        Shl | Shr => 8,
        Add | Sub => 9,
        Mul | Quo | Rem => 10,
        _ => return None,
    })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // The stream always ends with Eof; never step past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, CompileError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(ErrorKind::ParseExpected.at(self.peek().line))
        }
    }

    /// Statement terminator; the final `end` of a file may run straight
    /// into end-of-input.
    fn terminator(&mut self) -> Result<(), CompileError> {
        if self.check(TokenKind::Eof) {
            return Ok(());
        }
        self.expect(TokenKind::Newline).map(|_| ())
    }

    fn root(&mut self) -> Result<Node, CompileError> {
        let start = self.peek().clone();
        let mut funcs = Vec::new();
        while !self.check(TokenKind::Eof) {
            funcs.push(self.func()?);
        }
        let list = Node::with_children(NodeKind::FuncList, start.clone(), funcs);
        Ok(Node::with_children(NodeKind::Root, start, vec![list]))
    }

    fn func(&mut self) -> Result<Node, CompileError> {
        let func_tok = self.expect(TokenKind::Func)?;
        let name = self.expect(TokenKind::Ident)?;
        let ident = Node::new(NodeKind::FuncIdent, name);
        let sig = self.signature()?;
        self.expect(TokenKind::Newline)?;
        let body = self.stmt_list()?;
        self.expect(TokenKind::End)?;
        self.terminator()?;
        Ok(Node::with_children(
            NodeKind::Func,
            func_tok,
            vec![ident, sig, body],
        ))
    }

    fn signature(&mut self) -> Result<Node, CompileError> {
        let open = self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            params.push(self.param()?);
            while self.check(TokenKind::Comma) {
                self.advance();
                params.push(self.param()?);
            }
        }
        self.expect(TokenKind::RParen)?;
        let param_list = Node::with_children(NodeKind::FuncParamList, open.clone(), params);

        let mut children = vec![param_list];
        if self.check(TokenKind::Ident) {
            let ty = self.advance();
            children.push(Node::new(NodeKind::FuncReturnType, ty));
        }
        Ok(Node::with_children(NodeKind::FuncSig, open, children))
    }

    fn param(&mut self) -> Result<Node, CompileError> {
        let name = self.expect(TokenKind::Ident)?;
        let ty = self.expect(TokenKind::Ident)?;
        Ok(Node::with_children(
            NodeKind::FuncParam,
            name.clone(),
            vec![
                Node::new(NodeKind::Ident, name),
                Node::new(NodeKind::TypeName, ty),
            ],
        ))
    }

    fn stmt_list(&mut self) -> Result<Node, CompileError> {
        let start = self.peek().clone();
        let mut stmts = Vec::new();
        while !matches!(
            self.peek().kind,
            TokenKind::End | TokenKind::Else | TokenKind::Eof
        ) {
            stmts.push(self.stmt()?);
        }
        Ok(Node::with_children(NodeKind::StmtList, start, stmts))
    }

    fn stmt(&mut self) -> Result<Node, CompileError> {
        match self.peek().kind {
            TokenKind::Let => {
                let let_tok = self.advance();
                let name = self.expect(TokenKind::Ident)?;
                let ty = self.expect(TokenKind::Ident)?;
                self.expect(TokenKind::Newline)?;
                Ok(Node::with_children(
                    NodeKind::StmtDecl,
                    let_tok,
                    vec![
                        Node::new(NodeKind::Ident, name),
                        Node::new(NodeKind::TypeName, ty),
                    ],
                ))
            }
            TokenKind::While => {
                let while_tok = self.advance();
                let cond = self.expr_wrapped()?;
                self.expect(TokenKind::Newline)?;
                let body = self.stmt_list()?;
                self.expect(TokenKind::End)?;
                self.terminator()?;
                Ok(Node::with_children(
                    NodeKind::StmtWhile,
                    while_tok,
                    vec![cond, body],
                ))
            }
            TokenKind::If => self.if_stmt(),
            TokenKind::Return => {
                let ret_tok = self.advance();
                let mut children = Vec::new();
                if self.check(TokenKind::Newline) {
                    self.advance();
                } else {
                    children.push(self.expr_wrapped()?);
                    self.expect(TokenKind::Newline)?;
                }
                Ok(Node::with_children(NodeKind::StmtReturn, ret_tok, children))
            }
            TokenKind::Break => {
                let tok = self.advance();
                self.expect(TokenKind::Newline)?;
                Ok(Node::new(NodeKind::StmtBreak, tok))
            }
            TokenKind::Continue => {
                let tok = self.advance();
                self.expect(TokenKind::Newline)?;
                Ok(Node::new(NodeKind::StmtContinue, tok))
            }
            _ => {
                let lhs = self.expr_wrapped()?;
                match self.peek().kind {
                    TokenKind::Assign => {
                        let op = self.advance();
                        let rhs = self.expr_wrapped()?;
                        self.expect(TokenKind::Newline)?;
                        Ok(Node::with_children(
                            NodeKind::StmtAssign,
                            op,
                            vec![lhs, rhs],
                        ))
                    }
                    TokenKind::Arrow => {
                        let op = self.advance();
                        let lit = self.expect(TokenKind::Str)?;
                        self.expect(TokenKind::Newline)?;
                        Ok(Node::with_children(
                            NodeKind::StmtStoreString,
                            op,
                            vec![lhs, Node::new(NodeKind::StmtString, lit)],
                        ))
                    }
                    _ => {
                        self.expect(TokenKind::Newline)?;
                        Ok(Node::with_children(
                            NodeKind::StmtExpr,
                            lhs.token.clone(),
                            vec![lhs],
                        ))
                    }
                }
            }
        }
    }

    /// `if` and the `else if` chain. The whole chain shares one `end`,
    /// owned by the innermost `if`.
    fn if_stmt(&mut self) -> Result<Node, CompileError> {
        let if_tok = self.expect(TokenKind::If)?;
        let cond = self.expr_wrapped()?;
        self.expect(TokenKind::Newline)?;
        let then = self.stmt_list()?;
        let mut children = vec![cond, then];

        if self.check(TokenKind::Else) {
            let else_tok = self.advance();
            let tail = if self.check(TokenKind::If) {
                self.if_stmt()?
            } else {
                self.expect(TokenKind::Newline)?;
                let body = self.stmt_list()?;
                self.expect(TokenKind::End)?;
                self.terminator()?;
                body
            };
            children.push(Node::with_children(
                NodeKind::StmtElse,
                else_tok,
                vec![tail],
            ));
        } else {
            self.expect(TokenKind::End)?;
            self.terminator()?;
        }
        Ok(Node::with_children(NodeKind::StmtIf, if_tok, children))
    }

    fn expr_wrapped(&mut self) -> Result<Node, CompileError> {
        let inner = self.binary_expr(0)?;
        let token = inner.token.clone();
        Ok(Node::with_children(NodeKind::Expr, token, vec![inner]))
    }

    fn binary_expr(&mut self, min_bp: u8) -> Result<Node, CompileError> {
        let mut lhs = self.primary()?;
        while let Some(bp) = binding_power(self.peek().kind) {
            if bp < min_bp {
                break;
            }
            let op = self.advance();
            let rhs = self.binary_expr(bp + 1)?;
            lhs = Node::with_children(NodeKind::ExprBinary, op, vec![lhs, rhs]);
        }
        Ok(lhs)
    }

    fn primary(&mut self) -> Result<Node, CompileError> {
        match self.peek().kind {
            TokenKind::Ident => {
                let name = self.advance();
                if self.check(TokenKind::LParen) {
                    let args = self.call_args()?;
                    Ok(Node::with_children(NodeKind::ExprCall, name, vec![args]))
                } else {
                    Ok(Node::new(NodeKind::ExprIdent, name))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.binary_expr(0)?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            _ => Err(ErrorKind::ParseExpected.at(self.peek().line)),
        }
    }

    fn call_args(&mut self) -> Result<Node, CompileError> {
        let open = self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            args.push(self.call_arg()?);
            while self.check(TokenKind::Comma) {
                self.advance();
                args.push(self.call_arg()?);
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(Node::with_children(NodeKind::ExprCallArgList, open, args))
    }

    /// One call argument: a literal, or a full expression. Literals are
    /// only legal here; the generator decides what they mean from the
    /// callee.
    fn call_arg(&mut self) -> Result<Node, CompileError> {
        let start = self.peek().clone();
        let child = match start.kind {
            TokenKind::Int => {
                let tok = self.advance();
                Node::new(NodeKind::ExprIntLit, tok)
            }
            TokenKind::Char => {
                let tok = self.advance();
                Node::new(NodeKind::ExprChar, tok)
            }
            TokenKind::Sub => {
                self.advance();
                let tok = self.expect(TokenKind::Int)?;
                Node::new(NodeKind::ExprNegIntLit, tok)
            }
            _ => self.expr_wrapped()?,
        };
        Ok(Node::with_children(NodeKind::ExprCallArg, start, vec![child]))
    }
}

#[cfg(test)]
fn parse_source(source: &str) -> Result<Node, CompileError> {
    parse(crate::lex::tokenize(source.as_bytes())?)
}

#[test]
fn test_parse_shapes() {
    let root = parse_source(
        "func add(a i32, b i32) i32\n  return a + b\nend\nfunc main()\nend\n",
    )
    .unwrap();
    assert_eq!(root.kind, NodeKind::Root);
    let list = &root.children[0];
    assert_eq!(list.kind, NodeKind::FuncList);
    assert_eq!(list.children.len(), 2);

    let add = &list.children[0];
    assert_eq!(add.children[0].kind, NodeKind::FuncIdent);
    assert_eq!(add.children[0].token.text, "add");
    let sig = &add.children[1];
    assert_eq!(sig.children[0].children.len(), 2);
    assert_eq!(sig.children[1].kind, NodeKind::FuncReturnType);
    assert_eq!(sig.children[1].token.text, "i32");

    let ret = &add.children[2].children[0];
    assert_eq!(ret.kind, NodeKind::StmtReturn);
    let sum = &ret.children[0].children[0];
    assert_eq!(sum.kind, NodeKind::ExprBinary);
    assert_eq!(sum.token.kind, TokenKind::Add);
}

#[test]
fn test_precedence() {
    // a + b * c parses as a + (b * c)
    let root = parse_source("func main()\n  x = a + b * c\nend\n").unwrap();
    let assign = &root.children[0].children[0].children[2].children[0];
    assert_eq!(assign.kind, NodeKind::StmtAssign);
    let sum = &assign.children[1].children[0];
    assert_eq!(sum.token.kind, TokenKind::Add);
    assert_eq!(sum.children[1].token.kind, TokenKind::Mul);

    // (a + b) * c keeps the parenthesized sum on the left
    let root = parse_source("func main()\n  x = (a + b) * c\nend\n").unwrap();
    let assign = &root.children[0].children[0].children[2].children[0];
    let product = &assign.children[1].children[0];
    assert_eq!(product.token.kind, TokenKind::Mul);
    assert_eq!(product.children[0].token.kind, TokenKind::Add);
}

#[test]
fn test_else_if_chain() {
    let root = parse_source(
        "func main()\n  if a\n  else if b\n  else\n  end\nend\n",
    )
    .unwrap();
    let if_node = &root.children[0].children[0].children[2].children[0];
    assert_eq!(if_node.kind, NodeKind::StmtIf);
    let else_node = &if_node.children[2];
    assert_eq!(else_node.kind, NodeKind::StmtElse);
    let nested = &else_node.children[0];
    assert_eq!(nested.kind, NodeKind::StmtIf);
    assert_eq!(nested.children[2].children[0].kind, NodeKind::StmtList);
}

#[test]
fn test_literal_args() {
    let root = parse_source("func main()\n  f(u8(1), -2, 'c', x)\nend\n").unwrap();
    let call = &root.children[0].children[0].children[2].children[0].children[0].children[0];
    assert_eq!(call.kind, NodeKind::ExprCall);
    let args = &call.children[0].children;
    assert_eq!(args.len(), 4);
    assert_eq!(args[0].children[0].children[0].kind, NodeKind::ExprCall);
    assert_eq!(args[1].children[0].kind, NodeKind::ExprNegIntLit);
    assert_eq!(args[2].children[0].kind, NodeKind::ExprChar);
    assert_eq!(args[3].children[0].children[0].kind, NodeKind::ExprIdent);
}

#[test]
fn test_parse_errors() {
    let err = parse_source("func main(\nend\n").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ParseExpected);

    let err = parse_source("func main()\n  break continue\nend\n").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ParseExpected);
    assert_eq!(err.line(), Some(2));
}
