use crate::lex::Token;

/// Tags of the syntax tree handed to the generator.
///
/// The tree is deliberately uniform (tag + token + children) rather than a
/// struct per form; the generator dispatches on the tag with an exhaustive
/// match, so a new form cannot be added without a compile handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    FuncList,

    Func,
    FuncIdent,
    FuncSig,
    FuncParamList,
    FuncParam,
    FuncReturnType,

    /// Leaf wrapping an identifier token (declaration and parameter names).
    Ident,
    /// Leaf wrapping a type-name token.
    TypeName,

    StmtList,

    StmtDecl,
    StmtExpr,
    StmtAssign,
    StmtStoreString,
    StmtString,

    StmtWhile,
    StmtIf,
    StmtElse,

    StmtReturn,
    StmtBreak,
    StmtContinue,

    /// Wrapper holding a single expression child.
    Expr,
    /// A variable reference.
    ExprIdent,
    /// A call-shaped expression: user function call, type cast, or
    /// literal constructor. Token is the callee identifier.
    ExprCall,
    ExprCallArgList,
    /// One argument: a single `Expr` child or a single literal child.
    ExprCallArg,
    ExprIntLit,
    ExprNegIntLit,
    ExprChar,
    /// Token is the operator; children are the two operands.
    ExprBinary,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub token: Token,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(kind: NodeKind, token: Token) -> Self {
        Self {
            kind,
            token,
            children: Vec::new(),
        }
    }

    pub fn with_children(kind: NodeKind, token: Token, children: Vec<Node>) -> Self {
        Self {
            kind,
            token,
            children,
        }
    }

    /// Source line of the token this node was built from.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.token.line
    }
}
