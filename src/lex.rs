use crate::error::{CompileError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Eof,
    Newline,

    Ident,
    Int,
    Char,
    Str,

    Add,
    Sub,
    Mul,
    Quo,
    Rem,

    And,
    Or,
    Xor,

    Shl,
    Shr,

    LogicalAnd,
    LogicalOr,

    Arrow,

    Eql,
    Neq,
    Lss,
    Gtr,
    Leq,
    Geq,

    Assign,

    LParen,
    RParen,
    Comma,

    Func,
    Return,
    If,
    Else,
    While,
    Break,
    Continue,
    Let,
    End,
}

/// One lexed token. `text` is retained only for identifiers and literals;
/// string and char literals keep their raw inner bytes, escapes intact,
/// without the surrounding quotes.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub text: String,
}

/// Operator and punctuation spellings, longest first so that `<<` wins
/// over `<` and `<-`/`<=` are never split.
const OPERATORS: &[(&str, TokenKind)] = &[
    ("<<", TokenKind::Shl),
    (">>", TokenKind::Shr),
    ("&&", TokenKind::LogicalAnd),
    ("||", TokenKind::LogicalOr),
    ("<-", TokenKind::Arrow),
    ("==", TokenKind::Eql),
    ("!=", TokenKind::Neq),
    ("<=", TokenKind::Leq),
    (">=", TokenKind::Geq),
    ("+", TokenKind::Add),
    ("-", TokenKind::Sub),
    ("*", TokenKind::Mul),
    ("/", TokenKind::Quo),
    ("%", TokenKind::Rem),
    ("&", TokenKind::And),
    ("|", TokenKind::Or),
    ("^", TokenKind::Xor),
    ("<", TokenKind::Lss),
    (">", TokenKind::Gtr),
    ("=", TokenKind::Assign),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    (",", TokenKind::Comma),
];

fn keyword(word: &str) -> Option<TokenKind> {
    Some(match word {
        "func" => TokenKind::Func,
        "return" => TokenKind::Return,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "let" => TokenKind::Let,
        "end" => TokenKind::End,
        _ => return None,
    })
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Lex a whole source buffer. Spaces and `#`-to-end-of-line comments are
/// dropped; a trailing `Eof` token is always present.
pub fn tokenize(source: &[u8]) -> Result<Vec<Token>, CompileError> {
    check_bytes(source)?;
    let tokens = scan(source)?;
    Ok(filter_newlines(tokens))
}

/// Source files are plain ASCII: only `\n` and printable bytes are legal.
fn check_bytes(source: &[u8]) -> Result<(), CompileError> {
    let mut line = 1u32;
    for &b in source {
        if b == b'\n' {
            line += 1;
        } else if !(0x20..=0x7e).contains(&b) {
            return Err(ErrorKind::InvalidByte.at(line));
        }
    }
    Ok(())
}

fn scan(source: &[u8]) -> Result<Vec<Token>, CompileError> {
    let mut tokens = Vec::new();
    let mut line = 1u32;
    let mut pos = 0usize;

    let bare = |kind, line| Token {
        kind,
        line,
        text: String::new(),
    };

    'outer: while pos < source.len() {
        let b = source[pos];
        if b == b'\n' {
            tokens.push(bare(TokenKind::Newline, line));
            line += 1;
            pos += 1;
            continue;
        }
        if b == b' ' {
            pos += 1;
            continue;
        }
        if b == b'#' {
            while pos < source.len() && source[pos] != b'\n' {
                pos += 1;
            }
            continue;
        }
        if is_ident_start(b) {
            let start = pos;
            while pos < source.len() && is_ident_continue(source[pos]) {
                pos += 1;
            }
            let word = std::str::from_utf8(&source[start..pos]).expect("ascii checked");
            match keyword(word) {
                Some(kind) => tokens.push(bare(kind, line)),
                None => tokens.push(Token {
                    kind: TokenKind::Ident,
                    line,
                    text: word.to_owned(),
                }),
            }
            continue;
        }
        if b.is_ascii_digit() {
            // Trailing letters are consumed here and rejected when the
            // literal is parsed, so `12ab` is one bad literal, not two
            // tokens.
            let start = pos;
            while pos < source.len() && is_ident_continue(source[pos]) {
                pos += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Int,
                line,
                text: String::from_utf8(source[start..pos].to_vec()).expect("ascii checked"),
            });
            continue;
        }
        if b == b'"' || b == b'\'' {
            let quote = b;
            let start = pos + 1;
            let mut i = start;
            while i < source.len() && source[i] != b'\n' {
                if source[i] == b'\\' {
                    if i + 1 >= source.len() || source[i + 1] == b'\n' {
                        break;
                    }
                    i += 2;
                } else if source[i] == quote {
                    tokens.push(Token {
                        kind: if quote == b'"' {
                            TokenKind::Str
                        } else {
                            TokenKind::Char
                        },
                        line,
                        text: String::from_utf8(source[start..i].to_vec()).expect("ascii checked"),
                    });
                    pos = i + 1;
                    continue 'outer;
                } else {
                    i += 1;
                }
            }
            return Err(ErrorKind::UnknownToken.at(line));
        }

        let rest = &source[pos..];
        for &(spelling, kind) in OPERATORS {
            if rest.starts_with(spelling.as_bytes()) {
                tokens.push(bare(kind, line));
                pos += spelling.len();
                continue 'outer;
            }
        }
        return Err(ErrorKind::UnknownToken.at(line));
    }

    tokens.push(bare(TokenKind::Eof, line));
    Ok(tokens)
}

/// Newlines are statement terminators, but only a handful of tokens can
/// legally end a statement; newlines anywhere else are noise and dropped
/// so that the grammar stays free of empty-line special cases.
fn filter_newlines(tokens: Vec<Token>) -> Vec<Token> {
    const ENDS_STATEMENT: &[TokenKind] = &[
        TokenKind::Ident,
        TokenKind::Str,
        TokenKind::RParen,
        TokenKind::Return,
        TokenKind::Else,
        TokenKind::Break,
        TokenKind::Continue,
        TokenKind::End,
    ];

    let mut kept = Vec::with_capacity(tokens.len());
    let mut prev: Option<TokenKind> = None;
    for token in tokens {
        let kind = token.kind;
        if kind != TokenKind::Newline || prev.is_some_and(|p| ENDS_STATEMENT.contains(&p)) {
            kept.push(token);
        }
        prev = Some(kind);
    }
    kept
}

#[cfg(test)]
fn kinds(source: &str) -> Vec<TokenKind> {
    tokenize(source.as_bytes())
        .unwrap()
        .into_iter()
        .map(|t| t.kind)
        .collect()
}

#[test]
fn test_tokenize_function_header() {
    use TokenKind::*;
    assert_eq!(
        kinds("func main()\nend\n"),
        vec![Func, Ident, LParen, RParen, Newline, End, Newline, Eof]
    );
}

#[test]
fn test_operator_disambiguation() {
    use TokenKind::*;
    assert_eq!(
        kinds("a << b <= c <- \"s\"\n"),
        vec![Ident, Shl, Ident, Leq, Ident, Arrow, Str, Newline, Eof]
    );
    assert_eq!(kinds("a&&b||c"), vec![Ident, LogicalAnd, Ident, LogicalOr, Ident, Eof]);
}

#[test]
fn test_newline_filter() {
    use TokenKind::*;
    // Blank lines and the newline after `(` are dropped; the one after
    // `)` is kept.
    assert_eq!(
        kinds("\n\nfunc main()\n\n\nend"),
        vec![Func, Ident, LParen, RParen, Newline, End, Eof]
    );
}

#[test]
fn test_comments_and_spaces() {
    use TokenKind::*;
    assert_eq!(
        kinds("let x u8 # declares x\nx = y\n"),
        vec![Let, Ident, Ident, Newline, Ident, Assign, Ident, Newline, Eof]
    );
}

#[test]
fn test_literal_texts() {
    let toks = tokenize(br#"x <- "a\"b" 'c' 42"#).unwrap();
    assert_eq!(toks[2].kind, TokenKind::Str);
    assert_eq!(toks[2].text, r#"a\"b"#);
    assert_eq!(toks[3].kind, TokenKind::Char);
    assert_eq!(toks[3].text, "c");
    assert_eq!(toks[4].kind, TokenKind::Int);
    assert_eq!(toks[4].text, "42");
}

#[test]
fn test_lex_errors() {
    let err = tokenize(b"let x u8\n\tx = y\n").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidByte);
    assert_eq!(err.line(), Some(2));

    let err = tokenize(b"a ! b").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownToken);

    let err = tokenize(b"x <- \"unterminated\n").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownToken);
    assert_eq!(err.line(), Some(1));
}
