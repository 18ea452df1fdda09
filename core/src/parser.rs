/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the py0g Contract Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

//! Contract Source Parser: Indentation-Aware Recursive Descent
//!
//! Parses contract source text (the class/def subset of Python the contracts
//! are written in) into the AST defined in `ast.rs`. Constructs the code
//! generator never compiles (loops, `try`, comprehensions, lambdas) are still
//! parsed so the validator can see everything the author wrote.

use crate::ast::{
    Alias, BinOp, BoolOp, ClassDef, CmpOp, ComprehensionKind, ExceptHandler, Expr, ExprKind,
    FunctionDef, Generator, IntLit, Keyword, Module, Param, Stmt, StmtKind, UnaryOp, WithItem,
};
use thiserror::Error;

// ─── Error Types ─────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Syntax error at {line}:{col}: {message}")]
    Syntax { message: String, line: u32, col: u32 },
    #[error("Unexpected token at {line}:{col}: expected {expected}, found {found}")]
    UnexpectedToken {
        expected: String,
        found: String,
        line: u32,
        col: u32,
    },
    #[error("Indentation error at line {line}: {message}")]
    Indentation { message: String, line: u32 },
    #[error("Unexpected end of file")]
    UnexpectedEof,
}

impl ParseError {
    fn syntax(msg: impl Into<String>, tok: &Token) -> Self {
        ParseError::Syntax {
            message: msg.into(),
            line: tok.line,
            col: tok.col,
        }
    }

    fn unexpected(expected: impl Into<String>, tok: &Token) -> Self {
        if tok.kind == TokenKind::Eof {
            return ParseError::UnexpectedEof;
        }
        ParseError::UnexpectedToken {
            expected: expected.into(),
            found: format!("{:?}", tok.kind),
            line: tok.line,
            col: tok.col,
        }
    }

    /// Source line the error points at, when known.
    pub fn line(&self) -> Option<u32> {
        match self {
            ParseError::Syntax { line, .. }
            | ParseError::UnexpectedToken { line, .. }
            | ParseError::Indentation { line, .. } => Some(*line),
            ParseError::UnexpectedEof => None,
        }
    }
}

// ─── Token Types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Name(String),
    Integer(IntLit),
    Float(f64),
    StringLit(String),
    BytesLit(Vec<u8>),
    FString(String),

    // Keywords
    False,
    None,
    True,
    And,
    As,
    Assert,
    Async,
    Await,
    Break,
    Class,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Lambda,
    Nonlocal,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    Try,
    While,
    With,
    Yield,

    // Operators
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    At,
    LShift,
    RShift,
    Amper,
    VBar,
    Circumflex,
    Tilde,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    EqEqual,
    NotEqual,
    Arrow,       // ->
    Walrus,      // :=
    Assign,      // =
    AugAssign(BinOp),

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semicolon,
    Ellipsis,

    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub col: u32,
}

impl Token {
    fn new(kind: TokenKind, line: u32, col: u32) -> Self {
        Token { kind, line, col }
    }
}

fn keyword(word: &str) -> Option<TokenKind> {
    Some(match word {
        "False" => TokenKind::False,
        "None" => TokenKind::None,
        "True" => TokenKind::True,
        "and" => TokenKind::And,
        "as" => TokenKind::As,
        "assert" => TokenKind::Assert,
        "async" => TokenKind::Async,
        "await" => TokenKind::Await,
        "break" => TokenKind::Break,
        "class" => TokenKind::Class,
        "continue" => TokenKind::Continue,
        "def" => TokenKind::Def,
        "del" => TokenKind::Del,
        "elif" => TokenKind::Elif,
        "else" => TokenKind::Else,
        "except" => TokenKind::Except,
        "finally" => TokenKind::Finally,
        "for" => TokenKind::For,
        "from" => TokenKind::From,
        "global" => TokenKind::Global,
        "if" => TokenKind::If,
        "import" => TokenKind::Import,
        "in" => TokenKind::In,
        "is" => TokenKind::Is,
        "lambda" => TokenKind::Lambda,
        "nonlocal" => TokenKind::Nonlocal,
        "not" => TokenKind::Not,
        "or" => TokenKind::Or,
        "pass" => TokenKind::Pass,
        "raise" => TokenKind::Raise,
        "return" => TokenKind::Return,
        "try" => TokenKind::Try,
        "while" => TokenKind::While,
        "with" => TokenKind::With,
        "yield" => TokenKind::Yield,
        _ => return None,
    })
}

// ─── Lexer ───────────────────────────────────────────────────────────────────

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    indents: Vec<u32>,
    depth: usize,
}

#[derive(Default, Clone, Copy)]
struct StringPrefix {
    raw: bool,
    bytes: bool,
    formatted: bool,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            indents: vec![0],
            depth: 0,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens: Vec<Token> = Vec::new();
        let mut at_line_start = true;

        loop {
            if at_line_start && self.depth == 0 {
                at_line_start = false;
                let width = self.measure_indent();
                match self.peek() {
                    None => break,
                    Some('#') | Some('\n') => {
                        self.skip_line();
                        at_line_start = true;
                        continue;
                    }
                    Some(_) => self.apply_indent(width, &mut tokens)?,
                }
            }
            at_line_start = false;

            while matches!(self.peek(), Some(' ' | '\t' | '\r' | '\x0c')) {
                self.advance();
            }

            let Some(ch) = self.peek() else { break };
            match ch {
                '#' => {
                    while !matches!(self.peek(), None | Some('\n')) {
                        self.advance();
                    }
                }
                '\n' => {
                    let (line, col) = (self.line, self.col);
                    self.advance();
                    if self.depth == 0 {
                        if !matches!(tokens.last(), None | Some(Token { kind: TokenKind::Newline, .. })) {
                            tokens.push(Token::new(TokenKind::Newline, line, col));
                        }
                        at_line_start = true;
                    }
                }
                '\\' => {
                    self.advance();
                    while self.peek() == Some('\r') {
                        self.advance();
                    }
                    if self.peek() != Some('\n') {
                        return Err(ParseError::Syntax {
                            message: "unexpected character after line continuation".into(),
                            line: self.line,
                            col: self.col,
                        });
                    }
                    self.advance();
                }
                _ => tokens.push(self.next_token()?),
            }
        }

        if self.depth == 0
            && !matches!(tokens.last(), None | Some(Token { kind: TokenKind::Newline, .. }))
        {
            tokens.push(Token::new(TokenKind::Newline, self.line, self.col));
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            tokens.push(Token::new(TokenKind::Dedent, self.line, self.col));
        }
        tokens.push(Token::new(TokenKind::Eof, self.line, self.col));
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek_ahead(&self, offset: usize) -> Option<char> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    /// Consumes leading blanks of a logical line, returning its width.
    /// Tabs advance to the next multiple of eight.
    fn measure_indent(&mut self) -> u32 {
        let mut width = 0;
        loop {
            match self.peek() {
                Some(' ') => width += 1,
                Some('\t') => width = (width / 8 + 1) * 8,
                Some('\r') | Some('\x0c') => {}
                _ => return width,
            }
            self.advance();
        }
    }

    fn skip_line(&mut self) {
        while let Some(ch) = self.advance() {
            if ch == '\n' {
                break;
            }
        }
    }

    fn apply_indent(&mut self, width: u32, tokens: &mut Vec<Token>) -> Result<(), ParseError> {
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            tokens.push(Token::new(TokenKind::Indent, self.line, self.col));
            return Ok(());
        }
        while width < self.indents.last().copied().unwrap_or(0) {
            self.indents.pop();
            tokens.push(Token::new(TokenKind::Dedent, self.line, self.col));
        }
        if self.indents.last().copied().unwrap_or(0) != width {
            return Err(ParseError::Indentation {
                message: "unindent does not match any outer indentation level".into(),
                line: self.line,
            });
        }
        Ok(())
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        let line = self.line;
        let col = self.col;
        let ch = self.peek().ok_or(ParseError::UnexpectedEof)?;

        if ch.is_alphabetic() || ch == '_' {
            let word = self.read_word();
            if matches!(self.peek(), Some('\'' | '"')) {
                if let Some(prefix) = string_prefix(&word) {
                    let kind = self.read_string(prefix, line, col)?;
                    return Ok(Token::new(kind, line, col));
                }
            }
            let kind = keyword(&word).unwrap_or(TokenKind::Name(word));
            return Ok(Token::new(kind, line, col));
        }

        if ch.is_ascii_digit() || (ch == '.' && matches!(self.peek_ahead(1), Some(d) if d.is_ascii_digit()))
        {
            let kind = self.read_number(line, col)?;
            return Ok(Token::new(kind, line, col));
        }

        if ch == '\'' || ch == '"' {
            let kind = self.read_string(StringPrefix::default(), line, col)?;
            return Ok(Token::new(kind, line, col));
        }

        let kind = self.read_operator(line, col)?;
        Ok(Token::new(kind, line, col))
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.advance();
            } else {
                break;
            }
        }
        word
    }

    fn read_number(&mut self, line: u32, col: u32) -> Result<TokenKind, ParseError> {
        let err = |message: &str| ParseError::Syntax {
            message: message.to_string(),
            line,
            col,
        };

        if self.peek() == Some('0') {
            let radix = match self.peek_ahead(1) {
                Some('x' | 'X') => Some(16),
                Some('o' | 'O') => Some(8),
                Some('b' | 'B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.advance();
                self.advance();
                let mut digits = String::new();
                while let Some(c) = self.peek() {
                    if c == '_' {
                        self.advance();
                    } else if c.is_digit(radix) {
                        digits.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
                if digits.is_empty() {
                    return Err(err("invalid integer literal"));
                }
                return IntLit::from_digits(&digits, radix)
                    .map(TokenKind::Integer)
                    .ok_or_else(|| err("integer literal exceeds 256 bits"));
            }
        }

        let mut text = String::new();
        let mut is_float = false;
        self.read_digits(&mut text);
        if self.peek() == Some('.') && self.peek_ahead(1) != Some('.') {
            is_float = true;
            if text.is_empty() {
                text.push('0');
            }
            text.push('.');
            self.advance();
            self.read_digits(&mut text);
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let signed = matches!(self.peek_ahead(1), Some('+' | '-'));
            let digit_at = if signed { 2 } else { 1 };
            if matches!(self.peek_ahead(digit_at), Some(d) if d.is_ascii_digit()) {
                is_float = true;
                text.push('e');
                self.advance();
                if signed {
                    text.push(self.advance().unwrap_or('+'));
                }
                self.read_digits(&mut text);
            }
        }
        if matches!(self.peek(), Some('j' | 'J')) {
            return Err(err("complex literals are not supported"));
        }

        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| err("invalid float literal"))
        } else {
            IntLit::from_digits(&text, 10)
                .map(TokenKind::Integer)
                .ok_or_else(|| err("integer literal exceeds 256 bits"))
        }
    }

    fn read_digits(&mut self, into: &mut String) {
        while let Some(c) = self.peek() {
            if c == '_' {
                self.advance();
            } else if c.is_ascii_digit() {
                into.push(c);
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_string(
        &mut self,
        prefix: StringPrefix,
        line: u32,
        col: u32,
    ) -> Result<TokenKind, ParseError> {
        let quote = self.advance().ok_or(ParseError::UnexpectedEof)?;
        let triple = self.peek() == Some(quote) && self.peek_ahead(1) == Some(quote);
        if triple {
            self.advance();
            self.advance();
        }

        let unterminated = || ParseError::Syntax {
            message: "unterminated string literal".into(),
            line,
            col,
        };

        let mut text = String::new();
        loop {
            let ch = self.advance().ok_or_else(unterminated)?;
            if ch == quote {
                if !triple {
                    break;
                }
                if self.peek() == Some(quote) && self.peek_ahead(1) == Some(quote) {
                    self.advance();
                    self.advance();
                    break;
                }
                text.push(ch);
                continue;
            }
            if ch == '\n' && !triple {
                return Err(unterminated());
            }
            if ch != '\\' {
                text.push(ch);
                continue;
            }

            let esc = self.advance().ok_or_else(unterminated)?;
            if prefix.raw {
                text.push('\\');
                text.push(esc);
                continue;
            }
            match esc {
                '\n' => {}
                'n' => text.push('\n'),
                't' => text.push('\t'),
                'r' => text.push('\r'),
                '0' => text.push('\0'),
                'a' => text.push('\x07'),
                'b' => text.push('\x08'),
                'f' => text.push('\x0c'),
                'v' => text.push('\x0b'),
                '\\' | '\'' | '"' => text.push(esc),
                'x' => text.push(self.read_hex_escape(2, line, col)?),
                'u' if !prefix.bytes => text.push(self.read_hex_escape(4, line, col)?),
                'U' if !prefix.bytes => text.push(self.read_hex_escape(8, line, col)?),
                other => {
                    text.push('\\');
                    text.push(other);
                }
            }
        }

        if prefix.bytes {
            let mut bytes = Vec::with_capacity(text.len());
            for c in text.chars() {
                let code = c as u32;
                if code > 0xFF {
                    return Err(ParseError::Syntax {
                        message: "bytes can only contain ASCII literal characters".into(),
                        line,
                        col,
                    });
                }
                bytes.push(code as u8);
            }
            return Ok(TokenKind::BytesLit(bytes));
        }
        if prefix.formatted {
            return Ok(TokenKind::FString(text));
        }
        Ok(TokenKind::StringLit(text))
    }

    fn read_hex_escape(&mut self, len: usize, line: u32, col: u32) -> Result<char, ParseError> {
        let mut digits = String::with_capacity(len);
        for _ in 0..len {
            match self.peek() {
                Some(c) if c.is_ascii_hexdigit() => {
                    digits.push(c);
                    self.advance();
                }
                _ => break,
            }
        }
        u32::from_str_radix(&digits, 16)
            .ok()
            .filter(|_| digits.len() == len)
            .and_then(char::from_u32)
            .ok_or(ParseError::Syntax {
                message: "invalid escape sequence".into(),
                line,
                col,
            })
    }

    fn read_operator(&mut self, line: u32, col: u32) -> Result<TokenKind, ParseError> {
        let c0 = self.peek().unwrap_or('\0');
        let c1 = self.peek_ahead(1).unwrap_or('\0');
        let c2 = self.peek_ahead(2).unwrap_or('\0');

        let (kind, len) = match (c0, c1, c2) {
            ('*', '*', '=') => (TokenKind::AugAssign(BinOp::Pow), 3),
            ('/', '/', '=') => (TokenKind::AugAssign(BinOp::FloorDiv), 3),
            ('>', '>', '=') => (TokenKind::AugAssign(BinOp::RShift), 3),
            ('<', '<', '=') => (TokenKind::AugAssign(BinOp::LShift), 3),
            ('.', '.', '.') => (TokenKind::Ellipsis, 3),
            ('*', '*', _) => (TokenKind::DoubleStar, 2),
            ('/', '/', _) => (TokenKind::DoubleSlash, 2),
            ('<', '<', _) => (TokenKind::LShift, 2),
            ('>', '>', _) => (TokenKind::RShift, 2),
            ('<', '=', _) => (TokenKind::LessEqual, 2),
            ('>', '=', _) => (TokenKind::GreaterEqual, 2),
            ('=', '=', _) => (TokenKind::EqEqual, 2),
            ('!', '=', _) => (TokenKind::NotEqual, 2),
            ('-', '>', _) => (TokenKind::Arrow, 2),
            (':', '=', _) => (TokenKind::Walrus, 2),
            ('+', '=', _) => (TokenKind::AugAssign(BinOp::Add), 2),
            ('-', '=', _) => (TokenKind::AugAssign(BinOp::Sub), 2),
            ('*', '=', _) => (TokenKind::AugAssign(BinOp::Mul), 2),
            ('/', '=', _) => (TokenKind::AugAssign(BinOp::Div), 2),
            ('%', '=', _) => (TokenKind::AugAssign(BinOp::Mod), 2),
            ('@', '=', _) => (TokenKind::AugAssign(BinOp::MatMul), 2),
            ('&', '=', _) => (TokenKind::AugAssign(BinOp::BitAnd), 2),
            ('|', '=', _) => (TokenKind::AugAssign(BinOp::BitOr), 2),
            ('^', '=', _) => (TokenKind::AugAssign(BinOp::BitXor), 2),
            ('+', _, _) => (TokenKind::Plus, 1),
            ('-', _, _) => (TokenKind::Minus, 1),
            ('*', _, _) => (TokenKind::Star, 1),
            ('/', _, _) => (TokenKind::Slash, 1),
            ('%', _, _) => (TokenKind::Percent, 1),
            ('@', _, _) => (TokenKind::At, 1),
            ('&', _, _) => (TokenKind::Amper, 1),
            ('|', _, _) => (TokenKind::VBar, 1),
            ('^', _, _) => (TokenKind::Circumflex, 1),
            ('~', _, _) => (TokenKind::Tilde, 1),
            ('<', _, _) => (TokenKind::Less, 1),
            ('>', _, _) => (TokenKind::Greater, 1),
            ('=', _, _) => (TokenKind::Assign, 1),
            ('(', _, _) => (TokenKind::LParen, 1),
            (')', _, _) => (TokenKind::RParen, 1),
            ('[', _, _) => (TokenKind::LBracket, 1),
            (']', _, _) => (TokenKind::RBracket, 1),
            ('{', _, _) => (TokenKind::LBrace, 1),
            ('}', _, _) => (TokenKind::RBrace, 1),
            (',', _, _) => (TokenKind::Comma, 1),
            (':', _, _) => (TokenKind::Colon, 1),
            ('.', _, _) => (TokenKind::Dot, 1),
            (';', _, _) => (TokenKind::Semicolon, 1),
            (other, _, _) => {
                return Err(ParseError::Syntax {
                    message: format!("invalid character '{}'", other),
                    line,
                    col,
                })
            }
        };

        match kind {
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => self.depth += 1,
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                self.depth = self.depth.saturating_sub(1)
            }
            _ => {}
        }
        for _ in 0..len {
            self.advance();
        }
        Ok(kind)
    }
}

fn string_prefix(word: &str) -> Option<StringPrefix> {
    let lower = word.to_ascii_lowercase();
    let prefix = match lower.as_str() {
        "r" => StringPrefix { raw: true, ..Default::default() },
        "u" => StringPrefix::default(),
        "b" => StringPrefix { bytes: true, ..Default::default() },
        "f" => StringPrefix { formatted: true, ..Default::default() },
        "rb" | "br" => StringPrefix { raw: true, bytes: true, formatted: false },
        "rf" | "fr" => StringPrefix { raw: true, bytes: false, formatted: true },
        _ => return None,
    };
    Some(prefix)
}

// ─── Parser ──────────────────────────────────────────────────────────────────

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

#[derive(Default)]
struct ParamList {
    params: Vec<Param>,
    vararg: Option<Param>,
    kwarg: Option<Param>,
}

fn mark_async(stmt: &mut Stmt) {
    if let StmtKind::FunctionDef(func) = &mut stmt.kind {
        func.is_async = true;
    }
}

/// Tokenize and parse a complete source unit.
pub fn parse_source(source: &str) -> Result<Module, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_module()
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    pub fn parse_module(&mut self) -> Result<Module, ParseError> {
        let mut body = Vec::new();
        loop {
            while self.eat(&TokenKind::Newline) {}
            if self.check(&TokenKind::Eof) {
                break;
            }
            body.extend(self.parse_statement()?);
        }
        Ok(Module { body })
    }

    // --- Token helpers ---

    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_kind_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, ParseError> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(ParseError::unexpected(what, self.peek()))
        }
    }

    fn expect_name(&mut self) -> Result<String, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Name(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(ParseError::unexpected("identifier", self.peek())),
        }
    }

    fn line(&self) -> u32 {
        self.peek().line
    }

    // --- Statements ---

    fn parse_statement(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let stmt = match self.peek_kind() {
            TokenKind::Def => self.parse_funcdef(Vec::new())?,
            TokenKind::Class => self.parse_classdef(Vec::new())?,
            TokenKind::At => self.parse_decorated()?,
            TokenKind::If => self.parse_if()?,
            TokenKind::While => self.parse_while()?,
            TokenKind::For => self.parse_for()?,
            TokenKind::Try => self.parse_try()?,
            TokenKind::With => self.parse_with()?,
            TokenKind::Async => self.parse_async()?,
            TokenKind::Indent => return Err(ParseError::syntax("unexpected indent", self.peek())),
            _ => return self.parse_simple_statements(),
        };
        Ok(vec![stmt])
    }

    fn parse_simple_statements(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = vec![self.parse_small_statement()?];
        while self.eat(&TokenKind::Semicolon) {
            if matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Eof) {
                break;
            }
            stmts.push(self.parse_small_statement()?);
        }
        if !self.check(&TokenKind::Eof) {
            self.expect(TokenKind::Newline, "end of statement")?;
        }
        Ok(stmts)
    }

    fn parse_small_statement(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        let kind = match self.peek_kind() {
            TokenKind::Pass => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Break => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Return => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_testlist()?))
                }
            }
            TokenKind::Raise => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Raise { exc: None, cause: None }
                } else {
                    let exc = self.parse_test()?;
                    let cause = if self.eat(&TokenKind::From) {
                        Some(self.parse_test()?)
                    } else {
                        None
                    };
                    StmtKind::Raise { exc: Some(exc), cause }
                }
            }
            TokenKind::Assert => {
                self.advance();
                let test = self.parse_test()?;
                let msg = if self.eat(&TokenKind::Comma) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            TokenKind::Del => {
                self.advance();
                let target = self.parse_target_list()?;
                match target.kind {
                    ExprKind::Tuple(items) => StmtKind::Delete(items),
                    _ => StmtKind::Delete(vec![target]),
                }
            }
            TokenKind::Global => {
                self.advance();
                StmtKind::Global(self.parse_name_list()?)
            }
            TokenKind::Nonlocal => {
                self.advance();
                StmtKind::Nonlocal(self.parse_name_list()?)
            }
            TokenKind::Import => self.parse_import()?,
            TokenKind::From => self.parse_from_import()?,
            TokenKind::Yield => {
                return Err(ParseError::syntax("generators are not supported", self.peek()))
            }
            _ => self.parse_expression_statement()?,
        };
        Ok(Stmt::new(kind, line))
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof
        )
    }

    fn parse_name_list(&mut self) -> Result<Vec<String>, ParseError> {
        let mut names = vec![self.expect_name()?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_name()?);
        }
        Ok(names)
    }

    fn parse_dotted_name(&mut self) -> Result<String, ParseError> {
        let mut name = self.expect_name()?;
        while self.eat(&TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn parse_alias(&mut self, dotted: bool) -> Result<Alias, ParseError> {
        let name = if dotted {
            self.parse_dotted_name()?
        } else {
            self.expect_name()?
        };
        let asname = if self.eat(&TokenKind::As) {
            Some(self.expect_name()?)
        } else {
            None
        };
        Ok(Alias { name, asname })
    }

    fn parse_import(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(TokenKind::Import, "import")?;
        let mut names = vec![self.parse_alias(true)?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.parse_alias(true)?);
        }
        Ok(StmtKind::Import(names))
    }

    fn parse_from_import(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(TokenKind::From, "from")?;
        let mut module = String::new();
        loop {
            if self.eat(&TokenKind::Dot) {
                module.push('.');
            } else if self.eat(&TokenKind::Ellipsis) {
                module.push_str("...");
            } else {
                break;
            }
        }
        if !self.check(&TokenKind::Import) {
            module.push_str(&self.parse_dotted_name()?);
        }
        self.expect(TokenKind::Import, "import")?;

        let mut names = Vec::new();
        if self.eat(&TokenKind::Star) {
            names.push(Alias {
                name: "*".into(),
                asname: None,
            });
        } else if self.eat(&TokenKind::LParen) {
            while !self.check(&TokenKind::RParen) {
                names.push(self.parse_alias(false)?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RParen, "')'")?;
        } else {
            names.push(self.parse_alias(false)?);
            while self.eat(&TokenKind::Comma) {
                names.push(self.parse_alias(false)?);
            }
        }
        Ok(StmtKind::ImportFrom { module, names })
    }

    fn parse_expression_statement(&mut self) -> Result<StmtKind, ParseError> {
        let first = self.parse_testlist_star()?;

        if self.eat(&TokenKind::Colon) {
            let annotation = self.parse_test()?;
            let value = if self.eat(&TokenKind::Assign) {
                Some(self.parse_testlist_star()?)
            } else {
                None
            };
            return Ok(StmtKind::AnnAssign {
                target: first,
                annotation,
                value,
            });
        }

        if let TokenKind::AugAssign(op) = *self.peek_kind() {
            self.advance();
            let value = self.parse_testlist()?;
            return Ok(StmtKind::AugAssign {
                target: first,
                op,
                value,
            });
        }

        if self.check(&TokenKind::Assign) {
            let mut targets = vec![first];
            loop {
                self.advance();
                let next = self.parse_testlist_star()?;
                if self.check(&TokenKind::Assign) {
                    targets.push(next);
                } else {
                    return Ok(StmtKind::Assign {
                        targets,
                        value: next,
                    });
                }
            }
        }

        Ok(StmtKind::Expr(first))
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::Colon, "':'")?;
        if !self.eat(&TokenKind::Newline) {
            return self.parse_simple_statements();
        }
        if !self.check(&TokenKind::Indent) {
            return Err(ParseError::Indentation {
                message: "expected an indented block".into(),
                line: self.line(),
            });
        }
        self.advance();

        let mut body = Vec::new();
        loop {
            while self.eat(&TokenKind::Newline) {}
            if self.eat(&TokenKind::Dedent) || self.check(&TokenKind::Eof) {
                break;
            }
            body.extend(self.parse_statement()?);
        }
        Ok(body)
    }

    fn parse_decorated(&mut self) -> Result<Stmt, ParseError> {
        let mut decorators = Vec::new();
        while self.eat(&TokenKind::At) {
            decorators.push(self.parse_test()?);
            self.expect(TokenKind::Newline, "newline after decorator")?;
        }
        match self.peek_kind() {
            TokenKind::Def => self.parse_funcdef(decorators),
            TokenKind::Class => self.parse_classdef(decorators),
            TokenKind::Async if self.peek_kind_at(1) == Some(&TokenKind::Def) => {
                self.advance();
                let mut stmt = self.parse_funcdef(decorators)?;
                mark_async(&mut stmt);
                Ok(stmt)
            }
            _ => Err(ParseError::unexpected("def or class after decorator", self.peek())),
        }
    }

    /// `async def`, `async for` and `async with` parse as their plain forms;
    /// only the function keeps the marker.
    fn parse_async(&mut self) -> Result<Stmt, ParseError> {
        self.expect(TokenKind::Async, "async")?;
        let mut stmt = match self.peek_kind() {
            TokenKind::Def => self.parse_funcdef(Vec::new())?,
            TokenKind::For => self.parse_for()?,
            TokenKind::With => self.parse_with()?,
            _ => return Err(ParseError::unexpected("def, for or with after async", self.peek())),
        };
        mark_async(&mut stmt);
        Ok(stmt)
    }

    fn parse_funcdef(&mut self, decorators: Vec<Expr>) -> Result<Stmt, ParseError> {
        let line = self.expect(TokenKind::Def, "def")?.line;
        let name = self.expect_name()?;
        self.expect(TokenKind::LParen, "'('")?;
        let ParamList {
            params,
            vararg,
            kwarg,
        } = self.parse_params(&TokenKind::RParen, true)?;
        self.expect(TokenKind::RParen, "')'")?;
        let returns = if self.eat(&TokenKind::Arrow) {
            Some(self.parse_test()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(Stmt::new(
            StmtKind::FunctionDef(FunctionDef {
                name,
                is_async: false,
                receiver: None,
                params,
                vararg,
                kwarg,
                returns,
                decorators,
                body,
            }),
            line,
        ))
    }

    /// Parameter list up to (not including) `close`. Bare `*` and `/`
    /// markers are skipped; `*args` and `**kwargs` are held apart.
    fn parse_params(
        &mut self,
        close: &TokenKind,
        annotated: bool,
    ) -> Result<ParamList, ParseError> {
        let mut list = ParamList::default();
        while !self.check(close) {
            match self.peek_kind() {
                TokenKind::Slash => {
                    self.advance();
                }
                TokenKind::Star => {
                    self.advance();
                    if matches!(self.peek_kind(), TokenKind::Name(_)) {
                        list.vararg = Some(self.parse_param(annotated)?);
                    }
                }
                TokenKind::DoubleStar => {
                    self.advance();
                    list.kwarg = Some(self.parse_param(annotated)?);
                }
                _ => {
                    let param = self.parse_param(annotated)?;
                    list.params.push(param);
                }
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(list)
    }

    fn parse_param(&mut self, annotated: bool) -> Result<Param, ParseError> {
        let name = self.expect_name()?;
        let annotation = if annotated && self.eat(&TokenKind::Colon) {
            Some(self.parse_test()?)
        } else {
            None
        };
        let default = if self.eat(&TokenKind::Assign) {
            Some(self.parse_test()?)
        } else {
            None
        };
        Ok(Param {
            name,
            annotation,
            default,
        })
    }

    fn parse_classdef(&mut self, decorators: Vec<Expr>) -> Result<Stmt, ParseError> {
        let line = self.expect(TokenKind::Class, "class")?.line;
        let name = self.expect_name()?;
        let mut bases = Vec::new();
        if self.eat(&TokenKind::LParen) {
            let (args, _keywords) = self.parse_call_args()?;
            bases = args;
        }
        let mut body = self.parse_block()?;

        // Methods take their receiver implicitly; split it off here so every
        // later stage sees only the declared parameters.
        for stmt in &mut body {
            if let StmtKind::FunctionDef(func) = &mut stmt.kind {
                let is_static = func
                    .decorators
                    .iter()
                    .any(|d| d.as_name() == Some("staticmethod"));
                if !is_static && !func.params.is_empty() {
                    func.receiver = Some(func.params.remove(0));
                }
            }
        }

        Ok(Stmt::new(
            StmtKind::ClassDef(ClassDef {
                name,
                bases,
                decorators,
                body,
            }),
            line,
        ))
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let line = self.advance().line; // `if` or `elif`
        let test = self.parse_test()?;
        let body = self.parse_block()?;
        let orelse = match self.peek_kind() {
            TokenKind::Elif => vec![self.parse_if()?],
            TokenKind::Else => {
                self.advance();
                self.parse_block()?
            }
            _ => Vec::new(),
        };
        Ok(Stmt::new(StmtKind::If { test, body, orelse }, line))
    }

    fn parse_else_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        if self.eat(&TokenKind::Else) {
            self.parse_block()
        } else {
            Ok(Vec::new())
        }
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let line = self.expect(TokenKind::While, "while")?.line;
        let test = self.parse_test()?;
        let body = self.parse_block()?;
        let orelse = self.parse_else_block()?;
        Ok(Stmt::new(StmtKind::While { test, body, orelse }, line))
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let line = self.expect(TokenKind::For, "for")?.line;
        let target = self.parse_target_list()?;
        self.expect(TokenKind::In, "'in'")?;
        let iter = self.parse_testlist()?;
        let body = self.parse_block()?;
        let orelse = self.parse_else_block()?;
        Ok(Stmt::new(
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
            line,
        ))
    }

    fn parse_try(&mut self) -> Result<Stmt, ParseError> {
        let line = self.expect(TokenKind::Try, "try")?.line;
        let body = self.parse_block()?;
        let mut handlers = Vec::new();
        while self.check(&TokenKind::Except) {
            let handler_line = self.advance().line;
            let mut kind = None;
            let mut name = None;
            if !self.check(&TokenKind::Colon) {
                kind = Some(self.parse_test()?);
                if self.eat(&TokenKind::As) {
                    name = Some(self.expect_name()?);
                }
            }
            let body = self.parse_block()?;
            handlers.push(ExceptHandler {
                line: handler_line,
                kind,
                name,
                body,
            });
        }
        let orelse = self.parse_else_block()?;
        let finalbody = if self.eat(&TokenKind::Finally) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(ParseError::syntax("expected 'except' or 'finally' block", self.peek()));
        }
        Ok(Stmt::new(
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
            line,
        ))
    }

    fn parse_with(&mut self) -> Result<Stmt, ParseError> {
        let line = self.expect(TokenKind::With, "with")?.line;
        let mut items = Vec::new();
        loop {
            let context = self.parse_test()?;
            let target = if self.eat(&TokenKind::As) {
                Some(self.parse_bitor()?)
            } else {
                None
            };
            items.push(WithItem { context, target });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        let body = self.parse_block()?;
        Ok(Stmt::new(StmtKind::With { items, body }, line))
    }

    // --- Expressions ---

    fn at_expression_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Newline
                | TokenKind::Semicolon
                | TokenKind::Eof
                | TokenKind::Assign
                | TokenKind::AugAssign(_)
                | TokenKind::Colon
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::RBrace
                | TokenKind::In
        )
    }

    /// `a, b, *c`: a bare tuple when a comma is present.
    fn parse_testlist_star(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let first = self.parse_star_or_test()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.at_expression_end() {
                break;
            }
            items.push(self.parse_star_or_test()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line))
    }

    fn parse_testlist(&mut self) -> Result<Expr, ParseError> {
        self.parse_testlist_star()
    }

    /// Assignment targets for `for` and `del`: stops before `in`.
    fn parse_target_list(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let first = self.parse_star_or_bitor()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.at_expression_end() {
                break;
            }
            items.push(self.parse_star_or_bitor()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line))
    }

    fn parse_star_or_bitor(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        if self.eat(&TokenKind::Star) {
            let inner = self.parse_bitor()?;
            return Ok(Expr::new(ExprKind::Starred(Box::new(inner)), line));
        }
        self.parse_bitor()
    }

    fn parse_star_or_test(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        if self.eat(&TokenKind::Star) {
            let inner = self.parse_bitor()?;
            return Ok(Expr::new(ExprKind::Starred(Box::new(inner)), line));
        }
        self.parse_test()
    }

    pub fn parse_test(&mut self) -> Result<Expr, ParseError> {
        if self.check(&TokenKind::Lambda) {
            return self.parse_lambda();
        }
        let line = self.line();
        let body = self.parse_or_test()?;
        if self.eat(&TokenKind::If) {
            let test = self.parse_or_test()?;
            self.expect(TokenKind::Else, "'else' in conditional expression")?;
            let orelse = self.parse_test()?;
            return Ok(Expr::new(
                ExprKind::IfExp {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                },
                line,
            ));
        }
        if self.check(&TokenKind::Walrus) {
            return Err(ParseError::syntax("assignment expressions are not supported", self.peek()));
        }
        Ok(body)
    }

    fn parse_lambda(&mut self) -> Result<Expr, ParseError> {
        let line = self.expect(TokenKind::Lambda, "lambda")?.line;
        let params = self.parse_params(&TokenKind::Colon, false)?.params;
        self.expect(TokenKind::Colon, "':'")?;
        let body = self.parse_test()?;
        Ok(Expr::new(
            ExprKind::Lambda {
                params,
                body: Box::new(body),
            },
            line,
        ))
    }

    fn parse_or_test(&mut self) -> Result<Expr, ParseError> {
        self.parse_bool_chain(TokenKind::Or, BoolOp::Or)
    }

    fn parse_bool_chain(&mut self, token: TokenKind, op: BoolOp) -> Result<Expr, ParseError> {
        let line = self.line();
        let first = match op {
            BoolOp::Or => self.parse_bool_chain(TokenKind::And, BoolOp::And)?,
            BoolOp::And => self.parse_not_test()?,
        };
        if !self.check(&token) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat(&token) {
            values.push(match op {
                BoolOp::Or => self.parse_bool_chain(TokenKind::And, BoolOp::And)?,
                BoolOp::And => self.parse_not_test()?,
            });
        }
        Ok(Expr::new(ExprKind::BoolOp { op, values }, line))
    }

    fn parse_not_test(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        if self.eat(&TokenKind::Not) {
            let operand = self.parse_not_test()?;
            return Ok(Expr::new(
                ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                line,
            ));
        }
        self.parse_comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let next = self.peek_kind_at(1);
        let (op, width) = match self.peek_kind() {
            TokenKind::Less => (CmpOp::Lt, 1),
            TokenKind::Greater => (CmpOp::Gt, 1),
            TokenKind::LessEqual => (CmpOp::LtE, 1),
            TokenKind::GreaterEqual => (CmpOp::GtE, 1),
            TokenKind::EqEqual => (CmpOp::Eq, 1),
            TokenKind::NotEqual => (CmpOp::NotEq, 1),
            TokenKind::In => (CmpOp::In, 1),
            TokenKind::Not if matches!(next, Some(TokenKind::In)) => (CmpOp::NotIn, 2),
            TokenKind::Is if matches!(next, Some(TokenKind::Not)) => (CmpOp::IsNot, 2),
            TokenKind::Is => (CmpOp::Is, 1),
            _ => return None,
        };
        for _ in 0..width {
            self.advance();
        }
        Some(op)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let left = self.parse_bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        while let Some(op) = self.comparison_op() {
            ops.push(op);
            comparators.push(self.parse_bitor()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
            line,
        ))
    }

    fn binary(left: Expr, op: BinOp, right: Expr) -> Expr {
        let line = left.line;
        Expr::new(
            ExprKind::BinOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
            line,
        )
    }

    fn parse_bitor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_bitxor()?;
        while self.eat(&TokenKind::VBar) {
            let right = self.parse_bitxor()?;
            left = Self::binary(left, BinOp::BitOr, right);
        }
        Ok(left)
    }

    fn parse_bitxor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_bitand()?;
        while self.eat(&TokenKind::Circumflex) {
            let right = self.parse_bitand()?;
            left = Self::binary(left, BinOp::BitXor, right);
        }
        Ok(left)
    }

    fn parse_bitand(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_shift()?;
        while self.eat(&TokenKind::Amper) {
            let right = self.parse_shift()?;
            left = Self::binary(left, BinOp::BitAnd, right);
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_arith()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::LShift => BinOp::LShift,
                TokenKind::RShift => BinOp::RShift,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_arith()?;
            left = Self::binary(left, op, right);
        }
    }

    fn parse_arith(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_term()?;
            left = Self::binary(left, op, right);
        }
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::DoubleSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                TokenKind::At => BinOp::MatMul,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_factor()?;
            left = Self::binary(left, op, right);
        }
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            TokenKind::Tilde => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        self.advance();
        let operand = self.parse_factor()?;
        Ok(Expr::new(
            ExprKind::UnaryOp {
                op,
                operand: Box::new(operand),
            },
            line,
        ))
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = if self.check(&TokenKind::Await) {
            let line = self.advance().line;
            let inner = self.parse_primary()?;
            Expr::new(ExprKind::Await(Box::new(inner)), line)
        } else {
            self.parse_primary()?
        };
        if self.eat(&TokenKind::DoubleStar) {
            let exponent = self.parse_factor()?;
            return Ok(Self::binary(base, BinOp::Pow, exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_atom()?;
        loop {
            let line = expr.line;
            match self.peek_kind() {
                TokenKind::LParen => {
                    self.advance();
                    let (args, keywords) = self.parse_call_args()?;
                    expr = Expr::new(
                        ExprKind::Call {
                            func: Box::new(expr),
                            args,
                            keywords,
                        },
                        line,
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_subscript()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    expr = Expr::new(
                        ExprKind::Subscript {
                            value: Box::new(expr),
                            index: Box::new(index),
                        },
                        line,
                    );
                }
                TokenKind::Dot => {
                    self.advance();
                    let attr = self.expect_name()?;
                    expr = Expr::new(
                        ExprKind::Attribute {
                            value: Box::new(expr),
                            attr,
                        },
                        line,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Arguments after an opening `(`; consumes the closing `)`.
    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<Keyword>), ParseError> {
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let line = self.line();
            if self.eat(&TokenKind::Star) {
                let inner = self.parse_test()?;
                args.push(Expr::new(ExprKind::Starred(Box::new(inner)), line));
            } else if self.eat(&TokenKind::DoubleStar) {
                keywords.push(Keyword {
                    arg: None,
                    value: self.parse_test()?,
                });
            } else if matches!(self.peek_kind(), TokenKind::Name(_))
                && matches!(self.peek_kind_at(1), Some(TokenKind::Assign))
            {
                let arg = self.expect_name()?;
                self.advance();
                keywords.push(Keyword {
                    arg: Some(arg),
                    value: self.parse_test()?,
                });
            } else {
                let value = self.parse_test()?;
                if self.check(&TokenKind::For) {
                    let generators = self.parse_comprehension_clauses()?;
                    args.push(Expr::new(
                        ExprKind::Comprehension {
                            kind: ComprehensionKind::Generator,
                            element: Box::new(value),
                            value: None,
                            generators,
                        },
                        line,
                    ));
                } else {
                    args.push(value);
                }
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok((args, keywords))
    }

    fn parse_subscript(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let first = self.parse_slice_item()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_slice_item()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line))
    }

    fn parse_slice_item(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let lower = if self.check(&TokenKind::Colon) {
            None
        } else {
            let value = self.parse_test()?;
            if !self.check(&TokenKind::Colon) {
                return Ok(value);
            }
            Some(Box::new(value))
        };
        self.expect(TokenKind::Colon, "':'")?;
        let upper = if self.at_slice_end() {
            None
        } else {
            Some(Box::new(self.parse_test()?))
        };
        let step = if self.eat(&TokenKind::Colon) && !self.at_slice_end() {
            Some(Box::new(self.parse_test()?))
        } else {
            None
        };
        Ok(Expr::new(ExprKind::Slice { lower, upper, step }, line))
    }

    fn at_slice_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Colon | TokenKind::Comma | TokenKind::RBracket
        )
    }

    fn parse_comprehension_clauses(&mut self) -> Result<Vec<Generator>, ParseError> {
        let mut generators = Vec::new();
        while self.eat(&TokenKind::For) {
            let target = self.parse_target_list()?;
            self.expect(TokenKind::In, "'in'")?;
            let iter = self.parse_or_test()?;
            let mut ifs = Vec::new();
            while self.eat(&TokenKind::If) {
                ifs.push(self.parse_or_test()?);
            }
            generators.push(Generator { target, iter, ifs });
        }
        Ok(generators)
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        let tok = self.peek().clone();
        let line = tok.line;
        let kind = match &tok.kind {
            TokenKind::Name(name) => {
                self.advance();
                ExprKind::Name(name.clone())
            }
            TokenKind::Integer(v) => {
                self.advance();
                ExprKind::Int(*v)
            }
            TokenKind::Float(v) => {
                self.advance();
                ExprKind::Float(*v)
            }
            TokenKind::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::None => {
                self.advance();
                ExprKind::NoneLit
            }
            TokenKind::Ellipsis => {
                self.advance();
                ExprKind::Ellipsis
            }
            TokenKind::StringLit(_) | TokenKind::FString(_) | TokenKind::BytesLit(_) => {
                return self.parse_string_concat()
            }
            TokenKind::LParen => return self.parse_paren(),
            TokenKind::LBracket => return self.parse_list_display(),
            TokenKind::LBrace => return self.parse_brace_display(),
            _ => return Err(ParseError::unexpected("expression", &tok)),
        };
        Ok(Expr::new(kind, line))
    }

    /// Adjacent string literals concatenate; any f-string part makes the
    /// whole literal formatted. Mixing bytes and text is rejected.
    fn parse_string_concat(&mut self) -> Result<Expr, ParseError> {
        let first = self.peek().clone();
        let mut text = String::new();
        let mut bytes: Option<Vec<u8>> = None;
        let mut formatted = false;
        let mut saw_text = false;
        loop {
            match self.peek_kind().clone() {
                TokenKind::StringLit(s) => {
                    text.push_str(&s);
                    saw_text = true;
                }
                TokenKind::FString(s) => {
                    text.push_str(&s);
                    saw_text = true;
                    formatted = true;
                }
                TokenKind::BytesLit(b) => bytes.get_or_insert_with(Vec::new).extend(b),
                _ => break,
            }
            self.advance();
        }
        let kind = match bytes {
            Some(_) if saw_text => {
                return Err(ParseError::syntax("cannot mix bytes and nonbytes literals", &first))
            }
            Some(b) => ExprKind::Bytes(b),
            None if formatted => ExprKind::FormattedStr(text),
            None => ExprKind::Str(text),
        };
        Ok(Expr::new(kind, first.line))
    }

    fn parse_paren(&mut self) -> Result<Expr, ParseError> {
        let line = self.expect(TokenKind::LParen, "'('")?.line;
        if self.eat(&TokenKind::RParen) {
            return Ok(Expr::new(ExprKind::Tuple(Vec::new()), line));
        }
        let first = self.parse_star_or_test()?;
        if self.check(&TokenKind::For) {
            let generators = self.parse_comprehension_clauses()?;
            self.expect(TokenKind::RParen, "')'")?;
            return Ok(Expr::new(
                ExprKind::Comprehension {
                    kind: ComprehensionKind::Generator,
                    element: Box::new(first),
                    value: None,
                    generators,
                },
                line,
            ));
        }
        if !self.check(&TokenKind::Comma) {
            self.expect(TokenKind::RParen, "')'")?;
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RParen) {
                break;
            }
            items.push(self.parse_star_or_test()?);
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok(Expr::new(ExprKind::Tuple(items), line))
    }

    fn parse_list_display(&mut self) -> Result<Expr, ParseError> {
        let line = self.expect(TokenKind::LBracket, "'['")?.line;
        if self.eat(&TokenKind::RBracket) {
            return Ok(Expr::new(ExprKind::List(Vec::new()), line));
        }
        let first = self.parse_star_or_test()?;
        if self.check(&TokenKind::For) {
            let generators = self.parse_comprehension_clauses()?;
            self.expect(TokenKind::RBracket, "']'")?;
            return Ok(Expr::new(
                ExprKind::Comprehension {
                    kind: ComprehensionKind::List,
                    element: Box::new(first),
                    value: None,
                    generators,
                },
                line,
            ));
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_star_or_test()?);
        }
        self.expect(TokenKind::RBracket, "']'")?;
        Ok(Expr::new(ExprKind::List(items), line))
    }

    fn parse_brace_display(&mut self) -> Result<Expr, ParseError> {
        let line = self.expect(TokenKind::LBrace, "'{'")?.line;
        if self.eat(&TokenKind::RBrace) {
            return Ok(Expr::new(ExprKind::Dict(Vec::new()), line));
        }

        // Dict display (or dict comprehension)
        let first_key = if self.eat(&TokenKind::DoubleStar) {
            None
        } else {
            let key = self.parse_star_or_test()?;
            if !self.check(&TokenKind::Colon) {
                return self.parse_set_rest(key, line);
            }
            Some(key)
        };

        let first_value = match first_key {
            Some(_) => {
                self.expect(TokenKind::Colon, "':'")?;
                self.parse_test()?
            }
            None => self.parse_bitor()?,
        };

        if let (Some(key), true) = (first_key.clone(), self.check(&TokenKind::For)) {
            let generators = self.parse_comprehension_clauses()?;
            self.expect(TokenKind::RBrace, "'}'")?;
            return Ok(Expr::new(
                ExprKind::Comprehension {
                    kind: ComprehensionKind::Dict,
                    element: Box::new(key),
                    value: Some(Box::new(first_value)),
                    generators,
                },
                line,
            ));
        }

        let mut entries = vec![(first_key, first_value)];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBrace) {
                break;
            }
            if self.eat(&TokenKind::DoubleStar) {
                entries.push((None, self.parse_bitor()?));
            } else {
                let key = self.parse_test()?;
                self.expect(TokenKind::Colon, "':'")?;
                entries.push((Some(key), self.parse_test()?));
            }
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(Expr::new(ExprKind::Dict(entries), line))
    }

    fn parse_set_rest(&mut self, first: Expr, line: u32) -> Result<Expr, ParseError> {
        if self.check(&TokenKind::For) {
            let generators = self.parse_comprehension_clauses()?;
            self.expect(TokenKind::RBrace, "'}'")?;
            return Ok(Expr::new(
                ExprKind::Comprehension {
                    kind: ComprehensionKind::Set,
                    element: Box::new(first),
                    value: None,
                    generators,
                },
                line,
            ));
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBrace) {
                break;
            }
            items.push(self.parse_star_or_test()?);
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(Expr::new(ExprKind::Set(items), line))
    }
}
