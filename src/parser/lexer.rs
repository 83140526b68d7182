//! Hand-written lexer for the formula dialect.
//!
//! Indentation is significant: the lexer keeps an indent stack and emits
//! `Indent`/`Dedent` tokens at the start of logical lines, Python-style.
//! Newlines inside brackets are implicit line joins and produce nothing.

use crate::parser::ast::Span;
use crate::parser::error::{ParseError, ParseErrorKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    // Layout
    Newline,
    Indent,
    Dedent,
    EndOfInput,

    // Literals and names
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    Keyword(Kw),

    // Operators
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,
    Assign,
    AugAssign(&'static str),

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semicolon,
    Dot,
    Ellipsis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kw {
    None,
    True,
    False,
    And,
    Or,
    Not,
    If,
    Elif,
    Else,
    For,
    While,
    In,
    Is,
    Def,
    Return,
    Lambda,
    Class,
    Pass,
    Break,
    Continue,
    Try,
    Except,
    Finally,
    Raise,
    With,
    As,
    Del,
    Import,
    From,
    Global,
    Nonlocal,
    Assert,
    Yield,
    Async,
    Await,
}

fn keyword(word: &str) -> Option<Kw> {
    Some(match word {
        "None" => Kw::None,
        "True" => Kw::True,
        "False" => Kw::False,
        "and" => Kw::And,
        "or" => Kw::Or,
        "not" => Kw::Not,
        "if" => Kw::If,
        "elif" => Kw::Elif,
        "else" => Kw::Else,
        "for" => Kw::For,
        "while" => Kw::While,
        "in" => Kw::In,
        "is" => Kw::Is,
        "def" => Kw::Def,
        "return" => Kw::Return,
        "lambda" => Kw::Lambda,
        "class" => Kw::Class,
        "pass" => Kw::Pass,
        "break" => Kw::Break,
        "continue" => Kw::Continue,
        "try" => Kw::Try,
        "except" => Kw::Except,
        "finally" => Kw::Finally,
        "raise" => Kw::Raise,
        "with" => Kw::With,
        "as" => Kw::As,
        "del" => Kw::Del,
        "import" => Kw::Import,
        "from" => Kw::From,
        "global" => Kw::Global,
        "nonlocal" => Kw::Nonlocal,
        "assert" => Kw::Assert,
        "yield" => Kw::Yield,
        "async" => Kw::Async,
        "await" => Kw::Await,
        _ => return None,
    })
}

/// A token plus its source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub span: Span,
    pub line: u32,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(source).run()
}

struct Lexer<'s> {
    src: &'s [u8],
    pos: usize,
    line: u32,
    paren_depth: usize,
    indents: Vec<usize>,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl<'s> Lexer<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            src: source.as_bytes(),
            pos: 0,
            line: 1,
            paren_depth: 0,
            indents: vec![0],
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, off: usize) -> Option<u8> {
        self.src.get(self.pos + off).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn push(&mut self, tok: Tok, start: usize) {
        self.tokens.push(Token {
            tok,
            span: Span(start..self.pos),
            line: self.line,
        });
    }

    fn error(&self, kind: ParseErrorKind, start: usize) -> ParseError {
        ParseError::new(kind, Span(start..self.pos.max(start + 1)), self.line)
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        loop {
            if self.at_line_start && self.paren_depth == 0 {
                if !self.handle_indentation()? {
                    break;
                }
                self.at_line_start = false;
            }
            match self.peek() {
                None => break,
                Some(c) => self.next_token(c)?,
            }
        }
        self.finish();
        Ok(self.tokens)
    }

    /// Measure leading whitespace, skip blank and comment-only lines, emit
    /// Indent/Dedent. Returns false at end of input.
    fn handle_indentation(&mut self) -> Result<bool, ParseError> {
        loop {
            let line_start = self.pos;
            let mut width = 0usize;
            loop {
                match self.peek() {
                    Some(b' ') => {
                        width += 1;
                        self.bump();
                    }
                    Some(b'\t') => {
                        // Tab advances to the next multiple of 8, as CPython does.
                        width = width / 8 * 8 + 8;
                        self.bump();
                    }
                    _ => break,
                }
            }
            match self.peek() {
                None => return Ok(false),
                // Blank or comment-only line: consume through the newline and retry.
                Some(b'\n') | Some(b'\r') => {
                    self.consume_newline();
                    continue;
                }
                Some(b'#') => {
                    self.skip_comment();
                    self.consume_newline();
                    continue;
                }
                Some(_) => {
                    let current = *self.indents.last().unwrap_or(&0);
                    if width > current {
                        self.indents.push(width);
                        self.push(Tok::Indent, line_start);
                    } else if width < current {
                        while *self.indents.last().unwrap_or(&0) > width {
                            self.indents.pop();
                            self.push(Tok::Dedent, line_start);
                        }
                        if *self.indents.last().unwrap_or(&0) != width {
                            return Err(self.error(ParseErrorKind::BadIndentation, line_start));
                        }
                    }
                    return Ok(true);
                }
            }
        }
    }

    fn consume_newline(&mut self) {
        if self.peek() == Some(b'\r') {
            self.bump();
        }
        if self.peek() == Some(b'\n') {
            self.bump();
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == b'\n' {
                break;
            }
            self.bump();
        }
    }

    fn next_token(&mut self, c: u8) -> Result<(), ParseError> {
        let start = self.pos;
        match c {
            b' ' | b'\t' => {
                self.bump();
            }
            b'#' => self.skip_comment(),
            b'\\' if matches!(self.peek_at(1), Some(b'\n') | Some(b'\r')) => {
                // Explicit line continuation.
                self.bump();
                self.consume_newline();
            }
            b'\r' | b'\n' => {
                self.consume_newline();
                if self.paren_depth == 0 {
                    // Collapse consecutive newlines into one token.
                    if !matches!(
                        self.tokens.last().map(|t| &t.tok),
                        Some(Tok::Newline) | None
                    ) {
                        self.push(Tok::Newline, start);
                    }
                    self.at_line_start = true;
                }
            }
            b'\'' | b'"' => self.lex_string(c)?,
            b'0'..=b'9' => self.lex_number()?,
            b'.' => {
                if matches!(self.peek_at(1), Some(b'0'..=b'9')) {
                    self.lex_number()?;
                } else if self.peek_at(1) == Some(b'.') && self.peek_at(2) == Some(b'.') {
                    self.bump();
                    self.bump();
                    self.bump();
                    self.push(Tok::Ellipsis, start);
                } else {
                    self.bump();
                    self.push(Tok::Dot, start);
                }
            }
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => self.lex_name(),
            _ => self.lex_operator(c)?,
        }
        Ok(())
    }

    fn lex_name(&mut self) {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.bump();
            } else {
                break;
            }
        }
        let word = core::str::from_utf8(&self.src[start..self.pos])
            .expect("identifier bytes are ASCII")
            .to_string();
        let tok = match keyword(&word) {
            Some(kw) => Tok::Keyword(kw),
            None => Tok::Name(word),
        };
        self.push(tok, start);
    }

    fn lex_number(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let mut is_float = false;
        // Hex, octal, binary prefixes.
        if self.peek() == Some(b'0')
            && matches!(
                self.peek_at(1),
                Some(b'x') | Some(b'X') | Some(b'o') | Some(b'O') | Some(b'b') | Some(b'B')
            )
        {
            let radix_ch = self.peek_at(1).unwrap();
            self.bump();
            self.bump();
            let digits_start = self.pos;
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() || c == b'_' {
                    self.bump();
                } else {
                    break;
                }
            }
            let text: String = core::str::from_utf8(&self.src[digits_start..self.pos])
                .expect("number bytes are ASCII")
                .replace('_', "");
            let radix = match radix_ch {
                b'x' | b'X' => 16,
                b'o' | b'O' => 8,
                _ => 2,
            };
            let value = i64::from_str_radix(&text, radix).map_err(|_| {
                self.error(
                    ParseErrorKind::InvalidNumber {
                        text: self.slice(start),
                    },
                    start,
                )
            })?;
            self.push(Tok::Int(value), start);
            return Ok(());
        }

        while let Some(c) = self.peek() {
            match c {
                b'0'..=b'9' | b'_' => {
                    self.bump();
                }
                b'.' if !is_float && self.peek_at(1) != Some(b'.') => {
                    is_float = true;
                    self.bump();
                }
                b'e' | b'E' => {
                    is_float = true;
                    self.bump();
                    if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
        let text = self.slice(start).replace('_', "");
        if is_float {
            let value: f64 = text.parse().map_err(|_| {
                self.error(ParseErrorKind::InvalidNumber { text: text.clone() }, start)
            })?;
            self.push(Tok::Float(value), start);
        } else {
            let value: i64 = text.parse().map_err(|_| {
                self.error(ParseErrorKind::InvalidNumber { text: text.clone() }, start)
            })?;
            self.push(Tok::Int(value), start);
        }
        Ok(())
    }

    fn slice(&self, start: usize) -> String {
        core::str::from_utf8(&self.src[start..self.pos])
            .unwrap_or("")
            .to_string()
    }

    fn lex_string(&mut self, quote: u8) -> Result<(), ParseError> {
        let start = self.pos;
        self.bump(); // opening quote
        let mut value = String::new();
        loop {
            match self.bump() {
                None | Some(b'\n') => {
                    return Err(self.error(ParseErrorKind::UnterminatedString, start));
                }
                Some(c) if c == quote => break,
                Some(b'\\') => match self.bump() {
                    None => return Err(self.error(ParseErrorKind::UnterminatedString, start)),
                    Some(b'n') => value.push('\n'),
                    Some(b't') => value.push('\t'),
                    Some(b'r') => value.push('\r'),
                    Some(b'0') => value.push('\0'),
                    Some(b'\\') => value.push('\\'),
                    Some(b'\'') => value.push('\''),
                    Some(b'"') => value.push('"'),
                    Some(b'\n') => {} // escaped newline inside a string
                    Some(other) => {
                        // Unknown escape: keep it verbatim, as CPython warns-and-keeps.
                        value.push('\\');
                        value.push(other as char);
                    }
                },
                Some(c) => {
                    if c < 0x80 {
                        value.push(c as char);
                    } else {
                        // Re-decode the UTF-8 sequence starting at this byte.
                        let seq_start = self.pos - 1;
                        let width = utf8_width(c);
                        for _ in 1..width {
                            self.bump();
                        }
                        let chunk = core::str::from_utf8(&self.src[seq_start..self.pos])
                            .map_err(|_| {
                                self.error(ParseErrorKind::UnterminatedString, seq_start)
                            })?;
                        value.push_str(chunk);
                    }
                }
            }
        }
        self.push(Tok::Str(value), start);
        Ok(())
    }

    fn lex_operator(&mut self, c: u8) -> Result<(), ParseError> {
        let start = self.pos;
        macro_rules! two {
            ($second:expr, $double:expr, $single:expr) => {{
                self.bump();
                if self.peek() == Some($second) {
                    self.bump();
                    $double
                } else {
                    $single
                }
            }};
        }
        let tok = match c {
            b'(' => {
                self.bump();
                self.paren_depth += 1;
                Tok::LParen
            }
            b')' => {
                self.bump();
                self.paren_depth = self.paren_depth.saturating_sub(1);
                Tok::RParen
            }
            b'[' => {
                self.bump();
                self.paren_depth += 1;
                Tok::LBracket
            }
            b']' => {
                self.bump();
                self.paren_depth = self.paren_depth.saturating_sub(1);
                Tok::RBracket
            }
            b'{' => {
                self.bump();
                self.paren_depth += 1;
                Tok::LBrace
            }
            b'}' => {
                self.bump();
                self.paren_depth = self.paren_depth.saturating_sub(1);
                Tok::RBrace
            }
            b',' => {
                self.bump();
                Tok::Comma
            }
            b':' => {
                self.bump();
                Tok::Colon
            }
            b';' => {
                self.bump();
                Tok::Semicolon
            }
            b'~' => {
                self.bump();
                Tok::Tilde
            }
            b'+' => two!(b'=', Tok::AugAssign("+="), Tok::Plus),
            b'-' => two!(b'=', Tok::AugAssign("-="), Tok::Minus),
            b'%' => two!(b'=', Tok::AugAssign("%="), Tok::Percent),
            b'&' => two!(b'=', Tok::AugAssign("&="), Tok::Amp),
            b'|' => two!(b'=', Tok::AugAssign("|="), Tok::Pipe),
            b'^' => two!(b'=', Tok::AugAssign("^="), Tok::Caret),
            b'=' => two!(b'=', Tok::EqEq, Tok::Assign),
            b'!' => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    Tok::NotEq
                } else {
                    return Err(self.error(ParseErrorKind::UnexpectedChar { ch: '!' }, start));
                }
            }
            b'*' => {
                self.bump();
                match self.peek() {
                    Some(b'*') => {
                        self.bump();
                        if self.peek() == Some(b'=') {
                            self.bump();
                            Tok::AugAssign("**=")
                        } else {
                            Tok::DoubleStar
                        }
                    }
                    Some(b'=') => {
                        self.bump();
                        Tok::AugAssign("*=")
                    }
                    _ => Tok::Star,
                }
            }
            b'/' => {
                self.bump();
                match self.peek() {
                    Some(b'/') => {
                        self.bump();
                        if self.peek() == Some(b'=') {
                            self.bump();
                            Tok::AugAssign("//=")
                        } else {
                            Tok::DoubleSlash
                        }
                    }
                    Some(b'=') => {
                        self.bump();
                        Tok::AugAssign("/=")
                    }
                    _ => Tok::Slash,
                }
            }
            b'<' => {
                self.bump();
                match self.peek() {
                    Some(b'<') => {
                        self.bump();
                        if self.peek() == Some(b'=') {
                            self.bump();
                            Tok::AugAssign("<<=")
                        } else {
                            Tok::Shl
                        }
                    }
                    Some(b'=') => {
                        self.bump();
                        Tok::Le
                    }
                    _ => Tok::Lt,
                }
            }
            b'>' => {
                self.bump();
                match self.peek() {
                    Some(b'>') => {
                        self.bump();
                        if self.peek() == Some(b'=') {
                            self.bump();
                            Tok::AugAssign(">>=")
                        } else {
                            Tok::Shr
                        }
                    }
                    Some(b'=') => {
                        self.bump();
                        Tok::Ge
                    }
                    _ => Tok::Gt,
                }
            }
            other => {
                self.bump();
                return Err(self.error(
                    ParseErrorKind::UnexpectedChar {
                        ch: other as char,
                    },
                    start,
                ));
            }
        };
        self.push(tok, start);
        Ok(())
    }

    fn finish(&mut self) {
        let end = self.pos;
        if !matches!(
            self.tokens.last().map(|t| &t.tok),
            Some(Tok::Newline) | None
        ) {
            self.push(Tok::Newline, end);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent, end);
        }
        self.push(Tok::EndOfInput, end);
    }
}

fn utf8_width(first: u8) -> usize {
    if first >= 0xF0 {
        4
    } else if first >= 0xE0 {
        3
    } else {
        2
    }
}

#[cfg(test)]
mod lexer_test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn numbers_and_operators() {
        assert_eq!(
            toks("1 + 2.5 ** 3"),
            vec![
                Tok::Int(1),
                Tok::Plus,
                Tok::Float(2.5),
                Tok::DoubleStar,
                Tok::Int(3),
                Tok::Newline,
                Tok::EndOfInput,
            ]
        );
    }

    #[test]
    fn hex_and_underscored_literals() {
        assert_eq!(toks("0xFF")[0], Tok::Int(255));
        assert_eq!(toks("1_000_000")[0], Tok::Int(1_000_000));
        assert_eq!(toks("0b101")[0], Tok::Int(5));
    }

    #[test]
    fn strings_with_escapes() {
        assert_eq!(toks("'a\\nb'")[0], Tok::Str("a\nb".into()));
        assert_eq!(toks("\"x\"")[0], Tok::Str("x".into()));
    }

    #[test]
    fn indentation_produces_indent_dedent() {
        let t = toks("if x:\n    y\nz");
        assert_eq!(
            t,
            vec![
                Tok::Keyword(Kw::If),
                Tok::Name("x".into()),
                Tok::Colon,
                Tok::Newline,
                Tok::Indent,
                Tok::Name("y".into()),
                Tok::Newline,
                Tok::Dedent,
                Tok::Name("z".into()),
                Tok::Newline,
                Tok::EndOfInput,
            ]
        );
    }

    #[test]
    fn newlines_inside_brackets_are_joined() {
        let t = toks("[1,\n 2]");
        assert_eq!(
            t,
            vec![
                Tok::LBracket,
                Tok::Int(1),
                Tok::Comma,
                Tok::Int(2),
                Tok::RBracket,
                Tok::Newline,
                Tok::EndOfInput,
            ]
        );
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        let t = toks("a\n\n# comment\nb");
        assert_eq!(
            t,
            vec![
                Tok::Name("a".into()),
                Tok::Newline,
                Tok::Name("b".into()),
                Tok::Newline,
                Tok::EndOfInput,
            ]
        );
    }

    #[test]
    fn augmented_operators() {
        assert_eq!(toks("x += 1")[1], Tok::AugAssign("+="));
        assert_eq!(toks("x //= 1")[1], Tok::AugAssign("//="));
        assert_eq!(toks("x **= 1")[1], Tok::AugAssign("**="));
        assert_eq!(toks("x <<= 1")[1], Tok::AugAssign("<<="));
    }

    #[test]
    fn ellipsis_is_a_single_token() {
        assert_eq!(toks("...")[0], Tok::Ellipsis);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(tokenize("'abc").is_err());
    }

    #[test]
    fn bad_dedent_is_an_error() {
        assert!(tokenize("if x:\n    y\n  z").is_err());
    }
}
