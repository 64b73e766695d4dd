//! Lexer (spec.md §4.A): a hand-written byte-stream scanner producing
//! a lazy sequence of tokens.
//!
//! The teacher tokenizes with a `pest`-generated parser because the
//! VCPU assembly grammar is a fixed, regular mnemonic syntax. This
//! source language needs two independent nesting-depth counters to
//! decide how far a stray `;name` comment reaches, tolerates stray
//! closing delimiters produced by macro expansion, and silently drops
//! non-whitespace control bytes — none of which map onto a static PEG
//! grammar without contortions, so the lexer is hand-written instead
//! (see `DESIGN.md` for the recorded dependency drop).

use std::rc::Rc;

use crate::diag::{Diagnostic, DiagnosticKind};
use crate::span::{SourceUnit, Span};

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    LAngle,
    RAngle,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Str(String),
    Atom(String),
    Number(i32),
    DotAtom(String),
    CommaAtom(String),
    Quote,
    Backquote,
    CommaSplice,
    Percent,
    PercentPercent,
    Eof,
}

#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

pub struct Lexer {
    unit: Rc<SourceUnit>,
    bytes: Vec<u8>,
    pos: usize,
}

fn is_symbol_boundary(b: u8) -> bool {
    matches!(
        b,
        b'<' | b'>' | b'(' | b')' | b'[' | b']' | b'{' | b'}' | b'"' | b';' | b',' | b'\''
    ) || b.is_ascii_whitespace()
}

impl Lexer {
    pub fn new(unit: Rc<SourceUnit>) -> Lexer {
        let bytes = unit.text.as_bytes().to_vec();
        Lexer { unit, bytes, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(self.unit.clone(), start, self.pos)
    }

    fn error(&self, start: usize, kind: DiagnosticKind, message: impl Into<String>) -> Diagnostic {
        Diagnostic::new(kind, self.span_from(start), message)
    }

    /// Skips whitespace, silently-stripped control characters, and
    /// `;`-comments, leaving `self.pos` at the start of the next real
    /// token (or EOF).
    fn skip_trivia(&mut self) -> Result<(), Diagnostic> {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.pos += 1;
                }
                // Control characters other than whitespace are stripped
                // silently (spec.md §4.A).
                Some(b) if b < 0x20 && !b.is_ascii_whitespace() => {
                    self.pos += 1;
                }
                Some(b'#') if self.peek_at(1) == Some(b'#') => {
                    // Not part of this language; treat a lone run as trivia only
                    // if genuinely unreachable — kept out, `#` has no meaning here.
                    break;
                }
                Some(b';') => {
                    let start = self.pos;
                    self.pos += 1;
                    if self.peek() == Some(b'"') {
                        self.skip_string_literal(start)?;
                    } else {
                        self.skip_one_unit(start)?;
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn skip_string_literal(&mut self, start: usize) -> Result<(), Diagnostic> {
        // consumes the opening quote onward, discarding the string.
        self.bump(); // opening quote
        loop {
            match self.bump() {
                None => {
                    return Err(self.error(
                        start,
                        DiagnosticKind::LexError,
                        "unterminated string inside a `;\"...\"` comment",
                    ))
                }
                Some(b'\\') => {
                    self.bump();
                }
                Some(b'"') => return Ok(()),
                _ => {}
            }
        }
    }

    /// Discards exactly one following "form unit" as required by a
    /// stray `;name` comment: an atom/number/string/ref token, or a
    /// fully-bracketed group, tracking nesting depth so embedded
    /// brackets are skipped in full.
    fn skip_one_unit(&mut self, comment_start: usize) -> Result<(), Diagnostic> {
        let mut need = 1i32;
        let mut stack: Vec<TokenKind> = Vec::new();
        while need > 0 {
            let tok = self.raw_next_token(comment_start)?;
            match &tok.kind {
                TokenKind::Eof => {
                    return Err(self.error(
                        comment_start,
                        DiagnosticKind::LexError,
                        "unterminated comment: stray `;` had nothing to skip",
                    ))
                }
                TokenKind::Quote
                | TokenKind::Backquote
                | TokenKind::CommaSplice
                | TokenKind::Percent
                | TokenKind::PercentPercent => {
                    if stack.is_empty() {
                        need += 1;
                    }
                }
                TokenKind::LAngle | TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => {
                    stack.push(tok.kind.clone());
                }
                TokenKind::RAngle | TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                    stack.pop();
                    if stack.is_empty() {
                        need -= 1;
                    }
                }
                _ => {
                    if stack.is_empty() {
                        need -= 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn read_string(&mut self) -> Result<TokenKind, Diagnostic> {
        let start = self.pos;
        self.bump(); // opening quote
        let mut s = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(self.error(start, DiagnosticKind::LexError, "unterminated string"))
                }
                Some(b'\\') => match self.bump() {
                    Some(b'n') => s.push('\n'),
                    Some(b't') => s.push('\t'),
                    Some(b'"') => s.push('"'),
                    Some(b'\\') => s.push('\\'),
                    Some(other) => s.push(other as char),
                    None => {
                        return Err(self.error(
                            start,
                            DiagnosticKind::LexError,
                            "unterminated string (trailing escape)",
                        ))
                    }
                },
                Some(b'"') => return Ok(TokenKind::Str(s)),
                Some(b) => s.push(b as char),
            }
        }
    }

    fn read_symbol_text(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if is_symbol_boundary(b) {
                break;
            }
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn try_parse_number(text: &str) -> Option<i32> {
        if text.is_empty() {
            return None;
        }
        let (neg, rest) = match text.strip_prefix('-') {
            Some(r) => (true, r),
            None => (false, text),
        };
        if rest.is_empty() {
            return None;
        }
        let value = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16).ok()?
        } else if let Some(oct) = rest.strip_prefix("0o").or_else(|| rest.strip_prefix("0O")) {
            i64::from_str_radix(oct, 8).ok()?
        } else if let Some(bin) = rest.strip_prefix("0b").or_else(|| rest.strip_prefix("0B")) {
            i64::from_str_radix(bin, 2).ok()?
        } else if rest.bytes().all(|b| b.is_ascii_digit()) {
            rest.parse::<i64>().ok()?
        } else {
            return None;
        };
        let signed = if neg { -value } else { value };
        i32::try_from(signed).ok()
    }

    /// Reads the next token without trivia handling; used internally
    /// both by `next_token` and by `skip_one_unit`.
    fn raw_next_token(&mut self, ctx_start: usize) -> Result<Token, Diagnostic> {
        let start = self.pos;
        let kind = match self.peek() {
            None => TokenKind::Eof,
            Some(b'<') => {
                self.pos += 1;
                TokenKind::LAngle
            }
            Some(b'>') => {
                self.pos += 1;
                TokenKind::RAngle
            }
            Some(b'(') => {
                self.pos += 1;
                TokenKind::LParen
            }
            Some(b')') => {
                self.pos += 1;
                TokenKind::RParen
            }
            Some(b'[') => {
                self.pos += 1;
                TokenKind::LBracket
            }
            Some(b']') => {
                self.pos += 1;
                TokenKind::RBracket
            }
            Some(b'{') => {
                self.pos += 1;
                TokenKind::LBrace
            }
            Some(b'}') => {
                self.pos += 1;
                TokenKind::RBrace
            }
            Some(b'"') => self.read_string()?,
            Some(b'\'') => {
                self.pos += 1;
                TokenKind::Quote
            }
            Some(b'`') => {
                self.pos += 1;
                TokenKind::Backquote
            }
            Some(b',') => {
                self.pos += 1;
                if self.peek() == Some(b'!') {
                    self.pos += 1;
                    TokenKind::CommaSplice
                } else {
                    let name = self.read_symbol_text();
                    if name.is_empty() {
                        return Err(self.error(
                            start,
                            DiagnosticKind::LexError,
                            "expected a name after `,`",
                        ));
                    }
                    TokenKind::CommaAtom(name.to_uppercase())
                }
            }
            Some(b'.') if self.peek_at(1).map(|b| !b.is_ascii_digit()).unwrap_or(false) => {
                self.pos += 1;
                let name = self.read_symbol_text();
                TokenKind::DotAtom(name.to_uppercase())
            }
            Some(b'%') => {
                self.pos += 1;
                if self.peek() == Some(b'%') {
                    self.pos += 1;
                    TokenKind::PercentPercent
                } else {
                    TokenKind::Percent
                }
            }
            Some(_) => {
                let text = self.read_symbol_text();
                if text.is_empty() {
                    // Shouldn't happen since every remaining byte is either
                    // whitespace (handled by skip_trivia) or a symbol byte.
                    self.pos += 1;
                    return self.raw_next_token(ctx_start);
                }
                if let Some(n) = Self::try_parse_number(&text) {
                    TokenKind::Number(n)
                } else {
                    TokenKind::Atom(text.to_uppercase())
                }
            }
        };
        Ok(Token {
            kind,
            span: self.span_from(start),
        })
    }

    pub fn next_token(&mut self) -> Result<Token, Diagnostic> {
        self.skip_trivia()?;
        let start = self.pos;
        self.raw_next_token(start)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn lex_all(src: &str) -> Vec<TokenKind> {
        let unit = Rc::new(SourceUnit {
            name: "test".into(),
            text: Rc::from(src),
        });
        let mut lexer = Lexer::new(unit);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token().unwrap();
            let eof = tok.kind == TokenKind::Eof;
            out.push(tok.kind);
            if eof {
                break;
            }
        }
        out
    }

    #[test]
    fn lexes_a_simple_form() {
        let toks = lex_all("<ROUTINE GO () <TELL \"Hi\" CR>>");
        assert_eq!(
            toks,
            vec![
                TokenKind::LAngle,
                TokenKind::Atom("ROUTINE".into()),
                TokenKind::Atom("GO".into()),
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::LAngle,
                TokenKind::Atom("TELL".into()),
                TokenKind::Str("Hi".into()),
                TokenKind::Atom("CR".into()),
                TokenKind::RAngle,
                TokenKind::RAngle,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn dot_and_comma_atoms() {
        let toks = lex_all(".FOO ,BAR");
        assert_eq!(
            toks,
            vec![
                TokenKind::DotAtom("FOO".into()),
                TokenKind::CommaAtom("BAR".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn negative_and_hex_numbers() {
        let toks = lex_all("-17 0xFF 0b101 0o17");
        assert_eq!(
            toks,
            vec![
                TokenKind::Number(-17),
                TokenKind::Number(255),
                TokenKind::Number(5),
                TokenKind::Number(15),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn semicolon_skips_single_atom() {
        let toks = lex_all("A ;B C");
        assert_eq!(
            toks,
            vec![TokenKind::Atom("A".into()), TokenKind::Atom("C".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn semicolon_skips_a_whole_bracketed_form() {
        let toks = lex_all("A ;<FOO <BAR> BAZ> C");
        assert_eq!(
            toks,
            vec![TokenKind::Atom("A".into()), TokenKind::Atom("C".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn semicolon_string_comment_skips_a_string() {
        let toks = lex_all("A ;\"skip me\" C");
        assert_eq!(
            toks,
            vec![TokenKind::Atom("A".into()), TokenKind::Atom("C".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn control_bytes_are_stripped() {
        let toks = lex_all("A\u{000C}B");
        assert_eq!(toks, vec![TokenKind::Atom("A".into()), TokenKind::Atom("B".into()), TokenKind::Eof]);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let unit = Rc::new(SourceUnit {
            name: "test".into(),
            text: Rc::from("\"unterminated"),
        });
        let mut lexer = Lexer::new(unit);
        assert!(lexer.next_token().is_err());
    }
}
