//! Parser (spec.md §4.C): builds the form tree from the lexer's token
//! stream.
//!
//! `<head arg*>` is the only shape that can appear as a *statement*;
//! everything else nests inside it as an argument. Top level is just a
//! sequence of such forms (plus top-level literals/lists, which are
//! legal but unusual — constant tables sometimes appear bare).

use std::rc::Rc;

use crate::diag::{Diagnostic, DiagnosticKind, Result};
use crate::form::{Form, FormKind};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::span::SourceUnit;

pub fn parse(unit: Rc<SourceUnit>) -> Result<Vec<Form>> {
    let mut parser = Parser::new(unit);
    parser.parse_top_level()
}

struct Parser {
    lexer: Lexer,
    lookahead: Option<Token>,
}

impl Parser {
    fn new(unit: Rc<SourceUnit>) -> Parser {
        Parser {
            lexer: Lexer::new(unit),
            lookahead: None,
        }
    }

    fn peek(&mut self) -> Result<&Token> {
        if self.lookahead.is_none() {
            self.lookahead = Some(self.lexer.next_token()?);
        }
        Ok(self.lookahead.as_ref().unwrap())
    }

    fn bump(&mut self) -> Result<Token> {
        match self.lookahead.take() {
            Some(t) => Ok(t),
            None => Ok(self.lexer.next_token()?),
        }
    }

    fn parse_top_level(&mut self) -> Result<Vec<Form>> {
        let mut out = Vec::new();
        loop {
            // Stray `)` tokens left over from macro expansion are
            // tolerated (skipped) at top level.
            if matches!(self.peek()?.kind, TokenKind::RParen) {
                self.bump()?;
                continue;
            }
            if matches!(self.peek()?.kind, TokenKind::Eof) {
                break;
            }
            out.push(self.parse_form()?);
        }
        Ok(out)
    }

    fn parse_form(&mut self) -> Result<Form> {
        let tok = self.bump()?;
        match tok.kind {
            TokenKind::LAngle => self.parse_angle_form(tok.span),
            TokenKind::LParen => self.parse_list(tok.span),
            TokenKind::LBracket => self.parse_vector(tok.span),
            TokenKind::LBrace => self.parse_segment(tok.span),
            TokenKind::Str(s) => Ok(Form::new(FormKind::Str(Rc::from(s)), tok.span)),
            TokenKind::Number(n) => Ok(Form::new(FormKind::Integer(n), tok.span)),
            TokenKind::Atom(a) => Ok(Form::new(FormKind::Atom(Rc::from(a)), tok.span)),
            TokenKind::DotAtom(a) => Ok(Form::new(FormKind::LocalRef(Rc::from(a)), tok.span)),
            TokenKind::CommaAtom(a) => Ok(Form::new(FormKind::GlobalRef(Rc::from(a)), tok.span)),
            TokenKind::Quote => {
                let inner = self.parse_form()?;
                let span = tok.span.join(&inner.span);
                Ok(Form::new(FormKind::Quasiquote(Box::new(inner)), span))
            }
            TokenKind::Backquote => {
                let inner = self.parse_form()?;
                let span = tok.span.join(&inner.span);
                Ok(Form::new(FormKind::Quasiquote(Box::new(inner)), span))
            }
            TokenKind::CommaSplice => {
                let inner = self.parse_form()?;
                let span = tok.span.join(&inner.span);
                Ok(Form::new(FormKind::UnquoteSplice(Box::new(inner)), span))
            }
            TokenKind::Percent | TokenKind::PercentPercent => {
                let inner = self.parse_form()?;
                let span = tok.span.join(&inner.span);
                let head = Form::new(
                    FormKind::Atom(Rc::from(if tok.kind == TokenKind::Percent { "%" } else { "%%" })),
                    tok.span.clone(),
                );
                Ok(Form::new(
                    FormKind::Form {
                        head: Box::new(head),
                        args: vec![inner],
                    },
                    span,
                ))
            }
            TokenKind::RAngle => Err(Diagnostic::new(
                DiagnosticKind::ParseError,
                tok.span,
                "unexpected `>` with no matching `<`",
            )
            .into()),
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => Err(Diagnostic::new(
                DiagnosticKind::ParseError,
                tok.span,
                "unexpected closing delimiter",
            )
            .into()),
            TokenKind::Eof => Err(Diagnostic::new(DiagnosticKind::ParseError, tok.span, "unexpected end of input").into()),
        }
    }

    fn parse_angle_form(&mut self, start_span: crate::span::Span) -> Result<Form> {
        if matches!(self.peek()?.kind, TokenKind::RAngle) {
            let close = self.bump()?;
            return Err(Diagnostic::new(
                DiagnosticKind::ParseError,
                start_span.join(&close.span),
                "empty `<>` form has no head",
            )
            .into());
        }
        let head = self.parse_form()?;
        let mut args = Vec::new();
        loop {
            match self.peek()?.kind {
                TokenKind::RAngle => {
                    let close = self.bump()?;
                    return Ok(Form::new(
                        FormKind::Form {
                            head: Box::new(head),
                            args,
                        },
                        start_span.join(&close.span),
                    ));
                }
                TokenKind::Eof => {
                    return Err(Diagnostic::new(
                        DiagnosticKind::ParseError,
                        start_span,
                        "unterminated `<...>` form",
                    )
                    .into())
                }
                // A stray `)` produced by macro expansion is skipped
                // rather than treated as a closing delimiter here too.
                TokenKind::RParen => {
                    self.bump()?;
                }
                _ => args.push(self.parse_form()?),
            }
        }
    }

    fn parse_list(&mut self, start_span: crate::span::Span) -> Result<Form> {
        let mut items = Vec::new();
        loop {
            match self.peek()?.kind {
                TokenKind::RParen => {
                    let close = self.bump()?;
                    return Ok(Form::new(FormKind::List(items), start_span.join(&close.span)));
                }
                TokenKind::Eof => {
                    return Err(Diagnostic::new(DiagnosticKind::ParseError, start_span, "unterminated `(...)` list").into())
                }
                _ => items.push(self.parse_form()?),
            }
        }
    }

    fn parse_vector(&mut self, start_span: crate::span::Span) -> Result<Form> {
        let mut items = Vec::new();
        loop {
            match self.peek()?.kind {
                TokenKind::RBracket => {
                    let close = self.bump()?;
                    return Ok(Form::new(FormKind::Vector(items), start_span.join(&close.span)));
                }
                TokenKind::Eof => {
                    return Err(Diagnostic::new(DiagnosticKind::ParseError, start_span, "unterminated `[...]` vector").into())
                }
                _ => items.push(self.parse_form()?),
            }
        }
    }

    fn parse_segment(&mut self, start_span: crate::span::Span) -> Result<Form> {
        let mut items = Vec::new();
        loop {
            match self.peek()?.kind {
                TokenKind::RBrace => {
                    let close = self.bump()?;
                    return Ok(Form::new(FormKind::Segment(items), start_span.join(&close.span)));
                }
                TokenKind::Eof => {
                    return Err(Diagnostic::new(DiagnosticKind::ParseError, start_span, "unterminated `{...}` segment").into())
                }
                _ => items.push(self.parse_form()?),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse_src(src: &str) -> Vec<Form> {
        let unit = Rc::new(SourceUnit {
            name: "test".into(),
            text: Rc::from(src),
        });
        parse(unit).unwrap()
    }

    #[test]
    fn parses_a_routine_form() {
        let forms = parse_src("<ROUTINE GO () <TELL \"Hi\" CR>>");
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0].head_atom(), Some("ROUTINE"));
        assert_eq!(forms[0].args()[0].kind, FormKind::Atom(Rc::from("GO")));
        assert!(matches!(forms[0].args()[1].kind, FormKind::List(ref v) if v.is_empty()));
    }

    #[test]
    fn parses_list_vector_segment() {
        let forms = parse_src("(1 2 3) [A B] {X}");
        assert!(matches!(forms[0].kind, FormKind::List(ref v) if v.len() == 3));
        assert!(matches!(forms[1].kind, FormKind::Vector(ref v) if v.len() == 2));
        assert!(matches!(forms[2].kind, FormKind::Segment(ref v) if v.len() == 1));
    }

    #[test]
    fn stray_rparen_at_top_level_is_skipped() {
        let forms = parse_src("A ) B");
        assert_eq!(forms.len(), 2);
    }

    #[test]
    fn unbalanced_rangle_is_a_hard_error() {
        let unit = Rc::new(SourceUnit {
            name: "test".into(),
            text: Rc::from(">"),
        });
        assert!(parse(unit).is_err());
    }

    #[test]
    fn local_and_global_refs() {
        let forms = parse_src(".X ,Y");
        assert_eq!(forms[0].kind, FormKind::LocalRef(Rc::from("X")));
        assert_eq!(forms[1].kind, FormKind::GlobalRef(Rc::from("Y")));
    }

    #[test]
    fn percent_wraps_into_a_call_form() {
        let forms = parse_src("%<FOO>");
        assert_eq!(forms[0].head_atom(), Some("%"));
        assert_eq!(forms[0].args()[0].head_atom(), Some("FOO"));
    }
}
