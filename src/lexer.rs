// ABOUTME: Tokenizer for BFF source using nom combinators, attaching a range to every token

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{digit1, satisfy},
    combinator::{recognize, value},
    IResult, Parser,
};

use crate::ast::{Sigil, StringPart, StringTemplate, Substitution};
use crate::error::DiagnosticKind;
use crate::model::FileDiagnostic;
use crate::range::{Position, Range};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    Include,
    Once,
    Define,
    Undef,
    If,
    Else,
    Endif,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    Integer(i64),
    String(StringTemplate),
    Dot,
    Caret,
    Assign,
    PlusAssign,
    Plus,
    Minus,
    EqualEqual,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    AndAnd,
    OrOr,
    Bang,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Directive(DirectiveKind),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub range: Range,
}

#[derive(Debug, Clone, Default)]
pub struct LexOutput {
    pub tokens: Vec<Token>,
    pub diagnostics: Vec<FileDiagnostic>,
}

/// Tokenize a whole document. Lexical errors are collected as diagnostics;
/// the scan always reaches the end of the input.
pub fn tokenize(text: &str) -> LexOutput {
    let mut lexer = Lexer {
        rest: text,
        line: 0,
        character: 0,
        out: LexOutput::default(),
    };
    loop {
        lexer.skip_trivia();
        if lexer.rest.is_empty() {
            break;
        }
        lexer.next_token();
    }
    lexer.out
}

// ============================================================================
// nom sub-parsers
// ============================================================================

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize((
        satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))
    .parse(input)
}

fn integer(input: &str) -> IResult<&str, &str> {
    digit1(input)
}

fn operator(input: &str) -> IResult<&str, TokenKind> {
    alt((
        alt((
            value(TokenKind::PlusAssign, tag("+=")),
            value(TokenKind::EqualEqual, tag("==")),
            value(TokenKind::NotEqual, tag("!=")),
            value(TokenKind::LessOrEqual, tag("<=")),
            value(TokenKind::GreaterOrEqual, tag(">=")),
            value(TokenKind::AndAnd, tag("&&")),
            value(TokenKind::OrOr, tag("||")),
        )),
        alt((
            value(TokenKind::Assign, tag("=")),
            value(TokenKind::Plus, tag("+")),
            value(TokenKind::Minus, tag("-")),
            value(TokenKind::Less, tag("<")),
            value(TokenKind::Greater, tag(">")),
            value(TokenKind::Bang, tag("!")),
            value(TokenKind::Dot, tag(".")),
            value(TokenKind::Caret, tag("^")),
        )),
        alt((
            value(TokenKind::LBrace, tag("{")),
            value(TokenKind::RBrace, tag("}")),
            value(TokenKind::LBracket, tag("[")),
            value(TokenKind::RBracket, tag("]")),
            value(TokenKind::LParen, tag("(")),
            value(TokenKind::RParen, tag(")")),
            value(TokenKind::Comma, tag(",")),
        )),
    ))
    .parse(input)
}

/// `name` followed by the closing marker, used for `$name$` / `^name^`
/// scanning inside double-quoted strings.
fn substitution_body(input: &str, marker: char) -> Option<(&str, usize)> {
    let (rest, name) = identifier(input).ok()?;
    let mut rest_chars = rest.chars();
    if rest_chars.next() == Some(marker) {
        Some((name, name.len() + marker.len_utf8()))
    } else {
        None
    }
}

// ============================================================================
// Scanner
// ============================================================================

struct Lexer<'a> {
    rest: &'a str,
    line: u32,
    character: u32,
    out: LexOutput,
}

impl<'a> Lexer<'a> {
    fn position(&self) -> Position {
        Position::new(self.line, self.character)
    }

    /// Consume `bytes` from the front of `rest`, updating line/character.
    fn advance(&mut self, bytes: usize) {
        for c in self.rest[..bytes].chars() {
            if c == '\n' {
                self.line += 1;
                self.character = 0;
            } else {
                self.character += 1;
            }
        }
        self.rest = &self.rest[bytes..];
    }

    fn lexical_error(&mut self, range: Range, message: impl Into<String>) {
        self.out
            .diagnostics
            .push(FileDiagnostic::error(range, DiagnosticKind::Lexical, message));
    }

    fn skip_trivia(&mut self) {
        loop {
            if self.rest.starts_with("//") {
                let len = self.rest.find('\n').unwrap_or(self.rest.len());
                self.advance(len);
            } else if self.rest.starts_with("/*") {
                match self.rest.find("*/") {
                    Some(end) => self.advance(end + 2),
                    None => {
                        let start = self.position();
                        let end_range = Range::new(start, Position::new(start.line, start.character + 2));
                        self.lexical_error(end_range, "unterminated block comment");
                        self.advance(self.rest.len());
                    }
                }
            } else {
                match self.rest.chars().next() {
                    Some(c) if c.is_whitespace() => self.advance(c.len_utf8()),
                    _ => break,
                }
            }
        }
    }

    fn push_token(&mut self, kind: TokenKind, start: Position) {
        self.out.tokens.push(Token {
            kind,
            range: Range::new(start, self.position()),
        });
    }

    fn next_token(&mut self) {
        let start = self.position();
        let c = match self.rest.chars().next() {
            Some(c) => c,
            None => return,
        };

        if c == '\'' || c == '"' {
            self.lex_string(c);
            return;
        }
        if c == '#' {
            self.lex_directive();
            return;
        }
        if c.is_ascii_digit() {
            if let Ok((rest, digits)) = integer(self.rest) {
                let consumed = self.rest.len() - rest.len();
                let kind = match digits.parse::<i64>() {
                    Ok(n) => TokenKind::Integer(n),
                    Err(_) => {
                        let end = Position::new(start.line, start.character + digits.len() as u32);
                        self.lexical_error(Range::new(start, end), "integer literal out of range");
                        TokenKind::Integer(0)
                    }
                };
                self.advance(consumed);
                self.push_token(kind, start);
                return;
            }
        }
        if let Ok((rest, name)) = identifier(self.rest) {
            let consumed = self.rest.len() - rest.len();
            self.advance(consumed);
            self.push_token(TokenKind::Identifier(name.to_string()), start);
            return;
        }
        if let Ok((rest, kind)) = operator(self.rest) {
            let consumed = self.rest.len() - rest.len();
            self.advance(consumed);
            self.push_token(kind, start);
            return;
        }

        let len = c.len_utf8();
        self.advance(len);
        self.lexical_error(
            Range::new(start, self.position()),
            format!("unknown character '{}'", c),
        );
    }

    fn lex_directive(&mut self) {
        let start = self.position();
        self.advance(1);
        let (consumed, name) = match identifier(self.rest) {
            Ok((rest, name)) => (self.rest.len() - rest.len(), name.to_string()),
            Err(_) => {
                self.lexical_error(Range::new(start, self.position()), "expected directive name after '#'");
                return;
            }
        };
        self.advance(consumed);
        let kind = match name.as_str() {
            "include" => DirectiveKind::Include,
            "once" => DirectiveKind::Once,
            "define" => DirectiveKind::Define,
            "undef" => DirectiveKind::Undef,
            "if" => DirectiveKind::If,
            "else" => DirectiveKind::Else,
            "endif" => DirectiveKind::Endif,
            _ => {
                self.lexical_error(
                    Range::new(start, self.position()),
                    format!("unknown directive '#{}'", name),
                );
                return;
            }
        };
        self.push_token(TokenKind::Directive(kind), start);
    }

    /// Scan a quoted string. Double quotes enable `$name$` / `^name^`
    /// substitution markers; `\` escapes the next character in either form.
    /// The literal must close before the end of its line.
    fn lex_string(&mut self, quote: char) {
        let start = self.position();
        let body = &self.rest[1..];
        let allow_substitutions = quote == '"';

        let mut parts: Vec<StringPart> = Vec::new();
        let mut literal = String::new();
        let mut col = start.character + 1;
        let mut consumed = None;
        let mut closed = false;

        let mut iter = body.char_indices();
        while let Some((i, c)) = iter.next() {
            if c == quote {
                consumed = Some(1 + i + c.len_utf8());
                closed = true;
                break;
            }
            if c == '\n' {
                consumed = Some(1 + i);
                break;
            }
            if c == '\\' {
                match iter.next() {
                    Some((_, escaped)) if escaped != '\n' => {
                        literal.push(escaped);
                        col += 2;
                    }
                    _ => {
                        self.lexical_error(
                            Range::on_line(start.line, col, col + 1),
                            "dangling escape character",
                        );
                        consumed = Some(1 + i + 1);
                        break;
                    }
                }
                continue;
            }
            if allow_substitutions && (c == '$' || c == '^') {
                if let Some((name, extra_bytes)) = substitution_body(&body[i + c.len_utf8()..], c) {
                    if !literal.is_empty() {
                        parts.push(StringPart::Literal(std::mem::take(&mut literal)));
                    }
                    let marker_chars = name.chars().count() as u32 + 2;
                    parts.push(StringPart::Substitution(Substitution {
                        name: name.to_string(),
                        sigil: if c == '$' { Sigil::Dot } else { Sigil::Caret },
                        range: Range::on_line(start.line, col, col + marker_chars),
                    }));
                    col += marker_chars;
                    // Skip the identifier and closing marker.
                    let skip_to = i + c.len_utf8() + extra_bytes;
                    while let Some((j, _)) = iter.clone().next() {
                        if j >= skip_to {
                            break;
                        }
                        iter.next();
                    }
                    continue;
                }
            }
            literal.push(c);
            col += 1;
        }

        // No terminator of any kind: the literal ran off the end of input.
        let consumed = consumed.unwrap_or(self.rest.len());
        if !closed {
            self.lexical_error(
                Range::on_line(start.line, start.character, col),
                "unterminated string literal",
            );
        }
        if !literal.is_empty() {
            parts.push(StringPart::Literal(literal));
        }

        self.advance(consumed);
        let range = Range::new(start, self.position());
        self.push_token(TokenKind::String(StringTemplate { parts, range }), start);
    }
}
