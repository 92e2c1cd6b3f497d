// ABOUTME: Recursive-descent parser turning a token stream into BFF statements,
// with statement-boundary error recovery so one bad construct never loses the file

use crate::ast::{
    AssignOp, BinaryOp, DirectiveCondition, Expression, ExpressionKind, ForEachIterator,
    FunctionParam, GenericFunctionNode, Sigil, Statement, StatementKind, StringTemplate,
    UserFunctionNode, VariableName, VariableNode,
};
use crate::error::DiagnosticKind;
use crate::lexer::{tokenize, DirectiveKind, Token, TokenKind};
use crate::model::FileDiagnostic;
use crate::range::{Position, Range};

#[derive(Debug, Clone, Default)]
pub struct ParseOutput {
    pub statements: Vec<Statement>,
    pub diagnostics: Vec<FileDiagnostic>,
}

/// Tokenize and parse a whole document. Lexical diagnostics come first,
/// syntactic ones in source order after them.
pub fn parse(text: &str) -> ParseOutput {
    let lexed = tokenize(text);
    let mut parser = Parser {
        tokens: lexed.tokens,
        pos: 0,
        diagnostics: lexed.diagnostics,
    };
    let statements = parser.parse_statements(Terminator::Eof);
    ParseOutput {
        statements,
        diagnostics: parser.diagnostics,
    }
}

/// Statement-level recovery marker: the failing construct has already been
/// reported, unwind to the nearest statement boundary.
struct Recover;

type ParseResult<T> = Result<T, Recover>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminator {
    Eof,
    /// `}` closing a block or function body.
    RBrace,
    /// `]` closing a struct literal.
    RBracket,
    /// `#else` or `#endif` closing a directive branch.
    DirectiveBranch,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    diagnostics: Vec<FileDiagnostic>,
}

impl Parser {
    // ========================================================================
    // Token plumbing
    // ========================================================================

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Range to attach to an "unexpected end / unexpected token" diagnostic.
    fn here(&self) -> Range {
        match self.peek() {
            Some(token) => token.range,
            None => {
                let end = self
                    .tokens
                    .last()
                    .map(|t| t.range.end)
                    .unwrap_or(Position::new(0, 0));
                Range::new(end, end)
            }
        }
    }

    fn error(&mut self, range: Range, message: impl Into<String>) -> Recover {
        self.diagnostics.push(FileDiagnostic::error(
            range,
            DiagnosticKind::Syntactic,
            message,
        ));
        Recover
    }

    fn error_here(&mut self, message: impl Into<String>) -> Recover {
        let range = self.here();
        self.error(range, message)
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> ParseResult<Token> {
        let found = self.peek().is_some_and(|token| token.kind == kind);
        if found {
            Ok(self.bump().unwrap())
        } else {
            Err(self.error_here(format!("expected {}", what)))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> ParseResult<(String, Range)> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Identifier(name),
                range,
            }) => {
                let out = (name.clone(), *range);
                self.pos += 1;
                Ok(out)
            }
            _ => Err(self.error_here(format!("expected {}", what))),
        }
    }

    fn expect_string(&mut self, what: &str) -> ParseResult<StringTemplate> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::String(template),
                ..
            }) => {
                let out = template.clone();
                self.pos += 1;
                Ok(out)
            }
            _ => Err(self.error_here(format!("expected {}", what))),
        }
    }

    /// Whether the token at `index` is the first on its line.
    fn starts_line(&self, index: usize) -> bool {
        match index.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(prev) => {
                prev.range.end.line
                    < self
                        .tokens
                        .get(index)
                        .map(|t| t.range.start.line)
                        .unwrap_or(u32::MAX)
            }
            None => true,
        }
    }

    /// Skip ahead to the next plausible statement start: a line-leading `.`,
    /// `^`, `#`, identifier, or a closing delimiter (which a caller is
    /// waiting for).
    fn synchronize(&mut self) {
        // Always make progress past the offending token.
        if !self.at_end() {
            self.pos += 1;
        }
        while let Some(token) = self.peek() {
            match &token.kind {
                TokenKind::RBrace | TokenKind::RBracket | TokenKind::Directive(_) => return,
                TokenKind::Dot | TokenKind::Caret | TokenKind::Identifier(_)
                    if self.starts_line(self.pos) =>
                {
                    return;
                }
                _ => {
                    self.pos += 1;
                }
            }
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn terminator_matches(&self, terminator: Terminator) -> bool {
        match (terminator, self.peek_kind()) {
            (Terminator::Eof, None) => true,
            (Terminator::RBrace, Some(TokenKind::RBrace)) => true,
            (Terminator::RBracket, Some(TokenKind::RBracket)) => true,
            (
                Terminator::DirectiveBranch,
                Some(TokenKind::Directive(DirectiveKind::Else | DirectiveKind::Endif)),
            ) => true,
            _ => false,
        }
    }

    fn parse_statements(&mut self, terminator: Terminator) -> Vec<Statement> {
        let mut statements = Vec::new();
        loop {
            if self.terminator_matches(terminator) {
                return statements;
            }
            if self.at_end() {
                if terminator != Terminator::Eof {
                    self.error_here("unexpected end of file");
                }
                return statements;
            }
            match self.parse_statement() {
                Ok(statement) => statements.push(statement),
                Err(Recover) => self.synchronize(),
            }
        }
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        if self.at_end() {
            return Err(self.error_here("expected a statement"));
        }
        let token = self.tokens[self.pos].clone();
        match &token.kind {
            TokenKind::Dot | TokenKind::Caret => self.parse_assignment(),
            TokenKind::LBrace => self.parse_block(),
            TokenKind::Directive(kind) => self.parse_directive(*kind, token.range),
            TokenKind::Identifier(name) => match name.as_str() {
                "Using" => self.parse_using(),
                "ForEach" => self.parse_for_each(),
                "If" => self.parse_if(),
                "Print" => self.parse_print(),
                "function" => self.parse_function_decl(),
                "Else" => Err(self.error(token.range, "'Else' without a matching 'If'")),
                _ => self.parse_call(),
            },
            _ => Err(self.error(token.range, "expected a statement")),
        }
    }

    fn parse_assignment(&mut self) -> ParseResult<Statement> {
        let lhs = self.parse_variable_node()?;
        let op = match self.peek_kind() {
            Some(TokenKind::Assign) => AssignOp::Set,
            Some(TokenKind::PlusAssign) => AssignOp::Concat,
            Some(TokenKind::Minus) => AssignOp::Subtract,
            _ => return Err(self.error_here("expected '=', '+=' or '-' after variable")),
        };
        self.bump();
        let rhs = self.parse_expression()?;
        let range = lhs.range.union(rhs.range);
        Ok(Statement {
            kind: StatementKind::Assign { lhs, op, rhs },
            range,
        })
    }

    fn parse_block(&mut self) -> ParseResult<Statement> {
        let open = self.expect(TokenKind::LBrace, "'{'")?;
        let body = self.parse_statements(Terminator::RBrace);
        let close = self.expect(TokenKind::RBrace, "'}' closing the scope block")?;
        Ok(Statement {
            kind: StatementKind::Block(body),
            range: open.range.union(close.range),
        })
    }

    fn parse_using(&mut self) -> ParseResult<Statement> {
        let keyword = self.bump().unwrap();
        self.expect(TokenKind::LParen, "'(' after 'Using'")?;
        let expr = self.parse_expression()?;
        let close = self.expect(TokenKind::RParen, "')' closing 'Using'")?;
        Ok(Statement {
            kind: StatementKind::Using { expr },
            range: keyword.range.union(close.range),
        })
    }

    fn parse_for_each(&mut self) -> ParseResult<Statement> {
        let keyword = self.bump().unwrap();
        self.expect(TokenKind::LParen, "'(' after 'ForEach'")?;
        let mut iterators = Vec::new();
        loop {
            let variable = self.parse_variable_node()?;
            let has_in = matches!(self.peek_kind(), Some(TokenKind::Identifier(word)) if word == "in");
            if !has_in {
                return Err(self.error_here("expected 'in' in ForEach header"));
            }
            self.bump();
            let array = self.parse_expression()?;
            iterators.push(ForEachIterator { variable, array });
            if self.peek_kind() == Some(&TokenKind::Comma) {
                self.bump();
                continue;
            }
            break;
        }
        self.expect(TokenKind::RParen, "')' closing the ForEach header")?;
        self.expect(TokenKind::LBrace, "'{' opening the ForEach body")?;
        let body = self.parse_statements(Terminator::RBrace);
        let close = self.expect(TokenKind::RBrace, "'}' closing the ForEach body")?;
        Ok(Statement {
            kind: StatementKind::ForEach { iterators, body },
            range: keyword.range.union(close.range),
        })
    }

    fn parse_if(&mut self) -> ParseResult<Statement> {
        let keyword = self.bump().unwrap();
        self.expect(TokenKind::LParen, "'(' after 'If'")?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::RParen, "')' closing the If condition")?;
        self.expect(TokenKind::LBrace, "'{' opening the If body")?;
        let then_body = self.parse_statements(Terminator::RBrace);
        let mut close = self.expect(TokenKind::RBrace, "'}' closing the If body")?;

        let mut else_body = None;
        let has_else = matches!(self.peek_kind(), Some(TokenKind::Identifier(word)) if word == "Else");
        if has_else {
            self.bump();
            self.expect(TokenKind::LBrace, "'{' opening the Else body")?;
            let body = self.parse_statements(Terminator::RBrace);
            close = self.expect(TokenKind::RBrace, "'}' closing the Else body")?;
            else_body = Some(body);
        }
        Ok(Statement {
            kind: StatementKind::If {
                condition,
                then_body,
                else_body,
            },
            range: keyword.range.union(close.range),
        })
    }

    fn parse_print(&mut self) -> ParseResult<Statement> {
        let keyword = self.bump().unwrap();
        self.expect(TokenKind::LParen, "'(' after 'Print'")?;
        let expr = self.parse_expression()?;
        let close = self.expect(TokenKind::RParen, "')' closing 'Print'")?;
        Ok(Statement {
            kind: StatementKind::Print { expr },
            range: keyword.range.union(close.range),
        })
    }

    fn parse_function_decl(&mut self) -> ParseResult<Statement> {
        let keyword = self.bump().unwrap();
        let (name, name_range) = self.expect_identifier("function name")?;
        self.expect(TokenKind::LParen, "'(' after the function name")?;
        let mut params = Vec::new();
        if self.peek_kind() != Some(&TokenKind::RParen) {
            loop {
                let dot = self.expect(TokenKind::Dot, "'.' introducing a parameter")?;
                let (param, param_range) = self.expect_identifier("parameter name")?;
                params.push(FunctionParam {
                    name: param,
                    range: dot.range.union(param_range),
                });
                if self.peek_kind() == Some(&TokenKind::Comma) {
                    self.bump();
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RParen, "')' closing the parameter list")?;
        self.expect(TokenKind::LBrace, "'{' opening the function body")?;
        let body = self.parse_statements(Terminator::RBrace);
        let close = self.expect(TokenKind::RBrace, "'}' closing the function body")?;
        Ok(Statement {
            kind: StatementKind::FunctionDecl(UserFunctionNode {
                name,
                name_range,
                params,
                body,
            }),
            range: keyword.range.union(close.range),
        })
    }

    /// `Name( [args] )` followed by an optional brace body. With a body this
    /// is a generic-function invocation; without one it is a user-function
    /// call.
    fn parse_call(&mut self) -> ParseResult<Statement> {
        let (name, name_range) = self.expect_identifier("a statement")?;
        self.expect(TokenKind::LParen, "'(' after the function name")?;
        let mut args = Vec::new();
        if self.peek_kind() != Some(&TokenKind::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if self.peek_kind() == Some(&TokenKind::Comma) {
                    self.bump();
                    continue;
                }
                break;
            }
        }
        let close_paren = self.expect(TokenKind::RParen, "')' closing the argument list")?;

        if self.peek_kind() == Some(&TokenKind::LBrace) {
            let open = self.bump().unwrap();
            let body = self.parse_statements(Terminator::RBrace);
            let close = self.expect(TokenKind::RBrace, "'}' closing the function body")?;
            if args.len() > 1 {
                let extra = args[1].range.union(args.last().unwrap().range);
                self.error(extra, format!("'{}' takes at most one target name", name));
            }
            let target = args.into_iter().next();
            return Ok(Statement {
                kind: StatementKind::GenericFunction(GenericFunctionNode {
                    name,
                    name_range,
                    target,
                    header_range: name_range.union(close_paren.range),
                    body,
                    body_range: Range::new(open.range.end, close.range.start),
                }),
                range: name_range.union(close.range),
            });
        }

        Ok(Statement {
            kind: StatementKind::FunctionCall {
                name,
                name_range,
                args,
            },
            range: name_range.union(close_paren.range),
        })
    }

    // ========================================================================
    // Directives
    // ========================================================================

    fn parse_directive(&mut self, kind: DirectiveKind, range: Range) -> ParseResult<Statement> {
        self.bump();
        match kind {
            DirectiveKind::Include => {
                let path = self.expect_string("a quoted path after '#include'")?;
                let full = range.union(path.range);
                Ok(Statement {
                    kind: StatementKind::Include { path },
                    range: full,
                })
            }
            DirectiveKind::Once => Ok(Statement {
                kind: StatementKind::Once,
                range,
            }),
            DirectiveKind::Define => {
                let (name, name_range) = self.expect_identifier("a symbol after '#define'")?;
                Ok(Statement {
                    kind: StatementKind::Define { name, name_range },
                    range: range.union(name_range),
                })
            }
            DirectiveKind::Undef => {
                let (name, name_range) = self.expect_identifier("a symbol after '#undef'")?;
                Ok(Statement {
                    kind: StatementKind::Undef { name, name_range },
                    range: range.union(name_range),
                })
            }
            DirectiveKind::If => self.parse_directive_if(range),
            DirectiveKind::Else => Err(self.error(range, "'#else' without a matching '#if'")),
            DirectiveKind::Endif => Err(self.error(range, "'#endif' without a matching '#if'")),
        }
    }

    fn parse_directive_if(&mut self, start: Range) -> ParseResult<Statement> {
        let condition = self.parse_directive_or()?;
        let then_body = self.parse_statements(Terminator::DirectiveBranch);
        let mut else_body = Vec::new();
        let close;
        match self.peek_kind() {
            Some(TokenKind::Directive(DirectiveKind::Else)) => {
                self.bump();
                else_body = self.parse_statements(Terminator::DirectiveBranch);
                match self.peek_kind() {
                    Some(TokenKind::Directive(DirectiveKind::Endif)) => {
                        close = self.bump().unwrap().range;
                    }
                    _ => return Err(self.error_here("expected '#endif'")),
                }
            }
            Some(TokenKind::Directive(DirectiveKind::Endif)) => {
                close = self.bump().unwrap().range;
            }
            _ => return Err(self.error_here("expected '#else' or '#endif'")),
        }
        Ok(Statement {
            kind: StatementKind::DirectiveIf {
                condition,
                then_body,
                else_body,
            },
            range: start.union(close),
        })
    }

    fn parse_directive_or(&mut self) -> ParseResult<DirectiveCondition> {
        let mut lhs = self.parse_directive_and()?;
        while self.peek_kind() == Some(&TokenKind::OrOr) {
            self.bump();
            let rhs = self.parse_directive_and()?;
            lhs = DirectiveCondition::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_directive_and(&mut self) -> ParseResult<DirectiveCondition> {
        let mut lhs = self.parse_directive_unary()?;
        while self.peek_kind() == Some(&TokenKind::AndAnd) {
            self.bump();
            let rhs = self.parse_directive_unary()?;
            lhs = DirectiveCondition::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_directive_unary(&mut self) -> ParseResult<DirectiveCondition> {
        match self.peek_kind() {
            Some(TokenKind::Bang) => {
                self.bump();
                let inner = self.parse_directive_unary()?;
                Ok(DirectiveCondition::Not(Box::new(inner)))
            }
            Some(TokenKind::LParen) => {
                self.bump();
                let inner = self.parse_directive_or()?;
                self.expect(TokenKind::RParen, "')' in '#if' condition")?;
                Ok(inner)
            }
            Some(TokenKind::Identifier(_)) => {
                let (name, range) = self.expect_identifier("a symbol")?;
                Ok(DirectiveCondition::Defined { name, range })
            }
            _ => Err(self.error_here("expected a symbol in '#if' condition")),
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn parse_variable_node(&mut self) -> ParseResult<VariableNode> {
        let sigil_token = match self.peek_kind() {
            Some(TokenKind::Dot) | Some(TokenKind::Caret) => self.bump().unwrap(),
            _ => return Err(self.error_here("expected '.' or '^'")),
        };
        let sigil = if sigil_token.kind == TokenKind::Dot {
            Sigil::Dot
        } else {
            Sigil::Caret
        };
        match self.peek() {
            Some(Token {
                kind: TokenKind::Identifier(name),
                range,
            }) => {
                let node = VariableNode {
                    sigil,
                    name: VariableName::Static(name.clone()),
                    range: sigil_token.range.union(*range),
                };
                self.pos += 1;
                Ok(node)
            }
            Some(Token {
                kind: TokenKind::String(template),
                range,
            }) => {
                let node = VariableNode {
                    sigil,
                    name: VariableName::Dynamic(template.clone()),
                    range: sigil_token.range.union(*range),
                };
                self.pos += 1;
                Ok(node)
            }
            _ => Err(self.error_here("expected a variable name after the sigil")),
        }
    }

    pub(crate) fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<Expression> {
        let mut lhs = self.parse_and()?;
        while self.peek_kind() == Some(&TokenKind::OrOr) {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ParseResult<Expression> {
        let mut lhs = self.parse_comparison()?;
        while self.peek_kind() == Some(&TokenKind::AndAnd) {
            self.bump();
            let rhs = self.parse_comparison()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> ParseResult<Expression> {
        let lhs = self.parse_additive()?;

        // (operator, how many tokens it spans); `not in` is the only
        // two-token operator.
        let found: Option<(BinaryOp, usize)> = match self.peek_kind() {
            Some(TokenKind::EqualEqual) => Some((BinaryOp::Equal, 1)),
            Some(TokenKind::NotEqual) => Some((BinaryOp::NotEqual, 1)),
            Some(TokenKind::Less) => Some((BinaryOp::Less, 1)),
            Some(TokenKind::LessOrEqual) => Some((BinaryOp::LessOrEqual, 1)),
            Some(TokenKind::Greater) => Some((BinaryOp::Greater, 1)),
            Some(TokenKind::GreaterOrEqual) => Some((BinaryOp::GreaterOrEqual, 1)),
            Some(TokenKind::Identifier(word)) if word == "in" => Some((BinaryOp::In, 1)),
            Some(TokenKind::Identifier(word)) if word == "not" => {
                match self.peek_at(1).map(|t| &t.kind) {
                    Some(TokenKind::Identifier(next)) if next == "in" => {
                        Some((BinaryOp::NotIn, 2))
                    }
                    _ => Some((BinaryOp::NotIn, 0)),
                }
            }
            _ => None,
        };

        match found {
            Some((_, 0)) => Err(self.error_here("expected 'in' after 'not'")),
            Some((op, span)) => {
                for _ in 0..span {
                    self.bump();
                }
                let rhs = self.parse_additive()?;
                Ok(binary(op, lhs, rhs))
            }
            None => Ok(lhs),
        }
    }

    fn parse_additive(&mut self) -> ParseResult<Expression> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Subtract,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ParseResult<Expression> {
        match self.peek_kind() {
            Some(TokenKind::Bang) => {
                let bang = self.bump().unwrap();
                let inner = self.parse_unary()?;
                let range = bang.range.union(inner.range);
                Ok(Expression {
                    kind: ExpressionKind::Not(Box::new(inner)),
                    range,
                })
            }
            Some(TokenKind::Minus) => {
                let minus = self.bump().unwrap();
                match self.peek() {
                    Some(Token {
                        kind: TokenKind::Integer(n),
                        range,
                    }) => {
                        let expr = Expression {
                            kind: ExpressionKind::Integer(-n),
                            range: minus.range.union(*range),
                        };
                        self.pos += 1;
                        Ok(expr)
                    }
                    _ => Err(self.error_here("expected an integer after '-'")),
                }
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        if self.at_end() {
            return Err(self.error_here("expected an expression"));
        }
        let token = self.tokens[self.pos].clone();
        match &token.kind {
            TokenKind::Integer(n) => {
                self.bump();
                Ok(Expression {
                    kind: ExpressionKind::Integer(*n),
                    range: token.range,
                })
            }
            TokenKind::String(template) => {
                self.bump();
                Ok(Expression {
                    kind: ExpressionKind::String(template.clone()),
                    range: token.range,
                })
            }
            TokenKind::Identifier(word) if word == "true" => {
                self.bump();
                Ok(Expression {
                    kind: ExpressionKind::Boolean(true),
                    range: token.range,
                })
            }
            TokenKind::Identifier(word) if word == "false" => {
                self.bump();
                Ok(Expression {
                    kind: ExpressionKind::Boolean(false),
                    range: token.range,
                })
            }
            TokenKind::Dot | TokenKind::Caret => {
                let variable = self.parse_variable_node()?;
                let range = variable.range;
                Ok(Expression {
                    kind: ExpressionKind::Variable(variable),
                    range,
                })
            }
            TokenKind::LBrace => self.parse_array_literal(),
            TokenKind::LBracket => self.parse_struct_literal(),
            TokenKind::LParen => {
                self.bump();
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            _ => Err(self.error(token.range, "expected an expression")),
        }
    }

    fn parse_array_literal(&mut self) -> ParseResult<Expression> {
        let open = self.expect(TokenKind::LBrace, "'{'")?;
        let mut elements = Vec::new();
        if self.peek_kind() != Some(&TokenKind::RBrace) {
            loop {
                elements.push(self.parse_expression()?);
                if self.peek_kind() == Some(&TokenKind::Comma) {
                    self.bump();
                    // Tolerate a trailing comma before the closing brace.
                    if self.peek_kind() == Some(&TokenKind::RBrace) {
                        break;
                    }
                    continue;
                }
                break;
            }
        }
        let close = self.expect(TokenKind::RBrace, "'}' closing the array literal")?;
        Ok(Expression {
            kind: ExpressionKind::Array(elements),
            range: open.range.union(close.range),
        })
    }

    fn parse_struct_literal(&mut self) -> ParseResult<Expression> {
        let open = self.expect(TokenKind::LBracket, "'['")?;
        let body = self.parse_statements(Terminator::RBracket);
        let close = self.expect(TokenKind::RBracket, "']' closing the struct literal")?;
        Ok(Expression {
            kind: ExpressionKind::Struct(body),
            range: open.range.union(close.range),
        })
    }
}

fn binary(op: BinaryOp, lhs: Expression, rhs: Expression) -> Expression {
    let range = lhs.range.union(rhs.range);
    Expression {
        kind: ExpressionKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        range,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(text: &str) -> Vec<Statement> {
        let out = parse(text);
        assert!(
            out.diagnostics.is_empty(),
            "unexpected diagnostics: {:?}",
            out.diagnostics
        );
        out.statements
    }

    #[test]
    fn test_simple_assignment_shape_and_ranges() {
        let statements = parse_ok(".A = 1");
        assert_eq!(statements.len(), 1);
        match &statements[0].kind {
            StatementKind::Assign { lhs, op, rhs } => {
                assert_eq!(*op, AssignOp::Set);
                assert_eq!(lhs.sigil, Sigil::Dot);
                assert_eq!(lhs.name, VariableName::Static("A".to_string()));
                assert_eq!(lhs.range, Range::on_line(0, 0, 2));
                assert_eq!(rhs.kind, ExpressionKind::Integer(1));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
        assert_eq!(statements[0].range, Range::on_line(0, 0, 6));
    }

    #[test]
    fn test_compound_assignments() {
        let statements = parse_ok(".A = 'x'\n.A += 'y'\n.A - 'x'");
        let ops: Vec<_> = statements
            .iter()
            .map(|s| match &s.kind {
                StatementKind::Assign { op, .. } => *op,
                other => panic!("expected assignment, got {:?}", other),
            })
            .collect();
        assert_eq!(ops, vec![AssignOp::Set, AssignOp::Concat, AssignOp::Subtract]);
    }

    #[test]
    fn test_parent_scope_assignment() {
        let statements = parse_ok("^Out = 3");
        match &statements[0].kind {
            StatementKind::Assign { lhs, .. } => assert_eq!(lhs.sigil, Sigil::Caret),
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_dynamic_variable_name() {
        let statements = parse_ok(".\"A_$Middle$_C\" = 'v'");
        match &statements[0].kind {
            StatementKind::Assign { lhs, .. } => match &lhs.name {
                VariableName::Dynamic(template) => {
                    assert!(template.has_substitutions());
                    assert_eq!(lhs.range, Range::on_line(0, 0, 15));
                }
                other => panic!("expected dynamic name, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_array_and_struct_literals() {
        let statements = parse_ok(".Arr = { 'a', 'b' }\n.S = [ .X = 1 ]");
        match &statements[0].kind {
            StatementKind::Assign { rhs, .. } => match &rhs.kind {
                ExpressionKind::Array(elements) => assert_eq!(elements.len(), 2),
                other => panic!("expected array, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
        match &statements[1].kind {
            StatementKind::Assign { rhs, .. } => match &rhs.kind {
                ExpressionKind::Struct(body) => assert_eq!(body.len(), 1),
                other => panic!("expected struct, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_concatenation_chain() {
        let statements = parse_ok(".A = 'x' + 'y' + 'z'");
        match &statements[0].kind {
            StatementKind::Assign { rhs, .. } => match &rhs.kind {
                ExpressionKind::Binary { op, lhs, .. } => {
                    assert_eq!(*op, BinaryOp::Add);
                    assert!(matches!(lhs.kind, ExpressionKind::Binary { .. }));
                }
                other => panic!("expected binary, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_using_statement() {
        let statements = parse_ok("Using( .S )");
        match &statements[0].kind {
            StatementKind::Using { expr } => {
                assert!(matches!(expr.kind, ExpressionKind::Variable(_)));
            }
            other => panic!("expected Using, got {:?}", other),
        }
        assert_eq!(statements[0].range, Range::on_line(0, 0, 11));
    }

    #[test]
    fn test_for_each_multi_iterator() {
        let statements = parse_ok("ForEach( .X in .Xs, .Y in .Ys ) {\n  Print( .X )\n}");
        match &statements[0].kind {
            StatementKind::ForEach { iterators, body } => {
                assert_eq!(iterators.len(), 2);
                assert_eq!(body.len(), 1);
                assert_eq!(
                    iterators[0].variable.name,
                    VariableName::Static("X".to_string())
                );
            }
            other => panic!("expected ForEach, got {:?}", other),
        }
    }

    #[test]
    fn test_if_else_with_operators() {
        let statements = parse_ok("If( .A == 'x' && !.B ) { .C = 1 } Else { .C = 2 }");
        match &statements[0].kind {
            StatementKind::If {
                condition,
                then_body,
                else_body,
            } => {
                assert!(matches!(
                    condition.kind,
                    ExpressionKind::Binary {
                        op: BinaryOp::And,
                        ..
                    }
                ));
                assert_eq!(then_body.len(), 1);
                assert_eq!(else_body.as_ref().unwrap().len(), 1);
            }
            other => panic!("expected If, got {:?}", other),
        }
    }

    #[test]
    fn test_in_and_not_in() {
        let statements = parse_ok("If( 'a' in .Arr ) { }\nIf( 'b' not in .Arr ) { }");
        for (statement, expected) in statements.iter().zip([BinaryOp::In, BinaryOp::NotIn]) {
            match &statement.kind {
                StatementKind::If { condition, .. } => match &condition.kind {
                    ExpressionKind::Binary { op, .. } => assert_eq!(*op, expected),
                    other => panic!("expected binary, got {:?}", other),
                },
                other => panic!("expected If, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_generic_function_with_body() {
        let statements = parse_ok("Alias( 'MyTarget' )\n{\n  .Targets = { 'A' }\n}");
        match &statements[0].kind {
            StatementKind::GenericFunction(node) => {
                assert_eq!(node.name, "Alias");
                assert_eq!(node.name_range, Range::on_line(0, 0, 5));
                assert!(node.target.is_some());
                assert_eq!(node.body.len(), 1);
                // Body range sits strictly inside the braces.
                assert_eq!(node.body_range.start, Position::new(1, 1));
                assert_eq!(node.body_range.end, Position::new(3, 0));
                assert_eq!(node.header_range, Range::on_line(0, 0, 19));
            }
            other => panic!("expected generic function, got {:?}", other),
        }
    }

    #[test]
    fn test_generic_function_without_target() {
        let statements = parse_ok("Settings() { .CachePath = '/tmp/cache' }");
        match &statements[0].kind {
            StatementKind::GenericFunction(node) => {
                assert_eq!(node.name, "Settings");
                assert!(node.target.is_none());
            }
            other => panic!("expected generic function, got {:?}", other),
        }
    }

    #[test]
    fn test_user_function_decl_and_call() {
        let statements = parse_ok("function Twice(.Value) {\n  .Result = .Value + .Value\n}\nTwice( 'x' )");
        match &statements[0].kind {
            StatementKind::FunctionDecl(node) => {
                assert_eq!(node.name, "Twice");
                assert_eq!(node.params.len(), 1);
                assert_eq!(node.params[0].name, "Value");
                assert_eq!(node.params[0].range, Range::on_line(0, 15, 21));
            }
            other => panic!("expected function declaration, got {:?}", other),
        }
        match &statements[1].kind {
            StatementKind::FunctionCall { name, args, .. } => {
                assert_eq!(name, "Twice");
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected function call, got {:?}", other),
        }
    }

    #[test]
    fn test_directives() {
        let statements =
            parse_ok("#once\n#define FAST\n#if FAST && !SLOW\n.A = 1\n#else\n.A = 2\n#endif\n#undef FAST");
        assert!(matches!(statements[0].kind, StatementKind::Once));
        assert!(matches!(statements[1].kind, StatementKind::Define { .. }));
        match &statements[2].kind {
            StatementKind::DirectiveIf {
                condition,
                then_body,
                else_body,
            } => {
                assert!(matches!(condition, DirectiveCondition::And(_, _)));
                assert_eq!(then_body.len(), 1);
                assert_eq!(else_body.len(), 1);
            }
            other => panic!("expected #if, got {:?}", other),
        }
        assert!(matches!(statements[3].kind, StatementKind::Undef { .. }));
    }

    #[test]
    fn test_include_directive() {
        let statements = parse_ok("#include 'sub/other.bff'");
        match &statements[0].kind {
            StatementKind::Include { path } => {
                assert_eq!(path.literal_text(), Some("sub/other.bff".to_string()));
            }
            other => panic!("expected include, got {:?}", other),
        }
    }

    #[test]
    fn test_recovery_keeps_later_statements() {
        let out = parse(".A = = 1\n.B = 2");
        assert!(!out.diagnostics.is_empty());
        // .B still parses as if the bad statement were removed.
        let names: Vec<_> = out
            .statements
            .iter()
            .filter_map(|s| match &s.kind {
                StatementKind::Assign { lhs, .. } => match &lhs.name {
                    VariableName::Static(n) => Some(n.clone()),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["B".to_string()]);
    }

    #[test]
    fn test_unbalanced_brace_reports() {
        let out = parse("{\n.A = 1\n");
        assert!(out
            .diagnostics
            .iter()
            .any(|d| d.message.contains("unexpected end of file")));
    }

    #[test]
    fn test_stray_else_reports() {
        let out = parse("Else { }");
        assert!(out
            .diagnostics
            .iter()
            .any(|d| d.message.contains("'Else' without a matching 'If'")));
    }

    #[test]
    fn test_nested_blocks() {
        let statements = parse_ok("{\n  .Inner = 1\n  {\n    .Deep = 2\n  }\n}");
        match &statements[0].kind {
            StatementKind::Block(body) => {
                assert_eq!(body.len(), 2);
                assert!(matches!(body[1].kind, StatementKind::Block(_)));
            }
            other => panic!("expected block, got {:?}", other),
        }
    }
}
