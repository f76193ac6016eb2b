//! Parser for the Karst programming language
//!
//! Converts a token stream into a [`Module`] AST. Recursive descent for
//! declarations, statements, and types; precedence climbing for binary
//! expressions.
//!
//! ## Error recovery
//!
//! The parser never aborts: it always returns a `Module`, possibly holding
//! placeholder nodes. A failed `expect` records one diagnostic and yields a
//! best-effort placeholder token without consuming input. An unrecognized
//! leading token triggers synchronization: tokens are discarded until one
//! that can start a new declaration or statement, which bounds error
//! cascades to one diagnostic per malformed region.

use crate::frontend::ast::*;
use crate::frontend::diagnostics::{CompileError, errors};
use crate::frontend::lexer::{Token, TokenKind, string_value};

/// Result of parsing: the module plus accumulated syntactic diagnostics
#[derive(Debug)]
pub struct ParseResult {
    pub module: Module,
    pub diagnostics: Vec<CompileError>,
}

/// Tokens that may start a new declaration or statement; synchronization
/// discards input until it reaches one of these (or end of input).
const BOUNDARY: &[TokenKind] = &[
    TokenKind::Import,
    TokenKind::Export,
    TokenKind::Global,
    TokenKind::Memory,
    TokenKind::Fn,
    TokenKind::Def,
    TokenKind::Local,
    TokenKind::If,
    TokenKind::While,
    TokenKind::For,
    TokenKind::Loop,
    TokenKind::Break,
    TokenKind::Br,
    TokenKind::Return,
    TokenKind::End,
    TokenKind::Elif,
    TokenKind::Else,
];

/// Parser state
pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    errors: Vec<CompileError>,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
        }
    }

    /// Parse the entire token stream into a module
    pub fn parse(mut self) -> ParseResult {
        let mut decls = Vec::new();

        if self.tokens.is_empty() {
            return ParseResult {
                module: Module { decls },
                diagnostics: self.errors,
            };
        }

        while !self.is_at_end() {
            match self.peek().kind {
                TokenKind::Import
                | TokenKind::Export
                | TokenKind::Global
                | TokenKind::Memory
                | TokenKind::Fn
                | TokenKind::Def => match self.declaration() {
                    Some(decl) => decls.push(decl),
                    None => self.synchronize(),
                },
                kind => {
                    self.errors
                        .push(errors::unexpected_token(kind.describe(), self.peek().span));
                    self.synchronize();
                }
            }
        }

        ParseResult {
            module: Module { decls },
            diagnostics: self.errors,
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.pos += 1;
        }
        &self.tokens[self.pos - 1]
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consume a token of `kind`, or record one diagnostic and return a
    /// placeholder token (without consuming) so parsing can continue.
    fn expect(&mut self, kind: TokenKind) -> Token {
        if self.check(kind) {
            return self.advance().clone();
        }
        let found = self.peek();
        let found_desc = found.kind.describe();
        let found_span = found.span;
        self.errors.push(errors::expected_token(
            kind.describe(),
            found_desc,
            found_span,
        ));
        Token::new(kind, "", found_span)
    }

    /// Byte offset just past the previously consumed token
    fn prev_end(&self) -> usize {
        if self.pos == 0 {
            0
        } else {
            self.tokens[self.pos - 1].span.end
        }
    }

    /// Span from `start` to the end of the last consumed token, never
    /// degenerate even when recovery consumed nothing.
    fn span_from(&self, start: usize) -> Span {
        Span::new(start, self.prev_end().max(start + 1))
    }

    /// Discard tokens until one that can start a new declaration/statement
    fn synchronize(&mut self) {
        self.advance();
        while !self.is_at_end() {
            if BOUNDARY.contains(&self.peek().kind) {
                return;
            }
            self.advance();
        }
    }

    /// Check if the current token can start an expression
    fn at_expr_start(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Ident
                | TokenKind::Number
                | TokenKind::Str
                | TokenKind::LParen
                | TokenKind::Minus
                | TokenKind::Not
                | TokenKind::Tilde
        )
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    fn declaration(&mut self) -> Option<Spanned<Decl>> {
        let start = self.peek().span.start;
        let decl = match self.peek().kind {
            TokenKind::Import => Decl::Import(self.import_decl()),
            TokenKind::Export => {
                self.advance();
                let inner = match self.peek().kind {
                    TokenKind::Fn => {
                        let s = self.peek().span.start;
                        let f = self.function_decl();
                        Spanned::new(Decl::Function(f), self.span_from(s))
                    }
                    TokenKind::Global => {
                        let s = self.peek().span.start;
                        let g = self.global_decl();
                        Spanned::new(Decl::Global(g), self.span_from(s))
                    }
                    TokenKind::Memory => {
                        let s = self.peek().span.start;
                        let m = self.memory_decl();
                        Spanned::new(Decl::Memory(m), self.span_from(s))
                    }
                    kind => {
                        self.errors.push(errors::expected_token(
                            "a function, global, or memory declaration after 'export'",
                            kind.describe(),
                            self.peek().span,
                        ));
                        return None;
                    }
                };
                Decl::Export(Box::new(inner))
            }
            TokenKind::Global => Decl::Global(self.global_decl()),
            TokenKind::Memory => Decl::Memory(self.memory_decl()),
            TokenKind::Fn => Decl::Function(self.function_decl()),
            TokenKind::Def => Decl::Def(self.def_decl()),
            _ => return None,
        };
        Some(Spanned::new(decl, self.span_from(start)))
    }

    fn import_decl(&mut self) -> ImportDecl {
        self.advance(); // 'import'

        let module_tok = self.expect(TokenKind::Str);
        let module = String::from_utf8_lossy(&string_value(&module_tok.text)).into_owned();

        let mut items = Vec::new();
        if self.match_token(TokenKind::LParen) {
            while !self.check(TokenKind::RParen) && !self.is_at_end() {
                items.push(self.import_item());
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RParen);
        } else {
            items.push(self.import_item());
        }

        ImportDecl { module, items }
    }

    fn import_item(&mut self) -> Spanned<ImportItem> {
        let start = self.peek().span.start;
        let name = self.expect(TokenKind::Ident).text;
        self.expect(TokenKind::Colon);
        let ty = self.type_expr();
        Spanned::new(ImportItem { name, ty }, self.span_from(start))
    }

    fn global_decl(&mut self) -> GlobalDecl {
        self.advance(); // 'global'
        let mutable = self.match_token(TokenKind::Mut);
        let name = self.expect(TokenKind::Ident).text;
        self.expect(TokenKind::Colon);
        let ty = self.type_expr();
        let init = if self.match_token(TokenKind::Eq) {
            Some(self.expression())
        } else {
            None
        };
        GlobalDecl {
            name,
            mutable,
            ty,
            init,
        }
    }

    fn memory_decl(&mut self) -> MemoryDecl {
        self.advance(); // 'memory'
        let name = self.expect(TokenKind::Ident).text;
        self.expect(TokenKind::LParen);
        let min = self.page_count();
        let max = if self.match_token(TokenKind::Comma) {
            Some(self.page_count())
        } else {
            None
        };
        self.expect(TokenKind::RParen);
        MemoryDecl { name, min, max }
    }

    /// A memory page count: a plain decimal integer literal
    fn page_count(&mut self) -> u32 {
        let tok = self.expect(TokenKind::Number);
        match tok.text.parse::<u32>() {
            Ok(n) => n,
            Err(_) => {
                self.errors.push(CompileError::syntax(
                    format!("memory size must be a decimal integer, found '{}'", tok.text),
                    tok.span,
                ));
                0
            }
        }
    }

    fn def_decl(&mut self) -> DefDecl {
        self.advance(); // 'def'
        let name = self.expect(TokenKind::Ident).text;
        self.expect(TokenKind::Eq);
        let value = self.expression();
        DefDecl { name, value }
    }

    fn function_decl(&mut self) -> FunctionDecl {
        self.advance(); // 'fn'

        let name = if self.check(TokenKind::Ident) {
            Some(self.advance().text.clone())
        } else {
            None
        };

        self.expect(TokenKind::LParen);
        let mut params = Vec::new();
        while !self.check(TokenKind::RParen) && !self.is_at_end() {
            let start = self.peek().span.start;
            let name = self.expect(TokenKind::Ident).text;
            self.expect(TokenKind::Colon);
            let ty = self.type_expr();
            params.push(Spanned::new(Param { name, ty }, self.span_from(start)));
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen);

        let results = if self.match_token(TokenKind::Arrow) {
            self.return_spec()
        } else {
            Vec::new()
        };

        let body = if self.match_token(TokenKind::FatArrow) {
            let mut exprs = vec![self.expression()];
            while self.match_token(TokenKind::Comma) {
                exprs.push(self.expression());
            }
            FnBody::Arrow(exprs)
        } else {
            let stmts = self.block(&[TokenKind::End]);
            self.expect(TokenKind::End);
            FnBody::Block(stmts)
        };

        FunctionDecl {
            name,
            params,
            results,
            body,
        }
    }

    /// Return spec after `->`: either a single type, or a parenthesized
    /// named-result list `(a: T, b: T)`. The two are distinguished by
    /// looking for `name :` after the opening parenthesis, since a plain
    /// parenthesis can also open a tuple or function type.
    fn return_spec(&mut self) -> Vec<Spanned<FnResult>> {
        let named_list = self.check(TokenKind::LParen)
            && self.peek_at(1).kind == TokenKind::Ident
            && self.peek_at(2).kind == TokenKind::Colon;

        if !named_list {
            let ty = self.type_expr();
            let span = ty.span;
            return vec![Spanned::new(FnResult { name: None, ty }, span)];
        }

        self.advance(); // '('
        let mut results = Vec::new();
        while !self.check(TokenKind::RParen) && !self.is_at_end() {
            let start = self.peek().span.start;
            let name = self.expect(TokenKind::Ident).text;
            self.expect(TokenKind::Colon);
            let ty = self.type_expr();
            results.push(Spanned::new(
                FnResult {
                    name: Some(name),
                    ty,
                },
                self.span_from(start),
            ));
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen);
        results
    }

    // ========================================================================
    // Statements
    // ========================================================================

    /// Parse statements until a terminator token (or end of input).
    /// The terminator itself is left for the caller to consume.
    fn block(&mut self, terminators: &[TokenKind]) -> Vec<Spanned<Stmt>> {
        let mut stmts = Vec::new();
        while !self.is_at_end() && !terminators.contains(&self.peek().kind) {
            let before = self.pos;
            match self.statement() {
                Some(stmt) => stmts.push(stmt),
                None => self.synchronize(),
            }
            // Guard against a stuck position after heavy recovery.
            if self.pos == before {
                self.advance();
            }
        }
        stmts
    }

    fn statement(&mut self) -> Option<Spanned<Stmt>> {
        let start = self.peek().span.start;
        let stmt = match self.peek().kind {
            TokenKind::Local => self.local_stmt(),
            TokenKind::Return => self.return_stmt(),
            TokenKind::If => self.if_stmt(),
            TokenKind::While => self.while_stmt(),
            TokenKind::For => self.for_stmt(),
            TokenKind::Loop => self.loop_stmt(),
            TokenKind::Break => {
                self.advance();
                Stmt::Break
            }
            TokenKind::Br => self.br_stmt(),
            _ if self.at_expr_start() => self.expr_or_assign(),
            kind => {
                self.errors
                    .push(errors::unexpected_token(kind.describe(), self.peek().span));
                return None;
            }
        };
        Some(Spanned::new(stmt, self.span_from(start)))
    }

    fn local_stmt(&mut self) -> Stmt {
        self.advance(); // 'local'
        let name_tok = self.expect(TokenKind::Ident);
        let name = Spanned::new(name_tok.text, name_tok.span);
        let ty = if self.match_token(TokenKind::Colon) {
            Some(self.type_expr())
        } else {
            None
        };
        let init = if self.match_token(TokenKind::Eq) {
            Some(self.expression())
        } else {
            None
        };
        Stmt::Local { name, ty, init }
    }

    fn return_stmt(&mut self) -> Stmt {
        self.advance(); // 'return'
        // An empty return is valid before a block terminator.
        let value = if self.at_expr_start() {
            Some(self.expression())
        } else {
            None
        };
        let when = if self.match_token(TokenKind::When) {
            Some(self.expression())
        } else {
            None
        };
        Stmt::Return { value, when }
    }

    fn if_stmt(&mut self) -> Stmt {
        self.advance(); // 'if'
        let stmt = self.if_tail();
        self.expect(TokenKind::End);
        stmt
    }

    /// The shared tail of `if` and `elif`: condition, `then`, body, and an
    /// optional `elif`/`else` arm. An `elif` arm recursively parses another
    /// full `if`-shaped tail; the single closing `end` is consumed by
    /// [`Parser::if_stmt`] on the outermost arm only.
    fn if_tail(&mut self) -> Stmt {
        let cond = self.expression();
        self.expect(TokenKind::Then);
        let then_body = self.block(&[TokenKind::Elif, TokenKind::Else, TokenKind::End]);

        let else_body = if self.check(TokenKind::Elif) {
            let start = self.peek().span.start;
            self.advance(); // 'elif'
            let nested = self.if_tail();
            vec![Spanned::new(nested, self.span_from(start))]
        } else if self.match_token(TokenKind::Else) {
            self.block(&[TokenKind::End])
        } else {
            Vec::new()
        };

        Stmt::If {
            cond,
            then_body,
            else_body,
        }
    }

    fn while_stmt(&mut self) -> Stmt {
        self.advance(); // 'while'
        let cond = self.expression();
        self.expect(TokenKind::Do);
        let body = self.block(&[TokenKind::End]);
        self.expect(TokenKind::End);
        Stmt::While { cond, body }
    }

    fn for_stmt(&mut self) -> Stmt {
        self.advance(); // 'for'

        let mut vars = Vec::new();
        loop {
            let start = self.peek().span.start;
            let name = self.expect(TokenKind::Ident).text;
            let ty = if self.match_token(TokenKind::Colon) {
                Some(self.type_expr())
            } else {
                None
            };
            vars.push(ForVar {
                name,
                ty,
                span: self.span_from(start),
            });
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }

        self.expect(TokenKind::In);
        let iter = self.expression();
        self.expect(TokenKind::Do);
        let body = self.block(&[TokenKind::End]);
        self.expect(TokenKind::End);
        Stmt::For { vars, iter, body }
    }

    fn loop_stmt(&mut self) -> Stmt {
        self.advance(); // 'loop'
        let body = self.block(&[TokenKind::End]);
        self.expect(TokenKind::End);
        Stmt::Loop { body }
    }

    fn br_stmt(&mut self) -> Stmt {
        self.advance(); // 'br'
        let target = if self.at_expr_start() {
            Some(self.expression())
        } else {
            None
        };
        let when = if self.match_token(TokenKind::When) {
            Some(self.expression())
        } else {
            None
        };
        Stmt::Branch { target, when }
    }

    /// Expression statement, or an assignment when the expression is
    /// followed by `,` (destructuring targets) or an assignment operator.
    fn expr_or_assign(&mut self) -> Stmt {
        let first = self.expression();

        let is_assign = self.check(TokenKind::Comma) || assign_op(self.peek().kind).is_some();
        if !is_assign {
            return Stmt::Expr(first);
        }

        let mut targets = Vec::new();
        self.push_target(first, &mut targets);
        while self.match_token(TokenKind::Comma) {
            let next = self.expression();
            self.push_target(next, &mut targets);
        }

        let op = match assign_op(self.peek().kind) {
            Some(op) => {
                self.advance();
                op
            }
            None => {
                self.errors.push(errors::expected_token(
                    "an assignment operator",
                    self.peek().kind.describe(),
                    self.peek().span,
                ));
                None
            }
        };

        let value = self.expression();
        Stmt::Assign { targets, op, value }
    }

    fn push_target(&mut self, expr: Spanned<Expr>, targets: &mut Vec<Spanned<Ident>>) {
        match expr.node {
            Expr::Ident(name) => targets.push(Spanned::new(name, expr.span)),
            _ => self.errors.push(CompileError::syntax(
                "assignment target must be an identifier".to_string(),
                expr.span,
            )),
        }
    }

    // ========================================================================
    // Types
    // ========================================================================

    fn type_expr(&mut self) -> Spanned<Type> {
        let start = self.peek().span.start;
        let node = match self.peek().kind {
            TokenKind::Star => {
                self.advance();
                let target = self.type_expr();
                Type::Pointer(Box::new(target.node))
            }
            TokenKind::LBracket => {
                self.advance();
                let elem = self.type_expr();
                let node = if self.match_token(TokenKind::Star) {
                    let len = self.array_length();
                    Type::Array(Box::new(elem.node), len)
                } else {
                    Type::Slice(Box::new(elem.node))
                };
                self.expect(TokenKind::RBracket);
                node
            }
            TokenKind::LParen => {
                self.advance();
                let mut elems = Vec::new();
                while !self.check(TokenKind::RParen) && !self.is_at_end() {
                    elems.push(self.type_expr().node);
                    if !self.match_token(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RParen);

                if self.match_token(TokenKind::Arrow) {
                    let ret = self.type_expr().node;
                    // `-> ()` means "no result".
                    let ret = match ret {
                        Type::Tuple(elems) if elems.is_empty() => None,
                        other => Some(Box::new(other)),
                    };
                    Type::Function(elems, ret)
                } else if elems.len() == 1 {
                    // A parenthesized single type is just grouping.
                    elems.into_iter().next().unwrap_or(Type::Tuple(Vec::new()))
                } else {
                    Type::Tuple(elems)
                }
            }
            TokenKind::Ident => {
                let name = self.advance().text.clone();
                match Primitive::from_name(&name) {
                    Some(p) => Type::Primitive(p),
                    None => Type::Named(name),
                }
            }
            kind => {
                self.errors.push(errors::expected_token(
                    "a type",
                    kind.describe(),
                    self.peek().span,
                ));
                // Empty name marks a placeholder the checker will skip.
                Type::Named(String::new())
            }
        };
        Spanned::new(node, self.span_from(start))
    }

    /// A fixed-array length: a plain decimal integer literal
    fn array_length(&mut self) -> u64 {
        let tok = self.expect(TokenKind::Number);
        match tok.text.parse::<u64>() {
            Ok(n) => n,
            Err(_) => {
                self.errors.push(CompileError::syntax(
                    format!("array length must be a decimal integer, found '{}'", tok.text),
                    tok.span,
                ));
                0
            }
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn expression(&mut self) -> Spanned<Expr> {
        self.ternary()
    }

    fn ternary(&mut self) -> Spanned<Expr> {
        let cond = self.binary_expr(1);
        if !self.match_token(TokenKind::Question) {
            return cond;
        }
        let then_expr = self.expression();
        self.expect(TokenKind::Colon);
        let else_expr = self.expression();
        let span = cond.span.merge(else_expr.span);
        Spanned::new(
            Expr::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            span,
        )
    }

    /// Precedence climbing over the fixed operator table
    fn binary_expr(&mut self, min_prec: u8) -> Spanned<Expr> {
        let mut lhs = self.unary_expr();

        while let Some((prec, op)) = binary_prec(self.peek().kind) {
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.binary_expr(prec + 1);
            let span = lhs.span.merge(rhs.span);
            lhs = Spanned::new(
                Expr::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }

        lhs
    }

    fn unary_expr(&mut self) -> Spanned<Expr> {
        let op = match self.peek().kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Not => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            _ => None,
        };

        match op {
            Some(op) => {
                let start = self.peek().span.start;
                self.advance();
                let operand = self.unary_expr();
                let span = Span::new(start, operand.span.end);
                Spanned::new(
                    Expr::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    span,
                )
            }
            None => self.postfix_expr(),
        }
    }

    /// Postfix operations chain left-to-right: call, index, member access,
    /// and a trailing `as Type` cast.
    fn postfix_expr(&mut self) -> Spanned<Expr> {
        let mut expr = self.primary_expr();

        loop {
            match self.peek().kind {
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    while !self.check(TokenKind::RParen) && !self.is_at_end() {
                        args.push(self.expression());
                        if !self.match_token(TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::RParen);
                    let span = Span::new(expr.span.start, self.prev_end());
                    expr = Spanned::new(
                        Expr::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.expression();
                    self.expect(TokenKind::RBracket);
                    let span = Span::new(expr.span.start, self.prev_end());
                    expr = Spanned::new(
                        Expr::Index {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                TokenKind::Dot => {
                    self.advance();
                    let member = match self.peek().kind {
                        TokenKind::Ident => MemberKind::Named(self.advance().text.clone()),
                        TokenKind::Number => {
                            let tok = self.advance().clone();
                            match tok.text.parse::<u32>() {
                                Ok(n) => MemberKind::Field(n),
                                Err(_) => {
                                    self.errors.push(CompileError::syntax(
                                        format!(
                                            "tuple field must be a decimal integer, found '{}'",
                                            tok.text
                                        ),
                                        tok.span,
                                    ));
                                    MemberKind::Field(0)
                                }
                            }
                        }
                        TokenKind::Star => {
                            self.advance();
                            MemberKind::Deref
                        }
                        kind => {
                            self.errors.push(errors::expected_token(
                                "a member name",
                                kind.describe(),
                                self.peek().span,
                            ));
                            break;
                        }
                    };
                    let span = Span::new(expr.span.start, self.prev_end());
                    expr = Spanned::new(
                        Expr::Member {
                            base: Box::new(expr),
                            member,
                        },
                        span,
                    );
                }
                TokenKind::As => {
                    self.advance();
                    let ty = self.type_expr();
                    let span = Span::new(expr.span.start, self.prev_end());
                    expr = Spanned::new(
                        Expr::Cast {
                            expr: Box::new(expr),
                            ty,
                        },
                        span,
                    );
                }
                _ => break,
            }
        }

        expr
    }

    fn primary_expr(&mut self) -> Spanned<Expr> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Number => {
                self.advance();
                let (text, suffix) = match tok.text.rsplit_once(':') {
                    Some((text, suffix)) => (text.to_string(), Some(suffix.to_string())),
                    None => (tok.text.clone(), None),
                };
                Spanned::new(Expr::Number { text, suffix }, tok.span)
            }
            TokenKind::Str => {
                self.advance();
                Spanned::new(Expr::Str(string_value(&tok.text)), tok.span)
            }
            TokenKind::Ident => {
                self.advance();
                Spanned::new(Expr::Ident(tok.text.clone()), tok.span)
            }
            TokenKind::LParen => {
                let start = tok.span.start;
                self.advance();
                let first = self.expression();
                if self.match_token(TokenKind::Comma) {
                    let mut elems = vec![first];
                    while !self.check(TokenKind::RParen) && !self.is_at_end() {
                        elems.push(self.expression());
                        if !self.match_token(TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::RParen);
                    Spanned::new(Expr::Tuple(elems), self.span_from(start))
                } else {
                    self.expect(TokenKind::RParen);
                    // Grouping is transparent; widen the span to the parens.
                    Spanned::new(first.node, self.span_from(start))
                }
            }
            kind => {
                self.errors
                    .push(errors::expected_expression(kind.describe(), tok.span));
                // Skip the offending token unless it can end/continue an
                // enclosing construct; recovery then resumes there.
                if !BOUNDARY.contains(&kind)
                    && !matches!(
                        kind,
                        TokenKind::Eof
                            | TokenKind::RParen
                            | TokenKind::RBracket
                            | TokenKind::Then
                            | TokenKind::Do
                            | TokenKind::Comma
                    )
                {
                    self.advance();
                }
                Spanned::new(Expr::Error, tok.span)
            }
        }
    }
}

/// Map an assignment operator token to `Some(compound-op)` (or
/// `Some(None)` for plain `=`); `None` when the token is not one.
fn assign_op(kind: TokenKind) -> Option<Option<BinaryOp>> {
    let op = match kind {
        TokenKind::Eq => None,
        TokenKind::PlusEq => Some(BinaryOp::Add),
        TokenKind::MinusEq => Some(BinaryOp::Sub),
        TokenKind::StarEq => Some(BinaryOp::Mul),
        TokenKind::SlashEq => Some(BinaryOp::Div),
        TokenKind::PercentEq => Some(BinaryOp::Rem),
        TokenKind::AmpEq => Some(BinaryOp::BitAnd),
        TokenKind::PipeEq => Some(BinaryOp::BitOr),
        TokenKind::CaretEq => Some(BinaryOp::BitXor),
        TokenKind::ShlEq => Some(BinaryOp::Shl),
        TokenKind::ShrEq => Some(BinaryOp::Shr),
        _ => return None,
    };
    Some(op)
}

/// The fixed binary operator precedence table, lowest to highest
fn binary_prec(kind: TokenKind) -> Option<(u8, BinaryOp)> {
    let entry = match kind {
        TokenKind::Or => (1, BinaryOp::Or),
        TokenKind::And => (2, BinaryOp::And),
        TokenKind::EqEq => (3, BinaryOp::Eq),
        TokenKind::NotEq => (3, BinaryOp::Ne),
        TokenKind::Lt => (3, BinaryOp::Lt),
        TokenKind::Le => (3, BinaryOp::Le),
        TokenKind::Gt => (3, BinaryOp::Gt),
        TokenKind::Ge => (3, BinaryOp::Ge),
        TokenKind::Pipe => (4, BinaryOp::BitOr),
        TokenKind::Caret => (5, BinaryOp::BitXor),
        TokenKind::Amp => (6, BinaryOp::BitAnd),
        TokenKind::Shl => (7, BinaryOp::Shl),
        TokenKind::Shr => (7, BinaryOp::Shr),
        TokenKind::Plus => (8, BinaryOp::Add),
        TokenKind::Minus => (8, BinaryOp::Sub),
        TokenKind::Star => (9, BinaryOp::Mul),
        TokenKind::Slash => (9, BinaryOp::Div),
        TokenKind::Percent => (9, BinaryOp::Rem),
        _ => return None,
    };
    Some(entry)
}

/// Convenience function to parse a token stream
#[tracing::instrument(skip_all, fields(token_count = tokens.len()))]
pub fn parse(tokens: &[Token]) -> ParseResult {
    Parser::new(tokens).parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer;

    fn parse_ok(source: &str) -> Module {
        let lexed = lexer::lex(source);
        assert!(lexed.diagnostics.is_empty(), "lex errors: {:?}", lexed.diagnostics);
        let result = parse(&lexed.tokens);
        assert!(
            result.diagnostics.is_empty(),
            "parse errors: {:?}",
            result.diagnostics
        );
        result.module
    }

    fn parse_errs(source: &str) -> (Module, Vec<CompileError>) {
        let lexed = lexer::lex(source);
        let result = parse(&lexed.tokens);
        (result.module, result.diagnostics)
    }

    fn only_fn(module: &Module) -> &FunctionDecl {
        for decl in &module.decls {
            if let Decl::Function(f) = &decl.node {
                return f;
            }
        }
        panic!("no function in module");
    }

    #[test]
    fn test_arrow_function() {
        let module = parse_ok("fn add(a: i32, b: i32) -> i32 => a + b");
        let f = only_fn(&module);
        assert_eq!(f.name.as_deref(), Some("add"));
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.results.len(), 1);
        assert!(matches!(&f.body, FnBody::Arrow(exprs) if exprs.len() == 1));
    }

    #[test]
    fn test_block_function() {
        let module = parse_ok("fn main() -> i32\n  local x: i32 = 1\n  return x\nend");
        let f = only_fn(&module);
        if let FnBody::Block(stmts) = &f.body {
            assert_eq!(stmts.len(), 2);
            assert!(matches!(stmts[0].node, Stmt::Local { .. }));
            assert!(matches!(stmts[1].node, Stmt::Return { .. }));
        } else {
            panic!("expected block body");
        }
    }

    #[test]
    fn test_named_results() {
        let module = parse_ok("fn divmod(a: i32, b: i32) -> (q: i32, r: i32)\nend");
        let f = only_fn(&module);
        assert_eq!(f.results.len(), 2);
        assert_eq!(f.results[0].node.name.as_deref(), Some("q"));
        assert_eq!(f.results[1].node.name.as_deref(), Some("r"));
    }

    #[test]
    fn test_precedence() {
        let module = parse_ok("fn f() -> i32 => 1 + 2 * 3");
        let f = only_fn(&module);
        let FnBody::Arrow(exprs) = &f.body else {
            panic!("expected arrow body")
        };
        // `+` at the top, `*` nested on the right.
        let Expr::Binary { op, rhs, .. } = &exprs[0].node else {
            panic!("expected binary")
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(&rhs.node, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_comparison_precedence_below_additive() {
        let module = parse_ok("fn f() -> i32 => 1 + 2 < 3 + 4");
        let FnBody::Arrow(exprs) = &only_fn(&module).body else {
            panic!()
        };
        assert!(matches!(&exprs[0].node, Expr::Binary { op: BinaryOp::Lt, .. }));
    }

    #[test]
    fn test_unary_vs_binary_minus() {
        // After an identifier, `-` is binary; at expression start it is unary.
        let module = parse_ok("fn f(a: i32) -> i32 => a - -1");
        let FnBody::Arrow(exprs) = &only_fn(&module).body else {
            panic!()
        };
        let Expr::Binary { op, rhs, .. } = &exprs[0].node else {
            panic!("expected binary")
        };
        assert_eq!(*op, BinaryOp::Sub);
        assert!(matches!(&rhs.node, Expr::Unary { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn test_postfix_chain() {
        let module = parse_ok("fn f(xs: [i32]) -> i32 => xs[0] + xs.len as i32");
        let FnBody::Arrow(exprs) = &only_fn(&module).body else {
            panic!()
        };
        let Expr::Binary { lhs, rhs, .. } = &exprs[0].node else {
            panic!()
        };
        assert!(matches!(&lhs.node, Expr::Index { .. }));
        assert!(matches!(&rhs.node, Expr::Cast { .. }));
    }

    #[test]
    fn test_ternary() {
        let module = parse_ok("fn f(a: i32) -> i32 => a > 0 ? a : 0 - a");
        let FnBody::Arrow(exprs) = &only_fn(&module).body else {
            panic!()
        };
        assert!(matches!(&exprs[0].node, Expr::Ternary { .. }));
    }

    #[test]
    fn test_types() {
        let module = parse_ok("fn f(p: *u8, s: [f64], a: [i32*4], t: (i32, i64), g: (f64) -> f64)\nend");
        let f = only_fn(&module);
        let tys: Vec<&Type> = f.params.iter().map(|p| &p.node.ty.node).collect();
        assert_eq!(*tys[0], Type::Pointer(Box::new(Type::Primitive(Primitive::U8))));
        assert_eq!(*tys[1], Type::Slice(Box::new(Type::Primitive(Primitive::F64))));
        assert_eq!(*tys[2], Type::Array(Box::new(Type::Primitive(Primitive::I32)), 4));
        assert_eq!(
            *tys[3],
            Type::Tuple(vec![Type::Primitive(Primitive::I32), Type::Primitive(Primitive::I64)])
        );
        assert_eq!(
            *tys[4],
            Type::Function(
                vec![Type::Primitive(Primitive::F64)],
                Some(Box::new(Type::Primitive(Primitive::F64)))
            )
        );
    }

    #[test]
    fn test_import_single_and_grouped() {
        let module = parse_ok(
            "import \"env\" log: (i32) -> ()\nimport \"math\" (sin: (f64) -> f64, pi: f64)",
        );
        let Decl::Import(single) = &module.decls[0].node else {
            panic!()
        };
        assert_eq!(single.module, "env");
        assert_eq!(single.items.len(), 1);
        assert_eq!(single.items[0].node.ty.node, Type::Function(vec![Type::Primitive(Primitive::I32)], None));

        let Decl::Import(grouped) = &module.decls[1].node else {
            panic!()
        };
        assert_eq!(grouped.items.len(), 2);
        assert_eq!(grouped.items[1].node.name, "pi");
    }

    #[test]
    fn test_export_global_memory_def() {
        let module = parse_ok(
            "export fn main() -> i32 => 0\nglobal mut tick: i32 = 0\nmemory mem(1, 4)\ndef SIZE = 64",
        );
        assert!(matches!(&module.decls[0].node, Decl::Export(inner) if matches!(inner.node, Decl::Function(_))));
        assert!(matches!(&module.decls[1].node, Decl::Global(g) if g.mutable));
        assert!(
            matches!(&module.decls[2].node, Decl::Memory(m) if m.min == 1 && m.max == Some(4))
        );
        assert!(matches!(&module.decls[3].node, Decl::Def(_)));
    }

    #[test]
    fn test_elif_desugars_to_nested_if() {
        let module = parse_ok(
            "fn f(a: i32) -> i32\n  if a == 1 then\n    return 1\n  elif a == 2 then\n    return 2\n  else\n    return 3\n  end\nend",
        );
        let FnBody::Block(stmts) = &only_fn(&module).body else {
            panic!()
        };
        let Stmt::If { else_body, .. } = &stmts[0].node else {
            panic!("expected if")
        };
        assert_eq!(else_body.len(), 1);
        let Stmt::If {
            else_body: innermost,
            ..
        } = &else_body[0].node
        else {
            panic!("elif should nest an if")
        };
        assert_eq!(innermost.len(), 1);
    }

    #[test]
    fn test_for_variants() {
        let module = parse_ok(
            "fn f(xs: [i32])\n  for i in 10 do\n    break\n  end\n  for i, v: i32 in xs do\n    br 1 when v == 0\n  end\nend",
        );
        let FnBody::Block(stmts) = &only_fn(&module).body else {
            panic!()
        };
        let Stmt::For { vars, .. } = &stmts[0].node else {
            panic!()
        };
        assert_eq!(vars.len(), 1);
        let Stmt::For { vars, body, .. } = &stmts[1].node else {
            panic!()
        };
        assert_eq!(vars.len(), 2);
        assert!(vars[1].ty.is_some());
        assert!(matches!(
            &body[0].node,
            Stmt::Branch {
                target: Some(_),
                when: Some(_)
            }
        ));
    }

    #[test]
    fn test_return_with_guard() {
        let module = parse_ok("fn f(a: i32) -> i32\n  return 0 when a == 0\n  return a\nend");
        let FnBody::Block(stmts) = &only_fn(&module).body else {
            panic!()
        };
        assert!(matches!(
            &stmts[0].node,
            Stmt::Return {
                value: Some(_),
                when: Some(_)
            }
        ));
        assert!(matches!(
            &stmts[1].node,
            Stmt::Return {
                value: Some(_),
                when: None
            }
        ));
    }

    #[test]
    fn test_multi_target_assignment() {
        let module = parse_ok("fn f(p: (i32, i32))\n  local a: i32\n  local b: i32\n  a, b = p\nend");
        let FnBody::Block(stmts) = &only_fn(&module).body else {
            panic!()
        };
        let Stmt::Assign { targets, op, .. } = &stmts[2].node else {
            panic!()
        };
        assert_eq!(targets.len(), 2);
        assert!(op.is_none());
    }

    #[test]
    fn test_compound_assignment() {
        let module = parse_ok("fn f()\n  local x: i32 = 0\n  x += 2\n  x <<= 1\nend");
        let FnBody::Block(stmts) = &only_fn(&module).body else {
            panic!()
        };
        assert!(matches!(
            &stmts[1].node,
            Stmt::Assign {
                op: Some(BinaryOp::Add),
                ..
            }
        ));
        assert!(matches!(
            &stmts[2].node,
            Stmt::Assign {
                op: Some(BinaryOp::Shl),
                ..
            }
        ));
    }

    #[test]
    fn test_recovery_bounds_cascade() {
        // One malformed declaration, then a healthy one: the parser should
        // report the bad region and still deliver the good function.
        let (module, errors) = parse_errs("local nope\nfn ok() -> i32 => 1");
        assert!(!errors.is_empty());
        assert!(
            module
                .decls
                .iter()
                .any(|d| matches!(&d.node, Decl::Function(f) if f.name.as_deref() == Some("ok")))
        );
    }

    #[test]
    fn test_missing_end_still_yields_module() {
        let (module, errors) = parse_errs("fn f() -> i32\n  return 1\n");
        assert!(!errors.is_empty());
        assert_eq!(module.decls.len(), 1);
    }

    #[test]
    fn test_number_suffix_split() {
        let module = parse_ok("fn f() -> i64 => 42:i64");
        let FnBody::Arrow(exprs) = &only_fn(&module).body else {
            panic!()
        };
        let Expr::Number { text, suffix } = &exprs[0].node else {
            panic!()
        };
        assert_eq!(text, "42");
        assert_eq!(suffix.as_deref(), Some("i64"));
    }

    #[test]
    fn test_tuple_expression() {
        let module = parse_ok("fn f() -> (i32, i32) => (1, 2)");
        let FnBody::Arrow(exprs) = &only_fn(&module).body else {
            panic!()
        };
        assert!(matches!(&exprs[0].node, Expr::Tuple(elems) if elems.len() == 2));
    }

    #[test]
    fn test_member_kinds() {
        let module = parse_ok("fn f(s: [u8], p: *i32, t: (i32, i32)) => s.ptr, s.len, p.*, t.1");
        let FnBody::Arrow(exprs) = &only_fn(&module).body else {
            panic!()
        };
        assert_eq!(exprs.len(), 4);
        assert!(matches!(
            &exprs[2].node,
            Expr::Member {
                member: MemberKind::Deref,
                ..
            }
        ));
        assert!(matches!(
            &exprs[3].node,
            Expr::Member {
                member: MemberKind::Field(1),
                ..
            }
        ));
    }
}
