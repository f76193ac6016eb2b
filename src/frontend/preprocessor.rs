//! Constant inlining preprocessor
//!
//! A pure `Module -> Module` transformation that substitutes `def`
//! constants before type checking. Constants are collected in declaration
//! order, and earlier constants are inlined into later ones as they are
//! collected, so a constant may reference any constant declared before it.
//! Forward references are left as plain identifiers (the checker reports
//! them as unresolved).
//!
//! Every identifier expression whose name matches a known constant is
//! replaced by a deep clone of the constant's value expression, with each
//! span in the clone rewritten to the span of the reference, so later
//! diagnostics point at the use site rather than the definition. The input
//! tree is never mutated; the pass rebuilds a fresh tree.

use std::collections::HashMap;

use crate::frontend::ast::*;

/// Inline all `def` constants throughout a module.
///
/// Deterministic, and the identity transformation for a module containing
/// no `def` declarations.
#[tracing::instrument(skip_all, fields(decl_count = module.decls.len()))]
pub fn preprocess(module: &Module) -> Module {
    let mut inliner = Inliner {
        consts: HashMap::new(),
    };

    // Collection pass: earlier constants are substituted into later ones
    // right here, so the stored values are already fully inlined.
    for decl in &module.decls {
        if let Decl::Def(def) = &decl.node {
            let value = inliner.expr(&def.value);
            inliner.consts.insert(def.name.clone(), value);
        }
    }

    Module {
        decls: module.decls.iter().map(|d| inliner.decl(d)).collect(),
    }
}

struct Inliner {
    consts: HashMap<String, Spanned<Expr>>,
}

impl Inliner {
    fn decl(&self, decl: &Spanned<Decl>) -> Spanned<Decl> {
        let node = match &decl.node {
            Decl::Import(i) => Decl::Import(i.clone()),
            Decl::Export(inner) => Decl::Export(Box::new(self.decl(inner))),
            Decl::Global(g) => Decl::Global(GlobalDecl {
                name: g.name.clone(),
                mutable: g.mutable,
                ty: g.ty.clone(),
                init: g.init.as_ref().map(|e| self.expr(e)),
            }),
            Decl::Memory(m) => Decl::Memory(m.clone()),
            Decl::Function(f) => Decl::Function(FunctionDecl {
                name: f.name.clone(),
                params: f.params.clone(),
                results: f.results.clone(),
                body: match &f.body {
                    FnBody::Arrow(exprs) => {
                        FnBody::Arrow(exprs.iter().map(|e| self.expr(e)).collect())
                    }
                    FnBody::Block(stmts) => FnBody::Block(self.body(stmts)),
                },
            }),
            Decl::Def(def) => Decl::Def(DefDecl {
                name: def.name.clone(),
                value: self.expr(&def.value),
            }),
        };
        Spanned::new(node, decl.span)
    }

    fn body(&self, stmts: &[Spanned<Stmt>]) -> Vec<Spanned<Stmt>> {
        stmts.iter().map(|s| self.stmt(s)).collect()
    }

    fn stmt(&self, stmt: &Spanned<Stmt>) -> Spanned<Stmt> {
        let node = match &stmt.node {
            Stmt::Local { name, ty, init } => Stmt::Local {
                name: name.clone(),
                ty: ty.clone(),
                init: init.as_ref().map(|e| self.expr(e)),
            },
            Stmt::Assign { targets, op, value } => Stmt::Assign {
                targets: targets.clone(),
                op: *op,
                value: self.expr(value),
            },
            Stmt::Expr(e) => Stmt::Expr(self.expr(e)),
            Stmt::Return { value, when } => Stmt::Return {
                value: value.as_ref().map(|e| self.expr(e)),
                when: when.as_ref().map(|e| self.expr(e)),
            },
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => Stmt::If {
                cond: self.expr(cond),
                then_body: self.body(then_body),
                else_body: self.body(else_body),
            },
            Stmt::While { cond, body } => Stmt::While {
                cond: self.expr(cond),
                body: self.body(body),
            },
            Stmt::For { vars, iter, body } => Stmt::For {
                vars: vars.clone(),
                iter: self.expr(iter),
                body: self.body(body),
            },
            Stmt::Loop { body } => Stmt::Loop {
                body: self.body(body),
            },
            Stmt::Break => Stmt::Break,
            Stmt::Branch { target, when } => Stmt::Branch {
                target: target.as_ref().map(|e| self.expr(e)),
                when: when.as_ref().map(|e| self.expr(e)),
            },
        };
        Spanned::new(node, stmt.span)
    }

    fn expr(&self, expr: &Spanned<Expr>) -> Spanned<Expr> {
        let node = match &expr.node {
            Expr::Ident(name) => {
                if let Some(value) = self.consts.get(name) {
                    // Deep clone of the constant's value, respanned to the
                    // reference site.
                    return respan(value, expr.span);
                }
                Expr::Ident(name.clone())
            }
            Expr::Number { text, suffix } => Expr::Number {
                text: text.clone(),
                suffix: suffix.clone(),
            },
            Expr::Str(bytes) => Expr::Str(bytes.clone()),
            Expr::Binary { op, lhs, rhs } => Expr::Binary {
                op: *op,
                lhs: Box::new(self.expr(lhs)),
                rhs: Box::new(self.expr(rhs)),
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op: *op,
                operand: Box::new(self.expr(operand)),
            },
            Expr::Call { callee, args } => Expr::Call {
                callee: Box::new(self.expr(callee)),
                args: args.iter().map(|a| self.expr(a)).collect(),
            },
            Expr::Index { base, index } => Expr::Index {
                base: Box::new(self.expr(base)),
                index: Box::new(self.expr(index)),
            },
            Expr::Member { base, member } => Expr::Member {
                base: Box::new(self.expr(base)),
                member: member.clone(),
            },
            Expr::Cast { expr: inner, ty } => Expr::Cast {
                expr: Box::new(self.expr(inner)),
                ty: ty.clone(),
            },
            Expr::Tuple(elems) => Expr::Tuple(elems.iter().map(|e| self.expr(e)).collect()),
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
            } => Expr::Ternary {
                cond: Box::new(self.expr(cond)),
                then_expr: Box::new(self.expr(then_expr)),
                else_expr: Box::new(self.expr(else_expr)),
            },
            Expr::Error => Expr::Error,
        };
        Spanned::new(node, expr.span)
    }
}

/// Structurally clone an expression tree, rewriting every span to `span`
fn respan(expr: &Spanned<Expr>, span: Span) -> Spanned<Expr> {
    let node = match &expr.node {
        Expr::Number { text, suffix } => Expr::Number {
            text: text.clone(),
            suffix: suffix.clone(),
        },
        Expr::Str(bytes) => Expr::Str(bytes.clone()),
        Expr::Ident(name) => Expr::Ident(name.clone()),
        Expr::Binary { op, lhs, rhs } => Expr::Binary {
            op: *op,
            lhs: Box::new(respan(lhs, span)),
            rhs: Box::new(respan(rhs, span)),
        },
        Expr::Unary { op, operand } => Expr::Unary {
            op: *op,
            operand: Box::new(respan(operand, span)),
        },
        Expr::Call { callee, args } => Expr::Call {
            callee: Box::new(respan(callee, span)),
            args: args.iter().map(|a| respan(a, span)).collect(),
        },
        Expr::Index { base, index } => Expr::Index {
            base: Box::new(respan(base, span)),
            index: Box::new(respan(index, span)),
        },
        Expr::Member { base, member } => Expr::Member {
            base: Box::new(respan(base, span)),
            member: member.clone(),
        },
        Expr::Cast { expr: inner, ty } => Expr::Cast {
            expr: Box::new(respan(inner, span)),
            ty: Spanned::new(ty.node.clone(), span),
        },
        Expr::Tuple(elems) => Expr::Tuple(elems.iter().map(|e| respan(e, span)).collect()),
        Expr::Ternary {
            cond,
            then_expr,
            else_expr,
        } => Expr::Ternary {
            cond: Box::new(respan(cond, span)),
            then_expr: Box::new(respan(then_expr, span)),
            else_expr: Box::new(respan(else_expr, span)),
        },
        Expr::Error => Expr::Error,
    };
    Spanned::new(node, span)
}
