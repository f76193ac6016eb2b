//! Statement checking: the checker's second pass over function bodies.

use super::{TypeChecker, types_compatible};
use crate::frontend::ast::*;
use crate::frontend::diagnostics::errors;
use crate::frontend::symbols::{Symbol, SymbolKind};

impl TypeChecker {
    pub(crate) fn check_block(&mut self, stmts: &[Spanned<Stmt>]) {
        for stmt in stmts {
            self.check_stmt(stmt);
        }
    }

    fn check_stmt(&mut self, stmt: &Spanned<Stmt>) {
        match &stmt.node {
            Stmt::Local { name, ty, init } => self.check_local(name, ty.as_ref(), init.as_ref()),
            Stmt::Assign { targets, op, value } => self.check_assign(targets, *op, value),
            Stmt::Expr(expr) => {
                self.check_expr(expr);
            }
            Stmt::Return { value, when } => {
                if let Some(value) = value {
                    self.check_expr(value);
                }
                if let Some(when) = when {
                    self.check_expr(when);
                }
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                self.check_expr(cond);
                self.check_block(then_body);
                self.check_block(else_body);
            }
            Stmt::While { cond, body } => {
                self.check_expr(cond);
                self.check_block(body);
            }
            Stmt::For { vars, iter, body } => self.check_for(vars, iter, body),
            Stmt::Loop { body } => self.check_block(body),
            Stmt::Break => {}
            Stmt::Branch { target, when } => {
                if let Some(target) = target {
                    self.check_expr(target);
                }
                if let Some(when) = when {
                    self.check_expr(when);
                }
            }
        }
    }

    fn check_local(
        &mut self,
        name: &Spanned<Ident>,
        ty: Option<&Spanned<Type>>,
        init: Option<&Spanned<Expr>>,
    ) {
        let declared = ty.and_then(|t| self.resolve_type(t));
        let init_ty = init.and_then(|e| self.check_expr(e));

        let symbol_ty = if ty.is_some() {
            // Annotated: the annotation wins (even against a mismatched
            // initializer, which is reported below but does not change the
            // binding's recorded type).
            declared.clone()
        } else if init.is_none() {
            self.errors.push(errors::cannot_infer(&name.node, name.span));
            None
        } else {
            // An initializer that failed to type was already reported;
            // the binding stays unresolved without piling on.
            init_ty.clone()
        };

        if let (Some(expected), Some(init)) = (&declared, init) {
            if let Some(found) = &init_ty {
                if !types_compatible(found, expected) {
                    self.errors.push(errors::type_mismatch(expected, found, init.span));
                }
            }
        }

        let scope = self.current_scope;
        self.define(
            scope,
            Symbol {
                name: name.node.clone(),
                kind: SymbolKind::Local,
                ty: symbol_ty,
                span: name.span,
                mutable: true,
            },
        );
    }

    fn check_assign(
        &mut self,
        targets: &[Spanned<Ident>],
        _op: Option<BinaryOp>,
        value: &Spanned<Expr>,
    ) {
        let value_ty = self.check_expr(value);

        if targets.len() == 1 {
            self.check_assign_target(&targets[0], value_ty.as_ref(), value.span);
            return;
        }

        // Multi-target destructuring against a tuple-typed value: arity is
        // diagnosed, and each target is checked against its tuple element.
        let elems: Option<Vec<Type>> = match &value_ty {
            Some(Type::Tuple(elems)) => {
                if elems.len() != targets.len() {
                    self.errors
                        .push(errors::destructure_arity(targets.len(), elems.len(), value.span));
                }
                Some(elems.clone())
            }
            Some(other) => {
                self.errors.push(errors::not_a_tuple(other, value.span));
                None
            }
            None => None,
        };

        for (i, target) in targets.iter().enumerate() {
            let elem = elems.as_ref().and_then(|e| e.get(i));
            self.check_assign_target(target, elem, value.span);
        }
    }

    fn check_assign_target(
        &mut self,
        target: &Spanned<Ident>,
        value_ty: Option<&Type>,
        value_span: Span,
    ) {
        let Some(symbol) = self.symbols.lookup(self.current_scope, &target.node) else {
            self.errors.push(errors::unknown_symbol(&target.node, target.span));
            return;
        };

        let mutable = symbol.mutable;
        let target_ty = symbol.ty.clone();

        if !mutable {
            self.errors.push(errors::not_mutable(&target.node, target.span));
        }

        if let (Some(found), Some(expected)) = (value_ty, &target_ty) {
            if !types_compatible(found, expected) {
                self.errors.push(errors::type_mismatch(expected, found, value_span));
            }
        }
    }

    /// `for` is the one block construct with a scope of its own: the
    /// iteration variables live in a child scope visible only to the loop
    /// body.
    fn check_for(&mut self, vars: &[ForVar], iter: &Spanned<Expr>, body: &[Spanned<Stmt>]) {
        let iter_ty = self.check_expr(iter);

        let for_scope = self.symbols.push_scope(self.current_scope);
        for var in vars {
            let ty = match &var.ty {
                Some(annotation) => self.resolve_type(annotation),
                None => Some(infer_loop_var(iter_ty.as_ref())),
            };
            self.define(
                for_scope,
                Symbol {
                    name: var.name.clone(),
                    kind: SymbolKind::Local,
                    ty,
                    span: var.span,
                    mutable: true,
                },
            );
        }

        let outer = self.current_scope;
        self.current_scope = for_scope;
        self.check_block(body);
        self.current_scope = outer;
    }
}

/// Infer a loop variable's type from the iterable: an integer primitive
/// propagates directly, a slice propagates its element type, anything else
/// defaults to `i32`.
fn infer_loop_var(iter_ty: Option<&Type>) -> Type {
    match iter_ty {
        Some(Type::Primitive(p)) if p.is_integer() => Type::Primitive(*p),
        Some(Type::Slice(elem)) => (**elem).clone(),
        _ => Type::Primitive(Primitive::I32),
    }
}
