//! Expression typing.
//!
//! `check_expr` returns `None` when no type could be determined; the
//! cause has already been reported (or stems from an earlier error), so
//! callers treat `None` as "do not pile on".

use super::{TypeChecker, types_compatible};
use crate::frontend::ast::*;
use crate::frontend::diagnostics::errors;

impl TypeChecker {
    /// Type an expression, recording the result for downstream consumers
    pub(crate) fn check_expr(&mut self, expr: &Spanned<Expr>) -> Option<Type> {
        let ty = self.infer_expr(expr);
        if let Some(t) = &ty {
            self.record_expr_type(expr.span, t.clone());
        }
        ty
    }

    fn infer_expr(&mut self, expr: &Spanned<Expr>) -> Option<Type> {
        match &expr.node {
            Expr::Number { text, suffix } => Some(self.number_type(text, suffix.as_deref(), expr.span)),
            Expr::Str(_) => Some(Type::Slice(Box::new(Type::Primitive(Primitive::U8)))),
            Expr::Ident(name) => self.ident_type(name, expr.span),
            Expr::Binary { op, lhs, rhs } => {
                let lhs_ty = self.check_expr(lhs);
                let rhs_ty = self.check_expr(rhs);
                if op.is_boolean() {
                    // Comparisons and logical operators yield the
                    // boolean-as-i32 primitive.
                    Some(Type::Primitive(Primitive::I32))
                } else {
                    // All other operators yield the left operand's type;
                    // operand-type equality is deliberately not enforced.
                    lhs_ty.or(rhs_ty)
                }
            }
            Expr::Unary { op, operand } => {
                let operand_ty = self.check_expr(operand);
                match op {
                    UnaryOp::Not => Some(Type::Primitive(Primitive::I32)),
                    UnaryOp::Neg | UnaryOp::BitNot => operand_ty,
                }
            }
            Expr::Call { callee, args } => self.call_type(callee, args, expr.span),
            Expr::Index { base, index } => self.index_type(base, index),
            Expr::Member { base, member } => self.member_type(base, member, expr.span),
            Expr::Cast { expr: inner, ty } => {
                // The inner expression is checked for its own errors, then
                // the asserted type is trusted unconditionally.
                self.check_expr(inner);
                self.resolve_type(ty)
            }
            Expr::Tuple(elems) => {
                let tys: Vec<Option<Type>> = elems.iter().map(|e| self.check_expr(e)).collect();
                let tys: Option<Vec<Type>> = tys.into_iter().collect();
                tys.map(Type::Tuple)
            }
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                self.check_expr(cond);
                let then_ty = self.check_expr(then_expr);
                let else_ty = self.check_expr(else_expr);
                if let (Some(t), Some(e)) = (&then_ty, &else_ty) {
                    if !types_compatible(t, e) {
                        self.errors.push(errors::branch_mismatch(t, e, expr.span));
                    }
                }
                then_ty.or(else_ty)
            }
            Expr::Error => None,
        }
    }

    /// Literal typing: `:suffix` wins, then `.`/exponent means `f64`,
    /// otherwise `i32`.
    fn number_type(&mut self, text: &str, suffix: Option<&str>, span: Span) -> Type {
        if let Some(suffix) = suffix {
            match Primitive::from_name(suffix) {
                Some(p) => return Type::Primitive(p),
                None => self.errors.push(errors::unknown_suffix(suffix, span)),
            }
        }

        let radix_prefixed = text.starts_with("0x")
            || text.starts_with("0X")
            || text.starts_with("0b")
            || text.starts_with("0B");
        let float = !radix_prefixed && (text.contains('.') || text.contains(['e', 'E']));
        if float {
            Type::Primitive(Primitive::F64)
        } else {
            Type::Primitive(Primitive::I32)
        }
    }

    fn ident_type(&mut self, name: &str, span: Span) -> Option<Type> {
        match self.symbols.lookup(self.current_scope, name) {
            Some(symbol) => symbol.ty.clone(),
            None => {
                self.errors.push(errors::unknown_symbol(name, span));
                None
            }
        }
    }

    fn call_type(
        &mut self,
        callee: &Spanned<Expr>,
        args: &[Spanned<Expr>],
        span: Span,
    ) -> Option<Type> {
        let callee_ty = self.check_expr(callee);

        let (params, ret) = match callee_ty {
            Some(Type::Function(params, ret)) => (params, ret),
            Some(other) => {
                self.errors.push(errors::not_callable(&other, callee.span));
                for arg in args {
                    self.check_expr(arg);
                }
                return None;
            }
            None => {
                for arg in args {
                    self.check_expr(arg);
                }
                return None;
            }
        };

        if args.len() != params.len() {
            self.errors.push(errors::arity_mismatch(params.len(), args.len(), span));
        }

        // Each argument is checked against its parameter; a mismatch is
        // attributed to that argument's span.
        for (arg, param) in args.iter().zip(params.iter()) {
            let arg_ty = self.check_expr(arg);
            if let Some(found) = &arg_ty {
                if !types_compatible(found, param) {
                    self.errors.push(errors::type_mismatch(param, found, arg.span));
                }
            }
        }
        for arg in args.iter().skip(params.len()) {
            self.check_expr(arg);
        }

        ret.map(|r| *r)
    }

    fn index_type(&mut self, base: &Spanned<Expr>, index: &Spanned<Expr>) -> Option<Type> {
        let base_ty = self.check_expr(base);
        let index_ty = self.check_expr(index);

        // A non-integer index is reported but does not sink the element
        // type.
        if let Some(it) = &index_ty {
            if !it.is_integer() {
                self.errors.push(errors::non_integer_index(it, index.span));
            }
        }

        match base_ty {
            Some(Type::Slice(elem)) | Some(Type::Array(elem, _)) => Some(*elem),
            Some(other) => {
                self.errors.push(errors::not_indexable(&other, base.span));
                None
            }
            None => None,
        }
    }

    fn member_type(
        &mut self,
        base: &Spanned<Expr>,
        member: &MemberKind,
        span: Span,
    ) -> Option<Type> {
        let base_ty = self.check_expr(base)?;

        match (&base_ty, member) {
            (Type::Slice(elem), MemberKind::Named(name)) if name == "ptr" => {
                Some(Type::Pointer(elem.clone()))
            }
            (Type::Slice(_), MemberKind::Named(name)) if name == "len" => {
                Some(Type::Primitive(Primitive::U32))
            }
            (Type::Pointer(target), MemberKind::Deref) => Some((**target).clone()),
            (Type::Tuple(elems), MemberKind::Field(n)) => {
                // Tuple fields are 1-based.
                if *n >= 1 && (*n as usize) <= elems.len() {
                    Some(elems[*n as usize - 1].clone())
                } else {
                    self.errors
                        .push(errors::tuple_field_out_of_bounds(elems.len(), *n, span));
                    None
                }
            }
            _ => {
                let member_name = match member {
                    MemberKind::Named(name) => name.clone(),
                    MemberKind::Field(n) => n.to_string(),
                    MemberKind::Deref => "*".to_string(),
                };
                self.errors
                    .push(errors::no_such_property(&base_ty, &member_name, span));
                None
            }
        }
    }
}
