//! Type checker for the Karst programming language.
//!
//! Validates a parsed (and normally preprocessed) module and resolves every
//! binding into scope-indexed symbol tables.
//!
//! ## Notes
//!
//! - **Two-pass model**: the first pass (concretization, in `collect`)
//!   registers every top-level signature (imports, globals, functions)
//!   into the global scope, which is what makes forward references and
//!   mutual recursion between functions work. The second pass checks each
//!   function body against a fresh child scope of the global scope.
//! - **Builtins**: the math intrinsics (`sqrt`, `abs`, `ceil`, `floor`,
//!   `trunc`, `nearest`, `min`, `max`, `copysign`) are pre-registered
//!   before any user declaration.
//! - **Error accumulation**: diagnostics are collected, never fatal, so a
//!   single run reports as many independent problems as possible.
//! - **Output**: [`CheckResult`] carries the diagnostics, the symbol
//!   arena, the global scope id, one scope id per function (keyed by the
//!   function declaration's span), and the resolved type of every
//!   expression (keyed by expression span) for downstream consumers.

mod check_expr;
mod check_stmt;
mod collect;

#[cfg(test)]
mod tests;

use std::collections::HashMap;

use crate::frontend::ast::*;
use crate::frontend::diagnostics::{CompileError, errors};
use crate::frontend::symbols::{ScopeId, Symbol, SymbolKind, SymbolTable};

/// Everything the checker resolved, for downstream consumers
/// (code generation, hover, meta export).
#[derive(Debug)]
pub struct CheckResult {
    /// Semantic diagnostics, in source order of discovery
    pub diagnostics: Vec<CompileError>,
    /// The scope arena
    pub symbols: SymbolTable,
    /// The global scope id
    pub global: ScopeId,
    /// Map from a function declaration's span to its body scope
    pub fn_scopes: HashMap<(usize, usize), ScopeId>,
    /// Map from an expression's span to its resolved type
    pub expr_types: HashMap<(usize, usize), Type>,
}

impl CheckResult {
    pub fn expr_type(&self, span: Span) -> Option<&Type> {
        self.expr_types.get(&(span.start, span.end))
    }

    pub fn fn_scope(&self, span: Span) -> Option<ScopeId> {
        self.fn_scopes.get(&(span.start, span.end)).copied()
    }
}

/// Type checker state
pub struct TypeChecker {
    pub(crate) symbols: SymbolTable,
    pub(crate) errors: Vec<CompileError>,
    pub(crate) current_scope: ScopeId,
    pub(crate) fn_scopes: HashMap<(usize, usize), ScopeId>,
    pub(crate) expr_types: HashMap<(usize, usize), Type>,
}

impl TypeChecker {
    pub fn new() -> Self {
        let symbols = SymbolTable::new();
        let current_scope = symbols.global();
        Self {
            symbols,
            errors: Vec::new(),
            current_scope,
            fn_scopes: HashMap::new(),
            expr_types: HashMap::new(),
        }
    }

    /// Check a whole module: concretize all top-level signatures, then
    /// check global initializers and every function body.
    pub fn check_module(mut self, module: &Module) -> CheckResult {
        self.register_builtins();

        // Pass 1: concretization. Register every top-level signature so
        // bodies can reference declarations in any order.
        for decl in &module.decls {
            self.collect_decl(decl);
        }

        // Pass 2: check bodies.
        for decl in &module.decls {
            self.check_decl(decl);
        }

        CheckResult {
            diagnostics: self.errors,
            global: self.symbols.global(),
            symbols: self.symbols,
            fn_scopes: self.fn_scopes,
            expr_types: self.expr_types,
        }
    }

    fn check_decl(&mut self, decl: &Spanned<Decl>) {
        match &decl.node {
            Decl::Export(inner) => self.check_decl(inner),
            Decl::Global(global) => self.check_global(global),
            Decl::Function(function) => self.check_function(function, decl.span),
            Decl::Import(_) | Decl::Memory(_) | Decl::Def(_) => {}
        }
    }

    fn check_global(&mut self, global: &GlobalDecl) {
        let Some(init) = &global.init else { return };
        let init_ty = self.check_expr(init);
        let declared = self
            .symbols
            .lookup(self.symbols.global(), &global.name)
            .and_then(|s| s.ty.clone());
        if let (Some(found), Some(expected)) = (&init_ty, &declared) {
            if !types_compatible(found, expected) {
                self.errors.push(errors::type_mismatch(expected, found, init.span));
            }
        }
    }

    fn check_function(&mut self, function: &FunctionDecl, span: Span) {
        let scope = self.symbols.push_scope(self.symbols.global());
        self.fn_scopes.insert((span.start, span.end), scope);

        for param in &function.params {
            let ty = self.resolve_type(&param.node.ty);
            self.define(
                scope,
                Symbol {
                    name: param.node.name.clone(),
                    kind: SymbolKind::Param,
                    ty,
                    span: param.span,
                    mutable: true,
                },
            );
        }

        // Named results are assignable bindings inside the body.
        for result in &function.results {
            if let Some(name) = &result.node.name {
                let ty = self.resolve_type(&result.node.ty);
                self.define(
                    scope,
                    Symbol {
                        name: name.clone(),
                        kind: SymbolKind::Local,
                        ty,
                        span: result.span,
                        mutable: true,
                    },
                );
            }
        }

        let outer = self.current_scope;
        self.current_scope = scope;
        match &function.body {
            FnBody::Arrow(exprs) => {
                for expr in exprs {
                    self.check_expr(expr);
                }
            }
            FnBody::Block(stmts) => self.check_block(stmts),
        }
        self.current_scope = outer;
    }

    /// Define a symbol, reporting exactly one duplicate-definition
    /// diagnostic when the name is already bound in that scope (the first
    /// binding is retained unchanged).
    pub(crate) fn define(&mut self, scope: ScopeId, symbol: Symbol) {
        let name = symbol.name.clone();
        let span = symbol.span;
        if self.symbols.define(scope, symbol).is_err() {
            self.errors.push(errors::duplicate_definition(&name, span));
        }
    }

    pub(crate) fn record_expr_type(&mut self, span: Span, ty: Type) {
        self.expr_types.insert((span.start, span.end), ty);
    }

    /// Resolve a syntactic type into the closed type model.
    ///
    /// `None` means the type could not be resolved; a diagnostic has
    /// already been emitted (unless the parser produced the placeholder,
    /// which it reported itself).
    pub(crate) fn resolve_type(&mut self, ty: &Spanned<Type>) -> Option<Type> {
        self.resolve_type_at(&ty.node, ty.span)
    }

    fn resolve_type_at(&mut self, ty: &Type, span: Span) -> Option<Type> {
        match ty {
            Type::Primitive(p) => Some(Type::Primitive(*p)),
            Type::Named(name) => {
                // An empty name is the parser's recovery placeholder.
                if !name.is_empty() {
                    self.errors.push(errors::unknown_type(name, span));
                }
                None
            }
            Type::Slice(elem) => Some(Type::Slice(Box::new(self.resolve_type_at(elem, span)?))),
            Type::Array(elem, len) => {
                Some(Type::Array(Box::new(self.resolve_type_at(elem, span)?), *len))
            }
            Type::Pointer(target) => {
                Some(Type::Pointer(Box::new(self.resolve_type_at(target, span)?)))
            }
            Type::Tuple(elems) => {
                let resolved: Option<Vec<Type>> = elems
                    .iter()
                    .map(|e| self.resolve_type_at(e, span))
                    .collect();
                Some(Type::Tuple(resolved?))
            }
            Type::Function(params, ret) => {
                let params: Option<Vec<Type>> = params
                    .iter()
                    .map(|p| self.resolve_type_at(p, span))
                    .collect();
                let ret = match ret {
                    Some(r) => Some(Box::new(self.resolve_type_at(r, span)?)),
                    None => None,
                };
                Some(Type::Function(params?, ret))
            }
        }
    }
}

impl Default for TypeChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// The type-compatibility relation used at calls and assignments:
/// structural equality, or (permissively) any pairing of two numeric
/// primitive types.
pub fn types_compatible(actual: &Type, expected: &Type) -> bool {
    actual == expected || (actual.is_numeric() && expected.is_numeric())
}

/// Convenience function to type-check a module
#[tracing::instrument(skip_all, fields(decl_count = module.decls.len()))]
pub fn check(module: &Module) -> CheckResult {
    TypeChecker::new().check_module(module)
}
