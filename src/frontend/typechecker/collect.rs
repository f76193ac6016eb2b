//! Concretization: the checker's first pass.
//!
//! Registers every top-level signature (imports, globals, functions)
//! into the global scope before any body is checked, so bodies can
//! reference declarations in any order (forward references and mutual
//! recursion). Built-in math intrinsics are registered first.

use super::TypeChecker;
use crate::frontend::ast::*;
use crate::frontend::symbols::{Symbol, SymbolKind};

/// One-argument `(f64) -> f64` intrinsics
const UNARY_MATH_BUILTINS: &[&str] = &["sqrt", "abs", "ceil", "floor", "trunc", "nearest"];

/// Two-argument `(f64, f64) -> f64` intrinsics
const BINARY_MATH_BUILTINS: &[&str] = &["min", "max", "copysign"];

impl TypeChecker {
    pub(crate) fn register_builtins(&mut self) {
        let global = self.symbols.global();
        let f64_ty = Type::Primitive(Primitive::F64);

        for name in UNARY_MATH_BUILTINS {
            self.define(
                global,
                Symbol {
                    name: name.to_string(),
                    kind: SymbolKind::Builtin,
                    ty: Some(Type::Function(
                        vec![f64_ty.clone()],
                        Some(Box::new(f64_ty.clone())),
                    )),
                    span: Span::default(),
                    mutable: false,
                },
            );
        }
        for name in BINARY_MATH_BUILTINS {
            self.define(
                global,
                Symbol {
                    name: name.to_string(),
                    kind: SymbolKind::Builtin,
                    ty: Some(Type::Function(
                        vec![f64_ty.clone(), f64_ty.clone()],
                        Some(Box::new(f64_ty.clone())),
                    )),
                    span: Span::default(),
                    mutable: false,
                },
            );
        }
    }

    pub(crate) fn collect_decl(&mut self, decl: &Spanned<Decl>) {
        let global = self.symbols.global();
        match &decl.node {
            Decl::Export(inner) => self.collect_decl(inner),
            Decl::Import(import) => {
                for item in &import.items {
                    let ty = self.resolve_type(&item.node.ty);
                    self.define(
                        global,
                        Symbol {
                            name: item.node.name.clone(),
                            kind: SymbolKind::Import,
                            ty,
                            span: item.span,
                            mutable: false,
                        },
                    );
                }
            }
            Decl::Global(g) => {
                let ty = self.resolve_type(&g.ty);
                self.define(
                    global,
                    Symbol {
                        name: g.name.clone(),
                        kind: SymbolKind::Global,
                        ty,
                        span: decl.span,
                        mutable: g.mutable,
                    },
                );
            }
            Decl::Function(f) => {
                let ty = self.signature_type(f);
                let name = match &f.name {
                    Some(name) => name.clone(),
                    // An anonymous function has no global binding.
                    None => return,
                };
                self.define(
                    global,
                    Symbol {
                        name,
                        kind: SymbolKind::Function,
                        ty,
                        span: decl.span,
                        mutable: false,
                    },
                );
            }
            Decl::Memory(_) | Decl::Def(_) => {}
        }
    }

    /// Build the function type from a declaration's signature.
    ///
    /// `None` when any parameter or result type fails to resolve; the
    /// symbol still occupies its name so duplicates are caught.
    fn signature_type(&mut self, f: &FunctionDecl) -> Option<Type> {
        let mut params = Vec::with_capacity(f.params.len());
        for param in &f.params {
            params.push(self.resolve_type(&param.node.ty)?);
        }

        let mut results = Vec::with_capacity(f.results.len());
        for result in &f.results {
            results.push(self.resolve_type(&result.node.ty)?);
        }

        let ret = match results.len() {
            0 => None,
            1 => Some(Box::new(results.into_iter().next().expect("one result"))),
            _ => Some(Box::new(Type::Tuple(results))),
        };

        Some(Type::Function(params, ret))
    }
}
