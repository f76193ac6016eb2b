//! WebAssembly text format emitter.
//!
//! Lowers a checked module to `.wat` source. The supported subset covers
//! scalar computation: imports, exports, globals, memories, functions over
//! the numeric primitives, the full operator set, calls (including the
//! math intrinsics), `if`/`while`/`loop`/integer-`for` control flow,
//! `br`/`break`/`return` (multi-value returns included), ternary via
//! `select`, and numeric casts. Slice, array, tuple-in-memory, pointer,
//! and string-data operations are reported as [`EmitError::Unsupported`].

use std::collections::HashMap;

use thiserror::Error;

use crate::frontend::ast::*;
use crate::frontend::symbols::SymbolKind;
use crate::frontend::typechecker::CheckResult;

/// Errors that occur while emitting WebAssembly text
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("code generation does not support {0}")]
    Unsupported(String),

    #[error("invalid numeric literal '{0}'")]
    InvalidNumber(String),

    #[error("unknown binding '{0}' at code generation")]
    UnknownBinding(String),
}

/// WebAssembly value types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValType {
    I32,
    I64,
    F32,
    F64,
}

impl ValType {
    fn wat(self) -> &'static str {
        match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
        }
    }

    fn is_float(self) -> bool {
        matches!(self, ValType::F32 | ValType::F64)
    }
}

/// Lower a front-end type to a WebAssembly value type
fn val_type(ty: &Type) -> Result<ValType, EmitError> {
    match ty {
        Type::Primitive(p) => Ok(match p {
            Primitive::U8 | Primitive::I32 | Primitive::U32 => ValType::I32,
            Primitive::I64 | Primitive::U64 => ValType::I64,
            Primitive::F32 => ValType::F32,
            Primitive::F64 => ValType::F64,
        }),
        Type::Pointer(_) => Ok(ValType::I32),
        other => Err(EmitError::Unsupported(format!(
            "values of type '{}' in code generation",
            other
        ))),
    }
}

fn type_signed(ty: &Type) -> bool {
    match ty {
        Type::Primitive(p) => p.is_signed(),
        Type::Pointer(_) => false,
        _ => true,
    }
}

/// A function-local binding's lowered shape
#[derive(Debug, Clone, Copy)]
struct Slot {
    vt: ValType,
    signed: bool,
}

/// Structured-control frames, innermost last; `br` depths are computed
/// against this stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    /// A `block` wrapping a loop; `break` targets the nearest one
    ExitBlock,
    Loop,
    If,
}

/// The math intrinsics map straight onto `f64` instructions
fn builtin_instr(name: &str) -> Option<&'static str> {
    let instr = match name {
        "sqrt" => "f64.sqrt",
        "abs" => "f64.abs",
        "ceil" => "f64.ceil",
        "floor" => "f64.floor",
        "trunc" => "f64.trunc",
        "nearest" => "f64.nearest",
        "min" => "f64.min",
        "max" => "f64.max",
        "copysign" => "f64.copysign",
        _ => return None,
    };
    Some(instr)
}

/// Emit a checked module as WebAssembly text.
#[tracing::instrument(skip_all, fields(decl_count = module.decls.len()))]
pub fn emit_module(module: &Module, check: &CheckResult) -> Result<String, EmitError> {
    let mut emitter = WatEmitter {
        check,
        out: String::new(),
        indent: 0,
        locals: HashMap::new(),
    };
    emitter.module(module)?;
    Ok(emitter.out)
}

struct WatEmitter<'a> {
    check: &'a CheckResult,
    out: String,
    indent: usize,
    /// Current function's locals (params included), by source name
    locals: HashMap<String, Slot>,
}

impl<'a> WatEmitter<'a> {
    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn module(&mut self, module: &Module) -> Result<(), EmitError> {
        self.line("(module");
        self.indent += 1;

        // Imports must precede all definitions.
        for decl in &module.decls {
            if let Decl::Import(import) = &decl.node {
                self.import(import)?;
            }
        }

        for decl in &module.decls {
            let (inner, exported) = flatten_export(decl);
            if let Decl::Memory(memory) = &inner.node {
                let max = memory
                    .max
                    .map(|m| format!(" {}", m))
                    .unwrap_or_default();
                self.line(&format!("(memory ${} {}{})", memory.name, memory.min, max));
                if exported {
                    self.line(&format!("(export \"{0}\" (memory ${0}))", memory.name));
                }
            }
        }

        for decl in &module.decls {
            let (inner, exported) = flatten_export(decl);
            if let Decl::Global(global) = &inner.node {
                self.global(global, exported)?;
            }
        }

        for decl in &module.decls {
            let (inner, exported) = flatten_export(decl);
            if let Decl::Function(function) = &inner.node {
                self.function(function, exported)?;
            }
        }

        self.indent -= 1;
        self.line(")");
        Ok(())
    }

    fn import(&mut self, import: &ImportDecl) -> Result<(), EmitError> {
        for item in &import.items {
            match &item.node.ty.node {
                Type::Function(params, ret) => {
                    let mut sig = String::new();
                    for p in params {
                        sig.push_str(&format!(" (param {})", val_type(p)?.wat()));
                    }
                    if let Some(ret) = ret {
                        sig.push_str(" (result");
                        for vt in ret_val_types(ret)? {
                            sig.push_str(&format!(" {}", vt.wat()));
                        }
                        sig.push(')');
                    }
                    self.line(&format!(
                        "(import \"{}\" \"{}\" (func ${}{}))",
                        import.module, item.node.name, item.node.name, sig
                    ));
                }
                other => {
                    let vt = val_type(other)?;
                    self.line(&format!(
                        "(import \"{}\" \"{}\" (global ${} {}))",
                        import.module,
                        item.node.name,
                        item.node.name,
                        vt.wat()
                    ));
                }
            }
        }
        Ok(())
    }

    fn global(&mut self, global: &GlobalDecl, exported: bool) -> Result<(), EmitError> {
        let vt = val_type(&global.ty.node)?;
        let value = match &global.init {
            Some(init) => match &init.node {
                Expr::Number { text, .. } => const_instr(vt, text)?,
                _ => {
                    return Err(EmitError::Unsupported(
                        "non-constant global initializers".to_string(),
                    ));
                }
            },
            None => const_instr(vt, "0")?,
        };

        let ty = if global.mutable {
            format!("(mut {})", vt.wat())
        } else {
            vt.wat().to_string()
        };
        self.line(&format!("(global ${} {} ({}))", global.name, ty, value));
        if exported {
            self.line(&format!("(export \"{0}\" (global ${0}))", global.name));
        }
        Ok(())
    }

    // ========================================================================
    // Functions
    // ========================================================================

    fn function(&mut self, function: &FunctionDecl, exported: bool) -> Result<(), EmitError> {
        let Some(name) = &function.name else {
            // An anonymous function is unreachable; nothing to emit.
            return Ok(());
        };

        self.locals.clear();

        let mut header = format!("(func ${}", name);
        for param in &function.params {
            let vt = val_type(&param.node.ty.node)?;
            self.locals.insert(
                param.node.name.clone(),
                Slot {
                    vt,
                    signed: type_signed(&param.node.ty.node),
                },
            );
            header.push_str(&format!(" (param ${} {})", param.node.name, vt.wat()));
        }
        if !function.results.is_empty() {
            header.push_str(" (result");
            for result in &function.results {
                // A single tuple result expands to the multi-value shape.
                for vt in ret_val_types(&result.node.ty.node)? {
                    header.push_str(&format!(" {}", vt.wat()));
                }
            }
            header.push(')');
        }
        self.line(&header);
        self.indent += 1;

        // Declare locals up front: named results, `local` statements, and
        // `for` loop variables (plus their synthesized limit slots).
        let mut local_decls: Vec<(String, Slot)> = Vec::new();
        for result in &function.results {
            if let Some(rname) = &result.node.name {
                let slot = Slot {
                    vt: val_type(&result.node.ty.node)?,
                    signed: type_signed(&result.node.ty.node),
                };
                self.declare_local(rname, slot, &mut local_decls)?;
            }
        }
        if let FnBody::Block(stmts) = &function.body {
            self.collect_locals(stmts, &mut local_decls)?;
        }
        for (lname, slot) in &local_decls {
            self.line(&format!("(local ${} {})", lname, slot.vt.wat()));
        }

        let mut frames = Vec::new();
        match &function.body {
            FnBody::Arrow(exprs) => {
                for expr in exprs {
                    let produced = self.expr(expr, &mut frames)?;
                    if function.results.is_empty() {
                        for _ in produced {
                            self.line("drop");
                        }
                    }
                }
            }
            FnBody::Block(stmts) => {
                for stmt in stmts {
                    self.stmt(stmt, &mut frames)?;
                }
                // Named results are returned implicitly at fall-off.
                if function.results.iter().all(|r| r.node.name.is_some()) {
                    for result in &function.results {
                        if let Some(rname) = &result.node.name {
                            self.line(&format!("local.get ${}", rname));
                        }
                    }
                }
            }
        }

        self.indent -= 1;
        self.line(")");
        if exported {
            self.line(&format!("(export \"{0}\" (func ${0}))", name));
        }
        Ok(())
    }

    fn declare_local(
        &mut self,
        name: &str,
        slot: Slot,
        decls: &mut Vec<(String, Slot)>,
    ) -> Result<(), EmitError> {
        if let Some(existing) = self.locals.get(name) {
            if existing.vt != slot.vt {
                return Err(EmitError::Unsupported(format!(
                    "re-declaring local '{}' with a different value type",
                    name
                )));
            }
            return Ok(());
        }
        self.locals.insert(name.to_string(), slot);
        decls.push((name.to_string(), slot));
        Ok(())
    }

    fn collect_locals(
        &mut self,
        stmts: &[Spanned<Stmt>],
        decls: &mut Vec<(String, Slot)>,
    ) -> Result<(), EmitError> {
        for stmt in stmts {
            match &stmt.node {
                Stmt::Local { name, ty, init } => {
                    let resolved = match ty {
                        Some(annotation) => annotation.node.clone(),
                        None => match init.as_ref().and_then(|e| self.check.expr_type(e.span)) {
                            Some(t) => t.clone(),
                            None => {
                                return Err(EmitError::UnknownBinding(name.node.clone()));
                            }
                        },
                    };
                    let slot = Slot {
                        vt: val_type(&resolved)?,
                        signed: type_signed(&resolved),
                    };
                    self.declare_local(&name.node, slot, decls)?;
                }
                Stmt::For { vars, iter, body } => {
                    if vars.len() != 1 {
                        return Err(EmitError::Unsupported(
                            "multi-variable for loops".to_string(),
                        ));
                    }
                    let var = &vars[0];
                    let resolved = match &var.ty {
                        Some(annotation) => annotation.node.clone(),
                        None => match self.check.expr_type(iter.span) {
                            Some(t @ Type::Primitive(p)) if p.is_integer() => t.clone(),
                            _ => Type::Primitive(Primitive::I32),
                        },
                    };
                    let slot = Slot {
                        vt: val_type(&resolved)?,
                        signed: type_signed(&resolved),
                    };
                    self.declare_local(&var.name, slot, decls)?;
                    self.declare_local(&format!("{}__limit", var.name), slot, decls)?;
                    self.collect_locals(body, decls)?;
                }
                Stmt::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    self.collect_locals(then_body, decls)?;
                    self.collect_locals(else_body, decls)?;
                }
                Stmt::While { body, .. } | Stmt::Loop { body } => {
                    self.collect_locals(body, decls)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn stmt(&mut self, stmt: &Spanned<Stmt>, frames: &mut Vec<Frame>) -> Result<(), EmitError> {
        match &stmt.node {
            Stmt::Local { name, init, .. } => {
                if let Some(init) = init {
                    self.expr_single(init, frames)?;
                    self.line(&format!("local.set ${}", name.node));
                }
                Ok(())
            }
            Stmt::Assign { targets, op, value } => self.assign(targets, *op, value, frames),
            Stmt::Expr(expr) => {
                let produced = self.expr(expr, frames)?;
                for _ in produced {
                    self.line("drop");
                }
                Ok(())
            }
            Stmt::Return { value, when } => {
                match when {
                    Some(cond) => {
                        self.expr_single(cond, frames)?;
                        self.line("if");
                        self.indent += 1;
                        frames.push(Frame::If);
                        if let Some(value) = value {
                            self.expr(value, frames)?;
                        }
                        self.line("return");
                        frames.pop();
                        self.indent -= 1;
                        self.line("end");
                    }
                    None => {
                        if let Some(value) = value {
                            self.expr(value, frames)?;
                        }
                        self.line("return");
                    }
                }
                Ok(())
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                self.expr_single(cond, frames)?;
                self.line("if");
                self.indent += 1;
                frames.push(Frame::If);
                for stmt in then_body {
                    self.stmt(stmt, frames)?;
                }
                if !else_body.is_empty() {
                    self.indent -= 1;
                    self.line("else");
                    self.indent += 1;
                    for stmt in else_body {
                        self.stmt(stmt, frames)?;
                    }
                }
                frames.pop();
                self.indent -= 1;
                self.line("end");
                Ok(())
            }
            Stmt::While { cond, body } => {
                self.line("block");
                self.indent += 1;
                frames.push(Frame::ExitBlock);
                self.line("loop");
                self.indent += 1;
                frames.push(Frame::Loop);

                self.expr_single(cond, frames)?;
                self.line("i32.eqz");
                self.line("br_if 1");
                for stmt in body {
                    self.stmt(stmt, frames)?;
                }
                self.line("br 0");

                frames.pop();
                self.indent -= 1;
                self.line("end");
                frames.pop();
                self.indent -= 1;
                self.line("end");
                Ok(())
            }
            Stmt::Loop { body } => {
                self.line("block");
                self.indent += 1;
                frames.push(Frame::ExitBlock);
                self.line("loop");
                self.indent += 1;
                frames.push(Frame::Loop);

                for stmt in body {
                    self.stmt(stmt, frames)?;
                }
                self.line("br 0");

                frames.pop();
                self.indent -= 1;
                self.line("end");
                frames.pop();
                self.indent -= 1;
                self.line("end");
                Ok(())
            }
            Stmt::For { vars, iter, body } => self.for_loop(vars, iter, body, frames),
            Stmt::Break => {
                let depth = frames
                    .iter()
                    .rev()
                    .position(|f| *f == Frame::ExitBlock)
                    .ok_or_else(|| {
                        EmitError::Unsupported("'break' outside of a loop".to_string())
                    })?;
                self.line(&format!("br {}", depth));
                Ok(())
            }
            Stmt::Branch { target, when } => {
                let depth = match target {
                    Some(expr) => match &expr.node {
                        Expr::Number { text, .. } => text.parse::<u32>().map_err(|_| {
                            EmitError::Unsupported(
                                "non-literal branch targets".to_string(),
                            )
                        })?,
                        _ => {
                            return Err(EmitError::Unsupported(
                                "non-literal branch targets".to_string(),
                            ));
                        }
                    },
                    None => 0,
                };
                match when {
                    Some(cond) => {
                        self.expr_single(cond, frames)?;
                        self.line(&format!("br_if {}", depth));
                    }
                    None => self.line(&format!("br {}", depth)),
                }
                Ok(())
            }
        }
    }

    fn assign(
        &mut self,
        targets: &[Spanned<Ident>],
        op: Option<BinaryOp>,
        value: &Spanned<Expr>,
        frames: &mut Vec<Frame>,
    ) -> Result<(), EmitError> {
        if targets.len() != 1 {
            return Err(EmitError::Unsupported(
                "destructuring assignment".to_string(),
            ));
        }
        let target = &targets[0];

        let (get, set, slot) = self.binding(&target.node)?;

        match op {
            Some(op) => {
                self.line(&get);
                let vt = self.expr_single(value, frames)?;
                if vt != slot.vt {
                    return Err(EmitError::Unsupported(
                        "mixed-type operands".to_string(),
                    ));
                }
                let instr = arith_instr(op, slot.vt, slot.signed)?;
                self.line(&instr);
            }
            None => {
                self.expr_single(value, frames)?;
            }
        }
        self.line(&set);
        Ok(())
    }

    fn for_loop(
        &mut self,
        vars: &[ForVar],
        iter: &Spanned<Expr>,
        body: &[Spanned<Stmt>],
        frames: &mut Vec<Frame>,
    ) -> Result<(), EmitError> {
        if vars.len() != 1 {
            return Err(EmitError::Unsupported(
                "multi-variable for loops".to_string(),
            ));
        }
        let var = &vars[0];
        let slot = *self
            .locals
            .get(&var.name)
            .ok_or_else(|| EmitError::UnknownBinding(var.name.clone()))?;
        if slot.vt.is_float() {
            return Err(EmitError::Unsupported(
                "for loops over non-integer iterables".to_string(),
            ));
        }

        let limit = format!("{}__limit", var.name);
        let vt = self.expr_single(iter, frames)?;
        if vt != slot.vt {
            return Err(EmitError::Unsupported(
                "for loops over non-integer iterables".to_string(),
            ));
        }
        self.line(&format!("local.set ${}", limit));
        self.line(&const_instr(slot.vt, "0")?);
        self.line(&format!("local.set ${}", var.name));

        self.line("block");
        self.indent += 1;
        frames.push(Frame::ExitBlock);
        self.line("loop");
        self.indent += 1;
        frames.push(Frame::Loop);

        self.line(&format!("local.get ${}", var.name));
        self.line(&format!("local.get ${}", limit));
        let cmp = if slot.signed { "ge_s" } else { "ge_u" };
        self.line(&format!("{}.{}", slot.vt.wat(), cmp));
        self.line("br_if 1");

        for stmt in body {
            self.stmt(stmt, frames)?;
        }

        self.line(&format!("local.get ${}", var.name));
        self.line(&const_instr(slot.vt, "1")?);
        self.line(&format!("{}.add", slot.vt.wat()));
        self.line(&format!("local.set ${}", var.name));
        self.line("br 0");

        frames.pop();
        self.indent -= 1;
        self.line("end");
        frames.pop();
        self.indent -= 1;
        self.line("end");
        Ok(())
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// Emit an expression; returns the value types it leaves on the stack
    fn expr(
        &mut self,
        expr: &Spanned<Expr>,
        frames: &mut Vec<Frame>,
    ) -> Result<Vec<ValType>, EmitError> {
        match &expr.node {
            Expr::Number { text, .. } => {
                let ty = self
                    .check
                    .expr_type(expr.span)
                    .cloned()
                    .unwrap_or(Type::Primitive(Primitive::I32));
                let vt = val_type(&ty)?;
                self.line(&const_instr(vt, text)?);
                Ok(vec![vt])
            }
            Expr::Str(_) => Err(EmitError::Unsupported(
                "string literals in code generation".to_string(),
            )),
            Expr::Ident(name) => {
                let (get, _, slot) = self.binding(name)?;
                self.line(&get);
                Ok(vec![slot.vt])
            }
            Expr::Unary { op, operand } => self.unary(*op, operand, frames),
            Expr::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, frames),
            Expr::Call { callee, args } => self.call(callee, args, frames),
            Expr::Cast { expr: inner, ty } => {
                let from_ty = self
                    .check
                    .expr_type(inner.span)
                    .cloned()
                    .unwrap_or(Type::Primitive(Primitive::I32));
                let from = self.expr_single(inner, frames)?;
                let to = val_type(&ty.node)?;
                if let Some(instr) = cast_instr(from, to, type_signed(&from_ty), type_signed(&ty.node)) {
                    self.line(instr);
                }
                Ok(vec![to])
            }
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                let t1 = self.expr_single(then_expr, frames)?;
                let t2 = self.expr_single(else_expr, frames)?;
                if t1 != t2 {
                    return Err(EmitError::Unsupported(
                        "mixed-type ternary branches".to_string(),
                    ));
                }
                self.expr_single(cond, frames)?;
                self.line("select");
                Ok(vec![t1])
            }
            Expr::Tuple(elems) => {
                // A tuple in value position lowers to the multi-value
                // stack shape (used by returns and arrow bodies).
                let mut produced = Vec::new();
                for elem in elems {
                    produced.push(self.expr_single(elem, frames)?);
                }
                Ok(produced)
            }
            Expr::Index { .. } => Err(EmitError::Unsupported(
                "slice and array indexing in code generation".to_string(),
            )),
            Expr::Member { .. } => Err(EmitError::Unsupported(
                "member access in code generation".to_string(),
            )),
            Expr::Error => Err(EmitError::Unsupported(
                "modules containing parse errors".to_string(),
            )),
        }
    }

    /// Emit an expression that must produce exactly one value
    fn expr_single(
        &mut self,
        expr: &Spanned<Expr>,
        frames: &mut Vec<Frame>,
    ) -> Result<ValType, EmitError> {
        let produced = self.expr(expr, frames)?;
        if produced.len() != 1 {
            return Err(EmitError::Unsupported(
                "multi-value expressions in single-value position".to_string(),
            ));
        }
        Ok(produced[0])
    }

    fn unary(
        &mut self,
        op: UnaryOp,
        operand: &Spanned<Expr>,
        frames: &mut Vec<Frame>,
    ) -> Result<Vec<ValType>, EmitError> {
        match op {
            UnaryOp::Neg => {
                let vt = self.peek_val_type(operand)?;
                if vt.is_float() {
                    self.expr_single(operand, frames)?;
                    self.line(&format!("{}.neg", vt.wat()));
                } else {
                    self.line(&const_instr(vt, "0")?);
                    self.expr_single(operand, frames)?;
                    self.line(&format!("{}.sub", vt.wat()));
                }
                Ok(vec![vt])
            }
            UnaryOp::Not => {
                let vt = self.expr_single(operand, frames)?;
                self.normalize_bool_negated(vt)?;
                Ok(vec![ValType::I32])
            }
            UnaryOp::BitNot => {
                let vt = self.expr_single(operand, frames)?;
                if vt.is_float() {
                    return Err(EmitError::Unsupported(
                        "bitwise operators on floats".to_string(),
                    ));
                }
                self.line(&const_instr(vt, "-1")?);
                self.line(&format!("{}.xor", vt.wat()));
                Ok(vec![vt])
            }
        }
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        lhs: &Spanned<Expr>,
        rhs: &Spanned<Expr>,
        frames: &mut Vec<Frame>,
    ) -> Result<Vec<ValType>, EmitError> {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let lt = self.expr_single(lhs, frames)?;
                self.normalize_bool(lt)?;
                let rt = self.expr_single(rhs, frames)?;
                self.normalize_bool(rt)?;
                let instr = if op == BinaryOp::And { "i32.and" } else { "i32.or" };
                self.line(instr);
                Ok(vec![ValType::I32])
            }
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => {
                let signed = self.expr_signed(lhs);
                let lt = self.expr_single(lhs, frames)?;
                let rt = self.expr_single(rhs, frames)?;
                if lt != rt {
                    return Err(EmitError::Unsupported("mixed-type operands".to_string()));
                }
                self.line(&compare_instr(op, lt, signed));
                Ok(vec![ValType::I32])
            }
            _ => {
                let signed = self.expr_signed(lhs);
                let lt = self.expr_single(lhs, frames)?;
                let rt = self.expr_single(rhs, frames)?;
                if lt != rt {
                    return Err(EmitError::Unsupported("mixed-type operands".to_string()));
                }
                let instr = arith_instr(op, lt, signed)?;
                self.line(&instr);
                Ok(vec![lt])
            }
        }
    }

    fn call(
        &mut self,
        callee: &Spanned<Expr>,
        args: &[Spanned<Expr>],
        frames: &mut Vec<Frame>,
    ) -> Result<Vec<ValType>, EmitError> {
        let Expr::Ident(name) = &callee.node else {
            return Err(EmitError::Unsupported("indirect calls".to_string()));
        };

        let symbol = self
            .check
            .symbols
            .lookup(self.check.global, name)
            .ok_or_else(|| EmitError::UnknownBinding(name.clone()))?;
        let kind = symbol.kind;
        let fn_ty = symbol.ty.clone();

        for arg in args {
            self.expr_single(arg, frames)?;
        }

        if kind == SymbolKind::Builtin {
            let instr = builtin_instr(name)
                .ok_or_else(|| EmitError::UnknownBinding(name.clone()))?;
            self.line(instr);
            return Ok(vec![ValType::F64]);
        }

        let Some(Type::Function(_, ret)) = fn_ty else {
            return Err(EmitError::Unsupported(format!(
                "calling non-function binding '{}'",
                name
            )));
        };

        self.line(&format!("call ${}", name));

        match ret {
            None => Ok(Vec::new()),
            Some(ret) => match *ret {
                Type::Tuple(elems) => {
                    let mut produced = Vec::new();
                    for elem in &elems {
                        produced.push(val_type(elem)?);
                    }
                    Ok(produced)
                }
                other => Ok(vec![val_type(&other)?]),
            },
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Resolve a name to its access instructions and slot, checking
    /// function locals first and module globals second.
    fn binding(&self, name: &str) -> Result<(String, String, Slot), EmitError> {
        if let Some(slot) = self.locals.get(name) {
            return Ok((
                format!("local.get ${}", name),
                format!("local.set ${}", name),
                *slot,
            ));
        }

        let symbol = self
            .check
            .symbols
            .lookup(self.check.global, name)
            .ok_or_else(|| EmitError::UnknownBinding(name.to_string()))?;
        match symbol.kind {
            SymbolKind::Global | SymbolKind::Import => {
                let ty = symbol
                    .ty
                    .as_ref()
                    .ok_or_else(|| EmitError::UnknownBinding(name.to_string()))?;
                if matches!(ty, Type::Function(..)) {
                    return Err(EmitError::Unsupported(
                        "first-class function references".to_string(),
                    ));
                }
                let slot = Slot {
                    vt: val_type(ty)?,
                    signed: type_signed(ty),
                };
                Ok((
                    format!("global.get ${}", name),
                    format!("global.set ${}", name),
                    slot,
                ))
            }
            _ => Err(EmitError::Unsupported(
                "first-class function references".to_string(),
            )),
        }
    }

    /// The value type an expression will produce, from the checker's
    /// recorded types (defaulting to i32 when unrecorded).
    fn peek_val_type(&self, expr: &Spanned<Expr>) -> Result<ValType, EmitError> {
        let ty = self
            .check
            .expr_type(expr.span)
            .cloned()
            .unwrap_or(Type::Primitive(Primitive::I32));
        val_type(&ty)
    }

    fn expr_signed(&self, expr: &Spanned<Expr>) -> bool {
        match self.check.expr_type(expr.span) {
            Some(ty) => type_signed(ty),
            None => true,
        }
    }

    /// Top of stack: value of `vt` -> boolean (0/1) as i32
    fn normalize_bool(&mut self, vt: ValType) -> Result<(), EmitError> {
        self.normalize_bool_negated(vt)?;
        self.line("i32.eqz");
        Ok(())
    }

    /// Top of stack: value of `vt` -> negated boolean as i32
    fn normalize_bool_negated(&mut self, vt: ValType) -> Result<(), EmitError> {
        match vt {
            ValType::I32 => self.line("i32.eqz"),
            ValType::I64 => self.line("i64.eqz"),
            ValType::F32 => {
                self.line("f32.const 0");
                self.line("f32.eq");
            }
            ValType::F64 => {
                self.line("f64.const 0");
                self.line("f64.eq");
            }
        }
        Ok(())
    }
}

/// Value types of a function's return: a tuple expands to the wasm
/// multi-value shape, anything else is a single value.
fn ret_val_types(ret: &Type) -> Result<Vec<ValType>, EmitError> {
    match ret {
        Type::Tuple(elems) => elems.iter().map(val_type).collect(),
        other => Ok(vec![val_type(other)?]),
    }
}

/// Unwrap an `export` wrapper, reporting whether it was present
fn flatten_export(decl: &Spanned<Decl>) -> (&Spanned<Decl>, bool) {
    match &decl.node {
        Decl::Export(inner) => (inner.as_ref(), true),
        _ => (decl, false),
    }
}

/// A `<t>.const` instruction for a literal's text
fn const_instr(vt: ValType, text: &str) -> Result<String, EmitError> {
    let parse_int = |text: &str| -> Result<i128, EmitError> {
        let value = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            i128::from_str_radix(hex, 16)
        } else if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
            i128::from_str_radix(bin, 2)
        } else {
            text.parse::<i128>()
        };
        value.map_err(|_| EmitError::InvalidNumber(text.to_string()))
    };

    let instr = match vt {
        ValType::I32 | ValType::I64 => {
            format!("{}.const {}", vt.wat(), parse_int(text)?)
        }
        ValType::F32 | ValType::F64 => {
            let value: f64 = if text.starts_with("0x")
                || text.starts_with("0X")
                || text.starts_with("0b")
                || text.starts_with("0B")
            {
                parse_int(text)? as f64
            } else {
                text.parse()
                    .map_err(|_| EmitError::InvalidNumber(text.to_string()))?
            };
            format!("{}.const {}", vt.wat(), value)
        }
    };
    Ok(instr)
}

fn compare_instr(op: BinaryOp, vt: ValType, signed: bool) -> String {
    let suffix = |base: &str| {
        if vt.is_float() {
            base.to_string()
        } else if signed {
            format!("{}_s", base)
        } else {
            format!("{}_u", base)
        }
    };
    let name = match op {
        BinaryOp::Eq => "eq".to_string(),
        BinaryOp::Ne => "ne".to_string(),
        BinaryOp::Lt => suffix("lt"),
        BinaryOp::Le => suffix("le"),
        BinaryOp::Gt => suffix("gt"),
        BinaryOp::Ge => suffix("ge"),
        _ => unreachable!("not a comparison"),
    };
    format!("{}.{}", vt.wat(), name)
}

fn arith_instr(op: BinaryOp, vt: ValType, signed: bool) -> Result<String, EmitError> {
    let float = vt.is_float();
    let int_only = |name: &str| -> Result<String, EmitError> {
        if float {
            Err(EmitError::Unsupported(
                "bitwise operators on floats".to_string(),
            ))
        } else {
            Ok(name.to_string())
        }
    };
    let name = match op {
        BinaryOp::Add => "add".to_string(),
        BinaryOp::Sub => "sub".to_string(),
        BinaryOp::Mul => "mul".to_string(),
        BinaryOp::Div => {
            if float {
                "div".to_string()
            } else if signed {
                "div_s".to_string()
            } else {
                "div_u".to_string()
            }
        }
        BinaryOp::Rem => {
            if float {
                return Err(EmitError::Unsupported(
                    "remainder on floats".to_string(),
                ));
            } else if signed {
                "rem_s".to_string()
            } else {
                "rem_u".to_string()
            }
        }
        BinaryOp::BitAnd => int_only("and")?,
        BinaryOp::BitOr => int_only("or")?,
        BinaryOp::BitXor => int_only("xor")?,
        BinaryOp::Shl => int_only("shl")?,
        BinaryOp::Shr => {
            if float {
                return Err(EmitError::Unsupported(
                    "bitwise operators on floats".to_string(),
                ));
            } else if signed {
                "shr_s".to_string()
            } else {
                "shr_u".to_string()
            }
        }
        _ => unreachable!("not an arithmetic operator"),
    };
    Ok(format!("{}.{}", vt.wat(), name))
}

/// The conversion instruction between two value types, if one is needed
fn cast_instr(from: ValType, to: ValType, src_signed: bool, dst_signed: bool) -> Option<&'static str> {
    use ValType::*;
    let instr = match (from, to) {
        (a, b) if a == b => return None,
        (I32, I64) => {
            if src_signed {
                "i64.extend_i32_s"
            } else {
                "i64.extend_i32_u"
            }
        }
        (I64, I32) => "i32.wrap_i64",
        (I32, F32) => {
            if src_signed {
                "f32.convert_i32_s"
            } else {
                "f32.convert_i32_u"
            }
        }
        (I32, F64) => {
            if src_signed {
                "f64.convert_i32_s"
            } else {
                "f64.convert_i32_u"
            }
        }
        (I64, F32) => {
            if src_signed {
                "f32.convert_i64_s"
            } else {
                "f32.convert_i64_u"
            }
        }
        (I64, F64) => {
            if src_signed {
                "f64.convert_i64_s"
            } else {
                "f64.convert_i64_u"
            }
        }
        (F32, I32) => {
            if dst_signed {
                "i32.trunc_f32_s"
            } else {
                "i32.trunc_f32_u"
            }
        }
        (F64, I32) => {
            if dst_signed {
                "i32.trunc_f64_s"
            } else {
                "i32.trunc_f64_u"
            }
        }
        (F32, I64) => {
            if dst_signed {
                "i64.trunc_f32_s"
            } else {
                "i64.trunc_f32_u"
            }
        }
        (F64, I64) => {
            if dst_signed {
                "i64.trunc_f64_s"
            } else {
                "i64.trunc_f64_u"
            }
        }
        (F32, F64) => "f64.promote_f32",
        (F64, F32) => "f32.demote_f64",
        _ => return None,
    };
    Some(instr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{lexer, parser, preprocessor, typechecker};

    fn emit(source: &str) -> Result<String, EmitError> {
        let lexed = lexer::lex(source);
        assert!(lexed.diagnostics.is_empty(), "{:?}", lexed.diagnostics);
        let parsed = parser::parse(&lexed.tokens);
        assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
        let module = preprocessor::preprocess(&parsed.module);
        let check = typechecker::check(&module);
        assert!(check.diagnostics.is_empty(), "{:?}", check.diagnostics);
        emit_module(&module, &check)
    }

    #[test]
    fn test_emit_add_function() {
        let wat = emit("export fn add(a: i32, b: i32) -> i32 => a + b").unwrap();
        insta::assert_snapshot!(wat, @r###"
        (module
          (func $add (param $a i32) (param $b i32) (result i32)
            local.get $a
            local.get $b
            i32.add
          )
          (export "add" (func $add))
        )
        "###);
    }

    #[test]
    fn test_emit_import_global_memory() {
        let wat = emit(
            "import \"env\" log: (i32) -> ()\nglobal mut count: i32 = 0\nmemory mem(1, 2)\nfn bump()\n  count = count + 1\n  log(count)\nend",
        )
        .unwrap();
        insta::assert_snapshot!(wat, @r###"
        (module
          (import "env" "log" (func $log (param i32)))
          (memory $mem 1 2)
          (global $count (mut i32) (i32.const 0))
          (func $bump
            global.get $count
            i32.const 1
            i32.add
            global.set $count
            global.get $count
            call $log
          )
        )
        "###);
    }

    #[test]
    fn test_emit_control_flow() {
        let wat = emit(
            "export fn clamp(x: i32) -> i32\n  if x < 0 then\n    return 0\n  end\n  return x\nend",
        )
        .unwrap();
        insta::assert_snapshot!(wat, @r###"
        (module
          (func $clamp (param $x i32) (result i32)
            local.get $x
            i32.const 0
            i32.lt_s
            if
              i32.const 0
              return
            end
            local.get $x
            return
          )
          (export "clamp" (func $clamp))
        )
        "###);
    }

    #[test]
    fn test_emit_loop_break_depth() {
        let wat = emit("fn f()\n  loop\n    break\n  end\nend").unwrap();
        // `break` exits past the inner `loop` label to the wrapping block.
        insta::assert_snapshot!(wat, @r###"
        (module
          (func $f
            block
              loop
                br 1
                br 0
              end
            end
          )
        )
        "###);
    }

    #[test]
    fn test_emit_conditional_branch() {
        let wat = emit("fn f(x: i32)\n  loop\n    br 1 when x == 0\n  end\nend").unwrap();
        assert!(wat.contains("br_if 1"));
    }

    #[test]
    fn test_emit_while_loop() {
        let wat = emit(
            "fn count(n: i32) -> i32\n  local total: i32 = 0\n  while total < n do\n    total += 1\n  end\n  return total\nend",
        )
        .unwrap();
        insta::assert_snapshot!(wat, @r###"
        (module
          (func $count (param $n i32) (result i32)
            (local $total i32)
            i32.const 0
            local.set $total
            block
              loop
                local.get $total
                local.get $n
                i32.lt_s
                i32.eqz
                br_if 1
                local.get $total
                i32.const 1
                i32.add
                local.set $total
                br 0
              end
            end
            local.get $total
            return
          )
        )
        "###);
    }

    #[test]
    fn test_emit_for_loop() {
        let wat = emit(
            "fn sum(n: i32) -> i32\n  local total: i32 = 0\n  for i in n do\n    total += i\n  end\n  return total\nend",
        )
        .unwrap();
        assert!(wat.contains("local.set $i__limit"));
        assert!(wat.contains("i32.ge_s"));
        assert!(wat.contains("br_if 1"));
    }

    #[test]
    fn test_emit_builtin_and_cast() {
        let wat = emit("fn f(x: i32) -> f64 => sqrt(x as f64)").unwrap();
        assert!(wat.contains("f64.convert_i32_s"));
        assert!(wat.contains("f64.sqrt"));
    }

    #[test]
    fn test_emit_unsigned_operators() {
        let wat = emit("fn f(a: u32, b: u32) -> i32 => (a / b > b) as i32").unwrap();
        assert!(wat.contains("i32.div_u"));
        assert!(wat.contains("i32.gt_u"));
    }

    #[test]
    fn test_emit_ternary_select() {
        let wat = emit("fn f(a: i32, b: i32) -> i32 => a > b ? a : b").unwrap();
        assert!(wat.contains("select"));
    }

    #[test]
    fn test_emit_multi_value_return() {
        let wat = emit("fn pair(a: i32) -> (i32, i32) => (a, a + 1)").unwrap();
        assert!(wat.contains("(result i32 i32)"));
    }

    #[test]
    fn test_unsupported_string_literal() {
        let err = emit("fn f() -> [u8] => \"hi\"").unwrap_err();
        assert!(matches!(err, EmitError::Unsupported(_)));
    }

    #[test]
    fn test_unsupported_indexing() {
        let err = emit("fn f(s: [i32]) -> i32 => s[0]").unwrap_err();
        assert!(matches!(err, EmitError::Unsupported(_)));
    }
}
