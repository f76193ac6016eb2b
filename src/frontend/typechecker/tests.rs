//! Typechecker unit tests.

use super::*;
use crate::frontend::symbols::SymbolKind;
use crate::frontend::{lexer, parser, preprocessor};

fn check_src(source: &str) -> CheckResult {
    let lexed = lexer::lex(source);
    assert!(lexed.diagnostics.is_empty(), "lex errors: {:?}", lexed.diagnostics);
    let parsed = parser::parse(&lexed.tokens);
    assert!(
        parsed.diagnostics.is_empty(),
        "parse errors: {:?}",
        parsed.diagnostics
    );
    let module = preprocessor::preprocess(&parsed.module);
    check(&module)
}

fn messages(result: &CheckResult) -> Vec<&str> {
    result.diagnostics.iter().map(|e| e.message.as_str()).collect()
}

/// The body scope of the first function in the module
fn first_fn_scope(source: &str, result: &CheckResult) -> crate::frontend::symbols::ScopeId {
    let lexed = lexer::lex(source);
    let parsed = parser::parse(&lexed.tokens);
    for decl in &parsed.module.decls {
        let inner = match &decl.node {
            Decl::Export(inner) => inner.as_ref(),
            _ => decl,
        };
        if matches!(inner.node, Decl::Function(_)) {
            return result.fn_scope(inner.span).expect("function scope recorded");
        }
    }
    panic!("no function in module");
}

// ========================================
// Literal typing
// ========================================

#[test]
fn test_literal_defaults() {
    let source = "fn f()\n  local a = 1\n  local b = 1.5\n  local c = 2e3\n  local d = 7:u32\n  local e = 0xFF\nend";
    let result = check_src(source);
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);

    let scope = first_fn_scope(source, &result);
    let ty = |name: &str| {
        result
            .symbols
            .lookup(scope, name)
            .and_then(|s| s.ty.clone())
            .unwrap()
    };
    assert_eq!(ty("a"), Type::Primitive(Primitive::I32));
    assert_eq!(ty("b"), Type::Primitive(Primitive::F64));
    assert_eq!(ty("c"), Type::Primitive(Primitive::F64));
    assert_eq!(ty("d"), Type::Primitive(Primitive::U32));
    assert_eq!(ty("e"), Type::Primitive(Primitive::I32));
}

#[test]
fn test_string_literal_is_byte_slice() {
    let source = "fn f()\n  local s = \"hi\"\nend";
    let result = check_src(source);
    let scope = first_fn_scope(source, &result);
    assert_eq!(
        result.symbols.lookup(scope, "s").and_then(|s| s.ty.clone()),
        Some(Type::Slice(Box::new(Type::Primitive(Primitive::U8))))
    );
}

// ========================================
// Resolution and duplicates
// ========================================

#[test]
fn test_unknown_symbol() {
    let result = check_src("fn f() -> i32 => nope");
    assert_eq!(result.diagnostics.len(), 1);
    assert!(messages(&result)[0].contains("unknown symbol 'nope'"));
}

#[test]
fn test_forward_reference_between_functions() {
    let result = check_src("fn a() -> i32 => b()\nfn b() -> i32 => a()");
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
}

#[test]
fn test_duplicate_function_yields_one_diagnostic() {
    let result = check_src("fn f() -> i32 => 1\nfn f(a: f64) -> f64 => a");
    let dups: Vec<_> = result
        .diagnostics
        .iter()
        .filter(|e| e.message.contains("duplicate definition of 'f'"))
        .collect();
    assert_eq!(dups.len(), 1);

    // The first declaration's symbol is unaffected.
    let symbol = result.symbols.lookup(result.global, "f").unwrap();
    assert_eq!(
        symbol.ty,
        Some(Type::Function(
            Vec::new(),
            Some(Box::new(Type::Primitive(Primitive::I32)))
        ))
    );
}

#[test]
fn test_duplicate_local() {
    let result = check_src("fn f()\n  local x = 1\n  local x = 2.0\nend");
    assert_eq!(result.diagnostics.len(), 1);
    assert!(messages(&result)[0].contains("duplicate definition of 'x'"));
}

#[test]
fn test_unknown_type_in_signature() {
    let result = check_src("fn f(a: Widget)\nend");
    assert_eq!(result.diagnostics.len(), 1);
    assert!(messages(&result)[0].contains("unknown type 'Widget'"));
}

#[test]
fn test_builtins_preregistered() {
    let result = check_src("fn f(x: f64) -> f64 => sqrt(x) + min(x, copysign(x, x))");
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
}

// ========================================
// Calls
// ========================================

#[test]
fn test_call_arity_mismatch() {
    let result = check_src("fn f(x: f64) -> f64 => sqrt(x, x)");
    assert_eq!(result.diagnostics.len(), 1);
    assert!(messages(&result)[0].contains("expected 1 argument(s), found 2"));
}

#[test]
fn test_call_argument_mismatch_per_argument() {
    let result =
        check_src("fn g(a: i32, b: i32) -> i32 => a + b\nfn f(s: [u8]) -> i32 => g(s, s)");
    assert_eq!(result.diagnostics.len(), 2);
    for msg in messages(&result) {
        assert!(msg.contains("expected 'i32', found '[u8]'"), "{}", msg);
    }
}

#[test]
fn test_numeric_arguments_are_permissive() {
    // Any two numeric primitives are compatible at a call site.
    let result = check_src("fn f(x: u32) -> f64 => sqrt(x)");
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
}

#[test]
fn test_not_callable() {
    let result = check_src("fn f(x: i32) -> i32 => x(1)");
    assert_eq!(result.diagnostics.len(), 1);
    assert!(messages(&result)[0].contains("not callable"));
}

// ========================================
// Index and member access
// ========================================

#[test]
fn test_index_slice_and_array() {
    let result = check_src("fn f(s: [f64], a: [i32*8]) -> f64 => s[0] + a[1] as f64");
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
}

#[test]
fn test_index_non_indexable() {
    let result = check_src("fn f(x: i32) -> i32 => x[0]");
    assert_eq!(result.diagnostics.len(), 1);
    assert!(messages(&result)[0].contains("not indexable"));
}

#[test]
fn test_non_integer_index_is_non_fatal() {
    let source = "fn f(s: [i32])\n  local x = s[1.5]\nend";
    let result = check_src(source);
    assert_eq!(result.diagnostics.len(), 1);
    assert!(messages(&result)[0].contains("index must be an integer"));

    // Checking continued: the element type still came through.
    let scope = first_fn_scope(source, &result);
    assert_eq!(
        result.symbols.lookup(scope, "x").and_then(|s| s.ty.clone()),
        Some(Type::Primitive(Primitive::I32))
    );
}

#[test]
fn test_slice_members() {
    let source = "fn f(s: [u8])\n  local p = s.ptr\n  local n = s.len\nend";
    let result = check_src(source);
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    let scope = first_fn_scope(source, &result);
    assert_eq!(
        result.symbols.lookup(scope, "p").and_then(|s| s.ty.clone()),
        Some(Type::Pointer(Box::new(Type::Primitive(Primitive::U8))))
    );
    assert_eq!(
        result.symbols.lookup(scope, "n").and_then(|s| s.ty.clone()),
        Some(Type::Primitive(Primitive::U32))
    );
}

#[test]
fn test_pointer_deref() {
    let source = "fn f(p: *f32)\n  local v = p.*\nend";
    let result = check_src(source);
    assert!(result.diagnostics.is_empty());
    let scope = first_fn_scope(source, &result);
    assert_eq!(
        result.symbols.lookup(scope, "v").and_then(|s| s.ty.clone()),
        Some(Type::Primitive(Primitive::F32))
    );
}

#[test]
fn test_tuple_field_access_is_one_based() {
    let source = "fn f(t: (i32, f64))\n  local a = t.1\n  local b = t.2\nend";
    let result = check_src(source);
    assert!(result.diagnostics.is_empty());
    let scope = first_fn_scope(source, &result);
    assert_eq!(
        result.symbols.lookup(scope, "a").and_then(|s| s.ty.clone()),
        Some(Type::Primitive(Primitive::I32))
    );
    assert_eq!(
        result.symbols.lookup(scope, "b").and_then(|s| s.ty.clone()),
        Some(Type::Primitive(Primitive::F64))
    );
}

#[test]
fn test_tuple_field_out_of_bounds() {
    let result = check_src("fn f(t: (i32, f64)) -> i32 => t.3");
    assert_eq!(result.diagnostics.len(), 1);
    assert!(messages(&result)[0].contains("out of bounds"));

    let result = check_src("fn f(t: (i32, f64)) -> i32 => t.0");
    assert_eq!(result.diagnostics.len(), 1);
}

#[test]
fn test_no_such_property() {
    let result = check_src("fn f(x: i32) -> i32 => x.len");
    assert_eq!(result.diagnostics.len(), 1);
    assert!(messages(&result)[0].contains("has no property 'len'"));
}

// ========================================
// Casts, binary typing, ternary
// ========================================

#[test]
fn test_cast_is_unchecked() {
    // The asserted type is trusted with no compatibility validation.
    let result = check_src("fn f(s: [u8])\n  local x: i32 = s as i32\nend");
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
}

#[test]
fn test_binary_takes_left_operand_type() {
    let source = "fn f(a: i32, b: f64)\n  local x = a + b\n  local y = b + a\nend";
    let result = check_src(source);
    assert!(result.diagnostics.is_empty());
    let scope = first_fn_scope(source, &result);
    assert_eq!(
        result.symbols.lookup(scope, "x").and_then(|s| s.ty.clone()),
        Some(Type::Primitive(Primitive::I32))
    );
    assert_eq!(
        result.symbols.lookup(scope, "y").and_then(|s| s.ty.clone()),
        Some(Type::Primitive(Primitive::F64))
    );
}

#[test]
fn test_comparison_yields_i32() {
    let source = "fn f(a: f64, b: f64)\n  local c = a < b\n  local d = a == b or a != b\nend";
    let result = check_src(source);
    assert!(result.diagnostics.is_empty());
    let scope = first_fn_scope(source, &result);
    assert_eq!(
        result.symbols.lookup(scope, "c").and_then(|s| s.ty.clone()),
        Some(Type::Primitive(Primitive::I32))
    );
    assert_eq!(
        result.symbols.lookup(scope, "d").and_then(|s| s.ty.clone()),
        Some(Type::Primitive(Primitive::I32))
    );
}

#[test]
fn test_ternary_branch_mismatch() {
    let result = check_src("fn f(a: i32, s: [u8]) -> i32 => a > 0 ? a : s");
    assert_eq!(result.diagnostics.len(), 1);
    assert!(messages(&result)[0].contains("incompatible types"));
}

// ========================================
// Assignment
// ========================================

#[test]
fn test_assignment_mismatch_reported_once_and_type_kept() {
    let source = "fn f()\n  local x: u32 = 5\n  x = \"a\"\nend";
    let result = check_src(source);
    assert_eq!(result.diagnostics.len(), 1);
    assert!(messages(&result)[0].contains("expected 'u32', found '[u8]'"));

    let scope = first_fn_scope(source, &result);
    let symbol = result.symbols.lookup(scope, "x").unwrap();
    assert_eq!(symbol.ty, Some(Type::Primitive(Primitive::U32)));
}

#[test]
fn test_assign_to_immutable_global() {
    let result = check_src("global limit: i32 = 10\nfn f()\n  limit = 20\nend");
    assert_eq!(result.diagnostics.len(), 1);
    assert!(messages(&result)[0].contains("immutable binding 'limit'"));
}

#[test]
fn test_assign_to_mutable_global() {
    let result = check_src("global mut count: i32 = 0\nfn f()\n  count = count + 1\nend");
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
}

#[test]
fn test_destructuring_assignment() {
    let result = check_src(
        "fn pair() -> (i32, i32) => (1, 2)\nfn f()\n  local a: i32\n  local b: i32\n  a, b = pair()\nend",
    );
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
}

#[test]
fn test_destructuring_arity_mismatch() {
    let result = check_src(
        "fn triple() -> (i32, i32, i32) => (1, 2, 3)\nfn f()\n  local a: i32\n  local b: i32\n  a, b = triple()\nend",
    );
    assert_eq!(result.diagnostics.len(), 1);
    assert!(messages(&result)[0].contains("expects 2 value(s), found 3"));
}

#[test]
fn test_destructuring_element_types() {
    let result = check_src(
        "fn pair() -> ([u8], i32) => (\"x\", 2)\nfn f()\n  local a: i32\n  local b: i32\n  a, b = pair()\nend",
    );
    // First element [u8] vs i32 target mismatch; second is fine.
    assert_eq!(result.diagnostics.len(), 1);
    assert!(messages(&result)[0].contains("found '[u8]'"));
}

#[test]
fn test_multi_target_against_non_tuple() {
    let result = check_src("fn f()\n  local a: i32\n  local b: i32\n  a, b = 5\nend");
    assert_eq!(result.diagnostics.len(), 1);
    assert!(messages(&result)[0].contains("needs a tuple value"));
}

#[test]
fn test_cannot_infer_without_initializer_or_annotation() {
    let result = check_src("fn f()\n  local x\nend");
    assert_eq!(result.diagnostics.len(), 1);
    assert!(messages(&result)[0].contains("cannot infer a type for 'x'"));
}

// ========================================
// For loops
// ========================================

#[test]
fn test_for_over_integer_infers_i32() {
    // The iterable `10` defaults to i32 and propagates to the variable;
    // passing it where a byte slice is required pins the inferred type.
    let result = check_src("fn g(s: [u8])\nend\nfn f()\n  for i in 10 do\n    g(i)\n  end\nend");
    assert_eq!(result.diagnostics.len(), 1);
    assert!(messages(&result)[0].contains("expected '[u8]', found 'i32'"));
}

#[test]
fn test_for_over_slice_infers_element_type() {
    let result =
        check_src("fn g(s: [u8])\nend\nfn f(bytes: [[u8]])\n  for v in bytes do\n    g(v)\n  end\nend");
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
}

#[test]
fn test_for_variable_scoped_to_body() {
    let result = check_src("fn f()\n  for i in 10 do\n    break\n  end\n  local x = i\nend");
    assert_eq!(result.diagnostics.len(), 1);
    assert!(messages(&result)[0].contains("unknown symbol 'i'"));
}

#[test]
fn test_for_explicit_annotation_wins() {
    let result =
        check_src("fn g(x: u64) -> u64 => x\nfn f()\n  for i: u64 in 10 do\n    g(i)\n  end\nend");
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
}

// ========================================
// Results and scopes
// ========================================

#[test]
fn test_named_results_are_bindings() {
    let result = check_src("fn divmod(a: i32, b: i32) -> (q: i32, r: i32)\n  q = a / b\n  r = a % b\nend");
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
}

#[test]
fn test_fn_scope_recorded_per_function() {
    let source = "fn a()\nend\nfn b()\nend";
    let result = check_src(source);
    assert_eq!(result.fn_scopes.len(), 2);
}

#[test]
fn test_import_and_global_symbols() {
    let result = check_src("import \"env\" log: (i32) -> ()\nglobal mut g: f32 = 0.0\nfn f()\n  log(1)\nend");
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);

    let log = result.symbols.lookup(result.global, "log").unwrap();
    assert_eq!(log.kind, SymbolKind::Import);
    let g = result.symbols.lookup(result.global, "g").unwrap();
    assert_eq!(g.kind, SymbolKind::Global);
    assert!(g.mutable);
}

#[test]
fn test_global_initializer_mismatch() {
    let result = check_src("global s: [u8] = 5");
    assert_eq!(result.diagnostics.len(), 1);
    assert!(messages(&result)[0].contains("expected '[u8]', found 'i32'"));
}

#[test]
fn test_expr_types_recorded() {
    let source = "fn f(a: i32) -> i32 => a";
    let result = check_src(source);
    // The body's `a` is the last occurrence in the source.
    let offset = source.rfind('a').unwrap();
    assert_eq!(
        result.expr_type(Span::new(offset, offset + 1)),
        Some(&Type::Primitive(Primitive::I32))
    );
}
