//! Diagnostics and error reporting for Karst
//!
//! Every pipeline stage accumulates [`CompileError`] values instead of
//! aborting on the first problem, so one run over a file surfaces as many
//! independent issues as possible. Spans are byte offsets; conversion to
//! line/column happens only here (terminal printing) and in the LSP layer.

use crate::frontend::ast::Span;

/// A compile-time error with location information
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub message: String,
    pub span: Span,
    pub kind: ErrorKind,
}

impl CompileError {
    pub fn lex(message: String, span: Span) -> Self {
        Self {
            message,
            span,
            kind: ErrorKind::Lex,
        }
    }

    pub fn syntax(message: String, span: Span) -> Self {
        Self {
            message,
            span,
            kind: ErrorKind::Syntax,
        }
    }

    pub fn type_error(message: String, span: Span) -> Self {
        Self {
            message,
            span,
            kind: ErrorKind::Type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lex,
    Syntax,
    Type,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Lex => write!(f, "lex error"),
            ErrorKind::Syntax => write!(f, "syntax error"),
            ErrorKind::Type => write!(f, "type error"),
        }
    }
}

/// Render an error with source context into a string
pub fn format_error(file_name: &str, source: &str, error: &CompileError) -> String {
    let (line_num, col_num, line_text) = get_line_info(source, error.span.start);

    let mut out = String::new();
    out.push_str(&format!("{}: {}\n", error.kind, error.message));
    out.push_str(&format!("  --> {}:{}:{}\n", file_name, line_num, col_num));

    let width = line_num.to_string().len();
    out.push_str(&format!("  {:>width$} |\n", "", width = width));
    out.push_str(&format!("  {:>width$} | {}\n", line_num, line_text, width = width));

    let underline_len = if error.span.end > error.span.start {
        (error.span.end - error.span.start)
            .min(line_text.len().saturating_sub(col_num - 1))
            .max(1)
    } else {
        1
    };
    out.push_str(&format!(
        "  {:>width$} | {}{}\n",
        "",
        " ".repeat(col_num - 1),
        "^".repeat(underline_len),
        width = width
    ));

    out
}

/// Print an error with source context to stderr
pub fn print_error(file_name: &str, source: &str, error: &CompileError) {
    eprint!("{}", format_error(file_name, source, error));
    eprintln!();
}

/// Get line number, column number, and line text for a byte offset
fn get_line_info(source: &str, offset: usize) -> (usize, usize, &str) {
    let offset = offset.min(source.len());
    let mut line_num = 1;
    let mut line_start = 0;

    for (i, c) in source.char_indices() {
        if i >= offset {
            break;
        }
        if c == '\n' {
            line_num += 1;
            line_start = i + 1;
        }
    }

    let line_end = source[line_start..]
        .find('\n')
        .map(|i| line_start + i)
        .unwrap_or(source.len());

    (line_num, offset - line_start + 1, &source[line_start..line_end])
}

// ============================================================================
// Error catalog: the recurring diagnostics, so messages stay uniform
// ============================================================================

pub mod errors {
    use super::*;
    use crate::frontend::ast::Type;

    // Lexical

    pub fn unterminated_string(span: Span) -> CompileError {
        CompileError::lex("unterminated string literal".to_string(), span)
    }

    pub fn invalid_escape(escape: &str, span: Span) -> CompileError {
        CompileError::lex(format!("invalid escape sequence '\\{}'", escape), span)
    }

    pub fn invalid_number(text: &str, span: Span) -> CompileError {
        CompileError::lex(format!("invalid numeric literal '{}'", text), span)
    }

    pub fn unexpected_char(c: char, span: Span) -> CompileError {
        CompileError::lex(format!("unexpected character '{}'", c), span)
    }

    // Syntactic

    pub fn expected_token(expected: &str, found: &str, span: Span) -> CompileError {
        CompileError::syntax(format!("expected {}, found {}", expected, found), span)
    }

    pub fn unexpected_token(found: &str, span: Span) -> CompileError {
        CompileError::syntax(format!("unexpected token: {}", found), span)
    }

    pub fn expected_expression(found: &str, span: Span) -> CompileError {
        CompileError::syntax(format!("expected expression, found {}", found), span)
    }

    // Semantic

    pub fn unknown_symbol(name: &str, span: Span) -> CompileError {
        CompileError::type_error(format!("unknown symbol '{}'", name), span)
    }

    pub fn unknown_type(name: &str, span: Span) -> CompileError {
        CompileError::type_error(format!("unknown type '{}'", name), span)
    }

    pub fn duplicate_definition(name: &str, span: Span) -> CompileError {
        CompileError::type_error(format!("duplicate definition of '{}'", name), span)
    }

    pub fn type_mismatch(expected: &Type, found: &Type, span: Span) -> CompileError {
        CompileError::type_error(
            format!("type mismatch: expected '{}', found '{}'", expected, found),
            span,
        )
    }

    pub fn not_callable(found: &Type, span: Span) -> CompileError {
        CompileError::type_error(format!("type '{}' is not callable", found), span)
    }

    pub fn arity_mismatch(expected: usize, found: usize, span: Span) -> CompileError {
        CompileError::type_error(
            format!("expected {} argument(s), found {}", expected, found),
            span,
        )
    }

    pub fn not_indexable(found: &Type, span: Span) -> CompileError {
        CompileError::type_error(format!("type '{}' is not indexable", found), span)
    }

    pub fn non_integer_index(found: &Type, span: Span) -> CompileError {
        CompileError::type_error(format!("index must be an integer, found '{}'", found), span)
    }

    pub fn no_such_property(ty: &Type, member: &str, span: Span) -> CompileError {
        CompileError::type_error(format!("type '{}' has no property '{}'", ty, member), span)
    }

    pub fn tuple_field_out_of_bounds(len: usize, field: u32, span: Span) -> CompileError {
        CompileError::type_error(
            format!("tuple field {} out of bounds for {}-element tuple", field, len),
            span,
        )
    }

    pub fn not_mutable(name: &str, span: Span) -> CompileError {
        CompileError::type_error(format!("cannot assign to immutable binding '{}'", name), span)
    }

    pub fn cannot_infer(name: &str, span: Span) -> CompileError {
        CompileError::type_error(
            format!("cannot infer a type for '{}' without an initializer", name),
            span,
        )
    }

    pub fn destructure_arity(expected: usize, found: usize, span: Span) -> CompileError {
        CompileError::type_error(
            format!(
                "destructuring assignment expects {} value(s), found {}",
                expected, found
            ),
            span,
        )
    }

    pub fn branch_mismatch(then_ty: &Type, else_ty: &Type, span: Span) -> CompileError {
        CompileError::type_error(
            format!(
                "ternary branches have incompatible types '{}' and '{}'",
                then_ty, else_ty
            ),
            span,
        )
    }

    pub fn unknown_suffix(suffix: &str, span: Span) -> CompileError {
        CompileError::type_error(format!("unknown numeric type suffix ':{}'", suffix), span)
    }

    pub fn not_a_tuple(found: &Type, span: Span) -> CompileError {
        CompileError::type_error(
            format!("multi-target assignment needs a tuple value, found '{}'", found),
            span,
        )
    }
}
