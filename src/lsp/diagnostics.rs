//! Convert Karst compiler diagnostics to LSP diagnostics

use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, Position, Range};

use crate::frontend::diagnostics::CompileError;

/// Convert a byte offset to LSP Position (0-based line and character)
pub fn offset_to_position(source: &str, offset: usize) -> Position {
    let offset = offset.min(source.len());
    let mut line = 0u32;
    let mut col = 0u32;

    for (i, c) in source.char_indices() {
        if i >= offset {
            break;
        }
        if c == '\n' {
            line += 1;
            col = 0;
        } else {
            col += 1;
        }
    }

    Position::new(line, col)
}

/// Convert a byte-offset span to an LSP Range
pub fn span_to_range(source: &str, start: usize, end: usize) -> Range {
    let start_pos = offset_to_position(source, start);
    let end_pos = offset_to_position(source, end.max(start + 1));
    Range::new(start_pos, end_pos)
}

/// Convert a CompileError to an LSP Diagnostic
pub fn compile_error_to_diagnostic(error: &CompileError, source: &str) -> Diagnostic {
    Diagnostic {
        range: span_to_range(source, error.span.start, error.span.end),
        severity: Some(DiagnosticSeverity::ERROR),
        code: None,
        code_description: None,
        source: Some("karst".to_string()),
        message: format!("{}: {}", error.kind, error.message),
        related_information: None,
        tags: None,
        data: None,
    }
}
