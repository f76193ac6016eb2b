//! CLI command implementations
//!
//! All command functions return `CliResult<ExitCode>` instead of calling
//! `process::exit`. Error handling and exits happen in the top-level
//! `run()`. Each command runs the pipeline stages it needs and exits
//! non-zero whenever diagnostics were produced.

use std::fs;
use std::path::Path;

use serde_json::json;

use crate::backend;
use crate::frontend::ast::{Decl, Module};
use crate::frontend::diagnostics::{self, CompileError};
use crate::frontend::typechecker::CheckResult;
use crate::frontend::{lexer, parser, preprocessor, typechecker};

use super::{CliError, CliResult, ExitCode};

/// Maximum source file size (16 MB).
///
/// Larger files are rejected up front rather than fed to the pipeline.
const MAX_SOURCE_SIZE: u64 = 16 * 1024 * 1024;

/// Read source file contents.
pub fn read_source(path: &Path) -> CliResult<String> {
    let metadata = fs::metadata(path)
        .map_err(|e| CliError::failure(format!("cannot access '{}': {}", path.display(), e)))?;

    if metadata.len() > MAX_SOURCE_SIZE {
        return Err(CliError::failure(format!(
            "source file '{}' is too large ({} bytes, max {} bytes)",
            path.display(),
            metadata.len(),
            MAX_SOURCE_SIZE
        )));
    }

    fs::read_to_string(path)
        .map_err(|e| CliError::failure(format!("error reading '{}': {}", path.display(), e)))
}

/// One full analysis run: lex, parse, preprocess, check.
pub struct Analysis {
    pub module: Module,
    pub check: CheckResult,
    /// All diagnostics, in stage order (lexical, syntactic, semantic)
    pub diagnostics: Vec<CompileError>,
}

/// Run the whole pipeline over one source string.
pub fn analyze(source: &str) -> Analysis {
    let lexed = lexer::lex(source);
    let parsed = parser::parse(&lexed.tokens);
    let module = preprocessor::preprocess(&parsed.module);
    let check = typechecker::check(&module);

    let mut diagnostics = lexed.diagnostics;
    diagnostics.extend(parsed.diagnostics);
    diagnostics.extend(check.diagnostics.iter().cloned());

    Analysis {
        module,
        check,
        diagnostics,
    }
}

/// Print diagnostics with source context; returns how many there were.
fn report(path: &Path, source: &str, diagnostics: &[CompileError]) -> usize {
    let file_name = path.display().to_string();
    for diagnostic in diagnostics {
        diagnostics::print_error(&file_name, source, diagnostic);
    }
    diagnostics.len()
}

fn write_output(output: Option<&Path>, contents: &str) -> CliResult<()> {
    match output {
        Some(path) => fs::write(path, contents)
            .map_err(|e| CliError::failure(format!("error writing '{}': {}", path.display(), e))),
        None => {
            println!("{}", contents);
            Ok(())
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

pub fn check_file(path: &Path) -> CliResult<ExitCode> {
    let source = read_source(path)?;
    let analysis = analyze(&source);

    let count = report(path, &source, &analysis.diagnostics);
    if count > 0 {
        eprintln!("{}: {} error(s)", path.display(), count);
        return Ok(ExitCode::FAILURE);
    }

    println!("{}: ok", path.display());
    Ok(ExitCode::SUCCESS)
}

pub fn parse_file(path: &Path, output: Option<&Path>) -> CliResult<ExitCode> {
    let source = read_source(path)?;
    let lexed = lexer::lex(&source);
    let parsed = parser::parse(&lexed.tokens);

    let decls: Vec<serde_json::Value> = parsed
        .module
        .decls
        .iter()
        .map(|decl| {
            json!({
                "kind": decl_kind(&decl.node),
                "name": decl_name(&decl.node),
                "span": { "start": decl.span.start, "end": decl.span.end },
            })
        })
        .collect();

    let mut diagnostics = lexed.diagnostics;
    diagnostics.extend(parsed.diagnostics);

    let doc = json!({
        "declarations": decls,
        "diagnostics": diagnostics
            .iter()
            .map(|d| json!({
                "kind": d.kind.to_string(),
                "message": d.message,
                "span": { "start": d.span.start, "end": d.span.end },
            }))
            .collect::<Vec<_>>(),
    });

    write_output(output, &format!("{:#}", doc))?;

    let count = report(path, &source, &diagnostics);
    if count > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

pub fn meta_file(path: &Path, output: Option<&Path>) -> CliResult<ExitCode> {
    let source = read_source(path)?;
    let analysis = analyze(&source);

    let symbols: Vec<serde_json::Value> = analysis
        .check
        .symbols
        .symbols_in(analysis.check.global)
        .into_iter()
        .filter(|s| s.kind != crate::frontend::symbols::SymbolKind::Builtin)
        .map(|s| {
            json!({
                "name": s.name,
                "kind": s.kind.as_str(),
                "type": s.ty.as_ref().map(|t| t.to_string()),
                "mutable": s.mutable,
                "span": { "start": s.span.start, "end": s.span.end },
            })
        })
        .collect();

    let doc = json!({ "symbols": symbols });
    write_output(output, &format!("{:#}", doc))?;

    let count = report(path, &source, &analysis.diagnostics);
    if count > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

pub fn compile_file(path: &Path, output: Option<&Path>) -> CliResult<ExitCode> {
    let source = read_source(path)?;
    let analysis = analyze(&source);

    let count = report(path, &source, &analysis.diagnostics);
    if count > 0 {
        eprintln!("{}: {} error(s)", path.display(), count);
        return Ok(ExitCode::FAILURE);
    }

    let wat = backend::emit_module(&analysis.module, &analysis.check)
        .map_err(|e| CliError::failure(format!("code generation error: {}", e)))?;
    write_output(output, &wat)?;
    Ok(ExitCode::SUCCESS)
}

fn decl_kind(decl: &Decl) -> &'static str {
    match decl {
        Decl::Import(_) => "import",
        Decl::Export(inner) => decl_kind(&inner.node),
        Decl::Global(_) => "global",
        Decl::Memory(_) => "memory",
        Decl::Function(_) => "function",
        Decl::Def(_) => "def",
    }
}

fn decl_name(decl: &Decl) -> Option<String> {
    match decl {
        Decl::Import(import) => import.items.first().map(|i| i.node.name.clone()),
        Decl::Export(inner) => decl_name(&inner.node),
        Decl::Global(g) => Some(g.name.clone()),
        Decl::Memory(m) => Some(m.name.clone()),
        Decl::Function(f) => f.name.clone(),
        Decl::Def(d) => Some(d.name.clone()),
    }
}
