#![forbid(unsafe_code)]
//! Karst Programming Language Compiler
//!
//! Karst is a small statically-typed language that compiles to the
//! WebAssembly text format. This crate provides the compiler: the frontend
//! (lexer, parser, constant-inlining preprocessor, type checker), the
//! backend (WAT emission), a CLI, and a language server.
//!
//! ## Pipeline
//!
//! Each analysis is a single synchronous pass over one in-memory source
//! string: lex, parse, preprocess, check. Every stage accumulates
//! diagnostics and produces a best-effort result rather than aborting, so
//! one run over a file surfaces as many independent problems as possible.
//! Distinct analysis runs share nothing and may execute concurrently.
//!
//! ## Panic Policy
//!
//! - **Production code**: use `Result`/`Option` with explicit handling;
//!   the pipeline never panics on malformed but finite input. The one
//!   unhandled failure mode is call-stack exhaustion on pathologically
//!   deep nesting, which is a documented limitation of the recursive
//!   design.
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.
//! - **True invariants**: a panic that represents a compiler bug uses
//!   `.expect("reason")` with a clear explanation.

pub mod backend;
pub mod cli;
pub mod frontend;
pub mod lsp;
pub mod version;

pub use frontend::ast;
pub use frontend::diagnostics;
pub use frontend::lexer;
pub use frontend::parser;
pub use frontend::preprocessor;
pub use frontend::symbols;
pub use frontend::typechecker;
