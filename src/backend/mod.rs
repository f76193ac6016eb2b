//! Karst compiler backend: WebAssembly text format emission.
//!
//! The backend consumes the preprocessed, type-checked module together
//! with the checker's recorded expression types and produces the textual
//! assembly form as a string. It does not re-derive semantics from the
//! AST; anything the checker did not resolve is a codegen error, never a
//! panic.

pub mod wat;

pub use wat::{EmitError, emit_module};
