//! CLI module for the Karst compiler
//!
//! ## Commands
//!
//! - `check <file>` - Run the full pipeline and report diagnostics
//!   (also the default action when a bare file is given)
//! - `parse <file>` - Parse only and print a JSON declaration summary
//! - `meta <file>` - Export declared symbols and types as JSON
//! - `compile <file>` - Emit WebAssembly text format
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros. Command
//! functions return `CliResult<ExitCode>` instead of calling
//! `process::exit`; only the top-level `run()` handles errors and exits.
//! Every command exits non-zero when diagnostics were produced.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;

use std::fmt;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use crate::version::KARST_VERSION;

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create a failure error (exit code 1).
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

// ============================================================================
// Clap CLI definition
// ============================================================================

/// The Karst programming language compiler
#[derive(Parser, Debug)]
#[command(name = "karst")]
#[command(version = KARST_VERSION)]
#[command(about = "The Karst programming language compiler", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// File to check (default action when no subcommand given)
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the full pipeline and report diagnostics
    Check {
        /// Source file to check
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Parse only and print a JSON declaration summary
    Parse {
        /// Source file to parse
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Output file (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Export declared symbols and types as JSON
    Meta {
        /// Source file to analyze
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Output file (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Compile to WebAssembly text format
    Compile {
        /// Source file to compile
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Output file (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

/// CLI entry point: parse arguments, dispatch, and exit.
pub fn run() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Command::Check { file }) => commands::check_file(&file),
        Some(Command::Parse { file, output }) => commands::parse_file(&file, output.as_deref()),
        Some(Command::Meta { file, output }) => commands::meta_file(&file, output.as_deref()),
        Some(Command::Compile { file, output }) => commands::compile_file(&file, output.as_deref()),
        None => match cli.file {
            Some(file) => commands::check_file(&file),
            None => {
                eprintln!("Usage: karst [check|parse|meta|compile] <FILE>");
                eprintln!("Run 'karst --help' for details.");
                process::exit(ExitCode::FAILURE.0);
            }
        },
    };

    match result {
        Ok(code) => process::exit(code.0),
        Err(err) => {
            eprintln!("{}", err.message);
            process::exit(err.exit_code.0);
        }
    }
}
