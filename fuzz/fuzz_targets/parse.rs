#![no_main]

use karst::frontend::{lexer, parser, preprocessor, typechecker};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Convert bytes to UTF-8 string (ignore invalid UTF-8)
    if let Ok(s) = std::str::from_utf8(data) {
        // The pipeline must be total: no stage may panic on any input.
        let lexed = lexer::lex(s);
        let parsed = parser::parse(&lexed.tokens);
        let module = preprocessor::preprocess(&parsed.module);
        let _ = typechecker::check(&module);
    }
});
