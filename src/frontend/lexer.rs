//! Lexer for the Karst programming language
//!
//! Converts source text into a stream of tokens. The lexer is total: it
//! never fails on malformed input, it accumulates diagnostics and keeps
//! scanning, and the token stream always ends with an `Eof` token.
//!
//! Handled here:
//! - Keywords and identifiers (`[A-Za-z_][A-Za-z0-9_-]*`)
//! - Numeric literals: decimal (with fraction/exponent), `0x` hex, `0b`
//!   binary, plus an optional `:type` suffix glued onto the token
//! - String literals with escape sequences (`\n \t \r \\ \" \' \0 \xHH`)
//! - Operators, longest-match first
//! - Line comments (`--` to end of line) and whitespace, skipped

use crate::frontend::ast::Span;
use crate::frontend::diagnostics::{CompileError, errors};

/// Kind of a token produced by the lexer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Special
    Eof,

    // Identifiers and literals
    Ident,
    Number,
    Str,

    // Keywords
    Import,
    Export,
    Global,
    Mut,
    Memory,
    Fn,
    Def,
    Local,
    If,
    Then,
    Elif,
    Else,
    End,
    While,
    Do,
    For,
    In,
    Loop,
    Break,
    Br,
    When,
    Return,
    And,
    Or,
    Not,
    As,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    Question,
    Arrow,    // ->
    FatArrow, // =>

    // Operators
    Eq, // =
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Shl,
    Shr,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AmpEq,
    PipeEq,
    CaretEq,
    ShlEq,
    ShrEq,
}

impl TokenKind {
    /// Human-readable description for diagnostics
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Eof => "end of input",
            TokenKind::Ident => "identifier",
            TokenKind::Number => "number",
            TokenKind::Str => "string",
            TokenKind::Import => "'import'",
            TokenKind::Export => "'export'",
            TokenKind::Global => "'global'",
            TokenKind::Mut => "'mut'",
            TokenKind::Memory => "'memory'",
            TokenKind::Fn => "'fn'",
            TokenKind::Def => "'def'",
            TokenKind::Local => "'local'",
            TokenKind::If => "'if'",
            TokenKind::Then => "'then'",
            TokenKind::Elif => "'elif'",
            TokenKind::Else => "'else'",
            TokenKind::End => "'end'",
            TokenKind::While => "'while'",
            TokenKind::Do => "'do'",
            TokenKind::For => "'for'",
            TokenKind::In => "'in'",
            TokenKind::Loop => "'loop'",
            TokenKind::Break => "'break'",
            TokenKind::Br => "'br'",
            TokenKind::When => "'when'",
            TokenKind::Return => "'return'",
            TokenKind::And => "'and'",
            TokenKind::Or => "'or'",
            TokenKind::Not => "'not'",
            TokenKind::As => "'as'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Comma => "','",
            TokenKind::Colon => "':'",
            TokenKind::Dot => "'.'",
            TokenKind::Question => "'?'",
            TokenKind::Arrow => "'->'",
            TokenKind::FatArrow => "'=>'",
            TokenKind::Eq => "'='",
            TokenKind::EqEq => "'=='",
            TokenKind::NotEq => "'!='",
            TokenKind::Lt => "'<'",
            TokenKind::Le => "'<='",
            TokenKind::Gt => "'>'",
            TokenKind::Ge => "'>='",
            TokenKind::Shl => "'<<'",
            TokenKind::Shr => "'>>'",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::Slash => "'/'",
            TokenKind::Percent => "'%'",
            TokenKind::Amp => "'&'",
            TokenKind::Pipe => "'|'",
            TokenKind::Caret => "'^'",
            TokenKind::Tilde => "'~'",
            TokenKind::PlusEq => "'+='",
            TokenKind::MinusEq => "'-='",
            TokenKind::StarEq => "'*='",
            TokenKind::SlashEq => "'/='",
            TokenKind::PercentEq => "'%='",
            TokenKind::AmpEq => "'&='",
            TokenKind::PipeEq => "'|='",
            TokenKind::CaretEq => "'^='",
            TokenKind::ShlEq => "'<<='",
            TokenKind::ShrEq => "'>>='",
        }
    }
}

/// A single token: kind, literal source text, and span.
///
/// `text` is always the exact source slice covered by `span`, so the token
/// stream (plus skipped whitespace and comments) reconstructs the input.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            text: text.into(),
            span,
        }
    }
}

/// Result of lexing: the full token stream plus accumulated diagnostics
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<Token>,
    pub diagnostics: Vec<CompileError>,
}

/// Multi-character operators, longest first so longest-match wins
const MULTI_OPERATORS: &[(&str, TokenKind)] = &[
    ("<<=", TokenKind::ShlEq),
    (">>=", TokenKind::ShrEq),
    ("->", TokenKind::Arrow),
    ("=>", TokenKind::FatArrow),
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::NotEq),
    ("<=", TokenKind::Le),
    (">=", TokenKind::Ge),
    ("<<", TokenKind::Shl),
    (">>", TokenKind::Shr),
    ("+=", TokenKind::PlusEq),
    ("-=", TokenKind::MinusEq),
    ("*=", TokenKind::StarEq),
    ("/=", TokenKind::SlashEq),
    ("%=", TokenKind::PercentEq),
    ("&=", TokenKind::AmpEq),
    ("|=", TokenKind::PipeEq),
    ("^=", TokenKind::CaretEq),
];

const SINGLE_OPERATORS: &[(char, TokenKind)] = &[
    ('(', TokenKind::LParen),
    (')', TokenKind::RParen),
    ('[', TokenKind::LBracket),
    (']', TokenKind::RBracket),
    (',', TokenKind::Comma),
    (':', TokenKind::Colon),
    ('.', TokenKind::Dot),
    ('?', TokenKind::Question),
    ('=', TokenKind::Eq),
    ('<', TokenKind::Lt),
    ('>', TokenKind::Gt),
    ('+', TokenKind::Plus),
    ('-', TokenKind::Minus),
    ('*', TokenKind::Star),
    ('/', TokenKind::Slash),
    ('%', TokenKind::Percent),
    ('&', TokenKind::Amp),
    ('|', TokenKind::Pipe),
    ('^', TokenKind::Caret),
    ('~', TokenKind::Tilde),
];

fn keyword_kind(text: &str) -> Option<TokenKind> {
    let kind = match text {
        "import" => TokenKind::Import,
        "export" => TokenKind::Export,
        "global" => TokenKind::Global,
        "mut" => TokenKind::Mut,
        "memory" => TokenKind::Memory,
        "fn" => TokenKind::Fn,
        "def" => TokenKind::Def,
        "local" => TokenKind::Local,
        "if" => TokenKind::If,
        "then" => TokenKind::Then,
        "elif" => TokenKind::Elif,
        "else" => TokenKind::Else,
        "end" => TokenKind::End,
        "while" => TokenKind::While,
        "do" => TokenKind::Do,
        "for" => TokenKind::For,
        "in" => TokenKind::In,
        "loop" => TokenKind::Loop,
        "break" => TokenKind::Break,
        "br" => TokenKind::Br,
        "when" => TokenKind::When,
        "return" => TokenKind::Return,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "as" => TokenKind::As,
        _ => return None,
    };
    Some(kind)
}

/// Lexer state
struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    tokens: Vec<Token>,
    diagnostics: Vec<CompileError>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            tokens: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn run(mut self) -> LexResult {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
                continue;
            }

            // Line comment: `--` to end of line
            if self.rest().starts_with("--") {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
                continue;
            }

            let start = self.pos;

            if c == '"' {
                self.scan_string(start);
            } else if c.is_ascii_digit() {
                self.scan_number(start);
            } else if is_ident_start(c) {
                self.scan_ident(start);
            } else if let Some((len, kind)) = self.match_operator() {
                self.pos += len;
                self.push(kind, start);
            } else {
                // Unrecognized character: report it, skip it, keep going.
                self.advance();
                self.diagnostics
                    .push(errors::unexpected_char(c, Span::new(start, self.pos)));
            }
        }

        let end = self.source.len();
        self.tokens
            .push(Token::new(TokenKind::Eof, "", Span::new(end, end)));

        LexResult {
            tokens: self.tokens,
            diagnostics: self.diagnostics,
        }
    }

    // ========================================================================
    // Core character handling
    // ========================================================================

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.rest().chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        let span = Span::new(start, self.pos);
        self.tokens
            .push(Token::new(kind, &self.source[start..self.pos], span));
    }

    /// Longest-match operator lookup: multi-character table first, then
    /// single characters. Returns the matched byte length and kind.
    fn match_operator(&self) -> Option<(usize, TokenKind)> {
        let rest = self.rest();
        for &(text, kind) in MULTI_OPERATORS {
            if rest.starts_with(text) {
                return Some((text.len(), kind));
            }
        }
        let c = rest.chars().next()?;
        SINGLE_OPERATORS
            .iter()
            .find(|&&(op, _)| op == c)
            .map(|&(_, kind)| (c.len_utf8(), kind))
    }

    // ========================================================================
    // Identifier scanning
    // ========================================================================

    fn scan_ident(&mut self, start: usize) {
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                self.advance();
            } else {
                break;
            }
        }

        let text = &self.source[start..self.pos];
        let kind = keyword_kind(text).unwrap_or(TokenKind::Ident);
        self.push(kind, start);
    }

    // ========================================================================
    // Number scanning
    // ========================================================================

    fn scan_number(&mut self, start: usize) {
        if self.rest().starts_with("0x") || self.rest().starts_with("0X") {
            self.advance();
            self.advance();
            let mut digits = 0;
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    self.advance();
                    digits += 1;
                } else {
                    break;
                }
            }
            if digits == 0 {
                self.diagnostics.push(errors::invalid_number(
                    &self.source[start..self.pos],
                    Span::new(start, self.pos),
                ));
            }
        } else if self.rest().starts_with("0b") || self.rest().starts_with("0B") {
            self.advance();
            self.advance();
            let mut digits = 0;
            while let Some(c) = self.peek() {
                if c == '0' || c == '1' {
                    self.advance();
                    digits += 1;
                } else {
                    break;
                }
            }
            if digits == 0 {
                self.diagnostics.push(errors::invalid_number(
                    &self.source[start..self.pos],
                    Span::new(start, self.pos),
                ));
            }
        } else {
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }

            // Fractional part, only when `.` is followed by a digit
            if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            }

            // Exponent part
            if matches!(self.peek(), Some('e') | Some('E')) {
                self.advance();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    self.advance();
                }
                let mut digits = 0;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                    digits += 1;
                }
                if digits == 0 {
                    self.diagnostics.push(errors::invalid_number(
                        &self.source[start..self.pos],
                        Span::new(start, self.pos),
                    ));
                }
            }
        }

        // Optional `:type` suffix, part of the number token
        if self.peek() == Some(':') && self.peek_next().is_some_and(is_ident_start) {
            self.advance();
            while self.peek().is_some_and(is_ident_continue) {
                self.advance();
            }
        }

        self.push(TokenKind::Number, start);
    }

    // ========================================================================
    // String scanning
    // ========================================================================

    fn scan_string(&mut self, start: usize) {
        self.advance(); // opening quote

        loop {
            match self.peek() {
                None => {
                    self.diagnostics
                        .push(errors::unterminated_string(Span::new(start, self.pos)));
                    break;
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    let esc_start = self.pos;
                    self.advance();
                    match self.peek() {
                        Some('n' | 't' | 'r' | '\\' | '"' | '\'' | '0') => {
                            self.advance();
                        }
                        Some('x') => {
                            self.advance();
                            for _ in 0..2 {
                                if self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                                    self.advance();
                                } else {
                                    self.diagnostics.push(errors::invalid_escape(
                                        &self.source[esc_start + 1..self.pos],
                                        Span::new(esc_start, self.pos),
                                    ));
                                    break;
                                }
                            }
                        }
                        Some(c) => {
                            self.advance();
                            self.diagnostics.push(errors::invalid_escape(
                                &c.to_string(),
                                Span::new(esc_start, self.pos),
                            ));
                        }
                        None => {
                            self.diagnostics
                                .push(errors::unterminated_string(Span::new(start, self.pos)));
                            break;
                        }
                    }
                }
                Some(_) => {
                    self.advance();
                }
            }
        }

        self.push(TokenKind::Str, start);
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Decode the value of a string token's raw text (including quotes).
///
/// Lenient by design: the lexer has already reported bad escapes, so this
/// just recovers as many bytes as it can.
pub fn string_value(raw: &str) -> Vec<u8> {
    let inner = raw.strip_prefix('"').unwrap_or(raw);
    let inner = inner.strip_suffix('"').unwrap_or(inner);

    let mut out = Vec::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => out.push(b'\n'),
            Some('t') => out.push(b'\t'),
            Some('r') => out.push(b'\r'),
            Some('\\') => out.push(b'\\'),
            Some('"') => out.push(b'"'),
            Some('\'') => out.push(b'\''),
            Some('0') => out.push(0),
            Some('x') => {
                let hi = chars.next().and_then(|c| c.to_digit(16));
                let lo = chars.next().and_then(|c| c.to_digit(16));
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    out.push((hi * 16 + lo) as u8);
                }
            }
            Some(other) => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => {}
        }
    }
    out
}

/// Lex a source string into tokens plus diagnostics.
///
/// Total: always terminates, and the returned stream always ends with an
/// `Eof` token, however malformed the input.
#[tracing::instrument(skip_all, fields(source_len = source.len()))]
pub fn lex(source: &str) -> LexResult {
    Lexer::new(source).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_keywords() {
        let tokens = lex("fn local if then elif end br when").tokens;
        assert_eq!(tokens[0].kind, TokenKind::Fn);
        assert_eq!(tokens[1].kind, TokenKind::Local);
        assert_eq!(tokens[2].kind, TokenKind::If);
        assert_eq!(tokens[3].kind, TokenKind::Then);
        assert_eq!(tokens[4].kind, TokenKind::Elif);
        assert_eq!(tokens[5].kind, TokenKind::End);
        assert_eq!(tokens[6].kind, TokenKind::Br);
        assert_eq!(tokens[7].kind, TokenKind::When);
        assert_eq!(tokens[8].kind, TokenKind::Eof);
    }

    #[test]
    fn test_operators_longest_match() {
        assert_eq!(
            kinds("<<= << < >>= >> >= >"),
            vec![
                TokenKind::ShlEq,
                TokenKind::Shl,
                TokenKind::Lt,
                TokenKind::ShrEq,
                TokenKind::Shr,
                TokenKind::Ge,
                TokenKind::Gt,
                TokenKind::Eof,
            ]
        );
        assert_eq!(
            kinds("= == != => ->"),
            vec![
                TokenKind::Eq,
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::FatArrow,
                TokenKind::Arrow,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comment_skipped() {
        let result = lex("local x -- the rest is ignored\nlocal y");
        let idents: Vec<_> = result
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Ident)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(idents, vec!["x", "y"]);
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_hyphen_identifiers() {
        // Hyphens are identifier characters, so `read-byte` is one token.
        let tokens = lex("read-byte").tokens;
        assert_eq!(tokens[0].kind, TokenKind::Ident);
        assert_eq!(tokens[0].text, "read-byte");
    }

    #[test]
    fn test_numbers() {
        let result = lex("42 3.25 1e10 2.5e-3 0xFF 0b1010 7:i64");
        assert!(result.diagnostics.is_empty());
        let nums: Vec<_> = result
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Number)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(nums, vec!["42", "3.25", "1e10", "2.5e-3", "0xFF", "0b1010", "7:i64"]);
    }

    #[test]
    fn test_invalid_hex_still_emits_token() {
        let result = lex("0x");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.tokens[0].kind, TokenKind::Number);
        assert_eq!(result.tokens[0].text, "0x");
        assert_eq!(result.tokens[1].kind, TokenKind::Eof);
    }

    #[test]
    fn test_invalid_exponent_still_emits_token() {
        let result = lex("1e+");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.tokens[0].kind, TokenKind::Number);
    }

    #[test]
    fn test_string_escapes() {
        let result = lex(r#""a\tb\x41\0""#);
        assert!(result.diagnostics.is_empty());
        assert_eq!(result.tokens[0].kind, TokenKind::Str);
        assert_eq!(string_value(&result.tokens[0].text), b"a\tbA\0");
    }

    #[test]
    fn test_invalid_escape_reported_but_token_kept() {
        let result = lex(r#""a\qb""#);
        assert_eq!(result.diagnostics.len(), 1);
        assert!(result.diagnostics[0].message.contains("escape"));
        assert_eq!(result.tokens[0].kind, TokenKind::Str);
    }

    #[test]
    fn test_unterminated_string() {
        let result = lex("\"never closed");
        assert_eq!(result.diagnostics.len(), 1);
        assert!(result.diagnostics[0].message.contains("unterminated"));
        // A string token is still emitted and the stream still ends in Eof.
        assert_eq!(result.tokens[0].kind, TokenKind::Str);
        assert_eq!(result.tokens.last().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn test_unexpected_char_skipped() {
        let result = lex("a @ b");
        assert_eq!(result.diagnostics.len(), 1);
        let idents = result
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Ident)
            .count();
        assert_eq!(idents, 2);
    }

    #[test]
    fn test_token_text_matches_span() {
        let source = "fn add(a: i32) -> i32 => a + 1 -- done";
        let result = lex(source);
        for token in &result.tokens {
            assert_eq!(token.text, &source[token.span.start..token.span.end]);
        }
    }

    #[test]
    fn test_empty_input() {
        let result = lex("");
        assert_eq!(result.tokens.len(), 1);
        assert_eq!(result.tokens[0].kind, TokenKind::Eof);
        assert!(result.diagnostics.is_empty());
    }
}
