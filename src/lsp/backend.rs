//! LSP (Language Server Protocol) backend implementation for Karst
//!
//! Re-runs the full analysis pipeline on every document change and
//! publishes the resulting diagnostics. Hover answers come from the
//! checker's cached scope results: the identifier under the cursor is
//! looked up in the enclosing function's scope chain and rendered with
//! its kind and type.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};

use crate::frontend::ast::{Decl, Module, Span, Spanned};
use crate::frontend::typechecker::CheckResult;
use crate::frontend::{lexer, parser, preprocessor, typechecker};
use crate::lsp::diagnostics::{compile_error_to_diagnostic, span_to_range};
use crate::version::KARST_VERSION;

/// Document state stored by the LSP
#[derive(Debug)]
pub struct DocumentState {
    pub source: String,
    pub module: Module,
    pub check: CheckResult,
    pub version: i32,
}

/// Karst Language Server
pub struct KarstLanguageServer {
    client: Client,
    documents: Arc<RwLock<HashMap<Url, DocumentState>>>,
}

impl KarstLanguageServer {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            documents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Analyze a document, publish diagnostics, and cache the results
    async fn analyze_document(&self, uri: &Url, source: &str, version: i32) {
        let lexed = lexer::lex(source);
        let parsed = parser::parse(&lexed.tokens);
        let module = preprocessor::preprocess(&parsed.module);
        let check = typechecker::check(&module);

        let mut diagnostics = Vec::new();
        for error in lexed
            .diagnostics
            .iter()
            .chain(parsed.diagnostics.iter())
            .chain(check.diagnostics.iter())
        {
            diagnostics.push(compile_error_to_diagnostic(error, source));
        }

        {
            let mut docs = self.documents.write().await;
            docs.insert(
                uri.clone(),
                DocumentState {
                    source: source.to_string(),
                    module,
                    check,
                    version,
                },
            );
        }

        // Publish even when empty, to clear stale diagnostics.
        self.client
            .publish_diagnostics(uri.clone(), diagnostics, Some(version))
            .await;
    }

    /// Render hover text for the identifier under the cursor, returning
    /// the text and the identifier's span
    fn hover_text(&self, doc: &DocumentState, offset: usize) -> Option<(String, Span)> {
        let (name, span) = ident_at(&doc.source, offset)?;

        // Prefer the scope of the function enclosing the cursor, falling
        // back to the global scope.
        let scope = enclosing_fn(&doc.module, offset)
            .and_then(|decl_span| doc.check.fn_scope(decl_span))
            .unwrap_or(doc.check.global);

        let symbol = doc.check.symbols.lookup(scope, &name)?;
        let ty = symbol
            .ty
            .as_ref()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "<unresolved>".to_string());
        let text = format!("```karst\n{} {}: {}\n```", symbol.kind.as_str(), symbol.name, ty);
        Some((text, span))
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for KarstLanguageServer {
    async fn initialize(&self, _params: InitializeParams) -> Result<InitializeResult> {
        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::FULL,
                )),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                ..ServerCapabilities::default()
            },
            server_info: Some(ServerInfo {
                name: "karst-lsp".to_string(),
                version: Some(KARST_VERSION.to_string()),
            }),
        })
    }

    async fn initialized(&self, _params: InitializedParams) {
        self.client
            .log_message(MessageType::INFO, "karst-lsp initialized")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let doc = params.text_document;
        self.analyze_document(&doc.uri, &doc.text, doc.version).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        // Full sync: the last content change carries the whole document.
        let Some(change) = params.content_changes.into_iter().next_back() else {
            return;
        };
        self.analyze_document(
            &params.text_document.uri,
            &change.text,
            params.text_document.version,
        )
        .await;
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        {
            let mut docs = self.documents.write().await;
            docs.remove(&uri);
        }
        self.client.publish_diagnostics(uri, Vec::new(), None).await;
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;

        let docs = self.documents.read().await;
        let Some(doc) = docs.get(&uri) else {
            return Ok(None);
        };

        let offset = position_to_offset(&doc.source, position);
        let Some((text, span)) = self.hover_text(doc, offset) else {
            return Ok(None);
        };

        Ok(Some(Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value: text,
            }),
            range: Some(span_to_range(&doc.source, span.start, span.end)),
        }))
    }
}

/// Convert an LSP Position (0-based line/character) to a byte offset
pub fn position_to_offset(source: &str, position: Position) -> usize {
    let mut line = 0u32;
    let mut col = 0u32;

    for (i, c) in source.char_indices() {
        if line == position.line && col == position.character {
            return i;
        }
        if c == '\n' {
            line += 1;
            col = 0;
        } else {
            col += 1;
        }
    }

    source.len()
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// The identifier covering `offset`, if any
fn ident_at(source: &str, offset: usize) -> Option<(String, Span)> {
    if offset >= source.len() {
        return None;
    }

    let bytes = source.as_bytes();
    if !is_ident_char(bytes[offset] as char) {
        return None;
    }

    let mut start = offset;
    while start > 0 && is_ident_char(bytes[start - 1] as char) {
        start -= 1;
    }
    let mut end = offset;
    while end < bytes.len() && is_ident_char(bytes[end] as char) {
        end += 1;
    }

    let text = &source[start..end];
    // Identifiers cannot start with a digit or hyphen.
    let first = text.chars().next()?;
    if first.is_ascii_digit() || first == '-' {
        return None;
    }

    Some((text.to_string(), Span::new(start, end)))
}

/// The span of the function declaration enclosing `offset`, if any
fn enclosing_fn(module: &Module, offset: usize) -> Option<Span> {
    fn visit(decl: &Spanned<Decl>, offset: usize) -> Option<Span> {
        match &decl.node {
            Decl::Export(inner) => visit(inner, offset),
            Decl::Function(_) if decl.span.start <= offset && offset < decl.span.end => {
                Some(decl.span)
            }
            _ => None,
        }
    }
    module.decls.iter().find_map(|d| visit(d, offset))
}
