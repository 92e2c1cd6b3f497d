// ABOUTME: tower-lsp backend: document sync into an editor overlay, re-evaluation
// on change, and translation between the semantic model and LSP types

use crate::completion::{self, CompletionTrigger};
use crate::config;
use crate::definition;
use crate::error::Severity;
use crate::eval::{evaluate, EvalOptions};
use crate::hover;
use crate::model::EvaluatedData;
use crate::range::UriRange;
use crate::references;
use crate::source::{EditorOverlayProvider, ParseCache};
use dashmap::DashMap;
use log::debug;
use std::collections::HashSet;
use std::sync::Arc;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer, LspService, Server};

pub struct Backend {
    client: Client,
    buffers: Arc<DashMap<Url, Arc<str>>>,
    cache: ParseCache,
    extra_symbols: HashSet<String>,
}

impl Backend {
    pub fn new(client: Client, extra_symbols: HashSet<String>) -> Self {
        Self {
            client,
            buffers: Arc::new(DashMap::new()),
            cache: ParseCache::new(),
            extra_symbols,
        }
    }

    fn evaluate_document(
        &self,
        uri: &Url,
        stop_at: Option<crate::range::Position>,
    ) -> EvaluatedData {
        let provider = EditorOverlayProvider::new(self.buffers.clone());
        let options = EvalOptions {
            stop_at: stop_at.map(|position| (uri.clone(), position)),
            cancel: None,
            extra_symbols: self.extra_symbols.clone(),
        };
        evaluate(uri, &provider, &self.cache, options)
    }

    async fn reload(&self, uri: Url, text: String) {
        self.buffers.insert(uri.clone(), Arc::from(text.as_str()));
        let data = self.evaluate_document(&uri, None);
        let diagnostics: Vec<Diagnostic> = data
            .diagnostics
            .iter()
            .filter(|d| d.range.uri == uri)
            .map(|d| Diagnostic {
                range: to_lsp_range(d.range.range),
                severity: Some(match d.severity {
                    Severity::Error => DiagnosticSeverity::ERROR,
                    Severity::Warning => DiagnosticSeverity::WARNING,
                }),
                source: Some(config::SERVER_NAME.to_string()),
                message: d.message.clone(),
                ..Diagnostic::default()
            })
            .collect();
        debug!("publishing {} diagnostics for {}", diagnostics.len(), uri);
        self.client.publish_diagnostics(uri, diagnostics, None).await;
    }
}

fn from_lsp_position(position: Position) -> crate::range::Position {
    crate::range::Position::new(position.line, position.character)
}

fn to_lsp_position(position: crate::range::Position) -> Position {
    Position::new(position.line, position.character)
}

fn to_lsp_range(range: crate::range::Range) -> Range {
    Range::new(to_lsp_position(range.start), to_lsp_position(range.end))
}

fn to_location(range: &UriRange) -> Location {
    Location::new(range.uri.clone(), to_lsp_range(range.range))
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, _: InitializeParams) -> Result<InitializeResult> {
        Ok(InitializeResult {
            server_info: Some(ServerInfo {
                name: config::SERVER_NAME.to_string(),
                version: Some(config::VERSION.to_string()),
            }),
            offset_encoding: None,
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::FULL,
                )),
                completion_provider: Some(CompletionOptions {
                    resolve_provider: Some(false),
                    trigger_characters: Some(vec![".".to_string(), "^".to_string()]),
                    all_commit_characters: None,
                    work_done_progress_options: Default::default(),
                    completion_item: None,
                }),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                definition_provider: Some(OneOf::Left(true)),
                references_provider: Some(OneOf::Left(true)),
                ..ServerCapabilities::default()
            },
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        debug!("{} {} initialized", config::SERVER_NAME, config::VERSION);
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        self.reload(params.text_document.uri, params.text_document.text)
            .await;
    }

    async fn did_change(&self, mut params: DidChangeTextDocumentParams) {
        // Full sync: the last change carries the whole document.
        if let Some(change) = params.content_changes.pop() {
            self.reload(params.text_document.uri, change.text).await;
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        self.buffers.remove(&params.text_document.uri);
        self.client
            .publish_diagnostics(params.text_document.uri, Vec::new(), None)
            .await;
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let position = from_lsp_position(params.text_document_position.position);
        let trigger = match params
            .context
            .and_then(|context| context.trigger_character)
            .as_deref()
        {
            Some("^") => CompletionTrigger::Caret,
            _ => CompletionTrigger::Dot,
        };

        let data = self.evaluate_document(&uri, Some(position));
        let items: Vec<CompletionItem> = completion::complete(&data, &uri, position, trigger)
            .into_iter()
            .map(|entry| CompletionItem {
                label: entry.label,
                kind: Some(CompletionItemKind::VARIABLE),
                detail: entry.detail,
                documentation: entry.documentation.map(|value| {
                    Documentation::MarkupContent(MarkupContent {
                        kind: MarkupKind::Markdown,
                        value,
                    })
                }),
                ..CompletionItem::default()
            })
            .collect();
        if items.is_empty() {
            return Ok(None);
        }
        Ok(Some(CompletionResponse::Array(items)))
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = from_lsp_position(params.text_document_position_params.position);
        let data = self.evaluate_document(&uri, None);
        Ok(hover::hover(&data, &uri, position).map(|result| Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value: result.contents,
            }),
            range: Some(to_lsp_range(result.range)),
        }))
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = from_lsp_position(params.text_document_position_params.position);
        let data = self.evaluate_document(&uri, None);
        let locations: Vec<Location> = definition::definition(&data, &uri, position)
            .iter()
            .map(to_location)
            .collect();
        if locations.is_empty() {
            return Ok(None);
        }
        Ok(Some(GotoDefinitionResponse::Array(locations)))
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let uri = params.text_document_position.text_document.uri;
        let position = from_lsp_position(params.text_document_position.position);
        let data = self.evaluate_document(&uri, None);
        let locations: Vec<Location> = references::references(
            &data,
            &uri,
            position,
            params.context.include_declaration,
        )
        .iter()
        .map(to_location)
        .collect();
        if locations.is_empty() {
            return Ok(None);
        }
        Ok(Some(locations))
    }
}

/// Run the language server over stdio until the client disconnects.
pub async fn run_stdio(extra_symbols: HashSet<String>) {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    let (service, socket) =
        LspService::new(move |client| Backend::new(client, extra_symbols.clone()));
    Server::new(stdin, stdout, socket).serve(service).await;
}
