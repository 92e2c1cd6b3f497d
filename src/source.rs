// ABOUTME: Source-provider boundary (disk, memory, editor overlay) and the
// content-hash-keyed parse cache shared between evaluations

use crate::ast::Statement;
use crate::error::SourceError;
use crate::model::FileDiagnostic;
use crate::parser;
use dashmap::DashMap;
use log::debug;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use url::Url;

/// A fetched document: its text and the hash of that text.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub text: Arc<str>,
    pub hash: u64,
}

impl SourceDocument {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        let text = text.into();
        let hash = content_hash(&text);
        Self { text, hash }
    }
}

pub fn content_hash(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Maps a URI to its current content. The only operation in the pipeline
/// permitted to touch the outside world; must be deterministic within one
/// evaluation.
pub trait SourceProvider: Send + Sync {
    fn document(&self, uri: &Url) -> Result<SourceDocument, SourceError>;
}

/// Reads documents from the file system.
#[derive(Debug, Default)]
pub struct DiskSourceProvider;

impl SourceProvider for DiskSourceProvider {
    fn document(&self, uri: &Url) -> Result<SourceDocument, SourceError> {
        let path = uri
            .to_file_path()
            .map_err(|_| SourceError::UnsupportedScheme(uri.clone()))?;
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(SourceDocument::new(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(SourceError::NotFound(uri.clone()))
            }
            Err(err) => Err(SourceError::Io {
                uri: uri.clone(),
                message: err.to_string(),
            }),
        }
    }
}

/// A fixed in-memory document set, used by tests and embedders.
#[derive(Debug, Default)]
pub struct MemorySourceProvider {
    documents: HashMap<Url, Arc<str>>,
}

impl MemorySourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, uri: Url, text: impl Into<Arc<str>>) {
        self.documents.insert(uri, text.into());
    }

    pub fn with_document(mut self, uri: Url, text: impl Into<Arc<str>>) -> Self {
        self.insert(uri, text);
        self
    }
}

impl SourceProvider for MemorySourceProvider {
    fn document(&self, uri: &Url) -> Result<SourceDocument, SourceError> {
        self.documents
            .get(uri)
            .map(|text| SourceDocument::new(text.clone()))
            .ok_or_else(|| SourceError::NotFound(uri.clone()))
    }
}

/// Open editor buffers layered over the disk: the server's provider.
/// Buffers win over file content for documents the editor has open.
#[derive(Debug, Default)]
pub struct EditorOverlayProvider {
    buffers: Arc<DashMap<Url, Arc<str>>>,
    disk: DiskSourceProvider,
}

impl EditorOverlayProvider {
    pub fn new(buffers: Arc<DashMap<Url, Arc<str>>>) -> Self {
        Self {
            buffers,
            disk: DiskSourceProvider,
        }
    }
}

impl SourceProvider for EditorOverlayProvider {
    fn document(&self, uri: &Url) -> Result<SourceDocument, SourceError> {
        if let Some(text) = self.buffers.get(uri) {
            return Ok(SourceDocument::new(text.value().clone()));
        }
        self.disk.document(uri)
    }
}

/// A parsed document as held by the cache.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub statements: Vec<Statement>,
    pub diagnostics: Vec<FileDiagnostic>,
}

/// Parse results keyed by `(uri, content hash)`. Entries are immutable once
/// observed; a changed document gets a new key rather than an update, so
/// concurrent evaluations can hold borrows across requests.
#[derive(Debug, Default)]
pub struct ParseCache {
    entries: DashMap<(Url, u64), Arc<ParsedFile>>,
}

impl ParseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&self, uri: &Url, document: &SourceDocument) -> Arc<ParsedFile> {
        let key = (uri.clone(), document.hash);
        if let Some(hit) = self.entries.get(&key) {
            debug!("parse cache hit for {}", uri);
            return hit.value().clone();
        }
        let output = parser::parse(&document.text);
        let parsed = Arc::new(ParsedFile {
            statements: output.statements,
            diagnostics: output.diagnostics,
        });
        self.entries.insert(key, parsed.clone());
        parsed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
