// ABOUTME: The semantic model: everything one evaluation emits, queried by every LSP feature

use crate::error::{DiagnosticKind, Severity};
use crate::range::{Position, Range, UriRange};
use crate::value::{Value, ValueKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// One executed assignment, in temporal evaluation order. `range` spans the
/// whole definition, `lhs_range` just the left-hand identifier (the
/// go-to-definition target).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub name: String,
    pub range: UriRange,
    pub lhs_range: UriRange,
    pub value: Value,
}

/// One executed read. `definitions` holds the `lhs_range`s the read resolved
/// to; empty when the variable was undefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableReference {
    pub reference_range: UriRange,
    pub definitions: Vec<UriRange>,
}

/// One executed invocation of a built-in generic function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericFunctionInvocation {
    pub function_name: String,
    pub header_range: UriRange,
    /// Span strictly inside the braces; completion uses it to decide
    /// "cursor is inside a function body".
    pub body_range: UriRange,
    pub target_name: Option<String>,
}

/// A build target declared by invoking a generic function with a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDefinition {
    pub name: String,
    pub name_range: UriRange,
}

/// A string literal that may name a target, with the names it could denote
/// after substitution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetReference {
    pub string_range: UriRange,
    pub candidate_names: Vec<String>,
}

/// One executed `#include`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncludeEdge {
    pub from_file: Url,
    pub include_string_range: UriRange,
    pub to_file: Url,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub range: UriRange,
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
}

/// A diagnostic before it is pinned to a document: produced by the lexer and
/// parser, which never see URIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDiagnostic {
    pub range: Range,
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl FileDiagnostic {
    pub fn error(range: Range, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            range,
            severity: Severity::Error,
            kind,
            message: message.into(),
        }
    }

    pub fn in_file(&self, uri: &Url) -> Diagnostic {
        Diagnostic {
            range: UriRange::new(uri.clone(), self.range),
            severity: self.severity,
            kind: self.kind,
            message: self.message.clone(),
        }
    }
}

/// One variable visible at a `stop_at` cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotVariable {
    pub name: String,
    pub kind: ValueKind,
    pub value_preview: String,
    pub definitions: Vec<UriRange>,
}

/// Live scope captured when evaluation stops at a cursor: what `.` and `^`
/// can reach there, innermost bindings first, shadowing already applied.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScopeSnapshot {
    pub current_scope: Vec<SnapshotVariable>,
    pub parent_scope: Vec<SnapshotVariable>,
}

/// The aggregate a single evaluation returns. Immutable once returned;
/// consumers re-run the pipeline when documents change.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluatedData {
    pub variable_definitions: Vec<VariableDefinition>,
    pub variable_references: Vec<VariableReference>,
    /// Per file, strictly ordered by body start (generic functions cannot
    /// nest, so containment search can bisect).
    pub generic_functions: HashMap<Url, Vec<GenericFunctionInvocation>>,
    pub target_definitions: IndexMap<String, TargetDefinition>,
    pub duplicate_target_definitions: Vec<TargetDefinition>,
    pub target_references: Vec<TargetReference>,
    pub include_edges: Vec<IncludeEdge>,
    pub diagnostics: Vec<Diagnostic>,
    /// Populated only when evaluation stopped at a `stop_at` cursor.
    pub scope_snapshot: Option<ScopeSnapshot>,
}

impl EvaluatedData {
    pub fn new() -> Self {
        Self::default()
    }

    /// The generic-function invocation whose body contains `position`, if
    /// any. At most one can (no nesting).
    pub fn invocation_at(
        &self,
        uri: &Url,
        position: Position,
    ) -> Option<&GenericFunctionInvocation> {
        let invocations = self.generic_functions.get(uri)?;
        let idx = invocations.partition_point(|inv| inv.body_range.range.start <= position);
        if idx == 0 {
            return None;
        }
        let candidate = &invocations[idx - 1];
        candidate
            .body_range
            .range
            .contains(position)
            .then_some(candidate)
    }

    /// References whose span contains `position`, in emission order. Nested
    /// substitution reads come before the enclosing composite read.
    pub fn references_at(&self, uri: &Url, position: Position) -> Vec<&VariableReference> {
        self.variable_references
            .iter()
            .filter(|r| r.reference_range.contains(uri, position))
            .collect()
    }

    /// Definition entries whose left-hand side contains `position`.
    pub fn definitions_at(&self, uri: &Url, position: Position) -> Vec<&VariableDefinition> {
        self.variable_definitions
            .iter()
            .filter(|d| d.lhs_range.contains(uri, position))
            .collect()
    }

    /// The most recent definition entry whose `lhs_range` equals `lhs`.
    pub fn latest_definition_for(&self, lhs: &UriRange) -> Option<&VariableDefinition> {
        self.variable_definitions
            .iter()
            .rev()
            .find(|d| &d.lhs_range == lhs)
    }

    /// Stable range sort of diagnostics; called once before the data is
    /// handed out.
    pub fn finalize(&mut self) {
        self.diagnostics
            .sort_by(|a, b| (a.range.uri.as_str(), a.range.range).cmp(&(b.range.uri.as_str(), b.range.range)));
    }
}
