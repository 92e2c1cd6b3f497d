// ABOUTME: Include-graph behavior: relative and root-relative resolution,
// textual inclusion into the current frame, #once, and missing files

use bff_lsp::error::DiagnosticKind;
use bff_lsp::eval::{evaluate, EvalOptions};
use bff_lsp::model::EvaluatedData;
use bff_lsp::source::{MemorySourceProvider, ParseCache};
use bff_lsp::value::Value;
use pretty_assertions::assert_eq;
use url::Url;

fn uri(name: &str) -> Url {
    Url::parse(&format!("file:///project/{}", name)).unwrap()
}

fn eval_files(files: &[(&str, &str)]) -> EvaluatedData {
    let mut provider = MemorySourceProvider::new();
    for (name, text) in files {
        provider.insert(uri(name), *text);
    }
    let root = uri(files[0].0);
    evaluate(&root, &provider, &ParseCache::new(), EvalOptions::default())
}

#[test]
fn include_is_textual_and_shares_the_frame() {
    let data = eval_files(&[
        ("fbuild.bff", ".Shared = 'from-root'\n#include 'lib.bff'\nPrint( .FromLib )"),
        ("lib.bff", "Print( .Shared )\n.FromLib = 1"),
    ]);
    assert!(data.diagnostics.is_empty(), "{:?}", data.diagnostics);

    // The included file reads the root's variable...
    let shared_read = &data.variable_references[0];
    assert_eq!(shared_read.reference_range.uri, uri("lib.bff"));
    assert_eq!(shared_read.definitions[0].uri, uri("fbuild.bff"));

    // ...and its own definition is visible back in the root.
    let lib_read = data.variable_references.last().unwrap();
    assert_eq!(lib_read.reference_range.uri, uri("fbuild.bff"));
    assert_eq!(lib_read.definitions[0].uri, uri("lib.bff"));
}

#[test]
fn include_resolves_relative_to_current_file_then_root() {
    let data = eval_files(&[
        ("fbuild.bff", "#include 'sub/inner.bff'"),
        // inner.bff includes common.bff, which only exists next to the root.
        ("sub/inner.bff", "#include 'common.bff'\n.FromInner = 1"),
        ("common.bff", ".FromCommon = 1"),
    ]);
    assert!(data.diagnostics.is_empty(), "{:?}", data.diagnostics);

    assert_eq!(data.include_edges.len(), 2);
    assert_eq!(data.include_edges[0].to_file, uri("sub/inner.bff"));
    assert_eq!(data.include_edges[1].from_file, uri("sub/inner.bff"));
    assert_eq!(data.include_edges[1].to_file, uri("common.bff"));
}

#[test]
fn once_guard_suppresses_reexecution_but_not_edges() {
    let data = eval_files(&[
        ("fbuild.bff", "#include 'lib.bff'\n#include 'lib.bff'"),
        ("lib.bff", "#once\n.FromLib = 1"),
    ]);
    assert!(data.diagnostics.is_empty(), "{:?}", data.diagnostics);

    // Both includes leave an edge, but the file's effects happen once.
    assert_eq!(data.include_edges.len(), 2);
    let lib_defs: Vec<_> = data
        .variable_definitions
        .iter()
        .filter(|d| d.name == "FromLib")
        .collect();
    assert_eq!(lib_defs.len(), 1);
}

#[test]
fn file_without_once_runs_on_every_include() {
    let data = eval_files(&[
        ("fbuild.bff", "#include 'lib.bff'\n#include 'lib.bff'"),
        ("lib.bff", ".FromLib = 1"),
    ]);
    let lib_defs: Vec<_> = data
        .variable_definitions
        .iter()
        .filter(|d| d.name == "FromLib")
        .collect();
    assert_eq!(lib_defs.len(), 2);
}

#[test]
fn missing_include_reports_io_diagnostic() {
    let data = eval_files(&[("fbuild.bff", "#include 'nowhere.bff'\n.StillRuns = 1")]);
    assert_eq!(data.diagnostics.len(), 1);
    assert_eq!(data.diagnostics[0].kind, DiagnosticKind::Io);
    assert!(data.diagnostics[0].message.contains("nowhere.bff"));
    // Evaluation continued past the failed include.
    assert_eq!(data.variable_definitions[0].value, Value::Integer(1));
}

#[test]
fn include_path_with_substitution() {
    let data = eval_files(&[
        ("fbuild.bff", ".Name = 'lib'\n#include \"$Name$.bff\""),
        ("lib.bff", ".FromLib = 1"),
    ]);
    assert!(data.diagnostics.is_empty(), "{:?}", data.diagnostics);
    assert_eq!(data.include_edges.len(), 1);
    assert_eq!(data.include_edges[0].to_file, uri("lib.bff"));
    // The substitution read was recorded like any other.
    assert!(!data.variable_references.is_empty());
}

#[test]
fn backslash_separators_are_normalized() {
    let data = eval_files(&[
        ("fbuild.bff", "#include 'sub\\\\inner.bff'"),
        ("sub/inner.bff", ".FromInner = 1"),
    ]);
    assert!(data.diagnostics.is_empty(), "{:?}", data.diagnostics);
    assert_eq!(data.include_edges[0].to_file, uri("sub/inner.bff"));
}

#[test]
fn self_include_is_a_cycle() {
    let data = eval_files(&[("fbuild.bff", "#include 'fbuild.bff'")]);
    assert_eq!(data.include_edges.len(), 1);
    assert!(data
        .diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::Structural && d.message.contains("cycle")));
}
