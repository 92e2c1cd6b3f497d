// ABOUTME: Completion scenarios: property completion inside generic-function
// bodies and scope-variable completion on '.'/'^' triggers

use bff_lsp::completion::{complete, CompletionEntry, CompletionTrigger};
use bff_lsp::eval::{evaluate, EvalOptions};
use bff_lsp::range::Position;
use bff_lsp::source::{MemorySourceProvider, ParseCache};
use url::Url;

fn root() -> Url {
    Url::parse("file:///project/fbuild.bff").unwrap()
}

fn complete_at(text: &str, position: Position, trigger: CompletionTrigger) -> Vec<CompletionEntry> {
    let provider = MemorySourceProvider::new().with_document(root(), text);
    let cache = ParseCache::new();
    let data = evaluate(
        &root(),
        &provider,
        &cache,
        EvalOptions::stop_at(root(), position),
    );
    complete(&data, &root(), position, trigger)
}

#[test]
fn dot_trigger_inside_alias_body_offers_schema_properties() {
    let text = "Alias('T') {\n  \n}";
    let entries = complete_at(text, Position::new(1, 2), CompletionTrigger::Dot);

    // Schema order, labels without the leading '.', documentation from the
    // schema, and nothing that is not a property.
    let labels: Vec<_> = entries.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, vec!["Targets", "Hidden"]);
    for entry in &entries {
        assert!(entry.documentation.is_some());
        assert!(!entry.label.starts_with('.'));
    }
}

#[test]
fn dot_trigger_inside_body_hides_outer_variables() {
    let text = ".OuterVariable = 1\nCompiler('cc') {\n  \n}";
    let entries = complete_at(text, Position::new(2, 2), CompletionTrigger::Dot);
    assert!(entries.iter().any(|e| e.label == "Executable"));
    assert!(entries.iter().all(|e| e.label != "OuterVariable"));
}

#[test]
fn caret_trigger_lists_parent_scope_only() {
    let text = ".Outer = 1\n{\n  \n}";
    let entries = complete_at(text, Position::new(2, 2), CompletionTrigger::Caret);
    let labels: Vec<_> = entries.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, vec!["Outer"]);
}

#[test]
fn caret_trigger_ignores_sibling_scopes() {
    let text = ".Outer = 1\n{\n  .Sibling = 2\n}\n{\n  \n}";
    let entries = complete_at(text, Position::new(5, 2), CompletionTrigger::Caret);
    let labels: Vec<_> = entries.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, vec!["Outer"]);
}

#[test]
fn dot_trigger_sees_shadowing_in_current_scope() {
    let text = ".Both = 1\n{\n  .Both = 2\n  .Inner = 3\n  \n}";
    let entries = complete_at(text, Position::new(4, 2), CompletionTrigger::Dot);
    let both = entries.iter().find(|e| e.label == "Both").unwrap();
    assert_eq!(both.detail.as_deref(), Some("Integer = 2"));
    assert!(entries.iter().any(|e| e.label == "Inner"));
}

#[test]
fn completion_after_last_statement_sees_file_scope() {
    let text = ".A = 1\n.B = 'two'\n";
    let entries = complete_at(text, Position::new(2, 0), CompletionTrigger::Dot);
    let labels: Vec<_> = entries.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, vec!["A", "B"]);
}

#[test]
fn no_forward_references_in_scope_completion() {
    let text = ".Before = 1\n\n.After = 2\n";
    let entries = complete_at(text, Position::new(1, 0), CompletionTrigger::Dot);
    let labels: Vec<_> = entries.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, vec!["Before"]);
}
