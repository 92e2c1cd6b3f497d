// ABOUTME: Completion adapter: schema properties inside generic-function bodies,
// scope-snapshot variables everywhere else

use crate::model::EvaluatedData;
use crate::range::Position;
use crate::schema;
use url::Url;

/// The trigger character that opened the completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionTrigger {
    /// `.` — current scope, or properties inside a generic-function body.
    Dot,
    /// `^` — parent scope only.
    Caret,
}

/// A protocol-free completion item; the server maps these onto LSP items.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionEntry {
    /// Label without the sigil: the trigger character already consumed it.
    pub label: String,
    pub detail: Option<String>,
    /// Markdown documentation, when the schema has any.
    pub documentation: Option<String>,
}

/// Completions at `position`. `data` must come from an evaluation stopped at
/// that position so the scope snapshot reflects what is visible there.
pub fn complete(
    data: &EvaluatedData,
    uri: &Url,
    position: Position,
    trigger: CompletionTrigger,
) -> Vec<CompletionEntry> {
    if trigger == CompletionTrigger::Dot {
        // Inside a generic-function body a '.' starts a property name, and
        // nothing but properties is offered.
        if let Some(invocation) = data.invocation_at(uri, position) {
            if let Some(function) = schema::lookup(&invocation.function_name) {
                return function
                    .properties
                    .iter()
                    .map(|property| {
                        let kinds: Vec<_> = property
                            .permitted_kinds
                            .iter()
                            .map(|k| k.to_string())
                            .collect();
                        let mut documentation = property.documentation.to_string();
                        if property.required {
                            documentation.push_str("\n\n*Required.*");
                        } else if !property.default_description.is_empty() {
                            documentation.push_str(&format!(
                                "\n\n*Default:* `{}`",
                                property.default_description
                            ));
                        }
                        documentation
                            .push_str(&format!("\n\n[{0} docs]({1})", function.name, function.documentation_url));
                        CompletionEntry {
                            label: property.name.to_string(),
                            detail: Some(kinds.join(" | ")),
                            documentation: Some(documentation),
                        }
                    })
                    .collect();
            }
        }
    }

    let Some(snapshot) = &data.scope_snapshot else {
        return Vec::new();
    };
    let variables = match trigger {
        CompletionTrigger::Dot => &snapshot.current_scope,
        CompletionTrigger::Caret => &snapshot.parent_scope,
    };
    variables
        .iter()
        .map(|variable| CompletionEntry {
            label: variable.name.clone(),
            detail: Some(format!("{} = {}", variable.kind, variable.value_preview)),
            documentation: None,
        })
        .collect()
}
