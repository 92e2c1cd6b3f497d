// ABOUTME: Hover adapter: evaluated values for variables, schema docs for
// generic functions, resolved names for target references

use crate::model::EvaluatedData;
use crate::range::{Position, Range};
use crate::schema;
use url::Url;

/// Markdown hover content plus the range it describes.
#[derive(Debug, Clone, PartialEq)]
pub struct HoverResult {
    pub contents: String,
    pub range: Range,
}

pub fn hover(data: &EvaluatedData, uri: &Url, position: Position) -> Option<HoverResult> {
    // A variable read: show the value it resolved to.
    for reference in data.references_at(uri, position) {
        if let Some(first) = reference.definitions.first() {
            if let Some(definition) = data.latest_definition_for(first) {
                return Some(HoverResult {
                    contents: format!(
                        "```bff\n.{} = {}\n```",
                        definition.name, definition.value
                    ),
                    range: reference.reference_range.range,
                });
            }
        }
    }

    // A definition site: show the assigned value.
    if let Some(definition) = data.definitions_at(uri, position).last() {
        return Some(HoverResult {
            contents: format!("```bff\n.{} = {}\n```", definition.name, definition.value),
            range: definition.lhs_range.range,
        });
    }

    // A generic-function header: show schema documentation.
    if let Some(invocations) = data.generic_functions.get(uri) {
        for invocation in invocations {
            if invocation.header_range.contains(uri, position) {
                let function = schema::lookup(&invocation.function_name)?;
                let mut contents = format!("**{}**", function.name);
                if let Some(target) = &invocation.target_name {
                    contents.push_str(&format!(" `'{}'`", target));
                }
                contents.push_str("\n\nProperties:\n");
                for property in function.properties {
                    contents.push_str(&format!(
                        "- `{}`{}\n",
                        property.name,
                        if property.required { " (required)" } else { "" }
                    ));
                }
                contents.push_str(&format!("\n[Documentation]({})", function.documentation_url));
                return Some(HoverResult {
                    contents,
                    range: invocation.header_range.range,
                });
            }
        }
    }

    // A target reference: show which targets it may name.
    for target_reference in &data.target_references {
        if target_reference.string_range.contains(uri, position) {
            let known: Vec<_> = target_reference
                .candidate_names
                .iter()
                .filter(|name| data.target_definitions.contains_key(*name))
                .cloned()
                .collect();
            if known.is_empty() {
                return None;
            }
            return Some(HoverResult {
                contents: format!("Target `{}`", known.join("`, `")),
                range: target_reference.string_range.range,
            });
        }
    }

    None
}
