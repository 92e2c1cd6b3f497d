// ABOUTME: Go-to-definition adapter: resolves references, target names, and includes
// to their defining locations

use crate::model::EvaluatedData;
use crate::range::{Position, Range, UriRange};
use url::Url;

/// Definition locations for the entity at `position`: the innermost variable
/// reference's definitions, a named target's declaration, or the file an
/// include points at.
pub fn definition(data: &EvaluatedData, uri: &Url, position: Position) -> Vec<UriRange> {
    // References are emitted innermost-first (substitution segments before
    // the composite read), so the first hit with definitions wins.
    for reference in data.references_at(uri, position) {
        if !reference.definitions.is_empty() {
            return reference.definitions.clone();
        }
    }

    for target_reference in &data.target_references {
        if target_reference.string_range.contains(uri, position) {
            return target_reference
                .candidate_names
                .iter()
                .filter_map(|name| data.target_definitions.get(name))
                .map(|target| target.name_range.clone())
                .collect();
        }
    }

    for edge in &data.include_edges {
        if edge.include_string_range.contains(uri, position) {
            return vec![UriRange::new(edge.to_file.clone(), Range::on_line(0, 0, 0))];
        }
    }

    Vec::new()
}
