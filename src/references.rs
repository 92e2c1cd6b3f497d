// ABOUTME: Find-references adapter: every read that resolves to the definition
// under the cursor, plus target-name references

use crate::model::EvaluatedData;
use crate::range::{Position, UriRange};
use url::Url;

/// All reference locations for the entity at `position`. With
/// `include_declaration` the defining locations are part of the answer.
pub fn references(
    data: &EvaluatedData,
    uri: &Url,
    position: Position,
    include_declaration: bool,
) -> Vec<UriRange> {
    let mut seeds: Vec<UriRange> = data
        .definitions_at(uri, position)
        .iter()
        .map(|definition| definition.lhs_range.clone())
        .collect();
    if seeds.is_empty() {
        // Not on a definition: seed from the innermost reference here.
        for reference in data.references_at(uri, position) {
            if !reference.definitions.is_empty() {
                seeds = reference.definitions.clone();
                break;
            }
        }
    }

    let mut out: Vec<UriRange> = Vec::new();
    let mut push_unique = |range: UriRange, out: &mut Vec<UriRange>| {
        if !out.contains(&range) {
            out.push(range);
        }
    };

    if !seeds.is_empty() {
        if include_declaration {
            for seed in &seeds {
                push_unique(seed.clone(), &mut out);
            }
        }
        for reference in &data.variable_references {
            if reference.definitions.iter().any(|d| seeds.contains(d)) {
                push_unique(reference.reference_range.clone(), &mut out);
            }
        }
        return out;
    }

    // A target name: collect every string that may denote it.
    let named_target = data
        .target_definitions
        .values()
        .find(|target| target.name_range.contains(uri, position))
        .map(|target| target.name.clone())
        .or_else(|| {
            data.target_references
                .iter()
                .find(|r| r.string_range.contains(uri, position))
                .and_then(|r| r.candidate_names.first().cloned())
        });
    if let Some(name) = named_target {
        if include_declaration {
            if let Some(target) = data.target_definitions.get(&name) {
                push_unique(target.name_range.clone(), &mut out);
            }
        }
        for target_reference in &data.target_references {
            if target_reference.candidate_names.contains(&name) {
                push_unique(target_reference.string_range.clone(), &mut out);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{evaluate, EvalOptions};
    use crate::range::Range;
    use crate::source::{MemorySourceProvider, ParseCache};

    fn root() -> Url {
        Url::parse("file:///build/fbuild.bff").unwrap()
    }

    fn eval_source(text: &str) -> EvaluatedData {
        let provider = MemorySourceProvider::new().with_document(root(), text);
        evaluate(&root(), &provider, &ParseCache::new(), EvalOptions::default())
    }

    fn at(line: u32, start: u32, end: u32) -> UriRange {
        UriRange::new(root(), Range::on_line(line, start, end))
    }

    #[test]
    fn test_references_from_definition_site() {
        let data = eval_source(".A = 1\nPrint( .A )\nPrint( .A )");
        let found = references(&data, &root(), Position::new(0, 1), true);
        assert_eq!(found, vec![at(0, 0, 2), at(1, 7, 9), at(2, 7, 9)]);
    }

    #[test]
    fn test_references_from_read_site_without_declaration() {
        let data = eval_source(".A = 1\nPrint( .A )\nPrint( .A )");
        let found = references(&data, &root(), Position::new(1, 8), false);
        assert_eq!(found, vec![at(1, 7, 9), at(2, 7, 9)]);
    }

    #[test]
    fn test_references_cover_using_imports() {
        let data = eval_source(".S = [ .A = 1 ]\nUsing( .S )\nPrint( .A )");
        // From the struct-field definition: the read after Using counts.
        let found = references(&data, &root(), Position::new(0, 8), false);
        assert!(found.contains(&at(2, 7, 9)));
    }

    #[test]
    fn test_target_name_references() {
        let data = eval_source(
            "Alias( 'Core' )\n{\n  .Targets = { 'App' }\n}\nAlias( 'App' )\n{\n  .Targets = { 'Core' }\n}",
        );
        // From the 'App' target name literal.
        let found = references(&data, &root(), Position::new(4, 9), true);
        assert_eq!(found, vec![at(4, 7, 12), at(2, 15, 20)]);
    }

    #[test]
    fn test_no_references_on_blank_position() {
        let data = eval_source(".A = 1");
        assert!(references(&data, &root(), Position::new(0, 4), true).is_empty());
    }
}
