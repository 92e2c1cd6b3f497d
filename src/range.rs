// ABOUTME: Source positions and ranges attached to every parsed and evaluated entity

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// A zero-based line/character position within one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.character)
    }
}

/// A half-open span within one document: `start` is included, `end` is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Build a single-line range from a line and a half-open column span.
    pub fn on_line(line: u32, start_character: u32, end_character: u32) -> Self {
        Self {
            start: Position::new(line, start_character),
            end: Position::new(line, end_character),
        }
    }

    /// Whether `position` falls inside this range (half-open on the end).
    pub fn contains(&self, position: Position) -> bool {
        self.start <= position && position < self.end
    }

    /// The smallest range covering both `self` and `other`.
    pub fn union(&self, other: Range) -> Range {
        Range {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A range together with the document it belongs to, for cross-file references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UriRange {
    pub uri: Url,
    pub range: Range,
}

impl UriRange {
    pub fn new(uri: Url, range: Range) -> Self {
        Self { uri, range }
    }

    pub fn contains(&self, uri: &Url, position: Position) -> bool {
        &self.uri == uri && self.range.contains(position)
    }
}

impl fmt::Display for UriRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uri, self.range)
    }
}

/// Position helper used by the feature adapters: half-open on the end.
pub fn position_in_range(position: Position, range: &Range) -> bool {
    range.contains(position)
}
