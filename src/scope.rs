// ABOUTME: The evaluator's lexical scope stack: frames of variable bindings with
// parent-walk lookup, barrier frames, and definition-site provenance

use crate::model::{ScopeSnapshot, SnapshotVariable};
use crate::range::UriRange;
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::HashSet;

/// One variable binding. `definitions` is the set of sites a read of this
/// binding resolves to: a single `lhs_range` for a plain assignment, several
/// after `Using` (the call site plus the struct-field sites).
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub value: Value,
    pub definitions: Vec<UriRange>,
}

#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub bindings: IndexMap<String, Binding>,
    /// A barrier frame ends every downward walk after it has been
    /// inspected: the evaluation root and user-function bodies.
    pub barrier: bool,
}

#[derive(Debug, Clone)]
pub struct ScopeStack {
    frames: Vec<Frame>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    /// A stack with the root frame already in place.
    pub fn new() -> Self {
        Self {
            frames: vec![Frame {
                bindings: IndexMap::new(),
                barrier: true,
            }],
        }
    }

    pub fn push(&mut self) {
        self.frames.push(Frame::default());
    }

    /// Push a frame no lookup can see past: the root-like frame of a
    /// user-function call.
    pub fn push_barrier(&mut self) {
        self.frames.push(Frame {
            bindings: IndexMap::new(),
            barrier: true,
        });
    }

    pub fn pop(&mut self) -> Frame {
        debug_assert!(self.frames.len() > 1, "the root frame is never popped");
        self.frames.pop().unwrap_or_default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Frame indexes visible from the top, outermost-visible last.
    fn visible_from(&self, top: usize) -> impl Iterator<Item = usize> + '_ {
        let mut stopped = false;
        (0..=top).rev().filter(move |&i| {
            if stopped {
                return false;
            }
            if self.frames[i].barrier {
                stopped = true;
            }
            true
        })
    }

    /// `.name` read: top-down search, stopping after a barrier frame.
    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        for i in self.visible_from(self.frames.len() - 1) {
            if let Some(binding) = self.frames[i].bindings.get(name) {
                return Some(binding);
            }
        }
        None
    }

    /// `^name` read: the same walk starting from the parent of the top
    /// frame. Empty when the top frame is a barrier.
    pub fn lookup_from_parent(&self, name: &str) -> Option<&Binding> {
        if self.frames[self.frames.len() - 1].barrier || self.frames.len() < 2 {
            return None;
        }
        for i in self.visible_from(self.frames.len() - 2) {
            if let Some(binding) = self.frames[i].bindings.get(name) {
                return Some(binding);
            }
        }
        None
    }

    /// The index of the innermost visible frame that defines `name`, for
    /// read-modify assignments.
    pub fn frame_defining(&self, name: &str) -> Option<usize> {
        for i in self.visible_from(self.frames.len() - 1) {
            if self.frames[i].bindings.contains_key(name) {
                return Some(i);
            }
        }
        None
    }

    /// Like [`frame_defining`](Self::frame_defining), but starting at the
    /// parent of the top frame, for `^name +=` style read-modify writes.
    pub fn frame_defining_from_parent(&self, name: &str) -> Option<usize> {
        let top = self.parent_frame()?;
        for i in self.visible_from(top) {
            if self.frames[i].bindings.contains_key(name) {
                return Some(i);
            }
        }
        None
    }

    /// The index of the nearest enclosing parent frame, when one is visible.
    pub fn parent_frame(&self) -> Option<usize> {
        if self.frames[self.frames.len() - 1].barrier || self.frames.len() < 2 {
            None
        } else {
            Some(self.frames.len() - 2)
        }
    }

    pub fn current_frame(&self) -> &Frame {
        self.frames.last().expect("stack always has a root frame")
    }

    pub fn frame(&self, index: usize) -> &Frame {
        &self.frames[index]
    }

    pub fn binding_in_frame(&self, index: usize, name: &str) -> Option<&Binding> {
        self.frames[index].bindings.get(name)
    }

    pub fn current_frame_index(&self) -> usize {
        self.frames.len() - 1
    }

    /// Plain assignment into `frame`: the binding's definition set becomes
    /// exactly the new left-hand side.
    pub fn assign_in_frame(&mut self, frame: usize, name: &str, value: Value, lhs: UriRange) {
        self.frames[frame].bindings.insert(
            name.to_string(),
            Binding {
                value,
                definitions: vec![lhs],
            },
        );
    }

    pub fn assign_current(&mut self, name: &str, value: Value, lhs: UriRange) {
        self.assign_in_frame(self.frames.len() - 1, name, value, lhs);
    }

    /// `Using`-style import into the current frame: the value is replaced
    /// but definition sites accumulate (existing binding first, then the
    /// new sites, duplicates collapsed).
    pub fn import_into_current(&mut self, name: &str, value: Value, sites: Vec<UriRange>) {
        let frame = self.frames.len() - 1;
        let binding = self.frames[frame]
            .bindings
            .entry(name.to_string())
            .or_insert_with(|| Binding {
                value: Value::Unknown,
                definitions: Vec::new(),
            });
        binding.value = value;
        for site in sites {
            if !binding.definitions.contains(&site) {
                binding.definitions.push(site);
            }
        }
    }

    /// Capture what `.` and `^` can currently reach, shadowing applied.
    pub fn snapshot(&self) -> ScopeSnapshot {
        ScopeSnapshot {
            current_scope: self.collect_from(self.frames.len() - 1),
            parent_scope: if self.frames[self.frames.len() - 1].barrier {
                Vec::new()
            } else {
                self.frames
                    .len()
                    .checked_sub(2)
                    .map(|top| self.collect_from(top))
                    .unwrap_or_default()
            },
        }
    }

    fn collect_from(&self, top: usize) -> Vec<SnapshotVariable> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for i in self.visible_from(top) {
            for (name, binding) in &self.frames[i].bindings {
                if seen.insert(name.clone()) {
                    out.push(SnapshotVariable {
                        name: name.clone(),
                        kind: binding.value.kind(),
                        value_preview: binding.value.to_string(),
                        definitions: binding.definitions.clone(),
                    });
                }
            }
        }
        out
    }
}
