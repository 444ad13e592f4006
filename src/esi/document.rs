//! Assembled output of one ESI-processed body
//!
//! The tag tree does not write the final body directly: an include's
//! content is only known after its sub-request completes. Output is kept as
//! a list of literal byte runs and include slots, and rendered once every
//! fragment is available.

use std::collections::HashMap;

use super::include::IncludeRequest;

/// A piece of output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Bytes copied from the body
    Literal(Vec<u8>),
    /// Placeholder for the fragment registered under this slot
    Include(usize),
}

/// Output collected for one open tag (or the document root)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    segments: Vec<Segment>,
}

impl Fragment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append literal bytes, merging with a preceding literal
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        match self.segments.last_mut() {
            Some(Segment::Literal(last)) => last.extend_from_slice(bytes),
            _ => self.segments.push(Segment::Literal(bytes.to_vec())),
        }
    }

    pub fn push_include(&mut self, slot: usize) {
        self.segments.push(Segment::Include(slot));
    }

    /// Move every segment of `other` onto the end of this fragment
    pub fn append(&mut self, other: Fragment) {
        for segment in other.segments {
            match segment {
                Segment::Literal(bytes) => self.push_bytes(&bytes),
                include => self.segments.push(include),
            }
        }
    }
}

/// Fully parsed body awaiting its fragments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    segments: Vec<Segment>,
    includes: Vec<IncludeRequest>,
}

impl Document {
    pub fn new(root: Fragment, includes: Vec<IncludeRequest>) -> Self {
        Self {
            segments: root.segments,
            includes,
        }
    }

    /// Include registered under `slot`
    pub fn include(&self, slot: usize) -> Option<&IncludeRequest> {
        self.includes.get(slot)
    }

    /// Slots the output still refers to, in document order.
    ///
    /// Includes registered inside a discarded branch are not listed.
    pub fn pending_includes(&self) -> Vec<usize> {
        let mut slots: Vec<usize> = Vec::new();
        for segment in &self.segments {
            if let Segment::Include(slot) = segment {
                if !slots.contains(slot) {
                    slots.push(*slot);
                }
            }
        }
        slots
    }

    /// No fragments to fetch
    pub fn is_static(&self) -> bool {
        !self
            .segments
            .iter()
            .any(|s| matches!(s, Segment::Include(_)))
    }

    /// Concatenate literals and fetched fragments.
    ///
    /// A slot missing from `fragments` renders as nothing.
    pub fn render(&self, fragments: &HashMap<usize, Vec<u8>>) -> Vec<u8> {
        let size = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Literal(bytes) => bytes.len(),
                Segment::Include(slot) => fragments.get(slot).map_or(0, Vec::len),
            })
            .sum();

        let mut body = Vec::with_capacity(size);
        for segment in &self.segments {
            match segment {
                Segment::Literal(bytes) => body.extend_from_slice(bytes),
                Segment::Include(slot) => {
                    if let Some(fragment) = fragments.get(slot) {
                        body.extend_from_slice(fragment);
                    }
                }
            }
        }
        body
    }
}
