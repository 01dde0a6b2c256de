//! # Resource URN Patterns
//!
//! Resources are named by `:`-delimited URNs of the form
//! `provider:product:resource` (e.g. `api:openai:gpt-4`). Patterns may use
//! two wildcards:
//!
//! - `*` matches exactly one segment
//! - `**` matches one or more segments
//!
//! A pattern without wildcards is a literal match. Matching is deterministic
//! and greedy-left.
//!
//! Subset between scopes is decided syntactically: a parent pattern covers a
//! child pattern when the parent matches every string the child can match.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use std::str::FromStr;

/// Errors from pattern parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// The pattern string was empty.
    #[error("Empty pattern")]
    Empty,

    /// A segment between `:` delimiters was empty.
    #[error("Empty segment in pattern {pattern:?}")]
    EmptySegment { pattern: String },

    /// A wildcard appeared inside a segment (e.g. `gpt-*`).
    #[error("Wildcard must be a whole segment in pattern {pattern:?}")]
    PartialWildcard { pattern: String },
}

/// One segment of a parsed pattern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Segment {
    Literal(String),
    /// `*` - exactly one segment.
    Single,
    /// `**` - one or more segments.
    Multi,
}

/// A validated resource pattern.
///
/// Serialized as its raw string form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePattern {
    raw: String,
}

impl ResourcePattern {
    /// The raw pattern string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn segments(&self) -> Vec<Segment> {
        self.raw
            .split(':')
            .map(|s| match s {
                "*" => Segment::Single,
                "**" => Segment::Multi,
                lit => Segment::Literal(lit.to_string()),
            })
            .collect()
    }

    /// Whether this pattern matches a concrete resource URN.
    #[must_use]
    pub fn matches(&self, urn: &str) -> bool {
        let segs: Vec<&str> = urn.split(':').collect();
        if segs.iter().any(|s| s.is_empty()) {
            return false;
        }
        match_segments(&self.segments(), &segs)
    }

    /// Whether this pattern covers `child`: every URN the child matches is
    /// also matched by this pattern.
    #[must_use]
    pub fn covers(&self, child: &ResourcePattern) -> bool {
        cover_segments(&self.segments(), &child.segments())
    }
}

impl FromStr for ResourcePattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(PatternError::Empty);
        }
        for seg in s.split(':') {
            if seg.is_empty() {
                return Err(PatternError::EmptySegment {
                    pattern: s.to_string(),
                });
            }
            if seg.contains('*') && seg != "*" && seg != "**" {
                return Err(PatternError::PartialWildcard {
                    pattern: s.to_string(),
                });
            }
        }
        Ok(ResourcePattern { raw: s.to_string() })
    }
}

impl TryFrom<String> for ResourcePattern {
    type Error = PatternError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ResourcePattern> for String {
    fn from(p: ResourcePattern) -> String {
        p.raw
    }
}

impl std::fmt::Display for ResourcePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Whether any pattern in `patterns` matches `urn`.
#[must_use]
pub fn matches_any(patterns: &[ResourcePattern], urn: &str) -> bool {
    patterns.iter().any(|p| p.matches(urn))
}

/// Whether `child` scope is a subset of `parent` scope: every child pattern
/// must be covered by some parent pattern.
#[must_use]
pub fn scope_subset(child: &[ResourcePattern], parent: &[ResourcePattern]) -> bool {
    child.iter().all(|c| parent.iter().any(|p| p.covers(c)))
}

fn match_segments(pattern: &[Segment], urn: &[&str]) -> bool {
    match (pattern.first(), urn.first()) {
        (None, None) => true,
        (None, Some(_)) | (Some(_), None) => false,
        (Some(Segment::Literal(lit)), Some(seg)) => {
            lit == seg && match_segments(&pattern[1..], &urn[1..])
        }
        (Some(Segment::Single), Some(_)) => match_segments(&pattern[1..], &urn[1..]),
        (Some(Segment::Multi), Some(_)) => {
            // Greedy-left: `**` eats at least one segment, then either stops
            // or keeps eating.
            match_segments(&pattern[1..], &urn[1..]) || match_segments(pattern, &urn[1..])
        }
    }
}

/// Syntactic cover check between two patterns.
///
/// A literal covers only the equal literal; `*` covers any one-segment
/// pattern that is not `**`; `**` absorbs one or more child segments of any
/// kind.
fn cover_segments(parent: &[Segment], child: &[Segment]) -> bool {
    match (parent.first(), child.first()) {
        (None, None) => true,
        (None, Some(_)) | (Some(_), None) => false,
        (Some(Segment::Multi), Some(_)) => {
            cover_segments(&parent[1..], &child[1..]) || cover_segments(parent, &child[1..])
        }
        (Some(Segment::Single), Some(Segment::Literal(_) | Segment::Single)) => {
            cover_segments(&parent[1..], &child[1..])
        }
        (Some(Segment::Single), Some(Segment::Multi)) => false,
        (Some(Segment::Literal(p)), Some(Segment::Literal(c))) => {
            p == c && cover_segments(&parent[1..], &child[1..])
        }
        (Some(Segment::Literal(_)), Some(Segment::Single | Segment::Multi)) => false,
    }
}
