//! State field paths.
//!
//! Snapshots key fields by dotted paths (`players.p1.position`); wire patches
//! carry JSON Pointers (`/players/p1/position`). Registered patterns may hold
//! `*` segments that match dynamic map keys (`players.*.position`).

use crate::determinism::hash::fnv1a32;

/// Dotted path to JSON Pointer, escaping `~` and `/` per RFC 6901.
pub fn dotted_to_pointer(dotted: &str) -> String {
    let mut out = String::with_capacity(dotted.len() + 1);
    for segment in dotted.split('.') {
        out.push('/');
        out.push_str(&segment.replace('~', "~0").replace('/', "~1"));
    }
    out
}

/// JSON Pointer back to dotted form.
pub fn pointer_to_dotted(pointer: &str) -> String {
    pointer
        .trim_start_matches('/')
        .split('/')
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect::<Vec<_>>()
        .join(".")
}

/// 32-bit identity of a registered path pattern.
pub fn pattern_hash(pattern: &str) -> u32 {
    fnv1a32(pattern.as_bytes())
}

/// A registered path pattern, possibly with `*` wildcard segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    pattern: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wild,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let segments = pattern
            .split('.')
            .map(|s| {
                if s == "*" {
                    Segment::Wild
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();
        Self {
            pattern: pattern.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn hash(&self) -> u32 {
        pattern_hash(&self.pattern)
    }

    pub fn wildcard_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Wild))
            .count()
    }

    /// Match a concrete dotted path, returning the keys bound to each `*`
    /// segment in order. `None` when the path does not match.
    pub fn match_concrete(&self, dotted: &str) -> Option<Vec<String>> {
        let parts: Vec<&str> = dotted.split('.').collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut keys = Vec::new();
        for (segment, part) in self.segments.iter().zip(&parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Wild => keys.push((*part).to_string()),
            }
        }
        Some(keys)
    }

    /// Substitute dynamic keys back into the wildcard segments.
    pub fn expand(&self, keys: &[String]) -> Option<String> {
        let mut out = Vec::with_capacity(self.segments.len());
        let mut next_key = keys.iter();
        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => out.push(lit.as_str()),
                Segment::Wild => out.push(next_key.next()?.as_str()),
            }
        }
        if next_key.next().is_some() {
            return None;
        }
        Some(out.join("."))
    }
}
