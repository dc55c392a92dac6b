//! Rule paths.
//!
//! Every node in the rule tree is identified by its path, a tuple of
//! segments like `($, .count, [2], $req->Name, .result)`. Paths are the sole
//! identity used for ordering, logging, and exceptions, so this module is
//! the single place that constructs new segments.

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RulePath(Vec<String>);

impl RulePath {
    pub fn root() -> Self {
        RulePath(vec!["$".to_string()])
    }

    pub fn from_segments(segments: Vec<String>) -> Self {
        RulePath(segments)
    }

    /// Append a plain segment, e.g. `.count`, `.result`, `.query`.
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        RulePath(segments)
    }

    /// Append a bracketed index segment, `[i]`. Indices compare numerically.
    pub fn index(&self, i: usize) -> Self {
        self.child(&format!("[{i}]"))
    }

    /// Append a requirement-name segment, `$req->Name`.
    pub fn requirement(&self, name: &str) -> Self {
        self.child(&format!("$req->{name}"))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    fn bracket_index(segment: &str) -> Option<i64> {
        segment
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .and_then(|s| s.parse::<i64>().ok())
    }
}

impl fmt::Display for RulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.join(", "))
    }
}

impl PartialOrd for RulePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RulePath {
    /// Shorter paths sort first; bracketed indices compare as integers and
    /// sort before non-index segments of the same position.
    fn cmp(&self, other: &Self) -> Ordering {
        match self.0.len().cmp(&other.0.len()) {
            Ordering::Equal => {}
            unequal => return unequal,
        }

        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let ord = match (Self::bracket_index(a), Self::bracket_index(b)) {
                (Some(ia), Some(ib)) => ia.cmp(&ib),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => a.cmp(b),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }

        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segments: &[&str]) -> RulePath {
        RulePath::from_segments(segments.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn numeric_brackets_compare_as_integers() {
        assert!(path(&["$", ".count", "[2]"]) < path(&["$", ".count", "[10]"]));
    }

    #[test]
    fn shorter_paths_sort_first() {
        assert!(path(&["$", ".count"]) < path(&["$", ".count", "[2]"]));
        assert!(path(&["$", ".count", "[2]"]) < path(&["$", ".count", "[3]", ".count", "[1]"]));
    }

    #[test]
    fn indices_sort_before_named_segments() {
        assert!(path(&["$", "[10]"]) < path(&["$", ".count"]));
        assert!(path(&["$", ".count", "[2]"]) < path(&["$", ".count", "%Emphasis: Public Policy"]));
    }

    #[test]
    fn mixed_segments_compare_elementwise() {
        assert!(
            path(&["$", ".count", "[2]", ".stuff"])
                < path(&["$", ".count", ".emphasis", "%Emphasis: Public Policy"])
        );
    }

    #[test]
    fn segment_constructors() {
        let p = RulePath::root().child(".count").index(3).requirement("Core");
        assert_eq!(p.segments(), &["$", ".count", "[3]", "$req->Core"]);
        assert_eq!(p.to_string(), "($, .count, [3], $req->Core)");
    }
}
