//! Path addresses
//!
//! A path such as `state.macros[alice].running` is an ordered list of
//! segments, each either a bare identifier or a bracket-delimited token.
//! Bracket contents may themselves contain balanced brackets, so keys like
//! `matrix[row[2]]` address the element keyed `row[2]`.
//!
//! The segment list is immutable and shared between clones. The traversal
//! cursor is per instance: every traversal owns its own `PathAddress` value
//! and moves it down the tree, so two traversals never share a cursor.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{TetherError, TetherResult};

/// One component of a path
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Segment {
    name: String,
    bracketed: bool,
}

impl Segment {
    pub fn new(name: impl Into<String>, bracketed: bool) -> Self {
        Segment {
            name: name.into(),
            bracketed,
        }
    }

    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, false)
    }

    pub fn bracketed(name: impl Into<String>) -> Self {
        Self::new(name, true)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_bracketed(&self) -> bool {
        self.bracketed
    }
}

/// Parsed, cursor-addressable key path
#[derive(Clone)]
pub struct PathAddress {
    segments: Arc<[Segment]>,
    cursor: usize,
}

impl PathAddress {
    /// Parse dotted/bracketed path text
    pub fn parse(text: &str) -> TetherResult<Self> {
        Self::from_segments(parse_segments(text)?)
    }

    /// Build a path from segments; at least one segment is required
    pub fn from_segments(segments: Vec<Segment>) -> TetherResult<Self> {
        if segments.is_empty() {
            return Err(TetherError::invalid_path("", "a path needs at least one segment"));
        }
        Ok(PathAddress {
            segments: segments.into(),
            cursor: 0,
        })
    }

    /// Move the cursor to the first segment
    pub fn reset(&mut self) -> &mut Self {
        self.cursor = 0;
        self
    }

    /// Move the cursor to the last segment
    pub fn finalize(&mut self) -> &mut Self {
        self.cursor = self.segments.len() - 1;
        self
    }

    pub fn increment(&mut self) -> &mut Self {
        assert!(
            self.cursor < self.segments.len(),
            "path cursor moved past the end of {}",
            self
        );
        self.cursor += 1;
        self
    }

    pub fn decrement(&mut self) -> &mut Self {
        assert!(self.cursor > 0, "path cursor moved before the start of {}", self);
        self.cursor -= 1;
        self
    }

    /// Segment name under the cursor
    ///
    /// # Panics
    ///
    /// Panics when the cursor is at the final position.
    pub fn value(&self) -> &str {
        self.segment().name()
    }

    /// Segment under the cursor
    ///
    /// # Panics
    ///
    /// Panics when the cursor is at the final position.
    pub fn segment(&self) -> &Segment {
        match self.segments.get(self.cursor) {
            Some(segment) => segment,
            None => panic!("dereferenced path {} at its final position", self),
        }
    }

    pub fn try_value(&self) -> Option<&str> {
        self.segments.get(self.cursor).map(Segment::name)
    }

    /// Segment after the cursor, used for look-ahead during dispatch
    pub fn peek_next(&self) -> Option<&Segment> {
        self.segments.get(self.cursor + 1)
    }

    /// Cursor is past the last segment
    #[inline]
    pub fn is_final(&self) -> bool {
        self.cursor == self.segments.len()
    }

    /// Cursor is on the last segment
    #[inline]
    pub fn peek_final(&self) -> bool {
        self.cursor + 1 == self.segments.len()
    }

    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// First segment; names the root the path lives under
    pub fn root(&self) -> &str {
        self.segments[0].name()
    }

    pub fn last(&self) -> &Segment {
        &self.segments[self.segments.len() - 1]
    }

    /// New path with one more segment; the original is untouched
    pub fn extend(&self, name: impl Into<String>, bracketed: bool) -> PathAddress {
        let mut segments = self.segments.to_vec();
        segments.push(Segment::new(name, bracketed));
        PathAddress {
            segments: segments.into(),
            cursor: 0,
        }
    }

    /// New path with all of `other`'s segments appended
    pub fn join(&self, other: &PathAddress) -> PathAddress {
        let mut segments = self.segments.to_vec();
        segments.extend(other.segments.iter().cloned());
        PathAddress {
            segments: segments.into(),
            cursor: 0,
        }
    }

    /// Path without its last segment
    pub fn parent(&self) -> Option<PathAddress> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(PathAddress {
            segments: self.segments[..self.segments.len() - 1].into(),
            cursor: 0,
        })
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn parse_segments(text: &str) -> TetherResult<Vec<Segment>> {
    let chars: Vec<char> = text.chars().collect();
    let mut segments = Vec::new();
    let mut i = 0;
    // A bare identifier may start the path or follow a dot
    let mut bare_allowed = true;

    while i < chars.len() {
        let c = chars[i];
        if is_ident_char(c) {
            if !bare_allowed {
                return Err(TetherError::invalid_path(text, format!("expected '.' or '[' at {}", i)));
            }
            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            segments.push(Segment::bare(chars[start..i].iter().collect::<String>()));
            bare_allowed = false;
        } else if c == '[' {
            if bare_allowed && !segments.is_empty() {
                return Err(TetherError::invalid_path(text, format!("expected identifier at {}", i)));
            }
            let start = i + 1;
            let mut depth = 1usize;
            i += 1;
            while i < chars.len() {
                match chars[i] {
                    '[' => depth += 1,
                    ']' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
                i += 1;
            }
            if depth != 0 {
                return Err(TetherError::invalid_path(text, "unbalanced '['"));
            }
            if start == i {
                return Err(TetherError::invalid_path(text, "empty brackets"));
            }
            segments.push(Segment::bracketed(chars[start..i].iter().collect::<String>()));
            i += 1;
            bare_allowed = false;
        } else if c == '.' {
            if bare_allowed {
                return Err(TetherError::invalid_path(text, format!("unexpected '.' at {}", i)));
            }
            bare_allowed = true;
            i += 1;
            if i == chars.len() || !is_ident_char(chars[i]) {
                return Err(TetherError::invalid_path(text, "'.' must be followed by an identifier"));
            }
        } else {
            return Err(TetherError::invalid_path(text, format!("unexpected '{}' at {}", c, i)));
        }
    }

    Ok(segments)
}

impl fmt::Display for PathAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if segment.bracketed {
                write!(f, "[{}]", segment.name)?;
            } else if i == 0 {
                f.write_str(&segment.name)?;
            } else {
                write!(f, ".{}", segment.name)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for PathAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({} @{})", self, self.cursor)
    }
}

// Identity is the segment list; the cursor is traversal state.
impl PartialEq for PathAddress {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl Eq for PathAddress {}

impl Hash for PathAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segments.hash(state);
    }
}

impl std::str::FromStr for PathAddress {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PathAddress::parse(s)
    }
}

/// Conversion into a parsed path with its cursor at the start
pub trait IntoPath {
    fn into_path(self) -> TetherResult<PathAddress>;
}

impl IntoPath for PathAddress {
    fn into_path(mut self) -> TetherResult<PathAddress> {
        self.reset();
        Ok(self)
    }
}

impl IntoPath for &PathAddress {
    fn into_path(self) -> TetherResult<PathAddress> {
        self.clone().into_path()
    }
}

impl IntoPath for &str {
    fn into_path(self) -> TetherResult<PathAddress> {
        PathAddress::parse(self)
    }
}

impl IntoPath for String {
    fn into_path(self) -> TetherResult<PathAddress> {
        PathAddress::parse(&self)
    }
}

impl Serialize for PathAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PathAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        PathAddress::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(path: &PathAddress) -> Vec<(&str, bool)> {
        path.segments()
            .iter()
            .map(|s| (s.name(), s.is_bracketed()))
            .collect()
    }

    #[test]
    fn test_parse_dotted_and_bracketed() {
        let path = PathAddress::parse("state.macros[alice].running").unwrap();
        assert_eq!(
            names(&path),
            vec![
                ("state", false),
                ("macros", false),
                ("alice", true),
                ("running", false)
            ]
        );
        assert_eq!(path.to_string(), "state.macros[alice].running");
    }

    #[test]
    fn test_parse_nested_brackets() {
        let path = PathAddress::parse("database.grid[row[2]][col]").unwrap();
        assert_eq!(
            names(&path),
            vec![
                ("database", false),
                ("grid", false),
                ("row[2]", true),
                ("col", true)
            ]
        );
        assert_eq!(path.to_string(), "database.grid[row[2]][col]");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for text in ["", "a..b", ".a", "a.", "a[b", "a[]", "a]b", "a b", "a[b]c"] {
            assert!(PathAddress::parse(text).is_err(), "{:?} should not parse", text);
        }
    }

    #[test]
    fn test_cursor_walk() {
        let mut path = PathAddress::parse("settings.game.speed").unwrap();
        assert_eq!(path.value(), "settings");
        assert!(!path.peek_final());

        path.increment().increment();
        assert_eq!(path.value(), "speed");
        assert!(path.peek_final());
        assert!(!path.is_final());

        path.increment();
        assert!(path.is_final());
        assert_eq!(path.try_value(), None);

        path.decrement();
        assert_eq!(path.value(), "speed");

        path.reset();
        assert_eq!(path.cursor(), 0);
        path.finalize();
        assert_eq!(path.value(), "speed");
    }

    #[test]
    #[should_panic(expected = "final position")]
    fn test_value_at_final_panics() {
        let mut path = PathAddress::parse("state").unwrap();
        path.increment();
        let _ = path.value();
    }

    #[test]
    #[should_panic(expected = "past the end")]
    fn test_increment_past_end_panics() {
        let mut path = PathAddress::parse("state").unwrap();
        path.increment().increment();
    }

    #[test]
    fn test_extend_is_independent() {
        let mut base = PathAddress::parse("state.macros").unwrap();
        base.increment();

        let extended = base.extend("alice", true);
        assert_eq!(extended.to_string(), "state.macros[alice]");
        assert_eq!(extended.cursor(), 0);
        assert_eq!(base.cursor(), 1);
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn test_equality_ignores_cursor() {
        let a = PathAddress::parse("state.x").unwrap();
        let mut b = a.clone();
        b.increment();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parent_and_join() {
        let path = PathAddress::parse("database.accounts[bob].name").unwrap();
        assert_eq!(path.parent().unwrap().to_string(), "database.accounts[bob]");
        assert!(PathAddress::parse("state").unwrap().parent().is_none());

        let base = PathAddress::parse("database.accounts[bob]").unwrap();
        let rel = PathAddress::parse("profile.name").unwrap();
        assert_eq!(base.join(&rel).to_string(), "database.accounts[bob].profile.name");
    }

    #[test]
    fn test_into_path_resets_cursor() {
        let mut path = PathAddress::parse("state.x").unwrap();
        path.increment();
        assert_eq!((&path).into_path().unwrap().cursor(), 0);
        assert_eq!(path.into_path().unwrap().cursor(), 0);
        assert!("state..x".into_path().is_err());
        assert_eq!(String::from("state.x").into_path().unwrap().len(), 2);
    }

    #[test]
    fn test_serde_as_text() {
        let path = PathAddress::parse("state.macros[alice]").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, r#""state.macros[alice]""#);
        let back: PathAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
        assert!(serde_json::from_str::<PathAddress>(r#""a[""#).is_err());
    }

    fn segment_strategy() -> impl Strategy<Value = Segment> {
        prop_oneof![
            "[a-zA-Z_][a-zA-Z0-9_]{0,8}".prop_map(Segment::bare),
            "[a-z0-9 .:-]{1,8}".prop_map(Segment::bracketed),
            ("[a-z]{1,4}", "[a-z0-9]{1,4}")
                .prop_map(|(outer, inner)| Segment::bracketed(format!("{}[{}]", outer, inner))),
        ]
    }

    proptest! {
        #[test]
        fn prop_display_parse_roundtrip(
            first in "[a-z][a-z0-9_]{0,8}",
            rest in proptest::collection::vec(segment_strategy(), 0..6),
        ) {
            let mut segments = vec![Segment::bare(first)];
            segments.extend(rest);
            let path = PathAddress::from_segments(segments).unwrap();
            let reparsed = PathAddress::parse(&path.to_string()).unwrap();
            prop_assert_eq!(reparsed, path);
        }

        #[test]
        fn prop_cursor_stays_in_range(steps in 0usize..6, len in 1usize..6) {
            let segments = (0..len).map(|i| Segment::bare(format!("s{}", i))).collect();
            let mut path = PathAddress::from_segments(segments).unwrap();
            for _ in 0..steps.min(len) {
                path.increment();
            }
            prop_assert!(path.cursor() <= path.len());
            prop_assert_eq!(path.is_final(), path.cursor() == len);
            prop_assert_eq!(path.try_value().is_none(), path.is_final());
        }
    }
}
