//! Dotted property paths into card documents
//!
//! Used for `sortBy`, the formula `PROPERTY` function and `$$formula`
//! targets.
//!
//! | Syntax | Meaning | Example |
//! |--------|---------|---------|
//! | `key` | Object property | `data` |
//! | `a.b` | Nested property | `data.timestamp` |
//! | `a[n]` | Property then index | `tags[0]` |
//! | (empty) | Root | `` |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for property path parsing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathParseError {
    /// Empty key in path
    #[error("empty key in path at position {0}")]
    EmptyKey(usize),
    /// Unclosed bracket
    #[error("unclosed bracket starting at position {0}")]
    UnclosedBracket(usize),
    /// Invalid array index
    #[error("invalid array index at position {0}: {1}")]
    InvalidIndex(usize, String),
}

/// A segment in a property path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathSegment {
    /// Object key: `.foo`
    Key(String),
    /// Array index: `[0]`
    Index(usize),
}

/// A path into a JSON document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct PropertyPath {
    segments: Vec<PathSegment>,
}

impl PropertyPath {
    /// The root path
    pub fn root() -> Self {
        PropertyPath {
            segments: Vec::new(),
        }
    }

    /// Build a path from plain keys (`["data", "timestamp"]`)
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PropertyPath {
            segments: keys.into_iter().map(|k| PathSegment::Key(k.into())).collect(),
        }
    }

    /// Append a key segment
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(PathSegment::Key(key.into()));
        self
    }

    /// Path segments
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Whether this is the root path
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Resolve the path against a document
    pub fn get<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        let mut current = value;
        for segment in &self.segments {
            current = match segment {
                PathSegment::Key(k) => current.as_object()?.get(k)?,
                PathSegment::Index(i) => current.as_array()?.get(*i)?,
            };
        }
        Some(current)
    }

    /// Set the value at this path, creating intermediate objects.
    ///
    /// Returns `false` when an intermediate value has the wrong shape
    /// (an index into a non-array, or a key into a scalar).
    pub fn set(&self, target: &mut Value, new_value: Value) -> bool {
        let Some((last, parents)) = self.segments.split_last() else {
            *target = new_value;
            return true;
        };

        let mut current = target;
        for segment in parents {
            current = match segment {
                PathSegment::Key(k) => {
                    if current.is_null() {
                        *current = Value::Object(Map::new());
                    }
                    match current.as_object_mut() {
                        Some(map) => map.entry(k.clone()).or_insert(Value::Null),
                        None => return false,
                    }
                }
                PathSegment::Index(i) => match current.as_array_mut().and_then(|a| a.get_mut(*i)) {
                    Some(slot) => slot,
                    None => return false,
                },
            };
        }

        match last {
            PathSegment::Key(k) => {
                if current.is_null() {
                    *current = Value::Object(Map::new());
                }
                match current.as_object_mut() {
                    Some(map) => {
                        map.insert(k.clone(), new_value);
                        true
                    }
                    None => false,
                }
            }
            PathSegment::Index(i) => match current.as_array_mut().and_then(|a| a.get_mut(*i)) {
                Some(slot) => {
                    *slot = new_value;
                    true
                }
                None => false,
            },
        }
    }
}

impl FromStr for PropertyPath {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments = Vec::new();
        let chars: Vec<char> = s.chars().collect();
        let mut i = 0;

        if i < chars.len() && chars[i] == '.' {
            i += 1;
        }

        while i < chars.len() {
            match chars[i] {
                '.' => {
                    i += 1;
                    if i >= chars.len() || chars[i] == '.' {
                        return Err(PathParseError::EmptyKey(i));
                    }
                }
                '[' => {
                    let start = i;
                    i += 1;
                    let idx_start = i;
                    while i < chars.len() && chars[i] != ']' {
                        i += 1;
                    }
                    if i >= chars.len() {
                        return Err(PathParseError::UnclosedBracket(start));
                    }
                    let idx_str: String = chars[idx_start..i].iter().collect();
                    let idx = idx_str
                        .parse::<usize>()
                        .map_err(|_| PathParseError::InvalidIndex(idx_start, idx_str))?;
                    segments.push(PathSegment::Index(idx));
                    i += 1;
                }
                _ => {
                    // Keys may contain anything but the separators; card
                    // fields such as `$link` and `linked_at` must parse.
                    let key_start = i;
                    while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                        i += 1;
                    }
                    let key: String = chars[key_start..i].iter().collect();
                    segments.push(PathSegment::Key(key));
                }
            }
        }

        Ok(PropertyPath { segments })
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            match segment {
                PathSegment::Key(k) => {
                    if !first {
                        f.write_str(".")?;
                    }
                    f.write_str(k)?;
                }
                PathSegment::Index(i) => write!(f, "[{}]", i)?,
            }
            first = false;
        }
        Ok(())
    }
}
