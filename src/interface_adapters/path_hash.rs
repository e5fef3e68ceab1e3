// Prearranged path compression schema. Dotted patterns ("players.*.hp")
// map to 32-bit codes shared between client and server; `*` segments
// capture the literal key that filled them.

use crate::domain::patch::{self, PatchError};
use std::collections::HashMap;

#[derive(Debug)]
pub enum PathHasherError {
    EmptyPattern,
    DuplicatePattern(String),
    DuplicateHash(u32),
    /// A path was encoded that no registered pattern covers.
    UnhashedPath(String),
    /// A decoded hash is not part of the schema.
    UnknownHash(u32),
    /// A decoded hash arrived with the wrong number of dynamic keys.
    KeyCountMismatch { hash: u32, expected: usize, got: usize },
    BadPath(String),
}

impl From<PatchError> for PathHasherError {
    fn from(err: PatchError) -> Self {
        match err {
            PatchError::BadPointer(path)
            | PatchError::MissingParent(path)
            | PatchError::NotAnObject(path) => PathHasherError::BadPath(path),
        }
    }
}

#[derive(Debug, Clone)]
enum PatternSegment {
    Literal(String),
    Wildcard,
}

#[derive(Debug, Clone)]
struct Pattern {
    segments: Vec<PatternSegment>,
    wildcards: usize,
    hash: u32,
}

/// The resolved wire form of one patch path.
#[derive(Debug, Clone, PartialEq)]
pub struct HashedPath {
    pub hash: u32,
    pub dynamic_keys: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PathHasher {
    patterns: Vec<Pattern>,
    by_hash: HashMap<u32, usize>,
}

impl PathHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one dotted pattern under a fixed 32-bit code.
    pub fn register(&mut self, pattern: &str, hash: u32) -> Result<(), PathHasherError> {
        if pattern.is_empty() {
            return Err(PathHasherError::EmptyPattern);
        }
        if self.by_hash.contains_key(&hash) {
            return Err(PathHasherError::DuplicateHash(hash));
        }
        let segments: Vec<PatternSegment> = pattern
            .split('.')
            .map(|segment| {
                if segment == "*" {
                    PatternSegment::Wildcard
                } else {
                    PatternSegment::Literal(segment.to_string())
                }
            })
            .collect();
        if self
            .patterns
            .iter()
            .any(|existing| pattern_text(&existing.segments) == pattern)
        {
            return Err(PathHasherError::DuplicatePattern(pattern.to_string()));
        }
        let wildcards = segments
            .iter()
            .filter(|s| matches!(s, PatternSegment::Wildcard))
            .count();
        self.by_hash.insert(hash, self.patterns.len());
        self.patterns.push(Pattern {
            segments,
            wildcards,
            hash,
        });
        Ok(())
    }

    pub fn from_patterns<'a>(
        entries: impl IntoIterator<Item = (&'a str, u32)>,
    ) -> Result<Self, PathHasherError> {
        let mut hasher = Self::new();
        for (pattern, hash) in entries {
            hasher.register(pattern, hash)?;
        }
        Ok(hasher)
    }

    /// Maps a JSON pointer onto the schema. The most specific pattern
    /// (fewest wildcards, then registration order) wins.
    pub fn resolve(&self, pointer: &str) -> Result<HashedPath, PathHasherError> {
        let segments = patch::split_pointer(pointer)?;
        let mut best: Option<(&Pattern, Vec<String>)> = None;
        for pattern in &self.patterns {
            if pattern.segments.len() != segments.len() {
                continue;
            }
            let mut keys = Vec::with_capacity(pattern.wildcards);
            let matched = pattern
                .segments
                .iter()
                .zip(&segments)
                .all(|(expected, actual)| match expected {
                    PatternSegment::Literal(text) => text == actual,
                    PatternSegment::Wildcard => {
                        keys.push(actual.clone());
                        true
                    }
                });
            if !matched {
                continue;
            }
            let better = match &best {
                None => true,
                Some((current, _)) => pattern.wildcards < current.wildcards,
            };
            if better {
                best = Some((pattern, keys));
            }
        }
        let (pattern, dynamic_keys) =
            best.ok_or_else(|| PathHasherError::UnhashedPath(pointer.to_string()))?;
        Ok(HashedPath {
            hash: pattern.hash,
            dynamic_keys,
        })
    }

    /// Rebuilds the JSON pointer for a decoded `(hash, keys)` pair.
    pub fn invert(&self, hash: u32, dynamic_keys: &[String]) -> Result<String, PathHasherError> {
        let index = *self
            .by_hash
            .get(&hash)
            .ok_or(PathHasherError::UnknownHash(hash))?;
        let pattern = &self.patterns[index];
        if pattern.wildcards != dynamic_keys.len() {
            return Err(PathHasherError::KeyCountMismatch {
                hash,
                expected: pattern.wildcards,
                got: dynamic_keys.len(),
            });
        }
        let mut keys = dynamic_keys.iter();
        let segments: Vec<&str> = pattern
            .segments
            .iter()
            .map(|segment| match segment {
                PatternSegment::Literal(text) => text.as_str(),
                PatternSegment::Wildcard => keys
                    .next()
                    .map(String::as_str)
                    .unwrap_or_default(),
            })
            .collect();
        Ok(patch::join_pointer(segments))
    }
}

fn pattern_text(segments: &[PatternSegment]) -> String {
    segments
        .iter()
        .map(|segment| match segment {
            PatternSegment::Literal(text) => text.as_str(),
            PatternSegment::Wildcard => "*",
        })
        .collect::<Vec<_>>()
        .join(".")
}
