// State differentials. Paths are JSON pointers ("/players/uuid-1/hp");
// diffs recurse into objects and replace arrays and scalars wholesale.

use crate::domain::value::{SnapshotValue, ValueMap};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    Set(SnapshotValue),
    Add(SnapshotValue),
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatePatch {
    pub path: String,
    pub op: PatchOp,
}

impl StatePatch {
    pub fn set(path: impl Into<String>, value: SnapshotValue) -> Self {
        Self {
            path: path.into(),
            op: PatchOp::Set(value),
        }
    }

    pub fn add(path: impl Into<String>, value: SnapshotValue) -> Self {
        Self {
            path: path.into(),
            op: PatchOp::Add(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            op: PatchOp::Remove,
        }
    }
}

/// One update message toward a single player.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    /// Absolute snapshot expressed as patches against an empty view.
    FirstSync(Vec<StatePatch>),
    /// Incremental patches against the last view sent to that player.
    Diff(Vec<StatePatch>),
    /// Marker only; never carries patches.
    NoChange,
}

#[derive(Debug)]
pub enum PatchError {
    BadPointer(String),
    MissingParent(String),
    NotAnObject(String),
}

/// Escapes one pointer segment per RFC 6901 (`~` -> `~0`, `/` -> `~1`).
pub fn escape_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn unescape_segment(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// Splits a JSON pointer into unescaped segments.
pub fn split_pointer(path: &str) -> Result<Vec<String>, PatchError> {
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PatchError::BadPointer(path.to_string()));
    };
    if rest.is_empty() {
        return Err(PatchError::BadPointer(path.to_string()));
    }
    Ok(rest.split('/').map(unescape_segment).collect())
}

/// Builds a pointer from already-unescaped segments.
pub fn join_pointer<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for segment in segments {
        out.push('/');
        out.push_str(&escape_segment(segment));
    }
    out
}

/// Applies one patch to a top-level view. Removing an absent key is a
/// no-op so re-applied broadcast deltas stay idempotent.
pub fn apply_patch(view: &mut ValueMap, patch: &StatePatch) -> Result<(), PatchError> {
    let segments = split_pointer(&patch.path)?;
    let (first, rest) = segments
        .split_first()
        .ok_or_else(|| PatchError::BadPointer(patch.path.clone()))?;

    if rest.is_empty() {
        match &patch.op {
            PatchOp::Set(value) | PatchOp::Add(value) => {
                view.insert(first.clone(), value.clone());
            }
            PatchOp::Remove => {
                view.remove(first);
            }
        }
        return Ok(());
    }

    let mut current = view
        .get_mut(first)
        .ok_or_else(|| PatchError::MissingParent(patch.path.clone()))?;
    let (last, middle) = rest
        .split_last()
        .ok_or_else(|| PatchError::BadPointer(patch.path.clone()))?;
    for segment in middle {
        current = current
            .as_object_mut()
            .ok_or_else(|| PatchError::NotAnObject(patch.path.clone()))?
            .get_mut(segment)
            .ok_or_else(|| PatchError::MissingParent(patch.path.clone()))?;
    }
    let parent = current
        .as_object_mut()
        .ok_or_else(|| PatchError::NotAnObject(patch.path.clone()))?;
    match &patch.op {
        PatchOp::Set(value) | PatchOp::Add(value) => {
            parent.insert(last.clone(), value.clone());
        }
        PatchOp::Remove => {
            parent.remove(last);
        }
    }
    Ok(())
}

/// Applies a full update. `NoChange` leaves the view untouched.
pub fn apply_update(view: &mut ValueMap, update: &StateUpdate) -> Result<(), PatchError> {
    let patches = match update {
        StateUpdate::FirstSync(patches) | StateUpdate::Diff(patches) => patches,
        StateUpdate::NoChange => return Ok(()),
    };
    for patch in patches {
        apply_patch(view, patch)?;
    }
    Ok(())
}

/// Computes patches that transform `old` into `new`.
pub fn diff_value_maps(old: &ValueMap, new: &ValueMap) -> Vec<StatePatch> {
    let mut patches = Vec::new();
    diff_objects(old, new, &mut Vec::new(), &mut patches);
    patches
}

fn diff_objects(
    old: &BTreeMap<String, SnapshotValue>,
    new: &BTreeMap<String, SnapshotValue>,
    prefix: &mut Vec<String>,
    out: &mut Vec<StatePatch>,
) {
    for key in old.keys() {
        if !new.contains_key(key) {
            prefix.push(key.clone());
            out.push(StatePatch::remove(pointer_of(prefix)));
            prefix.pop();
        }
    }
    for (key, new_value) in new {
        prefix.push(key.clone());
        match old.get(key) {
            None => out.push(StatePatch::add(pointer_of(prefix), new_value.clone())),
            Some(old_value) if old_value == new_value => {}
            Some(SnapshotValue::Object(old_inner)) => {
                if let SnapshotValue::Object(new_inner) = new_value {
                    diff_objects(old_inner, new_inner, prefix, out);
                } else {
                    out.push(StatePatch::set(pointer_of(prefix), new_value.clone()));
                }
            }
            Some(_) => out.push(StatePatch::set(pointer_of(prefix), new_value.clone())),
        }
        prefix.pop();
    }
}

fn pointer_of(segments: &[String]) -> String {
    join_pointer(segments.iter().map(String::as_str))
}
