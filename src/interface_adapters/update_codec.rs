// State-update encoder and its client-side mirror. The opcode forms carry
// path-hash compression and a per-scope dynamic-key slot table; a firstSync
// is always a self-contained document (every key fully defined) because
// the receiving client starts from an empty table.

use crate::domain::ids::PlayerId;
use crate::domain::patch::{PatchOp, StatePatch, StateUpdate};
use crate::domain::value::SnapshotValue;
use crate::interface_adapters::codec::WireEncoding;
use crate::interface_adapters::connection::WireFrame;
use crate::interface_adapters::path_hash::{PathHasher, PathHasherError};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const UPDATE_OPCODE_NO_CHANGE: i64 = 0;
pub const UPDATE_OPCODE_DIFF: i64 = 1;
pub const UPDATE_OPCODE_FIRST_SYNC: i64 = 2;

pub const PATCH_OPCODE_SET: i64 = 1;
pub const PATCH_OPCODE_ADD: i64 = 2;
pub const PATCH_OPCODE_REMOVE: i64 = 3;

/// Which slot table a patch consults. Broadcast and per-player tables must
/// never alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EncoderScope {
    Broadcast,
    Player(PlayerId),
}

#[derive(Debug)]
pub enum UpdateEncodeError {
    Path(PathHasherError),
    Json(serde_json::Error),
    MsgPack(rmp_serde::encode::Error),
}

impl From<PathHasherError> for UpdateEncodeError {
    fn from(err: PathHasherError) -> Self {
        UpdateEncodeError::Path(err)
    }
}

#[derive(Debug)]
pub enum UpdateDecodeError {
    Json(serde_json::Error),
    MsgPack(rmp_serde::decode::Error),
    Malformed(&'static str),
    UnknownUpdateOpcode(i64),
    UnknownPatchOpcode(i64),
    /// A slot arrived bare before any definition reached this scope.
    UnknownSlot(u32),
    Path(PathHasherError),
}

impl From<PathHasherError> for UpdateDecodeError {
    fn from(err: PathHasherError) -> Self {
        UpdateDecodeError::Path(err)
    }
}

#[derive(Debug, Default)]
struct KeyTable {
    slots: HashMap<String, u32>,
    next_slot: u32,
    defined: HashSet<u32>,
}

impl KeyTable {
    // Slot assignment is stable for the life of the scope.
    fn intern(&mut self, key: &str) -> u32 {
        if let Some(slot) = self.slots.get(key) {
            return *slot;
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        self.slots.insert(key.to_string(), slot);
        slot
    }
}

#[derive(Debug)]
pub struct UpdateEncoder {
    encoding: WireEncoding,
    hasher: Option<Arc<PathHasher>>,
    tables: HashMap<EncoderScope, KeyTable>,
}

impl UpdateEncoder {
    pub fn new(encoding: WireEncoding, hasher: Option<Arc<PathHasher>>) -> Self {
        Self {
            encoding,
            hasher,
            tables: HashMap::new(),
        }
    }

    pub fn encoding(&self) -> WireEncoding {
        self.encoding
    }

    pub fn encode(
        &mut self,
        scope: &EncoderScope,
        update: &StateUpdate,
    ) -> Result<WireFrame, UpdateEncodeError> {
        match self.encoding {
            WireEncoding::JsonObject => {
                let value = object_form(update);
                Ok(WireFrame::Text(
                    serde_json::to_string(&value).map_err(UpdateEncodeError::Json)?,
                ))
            }
            WireEncoding::JsonArray => {
                let value = self.array_form(scope, update)?;
                Ok(WireFrame::Text(
                    serde_json::to_string(&value).map_err(UpdateEncodeError::Json)?,
                ))
            }
            WireEncoding::MessagePack => {
                let value = self.array_form(scope, update)?;
                let bytes = rmp_serde::to_vec(&value).map_err(UpdateEncodeError::MsgPack)?;
                Ok(WireFrame::Binary(bytes.into()))
            }
        }
    }

    /// Drops the table for a departed scope.
    pub fn drop_scope(&mut self, scope: &EncoderScope) {
        self.tables.remove(scope);
    }

    /// Forgets which slots the far side knows without disturbing slot
    /// assignment; the next emission re-defines each key it touches. Used
    /// on the broadcast scope when a fresh client starts listening.
    pub fn reset_scope_definitions(&mut self, scope: &EncoderScope) {
        if let Some(table) = self.tables.get_mut(scope) {
            table.defined.clear();
        }
    }

    fn array_form(
        &mut self,
        scope: &EncoderScope,
        update: &StateUpdate,
    ) -> Result<Value, UpdateEncodeError> {
        let (opcode, patches, is_first_sync) = match update {
            StateUpdate::NoChange => return Ok(json!([UPDATE_OPCODE_NO_CHANGE])),
            StateUpdate::Diff(patches) => (UPDATE_OPCODE_DIFF, patches, false),
            StateUpdate::FirstSync(patches) => (UPDATE_OPCODE_FIRST_SYNC, patches, true),
        };
        let table = self.tables.entry(scope.clone()).or_default();
        if is_first_sync {
            // The client clears its table on firstSync; mirror that here so
            // still-needed keys get re-defined.
            table.defined.clear();
        }
        let mut out = vec![json!(opcode)];
        for patch in patches {
            let path_repr = match &self.hasher {
                None => json!(patch.path),
                Some(hasher) => {
                    let resolved = hasher.resolve(&patch.path)?;
                    let keys = if resolved.dynamic_keys.is_empty() {
                        Value::Null
                    } else {
                        Value::Array(
                            resolved
                                .dynamic_keys
                                .iter()
                                .map(|key| {
                                    let slot = table.intern(key);
                                    if is_first_sync || !table.defined.contains(&slot) {
                                        table.defined.insert(slot);
                                        json!([slot, key])
                                    } else {
                                        json!(slot)
                                    }
                                })
                                .collect(),
                        )
                    };
                    json!([resolved.hash, keys])
                }
            };
            out.push(match &patch.op {
                PatchOp::Set(value) => json!([path_repr, PATCH_OPCODE_SET, value.to_json()]),
                PatchOp::Add(value) => json!([path_repr, PATCH_OPCODE_ADD, value.to_json()]),
                PatchOp::Remove => json!([path_repr, PATCH_OPCODE_REMOVE]),
            });
        }
        Ok(Value::Array(out))
    }
}

fn object_form(update: &StateUpdate) -> Value {
    let (kind, patches) = match update {
        StateUpdate::NoChange => return json!({"type": "noChange"}),
        StateUpdate::Diff(patches) => ("diff", patches),
        StateUpdate::FirstSync(patches) => ("firstSync", patches),
    };
    let patches: Vec<Value> = patches
        .iter()
        .map(|patch| match &patch.op {
            PatchOp::Set(value) => {
                json!({"path": patch.path, "op": "set", "value": value.to_json()})
            }
            PatchOp::Add(value) => {
                json!({"path": patch.path, "op": "add", "value": value.to_json()})
            }
            PatchOp::Remove => json!({"path": patch.path, "op": "remove"}),
        })
        .collect();
    json!({"type": kind, "patches": patches})
}

/// Client-side mirror of the encoder. Each scope keeps the slot-to-string
/// table fed by the definitions it has seen.
#[derive(Debug, Default)]
pub struct UpdateDecoder {
    hasher: Option<Arc<PathHasher>>,
    tables: HashMap<EncoderScope, HashMap<u32, String>>,
}

impl UpdateDecoder {
    pub fn new(hasher: Option<Arc<PathHasher>>) -> Self {
        Self {
            hasher,
            tables: HashMap::new(),
        }
    }

    pub fn decode(
        &mut self,
        scope: &EncoderScope,
        frame: &WireFrame,
    ) -> Result<StateUpdate, UpdateDecodeError> {
        let value: Value = match frame {
            WireFrame::Text(text) => {
                serde_json::from_str(text).map_err(UpdateDecodeError::Json)?
            }
            WireFrame::Binary(bytes) => {
                rmp_serde::from_slice(bytes).map_err(UpdateDecodeError::MsgPack)?
            }
        };
        match value {
            Value::Object(map) => decode_object_form(&map),
            Value::Array(items) => self.decode_array_form(scope, items),
            _ => Err(UpdateDecodeError::Malformed("expected object or array")),
        }
    }

    fn decode_array_form(
        &mut self,
        scope: &EncoderScope,
        items: Vec<Value>,
    ) -> Result<StateUpdate, UpdateDecodeError> {
        let opcode = items
            .first()
            .and_then(Value::as_i64)
            .ok_or(UpdateDecodeError::Malformed("missing update opcode"))?;
        let is_first_sync = match opcode {
            UPDATE_OPCODE_NO_CHANGE => return Ok(StateUpdate::NoChange),
            UPDATE_OPCODE_DIFF => false,
            UPDATE_OPCODE_FIRST_SYNC => true,
            other => return Err(UpdateDecodeError::UnknownUpdateOpcode(other)),
        };
        let table = self.tables.entry(scope.clone()).or_default();
        if is_first_sync {
            // A firstSync starts the scope over; stale slots must not leak.
            table.clear();
        }
        let mut patches = Vec::with_capacity(items.len().saturating_sub(1));
        for item in &items[1..] {
            let Value::Array(parts) = item else {
                return Err(UpdateDecodeError::Malformed("patch must be an array"));
            };
            let path = decode_path(self.hasher.as_deref(), table, parts.first())?;
            let patch_opcode = parts
                .get(1)
                .and_then(Value::as_i64)
                .ok_or(UpdateDecodeError::Malformed("missing patch opcode"))?;
            let op = match patch_opcode {
                PATCH_OPCODE_SET => PatchOp::Set(SnapshotValue::from_json(
                    parts.get(2).cloned().unwrap_or(Value::Null),
                )),
                PATCH_OPCODE_ADD => PatchOp::Add(SnapshotValue::from_json(
                    parts.get(2).cloned().unwrap_or(Value::Null),
                )),
                PATCH_OPCODE_REMOVE => PatchOp::Remove,
                other => return Err(UpdateDecodeError::UnknownPatchOpcode(other)),
            };
            patches.push(StatePatch { path, op });
        }
        Ok(if is_first_sync {
            StateUpdate::FirstSync(patches)
        } else {
            StateUpdate::Diff(patches)
        })
    }
}

fn decode_path(
    hasher: Option<&PathHasher>,
    table: &mut HashMap<u32, String>,
    repr: Option<&Value>,
) -> Result<String, UpdateDecodeError> {
    match repr {
        Some(Value::String(path)) => Ok(path.clone()),
        Some(Value::Array(parts)) => {
            let hasher = hasher.ok_or(UpdateDecodeError::Malformed(
                "hashed path without a configured hasher",
            ))?;
            let hash = parts
                .first()
                .and_then(Value::as_u64)
                .and_then(|raw| u32::try_from(raw).ok())
                .ok_or(UpdateDecodeError::Malformed("bad path hash"))?;
            let keys = match parts.get(1) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(entries)) => {
                    let mut keys = Vec::with_capacity(entries.len());
                    for entry in entries {
                        keys.push(decode_dynamic_key(table, entry)?);
                    }
                    keys
                }
                Some(_) => {
                    return Err(UpdateDecodeError::Malformed("bad dynamic key list"));
                }
            };
            Ok(hasher.invert(hash, &keys)?)
        }
        _ => Err(UpdateDecodeError::Malformed("bad path representation")),
    }
}

fn decode_dynamic_key(
    table: &mut HashMap<u32, String>,
    entry: &Value,
) -> Result<String, UpdateDecodeError> {
    match entry {
        Value::Number(number) => {
            let slot = number
                .as_u64()
                .and_then(|raw| u32::try_from(raw).ok())
                .ok_or(UpdateDecodeError::Malformed("bad slot"))?;
            table
                .get(&slot)
                .cloned()
                .ok_or(UpdateDecodeError::UnknownSlot(slot))
        }
        Value::Array(parts) => {
            let slot = parts
                .first()
                .and_then(Value::as_u64)
                .and_then(|raw| u32::try_from(raw).ok())
                .ok_or(UpdateDecodeError::Malformed("bad slot definition"))?;
            let Some(Value::String(key)) = parts.get(1) else {
                return Err(UpdateDecodeError::Malformed("bad slot definition"));
            };
            table.insert(slot, key.clone());
            Ok(key.clone())
        }
        _ => Err(UpdateDecodeError::Malformed("bad dynamic key entry")),
    }
}

fn decode_object_form(
    map: &serde_json::Map<String, Value>,
) -> Result<StateUpdate, UpdateDecodeError> {
    let kind = map
        .get("type")
        .and_then(Value::as_str)
        .ok_or(UpdateDecodeError::Malformed("missing type"))?;
    if kind == "noChange" {
        return Ok(StateUpdate::NoChange);
    }
    let raw_patches = match map.get("patches") {
        Some(Value::Array(items)) => items,
        _ => return Err(UpdateDecodeError::Malformed("missing patches")),
    };
    let mut patches = Vec::with_capacity(raw_patches.len());
    for item in raw_patches {
        let Value::Object(entry) = item else {
            return Err(UpdateDecodeError::Malformed("patch must be an object"));
        };
        let path = entry
            .get("path")
            .and_then(Value::as_str)
            .ok_or(UpdateDecodeError::Malformed("missing path"))?
            .to_string();
        let op = entry
            .get("op")
            .and_then(Value::as_str)
            .ok_or(UpdateDecodeError::Malformed("missing op"))?;
        let op = match op {
            "set" => PatchOp::Set(SnapshotValue::from_json(
                entry.get("value").cloned().unwrap_or(Value::Null),
            )),
            "add" => PatchOp::Add(SnapshotValue::from_json(
                entry.get("value").cloned().unwrap_or(Value::Null),
            )),
            "remove" => PatchOp::Remove,
            _ => return Err(UpdateDecodeError::Malformed("unknown patch op")),
        };
        patches.push(StatePatch { path, op });
    }
    match kind {
        "diff" => Ok(StateUpdate::Diff(patches)),
        "firstSync" => Ok(StateUpdate::FirstSync(patches)),
        _ => Err(UpdateDecodeError::Malformed("unknown update type")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::patch::StatePatch;

    fn hasher() -> Arc<PathHasher> {
        Arc::new(
            PathHasher::from_patterns([("round", 1), ("players.*.hp", 2), ("players.*", 3)])
                .expect("expected valid schema"),
        )
    }

    fn sample_diff() -> StateUpdate {
        StateUpdate::Diff(vec![
            StatePatch::set("/round", SnapshotValue::Int(2)),
            StatePatch::set("/players/uuid-1/hp", SnapshotValue::Int(9)),
            StatePatch::remove("/players/uuid-2"),
        ])
    }

    #[test]
    fn when_updates_round_trip_in_every_encoding_then_patches_survive() {
        for encoding in [
            WireEncoding::JsonObject,
            WireEncoding::JsonArray,
            WireEncoding::MessagePack,
        ] {
            for hasher in [None, Some(hasher())] {
                if encoding == WireEncoding::JsonObject && hasher.is_some() {
                    // Path hashing only exists in the opcode forms.
                    continue;
                }
                let mut encoder = UpdateEncoder::new(encoding, hasher.clone());
                let mut decoder = UpdateDecoder::new(hasher);
                let scope = EncoderScope::Broadcast;
                for update in [
                    StateUpdate::FirstSync(vec![StatePatch::add(
                        "/players/uuid-1",
                        SnapshotValue::from_json(serde_json::json!({"hp": 10})),
                    )]),
                    sample_diff(),
                    StateUpdate::NoChange,
                ] {
                    let frame = encoder.encode(&scope, &update).expect("expected encode");
                    let decoded = decoder.decode(&scope, &frame).expect("expected decode");
                    assert_eq!(decoded, update, "encoding {encoding:?}");
                }
            }
        }
    }

    #[test]
    fn when_a_key_repeats_within_a_scope_then_later_diffs_send_the_slot_alone() {
        let mut encoder = UpdateEncoder::new(WireEncoding::JsonArray, Some(hasher()));
        let scope = EncoderScope::Player(PlayerId::new("p1"));
        let diff = StateUpdate::Diff(vec![StatePatch::set(
            "/players/uuid-1/hp",
            SnapshotValue::Int(5),
        )]);
        let WireFrame::Text(first) = encoder.encode(&scope, &diff).expect("expected encode")
        else {
            panic!("expected text frame");
        };
        let WireFrame::Text(second) = encoder.encode(&scope, &diff).expect("expected encode")
        else {
            panic!("expected text frame");
        };
        assert!(first.contains(r#"[0,"uuid-1"]"#), "first: {first}");
        assert!(!second.contains("uuid-1"), "second: {second}");
        assert!(second.contains("[2,[0]]"), "second: {second}");
    }

    #[test]
    fn when_a_first_sync_follows_a_diff_then_definitions_are_forced_again() {
        let mut encoder = UpdateEncoder::new(WireEncoding::JsonArray, Some(hasher()));
        let scope = EncoderScope::Player(PlayerId::new("p1"));
        let diff = StateUpdate::Diff(vec![StatePatch::set(
            "/players/uuid-1/hp",
            SnapshotValue::Int(5),
        )]);
        encoder.encode(&scope, &diff).expect("expected encode");
        let first_sync = StateUpdate::FirstSync(vec![StatePatch::add(
            "/players/uuid-1",
            SnapshotValue::from_json(serde_json::json!({"hp": 5})),
        )]);
        let WireFrame::Text(text) = encoder
            .encode(&scope, &first_sync)
            .expect("expected encode")
        else {
            panic!("expected text frame");
        };
        // Same slot id, full definition repeated inside the firstSync.
        assert!(text.contains(r#"[0,"uuid-1"]"#), "firstSync: {text}");
    }

    #[test]
    fn when_scopes_differ_then_slot_tables_do_not_alias() {
        let mut encoder = UpdateEncoder::new(WireEncoding::JsonArray, Some(hasher()));
        let diff = StateUpdate::Diff(vec![StatePatch::set(
            "/players/uuid-9/hp",
            SnapshotValue::Int(1),
        )]);
        let scope_a = EncoderScope::Player(PlayerId::new("a"));
        let scope_b = EncoderScope::Player(PlayerId::new("b"));
        encoder.encode(&scope_a, &diff).expect("expected encode");
        let WireFrame::Text(text) = encoder.encode(&scope_b, &diff).expect("expected encode")
        else {
            panic!("expected text frame");
        };
        // Scope B never saw the definition, so it must be re-sent.
        assert!(text.contains(r#"[0,"uuid-9"]"#), "scope b: {text}");
    }

    #[test]
    fn when_a_bare_slot_arrives_before_its_definition_then_decode_fails() {
        let mut decoder = UpdateDecoder::new(Some(hasher()));
        let frame = WireFrame::Text(r#"[1,[[2,[4]],1,5]]"#.to_string());
        assert!(matches!(
            decoder.decode(&EncoderScope::Broadcast, &frame),
            Err(UpdateDecodeError::UnknownSlot(4))
        ));
    }

    #[test]
    fn when_no_change_is_encoded_then_the_frame_carries_only_the_opcode() {
        let mut encoder = UpdateEncoder::new(WireEncoding::JsonArray, None);
        let WireFrame::Text(text) = encoder
            .encode(&EncoderScope::Broadcast, &StateUpdate::NoChange)
            .expect("expected encode")
        else {
            panic!("expected text frame");
        };
        assert_eq!(text, "[0]");
    }
}
