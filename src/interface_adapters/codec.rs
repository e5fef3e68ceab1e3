// Transport message codec. Three wire forms coexist: a tagged JSON object
// form, a JSON opcode-array form, and the same array shape in MessagePack.
// Handshake traffic is always JSON regardless of the configured encoding.

use crate::domain::ids::LandId;
use crate::interface_adapters::connection::WireFrame;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};

pub const OPCODE_ACTION_REQUEST: i64 = 101;
pub const OPCODE_ACTION_RESPONSE: i64 = 102;
pub const OPCODE_EVENT: i64 = 103;
pub const OPCODE_JOIN: i64 = 104;
pub const OPCODE_JOIN_RESPONSE: i64 = 105;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireEncoding {
    JsonObject,
    JsonArray,
    MessagePack,
}

impl WireEncoding {
    pub fn is_json(self) -> bool {
        !matches!(self, WireEncoding::MessagePack)
    }
}

/// Direction of an event envelope: 0 = fromClient, 1 = fromServer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventDirection {
    FromClient,
    FromServer,
}

impl EventDirection {
    fn wire_code(self) -> i64 {
        match self {
            EventDirection::FromClient => 0,
            EventDirection::FromServer => 1,
        }
    }

    fn from_wire(code: i64) -> Option<Self> {
        match code {
            0 => Some(EventDirection::FromClient),
            1 => Some(EventDirection::FromServer),
            _ => None,
        }
    }
}

/// Result half of an action response envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Ok(Value),
    Err(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinRequest {
    pub request_id: String,
    pub land_type: String,
    pub land_instance_id: Option<String>,
    pub player_id: Option<String>,
    pub device_id: Option<String>,
    pub metadata: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinResponse {
    pub request_id: String,
    pub success: bool,
    pub player_id: Option<String>,
    pub land_id: Option<LandId>,
    pub player_slot: Option<u16>,
    pub reason: Option<String>,
}

impl JoinResponse {
    pub fn denied(request_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            player_id: None,
            land_id: None,
            player_slot: None,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportMessage {
    ActionRequest {
        request_id: String,
        type_id: String,
        payload: Value,
    },
    ActionResponse {
        request_id: String,
        /// Known on the encode side only; lets payload compression find the
        /// response schema. Never serialized.
        type_id: Option<String>,
        outcome: ActionOutcome,
    },
    Event {
        direction: EventDirection,
        name: String,
        payload: Value,
    },
    Join(JoinRequest),
    JoinResponse(JoinResponse),
}

#[derive(Debug)]
pub enum CodecError {
    Json(serde_json::Error),
    MsgPackDecode(rmp_serde::decode::Error),
    MsgPackEncode(rmp_serde::encode::Error),
    Malformed(&'static str),
    /// Decodable bytes carrying an opcode or kind the codec does not know.
    UnknownKind,
    UnknownEventOpcode(u32),
    WrongFrameType,
}

#[derive(Debug)]
pub enum EventRegistryError {
    DuplicateName(String),
    DuplicateOpcode(u32),
}

/// Prearranged event-name to opcode table, split by direction.
#[derive(Debug, Clone, Default)]
pub struct EventHasher {
    to_code: HashMap<(EventDirection, String), u32>,
    from_code: HashMap<(EventDirection, u32), String>,
}

impl EventHasher {
    pub fn register(
        &mut self,
        direction: EventDirection,
        name: &str,
        opcode: u32,
    ) -> Result<(), EventRegistryError> {
        if self.to_code.contains_key(&(direction, name.to_string())) {
            return Err(EventRegistryError::DuplicateName(name.to_string()));
        }
        if self.from_code.contains_key(&(direction, opcode)) {
            return Err(EventRegistryError::DuplicateOpcode(opcode));
        }
        self.to_code.insert((direction, name.to_string()), opcode);
        self.from_code.insert((direction, opcode), name.to_string());
        Ok(())
    }

    fn opcode_of(&self, direction: EventDirection, name: &str) -> Option<u32> {
        self.to_code.get(&(direction, name.to_string())).copied()
    }

    fn name_of(&self, direction: EventDirection, opcode: u32) -> Option<&str> {
        self.from_code
            .get(&(direction, opcode))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct TransportCodec {
    encoding: WireEncoding,
    compress_payloads: bool,
    // Type identifier (action type or event name) to ASCII-sorted fields.
    payload_fields: HashMap<String, Vec<String>>,
    events: EventHasher,
}

impl TransportCodec {
    pub fn new(encoding: WireEncoding) -> Self {
        Self {
            encoding,
            compress_payloads: false,
            payload_fields: HashMap::new(),
            events: EventHasher::default(),
        }
    }

    pub fn encoding(&self) -> WireEncoding {
        self.encoding
    }

    pub fn with_payload_compression(mut self, enabled: bool) -> Self {
        self.compress_payloads = enabled;
        self
    }

    /// Registers the positional field order for one payload type. Fields
    /// are emitted in ASCII-sorted field-name order on the wire.
    pub fn register_payload_fields(&mut self, type_id: &str, fields: &[&str]) {
        let mut sorted: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        sorted.sort();
        self.payload_fields.insert(type_id.to_string(), sorted);
    }

    pub fn register_event(
        &mut self,
        direction: EventDirection,
        name: &str,
        opcode: u32,
    ) -> Result<(), EventRegistryError> {
        self.events.register(direction, name, opcode)
    }

    pub fn encode(&self, message: &TransportMessage) -> Result<WireFrame, CodecError> {
        match self.encoding {
            WireEncoding::JsonObject => {
                let value = self.to_object_value(message);
                Ok(WireFrame::Text(
                    serde_json::to_string(&value).map_err(CodecError::Json)?,
                ))
            }
            WireEncoding::JsonArray => {
                let value = self.to_array_value(message);
                Ok(WireFrame::Text(
                    serde_json::to_string(&value).map_err(CodecError::Json)?,
                ))
            }
            WireEncoding::MessagePack => {
                let value = self.to_array_value(message);
                let bytes = rmp_serde::to_vec(&value).map_err(CodecError::MsgPackEncode)?;
                Ok(WireFrame::Binary(bytes.into()))
            }
        }
    }

    /// Decodes by frame content: text frames are JSON in either shape,
    /// binary frames are MessagePack opcode arrays.
    pub fn decode(&self, frame: &WireFrame) -> Result<TransportMessage, CodecError> {
        match frame {
            WireFrame::Text(text) => {
                let value: Value = serde_json::from_str(text).map_err(CodecError::Json)?;
                self.decode_value(value)
            }
            WireFrame::Binary(bytes) => {
                let value: Value =
                    rmp_serde::from_slice(bytes).map_err(CodecError::MsgPackDecode)?;
                self.decode_value(value)
            }
        }
    }

    fn decode_value(&self, value: Value) -> Result<TransportMessage, CodecError> {
        match value {
            Value::Array(items) => self.decode_array(items),
            Value::Object(map) => self.decode_object(map),
            _ => Err(CodecError::Malformed("expected object or array")),
        }
    }

    /// Handshake traffic is JSON-only by contract; both JSON shapes are
    /// accepted so any bootstrap client can join.
    pub fn decode_handshake(frame: &WireFrame) -> Result<TransportMessage, CodecError> {
        let WireFrame::Text(text) = frame else {
            return Err(CodecError::WrongFrameType);
        };
        let value: Value = serde_json::from_str(text).map_err(CodecError::Json)?;
        // Handshake decoding never consults registered tables.
        TransportCodec::new(WireEncoding::JsonObject).decode_value(value)
    }

    /// Handshake replies (errors in particular) are always the JSON object
    /// form, whatever the configured post-handshake encoding is.
    pub fn encode_handshake_response(response: &JoinResponse) -> WireFrame {
        let codec = TransportCodec::new(WireEncoding::JsonObject);
        let value = codec.to_object_value(&TransportMessage::JoinResponse(response.clone()));
        WireFrame::Text(value.to_string())
    }

    fn compress(&self, type_id: &str, payload: &Value) -> Value {
        if !self.compress_payloads {
            return payload.clone();
        }
        let (Some(fields), Value::Object(map)) = (self.payload_fields.get(type_id), payload)
        else {
            return payload.clone();
        };
        Value::Array(
            fields
                .iter()
                .map(|field| map.get(field).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }

    fn expand(&self, type_id: &str, payload: Value) -> Value {
        if !self.compress_payloads {
            return payload;
        }
        let Some(fields) = self.payload_fields.get(type_id) else {
            return payload;
        };
        match payload {
            Value::Array(items) if items.len() == fields.len() => {
                Value::Object(fields.iter().cloned().zip(items).collect())
            }
            other => other,
        }
    }

    fn to_object_value(&self, message: &TransportMessage) -> Value {
        match message {
            TransportMessage::ActionRequest {
                request_id,
                type_id,
                payload,
            } => json!({
                "type": "actionRequest",
                "requestId": request_id,
                "typeId": type_id,
                "payload": self.compress(type_id, payload),
            }),
            TransportMessage::ActionResponse {
                request_id,
                type_id,
                outcome,
            } => {
                let mut out = json!({
                    "type": "actionResponse",
                    "requestId": request_id,
                });
                match outcome {
                    ActionOutcome::Ok(payload) => {
                        let payload = match type_id {
                            Some(type_id) => self.compress(type_id, payload),
                            None => payload.clone(),
                        };
                        out["result"] = payload;
                    }
                    ActionOutcome::Err(reason) => out["error"] = json!(reason),
                }
                out
            }
            TransportMessage::Event {
                direction,
                name,
                payload,
            } => json!({
                "type": "event",
                "direction": direction.wire_code(),
                "name": name,
                "payload": self.compress(name, payload),
            }),
            TransportMessage::Join(join) => {
                let metadata = join
                    .metadata
                    .as_ref()
                    .map_or(Value::Null, |map| json!(map));
                json!({
                    "type": "join",
                    "requestId": join.request_id,
                    "landType": join.land_type,
                    "landInstanceId": join.land_instance_id,
                    "playerId": join.player_id,
                    "deviceId": join.device_id,
                    "metadata": metadata,
                })
            }
            TransportMessage::JoinResponse(response) => json!({
                "type": "joinResponse",
                "requestId": response.request_id,
                "success": response.success,
                "playerId": response.player_id,
                "landId": response.land_id.as_ref().map(|id| id.to_string()),
                "playerSlot": response.player_slot,
                "reason": response.reason,
            }),
        }
    }

    fn to_array_value(&self, message: &TransportMessage) -> Value {
        match message {
            TransportMessage::ActionRequest {
                request_id,
                type_id,
                payload,
            } => json!([
                OPCODE_ACTION_REQUEST,
                request_id,
                type_id,
                self.compress(type_id, payload),
            ]),
            TransportMessage::ActionResponse {
                request_id,
                type_id,
                outcome,
            } => {
                let body = match outcome {
                    ActionOutcome::Ok(payload) => match type_id {
                        Some(type_id) => self.compress(type_id, payload),
                        None => payload.clone(),
                    },
                    ActionOutcome::Err(reason) => json!({"error": reason}),
                };
                json!([OPCODE_ACTION_RESPONSE, request_id, body])
            }
            TransportMessage::Event {
                direction,
                name,
                payload,
            } => {
                let type_or_opcode = match self.events.opcode_of(*direction, name) {
                    Some(opcode) => json!(opcode),
                    None => json!(name),
                };
                json!([
                    OPCODE_EVENT,
                    direction.wire_code(),
                    type_or_opcode,
                    self.compress(name, payload),
                ])
            }
            TransportMessage::Join(join) => {
                let metadata = join
                    .metadata
                    .as_ref()
                    .map_or(Value::Null, |map| json!(map));
                json!([
                    OPCODE_JOIN,
                    join.request_id,
                    join.land_type,
                    join.land_instance_id,
                    join.player_id,
                    join.device_id,
                    metadata,
                ])
            }
            TransportMessage::JoinResponse(response) => json!([
                OPCODE_JOIN_RESPONSE,
                response.request_id,
                if response.success { 1 } else { 0 },
                response.player_id,
                response.land_id.as_ref().map(|id| id.to_string()),
                response.player_slot,
                response.reason,
            ]),
        }
    }

    fn decode_array(&self, items: Vec<Value>) -> Result<TransportMessage, CodecError> {
        let opcode = items
            .first()
            .and_then(Value::as_i64)
            .ok_or(CodecError::Malformed("missing opcode"))?;
        match opcode {
            OPCODE_ACTION_REQUEST => {
                let request_id = required_str(items.get(1), "requestId")?;
                let type_id = required_str(items.get(2), "typeId")?;
                let payload = items.get(3).cloned().unwrap_or(Value::Null);
                let payload = self.expand(&type_id, payload);
                Ok(TransportMessage::ActionRequest {
                    request_id,
                    type_id,
                    payload,
                })
            }
            OPCODE_ACTION_RESPONSE => {
                let request_id = required_str(items.get(1), "requestId")?;
                let body = items.get(2).cloned().unwrap_or(Value::Null);
                let outcome = decode_outcome(body);
                Ok(TransportMessage::ActionResponse {
                    request_id,
                    type_id: None,
                    outcome,
                })
            }
            OPCODE_EVENT => {
                let direction = items
                    .get(1)
                    .and_then(Value::as_i64)
                    .and_then(EventDirection::from_wire)
                    .ok_or(CodecError::Malformed("bad event direction"))?;
                let name = match items.get(2) {
                    Some(Value::String(name)) => name.clone(),
                    Some(Value::Number(number)) => {
                        let opcode = number
                            .as_u64()
                            .and_then(|n| u32::try_from(n).ok())
                            .ok_or(CodecError::Malformed("bad event opcode"))?;
                        self.events
                            .name_of(direction, opcode)
                            .ok_or(CodecError::UnknownEventOpcode(opcode))?
                            .to_string()
                    }
                    _ => return Err(CodecError::Malformed("bad event type")),
                };
                let payload = items.get(3).cloned().unwrap_or(Value::Null);
                let payload = self.expand(&name, payload);
                Ok(TransportMessage::Event {
                    direction,
                    name,
                    payload,
                })
            }
            OPCODE_JOIN => Ok(TransportMessage::Join(JoinRequest {
                request_id: required_str(items.get(1), "requestId")?,
                land_type: required_str(items.get(2), "landType")?,
                land_instance_id: optional_str(items.get(3)),
                player_id: optional_str(items.get(4)),
                device_id: optional_str(items.get(5)),
                metadata: decode_metadata(items.get(6))?,
            })),
            OPCODE_JOIN_RESPONSE => {
                let success = items
                    .get(2)
                    .and_then(Value::as_i64)
                    .ok_or(CodecError::Malformed("bad success flag"))?;
                Ok(TransportMessage::JoinResponse(JoinResponse {
                    request_id: required_str(items.get(1), "requestId")?,
                    success: success == 1,
                    player_id: optional_str(items.get(3)),
                    land_id: optional_str(items.get(4))
                        .as_deref()
                        .and_then(LandId::parse),
                    player_slot: items
                        .get(5)
                        .and_then(Value::as_u64)
                        .and_then(|slot| u16::try_from(slot).ok()),
                    reason: optional_str(items.get(6)),
                }))
            }
            _ => Err(CodecError::UnknownKind),
        }
    }

    fn decode_object(
        &self,
        map: serde_json::Map<String, Value>,
    ) -> Result<TransportMessage, CodecError> {
        let kind = map
            .get("type")
            .and_then(Value::as_str)
            .ok_or(CodecError::Malformed("missing type"))?;
        match kind {
            "actionRequest" => {
                let type_id = required_str(map.get("typeId"), "typeId")?;
                let payload = map.get("payload").cloned().unwrap_or(Value::Null);
                let payload = self.expand(&type_id, payload);
                Ok(TransportMessage::ActionRequest {
                    request_id: required_str(map.get("requestId"), "requestId")?,
                    type_id,
                    payload,
                })
            }
            "actionResponse" => {
                let outcome = match map.get("error") {
                    Some(Value::String(reason)) => ActionOutcome::Err(reason.clone()),
                    _ => ActionOutcome::Ok(map.get("result").cloned().unwrap_or(Value::Null)),
                };
                Ok(TransportMessage::ActionResponse {
                    request_id: required_str(map.get("requestId"), "requestId")?,
                    type_id: None,
                    outcome,
                })
            }
            "event" => {
                let direction = map
                    .get("direction")
                    .and_then(Value::as_i64)
                    .and_then(EventDirection::from_wire)
                    .ok_or(CodecError::Malformed("bad event direction"))?;
                let name = required_str(map.get("name"), "name")?;
                let payload = map.get("payload").cloned().unwrap_or(Value::Null);
                let payload = self.expand(&name, payload);
                Ok(TransportMessage::Event {
                    direction,
                    name,
                    payload,
                })
            }
            "join" => Ok(TransportMessage::Join(JoinRequest {
                request_id: required_str(map.get("requestId"), "requestId")?,
                land_type: required_str(map.get("landType"), "landType")?,
                land_instance_id: optional_str(map.get("landInstanceId")),
                player_id: optional_str(map.get("playerId")),
                device_id: optional_str(map.get("deviceId")),
                metadata: decode_metadata(map.get("metadata"))?,
            })),
            "joinResponse" => Ok(TransportMessage::JoinResponse(JoinResponse {
                request_id: required_str(map.get("requestId"), "requestId")?,
                success: map
                    .get("success")
                    .and_then(Value::as_bool)
                    .ok_or(CodecError::Malformed("bad success flag"))?,
                player_id: optional_str(map.get("playerId")),
                land_id: optional_str(map.get("landId"))
                    .as_deref()
                    .and_then(LandId::parse),
                player_slot: map
                    .get("playerSlot")
                    .and_then(Value::as_u64)
                    .and_then(|slot| u16::try_from(slot).ok()),
                reason: optional_str(map.get("reason")),
            })),
            _ => Err(CodecError::UnknownKind),
        }
    }
}

fn decode_outcome(body: Value) -> ActionOutcome {
    if let Value::Object(map) = &body
        && map.len() == 1
        && let Some(Value::String(reason)) = map.get("error")
    {
        return ActionOutcome::Err(reason.clone());
    }
    ActionOutcome::Ok(body)
}

fn required_str(value: Option<&Value>, field: &'static str) -> Result<String, CodecError> {
    value
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(CodecError::Malformed(field))
}

fn optional_str(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

fn decode_metadata(
    value: Option<&Value>,
) -> Result<Option<BTreeMap<String, String>>, CodecError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => {
            let mut out = BTreeMap::new();
            for (key, entry) in map {
                let Value::String(text) = entry else {
                    return Err(CodecError::Malformed("metadata values must be strings"));
                };
                out.insert(key.clone(), text.clone());
            }
            Ok(Some(out))
        }
        Some(_) => Err(CodecError::Malformed("metadata must be an object")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_messages() -> Vec<TransportMessage> {
        vec![
            TransportMessage::ActionRequest {
                request_id: "r1".to_string(),
                type_id: "fire".to_string(),
                payload: json!({"at": [1, 2], "power": 3}),
            },
            TransportMessage::ActionResponse {
                request_id: "r1".to_string(),
                type_id: None,
                outcome: ActionOutcome::Ok(json!({"hit": true})),
            },
            TransportMessage::ActionResponse {
                request_id: "r2".to_string(),
                type_id: None,
                outcome: ActionOutcome::Err("out_of_range".to_string()),
            },
            TransportMessage::Event {
                direction: EventDirection::FromClient,
                name: "ping".to_string(),
                payload: json!({"nonce": 7}),
            },
            TransportMessage::Join(JoinRequest {
                request_id: "r3".to_string(),
                land_type: "arena".to_string(),
                land_instance_id: Some("i-1".to_string()),
                player_id: Some("p-1".to_string()),
                device_id: None,
                metadata: Some(BTreeMap::from([("team".to_string(), "red".to_string())])),
            }),
            TransportMessage::JoinResponse(JoinResponse {
                request_id: "r3".to_string(),
                success: true,
                player_id: Some("p-1".to_string()),
                land_id: Some(LandId::new("arena", "i-1")),
                player_slot: Some(0),
                reason: None,
            }),
        ]
    }

    #[test]
    fn when_messages_round_trip_through_every_encoding_then_they_are_unchanged() {
        for encoding in [
            WireEncoding::JsonObject,
            WireEncoding::JsonArray,
            WireEncoding::MessagePack,
        ] {
            let codec = TransportCodec::new(encoding);
            for message in sample_messages() {
                let frame = codec.encode(&message).expect("expected encode");
                let decoded = codec.decode(&frame).expect("expected decode");
                assert_eq!(decoded, message, "encoding {encoding:?}");
            }
        }
    }

    #[test]
    fn when_encoding_is_messagepack_then_frames_are_binary() {
        let codec = TransportCodec::new(WireEncoding::MessagePack);
        let frame = codec
            .encode(&sample_messages()[0])
            .expect("expected encode");
        assert!(matches!(frame, WireFrame::Binary(_)));
    }

    #[test]
    fn when_payload_compression_is_on_then_registered_payloads_become_positional() {
        let mut codec =
            TransportCodec::new(WireEncoding::JsonArray).with_payload_compression(true);
        codec.register_payload_fields("fire", &["power", "at"]);
        let message = TransportMessage::ActionRequest {
            request_id: "r1".to_string(),
            type_id: "fire".to_string(),
            payload: json!({"at": 4, "power": 9}),
        };
        let frame = codec.encode(&message).expect("expected encode");
        let WireFrame::Text(text) = &frame else {
            panic!("expected text frame");
        };
        // Fields travel in ASCII order: at, power.
        assert_eq!(text, r#"[101,"r1","fire",[4,9]]"#);
        let decoded = codec.decode(&frame).expect("expected decode");
        assert_eq!(decoded, message);
    }

    #[test]
    fn when_an_event_is_registered_then_array_forms_carry_its_opcode() {
        let mut codec = TransportCodec::new(WireEncoding::JsonArray);
        codec
            .register_event(EventDirection::FromServer, "kicked", 11)
            .expect("expected registration");
        let message = TransportMessage::Event {
            direction: EventDirection::FromServer,
            name: "kicked".to_string(),
            payload: Value::Null,
        };
        let frame = codec.encode(&message).expect("expected encode");
        let WireFrame::Text(text) = &frame else {
            panic!("expected text frame");
        };
        assert_eq!(text, "[103,1,11,null]");
        assert_eq!(codec.decode(&frame).expect("expected decode"), message);
    }

    #[test]
    fn when_an_unregistered_event_opcode_arrives_then_decode_reports_it() {
        let codec = TransportCodec::new(WireEncoding::JsonArray);
        let frame = WireFrame::Text("[103,1,42,null]".to_string());
        assert!(matches!(
            codec.decode(&frame),
            Err(CodecError::UnknownEventOpcode(42))
        ));
    }

    #[test]
    fn when_the_opcode_is_unknown_then_decode_distinguishes_it_from_garbage() {
        let codec = TransportCodec::new(WireEncoding::JsonArray);
        assert!(matches!(
            codec.decode(&WireFrame::Text("[999]".to_string())),
            Err(CodecError::UnknownKind)
        ));
        assert!(matches!(
            codec.decode(&WireFrame::Text("not json".to_string())),
            Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn when_the_handshake_frame_is_binary_then_decode_rejects_it() {
        let frame = WireFrame::Binary(bytes::Bytes::from_static(b"\x93\x01\x02\x03"));
        assert!(matches!(
            TransportCodec::decode_handshake(&frame),
            Err(CodecError::WrongFrameType)
        ));
    }

    #[test]
    fn when_a_join_arrives_in_array_form_with_nulls_then_optionals_are_none() {
        let frame = WireFrame::Text(
            r#"[104,"r1","basic-test",null,"player-1","dev-1",null]"#.to_string(),
        );
        let decoded = TransportCodec::decode_handshake(&frame).expect("expected decode");
        let TransportMessage::Join(join) = decoded else {
            panic!("expected join");
        };
        assert_eq!(join.land_type, "basic-test");
        assert_eq!(join.land_instance_id, None);
        assert_eq!(join.player_id.as_deref(), Some("player-1"));
        assert_eq!(join.device_id.as_deref(), Some("dev-1"));
        assert_eq!(join.metadata, None);
    }
}
