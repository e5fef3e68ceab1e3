// Opaque identifiers. Equality is byte-exact; none of these carry meaning
// beyond what the transport and rules assign to them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one live connection. A new one is minted per socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable client device key. Survives reconnects of the same client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical actor inside a land. One player may own several sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A land instance key: the land type plus the instance within that type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LandId {
    land_type: String,
    instance_id: String,
}

impl LandId {
    pub fn new(land_type: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            land_type: land_type.into(),
            instance_id: instance_id.into(),
        }
    }

    pub fn land_type(&self) -> &str {
        &self.land_type
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Parses the `type:instance` wire form produced by `Display`.
    pub fn parse(value: &str) -> Option<Self> {
        let (land_type, instance_id) = value.split_once(':')?;
        if land_type.is_empty() || instance_id.is_empty() {
            return None;
        }
        Some(Self::new(land_type, instance_id))
    }
}

impl fmt::Display for LandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.land_type, self.instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn when_land_id_round_trips_through_display_then_parse_recovers_it() {
        let id = LandId::new("arena", "7c9a");
        let parsed = LandId::parse(&id.to_string()).expect("expected parseable land id");
        assert_eq!(parsed, id);
    }

    #[test]
    fn when_land_id_wire_form_is_missing_a_part_then_parse_rejects_it() {
        assert!(LandId::parse("arena").is_none());
        assert!(LandId::parse("arena:").is_none());
        assert!(LandId::parse(":7c9a").is_none());
    }
}
