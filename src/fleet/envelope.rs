//! Addressed command envelopes on the shared command queue.
//!
//! The server publishes every command for every client on one outbound
//! queue (`command.qo`). The relay delivers that queue to all
//! subscribers, so each receiver must filter on `_target` and drop
//! everything else without side effects.
//!
//! Wire shape (JSON object):
//!
//! ```text
//! { "_target": "dev:1234", "_type": "relay", "relay": 1, "on": true }
//!   └──── addressing ────┘  └── kind ──┘    └──── payload fields ───┘
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::fleet::identity::DeviceId;

pub const TARGET_KEY: &str = "_target";
pub const TYPE_KEY: &str = "_type";

/// Free-form payload fields carried next to the addressing keys.
pub type Payload = Map<String, Value>;

/// Command kinds understood by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Config,
    Relay,
    SerialRequest,
    LocationRequest,
}

impl CommandKind {
    pub const ALL: [Self; 4] = [
        Self::Config,
        Self::Relay,
        Self::SerialRequest,
        Self::LocationRequest,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Relay => "relay",
            Self::SerialRequest => "serial_request",
            Self::LocationRequest => "location_request",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    pub target: DeviceId,
    pub kind: CommandKind,
    pub payload: Payload,
}

impl CommandEnvelope {
    pub fn new(target: DeviceId, kind: CommandKind) -> Self {
        Self {
            target,
            kind,
            payload: Payload::new(),
        }
    }

    /// Build an envelope whose payload is the serialized form of `body`.
    /// `body` must serialize to a JSON object.
    pub fn with_body<T: Serialize>(
        target: DeviceId,
        kind: CommandKind,
        body: &T,
    ) -> Result<Self, ProtocolError> {
        match serde_json::to_value(body).map_err(|_| ProtocolError::Malformed)? {
            Value::Object(payload) => Ok(Self {
                target,
                kind,
                payload,
            }),
            _ => Err(ProtocolError::Malformed),
        }
    }

    /// Deserialize the payload fields into a typed body.
    pub fn body<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(Value::Object(self.payload.clone()))
            .map_err(|_| ProtocolError::Malformed)
    }
}

/// Encode into the wire document. Payload keys that collide with the
/// addressing keys are refused rather than silently overwritten.
pub fn encode(envelope: &CommandEnvelope) -> Result<Value, ProtocolError> {
    if envelope.payload.contains_key(TARGET_KEY) || envelope.payload.contains_key(TYPE_KEY) {
        return Err(ProtocolError::ReservedKey);
    }
    let mut doc = Map::new();
    doc.insert(
        TARGET_KEY.to_owned(),
        Value::String(envelope.target.as_str().to_owned()),
    );
    doc.insert(
        TYPE_KEY.to_owned(),
        Value::String(envelope.kind.as_str().to_owned()),
    );
    for (k, v) in &envelope.payload {
        doc.insert(k.clone(), v.clone());
    }
    Ok(Value::Object(doc))
}

/// Decode a wire document. Does **not** filter on target; see
/// [`decode_for`].
pub fn decode(doc: &Value) -> Result<CommandEnvelope, ProtocolError> {
    let obj = doc.as_object().ok_or(ProtocolError::Malformed)?;

    let target = obj
        .get(TARGET_KEY)
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingField(TARGET_KEY))?;
    let target = DeviceId::new(target)?;

    let kind = obj
        .get(TYPE_KEY)
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingField(TYPE_KEY))?;
    let kind = CommandKind::parse(kind).ok_or(ProtocolError::UnknownType)?;

    let payload = obj
        .iter()
        .filter(|(k, _)| k.as_str() != TARGET_KEY && k.as_str() != TYPE_KEY)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(CommandEnvelope {
        target,
        kind,
        payload,
    })
}

/// Decode and keep only envelopes addressed to `me`.
pub fn decode_for(doc: &Value, me: &DeviceId) -> Result<CommandEnvelope, ProtocolError> {
    // Cheap pre-check so foreign envelopes are dropped before payload copy.
    match doc.get(TARGET_KEY).and_then(Value::as_str) {
        Some(t) if t != me.as_str() => return Err(ProtocolError::WrongTarget),
        _ => {}
    }
    let env = decode(doc)?;
    if env.target != *me {
        return Err(ProtocolError::WrongTarget);
    }
    Ok(env)
}
