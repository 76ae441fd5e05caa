use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The routable unit consumed from the broker.
///
/// `payload` is kept as an untyped JSON value: handlers own the decoding of
/// their own payload shapes, so the router never needs to know about them.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub message_type: String,
    pub payload: Value,
    pub id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Envelope {
    pub fn new(message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
            id: None,
            timestamp: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Text handed to handlers. String payloads are passed through as-is,
    /// anything else is rendered as compact JSON.
    pub fn payload_text(&self) -> Cow<'_, str> {
        match &self.payload {
            Value::String(s) => Cow::Borrowed(s.as_str()),
            other => Cow::Owned(other.to_string()),
        }
    }
}

/// Field-name mapping applied to every envelope field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldNaming {
    /// Names exactly as declared by the envelope contract: `MessageType`, `Payload`, `Id`, `Timestamp`.
    Declared,
    /// Lower camel case of the declared names: `messageType`, `payload`, `id`, `timestamp`.
    #[default]
    CamelCase,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseFieldNamingError(String);

impl fmt::Display for ParseFieldNamingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} is not a valid field naming convention", self.0)
    }
}

impl std::error::Error for ParseFieldNamingError {}

impl FromStr for FieldNaming {
    type Err = ParseFieldNamingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_ref() {
            "declared" | "exact" => Ok(FieldNaming::Declared),
            "camel" | "camelcase" | "camel_case" => Ok(FieldNaming::CamelCase),
            invalid => Err(ParseFieldNamingError(invalid.to_owned())),
        }
    }
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("received empty payload")]
    Empty,
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeclaredEnvelope {
    message_type: String,
    payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire_timestamp::deserialize"
    )]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CamelCaseEnvelope {
    message_type: String,
    payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire_timestamp::deserialize"
    )]
    timestamp: Option<DateTime<Utc>>,
}

mod wire_timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de, Deserialize, Deserializer};

    /// Accepts RFC 3339 with an offset, or an offset-less ISO 8601 date-time
    /// which is read as UTC.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(raw) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };

        if let Ok(timestamp) = raw.parse::<DateTime<Utc>>() {
            return Ok(Some(timestamp));
        }

        raw.parse::<NaiveDateTime>()
            .map(|naive| Some(naive.and_utc()))
            .map_err(|e| de::Error::custom(format!("invalid timestamp {raw:?}: {e}")))
    }
}

macro_rules! wire_conversions {
    ($wire:ident) => {
        impl From<$wire> for Envelope {
            fn from(wire: $wire) -> Self {
                Envelope {
                    message_type: wire.message_type,
                    payload: wire.payload,
                    id: wire.id,
                    timestamp: wire.timestamp,
                }
            }
        }

        impl From<&Envelope> for $wire {
            fn from(envelope: &Envelope) -> Self {
                $wire {
                    message_type: envelope.message_type.clone(),
                    payload: envelope.payload.clone(),
                    id: envelope.id.clone(),
                    timestamp: envelope.timestamp,
                }
            }
        }
    };
}

wire_conversions!(DeclaredEnvelope);
wire_conversions!(CamelCaseEnvelope);

/// Decodes envelopes from raw record bytes using one naming convention.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec {
    naming: FieldNaming,
}

impl EnvelopeCodec {
    pub fn new(naming: FieldNaming) -> Self {
        Self { naming }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Envelope, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        let decoded = match self.naming {
            FieldNaming::Declared => {
                serde_json::from_slice::<DeclaredEnvelope>(bytes).map(Envelope::from)
            }
            FieldNaming::CamelCase => {
                serde_json::from_slice::<CamelCaseEnvelope>(bytes).map(Envelope::from)
            }
        };

        decoded.map_err(DecodeError::Malformed)
    }

    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, serde_json::Error> {
        match self.naming {
            FieldNaming::Declared => serde_json::to_vec(&DeclaredEnvelope::from(envelope)),
            FieldNaming::CamelCase => serde_json::to_vec(&CamelCaseEnvelope::from(envelope)),
        }
    }
}
