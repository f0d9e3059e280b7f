use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::WebSocketError;

/// A decoded inbound frame: `{"Channel": .., "RequestId": .., "Message": {..}}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "Channel", alias = "channel")]
    pub channel: String,
    #[serde(
        rename = "RequestId",
        alias = "requestId",
        alias = "request_id",
        default,
        deserialize_with = "null_as_default"
    )]
    pub request_id: String,
    #[serde(rename = "Message", alias = "message", default, deserialize_with = "null_as_default")]
    pub message: Map<String, Value>,
}

/// Treats an explicit `null` like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl InboundEnvelope {
    pub fn decode(bytes: &[u8]) -> Result<Self, WebSocketError> {
        serde_json::from_slice(bytes).map_err(|e| WebSocketError::InvalidFormat(e.to_string()))
    }
}

/// Outbound frame: `{"channel": .., "message": ..}`.
#[derive(Serialize)]
pub struct OutboundEnvelope<'a, T: Serialize + ?Sized> {
    pub channel: &'a str,
    pub message: &'a T,
}

impl<'a, T: Serialize + ?Sized> OutboundEnvelope<'a, T> {
    pub fn new(channel: &'a str, message: &'a T) -> Self {
        Self { channel, message }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WebSocketError> {
        serde_json::to_vec(self).map_err(|e| WebSocketError::EncodeError(e.to_string()))
    }
}
