//! Inbound and outbound message shapes.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::WsError;
use crate::Result;

/// A message received from the transport.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text frame
    Text(String),
    /// Binary frame
    Binary(Vec<u8>),
}

impl Message {
    /// Returns the text content, if this is a text frame.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Deserialize the frame body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let value = match self {
            Self::Text(text) => serde_json::from_str(text)?,
            Self::Binary(bytes) => serde_json::from_slice(bytes)?,
        };
        Ok(value)
    }
}

/// An outbound payload.
///
/// Strings are transmitted verbatim, everything else is JSON-encoded first.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Json(Value),
}

impl Payload {
    /// Serialize any value into a payload. Values that serialize to a JSON string are sent as
    /// that string.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let value = serde_json::to_value(value).map_err(WsError::Serialize)?;
        Ok(Self::from(value))
    }

    /// Produce the text frame that goes over the wire.
    pub fn into_text(self) -> Result<String> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Json(value) => Ok(serde_json::to_string(&value).map_err(WsError::Serialize)?),
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        // A bare JSON string is still a string payload.
        match value {
            Value::String(text) => Self::Text(text),
            other => Self::Json(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn strings_are_sent_verbatim() {
        let payload = Payload::from("ping");
        assert_eq!(payload.into_text().unwrap(), "ping");

        let payload = Payload::from(json!("ping"));
        assert_eq!(payload.into_text().unwrap(), "ping");
    }

    #[test]
    fn values_are_json_encoded() {
        let payload = Payload::from(json!({ "type": "subscribe", "ids": [1, 2] }));
        let text = payload.into_text().unwrap();

        let decoded: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, json!({ "type": "subscribe", "ids": [1, 2] }));
    }

    #[test]
    fn json_payload_from_serializable() {
        let payload = Payload::json(&[1_u8, 2, 3]).unwrap();
        assert_eq!(payload.into_text().unwrap(), "[1,2,3]");

        let payload = Payload::json("ping").unwrap();
        assert_eq!(payload, Payload::Text("ping".to_owned()));
    }

    #[test]
    fn message_json_decodes_text_and_binary() {
        let text = Message::Text(r#"{"n":1}"#.to_owned());
        let binary = Message::Binary(br#"{"n":2}"#.to_vec());

        assert_eq!(text.json::<Value>().unwrap(), json!({ "n": 1 }));
        assert_eq!(binary.json::<Value>().unwrap(), json!({ "n": 2 }));
        assert_eq!(binary.as_text(), None);
    }
}
