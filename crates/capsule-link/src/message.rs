//! Message payload types.
//!
//! Incoming MESSAGE frames are decoded into [`InboundMessage`] values with a
//! JSON body. Decoding never panics and never tears down a subscription: a
//! malformed body becomes a [`MessageDecodeError`] handed to the callback.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{MessageDecodeError, RegistryError, RegistryResult};
use crate::stomp::Frame;
use crate::token::authorization_value;

/// Caller-supplied frame headers, kept in insertion order.
pub type Headers = IndexMap<String, String>;

/// The outcome of decoding one incoming message.
pub type MessageResult = Result<InboundMessage, MessageDecodeError>;

/// Callback invoked for every message delivered to a subscription.
pub type MessageCallback = Arc<dyn Fn(MessageResult) + Send + Sync>;

/// A decoded message delivered to a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Destination the message was published to.
    pub destination: String,
    /// Transport subscription id the server routed it through.
    pub subscription: String,
    /// Server-assigned message id, if any.
    pub message_id: Option<String>,
    /// All frame headers in wire order.
    pub headers: Vec<(String, String)>,
    /// Decoded body. An empty body decodes to `null`.
    pub body: serde_json::Value,
}

impl InboundMessage {
    /// Decode a MESSAGE frame.
    ///
    /// `destination` is used when the frame omits its own `destination`
    /// header.
    pub fn decode(frame: &Frame, destination: &str) -> MessageResult {
        let destination = frame.header("destination").unwrap_or(destination).to_string();

        let text = match frame.body_text() {
            Ok(text) => text,
            Err(e) => {
                let raw = String::from_utf8_lossy(&frame.body).into_owned();
                return Err(MessageDecodeError::new(destination, e.to_string(), raw));
            }
        };

        let body = if text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(text)
                .map_err(|e| MessageDecodeError::new(destination.clone(), e.to_string(), text))?
        };

        Ok(Self {
            subscription: frame.header("subscription").unwrap_or_default().to_string(),
            message_id: frame.header("message-id").map(str::to_string),
            headers: frame.headers.clone(),
            destination,
            body,
        })
    }

    /// Deserialize the body into a typed value.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, MessageDecodeError> {
        serde_json::from_value(self.body.clone()).map_err(|e| {
            MessageDecodeError::new(&self.destination, e.to_string(), self.body.to_string())
        })
    }

    /// Look up the first value of a header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Serialize an outgoing body to JSON text.
pub fn encode_body<T: Serialize + ?Sized>(body: &T) -> RegistryResult<String> {
    serde_json::to_string(body).map_err(|e| RegistryError::Encode(e.to_string()))
}

/// Merge caller headers with the default `Authorization` header.
///
/// A caller-supplied `Authorization` header (any case) is kept as is.
pub fn with_default_auth(headers: &Headers, token: &str) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if !headers.keys().any(|k| k.eq_ignore_ascii_case("authorization")) {
        merged.push(("Authorization".to_string(), authorization_value(token)));
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stomp::Command;
    use serde::Deserialize;

    fn message_frame(body: &str) -> Frame {
        Frame::new(Command::Message)
            .with_header("destination", "/topic/capsules")
            .with_header("subscription", "sub-3")
            .with_header("message-id", "m-1")
            .with_body(body)
    }

    #[test]
    fn test_decode_json_body() {
        let msg = InboundMessage::decode(&message_frame(r#"{"id":42}"#), "/fallback").unwrap();
        assert_eq!(msg.destination, "/topic/capsules");
        assert_eq!(msg.subscription, "sub-3");
        assert_eq!(msg.message_id.as_deref(), Some("m-1"));
        assert_eq!(msg.body["id"], 42);
    }

    #[test]
    fn test_decode_empty_body_is_null() {
        let msg = InboundMessage::decode(&message_frame(""), "/fallback").unwrap();
        assert!(msg.body.is_null());
    }

    #[test]
    fn test_decode_malformed_body() {
        let err = InboundMessage::decode(&message_frame("{not json"), "/fallback").unwrap_err();
        assert_eq!(err.destination, "/topic/capsules");
        assert_eq!(err.raw, "{not json");
    }

    #[test]
    fn test_decode_uses_fallback_destination() {
        let frame = Frame::new(Command::Message).with_body("1");
        let msg = InboundMessage::decode(&frame, "/topic/fallback").unwrap();
        assert_eq!(msg.destination, "/topic/fallback");
    }

    #[test]
    fn test_typed_json() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Comment {
            id: u32,
        }
        let msg = InboundMessage::decode(&message_frame(r#"{"id":7}"#), "/f").unwrap();
        assert_eq!(msg.json::<Comment>().unwrap(), Comment { id: 7 });
        assert!(msg.json::<Vec<u8>>().is_err());
    }

    #[test]
    fn test_encode_body() {
        let body = serde_json::json!({"capsuleId": 9});
        assert_eq!(encode_body(&body).unwrap(), r#"{"capsuleId":9}"#);
    }

    #[test]
    fn test_default_auth_added() {
        let mut headers = Headers::new();
        headers.insert("x-trace".to_string(), "1".to_string());
        let merged = with_default_auth(&headers, "a.b.c");
        assert_eq!(
            merged,
            vec![
                ("x-trace".to_string(), "1".to_string()),
                ("Authorization".to_string(), "Bearer a.b.c".to_string()),
            ]
        );
    }

    #[test]
    fn test_caller_auth_kept() {
        let mut headers = Headers::new();
        headers.insert("authorization".to_string(), "Bearer other".to_string());
        let merged = with_default_auth(&headers, "a.b.c");
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].1, "Bearer other");
    }
}
