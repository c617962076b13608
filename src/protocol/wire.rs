//! JSON wire form of protocol messages
//!
//! Every message travels as a flat `{agent, type, content}` object, for example
//! `{"agent": "CodeAgent", "type": "request", "content": "approve"}`.

use serde::{Deserialize, Serialize};

use super::message::{ControlKind, ControlSignal, OutboundMessage};

/// Error type for decoding wire messages
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unexpected message type '{0}' (expected 'request')")]
    UnexpectedType(String),
    #[error("Unknown request '{0}'")]
    UnknownRequest(String),
}

/// Flat JSON envelope used on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub agent: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

impl WireMessage {
    pub fn to_json(&self) -> String {
        // A struct of three strings always serializes
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<&OutboundMessage> for WireMessage {
    fn from(message: &OutboundMessage) -> Self {
        Self {
            agent: message.agent.clone(),
            kind: message.event.kind().to_string(),
            content: message.event.content(),
        }
    }
}

impl From<&ControlSignal> for WireMessage {
    fn from(signal: &ControlSignal) -> Self {
        Self {
            agent: signal.agent.clone(),
            kind: "request".to_string(),
            content: signal.kind.as_str().to_string(),
        }
    }
}

impl TryFrom<WireMessage> for ControlSignal {
    type Error = ProtocolError;

    fn try_from(message: WireMessage) -> Result<Self, Self::Error> {
        if message.kind != "request" {
            return Err(ProtocolError::UnexpectedType(message.kind));
        }
        let kind = ControlKind::parse(&message.content)
            .ok_or(ProtocolError::UnknownRequest(message.content))?;
        Ok(ControlSignal::new(message.agent, kind))
    }
}

/// Decode an inbound control signal from its JSON text
pub fn decode_signal(json: &str) -> Result<ControlSignal, ProtocolError> {
    let message: WireMessage = serde_json::from_str(json)?;
    ControlSignal::try_from(message)
}

/// Encode an outbound message as JSON text
pub fn encode_message(message: &OutboundMessage) -> String {
    WireMessage::from(message).to_json()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{AiContent, OutboundEvent, Status};

    #[test]
    fn test_decode_signal() {
        let signal =
            decode_signal(r#"{"agent":"CodeAgent","type":"request","content":"stop_agent"}"#)
                .unwrap();
        assert_eq!(signal, ControlSignal::stop_agent("CodeAgent"));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(matches!(
            decode_signal(r#"{"agent":"a","type":"status","content":"approve"}"#),
            Err(ProtocolError::UnexpectedType(_))
        ));
        assert!(matches!(
            decode_signal(r#"{"agent":"a","type":"request","content":"maybe"}"#),
            Err(ProtocolError::UnknownRequest(_))
        ));
        assert!(matches!(
            decode_signal(r#"{"agent":"a"}"#),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_encode_outbound() {
        let json = encode_message(&OutboundMessage::new(
            "CodeAgent",
            OutboundEvent::Status(Status::Block(2)),
        ));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["agent"], "CodeAgent");
        assert_eq!(value["type"], "status");
        assert_eq!(value["content"], "[BLOCK 2]");

        let chunk = WireMessage::from(&OutboundMessage::new(
            "CodeAgent",
            OutboundEvent::AiContent(AiContent::Chunk("hello".to_string())),
        ));
        assert_eq!(chunk.kind, "ai_content");
        assert_eq!(chunk.content, "hello");
    }
}
