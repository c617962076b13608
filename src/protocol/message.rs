//! Typed messages exchanged over the inbound and outbound queues

use std::fmt;

use serde::{Deserialize, Serialize};

/// Control request sent by the client to an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    /// Run the code block that is awaiting confirmation
    Approve,
    /// Skip the code block that is awaiting confirmation
    Deny,
    /// Stop consuming the code block that is currently executing
    StopCode,
    /// Abandon the whole task
    StopAgent,
}

impl ControlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlKind::Approve => "approve",
            ControlKind::Deny => "deny",
            ControlKind::StopCode => "stop_code",
            ControlKind::StopAgent => "stop_agent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "approve" => Some(ControlKind::Approve),
            "deny" => Some(ControlKind::Deny),
            "stop_code" => Some(ControlKind::StopCode),
            "stop_agent" => Some(ControlKind::StopAgent),
            _ => None,
        }
    }

    /// Stop requests are recorded as sticky flags rather than consumed as decisions
    pub fn is_stop(&self) -> bool {
        matches!(self, ControlKind::StopCode | ControlKind::StopAgent)
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A control signal addressed to one agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlSignal {
    /// Identifier of the agent this signal is meant for
    pub agent: String,
    pub kind: ControlKind,
}

impl ControlSignal {
    pub fn new(agent: impl Into<String>, kind: ControlKind) -> Self {
        Self {
            agent: agent.into(),
            kind,
        }
    }

    pub fn approve(agent: impl Into<String>) -> Self {
        Self::new(agent, ControlKind::Approve)
    }

    pub fn deny(agent: impl Into<String>) -> Self {
        Self::new(agent, ControlKind::Deny)
    }

    pub fn stop_code(agent: impl Into<String>) -> Self {
        Self::new(agent, ControlKind::StopCode)
    }

    pub fn stop_agent(agent: impl Into<String>) -> Self {
        Self::new(agent, ControlKind::StopAgent)
    }

    pub fn is_for(&self, agent: &str) -> bool {
        self.agent == agent
    }
}

/// Encoding of an inline image payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/png" => Some(ImageFormat::Png),
            "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }
}

/// A base64 image attached to execution output or a conversation message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineImage {
    pub format: ImageFormat,
    /// Base64 data, optionally prefixed with a `data:<mime>;base64,` header
    pub data: String,
}

impl InlineImage {
    pub fn new(format: ImageFormat, data: impl Into<String>) -> Self {
        Self {
            format,
            data: data.into(),
        }
    }

    /// Parse a `data:image/png;base64,...` URL
    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (mime, payload) = rest.split_once(";base64,")?;
        let format = ImageFormat::from_mime(mime)?;
        Some(Self::new(format, payload))
    }

    /// The raw base64 payload without any data URL header
    pub fn base64(&self) -> &str {
        match self.data.split_once(";base64,") {
            Some((header, payload)) if header.starts_with("data:") => payload,
            _ => &self.data,
        }
    }
}

/// Lifecycle markers sent with `type: "status"`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Start,
    Stop,
    /// Announces the code block that the next permission request refers to
    Block(usize),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Start => f.write_str("[START]"),
            Status::Stop => f.write_str("[STOP]"),
            Status::Block(index) => write!(f, "[BLOCK {}]", index),
        }
    }
}

/// Streamed model output sent with `type: "ai_content"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiContent {
    Start,
    Chunk(String),
    End,
}

impl AiContent {
    pub fn as_content(&self) -> &str {
        match self {
            AiContent::Start => "[START]",
            AiContent::Chunk(text) => text,
            AiContent::End => "[END]",
        }
    }
}

/// Everything the orchestrator can tell its client
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    Status(Status),
    AiContent(AiContent),
    /// A confirmation is pending for the most recently announced block
    PermissionRequest,
    /// Execution output text
    Text(String),
    /// Execution output image
    Image(InlineImage),
    /// A recoverable error, surfaced before the loop continues
    Response(String),
    /// Something needs a human decision beyond approve/deny
    Escalation(String),
}

impl OutboundEvent {
    /// Value of the wire `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::Status(_) => "status",
            OutboundEvent::AiContent(_) => "ai_content",
            OutboundEvent::PermissionRequest => "request",
            OutboundEvent::Text(_) => "text",
            OutboundEvent::Image(image) => image.format.mime(),
            OutboundEvent::Response(_) => "response",
            OutboundEvent::Escalation(_) => "escalation",
        }
    }

    /// Value of the wire `content` field
    pub fn content(&self) -> String {
        match self {
            OutboundEvent::Status(status) => status.to_string(),
            OutboundEvent::AiContent(content) => content.as_content().to_string(),
            OutboundEvent::PermissionRequest => "code_permission".to_string(),
            OutboundEvent::Text(text)
            | OutboundEvent::Response(text)
            | OutboundEvent::Escalation(text) => text.clone(),
            OutboundEvent::Image(image) => image.base64().to_string(),
        }
    }
}

/// An event tagged with the agent that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub agent: String,
    pub event: OutboundEvent,
}

impl OutboundMessage {
    pub fn new(agent: impl Into<String>, event: OutboundEvent) -> Self {
        Self {
            agent: agent.into(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_rendering() {
        assert_eq!(Status::Start.to_string(), "[START]");
        assert_eq!(Status::Stop.to_string(), "[STOP]");
        assert_eq!(Status::Block(3).to_string(), "[BLOCK 3]");
    }

    #[test]
    fn test_control_kind_parse() {
        assert_eq!(ControlKind::parse("stop_code"), Some(ControlKind::StopCode));
        assert_eq!(ControlKind::parse("approve"), Some(ControlKind::Approve));
        assert_eq!(ControlKind::parse("APPROVE"), None);
        assert!(ControlKind::StopAgent.is_stop());
        assert!(!ControlKind::Deny.is_stop());
    }

    #[test]
    fn test_image_data_url() {
        let image = InlineImage::from_data_url("data:image/jpeg;base64,AAAA").unwrap();
        assert_eq!(image.format, ImageFormat::Jpeg);
        assert_eq!(image.base64(), "AAAA");

        let raw = InlineImage::new(ImageFormat::Png, "BBBB");
        assert_eq!(raw.base64(), "BBBB");
        assert!(InlineImage::from_data_url("data:text/plain;base64,AAAA").is_none());
    }

    #[test]
    fn test_event_kinds() {
        let image = OutboundEvent::Image(InlineImage::new(ImageFormat::Png, "x"));
        assert_eq!(image.kind(), "image/png");
        assert_eq!(OutboundEvent::PermissionRequest.content(), "code_permission");
        assert_eq!(
            OutboundEvent::AiContent(AiContent::End).content(),
            "[END]"
        );
    }
}
