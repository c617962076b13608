//! Streaming chat client for Ollama's `/api/chat`

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

/// A message in a chat conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system", "user", "assistant", "tool"
    pub content: String,
    /// Base64 images attached to the message (no data URL header)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new("tool", content)
    }

    pub fn with_image(mut self, base64: impl Into<String>) -> Self {
        self.images.push(base64.into());
        self
    }
}

/// Error type for chat operations
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Provider error: {0}")]
    Provider(String),
}

/// Stream of text deltas from one model turn
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

/// A streaming text-generation service
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier used for logging and metrics
    fn model_name(&self) -> &str;

    /// Start a completion for `messages` and stream back the text
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<TokenStream, ChatError>;
}

/// One NDJSON line of a streamed `/api/chat` response
#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(default)]
    message: Option<StreamDelta>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: String,
}

/// Client for Ollama's /api/chat endpoint
#[derive(Clone)]
pub struct OllamaChatClient {
    base_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaChatClient {
    /// Create a new chat client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the Ollama server (e.g., "http://localhost:11434")
    /// * `model` - The model name (e.g., "qwen3")
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            temperature: 0.0,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LanguageModel for OllamaChatClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<TokenStream, ChatError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "options": {
                "temperature": self.temperature
            }
        });

        let response = self.client.post(self.endpoint()).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut bytes_stream = response.bytes_stream();

        // Network chunks do not line up with NDJSON lines, so buffer until '\n'
        let token_stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes_stream.next().await {
                match chunk {
                    Ok(bytes) => buffer.extend_from_slice(&bytes),
                    Err(e) => {
                        yield Err(ChatError::from(e));
                        return;
                    }
                }
                while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    match decode_line(&line) {
                        Ok(Some(token)) => yield Ok(token),
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
            match decode_line(&buffer) {
                Ok(Some(token)) => yield Ok(token),
                Ok(None) => {}
                Err(e) => yield Err(e),
            }
        };

        Ok(Box::pin(token_stream))
    }
}

/// Decode one NDJSON line into its text delta
fn decode_line(line: &[u8]) -> Result<Option<String>, ChatError> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let parsed: StreamLine = serde_json::from_str(text)?;
    if let Some(error) = parsed.error {
        return Err(ChatError::Provider(error));
    }
    Ok(parsed
        .message
        .map(|delta| delta.content)
        .filter(|content| !content.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_line() {
        let line = br#"{"model":"qwen3","message":{"role":"assistant","content":"Hel"},"done":false}"#;
        assert_eq!(decode_line(line).unwrap(), Some("Hel".to_string()));

        let done = br#"{"model":"qwen3","message":{"role":"assistant","content":""},"done":true}"#;
        assert_eq!(decode_line(done).unwrap(), None);

        assert_eq!(decode_line(b"  \n").unwrap(), None);
    }

    #[test]
    fn test_decode_line_errors() {
        assert!(matches!(
            decode_line(br#"{"error":"model not found"}"#),
            Err(ChatError::Provider(msg)) if msg == "model not found"
        ));
        assert!(matches!(decode_line(b"{oops"), Err(ChatError::Parse(_))));
    }

    #[test]
    fn test_chat_message_serialization() {
        let msg = ChatMessage::user("test message");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"user\""));
        assert!(json.contains("\"content\":\"test message\""));
        // images should be skipped when empty
        assert!(!json.contains("images"));

        let json = serde_json::to_string(&ChatMessage::tool("plot").with_image("QUJD")).unwrap();
        assert!(json.contains("\"images\":[\"QUJD\"]"));
    }

    #[test]
    fn test_endpoint_trims_slash() {
        let client = OllamaChatClient::new("http://localhost:11434/", "qwen3");
        assert_eq!(client.endpoint(), "http://localhost:11434/api/chat");
        assert_eq!(client.model_name(), "qwen3");
    }
}
