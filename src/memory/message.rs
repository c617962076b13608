//! Conversation entries held by the memory manager

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::ChatMessage;
use crate::protocol::InlineImage;

/// Speaker of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the rolling conversation
///
/// Role and pin state are fixed at construction. Text and image only change
/// when the pruning algorithm strips an image.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationMessage {
    role: Role,
    pinned: bool,
    text: String,
    image: Option<InlineImage>,
    created_at: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(
        role: Role,
        text: impl Into<String>,
        image: Option<InlineImage>,
        pinned: bool,
    ) -> Self {
        Self {
            role,
            pinned,
            text: text.into(),
            image,
            created_at: Utc::now(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn image(&self) -> Option<&InlineImage> {
        self.image.as_ref()
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Drop the image and prefix the text with `marker`
    pub(crate) fn forget_image(&mut self, marker: &str) -> bool {
        if self.image.take().is_none() {
            return false;
        }
        self.text = format!("{}{}", marker, self.text);
        true
    }

    /// Convert to the shape the model API expects
    pub fn to_chat_message(&self) -> ChatMessage {
        let text = self.text.clone();
        let message = match self.role {
            Role::System => ChatMessage::system(text),
            Role::User => ChatMessage::user(text),
            Role::Assistant => ChatMessage::assistant(text),
            Role::Tool => ChatMessage::tool(text),
        };
        match &self.image {
            Some(image) => message.with_image(image.base64()),
            None => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ImageFormat;

    #[test]
    fn test_forget_image() {
        let image = InlineImage::new(ImageFormat::Png, "AAAA");
        let mut message = ConversationMessage::new(Role::Tool, "plot", Some(image), false);
        assert!(message.forget_image("[gone] "));
        assert!(!message.has_image());
        assert_eq!(message.text(), "[gone] plot");

        // Second call is a no-op
        assert!(!message.forget_image("[gone] "));
        assert_eq!(message.text(), "[gone] plot");
    }

    #[test]
    fn test_to_chat_message() {
        let text_only = ConversationMessage::new(Role::User, "hi", None, false);
        let chat = text_only.to_chat_message();
        assert_eq!(chat.role, "user");
        assert!(chat.images.is_empty());

        let image = InlineImage::new(ImageFormat::Png, "data:image/png;base64,QUJD");
        let with_image = ConversationMessage::new(Role::Tool, "out", Some(image), false);
        let chat = with_image.to_chat_message();
        assert_eq!(chat.role, "tool");
        assert_eq!(chat.images, vec!["QUJD".to_string()]);

        let reply = ConversationMessage::new(Role::Assistant, "ok", None, false);
        assert_eq!(reply.to_chat_message().role, "assistant");
    }
}
