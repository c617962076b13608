//! Language model integration
//!
//! The orchestrator only sees the [`LanguageModel`] trait: hand it the
//! materialized conversation, get back a stream of text chunks.
//! [`OllamaChatClient`] implements it against Ollama's `/api/chat` endpoint.

pub mod client;
pub mod prompt;

pub use client::{ChatError, ChatMessage, LanguageModel, OllamaChatClient, TokenStream};
pub use prompt::{default_system_prompt, DEFAULT_SYSTEM_PROMPT};
