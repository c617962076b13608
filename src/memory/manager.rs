//! Memory manager - the rolling conversation sent to the model
//!
//! # Pruning
//!
//! Runs after every [`MemoryManager::append`], in two phases:
//!
//! 1. **Visual forgetting**: when more than `keep_last_images` messages carry
//!    an image, the oldest ones lose their image and get
//!    [`IMAGE_REMOVED_MARKER`] prefixed to their text.
//! 2. **Token window**: while the estimated history size exceeds
//!    `max_tokens` and more than one message remains, the oldest non-pinned
//!    message (never the latest) is evicted. If everything but the latest is
//!    pinned, the oldest message goes as a last resort so the loop always
//!    terminates.
//!
//! The system prompt is held outside the history and is never pruned.

use std::path::PathBuf;

use tracing::debug;

use super::insights::InsightStore;
use super::message::{ConversationMessage, Role};
use super::tokens::{CharRatioEstimator, TokenEstimator};
use crate::llm::ChatMessage;
use crate::metrics::PRUNED_MESSAGES;
use crate::protocol::InlineImage;

/// Prefix added to a message whose image was forgotten
pub const IMAGE_REMOVED_MARKER: &str = "[Image Removed] ";

/// Label of the insight block appended to the system prompt
pub const RECALL_HEADER: &str = "[Recalled experience]";

/// Configuration for the memory manager
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Token budget for the rolling history
    pub max_tokens: usize,
    /// Number of most recent image-bearing messages that keep their image
    pub keep_last_images: usize,
    /// Estimated token cost of one inline image
    pub image_token_cost: usize,
    /// Directory for the insight file (in-memory only if None)
    pub insights_dir: Option<PathBuf>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_tokens: 8000,
            keep_last_images: 2,
            image_token_cost: 1100,
            insights_dir: Some(PathBuf::from("./memory_storage")),
        }
    }
}

/// Short-term conversation plus long-term insights
pub struct MemoryManager {
    config: MemoryConfig,
    system: Option<ConversationMessage>,
    history: Vec<ConversationMessage>,
    insights: InsightStore,
    estimator: Box<dyn TokenEstimator>,
}

impl MemoryManager {
    /// Create a memory manager for `agent`, loading its saved insights
    pub fn new(agent: &str, config: MemoryConfig) -> Self {
        let insights = match &config.insights_dir {
            Some(dir) => InsightStore::open(dir, agent),
            None => InsightStore::in_memory(),
        };
        Self {
            config,
            system: None,
            history: Vec::new(),
            insights,
            estimator: Box::new(CharRatioEstimator::default()),
        }
    }

    /// Replace the token estimator (e.g. with a model-aware tokenizer)
    pub fn with_estimator(mut self, estimator: impl TokenEstimator + 'static) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Set the single pinned system message
    pub fn set_system_prompt(&mut self, text: impl Into<String>) {
        self.system = Some(ConversationMessage::new(Role::System, text, None, true));
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system.as_ref().map(ConversationMessage::text)
    }

    /// Add a message to the history and prune
    pub fn append(
        &mut self,
        role: Role,
        text: impl Into<String>,
        image: Option<InlineImage>,
        pinned: bool,
    ) {
        self.history
            .push(ConversationMessage::new(role, text, image, pinned));
        self.prune();
    }

    /// Upsert a long-term insight (persisted best effort)
    pub fn record_insight(&mut self, topic: impl Into<String>, knowledge: impl Into<String>) {
        self.insights.record(topic, knowledge);
    }

    pub fn insights(&self) -> &InsightStore {
        &self.insights
    }

    /// Build the message list for the next model call
    ///
    /// The system message comes first, carrying the rendered insights; the
    /// retained history follows in insertion order.
    pub fn materialize_context(&self) -> Vec<ChatMessage> {
        let mut context = Vec::with_capacity(self.history.len() + 1);
        if let Some(system) = self.render_system() {
            context.push(ChatMessage::system(system));
        }
        context.extend(self.history.iter().map(ConversationMessage::to_chat_message));
        context
    }

    /// Forget the conversation, keep the system prompt and insights
    pub fn reset_short_term(&mut self) {
        self.history.clear();
    }

    /// Keep the first message, pinned messages, and the last `keep_recent`
    ///
    /// Returns the number of messages removed.
    pub fn compact(&mut self, keep_recent: usize) -> usize {
        let len = self.history.len();
        if len <= keep_recent + 1 {
            return 0;
        }
        let cutoff = len - keep_recent;
        let mut position = 0;
        self.history.retain(|message| {
            let keep = position == 0 || position >= cutoff || message.is_pinned();
            position += 1;
            keep
        });
        let removed = len - self.history.len();
        if removed > 0 {
            PRUNED_MESSAGES
                .with_label_values(&["compact"])
                .inc_by(removed as u64);
            debug!(removed, remaining = self.history.len(), "Compacted history");
        }
        removed
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Estimated size of the history as counted by the token window
    pub fn estimated_tokens(&self) -> usize {
        self.history.iter().map(|m| self.message_cost(m)).sum()
    }

    fn message_cost(&self, message: &ConversationMessage) -> usize {
        let image = if message.has_image() {
            self.config.image_token_cost
        } else {
            0
        };
        self.estimator.estimate(message.text()) + image
    }

    fn render_system(&self) -> Option<String> {
        let base = self.system.as_ref().map(ConversationMessage::text);
        match (base, self.insights.render()) {
            (Some(base), Some(recalled)) => {
                Some(format!("{}\n\n{}:\n{}", base, RECALL_HEADER, recalled))
            }
            (None, Some(recalled)) => Some(format!("{}:\n{}", RECALL_HEADER, recalled)),
            (Some(base), None) => Some(base.to_string()),
            (None, None) => None,
        }
    }

    fn prune(&mut self) {
        let forgotten = forget_old_images(&mut self.history, self.config.keep_last_images);
        if forgotten > 0 {
            PRUNED_MESSAGES
                .with_label_values(&["image"])
                .inc_by(forgotten as u64);
        }

        let mut total = self.estimated_tokens();
        let mut evicted = 0;
        while total > self.config.max_tokens && self.history.len() > 1 {
            let last = self.history.len() - 1;
            // Last resort when everything before the latest message is pinned
            let index = self.history[..last]
                .iter()
                .position(|m| !m.is_pinned())
                .unwrap_or(0);
            let removed = self.history.remove(index);
            total = total.saturating_sub(self.message_cost(&removed));
            evicted += 1;
        }
        if evicted > 0 {
            PRUNED_MESSAGES
                .with_label_values(&["window"])
                .inc_by(evicted as u64);
            debug!(
                evicted,
                remaining = self.history.len(),
                tokens = total,
                "Token window pruned history"
            );
        }
    }
}

/// Strip images from all but the `keep` most recent image-bearing messages
fn forget_old_images(history: &mut [ConversationMessage], keep: usize) -> usize {
    let with_images = history.iter().filter(|m| m.has_image()).count();
    if with_images <= keep {
        return 0;
    }
    let mut remaining = with_images - keep;
    for message in history.iter_mut() {
        if remaining == 0 {
            break;
        }
        if message.forget_image(IMAGE_REMOVED_MARKER) {
            remaining -= 1;
        }
    }
    with_images - keep
}
