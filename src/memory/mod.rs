//! Bounded conversation memory
//!
//! The memory manager owns everything that is sent to the language model:
//!
//! ```text
//! short-term: system prompt (pinned) + rolling history
//!             └─ pruned after every append: visual forgetting, then token window
//! long-term:  insights (topic → knowledge), persisted as JSON, never pruned
//! ```

pub mod insights;
pub mod manager;
pub mod message;
pub mod tokens;

pub use insights::InsightStore;
pub use manager::{MemoryConfig, MemoryManager, IMAGE_REMOVED_MARKER, RECALL_HEADER};
pub use message::{ConversationMessage, Role};
pub use tokens::{CharRatioEstimator, TokenEstimator};
