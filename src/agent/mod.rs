//! Agent module for human-in-the-loop code execution
//!
//! The [`Orchestrator`] drives one agent through a task:
//!
//! ```text
//! Task → Orchestrator → LanguageModel (streamed, forwarded as ai_content)
//!             ↓
//!        CodeExtractor → fenced code blocks
//!             ↓
//!        code_permission request ←→ client (approve / deny / stop_*)
//!             ↓
//!        CodeExecutor → text / image events forwarded to the client
//!             ↓
//!        MemoryManager (bounded context) → next model turn or [STOP]
//! ```

pub mod config;
pub(crate) mod mailbox;
pub mod orchestrator;
pub mod state;

pub use config::AgentConfig;
pub use mailbox::Decision;
pub use orchestrator::{AgentError, Orchestrator};
pub use state::{OrchestratorState, StopFlags};
