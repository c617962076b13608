//! codeagent - human-in-the-loop code execution agent with bounded memory
//!
//! This library drives a language model through a plan → confirm → execute →
//! observe loop. Generated code blocks are only executed after a client
//! approves them over a typed message protocol, and the conversation sent to
//! the model is kept inside a token budget by the memory manager.
//!
//! # Modules
//!
//! - `agent` - the task orchestrator (state machine, confirmation protocol, stop handling)
//! - `memory` - bounded conversation memory, pruning, and the insight store
//! - `protocol` - inbound/outbound message types, wire format, channels, routing
//! - `llm` - streaming language model client (Ollama `/api/chat`)
//! - `executor` - code executor interface and the local process executor
//! - `extract` - fenced code block extraction from model output
//! - `metrics` - Prometheus metrics for observability
//! - `telemetry` - tracing subscriber and optional OTLP export
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use codeagent::{channel_pair, AgentConfig, LocalExecutor, OllamaChatClient, Orchestrator};
//!
//! let (client, agent) = channel_pair();
//! let model = Arc::new(OllamaChatClient::new("http://localhost:11434", "qwen3"));
//! let executor = Arc::new(LocalExecutor::default());
//! let orchestrator = Orchestrator::new(AgentConfig::default(), model, executor);
//! let handle = orchestrator.spawn("list the files in /tmp", agent.inbound, agent.outbound);
//! ```

pub mod agent;
pub mod executor;
pub mod extract;
pub mod llm;
pub mod memory;
pub mod metrics;
pub mod protocol;
pub mod telemetry;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentConfig, AgentError, Orchestrator, OrchestratorState};
pub use executor::{CodeExecutor, Execution, ExecutionEvent, LocalExecutor, LocalExecutorConfig};
pub use extract::{CodeBlock, CodeExtractor, MarkdownExtractor};
pub use llm::{ChatMessage, LanguageModel, OllamaChatClient};
pub use memory::{MemoryConfig, MemoryManager, Role};
pub use protocol::{
    channel_pair, ControlKind, ControlSignal, Inbound, OutboundEvent, OutboundMessage,
    SignalRouter,
};
