//! Orchestrator - the plan → confirm → execute → observe loop
//!
//! One task runs as follows:
//!
//! ```text
//! [START] → description (pinned) → model turn ──► no code blocks ──► [STOP]
//!                  ▲                    │
//!                  │                    ▼ for each block
//!                  │     [BLOCK i] + code_permission request
//!                  │          │ approve           │ deny / timeout
//!                  │          ▼                   ▼
//!                  │     execute + drain      rejection note
//!                  │          │                   │
//!                  └──────────┴───────────────────┘
//! ```
//!
//! stop_code and stop_agent are sticky flags, checked before every model
//! turn and before every read of execution output.

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::config::AgentConfig;
use super::mailbox::{Decision, Mailbox, Outbox};
use super::state::{OrchestratorState, StopFlags};
use crate::executor::{CodeExecutor, ExecutionEvent};
use crate::extract::{CodeBlock, CodeExtractor, MarkdownExtractor};
use crate::llm::{default_system_prompt, ChatError, ChatMessage, LanguageModel};
use crate::memory::{MemoryManager, Role};
use crate::metrics::{
    AGENT_ITERATIONS_TOTAL, AGENT_TASKS, CODE_EXECUTIONS, CONFIRMATIONS, LLM_CALL_TIME,
};
use crate::protocol::{
    AiContent, ControlSignal, Inbound, InlineImage, OutboundEvent, OutboundMessage, Status,
};

/// Error type for orchestrator tasks
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The client side of a queue went away
    #[error("Message channel closed")]
    ChannelClosed,
    /// A task was started on an orchestrator that already finished one
    #[error("Orchestrator is {0}; reset it before starting a new task")]
    Terminated(OrchestratorState),
}

/// How a task ended without a channel failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Stopped,
    Escalated,
    MaxIterations,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Stopped => "stopped",
            Outcome::Escalated => "escalated",
            Outcome::MaxIterations => "max_iterations",
        }
    }
}

enum BlockFlow {
    Continue,
    StopAgent,
}

/// Everything one executed block produced
#[derive(Debug, Default)]
struct BlockResult {
    output: String,
    images: Vec<InlineImage>,
    had_error: bool,
    interrupted: bool,
    start_failed: bool,
}

impl BlockResult {
    fn status(&self) -> &'static str {
        if self.start_failed {
            "unsupported"
        } else if self.interrupted {
            "stopped"
        } else if self.had_error {
            "error"
        } else {
            "ok"
        }
    }

    /// Text and image of the tool message fed back to the model
    fn into_message(mut self, block: &CodeBlock) -> (String, Option<InlineImage>) {
        let mut text = format!("Output of {} block {}:\n", block.language, block.index);
        if self.output.trim().is_empty() {
            text.push_str("(no output)\n");
        } else {
            text.push_str(&self.output);
            if !self.output.ends_with('\n') {
                text.push('\n');
            }
        }
        if self.interrupted {
            text.push_str("[Execution stopped by the user]\n");
        }
        let image = self.images.pop();
        if !self.images.is_empty() {
            text.push_str(&format!(
                "[{} earlier image(s) omitted, the most recent one is attached]\n",
                self.images.len()
            ));
        }
        (text, image)
    }
}

/// Drives one agent through code execution tasks
pub struct Orchestrator {
    config: AgentConfig,
    model: Arc<dyn LanguageModel>,
    executor: Arc<dyn CodeExecutor>,
    extractor: Arc<dyn CodeExtractor>,
    memory: MemoryManager,
    state: OrchestratorState,
    flags: StopFlags,
    deferred: Vec<ControlSignal>,
    iterations: usize,
}

impl Orchestrator {
    /// Create an orchestrator
    ///
    /// # Arguments
    /// * `config` - Agent configuration
    /// * `model` - Streaming language model
    /// * `executor` - Runs approved code blocks
    pub fn new(
        config: AgentConfig,
        model: Arc<dyn LanguageModel>,
        executor: Arc<dyn CodeExecutor>,
    ) -> Self {
        let mut memory = MemoryManager::new(&config.agent_name, config.memory.clone());
        let system_prompt = config.system_prompt.clone().unwrap_or_else(|| {
            default_system_prompt(&executor.languages(), executor.is_stateful())
        });
        memory.set_system_prompt(system_prompt);

        Self {
            config,
            model,
            executor,
            extractor: Arc::new(MarkdownExtractor::default()),
            memory,
            state: OrchestratorState::Idle,
            flags: StopFlags::default(),
            deferred: Vec::new(),
            iterations: 0,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn CodeExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Replace the memory manager; it inherits the system prompt if it has none
    pub fn with_memory(mut self, mut memory: MemoryManager) -> Self {
        if memory.system_prompt().is_none() {
            if let Some(prompt) = self.memory.system_prompt() {
                memory.set_system_prompt(prompt);
            }
        }
        self.memory = memory;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryManager {
        &mut self.memory
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Model calls made by the current or last task
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Signals addressed to other agents that arrived on a direct channel
    pub fn take_deferred_signals(&mut self) -> Vec<ControlSignal> {
        std::mem::take(&mut self.deferred)
    }

    /// Return to `Idle` with a fresh short-term memory
    pub fn reset(&mut self) {
        self.memory.reset_short_term();
        self.flags.clear();
        self.iterations = 0;
        self.state = OrchestratorState::Idle;
    }

    /// Run a task on its own tokio task, handing the orchestrator back
    pub fn spawn(
        mut self,
        description: impl Into<String>,
        inbound: Inbound,
        outbound: UnboundedSender<OutboundMessage>,
    ) -> JoinHandle<(Self, Result<(), AgentError>)> {
        let description = description.into();
        tokio::spawn(async move {
            let result = self.task(&description, inbound, outbound).await;
            (self, result)
        })
    }

    /// Run one task to completion
    ///
    /// Returns `Ok` when the task ends normally, on stop_agent, on escalation
    /// or when the iteration budget runs out; a final `[STOP]` status is
    /// sent in all those cases. Returns `Err(ChannelClosed)` if either queue
    /// breaks, leaving the orchestrator `Failed`.
    pub async fn task(
        &mut self,
        description: &str,
        inbound: Inbound,
        outbound: UnboundedSender<OutboundMessage>,
    ) -> Result<(), AgentError> {
        if self.state != OrchestratorState::Idle {
            return Err(AgentError::Terminated(self.state));
        }

        let trace_id = Uuid::now_v7().to_string();
        let root_span = info_span!(
            "agent_task",
            trace_id = %trace_id,
            agent = %self.config.agent_name,
            model = %self.model.model_name(),
            otel.name = "agent_task"
        );

        let mut mailbox = Mailbox::new(&self.config.agent_name, inbound);
        let outbox = Outbox::new(&self.config.agent_name, outbound);
        self.flags.clear();
        self.iterations = 0;

        let result = self
            .run_task(description, &mut mailbox, &outbox)
            .instrument(root_span)
            .await;

        self.deferred.extend(mailbox.into_deferred());
        AGENT_ITERATIONS_TOTAL.observe(self.iterations as f64);

        match result {
            Ok(outcome) => {
                self.state = OrchestratorState::Stopped;
                AGENT_TASKS.with_label_values(&[outcome.as_str()]).inc();
                info!(
                    trace_id = %trace_id,
                    outcome = outcome.as_str(),
                    iterations = self.iterations,
                    "Agent task finished"
                );
                Ok(())
            }
            Err(e) => {
                self.state = OrchestratorState::Failed;
                AGENT_TASKS.with_label_values(&["failed"]).inc();
                warn!(trace_id = %trace_id, error = %e, "Agent task failed");
                Err(e)
            }
        }
    }

    async fn run_task(
        &mut self,
        description: &str,
        mailbox: &mut Mailbox,
        outbox: &Outbox,
    ) -> Result<Outcome, AgentError> {
        info!(task = %description, "Starting agent task");
        let outcome = self.drive(description, mailbox, outbox).await?;
        outbox.send(OutboundEvent::Status(Status::Stop))?;
        Ok(outcome)
    }

    async fn drive(
        &mut self,
        description: &str,
        mailbox: &mut Mailbox,
        outbox: &Outbox,
    ) -> Result<Outcome, AgentError> {
        outbox.send(OutboundEvent::Status(Status::Start))?;
        self.memory.append(Role::User, description, None, true);

        let mut failures = 0usize;
        loop {
            mailbox.poll(&mut self.flags)?;
            if self.flags.stop_agent() {
                info!("Stop requested, abandoning task");
                return Ok(Outcome::Stopped);
            }
            if self.iterations >= self.config.max_iterations {
                warn!(iterations = self.iterations, "Max iterations reached");
                outbox.send(OutboundEvent::Escalation(format!(
                    "Reached the limit of {} model calls without finishing the task",
                    self.config.max_iterations
                )))?;
                return Ok(Outcome::MaxIterations);
            }

            self.iterations += 1;
            self.state = OrchestratorState::AwaitingModel;
            let reply = match self.call_model(mailbox, outbox).await? {
                Ok(reply) => reply,
                Err(e) => {
                    failures += 1;
                    let message = format!("Model call failed: {}", e);
                    warn!(error = %e, failures, "Model call failed");
                    self.memory.append(Role::Tool, message.as_str(), None, false);
                    outbox.send(OutboundEvent::Response(message))?;

                    if failures >= self.config.max_consecutive_failures.max(1) {
                        outbox.send(OutboundEvent::Escalation(format!(
                            "The model failed {} times in a row: {}",
                            failures, e
                        )))?;
                        return Ok(Outcome::Escalated);
                    }
                    tokio::time::sleep(self.config.retry_delay()).await;
                    continue;
                }
            };
            failures = 0;

            if self.flags.stop_agent() {
                info!("Stop requested during model turn, abandoning task");
                return Ok(Outcome::Stopped);
            }

            self.state = OrchestratorState::ExtractingCode;
            self.memory.append(Role::Assistant, reply.as_str(), None, false);
            if self.memory.len() > self.config.history_cap {
                let removed = self.memory.compact(self.config.history_keep_recent);
                debug!(removed, "Compacted conversation history");
            }

            let blocks = self.extractor.extract(&reply);
            if blocks.is_empty() {
                info!(iterations = self.iterations, "No code blocks in reply, task complete");
                return Ok(Outcome::Completed);
            }
            info!(blocks = blocks.len(), "Extracted code blocks");

            for block in &blocks {
                if let BlockFlow::StopAgent = self.process_block(block, mailbox, outbox).await? {
                    info!(block = block.index, "Stop requested, abandoning task");
                    return Ok(Outcome::Stopped);
                }
            }
        }
    }

    /// Stream one model turn to the client
    ///
    /// The outer error is a channel failure; the inner one a model failure
    /// the loop recovers from.
    async fn call_model(
        &mut self,
        mailbox: &mut Mailbox,
        outbox: &Outbox,
    ) -> Result<Result<String, ChatError>, AgentError> {
        let context = self.memory.materialize_context();
        let model = self.model.model_name().to_string();
        let llm_span = info_span!(
            "llm_call",
            iteration = self.iterations,
            model = %model,
            messages = context.len(),
            otel.name = "llm_call"
        );

        self.stream_reply(context, &model, mailbox, outbox)
            .instrument(llm_span)
            .await
    }

    async fn stream_reply(
        &mut self,
        context: Vec<ChatMessage>,
        model: &str,
        mailbox: &mut Mailbox,
        outbox: &Outbox,
    ) -> Result<Result<String, ChatError>, AgentError> {
        let start = Instant::now();
        let mut stream = match self.model.stream_chat(context).await {
            Ok(stream) => stream,
            Err(e) => return Ok(Err(e)),
        };

        outbox.send(OutboundEvent::AiContent(AiContent::Start))?;
        let mut reply = String::new();
        let mut failure = None;
        loop {
            // A stop_agent cuts the turn short; the partial reply is discarded
            if let Err(e) = mailbox.poll(&mut self.flags) {
                let _ = outbox.send(OutboundEvent::AiContent(AiContent::End));
                return Err(e);
            }
            if self.flags.stop_agent() {
                break;
            }
            match stream.next().await {
                Some(Ok(chunk)) => {
                    reply.push_str(&chunk);
                    outbox.send(OutboundEvent::AiContent(AiContent::Chunk(chunk)))?;
                }
                Some(Err(e)) => {
                    failure = Some(e);
                    break;
                }
                None => break,
            }
        }
        outbox.send(OutboundEvent::AiContent(AiContent::End))?;

        let elapsed = start.elapsed();
        LLM_CALL_TIME
            .with_label_values(&[model])
            .observe(elapsed.as_secs_f64());
        info!(
            duration_ms = elapsed.as_secs_f64() * 1000.0,
            chars = reply.len(),
            "LLM call completed"
        );

        Ok(match failure {
            Some(e) => Err(e),
            None => Ok(reply),
        })
    }

    async fn process_block(
        &mut self,
        block: &CodeBlock,
        mailbox: &mut Mailbox,
        outbox: &Outbox,
    ) -> Result<BlockFlow, AgentError> {
        self.flags.clear_code();
        self.state = OrchestratorState::AwaitingConfirmation;
        outbox.send(OutboundEvent::Status(Status::Block(block.index)))?;
        outbox.send(OutboundEvent::PermissionRequest)?;

        let deadline = self
            .config
            .confirmation_timeout()
            .map(|timeout| tokio::time::Instant::now() + timeout);
        let decision = mailbox.await_decision(&mut self.flags, deadline).await?;
        CONFIRMATIONS.with_label_values(&[decision.as_str()]).inc();
        debug!(block = block.index, decision = decision.as_str(), "Confirmation resolved");

        match decision {
            Decision::Approve => {}
            Decision::Deny => {
                self.record_rejection(block, "the user denied permission to run it");
                return Ok(BlockFlow::Continue);
            }
            Decision::TimedOut => {
                warn!(block = block.index, "Confirmation timed out, treating as denied");
                outbox.send(OutboundEvent::Escalation(format!(
                    "No decision for code block {} within {}ms; it was not executed",
                    block.index,
                    self.config.confirmation_timeout_ms.unwrap_or_default()
                )))?;
                self.record_rejection(block, "no permission was given in time");
                return Ok(BlockFlow::Continue);
            }
            Decision::StopAgent => return Ok(BlockFlow::StopAgent),
        }

        self.state = OrchestratorState::Executing;
        let exec_span = info_span!(
            "code_execution",
            language = %block.language,
            block = block.index,
            code_len = block.source.len(),
            otel.name = "code_execution"
        );
        let result = self
            .execute_block(block, mailbox, outbox)
            .instrument(exec_span)
            .await?;

        let status = result.status();
        CODE_EXECUTIONS
            .with_label_values(&[&block.language, status])
            .inc();
        info!(block = block.index, language = %block.language, status, "Code block finished");

        let (text, image) = result.into_message(block);
        self.memory.append(Role::Tool, text, image, false);

        if self.flags.stop_agent() {
            Ok(BlockFlow::StopAgent)
        } else {
            Ok(BlockFlow::Continue)
        }
    }

    /// Run an approved block and forward its output until it ends or is stopped
    async fn execute_block(
        &mut self,
        block: &CodeBlock,
        mailbox: &mut Mailbox,
        outbox: &Outbox,
    ) -> Result<BlockResult, AgentError> {
        let mut result = BlockResult::default();
        let mut execution = match self.executor.run(block).await {
            Ok(execution) => execution,
            Err(e) => {
                let message = format!("Could not run {} block {}: {}", block.language, block.index, e);
                warn!(error = %e, "Executor failed to start");
                outbox.send(OutboundEvent::Response(message.clone()))?;
                result.output = message;
                result.start_failed = true;
                return Ok(result);
            }
        };

        let poll_interval = self.config.poll_interval();
        loop {
            mailbox.poll(&mut self.flags)?;
            if self.flags.stop_code() || self.flags.stop_agent() {
                info!(block = block.index, "Stopping code execution");
                execution.cancel();
                result.interrupted = true;
                break;
            }

            let event = match tokio::time::timeout(poll_interval, execution.next_event()).await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                // Nothing yet; go back to the checkpoint
                Err(_) => continue,
            };
            match event {
                ExecutionEvent::Text(text) => {
                    result.output.push_str(&text);
                    outbox.send(OutboundEvent::Text(text))?;
                }
                ExecutionEvent::Error(text) => {
                    result.had_error = true;
                    result.output.push_str(&text);
                    outbox.send(OutboundEvent::Text(text))?;
                }
                ExecutionEvent::Image(image) => {
                    outbox.send(OutboundEvent::Image(image.clone()))?;
                    result.images.push(image);
                }
            }
        }

        debug!(still_running = execution.is_running(), "Stopped draining execution");
        Ok(result)
    }

    fn record_rejection(&mut self, block: &CodeBlock, reason: &str) {
        CODE_EXECUTIONS
            .with_label_values(&[&block.language, "rejected"])
            .inc();
        self.memory.append(
            Role::Tool,
            format!(
                "Code block {} ({}) was not executed: {}. Try a different approach.",
                block.index, block.language, reason
            ),
            None,
            false,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> CodeBlock {
        CodeBlock {
            index: 1,
            language: "python".to_string(),
            source: "print(1)".to_string(),
        }
    }

    #[test]
    fn test_block_result_keeps_latest_image() {
        let first = InlineImage::new(crate::protocol::ImageFormat::Png, "AAAA");
        let second = InlineImage::new(crate::protocol::ImageFormat::Jpeg, "BBBB");
        let result = BlockResult {
            output: "plotted".to_string(),
            images: vec![first, second.clone()],
            ..BlockResult::default()
        };
        assert_eq!(result.status(), "ok");

        let (text, image) = result.into_message(&block());
        assert!(text.starts_with("Output of python block 1:\nplotted\n"));
        assert!(text.contains("1 earlier image(s) omitted"));
        assert_eq!(image, Some(second));
    }

    #[test]
    fn test_block_result_empty_and_interrupted() {
        let result = BlockResult {
            interrupted: true,
            had_error: true,
            ..BlockResult::default()
        };
        assert_eq!(result.status(), "stopped");

        let (text, image) = result.into_message(&block());
        assert!(text.contains("(no output)"));
        assert!(text.contains("[Execution stopped by the user]"));
        assert!(image.is_none());
    }
}
