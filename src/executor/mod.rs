//! Code executors
//!
//! An executor turns a [`CodeBlock`] into an [`Execution`]: a lazy stream of
//! [`ExecutionEvent`]s, a liveness predicate, and an out-of-band cancel
//! switch.
//!
//! ```text
//! Orchestrator                         executor worker
//!     │  run(block) ──────────────────►  spawn process
//!     │  ◄──── ExecutionEvent ───────── stdout / stderr / images
//!     │  is_running() ◄─────────────── flips false when the worker ends
//!     │  cancel() ───────────────────► kills the process
//! ```
//!
//! Dropping an [`Execution`] cancels it, so abandoned processes are always
//! reclaimed.

pub mod local;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::extract::CodeBlock;
use crate::protocol::InlineImage;

pub use local::{LocalExecutor, LocalExecutorConfig};

/// One piece of execution output
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    Text(String),
    Image(InlineImage),
    /// Error output (stderr, non-zero exit, timeout, ...)
    Error(String),
}

/// Error type for starting an execution
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("Failed to start process: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Runs code blocks
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Languages this executor accepts (used in the system prompt)
    fn languages(&self) -> Vec<String>;

    /// Whether variables and working state survive from one block to the next
    fn is_stateful(&self) -> bool {
        false
    }

    /// Start executing `block`; output arrives on the returned [`Execution`]
    async fn run(&self, block: &CodeBlock) -> Result<Execution, ExecutorError>;
}

/// Consumer side of a running execution
pub struct Execution {
    events: mpsc::UnboundedReceiver<ExecutionEvent>,
    running: Arc<AtomicBool>,
    cancel: watch::Sender<bool>,
}

/// Producer side, held by the executor's worker
///
/// Dropping the sink marks the execution as finished and closes the event
/// stream.
pub struct ExecutionSink {
    events: mpsc::UnboundedSender<ExecutionEvent>,
    running: Arc<AtomicBool>,
    cancel: watch::Receiver<bool>,
}

impl Execution {
    /// Create a connected execution/sink pair
    pub fn channel() -> (Execution, ExecutionSink) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let running = Arc::new(AtomicBool::new(true));

        let execution = Execution {
            events: event_rx,
            running: Arc::clone(&running),
            cancel: cancel_tx,
        };
        let sink = ExecutionSink {
            events: event_tx,
            running,
            cancel: cancel_rx,
        };
        (execution, sink)
    }

    /// Next output event; `None` once the worker is done and the stream drained
    pub async fn next_event(&mut self) -> Option<ExecutionEvent> {
        self.events.recv().await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the executor to terminate; idempotent
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

impl Drop for Execution {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl ExecutionSink {
    /// Publish an event; returns false if the consumer is gone
    pub fn emit(&self, event: ExecutionEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Extra sender for helper tasks (e.g. one per output pipe)
    pub fn sender(&self) -> mpsc::UnboundedSender<ExecutionEvent> {
        self.events.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once cancellation is requested or the consumer is dropped
    pub async fn cancelled(&mut self) {
        while !*self.cancel.borrow_and_update() {
            if self.cancel.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Drop for ExecutionSink {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_ends_when_sink_dropped() {
        let (mut execution, sink) = Execution::channel();
        assert!(execution.is_running());

        sink.emit(ExecutionEvent::Text("hi\n".to_string()));
        drop(sink);

        assert!(!execution.is_running());
        assert_eq!(
            execution.next_event().await,
            Some(ExecutionEvent::Text("hi\n".to_string()))
        );
        assert_eq!(execution.next_event().await, None);
    }

    #[tokio::test]
    async fn test_cancel_reaches_sink() {
        let (execution, mut sink) = Execution::channel();
        assert!(!sink.is_cancelled());

        execution.cancel();
        execution.cancel();
        sink.cancelled().await;
        assert!(sink.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropping_execution_cancels() {
        let (execution, mut sink) = Execution::channel();
        drop(execution);
        sink.cancelled().await;
        assert!(!sink.emit(ExecutionEvent::Text("late".to_string())));
    }
}
