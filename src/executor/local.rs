//! Local process executor
//!
//! Runs each block as a child process of the agent:
//!
//! | language | command |
//! |---|---|
//! | python, python3, py | `python3 -u -c <code>` |
//! | bash, sh, shell, zsh | `/bin/sh -c <code>` |
//! | javascript, js, node | `node -e <code>` |
//!
//! stdout lines become [`ExecutionEvent::Text`], stderr lines
//! [`ExecutionEvent::Error`]. A stdout line holding a
//! `data:image/png;base64,...` URL is forwarded as an image.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{CodeExecutor, Execution, ExecutionEvent, ExecutionSink, ExecutorError};
use crate::extract::CodeBlock;
use crate::metrics::CODE_EXECUTION_DURATION;
use crate::protocol::InlineImage;

/// Configuration for the local executor
#[derive(Debug, Clone)]
pub struct LocalExecutorConfig {
    /// Wall-clock limit per block
    pub timeout_secs: u64,
    pub python: String,
    pub shell: String,
    pub node: String,
    /// Extra environment variables for every process
    pub env: HashMap<String, String>,
}

impl Default for LocalExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            python: "python3".to_string(),
            shell: "/bin/sh".to_string(),
            node: "node".to_string(),
            env: HashMap::new(),
        }
    }
}

/// Executes code blocks as local child processes
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor {
    config: LocalExecutorConfig,
}

impl LocalExecutor {
    pub fn new(config: LocalExecutorConfig) -> Self {
        Self { config }
    }

    fn command_for(&self, block: &CodeBlock) -> Result<Command, ExecutorError> {
        let (program, args): (&str, Vec<&str>) = match block.language.as_str() {
            "python" | "python3" | "py" => {
                (self.config.python.as_str(), vec!["-u", "-c", block.source.as_str()])
            }
            "bash" | "sh" | "shell" | "zsh" => {
                (self.config.shell.as_str(), vec!["-c", block.source.as_str()])
            }
            "javascript" | "js" | "node" => {
                (self.config.node.as_str(), vec!["-e", block.source.as_str()])
            }
            other => return Err(ExecutorError::UnsupportedLanguage(other.to_string())),
        };

        let mut cmd = Command::new(program);
        cmd.args(&args)
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl CodeExecutor for LocalExecutor {
    fn languages(&self) -> Vec<String> {
        vec!["python".to_string(), "bash".to_string(), "javascript".to_string()]
    }

    async fn run(&self, block: &CodeBlock) -> Result<Execution, ExecutorError> {
        let mut cmd = self.command_for(block)?;
        let mut child = cmd.spawn()?;
        info!(
            language = %block.language,
            block = block.index,
            pid = child.id(),
            "Spawned code process"
        );

        let (execution, sink) = Execution::channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, sink.sender(), false)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, sink.sender(), true)));
        }

        let span = info_span!("local_process", language = %block.language, block = block.index);
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let language = block.language.clone();
        tokio::spawn(
            async move {
                let start = Instant::now();
                let exit = supervise(&mut child, sink, readers, timeout).await;
                CODE_EXECUTION_DURATION
                    .with_label_values(&[&language])
                    .observe(start.elapsed().as_secs_f64());
                debug!(?exit, "Code process finished");
            }
            .instrument(span),
        );

        Ok(execution)
    }
}

const KILL_GRACE: Duration = Duration::from_millis(250);

/// How a child process ended
#[derive(Debug)]
enum Exit {
    Finished(ExitStatus),
    WaitFailed(String),
    Cancelled,
    TimedOut,
}

async fn supervise(
    child: &mut tokio::process::Child,
    mut sink: ExecutionSink,
    readers: Vec<tokio::task::JoinHandle<()>>,
    timeout: Duration,
) -> Exit {
    let deadline = tokio::time::Instant::now() + timeout;
    let exit = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => Exit::Finished(status),
            Err(e) => Exit::WaitFailed(e.to_string()),
        },
        _ = sink.cancelled() => Exit::Cancelled,
        _ = tokio::time::sleep_until(deadline) => Exit::TimedOut,
    };

    let killed = matches!(exit, Exit::Cancelled | Exit::TimedOut);
    if killed {
        if let Err(e) = child.kill().await {
            warn!(error = %e, "Failed to kill code process");
        }
    }

    // Drain what is left before the tail message. Background children can
    // hold the pipes open after the process is gone, so the drain never
    // outlives the block's time limit.
    let drain_until = if killed {
        tokio::time::Instant::now() + KILL_GRACE
    } else {
        deadline
    };
    let mut detached = false;
    for mut reader in readers {
        if tokio::time::timeout_at(drain_until, &mut reader).await.is_err() {
            reader.abort();
            detached = true;
        }
    }
    if detached && !killed {
        warn!("Output pipes still open after the process exited");
        sink.emit(ExecutionEvent::Error(format!(
            "Stopped reading output after {}s: a background process is still holding it open\n",
            timeout.as_secs()
        )));
    }

    match &exit {
        Exit::Finished(status) if !status.success() => {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            sink.emit(ExecutionEvent::Error(format!("Process exited with code {}\n", code)));
        }
        Exit::Finished(_) => {}
        Exit::WaitFailed(e) => {
            sink.emit(ExecutionEvent::Error(format!("Failed to wait for process: {}\n", e)));
        }
        Exit::Cancelled => {
            sink.emit(ExecutionEvent::Error("Execution cancelled\n".to_string()));
        }
        Exit::TimedOut => {
            sink.emit(ExecutionEvent::Error(format!(
                "Execution timed out after {}s\n",
                timeout.as_secs()
            )));
        }
    }
    exit
}

async fn forward_lines<R>(pipe: R, events: UnboundedSender<ExecutionEvent>, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = LinesStream::new(BufReader::new(pipe).lines());
    while let Some(line) = lines.next().await {
        let event = match line {
            Ok(line) => classify_line(line, is_stderr),
            Err(e) => {
                let _ = events.send(ExecutionEvent::Error(format!("Output read error: {}\n", e)));
                return;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
}

fn classify_line(line: String, is_stderr: bool) -> ExecutionEvent {
    if is_stderr {
        return ExecutionEvent::Error(format!("{}\n", line));
    }
    match InlineImage::from_data_url(line.trim()) {
        Some(image) => ExecutionEvent::Image(image),
        None => ExecutionEvent::Text(format!("{}\n", line)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ImageFormat;

    fn block(language: &str, source: &str) -> CodeBlock {
        CodeBlock {
            index: 0,
            language: language.to_string(),
            source: source.to_string(),
        }
    }

    async fn collect(mut execution: Execution) -> Vec<ExecutionEvent> {
        let mut events = Vec::new();
        while let Some(event) = execution.next_event().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_classify_line() {
        assert_eq!(
            classify_line("hello".to_string(), false),
            ExecutionEvent::Text("hello\n".to_string())
        );
        assert_eq!(
            classify_line("boom".to_string(), true),
            ExecutionEvent::Error("boom\n".to_string())
        );
        assert_eq!(
            classify_line("data:image/png;base64,AAAA".to_string(), false),
            ExecutionEvent::Image(InlineImage::new(ImageFormat::Png, "AAAA"))
        );
    }

    #[tokio::test]
    async fn test_unsupported_language() {
        let executor = LocalExecutor::default();
        let result = executor.run(&block("cobol", "DISPLAY 'HI'")).await;
        assert!(matches!(result, Err(ExecutorError::UnsupportedLanguage(l)) if l == "cobol"));
    }

    #[tokio::test]
    async fn test_shell_output_and_exit_code() {
        let executor = LocalExecutor::default();
        let execution = executor
            .run(&block("sh", "echo hello; echo oops 1>&2; exit 3"))
            .await
            .unwrap();
        let events = collect(execution).await;

        assert!(events.contains(&ExecutionEvent::Text("hello\n".to_string())));
        assert!(events.contains(&ExecutionEvent::Error("oops\n".to_string())));
        assert_eq!(
            events.last(),
            Some(&ExecutionEvent::Error("Process exited with code 3\n".to_string()))
        );
    }

    #[tokio::test]
    async fn test_cancel_kills_process() {
        let executor = LocalExecutor::default();
        let mut execution = executor.run(&block("sh", "echo started; sleep 30")).await.unwrap();

        assert_eq!(
            execution.next_event().await,
            Some(ExecutionEvent::Text("started\n".to_string()))
        );
        execution.cancel();

        let rest = tokio::time::timeout(Duration::from_secs(5), collect(execution))
            .await
            .expect("cancelled process should stop promptly");
        assert_eq!(
            rest.last(),
            Some(&ExecutionEvent::Error("Execution cancelled\n".to_string()))
        );
    }

    #[tokio::test]
    async fn test_timeout() {
        let executor = LocalExecutor::new(LocalExecutorConfig {
            timeout_secs: 1,
            ..LocalExecutorConfig::default()
        });
        let execution = executor.run(&block("sh", "sleep 10")).await.unwrap();
        let events = collect(execution).await;
        assert_eq!(
            events.last(),
            Some(&ExecutionEvent::Error("Execution timed out after 1s\n".to_string()))
        );
    }

    #[tokio::test]
    async fn test_background_child_does_not_outlive_timeout() {
        let executor = LocalExecutor::new(LocalExecutorConfig {
            timeout_secs: 1,
            ..LocalExecutorConfig::default()
        });
        let execution = executor.run(&block("sh", "sleep 8 & echo hi")).await.unwrap();

        let started = Instant::now();
        let events = tokio::time::timeout(Duration::from_secs(5), collect(execution))
            .await
            .expect("stream should close at the time limit");

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(events.first(), Some(&ExecutionEvent::Text("hi\n".to_string())));
        assert!(matches!(
            events.last(),
            Some(ExecutionEvent::Error(msg)) if msg.starts_with("Stopped reading output after 1s")
        ));
    }
}
