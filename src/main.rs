use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;

use codeagent::memory::MemoryConfig;
use codeagent::protocol::wire::{decode_signal, encode_message};
use codeagent::protocol::{AiContent, ClientEnd, Status};
use codeagent::{
    channel_pair, metrics, telemetry, AgentConfig, ControlKind, LocalExecutor, LocalExecutorConfig,
    OllamaChatClient, Orchestrator, OutboundEvent,
};

#[derive(Parser)]
#[command(name = "codeagent")]
#[command(about = "Run a coding task with a local model, approving each code block")]
#[command(version)]
struct Cli {
    /// Ollama model name
    #[arg(long, env = "CODEAGENT_MODEL", default_value = "qwen3")]
    model: String,

    /// Ollama base URL
    #[arg(long, env = "CODEAGENT_API_BASE", default_value = "http://localhost:11434")]
    api_base: String,

    /// Sampling temperature
    #[arg(long, default_value_t = 0.0)]
    temperature: f32,

    /// Agent name used on the message channels and for the insight file
    #[arg(long, default_value = "CodeAgent")]
    agent: String,

    /// Maximum model calls for the task
    #[arg(long, default_value_t = 20)]
    max_iterations: usize,

    /// Approve every code block without asking
    #[arg(long)]
    auto_approve: bool,

    /// Treat a block as denied if no decision arrives within this many seconds
    #[arg(long)]
    confirm_timeout: Option<u64>,

    /// Per-block execution time limit in seconds
    #[arg(long, default_value_t = 60)]
    exec_timeout: u64,

    /// Directory for the long-term insight file
    #[arg(long, default_value = "./memory_storage")]
    insights_dir: PathBuf,

    /// OTLP collector endpoint for trace export (e.g. http://localhost:4317)
    #[arg(long)]
    otlp_endpoint: Option<String>,

    /// Speak the JSON wire protocol on stdin/stdout instead of the console UI
    #[arg(long)]
    json: bool,

    /// Print Prometheus metrics to stderr when the task ends
    #[arg(long)]
    print_metrics: bool,

    /// The task to accomplish
    #[arg(required = true, trailing_var_arg = true)]
    task: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    telemetry::init_tracing("codeagent", cli.otlp_endpoint.as_deref())
        .map_err(|e| anyhow::anyhow!(e))
        .context("failed to initialize tracing")?;

    let config = AgentConfig {
        agent_name: cli.agent.clone(),
        max_iterations: cli.max_iterations,
        confirmation_timeout_ms: cli.confirm_timeout.map(|secs| secs.saturating_mul(1000)),
        memory: MemoryConfig {
            insights_dir: Some(cli.insights_dir.clone()),
            ..MemoryConfig::default()
        },
        ..AgentConfig::default()
    };
    let model = Arc::new(
        OllamaChatClient::new(&cli.api_base, &cli.model).with_temperature(cli.temperature),
    );
    let executor = Arc::new(LocalExecutor::new(LocalExecutorConfig {
        timeout_secs: cli.exec_timeout,
        ..LocalExecutorConfig::default()
    }));

    let (client, agent) = channel_pair();
    let orchestrator = Orchestrator::new(config, model, executor);
    let handle = orchestrator.spawn(cli.task.join(" "), agent.inbound, agent.outbound);

    if cli.json {
        run_json_bridge(client).await?;
    } else {
        run_console(client, &cli.agent, cli.auto_approve).await?;
    }

    let (_orchestrator, result) = handle.await.context("agent task panicked")?;

    if cli.print_metrics {
        eprintln!("{}", metrics::encode());
    }
    telemetry::shutdown_tracing();

    result.context("agent task failed")
}

/// Render agent events and turn console input into control signals
///
/// `y` approves and `n` denies the pending block, `s` stops the running
/// block and `q` (or Ctrl-C) stops the agent.
async fn run_console(mut client: ClientEnd, agent: &str, auto_approve: bool) -> anyhow::Result<()> {
    let mut input = spawn_stdin_reader();
    let mut stdin_open = true;
    let mut pending_block: Option<usize> = None;
    let mut current_block = 0usize;

    loop {
        tokio::select! {
            event = client.next_event() => {
                let Some(message) = event else {
                    break;
                };
                match message.event {
                    OutboundEvent::Status(Status::Start) => println!("[{}] started", message.agent),
                    OutboundEvent::Status(Status::Stop) => {
                        println!("\n[{}] finished", message.agent);
                        break;
                    }
                    OutboundEvent::Status(Status::Block(index)) => current_block = index,
                    OutboundEvent::AiContent(AiContent::Start) => println!(),
                    OutboundEvent::AiContent(AiContent::Chunk(chunk)) => {
                        print!("{}", chunk);
                        std::io::stdout().flush()?;
                    }
                    OutboundEvent::AiContent(AiContent::End) => println!(),
                    OutboundEvent::PermissionRequest => {
                        if auto_approve {
                            println!("[auto-approved block {}]", current_block);
                            client.send(agent, ControlKind::Approve);
                        } else {
                            pending_block = Some(current_block);
                            print!("Run block {}? [y]es / [n]o / [q]uit: ", current_block);
                            std::io::stdout().flush()?;
                        }
                    }
                    OutboundEvent::Text(text) => {
                        print!("{}", text);
                        std::io::stdout().flush()?;
                    }
                    OutboundEvent::Image(image) => {
                        println!("[{} image, {} base64 bytes]", image.format.mime(), image.data.len());
                    }
                    OutboundEvent::Response(text) => eprintln!("[error] {}", text),
                    OutboundEvent::Escalation(text) => eprintln!("[attention] {}", text),
                }
            }
            line = input.recv(), if stdin_open => {
                let Some(line) = line else {
                    stdin_open = false;
                    continue;
                };
                let kind = match line.trim() {
                    "y" | "yes" if pending_block.is_some() => ControlKind::Approve,
                    "n" | "no" if pending_block.is_some() => ControlKind::Deny,
                    "s" | "stop" => ControlKind::StopCode,
                    "q" | "quit" => ControlKind::StopAgent,
                    "" => continue,
                    _ => {
                        println!("(y = run, n = skip, s = stop running code, q = stop agent)");
                        continue;
                    }
                };
                if matches!(kind, ControlKind::Approve | ControlKind::Deny) {
                    pending_block = None;
                }
                client.send(agent, kind);
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n[interrupt] stopping agent");
                client.send(agent, ControlKind::StopAgent);
            }
        }
    }

    Ok(())
}

/// Forward events as JSON lines and decode JSON control signals from stdin
async fn run_json_bridge(mut client: ClientEnd) -> anyhow::Result<()> {
    let mut input = spawn_stdin_reader();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = client.next_event() => {
                let Some(message) = event else {
                    break;
                };
                println!("{}", encode_message(&message));
                if message.event == OutboundEvent::Status(Status::Stop) {
                    break;
                }
            }
            line = input.recv(), if stdin_open => {
                let Some(line) = line else {
                    stdin_open = false;
                    continue;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match decode_signal(&line) {
                    Ok(signal) => {
                        let _ = client.signals.send(signal);
                    }
                    Err(e) => tracing::warn!(error = %e, "Rejected inbound message"),
                }
            }
        }
    }

    Ok(())
}

/// Read stdin lines on a plain thread
///
/// A blocked stdin read cannot be cancelled, so it must not live on the
/// runtime or shutdown would wait for the next line.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
