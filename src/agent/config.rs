use std::time::Duration;

use crate::memory::MemoryConfig;

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Name used to address this agent on the message channels
    pub agent_name: String,
    /// Custom system prompt (uses the default prompt if None)
    pub system_prompt: Option<String>,
    /// Maximum number of model calls per task
    pub max_iterations: usize,
    /// Consecutive model failures before escalating
    pub max_consecutive_failures: usize,
    /// Delay before retrying a failed model call in milliseconds
    pub retry_delay_ms: u64,
    /// History length that triggers compaction
    pub history_cap: usize,
    /// Most recent messages kept by compaction
    pub history_keep_recent: usize,
    /// Confirmation wait limit in milliseconds (wait forever if None)
    pub confirmation_timeout_ms: Option<u64>,
    /// How often the inbound queue is checked while draining execution output
    pub poll_interval_ms: u64,
    pub memory: MemoryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_name: "CodeAgent".to_string(),
            system_prompt: None,
            max_iterations: 20,
            max_consecutive_failures: 3,
            retry_delay_ms: 1000,
            history_cap: 10,
            history_keep_recent: 5,
            confirmation_timeout_ms: None,
            poll_interval_ms: 50,
            memory: MemoryConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn confirmation_timeout(&self) -> Option<Duration> {
        self.confirmation_timeout_ms.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
