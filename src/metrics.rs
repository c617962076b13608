//! Prometheus metrics for the agent
//!
//! All metrics live in the default registry; [`encode`] renders them in the
//! text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, Encoder, Histogram,
    HistogramVec, IntCounterVec, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Task Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Finished tasks by outcome.
    ///
    /// Labels:
    /// - outcome: "completed", "stopped", "escalated", "max_iterations", "failed"
    pub static ref AGENT_TASKS: IntCounterVec = register_int_counter_vec!(
        "codeagent_tasks_total",
        "Agent tasks by final outcome",
        &["outcome"]
    ).expect("failed to register AGENT_TASKS metric");

    /// Model turns used per task.
    pub static ref AGENT_ITERATIONS_TOTAL: Histogram = register_histogram!(
        "codeagent_task_iterations",
        "Model turns per agent task",
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 20.0, 50.0]
    ).expect("failed to register AGENT_ITERATIONS_TOTAL metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Model Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Wall time of one streamed model turn, first request to last token.
    pub static ref LLM_CALL_TIME: HistogramVec = register_histogram_vec!(
        "codeagent_llm_call_seconds",
        "Duration of streamed model turns",
        &["model"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).expect("failed to register LLM_CALL_TIME metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Execution Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Code blocks handled, by language and result.
    ///
    /// Labels:
    /// - language: block language tag
    /// - status: "ok", "error", "stopped", "rejected", "unsupported"
    pub static ref CODE_EXECUTIONS: IntCounterVec = register_int_counter_vec!(
        "codeagent_code_executions_total",
        "Code blocks handled by language and status",
        &["language", "status"]
    ).expect("failed to register CODE_EXECUTIONS metric");

    /// Lifetime of local code processes.
    pub static ref CODE_EXECUTION_DURATION: HistogramVec = register_histogram_vec!(
        "codeagent_code_execution_seconds",
        "Lifetime of code processes",
        &["language"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    ).expect("failed to register CODE_EXECUTION_DURATION metric");

    /// Confirmation outcomes.
    ///
    /// Labels:
    /// - decision: "approve", "deny", "stop_agent", "timeout"
    pub static ref CONFIRMATIONS: IntCounterVec = register_int_counter_vec!(
        "codeagent_confirmations_total",
        "Confirmation decisions for code blocks",
        &["decision"]
    ).expect("failed to register CONFIRMATIONS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Memory Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Messages or images dropped from short-term memory.
    ///
    /// Labels:
    /// - phase: "image" (visual forgetting), "window" (token window), "compact"
    pub static ref PRUNED_MESSAGES: IntCounterVec = register_int_counter_vec!(
        "codeagent_pruned_messages_total",
        "Messages and images removed from short-term memory",
        &["phase"]
    ).expect("failed to register PRUNED_MESSAGES metric");
}

/// Render every registered metric in the Prometheus text format
pub fn encode() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_touched_metrics() {
        CONFIRMATIONS.with_label_values(&["approve"]).inc();
        AGENT_ITERATIONS_TOTAL.observe(2.0);

        let text = encode();
        assert!(text.contains("codeagent_confirmations_total"));
        assert!(text.contains("codeagent_task_iterations"));
    }
}
