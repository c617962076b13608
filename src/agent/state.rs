use std::fmt;

use crate::protocol::ControlKind;

/// Where the orchestrator is in its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    AwaitingModel,
    ExtractingCode,
    AwaitingConfirmation,
    Executing,
    /// Task ended normally or on request
    Stopped,
    /// A message channel broke
    Failed,
}

impl OrchestratorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrchestratorState::Stopped | OrchestratorState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestratorState::Idle => "idle",
            OrchestratorState::AwaitingModel => "awaiting_model",
            OrchestratorState::ExtractingCode => "extracting_code",
            OrchestratorState::AwaitingConfirmation => "awaiting_confirmation",
            OrchestratorState::Executing => "executing",
            OrchestratorState::Stopped => "stopped",
            OrchestratorState::Failed => "failed",
        }
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sticky stop requests
///
/// Once set, a flag stays set until cleared: `stop_code` at the start of
/// every block, both at the start of every task.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StopFlags {
    stop_code: bool,
    stop_agent: bool,
}

impl StopFlags {
    /// Record a signal; returns true if it was a stop request
    pub fn record(&mut self, kind: ControlKind) -> bool {
        match kind {
            ControlKind::StopCode => self.stop_code = true,
            ControlKind::StopAgent => self.stop_agent = true,
            ControlKind::Approve | ControlKind::Deny => return false,
        }
        true
    }

    pub fn stop_code(&self) -> bool {
        self.stop_code
    }

    pub fn stop_agent(&self) -> bool {
        self.stop_agent
    }

    pub fn clear_code(&mut self) {
        self.stop_code = false;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_sticky_and_idempotent() {
        let mut flags = StopFlags::default();
        assert!(!flags.record(ControlKind::Approve));
        assert!(flags.record(ControlKind::StopCode));
        assert!(flags.record(ControlKind::StopCode));
        assert!(flags.stop_code());
        assert!(!flags.stop_agent());

        flags.clear_code();
        assert!(!flags.stop_code());

        flags.record(ControlKind::StopAgent);
        flags.clear_code();
        assert!(flags.stop_agent());

        flags.clear();
        assert_eq!(flags, StopFlags::default());
    }

    #[test]
    fn test_terminal_states() {
        assert!(OrchestratorState::Stopped.is_terminal());
        assert!(OrchestratorState::Failed.is_terminal());
        assert!(!OrchestratorState::AwaitingConfirmation.is_terminal());
        assert_eq!(OrchestratorState::AwaitingModel.to_string(), "awaiting_model");
    }
}
