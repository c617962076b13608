//! Per-task views of the inbound and outbound queues

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::debug;

use super::orchestrator::AgentError;
use super::state::StopFlags;
use crate::protocol::{ControlKind, ControlSignal, Inbound, OutboundEvent, OutboundMessage};

/// Outcome of a confirmation wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Deny,
    StopAgent,
    TimedOut,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Deny => "deny",
            Decision::StopAgent => "stop_agent",
            Decision::TimedOut => "timeout",
        }
    }
}

/// Inbound queue filtered to one agent
pub(crate) struct Mailbox {
    agent: String,
    inbound: Inbound,
    deferred: Vec<ControlSignal>,
}

impl Mailbox {
    pub fn new(agent: &str, inbound: Inbound) -> Self {
        Self {
            agent: agent.to_string(),
            inbound,
            deferred: Vec::new(),
        }
    }

    /// Drain pending signals without blocking, recording stop requests
    ///
    /// Approve and deny outside a confirmation wait carry no meaning and are
    /// dropped.
    pub fn poll(&mut self, flags: &mut StopFlags) -> Result<(), AgentError> {
        loop {
            match self.inbound.receiver.try_recv() {
                Ok(signal) => {
                    let Some(kind) = self.accept(signal) else {
                        continue;
                    };
                    if kind.is_stop() {
                        flags.record(kind);
                    } else {
                        debug!(agent = %self.agent, kind = %kind, "Ignoring signal outside confirmation");
                    }
                }
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => return Err(AgentError::ChannelClosed),
            }
        }
    }

    /// Block until approve, deny or stop_agent arrives, or `deadline` passes
    ///
    /// stop_code received while waiting is recorded and the wait continues.
    pub async fn await_decision(
        &mut self,
        flags: &mut StopFlags,
        deadline: Option<Instant>,
    ) -> Result<Decision, AgentError> {
        loop {
            let next = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.inbound.recv()).await {
                        Ok(next) => next,
                        Err(_) => return Ok(Decision::TimedOut),
                    }
                }
                None => self.inbound.recv().await,
            };
            let Some(signal) = next else {
                return Err(AgentError::ChannelClosed);
            };
            let Some(kind) = self.accept(signal) else {
                continue;
            };
            match kind {
                ControlKind::Approve => return Ok(Decision::Approve),
                ControlKind::Deny => return Ok(Decision::Deny),
                ControlKind::StopAgent => {
                    flags.record(kind);
                    return Ok(Decision::StopAgent);
                }
                ControlKind::StopCode => {
                    flags.record(kind);
                }
            }
        }
    }

    /// Signals for other agents that could not be handed back
    pub fn into_deferred(self) -> Vec<ControlSignal> {
        self.deferred
    }

    fn accept(&mut self, signal: ControlSignal) -> Option<ControlKind> {
        if signal.is_for(&self.agent) {
            return Some(signal.kind);
        }
        debug!(agent = %self.agent, addressed_to = %signal.agent, kind = %signal.kind, "Preserving misaddressed signal");
        let signal = match &self.inbound.return_path {
            Some(return_path) => match return_path.send(signal) {
                Ok(()) => return None,
                Err(returned) => returned.0,
            },
            None => signal,
        };
        self.deferred.push(signal);
        None
    }
}

/// Outbound queue stamped with the agent name
pub(crate) struct Outbox {
    agent: String,
    sender: UnboundedSender<OutboundMessage>,
}

impl Outbox {
    pub fn new(agent: &str, sender: UnboundedSender<OutboundMessage>) -> Self {
        Self {
            agent: agent.to_string(),
            sender,
        }
    }

    pub fn send(&self, event: OutboundEvent) -> Result<(), AgentError> {
        self.sender
            .send(OutboundMessage::new(self.agent.as_str(), event))
            .map_err(|_| AgentError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn mailbox() -> (mpsc::UnboundedSender<ControlSignal>, Mailbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Mailbox::new("CodeAgent", Inbound::new(rx)))
    }

    #[tokio::test]
    async fn test_poll_records_stops_and_keeps_foreign_signals() {
        let (tx, mut mailbox) = mailbox();
        let mut flags = StopFlags::default();

        tx.send(ControlSignal::approve("CodeAgent")).unwrap();
        tx.send(ControlSignal::stop_code("Browser")).unwrap();
        tx.send(ControlSignal::stop_code("CodeAgent")).unwrap();
        mailbox.poll(&mut flags).unwrap();

        assert!(flags.stop_code());
        assert!(!flags.stop_agent());
        assert_eq!(mailbox.into_deferred(), vec![ControlSignal::stop_code("Browser")]);
    }

    #[tokio::test]
    async fn test_await_decision_records_stop_code_and_keeps_waiting() {
        let (tx, mut mailbox) = mailbox();
        let mut flags = StopFlags::default();

        tx.send(ControlSignal::stop_code("CodeAgent")).unwrap();
        tx.send(ControlSignal::deny("CodeAgent")).unwrap();
        let decision = mailbox.await_decision(&mut flags, None).await.unwrap();

        assert_eq!(decision, Decision::Deny);
        assert!(flags.stop_code());
    }

    #[tokio::test]
    async fn test_await_decision_times_out() {
        let (_tx, mut mailbox) = mailbox();
        let mut flags = StopFlags::default();
        let deadline = Instant::now() + Duration::from_millis(20);

        let decision = mailbox.await_decision(&mut flags, Some(deadline)).await.unwrap();
        assert_eq!(decision, Decision::TimedOut);
    }

    #[tokio::test]
    async fn test_closed_inbound_is_an_error() {
        let (tx, mut mailbox) = mailbox();
        drop(tx);
        let mut flags = StopFlags::default();

        assert!(matches!(mailbox.poll(&mut flags), Err(AgentError::ChannelClosed)));
        assert!(matches!(
            mailbox.await_decision(&mut flags, None).await,
            Err(AgentError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_foreign_signal_goes_to_return_path() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (return_tx, mut return_rx) = mpsc::unbounded_channel();
        let mut mailbox = Mailbox::new("CodeAgent", Inbound::with_return_path(rx, return_tx));
        let mut flags = StopFlags::default();

        tx.send(ControlSignal::approve("Browser")).unwrap();
        tx.send(ControlSignal::approve("CodeAgent")).unwrap();
        let decision = mailbox.await_decision(&mut flags, None).await.unwrap();

        assert_eq!(decision, Decision::Approve);
        assert_eq!(return_rx.recv().await, Some(ControlSignal::approve("Browser")));
        assert!(mailbox.into_deferred().is_empty());
    }
}
