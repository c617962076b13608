//! The inbound/outbound queue pair
//!
//! Both directions are unbounded tokio mpsc channels. The client keeps a
//! [`ClientEnd`]; the orchestrator receives an [`AgentEnd`].

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::message::{ControlKind, ControlSignal, OutboundMessage};

/// Receiving side of the inbound queue as seen by one agent
///
/// `return_path` is where signals addressed to other agents are handed back
/// so they can be redelivered. Agents registered with a
/// [`SignalRouter`](super::SignalRouter) get the router's shared sender; a
/// direct [`channel_pair`] has none and the agent keeps such signals itself.
#[derive(Debug)]
pub struct Inbound {
    pub(crate) receiver: UnboundedReceiver<ControlSignal>,
    pub(crate) return_path: Option<UnboundedSender<ControlSignal>>,
}

impl Inbound {
    pub fn new(receiver: UnboundedReceiver<ControlSignal>) -> Self {
        Self {
            receiver,
            return_path: None,
        }
    }

    pub fn with_return_path(
        receiver: UnboundedReceiver<ControlSignal>,
        return_path: UnboundedSender<ControlSignal>,
    ) -> Self {
        Self {
            receiver,
            return_path: Some(return_path),
        }
    }

    pub async fn recv(&mut self) -> Option<ControlSignal> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ControlSignal> {
        self.receiver.try_recv().ok()
    }
}

/// Client side of the queue pair
#[derive(Debug)]
pub struct ClientEnd {
    pub signals: UnboundedSender<ControlSignal>,
    pub events: UnboundedReceiver<OutboundMessage>,
}

impl ClientEnd {
    /// Send a control signal; returns false once the agent side is gone
    pub fn send(&self, agent: &str, kind: ControlKind) -> bool {
        self.signals.send(ControlSignal::new(agent, kind)).is_ok()
    }

    pub async fn next_event(&mut self) -> Option<OutboundMessage> {
        self.events.recv().await
    }
}

/// Orchestrator side of the queue pair
#[derive(Debug)]
pub struct AgentEnd {
    pub inbound: Inbound,
    pub outbound: UnboundedSender<OutboundMessage>,
}

/// Create a connected client/agent queue pair
pub fn channel_pair() -> (ClientEnd, AgentEnd) {
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let client = ClientEnd {
        signals: signal_tx,
        events: event_rx,
    };
    let agent = AgentEnd {
        inbound: Inbound::new(signal_rx),
        outbound: event_tx,
    };
    (client, agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{OutboundEvent, Status};

    #[tokio::test]
    async fn test_channel_pair_roundtrip() {
        let (mut client, mut agent) = channel_pair();

        assert!(client.send("CodeAgent", ControlKind::Approve));
        let signal = agent.inbound.receiver.recv().await.unwrap();
        assert_eq!(signal, ControlSignal::approve("CodeAgent"));

        agent
            .outbound
            .send(OutboundMessage::new(
                "CodeAgent",
                OutboundEvent::Status(Status::Start),
            ))
            .unwrap();
        let event = client.next_event().await.unwrap();
        assert_eq!(event.event, OutboundEvent::Status(Status::Start));
    }

    #[tokio::test]
    async fn test_send_fails_after_agent_dropped() {
        let (client, agent) = channel_pair();
        drop(agent);
        assert!(!client.send("CodeAgent", ControlKind::Deny));
    }
}
