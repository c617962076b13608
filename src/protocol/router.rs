//! Routing of a shared inbound channel to individual agents
//!
//! ```text
//!                       ┌──────────────┐ ──► agent "CodeAgent"
//! clients ──► shared ──►│ SignalRouter │ ──► agent "Browser"
//!             channel   └──────────────┘ ──► pending (not registered yet)
//! ```
//!
//! Signals for an agent that has not registered (or whose mailbox is gone)
//! are parked and delivered when that agent registers. Nothing is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::debug;

use super::channel::Inbound;
use super::message::ControlSignal;

#[derive(Default)]
struct RouterState {
    routes: HashMap<String, UnboundedSender<ControlSignal>>,
    pending: HashMap<String, Vec<ControlSignal>>,
}

/// Dispatches signals from one shared channel to per-agent mailboxes
pub struct SignalRouter {
    state: Arc<Mutex<RouterState>>,
    shared_tx: UnboundedSender<ControlSignal>,
    shared_rx: Mutex<Option<UnboundedReceiver<ControlSignal>>>,
}

impl SignalRouter {
    pub fn new() -> Self {
        let (shared_tx, shared_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(RouterState::default())),
            shared_tx,
            shared_rx: Mutex::new(Some(shared_rx)),
        }
    }

    /// Sender for the shared physical channel, handed to clients
    pub fn sender(&self) -> UnboundedSender<ControlSignal> {
        self.shared_tx.clone()
    }

    /// Register an agent and get its inbound side
    ///
    /// Signals parked for this agent are delivered immediately. Misaddressed
    /// signals the agent hands back go through the shared channel again.
    pub fn register(&self, agent: &str) -> Inbound {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = lock(&self.state);
        if let Some(parked) = state.pending.remove(agent) {
            debug!(agent, count = parked.len(), "Delivering parked signals");
            for signal in parked {
                // rx is alive in this scope
                let _ = tx.send(signal);
            }
        }
        state.routes.insert(agent.to_string(), tx);
        Inbound::with_return_path(rx, self.shared_tx.clone())
    }

    pub fn deregister(&self, agent: &str) {
        lock(&self.state).routes.remove(agent);
    }

    /// Number of signals parked for an agent that is not registered
    pub fn pending_for(&self, agent: &str) -> usize {
        lock(&self.state)
            .pending
            .get(agent)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Route one signal
    pub fn dispatch(&self, signal: ControlSignal) {
        dispatch_into(&self.state, signal);
    }

    /// Start the dispatch loop on the shared channel
    ///
    /// Returns `None` if the loop was already started.
    pub fn spawn(&self) -> Option<JoinHandle<()>> {
        let mut receiver = self
            .shared_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()?;
        let state = Arc::clone(&self.state);
        Some(tokio::spawn(async move {
            while let Some(signal) = receiver.recv().await {
                dispatch_into(&state, signal);
            }
            debug!("Shared inbound channel closed, router stopping");
        }))
    }
}

impl Default for SignalRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(state: &Mutex<RouterState>) -> MutexGuard<'_, RouterState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn dispatch_into(state: &Mutex<RouterState>, signal: ControlSignal) {
    let mut state = lock(state);
    let signal = match state.routes.get(&signal.agent) {
        Some(route) => match route.send(signal) {
            Ok(()) => return,
            Err(mpsc::error::SendError(signal)) => {
                state.routes.remove(&signal.agent);
                signal
            }
        },
        None => signal,
    };
    debug!(agent = %signal.agent, kind = %signal.kind, "Parking signal for unregistered agent");
    state
        .pending
        .entry(signal.agent.clone())
        .or_default()
        .push(signal);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::ControlKind;

    #[tokio::test]
    async fn test_routes_by_agent() {
        let router = SignalRouter::new();
        let mut first = router.register("first");
        let mut second = router.register("second");

        router.dispatch(ControlSignal::approve("second"));
        router.dispatch(ControlSignal::deny("first"));

        assert_eq!(first.receiver.recv().await.unwrap().kind, ControlKind::Deny);
        assert_eq!(
            second.receiver.recv().await.unwrap().kind,
            ControlKind::Approve
        );
    }

    #[tokio::test]
    async fn test_parks_until_registered() {
        let router = SignalRouter::new();
        router.dispatch(ControlSignal::stop_agent("late"));
        router.dispatch(ControlSignal::approve("late"));
        assert_eq!(router.pending_for("late"), 2);

        let mut late = router.register("late");
        assert_eq!(router.pending_for("late"), 0);
        assert_eq!(late.receiver.recv().await.unwrap().kind, ControlKind::StopAgent);
        assert_eq!(late.receiver.recv().await.unwrap().kind, ControlKind::Approve);
    }

    #[tokio::test]
    async fn test_dropped_mailbox_parks_signal() {
        let router = SignalRouter::new();
        let inbound = router.register("gone");
        drop(inbound);

        router.dispatch(ControlSignal::approve("gone"));
        assert_eq!(router.pending_for("gone"), 1);
    }

    #[tokio::test]
    async fn test_spawned_loop_dispatches() {
        let router = SignalRouter::new();
        let mut agent = router.register("agent");
        let handle = router.spawn().unwrap();
        assert!(router.spawn().is_none());

        router.sender().send(ControlSignal::deny("agent")).unwrap();
        assert_eq!(agent.receiver.recv().await.unwrap().kind, ControlKind::Deny);
        handle.abort();
    }
}
