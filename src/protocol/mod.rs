//! Message protocol between the orchestrator and its client
//!
//! Two unidirectional, unbounded queues connect a client (UI, RPC layer, CLI)
//! to an agent:
//!
//! ```text
//! Client ──ControlSignal──► inbound  ──► Orchestrator
//! Client ◄─OutboundMessage── outbound ◄── Orchestrator
//! ```
//!
//! Every message carries the agent identifier it belongs to. When several
//! agents share one physical inbound channel, a [`SignalRouter`] dispatches
//! signals to the right agent and parks traffic for agents that have not
//! registered yet.

pub mod channel;
pub mod message;
pub mod router;
pub mod wire;

pub use channel::{channel_pair, AgentEnd, ClientEnd, Inbound};
pub use message::{
    AiContent, ControlKind, ControlSignal, ImageFormat, InlineImage, OutboundEvent,
    OutboundMessage, Status,
};
pub use router::SignalRouter;
pub use wire::{ProtocolError, WireMessage};
