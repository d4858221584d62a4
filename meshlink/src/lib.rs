//! MeshLink -- session layer for peer-to-peer ledger messaging.
//!
//! Establishes mutually authenticated sessions between network nodes and
//! carries MAC-protected application payloads over them:
//! - **Initiator**: starts negotiations, buffers payloads until the session
//!   is active, then flushes them in submission order
//! - **Responder**: answers negotiations and delivers payloads whose MAC
//!   validates
//! - **Gateway**: answers `InitiatorHello` in front of the responder
//!
//! Neither orchestrator owns threads or performs I/O. Callers feed messages
//! in and drain the outbound, inbound and failure queues.

pub mod config;
pub mod error;
pub mod gateway;
pub mod initiator;
pub mod model;
pub mod protocol;
pub mod responder;
pub mod sweeper;

// Re-export key public types at crate root.
pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use gateway::HelloGateway;
pub use initiator::InitiatorOrchestrator;
pub use model::{
    AuthenticatedMessage, AuthenticatedMessageHeader, DeliveryFailure, FailureReason, Header,
    InboundSessionMessage, InitiatorOutbound, InitiatorSessionMessage, Peer, ResponderSessionMessage, SessionId,
    SessionMessage, SessionState, Step2Message,
};
pub use protocol::{MeshTrustProtocols, PeerDirectory, ProtocolFactory, Signer, StaticPeerDirectory};
pub use responder::ResponderOrchestrator;
pub use sweeper::{spawn_expiry_sweeper, ExpireStale};
