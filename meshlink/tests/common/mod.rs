//! Shared harness: in-memory nodes wired back to back.

#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use meshlink::{
    HelloGateway, InitiatorOrchestrator, InitiatorOutbound, MeshTrustProtocols, Peer, ResponderOrchestrator,
    ResponderSessionMessage, SessionConfig, StaticPeerDirectory,
};
use meshtrust::IdentityKeyPair;

pub const GROUP: &str = "ledger-net";

pub struct Node {
    pub peer: Peer,
    pub identity: Arc<IdentityKeyPair>,
    pub directory: Arc<StaticPeerDirectory>,
    pub initiator: Arc<InitiatorOrchestrator>,
    pub responder: Arc<ResponderOrchestrator>,
    pub gateway: HelloGateway,
}

impl Node {
    pub fn new(name: &str, config: SessionConfig) -> Self {
        let peer = Peer::new(name, GROUP);
        let identity = Arc::new(IdentityKeyPair::generate());
        let directory = Arc::new(StaticPeerDirectory::new(peer.clone(), Some(identity.public_key_bytes())));
        let protocols = Arc::new(MeshTrustProtocols::default());
        let initiator = Arc::new(InitiatorOrchestrator::new(
            config.clone(),
            directory.clone(),
            identity.clone(),
            protocols.clone(),
        ));
        let responder = Arc::new(ResponderOrchestrator::new(
            config,
            directory.clone(),
            identity.clone(),
            protocols.clone(),
        ));
        Self {
            peer,
            identity,
            directory,
            initiator,
            responder,
            gateway: HelloGateway::new(protocols),
        }
    }

    pub fn learn(&self, other: &Node) {
        self.directory.insert(other.peer.clone(), other.identity.public_key_bytes());
    }

    /// Payloads delivered to this node's application, in arrival order.
    pub fn drain_inbound(&self) -> Vec<Bytes> {
        std::iter::from_fn(|| self.responder.get_queued_inbound_message())
            .map(|m| m.payload)
            .collect()
    }
}

/// Two nodes that know each other's keys.
pub fn pair(config: SessionConfig) -> (Node, Node) {
    let a = Node::new("A", config.clone());
    let b = Node::new("B", config);
    a.learn(&b);
    b.learn(&a);
    (a, b)
}

/// Shuttle messages from `a`'s initiator to `b`'s responder side and back
/// until both directions are quiet.
pub fn pump(a: &Node, b: &Node) {
    loop {
        let mut progressed = false;
        while let Some(out) = a.initiator.get_queued_outbound_message() {
            progressed = true;
            match out {
                InitiatorOutbound::Session(msg) => {
                    if let Some(reply) = b.gateway.dispatch(msg, &b.responder).unwrap() {
                        a.initiator
                            .process_session_message(ResponderSessionMessage::ResponderHello(reply))
                            .unwrap();
                    }
                }
                InitiatorOutbound::Authenticated(msg) => b.responder.process_authenticated_message(msg),
            }
        }
        while let Some(reply) = b.responder.get_queued_outbound_message() {
            progressed = true;
            a.initiator.process_session_message(reply).unwrap();
        }
        if !progressed {
            break;
        }
    }
}
