//! Initiator orchestrator: outbound session negotiation and buffering of
//! application traffic until the session to a peer is active.
//!
//! # State
//!
//! One concurrent map holds every peer we talk to:
//!
//! ```text
//!  (absent) ──send_message──> Pending ──ResponderHandshake──> Active
//!                               │
//!                               └── expiry / rejected handshake ──> (absent)
//! ```
//!
//! A peer is therefore never Pending and Active at once. All transitions for a
//! peer run under that peer's map entry lock: promotion to Active and the flush
//! of buffered messages happen inside one critical section, so a concurrent
//! `send_message` cannot overtake the flush and a duplicated
//! `ResponderHandshake` finds the entry already Active.
//!
//! # Failure policy
//!
//! Messages that do not match live state (unknown peer, stale session id,
//! duplicate step) and unresolvable keys are logged at `WARN` and dropped.
//! Engine failures are returned to the caller and tear down the negotiation;
//! its buffered messages are published as a [`DeliveryFailure`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_queue::SegQueue;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use meshtrust::MeshTrustError;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::model::{
    AuthenticatedMessage, AuthenticatedMessageHeader, DeliveryFailure, FailureReason, Header,
    InitiatorHandshakeMessage, InitiatorHelloMessage, InitiatorOutbound, InitiatorSessionMessage, Peer,
    ResponderHandshakeMessage, ResponderHelloMessage, ResponderSessionMessage, SessionId, SessionMessage,
    SessionState,
};
use crate::protocol::{InitiatorProtocol, PeerDirectory, ProtocolFactory, SessionMac, Signer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NegotiationStep {
    AwaitingResponderHello,
    AwaitingResponderHandshake,
}

struct PendingNegotiation {
    session_id: SessionId,
    protocol: Box<dyn InitiatorProtocol>,
    step: NegotiationStep,
    /// Application messages waiting for the session, FIFO.
    queued: VecDeque<SessionMessage>,
    started_at: Instant,
}

struct ActiveSession {
    session_id: SessionId,
    session: Box<dyn SessionMac>,
}

enum PeerSession {
    Pending(PendingNegotiation),
    Active(ActiveSession),
}

/// Drives outbound negotiations and MAC-protects locally originated traffic.
///
/// Safe to share across threads; every method takes `&self`.
pub struct InitiatorOrchestrator {
    config: SessionConfig,
    local: Peer,
    directory: Arc<dyn PeerDirectory>,
    signer: Arc<dyn Signer>,
    protocols: Arc<dyn ProtocolFactory>,
    sessions: DashMap<Peer, PeerSession>,
    outbound: SegQueue<InitiatorOutbound>,
    failures: SegQueue<DeliveryFailure>,
}

impl InitiatorOrchestrator {
    pub fn new(
        config: SessionConfig,
        directory: Arc<dyn PeerDirectory>,
        signer: Arc<dyn Signer>,
        protocols: Arc<dyn ProtocolFactory>,
    ) -> Self {
        Self {
            config,
            local: directory.local_peer(),
            directory,
            signer,
            protocols,
            sessions: DashMap::new(),
            outbound: SegQueue::new(),
            failures: SegQueue::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Send an application payload.
    ///
    /// With an active session the message is MAC-protected and queued for the
    /// transport immediately. Otherwise it is buffered for the peer, and a
    /// negotiation is started if none is in flight. An unreachable peer is not
    /// an error here; the negotiation simply never completes.
    pub fn send_message(&self, message: SessionMessage) -> Result<()> {
        match self.sessions.entry(message.destination.clone()) {
            Entry::Occupied(mut entry) => match entry.get_mut() {
                PeerSession::Active(active) => {
                    let authenticated = self.authenticate(active, message);
                    self.outbound.push(InitiatorOutbound::Authenticated(authenticated));
                }
                PeerSession::Pending(pending) => {
                    debug!(
                        peer = %message.destination,
                        session_id = %pending.session_id,
                        queued = pending.queued.len() + 1,
                        "session pending, message buffered"
                    );
                    pending.queued.push_back(message);
                }
            },
            Entry::Vacant(entry) => {
                let (mut pending, hello) = self.begin_session_negotiation(entry.key())?;
                pending.queued.push_back(message);
                entry.insert(PeerSession::Pending(pending));
                self.outbound.push(InitiatorOutbound::Session(
                    InitiatorSessionMessage::InitiatorHello(hello),
                ));
            }
        }
        Ok(())
    }

    /// Create the engine and hello for a new negotiation with `peer`.
    /// The session id is generated here and nowhere else.
    fn begin_session_negotiation(&self, peer: &Peer) -> Result<(PendingNegotiation, InitiatorHelloMessage)> {
        let session_id = SessionId::random();
        let mut protocol = self.protocols.new_initiator(&session_id);
        let payload = protocol
            .generate_initiator_hello()
            .map_err(|e| SessionError::handshake(&session_id, e))?;

        info!(peer = %peer, session_id = %session_id, "starting session negotiation");

        let header = Header::new(self.local.clone(), peer.clone(), session_id.clone());
        let pending = PendingNegotiation {
            session_id,
            protocol,
            step: NegotiationStep::AwaitingResponderHello,
            queued: VecDeque::new(),
            started_at: Instant::now(),
        };
        Ok((pending, InitiatorHelloMessage { header, payload }))
    }

    fn authenticate(&self, active: &ActiveSession, message: SessionMessage) -> AuthenticatedMessage {
        let header = AuthenticatedMessageHeader {
            source: self.local.clone(),
            destination: message.destination,
            session_id: active.session_id.clone(),
        };
        let mac = active.session.create_mac(&header.to_mac_bytes(), &message.payload);
        AuthenticatedMessage {
            header,
            payload: message.payload,
            mac,
        }
    }

    /// Advance a negotiation with a message from the remote responder.
    pub fn process_session_message(&self, message: ResponderSessionMessage) -> Result<()> {
        let kind = message.kind();
        let header = message.header();
        if header.destination != self.local {
            warn!(
                peer = %header.source,
                destination = %header.destination,
                session_id = %header.session_id,
                kind,
                "handshake message not addressed to us, dropping"
            );
            return Ok(());
        }

        match message {
            ResponderSessionMessage::ResponderHello(hello) => self.process_responder_hello(hello, kind),
            ResponderSessionMessage::ResponderHandshake(handshake) => {
                self.process_responder_handshake(handshake, kind)
            }
        }
    }

    fn process_responder_hello(&self, message: ResponderHelloMessage, kind: &'static str) -> Result<()> {
        let peer = message.header.source.clone();
        let session_id = message.header.session_id.clone();

        // Resolve keys before touching the engine so a directory miss leaves
        // the negotiation retryable.
        let Some(our_key) = self.directory.local_public_key() else {
            warn!(peer = %peer, session_id = %session_id, "local public key unavailable, responder hello not processed");
            return Ok(());
        };
        let Some(peer_key) = self.directory.resolve_public_key(&peer) else {
            warn!(peer = %peer, session_id = %session_id, "peer public key not found, responder hello not processed");
            return Ok(());
        };

        let Entry::Occupied(mut entry) = self.sessions.entry(peer.clone()) else {
            warn!(peer = %peer, session_id = %session_id, "no pending negotiation for responder hello, dropping");
            return Ok(());
        };
        let Some(pending) = live_negotiation(entry.get_mut(), &peer, &session_id, NegotiationStep::AwaitingResponderHello, kind) else {
            return Ok(());
        };

        let signer = &self.signer;
        let sign = |data: &[u8]| signer.sign(data);
        let step = pending
            .protocol
            .receive_responder_hello(message.payload)
            .and_then(|()| pending.protocol.generate_handshake_secrets())
            .and_then(|()| {
                pending
                    .protocol
                    .generate_our_handshake_message(&our_key, &peer_key, peer.group_id(), &sign)
            });

        let payload = match step {
            Ok(payload) => payload,
            Err(source) => {
                if let PeerSession::Pending(failed) = entry.remove() {
                    return Err(self.fail_negotiation(peer, failed, source));
                }
                return Ok(());
            }
        };
        pending.step = NegotiationStep::AwaitingResponderHandshake;
        drop(entry);

        debug!(peer = %peer, session_id = %session_id, "responder hello processed, sending initiator handshake");
        let header = Header::new(self.local.clone(), peer, session_id);
        self.outbound.push(InitiatorOutbound::Session(
            InitiatorSessionMessage::InitiatorHandshake(InitiatorHandshakeMessage { header, payload }),
        ));
        Ok(())
    }

    fn process_responder_handshake(&self, message: ResponderHandshakeMessage, kind: &'static str) -> Result<()> {
        let peer = message.header.source.clone();
        let session_id = message.header.session_id.clone();

        let Some(peer_key) = self.directory.resolve_public_key(&peer) else {
            warn!(peer = %peer, session_id = %session_id, "peer public key not found, responder handshake not processed");
            return Ok(());
        };

        let Entry::Occupied(mut entry) = self.sessions.entry(peer.clone()) else {
            warn!(peer = %peer, session_id = %session_id, "no pending negotiation for responder handshake, dropping");
            return Ok(());
        };
        let Some(pending) = live_negotiation(entry.get_mut(), &peer, &session_id, NegotiationStep::AwaitingResponderHandshake, kind) else {
            return Ok(());
        };

        let finished = pending
            .protocol
            .validate_peer_handshake_message(&message.payload, &peer_key)
            .and_then(|()| pending.protocol.finish());
        let session = match finished {
            Ok(session) => session,
            Err(source) => {
                if let PeerSession::Pending(failed) = entry.remove() {
                    return Err(self.fail_negotiation(peer, failed, source));
                }
                return Ok(());
            }
        };

        // Flush under the entry lock, then publish the Active state.
        let active = ActiveSession {
            session_id: session_id.clone(),
            session,
        };
        let queued = std::mem::take(&mut pending.queued);
        let flushed = queued.len();
        for buffered in queued {
            let authenticated = self.authenticate(&active, buffered);
            self.outbound.push(InitiatorOutbound::Authenticated(authenticated));
        }
        entry.insert(PeerSession::Active(active));

        info!(peer = %peer, session_id = %session_id, flushed, "session active");
        Ok(())
    }

    /// Tear down a negotiation the engine rejected.
    fn fail_negotiation(&self, peer: Peer, failed: PendingNegotiation, source: MeshTrustError) -> SessionError {
        warn!(
            peer = %peer,
            session_id = %failed.session_id,
            error = %source,
            undelivered = failed.queued.len(),
            "session negotiation failed"
        );
        let error = SessionError::handshake(&failed.session_id, source);
        self.failures.push(DeliveryFailure {
            peer,
            session_id: failed.session_id,
            reason: FailureReason::HandshakeRejected,
            undelivered: failed.queued.into(),
        });
        error
    }

    /// Cancel negotiations older than the configured timeout, releasing their
    /// buffered messages as delivery failures. Returns how many were cancelled.
    pub fn expire_stale(&self, now: Instant) -> usize {
        let timeout = self.config.negotiation_timeout;
        let mut expired = Vec::new();
        self.sessions.retain(|peer, session| match session {
            PeerSession::Pending(pending) if now.saturating_duration_since(pending.started_at) >= timeout => {
                expired.push(DeliveryFailure {
                    peer: peer.clone(),
                    session_id: pending.session_id.clone(),
                    reason: FailureReason::Expired,
                    undelivered: std::mem::take(&mut pending.queued).into(),
                });
                false
            }
            _ => true,
        });

        let count = expired.len();
        for failure in expired {
            info!(
                peer = %failure.peer,
                session_id = %failure.session_id,
                undelivered = failure.undelivered.len(),
                "session negotiation expired"
            );
            self.failures.push(failure);
        }
        count
    }

    /// Next wire-ready message for the transport, if any.
    pub fn get_queued_outbound_message(&self) -> Option<InitiatorOutbound> {
        self.outbound.pop()
    }

    /// Next batch of messages released without delivery, if any.
    pub fn get_delivery_failure(&self) -> Option<DeliveryFailure> {
        self.failures.pop()
    }

    pub fn session_state(&self, peer: &Peer) -> SessionState {
        match self.sessions.get(peer).as_deref() {
            None => SessionState::None,
            Some(PeerSession::Pending(_)) => SessionState::Pending,
            Some(PeerSession::Active(_)) => SessionState::Active,
        }
    }

    /// Session id of the active or pending negotiation with `peer`.
    pub fn session_id(&self, peer: &Peer) -> Option<SessionId> {
        self.sessions.get(peer).map(|s| match &*s {
            PeerSession::Pending(p) => p.session_id.clone(),
            PeerSession::Active(a) => a.session_id.clone(),
        })
    }

    pub fn pending_message_count(&self, peer: &Peer) -> usize {
        match self.sessions.get(peer).as_deref() {
            Some(PeerSession::Pending(p)) => p.queued.len(),
            _ => 0,
        }
    }
}

/// The pending negotiation `message` belongs to, or `None` (logged) when the
/// message does not match live state.
fn live_negotiation<'a>(
    session: &'a mut PeerSession,
    peer: &Peer,
    session_id: &SessionId,
    expected: NegotiationStep,
    kind: &'static str,
) -> Option<&'a mut PendingNegotiation> {
    match session {
        PeerSession::Active(active) => {
            warn!(peer = %peer, session_id = %session_id, active_session = %active.session_id, kind, "session already active, dropping");
            None
        }
        PeerSession::Pending(pending) if pending.session_id != *session_id => {
            warn!(peer = %peer, session_id = %session_id, live_session = %pending.session_id, kind, "message for a stale negotiation, dropping");
            None
        }
        PeerSession::Pending(pending) if pending.step != expected => {
            warn!(peer = %peer, session_id = %session_id, kind, "unexpected handshake step, dropping");
            None
        }
        PeerSession::Pending(pending) => Some(pending),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MeshTrustProtocols, StaticPeerDirectory};
    use meshtrust::handshake::messages::{HandshakePayload, ResponderHelloPayload};
    use meshtrust::IdentityKeyPair;
    use std::time::Duration;

    fn orchestrator(timeout: Duration) -> InitiatorOrchestrator {
        let identity = Arc::new(IdentityKeyPair::generate());
        let directory = Arc::new(StaticPeerDirectory::new(
            Peer::new("A", "net"),
            Some(identity.public_key_bytes()),
        ));
        directory.insert(Peer::new("B", "net"), IdentityKeyPair::generate().public_key_bytes());
        InitiatorOrchestrator::new(
            SessionConfig::default().with_negotiation_timeout(timeout),
            directory,
            identity,
            Arc::new(MeshTrustProtocols::default()),
        )
    }

    fn peer_b() -> Peer {
        Peer::new("B", "net")
    }

    #[test]
    fn first_send_starts_exactly_one_negotiation() {
        let init = orchestrator(Duration::from_secs(30));
        init.send_message(SessionMessage::new(peer_b(), &b"one"[..])).unwrap();
        init.send_message(SessionMessage::new(peer_b(), &b"two"[..])).unwrap();

        let first = init.get_queued_outbound_message();
        assert!(matches!(
            first,
            Some(InitiatorOutbound::Session(InitiatorSessionMessage::InitiatorHello(_)))
        ));
        assert!(init.get_queued_outbound_message().is_none());
        assert_eq!(init.session_state(&peer_b()), SessionState::Pending);
        assert_eq!(init.pending_message_count(&peer_b()), 2);
    }

    #[test]
    fn hello_header_carries_generated_session_id() {
        let init = orchestrator(Duration::from_secs(30));
        init.send_message(SessionMessage::new(peer_b(), &b"hello"[..])).unwrap();
        let Some(InitiatorOutbound::Session(InitiatorSessionMessage::InitiatorHello(hello))) =
            init.get_queued_outbound_message()
        else {
            panic!("expected initiator hello");
        };
        assert_eq!(hello.header.source, Peer::new("A", "net"));
        assert_eq!(hello.header.destination, peer_b());
        assert_eq!(Some(hello.header.session_id), init.session_id(&peer_b()));
    }

    #[test]
    fn responder_handshake_without_negotiation_is_dropped() {
        let init = orchestrator(Duration::from_secs(30));
        let msg = ResponderSessionMessage::ResponderHandshake(ResponderHandshakeMessage {
            header: Header::new(peer_b(), Peer::new("A", "net"), "unknown".into()),
            payload: HandshakePayload { sealed: vec![1, 2, 3] },
        });
        init.process_session_message(msg).unwrap();
        assert_eq!(init.session_state(&peer_b()), SessionState::None);
        assert!(init.get_queued_outbound_message().is_none());
    }

    #[test]
    fn stale_session_id_is_dropped() {
        let init = orchestrator(Duration::from_secs(30));
        init.send_message(SessionMessage::new(peer_b(), &b"x"[..])).unwrap();
        init.get_queued_outbound_message();

        let msg = ResponderSessionMessage::ResponderHello(ResponderHelloMessage {
            header: Header::new(peer_b(), Peer::new("A", "net"), "old-attempt".into()),
            payload: ResponderHelloPayload {
                ephemeral_public: [9; 32],
                cipher_suite: 0x0002,
            },
        });
        init.process_session_message(msg).unwrap();
        assert_eq!(init.session_state(&peer_b()), SessionState::Pending);
        assert!(init.get_queued_outbound_message().is_none());
    }

    #[test]
    fn handshake_before_hello_is_dropped_not_fatal() {
        let init = orchestrator(Duration::from_secs(30));
        init.send_message(SessionMessage::new(peer_b(), &b"x"[..])).unwrap();
        let session_id = init.session_id(&peer_b()).unwrap();

        let msg = ResponderSessionMessage::ResponderHandshake(ResponderHandshakeMessage {
            header: Header::new(peer_b(), Peer::new("A", "net"), session_id),
            payload: HandshakePayload { sealed: vec![0; 8] },
        });
        init.process_session_message(msg).unwrap();
        assert_eq!(init.session_state(&peer_b()), SessionState::Pending);
        assert_eq!(init.pending_message_count(&peer_b()), 1);
    }

    #[test]
    fn reply_addressed_to_another_node_is_dropped() {
        let init = orchestrator(Duration::from_secs(30));
        init.send_message(SessionMessage::new(peer_b(), &b"x"[..])).unwrap();
        init.get_queued_outbound_message();
        let session_id = init.session_id(&peer_b()).unwrap();

        let msg = ResponderSessionMessage::ResponderHello(ResponderHelloMessage {
            header: Header::new(peer_b(), Peer::new("Z", "net"), session_id.clone()),
            payload: ResponderHelloPayload {
                ephemeral_public: IdentityKeyPair::generate().public_key_bytes(),
                cipher_suite: 0x0002,
            },
        });
        init.process_session_message(msg).unwrap();

        assert!(init.get_queued_outbound_message().is_none());
        assert_eq!(init.session_state(&peer_b()), SessionState::Pending);
        assert_eq!(init.session_id(&peer_b()), Some(session_id));
    }

    #[test]
    fn unresolvable_peer_leaves_negotiation_pending() {
        let init = orchestrator(Duration::from_secs(30));
        let stranger = Peer::new("C", "net");
        init.send_message(SessionMessage::new(stranger.clone(), &b"x"[..])).unwrap();
        let session_id = init.session_id(&stranger).unwrap();

        let msg = ResponderSessionMessage::ResponderHello(ResponderHelloMessage {
            header: Header::new(stranger.clone(), Peer::new("A", "net"), session_id),
            payload: ResponderHelloPayload {
                ephemeral_public: [9; 32],
                cipher_suite: 0x0002,
            },
        });
        init.process_session_message(msg).unwrap();
        assert_eq!(init.session_state(&stranger), SessionState::Pending);
    }

    #[test]
    fn expiry_releases_buffered_messages_in_order() {
        let init = orchestrator(Duration::from_secs(30));
        init.send_message(SessionMessage::new(peer_b(), &b"1"[..])).unwrap();
        init.send_message(SessionMessage::new(peer_b(), &b"2"[..])).unwrap();

        assert_eq!(init.expire_stale(Instant::now()), 0);
        let later = Instant::now() + Duration::from_secs(31);
        assert_eq!(init.expire_stale(later), 1);
        assert_eq!(init.session_state(&peer_b()), SessionState::None);

        let failure = init.get_delivery_failure().unwrap();
        assert_eq!(failure.reason, FailureReason::Expired);
        let payloads: Vec<_> = failure.undelivered.iter().map(|m| m.payload.clone()).collect();
        assert_eq!(payloads, vec![&b"1"[..], &b"2"[..]]);
    }
}
