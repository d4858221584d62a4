//! Responder orchestrator: inbound session negotiation and validation of
//! application traffic on established sessions.
//!
//! # State
//!
//! One concurrent map keyed by session id:
//!
//! ```text
//!  (absent) ──Step2──> Pending ──InitiatorHandshake──> Claimed ──> Active
//!                         │                               │
//!                         └── expiry ──> (absent) <── rejected handshake
//! ```
//!
//! `Claimed` marks a negotiation whose engine has been taken out by the
//! thread processing its `InitiatorHandshake`. The id stays occupied while
//! that thread runs the engine, so a late `Step2` cannot reopen it and a
//! duplicated handshake cannot claim it twice. Only the claimant promotes
//! the entry to Active.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_queue::SegQueue;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use meshtrust::handshake::messages::ResponderHelloPayload;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::model::{
    AuthenticatedMessage, InboundSessionMessage, InitiatorHandshakeMessage, InitiatorSessionMessage, Peer,
    ResponderHandshakeMessage, ResponderSessionMessage, SessionId, SessionState, Step2Message,
};
use crate::protocol::{PeerDirectory, ProtocolFactory, ResponderProtocol, SessionMac, Signer};

struct PendingHandshake {
    /// The initiator, as named by the `Step2` header.
    peer: Peer,
    /// Our answer to the initiator's hello; replayed for duplicated hellos.
    responder_hello: ResponderHelloPayload,
    protocol: Box<dyn ResponderProtocol>,
    started_at: Instant,
}

struct ActiveSession {
    peer: Peer,
    session: Box<dyn SessionMac>,
}

enum ResponderSession {
    Pending(PendingHandshake),
    Claimed { peer: Peer },
    Active(ActiveSession),
}

/// Answers inbound negotiations and delivers MAC-validated payloads.
///
/// Safe to share across threads; every method takes `&self`.
pub struct ResponderOrchestrator {
    config: SessionConfig,
    local: Peer,
    directory: Arc<dyn PeerDirectory>,
    signer: Arc<dyn Signer>,
    protocols: Arc<dyn ProtocolFactory>,
    sessions: DashMap<SessionId, ResponderSession>,
    outbound: SegQueue<ResponderSessionMessage>,
    inbound: SegQueue<InboundSessionMessage>,
}

impl ResponderOrchestrator {
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
            inbound: SegQueue::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Validate an application message and queue its payload for the local
    /// application. Anything that does not validate is logged and dropped.
    pub fn process_authenticated_message(&self, message: AuthenticatedMessage) {
        let header = &message.header;
        let entry = self.sessions.get(&header.session_id);
        let Some(ResponderSession::Active(active)) = entry.as_deref() else {
            warn!(source = %header.source, session_id = %header.session_id, "no active session for authenticated message, dropping");
            return;
        };
        if active.peer != header.source {
            warn!(
                source = %header.source,
                session_peer = %active.peer,
                session_id = %header.session_id,
                "authenticated message source does not match session peer, dropping"
            );
            return;
        }
        if header.destination != self.local {
            warn!(destination = %header.destination, session_id = %header.session_id, "authenticated message not addressed to us, dropping");
            return;
        }
        if let Err(error) = active
            .session
            .validate_mac(&header.to_mac_bytes(), &message.payload, &message.mac)
        {
            warn!(source = %header.source, session_id = %header.session_id, error = %error, "MAC validation failed, dropping");
            return;
        }
        drop(entry);

        debug!(source = %message.header.source, len = message.payload.len(), "authenticated message accepted");
        self.inbound.push(InboundSessionMessage {
            source: message.header.source,
            payload: message.payload,
        });
    }

    /// Advance an inbound negotiation.
    ///
    /// An `InitiatorHello` is answered by the hello gateway; one reaching
    /// this method is a wiring error and is returned as
    /// [`SessionError::IllegalMessage`].
    pub fn process_session_message(&self, message: InitiatorSessionMessage) -> Result<()> {
        if let InitiatorSessionMessage::InitiatorHello(_) = message {
            return Err(SessionError::IllegalMessage {
                role: "responder",
                message: message.kind(),
            });
        }
        let header = message.header();
        if header.destination != self.local {
            warn!(
                peer = %header.source,
                destination = %header.destination,
                session_id = %header.session_id,
                kind = message.kind(),
                "handshake message not addressed to us, dropping"
            );
            return Ok(());
        }

        match message {
            InitiatorSessionMessage::InitiatorHello(_) => Ok(()),
            InitiatorSessionMessage::Step2(step2) => self.accept_step2(step2).map(|_| ()),
            InitiatorSessionMessage::InitiatorHandshake(handshake) => self.process_initiator_handshake(handshake),
        }
    }

    /// Open a pending negotiation from `step2`.
    ///
    /// Returns the hello payload the initiator must see for this session: the
    /// one in `step2` when it opened the negotiation, the stored one when a
    /// negotiation from the same peer is already pending. `None` when the
    /// session id is claimed, active or owned by another peer; no reply may
    /// be sent then.
    pub(crate) fn accept_step2(&self, step2: Step2Message) -> Result<Option<ResponderHelloPayload>> {
        let session_id = step2.header.session_id.clone();
        let peer = step2.header.source.clone();

        if step2.header.destination != self.local {
            warn!(peer = %peer, destination = %step2.header.destination, session_id = %session_id, "step2 not addressed to us, dropping");
            return Ok(None);
        }

        match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(entry) => match entry.get() {
                ResponderSession::Pending(pending) if pending.peer == peer => {
                    debug!(peer = %peer, session_id = %session_id, "duplicate step2, replaying first responder hello");
                    Ok(Some(pending.responder_hello.clone()))
                }
                ResponderSession::Pending(_) => {
                    warn!(peer = %peer, session_id = %session_id, "step2 for a negotiation owned by another peer, dropping");
                    Ok(None)
                }
                ResponderSession::Claimed { .. } | ResponderSession::Active(_) => {
                    warn!(peer = %peer, session_id = %session_id, "step2 for a completed negotiation, dropping");
                    Ok(None)
                }
            },
            Entry::Vacant(entry) => {
                let mut protocol = self
                    .protocols
                    .new_responder(&step2)
                    .map_err(|e| SessionError::handshake(&session_id, e))?;
                protocol
                    .generate_handshake_secrets()
                    .map_err(|e| SessionError::handshake(&session_id, e))?;
                let responder_hello = step2.responder_hello;
                entry.insert(ResponderSession::Pending(PendingHandshake {
                    peer: peer.clone(),
                    responder_hello: responder_hello.clone(),
                    protocol,
                    started_at: Instant::now(),
                }));
                debug!(peer = %peer, session_id = %session_id, "inbound negotiation pending");
                Ok(Some(responder_hello))
            }
        }
    }

    fn process_initiator_handshake(&self, message: InitiatorHandshakeMessage) -> Result<()> {
        let peer = message.header.source.clone();
        let session_id = message.header.session_id.clone();

        if !matches!(self.session_state(&session_id), SessionState::Pending) {
            warn!(peer = %peer, session_id = %session_id, "no pending negotiation for initiator handshake, dropping");
            return Ok(());
        }

        // Resolve keys before claiming so a directory miss leaves the
        // negotiation pending for a retransmission.
        let Some(our_key) = self.directory.local_public_key() else {
            warn!(peer = %peer, session_id = %session_id, "local public key unavailable, initiator handshake not processed");
            return Ok(());
        };
        let Some(peer_key) = self.directory.resolve_public_key(&peer) else {
            warn!(peer = %peer, session_id = %session_id, "peer public key not found, initiator handshake not processed");
            return Ok(());
        };

        let Some(mut pending) = self.claim(&session_id, &peer) else {
            return Ok(());
        };

        let signer = &self.signer;
        let sign = |data: &[u8]| signer.sign(data);
        let protocol = &mut pending.protocol;
        let completed = protocol
            .validate_peer_handshake_message(&message.payload, &peer_key)
            .and_then(|()| protocol.generate_our_handshake_message(&our_key, &sign))
            .and_then(|reply| Ok((reply, protocol.finish()?)));
        let (payload, session) = match completed {
            Ok(done) => done,
            Err(source) => {
                self.sessions
                    .remove_if(&session_id, |_, s| matches!(s, ResponderSession::Claimed { .. }));
                warn!(peer = %peer, session_id = %session_id, error = %source, "inbound negotiation failed");
                return Err(SessionError::handshake(&session_id, source));
            }
        };

        match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(mut entry) if matches!(entry.get(), ResponderSession::Claimed { .. }) => {
                entry.insert(ResponderSession::Active(ActiveSession {
                    peer: peer.clone(),
                    session,
                }));
            }
            _ => {
                warn!(peer = %peer, session_id = %session_id, "claim on negotiation lost, discarding session");
                return Ok(());
            }
        }

        self.outbound.push(ResponderSessionMessage::ResponderHandshake(ResponderHandshakeMessage {
            header: message.header.reply(),
            payload,
        }));
        info!(peer = %peer, session_id = %session_id, "session active");
        Ok(())
    }

    /// Take the engine of a pending negotiation opened by `peer`, leaving a
    /// claim marker in its place. `None` (logged) if another thread got there
    /// first or the negotiation belongs to someone else.
    fn claim(&self, session_id: &SessionId, peer: &Peer) -> Option<PendingHandshake> {
        let Entry::Occupied(mut entry) = self.sessions.entry(session_id.clone()) else {
            warn!(peer = %peer, session_id = %session_id, "negotiation expired before claim, dropping");
            return None;
        };
        match entry.get() {
            ResponderSession::Pending(pending) if pending.peer == *peer => {}
            ResponderSession::Pending(pending) => {
                warn!(peer = %peer, session_peer = %pending.peer, session_id = %session_id, "initiator handshake from the wrong peer, dropping");
                return None;
            }
            ResponderSession::Claimed { .. } | ResponderSession::Active(_) => {
                warn!(peer = %peer, session_id = %session_id, "negotiation already claimed, dropping duplicate");
                return None;
            }
        }
        match entry.insert(ResponderSession::Claimed { peer: peer.clone() }) {
            ResponderSession::Pending(pending) => Some(pending),
            _ => None,
        }
    }

    /// Drop pending negotiations older than the configured timeout.
    /// Returns how many were removed. Claimed and active entries stay.
    pub fn expire_stale(&self, now: Instant) -> usize {
        let timeout = self.config.negotiation_timeout;
        let mut expired = 0;
        self.sessions.retain(|session_id, session| match session {
            ResponderSession::Pending(pending) if now.saturating_duration_since(pending.started_at) >= timeout => {
                info!(peer = %pending.peer, session_id = %session_id, "inbound negotiation expired");
                expired += 1;
                false
            }
            _ => true,
        });
        expired
    }

    /// Next handshake reply for the transport, if any.
    pub fn get_queued_outbound_message(&self) -> Option<ResponderSessionMessage> {
        self.outbound.pop()
    }

    /// Next validated payload for the local application, if any.
    pub fn get_queued_inbound_message(&self) -> Option<InboundSessionMessage> {
        self.inbound.pop()
    }

    /// A claimed negotiation reports as Pending until its promotion lands.
    pub fn session_state(&self, session_id: &SessionId) -> SessionState {
        match self.sessions.get(session_id).as_deref() {
            None => SessionState::None,
            Some(ResponderSession::Pending(_) | ResponderSession::Claimed { .. }) => SessionState::Pending,
            Some(ResponderSession::Active(_)) => SessionState::Active,
        }
    }

    /// The initiator an active session was negotiated with.
    pub fn session_peer(&self, session_id: &SessionId) -> Option<Peer> {
        match self.sessions.get(session_id).as_deref() {
            Some(ResponderSession::Active(active)) => Some(active.peer.clone()),
            _ => None,
        }
    }
}
