//! Collaborator seams: peer directory, signer and the authentication engine.
//!
//! The orchestrators only see these traits. `MeshTrustProtocols` and
//! `StaticPeerDirectory` are the in-tree implementations; embedders can swap
//! either for their own membership service or engine.

use dashmap::DashMap;
use meshtrust::handshake::messages::{HandshakePayload, InitiatorHelloPayload, ResponderHelloPayload};
use meshtrust::handshake::protocol::SignFn;
use meshtrust::{
    accept_initiator_hello, AuthenticatedSession, CipherSuite, IdentityKeyPair, InitiatorHandshake, Mac,
    PublicKeyBytes, ResponderHandshake,
};
use zeroize::Zeroizing;

use crate::model::{Peer, SessionId, Step2Message};

/// Maps peers to their current public key.
///
/// Absence is a normal outcome (membership churn) and is never an error.
pub trait PeerDirectory: Send + Sync {
    fn resolve_public_key(&self, peer: &Peer) -> Option<PublicKeyBytes>;
    fn local_peer(&self) -> Peer;
    fn local_public_key(&self) -> Option<PublicKeyBytes>;
}

/// The local node's signing function. Failures propagate.
pub trait Signer: Send + Sync {
    fn sign(&self, data: &[u8]) -> meshtrust::Result<Vec<u8>>;
}

impl Signer for IdentityKeyPair {
    fn sign(&self, data: &[u8]) -> meshtrust::Result<Vec<u8>> {
        Ok(IdentityKeyPair::sign(self, data).to_vec())
    }
}

/// Finalized session: MAC creation and validation.
pub trait SessionMac: Send + Sync {
    fn create_mac(&self, header: &[u8], payload: &[u8]) -> Mac;
    fn validate_mac(&self, header: &[u8], payload: &[u8], mac: &Mac) -> meshtrust::Result<()>;
}

/// Initiator-side engine for one negotiation.
pub trait InitiatorProtocol: Send + Sync {
    fn generate_initiator_hello(&mut self) -> meshtrust::Result<InitiatorHelloPayload>;
    fn receive_responder_hello(&mut self, hello: ResponderHelloPayload) -> meshtrust::Result<()>;
    fn generate_handshake_secrets(&mut self) -> meshtrust::Result<()>;
    fn generate_our_handshake_message(
        &mut self,
        our_key: &PublicKeyBytes,
        peer_key: &PublicKeyBytes,
        group_id: &str,
        sign: SignFn<'_>,
    ) -> meshtrust::Result<HandshakePayload>;
    fn validate_peer_handshake_message(
        &mut self,
        payload: &HandshakePayload,
        peer_key: &PublicKeyBytes,
    ) -> meshtrust::Result<()>;
    /// Consume the negotiation into a session. Succeeds at most once.
    fn finish(&mut self) -> meshtrust::Result<Box<dyn SessionMac>>;
}

/// Responder-side engine for one negotiation.
pub trait ResponderProtocol: Send + Sync {
    fn generate_handshake_secrets(&mut self) -> meshtrust::Result<()>;
    fn validate_peer_handshake_message(
        &mut self,
        payload: &HandshakePayload,
        peer_key: &PublicKeyBytes,
    ) -> meshtrust::Result<()>;
    fn generate_our_handshake_message(
        &mut self,
        our_key: &PublicKeyBytes,
        sign: SignFn<'_>,
    ) -> meshtrust::Result<HandshakePayload>;
    fn finish(&mut self) -> meshtrust::Result<Box<dyn SessionMac>>;
}

/// Creates engine instances; one per negotiation attempt.
pub trait ProtocolFactory: Send + Sync {
    fn new_initiator(&self, session_id: &SessionId) -> Box<dyn InitiatorProtocol>;
    fn new_responder(&self, step2: &Step2Message) -> meshtrust::Result<Box<dyn ResponderProtocol>>;
    /// Answer an initiator hello: the reply plus the responder's ephemeral private key.
    fn accept_hello(
        &self,
        hello: &InitiatorHelloPayload,
    ) -> meshtrust::Result<(ResponderHelloPayload, Zeroizing<[u8; 32]>)>;
}

// ── MeshTrust-backed implementations ─────────────────────────────────────

impl SessionMac for AuthenticatedSession {
    fn create_mac(&self, header: &[u8], payload: &[u8]) -> Mac {
        AuthenticatedSession::create_mac(self, header, payload)
    }

    fn validate_mac(&self, header: &[u8], payload: &[u8], mac: &Mac) -> meshtrust::Result<()> {
        AuthenticatedSession::validate_mac(self, header, payload, mac)
    }
}

impl InitiatorProtocol for InitiatorHandshake {
    fn generate_initiator_hello(&mut self) -> meshtrust::Result<InitiatorHelloPayload> {
        InitiatorHandshake::generate_initiator_hello(self)
    }

    fn receive_responder_hello(&mut self, hello: ResponderHelloPayload) -> meshtrust::Result<()> {
        InitiatorHandshake::receive_responder_hello(self, hello)
    }

    fn generate_handshake_secrets(&mut self) -> meshtrust::Result<()> {
        InitiatorHandshake::generate_handshake_secrets(self)
    }

    fn generate_our_handshake_message(
        &mut self,
        our_key: &PublicKeyBytes,
        peer_key: &PublicKeyBytes,
        group_id: &str,
        sign: SignFn<'_>,
    ) -> meshtrust::Result<HandshakePayload> {
        InitiatorHandshake::generate_our_handshake_message(self, our_key, peer_key, group_id, sign)
    }

    fn validate_peer_handshake_message(
        &mut self,
        payload: &HandshakePayload,
        peer_key: &PublicKeyBytes,
    ) -> meshtrust::Result<()> {
        InitiatorHandshake::validate_peer_handshake_message(self, payload, peer_key)
    }

    fn finish(&mut self) -> meshtrust::Result<Box<dyn SessionMac>> {
        let session = InitiatorHandshake::finish(self)?;
        Ok(Box::new(session))
    }
}

impl ResponderProtocol for ResponderHandshake {
    fn generate_handshake_secrets(&mut self) -> meshtrust::Result<()> {
        ResponderHandshake::generate_handshake_secrets(self)
    }

    fn validate_peer_handshake_message(
        &mut self,
        payload: &HandshakePayload,
        peer_key: &PublicKeyBytes,
    ) -> meshtrust::Result<()> {
        ResponderHandshake::validate_peer_handshake_message(self, payload, peer_key)
    }

    fn generate_our_handshake_message(
        &mut self,
        our_key: &PublicKeyBytes,
        sign: SignFn<'_>,
    ) -> meshtrust::Result<HandshakePayload> {
        ResponderHandshake::generate_our_handshake_message(self, our_key, sign)
    }

    fn finish(&mut self) -> meshtrust::Result<Box<dyn SessionMac>> {
        let session = ResponderHandshake::finish(self)?;
        Ok(Box::new(session))
    }
}

/// Engine factory backed by `meshtrust`.
#[derive(Debug, Clone)]
pub struct MeshTrustProtocols {
    cipher_suites: Vec<CipherSuite>,
}

impl MeshTrustProtocols {
    /// `cipher_suites` in preference order; used both for the offer and for
    /// selection when answering a hello.
    pub fn with_cipher_suites(cipher_suites: &[CipherSuite]) -> Self {
        Self {
            cipher_suites: cipher_suites.to_vec(),
        }
    }
}

impl Default for MeshTrustProtocols {
    fn default() -> Self {
        Self::with_cipher_suites(&CipherSuite::ALL)
    }
}

impl ProtocolFactory for MeshTrustProtocols {
    fn new_initiator(&self, session_id: &SessionId) -> Box<dyn InitiatorProtocol> {
        Box::new(InitiatorHandshake::new(session_id.as_str(), &self.cipher_suites))
    }

    fn new_responder(&self, step2: &Step2Message) -> meshtrust::Result<Box<dyn ResponderProtocol>> {
        let engine = ResponderHandshake::from_step2(
            step2.header.session_id.as_str(),
            step2.initiator_hello.clone(),
            step2.responder_hello.clone(),
            *step2.ephemeral_private,
            step2.ephemeral_public,
        )?;
        Ok(Box::new(engine))
    }

    fn accept_hello(
        &self,
        hello: &InitiatorHelloPayload,
    ) -> meshtrust::Result<(ResponderHelloPayload, Zeroizing<[u8; 32]>)> {
        let (reply, ephemeral) = accept_initiator_hello(hello, &self.cipher_suites)?;
        Ok((reply, Zeroizing::new(ephemeral.secret_bytes())))
    }
}

/// In-memory directory for tests, demos and deployments without a
/// membership service.
#[derive(Debug)]
pub struct StaticPeerDirectory {
    local: Peer,
    local_key: Option<PublicKeyBytes>,
    keys: DashMap<Peer, PublicKeyBytes>,
}

impl StaticPeerDirectory {
    pub fn new(local: Peer, local_key: Option<PublicKeyBytes>) -> Self {
        Self {
            local,
            local_key,
            keys: DashMap::new(),
        }
    }

    pub fn insert(&self, peer: Peer, key: PublicKeyBytes) {
        self.keys.insert(peer, key);
    }

    pub fn remove(&self, peer: &Peer) -> Option<PublicKeyBytes> {
        self.keys.remove(peer).map(|(_, key)| key)
    }
}

impl PeerDirectory for StaticPeerDirectory {
    fn resolve_public_key(&self, peer: &Peer) -> Option<PublicKeyBytes> {
        if *peer == self.local {
            return self.local_key;
        }
        self.keys.get(peer).map(|key| *key)
    }

    fn local_peer(&self) -> Peer {
        self.local.clone()
    }

    fn local_public_key(&self) -> Option<PublicKeyBytes> {
        self.local_key
    }
}
