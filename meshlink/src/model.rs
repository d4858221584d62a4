//! Session and message model shared by both orchestrators.
//!
//! Handshake messages are split into two closed enums by the role that
//! receives them: [`InitiatorSessionMessage`] flows towards a responder,
//! [`ResponderSessionMessage`] flows back towards an initiator. Matching on
//! them is exhaustive, so a new handshake step cannot be silently ignored.

use std::fmt;

use bytes::Bytes;
use meshtrust::handshake::messages::{HandshakePayload, InitiatorHelloPayload, ResponderHelloPayload};
use meshtrust::Mac;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

/// A logical network participant: a name within a group (network).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Peer {
    name: String,
    group_id: String,
}

impl Peer {
    pub fn new(name: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group_id: group_id.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.group_id)
    }
}

/// Identifies one negotiation attempt. Generated by the initiator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// A fresh random 128-bit id, hex encoded.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Routing header carried by every handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub source: Peer,
    pub destination: Peer,
    pub session_id: SessionId,
}

impl Header {
    pub fn new(source: Peer, destination: Peer, session_id: SessionId) -> Self {
        Self {
            source,
            destination,
            session_id,
        }
    }

    /// Header for a reply within the same negotiation.
    pub fn reply(&self) -> Self {
        Self {
            source: self.destination.clone(),
            destination: self.source.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

// ── Handshake messages ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct InitiatorHelloMessage {
    pub header: Header,
    pub payload: InitiatorHelloPayload,
}

/// Post-hello state produced by the hello gateway for the responder:
/// both hellos plus the responder's ephemeral key material.
#[derive(Clone)]
pub struct Step2Message {
    pub header: Header,
    pub initiator_hello: InitiatorHelloPayload,
    pub responder_hello: ResponderHelloPayload,
    pub ephemeral_private: Zeroizing<[u8; 32]>,
    pub ephemeral_public: [u8; 32],
}

impl fmt::Debug for Step2Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step2Message")
            .field("header", &self.header)
            .field("initiator_hello", &self.initiator_hello)
            .field("responder_hello", &self.responder_hello)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct InitiatorHandshakeMessage {
    pub header: Header,
    pub payload: HandshakePayload,
}

#[derive(Debug, Clone)]
pub struct ResponderHelloMessage {
    pub header: Header,
    pub payload: ResponderHelloPayload,
}

#[derive(Debug, Clone)]
pub struct ResponderHandshakeMessage {
    pub header: Header,
    pub payload: HandshakePayload,
}

/// Handshake messages received by the responder side.
#[derive(Debug, Clone)]
pub enum InitiatorSessionMessage {
    InitiatorHello(InitiatorHelloMessage),
    Step2(Step2Message),
    InitiatorHandshake(InitiatorHandshakeMessage),
}

impl InitiatorSessionMessage {
    pub fn header(&self) -> &Header {
        match self {
            InitiatorSessionMessage::InitiatorHello(m) => &m.header,
            InitiatorSessionMessage::Step2(m) => &m.header,
            InitiatorSessionMessage::InitiatorHandshake(m) => &m.header,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InitiatorSessionMessage::InitiatorHello(_) => "InitiatorHello",
            InitiatorSessionMessage::Step2(_) => "Step2",
            InitiatorSessionMessage::InitiatorHandshake(_) => "InitiatorHandshake",
        }
    }
}

/// Handshake messages received by the initiator side.
#[derive(Debug, Clone)]
pub enum ResponderSessionMessage {
    ResponderHello(ResponderHelloMessage),
    ResponderHandshake(ResponderHandshakeMessage),
}

impl ResponderSessionMessage {
    pub fn header(&self) -> &Header {
        match self {
            ResponderSessionMessage::ResponderHello(m) => &m.header,
            ResponderSessionMessage::ResponderHandshake(m) => &m.header,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResponderSessionMessage::ResponderHello(_) => "ResponderHello",
            ResponderSessionMessage::ResponderHandshake(_) => "ResponderHandshake",
        }
    }
}

// ── Application messages ─────────────────────────────────────────────────

/// An outbound payload submitted by the local application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMessage {
    pub destination: Peer,
    pub payload: Bytes,
}

impl SessionMessage {
    pub fn new(destination: Peer, payload: impl Into<Bytes>) -> Self {
        Self {
            destination,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedMessageHeader {
    pub source: Peer,
    pub destination: Peer,
    pub session_id: SessionId,
}

impl AuthenticatedMessageHeader {
    /// Deterministic encoding covered by the MAC: every field u32-length-prefixed.
    pub fn to_mac_bytes(&self) -> Vec<u8> {
        let fields = [
            self.source.name(),
            self.source.group_id(),
            self.destination.name(),
            self.destination.group_id(),
            self.session_id.as_str(),
        ];
        let mut out = Vec::with_capacity(fields.iter().map(|f| f.len() + 4).sum());
        for field in fields {
            out.extend_from_slice(&(field.len() as u32).to_be_bytes());
            out.extend_from_slice(field.as_bytes());
        }
        out
    }
}

/// Wire form of an application payload on an active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedMessage {
    pub header: AuthenticatedMessageHeader,
    pub payload: Bytes,
    pub mac: Mac,
}

/// A MAC-validated payload delivered to the local application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSessionMessage {
    pub source: Peer,
    pub payload: Bytes,
}

/// What the initiator's outbound queue yields to the transport.
#[derive(Debug, Clone)]
pub enum InitiatorOutbound {
    Session(InitiatorSessionMessage),
    Authenticated(AuthenticatedMessage),
}

/// Lifecycle of a peer (initiator side) or session id (responder side).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    None,
    Pending,
    Active,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::None => write!(f, "None"),
            SessionState::Pending => write!(f, "Pending"),
            SessionState::Active => write!(f, "Active"),
        }
    }
}

/// Why buffered messages were released without delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The negotiation outlived the configured timeout.
    Expired,
    /// The engine rejected a handshake step.
    HandshakeRejected,
}

/// Buffered messages handed back to the application when a negotiation dies.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    pub peer: Peer,
    pub session_id: SessionId,
    pub reason: FailureReason,
    /// In original submission order.
    pub undelivered: Vec<SessionMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_hex() {
        let a = SessionId::random();
        let b = SessionId::random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn reply_header_swaps_peers() {
        let h = Header::new(Peer::new("A", "net"), Peer::new("B", "net"), "s".into());
        let r = h.reply();
        assert_eq!(r.source, h.destination);
        assert_eq!(r.destination, h.source);
        assert_eq!(r.session_id, h.session_id);
    }

    #[test]
    fn mac_bytes_distinguish_field_boundaries() {
        let a = AuthenticatedMessageHeader {
            source: Peer::new("ab", "c"),
            destination: Peer::new("d", "e"),
            session_id: "s".into(),
        };
        let b = AuthenticatedMessageHeader {
            source: Peer::new("a", "bc"),
            ..a.clone()
        };
        assert_ne!(a.to_mac_bytes(), b.to_mac_bytes());
    }

    #[test]
    fn step2_debug_hides_private_key() {
        let msg = Step2Message {
            header: Header::new(Peer::new("A", "n"), Peer::new("B", "n"), "s".into()),
            initiator_hello: InitiatorHelloPayload {
                ephemeral_public: [1; 32],
                cipher_suites: vec![2],
            },
            responder_hello: ResponderHelloPayload {
                ephemeral_public: [3; 32],
                cipher_suite: 2,
            },
            ephemeral_private: Zeroizing::new([0xEE; 32]),
            ephemeral_public: [3; 32],
        };
        assert!(!format!("{msg:?}").contains("238"));
    }

    #[test]
    fn peer_display() {
        assert_eq!(Peer::new("alice", "net-1").to_string(), "alice@net-1");
    }
}
