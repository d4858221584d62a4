// Handshake payloads carried inside the session layer's messages.

use serde::{Deserialize, Serialize};

use crate::crypto::keys::PublicKeyBytes;

/// Carried by InitiatorHello.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatorHelloPayload {
    /// Initiator's ephemeral X25519 public key.
    pub ephemeral_public: [u8; 32],
    /// Offered cipher suite wire IDs, most preferred first.
    pub cipher_suites: Vec<u16>,
}

impl InitiatorHelloPayload {
    /// Canonical encoding absorbed into the transcript.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 2 + self.cipher_suites.len() * 2);
        out.extend_from_slice(&self.ephemeral_public);
        out.extend_from_slice(&(self.cipher_suites.len() as u16).to_be_bytes());
        for id in &self.cipher_suites {
            out.extend_from_slice(&id.to_be_bytes());
        }
        out
    }
}

/// Carried by ResponderHello.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponderHelloPayload {
    /// Responder's ephemeral X25519 public key.
    pub ephemeral_public: [u8; 32],
    /// Selected cipher suite wire ID.
    pub cipher_suite: u16,
}

impl ResponderHelloPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(34);
        out.extend_from_slice(&self.ephemeral_public);
        out.extend_from_slice(&self.cipher_suite.to_be_bytes());
        out
    }
}

/// An AEAD-sealed handshake body. Opaque to the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub sealed: Vec<u8>,
}

/// Plaintext of the initiator's handshake message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct InitiatorHandshakeBody {
    pub identity_key: PublicKeyBytes,
    /// The responder key the initiator resolved; the responder checks it is its own.
    pub responder_key: PublicKeyBytes,
    pub group_id: String,
    pub signature: Vec<u8>,
}

/// Plaintext of the responder's handshake message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ResponderHandshakeBody {
    pub identity_key: PublicKeyBytes,
    pub signature: Vec<u8>,
}
