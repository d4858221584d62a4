// Handshake state machine.

use crate::crypto::aead::CipherSuite;
use crate::crypto::keys::PublicKeyBytes;
use crate::crypto::x25519::{EphemeralKeyPair, HandshakeSecrets};
use crate::handshake::messages::{InitiatorHelloPayload, ResponderHelloPayload};

/// Material available once the hellos have been exchanged and secrets derived.
pub(crate) struct DerivedKeys {
    pub secrets: HandshakeSecrets,
    pub transcript: [u8; 32],
    pub suite: CipherSuite,
}

/// What the initiator claimed in its handshake body (responder side only).
pub(crate) struct InitiatorClaims {
    pub responder_key: PublicKeyBytes,
    pub group_id: String,
}

/// The current state of one negotiation.
///
/// Initiator: Idle -> HelloSent -> HellosExchanged -> SecretsDerived
///            -> OwnMessageSent -> PeerValidated -> Finished
/// Responder: HellosExchanged -> SecretsDerived -> PeerValidated
///            -> OwnMessageSent -> Finished
pub(crate) enum HandshakeState {
    /// No hello produced yet.
    Idle,

    /// Initiator has produced its hello and waits for the responder's.
    HelloSent {
        ephemeral: EphemeralKeyPair,
        hello: InitiatorHelloPayload,
    },

    /// Both hellos are known.
    HellosExchanged {
        ephemeral: EphemeralKeyPair,
        initiator_hello: InitiatorHelloPayload,
        responder_hello: ResponderHelloPayload,
        suite: CipherSuite,
    },

    SecretsDerived { keys: DerivedKeys },

    /// Our own handshake message has been produced.
    OwnMessageSent { keys: DerivedKeys },

    /// The peer's handshake message has been validated.
    PeerValidated {
        keys: DerivedKeys,
        claims: Option<InitiatorClaims>,
    },

    /// `finish()` has handed out the session; nothing further is accepted.
    Finished,

    /// A step failed part-way; the negotiation is dead.
    Failed,
}

impl HandshakeState {
    /// Human-readable label for the current state (used in error messages).
    pub fn label(&self) -> &'static str {
        match self {
            HandshakeState::Idle => "Idle",
            HandshakeState::HelloSent { .. } => "HelloSent",
            HandshakeState::HellosExchanged { .. } => "HellosExchanged",
            HandshakeState::SecretsDerived { .. } => "SecretsDerived",
            HandshakeState::OwnMessageSent { .. } => "OwnMessageSent",
            HandshakeState::PeerValidated { .. } => "PeerValidated",
            HandshakeState::Finished => "Finished",
            HandshakeState::Failed => "Failed",
        }
    }
}
