// MeshTrust handshake engines: one object per negotiation attempt on each side.
//
// Each engine walks the HandshakeState machine and refuses out-of-order steps.
// A step that fails part-way leaves the engine in `Failed`; the negotiation it
// belongs to cannot be resumed.

use serde::de::DeserializeOwned;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::crypto::aead::{AeadKey, CipherSuite};
use crate::crypto::hash::Transcript;
use crate::crypto::keys::{verify_signature, PublicKeyBytes};
use crate::crypto::x25519::{derive_handshake_secrets, EphemeralKeyPair};
use crate::error::{MeshTrustError, Result};
use crate::handshake::messages::{
    HandshakePayload, InitiatorHandshakeBody, InitiatorHelloPayload, ResponderHandshakeBody,
    ResponderHelloPayload,
};
use crate::handshake::session::AuthenticatedSession;
use crate::handshake::state::{DerivedKeys, HandshakeState, InitiatorClaims};

/// Signing callback supplied by the caller; the engine never sees the private key.
pub type SignFn<'a> = &'a dyn Fn(&[u8]) -> Result<Vec<u8>>;

const TRANSCRIPT_DOMAIN: &[u8] = b"meshtrust handshake v1";
const INITIATOR_SIGNATURE_LABEL: &[u8] = b"meshtrust initiator signature";
const RESPONDER_SIGNATURE_LABEL: &[u8] = b"meshtrust responder signature";

const INITIATOR_MESSAGE: u8 = 1;
const RESPONDER_MESSAGE: u8 = 2;

#[derive(Clone, Copy)]
enum Role {
    Initiator,
    Responder,
}

/// Handshake keys are single-use, so a per-message fixed nonce is sufficient.
fn handshake_nonce(msg_num: u8) -> [u8; 12] {
    let mut n = [0u8; 12];
    n[11] = msg_num;
    n
}

fn transcript_hash(
    session_id: &str,
    initiator_hello: &InitiatorHelloPayload,
    responder_hello: &ResponderHelloPayload,
) -> [u8; 32] {
    let mut t = Transcript::new(TRANSCRIPT_DOMAIN);
    t.absorb(session_id.as_bytes());
    t.absorb(&initiator_hello.to_bytes());
    t.absorb(&responder_hello.to_bytes());
    t.finish()
}

fn initiator_signing_input(transcript: &[u8; 32], responder_key: &PublicKeyBytes, group_id: &str) -> Vec<u8> {
    let mut t = Transcript::new(INITIATOR_SIGNATURE_LABEL);
    t.absorb(transcript);
    t.absorb(responder_key);
    t.absorb(group_id.as_bytes());
    t.finish().to_vec()
}

fn responder_signing_input(transcript: &[u8; 32]) -> Vec<u8> {
    let mut t = Transcript::new(RESPONDER_SIGNATURE_LABEL);
    t.absorb(transcript);
    t.finish().to_vec()
}

fn invalid(from: &HandshakeState, to: &str) -> MeshTrustError {
    MeshTrustError::InvalidStateTransition {
        from: from.label().into(),
        to: to.into(),
    }
}

fn negotiated_suite(offered: &[u16], selected: u16) -> Result<CipherSuite> {
    CipherSuite::from_wire_id(selected)
        .filter(|_| offered.contains(&selected))
        .ok_or(MeshTrustError::UnsupportedCipherSuite(selected))
}

fn seal_body<T: Serialize>(body: &T, keys: &DerivedKeys, key: [u8; 32], msg_num: u8) -> Result<Vec<u8>> {
    let plain = serde_json::to_vec(body).map_err(|e| MeshTrustError::Serialization(e.to_string()))?;
    AeadKey::new(keys.suite, key).seal(&handshake_nonce(msg_num), &plain, &keys.transcript)
}

fn open_body<T: DeserializeOwned>(sealed: &[u8], keys: &DerivedKeys, key: [u8; 32], msg_num: u8) -> Result<T> {
    let plain = AeadKey::new(keys.suite, key).open(&handshake_nonce(msg_num), sealed, &keys.transcript)?;
    serde_json::from_slice(&plain).map_err(|e| MeshTrustError::Serialization(e.to_string()))
}

/// HellosExchanged -> SecretsDerived, shared by both roles.
fn derive_secrets(state: &mut HandshakeState, session_id: &str, role: Role) -> Result<()> {
    match std::mem::replace(state, HandshakeState::Failed) {
        HandshakeState::HellosExchanged {
            ephemeral,
            initiator_hello,
            responder_hello,
            suite,
        } => {
            let peer_public = match role {
                Role::Initiator => responder_hello.ephemeral_public,
                Role::Responder => initiator_hello.ephemeral_public,
            };
            let shared = Zeroizing::new(ephemeral.diffie_hellman(&peer_public));
            // Low-order peer points yield an all-zero secret.
            if *shared == [0u8; 32] {
                return Err(MeshTrustError::Handshake("degenerate key agreement".into()));
            }
            let transcript = transcript_hash(session_id, &initiator_hello, &responder_hello);
            let secrets = derive_handshake_secrets(&shared, &transcript)?;
            *state = HandshakeState::SecretsDerived {
                keys: DerivedKeys {
                    secrets,
                    transcript,
                    suite,
                },
            };
            Ok(())
        }
        other => {
            let err = invalid(&other, "SecretsDerived");
            *state = other;
            Err(err)
        }
    }
}

/// Answer an initiator hello: pick the first of `supported` the initiator
/// offered and generate the responder's ephemeral keypair.
///
/// This is the hello gateway's half of the exchange; the resulting keypair and
/// both hellos are what [`ResponderHandshake::from_step2`] is built from.
pub fn accept_initiator_hello(
    hello: &InitiatorHelloPayload,
    supported: &[CipherSuite],
) -> Result<(ResponderHelloPayload, EphemeralKeyPair)> {
    let suite = supported
        .iter()
        .find(|s| hello.cipher_suites.contains(&s.wire_id()))
        .ok_or(MeshTrustError::NoCommonCipherSuite)?;
    let ephemeral = EphemeralKeyPair::generate();
    let reply = ResponderHelloPayload {
        ephemeral_public: ephemeral.public_key_bytes(),
        cipher_suite: suite.wire_id(),
    };
    Ok((reply, ephemeral))
}

// ── Initiator ────────────────────────────────────────────────────────────

/// Initiator side of one negotiation.
pub struct InitiatorHandshake {
    session_id: String,
    cipher_suites: Vec<CipherSuite>,
    state: HandshakeState,
}

impl InitiatorHandshake {
    /// `cipher_suites` is the offer, most preferred first.
    pub fn new(session_id: impl Into<String>, cipher_suites: &[CipherSuite]) -> Self {
        Self {
            session_id: session_id.into(),
            cipher_suites: cipher_suites.to_vec(),
            state: HandshakeState::Idle,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state_label(&self) -> &'static str {
        self.state.label()
    }

    pub fn generate_initiator_hello(&mut self) -> Result<InitiatorHelloPayload> {
        if !matches!(self.state, HandshakeState::Idle) {
            return Err(invalid(&self.state, "HelloSent"));
        }
        let ephemeral = EphemeralKeyPair::generate();
        let hello = InitiatorHelloPayload {
            ephemeral_public: ephemeral.public_key_bytes(),
            cipher_suites: self.cipher_suites.iter().map(|s| s.wire_id()).collect(),
        };
        self.state = HandshakeState::HelloSent {
            ephemeral,
            hello: hello.clone(),
        };
        Ok(hello)
    }

    /// A hello selecting a suite we never offered is rejected without
    /// disturbing the negotiation.
    pub fn receive_responder_hello(&mut self, hello: ResponderHelloPayload) -> Result<()> {
        let offered: Vec<u16> = self.cipher_suites.iter().map(|s| s.wire_id()).collect();
        let suite = negotiated_suite(&offered, hello.cipher_suite)?;
        match std::mem::replace(&mut self.state, HandshakeState::Failed) {
            HandshakeState::HelloSent {
                ephemeral,
                hello: initiator_hello,
            } => {
                self.state = HandshakeState::HellosExchanged {
                    ephemeral,
                    initiator_hello,
                    responder_hello: hello,
                    suite,
                };
                Ok(())
            }
            other => {
                let err = invalid(&other, "HellosExchanged");
                self.state = other;
                Err(err)
            }
        }
    }

    pub fn generate_handshake_secrets(&mut self) -> Result<()> {
        derive_secrets(&mut self.state, &self.session_id, Role::Initiator)
    }

    /// Produce the sealed, signed initiator handshake message.
    ///
    /// `peer_key` is the responder key resolved from the directory; it is
    /// signed over so the responder can detect being addressed by the wrong key.
    pub fn generate_our_handshake_message(
        &mut self,
        our_key: &PublicKeyBytes,
        peer_key: &PublicKeyBytes,
        group_id: &str,
        sign: SignFn<'_>,
    ) -> Result<HandshakePayload> {
        let keys = match std::mem::replace(&mut self.state, HandshakeState::Failed) {
            HandshakeState::SecretsDerived { keys } => keys,
            other => {
                let err = invalid(&other, "OwnMessageSent");
                self.state = other;
                return Err(err);
            }
        };

        let signature = sign(&initiator_signing_input(&keys.transcript, peer_key, group_id))?;
        let body = InitiatorHandshakeBody {
            identity_key: *our_key,
            responder_key: *peer_key,
            group_id: group_id.to_string(),
            signature,
        };
        let sealed = seal_body(&body, &keys, keys.secrets.initiator_handshake_key, INITIATOR_MESSAGE)?;

        self.state = HandshakeState::OwnMessageSent { keys };
        Ok(HandshakePayload { sealed })
    }

    pub fn validate_peer_handshake_message(
        &mut self,
        payload: &HandshakePayload,
        peer_key: &PublicKeyBytes,
    ) -> Result<()> {
        let keys = match std::mem::replace(&mut self.state, HandshakeState::Failed) {
            HandshakeState::OwnMessageSent { keys } => keys,
            other => {
                let err = invalid(&other, "PeerValidated");
                self.state = other;
                return Err(err);
            }
        };

        let body: ResponderHandshakeBody = open_body(
            &payload.sealed,
            &keys,
            keys.secrets.responder_handshake_key,
            RESPONDER_MESSAGE,
        )?;
        if body.identity_key != *peer_key {
            return Err(MeshTrustError::Handshake(
                "responder identity key does not match the resolved key".into(),
            ));
        }
        verify_signature(peer_key, &responder_signing_input(&keys.transcript), &body.signature)?;

        self.state = HandshakeState::PeerValidated { keys, claims: None };
        Ok(())
    }

    /// Hand out the authenticated session. Succeeds exactly once.
    pub fn finish(&mut self) -> Result<AuthenticatedSession> {
        match std::mem::replace(&mut self.state, HandshakeState::Finished) {
            HandshakeState::PeerValidated { keys, .. } => Ok(AuthenticatedSession::new(
                self.session_id.clone(),
                keys.secrets.initiator_mac_key,
                keys.secrets.responder_mac_key,
            )),
            other => {
                let err = invalid(&other, "Finished");
                self.state = other;
                Err(err)
            }
        }
    }
}

// ── Responder ────────────────────────────────────────────────────────────

/// Responder side of one negotiation, built after the hello gateway answered.
pub struct ResponderHandshake {
    session_id: String,
    state: HandshakeState,
}

impl ResponderHandshake {
    /// Rebuild the post-hello state from the gateway's step-2 material.
    pub fn from_step2(
        session_id: impl Into<String>,
        initiator_hello: InitiatorHelloPayload,
        responder_hello: ResponderHelloPayload,
        ephemeral_private: [u8; 32],
        ephemeral_public: [u8; 32],
    ) -> Result<Self> {
        let ephemeral = EphemeralKeyPair::from_secret_bytes(ephemeral_private);
        if ephemeral.public_key_bytes() != ephemeral_public
            || responder_hello.ephemeral_public != ephemeral_public
        {
            return Err(MeshTrustError::Handshake(
                "ephemeral key pair does not match the responder hello".into(),
            ));
        }
        let suite = negotiated_suite(&initiator_hello.cipher_suites, responder_hello.cipher_suite)?;
        Ok(Self {
            session_id: session_id.into(),
            state: HandshakeState::HellosExchanged {
                ephemeral,
                initiator_hello,
                responder_hello,
                suite,
            },
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state_label(&self) -> &'static str {
        self.state.label()
    }

    pub fn generate_handshake_secrets(&mut self) -> Result<()> {
        derive_secrets(&mut self.state, &self.session_id, Role::Responder)
    }

    /// Open and verify the initiator's handshake message against `peer_key`.
    pub fn validate_peer_handshake_message(
        &mut self,
        payload: &HandshakePayload,
        peer_key: &PublicKeyBytes,
    ) -> Result<()> {
        let keys = match std::mem::replace(&mut self.state, HandshakeState::Failed) {
            HandshakeState::SecretsDerived { keys } => keys,
            other => {
                let err = invalid(&other, "PeerValidated");
                self.state = other;
                return Err(err);
            }
        };

        let body: InitiatorHandshakeBody = open_body(
            &payload.sealed,
            &keys,
            keys.secrets.initiator_handshake_key,
            INITIATOR_MESSAGE,
        )?;
        if body.identity_key != *peer_key {
            return Err(MeshTrustError::Handshake(
                "initiator identity key does not match the resolved key".into(),
            ));
        }
        verify_signature(
            peer_key,
            &initiator_signing_input(&keys.transcript, &body.responder_key, &body.group_id),
            &body.signature,
        )?;

        self.state = HandshakeState::PeerValidated {
            keys,
            claims: Some(InitiatorClaims {
                responder_key: body.responder_key,
                group_id: body.group_id,
            }),
        };
        Ok(())
    }

    /// Group the initiator declared, once its handshake message has validated.
    pub fn peer_group_id(&self) -> Option<&str> {
        match &self.state {
            HandshakeState::PeerValidated {
                claims: Some(claims),
                ..
            } => Some(&claims.group_id),
            _ => None,
        }
    }

    /// Produce the sealed, signed responder handshake message.
    pub fn generate_our_handshake_message(
        &mut self,
        our_key: &PublicKeyBytes,
        sign: SignFn<'_>,
    ) -> Result<HandshakePayload> {
        let (keys, claims) = match std::mem::replace(&mut self.state, HandshakeState::Failed) {
            HandshakeState::PeerValidated {
                keys,
                claims: Some(claims),
            } => (keys, claims),
            other => {
                let err = invalid(&other, "OwnMessageSent");
                self.state = other;
                return Err(err);
            }
        };
        if claims.responder_key != *our_key {
            return Err(MeshTrustError::Handshake(
                "initiator addressed a different responder key".into(),
            ));
        }

        let signature = sign(&responder_signing_input(&keys.transcript))?;
        let body = ResponderHandshakeBody {
            identity_key: *our_key,
            signature,
        };
        let sealed = seal_body(&body, &keys, keys.secrets.responder_handshake_key, RESPONDER_MESSAGE)?;

        self.state = HandshakeState::OwnMessageSent { keys };
        Ok(HandshakePayload { sealed })
    }

    /// Hand out the authenticated session. Succeeds exactly once.
    pub fn finish(&mut self) -> Result<AuthenticatedSession> {
        match std::mem::replace(&mut self.state, HandshakeState::Finished) {
            HandshakeState::OwnMessageSent { keys } => Ok(AuthenticatedSession::new(
                self.session_id.clone(),
                keys.secrets.responder_mac_key,
                keys.secrets.initiator_mac_key,
            )),
            other => {
                let err = invalid(&other, "Finished");
                self.state = other;
                Err(err)
            }
        }
    }
}
