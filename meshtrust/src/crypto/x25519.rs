// X25519 ephemeral key agreement and HKDF handshake secret derivation.

use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{MeshTrustError, Result};

/// An X25519 keypair used for exactly one negotiation.
///
/// Built on `StaticSecret` rather than `EphemeralSecret` because the responder
/// side hands the private half across the hello gateway boundary.
pub struct EphemeralKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild from secret bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Perform Diffie-Hellman with a peer's public key.
    pub fn diffie_hellman(&self, peer_public: &[u8; 32]) -> [u8; 32] {
        let peer_pk = PublicKey::from(*peer_public);
        *self.secret.diffie_hellman(&peer_pk).as_bytes()
    }
}

/// Keys derived once both hellos are known.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct HandshakeSecrets {
    /// Seals the initiator's handshake message.
    pub initiator_handshake_key: [u8; 32],
    /// Seals the responder's handshake message.
    pub responder_handshake_key: [u8; 32],
    /// MACs application traffic from initiator to responder.
    pub initiator_mac_key: [u8; 32],
    /// MACs application traffic from responder to initiator.
    pub responder_mac_key: [u8; 32],
}

/// Derive the handshake secrets from the DH output, bound to the transcript.
///
/// ```text
/// early_secret     = HKDF-Extract(salt=0, ikm=shared_secret)
/// handshake_secret = HKDF-Expand(early_secret, "mesh handshake" || transcript, 32)
/// <key>            = HKDF-Expand(handshake_secret, <label>, 32)
/// ```
pub fn derive_handshake_secrets(
    shared_secret: &[u8; 32],
    transcript_hash: &[u8; 32],
) -> Result<HandshakeSecrets> {
    let salt = [0u8; 32];
    let early = Hkdf::<Sha256>::new(Some(&salt), shared_secret);

    let mut info = Vec::with_capacity(14 + transcript_hash.len());
    info.extend_from_slice(b"mesh handshake");
    info.extend_from_slice(transcript_hash);

    let mut handshake_secret = [0u8; 32];
    early
        .expand(&info, &mut handshake_secret)
        .map_err(|e| MeshTrustError::KeyDerivation(format!("{e}")))?;

    let hk = Hkdf::<Sha256>::new(None, &handshake_secret);
    handshake_secret.zeroize();

    let expand = |label: &[u8]| -> Result<[u8; 32]> {
        let mut out = [0u8; 32];
        hk.expand(label, &mut out)
            .map_err(|e| MeshTrustError::KeyDerivation(format!("{e}")))?;
        Ok(out)
    };

    Ok(HandshakeSecrets {
        initiator_handshake_key: expand(b"initiator handshake key")?,
        responder_handshake_key: expand(b"responder handshake key")?,
        initiator_mac_key: expand(b"initiator mac key")?,
        responder_mac_key: expand(b"responder mac key")?,
    })
}
