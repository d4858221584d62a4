// Ed25519 identity keys: generation, signing, verification and fingerprints.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::error::{MeshTrustError, Result};

/// Raw 32-byte Ed25519 public key, as published in the peer directory.
pub type PublicKeyBytes = [u8; 32];

/// Length of an Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// A node's long-term Ed25519 identity.
pub struct IdentityKeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl IdentityKeyPair {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Reconstruct from a 32-byte secret seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// The 32-byte Ed25519 public key.
    pub fn public_key_bytes(&self) -> PublicKeyBytes {
        self.verifying_key.to_bytes()
    }

    /// Short identifier for logs: see [`key_fingerprint`].
    pub fn fingerprint(&self) -> [u8; 16] {
        key_fingerprint(&self.public_key_bytes())
    }

    /// Sign arbitrary data.
    pub fn sign(&self, data: &[u8]) -> [u8; SIGNATURE_LEN] {
        let sig: Signature = self.signing_key.sign(data);
        sig.to_bytes()
    }

    /// Verify a signature made by this identity.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<()> {
        verify_signature(&self.public_key_bytes(), data, signature)
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public_key", &hex(&self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}

/// First 16 bytes of SHA-256(public_key).
pub fn key_fingerprint(pubkey: &PublicKeyBytes) -> [u8; 16] {
    let hash = Sha256::digest(pubkey);
    let mut id = [0u8; 16];
    id.copy_from_slice(&hash[..16]);
    id
}

/// Verify a signature given raw public key bytes, message, and signature bytes.
///
/// Signatures arrive from the wire as variable-length byte strings, so a
/// wrong length is reported as a verification failure rather than a panic.
pub fn verify_signature(pubkey_bytes: &PublicKeyBytes, message: &[u8], signature: &[u8]) -> Result<()> {
    let vk = VerifyingKey::from_bytes(pubkey_bytes)
        .map_err(|e| MeshTrustError::InvalidKey(format!("{e}")))?;
    let sig_bytes: [u8; SIGNATURE_LEN] = signature
        .try_into()
        .map_err(|_| MeshTrustError::SignatureVerification)?;
    let sig = Signature::from_bytes(&sig_bytes);
    vk.verify(message, &sig)
        .map_err(|_| MeshTrustError::SignatureVerification)
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
