// MeshTrust error types

use thiserror::Error;

/// Top-level error type for the MeshTrust crate.
#[derive(Debug, Error)]
pub enum MeshTrustError {
    // ── Crypto errors ───────────────────────────────────────────────────
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("signature verification failed")]
    SignatureVerification,

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("AEAD encryption failed: {0}")]
    Encryption(String),

    #[error("AEAD decryption failed: {0}")]
    Decryption(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("MAC verification failed")]
    MacVerification,

    // ── Handshake errors ────────────────────────────────────────────────
    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("invalid handshake state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("no cipher suite in common with the initiator")]
    NoCommonCipherSuite,

    #[error("unsupported cipher suite: 0x{0:04x}")]
    UnsupportedCipherSuite(u16),

    #[error("handshake body encoding error: {0}")]
    Serialization(String),
}

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, MeshTrustError>;
