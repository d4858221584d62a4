// AEAD sealing for handshake bodies: ChaCha20-Poly1305 (RFC 8439) and AES-256-GCM.
//
// Suite IDs are what the initiator offers in its hello:
//   0x0001 AES-256-GCM
//   0x0002 ChaCha20-Poly1305

// Both aes-gcm and chacha20poly1305 re-export the same `aead` traits.
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce as AesNonce};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{MeshTrustError, Result};

/// Cipher suite identifier (wire value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherSuite {
    /// AES-256-GCM, suite ID 0x0001.
    Aes256Gcm,
    /// ChaCha20-Poly1305, suite ID 0x0002.
    ChaCha20Poly1305,
}

impl CipherSuite {
    /// Default preference order, most preferred first.
    pub const ALL: [CipherSuite; 2] = [CipherSuite::ChaCha20Poly1305, CipherSuite::Aes256Gcm];

    pub fn wire_id(self) -> u16 {
        match self {
            CipherSuite::Aes256Gcm => 0x0001,
            CipherSuite::ChaCha20Poly1305 => 0x0002,
        }
    }

    pub fn from_wire_id(id: u16) -> Option<Self> {
        match id {
            0x0001 => Some(CipherSuite::Aes256Gcm),
            0x0002 => Some(CipherSuite::ChaCha20Poly1305),
            _ => None,
        }
    }
}

/// A 32-byte AEAD key bound to its negotiated suite.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct AeadKey {
    #[zeroize(skip)]
    suite: CipherSuite,
    key: [u8; 32],
}

impl AeadKey {
    pub fn new(suite: CipherSuite, key: [u8; 32]) -> Self {
        Self { suite, key }
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Returns ciphertext || 16-byte tag.
    pub fn seal(&self, nonce: &[u8; 12], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let payload = Payload { msg: plaintext, aad };
        let sealed = match self.suite {
            CipherSuite::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(&self.key)
                .map_err(|e| MeshTrustError::Encryption(format!("cipher init: {e}")))?
                .encrypt(Nonce::from_slice(nonce), payload),
            CipherSuite::Aes256Gcm => Aes256Gcm::new_from_slice(&self.key)
                .map_err(|e| MeshTrustError::Encryption(format!("aes-gcm init: {e}")))?
                .encrypt(AesNonce::from_slice(nonce), payload),
        };
        sealed.map_err(|e| MeshTrustError::Encryption(format!("{e}")))
    }

    /// Open a sealed buffer produced by [`AeadKey::seal`] with the same nonce and aad.
    pub fn open(&self, nonce: &[u8; 12], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let payload = Payload { msg: sealed, aad };
        let opened = match self.suite {
            CipherSuite::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(&self.key)
                .map_err(|e| MeshTrustError::Decryption(format!("cipher init: {e}")))?
                .decrypt(Nonce::from_slice(nonce), payload),
            CipherSuite::Aes256Gcm => Aes256Gcm::new_from_slice(&self.key)
                .map_err(|e| MeshTrustError::Decryption(format!("aes-gcm init: {e}")))?
                .decrypt(AesNonce::from_slice(nonce), payload),
        };
        opened.map_err(|e| MeshTrustError::Decryption(format!("{e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_suites_roundtrip_with_aad() {
        for suite in CipherSuite::ALL {
            let key = AeadKey::new(suite, [0x42; 32]);
            let sealed = key.seal(&[1u8; 12], b"handshake body", b"transcript").unwrap();
            let opened = key.open(&[1u8; 12], &sealed, b"transcript").unwrap();
            assert_eq!(opened, b"handshake body", "{suite:?}");
        }
    }

    #[test]
    fn wrong_aad_fails() {
        let key = AeadKey::new(CipherSuite::ChaCha20Poly1305, [0xAA; 32]);
        let sealed = key.seal(&[2u8; 12], b"data", b"good aad").unwrap();
        assert!(key.open(&[2u8; 12], &sealed, b"bad aad").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = AeadKey::new(CipherSuite::Aes256Gcm, [0xBB; 32]);
        let mut sealed = key.seal(&[3u8; 12], b"data", b"").unwrap();
        sealed[0] ^= 0xFF;
        assert!(matches!(
            key.open(&[3u8; 12], &sealed, b""),
            Err(MeshTrustError::Decryption(_))
        ));
    }

    #[test]
    fn suites_are_not_interchangeable() {
        let chacha = AeadKey::new(CipherSuite::ChaCha20Poly1305, [0x11; 32]);
        let aes = AeadKey::new(CipherSuite::Aes256Gcm, [0x11; 32]);
        let sealed = chacha.seal(&[0u8; 12], b"secret", b"").unwrap();
        assert!(aes.open(&[0u8; 12], &sealed, b"").is_err());
    }

    #[test]
    fn cipher_suite_wire_ids() {
        assert_eq!(CipherSuite::Aes256Gcm.wire_id(), 0x0001);
        assert_eq!(CipherSuite::ChaCha20Poly1305.wire_id(), 0x0002);
        assert_eq!(CipherSuite::from_wire_id(0x0001), Some(CipherSuite::Aes256Gcm));
        assert_eq!(CipherSuite::from_wire_id(0x9999), None);
    }
}
