// Transcript hashing (SHA-256) and keyed session MACs (BLAKE3).

use sha2::{Digest, Sha256};

/// SHA-256 hash of `data`.
pub fn hash_sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Running SHA-256 over length-prefixed fields, so that field boundaries
/// cannot be shifted between messages.
pub struct Transcript {
    hasher: Sha256,
}

impl Transcript {
    pub fn new(domain: &[u8]) -> Self {
        let mut t = Self {
            hasher: Sha256::new(),
        };
        t.absorb(domain);
        t
    }

    pub fn absorb(&mut self, field: &[u8]) {
        self.hasher.update((field.len() as u64).to_be_bytes());
        self.hasher.update(field);
    }

    pub fn finish(self) -> [u8; 32] {
        self.hasher.finalize().into()
    }
}

/// BLAKE3 keyed hash over `associated || payload`, with the associated data
/// length-prefixed.
pub fn keyed_mac(key: &[u8; 32], associated: &[u8], payload: &[u8]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new_keyed(key);
    hasher.update(&(associated.len() as u64).to_be_bytes());
    hasher.update(associated);
    hasher.update(payload);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA-256("") = e3b0c442...b855
        let hash = hash_sha256(b"");
        assert_eq!(
            crate::crypto::keys::hex(&hash),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn transcript_field_boundaries_matter() {
        let mut a = Transcript::new(b"d");
        a.absorb(b"ab");
        a.absorb(b"c");
        let mut b = Transcript::new(b"d");
        b.absorb(b"a");
        b.absorb(b"bc");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn keyed_mac_depends_on_key_and_boundary() {
        let m1 = keyed_mac(&[1u8; 32], b"hdr", b"payload");
        let m2 = keyed_mac(&[2u8; 32], b"hdr", b"payload");
        let m3 = keyed_mac(&[1u8; 32], b"hdrp", b"ayload");
        assert_ne!(m1, m2);
        assert_ne!(m1, m3);
        assert_eq!(m1, keyed_mac(&[1u8; 32], b"hdr", b"payload"));
    }
}
