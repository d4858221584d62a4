// Crypto module declarations

pub mod keys;
pub mod x25519;
pub mod aead;
pub mod hash;
