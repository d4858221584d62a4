// MeshTrust - peer authentication protocol engine
//
// Crate root: module declarations and public re-exports.

pub mod error;
pub mod crypto;
pub mod handshake;

// Re-export key types at crate root for convenience.
pub use crypto::aead::CipherSuite;
pub use crypto::keys::{IdentityKeyPair, PublicKeyBytes};
pub use error::{MeshTrustError, Result};
pub use handshake::protocol::{accept_initiator_hello, InitiatorHandshake, ResponderHandshake};
pub use handshake::session::{AuthenticatedSession, Mac};
