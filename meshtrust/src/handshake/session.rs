// Finalized authenticated session: MAC creation and validation.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::hash::keyed_mac;
use crate::error::{MeshTrustError, Result};

/// A 32-byte message authentication code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mac(pub [u8; 32]);

/// The product of a completed handshake.
///
/// Each direction has its own key: `create_mac` uses ours, `validate_mac`
/// uses the peer's, so a MAC can never be reflected back at its sender.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct AuthenticatedSession {
    session_id: String,
    outbound_key: [u8; 32],
    inbound_key: [u8; 32],
}

impl AuthenticatedSession {
    pub(crate) fn new(session_id: String, outbound_key: [u8; 32], inbound_key: [u8; 32]) -> Self {
        Self {
            session_id,
            outbound_key,
            inbound_key,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// MAC `payload` together with the serialized message header.
    pub fn create_mac(&self, header: &[u8], payload: &[u8]) -> Mac {
        Mac(*keyed_mac(&self.outbound_key, header, payload).as_bytes())
    }

    /// Check a MAC produced by the peer. Comparison is constant-time.
    pub fn validate_mac(&self, header: &[u8], payload: &[u8], mac: &Mac) -> Result<()> {
        let expected = keyed_mac(&self.inbound_key, header, payload);
        if expected == blake3::Hash::from(mac.0) {
            Ok(())
        } else {
            Err(MeshTrustError::MacVerification)
        }
    }
}

impl std::fmt::Debug for AuthenticatedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedSession")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
