use meshtrust::MeshTrustError;
use thiserror::Error;

use crate::model::SessionId;

/// Errors that escape the session layer.
///
/// Expected network conditions (unknown session, unresolved key, bad MAC) are
/// logged and dropped inside the orchestrators and never appear here.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("handshake failed for session {session_id}: {source}")]
    Handshake {
        session_id: SessionId,
        #[source]
        source: MeshTrustError,
    },

    #[error("{message} must not reach the {role} session layer")]
    IllegalMessage {
        role: &'static str,
        message: &'static str,
    },
}

impl SessionError {
    pub(crate) fn handshake(session_id: &SessionId, source: MeshTrustError) -> Self {
        SessionError::Handshake {
            session_id: session_id.clone(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
