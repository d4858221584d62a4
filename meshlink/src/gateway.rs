//! Hello gateway: the transport-facing front of the responder.
//!
//! An `InitiatorHello` is answered here, not by the orchestrator. The gateway
//! picks a cipher suite and an ephemeral key. It returns the `ResponderHello`
//! for the initiator and the `Step2Message` that seeds the responder's
//! pending negotiation.

use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, SessionError};
use crate::model::{InitiatorHelloMessage, InitiatorSessionMessage, ResponderHelloMessage, Step2Message};
use crate::protocol::ProtocolFactory;
use crate::responder::ResponderOrchestrator;

pub struct HelloGateway {
    protocols: Arc<dyn ProtocolFactory>,
}

impl HelloGateway {
    pub fn new(protocols: Arc<dyn ProtocolFactory>) -> Self {
        Self { protocols }
    }

    /// Answer a hello. Fails when no offered cipher suite is supported.
    pub fn answer_hello(&self, hello: InitiatorHelloMessage) -> Result<(ResponderHelloMessage, Step2Message)> {
        let (responder_hello, ephemeral_private) = self
            .protocols
            .accept_hello(&hello.payload)
            .map_err(|e| SessionError::handshake(&hello.header.session_id, e))?;

        debug!(
            peer = %hello.header.source,
            session_id = %hello.header.session_id,
            cipher_suite = responder_hello.cipher_suite,
            "answered initiator hello"
        );

        let reply = ResponderHelloMessage {
            header: hello.header.reply(),
            payload: responder_hello.clone(),
        };
        let step2 = Step2Message {
            header: hello.header,
            initiator_hello: hello.payload,
            ephemeral_public: responder_hello.ephemeral_public,
            responder_hello,
            ephemeral_private,
        };
        Ok((reply, step2))
    }

    /// Route an inbound handshake message: hellos are answered and their
    /// `Step2` handed to `responder`; everything else goes straight through.
    ///
    /// Returns the `ResponderHello` to send back. A duplicated hello gets the
    /// reply of the negotiation already pending for its session id, so every
    /// copy the initiator sees carries the same ephemeral key. No reply is
    /// produced when the responder dropped the `Step2`.
    pub fn dispatch(
        &self,
        message: InitiatorSessionMessage,
        responder: &ResponderOrchestrator,
    ) -> Result<Option<ResponderHelloMessage>> {
        match message {
            InitiatorSessionMessage::InitiatorHello(hello) => {
                let (reply, step2) = self.answer_hello(hello)?;
                Ok(responder.accept_step2(step2)?.map(|payload| ResponderHelloMessage {
                    header: reply.header,
                    payload,
                }))
            }
            other => {
                responder.process_session_message(other)?;
                Ok(None)
            }
        }
    }
}
