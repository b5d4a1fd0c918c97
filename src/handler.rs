use std::{fmt::Debug, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::{
    core::message::{Pres, PresRequest},
    manager::{PresManager, PresManagerError, PresentationOutcome},
    record::PresExState,
};

/// The connection an inbound message arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub connection_id: String,
    /// Whether the connection has completed its handshake.
    pub ready: bool,
}

/// An inbound presentation request together with its delivery context.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub message: PresRequest,
    /// The connection named by the transport, if any.
    pub connection: Option<ConnectionRecord>,
}

impl RequestContext {
    pub fn connection_ready(&self) -> bool {
        self.connection.as_ref().is_some_and(|connection| connection.ready)
    }
}

/// An out-of-band record that lets an exchange proceed without an established connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OobRecord {
    pub oob_id: String,
    pub invitation_msg_id: String,
    pub connection_id: Option<String>,
}

/// Resolves the out-of-band record an inbound message belongs to.
#[async_trait]
pub trait OobProcessor: Debug + Send + Sync {
    async fn find_oob_record_for_inbound_message(
        &self,
        context: &RequestContext,
    ) -> Result<Option<OobRecord>>;
}

/// A message ready to be delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub message: Pres,
    /// Connection of the exchange the message answers; `None` for connectionless exchanges.
    pub connection_id: Option<String>,
}

/// Sends replies back over the transport.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn send_reply(&self, reply: OutboundMessage) -> Result<()>;
}

/// Failures that prevent a request from being handled at all.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Connection used for presentation request not ready")]
    ConnectionNotReady,

    #[error("No connection or associated connectionless exchange found for presentation request")]
    NoConnection,

    #[error("out-of-band record lookup failed: {0}")]
    Oob(anyhow::Error),

    #[error(transparent)]
    Manager(#[from] PresManagerError),

    #[error("failed to send presentation: {0}")]
    Transport(anyhow::Error),
}

/// Entry point for inbound `request-presentation` messages.
#[derive(Debug, Clone)]
pub struct PresRequestHandler {
    manager: PresManager,
    oob: Arc<dyn OobProcessor>,
}

impl PresRequestHandler {
    pub fn new(manager: PresManager, oob: Arc<dyn OobProcessor>) -> Self {
        Self { manager, oob }
    }

    pub fn manager(&self) -> &PresManager {
        &self.manager
    }

    /// Handle an inbound presentation request.
    ///
    /// The request is recorded and, when the exchange is set to present automatically,
    /// answered straight away. Only missing preconditions, storage faults and transport
    /// failures are returned as errors; an exchange that cannot be answered is abandoned and
    /// the call still succeeds.
    pub async fn handle(
        &self,
        context: &RequestContext,
        responder: &dyn Responder,
    ) -> Result<(), HandlerError> {
        debug!(message_id = %context.message.id, "received presentation request");

        let oob_record = self
            .oob
            .find_oob_record_for_inbound_message(context)
            .await
            .map_err(HandlerError::Oob)?;

        let connection_ready = context.connection_ready();
        if !connection_ready && oob_record.is_none() {
            return Err(match context.connection {
                Some(_) => HandlerError::ConnectionNotReady,
                None => HandlerError::NoConnection,
            });
        }

        let connection_id = context
            .connection
            .as_ref()
            .filter(|_| connection_ready)
            .map(|connection| connection.connection_id.as_str());

        let record = self
            .manager
            .receive_pres_request(context.message.clone(), connection_id)
            .await?;

        if !record.auto_present || record.state != PresExState::RequestReceived {
            debug!(
                pres_ex_id = %record.pres_ex_id,
                state = ?record.state,
                "awaiting explicit action to present"
            );
            return Ok(());
        }

        match self.manager.create_presentation(record).await? {
            PresentationOutcome::Presented { record, message } => {
                info!(pres_ex_id = %record.pres_ex_id, "sending presentation");
                responder
                    .send_reply(OutboundMessage {
                        message,
                        connection_id: record.connection_id,
                    })
                    .await
                    .map_err(HandlerError::Transport)?;
            }
            PresentationOutcome::Abandoned { record, .. } => {
                debug!(pres_ex_id = %record.pres_ex_id, "no presentation sent");
            }
        }

        Ok(())
    }
}
