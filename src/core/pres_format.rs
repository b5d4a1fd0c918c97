use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::{
    attachment::{find_content, Attachment, AttachmentError},
    message::MessageType,
};
use crate::formats::{
    anoncreds::AnonCredsPresExchangeHandler, dif::DifPresFormatHandler, PresFormatHandler,
    ValidationError,
};

const FORMAT_ANONCREDS: &str = "anoncreds";
const FORMAT_INDY: &str = "indy";
const FORMAT_DIF: &str = "dif";

/// The process-wide table of supported proof formats, in lookup order.
///
/// Handlers are only named here; each one is constructed the first time it is asked for.
pub static FORMATS: [FormatDescriptor; 3] = [
    FormatDescriptor::new(
        PresFormatKind::AnonCreds,
        "anoncreds/",
        DeferredHandler::new(anoncreds_handler),
    ),
    FormatDescriptor::new(
        PresFormatKind::Indy,
        "hlindy/",
        DeferredHandler::new(indy_handler),
    ),
    FormatDescriptor::new(
        PresFormatKind::Dif,
        "dif/",
        DeferredHandler::new(dif_handler),
    ),
];

fn anoncreds_handler() -> Arc<dyn PresFormatHandler> {
    Arc::new(AnonCredsPresExchangeHandler::new(PresFormatKind::AnonCreds))
}

fn indy_handler() -> Arc<dyn PresFormatHandler> {
    Arc::new(AnonCredsPresExchangeHandler::new(PresFormatKind::Indy))
}

fn dif_handler() -> Arc<dyn PresFormatHandler> {
    Arc::new(DifPresFormatHandler)
}

/// The proof technology families understood by the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresFormatKind {
    /// AnonCreds proofs (`anoncreds/...`).
    AnonCreds,
    /// Hyperledger Indy proofs (`hlindy/...`).
    Indy,
    /// DIF Presentation Exchange over W3C credentials (`dif/...`).
    Dif,
}

/// Declares a supported format: its wire-level identifier prefix and its handler.
#[derive(Debug)]
pub struct FormatDescriptor {
    pub kind: PresFormatKind,
    pub aries: &'static str,
    handler: DeferredHandler,
}

impl FormatDescriptor {
    const fn new(kind: PresFormatKind, aries: &'static str, handler: DeferredHandler) -> Self {
        Self {
            kind,
            aries,
            handler,
        }
    }

    /// Whether `label` designates this format, by wire prefix or by short name.
    pub fn matches(&self, label: &str) -> bool {
        label.starts_with(self.aries) || label == self.kind.api()
    }

    pub fn handler(&self) -> Arc<dyn PresFormatHandler> {
        self.handler.resolved().clone()
    }
}

/// A handler that is constructed on first use and cached afterwards.
///
/// Concurrent first callers all observe the same instance.
pub struct DeferredHandler {
    resolve: fn() -> Arc<dyn PresFormatHandler>,
    resolved: OnceLock<Arc<dyn PresFormatHandler>>,
}

impl DeferredHandler {
    pub const fn new(resolve: fn() -> Arc<dyn PresFormatHandler>) -> Self {
        Self {
            resolve,
            resolved: OnceLock::new(),
        }
    }

    pub fn resolved(&self) -> &Arc<dyn PresFormatHandler> {
        self.resolved.get_or_init(self.resolve)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }
}

impl fmt::Debug for DeferredHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredHandler")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl PresFormatKind {
    /// Find the format designated by `label`.
    ///
    /// Formats are tried in declaration order; a format matches when `label` starts with its
    /// wire prefix or equals its short name. An unknown label is not an error, callers treat
    /// it as an unsupported format.
    pub fn resolve(label: &str) -> Option<Self> {
        FORMATS
            .iter()
            .find(|descriptor| descriptor.matches(label))
            .map(|descriptor| descriptor.kind)
    }

    pub fn descriptor(self) -> &'static FormatDescriptor {
        match self {
            Self::AnonCreds => &FORMATS[0],
            Self::Indy => &FORMATS[1],
            Self::Dif => &FORMATS[2],
        }
    }

    /// Short name, as used by admin interfaces.
    pub fn api(self) -> &'static str {
        match self {
            Self::AnonCreds => FORMAT_ANONCREDS,
            Self::Indy => FORMAT_INDY,
            Self::Dif => FORMAT_DIF,
        }
    }

    pub fn handler(self) -> Arc<dyn PresFormatHandler> {
        self.descriptor().handler()
    }

    pub fn validate_fields(
        self,
        message_type: MessageType,
        attachment_data: &Json,
    ) -> Result<(), ValidationError> {
        self.handler().validate_fields(message_type, attachment_data)
    }

    /// The full format identifier used in outbound messages of `message_type`.
    pub fn identifier(self, message_type: MessageType) -> &'static str {
        match (self, message_type) {
            (Self::AnonCreds, MessageType::Presentation) => "anoncreds/proof@v1.0",
            (Self::AnonCreds, _) => "anoncreds/proof-request@v1.0",
            (Self::Indy, MessageType::Presentation) => "hlindy/proof@v2.0",
            (Self::Indy, _) => "hlindy/proof-req@v2.0",
            (Self::Dif, MessageType::Presentation) => "dif/presentation-exchange/submission@v1.0",
            (Self::Dif, _) => "dif/presentation-exchange/definitions@v1.0",
        }
    }

    /// Find the attachment of this format in a message and decode its content.
    pub fn get_attachment_data(
        self,
        formats: &[PresFormat],
        attachments: &[Attachment],
    ) -> Result<Option<Json>, AttachmentError> {
        let Some(format) = formats.iter().find(|f| f.kind() == Some(self)) else {
            return Ok(None);
        };

        find_content(attachments, &format.attach_id)
    }
}

impl fmt::Display for PresFormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.api().fmt(f)
    }
}

/// Validate an attachment of the format designated by `label`.
pub fn validate_fields(
    label: &str,
    message_type: MessageType,
    attachment_data: &Json,
) -> Result<(), ValidationError> {
    let Some(kind) = PresFormatKind::resolve(label) else {
        return Err(ValidationError::new(
            "format",
            format!("unsupported attachment format `{label}`"),
        ));
    };
    kind.validate_fields(message_type, attachment_data)
}

/// Associates an attachment of a message with the format of its content.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresFormat {
    pub attach_id: String,
    pub format: String,
}

impl PresFormat {
    /// Create a format reference, generating an attachment id when none is given.
    pub fn new(attach_id: Option<String>, format: impl Into<String>) -> Self {
        Self {
            attach_id: attach_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            format: format.into(),
        }
    }

    pub fn kind(&self) -> Option<PresFormatKind> {
        PresFormatKind::resolve(&self.format)
    }
}
