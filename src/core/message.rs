use std::collections::HashSet;
use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

use super::{
    attachment::{Attachment, AttachmentError},
    pres_format::{PresFormat, PresFormatKind},
};
use crate::{
    formats::{deserialize_fields, ValidationError},
    utils::NonEmptyVec,
};

/// Message types of the present-proof 2.0 protocol handled here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "https://didcomm.org/present-proof/2.0/propose-presentation")]
    ProposePresentation,
    #[serde(rename = "https://didcomm.org/present-proof/2.0/request-presentation")]
    RequestPresentation,
    #[serde(rename = "https://didcomm.org/present-proof/2.0/presentation")]
    Presentation,
}

impl MessageType {
    pub fn name(self) -> &'static str {
        match self {
            Self::ProposePresentation => "propose-presentation",
            Self::RequestPresentation => "request-presentation",
            Self::Presentation => "presentation",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

/// The `~thread` decorator.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Thread {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pthid: Option<String>,
}

/// Behaviour shared by the messages that carry format-tagged attachments.
pub trait PresMessage: DeserializeOwned {
    const TYPE: MessageType;
    /// Wire name of the attachment list.
    const ATTACH_FIELD: &'static str;

    fn id(&self) -> &str;
    fn message_type(&self) -> MessageType;
    fn thread(&self) -> Option<&Thread>;
    fn formats(&self) -> &[PresFormat];
    fn attachments(&self) -> &[Attachment];

    /// The thread this message belongs to: its `~thread.thid`, or its own id when it opens
    /// a new thread.
    fn thread_id(&self) -> &str {
        self.thread()
            .and_then(|thread| thread.thid.as_deref())
            .unwrap_or(self.id())
    }

    /// Decoded content of the attachment of format `kind`, if any.
    fn attachment(&self, kind: PresFormatKind) -> Result<Option<Json>, AttachmentError> {
        kind.get_attachment_data(self.formats(), self.attachments())
    }

    /// Parse and validate an inbound message.
    ///
    /// Every attachment whose declared format is supported is checked by that format's
    /// handler; errors carry the path of the offending field within the message.
    fn from_json(value: &Json) -> Result<Self, ValidationError> {
        let message: Self = deserialize_fields(value)?;
        if message.message_type() != Self::TYPE {
            return Err(ValidationError::new(
                "@type",
                format!("expected a {} message", Self::TYPE),
            ));
        }
        message.validate_attachments()?;
        Ok(message)
    }

    fn validate_attachments(&self) -> Result<(), ValidationError> {
        let field = Self::ATTACH_FIELD;
        let attachments = self.attachments();

        let mut idents = HashSet::new();
        for (i, attachment) in attachments.iter().enumerate() {
            if !idents.insert(attachment.ident.as_str()) {
                return Err(ValidationError::new(
                    format!("{field}[{i}].@id"),
                    format!("duplicate attachment identifier `{}`", attachment.ident),
                ));
            }
        }

        for (i, format) in self.formats().iter().enumerate() {
            let Some(kind) = format.kind() else {
                debug!(format = %format.format, "skipping validation of unsupported format");
                continue;
            };

            let Some(position) = attachments
                .iter()
                .position(|attachment| attachment.ident == format.attach_id)
            else {
                return Err(ValidationError::new(
                    format!("formats[{i}].attach_id"),
                    format!("no attachment `{}` in {field}", format.attach_id),
                ));
            };

            let data_path = format!("{field}[{position}].data");
            let data = attachments[position]
                .content()
                .map_err(|e| ValidationError::new(data_path.as_str(), e))?;
            kind.validate_fields(Self::TYPE, &data)
                .map_err(|e| e.within(&data_path))?;
        }

        Ok(())
    }
}

macro_rules! pres_message {
    ($name:ident, $ty:expr, $field:literal, $attach:ident) => {
        impl PresMessage for $name {
            const TYPE: MessageType = $ty;
            const ATTACH_FIELD: &'static str = $field;

            fn id(&self) -> &str {
                &self.id
            }

            fn message_type(&self) -> MessageType {
                self.message_type
            }

            fn thread(&self) -> Option<&Thread> {
                self.thread.as_ref()
            }

            fn formats(&self) -> &[PresFormat] {
                &self.formats
            }

            fn attachments(&self) -> &[Attachment] {
                &self.$attach
            }
        }
    };
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Attach `payload` under the short name of `kind`, declaring the format of `message_type`.
fn format_attachment(
    kind: PresFormatKind,
    message_type: MessageType,
    payload: &Json,
) -> Result<(PresFormat, Attachment), AttachmentError> {
    let format = PresFormat::new(Some(kind.api().to_owned()), kind.identifier(message_type));
    let attachment = Attachment::base64_json(format.attach_id.clone(), payload)?;
    Ok((format, attachment))
}

/// A prover-initiated proposal of what it is willing to present.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PresProposal {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(rename = "~thread", skip_serializing_if = "Option::is_none")]
    pub thread: Option<Thread>,
    pub formats: NonEmptyVec<PresFormat>,
    #[serde(rename = "proposals~attach")]
    pub proposals_attach: Vec<Attachment>,
}

pres_message!(
    PresProposal,
    MessageType::ProposePresentation,
    "proposals~attach",
    proposals_attach
);

impl PresProposal {
    pub fn new(kind: PresFormatKind, proposal: &Json) -> Result<Self, AttachmentError> {
        let (format, attachment) = format_attachment(kind, Self::TYPE, proposal)?;
        Ok(Self {
            id: new_message_id(),
            message_type: Self::TYPE,
            comment: None,
            thread: None,
            formats: NonEmptyVec::new(format),
            proposals_attach: vec![attachment],
        })
    }
}

/// A verifier's request for a presentation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PresRequest {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub will_confirm: bool,
    #[serde(rename = "~thread", skip_serializing_if = "Option::is_none")]
    pub thread: Option<Thread>,
    pub formats: NonEmptyVec<PresFormat>,
    #[serde(rename = "request_presentations~attach")]
    pub request_presentations_attach: Vec<Attachment>,
}

pres_message!(
    PresRequest,
    MessageType::RequestPresentation,
    "request_presentations~attach",
    request_presentations_attach
);

impl PresRequest {
    pub fn new(kind: PresFormatKind, request: &Json) -> Result<Self, AttachmentError> {
        let (format, attachment) = format_attachment(kind, Self::TYPE, request)?;
        Ok(Self {
            id: new_message_id(),
            message_type: Self::TYPE,
            comment: None,
            will_confirm: false,
            thread: None,
            formats: NonEmptyVec::new(format),
            request_presentations_attach: vec![attachment],
        })
    }

    /// Continue an existing thread, e.g. one opened by a proposal.
    pub fn with_thread_id(mut self, thid: impl Into<String>) -> Self {
        self.thread = Some(Thread {
            thid: Some(thid.into()),
            pthid: None,
        });
        self
    }

    /// The first declared format that this agent supports.
    pub fn supported_format(&self) -> Option<(&PresFormat, PresFormatKind)> {
        self.formats
            .iter()
            .find_map(|format| format.kind().map(|kind| (format, kind)))
    }
}

/// The prover's presentation, sent in reply to a request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Pres {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(rename = "~thread", skip_serializing_if = "Option::is_none")]
    pub thread: Option<Thread>,
    pub formats: NonEmptyVec<PresFormat>,
    #[serde(rename = "presentations~attach")]
    pub presentations_attach: Vec<Attachment>,
}

pres_message!(
    Pres,
    MessageType::Presentation,
    "presentations~attach",
    presentations_attach
);

impl Pres {
    pub fn new(
        kind: PresFormatKind,
        presentation: &Json,
        thread_id: impl Into<String>,
    ) -> Result<Self, AttachmentError> {
        let (format, attachment) = format_attachment(kind, Self::TYPE, presentation)?;
        Ok(Self {
            id: new_message_id(),
            message_type: Self::TYPE,
            comment: None,
            thread: Some(Thread {
                thid: Some(thread_id.into()),
                pthid: None,
            }),
            formats: NonEmptyVec::new(format),
            presentations_attach: vec![attachment],
        })
    }
}
