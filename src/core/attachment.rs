use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine as _,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

const DEFAULT_MIME_TYPE: &str = "application/json";

/// A named payload carried inside a protocol message (the `~attach` decorator).
///
/// The `ident` correlates the attachment with the `attach_id` of a
/// [PresFormat](super::pres_format::PresFormat) in the same message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    #[serde(rename = "@id")]
    pub ident: String,
    #[serde(rename = "mime-type", default = "default_mime_type")]
    pub mime_type: String,
    pub data: AttachmentData,
}

/// Attachment content, either inlined as JSON or encoded as base64.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AttachmentData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("attachment `{0}` carries neither base64 nor json data")]
    NoData(String),

    #[error("attachment `{ident}` is not valid base64: {source}")]
    Base64 {
        ident: String,
        source: base64::DecodeError,
    },

    #[error("attachment `{ident}` does not hold a JSON document: {source}")]
    Json {
        ident: String,
        source: serde_json::Error,
    },
}

fn default_mime_type() -> String {
    DEFAULT_MIME_TYPE.to_owned()
}

impl Attachment {
    /// Wrap a JSON payload as a base64-encoded attachment.
    pub fn base64_json(ident: impl Into<String>, payload: &Json) -> Result<Self, AttachmentError> {
        let ident = ident.into();
        let bytes = serde_json::to_vec(payload).map_err(|source| AttachmentError::Json {
            ident: ident.clone(),
            source,
        })?;

        Ok(Self {
            ident,
            mime_type: default_mime_type(),
            data: AttachmentData {
                base64: Some(STANDARD.encode(bytes)),
                ..Default::default()
            },
        })
    }

    /// Wrap a JSON payload as an inline attachment.
    pub fn json(ident: impl Into<String>, payload: Json) -> Self {
        Self {
            ident: ident.into(),
            mime_type: default_mime_type(),
            data: AttachmentData {
                json: Some(payload),
                ..Default::default()
            },
        }
    }

    /// Decode the attachment content.
    ///
    /// Base64 content is accepted in both the standard and the URL-safe alphabet, since
    /// agents disagree on which one to emit.
    pub fn content(&self) -> Result<Json, AttachmentError> {
        if let Some(encoded) = &self.data.base64 {
            let bytes = STANDARD
                .decode(encoded)
                .or_else(|_| URL_SAFE.decode(encoded))
                .map_err(|source| AttachmentError::Base64 {
                    ident: self.ident.clone(),
                    source,
                })?;

            return serde_json::from_slice(&bytes).map_err(|source| AttachmentError::Json {
                ident: self.ident.clone(),
                source,
            });
        }

        self.data
            .json
            .clone()
            .ok_or_else(|| AttachmentError::NoData(self.ident.clone()))
    }
}

/// Decode the content of the attachment named `ident`, if the message carries one.
pub fn find_content(
    attachments: &[Attachment],
    ident: &str,
) -> Result<Option<Json>, AttachmentError> {
    attachments
        .iter()
        .find(|attachment| attachment.ident == ident)
        .map(Attachment::content)
        .transpose()
}
