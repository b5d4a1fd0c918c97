//! Proof-format handlers.
//!
//! Every proof technology supported by the protocol implements [PresFormatHandler]. The
//! manager never looks inside a format's payloads: it resolves the handler from the
//! request's declared format (see [PresFormatKind]) and drives matching and construction
//! through this trait.

use std::fmt::Debug;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;

use crate::{
    core::{
        attachment::AttachmentError,
        message::{MessageType, PresMessage},
        pres_format::PresFormatKind,
    },
    holder::{HolderCredential, HolderCredentialIndex, HolderError, HolderProver},
    record::PresExRecord,
};

pub mod anoncreds;
pub mod dif;

/// Capabilities of one proof technology.
#[async_trait]
pub trait PresFormatHandler: Debug + Send + Sync {
    /// The format family this handler serves.
    fn format(&self) -> PresFormatKind;

    /// Structural validation of a proposal, request or presentation attachment.
    fn validate_fields(
        &self,
        message_type: MessageType,
        attachment_data: &Json,
    ) -> Result<(), ValidationError>;

    /// Query the holder's index once per requested referent.
    ///
    /// Candidates are returned unfiltered and in index order, one entry per referent in
    /// request order.
    async fn get_matching_credentials(
        &self,
        index: &dyn HolderCredentialIndex,
        record: &PresExRecord,
        request_data: &Json,
    ) -> Result<Vec<ReferentMatches>, PresFormatHandlerError>;

    /// Build the format-specific presentation payload from previously matched credentials.
    async fn create_presentation(
        &self,
        prover: &dyn HolderProver,
        record: &PresExRecord,
        matches: &[ReferentMatches],
    ) -> Result<Json, PresFormatHandlerError>;
}

/// What kind of requirement a referent names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentKind {
    Attribute,
    Predicate,
    InputDescriptor,
}

/// The candidate credentials found for one referent.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferentMatches {
    pub referent: String,
    pub kind: ReferentKind,
    pub candidates: Vec<HolderCredential>,
}

impl ReferentMatches {
    pub fn is_satisfiable(&self) -> bool {
        !self.candidates.is_empty()
    }

    /// The credential used when responding without user input.
    pub fn selected(&self) -> Option<&HolderCredential> {
        self.candidates.first()
    }
}

/// Attachment or message shape mismatch, qualified by the path of the offending field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid field `{path}`: {message}")]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl ToString) -> Self {
        Self {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Re-root the error path under `prefix`.
    pub fn within(mut self, prefix: &str) -> Self {
        self.path = match self.path.as_str() {
            "" | "." => prefix.to_owned(),
            path if path.starts_with('[') => format!("{prefix}{path}"),
            path => format!("{prefix}.{path}"),
        };
        self
    }
}

/// Deserialize `data` into `T`, keeping track of the field that failed.
pub(crate) fn deserialize_fields<T: DeserializeOwned>(data: &Json) -> Result<T, ValidationError> {
    serde_path_to_error::deserialize(data)
        .map_err(|e| ValidationError::new(e.path().to_string(), e.inner()))
}

/// Failures while matching credentials or building a presentation.
///
/// These are local to one exchange: the manager records them on the exchange record
/// instead of surfacing them to the transport.
#[derive(Debug, thiserror::Error)]
pub enum PresFormatHandlerError {
    #[error(
        "could not automatically construct presentation for presentation request {request}: \
         referent `{referent}` did not produce any credentials"
    )]
    NoMatchingCredentials { request: String, referent: String },

    #[error("submission requirement `{0}` cannot be satisfied by the available credentials")]
    UnsatisfiedRequirement(String),

    #[error("no {0} presentation request attached to the exchange")]
    MissingRequest(PresFormatKind),

    #[error("presentation request declares no supported format")]
    UnsupportedFormat,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    #[error("holder failure: {0}")]
    Holder(#[from] HolderError),
}

/// Decode the request attachment of `kind` stored on the record.
pub(crate) fn request_data(
    record: &PresExRecord,
    kind: PresFormatKind,
) -> Result<Json, PresFormatHandlerError> {
    record
        .pres_request
        .as_ref()
        .map(|request| request.attachment(kind))
        .transpose()?
        .flatten()
        .ok_or(PresFormatHandlerError::MissingRequest(kind))
}
