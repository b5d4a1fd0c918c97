//! The holder's side of the wallet: the credentials it can present and the prover that turns
//! a selection of them into a presentation.

use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    core::pres_format::PresFormatKind,
    formats::{
        anoncreds::proof_request::{PredicateType, Restriction},
        dif::input_descriptor::InputDescriptor,
    },
};

/// A credential held in the wallet, as seen by the matching engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HolderCredential {
    /// Wallet identifier of the credential.
    pub referent: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cred_def_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
    /// The W3C credential document, for credentials presented through DIF.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Json>,
}

/// Attribute names compare case-insensitively and ignoring whitespace.
fn canonical_attr(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

impl HolderCredential {
    /// The value of attribute `name`.
    pub fn attr(&self, name: &str) -> Option<&str> {
        let wanted = canonical_attr(name);
        self.attrs
            .iter()
            .find(|(key, _)| canonical_attr(key) == wanted)
            .map(|(_, value)| value.as_str())
    }
}

/// What one referent of a request asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum ReferentQuery {
    /// Attributes that must all come from a single credential.
    Attributes {
        names: Vec<String>,
        restrictions: Vec<Restriction>,
    },
    Predicate {
        name: String,
        p_type: PredicateType,
        p_value: i64,
        restrictions: Vec<Restriction>,
    },
    InputDescriptor(InputDescriptor),
}

impl ReferentQuery {
    /// Whether `credential` satisfies the query.
    ///
    /// Restrictions are alternatives: meeting any one of them is enough, and an empty list
    /// accepts every credential.
    pub fn matches(&self, credential: &HolderCredential) -> bool {
        let restricted = |restrictions: &[Restriction]| {
            restrictions.is_empty()
                || restrictions
                    .iter()
                    .any(|restriction| restriction.matches(credential))
        };

        match self {
            Self::Attributes {
                names,
                restrictions,
            } => {
                names.iter().all(|name| credential.attr(name).is_some()) && restricted(restrictions)
            }
            Self::Predicate {
                name,
                p_type,
                p_value,
                restrictions,
            } => {
                credential
                    .attr(name)
                    .and_then(|value| value.parse::<i64>().ok())
                    .is_some_and(|value| p_type.holds(value, *p_value))
                    && restricted(restrictions)
            }
            Self::InputDescriptor(descriptor) => credential
                .document
                .as_ref()
                .is_some_and(|document| descriptor.matches(document)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HolderError {
    #[error("credential `{0}` has no W3C document to present")]
    MissingDocument(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Answers which held credentials satisfy a referent.
#[async_trait]
pub trait HolderCredentialIndex: Debug + Send + Sync {
    /// Every credential satisfying `query`, in a stable order.
    async fn get_credentials_for_referent(
        &self,
        referent: &str,
        query: &ReferentQuery,
    ) -> Result<Vec<HolderCredential>, HolderError>;
}

/// Produces the cryptographic presentation for a selection of credentials.
#[async_trait]
pub trait HolderProver: Debug + Send + Sync {
    /// `request_data` is the decoded request attachment; `selection` describes the chosen
    /// credentials in the format's own terms.
    async fn create_presentation_proof(
        &self,
        kind: PresFormatKind,
        request_data: &Json,
        selection: &Json,
    ) -> Result<Json, HolderError>;
}

/// A local in-memory credential index. Not for production use!
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialIndex {
    credentials: Arc<Mutex<Vec<HolderCredential>>>,
}

impl MemoryCredentialIndex {
    pub async fn insert(&self, credential: HolderCredential) {
        self.credentials.lock().await.push(credential);
    }

    /// The W3C document of credential `referent`.
    pub async fn document(&self, referent: &str) -> Option<Json> {
        self.credentials
            .lock()
            .await
            .iter()
            .find(|credential| credential.referent == referent)
            .and_then(|credential| credential.document.clone())
    }
}

impl From<Vec<HolderCredential>> for MemoryCredentialIndex {
    fn from(credentials: Vec<HolderCredential>) -> Self {
        Self {
            credentials: Arc::new(Mutex::new(credentials)),
        }
    }
}

#[async_trait]
impl HolderCredentialIndex for MemoryCredentialIndex {
    async fn get_credentials_for_referent(
        &self,
        referent: &str,
        query: &ReferentQuery,
    ) -> Result<Vec<HolderCredential>, HolderError> {
        let found: Vec<_> = self
            .credentials
            .lock()
            .await
            .iter()
            .filter(|credential| query.matches(credential))
            .cloned()
            .collect();

        debug!(referent, found = found.len(), "searched credentials for referent");
        Ok(found)
    }
}
