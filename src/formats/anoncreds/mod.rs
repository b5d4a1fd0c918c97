//! AnonCreds and Indy proof requests.
//!
//! Both formats share the attribute/predicate request shape and differ only in the format
//! identifiers they are carried under, so a single handler serves both.

use async_trait::async_trait;
use serde_json::{json, Map, Value as Json};
use tracing::debug;

use super::{
    deserialize_fields, request_data, PresFormatHandler, PresFormatHandlerError, ReferentKind,
    ReferentMatches, ValidationError,
};
use crate::{
    core::{message::MessageType, pres_format::PresFormatKind},
    holder::{HolderCredentialIndex, HolderProver, ReferentQuery},
    record::PresExRecord,
};

pub mod proof_request;

use proof_request::{ProofBody, ProofRequest};

#[derive(Debug, Clone, Copy)]
pub struct AnonCredsPresExchangeHandler {
    kind: PresFormatKind,
}

impl AnonCredsPresExchangeHandler {
    pub fn new(kind: PresFormatKind) -> Self {
        Self { kind }
    }

    fn proof_request(&self, data: &Json) -> Result<ProofRequest, ValidationError> {
        let request: ProofRequest = deserialize_fields(data)?;
        request.validate()?;
        Ok(request)
    }
}

#[async_trait]
impl PresFormatHandler for AnonCredsPresExchangeHandler {
    fn format(&self) -> PresFormatKind {
        self.kind
    }

    fn validate_fields(
        &self,
        message_type: MessageType,
        attachment_data: &Json,
    ) -> Result<(), ValidationError> {
        match message_type {
            MessageType::ProposePresentation | MessageType::RequestPresentation => {
                self.proof_request(attachment_data).map(drop)
            }
            MessageType::Presentation => deserialize_fields::<ProofBody>(attachment_data).map(drop),
        }
    }

    async fn get_matching_credentials(
        &self,
        index: &dyn HolderCredentialIndex,
        record: &PresExRecord,
        request_data: &Json,
    ) -> Result<Vec<ReferentMatches>, PresFormatHandlerError> {
        let request = self.proof_request(request_data)?;
        let capacity = request.requested_attributes.len() + request.requested_predicates.len();
        let mut matches = Vec::with_capacity(capacity);

        for (referent, spec) in request.requested_attributes {
            let query = ReferentQuery::Attributes {
                names: spec.names(),
                restrictions: spec.restrictions,
            };
            let candidates = index.get_credentials_for_referent(&referent, &query).await?;
            matches.push(ReferentMatches {
                referent,
                kind: ReferentKind::Attribute,
                candidates,
            });
        }

        for (referent, spec) in request.requested_predicates {
            let query = ReferentQuery::Predicate {
                name: spec.name,
                p_type: spec.p_type,
                p_value: spec.p_value,
                restrictions: spec.restrictions,
            };
            let candidates = index.get_credentials_for_referent(&referent, &query).await?;
            matches.push(ReferentMatches {
                referent,
                kind: ReferentKind::Predicate,
                candidates,
            });
        }

        debug!(
            pres_ex_id = %record.pres_ex_id,
            referents = matches.len(),
            "matched {} request against holder credentials",
            self.kind
        );

        Ok(matches)
    }

    async fn create_presentation(
        &self,
        prover: &dyn HolderProver,
        record: &PresExRecord,
        matches: &[ReferentMatches],
    ) -> Result<Json, PresFormatHandlerError> {
        let request_data = request_data(record, self.kind)?;

        let mut requested_attributes = Map::new();
        let mut requested_predicates = Map::new();
        for referent in matches {
            let Some(credential) = referent.selected() else {
                return Err(PresFormatHandlerError::NoMatchingCredentials {
                    request: record.thread_id.clone(),
                    referent: referent.referent.clone(),
                });
            };

            match referent.kind {
                ReferentKind::Attribute => requested_attributes.insert(
                    referent.referent.clone(),
                    json!({"cred_id": credential.referent, "revealed": true}),
                ),
                ReferentKind::Predicate => requested_predicates.insert(
                    referent.referent.clone(),
                    json!({"cred_id": credential.referent}),
                ),
                ReferentKind::InputDescriptor => continue,
            };
        }

        let requested_credentials = json!({
            "self_attested_attributes": {},
            "requested_attributes": requested_attributes,
            "requested_predicates": requested_predicates,
        });

        let proof = prover
            .create_presentation_proof(self.kind, &request_data, &requested_credentials)
            .await?;
        self.validate_fields(MessageType::Presentation, &proof)?;

        Ok(proof)
    }
}
