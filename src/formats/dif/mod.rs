//! DIF Presentation Exchange over W3C verifiable credentials.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use serde_json_path::JsonPath;
use tracing::debug;

use super::{
    deserialize_fields, request_data, PresFormatHandler, PresFormatHandlerError, ReferentKind,
    ReferentMatches, ValidationError,
};
use crate::{
    core::{message::MessageType, pres_format::PresFormatKind},
    holder::{HolderCredentialIndex, HolderError, HolderProver, ReferentQuery},
    record::PresExRecord,
};

pub mod input_descriptor;
pub mod presentation_definition;
pub mod presentation_submission;

use input_descriptor::InputDescriptor;
use presentation_definition::PresentationDefinition;
use presentation_submission::{DescriptorMap, PresentationSubmission};

const CREDENTIALS_CONTEXT: &str = "https://www.w3.org/2018/credentials/v1";
const SUBMISSION_FORMAT: &str = "ldp_vc";

/// Proof options the verifier expects the presentation to be signed with.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DifOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DifProofRequest {
    #[serde(default)]
    pub options: DifOptions,
    pub presentation_definition: PresentationDefinition,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DifProofProposal {
    pub input_descriptors: Vec<InputDescriptor>,
    #[serde(default)]
    pub options: DifOptions,
}

#[derive(Clone, Debug, Deserialize)]
struct DifPresentationBody {
    presentation_submission: PresentationSubmission,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DifPresFormatHandler;

impl DifPresFormatHandler {
    fn proof_request(data: &Json) -> Result<DifProofRequest, ValidationError> {
        let request: DifProofRequest = deserialize_fields(data)?;
        request
            .presentation_definition
            .validate()
            .map_err(|e| e.within("presentation_definition"))?;
        Ok(request)
    }
}

#[async_trait]
impl PresFormatHandler for DifPresFormatHandler {
    fn format(&self) -> PresFormatKind {
        PresFormatKind::Dif
    }

    fn validate_fields(
        &self,
        message_type: MessageType,
        attachment_data: &Json,
    ) -> Result<(), ValidationError> {
        match message_type {
            MessageType::ProposePresentation => {
                deserialize_fields::<DifProofProposal>(attachment_data).map(drop)
            }
            MessageType::RequestPresentation => Self::proof_request(attachment_data).map(drop),
            MessageType::Presentation => {
                deserialize_fields::<DifPresentationBody>(attachment_data).map(drop)
            }
        }
    }

    async fn get_matching_credentials(
        &self,
        index: &dyn HolderCredentialIndex,
        record: &PresExRecord,
        request_data: &Json,
    ) -> Result<Vec<ReferentMatches>, PresFormatHandlerError> {
        let request = Self::proof_request(request_data)?;
        let mut matches = Vec::new();

        for descriptor in request.presentation_definition.input_descriptors() {
            let referent = descriptor.id().to_owned();
            let query = ReferentQuery::InputDescriptor(descriptor.clone());
            let candidates = index.get_credentials_for_referent(&referent, &query).await?;
            matches.push(ReferentMatches {
                referent,
                kind: ReferentKind::InputDescriptor,
                candidates,
            });
        }

        debug!(
            pres_ex_id = %record.pres_ex_id,
            definition_id = %request.presentation_definition.id(),
            referents = matches.len(),
            "matched presentation definition against holder credentials"
        );

        Ok(matches)
    }

    /// Assemble an unsigned presentation holding the selected credential of every submitted
    /// input descriptor, then have the prover sign it with the request's options.
    ///
    /// Every input descriptor needs at least one candidate. Submission requirements then
    /// decide which descriptors are submitted.
    async fn create_presentation(
        &self,
        prover: &dyn HolderProver,
        record: &PresExRecord,
        matches: &[ReferentMatches],
    ) -> Result<Json, PresFormatHandlerError> {
        let request_data = request_data(record, PresFormatKind::Dif)?;
        let request = Self::proof_request(&request_data)?;
        let definition = &request.presentation_definition;

        if let Some(unmatched) = matches.iter().find(|m| !m.is_satisfiable()) {
            return Err(PresFormatHandlerError::NoMatchingCredentials {
                request: record.thread_id.clone(),
                referent: unmatched.referent.clone(),
            });
        }

        let satisfied: HashSet<&str> = matches.iter().map(|m| m.referent.as_str()).collect();
        definition
            .evaluate(&satisfied)
            .map_err(|e| PresFormatHandlerError::UnsatisfiedRequirement(e.to_string()))?;
        let submitted = definition.select(&satisfied);

        let mut credentials: Vec<(&str, &Json)> = Vec::new();
        let mut descriptor_map = Vec::new();
        for referent in matches
            .iter()
            .filter(|m| submitted.contains(&m.referent.as_str()))
        {
            let Some(credential) = referent.selected() else {
                continue;
            };
            let Some(document) = credential.document.as_ref() else {
                return Err(HolderError::MissingDocument(credential.referent.clone()).into());
            };

            // A credential answering several descriptors is only included once.
            let position = match credentials
                .iter()
                .position(|(id, _)| *id == credential.referent)
            {
                Some(position) => position,
                None => {
                    credentials.push((&credential.referent, document));
                    credentials.len() - 1
                }
            };

            let path = JsonPath::parse(&format!("$.verifiableCredential[{position}]"))
                .map_err(|e| ValidationError::new("presentation_submission.descriptor_map", e))?;
            descriptor_map.push(DescriptorMap::new(
                referent.referent.clone(),
                SUBMISSION_FORMAT,
                path,
            ));
        }

        let submission = PresentationSubmission::new(
            uuid::Uuid::new_v4(),
            definition.id().clone(),
            descriptor_map,
        );
        let documents: Vec<&Json> = credentials.into_iter().map(|(_, document)| document).collect();
        let presentation = json!({
            "@context": [CREDENTIALS_CONTEXT],
            "type": ["VerifiablePresentation"],
            "verifiableCredential": documents,
            "presentation_submission": submission,
        });

        let signed = prover
            .create_presentation_proof(PresFormatKind::Dif, &request_data, &presentation)
            .await?;
        self.validate_fields(MessageType::Presentation, &signed)?;

        Ok(signed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::message::PresRequest,
        holder::{HolderCredential, MemoryCredentialIndex},
        record::PresExState,
    };
    use std::collections::BTreeMap;

    /// Returns the presentation unchanged, with a placeholder proof.
    #[derive(Debug)]
    struct EchoProver;

    #[async_trait]
    impl HolderProver for EchoProver {
        async fn create_presentation_proof(
            &self,
            _kind: PresFormatKind,
            request_data: &Json,
            selection: &Json,
        ) -> Result<Json, HolderError> {
            let mut signed = selection.clone();
            signed["proof"] = json!({
                "type": "Ed25519Signature2018",
                "challenge": request_data["options"]["challenge"],
            });
            Ok(signed)
        }
    }

    fn proof_request(submission_requirements: Option<Json>) -> Json {
        let mut request = json!({
            "options": {
                "challenge": "3fa85f64-5717-4562-b3fc-2c963f66afa7",
                "domain": "4jt78h47fh47"
            },
            "presentation_definition": {
                "id": "32f54163-7166-48f1-93d8-ff217bdb0654",
                "input_descriptors": [
                    {
                        "id": "citizenship_input_1",
                        "name": "EU Driver's License",
                        "group": ["A"],
                        "schema": [{"uri": "https://www.w3.org/2018/credentials#VerifiableCredential"}],
                        "constraints": {
                            "fields": [{
                                "path": ["$.issuer.id", "$.issuer", "$.vc.issuer.id"],
                                "purpose": "The claim must be from one of the specified issuers",
                                "filter": {
                                    "type": "string",
                                    "enum": [
                                        "did:example:489398593",
                                        "did:sov:2wJPyULfLLnYTEFYzByfUR"
                                    ]
                                }
                            }]
                        }
                    },
                    {
                        "id": "degree_input",
                        "group": ["B"],
                        "schema": [{"uri": "https://www.w3.org/2018/credentials#UniversityDegreeCredential"}]
                    }
                ]
            }
        });
        if let Some(requirements) = submission_requirements {
            request["presentation_definition"]["submission_requirements"] = requirements;
        }
        request
    }

    fn credential(referent: &str, issuer: &str, types: &[&str]) -> HolderCredential {
        HolderCredential {
            referent: referent.into(),
            attrs: BTreeMap::new(),
            cred_def_id: None,
            schema_id: None,
            document: Some(json!({
                "@context": [CREDENTIALS_CONTEXT],
                "id": format!("urn:uuid:{referent}"),
                "type": types,
                "issuer": issuer,
                "issuanceDate": "2020-03-10T04:24:12.164Z",
                "credentialSubject": {"id": "did:example:ebfeb1f712ebc6f1c276e12ec21"}
            })),
        }
    }

    fn vc(referent: &str, issuer: &str) -> HolderCredential {
        credential(referent, issuer, &["VerifiableCredential"])
    }

    fn degree(referent: &str) -> HolderCredential {
        credential(
            referent,
            "did:example:76e12ec712ebc6f1c221ebfeb1f",
            &["VerifiableCredential", "UniversityDegreeCredential"],
        )
    }

    fn record(request: &Json) -> PresExRecord {
        let mut record = PresExRecord::new(
            "thread-1",
            Some("conn-1".into()),
            PresExState::RequestReceived,
        );
        record.pres_request = Some(PresRequest::new(PresFormatKind::Dif, request).unwrap());
        record
    }

    async fn present(
        request: &Json,
        index: &MemoryCredentialIndex,
    ) -> Result<Json, PresFormatHandlerError> {
        let record = record(request);
        let matches = DifPresFormatHandler
            .get_matching_credentials(index, &record, request)
            .await?;
        DifPresFormatHandler
            .create_presentation(&EchoProver, &record, &matches)
            .await
    }

    #[tokio::test]
    async fn builds_submission_for_selected_descriptors() {
        let request = proof_request(Some(json!([
            {"rule": "pick", "count": 1, "from": "A"}
        ])));
        let index = MemoryCredentialIndex::from(vec![
            vc("a", "did:example:unknown"),
            vc("b", "did:sov:2wJPyULfLLnYTEFYzByfUR"),
            vc("c", "did:example:489398593"),
            degree("d"),
        ]);
        let record = record(&request);

        let matches = DifPresFormatHandler
            .get_matching_credentials(&index, &record, &request)
            .await
            .unwrap();
        assert_eq!(matches[0].candidates.len(), 2);
        assert_eq!(matches[1].candidates.len(), 1);

        let presentation = DifPresFormatHandler
            .create_presentation(&EchoProver, &record, &matches)
            .await
            .unwrap();
        assert_eq!(
            presentation["verifiableCredential"],
            json!([index.document("b").await.unwrap()])
        );
        let submission = &presentation["presentation_submission"];
        assert_eq!(submission["definition_id"], "32f54163-7166-48f1-93d8-ff217bdb0654");
        let entries = submission["descriptor_map"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["id"], "citizenship_input_1");
        assert_eq!(entries[0]["format"], "ldp_vc");
        let path = JsonPath::parse(entries[0]["path"].as_str().unwrap()).unwrap();
        assert_eq!(
            path.query(&presentation).exactly_one().unwrap(),
            &presentation["verifiableCredential"][0]
        );
        assert_eq!(
            presentation["proof"]["challenge"],
            "3fa85f64-5717-4562-b3fc-2c963f66afa7"
        );
    }

    #[tokio::test]
    async fn pick_count_limits_the_descriptor_map() {
        let request = json!({
            "presentation_definition": {
                "id": "c1b8e3b4-6f2d-4b7e-9a53-0f1d2a3c4e5f",
                "submission_requirements": [{"rule": "pick", "count": 1, "from": "A"}],
                "input_descriptors": [
                    {
                        "id": "d1",
                        "group": ["A"],
                        "schema": [{"uri": "https://www.w3.org/2018/credentials#VerifiableCredential"}]
                    },
                    {
                        "id": "d2",
                        "group": ["A"],
                        "constraints": {"fields": [{"path": ["$.issuer"]}]}
                    }
                ]
            }
        });
        let index = MemoryCredentialIndex::from(vec![vc("only", "did:example:489398593")]);

        let presentation = present(&request, &index).await.unwrap();
        let entries = presentation["presentation_submission"]["descriptor_map"]
            .as_array()
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["id"], "d1");
        assert_eq!(presentation["verifiableCredential"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn every_descriptor_needs_a_credential_without_requirements() {
        let request = proof_request(None);
        let index = MemoryCredentialIndex::from(vec![vc("b", "did:example:489398593")]);

        let err = present(&request, &index).await.unwrap_err();
        assert!(matches!(
            err,
            PresFormatHandlerError::NoMatchingCredentials { referent, .. }
                if referent == "degree_input"
        ));
    }

    #[tokio::test]
    async fn every_descriptor_needs_a_credential_with_requirements() {
        let request = proof_request(Some(json!([{
            "rule": "pick",
            "count": 1,
            "from_nested": [
                {"rule": "all", "from": "A"},
                {"rule": "all", "from": "B"}
            ]
        }])));
        let index = MemoryCredentialIndex::from(vec![vc("b", "did:example:489398593")]);

        let err = present(&request, &index).await.unwrap_err();
        assert!(matches!(
            err,
            PresFormatHandlerError::NoMatchingCredentials { referent, .. }
                if referent == "degree_input"
        ));
    }

    #[tokio::test]
    async fn unmet_requirements_abort_construction() {
        let request = proof_request(Some(json!([{"rule": "pick", "count": 2, "from": "A"}])));
        let index = MemoryCredentialIndex::from(vec![
            vc("b", "did:example:489398593"),
            degree("d"),
        ]);

        let err = present(&request, &index).await.unwrap_err();
        assert!(matches!(err, PresFormatHandlerError::UnsatisfiedRequirement(_)));
    }

    #[test]
    fn validates_each_message_body() {
        let handler = DifPresFormatHandler;
        assert!(handler
            .validate_fields(MessageType::RequestPresentation, &proof_request(None))
            .is_ok());

        let err = handler
            .validate_fields(
                MessageType::RequestPresentation,
                &proof_request(Some(json!([{"rule": "all", "from": "Z"}]))),
            )
            .unwrap_err();
        assert_eq!(
            err.path,
            "presentation_definition.submission_requirements[0].from"
        );

        assert!(handler
            .validate_fields(
                MessageType::ProposePresentation,
                &json!({"input_descriptors": [{"id": "citizenship_input_1"}]})
            )
            .is_ok());

        let err = handler
            .validate_fields(MessageType::Presentation, &json!({"verifiableCredential": []}))
            .unwrap_err();
        assert!(err.message.contains("presentation_submission"));
    }
}
