use agent::*;
use present_proof::{
    core::{message::PresMessage, pres_format::PresFormatKind},
    handler::{ConnectionRecord, HandlerError},
    holder::HolderCredential,
    record::{PresExRecord, PresExState},
};
use serde_json::{json, Value as Json};


const FORMATS: [PresFormatKind; 3] = [
    PresFormatKind::AnonCreds,
    PresFormatKind::Indy,
    PresFormatKind::Dif,
];

async fn only_record(agent: &Agent) -> PresExRecord {
    let mut records = agent.store.records().await;
    assert_eq!(records.len(), 1, "expected a single exchange record");
    records.remove(0)
}

#[tokio::test]
async fn presents_for_every_format() {
    for kind in FORMATS {
        let (errors, _guard) = count_errors();
        let agent = Agent::new(true, satisfying_credentials(kind));
        let context = request_context(kind, &proof_req(kind), ready_connection());

        agent.handler.handle(&context, &agent.responder).await.unwrap();

        let sent = agent.responder.sent();
        assert_eq!(sent.len(), 1, "{kind:?}");
        assert_eq!(sent[0].connection_id.as_deref(), Some("conn-1"));
        assert_eq!(sent[0].message.thread_id(), context.message.id);
        assert!(sent[0].message.attachment(kind).unwrap().is_some());

        let record = only_record(&agent).await;
        assert_eq!(record.state, PresExState::PresentationSent);
        assert_eq!(record.pres.as_ref(), Some(&sent[0].message));
        assert_eq!(agent.oob_calls(), 1);
        assert_eq!(errors.count(), 0);
    }
}

#[tokio::test]
async fn indy_presentation_uses_the_matching_credential() {
    let agent = Agent::new(
        true,
        vec![
            indy_credential("other-cred", &[("colour", "green")]),
            indy_credential("cred-1", &[("favourite", "potato"), ("icon", "cG90YXRv")]),
        ],
    );
    let context = request_context(PresFormatKind::Indy, &indy_proof_req(), ready_connection());

    agent.handler.handle(&context, &agent.responder).await.unwrap();

    let sent = agent.responder.sent();
    assert_eq!(sent.len(), 1);
    let presentation = sent[0].message.attachment(PresFormatKind::Indy).unwrap().unwrap();
    let revealed = &presentation["requested_proof"]["requested_attributes"];
    assert_eq!(revealed["0_favourite_uuid"]["cred_id"], "cred-1");
    assert_eq!(revealed["1_icon_uuid"]["cred_id"], "cred-1");
}

/// A request, credentials that leave one of its referents without candidates, and that
/// referent.
type Unmatched = (Json, Vec<HolderCredential>, &'static str);

fn unmatched_predicate(kind: PresFormatKind) -> Unmatched {
    match kind {
        PresFormatKind::AnonCreds | PresFormatKind::Indy => (
            indy_proof_req_pred(),
            vec![indy_credential("cred-1", &[("score", "5")])],
            "0_score_GE_uuid",
        ),
        PresFormatKind::Dif => (
            dif_proof_req_pred(),
            vec![dif_credential_with("vc-1", json!({"age": 12}))],
            "age_over_18",
        ),
    }
}

fn unmatched_attribute(kind: PresFormatKind) -> Unmatched {
    match kind {
        PresFormatKind::AnonCreds | PresFormatKind::Indy => (
            indy_proof_req(),
            vec![indy_credential("cred-1", &[("favourite", "potato")])],
            "1_icon_uuid",
        ),
        PresFormatKind::Dif => (
            dif_proof_req_attr(),
            vec![dif_credential_with("vc-1", json!({"givenName": "JOHN"}))],
            "family_name",
        ),
    }
}

async fn assert_abandoned(kind: PresFormatKind, (request, credentials, referent): Unmatched) {
    let (errors, _guard) = count_errors();
    let agent = Agent::new(true, credentials);
    let context = request_context(kind, &request, ready_connection());

    agent.handler.handle(&context, &agent.responder).await.unwrap();

    assert!(agent.responder.sent().is_empty(), "{kind:?}");
    let record = only_record(&agent).await;
    assert_eq!(record.state, PresExState::Abandoned, "{kind:?}");
    assert!(record.error_msg.unwrap().contains(referent), "{kind:?}");
    assert_eq!(errors.count(), 1, "{kind:?}");
}

#[tokio::test]
async fn unmatched_predicate_abandons_the_exchange() {
    for kind in FORMATS {
        assert_abandoned(kind, unmatched_predicate(kind)).await;
    }
}

#[tokio::test]
async fn unmatched_attribute_abandons_the_exchange() {
    for kind in FORMATS {
        assert_abandoned(kind, unmatched_attribute(kind)).await;
    }
}

#[tokio::test]
async fn dif_pick_submits_a_single_branch() {
    let request = dif_proof_req_pred();
    let agent = Agent::new(true, vec![dif_credential_with("vc-1", json!({"age": 30}))]);
    let context = request_context(PresFormatKind::Dif, &request, ready_connection());

    agent.handler.handle(&context, &agent.responder).await.unwrap();

    let sent = agent.responder.sent();
    assert_eq!(sent.len(), 1);
    let presentation = sent[0].message.attachment(PresFormatKind::Dif).unwrap().unwrap();
    let entries = presentation["presentation_submission"]["descriptor_map"]
        .as_array()
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["id"], "any_vc");
}

#[tokio::test]
async fn holder_without_credentials_abandons_every_format() {
    for kind in FORMATS {
        let (errors, _guard) = count_errors();
        let agent = Agent::new(true, vec![]);
        let context = request_context(kind, &proof_req(kind), ready_connection());

        agent.handler.handle(&context, &agent.responder).await.unwrap();

        assert!(agent.responder.sent().is_empty());
        let record = only_record(&agent).await;
        assert_eq!(record.state, PresExState::Abandoned);
        assert!(record.error_msg.is_some());
        assert_eq!(errors.count(), 1, "{kind:?}");
    }
}

#[tokio::test]
async fn predicate_with_several_matches_is_presented() {
    let agent = Agent::new(
        true,
        vec![
            indy_credential("cred-1", &[("score", "1000000")]),
            indy_credential("cred-2", &[("score", "2000000")]),
        ],
    );
    let context = request_context(PresFormatKind::Indy, &indy_proof_req_pred(), ready_connection());

    agent.handler.handle(&context, &agent.responder).await.unwrap();

    let sent = agent.responder.sent();
    assert_eq!(sent.len(), 1);
    let presentation = sent[0].message.attachment(PresFormatKind::Indy).unwrap().unwrap();
    assert_eq!(
        presentation["requested_proof"]["requested_predicates"]["0_score_GE_uuid"]["cred_id"],
        "cred-1"
    );
}

#[tokio::test]
async fn prover_failure_abandons_the_exchange() {
    let (errors, _guard) = count_errors();
    let agent = Agent::with(
        true,
        satisfying_credentials(PresFormatKind::Indy),
        None,
        MockProver { fail: true },
    );
    let context = request_context(PresFormatKind::Indy, &indy_proof_req(), ready_connection());

    agent.handler.handle(&context, &agent.responder).await.unwrap();

    assert!(agent.responder.sent().is_empty());
    let record = only_record(&agent).await;
    assert_eq!(record.state, PresExState::Abandoned);
    assert!(record.error_msg.unwrap().contains("wallet is locked"));
    assert_eq!(errors.count(), 1);
}

#[tokio::test]
async fn matching_is_deterministic() {
    let index = present_proof::holder::MemoryCredentialIndex::from(vec![
        indy_credential("cred-2", &[("favourite", "chips"), ("icon", "Y2hpcHM=")]),
        indy_credential("cred-1", &[("favourite", "potato"), ("icon", "cG90YXRv")]),
    ]);
    let agent = Agent::new(true, vec![]);
    let context = request_context(PresFormatKind::Indy, &indy_proof_req(), ready_connection());
    let record = agent
        .handler
        .manager()
        .receive_pres_request(context.message.clone(), Some("conn-1"))
        .await
        .unwrap();

    let handler = PresFormatKind::Indy.handler();
    let request = indy_proof_req();
    let first = handler
        .get_matching_credentials(&index, &record, &request)
        .await
        .unwrap();
    let second = handler
        .get_matching_credentials(&index, &record, &request)
        .await
        .unwrap();

    assert_eq!(first, second);
    let referents: Vec<_> = first.iter().map(|m| m.referent.as_str()).collect();
    assert_eq!(referents, ["0_favourite_uuid", "1_icon_uuid"]);
    assert_eq!(first[0].selected().unwrap().referent, "cred-2");
}

#[tokio::test]
async fn missing_connection_is_rejected() {
    let agent = Agent::new(true, satisfying_credentials(PresFormatKind::Indy));

    let unready = request_context(
        PresFormatKind::Indy,
        &indy_proof_req(),
        Some(ConnectionRecord {
            connection_id: "conn-1".into(),
            ready: false,
        }),
    );
    let not_ready = agent
        .handler
        .handle(&unready, &agent.responder)
        .await
        .unwrap_err();
    assert!(matches!(not_ready, HandlerError::ConnectionNotReady));

    let connectionless = request_context(PresFormatKind::Indy, &indy_proof_req(), None);
    let no_connection = agent
        .handler
        .handle(&connectionless, &agent.responder)
        .await
        .unwrap_err();
    assert!(matches!(no_connection, HandlerError::NoConnection));

    assert_eq!(
        not_ready.to_string(),
        "Connection used for presentation request not ready"
    );
    assert_ne!(not_ready.to_string(), no_connection.to_string());
    assert!(agent.store.records().await.is_empty());
    assert!(agent.responder.sent().is_empty());
    assert_eq!(agent.oob_calls(), 2);
}

#[tokio::test]
async fn out_of_band_exchange_proceeds_without_connection() {
    for connection in [
        None,
        Some(ConnectionRecord {
            connection_id: "conn-1".into(),
            ready: false,
        }),
    ] {
        let agent = Agent::with(
            true,
            satisfying_credentials(PresFormatKind::Indy),
            Some(oob_record()),
            MockProver::default(),
        );
        let context = request_context(PresFormatKind::Indy, &indy_proof_req(), connection);

        agent.handler.handle(&context, &agent.responder).await.unwrap();

        let sent = agent.responder.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].connection_id, None);
        let record = only_record(&agent).await;
        assert_eq!(record.connection_id, None);
        assert_eq!(record.state, PresExState::PresentationSent);
    }
}

#[tokio::test]
async fn request_is_recorded_without_auto_present() {
    let (errors, _guard) = count_errors();
    let agent = Agent::new(false, satisfying_credentials(PresFormatKind::Indy));
    let context = request_context(PresFormatKind::Indy, &indy_proof_req(), ready_connection());

    agent.handler.handle(&context, &agent.responder).await.unwrap();

    assert!(agent.responder.sent().is_empty());
    let record = only_record(&agent).await;
    assert_eq!(record.state, PresExState::RequestReceived);
    assert!(!record.auto_present);
    assert_eq!(record.connection_id.as_deref(), Some("conn-1"));
    assert_eq!(record.pres_request.as_ref(), Some(&context.message));
    assert_eq!(errors.count(), 0);
}

#[tokio::test]
async fn redelivered_request_is_answered_once() {
    let agent = Agent::new(true, satisfying_credentials(PresFormatKind::Indy));
    let context = request_context(PresFormatKind::Indy, &indy_proof_req(), ready_connection());

    agent.handler.handle(&context, &agent.responder).await.unwrap();
    agent.handler.handle(&context, &agent.responder).await.unwrap();

    assert_eq!(agent.responder.sent().len(), 1);
    assert_eq!(only_record(&agent).await.state, PresExState::PresentationSent);
}

#[tokio::test]
async fn dif_presentation_carries_the_submission() {
    let agent = Agent::new(true, vec![dif_credential("vc-1")]);
    let context = request_context(PresFormatKind::Dif, &dif_proof_req(), ready_connection());

    agent.handler.handle(&context, &agent.responder).await.unwrap();

    let sent = agent.responder.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].message.formats[0].format, "dif/presentation-exchange/submission@v1.0");
    let presentation = sent[0].message.attachment(PresFormatKind::Dif).unwrap().unwrap();
    assert_eq!(
        presentation["presentation_submission"]["definition_id"],
        "32f54163-7166-48f1-93d8-ff217bdb0653"
    );
    assert_eq!(presentation["verifiableCredential"][0]["issuer"], DIF_ISSUER);
    let entries = presentation["presentation_submission"]["descriptor_map"]
        .as_array()
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["id"], "citizenship_input_1");
    assert_eq!(
        presentation["proof"]["challenge"],
        json!("3fa85f64-5717-4562-b3fc-2c963f66afa6")
    );
}
