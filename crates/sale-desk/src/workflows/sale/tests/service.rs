use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::common::*;
use crate::workflows::sale::access::{AccessError, AccessMode};
use crate::workflows::sale::commission::{
    BrokerId, CommissionValidator, CommittedField, FinderAllocation, FinderId, ManagementLine,
    ManagementTier, ManagerId, Percentage,
};
use crate::workflows::sale::domain::{
    RecordId, RecordStatus, SalePatch, SaleRecord, SignatureStatus, SignerTracking, TaxId,
    ValidationError,
};
use crate::workflows::sale::lifecycle::SkipReason;
use crate::workflows::sale::repository::SignerCandidate;
use crate::workflows::sale::service::{
    FinalizeRequest, PersistOutcome, SaleRecordService, SaleServiceError, SaveTrigger,
    WriteFailure,
};
use crate::workflows::sale::share::ShareLinkParams;

const TIMEOUT: Duration = Duration::from_secs(5);

fn signer(name: &str) -> SignerCandidate {
    SignerCandidate {
        name: name.to_string(),
        role: "seller".to_string(),
        email: Some(format!("{}@example.com", name.to_lowercase())),
        tax_id: None,
    }
}

#[tokio::test]
async fn persists_only_dirty_records_with_minimal_fields() {
    let (service, repository, _, _) = build_service();
    let mut session = service.start_session(context(OWNER_CPF));

    let clean = service.save(&mut session, TIMEOUT).await.expect("clean save");
    assert_eq!(clean, PersistOutcome::Skipped(SkipReason::Clean));

    service
        .edit(
            &mut session,
            SalePatch {
                property: Some(payload(json!({ "address": "Rua A, 1" }))),
                ..SalePatch::default()
            },
        )
        .expect("draft accepts edits");
    let incomplete = service.save(&mut session, TIMEOUT).await.expect("skipped");
    assert_eq!(
        incomplete,
        PersistOutcome::Skipped(SkipReason::MissingFields(vec![
            "/parties/seller/name".to_string()
        ]))
    );
    assert_eq!(repository.writes(), 0);

    service
        .edit(&mut session, complete_patch())
        .expect("draft accepts edits");
    let written = service.save(&mut session, TIMEOUT).await.expect("written");
    let record_id = match written {
        PersistOutcome::Written(id) => id,
        other => panic!("expected a write, got {other:?}"),
    };
    assert_eq!(repository.writes(), 1);
    assert!(!session.is_dirty());
    assert_eq!(session.record().id, Some(record_id.clone()));

    let stored = repository.stored(&record_id).expect("stored");
    assert_eq!(stored.owner_cpf, Some(TaxId::new(OWNER_CPF)));
    assert!(stored.metadata.last_saved_at.is_some());
    assert_eq!(&stored, session.record());

    let again = service.save(&mut session, TIMEOUT).await.expect("clean");
    assert_eq!(again, PersistOutcome::Skipped(SkipReason::Clean));
    assert_eq!(repository.writes(), 1);
}

#[tokio::test]
async fn finder_allowance_is_exhausted_by_full_broker_share() {
    let (service, _, _, _) = build_service();
    let mut session = service.start_session(
        context(OWNER_CPF).with_selected_broker(BrokerId("broker-ana".to_string())),
    );

    let line = service
        .add_broker_line(&mut session, None, Percentage::whole(55))
        .expect("selected broker is used");
    assert_eq!(
        session.record().commission.broker_lines[line].broker_id,
        BrokerId("broker-ana".to_string())
    );

    assert!(service
        .add_finder(
            &mut session,
            line,
            FinderAllocation::new(FinderId("finder-1".to_string()), Some(Percentage::ZERO)),
        )
        .expect("editable"));
    assert!(service
        .add_finder(
            &mut session,
            line,
            FinderAllocation::new(FinderId("finder-2".to_string()), None),
        )
        .expect("editable"));

    service
        .edit_commission(&mut session, |commission, _| {
            commission.broker_lines[line].set_finder_percentage(1, Some(Percentage::whole(10)))
        })
        .expect("keystroke edit");
    assert_eq!(
        session.record().commission.broker_lines[line].finders()[1].percentage,
        Some(Percentage::whole(10))
    );

    let committed = service
        .commit_broker_field(&mut session, line, CommittedField::Finder(1))
        .expect("editable")
        .expect("line exists");
    assert_eq!(committed.finders()[1].percentage, Some(Percentage::ZERO));

    let commission = &session.record().commission;
    assert_eq!(CommissionValidator::aggregate(commission), Percentage::whole(55));
    assert!(CommissionValidator::is_submittable(commission));
}

#[tokio::test]
async fn fourth_finder_is_refused_without_error() {
    let (service, _, _, _) = build_service();
    let mut session = service.start_session(context(OWNER_CPF));
    let line = service
        .add_broker_line(
            &mut session,
            Some(BrokerId("b-1".to_string())),
            Percentage::whole(10),
        )
        .expect("explicit broker");

    let mut accepted = 0;
    for slot in 0..6 {
        let finder = FinderAllocation::new(FinderId(format!("f-{slot}")), None);
        if service
            .add_finder(&mut session, line, finder)
            .expect("editable")
        {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 3);
    assert_eq!(session.record().commission.broker_lines[line].finders().len(), 3);
}

#[tokio::test]
async fn broker_line_needs_a_broker() {
    let (service, _, _, _) = build_service();
    let mut session = service.start_session(context(OWNER_CPF));
    match service.add_broker_line(&mut session, None, Percentage::whole(5)) {
        Err(SaleServiceError::Validation(ValidationError::MissingField { field })) => {
            assert_eq!(field, "commission.broker_lines.broker_id")
        }
        other => panic!("expected missing broker, got {other:?}"),
    }
    assert!(!session.is_dirty());
}

#[tokio::test]
async fn special_manager_is_clamped_to_reduced_cap() {
    let (service, _, _, _) = build_service();
    let mut session = service.start_session(context(OWNER_CPF));

    for (tier, tax_id) in [
        (ManagementTier::One, SPECIAL_TAX_ID),
        (ManagementTier::Two, "123.456.789-09"),
    ] {
        service
            .set_management_line(
                &mut session,
                ManagementLine {
                    tier,
                    manager_id: ManagerId(format!("manager-{tier}")),
                    percentage: Percentage::whole(10),
                    manager_tax_id: TaxId::new(tax_id),
                },
            )
            .expect("editable");
    }

    let special = service
        .commit_management(&mut session, ManagementTier::One)
        .expect("editable")
        .expect("tier one present");
    assert_eq!(special.percentage, Percentage::whole(4));

    let regular = service
        .commit_management(&mut session, ManagementTier::Two)
        .expect("editable")
        .expect("tier two present");
    assert_eq!(regular.percentage, Percentage::whole(5));

    assert_eq!(
        service
            .commit_management(&mut session, ManagementTier::Four)
            .expect("editable"),
        None
    );
}

#[tokio::test]
async fn finalize_is_one_way_and_requests_signatures() {
    let (service, repository, signatures, cache) = build_service();
    let mut session = service.start_session(context(OWNER_CPF));
    service.edit(&mut session, complete_patch()).expect("editable");
    service
        .add_broker_line(&mut session, Some(BrokerId("b-1".to_string())), Percentage::whole(30))
        .expect("editable");
    assert!(cache.snapshot().is_some());

    let outcome = service
        .finalize(
            &mut session,
            FinalizeRequest {
                document_name: None,
                signers: vec![signer("Seller"), signer("Buyer")],
            },
            TIMEOUT,
        )
        .await
        .expect("finalizes");

    assert_eq!(session.record().status, RecordStatus::Final);
    assert!(!session.is_editable());
    assert!(session.record().metadata.finalized_at.is_some());
    assert_eq!(outcome.signers.len(), 2);
    assert_eq!(outcome.dispatch_error, None);
    assert!(cache.snapshot().is_none());

    let requests = signatures.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].record_id, outcome.record_id);
    assert_eq!(requests[0].document_name, format!("Sale {}", outcome.record_id));

    let stored = repository.stored(&outcome.record_id).expect("stored");
    assert_eq!(stored.status, RecordStatus::Final);
    assert_eq!(stored.signatures.len(), 2);

    match service.edit(&mut session, complete_patch()) {
        Err(SaleServiceError::NotEditable { status }) => assert_eq!(status, RecordStatus::Final),
        other => panic!("expected not editable, got {other:?}"),
    }
    assert!(matches!(
        service.finalize(&mut session, FinalizeRequest::default(), TIMEOUT).await,
        Err(SaleServiceError::NotEditable { .. })
    ));
    assert_eq!(
        service.save(&mut session, TIMEOUT).await.expect("skip"),
        PersistOutcome::Skipped(SkipReason::Finalized)
    );
}

#[tokio::test]
async fn finalize_rejects_invalid_commission_before_writing() {
    let (service, repository, signatures, _) = build_service();
    let mut session = service.start_session(context(OWNER_CPF));
    service.edit(&mut session, complete_patch()).expect("editable");
    service
        .add_broker_line(&mut session, Some(BrokerId("b-1".to_string())), Percentage::ZERO)
        .expect("editable");

    assert!(matches!(
        service
            .finalize(&mut session, FinalizeRequest::default(), TIMEOUT)
            .await,
        Err(SaleServiceError::Validation(ValidationError::NothingAllocated))
    ));
    assert_eq!(repository.writes(), 0);
    assert!(signatures.requests().is_empty());
    assert!(session.is_editable());
}

#[tokio::test]
async fn finalize_survives_unreachable_signature_workflow() {
    let repository = Arc::new(MemoryRepository::default());
    let service = SaleRecordService::new(
        repository.clone(),
        Arc::new(OfflineSignatures),
        Arc::new(MemoryCache::default()),
        &sale_config(),
    );
    let mut session = service.start_session(context(OWNER_CPF));
    service.edit(&mut session, complete_patch()).expect("editable");

    let outcome = service
        .finalize(&mut session, FinalizeRequest::default(), TIMEOUT)
        .await
        .expect("record still finalizes");
    assert!(outcome.dispatch_error.is_some());
    assert_eq!(
        repository.stored(&outcome.record_id).map(|record| record.status),
        Some(RecordStatus::Final)
    );
}

#[tokio::test]
async fn explicit_save_failure_is_surfaced_and_retriable() {
    let repository = Arc::new(FlakyRepository::failing());
    let service = SaleRecordService::new(
        repository.clone(),
        Arc::new(RecordingSignatures::default()),
        Arc::new(MemoryCache::default()),
        &sale_config(),
    );
    let mut session = service.start_session(context(OWNER_CPF));
    service.edit(&mut session, complete_patch()).expect("editable");

    match service.save(&mut session, TIMEOUT).await {
        Err(SaleServiceError::TransientWrite(WriteFailure::Repository(_))) => {}
        other => panic!("expected transient failure, got {other:?}"),
    }
    assert!(session.is_dirty());
    assert_eq!(session.record().status, RecordStatus::Draft);
    assert!(session.record().id.is_none());

    repository.recover();
    assert!(matches!(
        service.save(&mut session, TIMEOUT).await,
        Ok(PersistOutcome::Written(_))
    ));
    assert_eq!(repository.attempts(), 2);
}

#[tokio::test]
async fn periodic_save_failure_is_swallowed() {
    let service = service_with_repository(UnavailableRepository);
    let mut session = service.start_session(context(OWNER_CPF));
    service.edit(&mut session, complete_patch()).expect("editable");

    let outcome = service
        .persist_if_needed(&mut session, SaveTrigger::Periodic, TIMEOUT)
        .await
        .expect("periodic failures are not errors");
    assert!(matches!(
        outcome,
        PersistOutcome::Deferred(WriteFailure::Repository(_))
    ));
    assert!(session.is_dirty());
}

#[tokio::test(start_paused = true)]
async fn stalled_writes_time_out() {
    let service = service_with_repository(StalledRepository);
    let mut session = service.start_session(context(OWNER_CPF));
    service.edit(&mut session, complete_patch()).expect("editable");

    let timeout = Duration::from_secs(2);
    match service.save(&mut session, timeout).await {
        Err(SaleServiceError::TransientWrite(WriteFailure::TimedOut { timeout: waited })) => {
            assert_eq!(waited, timeout)
        }
        other => panic!("expected timeout, got {other:?}"),
    }

    let deferred = service
        .persist_if_needed(&mut session, SaveTrigger::Periodic, timeout)
        .await
        .expect("swallowed");
    assert!(matches!(
        deferred,
        PersistOutcome::Deferred(WriteFailure::TimedOut { .. })
    ));

    assert!(matches!(
        service
            .finalize(&mut session, FinalizeRequest::default(), timeout)
            .await,
        Err(SaleServiceError::TransientWrite(_))
    ));
    assert_eq!(session.record().status, RecordStatus::Draft);
}

#[tokio::test]
async fn owner_access_is_checked_but_link_access_is_not() {
    let (service, repository, _, _) = build_service();
    let record_id = repository.seed(SaleRecord {
        owner_cpf: Some(TaxId::new(OWNER_CPF)),
        ..SaleRecord::default()
    });

    let owner = service
        .open_session(context("11122233344"), &record_id, AccessMode::Owner)
        .await
        .expect("owner opens");
    assert!(owner.is_editable());

    match service
        .open_session(context(OTHER_CPF), &record_id, AccessMode::Owner)
        .await
    {
        Err(SaleServiceError::Access(AccessError::Denied { .. })) => {}
        other => panic!("expected denial, got {other:?}"),
    }

    let missing = RecordId("sale-9999".to_string());
    match service
        .open_session(context(OWNER_CPF), &missing, AccessMode::SharedLink)
        .await
    {
        Err(SaleServiceError::Access(AccessError::NotFound { record_id })) => {
            assert_eq!(record_id, missing)
        }
        other => panic!("expected not found, got {other:?}"),
    }

    let mut linked = service
        .open_session(context(OTHER_CPF), &record_id, AccessMode::SharedLink)
        .await
        .expect("link holders open without identity check");
    service.edit(&mut linked, complete_patch()).expect("link holders edit drafts");
    assert!(matches!(
        service.save(&mut linked, TIMEOUT).await,
        Ok(PersistOutcome::Written(_))
    ));
    let stored = repository.stored(&record_id).expect("stored");
    assert_eq!(stored.owner_cpf, Some(TaxId::new(OWNER_CPF)));
}

#[tokio::test]
async fn link_holders_cannot_claim_ownership() {
    let (service, repository, _, _) = build_service();
    let record_id = repository.seed(SaleRecord {
        owner_cpf: Some(TaxId::new(OWNER_CPF)),
        ..SaleRecord::default()
    });

    let mut linked = service
        .open_session(context(OTHER_CPF), &record_id, AccessMode::SharedLink)
        .await
        .expect("link holders open");
    let mut body = serde_json::to_value(complete_patch()).expect("patch serializes");
    body["owner_cpf"] = json!(OTHER_CPF);
    let patch: SalePatch = serde_json::from_value(body).expect("patch parses");
    assert!(matches!(
        service.submit(&mut linked, patch, TIMEOUT).await,
        Ok(PersistOutcome::Written(_))
    ));

    let stored = repository.stored(&record_id).expect("stored");
    assert_eq!(stored.owner_cpf, Some(TaxId::new(OWNER_CPF)));
    service
        .open_session(context(OWNER_CPF), &record_id, AccessMode::Owner)
        .await
        .expect("original owner still opens");
    assert!(matches!(
        service
            .open_session(context(OTHER_CPF), &record_id, AccessMode::Owner)
            .await,
        Err(SaleServiceError::Access(AccessError::Denied { .. }))
    ));
}

#[tokio::test]
async fn share_link_prefills_exactly_once() {
    let (service, repository, _, _) = build_service();
    let mut session = service.start_session(context(OWNER_CPF));
    service.edit(&mut session, complete_patch()).expect("editable");

    let token = service.share(&mut session, TIMEOUT).await.expect("shares");
    assert_eq!(repository.writes(), 1);
    assert!(!session.is_dirty());

    let mut params = ShareLinkParams {
        id: session.record().id.as_ref().map(|id| id.0.clone()),
        link: true,
        token: Some(token),
    };
    let navigation = service
        .enter(context(OTHER_CPF), &mut params)
        .await
        .expect("prefilled");
    assert!(navigation.prefill_error.is_none());
    assert_eq!(navigation.session.record(), session.record());
    assert!(navigation.session.is_dirty());
    assert_eq!(
        navigation.session.record().parties.get("seller"),
        Some(&json!({ "name": "José da Conceição" }))
    );

    let reopened = service
        .enter(context(OTHER_CPF), &mut params)
        .await
        .expect("second navigation opens by id");
    assert!(!reopened.session.is_dirty());
    assert_eq!(reopened.session.grant().mode, AccessMode::SharedLink);
}

#[tokio::test]
async fn corrupt_token_falls_back_to_empty_draft() {
    let (service, _, _, _) = build_service();
    let mut params = ShareLinkParams {
        id: None,
        link: false,
        token: Some("definitely-not-a-token!".to_string()),
    };
    let navigation = service
        .enter(context(OWNER_CPF), &mut params)
        .await
        .expect("navigation still succeeds");
    assert!(navigation.prefill_error.is_some());
    assert_eq!(navigation.session.record(), &SaleRecord::default());
    assert!(!navigation.session.is_dirty());

    assert!(matches!(
        service.prefill_session(context(OWNER_CPF), "definitely-not-a-token!"),
        Err(SaleServiceError::Decode(_))
    ));
}

#[tokio::test]
async fn cached_draft_can_be_restored() {
    let (service, _, _, cache) = build_service();
    assert!(service.restore_session(context(OWNER_CPF)).is_none());

    let mut session = service.start_session(context(OWNER_CPF));
    service.edit(&mut session, complete_patch()).expect("editable");
    assert_eq!(cache.saves(), 1);

    let restored = service
        .restore_session(context(OWNER_CPF))
        .expect("cached draft");
    assert_eq!(restored.record(), session.record());
    assert!(restored.is_dirty());
}

#[tokio::test]
async fn broken_cache_never_blocks_edits() {
    let service = SaleRecordService::new(
        Arc::new(MemoryRepository::default()),
        Arc::new(RecordingSignatures::default()),
        Arc::new(BrokenCache),
        &sale_config(),
    );
    let mut session = service.start_session(context(OWNER_CPF));
    service.edit(&mut session, complete_patch()).expect("edit still applies");
    assert!(session.is_dirty());
    assert!(service.restore_session(context(OWNER_CPF)).is_none());
    assert!(matches!(
        service
            .finalize(&mut session, FinalizeRequest::default(), TIMEOUT)
            .await,
        Ok(_)
    ));
}

#[tokio::test]
async fn signer_progress_updates_final_records() {
    let (service, repository, _, _) = build_service();
    let mut session = service.start_session(context(OWNER_CPF));
    service.edit(&mut session, complete_patch()).expect("editable");
    let outcome = service
        .finalize(&mut session, FinalizeRequest::default(), TIMEOUT)
        .await
        .expect("finalizes");

    let signed = vec![SignerTracking {
        signer_id: "signer-1".to_string(),
        status: SignatureStatus::Signed,
        signed_at: Some(chrono::Utc::now()),
    }];
    service
        .record_signature_status(&mut session, signed.clone(), TIMEOUT)
        .await
        .expect("stored");

    let stored = repository.stored(&outcome.record_id).expect("stored");
    assert_eq!(stored.signatures, signed);
    assert_eq!(stored.status, RecordStatus::Final);
    assert_eq!(session.record().signatures, signed);
    assert!(!session.is_dirty());
}
