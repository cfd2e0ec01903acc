use std::sync::Arc;

use crate::infra::{in_memory_desk, DeskHandles};
use clap::Args;
use sale_desk::config::SaleDeskConfig;
use sale_desk::error::AppError;
use sale_desk::workflows::sale::{
    spawn_session_autosave, statement_csv, AccessMode, BrokerId, CallerIdentity,
    CommissionValidator, CommittedField, DraftCache, FinalizeRequest, FinderAllocation, FinderId,
    ManagementLine, ManagementTier, ManagerId, Payload, Percentage, PersistOutcome, RecordId,
    SalePatch, SaleServiceError, SaleSession, SessionContext, ShareLinkParams, SignerCandidate,
    TaxId,
};
use serde_json::json;
use tokio::sync::Mutex;

const DEMO_MANAGER_TAX_ID: &str = "987.654.321-00";

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// CPF of the broker drafting the record
    #[arg(long, default_value = "111.222.333-44")]
    pub(crate) owner_cpf: String,
    /// CPF of the colleague who receives the shared link
    #[arg(long, default_value = "555.666.777-88")]
    pub(crate) colleague_cpf: String,
    /// Stop after sharing, leaving the record as a draft
    #[arg(long)]
    pub(crate) skip_finalize: bool,
}

impl Default for DemoArgs {
    fn default() -> Self {
        Self {
            owner_cpf: "111.222.333-44".to_string(),
            colleague_cpf: "555.666.777-88".to_string(),
            skip_finalize: false,
        }
    }
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = SaleDeskConfig {
        reduced_cap_tax_ids: vec![DEMO_MANAGER_TAX_ID.to_string()],
        ..SaleDeskConfig::default()
    };
    let desk = in_memory_desk(&config);
    walkthrough(&desk, &args).await
}

async fn walkthrough(desk: &DeskHandles, args: &DemoArgs) -> Result<(), AppError> {
    let service = &desk.service;
    let timeout = service.write_timeout();
    let owner = SessionContext::new(CallerIdentity::new(TaxId::new(&args.owner_cpf)))
        .with_selected_broker(BrokerId("broker-ana".to_string()));
    let colleague = SessionContext::new(CallerIdentity::new(TaxId::new(&args.colleague_cpf)));

    println!("Sale desk demo");
    let mut session = service.start_session(owner);
    println!(
        "- New draft for {} (editable: {})",
        args.owner_cpf,
        session.is_editable()
    );

    service.edit(
        &mut session,
        SalePatch {
            financials: Payload::from_value(json!({ "price": 850000, "currency": "BRL" })),
            ..SalePatch::default()
        },
    )?;
    match service.save(&mut session, timeout).await? {
        PersistOutcome::Skipped(reason) => println!("  Save skipped: {reason:?}"),
        other => println!("  Save outcome: {other:?}"),
    }

    service.edit(
        &mut session,
        SalePatch {
            property: Payload::from_value(json!({ "address": "Rua das Acácias, 120" })),
            parties: Payload::from_value(json!({
                "seller": { "name": "José da Conceição" },
                "buyer": { "name": "Françoise Núñez" }
            })),
            ..SalePatch::default()
        },
    )?;

    println!("\nCommission split");
    let line = service.add_broker_line(
        &mut session,
        Some(BrokerId("broker-ana".to_string())),
        Percentage::whole(70),
    )?;
    service.add_finder(
        &mut session,
        line,
        FinderAllocation::new(FinderId("finder-rui".to_string()), Some(Percentage::whole(10))),
    )?;
    let committed = service.commit_broker_field(&mut session, line, CommittedField::Broker)?;
    if let Some(committed) = committed {
        println!(
            "- Broker {} asked for 70.00, kept {} beside finder share {} (line total {})",
            committed.broker_id.0,
            committed.percentage,
            committed.finder_sum(),
            committed.total()
        );
    }

    service.set_management_line(
        &mut session,
        ManagementLine {
            tier: ManagementTier::One,
            manager_id: ManagerId("manager-lia".to_string()),
            percentage: Percentage::whole(10),
            manager_tax_id: TaxId::new(DEMO_MANAGER_TAX_ID),
        },
    )?;
    if let Some(committed) = service.commit_management(&mut session, ManagementTier::One)? {
        println!(
            "- Tier {} manager {} capped at {}",
            committed.tier, committed.manager_id.0, committed.percentage
        );
    }
    let commission = &session.record().commission;
    println!(
        "- Aggregate {} | submittable: {}",
        CommissionValidator::aggregate(commission),
        CommissionValidator::is_submittable(commission)
    );

    let record_id = match service.save(&mut session, timeout).await? {
        PersistOutcome::Written(record_id) => record_id,
        other => {
            println!("  Record not written: {other:?}");
            return Ok(());
        }
    };
    println!("\n- Saved {record_id} (dirty: {})", session.is_dirty());

    let session = Arc::new(Mutex::new(session));
    let autosave = spawn_session_autosave(Arc::clone(service), Arc::clone(&session));
    println!(
        "- Autosave every {}s while the record stays open",
        service.autosave_interval().as_secs()
    );
    let result = {
        let mut session = session.lock().await;
        share_and_finalize(desk, args, &mut session, &record_id, colleague).await
    };
    let (summary, stop) = autosave.shutdown().await;
    println!(
        "- Autosave stopped ({stop:?}) after {} periodic write(s)",
        summary.writes
    );
    result
}

async fn share_and_finalize(
    desk: &DeskHandles,
    args: &DemoArgs,
    session: &mut SaleSession,
    record_id: &RecordId,
    colleague: SessionContext,
) -> Result<(), AppError> {
    let service = &desk.service;
    let timeout = service.write_timeout();

    println!("\nSharing");
    let token = service.share(session, timeout).await?;
    let link = ShareLinkParams {
        id: Some(record_id.0.clone()),
        link: true,
        token: None,
    };
    println!("- Link: /sales?{}", link.to_query());
    println!("- Prefill token ({} chars)", token.len());

    match service
        .open_session(colleague.clone(), record_id, AccessMode::Owner)
        .await
    {
        Err(SaleServiceError::Access(error)) => println!("- Colleague without link: {error}"),
        Err(other) => return Err(other.into()),
        Ok(_) => println!("- Colleague opened the record as owner"),
    }

    let mut params = link;
    let navigation = service.enter(colleague.clone(), &mut params).await?;
    println!(
        "- Colleague via link: access {} | editable {}",
        navigation.session.grant().mode.label(),
        navigation.session.is_editable()
    );

    let prefilled = service.prefill_session(colleague, &token)?;
    println!(
        "- Prefilled copy seller: {}",
        prefilled
            .record()
            .parties
            .get("seller")
            .and_then(|seller| seller.get("name"))
            .and_then(|name| name.as_str())
            .unwrap_or("?")
    );

    if args.skip_finalize {
        return Ok(());
    }

    println!("\nFinalize");
    let outcome = service
        .finalize(
            session,
            FinalizeRequest {
                document_name: Some("Contrato de compra e venda".to_string()),
                signers: vec![
                    SignerCandidate {
                        name: "José da Conceição".to_string(),
                        role: "seller".to_string(),
                        email: None,
                        tax_id: None,
                    },
                    SignerCandidate {
                        name: "Françoise Núñez".to_string(),
                        role: "buyer".to_string(),
                        email: None,
                        tax_id: None,
                    },
                ],
            },
            timeout,
        )
        .await?;
    println!(
        "- {} is {} with {} signer(s) pending",
        outcome.record_id,
        session.record().status.label(),
        outcome.signers.len()
    );
    if let Some(error) = &outcome.dispatch_error {
        println!("  Signature dispatch failed: {error}");
    }
    let cached = desk.cache.load().ok().flatten().is_some();
    println!(
        "- Draft cache cleared: {} | signature requests sent: {} | stored records: {}",
        !cached,
        desk.signatures.requests().len(),
        desk.repository.len()
    );

    match service.edit(session, SalePatch::default()) {
        Err(error) => println!("- Further edits refused: {error}"),
        Ok(()) => println!("- Record unexpectedly still editable"),
    }

    println!("\nCommission statement");
    print!("{}", statement_csv(&session.record().commission)?);
    Ok(())
}
