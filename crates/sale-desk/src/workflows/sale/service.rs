use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SaleDeskConfig;

use super::access::{AccessError, AccessMode, RecordAccessPolicy};
use super::commission::{
    BrokerId, BrokerLine, CommittedField, CommissionDistribution, CommissionValidator,
    FinderAllocation, ManagementLine, ManagementTier, Percentage,
};
use super::domain::{RecordId, RecordStatus, SalePatch, SaleRecord, SignerTracking, ValidationError};
use super::lifecycle::{
    LifecycleError, PersistDecision, SaleLifecycle, SkipReason, TrackedRecord, WriteKind,
};
use super::repository::{
    DraftCache, RepositoryError, SaleRepository, SignatureRequest, SignatureWorkflow,
    SignerCandidate,
};
use super::session::{SaleSession, SessionContext};
use super::share::{ShareLinkParams, ShareTokenCodec, ShareTokenError};

/// Which path asked for the save. Periodic failures are swallowed, explicit ones surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTrigger {
    Periodic,
    Explicit,
}

impl SaveTrigger {
    pub const fn label(self) -> &'static str {
        match self {
            SaveTrigger::Periodic => "periodic",
            SaveTrigger::Explicit => "explicit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Written(RecordId),
    Skipped(SkipReason),
    /// Periodic write failed; the record stays dirty for the next tick.
    Deferred(WriteFailure),
}

/// A write that did not land. Never changes the record status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteFailure {
    #[error("write timed out after {}ms", .timeout.as_millis())]
    TimedOut { timeout: Duration },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeRequest {
    #[serde(default)]
    pub document_name: Option<String>,
    #[serde(default)]
    pub signers: Vec<SignerCandidate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalizeOutcome {
    pub record_id: RecordId,
    pub signers: Vec<SignerTracking>,
    /// Set when the record is final but the signature workflow could not be reached.
    pub dispatch_error: Option<String>,
}

/// Result of landing on a record URL.
#[derive(Debug)]
pub struct Navigation {
    pub session: SaleSession,
    /// Token that could not be decoded. The session then holds an empty draft.
    pub prefill_error: Option<ShareTokenError>,
}

#[derive(Debug, thiserror::Error)]
pub enum SaleServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("record is {} and can no longer be edited", .status.label())]
    NotEditable { status: RecordStatus },
    #[error(transparent)]
    TransientWrite(#[from] WriteFailure),
    #[error(transparent)]
    Decode(#[from] ShareTokenError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<LifecycleError> for SaleServiceError {
    fn from(error: LifecycleError) -> Self {
        match error {
            LifecycleError::NotEditable { status } => SaleServiceError::NotEditable { status },
            LifecycleError::Validation(error) => SaleServiceError::Validation(error),
        }
    }
}

/// Facade composing the lifecycle, commission validator, share codec, access policy and
/// the external collaborators.
pub struct SaleRecordService<R, S, C> {
    repository: Arc<R>,
    signatures: Arc<S>,
    cache: Arc<C>,
    lifecycle: Arc<SaleLifecycle>,
    codec: ShareTokenCodec,
    access: RecordAccessPolicy,
    write_timeout: Duration,
    autosave_interval: Duration,
}

/// Snapshot ready to be written, stamped with owner and save time.
struct PlannedWrite {
    kind: WriteKind,
    snapshot: SaleRecord,
}

impl<R, S, C> SaleRecordService<R, S, C>
where
    R: SaleRepository + 'static,
    S: SignatureWorkflow + 'static,
    C: DraftCache + 'static,
{
    pub fn new(
        repository: Arc<R>,
        signatures: Arc<S>,
        cache: Arc<C>,
        config: &SaleDeskConfig,
    ) -> Self {
        Self::with_lifecycle(
            repository,
            signatures,
            cache,
            SaleLifecycle::from_config(config),
            config.write_timeout,
        )
        .with_autosave_interval(config.autosave_interval)
    }

    pub fn with_lifecycle(
        repository: Arc<R>,
        signatures: Arc<S>,
        cache: Arc<C>,
        lifecycle: SaleLifecycle,
        write_timeout: Duration,
    ) -> Self {
        Self {
            repository,
            signatures,
            cache,
            lifecycle: Arc::new(lifecycle),
            codec: ShareTokenCodec::default(),
            access: RecordAccessPolicy,
            write_timeout,
            autosave_interval: SaleDeskConfig::default().autosave_interval,
        }
    }

    pub fn with_autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval = interval;
        self
    }

    pub fn lifecycle(&self) -> &SaleLifecycle {
        &self.lifecycle
    }

    pub fn validator(&self) -> &CommissionValidator {
        self.lifecycle.validator()
    }

    pub fn codec(&self) -> &ShareTokenCodec {
        &self.codec
    }

    /// Default bound for writes issued on behalf of HTTP callers and the autosave driver.
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// How often an open saved draft is checked for unsaved changes.
    pub fn autosave_interval(&self) -> Duration {
        self.autosave_interval
    }

    /// New empty draft owned by the caller.
    pub fn start_session(&self, context: SessionContext) -> SaleSession {
        SaleSession::new(context, self.access.for_new_record(), SaleLifecycle::create())
    }

    /// Resume the draft left in the local cache, if any.
    pub fn restore_session(&self, context: SessionContext) -> Option<SaleSession> {
        let cached = match self.cache.load() {
            Ok(cached) => cached?,
            Err(error) => {
                warn!(%error, "draft cache could not be read");
                return None;
            }
        };
        if !SaleLifecycle::is_editable(&cached) {
            debug!("cached snapshot is not a draft, ignoring");
            return None;
        }
        Some(SaleSession::new(
            context,
            self.access.for_new_record(),
            TrackedRecord::from_snapshot(cached),
        ))
    }

    /// Open a stored record as its owner or through a shared link.
    pub async fn open_session(
        &self,
        context: SessionContext,
        record_id: &RecordId,
        mode: AccessMode,
    ) -> Result<SaleSession, SaleServiceError> {
        let fetched = self.repository.fetch(record_id).await?;
        let (record, grant) = self
            .access
            .resolve(&context.caller, record_id, fetched, mode)?;
        debug!(%record_id, mode = mode.label(), can_write = grant.can_write, "record opened");
        Ok(SaleSession::new(
            context,
            grant,
            TrackedRecord::from_persisted(record),
        ))
    }

    /// Session prefilled from a share token. Nothing is applied unless the whole token
    /// decodes.
    pub fn prefill_session(
        &self,
        context: SessionContext,
        token: &str,
    ) -> Result<SaleSession, SaleServiceError> {
        let record = self.codec.decode(token)?;
        Ok(SaleSession::new(
            context,
            self.access.for_new_record(),
            TrackedRecord::from_snapshot(record),
        ))
    }

    /// Resolve a record URL: a token prefills once, an id opens the stored record, and
    /// anything else starts a new draft.
    pub async fn enter(
        &self,
        context: SessionContext,
        params: &mut ShareLinkParams,
    ) -> Result<Navigation, SaleServiceError> {
        if let Some(token) = params.take_token() {
            return match self.prefill_session(context.clone(), &token) {
                Ok(session) => Ok(Navigation {
                    session,
                    prefill_error: None,
                }),
                Err(SaleServiceError::Decode(error)) => Ok(Navigation {
                    session: self.start_session(context),
                    prefill_error: Some(error),
                }),
                Err(other) => Err(other),
            };
        }

        let session = match params.id.as_deref().filter(|id| !id.trim().is_empty()) {
            Some(id) => {
                let record_id = RecordId(id.to_string());
                self.open_session(context, &record_id, AccessMode::from_link_flag(params.link))
                    .await?
            }
            None => self.start_session(context),
        };
        Ok(Navigation {
            session,
            prefill_error: None,
        })
    }

    /// Apply a patch to a draft and refresh the local cache.
    pub fn edit(
        &self,
        session: &mut SaleSession,
        patch: SalePatch,
    ) -> Result<(), SaleServiceError> {
        self.ensure_writable(session)?;
        self.lifecycle.edit(session.tracked_mut(), patch)?;
        self.cache_draft(session);
        Ok(())
    }

    /// Keystroke-level commission change; nothing is clamped here.
    pub fn edit_commission<T>(
        &self,
        session: &mut SaleSession,
        change: impl FnOnce(&mut CommissionDistribution, &CommissionValidator) -> T,
    ) -> Result<T, SaleServiceError> {
        self.ensure_writable(session)?;
        let value = self.lifecycle.edit_commission(session.tracked_mut(), change)?;
        self.cache_draft(session);
        Ok(value)
    }

    /// Add a broker line for `broker`, or for the broker selected in the session context.
    pub fn add_broker_line(
        &self,
        session: &mut SaleSession,
        broker: Option<BrokerId>,
        percentage: Percentage,
    ) -> Result<usize, SaleServiceError> {
        let broker = broker
            .or_else(|| session.context().selected_broker.clone())
            .ok_or_else(|| ValidationError::MissingField {
                field: "commission.broker_lines.broker_id".to_string(),
            })?;
        self.edit_commission(session, |commission, _| {
            commission
                .broker_lines
                .push(BrokerLine::new(broker, percentage));
            commission.broker_lines.len() - 1
        })
    }

    /// Returns false when the line is missing or already holds three finders.
    pub fn add_finder(
        &self,
        session: &mut SaleSession,
        line_index: usize,
        finder: FinderAllocation,
    ) -> Result<bool, SaleServiceError> {
        self.edit_commission(session, |commission, validator| {
            match commission.broker_line_mut(line_index) {
                Some(line) => validator.add_finder(line, finder),
                None => false,
            }
        })
    }

    /// A broker line field lost focus: clamp it and return the effective line.
    pub fn commit_broker_field(
        &self,
        session: &mut SaleSession,
        line_index: usize,
        field: CommittedField,
    ) -> Result<Option<BrokerLine>, SaleServiceError> {
        self.edit_commission(session, |commission, validator| {
            let line = commission.broker_line_mut(line_index)?;
            *line = validator.clamp_on_commit(line, field);
            Some(line.clone())
        })
    }

    pub fn set_management_line(
        &self,
        session: &mut SaleSession,
        line: ManagementLine,
    ) -> Result<(), SaleServiceError> {
        self.edit_commission(session, |commission, _| {
            commission.management_lines.upsert(line)
        })
    }

    /// A management percentage lost focus: clamp it to the manager's cap.
    pub fn commit_management(
        &self,
        session: &mut SaleSession,
        tier: ManagementTier,
    ) -> Result<Option<ManagementLine>, SaleServiceError> {
        self.edit_commission(session, |commission, validator| {
            let line = commission.management_lines.get_mut(tier)?;
            *line = validator.clamp_management_on_commit(line);
            Some(line.clone())
        })
    }

    /// Commit every commission field at once, as when a whole form is submitted.
    pub fn commit_commission(&self, session: &mut SaleSession) -> Result<(), SaleServiceError> {
        self.edit_commission(session, |commission, validator| {
            *commission = validator.clamp_distribution(commission);
        })
    }

    /// Write the record when it is a dirty draft carrying the minimal fields.
    pub async fn persist_if_needed(
        &self,
        session: &mut SaleSession,
        trigger: SaveTrigger,
        timeout: Duration,
    ) -> Result<PersistOutcome, SaleServiceError> {
        let planned = match self.plan_write(session, trigger) {
            Ok(planned) => planned,
            Err(reason) => return Ok(PersistOutcome::Skipped(reason)),
        };

        let gate = session.write_gate();
        let mut landed = gate.enter().await;
        match self.write(planned.kind, planned.snapshot, timeout).await {
            Ok(written) => {
                *landed += 1;
                let record_id = self.adopt(session, written, trigger)?;
                Ok(PersistOutcome::Written(record_id))
            }
            Err(failure) => match trigger {
                SaveTrigger::Periodic => {
                    warn!(error = %failure, "periodic save failed, will retry next interval");
                    Ok(PersistOutcome::Deferred(failure))
                }
                SaveTrigger::Explicit => {
                    warn!(error = %failure, "explicit save failed");
                    Err(failure.into())
                }
            },
        }
    }

    /// Periodic save for a session shared with explicit actions. The session lock is
    /// released while the write is in flight, so edits never wait on it.
    pub async fn persist_periodic(
        &self,
        session: &Mutex<SaleSession>,
        timeout: Duration,
    ) -> PersistOutcome {
        let (planned, gate, observed) = {
            let guard = session.lock().await;
            let planned = match self.plan_write(&guard, SaveTrigger::Periodic) {
                Ok(planned) => planned,
                Err(reason) => return PersistOutcome::Skipped(reason),
            };
            let gate = guard.write_gate();
            let observed = gate.landed().await;
            (planned, gate, observed)
        };

        let result = {
            let mut landed = gate.enter().await;
            if *landed != observed {
                debug!("newer write landed first, periodic snapshot dropped");
                return PersistOutcome::Skipped(SkipReason::Superseded);
            }
            let result = self.write(planned.kind, planned.snapshot, timeout).await;
            if result.is_ok() {
                *landed += 1;
            }
            result
        };

        let mut guard = session.lock().await;
        match result {
            Ok(written) => {
                if gate.landed().await != observed + 1 {
                    debug!("newer write landed after the periodic one, keeping its baseline");
                    return PersistOutcome::Skipped(SkipReason::Superseded);
                }
                match self.adopt(&mut guard, written, SaveTrigger::Periodic) {
                    Ok(record_id) => PersistOutcome::Written(record_id),
                    Err(error) => PersistOutcome::Deferred(WriteFailure::Repository(error)),
                }
            }
            Err(failure) => {
                warn!(error = %failure, "periodic save failed, will retry next interval");
                PersistOutcome::Deferred(failure)
            }
        }
    }

    fn plan_write(
        &self,
        session: &SaleSession,
        trigger: SaveTrigger,
    ) -> Result<PlannedWrite, SkipReason> {
        let kind = match self.lifecycle.persist_decision(session.tracked()) {
            PersistDecision::Skip(reason) => {
                debug!(trigger = trigger.label(), ?reason, "persistence skipped");
                return Err(reason);
            }
            PersistDecision::Write(kind) => kind,
        };

        let mut snapshot = session.record().clone();
        if snapshot.owner_cpf.is_none() {
            snapshot.owner_cpf = Some(session.context().caller.cpf.clone());
        }
        snapshot.metadata.last_saved_at = Some(Utc::now());
        Ok(PlannedWrite { kind, snapshot })
    }

    fn adopt(
        &self,
        session: &mut SaleSession,
        written: SaleRecord,
        trigger: SaveTrigger,
    ) -> Result<RecordId, RepositoryError> {
        let record_id = written.id.clone().ok_or(RepositoryError::NotFound)?;
        session.tracked_mut().mark_persisted(written);
        info!(%record_id, trigger = trigger.label(), "sale record saved");
        Ok(record_id)
    }

    /// Form submission: apply the patch, commit every commission field, then save.
    pub async fn submit(
        &self,
        session: &mut SaleSession,
        patch: SalePatch,
        timeout: Duration,
    ) -> Result<PersistOutcome, SaleServiceError> {
        self.edit(session, patch)?;
        self.commit_commission(session)?;
        self.save(session, timeout).await
    }

    pub async fn save(
        &self,
        session: &mut SaleSession,
        timeout: Duration,
    ) -> Result<PersistOutcome, SaleServiceError> {
        self.persist_if_needed(session, SaveTrigger::Explicit, timeout)
            .await
    }

    /// Save if needed, then encode the current record into a share token.
    pub async fn share(
        &self,
        session: &mut SaleSession,
        timeout: Duration,
    ) -> Result<String, SaleServiceError> {
        if session.is_editable() {
            self.save(session, timeout).await?;
        }
        let token = self.codec.encode(session.record())?;
        debug!(record_id = ?session.record().id, "share token issued");
        Ok(token)
    }

    /// One-way transition to `Final`, followed by the signature request.
    pub async fn finalize(
        &self,
        session: &mut SaleSession,
        request: FinalizeRequest,
        timeout: Duration,
    ) -> Result<FinalizeOutcome, SaleServiceError> {
        self.ensure_writable(session)?;
        let mut snapshot = self
            .lifecycle
            .finalize_snapshot(session.tracked(), Utc::now())?;
        if snapshot.owner_cpf.is_none() {
            snapshot.owner_cpf = Some(session.context().caller.cpf.clone());
        }

        let kind = match &snapshot.id {
            Some(id) => WriteKind::Update(id.clone()),
            None => WriteKind::Create,
        };
        let written = {
            let gate = session.write_gate();
            let mut landed = gate.enter().await;
            let written = self.write(kind, snapshot, timeout).await.map_err(|failure| {
                warn!(error = %failure, "finalize write failed, record left as draft");
                SaleServiceError::TransientWrite(failure)
            })?;
            *landed += 1;
            written
        };
        let record_id = written.id.clone().ok_or(RepositoryError::NotFound)?;
        session.tracked_mut().mark_persisted(written);
        info!(%record_id, "sale record finalized");

        if let Err(error) = self.cache.clear() {
            warn!(%error, "draft cache could not be cleared");
        }

        let signature_request = SignatureRequest {
            record_id: record_id.clone(),
            document_name: request
                .document_name
                .unwrap_or_else(|| format!("Sale {record_id}")),
            signers: request.signers,
        };
        let dispatched = bounded(timeout, self.signatures.record_finalized(signature_request))
            .await
            .and_then(|result| result.map_err(|error| error.to_string()));

        match dispatched {
            Ok(entries) => {
                if !entries.is_empty() {
                    if let Err(error) = self
                        .store_signatures(session, entries.clone(), timeout)
                        .await
                    {
                        warn!(%record_id, %error, "signer tracking not stored");
                        session.tracked_mut().apply_signatures(entries.clone());
                    }
                }
                Ok(FinalizeOutcome {
                    record_id,
                    signers: entries,
                    dispatch_error: None,
                })
            }
            Err(error) => {
                warn!(%record_id, %error, "signature workflow not reached");
                Ok(FinalizeOutcome {
                    record_id,
                    signers: Vec::new(),
                    dispatch_error: Some(error),
                })
            }
        }
    }

    /// Store signer progress reported by the signature workflow. Allowed on final records.
    pub async fn record_signature_status(
        &self,
        session: &mut SaleSession,
        entries: Vec<SignerTracking>,
        timeout: Duration,
    ) -> Result<(), SaleServiceError> {
        self.store_signatures(session, entries, timeout)
            .await
            .map_err(SaleServiceError::from)
    }

    async fn store_signatures(
        &self,
        session: &mut SaleSession,
        entries: Vec<SignerTracking>,
        timeout: Duration,
    ) -> Result<(), WriteFailure> {
        let record_id = session
            .record()
            .id
            .clone()
            .ok_or(WriteFailure::Repository(RepositoryError::NotFound))?;
        let mut snapshot = session.tracked().baseline().clone();
        snapshot.signatures = entries.clone();
        let gate = session.write_gate();
        let mut landed = gate.enter().await;
        self.write(WriteKind::Update(record_id), snapshot, timeout)
            .await?;
        *landed += 1;
        session.tracked_mut().apply_signatures(entries);
        Ok(())
    }

    async fn write(
        &self,
        kind: WriteKind,
        mut snapshot: SaleRecord,
        timeout: Duration,
    ) -> Result<SaleRecord, WriteFailure> {
        match kind {
            WriteKind::Create => {
                let id = bounded(timeout, self.repository.create(snapshot.clone()))
                    .await
                    .map_err(|_| WriteFailure::TimedOut { timeout })??;
                snapshot.id = Some(id);
            }
            WriteKind::Update(id) => {
                bounded(timeout, self.repository.update(&id, snapshot.clone()))
                    .await
                    .map_err(|_| WriteFailure::TimedOut { timeout })??;
            }
        }
        Ok(snapshot)
    }

    fn ensure_writable(&self, session: &SaleSession) -> Result<(), SaleServiceError> {
        if session.is_editable() {
            Ok(())
        } else {
            Err(SaleServiceError::NotEditable {
                status: session.record().status,
            })
        }
    }

    fn cache_draft(&self, session: &SaleSession) {
        if let Err(error) = self.cache.save(session.record()) {
            warn!(%error, "draft cache write failed");
        }
    }
}

async fn bounded<T>(timeout: Duration, future: impl Future<Output = T>) -> Result<T, String> {
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| format!("timed out after {}ms", timeout.as_millis()))
}
