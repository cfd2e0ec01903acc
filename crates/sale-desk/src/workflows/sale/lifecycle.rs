//! Draft → Final state machine and the dirty-tracking gate in front of persistence.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::SaleDeskConfig;

use super::commission::{CommissionDistribution, CommissionValidator, ManagementCapTable};
use super::domain::{
    RecordId, RecordStatus, SalePatch, SaleRecord, SignerTracking, ValidationError,
};

/// Cheap local predicate: the fields the persistence service insists on before it
/// accepts a write. Each entry is a JSON pointer into the serialized record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistencePolicy {
    required_fields: Vec<String>,
}

impl PersistencePolicy {
    pub fn new(required_fields: Vec<String>) -> Self {
        Self { required_fields }
    }

    pub fn required_fields(&self) -> &[String] {
        &self.required_fields
    }

    pub fn missing_fields(&self, record: &SaleRecord) -> Vec<String> {
        let Ok(document) = serde_json::to_value(record) else {
            return self.required_fields.clone();
        };
        self.required_fields
            .iter()
            .filter(|pointer| !document.pointer(pointer).is_some_and(is_filled))
            .cloned()
            .collect()
    }

    pub fn has_minimal_required_fields(&self, record: &SaleRecord) -> bool {
        self.missing_fields(record).is_empty()
    }
}

impl From<&SaleDeskConfig> for PersistencePolicy {
    fn from(config: &SaleDeskConfig) -> Self {
        Self::new(config.required_fields.clone())
    }
}

fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// A record together with the snapshot last accepted by the persistence service.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackedRecord {
    current: SaleRecord,
    baseline: SaleRecord,
}

impl TrackedRecord {
    /// Record loaded from persistence: nothing to save yet.
    pub fn from_persisted(record: SaleRecord) -> Self {
        Self {
            baseline: record.clone(),
            current: record,
        }
    }

    /// Record that has never been accepted by persistence in this form, such as a
    /// share-token prefill or a locally cached draft.
    pub fn from_snapshot(record: SaleRecord) -> Self {
        Self {
            current: record,
            baseline: SaleRecord::default(),
        }
    }

    pub fn record(&self) -> &SaleRecord {
        &self.current
    }

    pub fn is_dirty(&self) -> bool {
        self.current != self.baseline
    }

    /// Last snapshot the persistence service accepted.
    pub(crate) fn baseline(&self) -> &SaleRecord {
        &self.baseline
    }

    pub(crate) fn record_mut(&mut self) -> &mut SaleRecord {
        &mut self.current
    }

    /// Adopt `written` as the new baseline. Fields the write itself assigned are copied
    /// back onto the working record.
    pub(crate) fn mark_persisted(&mut self, written: SaleRecord) {
        self.current.id = written.id.clone();
        self.current.owner_cpf = written.owner_cpf.clone();
        self.current.status = written.status;
        self.current.metadata = written.metadata.clone();
        self.baseline = written;
    }

    /// Signature progress is display metadata and may change in any status.
    pub(crate) fn apply_signatures(&mut self, entries: Vec<SignerTracking>) {
        self.baseline.signatures = entries.clone();
        self.current.signatures = entries;
    }
}

/// Why `persist_if_needed` did not write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Clean,
    Finalized,
    MissingFields(Vec<String>),
    /// Another write landed while a periodic snapshot waited; the newer one wins.
    Superseded,
}

/// Which write the persistence gate asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Update(RecordId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistDecision {
    Skip(SkipReason),
    Write(WriteKind),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("record is {} and can no longer be edited", .status.label())]
    NotEditable { status: RecordStatus },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// The record state machine. Holds no IO; the service performs the writes it asks for.
#[derive(Debug, Clone, Default)]
pub struct SaleLifecycle {
    policy: PersistencePolicy,
    validator: CommissionValidator,
}

impl Default for PersistencePolicy {
    fn default() -> Self {
        Self::from(&SaleDeskConfig::default())
    }
}

impl SaleLifecycle {
    pub fn new(policy: PersistencePolicy, validator: CommissionValidator) -> Self {
        Self { policy, validator }
    }

    pub fn from_config(config: &SaleDeskConfig) -> Self {
        Self::new(
            PersistencePolicy::from(config),
            CommissionValidator::new(ManagementCapTable::from(config)),
        )
    }

    pub fn policy(&self) -> &PersistencePolicy {
        &self.policy
    }

    pub fn validator(&self) -> &CommissionValidator {
        &self.validator
    }

    /// Fresh draft: no id, empty sections.
    pub fn create() -> TrackedRecord {
        TrackedRecord::default()
    }

    pub fn is_editable(record: &SaleRecord) -> bool {
        record.status == RecordStatus::Draft
    }

    pub fn edit(
        &self,
        tracked: &mut TrackedRecord,
        patch: SalePatch,
    ) -> Result<(), LifecycleError> {
        self.ensure_editable(tracked)?;
        patch.apply_to(tracked.record_mut());
        Ok(())
    }

    /// Keystroke-level commission edits. The closure sees the raw distribution.
    pub fn edit_commission<T>(
        &self,
        tracked: &mut TrackedRecord,
        change: impl FnOnce(&mut CommissionDistribution, &CommissionValidator) -> T,
    ) -> Result<T, LifecycleError> {
        self.ensure_editable(tracked)?;
        Ok(change(&mut tracked.record_mut().commission, &self.validator))
    }

    pub fn persist_decision(&self, tracked: &TrackedRecord) -> PersistDecision {
        let record = tracked.record();
        if record.status != RecordStatus::Draft {
            return PersistDecision::Skip(SkipReason::Finalized);
        }
        if !tracked.is_dirty() {
            return PersistDecision::Skip(SkipReason::Clean);
        }
        let missing = self.policy.missing_fields(record);
        if !missing.is_empty() {
            return PersistDecision::Skip(SkipReason::MissingFields(missing));
        }
        match &record.id {
            Some(id) => PersistDecision::Write(WriteKind::Update(id.clone())),
            None => PersistDecision::Write(WriteKind::Create),
        }
    }

    /// Required fields plus commission caps. Field-level rules for personal data live
    /// with the form, not here.
    pub fn validate(&self, record: &SaleRecord) -> Result<(), ValidationError> {
        if let Some(field) = self.policy.missing_fields(record).into_iter().next() {
            return Err(ValidationError::MissingField { field });
        }
        self.validator.validate(&record.commission)
    }

    /// Snapshot to write when finalizing. The working record is untouched until the
    /// write succeeds.
    pub fn finalize_snapshot(
        &self,
        tracked: &TrackedRecord,
        now: DateTime<Utc>,
    ) -> Result<SaleRecord, LifecycleError> {
        self.ensure_editable(tracked)?;
        self.validate(tracked.record())?;

        let mut snapshot = tracked.record().clone();
        snapshot.status = RecordStatus::Final;
        snapshot.metadata.finalized_at = Some(now);
        snapshot.metadata.last_saved_at = Some(now);
        Ok(snapshot)
    }

    fn ensure_editable(&self, tracked: &TrackedRecord) -> Result<(), LifecycleError> {
        let status = tracked.record().status;
        if status == RecordStatus::Draft {
            Ok(())
        } else {
            Err(LifecycleError::NotEditable { status })
        }
    }
}
