//! Sale record drafting: commission split, Draft → Final lifecycle, link sharing and
//! conditional persistence.

pub mod access;
pub mod autosave;
pub mod commission;
pub mod domain;
pub mod lifecycle;
pub mod repository;
pub mod router;
pub mod service;
pub mod session;
pub mod share;
pub mod statement;

#[cfg(test)]
mod tests;

pub use access::{AccessError, AccessGrant, AccessMode, CallerIdentity, RecordAccessPolicy};
pub use autosave::{
    spawn_autosave, spawn_session_autosave, AutosaveHandle, AutosaveStop, AutosaveSummary,
};
pub use commission::{
    migrate_legacy_line, BrokerId, BrokerLine, CommissionDistribution, CommissionValidator,
    CommittedField, FinderAllocation, FinderId, LegacyBrokerLine, ManagementCapTable,
    ManagementLine, ManagementTier, ManagerId, Percentage, BROKER_LINE_CAP,
};
pub use domain::{
    Payload, RecordId, RecordStatus, SalePatch, SaleRecord, SignatureStatus, SignerTracking,
    TaxId, ValidationError,
};
pub use lifecycle::{PersistencePolicy, SaleLifecycle, SkipReason, TrackedRecord};
pub use repository::{
    CacheError, DraftCache, RepositoryError, SaleRepository, SignatureError, SignatureRequest,
    SignatureWorkflow, SignerCandidate,
};
pub use router::{sale_router, status_for, CALLER_HEADER, SELECTED_BROKER_HEADER};
pub use service::{
    FinalizeOutcome, FinalizeRequest, Navigation, PersistOutcome, SaleRecordService,
    SaleServiceError, SaveTrigger, WriteFailure,
};
pub use session::{SaleSession, SessionContext};
pub use share::{DecodeStrategy, ShareLinkParams, ShareTokenCodec, ShareTokenError};
pub use statement::{statement_csv, write_statement, StatementError};
