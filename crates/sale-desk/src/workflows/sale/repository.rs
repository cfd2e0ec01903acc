use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::domain::{RecordId, SaleRecord, SignerTracking, TaxId};

/// Persistence service holding sale records.
#[async_trait]
pub trait SaleRepository: Send + Sync {
    /// First save of a record; the service assigns its id.
    async fn create(&self, record: SaleRecord) -> Result<RecordId, RepositoryError>;
    async fn update(&self, id: &RecordId, record: SaleRecord) -> Result<(), RepositoryError>;
    async fn fetch(&self, id: &RecordId) -> Result<Option<SaleRecord>, RepositoryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("record rejected by persistence service: {0}")]
    Rejected(String),
    #[error("persistence service unavailable: {0}")]
    Unavailable(String),
}

/// Person offered to the signer-selection flow once a record is finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerCandidate {
    pub name: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<TaxId>,
}

/// Event emitted after a successful finalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequest {
    pub record_id: RecordId,
    pub document_name: String,
    pub signers: Vec<SignerCandidate>,
}

/// External e-signature orchestration.
#[async_trait]
pub trait SignatureWorkflow: Send + Sync {
    async fn record_finalized(
        &self,
        request: SignatureRequest,
    ) -> Result<Vec<SignerTracking>, SignatureError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature provider unavailable: {0}")]
    Transport(String),
}

/// Local copy of the form currently being edited. There is a single slot, not one per
/// record.
pub trait DraftCache: Send + Sync {
    fn save(&self, snapshot: &SaleRecord) -> Result<(), CacheError>;
    fn load(&self) -> Result<Option<SaleRecord>, CacheError>;
    fn clear(&self) -> Result<(), CacheError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("draft cache unavailable: {0}")]
    Unavailable(String),
}
