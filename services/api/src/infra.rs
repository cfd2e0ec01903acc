use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use sale_desk::config::SaleDeskConfig;
use sale_desk::workflows::sale::{
    CacheError, DraftCache, RecordId, RepositoryError, SaleRecord, SaleRecordService,
    SaleRepository, SignatureError, SignatureRequest, SignatureStatus, SignatureWorkflow,
    SignerTracking,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type DeskService =
    SaleRecordService<InMemorySaleRepository, LoggingSignatureWorkflow, InMemoryDraftCache>;

/// Sale service wired to process-local collaborators.
pub(crate) struct DeskHandles {
    pub(crate) service: Arc<DeskService>,
    pub(crate) repository: Arc<InMemorySaleRepository>,
    pub(crate) signatures: Arc<LoggingSignatureWorkflow>,
    pub(crate) cache: Arc<InMemoryDraftCache>,
}

pub(crate) fn in_memory_desk(config: &SaleDeskConfig) -> DeskHandles {
    let repository = Arc::new(InMemorySaleRepository::default());
    let signatures = Arc::new(LoggingSignatureWorkflow::default());
    let cache = Arc::new(InMemoryDraftCache::default());
    let service = Arc::new(SaleRecordService::new(
        repository.clone(),
        signatures.clone(),
        cache.clone(),
        config,
    ));
    DeskHandles {
        service,
        repository,
        signatures,
        cache,
    }
}

#[derive(Default)]
pub(crate) struct InMemorySaleRepository {
    records: Mutex<HashMap<RecordId, SaleRecord>>,
    sequence: AtomicU64,
}

impl InMemorySaleRepository {
    pub(crate) fn len(&self) -> usize {
        self.records.lock().expect("repository mutex poisoned").len()
    }
}

#[async_trait]
impl SaleRepository for InMemorySaleRepository {
    async fn create(&self, mut record: SaleRecord) -> Result<RecordId, RepositoryError> {
        let next = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let id = RecordId(format!("sale-{next:04}"));
        record.id = Some(id.clone());
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        guard.insert(id.clone(), record);
        Ok(id)
    }

    async fn update(&self, id: &RecordId, record: SaleRecord) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.contains_key(id) {
            guard.insert(id.clone(), record);
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    async fn fetch(&self, id: &RecordId) -> Result<Option<SaleRecord>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }
}

/// Stand-in for the e-signature provider: every signer starts out pending.
#[derive(Default)]
pub(crate) struct LoggingSignatureWorkflow {
    requests: Mutex<Vec<SignatureRequest>>,
}

impl LoggingSignatureWorkflow {
    pub(crate) fn requests(&self) -> Vec<SignatureRequest> {
        self.requests
            .lock()
            .expect("signature mutex poisoned")
            .clone()
    }
}

#[async_trait]
impl SignatureWorkflow for LoggingSignatureWorkflow {
    async fn record_finalized(
        &self,
        request: SignatureRequest,
    ) -> Result<Vec<SignerTracking>, SignatureError> {
        info!(
            record_id = %request.record_id,
            document = %request.document_name,
            signers = request.signers.len(),
            "signature request dispatched"
        );
        let tracking = request
            .signers
            .iter()
            .enumerate()
            .map(|(index, _)| SignerTracking {
                signer_id: format!("{}-signer-{}", request.record_id, index + 1),
                status: SignatureStatus::Pending,
                signed_at: None,
            })
            .collect();
        self.requests
            .lock()
            .expect("signature mutex poisoned")
            .push(request);
        Ok(tracking)
    }
}

#[derive(Default)]
pub(crate) struct InMemoryDraftCache {
    slot: Mutex<Option<SaleRecord>>,
}

impl DraftCache for InMemoryDraftCache {
    fn save(&self, snapshot: &SaleRecord) -> Result<(), CacheError> {
        *self.slot.lock().expect("draft cache mutex poisoned") = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<SaleRecord>, CacheError> {
        Ok(self.slot.lock().expect("draft cache mutex poisoned").clone())
    }

    fn clear(&self) -> Result<(), CacheError> {
        *self.slot.lock().expect("draft cache mutex poisoned") = None;
        Ok(())
    }
}
