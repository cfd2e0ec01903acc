use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use serde_json::{json, Value};

use crate::config::SaleDeskConfig;
use crate::workflows::sale::access::CallerIdentity;
use crate::workflows::sale::domain::{
    Payload, RecordId, SalePatch, SaleRecord, SignatureStatus, SignerTracking, TaxId,
};
use crate::workflows::sale::repository::{
    CacheError, DraftCache, RepositoryError, SaleRepository, SignatureError, SignatureRequest,
    SignatureWorkflow,
};
use crate::workflows::sale::service::SaleRecordService;
use crate::workflows::sale::session::SessionContext;

pub(super) const OWNER_CPF: &str = "111.222.333-44";
pub(super) const OTHER_CPF: &str = "555.666.777-88";
pub(super) const SPECIAL_TAX_ID: &str = "987.654.321-00";

pub(super) fn sale_config() -> SaleDeskConfig {
    SaleDeskConfig {
        autosave_interval: Duration::from_secs(30),
        write_timeout: Duration::from_secs(5),
        reduced_cap_tax_ids: vec![SPECIAL_TAX_ID.to_string()],
        ..SaleDeskConfig::default()
    }
}

pub(super) fn context(cpf: &str) -> SessionContext {
    SessionContext::new(CallerIdentity::new(TaxId::new(cpf)))
}

pub(super) fn payload(value: Value) -> Payload {
    Payload::from_value(value).expect("object payload")
}

pub(super) fn complete_patch() -> SalePatch {
    SalePatch {
        property: Some(payload(json!({ "address": "Rua das Acácias, 120" }))),
        parties: Some(payload(json!({
            "seller": { "name": "José da Conceição" },
            "buyer": { "name": "Márcia Lima" }
        }))),
        ..SalePatch::default()
    }
}

pub(super) type MemoryService =
    SaleRecordService<MemoryRepository, RecordingSignatures, MemoryCache>;

pub(super) fn build_service() -> (
    MemoryService,
    Arc<MemoryRepository>,
    Arc<RecordingSignatures>,
    Arc<MemoryCache>,
) {
    let repository = Arc::new(MemoryRepository::default());
    let signatures = Arc::new(RecordingSignatures::default());
    let cache = Arc::new(MemoryCache::default());
    let service = SaleRecordService::new(
        repository.clone(),
        signatures.clone(),
        cache.clone(),
        &sale_config(),
    );
    (service, repository, signatures, cache)
}

pub(super) fn service_with_repository<R: SaleRepository + 'static>(
    repository: R,
) -> SaleRecordService<R, RecordingSignatures, MemoryCache> {
    SaleRecordService::new(
        Arc::new(repository),
        Arc::new(RecordingSignatures::default()),
        Arc::new(MemoryCache::default()),
        &sale_config(),
    )
}

#[derive(Default)]
pub(super) struct MemoryRepository {
    records: Mutex<HashMap<RecordId, SaleRecord>>,
    sequence: AtomicU64,
    writes: AtomicUsize,
}

impl MemoryRepository {
    pub(super) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub(super) fn stored(&self, id: &RecordId) -> Option<SaleRecord> {
        self.records
            .lock()
            .expect("repository mutex poisoned")
            .get(id)
            .cloned()
    }

    pub(super) fn seed(&self, record: SaleRecord) -> RecordId {
        let id = record
            .id
            .clone()
            .unwrap_or_else(|| {
                let next = self.sequence.fetch_add(1, Ordering::SeqCst);
                RecordId(format!("seed-{next}"))
            });
        let mut stored = record;
        stored.id = Some(id.clone());
        self.records
            .lock()
            .expect("repository mutex poisoned")
            .insert(id.clone(), stored);
        id
    }
}

#[async_trait]
impl SaleRepository for MemoryRepository {
    async fn create(&self, mut record: SaleRecord) -> Result<RecordId, RepositoryError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let id = RecordId(format!(
            "sale-{:04}",
            self.sequence.fetch_add(1, Ordering::SeqCst) + 1
        ));
        record.id = Some(id.clone());
        self.records
            .lock()
            .expect("repository mutex poisoned")
            .insert(id.clone(), record);
        Ok(id)
    }

    async fn update(&self, id: &RecordId, record: SaleRecord) -> Result<(), RepositoryError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if !guard.contains_key(id) {
            return Err(RepositoryError::NotFound);
        }
        guard.insert(id.clone(), record);
        Ok(())
    }

    async fn fetch(&self, id: &RecordId) -> Result<Option<SaleRecord>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .expect("repository mutex poisoned")
            .get(id)
            .cloned())
    }
}

/// Reads work, writes fail until `recover` is called.
#[derive(Default)]
pub(super) struct FlakyRepository {
    pub(super) inner: MemoryRepository,
    failing: std::sync::atomic::AtomicBool,
    attempts: AtomicUsize,
}

impl FlakyRepository {
    pub(super) fn failing() -> Self {
        let repository = Self::default();
        repository.failing.store(true, Ordering::SeqCst);
        repository
    }

    pub(super) fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    pub(super) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), RepositoryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(RepositoryError::Unavailable("database offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SaleRepository for FlakyRepository {
    async fn create(&self, record: SaleRecord) -> Result<RecordId, RepositoryError> {
        self.check()?;
        self.inner.create(record).await
    }

    async fn update(&self, id: &RecordId, record: SaleRecord) -> Result<(), RepositoryError> {
        self.check()?;
        self.inner.update(id, record).await
    }

    async fn fetch(&self, id: &RecordId) -> Result<Option<SaleRecord>, RepositoryError> {
        self.inner.fetch(id).await
    }
}

pub(super) struct UnavailableRepository;

#[async_trait]
impl SaleRepository for UnavailableRepository {
    async fn create(&self, _record: SaleRecord) -> Result<RecordId, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    async fn update(&self, _id: &RecordId, _record: SaleRecord) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    async fn fetch(&self, _id: &RecordId) -> Result<Option<SaleRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

/// Writes that never answer within any reasonable timeout.
pub(super) struct StalledRepository;

#[async_trait]
impl SaleRepository for StalledRepository {
    async fn create(&self, _record: SaleRecord) -> Result<RecordId, RepositoryError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(RecordId("late".to_string()))
    }

    async fn update(&self, _id: &RecordId, _record: SaleRecord) -> Result<(), RepositoryError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    async fn fetch(&self, _id: &RecordId) -> Result<Option<SaleRecord>, RepositoryError> {
        Ok(None)
    }
}

/// Memory repository whose writes take `delay` to land.
pub(super) struct SlowRepository {
    pub(super) inner: MemoryRepository,
    delay: Duration,
}

impl SlowRepository {
    pub(super) fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryRepository::default(),
            delay,
        }
    }
}

#[async_trait]
impl SaleRepository for SlowRepository {
    async fn create(&self, record: SaleRecord) -> Result<RecordId, RepositoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.create(record).await
    }

    async fn update(&self, id: &RecordId, record: SaleRecord) -> Result<(), RepositoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.update(id, record).await
    }

    async fn fetch(&self, id: &RecordId) -> Result<Option<SaleRecord>, RepositoryError> {
        self.inner.fetch(id).await
    }
}

#[derive(Default)]
pub(super) struct RecordingSignatures {
    requests: Mutex<Vec<SignatureRequest>>,
}

impl RecordingSignatures {
    pub(super) fn requests(&self) -> Vec<SignatureRequest> {
        self.requests
            .lock()
            .expect("signature mutex poisoned")
            .clone()
    }
}

#[async_trait]
impl SignatureWorkflow for RecordingSignatures {
    async fn record_finalized(
        &self,
        request: SignatureRequest,
    ) -> Result<Vec<SignerTracking>, SignatureError> {
        let entries = request
            .signers
            .iter()
            .enumerate()
            .map(|(index, _)| SignerTracking {
                signer_id: format!("signer-{}", index + 1),
                status: SignatureStatus::Pending,
                signed_at: None,
            })
            .collect();
        self.requests
            .lock()
            .expect("signature mutex poisoned")
            .push(request);
        Ok(entries)
    }
}

pub(super) struct OfflineSignatures;

#[async_trait]
impl SignatureWorkflow for OfflineSignatures {
    async fn record_finalized(
        &self,
        _request: SignatureRequest,
    ) -> Result<Vec<SignerTracking>, SignatureError> {
        Err(SignatureError::Transport("provider offline".to_string()))
    }
}

#[derive(Default)]
pub(super) struct MemoryCache {
    slot: Mutex<Option<SaleRecord>>,
    saves: AtomicUsize,
}

impl MemoryCache {
    pub(super) fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub(super) fn snapshot(&self) -> Option<SaleRecord> {
        self.slot.lock().expect("cache mutex poisoned").clone()
    }
}

impl DraftCache for MemoryCache {
    fn save(&self, snapshot: &SaleRecord) -> Result<(), CacheError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.slot.lock().expect("cache mutex poisoned") = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<SaleRecord>, CacheError> {
        Ok(self.slot.lock().expect("cache mutex poisoned").clone())
    }

    fn clear(&self) -> Result<(), CacheError> {
        *self.slot.lock().expect("cache mutex poisoned") = None;
        Ok(())
    }
}

pub(super) struct BrokenCache;

impl DraftCache for BrokenCache {
    fn save(&self, _snapshot: &SaleRecord) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("storage quota exceeded".to_string()))
    }

    fn load(&self) -> Result<Option<SaleRecord>, CacheError> {
        Err(CacheError::Unavailable("storage quota exceeded".to_string()))
    }

    fn clear(&self) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("storage quota exceeded".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
