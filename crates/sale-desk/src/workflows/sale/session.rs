use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use super::access::{AccessGrant, CallerIdentity};
use super::commission::BrokerId;
use super::domain::SaleRecord;
use super::lifecycle::{SaleLifecycle, TrackedRecord};

/// Per-caller state carried into every operation instead of living in ambient storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub caller: CallerIdentity,
    pub selected_broker: Option<BrokerId>,
}

impl SessionContext {
    pub fn new(caller: CallerIdentity) -> Self {
        Self {
            caller,
            selected_broker: None,
        }
    }

    pub fn with_selected_broker(mut self, broker: BrokerId) -> Self {
        self.selected_broker = Some(broker);
        self
    }

    pub fn select_broker(&mut self, broker: Option<BrokerId>) {
        self.selected_broker = broker;
    }
}

/// Orders the writes issued for one session. The guarded value counts writes that
/// landed, so a snapshot taken before another write can be recognized as stale.
#[derive(Debug, Clone, Default)]
pub(crate) struct WriteGate(Arc<Mutex<u64>>);

impl WriteGate {
    pub(crate) async fn enter(&self) -> OwnedMutexGuard<u64> {
        self.0.clone().lock_owned().await
    }

    pub(crate) async fn landed(&self) -> u64 {
        *self.0.lock().await
    }
}

/// One record open for viewing or editing.
#[derive(Debug, Clone)]
pub struct SaleSession {
    context: SessionContext,
    grant: AccessGrant,
    tracked: TrackedRecord,
    write_gate: WriteGate,
}

impl SaleSession {
    pub(crate) fn new(context: SessionContext, grant: AccessGrant, tracked: TrackedRecord) -> Self {
        Self {
            context,
            grant,
            tracked,
            write_gate: WriteGate::default(),
        }
    }

    pub fn record(&self) -> &SaleRecord {
        self.tracked.record()
    }

    pub fn is_dirty(&self) -> bool {
        self.tracked.is_dirty()
    }

    /// Editable only when the grant allows writes and the record is still a draft.
    pub fn is_editable(&self) -> bool {
        self.grant.can_write && SaleLifecycle::is_editable(self.tracked.record())
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SessionContext {
        &mut self.context
    }

    pub fn grant(&self) -> AccessGrant {
        self.grant
    }

    pub(crate) fn tracked(&self) -> &TrackedRecord {
        &self.tracked
    }

    pub(crate) fn tracked_mut(&mut self) -> &mut TrackedRecord {
        &mut self.tracked
    }

    pub(crate) fn write_gate(&self) -> WriteGate {
        self.write_gate.clone()
    }
}
