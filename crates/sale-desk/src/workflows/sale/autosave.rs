//! Periodic persistence driver for an open session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::repository::{DraftCache, SaleRepository, SignatureWorkflow};
use super::service::{PersistOutcome, SaleRecordService};
use super::session::SaleSession;

/// Counters reported when the driver stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutosaveSummary {
    pub ticks: u64,
    pub writes: u64,
    pub deferred: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosaveStop {
    /// The record became final; nothing is left to save.
    Finalized,
    /// The owning session ended.
    SessionEnded,
}

pub struct AutosaveHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<(AutosaveSummary, AutosaveStop)>,
}

impl AutosaveHandle {
    /// Stop future ticks. A write already in flight completes.
    pub async fn shutdown(self) -> (AutosaveSummary, AutosaveStop) {
        let _ = self.stop.send(true);
        match self.task.await {
            Ok(result) => result,
            Err(_) => (AutosaveSummary::default(), AutosaveStop::SessionEnded),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Autosave on the interval and write timeout the service was configured with.
pub fn spawn_session_autosave<R, S, C>(
    service: Arc<SaleRecordService<R, S, C>>,
    session: Arc<Mutex<SaleSession>>,
) -> AutosaveHandle
where
    R: SaleRepository + 'static,
    S: SignatureWorkflow + 'static,
    C: DraftCache + 'static,
{
    let interval = service.autosave_interval();
    let timeout = service.write_timeout();
    spawn_autosave(service, session, interval, timeout)
}

/// Tick every `interval` and save the session when it has an id and is still a draft.
/// The first save of a new record is left to explicit actions.
pub fn spawn_autosave<R, S, C>(
    service: Arc<SaleRecordService<R, S, C>>,
    session: Arc<Mutex<SaleSession>>,
    interval: Duration,
    timeout: Duration,
) -> AutosaveHandle
where
    R: SaleRepository + 'static,
    S: SignatureWorkflow + 'static,
    C: DraftCache + 'static,
{
    let (stop, mut stopped) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut summary = AutosaveSummary::default();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let reason = loop {
            tokio::select! {
                biased;
                changed = stopped.changed() => {
                    if changed.is_err() || *stopped.borrow() {
                        break AutosaveStop::SessionEnded;
                    }
                }
                _ = ticker.tick() => {
                    summary.ticks += 1;
                    {
                        let guard = session.lock().await;
                        if guard.record().is_final() {
                            break AutosaveStop::Finalized;
                        }
                        if guard.record().id.is_none() {
                            debug!("autosave waiting for first explicit save");
                            continue;
                        }
                    }
                    match service.persist_periodic(&session, timeout).await {
                        PersistOutcome::Written(_) => summary.writes += 1,
                        PersistOutcome::Deferred(_) => summary.deferred += 1,
                        PersistOutcome::Skipped(_) => {}
                    }
                }
            }
        };
        info!(
            ticks = summary.ticks,
            writes = summary.writes,
            reason = ?reason,
            "autosave stopped"
        );
        (summary, reason)
    });

    AutosaveHandle { stop, task }
}
