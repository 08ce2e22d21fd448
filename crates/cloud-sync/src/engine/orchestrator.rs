//! Sync orchestrator: the single entry point for a sync run.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tokio::sync::Mutex;

use solarsync_core::sync::{
    config_for, pull_lower_bound, push_order, sync_kind_for, ActingUser, BlobUploader,
    CheckpointStatus, LocalSyncStore, SyncCheckpoint, SyncEntity, SyncTransport,
};
use solarsync_core::Result;

use super::gate::{ClockGate, GateOutcome};
use super::pull::PullEngine;
use super::push::{PushEngine, PushSelection};
use super::report::{EntityFailure, PushReport, SyncOutcome, SyncStatus};

/// Shown to the caller whenever the account is tamper-locked.
pub const TAMPER_LOCK_MESSAGE: &str = "This account is suspended because the device clock does \
not match server time. Changes are no longer uploaded; correct the system clock and contact \
support to restore access.";

/// Counters accumulated while a run progresses, so a failure still reports
/// what was done before it.
#[derive(Debug, Default)]
struct RunProgress {
    pushed: usize,
    pulled: usize,
    failures: Vec<EntityFailure>,
}

impl RunProgress {
    fn absorb_push(&mut self, report: PushReport) {
        self.pushed += report.pushed;
        self.failures.extend(report.failures);
    }
}

pub struct SyncEngine {
    store: Arc<dyn LocalSyncStore>,
    transport: Arc<dyn SyncTransport>,
    blobs: Arc<dyn BlobUploader>,
    bucket: String,
    run_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn LocalSyncStore>,
        transport: Arc<dyn SyncTransport>,
        blobs: Arc<dyn BlobUploader>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transport,
            blobs,
            bucket: bucket.into(),
            run_lock: Mutex::new(()),
        }
    }

    fn pusher(&self) -> PushEngine<'_> {
        PushEngine::new(
            self.store.as_ref(),
            self.transport.as_ref(),
            self.blobs.as_ref(),
            &self.bucket,
        )
    }

    fn puller(&self) -> PullEngine<'_> {
        PullEngine::new(self.store.as_ref(), self.transport.as_ref())
    }

    /// Runs one full cycle: lock check, clock gate, push, pull, checkpoint.
    /// Concurrent callers wait for the running cycle to finish.
    pub async fn run_cycle(&self) -> SyncOutcome {
        let _cycle_guard = self.run_lock.lock().await;
        let started = Instant::now();
        let cycle_start = Utc::now();
        let mut progress = RunProgress::default();
        info!("[Sync] Cycle started");

        let result = self.cycle(cycle_start, &mut progress).await;
        let (status, detail) = match result {
            Ok(value) => value,
            Err(err) => {
                error!("[Sync] Cycle failed: {}", err);
                self.record_checkpoint(CheckpointStatus::Failed, None, cycle_start)
                    .await;
                (SyncStatus::Failed, format!("Sync failed: {}", err))
            }
        };
        let outcome = finish(status, detail, started, progress);
        info!(
            "[Sync] Cycle finished status={} pushed={} pulled={} duration_ms={}",
            outcome.status.as_str(),
            outcome.pushed,
            outcome.pulled,
            outcome.duration_ms
        );
        outcome
    }

    async fn cycle(
        &self,
        cycle_start: DateTime<Utc>,
        progress: &mut RunProgress,
    ) -> Result<(SyncStatus, String)> {
        let user = self.store.load_acting_user()?;
        self.transport
            .set_access_token(user.as_ref().and_then(|u| u.access_token.clone()));

        let server_time = match &user {
            Some(user) => {
                if self.store.is_tamper_locked(&user.user_uuid)? {
                    return self.locked_cycle(user, progress).await;
                }
                let pusher = self.pusher();
                let gate = ClockGate::new(self.store.as_ref(), self.transport.as_ref(), &pusher);
                match gate.run(user).await? {
                    GateOutcome::Clear { server_time, .. } => server_time,
                    GateOutcome::Locked { verdict_push } => {
                        progress.absorb_push(verdict_push);
                        // Stays local until the account is unlocked.
                        self.record_checkpoint(
                            CheckpointStatus::Failed,
                            Some(user.user_uuid.clone()),
                            cycle_start,
                        )
                        .await;
                        return Ok((SyncStatus::TamperLock, TAMPER_LOCK_MESSAGE.to_string()));
                    }
                }
            }
            None => {
                warn!("[Sync] No local session; syncing without an acting user");
                self.authoritative_time().await
            }
        };
        let actor = user.as_ref().map(|u| u.user_uuid.clone());

        let pushed = self
            .pusher()
            .push(
                push_order()
                    .filter(|config| config.entity != SyncEntity::SyncLog)
                    .collect::<Vec<_>>(),
                PushSelection::Dirty,
            )
            .await;
        let push_failures = pushed.failures.len();
        progress.absorb_push(pushed);

        let last_success = self.store.last_successful_checkpoint()?;
        let since = pull_lower_bound(last_success.as_ref());
        // Stamped before any pull so remote writes made during this run are
        // picked up again next time.
        let stamp = checkpoint_stamp(server_time, since);
        let pulled = self.puller().pull_all(since).await;
        progress.pulled += pulled.pulled;

        if let Some(failure) = pulled.failure {
            let detail = format!("Pull failed for {}: {}", failure.entity, failure.message);
            progress.failures.push(failure);
            self.record_checkpoint(CheckpointStatus::Failed, actor, stamp)
                .await;
            return Ok((SyncStatus::Failed, detail));
        }

        let checkpoint = SyncCheckpoint::for_run(
            sync_kind_for(last_success.as_ref()),
            CheckpointStatus::Success,
            actor,
            stamp,
        );
        self.store.append_checkpoint(checkpoint).await?;
        let log_push = self
            .pusher()
            .push([config_for(SyncEntity::SyncLog)], PushSelection::Dirty)
            .await;
        progress.absorb_push(log_push);

        let detail = if push_failures == 0 {
            "Sync completed".to_string()
        } else {
            format!(
                "Sync completed; {} entities failed to push and will be retried",
                push_failures
            )
        };
        Ok((SyncStatus::Ok, detail))
    }

    /// Pull-only run for a locked account. A pull that clears the lock
    /// reports ok; pushing resumes on the next run.
    async fn locked_cycle(
        &self,
        user: &ActingUser,
        progress: &mut RunProgress,
    ) -> Result<(SyncStatus, String)> {
        warn!("[Sync] Account {} is tamper-locked; pull only", user.user_uuid);
        let server_time = self.authoritative_time().await;
        let last_success = self.store.last_successful_checkpoint()?;
        let since = pull_lower_bound(last_success.as_ref());
        let stamp = checkpoint_stamp(server_time, since);
        let pulled = self.puller().pull_all(since).await;
        progress.pulled += pulled.pulled;

        let status = if pulled.succeeded() {
            CheckpointStatus::Success
        } else {
            CheckpointStatus::Failed
        };
        if let Some(failure) = pulled.failure {
            progress.failures.push(failure);
        }
        let checkpoint = SyncCheckpoint::for_run(
            sync_kind_for(last_success.as_ref()),
            status,
            Some(user.user_uuid.clone()),
            stamp,
        );
        self.store.append_checkpoint(checkpoint).await?;

        if self.store.is_tamper_locked(&user.user_uuid)? {
            return Ok((SyncStatus::TamperLock, TAMPER_LOCK_MESSAGE.to_string()));
        }
        info!("[Sync] Tamper lock cleared by the remote store");
        if status == CheckpointStatus::Success {
            Ok((
                SyncStatus::Ok,
                "Account unlocked; uploads resume on the next sync".to_string(),
            ))
        } else {
            Ok((SyncStatus::Failed, "Pull failed while the account was locked".to_string()))
        }
    }

    async fn authoritative_time(&self) -> Option<DateTime<Utc>> {
        match self.transport.server_time().await {
            Ok(time) => Some(time),
            Err(err) => {
                warn!("[Sync] Time authority unavailable: {}", err);
                None
            }
        }
    }

    /// Best-effort: the run already failed, so a checkpoint write error is only logged.
    async fn record_checkpoint(
        &self,
        status: CheckpointStatus,
        actor: Option<String>,
        at: DateTime<Utc>,
    ) {
        let last_success = self.store.last_successful_checkpoint().ok().flatten();
        let checkpoint =
            SyncCheckpoint::for_run(sync_kind_for(last_success.as_ref()), status, actor, at);
        if let Err(err) = self.store.append_checkpoint(checkpoint).await {
            error!("[Sync] Failed to record checkpoint: {}", err);
        }
    }

    /// Pushes every record of every entity, dirty or not. Honors the tamper
    /// lock and writes no checkpoint.
    pub async fn push_everything(&self) -> SyncOutcome {
        let _cycle_guard = self.run_lock.lock().await;
        let started = Instant::now();
        let mut progress = RunProgress::default();
        info!("[Sync] Forced full push started");

        let (status, detail) = match self.forced_push(&mut progress).await {
            Ok(value) => value,
            Err(err) => {
                error!("[Sync] Forced push failed: {}", err);
                (SyncStatus::Failed, format!("Push failed: {}", err))
            }
        };
        finish(status, detail, started, progress)
    }

    async fn forced_push(&self, progress: &mut RunProgress) -> Result<(SyncStatus, String)> {
        let user = self.store.load_acting_user()?;
        self.transport
            .set_access_token(user.as_ref().and_then(|u| u.access_token.clone()));
        if let Some(user) = &user {
            if self.store.is_tamper_locked(&user.user_uuid)? {
                return Ok((SyncStatus::TamperLock, TAMPER_LOCK_MESSAGE.to_string()));
            }
        }

        let report = self.pusher().push(push_order(), PushSelection::All).await;
        let failed = report.failures.len();
        progress.absorb_push(report);
        let detail = if failed == 0 {
            "Push completed".to_string()
        } else {
            format!("Push completed; {} entities failed", failed)
        };
        Ok((SyncStatus::Ok, detail))
    }

    /// All checkpoints, newest first.
    pub fn list_checkpoints(&self) -> Result<Vec<SyncCheckpoint>> {
        self.store.list_checkpoints()
    }
}

/// Timestamp for a run's checkpoint, which becomes the next pull's lower
/// bound. Only the time authority may move the bound forward; without it the
/// current bound is kept, since the local clock may be wrong.
fn checkpoint_stamp(server_time: Option<DateTime<Utc>>, since: DateTime<Utc>) -> DateTime<Utc> {
    match server_time {
        Some(time) => time.max(since),
        None => {
            warn!("[Sync] No authoritative time; keeping pull bound at {}", since.to_rfc3339());
            since
        }
    }
}

fn finish(
    status: SyncStatus,
    detail: String,
    started: Instant,
    progress: RunProgress,
) -> SyncOutcome {
    SyncOutcome {
        status,
        detail,
        duration_ms: started.elapsed().as_millis() as i64,
        pushed: progress.pushed,
        pulled: progress.pulled,
        failures: progress.failures,
    }
}
