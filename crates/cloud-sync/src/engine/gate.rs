//! Clock-integrity gate runner.

use chrono::{DateTime, Utc};
use log::{info, warn};

use solarsync_core::sync::{
    config_for, evaluate_clock, ActingUser, ClockVerdict, GateState, LocalSyncStore, SyncEntity,
    SyncTransport,
};
use solarsync_core::Result;

use super::push::{PushEngine, PushSelection};
use super::report::PushReport;

/// Entities carrying the tamper verdict, pushed as soon as it is recorded.
pub const VERDICT_ENTITIES: [SyncEntity; 2] = [SyncEntity::Subscription, SyncEntity::Authentication];

#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Sync may proceed. `server_time` is the authority's answer, if any.
    Clear {
        server_time: Option<DateTime<Utc>>,
        verdict: ClockVerdict,
    },
    /// The account was just locked; the verdict push result is attached.
    Locked { verdict_push: PushReport },
}

pub struct ClockGate<'a> {
    store: &'a dyn LocalSyncStore,
    transport: &'a dyn SyncTransport,
    pusher: &'a PushEngine<'a>,
}

impl<'a> ClockGate<'a> {
    pub fn new(
        store: &'a dyn LocalSyncStore,
        transport: &'a dyn SyncTransport,
        pusher: &'a PushEngine<'a>,
    ) -> Self {
        Self {
            store,
            transport,
            pusher,
        }
    }

    /// Compares the local clock with the authority for `user`. A suspect
    /// result is persisted and pushed before this returns.
    pub async fn run(&self, user: &ActingUser) -> Result<GateOutcome> {
        let server_time = match self.transport.server_time().await {
            Ok(time) => Some(time),
            Err(err) => {
                warn!("[ClockGate] Time authority unavailable, failing open: {}", err);
                None
            }
        };

        let paid = self
            .store
            .entitlements_for(&user.user_uuid)?
            .into_iter()
            .filter(|entitlement| entitlement.is_active_paid())
            .map(|entitlement| entitlement.uuid)
            .collect::<Vec<_>>();

        let verdict = evaluate_clock(Utc::now(), server_time, !paid.is_empty());
        if verdict.state != GateState::Suspect {
            return Ok(GateOutcome::Clear {
                server_time,
                verdict,
            });
        }

        warn!(
            "[ClockGate] Clock skew of {} minutes on a paid account; locking user {}",
            verdict.skew.map(|skew| skew.num_minutes()).unwrap_or_default(),
            user.user_uuid
        );
        self.store
            .apply_tamper_verdict(paid, user.auth_uuid.clone())
            .await?;

        let verdict_push = self
            .pusher
            .push(
                VERDICT_ENTITIES
                    .iter()
                    .map(|entity| config_for(*entity))
                    .collect::<Vec<_>>(),
                PushSelection::Dirty,
            )
            .await;
        if verdict_push.failures.is_empty() && verdict_push.unconfirmed.is_empty() {
            info!("[ClockGate] Tamper verdict pushed");
        } else {
            warn!("[ClockGate] Tamper verdict not fully pushed; it stays queued");
        }
        Ok(GateOutcome::Locked { verdict_push })
    }
}
