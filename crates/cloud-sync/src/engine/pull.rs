//! Pull engine: merges remote changes in reverse dependency order.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use solarsync_core::sync::{pull_order, EntityConfig, LocalSyncStore, MergeStats, SyncTransport};
use solarsync_core::Result;

use super::report::{EntityFailure, PullReport};

pub struct PullEngine<'a> {
    store: &'a dyn LocalSyncStore,
    transport: &'a dyn SyncTransport,
}

impl<'a> PullEngine<'a> {
    pub fn new(store: &'a dyn LocalSyncStore, transport: &'a dyn SyncTransport) -> Self {
        Self { store, transport }
    }

    /// Pulls every pulled entity changed after `since`. The first failure
    /// stops the pass; entities merged before it stay merged.
    pub async fn pull_all(&self, since: DateTime<Utc>) -> PullReport {
        let mut report = PullReport::default();
        info!("[Pull] Pulling changes since {}", since.to_rfc3339());
        for config in pull_order().collect::<Vec<_>>() {
            match self.pull_entity(config, since).await {
                Ok(stats) => {
                    if stats.total() > 0 {
                        info!(
                            "[Pull] {}: {} inserted, {} updated",
                            config.local_table, stats.inserted, stats.updated
                        );
                    }
                    report.pulled += stats.total();
                }
                Err(err) => {
                    warn!("[Pull] {} failed, stopping pull: {}", config.local_table, err);
                    report.failure = Some(EntityFailure::new(config.entity, &err));
                    break;
                }
            }
        }
        report
    }

    /// Fetches, reverse-maps and merges one entity. Mapping happens before
    /// any write, and the merge itself is one local transaction.
    pub async fn pull_entity(
        &self,
        config: &'static EntityConfig,
        since: DateTime<Utc>,
    ) -> Result<MergeStats> {
        let remote = self
            .transport
            .pull_changes(config.remote_collection, since)
            .await?;
        if remote.is_empty() {
            debug!("[Pull] {}: no changes", config.local_table);
            return Ok(MergeStats::default());
        }

        let records = remote
            .iter()
            .map(|payload| (config.reverse)(payload, config.entity))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.store.merge_remote(config.entity, records).await
    }
}
