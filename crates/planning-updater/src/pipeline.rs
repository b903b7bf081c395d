//! One reconciliation pass: download, extract, merge, reconcile and sweep
//! every branch in configuration order.

use chrono::{DateTime, SubsecRound, Utc};
use planning_types::{BranchReport, Event};

use crate::config::{BranchParams, Params};
use crate::download::CalendarDownloader;
use crate::error::UpdaterResult;
use crate::extractor::EventExtractor;
use crate::merge::AffiliationMerger;
use crate::reconcile::reconcile;
use crate::store::{archive_collection, live_collection, EventStore};
use crate::sweep::{sweep, RetentionPolicy};

pub struct Updater<S: EventStore> {
    store: S,
    downloader: CalendarDownloader,
    branches: Vec<BranchParams>,
    retention: RetentionPolicy,
}

impl<S: EventStore> Updater<S> {
    pub fn new(store: S, downloader: CalendarDownloader, params: &Params) -> Self {
        Self {
            store,
            downloader,
            branches: params.branches.clone(),
            retention: params.updater.retention(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run every branch. The first failing branch aborts the pass; branches
    /// reconciled before it keep their writes.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> UpdaterResult<Vec<BranchReport>> {
        // stored timestamps only keep milliseconds
        let update_time = now.trunc_subsecs(3);
        let mut reports = Vec::with_capacity(self.branches.len());

        for branch in &self.branches {
            match self.run_branch(branch, update_time).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!("[{}] The update of the branch failed: {}", branch.name, e);
                    return Err(e);
                }
            }
        }

        Ok(reports)
    }

    /// Download and merge the events of every group of `branch`.
    pub async fn collect_branch(
        &self,
        branch: &BranchParams,
        update_time: DateTime<Utc>,
    ) -> UpdaterResult<Vec<Event>> {
        let extractor = EventExtractor::from_params(&branch.parser)?;
        let mut merger = AffiliationMerger::new();
        let prefix = format!("[{}]", branch.name);

        let nb_groups = branch.groups.len();
        for (k, group) in branch.groups.iter().enumerate() {
            let nb_addresses = group.addresses.len();
            for (i, address) in group.addresses.iter().enumerate() {
                let position = format!("{} [{}/{}] [{}/{}]", prefix, k + 1, nb_groups, i + 1, nb_addresses);
                tracing::info!("{} Downloading address in group {}", position, group.name);

                let sources = self.downloader.fetch_calendar(address).await.map_err(|e| {
                    tracing::error!("{} Error requesting URI {}", position, address);
                    e
                })?;
                let events = extractor.extract_all(&sources, update_time)?;
                let added = merger.add(&group.name, events);
                tracing::info!(
                    "{} {} events read, {} not seen in a previous address",
                    position,
                    sources.len(),
                    added
                );
            }
        }

        Ok(merger.into_events())
    }

    async fn run_branch(
        &self,
        branch: &BranchParams,
        update_time: DateTime<Utc>,
    ) -> UpdaterResult<BranchReport> {
        let prefix = format!("[{}]", branch.name);
        let live = live_collection(&branch.name);
        let archive = archive_collection(&branch.name);
        tracing::info!(
            "{} Starting the update for the branch {} (mode {})",
            prefix,
            branch.name,
            branch.parser.mode()
        );

        let events = self.collect_branch(branch, update_time).await?;

        tracing::info!("{} Updating new and modified events in {}", prefix, live);
        let stats = reconcile(&self.store, &live, &events, update_time).await?;
        tracing::info!(
            "{} Update complete: {} new, {} updated, {} unchanged",
            prefix,
            stats.new,
            stats.updated,
            stats.unchanged
        );

        tracing::info!("{} Archiving stale events from {} into {}", prefix, live, archive);
        let archived = sweep(&self.store, &live, &archive, update_time, self.retention).await?;
        tracing::info!("{} {} events archived", prefix, archived);

        let live_count = self.store.count(&live).await?;
        let archive_count = self.store.count(&archive).await?;
        tracing::info!(
            "{} {} events in {}, {} in {}",
            prefix,
            live_count,
            live,
            archive_count,
            archive
        );

        Ok(BranchReport {
            branch: branch.name.clone(),
            stats,
            archived,
            live_count,
            archive_count,
        })
    }
}
