use futures::future;
use futures::stream::{self, StreamExt};
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::aggregator::CandidateAggregator;
use crate::config::MatchingConfig;
use crate::error::MatchingResult;
use crate::lock::ProjectLocks;
use crate::metrics::MatchingMetrics;
use crate::models::{BatchReport, MatchCandidate, MatchRecord, MatchTier, ProjectRunReport};
use crate::repository::MatchingStores;
use crate::taxonomy::TaxonomyBooster;
use crate::tier::classify;
use crate::writer::RunScopedWriter;

/// Entry point of the matching engine
///
/// Runs the candidate → taxonomy → tier → write pipeline for one project or
/// for every project, holding a per-project lock for each recompute.
#[derive(Clone)]
pub struct MatchingService {
    stores: MatchingStores,
    config: MatchingConfig,
    locks: ProjectLocks,
    shutdown: Option<watch::Receiver<bool>>,
}

impl MatchingService {
    pub fn new(stores: MatchingStores, config: MatchingConfig) -> MatchingResult<Self> {
        config.validate()?;

        Ok(Self {
            stores,
            config,
            locks: ProjectLocks::new(),
            shutdown: None,
        })
    }

    /// Share project locks with other service instances in the same process
    pub fn with_locks(mut self, locks: ProjectLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Stop starting new projects in a batch once `true` is sent
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Recompute and persist the matches of one project.
    ///
    /// Never fails: project-level errors are returned in the report and
    /// leave the previously persisted matches untouched.
    pub async fn compute_and_upsert_matches_for_project(&self, project_id: Uuid) -> ProjectRunReport {
        let started = Instant::now();

        match self.run_project(project_id).await {
            Ok(report) => {
                let status = if report.errors.is_empty() && report.gc_error.is_none() {
                    "ok"
                } else {
                    "partial"
                };
                MatchingMetrics::record_run(status, started.elapsed());
                info!(
                    project_id = %project_id,
                    run_id = ?report.run_id,
                    upserted = report.upserted,
                    errors = report.errors.len(),
                    stale_deleted = ?report.stale_deleted,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Recomputed project matches"
                );
                report
            }
            Err(e) => {
                MatchingMetrics::record_run("failed", started.elapsed());
                error!(project_id = %project_id, error = %e, "Project recompute failed");
                ProjectRunReport::failed(project_id, e.to_string())
            }
        }
    }

    #[instrument(skip_all, fields(project_id = %project_id))]
    async fn run_project(&self, project_id: Uuid) -> MatchingResult<ProjectRunReport> {
        let _guard = self.locks.acquire(project_id).await;

        let candidates = CandidateAggregator::new(&self.stores, &self.config)
            .collect(project_id)
            .await?;
        let candidates = TaxonomyBooster::new(&self.stores, &self.config)
            .boost(project_id, candidates)
            .await?;

        let generated = candidates.len();
        let classified = self.classify_candidates(candidates);
        debug!(
            project_id = %project_id,
            generated,
            kept = classified.len(),
            verified = classified.iter().filter(|(_, t)| *t == MatchTier::Verified).count(),
            "Classified candidates"
        );

        let report = RunScopedWriter::new(self.stores.matches.as_ref())
            .write(project_id, classified)
            .await;

        Ok(ProjectRunReport::from_write(project_id, report))
    }

    fn classify_candidates(
        &self,
        candidates: Vec<MatchCandidate>,
    ) -> Vec<(MatchCandidate, MatchTier)> {
        candidates
            .into_iter()
            .filter_map(|candidate| {
                let tier = classify(
                    candidate.aggregate_score,
                    candidate.frequency(),
                    &self.config.tiers,
                )?;
                Some((candidate, tier))
            })
            .collect()
    }

    /// Recompute every project. One project's failure never stops the others.
    pub async fn compute_and_upsert_all_matches(&self) -> BatchReport {
        let started = Instant::now();

        let project_ids = match self.stores.projects.list_project_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Failed to list projects for batch recompute");
                return BatchReport {
                    errors: vec![format!("failed to list projects: {}", e)],
                    ..Default::default()
                };
            }
        };
        let total = project_ids.len();
        info!(projects = total, "Starting batch match recompute");

        let reports: Vec<ProjectRunReport> = stream::iter(project_ids)
            .take_while(|_| future::ready(!self.shutting_down()))
            .map(|project_id| self.compute_and_upsert_matches_for_project(project_id))
            .buffer_unordered(self.config.project_concurrency)
            .collect()
            .await;

        let mut batch = BatchReport::default();
        let attempted = reports.len();
        for report in reports {
            if report.completed() {
                batch.projects_processed += 1;
                batch.total_upserted += report.upserted;
            }
            let project_id = report.project_id;
            batch
                .errors
                .extend(report.errors.into_iter().map(|e| format!("project {}: {}", project_id, e)));
            if let Some(gc) = report.gc_error {
                batch
                    .errors
                    .push(format!("project {}: stale cleanup: {}", project_id, gc));
            }
        }

        if attempted < total {
            warn!(attempted, total, "Batch recompute interrupted by shutdown");
            batch.errors.push(format!(
                "batch interrupted by shutdown: {} of {} projects not started",
                total - attempted,
                total
            ));
        }

        info!(
            projects_processed = batch.projects_processed,
            total_upserted = batch.total_upserted,
            errors = batch.errors.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Finished batch match recompute"
        );

        batch
    }

    /// Persisted matches of a project, best score first
    pub async fn list_matches_for_project(&self, project_id: Uuid) -> MatchingResult<Vec<MatchRecord>> {
        self.stores.matches.list_for_project(project_id).await
    }
}
