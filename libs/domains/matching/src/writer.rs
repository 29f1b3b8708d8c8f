//! Run-scoped persistence: every record written by one run carries the same
//! run id, and rows of the project from other runs are removed afterwards.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics::MatchingMetrics;
use crate::models::{
    MatchCandidate, MatchReason, MatchRecord, MatchTier, ReasonKind, WriteReport,
};
use crate::repository::MatchStore;

pub struct RunScopedWriter<'a> {
    matches: &'a dyn MatchStore,
}

impl<'a> RunScopedWriter<'a> {
    pub fn new(matches: &'a dyn MatchStore) -> Self {
        Self { matches }
    }

    /// Upsert the classified candidates under a fresh run id, then delete
    /// the project's rows from earlier runs.
    ///
    /// Upsert failures are collected and do not stop the run. Products whose
    /// upsert failed are excluded from stale cleanup so their rows keep the
    /// previous state; every other stale row is still removed.
    pub async fn write(
        &self,
        project_id: Uuid,
        classified: Vec<(MatchCandidate, MatchTier)>,
    ) -> WriteReport {
        let run_id = Uuid::now_v7();
        let now = Utc::now();
        let mut upserted = 0;
        let mut errors = Vec::new();
        let mut failed_products = Vec::new();

        for (candidate, tier) in &classified {
            let record = build_record(run_id, candidate, *tier, now);
            match self.matches.upsert(record).await {
                Ok(()) => upserted += 1,
                Err(e) => {
                    warn!(
                        project_id = %project_id,
                        product_id = %candidate.product_id,
                        error = %e,
                        "Failed to upsert match"
                    );
                    errors.push(format!("product {}: {}", candidate.product_id, e));
                    failed_products.push(candidate.product_id);
                }
            }
        }

        MatchingMetrics::record_write(upserted, errors.len());
        debug!(project_id = %project_id, run_id = %run_id, upserted, "Upserted matches");

        let (stale_deleted, gc_error) = self
            .collect_garbage(project_id, run_id, &failed_products)
            .await;

        WriteReport {
            run_id,
            upserted,
            errors,
            stale_deleted,
            gc_error,
        }
    }

    async fn collect_garbage(
        &self,
        project_id: Uuid,
        run_id: Uuid,
        failed_products: &[Uuid],
    ) -> (Option<u64>, Option<String>) {
        match self
            .matches
            .delete_stale(project_id, run_id, failed_products)
            .await
        {
            Ok(deleted) => {
                MatchingMetrics::record_stale_deleted(deleted);
                if deleted > 0 {
                    info!(project_id = %project_id, run_id = %run_id, deleted, "Removed stale matches");
                }
                let retained = (!failed_products.is_empty()).then(|| {
                    let ids: Vec<String> = failed_products.iter().map(Uuid::to_string).collect();
                    format!(
                        "kept previous rows of {} products whose upsert failed: {}",
                        failed_products.len(),
                        ids.join(", ")
                    )
                });
                (Some(deleted), retained)
            }
            Err(e) => {
                warn!(project_id = %project_id, run_id = %run_id, error = %e, "Failed to delete stale matches");
                (None, Some(e.to_string()))
            }
        }
    }
}

/// Build the persisted form of a classified candidate
pub fn build_record(
    run_id: Uuid,
    candidate: &MatchCandidate,
    tier: MatchTier,
    updated_at: DateTime<Utc>,
) -> MatchRecord {
    let mut reasons = Vec::with_capacity(4);
    if let Some(best) = candidate.best_pair() {
        reasons.push(MatchReason::new(ReasonKind::Embedding, best.embedding_score));
        reasons.push(MatchReason::new(ReasonKind::Attribute, best.attribute_score));
    }
    reasons.push(MatchReason::new(
        ReasonKind::Frequency,
        candidate.frequency() as u32,
    ));
    if candidate.taxonomy_bonus > 0 {
        reasons.push(MatchReason::new(ReasonKind::Taxonomy, candidate.taxonomy_bonus));
    }

    MatchRecord {
        project_id: candidate.project_id,
        product_id: candidate.product_id,
        run_id,
        score: candidate.aggregate_score.min(100),
        tier,
        reasons,
        evidence_image_ids: candidate.evidence_image_ids(),
        updated_at,
    }
}
