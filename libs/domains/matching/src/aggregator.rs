//! Candidate generation: NN fan-out per project image, pair scoring and
//! grouping by product.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::MatchingConfig;
use crate::error::{MatchingError, MatchingResult};
use crate::metrics::MatchingMetrics;
use crate::models::{ImageSignal, ImageSource, MatchCandidate, PairScore};
use crate::repository::MatchingStores;
use crate::scoring::score_pair;

pub struct CandidateAggregator<'a> {
    stores: &'a MatchingStores,
    config: &'a MatchingConfig,
}

impl<'a> CandidateAggregator<'a> {
    pub fn new(stores: &'a MatchingStores, config: &'a MatchingConfig) -> Self {
        Self { stores, config }
    }

    /// Build the candidate set for one project.
    ///
    /// Images without a usable embedding contribute nothing, and so does a
    /// single failed NN query. If every query fails the whole collection
    /// fails, so an index outage is never mistaken for "no matches".
    pub async fn collect(&self, project_id: Uuid) -> MatchingResult<Vec<MatchCandidate>> {
        let image_ids = self.stores.projects.list_project_images(project_id).await?;
        if image_ids.is_empty() {
            debug!(project_id = %project_id, "Project has no images");
            return Ok(Vec::new());
        }

        let signals = timeout(
            self.config.query_timeout,
            self.stores
                .embeddings
                .get_signals(&image_ids, ImageSource::Project),
        )
        .await??;

        let usable: Vec<(&ImageSignal, &[f32])> = image_ids
            .iter()
            .filter_map(|id| signals.get(id))
            .filter_map(|signal| self.usable_embedding(signal).map(|e| (signal, e)))
            .collect();

        debug!(
            project_id = %project_id,
            images = image_ids.len(),
            usable = usable.len(),
            "Loaded project image signals"
        );

        if usable.is_empty() {
            return Ok(Vec::new());
        }

        // Order-preserving so grouping is deterministic across runs
        let queries: Vec<_> = usable
            .into_iter()
            .map(|(signal, embedding)| self.query_image(signal, embedding))
            .collect();
        let outcomes: Vec<MatchingResult<Vec<(Uuid, PairScore)>>> = stream::iter(queries)
            .buffered(self.config.image_concurrency)
            .collect()
            .await;

        let queried = outcomes.len();
        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        if failed == queried {
            return Err(MatchingError::Index(format!(
                "all {} nearest-neighbor queries failed for project {}",
                queried, project_id
            )));
        }

        let pairs = outcomes.into_iter().filter_map(Result::ok).flatten();
        let candidates = fold_candidates(project_id, pairs, self.config);

        debug!(
            project_id = %project_id,
            queried,
            failed,
            candidates = candidates.len(),
            "Generated candidates"
        );
        MatchingMetrics::record_candidates(candidates.len());

        Ok(candidates)
    }

    fn usable_embedding<'s>(&self, signal: &'s ImageSignal) -> Option<&'s [f32]> {
        if let Err(e) = signal.validate(self.config.embedding_dimension) {
            warn!(image_id = %signal.image_id, error = %e, "Skipping invalid image signal");
            return None;
        }
        signal.embedding.as_deref()
    }

    /// Query the index for one project image and keep the pairs above the floor
    async fn query_image(
        &self,
        signal: &ImageSignal,
        embedding: &[f32],
    ) -> MatchingResult<Vec<(Uuid, PairScore)>> {
        let query = self
            .stores
            .index
            .query_nearest(embedding, self.config.neighbor_k);

        let hits = match timeout(self.config.query_timeout, query).await {
            Ok(Ok(hits)) => {
                MatchingMetrics::record_neighbor_query("ok");
                hits
            }
            Ok(Err(e)) => {
                MatchingMetrics::record_neighbor_query("error");
                warn!(image_id = %signal.image_id, error = %e, "Nearest-neighbor query failed");
                return Err(e);
            }
            Err(_) => {
                MatchingMetrics::record_neighbor_query("timeout");
                warn!(image_id = %signal.image_id, "Nearest-neighbor query timed out");
                return Err(MatchingError::Timeout(format!(
                    "nearest-neighbor query for image {}",
                    signal.image_id
                )));
            }
        };

        let returned = hits.len();
        let pairs: Vec<(Uuid, PairScore)> = hits
            .into_iter()
            .map(|hit| {
                let pair = score_pair(
                    signal.image_id,
                    &signal.attrs,
                    hit.image_id,
                    &hit.attrs,
                    hit.distance,
                    &self.config.weights,
                );
                (hit.product_id, pair)
            })
            .filter(|(_, pair)| pair.combined >= self.config.min_pair_score)
            .collect();

        debug!(
            image_id = %signal.image_id,
            returned,
            kept = pairs.len(),
            "Scored neighbor hits"
        );

        Ok(pairs)
    }
}

/// Group scored pairs by product and compute each product's aggregate score.
///
/// Candidates come out in order of first appearance.
pub fn fold_candidates<I>(project_id: Uuid, pairs: I, config: &MatchingConfig) -> Vec<MatchCandidate>
where
    I: IntoIterator<Item = (Uuid, PairScore)>,
{
    let mut order: Vec<Uuid> = Vec::new();
    let mut groups: HashMap<Uuid, Vec<PairScore>> = HashMap::new();

    for (product_id, pair) in pairs {
        groups
            .entry(product_id)
            .or_insert_with(|| {
                order.push(product_id);
                Vec::new()
            })
            .push(pair);
    }

    order
        .into_iter()
        .filter_map(|product_id| {
            let pair_scores = groups.remove(&product_id)?;
            let best = pair_scores.iter().map(|p| p.combined).max()?;
            let frequency_bonus = config.frequency_bonus(pair_scores.len());

            Some(MatchCandidate {
                project_id,
                product_id,
                aggregate_score: best.saturating_add(frequency_bonus).min(100),
                frequency_bonus,
                taxonomy_bonus: 0,
                pair_scores,
            })
        })
        .collect()
}
