//! Taxonomy boosting: nudges candidates that resemble products already
//! confirmed for the project.

use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::config::MatchingConfig;
use crate::error::MatchingResult;
use crate::models::{MatchCandidate, Taxonomy};
use crate::repository::MatchingStores;

const TYPE_WEIGHT: u32 = 20;
const CATEGORY_WEIGHT: u32 = 30;
const SUBCATEGORY_WEIGHT: u32 = 50;

fn same_field(a: &Option<String>, b: &Option<String>) -> bool {
    match (a.as_deref().map(str::trim), b.as_deref().map(str::trim)) {
        (Some(a), Some(b)) if !a.is_empty() => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

/// Similarity of two product classifications, 0-100
pub fn taxonomy_similarity(a: &Taxonomy, b: &Taxonomy) -> u32 {
    let mut score = 0;
    if same_field(&a.product_type, &b.product_type) {
        score += TYPE_WEIGHT;
    }
    if same_field(&a.category, &b.category) {
        score += CATEGORY_WEIGHT;
    }
    if same_field(&a.subcategory, &b.subcategory) {
        score += SUBCATEGORY_WEIGHT;
    }
    score
}

/// Scale a 0-100 similarity down to a bonus of at most `max_bonus`
pub fn taxonomy_bonus(similarity: u32, max_bonus: u32) -> u32 {
    let scaled = similarity.min(100) as f64 * max_bonus as f64 / 100.0;
    (scaled.round() as u32).min(max_bonus)
}

pub struct TaxonomyBooster<'a> {
    stores: &'a MatchingStores,
    config: &'a MatchingConfig,
}

impl<'a> TaxonomyBooster<'a> {
    pub fn new(stores: &'a MatchingStores, config: &'a MatchingConfig) -> Self {
        Self { stores, config }
    }

    pub async fn boost(
        &self,
        project_id: Uuid,
        candidates: Vec<MatchCandidate>,
    ) -> MatchingResult<Vec<MatchCandidate>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let priors = self
            .stores
            .confirmed_links
            .get_confirmed_products(project_id)
            .await?;
        if priors.is_empty() {
            debug!(project_id = %project_id, "No confirmed products, skipping taxonomy boost");
            return Ok(candidates);
        }

        let mut product_ids: Vec<Uuid> = priors.clone();
        product_ids.extend(candidates.iter().map(|c| c.product_id));
        product_ids.sort();
        product_ids.dedup();

        let taxonomy = self.stores.taxonomy.get_taxonomy(&product_ids).await?;
        let boosted = apply_taxonomy_boost(candidates, &priors, &taxonomy, self.config);

        debug!(
            project_id = %project_id,
            priors = priors.len(),
            boosted = boosted.iter().filter(|c| c.taxonomy_bonus > 0).count(),
            "Applied taxonomy boost"
        );

        Ok(boosted)
    }
}

/// Add each candidate's best taxonomy bonus against the priors
pub fn apply_taxonomy_boost(
    candidates: Vec<MatchCandidate>,
    priors: &[Uuid],
    taxonomy: &HashMap<Uuid, Taxonomy>,
    config: &MatchingConfig,
) -> Vec<MatchCandidate> {
    let prior_taxonomies: Vec<&Taxonomy> = priors
        .iter()
        .filter_map(|id| taxonomy.get(id))
        .filter(|t| !t.is_empty())
        .collect();

    if prior_taxonomies.is_empty() {
        return candidates;
    }

    candidates
        .into_iter()
        .map(|mut candidate| {
            let Some(own) = taxonomy.get(&candidate.product_id) else {
                return candidate;
            };
            let similarity = prior_taxonomies
                .iter()
                .map(|prior| taxonomy_similarity(own, prior))
                .max()
                .unwrap_or(0);
            let bonus = taxonomy_bonus(similarity, config.taxonomy_max_bonus);

            candidate.taxonomy_bonus = bonus;
            candidate.aggregate_score = (candidate.aggregate_score + bonus).min(100);
            candidate
        })
        .collect()
}
