//! Pair scoring: fuses one NN distance and two attribute sets into a [`PairScore`].

use uuid::Uuid;

use crate::config::ScoringWeights;
use crate::models::{Attributes, PairScore};

/// Convert a cosine distance into a 0-100 similarity score
pub fn embedding_score(distance: f64) -> u32 {
    if !distance.is_finite() {
        return 0;
    }
    let similarity = (1.0 - distance).clamp(0.0, 1.0);
    (similarity * 100.0).round().min(100.0) as u32
}

/// Average tag overlap over the attribute families both images carry, 0-100
pub fn attribute_score(project: &Attributes, product: &Attributes) -> u32 {
    let overlaps: Vec<f64> = project
        .families()
        .filter_map(|(name, a)| {
            let b = product.family(name)?;
            let shared = a.intersection(b).count();
            let denom = a.len().max(b.len()).max(1);
            Some(shared as f64 / denom as f64)
        })
        .collect();

    if overlaps.is_empty() {
        return 0;
    }

    let mean = overlaps.iter().sum::<f64>() / overlaps.len() as f64;
    (mean * 100.0).round().clamp(0.0, 100.0) as u32
}

/// Weighted fusion of the two sub-scores, capped at 100
pub fn combine(embedding: u32, attribute: u32, weights: &ScoringWeights) -> u32 {
    let raw = embedding as f64 * weights.embedding + attribute as f64 * weights.attribute;
    raw.round().clamp(0.0, 100.0) as u32
}

pub fn score_pair(
    project_image_id: Uuid,
    project_attrs: &Attributes,
    product_image_id: Uuid,
    product_attrs: &Attributes,
    distance: f64,
    weights: &ScoringWeights,
) -> PairScore {
    let embedding = embedding_score(distance);
    let attribute = attribute_score(project_attrs, product_attrs);

    PairScore {
        project_image_id,
        product_image_id,
        embedding_score: embedding,
        attribute_score: attribute,
        combined: combine(embedding, attribute, weights),
    }
}
