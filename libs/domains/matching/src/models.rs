use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::error::{MatchingError, MatchingResult};

/// Which side of the catalog owns a photograph
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ImageSource {
    Project,
    Product,
}

/// Semantic tags of an image grouped by attribute family
/// (e.g. "category", "material", "color", "context").
///
/// Tags are stored trimmed and lower-cased; empty tags are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, BTreeSet<String>>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a family with its tags, merging into an existing family of the same name
    pub fn with_family<I, S>(mut self, family: &str, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.insert_family(family, tags);
        self
    }

    pub fn insert_family<I, S>(&mut self, family: &str, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entry = self.0.entry(family.trim().to_string()).or_default();
        entry.extend(
            tags.into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty()),
        );
    }

    pub fn family(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.0.get(name)
    }

    pub fn families(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One image's AI-derived representation, produced by the embedding pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSignal {
    pub image_id: Uuid,
    pub source: ImageSource,
    /// Owning project or product. Mandatory for product images.
    pub owner_id: Option<Uuid>,
    pub embedding: Option<Vec<f32>>,
    pub attrs: Attributes,
    /// Attribute extraction quality, 0-100
    pub confidence: f32,
}

impl ImageSignal {
    pub fn new(image_id: Uuid, source: ImageSource, owner_id: Uuid) -> Self {
        Self {
            image_id,
            source,
            owner_id: Some(owner_id),
            embedding: None,
            attrs: Attributes::new(),
            confidence: 0.0,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_attrs(mut self, attrs: Attributes) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Check the signal invariants against the configured model dimension
    pub fn validate(&self, dimension: usize) -> MatchingResult<()> {
        let invalid = |reason: String| MatchingError::InvalidSignal {
            image_id: self.image_id,
            reason,
        };

        if self.source == ImageSource::Product && self.owner_id.is_none() {
            return Err(invalid("product image without owner".to_string()));
        }

        if let Some(embedding) = &self.embedding {
            if embedding.len() != dimension {
                return Err(invalid(format!(
                    "embedding has {} dimensions, expected {}",
                    embedding.len(),
                    dimension
                )));
            }
            if embedding.iter().any(|v| !v.is_finite()) {
                return Err(invalid("embedding contains non-finite values".to_string()));
            }
        }

        if !(0.0..=100.0).contains(&self.confidence) {
            return Err(invalid(format!("confidence {} outside 0-100", self.confidence)));
        }

        Ok(())
    }
}

/// A candidate product image returned by the nearest-neighbor index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborHit {
    pub image_id: Uuid,
    pub product_id: Uuid,
    pub attrs: Attributes,
    /// Cosine distance, 0 for identical vectors
    pub distance: f64,
}

/// Product classification used for taxonomy boosting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxonomy {
    pub product_type: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
}

impl Taxonomy {
    pub fn new(
        product_type: impl Into<String>,
        category: impl Into<String>,
        subcategory: impl Into<String>,
    ) -> Self {
        Self {
            product_type: Some(product_type.into()),
            category: Some(category.into()),
            subcategory: Some(subcategory.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        [&self.product_type, &self.category, &self.subcategory]
            .iter()
            .all(|f| f.as_deref().is_none_or(|s| s.trim().is_empty()))
    }
}

/// Score of one project image against one candidate product image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairScore {
    pub project_image_id: Uuid,
    pub product_image_id: Uuid,
    pub embedding_score: u32,
    pub attribute_score: u32,
    pub combined: u32,
}

/// Aggregate of every pair score found for one (project, product) within a run
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub project_id: Uuid,
    pub product_id: Uuid,
    pub pair_scores: Vec<PairScore>,
    pub aggregate_score: u32,
    pub frequency_bonus: u32,
    pub taxonomy_bonus: u32,
}

impl MatchCandidate {
    pub fn frequency(&self) -> usize {
        self.pair_scores.len()
    }

    /// Highest-scoring pair; the earliest one wins ties
    pub fn best_pair(&self) -> Option<&PairScore> {
        self.pair_scores
            .iter()
            .reduce(|best, p| if p.combined > best.combined { p } else { best })
    }

    /// Distinct project images that contributed, in first-seen order
    pub fn evidence_image_ids(&self) -> Vec<Uuid> {
        let mut seen = Vec::with_capacity(self.pair_scores.len());
        for pair in &self.pair_scores {
            if !seen.contains(&pair.project_image_id) {
                seen.push(pair.project_image_id);
            }
        }
        seen
    }
}

/// Confidence bucket of a persisted match
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MatchTier {
    Possible,
    Verified,
}

/// Signal family recorded in a match explanation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReasonKind {
    Embedding,
    Attribute,
    Frequency,
    Taxonomy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchReason {
    pub kind: ReasonKind,
    pub value: u32,
}

impl MatchReason {
    pub fn new(kind: ReasonKind, value: u32) -> Self {
        Self { kind, value }
    }
}

/// Persisted project-product association, unique per (project_id, product_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub project_id: Uuid,
    pub product_id: Uuid,
    pub run_id: Uuid,
    pub score: u32,
    pub tier: MatchTier,
    pub reasons: Vec<MatchReason>,
    pub evidence_image_ids: Vec<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl MatchRecord {
    pub fn key(&self) -> (Uuid, Uuid) {
        (self.project_id, self.product_id)
    }
}

/// Outcome of one run-scoped write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReport {
    pub run_id: Uuid,
    pub upserted: usize,
    /// Per-candidate upsert failures
    pub errors: Vec<String>,
    /// Stale rows removed; `None` when the delete did not run or failed
    pub stale_deleted: Option<u64>,
    /// Why stale cleanup failed, or which products it kept because their
    /// upsert failed
    pub gc_error: Option<String>,
}

/// Result of recomputing matches for a single project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRunReport {
    pub project_id: Uuid,
    /// `None` when the run failed before reaching the writer
    pub run_id: Option<Uuid>,
    pub upserted: usize,
    pub errors: Vec<String>,
    pub stale_deleted: Option<u64>,
    pub gc_error: Option<String>,
}

impl ProjectRunReport {
    pub(crate) fn from_write(project_id: Uuid, report: WriteReport) -> Self {
        Self {
            project_id,
            run_id: Some(report.run_id),
            upserted: report.upserted,
            errors: report.errors,
            stale_deleted: report.stale_deleted,
            gc_error: report.gc_error,
        }
    }

    pub(crate) fn failed(project_id: Uuid, error: String) -> Self {
        Self {
            project_id,
            run_id: None,
            upserted: 0,
            errors: vec![error],
            stale_deleted: None,
            gc_error: None,
        }
    }

    /// True when the run reached the writer
    pub fn completed(&self) -> bool {
        self.run_id.is_some()
    }
}

/// Result of a bulk recompute over every project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub projects_processed: usize,
    pub total_upserted: usize,
    pub errors: Vec<String>,
}
