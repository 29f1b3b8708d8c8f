use core_config::{env_parse, ConfigError, FromEnv};
use std::time::Duration;

use crate::error::{MatchingError, MatchingResult};

/// Weights for fusing embedding and attribute scores into one pair score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub embedding: f64,
    pub attribute: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            embedding: 0.7,
            attribute: 0.3,
        }
    }
}

/// Thresholds used to bucket a candidate into a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierThresholds {
    /// Score that alone makes a match verified
    pub verified_score: u32,
    /// Lower verified bar for products seen in several photos
    pub verified_frequent_score: u32,
    pub verified_min_frequency: usize,
    /// Floor for the possible tier; below it no record is written
    pub possible_min_score: u32,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            verified_score: 80,
            verified_frequent_score: 70,
            verified_min_frequency: 2,
            possible_min_score: 50,
        }
    }
}

/// Immutable configuration of the matching engine
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingConfig {
    /// Nearest neighbors requested per project image
    pub neighbor_k: usize,
    /// Pairs with a combined score below this never become candidates
    pub min_pair_score: u32,
    pub weights: ScoringWeights,
    pub frequency_bonus_per_hit: u32,
    pub frequency_bonus_cap: u32,
    pub taxonomy_max_bonus: u32,
    pub tiers: TierThresholds,
    pub embedding_dimension: usize,
    /// Concurrent NN queries within one project
    pub image_concurrency: usize,
    /// Concurrent projects in a batch recompute
    pub project_concurrency: usize,
    /// Per-call timeout for NN queries and signal lookups
    pub query_timeout: Duration,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            neighbor_k: 50,
            min_pair_score: 40,
            weights: ScoringWeights::default(),
            frequency_bonus_per_hit: 2,
            frequency_bonus_cap: 10,
            taxonomy_max_bonus: 30,
            tiers: TierThresholds::default(),
            embedding_dimension: 1536,
            image_concurrency: 8,
            project_concurrency: 4,
            query_timeout: Duration::from_secs(10),
        }
    }
}

impl MatchingConfig {
    pub fn with_tiers(mut self, tiers: TierThresholds) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn with_embedding_dimension(mut self, dimension: usize) -> Self {
        self.embedding_dimension = dimension;
        self
    }

    pub fn with_min_pair_score(mut self, score: u32) -> Self {
        self.min_pair_score = score;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, images: usize, projects: usize) -> Self {
        self.image_concurrency = images;
        self.project_concurrency = projects;
        self
    }

    /// Frequency contribution for a candidate seen `frequency` times
    pub fn frequency_bonus(&self, frequency: usize) -> u32 {
        let raw = (frequency as u64).saturating_mul(self.frequency_bonus_per_hit as u64);
        raw.min(self.frequency_bonus_cap as u64) as u32
    }

    pub fn validate(&self) -> MatchingResult<()> {
        let fail = |msg: &str| Err(MatchingError::Config(msg.to_string()));

        if self.neighbor_k == 0 {
            return fail("neighbor_k must be at least 1");
        }
        if self.embedding_dimension == 0 {
            return fail("embedding_dimension must be at least 1");
        }
        if self.image_concurrency == 0 || self.project_concurrency == 0 {
            return fail("concurrency limits must be at least 1");
        }
        let w = self.weights;
        if !(w.embedding.is_finite() && w.attribute.is_finite())
            || w.embedding < 0.0
            || w.attribute < 0.0
        {
            return fail("scoring weights must be finite and non-negative");
        }
        let t = self.tiers;
        if [
            self.min_pair_score,
            self.frequency_bonus_cap,
            self.taxonomy_max_bonus,
            t.verified_score,
            t.verified_frequent_score,
            t.possible_min_score,
        ]
        .iter()
        .any(|v| *v > 100)
        {
            return fail("scores and bonuses must be within 0-100");
        }
        if t.verified_frequent_score > t.verified_score {
            return fail("verified_frequent_score must not exceed verified_score");
        }
        if t.possible_min_score > t.verified_frequent_score {
            return fail("possible_min_score must not exceed verified_frequent_score");
        }
        if self.query_timeout.is_zero() {
            return fail("query_timeout must be positive");
        }
        Ok(())
    }
}

impl FromEnv for MatchingConfig {
    /// Reads `MATCHING_*` variables, falling back to defaults for unset ones
    fn from_env() -> Result<Self, ConfigError> {
        let d = MatchingConfig::default();

        let config = Self {
            neighbor_k: env_parse("MATCHING_NEIGHBOR_K", d.neighbor_k)?,
            min_pair_score: env_parse("MATCHING_MIN_PAIR_SCORE", d.min_pair_score)?,
            weights: ScoringWeights {
                embedding: env_parse("MATCHING_EMBEDDING_WEIGHT", d.weights.embedding)?,
                attribute: env_parse("MATCHING_ATTRIBUTE_WEIGHT", d.weights.attribute)?,
            },
            frequency_bonus_per_hit: env_parse(
                "MATCHING_FREQUENCY_BONUS_PER_HIT",
                d.frequency_bonus_per_hit,
            )?,
            frequency_bonus_cap: env_parse("MATCHING_FREQUENCY_BONUS_CAP", d.frequency_bonus_cap)?,
            taxonomy_max_bonus: env_parse("MATCHING_TAXONOMY_MAX_BONUS", d.taxonomy_max_bonus)?,
            tiers: TierThresholds {
                verified_score: env_parse("MATCHING_VERIFIED_SCORE", d.tiers.verified_score)?,
                verified_frequent_score: env_parse(
                    "MATCHING_VERIFIED_FREQUENT_SCORE",
                    d.tiers.verified_frequent_score,
                )?,
                verified_min_frequency: env_parse(
                    "MATCHING_VERIFIED_MIN_FREQUENCY",
                    d.tiers.verified_min_frequency,
                )?,
                possible_min_score: env_parse(
                    "MATCHING_POSSIBLE_MIN_SCORE",
                    d.tiers.possible_min_score,
                )?,
            },
            embedding_dimension: env_parse("MATCHING_EMBEDDING_DIMENSION", d.embedding_dimension)?,
            image_concurrency: env_parse("MATCHING_IMAGE_CONCURRENCY", d.image_concurrency)?,
            project_concurrency: env_parse("MATCHING_PROJECT_CONCURRENCY", d.project_concurrency)?,
            query_timeout: Duration::from_millis(env_parse(
                "MATCHING_QUERY_TIMEOUT_MS",
                d.query_timeout.as_millis() as u64,
            )?),
        };

        config
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(config)
    }
}
