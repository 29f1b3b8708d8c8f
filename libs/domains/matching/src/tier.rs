use crate::config::TierThresholds;
use crate::models::MatchTier;

/// Bucket a final score into a tier; `None` means the pair is not persisted
pub fn classify(score: u32, frequency: usize, thresholds: &TierThresholds) -> Option<MatchTier> {
    let frequent_enough = frequency >= thresholds.verified_min_frequency;

    if score >= thresholds.verified_score
        || (score >= thresholds.verified_frequent_score && frequent_enough)
    {
        Some(MatchTier::Verified)
    } else if score >= thresholds.possible_min_score {
        Some(MatchTier::Possible)
    } else {
        None
    }
}
