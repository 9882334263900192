//! Weighted crate draw over a rarity table

use super::types::{CrateTier, Outcome};
use crate::errors::{EngineError, EngineResult};

pub fn validate_tiers(tiers: &[CrateTier]) -> EngineResult<()> {
    if tiers.is_empty() {
        return Err(EngineError::InvalidRequest("crate has no tiers".to_string()));
    }
    if tiers.iter().any(|t| t.weight == 0) {
        return Err(EngineError::InvalidRequest(
            "crate tier weights must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Index of the tier selected by `f`, by cumulative-weight search.
pub fn select(f: f64, tiers: &[CrateTier]) -> usize {
    let cumulative: Vec<u64> = tiers
        .iter()
        .scan(0u64, |acc, tier| {
            *acc += tier.weight as u64;
            Some(*acc)
        })
        .collect();
    let total = cumulative.last().copied().unwrap_or(0);
    if total == 0 {
        return 0;
    }

    let pick = ((f * total as f64) as u64).min(total - 1);
    cumulative.partition_point(|&bound| bound <= pick)
}

pub fn resolve(f: f64, tiers: &[CrateTier]) -> Outcome {
    let tier_index = select(f, tiers);
    let tier = &tiers[tier_index];
    Outcome::Crate {
        tier: tier.name.clone(),
        tier_index,
        multiplier: tier.multiplier,
    }
}
