//! Crash curve
//!
//! The first float decides the instant-crash band: with probability `e` the
//! round busts at 1.00x. Otherwise the second float `r` maps to
//! `floor(100 / (1 - r))` hundredths, capped at `MAX_MULTIPLIER`. Cashing out
//! at target `t` then wins with probability `(1 - e) * 100 / t`, so every
//! target returns `1 - e`.

use super::types::Outcome;
use crate::common::types::{MAX_MULTIPLIER, MULTIPLIER_ONE};
use crate::errors::{EngineError, EngineResult};

/// Lowest accepted cashout target (1.01x)
pub const MIN_CASHOUT: u64 = 101;

pub fn validate_cashout(cashout_at: u64) -> EngineResult<()> {
    if !(MIN_CASHOUT..=MAX_MULTIPLIER).contains(&cashout_at) {
        return Err(EngineError::InvalidRequest(format!(
            "cashout target must be between {} and {} hundredths",
            MIN_CASHOUT, MAX_MULTIPLIER
        )));
    }
    Ok(())
}

/// Crash point in hundredths; never below 100.
pub fn crash_point(band: f64, r: f64, house_edge_bps: u32) -> u64 {
    if band < house_edge_bps as f64 / 10_000.0 {
        return MULTIPLIER_ONE;
    }

    let raw = (MULTIPLIER_ONE as f64 / (1.0 - r)).floor();
    if raw >= MAX_MULTIPLIER as f64 {
        MAX_MULTIPLIER
    } else {
        (raw as u64).max(MULTIPLIER_ONE)
    }
}

pub fn resolve(floats: &[f64], house_edge_bps: u32, cashout_at: u64) -> Outcome {
    let crash_point = crash_point(floats[0], floats[1], house_edge_bps);
    Outcome::Crash {
        crash_point,
        cashout_at,
        cashed_out: crash_point >= cashout_at,
    }
}
