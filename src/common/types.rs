//! Shared type definitions and helpers
//!
//! Amounts are integer minor units; multipliers are integer hundredths
//! (`200` means 2.00x).

use crate::errors::{EngineError, EngineResult};
use uuid::Uuid;

/// One whole multiplier expressed in hundredths.
pub const MULTIPLIER_ONE: u64 = 100;

/// Upper bound on any game multiplier (10,000x).
pub const MAX_MULTIPLIER: u64 = 1_000_000;

const MAX_OWNER_ID_LEN: usize = 128;

/// Generate a new random identifier
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Apply a multiplier in hundredths to an amount, flooring the result.
pub fn apply_multiplier(amount: u64, multiplier: u64) -> u64 {
    let scaled = amount as u128 * multiplier as u128 / MULTIPLIER_ONE as u128;
    scaled.min(u64::MAX as u128) as u64
}

/// Take `bps` basis points off the top of an amount.
pub fn apply_house_edge(amount: u64, edge_bps: u32) -> (u64, u64) {
    let cut = (amount as u128 * edge_bps as u128 / 10_000) as u64;
    (amount - cut, cut)
}

/// Render a hundredths multiplier as `2.00x`
pub fn format_multiplier(multiplier: u64) -> String {
    format!("{}.{:02}x", multiplier / 100, multiplier % 100)
}

/// Owner ids are embedded in storage keys, so `:` is reserved.
pub fn validate_owner_id(owner: &str) -> EngineResult<()> {
    if owner.is_empty() || owner.len() > MAX_OWNER_ID_LEN {
        return Err(EngineError::InvalidRequest(format!(
            "owner id must be 1-{} characters",
            MAX_OWNER_ID_LEN
        )));
    }
    if owner.contains(':') || owner.chars().any(char::is_control) {
        return Err(EngineError::InvalidRequest(
            "owner id contains reserved characters".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn parse_u64_le(bytes: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_le_bytes(arr))
}

pub(crate) fn to_u64_le(value: u64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}
