//! Provably-fair outcome derivation
//!
//! `derive` keys HMAC-SHA256 with the server secret over `client_seed:nonce`.
//! `expand` stretches that digest into as many floats in [0,1) as a game
//! needs. Everything here is pure.

use super::types::{GameRequest, GameRules, Outcome};
use super::{coinflip, crash, loot_crate, plinko, sweeper};
use crate::errors::{EngineError, EngineResult};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

pub type HmacSha256 = Hmac<Sha256>;

/// Floats produced by one 32-byte slice
pub const FLOATS_PER_SLICE: usize = 8;

/// Hex sha256 of the secret, published before the seed is used
pub fn commitment_hash(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

pub fn derive(secret: &str, client_seed: &str, nonce: u64) -> EngineResult<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| EngineError::SeedIntegrity(format!("unusable HMAC key: {}", e)))?;
    mac.update(format!("{}:{}", client_seed, nonce).as_bytes());

    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Stretch `digest` into `count` floats in [0,1).
///
/// Slice 0 is the digest itself; slice k is `sha256(digest || k)` with `k`
/// as a big-endian u32. Each 4-byte chunk maps to `u32 / 2^32`.
pub fn expand(digest: &[u8; 32], count: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(count);
    let mut slice_index: u32 = 0;

    while out.len() < count {
        let mut slice = *digest;
        if slice_index > 0 {
            let mut hasher = Sha256::new();
            hasher.update(digest);
            hasher.update(slice_index.to_be_bytes());
            slice.copy_from_slice(&hasher.finalize());
        }

        for chunk in slice.chunks_exact(4) {
            if out.len() == count {
                break;
            }
            let v = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            out.push(v as f64 / (u32::MAX as f64 + 1.0));
        }
        slice_index += 1;
    }
    out
}

/// Reject requests that cannot be resolved under `rules`.
pub fn validate_request(rules: &GameRules, request: &GameRequest) -> EngineResult<()> {
    match (rules, request) {
        (GameRules::Crash { .. }, GameRequest::Crash { cashout_at }) => {
            crash::validate_cashout(*cashout_at)
        }
        (GameRules::Plinko { payouts }, GameRequest::Plinko) => plinko::validate_table(payouts),
        (GameRules::CoinFlip { .. }, GameRequest::CoinFlip { .. }) => Ok(()),
        (GameRules::Sweeper { tiles, .. }, GameRequest::Sweeper { mines, picks }) => {
            sweeper::validate(*tiles, *mines, picks)
        }
        (GameRules::Crate { tiers }, GameRequest::Crate) => loot_crate::validate_tiers(tiers),
        (rules, request) => Err(EngineError::InvalidRequest(format!(
            "{} request cannot be resolved with {} rules",
            request.game_type(),
            rules.game_type()
        ))),
    }
}

/// How many floats a round consumes
pub fn floats_needed(rules: &GameRules) -> usize {
    match rules {
        GameRules::Crash { .. } => 2,
        GameRules::Plinko { payouts } => payouts.len().saturating_sub(1),
        GameRules::CoinFlip { .. } => 1,
        GameRules::Sweeper { tiles, .. } => (*tiles as usize).saturating_sub(1),
        GameRules::Crate { .. } => 1,
    }
}

/// Map a digest to the outcome of `request` under `rules`.
pub fn resolve(rules: &GameRules, request: &GameRequest, digest: &[u8; 32]) -> EngineResult<Outcome> {
    validate_request(rules, request)?;
    let floats = expand(digest, floats_needed(rules));

    let outcome = match (rules, request) {
        (GameRules::Crash { house_edge_bps }, GameRequest::Crash { cashout_at }) => {
            crash::resolve(&floats, *house_edge_bps, *cashout_at)
        }
        (GameRules::Plinko { payouts }, GameRequest::Plinko) => plinko::resolve(&floats, payouts),
        (GameRules::CoinFlip { .. }, GameRequest::CoinFlip { side }) => {
            coinflip::resolve(floats[0], *side)
        }
        (GameRules::Sweeper { tiles, house_edge_bps }, GameRequest::Sweeper { mines, picks }) => {
            sweeper::resolve(&floats, *tiles, *mines, picks, *house_edge_bps)
        }
        (GameRules::Crate { tiers }, GameRequest::Crate) => loot_crate::resolve(floats[0], tiers),
        // validate_request already rejected mismatched pairs
        (rules, request) => {
            return Err(EngineError::InvalidRequest(format!(
                "{} request cannot be resolved with {} rules",
                request.game_type(),
                rules.game_type()
            )))
        }
    };
    Ok(outcome)
}
