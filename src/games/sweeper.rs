//! Tile sweeper
//!
//! The board starts as `mines` mines followed by safe tiles and is shuffled
//! with Fisher-Yates, one float per swap from the top index down. Picks are
//! revealed in order and the round stops at the first mine.

use super::types::Outcome;
use crate::common::types::MAX_MULTIPLIER;
use crate::errors::{EngineError, EngineResult};

/// Largest board whose payout products stay inside u128
pub const MAX_TILES: u8 = 30;

pub fn validate(tiles: u8, mines: u8, picks: &[u8]) -> EngineResult<()> {
    if !(2..=MAX_TILES).contains(&tiles) {
        return Err(EngineError::InvalidRequest(format!(
            "sweeper board must have 2-{} tiles",
            MAX_TILES
        )));
    }
    if mines == 0 || mines >= tiles {
        return Err(EngineError::InvalidRequest(format!(
            "mines must be between 1 and {}",
            tiles - 1
        )));
    }
    if picks.is_empty() || picks.len() > (tiles - mines) as usize {
        return Err(EngineError::InvalidRequest(format!(
            "pick between 1 and {} tiles",
            tiles - mines
        )));
    }

    let mut seen = vec![false; tiles as usize];
    for &pick in picks {
        if pick >= tiles {
            return Err(EngineError::InvalidRequest(format!("tile {} is off the board", pick)));
        }
        if std::mem::replace(&mut seen[pick as usize], true) {
            return Err(EngineError::InvalidRequest(format!("tile {} picked twice", pick)));
        }
    }
    Ok(())
}

/// Shuffled board, `true` marks a mine. Needs `tiles - 1` floats.
pub fn shuffle_board(floats: &[f64], tiles: u8, mines: u8) -> Vec<bool> {
    let n = tiles as usize;
    let mut board: Vec<bool> = (0..n).map(|i| i < mines as usize).collect();

    for (k, i) in (1..n).rev().enumerate() {
        let j = ((floats[k] * (i + 1) as f64) as usize).min(i);
        board.swap(i, j);
    }
    board
}

/// Multiplier for `safe_picks` safe reveals: the inverse of the survival
/// probability, less the house edge, floored to hundredths.
pub fn multiplier_for(tiles: u8, mines: u8, safe_picks: usize, house_edge_bps: u32) -> u64 {
    let n = tiles as u128;
    let m = mines as u128;
    let mut numerator: u128 = 100 * (10_000 - house_edge_bps as u128);
    let mut denominator: u128 = 10_000;

    for i in 0..safe_picks as u128 {
        let (Some(num), Some(den)) = (
            numerator.checked_mul(n - i),
            denominator.checked_mul(n - m - i),
        ) else {
            return MAX_MULTIPLIER;
        };
        let divisor = gcd(num, den);
        numerator = num / divisor;
        denominator = den / divisor;
    }

    ((numerator / denominator) as u64).min(MAX_MULTIPLIER)
}

/// Multiplier after each successive safe pick
pub fn payout_curve(tiles: u8, mines: u8, house_edge_bps: u32) -> Vec<u64> {
    (1..=(tiles.saturating_sub(mines)) as usize)
        .map(|k| multiplier_for(tiles, mines, k, house_edge_bps))
        .collect()
}

pub fn resolve(floats: &[f64], tiles: u8, mines: u8, picks: &[u8], house_edge_bps: u32) -> Outcome {
    let board = shuffle_board(floats, tiles, mines);
    let mine_positions: Vec<u8> = board
        .iter()
        .enumerate()
        .filter(|(_, is_mine)| **is_mine)
        .map(|(i, _)| i as u8)
        .collect();

    let mut revealed = Vec::with_capacity(picks.len());
    let mut hit_mine = false;
    for &pick in picks {
        revealed.push(pick);
        if board[pick as usize] {
            hit_mine = true;
            break;
        }
    }

    let multiplier = if hit_mine {
        0
    } else {
        multiplier_for(tiles, mines, revealed.len(), house_edge_bps)
    };

    Outcome::Sweeper {
        mine_positions,
        revealed,
        hit_mine,
        multiplier,
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}
