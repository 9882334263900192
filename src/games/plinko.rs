//! Plinko board
//!
//! One float per row; below 0.5 the ball bounces left. The bucket is the
//! number of right bounces, so buckets follow Binomial(rows, 1/2).

use super::types::{Bounce, Outcome};
use crate::errors::{EngineError, EngineResult};

pub const MAX_ROWS: usize = 32;

pub fn validate_table(payouts: &[u64]) -> EngineResult<()> {
    if payouts.len() < 2 || payouts.len() > MAX_ROWS + 1 {
        return Err(EngineError::InvalidRequest(format!(
            "plinko table needs 2-{} buckets, got {}",
            MAX_ROWS + 1,
            payouts.len()
        )));
    }
    Ok(())
}

pub fn bounce(f: f64) -> Bounce {
    if f < 0.5 {
        Bounce::Left
    } else {
        Bounce::Right
    }
}

/// `floats` must hold one entry per row (`payouts.len() - 1`).
pub fn resolve(floats: &[f64], payouts: &[u64]) -> Outcome {
    let rows = payouts.len() - 1;
    let path: Vec<Bounce> = floats.iter().take(rows).map(|f| bounce(*f)).collect();
    let bucket = path.iter().filter(|b| **b == Bounce::Right).count();

    Outcome::Plinko {
        path,
        bucket,
        multiplier: payouts[bucket],
    }
}

/// Expected return of a table in hundredths of the stake
pub fn expected_return(payouts: &[u64]) -> f64 {
    let rows = payouts.len() - 1;
    let total = 2f64.powi(rows as i32);
    payouts
        .iter()
        .enumerate()
        .map(|(k, m)| binomial(rows, k) * *m as f64 / total)
        .sum()
}

fn binomial(n: usize, k: usize) -> f64 {
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::rng::{derive, expand};

    const TABLE: [u64; 9] = [560, 210, 110, 100, 50, 100, 110, 210, 560];

    #[test]
    fn test_path_counts_rights() {
        let floats = [0.1, 0.9, 0.5, 0.49, 0.7, 0.2, 0.3, 0.99];
        match resolve(&floats, &TABLE) {
            Outcome::Plinko {
                path,
                bucket,
                multiplier,
            } => {
                assert_eq!(path.len(), 8);
                assert_eq!(bucket, 4);
                assert_eq!(multiplier, 50);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_default_table_rtp() {
        let rtp = expected_return(&TABLE);
        assert!((rtp - 99.0).abs() < 1.0, "rtp was {}", rtp);
    }

    #[test]
    fn test_bucket_distribution_is_binomial() {
        let rounds = 20_000u64;
        let mut counts = [0u64; 9];
        for nonce in 0..rounds {
            let digest = derive("plinko-secret", "plinko-client", nonce).unwrap();
            if let Outcome::Plinko { bucket, .. } = resolve(&expand(&digest, 8), &TABLE) {
                counts[bucket] += 1;
            }
        }

        let chi_square: f64 = counts
            .iter()
            .enumerate()
            .map(|(k, observed)| {
                let expected = rounds as f64 * binomial(8, k) / 256.0;
                (*observed as f64 - expected).powi(2) / expected
            })
            .sum();

        // df = 8, p = 0.0001
        assert!(chi_square < 31.8, "chi-square was {}", chi_square);
    }
}
