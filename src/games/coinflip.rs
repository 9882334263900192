use super::types::{CoinSide, Outcome};

pub fn flip(f: f64) -> CoinSide {
    if f < 0.5 {
        CoinSide::Heads
    } else {
        CoinSide::Tails
    }
}

pub fn resolve(f: f64, called: CoinSide) -> Outcome {
    Outcome::CoinFlip {
        result: flip(f),
        called,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold() {
        assert_eq!(flip(0.0), CoinSide::Heads);
        assert_eq!(flip(0.499_999), CoinSide::Heads);
        assert_eq!(flip(0.5), CoinSide::Tails);
    }

    #[test]
    fn test_called_side_is_kept() {
        assert_eq!(
            resolve(0.7, CoinSide::Heads),
            Outcome::CoinFlip {
                result: CoinSide::Tails,
                called: CoinSide::Heads
            }
        );
    }
}
