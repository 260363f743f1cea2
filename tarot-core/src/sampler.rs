//! Card drawing.
//!
//! Draws distinct cards without replacement from a pool of the deck and
//! flips an independent fair coin per card for its orientation.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of major arcana at the front of the deck.
pub const MAJOR_ARCANA: usize = 22;

/// Number of minor arcana at the back of the deck.
pub const MINOR_ARCANA: usize = 56;

/// Error type for card sampling.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("Cannot draw {required} cards from the {pool} pool of {available}")]
    InsufficientPool {
        pool: PoolMode,
        available: usize,
        required: usize,
    },

    #[error("Unknown pool mode: {0}")]
    UnknownPool(String),
}

/// Which part of the deck is eligible for a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PoolMode {
    /// The whole deck.
    #[default]
    All,
    /// The first 22 cards.
    MajorOnly,
    /// The last 56 cards.
    MinorOnly,
}

impl PoolMode {
    /// Select the eligible keys from the deck, in deck order.
    pub fn select<'a>(&self, deck: &'a [String]) -> &'a [String] {
        match self {
            PoolMode::All => deck,
            PoolMode::MajorOnly => &deck[..deck.len().min(MAJOR_ARCANA)],
            PoolMode::MinorOnly => &deck[deck.len().saturating_sub(MINOR_ARCANA)..],
        }
    }
}

impl fmt::Display for PoolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolMode::All => write!(f, "all"),
            PoolMode::MajorOnly => write!(f, "major-only"),
            PoolMode::MinorOnly => write!(f, "minor-only"),
        }
    }
}

impl FromStr for PoolMode {
    type Err = SampleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" | "0" => Ok(PoolMode::All),
            "major-only" | "major" | "1" => Ok(PoolMode::MajorOnly),
            "minor-only" | "minor" | "2" => Ok(PoolMode::MinorOnly),
            other => Err(SampleError::UnknownPool(other.to_string())),
        }
    }
}

/// The result of a draw, one entry per spread position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draw {
    /// Card keys in position order, pairwise distinct.
    pub cards: Vec<String>,
    /// Orientation per position; `true` means reversed.
    pub reversed: Vec<bool>,
}

impl Draw {
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Iterate `(card_key, reversed)` in position order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.cards
            .iter()
            .map(String::as_str)
            .zip(self.reversed.iter().copied())
    }
}

/// Draws cards from a deck.
#[derive(Debug, Clone, Default)]
pub struct CardSampler;

impl CardSampler {
    pub fn new() -> Self {
        Self
    }

    /// Draw `count` distinct cards from the pool.
    pub fn draw(&self, deck: &[String], pool: PoolMode, count: usize) -> Result<Draw, SampleError> {
        self.draw_with_rng(deck, pool, count, &mut rand::thread_rng())
    }

    /// Draw with a specific RNG (useful for testing).
    pub fn draw_with_rng<R: Rng>(
        &self,
        deck: &[String],
        pool: PoolMode,
        count: usize,
        rng: &mut R,
    ) -> Result<Draw, SampleError> {
        let eligible = pool.select(deck);
        if eligible.len() < count {
            return Err(SampleError::InsufficientPool {
                pool,
                available: eligible.len(),
                required: count,
            });
        }

        let cards: Vec<String> = eligible.choose_multiple(rng, count).cloned().collect();
        let reversed = (0..cards.len()).map(|_| rng.gen_bool(0.5)).collect();

        Ok(Draw { cards, reversed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn deck() -> Vec<String> {
        (0..78).map(|i| format!("card{i:02}")).collect()
    }

    #[test]
    fn test_pool_selection() {
        let deck = deck();
        assert_eq!(PoolMode::All.select(&deck).len(), 78);

        let major = PoolMode::MajorOnly.select(&deck);
        assert_eq!(major.len(), 22);
        assert_eq!(major[0], "card00");
        assert_eq!(major[21], "card21");

        let minor = PoolMode::MinorOnly.select(&deck);
        assert_eq!(minor.len(), 56);
        assert_eq!(minor[0], "card22");
        assert_eq!(minor[55], "card77");
    }

    #[test]
    fn test_draw_is_distinct_and_sized() {
        let deck = deck();
        let sampler = CardSampler::new();
        for _ in 0..200 {
            let draw = sampler.draw(&deck, PoolMode::All, 10).unwrap();
            assert_eq!(draw.cards.len(), 10);
            assert_eq!(draw.reversed.len(), 10);
            let unique: HashSet<_> = draw.cards.iter().collect();
            assert_eq!(unique.len(), 10);
        }
    }

    #[test]
    fn test_draw_respects_pool() {
        let deck = deck();
        let sampler = CardSampler::new();
        let major: HashSet<_> = PoolMode::MajorOnly.select(&deck).iter().collect();
        for _ in 0..100 {
            let draw = sampler.draw(&deck, PoolMode::MajorOnly, 3).unwrap();
            assert!(draw.cards.iter().all(|c| major.contains(c)));
        }
    }

    #[test]
    fn test_whole_pool_can_be_drawn() {
        let deck = deck();
        let draw = CardSampler::new().draw(&deck, PoolMode::MajorOnly, 22).unwrap();
        let unique: HashSet<_> = draw.cards.iter().collect();
        assert_eq!(unique.len(), 22);
    }

    #[test]
    fn test_insufficient_pool() {
        let deck = deck();
        let result = CardSampler::new().draw(&deck, PoolMode::MajorOnly, 23);
        assert!(matches!(
            result,
            Err(SampleError::InsufficientPool {
                pool: PoolMode::MajorOnly,
                available: 22,
                required: 23,
            })
        ));
    }

    #[test]
    fn test_reversal_rate_is_fair_per_position() {
        let deck = deck();
        let sampler = CardSampler::new();
        let mut rng = StdRng::seed_from_u64(7);
        let trials = 4000;
        let mut reversed = [0usize; 3];

        for _ in 0..trials {
            let draw = sampler
                .draw_with_rng(&deck, PoolMode::All, 3, &mut rng)
                .unwrap();
            for (i, r) in draw.reversed.iter().enumerate() {
                if *r {
                    reversed[i] += 1;
                }
            }
        }

        // 5 standard deviations at n=4000 is about 0.04.
        for count in reversed {
            let rate = count as f64 / trials as f64;
            assert!((rate - 0.5).abs() < 0.04, "reversal rate {rate} not near 0.5");
        }
    }

    #[test]
    fn test_seeded_draw_is_reproducible() {
        let deck = deck();
        let sampler = CardSampler::new();
        let a = sampler
            .draw_with_rng(&deck, PoolMode::All, 5, &mut StdRng::seed_from_u64(42))
            .unwrap();
        let b = sampler
            .draw_with_rng(&deck, PoolMode::All, 5, &mut StdRng::seed_from_u64(42))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_pool_mode_parsing() {
        assert_eq!("major-only".parse::<PoolMode>().unwrap(), PoolMode::MajorOnly);
        assert_eq!("2".parse::<PoolMode>().unwrap(), PoolMode::MinorOnly);
        assert_eq!("ALL".parse::<PoolMode>().unwrap(), PoolMode::All);
        assert!("tarot".parse::<PoolMode>().is_err());
    }
}
