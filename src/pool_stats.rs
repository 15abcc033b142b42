//! Pool-wide statistics: synthetic miner activity merged with the player's counters

use crate::difficulty::Difficulty;
use crate::round::RoundState;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

/// Per-miner synthetic hash rate range (H/s) at difficulty 3
const MINER_RATE_MIN: f64 = 900.0;
const MINER_RATE_MAX: f64 = 1200.0;

/// Hash rate scaling per difficulty point above the minimum
const RATE_DECAY: f64 = 0.95;
/// Valid-share yield scaling per difficulty point above the minimum
const VALID_RATE_DECAY: f64 = 0.9;

/// Statistics for the pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub current_block_number: u64,
    /// Synthetic miners plus the player while mining
    pub active_miners: u32,
    pub total_pool_hashes: u64,
    pub pool_valid_shares: u32,
    pub pool_hash_rate: f64,
    pub required_shares: u32,
    pub difficulty: Difficulty,
    pub personal_hashes: u64,
    pub personal_valid_shares: u32,
    pub rejected_hashes: u64,
    pub progress_percent: f64,
    pub average_block_time_secs: f64,
    pub blocks_found: u64,
}

/// Synthesizes the non-player population and derives pool progress
#[derive(Debug, Clone)]
pub struct PoolStatsAggregator {
    active_miners: u32,
    base_valid_rate: f64,
    pool_hash_rate: f64,
    last_update: Instant,
}

impl PoolStatsAggregator {
    pub fn new(active_miners: u32, base_valid_rate: f64, now: Instant) -> Self {
        debug!(
            "Creating pool aggregator with {} synthetic miners, base valid rate {}",
            active_miners, base_valid_rate
        );

        Self {
            active_miners,
            base_valid_rate,
            pool_hash_rate: 0.0,
            last_update: now,
        }
    }

    pub fn active_miners(&self) -> u32 {
        self.active_miners
    }

    /// Displayed pool hash rate from the last tick
    pub fn pool_hash_rate(&self) -> f64 {
        self.pool_hash_rate
    }

    /// Synthetic hash rate at a difficulty for one jitter draw
    pub fn synthetic_hash_rate<R: Rng + ?Sized>(&self, rng: &mut R, difficulty: Difficulty) -> f64 {
        let per_miner = rng.gen_range(MINER_RATE_MIN..MINER_RATE_MAX);
        f64::from(self.active_miners) * per_miner * RATE_DECAY.powf(difficulty.excess())
    }

    /// Advance the synthetic pool to `now` and recompute pool progress.
    ///
    /// `player_base_rate` is the player's base hash rate while mining.
    /// Returns true when the pool has reached the block requirement.
    pub fn tick<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        now: Instant,
        difficulty: Difficulty,
        round: &mut RoundState,
        player_base_rate: Option<f64>,
    ) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.last_update = now;

        let synthetic_rate = self.synthetic_hash_rate(rng, difficulty);
        round.add_raw_hashes((synthetic_rate * elapsed).floor() as u64);

        let rate_factor = RATE_DECAY.powf(difficulty.excess());
        self.pool_hash_rate = synthetic_rate + player_base_rate.map_or(0.0, |rate| rate * rate_factor);

        let valid_rate = self.base_valid_rate * VALID_RATE_DECAY.powf(difficulty.excess());
        let synthetic_valid = (round.pool_raw_hashes() as f64 * valid_rate).floor();
        let synthetic_valid = synthetic_valid.min(f64::from(u32::MAX)) as u32;
        round.set_pool_valid_shares(synthetic_valid.saturating_add(round.valid_shares()));

        debug!(
            "Pool tick: {:.0} H/s, raw={}, valid={}/{}",
            self.pool_hash_rate,
            round.pool_raw_hashes(),
            round.pool_valid_shares(),
            round.required_shares()
        );

        round.is_complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    #[test]
    fn test_no_miners_tracks_player_only() {
        let start = Instant::now();
        let mut rng = StdRng::seed_from_u64(3);
        let mut round = RoundState::new(start);
        round.set_valid_shares(12);

        let mut aggregator = PoolStatsAggregator::new(0, 0.001, start);
        let complete = aggregator.tick(&mut rng, start + Duration::from_secs(1), Difficulty::MIN, &mut round, None);

        assert!(!complete);
        assert_eq!(round.pool_raw_hashes(), 0);
        assert_eq!(round.pool_valid_shares(), 12);
        assert_eq!(aggregator.pool_hash_rate(), 0.0);
    }

    #[test]
    fn test_synthetic_rate_within_jitter() {
        let start = Instant::now();
        let mut rng = StdRng::seed_from_u64(11);
        let aggregator = PoolStatsAggregator::new(10, 0.001, start);

        for _ in 0..100 {
            let rate = aggregator.synthetic_hash_rate(&mut rng, Difficulty::MIN);
            assert!((9_000.0..12_000.0).contains(&rate));
        }

        let hard = aggregator.synthetic_hash_rate(&mut rng, Difficulty::MAX);
        assert!(hard < 12_000.0 * 0.95f64.powi(5) + 1e-6);
    }

    #[test]
    fn test_pool_completes_without_player() {
        let start = Instant::now();
        let mut rng = StdRng::seed_from_u64(5);
        let mut round = RoundState::new(start);
        let mut aggregator = PoolStatsAggregator::new(100, 0.001, start);

        // ~105k H/s * 0.001 => ~105 valid/s, 1000 reached within 12 ticks
        let mut completed_at = None;
        for second in 1..=20 {
            let now = start + Duration::from_secs(second);
            if aggregator.tick(&mut rng, now, Difficulty::MIN, &mut round, None) {
                completed_at = Some(second);
                break;
            }
        }

        assert!(completed_at.is_some());
        assert_eq!(round.pool_valid_shares(), 1000);
    }

    #[test]
    fn test_player_rate_included_while_mining() {
        let start = Instant::now();
        let mut rng = StdRng::seed_from_u64(9);
        let mut round = RoundState::new(start);
        let mut aggregator = PoolStatsAggregator::new(0, 0.001, start);

        aggregator.tick(&mut rng, start, Difficulty::from_value(4.0), &mut round, Some(50_000.0));
        assert!((aggregator.pool_hash_rate() - 47_500.0).abs() < 1e-6);
    }
}
