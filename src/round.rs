//! Per-block round counters

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::time::Instant;

/// Valid shares needed to close every block
pub const REQUIRED_SHARES_PER_BLOCK: u32 = 1000;

/// Shares required for a block; constant across block numbers
pub fn required_shares_for_block(_block_number: u64) -> u32 {
    REQUIRED_SHARES_PER_BLOCK
}

/// Most recent accepted share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidSubmission {
    pub hash: String,
    pub contributor: String,
}

/// Counters for the block currently being mined
#[derive(Debug, Clone)]
pub struct RoundState {
    block_number: u64,
    required_shares: u32,
    valid_shares: u32,
    pool_valid_shares: u32,
    pool_raw_hashes: u64,
    round_start: Instant,
    submitted_hashes: HashSet<String>,
    last_valid: Option<ValidSubmission>,
}

/// Owned copy of the round counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundSnapshot {
    pub block_number: u64,
    pub required_shares: u32,
    pub valid_shares: u32,
    pub pool_valid_shares: u32,
    pub pool_raw_hashes: u64,
    pub elapsed_secs: f64,
    pub submitted_hashes: usize,
}

impl RoundState {
    pub fn new(now: Instant) -> Self {
        Self {
            block_number: 1,
            required_shares: required_shares_for_block(1),
            valid_shares: 0,
            pool_valid_shares: 0,
            pool_raw_hashes: 0,
            round_start: now,
            submitted_hashes: HashSet::new(),
            last_valid: None,
        }
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn required_shares(&self) -> u32 {
        self.required_shares
    }

    pub fn valid_shares(&self) -> u32 {
        self.valid_shares
    }

    pub fn pool_valid_shares(&self) -> u32 {
        self.pool_valid_shares
    }

    pub fn pool_raw_hashes(&self) -> u64 {
        self.pool_raw_hashes
    }

    pub fn round_start(&self) -> Instant {
        self.round_start
    }

    pub fn last_valid(&self) -> Option<&ValidSubmission> {
        self.last_valid.as_ref()
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted_hashes.len()
    }

    pub fn elapsed_secs(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.round_start).as_secs_f64()
    }

    pub fn is_complete(&self) -> bool {
        self.pool_valid_shares >= self.required_shares
    }

    /// Record a hash for duplicate detection; false if already seen this round
    pub(crate) fn remember_hash(&mut self, hash: &str) -> bool {
        if self.submitted_hashes.contains(hash) {
            return false;
        }
        self.submitted_hashes.insert(hash.to_string());
        true
    }

    /// Remember the most recent accepted share without touching any counter
    pub(crate) fn record_valid(&mut self, hash: &str, contributor: &str) {
        self.last_valid = Some(ValidSubmission {
            hash: hash.to_string(),
            contributor: contributor.to_string(),
        });
    }

    pub(crate) fn credit_player_share(&mut self, hash: &str, contributor: &str) {
        self.valid_shares = (self.valid_shares + 1).min(self.required_shares);
        self.record_valid(hash, contributor);
    }

    /// Count a player share toward pool progress
    pub(crate) fn credit_pool_share(&mut self) {
        self.pool_valid_shares = (self.pool_valid_shares + 1).min(self.required_shares);
    }

    pub(crate) fn add_raw_hashes(&mut self, hashes: u64) {
        self.pool_raw_hashes = self.pool_raw_hashes.saturating_add(hashes);
    }

    pub(crate) fn set_pool_valid_shares(&mut self, shares: u32) {
        self.pool_valid_shares = shares.min(self.required_shares);
    }

    #[cfg(test)]
    pub(crate) fn set_valid_shares(&mut self, shares: u32) {
        self.valid_shares = shares.min(self.required_shares);
    }

    /// Clamp both share counters to the block requirement
    pub(crate) fn cap_counters(&mut self) {
        self.valid_shares = self.valid_shares.min(self.required_shares);
        self.pool_valid_shares = self.pool_valid_shares.min(self.required_shares);
    }

    /// Reset counters and move on to the next block
    pub(crate) fn advance(&mut self, now: Instant) {
        self.block_number += 1;
        self.required_shares = required_shares_for_block(self.block_number);
        self.valid_shares = 0;
        self.pool_valid_shares = 0;
        self.pool_raw_hashes = 0;
        self.round_start = now;
        self.submitted_hashes.clear();
    }

    pub fn snapshot(&self, now: Instant) -> RoundSnapshot {
        RoundSnapshot {
            block_number: self.block_number,
            required_shares: self.required_shares,
            valid_shares: self.valid_shares,
            pool_valid_shares: self.pool_valid_shares,
            pool_raw_hashes: self.pool_raw_hashes,
            elapsed_secs: self.elapsed_secs(now),
            submitted_hashes: self.submitted_hashes.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_required_shares_constant() {
        for block in [1, 2, 999, 1000, 1001, 50_000] {
            assert_eq!(required_shares_for_block(block), 1000);
        }
    }

    #[test]
    fn test_duplicate_memory() {
        let mut round = RoundState::new(Instant::now());
        assert!(round.remember_hash("abc"));
        assert!(!round.remember_hash("abc"));
        assert_eq!(round.submitted_count(), 1);
    }

    #[test]
    fn test_counters_capped() {
        let mut round = RoundState::new(Instant::now());
        round.set_pool_valid_shares(5_000);
        assert_eq!(round.pool_valid_shares(), 1000);
        assert!(round.is_complete());

        round.set_valid_shares(999);
        round.credit_player_share("a", "You");
        round.credit_player_share("b", "You");
        assert_eq!(round.valid_shares(), 1000);
    }

    #[test]
    fn test_advance_resets_round() {
        let start = Instant::now();
        let mut round = RoundState::new(start);
        round.remember_hash("abc");
        round.credit_player_share("abc", "You");
        round.credit_pool_share();
        round.add_raw_hashes(42);

        let later = start + Duration::from_secs(61);
        round.advance(later);

        assert_eq!(round.block_number(), 2);
        assert_eq!(round.valid_shares(), 0);
        assert_eq!(round.pool_valid_shares(), 0);
        assert_eq!(round.pool_raw_hashes(), 0);
        assert_eq!(round.submitted_count(), 0);
        assert_eq!(round.round_start(), later);
        assert_eq!(round.elapsed_secs(later + Duration::from_secs(2)), 2.0);
    }
}
