//! Block reward schedule, reward splitting and the append-only block history

use crate::difficulty::Difficulty;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Base reward for blocks up to `REWARD_STEP_BLOCK`
pub const INITIAL_BLOCK_REWARD: f64 = 1000.0;
/// Base reward after the single step-down
pub const REDUCED_BLOCK_REWARD: f64 = 500.0;
/// Last block paying the initial reward
pub const REWARD_STEP_BLOCK: u64 = 1000;

pub const POOL_FEE_RATE: f64 = 0.01;
pub const WINNER_RATE: f64 = 0.49;
pub const SHARED_RATE: f64 = 0.50;

/// Calculate base block reward with the one-time step-down
pub fn base_reward(block_number: u64) -> f64 {
    if block_number <= REWARD_STEP_BLOCK {
        INITIAL_BLOCK_REWARD
    } else {
        REDUCED_BLOCK_REWARD
    }
}

/// Name of the i-th synthetic miner (1-based)
pub fn synthetic_miner_name(index: u32) -> String {
    format!("Miner_{}", index)
}

/// How a round was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStrategy {
    /// Closed by a share the player submitted; the player wins
    SelfMining,
    /// Closed by pool aggregation; the winner is drawn uniformly
    PoolWide,
}

/// A settlement participant and its share count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    pub valid_shares: u32,
}

impl Participant {
    pub fn new(name: impl Into<String>, valid_shares: u32) -> Self {
        Self {
            name: name.into(),
            valid_shares,
        }
    }
}

/// Reward paid to one participant of a block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinerReward {
    pub name: String,
    pub reward: f64,
    pub valid_shares: u32,
    pub is_winner: bool,
}

/// Reward split for one block
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardSplit {
    pub block_number: u64,
    pub base_reward: f64,
    /// Recorded only, paid to nobody
    pub pool_fee: f64,
    pub winner_share: f64,
    /// Divided pro-rata by valid shares
    pub shared_share: f64,
}

impl RewardSplit {
    pub fn for_block(block_number: u64) -> Self {
        let base = base_reward(block_number);
        Self {
            block_number,
            base_reward: base,
            pool_fee: base * POOL_FEE_RATE,
            winner_share: base * WINNER_RATE,
            shared_share: base * SHARED_RATE,
        }
    }

    /// Pay every participant its pro-rata part of the shared pool plus the
    /// winner share for the participant at `winner`
    pub fn distribute(&self, participants: &[Participant], winner: Option<usize>) -> Vec<MinerReward> {
        let total_shares: u64 = participants.iter().map(|p| u64::from(p.valid_shares)).sum();
        if total_shares == 0 && !participants.is_empty() {
            warn!(
                "Block {} settles with zero participant shares, shared reward unallocated",
                self.block_number
            );
        }

        participants
            .iter()
            .enumerate()
            .map(|(index, participant)| {
                let is_winner = winner == Some(index);
                let pro_rata = if total_shares > 0 {
                    self.shared_share * f64::from(participant.valid_shares) / total_shares as f64
                } else {
                    0.0
                };
                let reward = if is_winner { self.winner_share + pro_rata } else { pro_rata };

                MinerReward {
                    name: participant.name.clone(),
                    reward,
                    valid_shares: participant.valid_shares,
                    is_winner,
                }
            })
            .collect()
    }
}

/// Participants of a round closed by the player's share.
///
/// The player comes first; the rest of the pool's shares are divided evenly
/// (floored) among the synthetic miners.
pub fn self_mining_participants(
    player_name: &str,
    player_shares: u32,
    required_shares: u32,
    active_miners: u32,
) -> Vec<Participant> {
    let mut participants = vec![Participant::new(player_name, player_shares)];

    let remaining = required_shares.saturating_sub(player_shares);
    if active_miners == 0 || remaining == 0 {
        return participants;
    }

    let per_miner = remaining / active_miners;
    let mut left = remaining;
    for index in 1..=active_miners {
        let shares = per_miner.min(left);
        if shares == 0 {
            break;
        }
        participants.push(Participant::new(synthetic_miner_name(index), shares));
        left -= shares;
    }

    participants
}

/// Participants of a round closed by pool aggregation.
///
/// Each synthetic miner draws a share count in `0..1000`; the player joins
/// only with a positive share count.
pub fn pool_wide_participants<R: Rng + ?Sized>(
    rng: &mut R,
    player_name: &str,
    player_shares: u32,
    active_miners: u32,
) -> Vec<Participant> {
    let mut participants: Vec<Participant> = (1..=active_miners)
        .map(|index| Participant::new(synthetic_miner_name(index), rng.gen_range(0..1000)))
        .collect();

    if player_shares > 0 {
        participants.push(Participant::new(player_name, player_shares));
    }

    participants
}

/// Draw a winner uniformly among the participants
pub fn pick_winner<R: Rng + ?Sized>(rng: &mut R, participants: &[Participant]) -> Option<usize> {
    if participants.is_empty() {
        None
    } else {
        Some(rng.gen_range(0..participants.len()))
    }
}

/// Settled block record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub number: u64,
    /// Base reward for the block
    pub reward: f64,
    pub winner_name: String,
    pub miner_rewards: Vec<MinerReward>,
    pub pool_fee: f64,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub difficulty_at_close: Difficulty,
    pub total_hashes_at_close: u64,
    pub valid_shares_at_close: u32,
    pub representative_hash: String,
    pub strategy: SettlementStrategy,
    /// Reward credited to the player by this block
    pub personal_reward: f64,
}

impl BlockRecord {
    pub fn total_paid(&self) -> f64 {
        self.miner_rewards.iter().map(|m| m.reward).sum()
    }
}

/// Leaderboard row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub name: String,
    pub balance: f64,
}

/// Append-only ledger of settled blocks in block-number order
#[derive(Debug, Clone, Default)]
pub struct BlockHistory {
    records: Vec<BlockRecord>,
}

impl BlockHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: BlockRecord) {
        if let Some(last) = self.records.last() {
            if record.number <= last.number {
                warn!(
                    "Block {} appended after block {}, history out of order",
                    record.number, last.number
                );
            }
        }
        debug!("Block {} appended to history", record.number);
        self.records.push(record);
    }

    pub fn records(&self) -> &[BlockRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&BlockRecord> {
        self.records.last()
    }

    /// Last `count` records, oldest first
    pub fn recent(&self, count: usize) -> &[BlockRecord] {
        let start = self.records.len().saturating_sub(count);
        &self.records[start..]
    }

    /// Seconds between the two most recent blocks
    pub fn last_interval_secs(&self) -> Option<f64> {
        match self.recent(2) {
            [previous, last] => Some(last.timestamp.saturating_sub(previous.timestamp) as f64 / 1000.0),
            _ => None,
        }
    }

    /// Sum of base rewards over all blocks
    pub fn total_base_rewards(&self) -> f64 {
        self.records.iter().map(|r| r.reward).sum()
    }

    /// Participants ranked by lifetime rewards.
    ///
    /// The player is added with `player_balance` if they hold a positive
    /// balance but never appear in a reward list.
    pub fn top_participants(&self, limit: usize, player_name: &str, player_balance: f64) -> Vec<LeaderboardEntry> {
        let mut balances: HashMap<&str, f64> = HashMap::new();
        for record in &self.records {
            for miner in &record.miner_rewards {
                *balances.entry(miner.name.as_str()).or_insert(0.0) += miner.reward;
            }
        }

        let mut entries: Vec<LeaderboardEntry> = balances
            .into_iter()
            .map(|(name, balance)| LeaderboardEntry {
                name: name.to_string(),
                balance,
            })
            .collect();

        if player_balance > 0.0 && !entries.iter().any(|e| e.name == player_name) {
            entries.push(LeaderboardEntry {
                name: player_name.to_string(),
                balance: player_balance,
            });
        }

        entries.sort_by(|a, b| {
            b.balance
                .partial_cmp(&a.balance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        entries.truncate(limit);
        entries
    }
}
