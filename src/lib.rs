//! Cooperative mining pool simulation engine
//!
//! This crate models a "mining pool" game where one player and a synthesized
//! population of competing miners accumulate valid shares toward a block:
//! - Shares are accepted by a two-stage prefix / bounded-digit rule
//! - Difficulty self-adjusts in 0.25 steps toward a 60 second block time
//! - Completed blocks split 99% of the reward among participants (1% pool fee)
//! - An energy resource gates how long the player can mine
//! - Pool-wide rates and totals are aggregated every second

pub mod account;
pub mod difficulty;
pub mod energy;
pub mod engine;
pub mod events;
pub mod pool_stats;
pub mod rewards;
pub mod round;
pub mod share;
pub mod simulation;
pub mod storage;

pub use account::{AccountState, BalanceStats, UpgradeInfo, UpgradeReceipt};
pub use difficulty::{
    AdjustmentReason, Difficulty, DifficultyAdjustmentRecord, DifficultyChange, DifficultyController,
    DifficultyStats,
};
pub use energy::{DailyMission, EnergyModel, EnergySnapshot, MissionStatus};
pub use engine::MiningEngine;
pub use events::{EngineEvent, EventBus};
pub use pool_stats::{PoolStats, PoolStatsAggregator};
pub use rewards::{BlockHistory, BlockRecord, LeaderboardEntry, MinerReward, Participant, RewardSplit, SettlementStrategy};
pub use round::{RoundSnapshot, RoundState, REQUIRED_SHARES_PER_BLOCK};
pub use share::{acceptance_probability, evaluate_pool_share, evaluate_share, meets_difficulty, ShareRejection};
pub use simulation::{PoolSimulation, ShareOutcome};
pub use storage::{MemoryStorage, NetworkStats, PoolStorage, UserRecord};

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Insufficient energy to start mining: {current:.2} kW")]
    InsufficientEnergy { current: f64 },

    #[error("Maximum upgrade level reached: {level}")]
    MaxUpgradeLevel { level: u32 },

    #[error("Insufficient funds: balance {balance:.2} < cost {cost:.2}")]
    InsufficientFunds { balance: f64, cost: f64 },

    #[error("Daily mission on cooldown: {remaining_secs}s remaining")]
    MissionCooldown { remaining_secs: u64 },

    #[error("Malformed hash: {0}")]
    MalformedHash(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Upper bound on synthetic competing miners
pub const MAX_ACTIVE_MINERS: u32 = 10_000;

/// Configuration for the pool simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Target block time in seconds
    pub target_block_time_secs: f64,
    /// Difficulty of the first round (quantized on load)
    pub initial_difficulty: f64,
    /// Energy ceiling before bonuses (kW)
    pub max_energy: f64,
    /// Seconds of continuous mining that drain a full battery
    pub energy_drain_time_secs: f64,
    /// Seconds of idle charging that refill an empty battery
    pub energy_charge_time_secs: f64,
    /// Number of synthetic competing miners
    pub active_miners: u32,
    /// Fraction of raw synthetic hashes that count as valid at difficulty 3
    pub base_valid_rate: f64,
    /// Self-mining tick period (milliseconds)
    pub mining_tick_ms: u64,
    /// Pool aggregation and energy tick period (milliseconds)
    pub pool_tick_ms: u64,
    /// Difficulty reassessment period (seconds)
    pub difficulty_tick_secs: u64,
    /// Upgrade cost at level 0
    pub upgrade_base_cost: f64,
    /// Cost multiplier per purchased level
    pub upgrade_cost_multiplier: f64,
    /// Highest purchasable upgrade level
    pub max_upgrade_level: u32,
    /// Hash rate bonus per upgrade level (0.05 = 5%)
    pub upgrade_speed_bonus: f64,
    /// Hash rate of a 4-core machine at level 0 (H/s)
    pub base_hash_rate: f64,
    /// Overrides the detected CPU core count
    pub cpu_cores: Option<usize>,
    /// Energy granted by the daily mission (kW)
    pub daily_bonus_amount: f64,
    /// Minimum time between daily mission claims (seconds)
    pub daily_bonus_cooldown_secs: u64,
    /// Name the player appears under in block history
    pub player_name: String,
    /// Key used for the player's record in storage
    pub user_id: String,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
    /// Seed for the random source; entropy when absent
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_block_time_secs: 60.0,
            initial_difficulty: 3.0,
            max_energy: 100.0,
            energy_drain_time_secs: 3_600.0,
            energy_charge_time_secs: 7_200.0,
            active_miners: 15,
            base_valid_rate: 0.001,
            mining_tick_ms: 100,
            pool_tick_ms: 1_000,
            difficulty_tick_secs: 30,
            upgrade_base_cost: 100.0,
            upgrade_cost_multiplier: 3.0,
            max_upgrade_level: 50,
            upgrade_speed_bonus: 0.05,
            base_hash_rate: 50_000.0,
            cpu_cores: None,
            daily_bonus_amount: 50.0,
            daily_bonus_cooldown_secs: 12 * 60 * 60,
            player_name: "You".to_string(),
            user_id: "local-player".to_string(),
            event_capacity: 1024,
            rng_seed: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn with_active_miners(mut self, miners: u32) -> Self {
        if miners > MAX_ACTIVE_MINERS {
            warn!("Active miner count {} exceeds {}, clamping", miners, MAX_ACTIVE_MINERS);
            self.active_miners = MAX_ACTIVE_MINERS;
        } else {
            self.active_miners = miners;
        }
        self
    }

    pub fn with_cpu_cores(mut self, cores: usize) -> Self {
        self.cpu_cores = Some(cores.max(1));
        self
    }

    pub fn with_energy(mut self, max_energy: f64, drain_time_secs: f64, charge_time_secs: f64) -> Self {
        self.max_energy = max_energy;
        self.energy_drain_time_secs = drain_time_secs;
        self.energy_charge_time_secs = charge_time_secs;
        self
    }

    pub fn with_initial_difficulty(mut self, difficulty: f64) -> Self {
        self.initial_difficulty = difficulty;
        self
    }

    pub fn with_player(mut self, user_id: impl Into<String>, player_name: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self.player_name = player_name.into();
        self
    }

    /// Reject values the simulation cannot run with
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("target_block_time_secs", self.target_block_time_secs),
            ("max_energy", self.max_energy),
            ("energy_drain_time_secs", self.energy_drain_time_secs),
            ("energy_charge_time_secs", self.energy_charge_time_secs),
            ("base_hash_rate", self.base_hash_rate),
            ("upgrade_base_cost", self.upgrade_base_cost),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(EngineError::InvalidConfig(format!("{} must be positive, got {}", name, value)));
            }
        }

        if !(Difficulty::MIN.value()..=Difficulty::MAX.value()).contains(&self.initial_difficulty) {
            return Err(EngineError::InvalidConfig(format!(
                "initial_difficulty {} outside [{}, {}]",
                self.initial_difficulty,
                Difficulty::MIN.value(),
                Difficulty::MAX.value()
            )));
        }

        if self.active_miners > MAX_ACTIVE_MINERS {
            return Err(EngineError::InvalidConfig(format!(
                "active_miners {} exceeds {}",
                self.active_miners, MAX_ACTIVE_MINERS
            )));
        }

        if self.mining_tick_ms == 0 || self.pool_tick_ms == 0 || self.difficulty_tick_secs == 0 {
            return Err(EngineError::InvalidConfig("tick periods must be non-zero".to_string()));
        }

        if !(0.0..=1.0).contains(&self.base_valid_rate) {
            return Err(EngineError::InvalidConfig(format!(
                "base_valid_rate {} outside [0, 1]",
                self.base_valid_rate
            )));
        }

        if self.upgrade_cost_multiplier < 1.0 {
            return Err(EngineError::InvalidConfig("upgrade_cost_multiplier must be >= 1".to_string()));
        }

        if self.daily_bonus_amount < 0.0 {
            return Err(EngineError::InvalidConfig("daily_bonus_amount must not be negative".to_string()));
        }

        if self.event_capacity == 0 {
            return Err(EngineError::InvalidConfig("event_capacity must be non-zero".to_string()));
        }

        Ok(())
    }

    /// Energy drained per second while mining
    pub fn energy_drain_rate(&self) -> f64 {
        self.max_energy / self.energy_drain_time_secs
    }

    /// Energy recovered per second while charging
    pub fn energy_charge_rate(&self) -> f64 {
        self.max_energy / self.energy_charge_time_secs
    }

    /// CPU cores used for the base hash rate tier
    pub fn effective_cpu_cores(&self) -> usize {
        self.cpu_cores.unwrap_or_else(num_cpus::get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.target_block_time_secs, 60.0);
        assert_eq!(config.initial_difficulty, 3.0);
        assert_eq!(config.max_upgrade_level, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_energy_rates() {
        let config = EngineConfig::default().with_energy(100.0, 50.0, 200.0);
        assert_eq!(config.energy_drain_rate(), 2.0);
        assert_eq!(config.energy_charge_rate(), 0.5);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig::default().with_initial_difficulty(9.0);
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));

        let config = EngineConfig::default().with_energy(0.0, 10.0, 10.0);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.pool_tick_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_partial_json() {
        let config: EngineConfig = serde_json::from_str(r#"{"active_miners": 3, "rng_seed": 9}"#).unwrap();
        assert_eq!(config.active_miners, 3);
        assert_eq!(config.rng_seed, Some(9));
        assert_eq!(config.max_energy, 100.0);
    }

    #[test]
    fn test_active_miner_clamp() {
        let config = EngineConfig::default().with_active_miners(50_000);
        assert_eq!(config.active_miners, MAX_ACTIVE_MINERS);
    }

    #[test]
    fn test_json_miner_count_above_cap_rejected() {
        let config: EngineConfig = serde_json::from_str(r#"{"active_miners": 4294967295}"#).unwrap();
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));

        let config: EngineConfig = serde_json::from_str(r#"{"active_miners": 10000}"#).unwrap();
        assert!(config.validate().is_ok());
    }
}
