//! Player account: balance, lifetime earnings and hash rate upgrades

use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Hash rate multiplier for a CPU core count
pub fn core_multiplier(cores: usize) -> f64 {
    match cores {
        0 | 1 => 0.25,
        2 => 0.65,
        3 | 4 => 1.0,
        5 | 6 => 1.2,
        7 | 8 => 1.5,
        _ => 1.75,
    }
}

/// Base hash rate for a core count and upgrade level.
///
/// `jitter` is the per-computation variation factor, nominally 0.9..1.1.
pub fn compute_base_hash_rate(base_rate: f64, cores: usize, level: u32, speed_bonus: f64, jitter: f64) -> f64 {
    let upgrade_bonus = 1.0 + f64::from(level) * speed_bonus;
    (base_rate * core_multiplier(cores) * upgrade_bonus * jitter).floor()
}

/// Upgrade price schedule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UpgradePolicy {
    pub base_cost: f64,
    pub cost_multiplier: f64,
    pub max_level: u32,
    pub speed_bonus: f64,
}

impl UpgradePolicy {
    /// Cost of buying the level after `level`
    pub fn cost(&self, level: u32) -> f64 {
        self.base_cost * self.cost_multiplier.powi(level as i32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalanceStats {
    pub current_balance: f64,
    pub total_mined: f64,
    pub last_reward: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UpgradeInfo {
    pub current_level: u32,
    pub max_level: u32,
    pub cost: f64,
    pub speed_bonus_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UpgradeReceipt {
    pub new_level: u32,
    pub new_balance: f64,
    pub speed_bonus_percent: f64,
}

/// Player account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: f64,
    pub total_mined: f64,
    pub last_reward: f64,
    pub upgrade_level: u32,
    pub base_hash_rate: f64,
    /// Lifetime accepted shares
    pub total_shares: u64,
    /// Blocks that paid the player
    pub blocks_rewarded: u64,
}

impl AccountState {
    pub fn new(base_hash_rate: f64) -> Self {
        Self {
            balance: 0.0,
            total_mined: 0.0,
            last_reward: 0.0,
            upgrade_level: 0,
            base_hash_rate,
            total_shares: 0,
            blocks_rewarded: 0,
        }
    }

    /// Credit a settlement reward; zero rewards leave the account untouched
    pub fn credit(&mut self, reward: f64) {
        if reward <= 0.0 {
            return;
        }
        self.balance += reward;
        self.total_mined += reward;
        self.last_reward = reward;
        self.blocks_rewarded += 1;
    }

    pub fn balance_stats(&self) -> BalanceStats {
        BalanceStats {
            current_balance: self.balance,
            total_mined: self.total_mined,
            last_reward: self.last_reward,
        }
    }

    pub fn upgrade_info(&self, policy: &UpgradePolicy) -> UpgradeInfo {
        UpgradeInfo {
            current_level: self.upgrade_level,
            max_level: policy.max_level,
            cost: policy.cost(self.upgrade_level),
            speed_bonus_percent: self.speed_bonus_percent(policy),
        }
    }

    fn speed_bonus_percent(&self, policy: &UpgradePolicy) -> f64 {
        f64::from(self.upgrade_level) * policy.speed_bonus * 100.0
    }

    /// Buy the next upgrade level.
    ///
    /// Nothing changes on failure. The caller recomputes the hash rate.
    pub fn purchase_upgrade(&mut self, policy: &UpgradePolicy) -> Result<UpgradeReceipt> {
        if self.upgrade_level >= policy.max_level {
            return Err(EngineError::MaxUpgradeLevel {
                level: self.upgrade_level,
            });
        }

        let cost = policy.cost(self.upgrade_level);
        if self.balance < cost {
            return Err(EngineError::InsufficientFunds {
                balance: self.balance,
                cost,
            });
        }

        self.balance -= cost;
        self.upgrade_level += 1;

        info!(
            "Upgrade purchased: level {} for {:.2}, balance now {:.2}",
            self.upgrade_level, cost, self.balance
        );

        Ok(UpgradeReceipt {
            new_level: self.upgrade_level,
            new_balance: self.balance,
            speed_bonus_percent: self.speed_bonus_percent(policy),
        })
    }
}
