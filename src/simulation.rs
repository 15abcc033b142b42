//! Single-writer pool simulation
//!
//! [`PoolSimulation`] owns every piece of mutable game state. Each tick method
//! runs to completion synchronously, so a settlement always sees a consistent
//! set of round counters. The async [`crate::MiningEngine`] serializes access
//! to it behind one mutex.

use crate::account::{compute_base_hash_rate, AccountState, BalanceStats, UpgradeInfo, UpgradePolicy, UpgradeReceipt};
use crate::difficulty::{Difficulty, DifficultyChange, DifficultyController, DifficultyStats};
use crate::energy::{DailyMission, EnergyModel, EnergySnapshot, MissionStatus};
use crate::events::{EngineEvent, EventBus};
use crate::pool_stats::{PoolStats, PoolStatsAggregator};
use crate::rewards::{
    base_reward, pick_winner, pool_wide_participants, self_mining_participants, synthetic_miner_name, BlockHistory,
    BlockRecord, LeaderboardEntry, RewardSplit, SettlementStrategy,
};
use crate::round::{RoundSnapshot, RoundState};
use crate::share::{evaluate_pool_share, evaluate_share, hash_prefix, synthesize_hash, synthesize_pool_hash, ShareRejection};
use crate::storage::UserRecord;
use crate::{EngineConfig, EngineError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Personal hash rate scaling per difficulty point above the minimum
const PERSONAL_RATE_DECAY: f64 = 0.75;
/// Candidate-valid fraction of personal hashes at difficulty 3
const BASE_CANDIDATE_PROBABILITY: f64 = 0.001;
/// Synthetic names used for shares accepted while the player is idle
const IDLE_CONTRIBUTORS: u32 = 10;

/// Fraction of personal hashes worth testing against the acceptance rule
pub fn candidate_probability(difficulty: Difficulty) -> f64 {
    BASE_CANDIDATE_PROBABILITY * 0.1f64.powf(difficulty.excess())
}

/// Result of submitting one hash
#[derive(Debug, Clone, PartialEq)]
pub enum ShareOutcome {
    /// Counted; carries the block if this share closed the round
    Accepted { block: Option<BlockRecord> },
    Rejected(ShareRejection),
}

/// Maps the monotonic tick clock onto wall-clock milliseconds
#[derive(Debug, Clone, Copy)]
struct SimClock {
    origin: Instant,
    origin_unix_ms: u64,
}

impl SimClock {
    fn new(origin: Instant) -> Self {
        let origin_unix_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Self { origin, origin_unix_ms }
    }

    fn timestamp(&self, now: Instant) -> u64 {
        let offset = now.saturating_duration_since(self.origin).as_millis() as u64;
        self.origin_unix_ms.saturating_add(offset)
    }
}

/// The whole game state
pub struct PoolSimulation {
    config: EngineConfig,
    policy: UpgradePolicy,
    cpu_cores: usize,
    round: RoundState,
    controller: DifficultyController,
    energy: EnergyModel,
    mission: DailyMission,
    account: AccountState,
    aggregator: PoolStatsAggregator,
    history: BlockHistory,
    events: EventBus,
    rng: StdRng,
    clock: SimClock,
    mining: bool,
    mining_epoch: u64,
    personal_hashes: u64,
    rejected_hashes: u64,
    last_hash_update: Instant,
}

impl PoolSimulation {
    pub fn new(config: EngineConfig, events: EventBus, now: Instant) -> Result<Self> {
        config.validate()?;

        let mut rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let policy = UpgradePolicy {
            base_cost: config.upgrade_base_cost,
            cost_multiplier: config.upgrade_cost_multiplier,
            max_level: config.max_upgrade_level,
            speed_bonus: config.upgrade_speed_bonus,
        };
        let cpu_cores = config.effective_cpu_cores();
        let base_hash_rate = compute_base_hash_rate(
            config.base_hash_rate,
            cpu_cores,
            0,
            policy.speed_bonus,
            rng.gen_range(0.9..1.1),
        );

        info!(
            "Creating pool simulation: {} synthetic miners, {} cores, base hash rate {:.0} H/s",
            config.active_miners, cpu_cores, base_hash_rate
        );

        Ok(Self {
            policy,
            cpu_cores,
            round: RoundState::new(now),
            controller: DifficultyController::new(
                Difficulty::from_value(config.initial_difficulty),
                config.target_block_time_secs,
            ),
            energy: EnergyModel::new(
                config.max_energy,
                config.energy_drain_rate(),
                config.energy_charge_rate(),
                now,
            ),
            mission: DailyMission::new(
                config.daily_bonus_amount,
                Duration::from_secs(config.daily_bonus_cooldown_secs),
            ),
            account: AccountState::new(base_hash_rate),
            aggregator: PoolStatsAggregator::new(config.active_miners, config.base_valid_rate, now),
            history: BlockHistory::new(),
            events,
            rng,
            clock: SimClock::new(now),
            mining: false,
            mining_epoch: 0,
            personal_hashes: 0,
            rejected_hashes: 0,
            last_hash_update: now,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_mining(&self) -> bool {
        self.mining
    }

    /// Incremented on every successful start; lets a stale mining loop notice it was replaced
    pub fn mining_epoch(&self) -> u64 {
        self.mining_epoch
    }

    /// Begin self-mining.
    ///
    /// Returns `Ok(false)` when already mining. Refused with
    /// `InsufficientEnergy` (and an `EnergyDepleted` event) on an empty store.
    pub fn start_mining(&mut self, now: Instant) -> Result<bool> {
        if self.mining {
            return Ok(false);
        }

        self.energy.tick(now, false);
        if self.energy.is_depleted() {
            warn!("Cannot start mining: energy depleted");
            self.events.emit(EngineEvent::EnergyDepleted);
            return Err(EngineError::InsufficientEnergy {
                current: self.energy.current(),
            });
        }

        self.mining = true;
        self.mining_epoch += 1;
        self.last_hash_update = now;
        self.energy.set_charging(false);

        info!("Mining started at difficulty {}", self.controller.current());
        self.events.emit(EngineEvent::MiningStateChanged { mining: true });
        Ok(true)
    }

    /// Stop self-mining and switch the energy store to charging.
    ///
    /// Returns false when not mining.
    pub fn stop_mining(&mut self, now: Instant) -> bool {
        if !self.mining {
            return false;
        }

        self.energy.tick(now, true);
        self.mining = false;
        self.personal_hashes = 0;
        self.energy.set_charging(true);

        info!("Mining stopped");
        self.events.emit(EngineEvent::MiningStateChanged { mining: false });
        true
    }

    /// One self-mining step: produce hashes since the last step and test the
    /// expected number of candidates against the acceptance rule
    pub fn mining_tick(&mut self, now: Instant) -> Option<BlockRecord> {
        if !self.mining {
            return None;
        }
        if self.energy.is_depleted() {
            self.stop_mining(now);
            return None;
        }

        let elapsed = now.saturating_duration_since(self.last_hash_update).as_secs_f64();
        self.last_hash_update = now;

        let difficulty = self.controller.current();
        let adjusted_rate = self.account.base_hash_rate * PERSONAL_RATE_DECAY.powf(difficulty.excess());
        let jitter = self.rng.gen_range(0.9..1.1);
        let hashes = (adjusted_rate * elapsed * jitter).floor() as u64;
        self.personal_hashes = self.personal_hashes.saturating_add(hashes);

        let candidates = (hashes as f64 * candidate_probability(difficulty)).floor() as u64;
        debug!("Mining tick: {} hashes, {} candidates at {}", hashes, candidates, difficulty);

        for _ in 0..candidates {
            let hash = synthesize_hash(&mut self.rng);
            if let ShareOutcome::Accepted { block: Some(block) } = self.submit_hash(&hash, now) {
                return Some(block);
            }
        }

        None
    }

    /// Run a hash through the acceptance rule for the current round.
    ///
    /// While mining the share is the player's, and one that fills the round
    /// settles it with the self-mining strategy. While idle it belongs to a
    /// synthetic miner: it only advances pool progress and a round it fills
    /// settles pool-wide.
    pub fn submit_hash(&mut self, hash: &str, now: Instant) -> ShareOutcome {
        let difficulty = self.controller.current();
        let (admitted, strategy) = if self.mining {
            let player = self.config.player_name.clone();
            (
                evaluate_share(&mut self.round, hash, difficulty, &player),
                SettlementStrategy::SelfMining,
            )
        } else {
            let contributor = synthetic_miner_name(self.rng.gen_range(1..=IDLE_CONTRIBUTORS));
            (
                evaluate_pool_share(&mut self.round, hash, difficulty, &contributor),
                SettlementStrategy::PoolWide,
            )
        };

        match admitted {
            Ok(()) => {
                self.round.credit_pool_share();
                if strategy == SettlementStrategy::SelfMining {
                    self.account.total_shares += 1;
                }

                let complete = self.round.is_complete();
                self.events.emit(EngineEvent::ValidHashAccepted {
                    hash_prefix: hash_prefix(hash),
                    difficulty,
                    is_block_complete: complete,
                    reward: if complete { base_reward(self.round.block_number()) } else { 0.0 },
                });

                let block = complete.then(|| self.settle(strategy, now));
                ShareOutcome::Accepted { block }
            }
            Err(reason) => {
                self.rejected_hashes += 1;
                if reason != ShareRejection::InsufficientDifficulty {
                    self.events.emit(EngineEvent::HashRejected {
                        hash_prefix: hash_prefix(hash),
                        reason,
                    });
                }
                ShareOutcome::Rejected(reason)
            }
        }
    }

    /// Aggregate synthetic pool activity; settles pool-wide if the round fills
    pub fn pool_tick(&mut self, now: Instant) -> Option<BlockRecord> {
        let difficulty = self.controller.current();
        let player_rate = self.mining.then_some(self.account.base_hash_rate);
        let complete = self
            .aggregator
            .tick(&mut self.rng, now, difficulty, &mut self.round, player_rate);

        complete.then(|| self.settle(SettlementStrategy::PoolWide, now))
    }

    /// Advance the energy store; stops mining when it runs dry
    pub fn energy_tick(&mut self, now: Instant) -> EnergySnapshot {
        let (snapshot, depleted) = self.energy.tick(now, self.mining);
        if depleted && self.mining {
            self.stop_mining(now);
            self.events.emit(EngineEvent::EnergyDepleted);
        }
        snapshot
    }

    /// Periodic difficulty reassessment
    pub fn difficulty_tick(&mut self, now: Instant) -> Option<DifficultyChange> {
        self.reassess_difficulty(now)
    }

    fn reassess_difficulty(&mut self, now: Instant) -> Option<DifficultyChange> {
        let change = self.controller.reassess(
            self.round.block_number(),
            self.round.elapsed_secs(now),
            self.history.last_interval_secs(),
            self.clock.timestamp(now),
        )?;

        self.events.emit(EngineEvent::DifficultyChanged {
            old: change.old,
            new: change.new,
            reason: change.reason,
            average_block_time_secs: change.average_block_time_secs,
        });
        Some(change)
    }

    /// Close the round: split rewards, record the block, reset counters and
    /// pick the next difficulty
    fn settle(&mut self, strategy: SettlementStrategy, now: Instant) -> BlockRecord {
        self.round.cap_counters();

        let number = self.round.block_number();
        let required = self.round.required_shares();
        let player_shares = self.round.valid_shares();
        let difficulty = self.controller.current();
        let player_name = self.config.player_name.clone();

        let strategy = if strategy == SettlementStrategy::SelfMining && player_shares == 0 {
            debug!("Self-mining settlement without player shares, settling pool-wide");
            SettlementStrategy::PoolWide
        } else {
            strategy
        };

        let (participants, winner) = match strategy {
            SettlementStrategy::SelfMining => (
                self_mining_participants(&player_name, player_shares, required, self.config.active_miners),
                Some(0),
            ),
            SettlementStrategy::PoolWide => {
                let participants =
                    pool_wide_participants(&mut self.rng, &player_name, player_shares, self.config.active_miners);
                let winner = pick_winner(&mut self.rng, &participants);
                (participants, winner)
            }
        };

        let split = RewardSplit::for_block(number);
        let miner_rewards = split.distribute(&participants, winner);
        let winner_name = winner
            .and_then(|index| participants.get(index))
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "unclaimed".to_string());
        let personal_reward = miner_rewards
            .iter()
            .find(|m| m.name == player_name)
            .map_or(0.0, |m| m.reward);

        let representative_hash = match self.round.last_valid() {
            Some(valid) if winner_name == player_name => valid.hash.clone(),
            _ => synthesize_pool_hash(&mut self.rng),
        };

        let record = BlockRecord {
            number,
            reward: split.base_reward,
            winner_name: winner_name.clone(),
            miner_rewards,
            pool_fee: split.pool_fee,
            timestamp: self.clock.timestamp(now),
            difficulty_at_close: difficulty,
            total_hashes_at_close: self.round.pool_raw_hashes(),
            valid_shares_at_close: required,
            representative_hash,
            strategy,
            personal_reward,
        };

        self.history.append(record.clone());
        self.account.credit(personal_reward);

        info!(
            "Block {} settled ({:?}): winner {}, {} participants, personal reward {:.2}",
            number,
            strategy,
            winner_name,
            record.miner_rewards.len(),
            personal_reward
        );
        self.events.emit(EngineEvent::BlockSettled {
            number,
            winner: winner_name,
            personal_reward,
            strategy,
        });

        self.round.advance(now);
        self.reassess_difficulty(now);

        record
    }

    pub fn purchase_upgrade(&mut self) -> Result<UpgradeReceipt> {
        let receipt = self.account.purchase_upgrade(&self.policy)?;
        self.account.base_hash_rate = compute_base_hash_rate(
            self.config.base_hash_rate,
            self.cpu_cores,
            self.account.upgrade_level,
            self.policy.speed_bonus,
            self.rng.gen_range(0.9..1.1),
        );
        debug!("Base hash rate now {:.0} H/s", self.account.base_hash_rate);
        Ok(receipt)
    }

    /// Permanently raise the energy ceiling; callers rate-limit
    pub fn add_energy_bonus(&mut self, amount: f64) -> EnergySnapshot {
        if !amount.is_finite() || amount <= 0.0 {
            warn!("Ignoring non-positive energy bonus {}", amount);
            return self.energy.snapshot();
        }
        self.energy.add_bonus(amount);
        self.events.emit(EngineEvent::EnergyBonusAdded { amount });
        self.energy.snapshot()
    }

    /// Claim the daily mission bonus if its cooldown has passed
    pub fn claim_daily_bonus(&mut self, now: Instant) -> Result<f64> {
        let amount = self.mission.claim(now)?;
        self.add_energy_bonus(amount);
        Ok(amount)
    }

    pub fn mission_status(&self, now: Instant) -> MissionStatus {
        self.mission.status(now)
    }

    pub fn pool_stats(&self) -> PoolStats {
        let required = self.round.required_shares();
        PoolStats {
            current_block_number: self.round.block_number(),
            active_miners: self.aggregator.active_miners() + u32::from(self.mining),
            total_pool_hashes: self.round.pool_raw_hashes().saturating_add(self.personal_hashes),
            pool_valid_shares: self.round.pool_valid_shares(),
            pool_hash_rate: self.aggregator.pool_hash_rate(),
            required_shares: required,
            difficulty: self.controller.current(),
            personal_hashes: self.personal_hashes,
            personal_valid_shares: self.round.valid_shares(),
            rejected_hashes: self.rejected_hashes,
            progress_percent: f64::from(self.round.pool_valid_shares()) / f64::from(required) * 100.0,
            average_block_time_secs: self.controller.average_block_time_secs(),
            blocks_found: self.history.len() as u64,
        }
    }

    pub fn balance_stats(&self) -> BalanceStats {
        self.account.balance_stats()
    }

    pub fn block_history(&self) -> Vec<BlockRecord> {
        self.history.records().to_vec()
    }

    pub fn history(&self) -> &BlockHistory {
        &self.history
    }

    pub fn upgrade_info(&self) -> UpgradeInfo {
        self.account.upgrade_info(&self.policy)
    }

    pub fn top_participants(&self, limit: usize) -> Vec<LeaderboardEntry> {
        self.history
            .top_participants(limit, &self.config.player_name, self.account.balance)
    }

    pub fn account(&self) -> &AccountState {
        &self.account
    }

    pub fn energy(&self) -> EnergySnapshot {
        self.energy.snapshot()
    }

    pub fn round(&self, now: Instant) -> RoundSnapshot {
        self.round.snapshot(now)
    }

    pub fn difficulty(&self) -> Difficulty {
        self.controller.current()
    }

    pub fn difficulty_stats(&self) -> DifficultyStats {
        self.controller.stats()
    }

    /// Player summary for the storage collaborator
    pub fn user_record(&self, now: Instant) -> UserRecord {
        UserRecord {
            user_id: self.config.user_id.clone(),
            username: self.config.player_name.clone(),
            balance: self.account.balance,
            total_shares: self.account.total_shares,
            total_blocks: self.account.blocks_rewarded,
            last_update: self.clock.timestamp(now),
        }
    }

    #[cfg(test)]
    pub(crate) fn round_mut(&mut self) -> &mut RoundState {
        &mut self.round
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::sync::broadcast::Receiver;

    fn config() -> EngineConfig {
        EngineConfig::default()
            .with_seed(17)
            .with_active_miners(0)
            .with_cpu_cores(4)
    }

    fn simulation(config: EngineConfig) -> (PoolSimulation, Receiver<EngineEvent>, Instant) {
        let bus = EventBus::new(4096);
        let rx = bus.subscribe();
        let now = Instant::now();
        let sim = PoolSimulation::new(config, bus, now).unwrap();
        (sim, rx, now)
    }

    fn drain(rx: &mut Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }

    fn share_hash(i: u32) -> String {
        format!("000{:061x}", i)
    }

    #[test]
    fn test_candidate_probability() {
        assert_eq!(candidate_probability(Difficulty::MIN), 0.001);
        assert!((candidate_probability(Difficulty::from_value(4.0)) - 0.0001).abs() < 1e-15);
    }

    #[test]
    fn test_player_fills_block_and_receives_990() {
        let (mut sim, mut rx, now) = simulation(config());
        assert!(sim.start_mining(now).unwrap());

        let mut settled = None;
        for i in 0..1000 {
            match sim.submit_hash(&share_hash(i), now) {
                ShareOutcome::Accepted { block: Some(block) } => settled = Some(block),
                ShareOutcome::Accepted { block: None } => {}
                ShareOutcome::Rejected(reason) => panic!("share {} rejected: {}", i, reason),
            }
        }

        let block = settled.expect("1000th share settles the block");
        assert_eq!(block.number, 1);
        assert_eq!(block.strategy, SettlementStrategy::SelfMining);
        assert_eq!(block.personal_reward, 990.0);
        assert_eq!(block.winner_name, "You");
        assert_eq!(block.valid_shares_at_close, 1000);
        assert_eq!(block.representative_hash, share_hash(999));
        assert_eq!(sim.balance_stats().current_balance, 990.0);
        assert_eq!(sim.balance_stats().total_mined, 990.0);

        let round = sim.round(now);
        assert_eq!(round.block_number, 2);
        assert_eq!(round.valid_shares, 0);
        assert_eq!(round.pool_valid_shares, 0);
        assert_eq!(round.submitted_hashes, 0);

        // Settlement reassesses with a zero-length round: blocks too fast
        assert_eq!(sim.difficulty().value(), 3.25);

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::ValidHashAccepted { is_block_complete: true, reward, .. } if *reward == 1000.0
        )));
        assert!(events.iter().any(|e| matches!(e, EngineEvent::BlockSettled { number: 1, .. })));
        assert!(events.iter().any(|e| matches!(e, EngineEvent::DifficultyChanged { .. })));
    }

    #[test]
    fn test_duplicate_share_rejected_with_event() {
        let (mut sim, mut rx, now) = simulation(config());
        let hash = share_hash(1);

        assert!(matches!(sim.submit_hash(&hash, now), ShareOutcome::Accepted { block: None }));
        assert_eq!(sim.submit_hash(&hash, now), ShareOutcome::Rejected(ShareRejection::Duplicate));
        assert_eq!(sim.pool_stats().rejected_hashes, 1);

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::HashRejected { reason: ShareRejection::Duplicate, .. }
        )));
    }

    #[test]
    fn test_idle_share_attributed_to_synthetic_miner() {
        let (mut sim, _rx, now) = simulation(config());
        sim.submit_hash(&share_hash(5), now);
        let contributor = sim.round.last_valid().map(|v| v.contributor.clone()).unwrap();
        assert!(contributor.starts_with("Miner_"));
        assert_eq!(sim.round(now).valid_shares, 0);
        assert_eq!(sim.round(now).pool_valid_shares, 1);
        assert_eq!(sim.account().total_shares, 0);
    }

    #[test]
    fn test_idle_shares_closing_round_do_not_pay_player() {
        let (mut sim, _rx, now) = simulation(config().with_active_miners(3));

        let mut settled = None;
        for i in 0..1000 {
            match sim.submit_hash(&share_hash(i), now) {
                ShareOutcome::Accepted { block: Some(block) } => settled = Some(block),
                ShareOutcome::Accepted { block: None } => {}
                ShareOutcome::Rejected(reason) => panic!("share {} rejected: {}", i, reason),
            }
        }

        let block = settled.expect("1000th idle share closes the round");
        assert_eq!(block.strategy, SettlementStrategy::PoolWide);
        assert_ne!(block.winner_name, "You");
        assert!(block.miner_rewards.iter().all(|m| m.name != "You"));
        assert_eq!(block.personal_reward, 0.0);
        assert_eq!(sim.balance_stats().current_balance, 0.0);
        assert_eq!(sim.account().blocks_rewarded, 0);
        assert_eq!(sim.round(now).block_number, 2);
    }

    #[test]
    fn test_pool_wide_settlement_without_player_shares() {
        let (mut sim, _rx, now) = simulation(config().with_active_miners(100));

        let mut settled = None;
        for second in 1..=30 {
            if let Some(block) = sim.pool_tick(now + Duration::from_secs(second)) {
                settled = Some(block);
                break;
            }
        }

        let block = settled.expect("pool reaches 1000 shares");
        assert_eq!(block.strategy, SettlementStrategy::PoolWide);
        assert_eq!(block.personal_reward, 0.0);
        assert!(block.miner_rewards.iter().all(|m| m.name != "You"));
        assert!(block.representative_hash.starts_with("000"));
        assert!((block.total_paid() - 990.0).abs() < 1e-6);
        assert_eq!(sim.balance_stats().current_balance, 0.0);
        assert_eq!(sim.account().blocks_rewarded, 0);
        assert_eq!(sim.block_history().len(), 1);
        assert_eq!(sim.round(now).block_number, 2);
    }

    #[test]
    fn test_forced_self_settlement_without_player_falls_back() {
        let (mut sim, _rx, now) = simulation(config().with_active_miners(3));
        sim.round_mut().set_pool_valid_shares(1000);

        let block = sim.settle(SettlementStrategy::SelfMining, now);
        assert_eq!(block.strategy, SettlementStrategy::PoolWide);
        assert_eq!(block.personal_reward, 0.0);
    }

    #[test]
    fn test_energy_depletion_stops_mining() {
        let (mut sim, mut rx, now) = simulation(config().with_energy(1.0, 2.0, 10.0));
        sim.start_mining(now).unwrap();

        sim.energy_tick(now + Duration::from_secs(1));
        assert!(sim.is_mining());

        let snapshot = sim.energy_tick(now + Duration::from_secs(3));
        assert_eq!(snapshot.current, 0.0);
        assert!(!sim.is_mining());

        match sim.start_mining(now + Duration::from_secs(3)) {
            Err(EngineError::InsufficientEnergy { .. }) => {}
            other => panic!("expected insufficient energy, got {:?}", other),
        }

        let events = drain(&mut rx);
        let depleted = events.iter().filter(|e| **e == EngineEvent::EnergyDepleted).count();
        assert_eq!(depleted, 2);
        assert!(events.contains(&EngineEvent::MiningStateChanged { mining: false }));

        // Charging recovers enough to start again
        sim.energy_tick(now + Duration::from_secs(5));
        assert!(sim.energy().current > 0.0);
        assert!(sim.start_mining(now + Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn test_mining_tick_counts_hashes_until_stopped() {
        let (mut sim, _rx, now) = simulation(config());
        sim.start_mining(now).unwrap();

        sim.mining_tick(now + Duration::from_millis(100));
        let hashes = sim.pool_stats().personal_hashes;
        assert!(hashes > 0);
        assert_eq!(sim.pool_stats().active_miners, 1);

        sim.stop_mining(now + Duration::from_millis(200));
        assert_eq!(sim.pool_stats().personal_hashes, 0);
        assert!(sim.mining_tick(now + Duration::from_millis(300)).is_none());
        assert_eq!(sim.pool_stats().personal_hashes, 0);
    }

    #[test]
    fn test_mining_tick_settles_full_round() {
        let config = EngineConfig {
            base_hash_rate: 1e9,
            ..config()
        };
        let (mut sim, _rx, now) = simulation(config);
        sim.start_mining(now).unwrap();
        sim.round_mut().set_pool_valid_shares(999);
        sim.round_mut().set_valid_shares(999);

        let block = sim
            .mining_tick(now + Duration::from_millis(100))
            .expect("one more accepted share closes the round");
        assert_eq!(block.number, 1);
        assert_eq!(block.strategy, SettlementStrategy::SelfMining);
        assert_eq!(block.winner_name, "You");
        assert_eq!(block.personal_reward, 990.0);

        // The tick stops at the settling share
        let round = sim.round(now);
        assert_eq!(round.block_number, 2);
        assert_eq!(round.valid_shares, 0);
        assert_eq!(round.pool_valid_shares, 0);
        assert!(sim.is_mining());
    }

    #[test]
    fn test_upgrade_purchase_paths() {
        let (mut sim, _rx, _now) = simulation(config());
        match sim.purchase_upgrade() {
            Err(EngineError::InsufficientFunds { .. }) => {}
            other => panic!("expected insufficient funds, got {:?}", other),
        }
        assert_eq!(sim.upgrade_info().current_level, 0);

        sim.account.balance = 100.0;
        let receipt = sim.purchase_upgrade().unwrap();
        assert_eq!(receipt.new_level, 1);
        assert_eq!(receipt.new_balance, 0.0);
        assert!(sim.account().base_hash_rate >= (50_000.0 * 1.05 * 0.9f64).floor());
        assert_eq!(sim.upgrade_info().cost, 300.0);
    }

    #[test]
    fn test_difficulty_tick_relieves_slow_block() {
        let (mut sim, mut rx, now) = simulation(config().with_initial_difficulty(5.0));
        let change = sim.difficulty_tick(now + Duration::from_secs(120)).unwrap();
        assert_eq!(change.old.value(), 5.0);
        assert_eq!(change.new.value(), 4.5);
        assert_eq!(sim.pool_stats().difficulty.value(), 4.5);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, EngineEvent::DifficultyChanged { .. })));
    }

    #[test]
    fn test_snapshots_are_stable() {
        let (mut sim, _rx, now) = simulation(config());
        sim.account.balance = 12.5;
        assert_eq!(sim.balance_stats(), sim.balance_stats());
        assert_eq!(sim.pool_stats(), sim.pool_stats());
        assert_eq!(sim.round(now), sim.round(now));
    }

    #[test]
    fn test_daily_bonus() {
        let (mut sim, mut rx, now) = simulation(config());
        assert_eq!(sim.claim_daily_bonus(now).unwrap(), 50.0);
        assert_eq!(sim.energy().max, 150.0);
        assert!(sim.claim_daily_bonus(now + Duration::from_secs(60)).is_err());
        assert!(!sim.mission_status(now).available);
        assert!(drain(&mut rx).contains(&EngineEvent::EnergyBonusAdded { amount: 50.0 }));

        let before = sim.energy();
        sim.add_energy_bonus(-5.0);
        assert_eq!(sim.energy(), before);
    }

    #[test]
    fn test_user_record_reflects_account() {
        let (mut sim, _rx, now) = simulation(config().with_player("p-7", "Alice"));
        sim.start_mining(now).unwrap();
        sim.submit_hash(&share_hash(3), now);

        let user = sim.user_record(now);
        assert_eq!(user.user_id, "p-7");
        assert_eq!(user.username, "Alice");
        assert_eq!(user.total_shares, 1);
        assert_eq!(user.total_blocks, 0);
    }
}
