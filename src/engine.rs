//! Async engine facade
//!
//! [`MiningEngine`] wraps the single-writer [`PoolSimulation`] in a mutex and
//! drives it from background tasks:
//! - a pool loop (aggregation + energy) every `pool_tick_ms`
//! - a difficulty loop every `difficulty_tick_secs`
//! - a mining loop every `mining_tick_ms` while the player mines
//!
//! Settled blocks and the player's record are handed to the storage
//! collaborator after the state lock is released.

use crate::account::{BalanceStats, UpgradeInfo, UpgradeReceipt};
use crate::difficulty::{Difficulty, DifficultyStats};
use crate::energy::{EnergySnapshot, MissionStatus};
use crate::events::{EngineEvent, EventBus};
use crate::pool_stats::PoolStats;
use crate::rewards::{BlockRecord, LeaderboardEntry};
use crate::round::RoundSnapshot;
use crate::simulation::{PoolSimulation, ShareOutcome};
use crate::storage::{MemoryStorage, NetworkStats, PoolStorage, UserRecord};
use crate::{EngineConfig, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

struct EngineInner {
    sim: Mutex<PoolSimulation>,
    storage: Arc<dyn PoolStorage>,
    config: EngineConfig,
}

impl EngineInner {
    /// Hand a settled block and the player's record to storage
    async fn persist(&self, block: BlockRecord, user: UserRecord) {
        if let Err(e) = self.storage.save_block(&block).await {
            warn!("Failed to persist block {}: {}", block.number, e);
        }
        if let Err(e) = self.storage.save_user(user).await {
            warn!("Failed to persist user record: {}", e);
        }
    }
}

#[derive(Default)]
struct EngineTasks {
    background: Vec<JoinHandle<()>>,
    mining: Option<JoinHandle<()>>,
}

impl EngineTasks {
    fn abort_all(&mut self) {
        if let Some(handle) = self.mining.take() {
            handle.abort();
        }
        for handle in self.background.drain(..) {
            handle.abort();
        }
    }
}

/// Running pool simulation
pub struct MiningEngine {
    inner: Arc<EngineInner>,
    events: EventBus,
    tasks: std::sync::Mutex<EngineTasks>,
}

impl MiningEngine {
    /// Create an engine backed by in-memory storage
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_storage(config, Arc::new(MemoryStorage::new()))
    }

    pub fn with_storage(config: EngineConfig, storage: Arc<dyn PoolStorage>) -> Result<Self> {
        let events = EventBus::new(config.event_capacity);
        let sim = PoolSimulation::new(config.clone(), events.clone(), Instant::now())?;

        Ok(Self {
            inner: Arc::new(EngineInner {
                sim: Mutex::new(sim),
                storage,
                config,
            }),
            events,
            tasks: std::sync::Mutex::new(EngineTasks::default()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, EngineTasks> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start the pool and difficulty loops. Must run inside a tokio runtime.
    ///
    /// Calling it again while the loops run has no effect.
    pub fn launch(&self) {
        let mut tasks = self.tasks();
        if !tasks.background.is_empty() {
            debug!("Engine already launched");
            return;
        }

        info!(
            "Launching engine: pool tick {}ms, difficulty tick {}s",
            self.inner.config.pool_tick_ms, self.inner.config.difficulty_tick_secs
        );

        let inner = Arc::clone(&self.inner);
        tasks.background.push(tokio::spawn(async move {
            let mut ticker = time::interval(Duration::from_millis(inner.config.pool_tick_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let now = Instant::now();

                let settled = {
                    let mut sim = inner.sim.lock().await;
                    let block = sim.pool_tick(now);
                    sim.energy_tick(now);
                    block.map(|block| (block, sim.user_record(now)))
                };

                if let Some((block, user)) = settled {
                    inner.persist(block, user).await;
                }
            }
        }));

        let inner = Arc::clone(&self.inner);
        tasks.background.push(tokio::spawn(async move {
            let mut ticker = time::interval(Duration::from_secs(inner.config.difficulty_tick_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let mut sim = inner.sim.lock().await;
                sim.difficulty_tick(Instant::now());
            }
        }));
    }

    /// Begin self-mining.
    ///
    /// Returns `Ok(false)` when already mining; fails with
    /// `InsufficientEnergy` when the store is empty.
    pub async fn start(&self) -> Result<bool> {
        let epoch = {
            let mut sim = self.inner.sim.lock().await;
            if !sim.start_mining(Instant::now())? {
                return Ok(false);
            }
            sim.mining_epoch()
        };

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(Duration::from_millis(inner.config.mining_tick_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let now = Instant::now();

                let (settled, still_mining) = {
                    let mut sim = inner.sim.lock().await;
                    if !sim.is_mining() || sim.mining_epoch() != epoch {
                        break;
                    }
                    let settled = sim.mining_tick(now).map(|block| (block, sim.user_record(now)));
                    (settled, sim.is_mining())
                };

                if let Some((block, user)) = settled {
                    inner.persist(block, user).await;
                }
                if !still_mining {
                    break;
                }
            }
            debug!("Mining loop {} finished", epoch);
        });

        if let Some(previous) = self.tasks().mining.replace(handle) {
            previous.abort();
        }
        Ok(true)
    }

    /// Stop self-mining; returns false when not mining
    pub async fn stop(&self) -> bool {
        let stopped = self.inner.sim.lock().await.stop_mining(Instant::now());
        if let Some(handle) = self.tasks().mining.take() {
            handle.abort();
        }
        stopped
    }

    /// Stop mining and every background loop
    pub async fn shutdown(&self) {
        self.stop().await;
        self.tasks().abort_all();
        info!("Engine shut down");
    }

    /// Submit an externally produced hash; it counts as the player's only while mining
    pub async fn submit_hash(&self, hash: &str) -> ShareOutcome {
        let now = Instant::now();
        let (outcome, user) = {
            let mut sim = self.inner.sim.lock().await;
            let outcome = sim.submit_hash(hash, now);
            (outcome, sim.user_record(now))
        };

        if let ShareOutcome::Accepted { block: Some(block) } = &outcome {
            self.inner.persist(block.clone(), user).await;
        }
        outcome
    }

    pub async fn is_mining(&self) -> bool {
        self.inner.sim.lock().await.is_mining()
    }

    pub async fn pool_stats(&self) -> PoolStats {
        self.inner.sim.lock().await.pool_stats()
    }

    pub async fn balance_stats(&self) -> BalanceStats {
        self.inner.sim.lock().await.balance_stats()
    }

    pub async fn block_history(&self) -> Vec<BlockRecord> {
        self.inner.sim.lock().await.block_history()
    }

    pub async fn upgrade_info(&self) -> UpgradeInfo {
        self.inner.sim.lock().await.upgrade_info()
    }

    pub async fn top_participants(&self, limit: usize) -> Vec<LeaderboardEntry> {
        self.inner.sim.lock().await.top_participants(limit)
    }

    pub async fn energy(&self) -> EnergySnapshot {
        self.inner.sim.lock().await.energy()
    }

    pub async fn round(&self) -> RoundSnapshot {
        self.inner.sim.lock().await.round(Instant::now())
    }

    pub async fn difficulty(&self) -> Difficulty {
        self.inner.sim.lock().await.difficulty()
    }

    pub async fn difficulty_stats(&self) -> DifficultyStats {
        self.inner.sim.lock().await.difficulty_stats()
    }

    pub async fn mission_status(&self) -> MissionStatus {
        self.inner.sim.lock().await.mission_status(Instant::now())
    }

    pub async fn user_record(&self) -> UserRecord {
        self.inner.sim.lock().await.user_record(Instant::now())
    }

    pub async fn network_stats(&self) -> Result<NetworkStats> {
        self.inner.storage.get_network_stats().await
    }

    pub async fn purchase_upgrade(&self) -> Result<UpgradeReceipt> {
        let (receipt, user) = {
            let mut sim = self.inner.sim.lock().await;
            let receipt = sim.purchase_upgrade()?;
            (receipt, sim.user_record(Instant::now()))
        };

        if let Err(e) = self.inner.storage.save_user(user).await {
            warn!("Failed to persist user record: {}", e);
        }
        Ok(receipt)
    }

    pub async fn add_energy_bonus(&self, amount: f64) -> EnergySnapshot {
        self.inner.sim.lock().await.add_energy_bonus(amount)
    }

    pub async fn claim_daily_bonus(&self) -> Result<f64> {
        self.inner.sim.lock().await.claim_daily_bonus(Instant::now())
    }
}

impl Drop for MiningEngine {
    fn drop(&mut self) {
        self.tasks().abort_all();
    }
}
