//! Engine events and the broadcast bus observers subscribe to

use crate::difficulty::{AdjustmentReason, Difficulty};
use crate::rewards::SettlementStrategy;
use crate::share::ShareRejection;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// State transitions published by the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Self-mining started or stopped
    MiningStateChanged { mining: bool },
    /// A share counted toward the block
    ValidHashAccepted {
        hash_prefix: String,
        difficulty: Difficulty,
        is_block_complete: bool,
        /// Base block reward when this share completed the block, else zero
        reward: f64,
    },
    /// A share did not count
    HashRejected {
        hash_prefix: String,
        reason: ShareRejection,
    },
    /// Difficulty moved to a new grid value
    DifficultyChanged {
        old: Difficulty,
        new: Difficulty,
        reason: AdjustmentReason,
        average_block_time_secs: f64,
    },
    /// Energy ran out or start was refused for lack of it
    EnergyDepleted,
    /// Energy ceiling raised
    EnergyBonusAdded { amount: f64 },
    /// A round closed and its rewards were applied
    BlockSettled {
        number: u64,
        winner: String,
        personal_reward: f64,
        strategy: SettlementStrategy,
    },
}

/// Broadcast channel for engine events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to current subscribers; an event nobody listens for is dropped
    pub fn emit(&self, event: EngineEvent) {
        trace!("Emitting {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
