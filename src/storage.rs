//! Storage collaborator: user records, settled blocks and network totals
//!
//! The engine persists through [`PoolStorage`] after each settlement but never
//! depends on it being durable. [`MemoryStorage`] keeps everything in memory.

use crate::rewards::BlockRecord;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Persisted player summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub username: String,
    pub balance: f64,
    pub total_shares: u64,
    pub total_blocks: u64,
    /// Milliseconds since the Unix epoch
    pub last_update: u64,
}

/// Totals across everything stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub total_users: usize,
    pub total_blocks: usize,
    /// Sum of base rewards of stored blocks
    pub total_mined: f64,
}

#[async_trait]
pub trait PoolStorage: Send + Sync {
    async fn save_user(&self, user: UserRecord) -> Result<()>;

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>>;

    async fn save_block(&self, block: &BlockRecord) -> Result<()>;

    async fn get_network_stats(&self) -> Result<NetworkStats>;
}

/// Volatile in-memory storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    users: RwLock<HashMap<String, UserRecord>>,
    blocks: RwLock<Vec<BlockRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored blocks in append order
    pub async fn blocks(&self) -> Vec<BlockRecord> {
        self.blocks.read().await.clone()
    }
}

#[async_trait]
impl PoolStorage for MemoryStorage {
    async fn save_user(&self, user: UserRecord) -> Result<()> {
        debug!("Saving user {} (balance {:.2})", user.user_id, user.balance);
        self.users.write().await.insert(user.user_id.clone(), user);
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn save_block(&self, block: &BlockRecord) -> Result<()> {
        debug!("Saving block {}", block.number);
        self.blocks.write().await.push(block.clone());
        Ok(())
    }

    async fn get_network_stats(&self) -> Result<NetworkStats> {
        let users = self.users.read().await;
        let blocks = self.blocks.read().await;

        Ok(NetworkStats {
            total_users: users.len(),
            total_blocks: blocks.len(),
            total_mined: blocks.iter().map(|b| b.reward).sum(),
        })
    }
}
