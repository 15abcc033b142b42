//! Energy resource gating self-mining, plus the daily mission bonus

use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Energy reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergySnapshot {
    pub current: f64,
    pub max: f64,
    pub percentage: f64,
}

/// Depleting / recharging energy store
#[derive(Debug, Clone)]
pub struct EnergyModel {
    current: f64,
    /// Ceiling including every bonus granted so far
    max: f64,
    bonuses: f64,
    drain_rate: f64,
    charge_rate: f64,
    charging: bool,
    last_update: Instant,
}

impl EnergyModel {
    pub fn new(max: f64, drain_rate: f64, charge_rate: f64, now: Instant) -> Self {
        debug!(
            "Creating energy model: max={:.1}, drain={:.4}/s, charge={:.4}/s",
            max, drain_rate, charge_rate
        );

        Self {
            current: max,
            max,
            bonuses: 0.0,
            drain_rate,
            charge_rate,
            charging: false,
            last_update: now,
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn bonuses(&self) -> f64 {
        self.bonuses
    }

    pub fn is_charging(&self) -> bool {
        self.charging
    }

    pub fn is_depleted(&self) -> bool {
        self.current <= 0.0
    }

    pub fn set_charging(&mut self, charging: bool) {
        self.charging = charging;
    }

    /// Advance the model to `now`.
    ///
    /// Drains while `mining`, charges while idle in charging mode. Returns the
    /// new reading and whether this update emptied the store.
    pub fn tick(&mut self, now: Instant, mining: bool) -> (EnergySnapshot, bool) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.last_update = now;

        let mut depleted = false;
        if mining {
            self.current = (self.current - self.drain_rate * elapsed).max(0.0);
            if self.current <= 0.0 {
                warn!("Energy depleted after {:.1}s of mining", elapsed);
                depleted = true;
            }
        } else if self.charging {
            // max already carries every bonus
            self.current = (self.current + self.charge_rate * elapsed).min(self.max);
        }

        (self.snapshot(), depleted)
    }

    /// Permanently raise both the ceiling and the current level
    pub fn add_bonus(&mut self, amount: f64) {
        self.bonuses += amount;
        self.max += amount;
        self.current += amount;
        info!("Energy bonus of {:.1} added, ceiling now {:.1}", amount, self.max);
    }

    pub fn snapshot(&self) -> EnergySnapshot {
        EnergySnapshot {
            current: self.current,
            max: self.max,
            percentage: if self.max > 0.0 { self.current / self.max * 100.0 } else { 0.0 },
        }
    }
}

/// Availability of the daily mission
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MissionStatus {
    pub available: bool,
    pub remaining_secs: u64,
    pub bonus_amount: f64,
}

/// Once-per-cooldown energy bonus
#[derive(Debug, Clone)]
pub struct DailyMission {
    bonus_amount: f64,
    cooldown: Duration,
    last_claim: Option<Instant>,
}

impl DailyMission {
    pub fn new(bonus_amount: f64, cooldown: Duration) -> Self {
        Self {
            bonus_amount,
            cooldown,
            last_claim: None,
        }
    }

    /// Time left before the next claim, zero when available
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last_claim {
            Some(at) => self.cooldown.saturating_sub(now.saturating_duration_since(at)),
            None => Duration::ZERO,
        }
    }

    pub fn status(&self, now: Instant) -> MissionStatus {
        let remaining = self.remaining(now);
        MissionStatus {
            available: remaining.is_zero(),
            remaining_secs: remaining.as_secs(),
            bonus_amount: self.bonus_amount,
        }
    }

    /// Claim the bonus; the caller applies the returned amount
    pub fn claim(&mut self, now: Instant) -> Result<f64> {
        let remaining = self.remaining(now);
        if !remaining.is_zero() {
            return Err(EngineError::MissionCooldown {
                remaining_secs: remaining.as_secs().max(1),
            });
        }
        self.last_claim = Some(now);
        Ok(self.bonus_amount)
    }
}
