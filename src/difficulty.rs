//! Quantized difficulty and the block-time driven difficulty controller

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info};

/// Adjustment records kept for stats
const MAX_ADJUSTMENT_HISTORY: usize = 256;

/// Difficulty in [3.00, 8.00] on a 0.25 grid.
///
/// Stored as a count of quarter steps so an off-grid or out-of-range value
/// cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Difficulty {
    quarters: u8,
}

impl Difficulty {
    const QUARTERS_PER_UNIT: u8 = 4;

    pub const MIN: Self = Self { quarters: 12 };
    pub const MAX: Self = Self { quarters: 32 };
    pub const STEP: f64 = 0.25;

    /// Round to the nearest quarter and clamp into range
    pub fn from_value(value: f64) -> Self {
        if value.is_nan() {
            return Self::MIN;
        }
        let quarters = (value * f64::from(Self::QUARTERS_PER_UNIT))
            .round()
            .clamp(f64::from(Self::MIN.quarters), f64::from(Self::MAX.quarters));
        Self {
            quarters: quarters as u8,
        }
    }

    pub fn value(self) -> f64 {
        f64::from(self.quarters) / f64::from(Self::QUARTERS_PER_UNIT)
    }

    /// Integer part, also the index of the bounded digit
    pub fn whole(self) -> usize {
        usize::from(self.quarters / Self::QUARTERS_PER_UNIT)
    }

    /// Fractional part: 0, 0.25, 0.5 or 0.75
    pub fn fraction(self) -> f64 {
        f64::from(self.quarters % Self::QUARTERS_PER_UNIT) / f64::from(Self::QUARTERS_PER_UNIT)
    }

    /// Distance above the minimum, the exponent of every difficulty scaling factor
    pub fn excess(self) -> f64 {
        self.value() - Self::MIN.value()
    }

    /// Every representable difficulty, ascending
    pub fn all() -> impl Iterator<Item = Difficulty> {
        (Self::MIN.quarters..=Self::MAX.quarters).map(|quarters| Self { quarters })
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Self::MIN
    }
}

impl From<f64> for Difficulty {
    fn from(value: f64) -> Self {
        Self::from_value(value)
    }
}

impl From<Difficulty> for f64 {
    fn from(difficulty: Difficulty) -> Self {
        difficulty.value()
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.value())
    }
}

/// Why the controller moved difficulty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    CurrentBlockTooSlow,
    BlocksTooFast,
    BlocksTooSlow,
}

impl fmt::Display for AdjustmentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::CurrentBlockTooSlow => "Current block too slow",
            Self::BlocksTooFast => "Blocks too fast",
            Self::BlocksTooSlow => "Blocks too slow",
        };
        f.write_str(text)
    }
}

/// Raw controller output before quantization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustmentProposal {
    pub delta: f64,
    pub reason: Option<AdjustmentReason>,
    pub average_block_time_secs: f64,
}

/// Compute the difficulty delta for the in-progress block.
///
/// `last_interval_secs` is the time between the two most recent completed
/// blocks, absent until two blocks exist.
pub fn propose_adjustment(
    current_block_time_secs: f64,
    last_interval_secs: Option<f64>,
    target_block_time_secs: f64,
) -> AdjustmentProposal {
    let average_block_time_secs = match last_interval_secs {
        Some(interval) => (interval + current_block_time_secs) / 3.0,
        None => current_block_time_secs,
    };

    if current_block_time_secs > target_block_time_secs {
        return AdjustmentProposal {
            delta: -Difficulty::STEP * (current_block_time_secs / target_block_time_secs),
            reason: Some(AdjustmentReason::CurrentBlockTooSlow),
            average_block_time_secs,
        };
    }

    let factor = average_block_time_secs / target_block_time_secs;
    let (delta, reason) = if factor < 0.9 {
        (Difficulty::STEP * (1.0 - factor), Some(AdjustmentReason::BlocksTooFast))
    } else if factor > 1.1 {
        (-Difficulty::STEP * (factor - 1.0), Some(AdjustmentReason::BlocksTooSlow))
    } else {
        (0.0, None)
    };

    AdjustmentProposal {
        delta,
        reason,
        average_block_time_secs,
    }
}

/// A difficulty change that was applied
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DifficultyChange {
    pub old: Difficulty,
    pub new: Difficulty,
    pub reason: AdjustmentReason,
    pub average_block_time_secs: f64,
}

/// Difficulty adjustment record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifficultyAdjustmentRecord {
    /// Round in progress when the change was made
    pub block_number: u64,
    pub previous_difficulty: Difficulty,
    pub new_difficulty: Difficulty,
    pub reason: AdjustmentReason,
    pub average_block_time_secs: f64,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

/// Difficulty statistics
#[derive(Debug, Clone, Serialize)]
pub struct DifficultyStats {
    pub current_difficulty: Difficulty,
    pub min_difficulty: Difficulty,
    pub max_difficulty: Difficulty,
    pub total_adjustments: u64,
    pub average_block_time_secs: f64,
    pub target_block_time_secs: f64,
}

/// Difficulty controller
#[derive(Debug, Clone)]
pub struct DifficultyController {
    current: Difficulty,
    target_block_time_secs: f64,
    /// Average used by the most recent reassessment
    average_block_time_secs: f64,
    history: VecDeque<DifficultyAdjustmentRecord>,
    total_adjustments: u64,
}

impl DifficultyController {
    pub fn new(initial: Difficulty, target_block_time_secs: f64) -> Self {
        debug!(
            "Creating difficulty controller at {} targeting {}s blocks",
            initial, target_block_time_secs
        );

        Self {
            current: initial,
            target_block_time_secs,
            average_block_time_secs: 0.0,
            history: VecDeque::new(),
            total_adjustments: 0,
        }
    }

    pub fn current(&self) -> Difficulty {
        self.current
    }

    pub fn average_block_time_secs(&self) -> f64 {
        self.average_block_time_secs
    }

    pub fn target_block_time_secs(&self) -> f64 {
        self.target_block_time_secs
    }

    /// Reassess difficulty for the round in progress.
    ///
    /// Returns the change only if the quantized value moved.
    pub fn reassess(
        &mut self,
        block_number: u64,
        current_block_time_secs: f64,
        last_interval_secs: Option<f64>,
        timestamp: u64,
    ) -> Option<DifficultyChange> {
        let proposal = propose_adjustment(current_block_time_secs, last_interval_secs, self.target_block_time_secs);
        self.average_block_time_secs = proposal.average_block_time_secs;

        let reason = proposal.reason?;
        let old = self.current;
        let new = Difficulty::from_value(old.value() + proposal.delta);
        if new == old {
            debug!(
                "Difficulty stays at {} ({}, delta {:.4} below one step)",
                old, reason, proposal.delta
            );
            return None;
        }

        self.current = new;
        self.total_adjustments += 1;

        info!(
            "Difficulty adjustment at block {}: {} -> {} ({}, avg block time {:.1}s)",
            block_number, old, new, reason, proposal.average_block_time_secs
        );

        self.history.push_back(DifficultyAdjustmentRecord {
            block_number,
            previous_difficulty: old,
            new_difficulty: new,
            reason,
            average_block_time_secs: proposal.average_block_time_secs,
            timestamp,
        });
        while self.history.len() > MAX_ADJUSTMENT_HISTORY {
            self.history.pop_front();
        }

        Some(DifficultyChange {
            old,
            new,
            reason,
            average_block_time_secs: proposal.average_block_time_secs,
        })
    }

    /// Get recent adjustments (last N), oldest first
    pub fn recent_adjustments(&self, count: usize) -> Vec<DifficultyAdjustmentRecord> {
        let skip = self.history.len().saturating_sub(count);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn stats(&self) -> DifficultyStats {
        let seen = self
            .history
            .iter()
            .flat_map(|r| [r.previous_difficulty, r.new_difficulty])
            .chain(std::iter::once(self.current));

        let (min_difficulty, max_difficulty) = seen.fold((self.current, self.current), |(lo, hi), d| {
            (lo.min(d), hi.max(d))
        });

        DifficultyStats {
            current_difficulty: self.current,
            min_difficulty,
            max_difficulty,
            total_adjustments: self.total_adjustments,
            average_block_time_secs: self.average_block_time_secs,
            target_block_time_secs: self.target_block_time_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantization_and_clamp() {
        assert_eq!(Difficulty::from_value(3.1).value(), 3.0);
        assert_eq!(Difficulty::from_value(3.13).value(), 3.25);
        assert_eq!(Difficulty::from_value(1.0), Difficulty::MIN);
        assert_eq!(Difficulty::from_value(12.0), Difficulty::MAX);
        assert_eq!(Difficulty::from_value(f64::NAN), Difficulty::MIN);
        assert_eq!(Difficulty::from_value(f64::INFINITY), Difficulty::MAX);
    }

    #[test]
    fn test_parts() {
        let d = Difficulty::from_value(5.75);
        assert_eq!(d.whole(), 5);
        assert_eq!(d.fraction(), 0.75);
        assert_eq!(d.excess(), 2.75);
        assert_eq!(d.to_string(), "5.75");
        assert_eq!(Difficulty::all().count(), 21);
    }

    #[test]
    fn test_serde_as_float() {
        let json = serde_json::to_string(&Difficulty::from_value(4.5)).unwrap();
        assert_eq!(json, "4.5");
        let back: Difficulty = serde_json::from_str("4.6").unwrap();
        assert_eq!(back.value(), 4.5);
    }

    #[test]
    fn test_current_block_too_slow() {
        let p = propose_adjustment(120.0, None, 60.0);
        assert_eq!(p.reason, Some(AdjustmentReason::CurrentBlockTooSlow));
        assert_eq!(p.delta, -0.5);
    }

    #[test]
    fn test_blocks_too_fast_without_history() {
        let p = propose_adjustment(30.0, None, 60.0);
        assert_eq!(p.reason, Some(AdjustmentReason::BlocksTooFast));
        assert_eq!(p.average_block_time_secs, 30.0);
        assert!((p.delta - 0.125).abs() < 1e-12);
    }

    #[test]
    fn test_blended_average_with_history() {
        // (150 + 60) / 3 = 70 -> factor 1.1667
        let p = propose_adjustment(60.0, Some(150.0), 60.0);
        assert_eq!(p.reason, Some(AdjustmentReason::BlocksTooSlow));
        assert!((p.average_block_time_secs - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_within_band_no_change() {
        let p = propose_adjustment(58.0, None, 60.0);
        assert_eq!(p.reason, None);
        assert_eq!(p.delta, 0.0);
    }

    #[test]
    fn test_reassess_emits_only_on_quantized_change() {
        let mut controller = DifficultyController::new(Difficulty::from_value(4.0), 60.0);

        // delta 0.125 rounds (4.125 * 4 = 16.5 -> 17) up to 4.25
        let change = controller.reassess(1, 30.0, None, 0).unwrap();
        assert_eq!(change.old.value(), 4.0);
        assert_eq!(change.new.value(), 4.25);
        assert_eq!(change.reason, AdjustmentReason::BlocksTooFast);

        // delta 0.0583 stays on 4.25
        assert!(controller.reassess(1, 46.0, None, 0).is_none());
        assert_eq!(controller.current().value(), 4.25);
        assert_eq!(controller.stats().total_adjustments, 1);
    }

    #[test]
    fn test_reassess_clamps_to_range() {
        let mut controller = DifficultyController::new(Difficulty::MIN, 60.0);
        assert!(controller.reassess(1, 600.0, None, 0).is_none());
        assert_eq!(controller.current(), Difficulty::MIN);

        let mut controller = DifficultyController::new(Difficulty::MAX, 60.0);
        assert!(controller.reassess(1, 0.0, None, 0).is_none());
        assert_eq!(controller.current(), Difficulty::MAX);
    }

    #[test]
    fn test_adjusted_difficulty_always_on_grid() {
        for start in Difficulty::all() {
            for block_time in [0.0, 5.0, 31.0, 59.0, 61.0, 90.0, 240.0, 1_000.0] {
                for interval in [None, Some(10.0), Some(60.0), Some(400.0)] {
                    let mut controller = DifficultyController::new(start, 60.0);
                    controller.reassess(1, block_time, interval, 0);
                    let v = controller.current().value();
                    assert!((3.0..=8.0).contains(&v));
                    assert_eq!((v * 4.0).fract(), 0.0);
                }
            }
        }
    }

    #[test]
    fn test_stats_track_range() {
        let mut controller = DifficultyController::new(Difficulty::from_value(5.0), 60.0);
        controller.reassess(1, 0.0, None, 10);
        controller.reassess(2, 180.0, None, 20);

        let stats = controller.stats();
        assert_eq!(stats.total_adjustments, 2);
        assert_eq!(stats.max_difficulty.value(), 5.25);
        assert_eq!(stats.min_difficulty.value(), 4.5);
        assert_eq!(controller.recent_adjustments(1)[0].block_number, 2);
    }
}
