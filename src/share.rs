//! Share acceptance rule
//!
//! A synthetic hash is a valid share when its first `min(5, floor(d))` hex
//! digits are zero and the digit at index `floor(d)` does not exceed a bound
//! picked by the fractional part of `d`. The bounded digit gives fractional
//! difficulty steps on top of the exponential prefix test.

use crate::difficulty::Difficulty;
use crate::round::RoundState;
use crate::{EngineError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Hex characters in a share hash
pub const HASH_HEX_LEN: usize = 64;

/// Longest zero prefix ever required
pub const MAX_ZERO_PREFIX: usize = 5;

/// Characters of a hash carried in events
pub const HASH_PREFIX_LEN: usize = 8;

/// Why a submitted hash did not count
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareRejection {
    #[error("Block complete (1000 shares reached)")]
    BlockComplete,

    #[error("Insufficient difficulty")]
    InsufficientDifficulty,

    #[error("Duplicate submission")]
    Duplicate,

    #[error("Malformed hash")]
    Malformed,
}

/// Required zero prefix length at a difficulty
pub fn required_zero_prefix(difficulty: Difficulty) -> usize {
    difficulty.whole().min(MAX_ZERO_PREFIX)
}

/// Highest allowed value of the bounded digit for a fractional difficulty part
pub fn max_digit_for_fraction(fraction: f64) -> u8 {
    if fraction <= 0.0 {
        15
    } else if fraction <= 0.25 {
        7
    } else if fraction <= 0.50 {
        3
    } else if fraction <= 0.75 {
        1
    } else {
        0
    }
}

/// Probability that a uniformly random hash passes the difficulty test
pub fn acceptance_probability(difficulty: Difficulty) -> f64 {
    let prefix = required_zero_prefix(difficulty) as i32;
    let max_digit = max_digit_for_fraction(difficulty.fraction());
    16f64.powi(-prefix) * f64::from(max_digit + 1) / 16.0
}

/// Check the prefix and bounded-digit stages for a hash.
///
/// Fails with `MalformedHash` when the hash is not 64 hex characters.
pub fn meets_difficulty(hash: &str, difficulty: Difficulty) -> Result<bool> {
    let bytes = hash.as_bytes();
    if bytes.len() != HASH_HEX_LEN {
        return Err(EngineError::MalformedHash(format!(
            "expected {} hex characters, got {}",
            HASH_HEX_LEN,
            bytes.len()
        )));
    }
    if let Some(bad) = bytes.iter().find(|b| !b.is_ascii_hexdigit()) {
        return Err(EngineError::MalformedHash(format!(
            "non-hex character {:?}",
            char::from(*bad)
        )));
    }

    let prefix = required_zero_prefix(difficulty);
    if bytes[..prefix].iter().any(|&b| b != b'0') {
        return Ok(false);
    }

    let position = difficulty.whole();
    let digit = char::from(bytes[position])
        .to_digit(16)
        .ok_or_else(|| EngineError::MalformedHash(format!("bad digit at index {}", position)))?;

    Ok(digit <= u32::from(max_digit_for_fraction(difficulty.fraction())))
}

/// Steps shared by every share: round still open, difficulty met, not a duplicate
fn admit_share(round: &mut RoundState, hash: &str, difficulty: Difficulty) -> std::result::Result<(), ShareRejection> {
    if round.is_complete() {
        return Err(ShareRejection::BlockComplete);
    }

    match meets_difficulty(hash, difficulty) {
        Ok(true) => {}
        Ok(false) => return Err(ShareRejection::InsufficientDifficulty),
        Err(e) => {
            warn!("Rejecting share: {}", e);
            return Err(ShareRejection::Malformed);
        }
    }

    if !round.remember_hash(hash) {
        return Err(ShareRejection::Duplicate);
    }

    Ok(())
}

/// Run the full acceptance rule against the round and credit the player on success
pub fn evaluate_share(
    round: &mut RoundState,
    hash: &str,
    difficulty: Difficulty,
    contributor: &str,
) -> std::result::Result<(), ShareRejection> {
    admit_share(round, hash, difficulty)?;
    round.credit_player_share(hash, contributor);
    Ok(())
}

/// Same rule for a share from a synthetic pool member.
///
/// The share is remembered as the latest valid submission but leaves the
/// player's counter alone.
pub fn evaluate_pool_share(
    round: &mut RoundState,
    hash: &str,
    difficulty: Difficulty,
    contributor: &str,
) -> std::result::Result<(), ShareRejection> {
    admit_share(round, hash, difficulty)?;
    round.record_valid(hash, contributor);
    Ok(())
}

/// Random 64 hex character hash
pub fn synthesize_hash<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut bytes = [0u8; HASH_HEX_LEN / 2];
    rng.fill(&mut bytes[..]);
    hex::encode(bytes)
}

/// Hash carrying a leading `000`, used as the representative hash of blocks
/// closed by the synthetic pool
pub fn synthesize_pool_hash<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut hash = synthesize_hash(rng);
    hash.replace_range(..3, "000");
    hash
}

/// First characters of a hash for display
pub fn hash_prefix(hash: &str) -> String {
    hash.chars().take(HASH_PREFIX_LEN).collect()
}
