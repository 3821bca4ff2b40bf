//! Deterministic daily rate and the split of points between the two directions.
//!
//! Every observer derives the same rate for the same calendar date by hashing a
//! per-day seed, so no broadcast or coordination is needed. The value is public
//! and predictable; it only shapes gameplay.

use sha2::{Digest, Sha256};
use time::Date;

use crate::domain::score::{Direction, RateSnapshot};

/// Lowest rate a day can draw.
pub const MIN_RATE: f64 = 0.1;
/// Rate at which both directions are worth the same.
pub const NEUTRAL_RATE: f64 = 2.0;
/// Highest rate a day can draw.
pub const MAX_RATE: f64 = 3.9;
/// Combined worth of one increase and one decrease, whatever the rate.
pub const TOTAL_SWING: i64 = 20;
/// Largest number of points moved from one direction to the other.
const MAX_SHIFT: f64 = 9.0;
const SEED_PREFIX: &str = "score-sync-rate:";

/// Points awarded per direction for a given rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointSplit {
    pub up: i64,
    pub down: i64,
}

impl PointSplit {
    /// Signed delta applied to the score for `direction`.
    pub fn delta(&self, direction: Direction) -> i64 {
        match direction {
            Direction::Increase => self.up,
            Direction::Decrease => -self.down,
        }
    }
}

/// ISO calendar date (`YYYY-MM-DD`) used in seeds and cache keys.
pub fn iso_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Seed string hashed to obtain the rate of `date`.
pub fn seed_for(date: Date) -> String {
    format!("{SEED_PREFIX}{}", iso_date(date))
}

/// Map a seed onto `[0, 1)` using the leading 53 bits of its SHA-256 digest.
pub fn unit_interval(seed: &str) -> f64 {
    let digest = Sha256::digest(seed.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let bits = u64::from_be_bytes(head) >> 11;
    bits as f64 / (1u64 << 53) as f64
}

/// Inverse CDF of a triangular distribution peaking at [`NEUTRAL_RATE`].
///
/// Values cluster around the neutral rate and taper off towards the bounds.
pub fn rate_from_unit(unit: f64) -> f64 {
    let unit = if unit.is_finite() {
        unit.clamp(0.0, 1.0)
    } else {
        0.5
    };
    let raw = if unit < 0.5 {
        MIN_RATE + (NEUTRAL_RATE - MIN_RATE) * (2.0 * unit).sqrt()
    } else {
        MAX_RATE - (MAX_RATE - NEUTRAL_RATE) * (2.0 * (1.0 - unit)).sqrt()
    };
    ((raw * 100.0).round() / 100.0).clamp(MIN_RATE, MAX_RATE)
}

/// Rate shared by every observer on `date`.
pub fn current_rate(date: Date) -> f64 {
    rate_from_unit(unit_interval(&seed_for(date)))
}

/// Snapshot of [`current_rate`] tagged with its date.
pub fn snapshot_for(date: Date) -> RateSnapshot {
    RateSnapshot {
        value: current_rate(date),
        computed_for: date,
    }
}

/// Split [`TOTAL_SWING`] between the two directions.
///
/// Below the neutral rate increases are worth more, above it decreases are.
/// Non-finite input is treated as neutral.
pub fn point_split(rate: f64) -> PointSplit {
    let rate = if rate.is_finite() {
        rate.clamp(MIN_RATE, MAX_RATE)
    } else {
        NEUTRAL_RATE
    };
    let tilt = if rate <= NEUTRAL_RATE {
        (NEUTRAL_RATE - rate) / (NEUTRAL_RATE - MIN_RATE)
    } else {
        -(rate - NEUTRAL_RATE) / (MAX_RATE - NEUTRAL_RATE)
    };
    let shift = (tilt * MAX_SHIFT).round() as i64;
    let up = TOTAL_SWING / 2 + shift;

    PointSplit {
        up,
        down: TOTAL_SWING - up,
    }
}

/// Signed magnitude of a single mutation in `direction` at `rate`.
pub fn point_value(direction: Direction, rate: f64) -> i64 {
    point_split(rate).delta(direction)
}
