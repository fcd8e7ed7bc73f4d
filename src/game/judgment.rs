use serde::Serialize;

use crate::game::chart::ObjectId;
use crate::game::timing::{JudgementWindows, MapTime};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum HitRating {
    Miss = 0,
    Good,
    Perfect,
}

impl HitRating {
    /// Points a chip earns for this rating, out of [`MAX_HIT_SCORE`].
    #[inline(always)]
    pub const fn score(self) -> u32 {
        self as u32
    }

    #[inline(always)]
    pub const fn is_miss(self) -> bool {
        matches!(self, Self::Miss)
    }
}

/// Best score a single chip can earn.
pub const MAX_HIT_SCORE: u32 = HitRating::Perfect.score();

/// Classifies a press `delta` ms away from its object (negative = early).
///
/// The Perfect window is open at its bound while the Good window is closed:
/// with default windows, `|delta| == 50` rates Good and `|delta| == 100` still
/// rates Good.
pub fn rating_from_delta(delta: MapTime, windows: &JudgementWindows) -> HitRating {
    let abs = delta.abs();
    if abs < windows.perfect_ms {
        HitRating::Perfect
    } else if abs <= windows.good_ms {
        HitRating::Good
    } else {
        HitRating::Miss
    }
}

/// Timing record of one judged chip.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HitStat {
    pub object: ObjectId,
    pub time: MapTime,
    pub delta: MapTime,
    pub rating: HitRating,
}

/// Mean signed offset of the non-missed hits, or 0 with none.
pub fn mean_hit_delta(stats: &[HitStat]) -> f64 {
    let (sum, count) = stats
        .iter()
        .filter(|s| !s.rating.is_miss())
        .fold((0i64, 0u32), |(sum, n), s| (sum + s.delta, n + 1));
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}
