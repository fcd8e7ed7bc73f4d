use rustc_hash::FxHashMap;
use serde::Serialize;

/// Chart time in milliseconds.
pub type MapTime = i64;

// ------------------ Judgement windows (milliseconds) ------------------

/// Furthest a press may be from an object and still match it.
pub const MAX_EARLY_HIT_MS: MapTime = 100;
/// Presses strictly closer than this are Perfect.
pub const PERFECT_HIT_MS: MapTime = 50;
/// How late a laser slam may be caught.
pub const MAX_LASER_HIT_MS: MapTime = 100;
/// How long a sloped laser may go uncontrolled before the combo breaks.
pub const LASER_MISS_TIMEOUT_MS: MapTime = 100;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JudgementWindows {
    pub perfect_ms: MapTime,
    pub good_ms: MapTime,
    pub laser_hit_ms: MapTime,
    pub laser_miss_timeout_ms: MapTime,
}

impl Default for JudgementWindows {
    fn default() -> Self {
        Self {
            perfect_ms: PERFECT_HIT_MS,
            good_ms: MAX_EARLY_HIT_MS,
            laser_hit_ms: MAX_LASER_HIT_MS,
            laser_miss_timeout_ms: LASER_MISS_TIMEOUT_MS,
        }
    }
}

// ------------------ Timing points ------------------

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct TimingPoint {
    pub time: MapTime,
    /// Length of one beat in ms.
    pub beat_duration: f64,
    pub numerator: u32,
    pub denominator: u32,
}

impl TimingPoint {
    pub fn from_bpm(time: MapTime, bpm: f64) -> Self {
        Self {
            time,
            beat_duration: 60000.0 / bpm,
            numerator: 4,
            denominator: 4,
        }
    }

    #[inline(always)]
    pub fn bar_duration(&self) -> f64 {
        self.beat_duration * self.numerator as f64
    }

    #[inline(always)]
    pub fn bpm(&self) -> f64 {
        60000.0 / self.beat_duration
    }
}

/// Index of the point in effect at `time`: the last one starting at or
/// before it, or the first point for times before the chart starts.
pub fn timing_point_index_at(points: &[TimingPoint], time: MapTime) -> usize {
    points.partition_point(|tp| tp.time <= time).saturating_sub(1)
}

/// Position of a tick on the chart grid.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GridPos {
    pub block: u32,
    pub tick: u32,
    pub ticks_in_block: u32,
}

/// Fields a tempo or signature change overrides; `None` keeps the value of
/// the point being cloned or updated.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TimingChange {
    pub beat_duration: Option<f64>,
    pub numerator: Option<u32>,
    pub denominator: Option<u32>,
}

/// Turns grid coordinates into absolute time while tempo and signature
/// change underneath.
///
/// A change that lands mid-block anchors the new point at that tick: the
/// remainder of the block is measured with the new bar length and recorded
/// as a shortened first block, and whole blocks are counted from the next
/// block boundary.
#[derive(Debug, Clone)]
pub struct TimingResolver {
    points: Vec<TimingPoint>,
    by_time: FxHashMap<MapTime, usize>,
    active: usize,
    block_offset: u32,
    tick_offset: u32,
    first_block_duration: f64,
}

impl TimingResolver {
    pub fn new(first: TimingPoint) -> Self {
        let mut by_time = FxHashMap::default();
        by_time.insert(first.time, 0);
        Self {
            points: vec![first],
            by_time,
            active: 0,
            block_offset: 0,
            tick_offset: 0,
            first_block_duration: 0.0,
        }
    }

    #[inline(always)]
    pub fn active(&self) -> &TimingPoint {
        &self.points[self.active]
    }

    pub fn points(&self) -> &[TimingPoint] {
        &self.points
    }

    pub fn into_points(self) -> Vec<TimingPoint> {
        self.points
    }

    pub fn to_absolute_time(&self, pos: GridPos) -> MapTime {
        let tp = self.active();
        let bar = tp.bar_duration();
        let blocks = pos.block.saturating_sub(self.block_offset);
        let ticks = if blocks == 0 {
            pos.tick.saturating_sub(self.tick_offset)
        } else {
            pos.tick
        };

        let block_offset_ms = if self.tick_offset > 0 {
            if blocks > 0 {
                self.first_block_duration + bar * (blocks - 1) as f64
            } else {
                0.0
            }
        } else {
            bar * blocks as f64
        };

        let ticks_in_block = pos.ticks_in_block.max(1) as f64;
        let tick_offset_ms = ticks as f64 / ticks_in_block * bar;
        tp.time + (block_offset_ms + tick_offset_ms) as MapTime
    }

    /// Applies a tempo/signature change at `time` (the absolute time of
    /// `pos`). Creates a new point cloned from the active one unless a point
    /// already sits at exactly that time, in which case it is updated.
    pub fn insert_or_update(&mut self, time: MapTime, pos: GridPos, change: TimingChange) {
        let index = match self.by_time.get(&time) {
            Some(&index) => index,
            None => {
                let mut point = *self.active();
                point.time = time;
                self.points.push(point);
                let index = self.points.len() - 1;
                self.by_time.insert(time, index);
                self.block_offset = pos.block;
                self.tick_offset = pos.tick;
                index
            }
        };
        self.active = index;

        let tp = &mut self.points[index];
        if let Some(beat_duration) = change.beat_duration {
            tp.beat_duration = beat_duration;
        }
        if let Some(numerator) = change.numerator {
            tp.numerator = numerator;
        }
        if let Some(denominator) = change.denominator {
            tp.denominator = denominator;
        }

        let ticks_in_block = pos.ticks_in_block.max(1);
        let remaining = ticks_in_block.saturating_sub(pos.tick) as f64;
        self.first_block_duration = remaining / ticks_in_block as f64 * tp.bar_duration();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(block: u32, tick: u32, ticks_in_block: u32) -> GridPos {
        GridPos {
            block,
            tick,
            ticks_in_block,
        }
    }

    #[test]
    fn bar_duration_at_120_bpm() {
        let tp = TimingPoint::from_bpm(0, 120.0);
        assert_eq!(tp.beat_duration, 500.0);
        assert_eq!(tp.numerator, 4);
        assert_eq!(tp.bar_duration(), 2000.0);
    }

    #[test]
    fn grid_to_time_without_changes() {
        let resolver = TimingResolver::new(TimingPoint::from_bpm(100, 120.0));
        assert_eq!(resolver.to_absolute_time(at(0, 0, 16)), 100);
        assert_eq!(resolver.to_absolute_time(at(0, 4, 16)), 600);
        assert_eq!(resolver.to_absolute_time(at(2, 8, 16)), 100 + 4000 + 1000);
    }

    #[test]
    fn mid_block_tempo_change_shortens_first_block() {
        let mut resolver = TimingResolver::new(TimingPoint::from_bpm(0, 120.0));
        // Halfway through block 1 the tempo doubles.
        let pos = at(1, 8, 16);
        let time = resolver.to_absolute_time(pos);
        assert_eq!(time, 3000);
        resolver.insert_or_update(
            time,
            pos,
            TimingChange {
                beat_duration: Some(250.0),
                ..TimingChange::default()
            },
        );
        assert_eq!(resolver.points().len(), 2);
        // The rest of block 1 takes half of a 1000ms bar.
        assert_eq!(resolver.to_absolute_time(at(1, 12, 16)), 3250);
        assert_eq!(resolver.to_absolute_time(at(2, 0, 16)), 3500);
        assert_eq!(resolver.to_absolute_time(at(3, 4, 16)), 4750);
    }

    #[test]
    fn change_at_existing_time_updates_in_place() {
        let mut resolver = TimingResolver::new(TimingPoint::from_bpm(0, 120.0));
        let pos = at(0, 0, 4);
        resolver.insert_or_update(
            0,
            pos,
            TimingChange {
                numerator: Some(3),
                ..TimingChange::default()
            },
        );
        assert_eq!(resolver.points().len(), 1);
        assert_eq!(resolver.active().numerator, 3);
        assert_eq!(resolver.to_absolute_time(at(1, 0, 4)), 1500);
    }

    #[test]
    fn absolute_time_is_monotonic_within_a_point() {
        let mut resolver = TimingResolver::new(TimingPoint::from_bpm(0, 173.0));
        let pos = at(2, 5, 12);
        let time = resolver.to_absolute_time(pos);
        resolver.insert_or_update(
            time,
            pos,
            TimingChange {
                beat_duration: Some(60000.0 / 91.0),
                numerator: Some(7),
                denominator: Some(8),
            },
        );
        let mut last = time;
        for block in 2..8 {
            let start = if block == 2 { 5 } else { 0 };
            for tick in start..12 {
                let t = resolver.to_absolute_time(at(block, tick, 12));
                assert!(t >= last, "time went backwards at {block}:{tick}: {t} < {last}");
                last = t;
            }
        }
    }

    #[test]
    fn point_lookup_by_time() {
        let points = [
            TimingPoint::from_bpm(0, 120.0),
            TimingPoint::from_bpm(1000, 240.0),
        ];
        assert_eq!(timing_point_index_at(&points, -50), 0);
        assert_eq!(timing_point_index_at(&points, 999), 0);
        assert_eq!(timing_point_index_at(&points, 1000), 1);
        assert_eq!(timing_point_index_at(&points, 5000), 1);
    }
}
