//! Judges a live performance against an imported chart.
//!
//! The engine owns the set of hittable objects. A bound [`Playback`] moves
//! the cursor; every [`Scoring::tick`] folds the window changes into that set
//! and then runs hold, chip and laser logic against one `now`.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, warn};
use serde::Serialize;
use smallvec::SmallVec;

use crate::game::chart::{
    Chart, HoldObject, LaserObject, NUM_BUTTON_LANES, NUM_LASER_LANES, ObjectId, ObjectState,
};
use crate::game::judgment::{HitRating, HitStat, MAX_HIT_SCORE, mean_hit_delta, rating_from_delta};
use crate::game::playback::Playback;
use crate::game::timing::{JudgementWindows, MapTime, TimingPoint};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum ScoreEvent {
    /// A press matched an object (chip or hold start).
    ButtonHit { lane: usize, object: ObjectId },
    /// A chip was rated, by a press or by expiring.
    Judged {
        object: ObjectId,
        rating: HitRating,
        delta: MapTime,
    },
    /// Combo broke. Carries the lane for chips.
    Miss { lane: Option<usize> },
    LaserSlamHit { lane: usize },
    ComboChanged { combo: u32 },
}

/// Whole combo ticks in `held` ms of a hold or laser.
#[inline(always)]
fn combo_ticks(held: MapTime, tp: &TimingPoint) -> u32 {
    (held as f64 * tp.numerator as f64 / tp.beat_duration).floor() as u32
}

#[inline(always)]
fn sign(v: f32) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

#[derive(Debug)]
pub struct Scoring {
    chart: Arc<Chart>,
    windows: JudgementWindows,
    playback: Option<Playback>,
    hittable: BTreeSet<ObjectId>,
    pub autoplay: bool,

    pub current_max_score: u32,
    pub current_hit_score: u32,
    pub current_combo: u32,
    pub max_combo: u32,
    pub hit_stats: Vec<HitStat>,

    active_holds: [Option<ObjectId>; NUM_BUTTON_LANES],
    hold_duration: [MapTime; NUM_BUTTON_LANES],

    laser_input: [f32; NUM_LASER_LANES],
    pub laser_positions: [f32; NUM_LASER_LANES],
    pub laser_target_positions: [f32; NUM_LASER_LANES],
    active_lasers: [Option<ObjectId>; NUM_LASER_LANES],
    laser_hold_objects: [Option<ObjectId>; NUM_LASER_LANES],
    laser_hold_duration: [MapTime; NUM_LASER_LANES],
    laser_miss_duration: [MapTime; NUM_LASER_LANES],
    laser_active: [bool; NUM_LASER_LANES],

    events: Vec<ScoreEvent>,
}

impl Scoring {
    pub fn new(chart: Arc<Chart>, windows: JudgementWindows) -> Self {
        Self {
            chart,
            windows,
            playback: None,
            hittable: BTreeSet::new(),
            autoplay: false,
            current_max_score: 0,
            current_hit_score: 0,
            current_combo: 0,
            max_combo: 0,
            hit_stats: Vec::new(),
            active_holds: [None; NUM_BUTTON_LANES],
            hold_duration: [0; NUM_BUTTON_LANES],
            laser_input: [0.0; NUM_LASER_LANES],
            laser_positions: [0.0, 1.0],
            laser_target_positions: [0.0; NUM_LASER_LANES],
            active_lasers: [None; NUM_LASER_LANES],
            laser_hold_objects: [None; NUM_LASER_LANES],
            laser_hold_duration: [0; NUM_LASER_LANES],
            laser_miss_duration: [0; NUM_LASER_LANES],
            laser_active: [false; NUM_LASER_LANES],
            events: Vec::new(),
        }
    }

    pub fn bind_playback(&mut self, playback: Playback) {
        self.playback = Some(playback);
    }

    pub fn playback(&self) -> Option<&Playback> {
        self.playback.as_ref()
    }

    pub fn chart(&self) -> &Chart {
        &self.chart
    }

    pub fn hittable(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.hittable.iter().copied()
    }

    fn now(&self) -> MapTime {
        match &self.playback {
            Some(playback) => playback.time(),
            None => panic!("Scoring used before a playback was bound"),
        }
    }

    /// Advances play by `delta` ms and returns everything that happened,
    /// including events from presses made since the previous call.
    pub fn tick(&mut self, delta: MapTime) -> Vec<ScoreEvent> {
        let Some(playback) = self.playback.as_mut() else {
            panic!("Scoring::tick called before a playback was bound");
        };
        if delta <= 0 {
            return Vec::new();
        }

        let update = playback.advance(&self.chart, delta);
        let now = playback.time();
        self.hittable.extend(update.entered.iter().copied());
        for id in update.left {
            if !self.hittable.remove(&id) {
                continue;
            }
            match self.chart.objects[id.0] {
                ObjectState::Single(single) => {
                    debug!("Chip on lane {} at {} expired", single.lane, single.time);
                    self.register_hit(id);
                }
                ObjectState::Hold(hold) if self.active_holds[hold.lane] == Some(id) => {
                    self.tick_hold(id, &hold, now, delta);
                }
                ObjectState::Hold(hold) => {
                    debug!("Hold on lane {} at {} expired unheld", hold.lane, hold.time);
                    self.register_miss(None);
                }
                _ => {}
            }
        }

        let mut auto_presses: SmallVec<[usize; NUM_BUTTON_LANES]> = SmallVec::new();
        let ids: Vec<ObjectId> = self.hittable.iter().copied().collect();
        for id in ids {
            if !self.hittable.contains(&id) {
                continue;
            }
            let object = self.chart.objects[id.0];
            match object {
                ObjectState::Hold(hold) => self.tick_hold(id, &hold, now, delta),
                ObjectState::Single(single) => {
                    if self.autoplay && now - single.time >= 0 && !auto_presses.contains(&single.lane) {
                        auto_presses.push(single.lane);
                    }
                }
                ObjectState::Laser(laser) => {
                    let lane = laser.lane;
                    if self.active_lasers[lane].is_none()
                        && now >= laser.time
                        && now - laser.end_time() < self.windows.laser_hit_ms
                    {
                        self.active_lasers[lane] = Some(id);
                        self.laser_active[lane] = true;
                    }
                }
                ObjectState::Event(_) => {}
            }
        }

        for lane in auto_presses {
            if self.on_button_pressed(lane).is_none() {
                warn!("Autoplay press on lane {lane} matched nothing at {now}");
            }
        }

        for lane in 0..NUM_LASER_LANES {
            self.tick_laser(lane, now, delta);
        }

        std::mem::take(&mut self.events)
    }

    fn tick_hold(&mut self, id: ObjectId, hold: &HoldObject, now: MapTime, delta: MapTime) {
        let lane = hold.lane;
        let hit_delta = now - hold.time;
        let end_delta = now - hold.end_time();

        if self.active_holds[lane] != Some(id) {
            // Another segment of this lane's chain is being held.
            if self.active_holds[lane].is_some() {
                return;
            }
            if self.autoplay && hit_delta >= 0 && end_delta < 0 {
                self.on_button_pressed(lane);
            }
            if self.active_holds[lane] != Some(id)
                && hit_delta.abs() > self.windows.good_ms
                && end_delta.abs() > self.windows.good_ms
            {
                debug!("Hold on lane {lane} at {} dropped", hold.time);
                self.hittable.remove(&id);
                self.register_miss(None);
            }
            return;
        }

        let tp = *self.chart.timing_point_at(hold.time);
        let last = combo_ticks(self.hold_duration[lane], &tp);
        self.hold_duration[lane] = (self.hold_duration[lane] + delta).min(hold.duration - 1);
        let current = combo_ticks(self.hold_duration[lane], &tp);
        for _ in last..current {
            self.current_hit_score += 1;
            self.current_max_score += 1;
            self.add_combo();
        }

        if end_delta > 0 {
            self.hittable.remove(&id);
            match hold.next {
                Some(next) if self.hittable.contains(&next) => {
                    self.active_holds[lane] = Some(next);
                    self.hold_duration[lane] = 0;
                }
                _ => self.on_button_released(lane),
            }
        }
    }

    fn tick_laser(&mut self, lane: usize, now: MapTime, delta: MapTime) {
        let Some(id) = self.active_lasers[lane] else {
            return;
        };
        let ObjectState::Laser(laser) = self.chart.objects[id.0] else {
            return;
        };

        if self.autoplay {
            self.laser_input[lane] = laser.direction();
        }

        let target = laser.sample(now);
        self.laser_target_positions[lane] = target;
        let direction = laser.points[1] - laser.points[0];
        let controlled = sign(direction) == sign(self.laser_input[lane]);
        let hit_delta = now - laser.time;
        let end_delta = now - laser.end_time();

        if laser.is_instant() {
            if controlled {
                self.current_hit_score += 1;
                self.current_max_score += 1;
                self.add_combo();
                self.events.push(ScoreEvent::LaserSlamHit { lane });
                self.laser_positions[lane] = target;
                self.advance_laser(lane, &laser);
            } else if hit_delta > self.windows.laser_hit_ms {
                self.current_max_score += 1;
                self.register_miss(None);
                self.laser_active[lane] = false;
                self.advance_laser(lane, &laser);
            }
        } else {
            let tp = *self.chart.timing_point_at(laser.time);
            let last = combo_ticks(self.laser_hold_duration[lane], &tp);

            if !controlled {
                if direction != 0.0 {
                    self.laser_miss_duration[lane] += delta;
                }
            } else {
                self.laser_miss_duration[lane] = 0;
            }

            if end_delta > 0 {
                self.advance_laser(lane, &laser);
                self.laser_hold_duration[lane] = 0;
            } else if controlled || self.laser_miss_duration[lane] < self.windows.laser_miss_timeout_ms {
                self.laser_hold_duration[lane] =
                    (self.laser_hold_duration[lane] + delta).min(laser.duration - 1);
                self.laser_positions[lane] = target;
                self.laser_hold_objects[lane] = Some(id);
                self.laser_active[lane] = true;

                let current = combo_ticks(self.laser_hold_duration[lane], &tp);
                for _ in last..current {
                    self.current_hit_score += 1;
                    self.current_max_score += 1;
                    self.add_combo();
                }
            } else {
                self.laser_hold_duration[lane] = 0;
                self.laser_hold_objects[lane] = None;
                if self.laser_active[lane] {
                    self.laser_active[lane] = false;
                    self.register_miss(None);
                }
            }
        }

        if self.autoplay {
            self.laser_positions[lane] = self.laser_target_positions[lane];
        }
    }

    fn advance_laser(&mut self, lane: usize, laser: &LaserObject) {
        if let Some(id) = self.active_lasers[lane] {
            self.hittable.remove(&id);
        }
        match laser.next {
            Some(next) => {
                self.active_lasers[lane] = Some(next);
                self.laser_hold_duration[lane] = 0;
                let next_is_instant = matches!(
                    self.chart.objects[next.0],
                    ObjectState::Laser(l) if l.is_instant()
                );
                self.laser_hold_objects[lane] = if self.laser_active[lane] && !next_is_instant {
                    Some(next)
                } else {
                    None
                };
            }
            None => {
                self.active_lasers[lane] = None;
                self.laser_hold_objects[lane] = None;
                self.laser_active[lane] = false;
                self.laser_hold_duration[lane] = 0;
                self.laser_miss_duration[lane] = 0;
            }
        }
    }

    /// Matches a press on `lane` against the closest chip or hold within the
    /// good window. Chips are judged at once; holds become active.
    pub fn on_button_pressed(&mut self, lane: usize) -> Option<ObjectId> {
        let now = self.now();
        let mut best: Option<(ObjectId, MapTime)> = None;
        for &id in &self.hittable {
            let distance = match &self.chart.objects[id.0] {
                ObjectState::Single(s) if s.lane == lane => (s.time - now).abs(),
                ObjectState::Hold(h) if h.lane == lane => {
                    (h.time - now).abs().min((h.end_time() - now).abs())
                }
                _ => continue,
            };
            if distance > self.windows.good_ms {
                continue;
            }
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((id, distance)),
            }
        }

        let (id, _) = best?;
        if matches!(self.chart.objects[id.0], ObjectState::Hold(_)) {
            self.active_holds[lane] = Some(id);
            self.hold_duration[lane] = 0;
        } else {
            self.hittable.remove(&id);
            self.register_hit(id);
        }
        self.events.push(ScoreEvent::ButtonHit { lane, object: id });
        Some(id)
    }

    /// Lets go of `lane`. Combo ticks already granted are kept.
    pub fn on_button_released(&mut self, lane: usize) {
        if self.active_holds[lane].take().is_some() {
            self.hold_duration[lane] = 0;
        }
    }

    pub fn set_laser_input(&mut self, lane: usize, input: f32) {
        self.laser_input[lane] = input.clamp(-1.0, 1.0);
    }

    pub fn laser_input(&self, lane: usize) -> f32 {
        self.laser_input[lane]
    }

    pub fn is_active(&self, id: ObjectId) -> bool {
        match &self.chart.objects[id.0] {
            ObjectState::Hold(h) => self.active_holds[h.lane] == Some(id),
            ObjectState::Laser(l) => self.active_lasers[l.lane] == Some(id) && self.laser_active[l.lane],
            _ => false,
        }
    }

    pub fn active_laser(&self, lane: usize) -> Option<ObjectId> {
        self.active_lasers[lane]
    }

    /// Segment currently being followed on `lane`, if any.
    pub fn held_laser(&self, lane: usize) -> Option<ObjectId> {
        self.laser_hold_objects[lane]
    }

    /// Track roll requested by the active laser on `lane`.
    pub fn active_laser_roll(&self, lane: usize) -> f32 {
        if self.active_lasers[lane].is_none() {
            return 0.0;
        }
        match lane {
            0 => -self.laser_target_positions[0],
            _ => 1.0 - self.laser_target_positions[1],
        }
    }

    pub fn mean_hit_delta(&self) -> f64 {
        mean_hit_delta(&self.hit_stats)
    }

    /// Drains events raised outside of `tick` (presses between frames).
    pub fn take_events(&mut self) -> Vec<ScoreEvent> {
        std::mem::take(&mut self.events)
    }

    fn register_hit(&mut self, id: ObjectId) {
        let object = self.chart.objects[id.0];
        let delta = self.now() - object.time();
        let rating = rating_from_delta(delta, &self.windows);

        self.hit_stats.push(HitStat {
            object: id,
            time: object.time(),
            delta,
            rating,
        });
        self.current_max_score += MAX_HIT_SCORE;
        self.current_hit_score += rating.score();
        self.events.push(ScoreEvent::Judged {
            object: id,
            rating,
            delta,
        });

        if rating.is_miss() {
            let lane = match object {
                ObjectState::Single(s) => Some(s.lane),
                _ => None,
            };
            self.register_miss(lane);
        } else {
            self.add_combo();
        }
    }

    fn register_miss(&mut self, lane: Option<usize>) {
        self.events.push(ScoreEvent::Miss { lane });
        self.current_combo = 0;
        self.events.push(ScoreEvent::ComboChanged { combo: 0 });
    }

    fn add_combo(&mut self) {
        self.current_combo += 1;
        self.max_combo = self.max_combo.max(self.current_combo);
        self.events.push(ScoreEvent::ComboChanged {
            combo: self.current_combo,
        });
    }
}
