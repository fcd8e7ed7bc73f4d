use bitflags::bitflags;
use serde::Serialize;

use crate::game::effects::EffectKind;
use crate::game::timing::{MapTime, TimingPoint, timing_point_index_at};

/// Four BT lanes followed by the two FX lanes.
pub const NUM_BUTTON_LANES: usize = 6;
pub const NUM_LASER_LANES: usize = 2;

/// Index of an object in [`Chart::objects`]. Stable once import finishes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ObjectId(pub usize);

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct LaserFlags: u8 {
        /// Slam: near-zero duration with differing endpoints.
        const INSTANT = 1 << 0;
        /// Positions span twice the normal track width.
        const EXTENDED = 1 << 1;
    }
}

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct TrackRollBehaviour: u8 {
        const NORMAL = 1 << 0;
        const BIGGER = 1 << 1;
        const BIGGEST = 1 << 2;
        /// Keep the current roll instead of following lasers.
        const KEEP = 1 << 3;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum SpinType {
    Full,
    Quarter,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Spin {
    pub kind: SpinType,
    /// -1 spins left, +1 spins right.
    pub direction: f32,
    /// In 192nd notes.
    pub duration: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct SingleObject {
    pub time: MapTime,
    pub lane: usize,
    pub sample_index: Option<u8>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct HoldObject {
    pub time: MapTime,
    pub lane: usize,
    pub duration: MapTime,
    pub effect_kind: EffectKind,
    pub effect_params: [i16; 2],
    pub prev: Option<ObjectId>,
    pub next: Option<ObjectId>,
}

impl HoldObject {
    #[inline(always)]
    pub fn end_time(&self) -> MapTime {
        self.time + self.duration
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct LaserObject {
    pub time: MapTime,
    pub lane: usize,
    pub duration: MapTime,
    /// Start and end position in `[0, 1]`.
    pub points: [f32; 2],
    pub flags: LaserFlags,
    pub spin: Option<Spin>,
    pub prev: Option<ObjectId>,
    pub next: Option<ObjectId>,
}

impl LaserObject {
    #[inline(always)]
    pub fn end_time(&self) -> MapTime {
        self.time + self.duration
    }

    #[inline(always)]
    pub fn is_instant(&self) -> bool {
        self.flags.contains(LaserFlags::INSTANT)
    }

    /// Sign of the required movement: -1, 0 or +1.
    pub fn direction(&self) -> f32 {
        let delta = self.points[1] - self.points[0];
        if delta == 0.0 { 0.0 } else { delta.signum() }
    }

    /// Position at `time`, linearly interpolated and clamped to the segment.
    pub fn sample(&self, time: MapTime) -> f32 {
        let f = ((time - self.time) as f32 / self.duration.max(1) as f32).clamp(0.0, 1.0);
        self.points[0] + (self.points[1] - self.points[0]) * f
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum EventKey {
    LaserEffectType,
    LaserEffectMix,
    SlamVolume,
    TrackRollBehaviour,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub enum EventData {
    LaserEffectType(EffectKind),
    LaserEffectMix(f32),
    SlamVolume(f32),
    TrackRollBehaviour(TrackRollBehaviour),
}

impl EventData {
    pub const fn key(&self) -> EventKey {
        match self {
            Self::LaserEffectType(_) => EventKey::LaserEffectType,
            Self::LaserEffectMix(_) => EventKey::LaserEffectMix,
            Self::SlamVolume(_) => EventKey::SlamVolume,
            Self::TrackRollBehaviour(_) => EventKey::TrackRollBehaviour,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct EventObject {
    pub time: MapTime,
    pub data: EventData,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub enum ObjectState {
    Single(SingleObject),
    Hold(HoldObject),
    Laser(LaserObject),
    Event(EventObject),
}

impl ObjectState {
    #[inline(always)]
    pub fn time(&self) -> MapTime {
        match self {
            Self::Single(o) => o.time,
            Self::Hold(o) => o.time,
            Self::Laser(o) => o.time,
            Self::Event(o) => o.time,
        }
    }

    pub fn end_time(&self) -> MapTime {
        match self {
            Self::Hold(o) => o.end_time(),
            Self::Laser(o) => o.end_time(),
            _ => self.time(),
        }
    }

    /// Button or laser lane, depending on the variant. Events have none.
    pub fn lane(&self) -> Option<usize> {
        match self {
            Self::Single(o) => Some(o.lane),
            Self::Hold(o) => Some(o.lane),
            Self::Laser(o) => Some(o.lane),
            Self::Event(_) => None,
        }
    }

    pub fn links(&self) -> (Option<ObjectId>, Option<ObjectId>) {
        match self {
            Self::Hold(o) => (o.prev, o.next),
            Self::Laser(o) => (o.prev, o.next),
            _ => (None, None),
        }
    }

    fn links_mut(&mut self) -> Option<(&mut Option<ObjectId>, &mut Option<ObjectId>)> {
        match self {
            Self::Hold(o) => Some((&mut o.prev, &mut o.next)),
            Self::Laser(o) => Some((&mut o.prev, &mut o.next)),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct ZoomControlPoint {
    pub time: MapTime,
    /// 0 = bottom, 1 = top.
    pub index: u8,
    pub zoom: f32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LaneHideTogglePoint {
    pub time: MapTime,
    /// In 192nd notes.
    pub duration: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChartStop {
    pub time: MapTime,
    pub duration: MapTime,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ChartSettings {
    pub title: String,
    pub artist: String,
    pub effector: String,
    pub illustrator: String,
    pub jacket_path: String,
    pub background: String,
    pub foreground: String,
    pub audio_no_fx: String,
    pub audio_fx: String,
    pub offset: MapTime,
    pub bpm: String,
    pub level: u8,
    pub difficulty: u8,
    pub preview_offset: MapTime,
    pub preview_duration: MapTime,
    pub total: u32,
    pub laser_effect_type: EffectKind,
    pub laser_effect_mix: f32,
    pub slam_volume: f32,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Chart {
    pub settings: ChartSettings,
    pub timing_points: Vec<TimingPoint>,
    pub objects: Vec<ObjectState>,
    pub zoom_points: Vec<ZoomControlPoint>,
    pub lane_toggle_points: Vec<LaneHideTogglePoint>,
    pub chart_stops: Vec<ChartStop>,
    pub sample_paths: Vec<String>,
}

impl Chart {
    #[inline(always)]
    pub fn object(&self, id: ObjectId) -> &ObjectState {
        &self.objects[id.0]
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        (0..self.objects.len()).map(ObjectId)
    }

    pub fn timing_point_at(&self, time: MapTime) -> &TimingPoint {
        &self.timing_points[timing_point_index_at(&self.timing_points, time)]
    }

    pub fn count_where(&self, pred: impl Fn(&ObjectState) -> bool) -> usize {
        self.objects.iter().filter(|o| pred(o)).count()
    }
}

/// Stable sort by time, rewriting chain links to follow their objects.
pub fn sort_objects(objects: &mut Vec<ObjectState>) {
    let mut order: Vec<usize> = (0..objects.len()).collect();
    order.sort_by_key(|&i| objects[i].time());
    if order.iter().enumerate().all(|(new, &old)| new == old) {
        return;
    }

    let mut remap = vec![0; objects.len()];
    for (new, &old) in order.iter().enumerate() {
        remap[old] = new;
    }

    let mut sorted: Vec<ObjectState> = order.iter().map(|&old| objects[old]).collect();
    for obj in &mut sorted {
        if let Some((prev, next)) = obj.links_mut() {
            *prev = prev.map(|id| ObjectId(remap[id.0]));
            *next = next.map(|id| ObjectId(remap[id.0]));
        }
    }
    *objects = sorted;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(time: MapTime, lane: usize) -> ObjectState {
        ObjectState::Single(SingleObject {
            time,
            lane,
            sample_index: None,
        })
    }

    fn laser(time: MapTime, duration: MapTime, prev: Option<usize>, next: Option<usize>) -> ObjectState {
        ObjectState::Laser(LaserObject {
            time,
            lane: 0,
            duration,
            points: [0.0, 1.0],
            flags: LaserFlags::empty(),
            spin: None,
            prev: prev.map(ObjectId),
            next: next.map(ObjectId),
        })
    }

    #[test]
    fn sort_remaps_chain_links() {
        // Chain 0 -> 2, with a single at t=50 inserted out of order.
        let mut objects = vec![laser(100, 100, None, Some(2)), single(50, 1), laser(200, 50, Some(0), None)];
        sort_objects(&mut objects);

        let times: Vec<MapTime> = objects.iter().map(ObjectState::time).collect();
        assert_eq!(times, vec![50, 100, 200]);
        assert_eq!(objects[1].links(), (None, Some(ObjectId(2))));
        assert_eq!(objects[2].links(), (Some(ObjectId(1)), None));
    }

    #[test]
    fn sort_is_stable_and_idempotent() {
        let mut objects = vec![single(10, 0), single(10, 1), single(5, 2), single(10, 3)];
        sort_objects(&mut objects);
        let lanes: Vec<Option<usize>> = objects.iter().map(ObjectState::lane).collect();
        assert_eq!(lanes, vec![Some(2), Some(0), Some(1), Some(3)]);

        let once = objects.clone();
        sort_objects(&mut objects);
        assert_eq!(objects, once, "re-sorting a sorted collection must not reorder it");
    }

    #[test]
    fn laser_sampling_is_clamped() {
        let ObjectState::Laser(l) = laser(100, 200, None, None) else {
            unreachable!()
        };
        assert_eq!(l.sample(0), 0.0);
        assert_eq!(l.sample(200), 0.5);
        assert_eq!(l.sample(1000), 1.0);
        assert_eq!(l.direction(), 1.0);
    }

    #[test]
    fn timing_point_lookup_uses_active_point() {
        let chart = Chart {
            timing_points: vec![TimingPoint::from_bpm(0, 120.0), TimingPoint::from_bpm(4000, 60.0)],
            ..Chart::default()
        };
        assert_eq!(chart.timing_point_at(3999).beat_duration, 500.0);
        assert_eq!(chart.timing_point_at(4000).beat_duration, 1000.0);
    }

    #[test]
    fn event_keys_follow_payload() {
        let data = EventData::TrackRollBehaviour(TrackRollBehaviour::KEEP | TrackRollBehaviour::BIGGER);
        assert_eq!(data.key(), EventKey::TrackRollBehaviour);
        assert_eq!(EventData::SlamVolume(0.5).key(), EventKey::SlamVolume);
    }
}
