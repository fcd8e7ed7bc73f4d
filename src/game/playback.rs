use smallvec::SmallVec;

use crate::game::chart::{Chart, ObjectId, ObjectState};
use crate::game::timing::MapTime;

/// How far ahead of its time an object becomes hittable.
pub const LEAD_IN_MS: MapTime = 100;
/// How long after its end an object stays hittable.
pub const LEAD_OUT_MS: MapTime = 100;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PlaybackUpdate {
    pub entered: SmallVec<[ObjectId; 8]>,
    pub left: SmallVec<[ObjectId; 8]>,
}

/// Play cursor over a chart plus the window of objects near it.
#[derive(Debug, Clone)]
pub struct Playback {
    time: MapTime,
    next_index: usize,
    window: Vec<ObjectId>,
}

impl Playback {
    pub fn new(start_time: MapTime) -> Self {
        Self {
            time: start_time,
            next_index: 0,
            window: Vec::new(),
        }
    }

    #[inline(always)]
    pub fn time(&self) -> MapTime {
        self.time
    }

    pub fn window(&self) -> &[ObjectId] {
        &self.window
    }

    /// True once every object has entered and left the window.
    pub fn is_finished(&self, chart: &Chart) -> bool {
        self.next_index >= chart.objects.len() && self.window.is_empty()
    }

    /// Moves the cursor by `delta` ms. Events are passed over; they are never
    /// hittable.
    pub fn advance(&mut self, chart: &Chart, delta: MapTime) -> PlaybackUpdate {
        self.time += delta;
        let now = self.time;
        let mut update = PlaybackUpdate::default();

        while let Some(obj) = chart.objects.get(self.next_index)
            && obj.time() - LEAD_IN_MS <= now
        {
            let id = ObjectId(self.next_index);
            self.next_index += 1;
            if matches!(obj, ObjectState::Event(_)) {
                continue;
            }
            self.window.push(id);
            update.entered.push(id);
        }

        self.window.retain(|&id| {
            let gone = chart.object(id).end_time() + LEAD_OUT_MS < now;
            if gone {
                update.left.push(id);
            }
            !gone
        });
        update
    }
}
